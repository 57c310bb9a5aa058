//! Archive extraction and installer unpacking.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::error::{AcquireError, AcquireResult};

/// Sub-directory of the extraction dir that receives installer contents.
pub const INSTALLED_SUBDIR: &str = "installed";

/// Unpacks an installer package into a target directory without installing.
pub trait InstallerRunner: Send + Sync {
    fn extract(&self, package: &Path, target: &Path) -> AcquireResult<()>;
}

/// Runs `msiexec` as an administrative, unattended extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsiExec;

impl InstallerRunner for MsiExec {
    fn extract(&self, package: &Path, target: &Path) -> AcquireResult<()> {
        info!(
            package = %package.display(),
            target = %target.display(),
            "Extracting installer package"
        );
        let status = Command::new("msiexec")
            .arg("/a")
            .arg(package)
            .arg("/qn")
            .arg(format!("TARGETDIR={}", target.display()))
            .status()
            .map_err(|e| AcquireError::Installer(format!("failed to start msiexec: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(AcquireError::Installer(format!(
                "msiexec exited with {}",
                status.code().map_or_else(|| "signal".to_string(), |c| c.to_string())
            )))
        }
    }
}

/// Extracts `archive` into `dest`, deleting any previous contents first.
pub fn extract_archive(archive: &Path, dest: &Path) -> AcquireResult<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    let mut zip = ZipArchive::new(File::open(archive)?)
        .map_err(|e| AcquireError::Extraction(format!("{}: {e}", archive.display())))?;
    let entries = zip.len();
    zip.extract(dest)
        .map_err(|e| AcquireError::Extraction(format!("{}: {e}", archive.display())))?;

    info!(archive = %archive.display(), dest = %dest.display(), entries, "Extracted archive");
    Ok(())
}

/// First file under `root` whose name satisfies `matches`, in sorted walk
/// order so results are stable across runs.
pub fn find_file(root: &Path, matches: impl Fn(&str) -> bool) -> Option<PathBuf> {
    let found = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| entry.file_name().to_str().is_some_and(&matches))
        .map(walkdir::DirEntry::into_path);
    debug!(root = %root.display(), found = ?found, "File search");
    found
}
