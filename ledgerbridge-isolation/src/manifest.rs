//! Side-by-side assembly manifests for a staged engine binary.
//!
//! The manifest declares one `file` with a single `comClass` and the type
//! library that describes it. The OS uses it to resolve the class without
//! consulting the system registry.

use ledgerbridge_types::{ClassId, EngineIdentity, ThreadingModel};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{IsolationError, IsolationResult};
use crate::typelib::TypeLibReader;

/// Suffix appended to the binary's stem to name its manifest.
pub const MANIFEST_SUFFIX: &str = ".sxs.manifest";

const ASSEMBLY_VERSION: &str = "1.0.0.0";

/// Type library entry of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeLibRef {
    pub lib_id: ClassId,
    pub major: u16,
    pub minor: u16,
}

impl TypeLibRef {
    #[must_use]
    pub fn version(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

/// Everything needed to render an isolation manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSpec {
    /// File name of the binary, relative to the manifest's directory.
    pub binary_name: String,
    pub class_id: ClassId,
    pub prog_id: String,
    pub threading_model: ThreadingModel,
    pub typelib: Option<TypeLibRef>,
}

impl ManifestSpec {
    /// Assembly name derived from the binary stem, restricted to the
    /// characters the loader accepts.
    #[must_use]
    pub fn assembly_name(&self) -> String {
        let stem = self
            .binary_name
            .rsplit_once('.')
            .map_or(self.binary_name.as_str(), |(stem, _)| stem);
        let cleaned: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
            .collect();
        format!("LedgerBridge.Engine.{cleaned}")
    }

    /// Renders the manifest XML.
    #[must_use]
    pub fn render(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n");
        xml.push_str(
            "<assembly xmlns=\"urn:schemas-microsoft-com:asm.v1\" manifestVersion=\"1.0\">\n",
        );
        xml.push_str(&format!(
            "  <assemblyIdentity type=\"win32\" name=\"{}\" version=\"{ASSEMBLY_VERSION}\"/>\n",
            escape(&self.assembly_name())
        ));
        xml.push_str(&format!("  <file name=\"{}\">\n", escape(&self.binary_name)));

        let tlbid = self
            .typelib
            .map(|tlb| format!(" tlbid=\"{}\"", tlb.lib_id))
            .unwrap_or_default();
        xml.push_str(&format!(
            "    <comClass clsid=\"{}\" threadingModel=\"{}\" progid=\"{}\"{tlbid}/>\n",
            self.class_id,
            self.threading_model,
            escape(&self.prog_id),
        ));

        if let Some(tlb) = &self.typelib {
            xml.push_str(&format!(
                "    <typelib tlbid=\"{}\" version=\"{}\" helpdir=\"\"/>\n",
                tlb.lib_id,
                tlb.version()
            ));
        }

        xml.push_str("  </file>\n");
        xml.push_str("</assembly>\n");
        xml
    }
}

/// Path of the manifest generated for `binary`.
#[must_use]
pub fn manifest_path_for(binary: &Path) -> PathBuf {
    let stem = binary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "engine".to_string());
    binary.with_file_name(format!("{stem}{MANIFEST_SUFFIX}"))
}

/// Builds the manifest for `binary` and writes it next to the binary.
///
/// The class id comes from `identity` when set; otherwise the type library
/// embedded in the binary is read and the coclass named by the identity is
/// looked up. The type library entry is included whenever it can be read.
pub fn create_manifest(
    binary: &Path,
    identity: &EngineIdentity,
    reader: &dyn TypeLibReader,
) -> IsolationResult<PathBuf> {
    let binary_name = binary
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            IsolationError::Manifest(format!("invalid binary path {}", binary.display()))
        })?
        .to_string();

    let typelib = match reader.read(binary) {
        Ok(info) => Some(info),
        Err(e) => {
            debug!(path = %binary.display(), "Type library unavailable: {}", e);
            None
        }
    };

    let class_id = identity
        .class_id
        .or_else(|| {
            typelib
                .as_ref()
                .and_then(|info| info.coclass(&identity.coclass))
                .map(|coclass| coclass.class_id)
        })
        .ok_or_else(|| {
            IsolationError::Manifest(format!(
                "no class id for coclass {} in {}",
                identity.coclass,
                binary.display()
            ))
        })?;

    let spec = ManifestSpec {
        binary_name,
        class_id,
        prog_id: identity.prog_id.clone(),
        threading_model: identity.threading_model,
        typelib: typelib.map(|info| TypeLibRef {
            lib_id: info.lib_id,
            major: info.major,
            minor: info.minor,
        }),
    };

    let path = manifest_path_for(binary);
    fs::write(&path, spec.render())?;
    info!(
        path = %path.display(),
        clsid = %class_id,
        prog_id = %identity.prog_id,
        "Wrote isolation manifest"
    );
    Ok(path)
}

/// The `file name` declared by a manifest.
#[must_use]
pub fn read_binary_name(xml: &str) -> Option<String> {
    attribute_of(xml, "file", "name")
}

/// The `comClass clsid` declared by a manifest.
#[must_use]
pub fn read_class_id(xml: &str) -> Option<ClassId> {
    attribute_of(xml, "comClass", "clsid").and_then(|s| ClassId::parse(&s).ok())
}

/// The `comClass progid` declared by a manifest.
#[must_use]
pub fn read_prog_id(xml: &str) -> Option<String> {
    attribute_of(xml, "comClass", "progid")
}

/// True if the manifest at `path` declares `identity`'s programmatic id and,
/// when the identity carries one, its class id.
#[must_use]
pub fn declares(path: &Path, identity: &EngineIdentity) -> bool {
    let Ok(xml) = fs::read_to_string(path) else {
        return false;
    };
    let prog_id_matches = read_prog_id(&xml).as_deref() == Some(identity.prog_id.as_str());
    let class_id_matches = identity
        .class_id
        .is_none_or(|class_id| read_class_id(&xml) == Some(class_id));
    prog_id_matches && class_id_matches
}

/// Resolves the binary a manifest on disk points at.
pub fn binary_for_manifest(manifest: &Path) -> IsolationResult<PathBuf> {
    let xml = fs::read_to_string(manifest)?;
    let name = read_binary_name(&xml).ok_or_else(|| {
        IsolationError::Manifest(format!("{} declares no file", manifest.display()))
    })?;
    let dir = manifest.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(name))
}

// Finds `attr="..."` on the first `<element ` tag. Only reads manifests this
// module wrote, so a full XML parser is not needed.
fn attribute_of(xml: &str, element: &str, attr: &str) -> Option<String> {
    let open = format!("<{element} ");
    let start = xml.find(&open)? + open.len();
    let tag = &xml[start..start + xml[start..].find('>')?];

    let key = format!("{attr}=\"");
    let mut rest = tag;
    while let Some(pos) = rest.find(&key) {
        let boundary = pos == 0 || rest.as_bytes()[pos - 1].is_ascii_whitespace();
        let value_start = pos + key.len();
        if boundary {
            let len = rest[value_start..].find('"')?;
            return Some(unescape(&rest[value_start..value_start + len]));
        }
        rest = &rest[value_start..];
    }
    None
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
