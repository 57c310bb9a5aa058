//! Streaming archive download with progress, timeout and cancellation.

use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AcquireError, AcquireResult};

/// Bytes received so far and the advertised total, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub received: u64,
    pub total: Option<u64>,
}

pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// HTTP client for component archives.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    timeout: Duration,
}

impl Downloader {
    pub fn new(user_agent: &str, timeout: Duration) -> AcquireResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Downloads `url` to `dest` unless `dest` already exists.
    ///
    /// Data is streamed into `dest` with a `.part` suffix and renamed only
    /// once complete, so an existing `dest` is always a finished download.
    /// Returns the size of `dest` in bytes.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> AcquireResult<u64> {
        if let Ok(meta) = fs::metadata(dest).await {
            if meta.is_file() {
                debug!(path = %dest.display(), "Archive already downloaded");
                return Ok(meta.len());
            }
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let part = part_path(dest);

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.stream_to(url, &part, progress)) => {
                outcome.unwrap_or(Err(AcquireError::Timeout(self.timeout)))
            }
        };

        match result {
            Ok(received) => {
                fs::rename(&part, dest).await?;
                info!(url = %url, path = %dest.display(), bytes = received, "Downloaded archive");
                Ok(received)
            }
            Err(e) => {
                let _ = fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn stream_to(
        &self,
        url: &str,
        part: &Path,
        progress: Option<&ProgressCallback>,
    ) -> AcquireResult<u64> {
        info!(url = %url, "Downloading engine archive");
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AcquireError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length();
        let mut file = fs::File::create(part).await?;
        let mut received = 0u64;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let Some(report) = progress {
                report(DownloadProgress { received, total });
            }
        }

        file.flush().await?;
        Ok(received)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
