//! Acquisition: fetching a local copy of a package known only by its
//! remote locations.

mod retry;

pub use retry::{NonRetryableError, check_retryable, classify_error};

use retry::{MAX_RETRIES, RETRY_DELAY_MS};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Url};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::package::Package;
use crate::runtime::Runtime;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Stores a copy of `package` in `destination_dir` and returns its path.
    async fn acquire(&self, package: &Package, destination_dir: &Path) -> Result<PathBuf>;
}

/// Fetches packages over HTTP(S), from `file://` URLs, or from plain paths.
/// Remote locations are tried in order until one succeeds.
pub struct RemoteAcquirer {
    client: Client,
    runtime: Arc<dyn Runtime>,
    retry_delay: Duration,
}

impl RemoteAcquirer {
    pub fn new(runtime: Arc<dyn Runtime>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("trellis/{}", env!("TRELLIS_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            runtime,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    #[cfg(test)]
    fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn fetch(&self, location: &str, dest: &Path) -> Result<u64> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return self.download(location, dest).await;
        }
        let source = if location.starts_with("file://") {
            Url::parse(location)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| anyhow!("Invalid file URL: {}", location))?
        } else if location.contains("://") {
            bail!("Unsupported location scheme: {}", location);
        } else {
            PathBuf::from(location)
        };
        self.runtime
            .copy(&source, dest)
            .with_context(|| format!("Failed to copy {}", source.display()))
    }

    #[tracing::instrument(skip(self))]
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match self.download_once(url, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    if e.downcast_ref::<NonRetryableError>().is_some() {
                        return Err(e);
                    }
                    if attempt < MAX_RETRIES {
                        warn!(
                            "Download attempt {}/{} failed ({}), retrying...",
                            attempt, MAX_RETRIES, e
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Download failed after {} attempts", MAX_RETRIES)))
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download request")?;
        let mut response = response.error_for_status().map_err(check_retryable)?;

        let mut writer = self.runtime.create_file(dest)?;
        let mut downloaded_bytes: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            writer
                .write_all(&chunk)
                .context("Failed to write chunk to file")?;
            downloaded_bytes += chunk.len() as u64;
        }
        writer.flush()?;

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );
        Ok(downloaded_bytes)
    }
}

#[async_trait]
impl Acquirer for RemoteAcquirer {
    #[tracing::instrument(skip(self, package), fields(package = %package.identity()))]
    async fn acquire(&self, package: &Package, destination_dir: &Path) -> Result<PathBuf> {
        if package.remote_location.is_empty() {
            bail!("{} has no remote location", package.identity());
        }

        let file_name = format!("{}.tgz", package.identity().canonical_name());
        let target = destination_dir.join(&file_name);
        let partial = destination_dir.join(format!("{}.partial", file_name));
        self.runtime.create_dir_all(destination_dir)?;

        let mut last_error = None;
        for location in package.remote_location.values() {
            info!("Fetching {} from {}", package.identity(), location);
            match self.fetch(location, &partial).await {
                Ok(_) => {
                    self.runtime.rename(&partial, &target)?;
                    return Ok(target);
                }
                Err(e) => {
                    warn!("Could not fetch {}: {:#}", location, e);
                    if self.runtime.exists(&partial)
                        && let Err(cleanup) = self.runtime.remove_file(&partial)
                    {
                        debug!("Failed to clean up {:?}: {}", partial, cleanup);
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("Could not acquire {}", package.identity())))
    }
}
