//! Gzip tar packages carrying a `package.json` manifest at the archive root.
//! Installing unpacks the payload into `apps/<cosmetic-name>` and records a
//! receipt under the state directory.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tar::EntryType;

use super::{FormatHandler, ProgressFn};
use crate::config::Config;
use crate::error::PackageError;
use crate::identity::PackageIdentity;
use crate::package::{Package, PackageManifest, PackageMetadata};
use crate::runtime::{Runtime, is_path_under, normalize_path};

pub const MANIFEST_NAME: &str = "package.json";

/// Written when a package is installed; its presence means "installed".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InstallReceipt {
    pub canonical_name: String,
    /// Copy of the package file kept in the package cache.
    pub package_file: PathBuf,
    pub installed_to: PathBuf,
}

type PackageArchive = tar::Archive<GzDecoder<Box<dyn Read + Send>>>;

pub struct ArchiveFormat {
    runtime: Arc<dyn Runtime>,
    config: Config,
}

impl ArchiveFormat {
    pub fn new(runtime: Arc<dyn Runtime>, config: Config) -> Self {
        Self { runtime, config }
    }

    fn receipt_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.config
            .receipts_dir()
            .join(format!("{}.json", identity.canonical_name()))
    }

    fn open_archive(&self, path: &Path) -> Result<PackageArchive> {
        let reader = self.runtime.open(path)?;
        Ok(tar::Archive::new(GzDecoder::new(reader)))
    }

    fn count_entries(&self, path: &Path) -> Result<usize> {
        let mut archive = self.open_archive(path)?;
        let mut count = 0;
        for entry in archive.entries()? {
            entry.with_context(|| format!("Corrupt archive {}", path.display()))?;
            count += 1;
        }
        Ok(count)
    }

    fn unpack(
        &self,
        archive_path: &Path,
        dest: &Path,
        total: usize,
        progress: &mut ProgressFn<'_>,
    ) -> Result<()> {
        let mut archive = self.open_archive(archive_path)?;
        let mut done = 0usize;
        let mut reported = 0u8;

        for entry in archive.entries()? {
            let mut entry =
                entry.with_context(|| format!("Corrupt archive {}", archive_path.display()))?;
            let relative = entry.path()?.into_owned();
            done += 1;

            if is_manifest(&relative) {
                continue;
            }
            if !is_enclosed(&relative) {
                warn!("Skipping archive entry outside the package: {}", relative.display());
                continue;
            }

            let full_path = dest.join(&relative);
            let entry_type = entry.header().entry_type();
            match entry_type {
                EntryType::Directory => self.runtime.create_dir_all(&full_path)?,
                EntryType::Regular | EntryType::Continuous => {
                    if let Some(parent) = full_path.parent() {
                        self.runtime.create_dir_all(parent)?;
                    }
                    {
                        let mut out = self.runtime.create_file(&full_path)?;
                        std::io::copy(&mut entry, &mut out)
                            .with_context(|| format!("Failed to extract {}", full_path.display()))?;
                    }
                    if let Ok(mode) = entry.header().mode()
                        && let Err(e) = self.runtime.set_permissions(&full_path, mode)
                    {
                        debug!("Failed to set permissions on {:?}: {}", full_path, e);
                    }
                }
                EntryType::Symlink => {
                    let Some(target) = entry.link_name()?.map(|t| t.into_owned()) else {
                        continue;
                    };
                    let parent = full_path.parent().unwrap_or(dest);
                    if target.is_absolute() || !is_path_under(&parent.join(&target), dest) {
                        warn!(
                            "Skipping link {} pointing outside the package: {}",
                            relative.display(),
                            target.display()
                        );
                        continue;
                    }
                    self.runtime.create_dir_all(parent)?;
                    self.runtime.symlink(&target, &full_path)?;
                }
                other => debug!("Skipping {:?} entry {}", other, relative.display()),
            }

            let percent = ((done * 100) / total.max(1)).min(100) as u8;
            if percent != reported {
                reported = percent;
                progress(percent);
            }
        }
        Ok(())
    }

    /// Keeps a copy of the package file in the package cache so the installed
    /// package can be rediscovered later.
    fn cache_package_file(&self, identity: &PackageIdentity, source: &Path) -> Result<PathBuf> {
        let cache_dir = self.config.package_cache_dir();
        let cached = cache_dir.join(format!("{}.tgz", identity.canonical_name()));
        if normalize_path(source) != cached {
            self.runtime.create_dir_all(&cache_dir)?;
            self.runtime.copy(source, &cached)?;
        }
        Ok(cached)
    }

    fn read_receipt(&self, path: &Path) -> Result<InstallReceipt> {
        let content = self.runtime.read_to_string(path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid install receipt {}", path.display()))
    }
}

impl FormatHandler for ArchiveFormat {
    #[tracing::instrument(skip(self))]
    fn read_metadata(&self, path: &Path) -> Result<PackageMetadata> {
        let mut archive = self.open_archive(path)?;
        let entries = archive
            .entries()
            .map_err(|_| PackageError::not_package_format(path))?;

        for entry in entries {
            let mut entry = entry.map_err(|_| PackageError::not_package_format(path))?;
            let entry_path = entry
                .path()
                .map_err(|_| PackageError::not_package_format(path))?
                .into_owned();
            if !is_manifest(&entry_path) {
                continue;
            }

            let mut content = String::new();
            entry
                .read_to_string(&mut content)
                .map_err(|e| PackageError::malformed(path, e.to_string()))?;
            let manifest: PackageManifest = serde_json::from_str(&content)
                .map_err(|e| PackageError::malformed(path, e.to_string()))?;
            return manifest
                .into_metadata()
                .map_err(|e| PackageError::malformed(path, format!("{:#}", e)).into());
        }

        Err(PackageError::not_package_format(path).into())
    }

    fn is_installed(&self, identity: &PackageIdentity) -> bool {
        self.runtime.exists(&self.receipt_path(identity))
    }

    fn installed_package_files(&self) -> Result<Vec<PathBuf>> {
        let receipts_dir = self.config.receipts_dir();
        if !self.runtime.exists(&receipts_dir) {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for path in self.runtime.read_dir(&receipts_dir)? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_receipt(&path) {
                Ok(receipt) => files.push(receipt.package_file),
                Err(e) => warn!("Ignoring receipt {}: {:#}", path.display(), e),
            }
        }
        Ok(files)
    }

    fn package_directory(&self, identity: &PackageIdentity) -> PathBuf {
        self.config.apps_dir().join(identity.cosmetic_name())
    }

    #[tracing::instrument(skip(self, package, progress), fields(package = %package.identity()))]
    fn install(&self, package: &Package, progress: &mut ProgressFn<'_>) -> Result<()> {
        let identity = package.identity();
        let source = package
            .local_path
            .current()
            .cloned()
            .with_context(|| format!("No local copy of {}", identity))?;
        let dest = self.package_directory(identity);
        let staging = self
            .config
            .apps_dir()
            .join(format!(".{}.partial", identity.cosmetic_name()));

        info!("Installing {} into {}", identity, dest.display());
        progress(0);

        if self.runtime.exists(&staging) {
            self.runtime.remove_dir_all(&staging)?;
        }
        self.runtime.create_dir_all(&staging)?;

        let unpacked = self
            .count_entries(&source)
            .and_then(|total| self.unpack(&source, &staging, total, progress));
        if let Err(e) = unpacked {
            if let Err(cleanup) = self.runtime.remove_dir_all(&staging) {
                debug!("Failed to clean up {:?}: {}", staging, cleanup);
            }
            return Err(e.context(format!("Failed to unpack {}", source.display())));
        }

        if self.runtime.exists(&dest) {
            self.runtime.remove_dir_all(&dest)?;
        }
        self.runtime.rename(&staging, &dest)?;

        let receipt = InstallReceipt {
            canonical_name: identity.canonical_name().to_string(),
            package_file: self.cache_package_file(identity, &source)?,
            installed_to: dest,
        };
        self.runtime.create_dir_all(&self.config.receipts_dir())?;
        self.runtime.write(
            &self.receipt_path(identity),
            serde_json::to_string_pretty(&receipt)?.as_bytes(),
        )?;

        progress(100);
        Ok(())
    }

    #[tracing::instrument(skip(self, package, progress), fields(package = %package.identity()))]
    fn remove(&self, package: &Package, progress: &mut ProgressFn<'_>) -> Result<()> {
        let identity = package.identity();
        progress(0);

        let dest = self.package_directory(identity);
        if self.runtime.exists(&dest) {
            info!("Removing {}", dest.display());
            self.runtime.remove_dir_all(&dest)?;
        }
        progress(50);

        let receipt = self.receipt_path(identity);
        if self.runtime.exists(&receipt) {
            self.runtime.remove_file(&receipt)?;
        }
        progress(100);
        Ok(())
    }
}

fn is_manifest(path: &Path) -> bool {
    normalize_path(path) == Path::new(MANIFEST_NAME)
}

/// Relative, and never climbing out of the extraction directory.
fn is_enclosed(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
