//! Package format handlers: read metadata from package files and perform
//! the actual install and uninstall.

mod archive;

pub use archive::{ArchiveFormat, InstallReceipt, MANIFEST_NAME};

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::identity::PackageIdentity;
use crate::package::{Package, PackageMetadata};

/// Progress callbacks receive whole percentages, 0 to 100.
pub type ProgressFn<'a> = dyn FnMut(u8) + 'a;

pub trait FormatHandler: Send + Sync {
    /// Reads package metadata. Files of another format fail with
    /// `PackageError::InvalidPackage` carrying `InvalidReason::NotPackageFormat`.
    fn read_metadata(&self, path: &Path) -> Result<PackageMetadata>;

    fn is_installed(&self, identity: &PackageIdentity) -> bool;

    /// Package files of everything currently installed.
    fn installed_package_files(&self) -> Result<Vec<PathBuf>>;

    /// Version-specific directory a package installs into.
    fn package_directory(&self, identity: &PackageIdentity) -> PathBuf;

    fn install(&self, package: &Package, progress: &mut ProgressFn<'_>) -> Result<()>;

    fn remove(&self, package: &Package, progress: &mut ProgressFn<'_>) -> Result<()>;
}
