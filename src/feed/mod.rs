//! Package feeds: sources a scan enumerates packages from.
//!
//! - `directory` - a local directory or tree (`dir/**`), optionally narrowed by a file glob
//! - `index` - a JSON index listing package manifests and where to fetch them
//! - `installed` - the packages the format handler reports as installed

mod directory;
mod index;
mod installed;

pub use directory::DirectoryFeed;
pub use index::{FeedIndex, IndexFeed};
pub use installed::InstalledFeed;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::{Catalog, INSTALLED_FEED};
use crate::identity::PackageId;
use crate::runtime::Runtime;

pub trait Feed: Send + Sync {
    fn location(&self) -> &str;

    /// Packages in this feed whose canonical name matches the wildcard
    /// `filter`. Packages are registered in `catalog` as a side effect.
    fn find_packages(&self, catalog: &Catalog, filter: &str) -> Result<Vec<PackageId>>;
}

/// Opens the feed at `location`, or `None` if nothing usable is there.
pub fn open(location: &str, runtime: Arc<dyn Runtime>) -> Option<Arc<dyn Feed>> {
    if location == INSTALLED_FEED {
        return Some(Arc::new(InstalledFeed));
    }

    let path = Path::new(location);
    if let Some((base, pattern)) = recursive_parts(path) {
        if runtime.is_dir(&base) {
            let feed = DirectoryFeed::new(location, &base, &pattern, runtime).recursive();
            return Some(Arc::new(feed));
        }
        return None;
    }
    if runtime.is_dir(path) {
        return Some(Arc::new(DirectoryFeed::new(location, path, "*", runtime)));
    }
    if runtime.exists(path) && location.to_ascii_lowercase().ends_with(".json") {
        return Some(Arc::new(IndexFeed::new(location, path, runtime)));
    }

    let parent = path.parent()?;
    let pattern = path.file_name()?.to_string_lossy().to_string();
    if (pattern.contains('*') || pattern.contains('?')) && runtime.is_dir(parent) {
        return Some(Arc::new(DirectoryFeed::new(location, parent, &pattern, runtime)));
    }
    None
}

/// Splits `dir/**` and `dir/**/<glob>` into the tree root and file glob.
fn recursive_parts(path: &Path) -> Option<(PathBuf, String)> {
    let name = path.file_name()?.to_string_lossy().to_string();
    let parent = path.parent()?;
    if name == "**" {
        return Some((parent.to_path_buf(), "*".to_string()));
    }
    if parent.file_name()? == "**" {
        return Some((parent.parent()?.to_path_buf(), name));
    }
    None
}

/// The feed location that scans `directory` and everything below it.
pub fn recursive_location(directory: &str) -> String {
    Path::new(directory).join("**").to_string_lossy().to_string()
}
