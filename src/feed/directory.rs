use anyhow::Result;
use glob::Pattern;
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::Feed;
use crate::catalog::Catalog;
use crate::identity::{PackageId, matches_wildcard, wildcard};
use crate::runtime::Runtime;

/// Package files in one directory, or with `recursive` in a whole tree.
/// The files are listed once per session.
pub struct DirectoryFeed {
    location: String,
    directory: PathBuf,
    pattern: Pattern,
    recursive: bool,
    runtime: Arc<dyn Runtime>,
    scanned: Mutex<Option<Vec<PackageId>>>,
}

impl DirectoryFeed {
    pub fn new(location: &str, directory: &Path, pattern: &str, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            location: location.to_string(),
            directory: directory.to_path_buf(),
            pattern: wildcard(pattern),
            recursive: false,
            runtime,
            scanned: Mutex::new(None),
        }
    }

    /// Also walk subdirectories. Symlinked directories are not followed.
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Candidate files, skipping sub-paths the catalog excludes from scanning.
    fn files(&self, catalog: &Catalog) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![self.directory.clone()];
        while let Some(dir) = pending.pop() {
            let entries = match self.runtime.read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if dir != self.directory => {
                    debug!("Skipping unreadable {}: {:#}", dir.display(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            for path in entries {
                if self.runtime.is_dir(&path) {
                    if !self.recursive || self.runtime.is_symlink(&path) {
                        continue;
                    }
                    if catalog.is_excluded(&path.to_string_lossy()) {
                        debug!("Not scanning excluded {}", path.display());
                        continue;
                    }
                    pending.push(path);
                    continue;
                }
                if self.recursive && catalog.is_excluded(&path.to_string_lossy()) {
                    continue;
                }
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn packages(&self, catalog: &Catalog) -> Result<Vec<PackageId>> {
        let mut scanned = self.scanned.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ids) = scanned.as_ref() {
            return Ok(ids.clone());
        }

        let mut ids = Vec::new();
        for path in self.files(catalog)? {
            let matches = path
                .file_name()
                .is_some_and(|name| matches_wildcard(&self.pattern, &name.to_string_lossy()));
            if !matches {
                continue;
            }
            match catalog.get_or_build_from_file(&path) {
                Ok(id) => {
                    catalog.add_feed_location(&id, &self.location)?;
                    ids.push(id);
                }
                Err(e) => debug!("Skipping {}: {:#}", path.display(), e),
            }
        }
        debug!("Feed {} holds {} packages", self.location, ids.len());
        *scanned = Some(ids.clone());
        Ok(ids)
    }
}

impl Feed for DirectoryFeed {
    fn location(&self) -> &str {
        &self.location
    }

    fn find_packages(&self, catalog: &Catalog, filter: &str) -> Result<Vec<PackageId>> {
        let filter = wildcard(filter);
        Ok(self
            .packages(catalog)?
            .into_iter()
            .filter(|id| matches_wildcard(&filter, id.as_str()))
            .collect())
    }
}
