use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::Feed;
use crate::catalog::Catalog;
use crate::identity::{PackageId, matches_wildcard, wildcard};
use crate::package::PackageManifest;
use crate::runtime::{Runtime, absolutize};

/// On-disk form of an index feed.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct FeedIndex {
    #[serde(default)]
    pub packages: Vec<PackageManifest>,
}

/// A JSON index of package manifests. Packages listed here are known by
/// metadata only until acquired from their `original_location`.
pub struct IndexFeed {
    location: String,
    path: PathBuf,
    runtime: Arc<dyn Runtime>,
    loaded: Mutex<Option<Vec<PackageId>>>,
}

impl IndexFeed {
    pub fn new(location: &str, path: &Path, runtime: Arc<dyn Runtime>) -> Self {
        Self {
            location: location.to_string(),
            path: path.to_path_buf(),
            runtime,
            loaded: Mutex::new(None),
        }
    }

    /// Relative package locations are relative to the index file.
    fn resolve_location(&self, location: &str) -> String {
        if location.contains("://") {
            return location.to_string();
        }
        let base = self.path.parent().unwrap_or(Path::new(""));
        absolutize(base, Path::new(location))
            .to_string_lossy()
            .to_string()
    }

    fn packages(&self, catalog: &Catalog) -> Result<Vec<PackageId>> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ids) = loaded.as_ref() {
            return Ok(ids.clone());
        }

        let content = self.runtime.read_to_string(&self.path)?;
        let index: FeedIndex = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse feed index {}", self.path.display()))?;

        let mut ids = Vec::new();
        for manifest in index.packages {
            let name = manifest.name.clone();
            let mut meta = match manifest.into_metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Skipping {} in {}: {:#}", name, self.location, e);
                    continue;
                }
            };
            meta.original_location = meta
                .original_location
                .as_deref()
                .map(|l| self.resolve_location(l));
            let id = catalog.register(&meta, None);
            catalog.add_feed_location(&id, &self.location)?;
            ids.push(id);
        }
        debug!("Index {} lists {} packages", self.location, ids.len());
        *loaded = Some(ids.clone());
        Ok(ids)
    }
}

impl Feed for IndexFeed {
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
