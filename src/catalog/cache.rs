//! Persistence of the negative-result cache and the system feed list.
//!
//! The file is a rebuildable cache: an unreadable or outdated one is
//! discarded with a warning rather than failing the session.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{Catalog, lock};

const CACHE_VERSION: u32 = 1;

#[derive(Default)]
pub(super) struct NegativeCache {
    keys: HashSet<u64>,
    loaded: bool,
}

impl NegativeCache {
    pub(super) fn contains(&self, key: u64) -> bool {
        self.keys.contains(&key)
    }

    pub(super) fn insert(&mut self, key: u64) {
        self.keys.insert(key);
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    negative: Vec<u64>,
    /// `None` when the file never recorded a feed list.
    #[serde(default)]
    system_feeds: Option<Vec<String>>,
}

/// Key identifying one file at one point in its life: a new file at the
/// same path gets a new key.
pub(super) fn negative_key(created: SystemTime, path: &Path) -> u64 {
    let nanos = created
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

impl Catalog {
    /// Loads the persisted negative cache and system feeds. Only the first
    /// call in a process reads the file.
    pub fn load_cache(&self) -> Result<()> {
        let mut negative = lock(&self.negative);
        if negative.loaded {
            return Ok(());
        }
        negative.loaded = true;

        let path = self.config.cache_file();
        let mut system_feeds = self.config.settings.system_feeds.clone();
        if self.runtime.exists(&path) {
            let content = self.runtime.read_to_string(&path)?;
            match serde_json::from_str::<CacheFile>(&content) {
                Ok(file) if file.version == CACHE_VERSION => {
                    debug!(
                        "Loaded {} negative entries from {}",
                        file.negative.len(),
                        path.display()
                    );
                    negative.keys.extend(file.negative);
                    if let Some(saved) = file.system_feeds {
                        system_feeds = saved;
                    }
                }
                Ok(file) => warn!(
                    "Ignoring cache {} with unsupported version {}",
                    path.display(),
                    file.version
                ),
                Err(e) => warn!("Ignoring unreadable cache {}: {}", path.display(), e),
            }
        }
        drop(negative);

        for feed in system_feeds {
            self.add_system_feed(&feed);
        }
        Ok(())
    }

    pub fn save_cache(&self) -> Result<()> {
        let mut keys: Vec<u64> = lock(&self.negative).keys.iter().copied().collect();
        keys.sort_unstable();
        let file = CacheFile {
            version: CACHE_VERSION,
            negative: keys,
            system_feeds: Some(self.system_feeds()),
        };

        let path = self.config.cache_file();
        if let Some(parent) = path.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&file)?;
        self.runtime
            .write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write cache {}", path.display()))
    }

    /// Forgets every negative result, in memory and on disk.
    pub fn flush_cache(&self) -> Result<()> {
        lock(&self.negative).keys.clear();
        self.save_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::is_not_package_format;
    use crate::runtime::RealRuntime;
    use crate::test_utils::FakeFormat;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn catalog_at(root: &Path, format: Arc<FakeFormat>) -> Catalog {
        Catalog::new(Arc::new(RealRuntime), format, Config::new(root.to_path_buf()))
    }

    #[test]
    fn test_negative_key_tracks_creation_time() {
        let path = Path::new("/feed/readme.txt");
        let t1 = UNIX_EPOCH + Duration::from_secs(1_000);
        let t2 = UNIX_EPOCH + Duration::from_secs(2_000);
        assert_eq!(negative_key(t1, path), negative_key(t1, path));
        assert_ne!(negative_key(t1, path), negative_key(t2, path));
        assert_ne!(
            negative_key(t1, path),
            negative_key(t1, Path::new("/feed/other.txt"))
        );
    }

    #[test]
    fn test_negative_result_survives_restart() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let junk = dir.path().join("readme.txt");
        std::fs::write(&junk, "hello").unwrap();

        let format = Arc::new(FakeFormat::default());
        let first = catalog_at(&root, format.clone());
        first.load_cache().unwrap();
        assert!(first.get_or_build_from_file(&junk).is_err());
        first.save_cache().unwrap();

        let second = catalog_at(&root, format.clone());
        second.load_cache().unwrap();
        let err = second.get_or_build_from_file(&junk).unwrap_err();
        assert!(is_not_package_format(&err));
        assert_eq!(format.probe_count(&junk), 1, "second session must not probe");
    }

    #[test]
    fn test_flush_cache_forgets_negative_results() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let junk = dir.path().join("readme.txt");
        std::fs::write(&junk, "hello").unwrap();

        let format = Arc::new(FakeFormat::default());
        let catalog = catalog_at(&root, format.clone());
        catalog.load_cache().unwrap();
        assert!(catalog.get_or_build_from_file(&junk).is_err());
        catalog.flush_cache().unwrap();
        assert!(catalog.get_or_build_from_file(&junk).is_err());
        assert_eq!(format.probe_count(&junk), 2);

        let reloaded = catalog_at(&root, format.clone());
        reloaded.load_cache().unwrap();
        assert!(reloaded.get_or_build_from_file(&junk).is_err());
        assert_eq!(format.probe_count(&junk), 3);
    }

    #[test]
    fn test_corrupt_cache_is_discarded() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let config = Config::new(root.clone());
        std::fs::create_dir_all(config.state_dir()).unwrap();
        std::fs::write(config.cache_file(), "{ not json").unwrap();

        let catalog = catalog_at(&root, Arc::new(FakeFormat::default()));
        catalog.load_cache().unwrap();
        assert!(catalog.system_feeds().is_empty());
    }

    #[test]
    fn test_system_feeds_persist() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let feed_dir = dir.path().join("feed");
        std::fs::create_dir_all(&feed_dir).unwrap();
        let feed = feed_dir.to_string_lossy().to_string();

        let catalog = catalog_at(&root, Arc::new(FakeFormat::default()));
        catalog.load_cache().unwrap();
        assert!(catalog.add_system_feed(&feed));
        catalog.save_cache().unwrap();

        let reloaded = catalog_at(&root, Arc::new(FakeFormat::default()));
        reloaded.load_cache().unwrap();
        assert_eq!(reloaded.system_feeds(), vec![feed]);
    }

    #[test]
    fn test_removed_default_feed_stays_removed() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let mut config = Config::new(root.clone());
        config.settings.system_feeds = vec!["/srv/default-feed".into()];
        let open = || {
            let catalog = Catalog::new(
                Arc::new(RealRuntime),
                Arc::new(FakeFormat::default()),
                config.clone(),
            );
            catalog.load_cache().unwrap();
            catalog
        };

        let first = open();
        assert_eq!(first.system_feeds(), vec!["/srv/default-feed".to_string()]);
        assert!(first.remove_system_feed("/srv/default-feed"));
        first.save_cache().unwrap();

        assert!(open().system_feeds().is_empty());
    }
}
