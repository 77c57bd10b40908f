//! The catalog: every package discovered in this process, keyed by
//! canonical name, plus the feed sets to scan and the negative-result cache.
//!
//! All collections sit behind coarse locks that are held only while a
//! snapshot is copied out or a mutation is applied, never across a call
//! into a feed or a format handler. Every change that could alter a
//! resolution outcome bumps `state_counter`.

mod cache;
mod scan;

pub use scan::{NameResolution, ScanRequest};

use anyhow::{Context, Result};
use glob::Pattern;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::error::{PackageError, is_not_package_format};
use crate::feed::Feed;
use crate::format::FormatHandler;
use crate::identity::{PackageFilter, PackageId, PackageIdentity, matches_wildcard, wildcard};
use crate::package::{Package, PackageMetadata};
use crate::runtime::{Runtime, absolutize, normalize_path};

use cache::NegativeCache;

/// Location of the always-present feed of installed packages.
pub const INSTALLED_FEED: &str = "installed://";

#[derive(Default)]
struct Packages {
    by_id: BTreeMap<PackageId, Package>,
    by_path: HashMap<PathBuf, PackageId>,
}

#[derive(Default)]
struct Feeds {
    system: Vec<String>,
    session: Vec<String>,
    auto: Vec<String>,
    instances: HashMap<String, Arc<dyn Feed>>,
}

pub struct Catalog {
    runtime: Arc<dyn Runtime>,
    format: Arc<dyn FormatHandler>,
    config: Config,
    exclusions: Mutex<Vec<Pattern>>,
    packages: Mutex<Packages>,
    feeds: Mutex<Feeds>,
    negative: Mutex<NegativeCache>,
    state_counter: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Catalog {
    pub fn new(runtime: Arc<dyn Runtime>, format: Arc<dyn FormatHandler>, config: Config) -> Self {
        let exclusions = config.exclusions().iter().map(|p| wildcard(p)).collect();
        Self {
            runtime,
            format,
            config,
            exclusions: Mutex::new(exclusions),
            packages: Mutex::new(Packages::default()),
            feeds: Mutex::new(Feeds::default()),
            negative: Mutex::new(NegativeCache::default()),
            state_counter: AtomicU64::new(0),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn format(&self) -> &Arc<dyn FormatHandler> {
        &self.format
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state_counter(&self) -> u64 {
        self.state_counter.load(Ordering::SeqCst)
    }

    /// True if anything changed since `snapshot` was taken.
    pub fn changed_since(&self, snapshot: u64) -> bool {
        self.state_counter.load(Ordering::SeqCst) != snapshot
    }

    fn bump(&self) {
        self.state_counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the key of the package with this identity, creating a bare
    /// record if it is not known yet.
    pub fn add_or_get_package(&self, identity: &PackageIdentity) -> PackageId {
        let id = identity.id();
        let created = {
            let mut packages = lock(&self.packages);
            insert_if_absent(&mut packages, identity)
        };
        if created {
            self.bump();
        }
        id
    }

    /// Adds or merges the metadata of one package file.
    pub fn register(&self, meta: &PackageMetadata, local_path: Option<&Path>) -> PackageId {
        let id = meta.identity.id();
        let changed = {
            let mut packages = lock(&self.packages);
            let mut changed = insert_if_absent(&mut packages, &meta.identity);
            for dep in &meta.dependencies {
                changed |= insert_if_absent(&mut packages, dep);
            }
            if let Some(package) = packages.by_id.get_mut(&id) {
                changed |= package.merge_metadata(meta);
                if let Some(path) = local_path {
                    changed |= package.local_path.add(path.to_path_buf());
                }
            }
            if let Some(path) = local_path {
                packages.by_path.insert(path.to_path_buf(), id.clone());
            }
            changed
        };
        if changed {
            self.bump();
        }
        id
    }

    /// Builds (or finds) the package described by a file.
    ///
    /// Files known not to be packages fail immediately from the negative
    /// cache; newly rejected files are added to it.
    #[tracing::instrument(skip(self))]
    pub fn get_or_build_from_file(&self, path: &Path) -> Result<PackageId> {
        let path = if path.is_absolute() {
            normalize_path(path)
        } else {
            absolutize(&self.runtime.current_dir()?, path)
        };

        if let Some(id) = lock(&self.packages).by_path.get(&path) {
            return Ok(id.clone());
        }

        let created = self
            .runtime
            .file_created(&path)
            .with_context(|| format!("Cannot read package file {}", path.display()))?;
        let key = cache::negative_key(created, &path);
        if lock(&self.negative).contains(key) {
            debug!("{} is cached as not a package", path.display());
            return Err(PackageError::not_package_format(&path).into());
        }

        match self.format.read_metadata(&path) {
            Ok(meta) => Ok(self.register(&meta, Some(&path))),
            Err(e) => {
                if is_not_package_format(&e) {
                    lock(&self.negative).insert(key);
                }
                Err(e)
            }
        }
    }

    pub fn package(&self, id: &PackageId) -> Option<Package> {
        lock(&self.packages).by_id.get(id).cloned()
    }

    /// Like `package`, but a missing key is an `UnknownPackage` error.
    pub fn require(&self, id: &PackageId) -> Result<Package> {
        self.package(id)
            .ok_or_else(|| PackageError::UnknownPackage(id.to_string()).into())
    }

    /// Snapshot of every known package, in canonical-name order.
    pub fn packages(&self) -> Vec<Package> {
        lock(&self.packages).by_id.values().cloned().collect()
    }

    pub fn find(&self, filter: &PackageFilter) -> Vec<PackageId> {
        lock(&self.packages)
            .by_id
            .values()
            .filter(|p| filter.matches(p.identity()))
            .map(Package::id)
            .collect()
    }

    /// Applies a change to working state that does not affect convergence
    /// (scratch flags, user intent).
    pub fn update<T>(&self, id: &PackageId, f: impl FnOnce(&mut Package) -> T) -> Result<T> {
        let mut packages = lock(&self.packages);
        let package = packages
            .by_id
            .get_mut(id)
            .ok_or_else(|| PackageError::UnknownPackage(id.to_string()))?;
        Ok(f(package))
    }

    /// Applies a change and bumps the state counter if it reports one.
    fn update_tracked(&self, id: &PackageId, f: impl FnOnce(&mut Package) -> bool) -> Result<bool> {
        let changed = self.update(id, f)?;
        if changed {
            self.bump();
        }
        Ok(changed)
    }

    pub fn add_local_path(&self, id: &PackageId, path: PathBuf) -> Result<bool> {
        let changed = self.update_tracked(id, |p| p.local_path.add(path.clone()))?;
        lock(&self.packages).by_path.insert(path, id.clone());
        Ok(changed)
    }

    pub fn add_feed_location(&self, id: &PackageId, location: &str) -> Result<bool> {
        self.update_tracked(id, |p| p.feed_location.add(location.to_string()))
    }

    /// Sticky: never cleared within the life of the catalog.
    pub fn set_could_not_download(&self, id: &PackageId) -> Result<()> {
        self.update_tracked(id, |p| !std::mem::replace(&mut p.could_not_download, true))?;
        Ok(())
    }

    /// Sticky: never cleared within the life of the catalog.
    pub fn set_failed_install(&self, id: &PackageId) -> Result<()> {
        self.update_tracked(id, |p| !std::mem::replace(&mut p.package_failed_install, true))?;
        Ok(())
    }

    pub fn set_installed(&self, id: &PackageId, installed: bool) -> Result<()> {
        self.update_tracked(id, |p| p.installed.replace(installed) != Some(installed))?;
        Ok(())
    }

    /// Installed state, asking the format handler the first time.
    pub fn is_installed(&self, id: &PackageId) -> Result<bool> {
        let package = self.require(id)?;
        if let Some(installed) = package.installed_state() {
            return Ok(installed);
        }
        let installed = self.format.is_installed(package.identity());
        self.update(id, |p| {
            p.installed.get_or_insert(installed);
        })?;
        Ok(installed)
    }

    /// Forgets cached installed states so the next query asks the format handler.
    pub fn refresh_installed(&self) {
        for package in lock(&self.packages).by_id.values_mut() {
            package.installed = None;
        }
    }

    pub fn installed_packages(&self) -> Result<Vec<Package>> {
        let mut installed = Vec::new();
        for package in self.packages() {
            if self.is_installed(&package.id())? {
                installed.push(package);
            }
        }
        Ok(installed)
    }

    /// Packages that may stand in for `target`, newest first. With
    /// `installed_only`, only those already installed.
    pub fn supercedents(&self, target: &PackageId, installed_only: bool) -> Result<Vec<PackageId>> {
        let target = self.require(target)?;
        let mut candidates: Vec<(PackageIdentity, PackageId)> = lock(&self.packages)
            .by_id
            .values()
            .filter(|p| p.supersedes(target.identity()))
            .map(|p| (p.identity().clone(), p.id()))
            .collect();
        candidates.sort_by(|a, b| {
            b.0.version()
                .cmp(&a.0.version())
                .then_with(|| a.1.cmp(&b.1))
        });

        let mut result = Vec::new();
        for (_, id) in candidates {
            if !installed_only || self.is_installed(&id)? {
                result.push(id);
            }
        }
        Ok(result)
    }

    /// True if a feed location matches one of the never-scan patterns.
    pub fn is_excluded(&self, location: &str) -> bool {
        lock(&self.exclusions)
            .iter()
            .any(|p| matches_wildcard(p, location))
    }

    /// Adds never-scan patterns for the rest of this session.
    pub fn exclude_from_scan(&self, patterns: &[String]) {
        if patterns.is_empty() {
            return;
        }
        lock(&self.exclusions).extend(patterns.iter().map(|p| wildcard(p)));
        self.bump();
    }
}

fn insert_if_absent(packages: &mut Packages, identity: &PackageIdentity) -> bool {
    let id = identity.id();
    if packages.by_id.contains_key(&id) {
        return false;
    }
    debug!("New package {}", identity);
    packages.by_id.insert(id, Package::new(identity.clone()));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use crate::test_utils::{FakeFormat, identity, metadata, test_catalog};
    use tempfile::tempdir;

    #[test]
    fn test_add_or_get_deduplicates() {
        let (catalog, _) = test_catalog();
        let start = catalog.state_counter();

        let a = catalog.add_or_get_package(&identity("foo", "1.0"));
        assert_eq!(catalog.state_counter(), start + 1);
        let b = catalog.add_or_get_package(&identity("FOO", "1.0"));
        assert_eq!(a, b);
        assert_eq!(catalog.state_counter(), start + 1);
        assert_eq!(catalog.packages().len(), 1);
    }

    #[test]
    fn test_contended_lookups_share_one_instance() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("shared-2.0.tgz");
        std::fs::write(&file, "fake").unwrap();
        let (catalog, format) = test_catalog();
        format.add_file(&file, metadata("shared", "2.0"));
        let names = ["alpha", "beta", "gamma", "delta"];

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for name in names {
                        catalog.add_or_get_package(&identity(name, "1.0"));
                    }
                    catalog.get_or_build_from_file(&file).unwrap();
                });
            }
        });

        assert_eq!(catalog.packages().len(), names.len() + 1);
        let shared = catalog.package(&identity("shared", "2.0").id()).unwrap();
        assert_eq!(shared.local_path.values().count(), 1);

        // Nothing left to change: repeating the work leaves the counter alone.
        let settled = catalog.state_counter();
        for name in names {
            catalog.add_or_get_package(&identity(name, "1.0"));
        }
        catalog.get_or_build_from_file(&file).unwrap();
        assert!(!catalog.changed_since(settled));
    }

    #[test]
    fn test_register_creates_dependency_placeholders() {
        let (catalog, _) = test_catalog();
        let mut meta = metadata("bar", "1.0");
        meta.dependencies.push(identity("baz", "1.0"));

        let bar = catalog.register(&meta, Some(Path::new("/feed/bar.tgz")));
        let package = catalog.package(&bar).unwrap();
        assert_eq!(package.dependencies, vec![identity("baz", "1.0").id()]);
        assert!(package.has_local_copy());

        let baz = catalog.package(&identity("baz", "1.0").id()).unwrap();
        assert!(!baz.has_local_copy());
    }

    #[test]
    fn test_register_merges_alternate_copies() {
        let (catalog, _) = test_catalog();
        let meta = metadata("foo", "1.0");
        let id = catalog.register(&meta, Some(Path::new("/a/foo.tgz")));
        let snapshot = catalog.state_counter();

        catalog.register(&meta, Some(Path::new("/a/foo.tgz")));
        assert!(!catalog.changed_since(snapshot), "identical registration");

        catalog.register(&meta, Some(Path::new("/b/foo.tgz")));
        assert!(catalog.changed_since(snapshot));
        let package = catalog.package(&id).unwrap();
        assert_eq!(package.local_path.len(), 2);
        assert_eq!(
            package.local_path.current(),
            Some(&PathBuf::from("/a/foo.tgz"))
        );
    }

    #[test]
    fn test_latches_are_sticky_and_tracked() {
        let (catalog, _) = test_catalog();
        let id = catalog.add_or_get_package(&identity("foo", "1.0"));

        let snapshot = catalog.state_counter();
        catalog.set_could_not_download(&id).unwrap();
        assert!(catalog.changed_since(snapshot));

        let snapshot = catalog.state_counter();
        catalog.set_could_not_download(&id).unwrap();
        assert!(!catalog.changed_since(snapshot), "already latched");
        assert!(catalog.package(&id).unwrap().could_not_download());

        catalog.set_failed_install(&id).unwrap();
        assert!(catalog.package(&id).unwrap().package_failed_install());
    }

    #[test]
    fn test_is_installed_is_lazy_and_cached() {
        let (catalog, format) = test_catalog();
        let id = catalog.add_or_get_package(&identity("foo", "1.0"));
        format.mark_installed(&identity("foo", "1.0"));

        let snapshot = catalog.state_counter();
        assert!(catalog.is_installed(&id).unwrap());
        assert!(!catalog.changed_since(snapshot), "a cache fill is not a change");

        format.mark_removed(&identity("foo", "1.0"));
        assert!(catalog.is_installed(&id).unwrap(), "cached");
        catalog.refresh_installed();
        assert!(!catalog.is_installed(&id).unwrap());
    }

    #[test]
    fn test_unknown_package_errors() {
        let (catalog, _) = test_catalog();
        let err = catalog
            .require(&identity("ghost", "1.0").id())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PackageError>(),
            Some(PackageError::UnknownPackage(_))
        ));
    }

    #[test]
    fn test_supercedents_sorted_newest_first() {
        let (catalog, format) = test_catalog();
        let target = catalog.register(&metadata("foo", "1.0"), None);
        for version in ["2.0", "3.0", "1.5"] {
            let mut meta = metadata("foo", version);
            meta.policy_minimum_version = "1.0".parse().unwrap();
            meta.policy_maximum_version = "1.9".parse().unwrap();
            catalog.register(&meta, None);
        }
        // Declares no policy, so it cannot stand in for anything.
        catalog.register(&metadata("foo", "4.0"), None);
        format.mark_installed(&identity("foo", "1.5"));

        let all = catalog.supercedents(&target, false).unwrap();
        assert_eq!(
            all,
            vec![
                identity("foo", "3.0").id(),
                identity("foo", "2.0").id(),
                identity("foo", "1.5").id(),
            ]
        );
        let installed = catalog.supercedents(&target, true).unwrap();
        assert_eq!(installed, vec![identity("foo", "1.5").id()]);
    }

    #[test]
    fn test_negative_cache_probes_once() {
        let dir = tempdir().unwrap();
        let junk = dir.path().join("notes.txt");
        std::fs::write(&junk, "not a package").unwrap();

        let format = Arc::new(FakeFormat::default());
        let catalog = Catalog::new(
            Arc::new(RealRuntime),
            format.clone(),
            Config::new(dir.path().join("root")),
        );

        let first = catalog.get_or_build_from_file(&junk).unwrap_err();
        assert!(is_not_package_format(&first));
        let second = catalog.get_or_build_from_file(&junk).unwrap_err();
        assert!(is_not_package_format(&second));
        assert_eq!(format.probe_count(&junk), 1);
    }

    #[test]
    fn test_get_or_build_from_file_registers_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foo.tgz");
        std::fs::write(&path, "fake").unwrap();

        let format = Arc::new(FakeFormat::default());
        format.add_file(&path, metadata("foo", "1.0"));
        let catalog = Catalog::new(
            Arc::new(RealRuntime),
            format.clone(),
            Config::new(dir.path().join("root")),
        );

        let id = catalog.get_or_build_from_file(&path).unwrap();
        assert_eq!(id, identity("foo", "1.0").id());
        let again = catalog.get_or_build_from_file(&path).unwrap();
        assert_eq!(again, id);
        assert_eq!(format.probe_count(&path), 1);
        assert_eq!(
            catalog.package(&id).unwrap().local_path.current(),
            Some(&path)
        );
    }

    #[test]
    fn test_session_exclusions_hide_feeds() {
        let (catalog, _) = test_catalog();
        catalog.add_system_feed("/srv/feed");
        catalog.add_session_feed("/mnt/slow/feed");
        let before = catalog.state_counter();

        catalog.exclude_from_scan(&["/mnt/slow/**".to_string()]);
        assert!(catalog.changed_since(before));
        assert_eq!(
            catalog.feed_locations(),
            vec![INSTALLED_FEED.to_string(), "/srv/feed".to_string()]
        );

        catalog.exclude_from_scan(&["*".to_string()]);
        assert_eq!(catalog.feed_locations(), vec![INSTALLED_FEED.to_string()]);
    }

    #[test]
    fn test_exclusions_cover_payload_dir() {
        let (catalog, _) = test_catalog();
        let apps = catalog.config().apps_dir();
        assert!(catalog.is_excluded(&apps.join("foo-1.0.0.0-x86").to_string_lossy()));
        assert!(!catalog.is_excluded("/srv/feed"));
    }
}
