//! Feed sets, scanning and request-name resolution.

use anyhow::Result;
use log::{debug, warn};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use super::{Catalog, INSTALLED_FEED, lock};
use crate::error::{PackageError, package_error};
use crate::feed::{self, Feed};
use crate::identity::{PackageId, PackageName, scan_filter};
use crate::recognizer::{Recognized, recognize};

/// What to look for in the feeds.
#[derive(Debug, Clone)]
pub enum ScanRequest {
    /// Packages whose canonical name matches a (partial) name.
    Filter(String),
    /// A known package and, recursively, its dependencies.
    Package(PackageId),
    List(Vec<ScanRequest>),
}

/// Outcome of resolving one requested token.
#[derive(Debug)]
pub struct NameResolution {
    pub request: String,
    /// `Ok(None)` for tokens that named a feed rather than a package.
    pub outcome: Result<Option<PackageId>, PackageError>,
}

fn push_unique(list: &mut Vec<String>, location: &str) -> bool {
    if list.iter().any(|l| l == location) {
        return false;
    }
    list.push(location.to_string());
    true
}

fn remove_from(list: &mut Vec<String>, location: &str) -> bool {
    let before = list.len();
    list.retain(|l| l != location);
    list.len() != before
}

impl Catalog {
    fn change_feeds(&self, f: impl FnOnce(&mut super::Feeds) -> bool) -> bool {
        let changed = f(&mut lock(&self.feeds));
        if changed {
            self.bump();
        }
        changed
    }

    pub fn add_system_feed(&self, location: &str) -> bool {
        self.change_feeds(|feeds| push_unique(&mut feeds.system, location))
    }

    pub fn remove_system_feed(&self, location: &str) -> bool {
        self.change_feeds(|feeds| remove_from(&mut feeds.system, location))
    }

    pub fn add_session_feed(&self, location: &str) -> bool {
        self.change_feeds(|feeds| push_unique(&mut feeds.session, location))
    }

    pub fn remove_session_feed(&self, location: &str) -> bool {
        self.change_feeds(|feeds| remove_from(&mut feeds.session, location))
    }

    /// Records a feed referenced by a package's metadata.
    pub fn add_discovered_feed(&self, location: &str) -> bool {
        self.change_feeds(|feeds| {
            let known = location == INSTALLED_FEED
                || feeds.system.iter().chain(&feeds.session).any(|l| l == location);
            !known && push_unique(&mut feeds.auto, location)
        })
    }

    pub fn system_feeds(&self) -> Vec<String> {
        lock(&self.feeds).system.clone()
    }

    pub fn session_feeds(&self) -> Vec<String> {
        lock(&self.feeds).session.clone()
    }

    /// Every feed location a scan visits, in order: installed, system,
    /// session, then discovered. Excluded locations are left out.
    pub fn feed_locations(&self) -> Vec<String> {
        let registered: Vec<String> = {
            let feeds = lock(&self.feeds);
            feeds
                .system
                .iter()
                .chain(&feeds.session)
                .chain(&feeds.auto)
                .cloned()
                .collect()
        };
        let mut locations = vec![INSTALLED_FEED.to_string()];
        for location in &registered {
            if self.is_excluded(location) {
                debug!("Feed {} is excluded from scanning", location);
                continue;
            }
            push_unique(&mut locations, location);
        }
        locations
    }

    fn active_feeds(&self) -> Vec<Arc<dyn Feed>> {
        let locations = self.feed_locations();
        let known: Vec<Option<Arc<dyn Feed>>> = {
            let feeds = lock(&self.feeds);
            locations
                .iter()
                .map(|location| feeds.instances.get(location).cloned())
                .collect()
        };

        let mut active = Vec::new();
        for (location, known) in locations.into_iter().zip(known) {
            if let Some(feed) = known {
                active.push(feed);
                continue;
            }
            let Some(opened) = feed::open(&location, self.runtime.clone()) else {
                debug!("No feed can be opened at {}", location);
                continue;
            };
            // Another scan may have opened the same location meanwhile.
            let feed = lock(&self.feeds)
                .instances
                .entry(location)
                .or_insert(opened)
                .clone();
            active.push(feed);
        }
        active
    }

    /// Scans the feeds and returns every package the request turned up.
    ///
    /// Feeds that fail are logged and skipped. Feed locations mentioned in
    /// newly found metadata are recorded for later scans.
    #[tracing::instrument(skip(self))]
    pub fn scan(&self, request: &ScanRequest) -> Result<BTreeSet<PackageId>> {
        let feeds = self.active_feeds();
        let mut found = BTreeSet::new();
        let mut visited = HashSet::new();
        self.scan_into(&feeds, request, &mut found, &mut visited)?;

        for id in &found {
            if let Some(package) = self.package(id) {
                for location in package.feed_location.values() {
                    if self.add_discovered_feed(location) {
                        debug!("Discovered feed {} via {}", location, id);
                    }
                }
            }
        }
        Ok(found)
    }

    fn scan_into(
        &self,
        feeds: &[Arc<dyn Feed>],
        request: &ScanRequest,
        found: &mut BTreeSet<PackageId>,
        visited: &mut HashSet<PackageId>,
    ) -> Result<()> {
        match request {
            ScanRequest::Filter(name) => {
                let filter = scan_filter(name);
                for feed in feeds {
                    match feed.find_packages(self, &filter) {
                        Ok(ids) => found.extend(ids),
                        Err(e) => warn!("Feed {} failed: {:#}", feed.location(), e),
                    }
                }
            }
            ScanRequest::Package(id) => {
                if !visited.insert(id.clone()) {
                    return Ok(());
                }
                let package = self.require(id)?;
                let name = format!("{}-", package.identity().name());
                self.scan_into(feeds, &ScanRequest::Filter(name), found, visited)?;
                found.insert(id.clone());

                let dependencies = self.require(id)?.dependencies;
                for dep in dependencies {
                    self.scan_into(feeds, &ScanRequest::Package(dep), found, visited)?;
                }
            }
            ScanRequest::List(requests) => {
                for request in requests {
                    self.scan_into(feeds, request, found, visited)?;
                }
            }
        }
        Ok(())
    }

    /// Resolves each token independently. Package files are built directly,
    /// feed tokens join the session feeds, and the rest are matched as
    /// partial names after one scan.
    pub fn resolve_each(&self, names: &[String]) -> Result<Vec<NameResolution>> {
        let mut outcomes: Vec<Option<Result<Option<PackageId>, PackageError>>> =
            Vec::with_capacity(names.len());
        let mut pending = Vec::new();

        for name in names {
            let outcome = match recognize(self.runtime.as_ref(), name) {
                Recognized::PackageFile(path) => match self.get_or_build_from_file(&path) {
                    Ok(id) => Some(Ok(Some(id))),
                    Err(e) => match package_error(&e) {
                        Some(pe) => Some(Err(pe.clone())),
                        None => return Err(e),
                    },
                },
                Recognized::Feed(location) => {
                    debug!("Using {} as a session feed", location);
                    self.add_session_feed(&location);
                    Some(Ok(None))
                }
                Recognized::Unknown => {
                    pending.push(ScanRequest::Filter(name.clone()));
                    None
                }
            };
            outcomes.push(outcome);
        }

        if !pending.is_empty() {
            self.scan(&ScanRequest::List(pending))?;
        }

        let mut resolutions = Vec::with_capacity(names.len());
        for (name, outcome) in names.iter().zip(outcomes) {
            let outcome = match outcome {
                Some(outcome) => outcome,
                None => self.match_one(name, false)?,
            };
            resolutions.push(NameResolution {
                request: name.clone(),
                outcome,
            });
        }
        Ok(resolutions)
    }

    /// Resolves every token to exactly one package. All tokens are tried;
    /// the first failure in input order is returned.
    pub fn resolve_requested_names(&self, names: &[String]) -> Result<Vec<PackageId>> {
        let mut ids = Vec::new();
        for resolution in self.resolve_each(names)? {
            match resolution.outcome {
                Ok(Some(id)) if !ids.contains(&id) => ids.push(id),
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ids)
    }

    /// Resolves tokens among installed packages only.
    pub fn resolve_installed_names(&self, names: &[String]) -> Result<Vec<PackageId>> {
        self.scan(&ScanRequest::Filter(String::new()))?;

        let mut ids = Vec::new();
        for name in names {
            let id = match recognize(self.runtime.as_ref(), name) {
                Recognized::PackageFile(path) => {
                    let id = self.get_or_build_from_file(&path)?;
                    if !self.is_installed(&id)? {
                        return Err(PackageError::PackageIsNotInstalled(name.clone()).into());
                    }
                    id
                }
                Recognized::Feed(_) => {
                    return Err(PackageError::PackageNotFound(name.clone()).into());
                }
                Recognized::Unknown => match self.match_one(name, true)? {
                    Ok(Some(id)) => id,
                    Ok(None) => return Err(PackageError::PackageNotFound(name.clone()).into()),
                    Err(e) => return Err(e.into()),
                },
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// The outer error is a failed catalog query; the inner one is the
    /// resolution outcome for `name`.
    fn match_one(
        &self,
        name: &str,
        installed_only: bool,
    ) -> Result<Result<Option<PackageId>, PackageError>> {
        let filter = PackageName::parse(name).filter();
        let mut matches = self.find(&filter);
        if installed_only {
            let any = !matches.is_empty();
            let mut installed = Vec::new();
            for id in matches {
                if self.is_installed(&id)? {
                    installed.push(id);
                }
            }
            if any && installed.is_empty() {
                return Ok(Err(PackageError::PackageIsNotInstalled(name.to_string())));
            }
            matches = installed;
        }

        Ok(match matches.len() {
            0 => Err(PackageError::PackageNotFound(name.to_string())),
            1 => Ok(matches.pop()),
            _ => Err(PackageError::MultiplePackagesMatch {
                request: name.to_string(),
                matches: matches
                    .iter()
                    .filter_map(|id| self.package(id))
                    .map(|p| p.identity().cosmetic_name().to_string())
                    .collect(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::runtime::RealRuntime;
    use crate::test_utils::{FakeFormat, identity, metadata, test_catalog};
    use std::path::Path;
    use tempfile::tempdir;

    /// A catalog whose session feed is a real directory of fake package files.
    fn catalog_with_feed(packages: &[(&str, &str)]) -> (Catalog, Arc<FakeFormat>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let feed = dir.path().join("feed");
        std::fs::create_dir_all(&feed).unwrap();

        let format = Arc::new(FakeFormat::default());
        for (name, version) in packages {
            let path = feed.join(format!("{}-{}.tgz", name, version));
            std::fs::write(&path, "fake").unwrap();
            format.add_file(&path, metadata(name, version));
        }
        let catalog = Catalog::new(
            Arc::new(RealRuntime),
            format.clone(),
            Config::new(dir.path().join("root")),
        );
        catalog.add_session_feed(&feed.to_string_lossy());
        (catalog, format, dir)
    }

    #[test]
    fn test_unknown_name_is_not_found() {
        let (catalog, _, _dir) = catalog_with_feed(&[("foo", "1.0")]);
        let err = catalog
            .resolve_requested_names(&["nope".to_string()])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<PackageError>(),
            Some(&PackageError::PackageNotFound("nope".into()))
        );
    }

    #[test]
    fn test_resolve_partial_name() {
        let (catalog, _, _dir) = catalog_with_feed(&[("foo", "1.0"), ("bar", "2.0")]);
        let ids = catalog
            .resolve_requested_names(&["foo".to_string(), "bar-2".to_string()])
            .unwrap();
        assert_eq!(ids, vec![identity("foo", "1.0").id(), identity("bar", "2.0").id()]);
    }

    #[test]
    fn test_ambiguous_name_lists_matches() {
        let (catalog, _, _dir) = catalog_with_feed(&[("foo", "1.0"), ("foo", "2.0")]);
        let err = catalog
            .resolve_requested_names(&["foo".to_string()])
            .unwrap_err();
        match err.downcast_ref::<PackageError>() {
            Some(PackageError::MultiplePackagesMatch { request, matches }) => {
                assert_eq!(request, "foo");
                assert_eq!(matches.len(), 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // A version narrows it down.
        let ids = catalog
            .resolve_requested_names(&["foo-2.0".to_string()])
            .unwrap();
        assert_eq!(ids, vec![identity("foo", "2.0").id()]);
    }

    #[test]
    fn test_first_failure_in_input_order() {
        let (catalog, _, _dir) = catalog_with_feed(&[("foo", "1.0")]);
        let names = vec!["foo".to_string(), "alpha".to_string(), "beta".to_string()];
        let err = catalog.resolve_requested_names(&names).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PackageError>(),
            Some(&PackageError::PackageNotFound("alpha".into()))
        );

        let each = catalog.resolve_each(&names).unwrap();
        assert!(each[0].outcome.is_ok());
        assert!(each[1].outcome.is_err());
        assert!(each[2].outcome.is_err());
    }

    #[test]
    fn test_feed_token_becomes_session_feed() {
        let (catalog, _, dir) = catalog_with_feed(&[]);
        let other = dir.path().join("other");
        std::fs::create_dir_all(&other).unwrap();
        let location = other.to_string_lossy().to_string();

        let ids = catalog.resolve_requested_names(&[location.clone()]).unwrap();
        assert!(ids.is_empty());
        assert!(catalog.session_feeds().contains(&location));
    }

    #[test]
    fn test_package_file_token_resolves_directly() {
        let (catalog, _, dir) = catalog_with_feed(&[("foo", "1.0")]);
        let path = dir.path().join("feed").join("foo-1.0.tgz");
        let ids = catalog
            .resolve_requested_names(&[path.to_string_lossy().to_string()])
            .unwrap();
        assert_eq!(ids, vec![identity("foo", "1.0").id()]);
    }

    #[test]
    fn test_scan_package_follows_dependencies() {
        let dir = tempdir().unwrap();
        let feed = dir.path().join("feed");
        std::fs::create_dir_all(&feed).unwrap();
        let format = Arc::new(FakeFormat::default());

        let mut bar = metadata("bar", "1.0");
        bar.dependencies.push(identity("baz", "1.0"));
        let mut baz = metadata("baz", "1.0");
        baz.dependencies.push(identity("bar", "1.0"));
        for (file, meta) in [("bar.tgz", bar), ("baz.tgz", baz)] {
            std::fs::write(feed.join(file), "fake").unwrap();
            format.add_file(&feed.join(file), meta);
        }
        let catalog = Catalog::new(
            Arc::new(RealRuntime),
            format,
            Config::new(dir.path().join("root")),
        );
        catalog.add_session_feed(&feed.to_string_lossy());

        let bar_id = catalog.add_or_get_package(&identity("bar", "1.0"));
        let found = catalog.scan(&ScanRequest::Package(bar_id.clone())).unwrap();
        assert!(found.contains(&bar_id));
        assert!(found.contains(&identity("baz", "1.0").id()));
        assert!(catalog.package(&identity("baz", "1.0").id()).unwrap().has_local_copy());
    }

    #[test]
    fn test_discovered_feeds_are_recorded() {
        let (catalog, _) = test_catalog();
        let mut meta = metadata("foo", "1.0");
        meta.feed_location = Some("/srv/more-packages".into());
        let id = catalog.register(&meta, Some(Path::new("/feed/foo.tgz")));
        catalog.scan(&ScanRequest::Package(id)).unwrap();
        assert!(
            catalog
                .feed_locations()
                .contains(&"/srv/more-packages".to_string())
        );
    }

    #[test]
    fn test_excluded_feeds_are_skipped() {
        let (catalog, _) = test_catalog();
        let apps = catalog.config().apps_dir().to_string_lossy().to_string();
        catalog.add_session_feed(&apps);
        assert_eq!(catalog.feed_locations(), vec![INSTALLED_FEED.to_string()]);
    }

    #[test]
    fn test_resolve_installed_names() {
        let (catalog, format, _dir) = catalog_with_feed(&[("foo", "1.0"), ("bar", "1.0")]);
        format.mark_installed(&identity("foo", "1.0"));
        // Installed packages are found through the installed feed.
        let ids = catalog.resolve_installed_names(&["foo".to_string()]).unwrap();
        assert_eq!(ids, vec![identity("foo", "1.0").id()]);

        // Known but not installed.
        catalog.scan(&ScanRequest::Filter("bar".into())).unwrap();
        let err = catalog
            .resolve_installed_names(&["bar".to_string()])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<PackageError>(),
            Some(&PackageError::PackageIsNotInstalled("bar".into()))
        );
    }

    #[test]
    fn test_installed_names_ignore_uninstalled_versions() {
        let (catalog, format, _dir) = catalog_with_feed(&[("foo", "1.0"), ("foo", "2.0")]);
        format.mark_installed(&identity("foo", "2.0"));

        let ids = catalog.resolve_installed_names(&["foo".to_string()]).unwrap();
        assert_eq!(ids, vec![identity("foo", "2.0").id()]);

        let all = catalog.resolve_each(&["foo".to_string()]).unwrap();
        assert!(matches!(
            all[0].outcome,
            Err(PackageError::MultiplePackagesMatch { .. })
        ));
    }

    #[test]
    fn test_concurrent_scans_share_feed_instances() {
        let (catalog, format, dir) = catalog_with_feed(&[("foo", "1.0")]);
        let file = dir.path().join("feed").join("foo-1.0.tgz");

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let found = catalog.scan(&ScanRequest::Filter("foo".into())).unwrap();
                    assert!(found.contains(&identity("foo", "1.0").id()));
                });
            }
        });

        assert_eq!(format.probe_count(&file), 1);
    }
}
