//! The package manager: drives resolution to a fixed point, installs and
//! removes packages, and keeps each product's current version composed.
//!
//! - `satisfy` - recursive dependency and supersedence resolution
//! - `progress` - lifecycle events reported to the caller
//! - `cancel` - cooperative cancellation

mod cancel;
mod progress;
mod satisfy;

pub use cancel::CancelToken;
pub use progress::{ProgressEvent, ProgressSink};

use anyhow::Result;
use glob::Pattern;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::acquire::Acquirer;
use crate::catalog::{Catalog, ScanRequest};
use crate::compose::{Composer, Variables, package_rules};
use crate::current::CurrentMarkers;
use crate::error::{PackageError, package_error};
use crate::identity::{PackageId, PackageIdentity, Version, matches_wildcard, wildcard};
use crate::package::Package;

/// What an install run did, or with `dry_run` would have done.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub would_acquire: Vec<String>,
    pub would_install: Vec<String>,
    pub passes: usize,
    pub cancelled: bool,
}

pub struct PackageManager {
    catalog: Arc<Catalog>,
    acquirer: Arc<dyn Acquirer>,
    acquire_queue: Vec<PackageId>,
    install_queue: Vec<PackageId>,
    dry_run: bool,
    cancel: CancelToken,
    as_specified: Vec<Pattern>,
    upgradable: Vec<Pattern>,
}

fn display_name(catalog: &Catalog, id: &PackageId) -> String {
    catalog
        .package(id)
        .map(|p| p.identity().cosmetic_name().to_string())
        .unwrap_or_else(|| id.to_string())
}

impl PackageManager {
    pub fn new(catalog: Arc<Catalog>, acquirer: Arc<dyn Acquirer>) -> Self {
        Self {
            catalog,
            acquirer,
            acquire_queue: Vec::new(),
            install_queue: Vec::new(),
            dry_run: false,
            cancel: CancelToken::new(),
            as_specified: Vec::new(),
            upgradable: Vec::new(),
        }
    }

    /// Report what would be acquired and installed without doing it.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Packages matching these globs are installed exactly as named.
    pub fn with_as_specified(mut self, patterns: &[String]) -> Self {
        self.as_specified = patterns.iter().map(|p| wildcard(p)).collect();
        self
    }

    /// Packages matching these globs may be replaced by newer versions.
    pub fn with_upgradable(mut self, patterns: &[String]) -> Self {
        self.upgradable = patterns.iter().map(|p| wildcard(p)).collect();
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn intent_matches(patterns: &[Pattern], package: &Package) -> bool {
        let identity = package.identity();
        patterns.iter().any(|p| {
            matches_wildcard(p, identity.name())
                || matches_wildcard(p, identity.cosmetic_name())
                || matches_wildcard(p, identity.canonical_name())
        })
    }

    fn apply_intent(&self, requested: &[PackageId]) -> Result<()> {
        for package in self.catalog.packages() {
            let id = package.id();
            let user_specified = requested.contains(&id);
            let pinned = Self::intent_matches(&self.as_specified, &package);
            let upgrade = Self::intent_matches(&self.upgradable, &package);
            self.catalog.update(&id, |p| {
                p.user_specified |= user_specified;
                p.do_not_supercede |= pinned;
                p.upgrade_as_needed |= upgrade;
            })?;
        }
        Ok(())
    }

    /// Installs the requested packages and everything they need, repeating
    /// resolution until a full pass leaves the catalog unchanged.
    #[tracing::instrument(skip(self, progress))]
    pub async fn install(
        &mut self,
        names: &[String],
        progress: &mut ProgressSink<'_>,
    ) -> Result<InstallReport> {
        let mut report = InstallReport::default();
        progress(ProgressEvent::ScanningStarted);

        'pass: loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            report.passes += 1;
            let snapshot = self.catalog.state_counter();
            self.acquire_queue.clear();
            self.install_queue.clear();
            debug!("Resolution pass {}", report.passes);

            let requested = self.catalog.resolve_requested_names(names)?;
            self.catalog.scan(&ScanRequest::List(
                requested.iter().cloned().map(ScanRequest::Package).collect(),
            ))?;
            self.apply_intent(&requested)?;

            for id in &requested {
                let satisfied = self.can_satisfy(id)?;
                if self.catalog.changed_since(snapshot) {
                    continue 'pass;
                }
                if !satisfied {
                    return Err(PackageError::PackageNotSatisfied {
                        package: display_name(&self.catalog, id),
                        unsatisfied: self.unsatisfied_chain(id),
                    }
                    .into());
                }
            }
            if self.catalog.changed_since(snapshot) {
                continue;
            }

            if self.dry_run {
                report.would_acquire = self.names(&self.acquire_queue);
                report.would_install = self.names(&self.install_queue);
                return Ok(report);
            }

            if !self.acquire_queue.is_empty() {
                self.acquire_all(progress).await?;
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(report);
                }
                if self.catalog.changed_since(snapshot) {
                    continue;
                }
                for id in &self.acquire_queue {
                    if !self.catalog.require(id)?.has_local_copy() {
                        warn!("Could not acquire {}", display_name(&self.catalog, id));
                        self.catalog.set_could_not_download(id)?;
                    }
                }
                if self.catalog.changed_since(snapshot) {
                    continue;
                }
            }

            for id in self.install_queue.clone() {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(report);
                }
                if self.catalog.is_installed(&id)? {
                    continue;
                }
                let package = self.catalog.require(&id)?;
                let name = package.identity().cosmetic_name().to_string();
                info!("Installing {}", name);

                let result = self.catalog.format().install(&package, &mut |percent| {
                    progress(ProgressEvent::Installing {
                        name: name.clone(),
                        percent,
                    })
                });
                match result {
                    Ok(()) => {
                        self.catalog.set_installed(&id, true)?;
                        report.installed.push(name);
                        self.compose_installed(&package)?;
                    }
                    Err(e) => {
                        progress(ProgressEvent::FailedInstall {
                            name: name.clone(),
                            reason: format!("{:#}", e),
                        });
                        if !package.allowed_to_supercede() {
                            return Err(e);
                        }
                        warn!("Install of {} failed, looking for alternatives: {:#}", name, e);
                        self.catalog.set_failed_install(&id)?;
                        self.catalog.refresh_installed();
                        continue 'pass;
                    }
                }
            }

            if !self.catalog.changed_since(snapshot) {
                return Ok(report);
            }
        }
    }

    async fn acquire_all(&self, progress: &mut ProgressSink<'_>) -> Result<()> {
        let destination = self.catalog.config().package_cache_dir();
        for id in &self.acquire_queue {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let package = self.catalog.require(id)?;
            progress(ProgressEvent::Acquiring {
                name: package.identity().cosmetic_name().to_string(),
            });
            let acquired = self.acquirer.acquire(&package, &destination).await;
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let path = match acquired {
                Ok(path) => path,
                Err(e) => {
                    warn!("Acquiring {} failed: {:#}", package.identity(), e);
                    continue;
                }
            };
            match self.catalog.get_or_build_from_file(&path) {
                Ok(found) if &found == id => {}
                Ok(found) => warn!("{} turned out to be {}, not {}", path.display(), found, id),
                Err(e) => warn!("{} is not usable: {:#}", path.display(), e),
            }
        }
        Ok(())
    }

    fn names(&self, ids: &[PackageId]) -> Vec<String> {
        ids.iter().map(|id| display_name(&self.catalog, id)).collect()
    }

    /// Removes installed packages, undoing their composition and handing
    /// "current" to the next best installed version. Returns the packages
    /// removed before any cancellation.
    #[tracing::instrument(skip(self, progress))]
    pub fn remove(&mut self, names: &[String], progress: &mut ProgressSink<'_>) -> Result<Vec<String>> {
        let ids = self.catalog.resolve_installed_names(names)?;
        let mut removed = Vec::new();

        for id in ids {
            if self.cancel.is_cancelled() {
                break;
            }
            let package = self.catalog.require(&id)?;
            let name = package.identity().cosmetic_name().to_string();
            info!("Removing {}", name);
            progress(ProgressEvent::Removing {
                name: name.clone(),
                percent: 0,
            });

            self.decompose(&package)?;
            self.catalog.format().remove(&package, &mut |percent| {
                progress(ProgressEvent::Removing {
                    name: name.clone(),
                    percent,
                })
            })?;
            self.catalog.set_installed(&id, false)?;

            match self.current_package(package.identity())? {
                Some(next) => self.make_current(&next)?,
                None => self.markers_clear(package.identity())?,
            }
            removed.push(name);
        }
        Ok(removed)
    }

    /// Makes an installed package the current version of its product.
    pub fn set_current(&mut self, name: &str) -> Result<PackageId> {
        let ids = self
            .catalog
            .resolve_installed_names(&[name.to_string()])
            .map_err(|e| match package_error(&e) {
                Some(PackageError::PackageIsNotInstalled(n)) => {
                    PackageError::PackageNotInstalled(n.clone()).into()
                }
                _ => e,
            })?;
        let Some(id) = ids.into_iter().next() else {
            return Err(PackageError::PackageNotFound(name.to_string()).into());
        };
        self.make_current(&id)?;
        Ok(id)
    }

    /// The current version of the product `identity` belongs to: the marked
    /// version if it is still installed, otherwise the highest installed one.
    /// A stale marker is repaired when the caller is elevated.
    pub fn current_package(&self, identity: &PackageIdentity) -> Result<Option<PackageId>> {
        let general_name = identity.general_name();
        let mut installed: Vec<Package> = self
            .catalog
            .installed_packages()?
            .into_iter()
            .filter(|p| p.identity().general_name() == general_name)
            .collect();
        installed.sort_by_key(|p| std::cmp::Reverse(p.identity().version()));
        let Some(highest) = installed.first() else {
            return Ok(None);
        };

        let config = self.catalog.config();
        let runtime = self.catalog.runtime().as_ref();
        let markers = CurrentMarkers::new(runtime, &config.products_dir());
        match markers.get(general_name)? {
            None => Ok(Some(highest.id())),
            Some(version) => {
                if !version.is_zero()
                    && let Some(marked) = installed.iter().find(|p| p.identity().version() == version)
                {
                    return Ok(Some(marked.id()));
                }
                if config.elevated(runtime) {
                    debug!("Repairing current marker of {}", general_name);
                    markers.set(general_name, highest.identity().version())?;
                }
                Ok(Some(highest.id()))
            }
        }
    }

    fn make_current(&self, id: &PackageId) -> Result<()> {
        let package = self.catalog.require(id)?;
        let identity = package.identity();

        let previous = self.current_marker(identity)?;
        if let Some(previous) = previous
            && previous != identity.version()
        {
            let old = self
                .catalog
                .installed_packages()?
                .into_iter()
                .find(|p| {
                    p.identity().general_name() == identity.general_name()
                        && p.identity().version() == previous
                });
            if let Some(old) = old {
                self.decompose(&old)?;
            }
        }

        self.compose(&package, true)?;
        let config = self.catalog.config();
        CurrentMarkers::new(self.catalog.runtime().as_ref(), &config.products_dir())
            .set(identity.general_name(), identity.version())
    }

    fn current_marker(&self, identity: &PackageIdentity) -> Result<Option<Version>> {
        let config = self.catalog.config();
        CurrentMarkers::new(self.catalog.runtime().as_ref(), &config.products_dir())
            .get(identity.general_name())
    }

    fn markers_clear(&self, identity: &PackageIdentity) -> Result<()> {
        let config = self.catalog.config();
        CurrentMarkers::new(self.catalog.runtime().as_ref(), &config.products_dir())
            .clear(identity.general_name())
    }

    /// After an install, a version newer than the product's current one
    /// takes over; otherwise it only fills in links nobody owns yet.
    fn compose_installed(&self, package: &Package) -> Result<()> {
        let identity = package.identity();
        let current = self.current_marker(identity)?;
        let newer = current.is_none_or(|version| identity.version() > version);
        if newer {
            self.make_current(&package.id())
        } else {
            self.compose(package, false)
        }
    }

    fn compose(&self, package: &Package, make_current: bool) -> Result<()> {
        let config = self.catalog.config();
        let package_dir = self.catalog.format().package_directory(package.identity());
        let vars = Variables::for_package(config, package, &package_dir);
        let composer = Composer::new(self.catalog.runtime().as_ref(), &config.root);
        let written = composer.apply(&package_rules(package), &vars, &package_dir, make_current)?;
        debug!("Composed {} links for {}", written, package.identity());
        Ok(())
    }

    fn decompose(&self, package: &Package) -> Result<()> {
        let config = self.catalog.config();
        let package_dir = self.catalog.format().package_directory(package.identity());
        let vars = Variables::for_package(config, package, &package_dir);
        let composer = Composer::new(self.catalog.runtime().as_ref(), &config.root);
        let removed = composer.undo(&package_rules(package), &vars, &package_dir)?;
        debug!("Removed {} links of {}", removed, package.identity());
        Ok(())
    }
}
