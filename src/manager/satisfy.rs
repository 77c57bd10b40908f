//! Dependency satisfaction: decides whether a package can end up installed
//! and queues the work needed to get there.

use anyhow::Result;
use log::{debug, warn};
use std::collections::HashSet;

use super::PackageManager;
use crate::error::PackageError;
use crate::identity::PackageId;

impl PackageManager {
    /// True if `target` is installed, can be stood in for, or can be
    /// acquired and installed along with its dependencies. Queues acquire
    /// and install work as a side effect.
    ///
    /// Fails with `PotentialUpgrades` when newer versions exist but the
    /// package may not be superseded without the user choosing.
    pub fn can_satisfy(&mut self, target: &PackageId) -> Result<bool> {
        let mut visiting = HashSet::new();
        self.satisfy(target, &mut visiting)
    }

    fn satisfy(&mut self, target: &PackageId, visiting: &mut HashSet<PackageId>) -> Result<bool> {
        if !visiting.insert(target.clone()) {
            warn!("Dependency cycle through {}, treating it as satisfied", target);
            return Ok(true);
        }
        let acquire_len = self.acquire_queue.len();
        let install_len = self.install_queue.len();

        let result = self.satisfy_unguarded(target, visiting);
        visiting.remove(target);

        let satisfied = result?;
        if !satisfied {
            self.acquire_queue.truncate(acquire_len);
            self.install_queue.truncate(install_len);
        }
        self.catalog.update(target, |p| p.can_satisfy = satisfied)?;
        Ok(satisfied)
    }

    fn satisfy_unguarded(
        &mut self,
        target: &PackageId,
        visiting: &mut HashSet<PackageId>,
    ) -> Result<bool> {
        let catalog = self.catalog.clone();
        let package = catalog.require(target)?;

        if catalog.is_installed(target)? {
            return Ok(true);
        }

        if !package.do_not_supercede {
            if let Some(installed) = catalog.supercedents(target, true)?.into_iter().next() {
                debug!("{} is stood in for by installed {}", target, installed);
                catalog.update(target, |p| p.supercedent = Some(installed))?;
                return Ok(true);
            }

            let candidates = catalog.supercedents(target, false)?;
            if !candidates.is_empty() {
                if !package.allowed_to_supercede() {
                    return Err(PackageError::PotentialUpgrades {
                        package: package.identity().cosmetic_name().to_string(),
                        candidates: candidates
                            .iter()
                            .filter_map(|id| catalog.package(id))
                            .map(|p| p.identity().cosmetic_name().to_string())
                            .collect(),
                    }
                    .into());
                }
                for candidate in candidates {
                    if self.satisfy(&candidate, visiting)? {
                        debug!("{} is superseded by {}", target, candidate);
                        catalog.update(target, |p| p.supercedent = Some(candidate))?;
                        return Ok(true);
                    }
                }
            }
        }

        if package.could_not_download() || package.package_failed_install() {
            debug!("{} failed earlier in this session", target);
            return Ok(false);
        }

        for dependency in &package.dependencies {
            if !self.satisfy(dependency, visiting)? {
                debug!("{} is blocked by {}", target, dependency);
                return Ok(false);
            }
        }

        let queue = if package.has_local_copy() {
            &mut self.install_queue
        } else {
            &mut self.acquire_queue
        };
        if !queue.contains(target) {
            queue.push(target.clone());
        }
        Ok(true)
    }

    /// The chain of unsatisfied packages starting at `target`, following the
    /// first failing dependency at each step.
    pub(super) fn unsatisfied_chain(&self, target: &PackageId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(target.clone());
        while let Some(id) = current.take() {
            if !seen.insert(id.clone()) {
                break;
            }
            let Some(package) = self.catalog.package(&id) else {
                break;
            };
            chain.push(package.identity().cosmetic_name().to_string());
            current = package
                .dependencies
                .iter()
                .find(|dep| self.catalog.package(dep).is_some_and(|d| !d.can_satisfy))
                .cloned();
        }
        chain
    }
}
