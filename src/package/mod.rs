//! The package record: one concrete package version, its dependency edges
//! (as catalog keys), policy flags and working state.

mod manifest;
mod role;

pub use manifest::{AssemblyInfo, PackageManifest, PackageMetadata, PolicyRange};
pub use role::{Role, RoleKind};

use std::path::PathBuf;

use crate::compose::CompositionRule;
use crate::identity::{PackageId, PackageIdentity, Version};
use crate::property::MultiValue;

#[derive(Debug, Clone)]
pub struct Package {
    identity: PackageIdentity,
    /// Ordered, distinct.
    pub dependencies: Vec<PackageId>,
    pub roles: Vec<Role>,
    pub assemblies: Vec<AssemblyInfo>,
    /// Explicit rules from the package itself; role rules are derived on demand.
    pub composition_rules: Vec<CompositionRule>,
    pub description: Option<String>,
    pub publisher: Option<String>,

    pub do_not_supercede: bool,
    pub upgrade_as_needed: bool,
    pub user_specified: bool,
    pub policy_minimum_version: Version,
    pub policy_maximum_version: Version,

    pub feed_location: MultiValue<String>,
    pub remote_location: MultiValue<String>,
    pub local_path: MultiValue<PathBuf>,

    pub(crate) installed: Option<bool>,
    pub(crate) could_not_download: bool,
    pub(crate) package_failed_install: bool,
    pub can_satisfy: bool,
    pub supercedent: Option<PackageId>,
}

impl Package {
    pub fn new(identity: PackageIdentity) -> Self {
        Self {
            identity,
            dependencies: Vec::new(),
            roles: Vec::new(),
            assemblies: Vec::new(),
            composition_rules: Vec::new(),
            description: None,
            publisher: None,
            do_not_supercede: false,
            upgrade_as_needed: false,
            user_specified: false,
            policy_minimum_version: Version::ZERO,
            policy_maximum_version: Version::ZERO,
            feed_location: MultiValue::new(false),
            remote_location: MultiValue::new(false),
            local_path: MultiValue::new(false),
            installed: None,
            could_not_download: false,
            package_failed_install: false,
            can_satisfy: false,
            supercedent: None,
        }
    }

    pub fn identity(&self) -> &PackageIdentity {
        &self.identity
    }

    pub fn id(&self) -> PackageId {
        self.identity.id()
    }

    /// Whether the resolver may substitute a newer version for this one.
    pub fn allowed_to_supercede(&self) -> bool {
        self.upgrade_as_needed || (!self.user_specified && !self.do_not_supercede)
    }

    pub fn has_local_copy(&self) -> bool {
        !self.local_path.is_empty()
    }

    /// Cached installed state; `None` until the format handler has been asked.
    pub fn installed_state(&self) -> Option<bool> {
        self.installed
    }

    pub fn could_not_download(&self) -> bool {
        self.could_not_download
    }

    pub fn package_failed_install(&self) -> bool {
        self.package_failed_install
    }

    pub fn add_dependency(&mut self, dependency: PackageId) -> bool {
        if self.dependencies.contains(&dependency) {
            return false;
        }
        self.dependencies.push(dependency);
        true
    }

    /// True if this package may stand in for `target`: same product and
    /// architecture, strictly newer, and `target` inside the policy range.
    pub fn supersedes(&self, target: &PackageIdentity) -> bool {
        self.identity.same_product(target)
            && self.identity.version() > target.version()
            && self.policy_minimum_version <= target.version()
            && target.version() <= self.policy_maximum_version
    }

    /// Folds newly discovered metadata into this record. Existing scalar
    /// values are kept; lists and locations accumulate.
    pub fn merge_metadata(&mut self, meta: &PackageMetadata) -> bool {
        let mut changed = false;
        for dep in &meta.dependencies {
            changed |= self.add_dependency(dep.id());
        }
        for role in &meta.roles {
            if !self.roles.contains(role) {
                self.roles.push(role.clone());
                changed = true;
            }
        }
        for assembly in &meta.assemblies {
            if !self.assemblies.contains(assembly) {
                self.assemblies.push(assembly.clone());
                changed = true;
            }
        }
        for rule in &meta.composition_rules {
            if !self.composition_rules.contains(rule) {
                self.composition_rules.push(rule.clone());
                changed = true;
            }
        }
        if self.description.is_none() && meta.description.is_some() {
            self.description = meta.description.clone();
            changed = true;
        }
        if self.publisher.is_none() && meta.publisher.is_some() {
            self.publisher = meta.publisher.clone();
            changed = true;
        }
        if self.policy_maximum_version.is_zero() && !meta.policy_maximum_version.is_zero() {
            self.policy_minimum_version = meta.policy_minimum_version;
            self.policy_maximum_version = meta.policy_maximum_version;
            changed = true;
        }
        if let Some(feed) = &meta.feed_location {
            changed |= self.feed_location.add(feed.clone());
        }
        if let Some(remote) = &meta.original_location {
            changed |= self.remote_location.add(remote.clone());
        }
        changed
    }
}
