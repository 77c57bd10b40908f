//! Package metadata as reported by a format handler, and the `package.json`
//! manifest it is read from.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::Role;
use crate::compose::CompositionRule;
use crate::identity::{PackageIdentity, Version};

/// An assembly (library) shipped inside a package.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AssemblyInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

/// Everything a format handler knows about one package file.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageMetadata {
    pub identity: PackageIdentity,
    pub dependencies: Vec<PackageIdentity>,
    pub assemblies: Vec<AssemblyInfo>,
    pub roles: Vec<Role>,
    pub composition_rules: Vec<CompositionRule>,
    pub policy_minimum_version: Version,
    pub policy_maximum_version: Version,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub feed_location: Option<String>,
    pub original_location: Option<String>,
}

impl PackageMetadata {
    pub fn new(identity: PackageIdentity) -> Self {
        Self {
            identity,
            dependencies: Vec::new(),
            assemblies: Vec::new(),
            roles: Vec::new(),
            composition_rules: Vec::new(),
            policy_minimum_version: Version::ZERO,
            policy_maximum_version: Version::ZERO,
            description: None,
            publisher: None,
            feed_location: None,
            original_location: None,
        }
    }
}

/// Range of older versions a package may stand in for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PolicyRange {
    pub minimum_version: Version,
    pub maximum_version: Version,
}

/// On-disk manifest, stored as `package.json` at the root of a package archive
/// and as entries of an index feed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub public_key_token: String,
    /// Canonical names of required packages.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub assemblies: Vec<AssemblyInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default)]
    pub composition: Vec<CompositionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_location: Option<String>,
}

impl PackageManifest {
    pub fn into_metadata(self) -> Result<PackageMetadata> {
        let version: Version = self
            .version
            .parse()
            .with_context(|| format!("Invalid version for {}", self.name))?;
        let architecture = self
            .arch
            .parse()
            .with_context(|| format!("Invalid architecture for {}", self.name))?;
        if self.public_key_token.len() != 16
            || !self.public_key_token.chars().all(|c| c.is_ascii_hexdigit())
        {
            anyhow::bail!(
                "Public key token of {} must be 16 hex digits, got '{}'",
                self.name,
                self.public_key_token
            );
        }
        let identity =
            PackageIdentity::new(self.name, version, architecture, self.public_key_token);

        let dependencies = self
            .dependencies
            .iter()
            .map(|dep| {
                PackageIdentity::parse(dep)
                    .with_context(|| format!("Invalid dependency of {}", identity))
            })
            .collect::<Result<Vec<_>>>()?;

        let (policy_minimum_version, policy_maximum_version) = match self.policy {
            Some(range) => (range.minimum_version, range.maximum_version),
            None => (Version::ZERO, Version::ZERO),
        };

        Ok(PackageMetadata {
            identity,
            dependencies,
            assemblies: self.assemblies,
            roles: self.roles,
            composition_rules: self.composition,
            policy_minimum_version,
            policy_maximum_version,
            description: self.description,
            publisher: self.publisher,
            feed_location: self.feed_location,
            original_location: self.original_location,
        })
    }
}
