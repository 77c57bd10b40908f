//! Package identity: name, packed four-part version, architecture and
//! publisher key token, plus the canonical/cosmetic/general names derived from them.

mod name;

pub use name::{MatchKind, PackageFilter, PackageName, scan_filter};
pub(crate) use name::{matches_wildcard, wildcard};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Processor architecture a package is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Architecture {
    X86,
    X64,
    Any,
    Arm,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86 => "x86",
            Architecture::X64 => "x64",
            Architecture::Any => "any",
            Architecture::Arm => "arm",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "x86" => Ok(Architecture::X86),
            "x64" => Ok(Architecture::X64),
            "any" => Ok(Architecture::Any),
            "arm" => Ok(Architecture::Arm),
            other => bail!("Unknown architecture: {}", other),
        }
    }
}

/// A four-part version packed into 64 bits, 16 bits per part, so versions
/// compare numerically.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Version(u64);

impl Version {
    pub const ZERO: Version = Version(0);

    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Version(
            ((major as u64) << 48) | ((minor as u64) << 32) | ((build as u64) << 16) | revision as u64,
        )
    }

    pub fn from_packed(value: u64) -> Self {
        Version(value)
    }

    pub fn packed(&self) -> u64 {
        self.0
    }

    pub fn parts(&self) -> [u16; 4] {
        [
            (self.0 >> 48) as u16,
            (self.0 >> 32) as u16,
            (self.0 >> 16) as u16,
            self.0 as u16,
        ]
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.parts();
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    /// Accepts one to four dot-separated parts; missing parts are zero.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("Empty version string");
        }
        let pieces: Vec<&str> = s.split('.').collect();
        if pieces.len() > 4 {
            bail!("Version has more than four parts: {}", s);
        }
        let mut parts = [0u16; 4];
        for (slot, piece) in parts.iter_mut().zip(&pieces) {
            *slot = piece
                .parse::<u16>()
                .with_context(|| format!("Invalid version part '{}' in {}", piece, s))?;
        }
        Ok(Version::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl TryFrom<String> for Version {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

/// Catalog key: the lowercase canonical name of a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(String);

impl PackageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable identity of one concrete package version.
#[derive(Debug, Clone)]
pub struct PackageIdentity {
    name: String,
    version: Version,
    architecture: Architecture,
    public_key_token: String,
    canonical_name: String,
    cosmetic_name: String,
    general_name: String,
}

impl PackageIdentity {
    pub fn new(
        name: impl Into<String>,
        version: Version,
        architecture: Architecture,
        public_key_token: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let public_key_token = public_key_token.into().to_ascii_lowercase();
        let cosmetic_name = format!("{}-{}-{}", name, version, architecture);
        let canonical_name = format!("{}-{}", cosmetic_name, public_key_token).to_lowercase();
        let general_name = format!("{}-{}", name, public_key_token).to_lowercase();
        Self {
            name,
            version,
            architecture,
            public_key_token,
            canonical_name,
            cosmetic_name,
            general_name,
        }
    }

    /// Parses a full canonical name (`name-#.#.#.#-arch-token`).
    pub fn parse(text: &str) -> Result<Self> {
        let parsed = PackageName::parse(text);
        parsed
            .to_identity()
            .with_context(|| format!("Not a canonical package name: {}", text))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn public_key_token(&self) -> &str {
        &self.public_key_token
    }

    /// `name-version-arch-token`, lowercase; unique per package.
    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    /// `name-version-arch`, for display and install directories.
    pub fn cosmetic_name(&self) -> &str {
        &self.cosmetic_name
    }

    /// `name-token`: the product regardless of version.
    pub fn general_name(&self) -> &str {
        &self.general_name
    }

    pub fn id(&self) -> PackageId {
        PackageId(self.canonical_name.clone())
    }

    /// Same product and architecture, any version.
    pub fn same_product(&self, other: &PackageIdentity) -> bool {
        self.general_name == other.general_name && self.architecture == other.architecture
    }
}

impl PartialEq for PackageIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_name == other.canonical_name
    }
}

impl Eq for PackageIdentity {}

impl Hash for PackageIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_name.hash(state);
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "1e373a58e25250cb";

    #[test]
    fn test_version_packing_orders_numerically() {
        let v1: Version = "1.2".parse().unwrap();
        let v2: Version = "1.10.0.0".parse().unwrap();
        assert_eq!(v1.to_string(), "1.2.0.0");
        assert!(v2 > v1);
        assert_eq!(Version::new(1, 2, 0, 0), v1);
        assert_eq!(Version::from_packed(v2.packed()), v2);
    }

    #[test]
    fn test_version_rejects_garbage() {
        assert!("".parse::<Version>().is_err());
        assert!("1.2.3.4.5".parse::<Version>().is_err());
        assert!("1.x".parse::<Version>().is_err());
        assert!("70000".parse::<Version>().is_err());
    }

    #[test]
    fn test_architecture_parse_is_case_insensitive() {
        assert_eq!("X64".parse::<Architecture>().unwrap(), Architecture::X64);
        assert_eq!("any".parse::<Architecture>().unwrap(), Architecture::Any);
        assert!("mips".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_derived_names() {
        let id = PackageIdentity::new(
            "OpenSSL",
            "1.0.2.0".parse().unwrap(),
            Architecture::X86,
            TOKEN.to_uppercase(),
        );
        assert_eq!(id.canonical_name(), "openssl-1.0.2.0-x86-1e373a58e25250cb");
        assert_eq!(id.cosmetic_name(), "OpenSSL-1.0.2.0-x86");
        assert_eq!(id.general_name(), "openssl-1e373a58e25250cb");
        assert_eq!(id.id().as_str(), id.canonical_name());
    }

    #[test]
    fn test_canonical_round_trip() {
        for (name, version, arch) in [
            ("zlib", "1.2.8.0", Architecture::X64),
            ("lib-with-dashes", "0.0.0.1", Architecture::Any),
            ("boost", "65535.1.2.3", Architecture::Arm),
        ] {
            let id = PackageIdentity::new(name, version.parse().unwrap(), arch, TOKEN);
            let parsed = PackageIdentity::parse(id.canonical_name()).unwrap();
            assert_eq!(parsed.name(), name);
            assert_eq!(parsed.version(), id.version());
            assert_eq!(parsed.architecture(), arch);
            assert_eq!(parsed.public_key_token(), TOKEN);
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn test_identity_equality_ignores_case() {
        let a = PackageIdentity::new("Foo", Version::new(1, 0, 0, 0), Architecture::X86, TOKEN);
        let b = PackageIdentity::new("foo", Version::new(1, 0, 0, 0), Architecture::X86, TOKEN);
        assert_eq!(a, b);
        assert!(a.same_product(&b));
    }

    #[test]
    fn test_version_serde_as_string() {
        let v = Version::new(2, 1, 0, 0);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"2.1.0.0\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
