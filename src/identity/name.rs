//! Parsing of requested package names, from full canonical names down to
//! bare product names with wildcards.

use glob::{MatchOptions, Pattern};
use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::{Architecture, PackageIdentity, Version};

static CANONICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<name>.+)-(?P<v1>\d{1,5})\.(?P<v2>\d{1,5})\.(?P<v3>\d{1,5})\.(?P<v4>\d{1,5})-(?P<arch>any|x86|x64|arm)-(?P<pkt>[0-9a-f]{16})$",
    )
    .expect("canonical name pattern")
});

/// Partial forms, most specific first. Version parts, architecture and
/// token may be `*`.
static PARTIALS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    const V: &str = r"(\d{1,5}|\*)";
    const ARCH: &str = r"(?P<arch>any|x86|x64|arm|\*)";
    const PKT: &str = r"(?P<pkt>[0-9a-f]{16}|\*)";
    let tail = format!(r"(?:-{})?(?:-{})?", ARCH, PKT);
    [
        format!(r"-(?P<v1>{V})\.(?P<v2>{V})\.(?P<v3>{V})\.(?P<v4>{V})-{ARCH}-{PKT}"),
        format!(r"-(?P<v1>{V})\.(?P<v2>{V})\.(?P<v3>{V})\.(?P<v4>{V})-{ARCH}"),
        format!(r"-(?P<v1>{V})\.(?P<v2>{V})\.(?P<v3>{V})\.(?P<v4>{V})"),
        format!(r"-(?P<v1>{V})\.(?P<v2>{V})\.(?P<v3>{V}){tail}"),
        format!(r"-(?P<v1>{V})\.(?P<v2>{V}){tail}"),
        format!(r"-(?P<v1>{V}){tail}"),
    ]
    .iter()
    .map(|rest| Regex::new(&format!(r"(?i)^(?P<name>.+?){}$", rest)).expect("partial name pattern"))
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// A complete canonical name.
    Full,
    /// A name with some trailing fields given.
    Partial,
    /// Nothing recognizable; the whole input is the name.
    None,
}

/// Result of parsing a requested name. Absent fields mean "any".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageName {
    pub kind: MatchKind,
    pub name: String,
    /// Four-part version pattern, e.g. `1.0.*.*`.
    pub version: Option<String>,
    pub architecture: Option<String>,
    pub public_key_token: Option<String>,
}

impl PackageName {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.contains('/') || text.contains('\\') {
            return Self::bare(text);
        }

        if let Some(caps) = CANONICAL.captures(text) {
            return Self::from_captures(MatchKind::Full, &caps);
        }

        for pattern in PARTIALS.iter() {
            if let Some(caps) = pattern.captures(text) {
                return Self::from_captures(MatchKind::Partial, &caps);
            }
        }

        Self::bare(text)
    }

    fn bare(text: &str) -> Self {
        Self {
            kind: MatchKind::None,
            name: text.to_string(),
            version: None,
            architecture: None,
            public_key_token: None,
        }
    }

    fn from_captures(kind: MatchKind, caps: &Captures<'_>) -> Self {
        let field = |key: &str| caps.name(key).map(|m| m.as_str().to_ascii_lowercase());
        let version = ["v1", "v2", "v3", "v4"]
            .iter()
            .map(|key| field(key).unwrap_or_else(|| "*".to_string()))
            .collect::<Vec<_>>()
            .join(".");
        Self {
            kind,
            name: caps["name"].to_string(),
            version: Some(version),
            architecture: field("arch"),
            public_key_token: field("pkt"),
        }
    }

    /// The exact identity, when the input was a full canonical name.
    pub fn to_identity(&self) -> Option<PackageIdentity> {
        if self.kind != MatchKind::Full {
            return None;
        }
        let version: Version = self.version.as_deref()?.parse().ok()?;
        let architecture: Architecture = self.architecture.as_deref()?.parse().ok()?;
        Some(PackageIdentity::new(
            self.name.clone(),
            version,
            architecture,
            self.public_key_token.clone()?,
        ))
    }

    pub fn filter(&self) -> PackageFilter {
        PackageFilter {
            name: wildcard(&self.name),
            version: self.version.as_deref().map(wildcard),
            architecture: self.architecture.as_deref().map(wildcard),
            public_key_token: self.public_key_token.as_deref().map(wildcard),
        }
    }
}

/// The filter handed to feeds when scanning for a requested name.
pub fn scan_filter(name: &str) -> String {
    if name.contains('*') || name.contains('?') {
        name.to_string()
    } else {
        format!("{}*", name)
    }
}

/// Case-insensitive wildcard match on each identity field.
#[derive(Debug, Clone)]
pub struct PackageFilter {
    name: Pattern,
    version: Option<Pattern>,
    architecture: Option<Pattern>,
    public_key_token: Option<Pattern>,
}

impl PackageFilter {
    pub fn matches(&self, identity: &PackageIdentity) -> bool {
        let check = |pattern: &Option<Pattern>, value: &str| {
            pattern.as_ref().is_none_or(|p| matches_wildcard(p, value))
        };
        matches_wildcard(&self.name, identity.name())
            && check(&self.version, &identity.version().to_string())
            && check(&self.architecture, identity.architecture().as_str())
            && check(&self.public_key_token, identity.public_key_token())
    }
}

pub(crate) fn wildcard(text: &str) -> Pattern {
    Pattern::new(text)
        .or_else(|_| Pattern::new(&Pattern::escape(text)))
        .unwrap_or_default()
}

pub(crate) fn matches_wildcard(pattern: &Pattern, value: &str) -> bool {
    pattern.matches_with(
        value,
        MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        },
    )
}
