//! Error taxonomy for resolution, installation and removal.
//!
//! Errors travel through `anyhow::Result`; callers that need to react to a
//! particular condition use `err.downcast_ref::<PackageError>()`.

use std::fmt;
use std::path::PathBuf;

/// Why a file was rejected as a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// The file is not a package of the supported format at all.
    NotPackageFormat,
    /// The file looks like a package but its manifest cannot be used.
    Malformed(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::NotPackageFormat => write!(f, "not a package"),
            InvalidReason::Malformed(msg) => write!(f, "malformed package: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageError {
    /// A requested name matched nothing after scanning.
    PackageNotFound(String),
    /// A package key is not present in the catalog.
    UnknownPackage(String),
    /// A requested name matched more than one package.
    MultiplePackagesMatch {
        request: String,
        matches: Vec<String>,
    },
    /// Newer versions could stand in for a package, but nothing authorizes the choice.
    /// Candidates are in descending version order.
    PotentialUpgrades {
        package: String,
        candidates: Vec<String>,
    },
    /// The dependency search was exhausted. `unsatisfied` lists the failing chain.
    PackageNotSatisfied {
        package: String,
        unsatisfied: Vec<String>,
    },
    InvalidPackage {
        path: PathBuf,
        reason: InvalidReason,
    },
    /// Removal was requested for a package that is not installed.
    PackageIsNotInstalled(String),
    /// A package must be installed to become current.
    PackageNotInstalled(String),
}

impl fmt::Display for PackageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageError::PackageNotFound(name) => write!(f, "Package not found: {}", name),
            PackageError::UnknownPackage(name) => write!(f, "Unknown package: {}", name),
            PackageError::MultiplePackagesMatch { request, matches } => {
                write!(
                    f,
                    "'{}' matches more than one package: {}",
                    request,
                    matches.join(", ")
                )
            }
            PackageError::PotentialUpgrades {
                package,
                candidates,
            } => {
                write!(
                    f,
                    "Newer versions of {} are available ({}); request one explicitly or allow upgrades",
                    package,
                    candidates.join(", ")
                )
            }
            PackageError::PackageNotSatisfied {
                package,
                unsatisfied,
            } => {
                if unsatisfied.is_empty() {
                    write!(f, "Unable to satisfy package {}", package)
                } else {
                    write!(
                        f,
                        "Unable to satisfy package {} (unsatisfied: {})",
                        package,
                        unsatisfied.join(" -> ")
                    )
                }
            }
            PackageError::InvalidPackage { path, reason } => {
                write!(f, "Invalid package {}: {}", path.display(), reason)
            }
            PackageError::PackageIsNotInstalled(name) => {
                write!(f, "Package is not installed: {}", name)
            }
            PackageError::PackageNotInstalled(name) => {
                write!(f, "Package must be installed first: {}", name)
            }
        }
    }
}

impl std::error::Error for PackageError {}

impl PackageError {
    pub fn not_package_format(path: impl Into<PathBuf>) -> Self {
        PackageError::InvalidPackage {
            path: path.into(),
            reason: InvalidReason::NotPackageFormat,
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        PackageError::InvalidPackage {
            path: path.into(),
            reason: InvalidReason::Malformed(msg.into()),
        }
    }
}

/// Returns the `PackageError` carried by an anyhow error, if any.
pub fn package_error(err: &anyhow::Error) -> Option<&PackageError> {
    err.downcast_ref::<PackageError>()
}

/// True if the error says the file is not a package of the supported format.
pub fn is_not_package_format(err: &anyhow::Error) -> bool {
    matches!(
        package_error(err),
        Some(PackageError::InvalidPackage {
            reason: InvalidReason::NotPackageFormat,
            ..
        })
    )
}
