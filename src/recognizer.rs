//! Classifies a requested token as a package file, a feed location, or
//! something to be matched as a package name.

use std::path::{Path, PathBuf};

use crate::catalog::INSTALLED_FEED;
use crate::runtime::{Runtime, absolutize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognized {
    PackageFile(PathBuf),
    Feed(String),
    Unknown,
}

const PACKAGE_EXTENSIONS: &[&str] = &[".tgz", ".tar.gz"];

/// Only tokens that look like paths touch the filesystem, so a bare
/// package name never collides with a directory of the same name.
fn looks_like_path(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    token.contains('/')
        || token.contains('\\')
        || token.starts_with('.')
        || lower.ends_with(".json")
        || PACKAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn has_wildcard(text: &str) -> bool {
    text.contains('*') || text.contains('?')
}

pub fn recognize(runtime: &dyn Runtime, token: &str) -> Recognized {
    if token == INSTALLED_FEED {
        return Recognized::Feed(token.to_string());
    }
    if token.contains("://") || !looks_like_path(token) {
        return Recognized::Unknown;
    }

    let path = match runtime.current_dir() {
        Ok(cwd) => absolutize(&cwd, Path::new(token)),
        Err(_) => PathBuf::from(token),
    };
    let location = path.to_string_lossy().to_string();

    if runtime.is_dir(&path) {
        return Recognized::Feed(location);
    }
    if runtime.exists(&path) {
        if location.to_ascii_lowercase().ends_with(".json") {
            return Recognized::Feed(location);
        }
        return Recognized::PackageFile(path);
    }

    let wildcard_in_dir = path
        .file_name()
        .is_some_and(|name| has_wildcard(&name.to_string_lossy()))
        && path.parent().is_some_and(|parent| runtime.is_dir(parent));
    if wildcard_in_dir {
        return Recognized::Feed(location);
    }
    Recognized::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use tempfile::tempdir;

    #[test]
    fn test_bare_names_are_unknown() {
        let runtime = RealRuntime;
        assert_eq!(recognize(&runtime, "zlib"), Recognized::Unknown);
        assert_eq!(recognize(&runtime, "zlib-1.2.*"), Recognized::Unknown);
        assert_eq!(
            recognize(&runtime, "https://example.com/feed.json"),
            Recognized::Unknown
        );
    }

    #[test]
    fn test_installed_feed() {
        assert_eq!(
            recognize(&RealRuntime, "installed://"),
            Recognized::Feed("installed://".into())
        );
    }

    #[test]
    fn test_filesystem_tokens() {
        let dir = tempdir().unwrap();
        let package = dir.path().join("foo-1.0.tgz");
        let index = dir.path().join("index.json");
        std::fs::write(&package, "x").unwrap();
        std::fs::write(&index, "{}").unwrap();
        let runtime = RealRuntime;

        let dir_text = dir.path().to_string_lossy().to_string();
        assert_eq!(recognize(&runtime, &dir_text), Recognized::Feed(dir_text.clone()));
        assert_eq!(
            recognize(&runtime, &package.to_string_lossy()),
            Recognized::PackageFile(package.clone())
        );
        assert_eq!(
            recognize(&runtime, &index.to_string_lossy()),
            Recognized::Feed(index.to_string_lossy().to_string())
        );

        let glob = dir.path().join("*.tgz").to_string_lossy().to_string();
        assert_eq!(recognize(&runtime, &glob), Recognized::Feed(glob.clone()));

        let missing = dir.path().join("missing.tgz").to_string_lossy().to_string();
        assert_eq!(recognize(&runtime, &missing), Recognized::Unknown);
    }
}
