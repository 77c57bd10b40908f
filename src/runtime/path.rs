//! Lexical path helpers used for composition parentage checks and link targets.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// Does not touch the filesystem or follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// True if `path` is `dir` or lies beneath it, comparing normalized components.
/// `/opt/trellis/apps/../../etc` is not under `/opt/trellis`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    let path = normalize_path(path);
    let dir = normalize_path(dir);
    path.starts_with(&dir)
}

/// Relative path from the directory holding `from_link` to `to_target`, so
/// links keep working when the install root is moved. `None` when no
/// relative path exists (different drives on Windows).
pub fn relative_symlink_path(from_link: &Path, to_target: &Path) -> Option<PathBuf> {
    let from_dir = from_link.parent()?;
    let result = pathdiff::diff_paths(to_target, from_dir)?;
    if result.is_absolute() {
        return None;
    }
    Some(result)
}

/// Joins a possibly relative path onto `base` and normalizes the result.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/opt/./trellis/apps/../bin")),
            PathBuf::from("/opt/trellis/bin")
        );
        assert_eq!(
            normalize_path(Path::new("feeds/local/../remote")),
            PathBuf::from("feeds/remote")
        );
        assert_eq!(normalize_path(Path::new("./.")), PathBuf::from(""));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_path_under() {
        let root = Path::new("/opt/trellis");
        assert!(is_path_under(Path::new("/opt/trellis/bin/zlib"), root));
        assert!(is_path_under(root, root));
        assert!(!is_path_under(Path::new("/opt/trellis-other/bin"), root));
        assert!(!is_path_under(Path::new("/opt/trellis/apps/../../etc/passwd"), root));
        assert!(!is_path_under(Path::new("/opt"), root));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_symlink_path() {
        let rel = relative_symlink_path(
            Path::new("/opt/trellis/lib/x64/zlib"),
            Path::new("/opt/trellis/apps/zlib-1.2.8.0-x64/lib"),
        );
        assert_eq!(rel, Some(PathBuf::from("../../apps/zlib-1.2.8.0-x64/lib")));

        let sibling = relative_symlink_path(
            Path::new("/opt/trellis/apps/zlib"),
            Path::new("/opt/trellis/apps/zlib-1.2.8.0-x64"),
        );
        assert_eq!(sibling, Some(PathBuf::from("zlib-1.2.8.0-x64")));
    }

    #[cfg(unix)]
    #[test]
    fn test_absolutize() {
        let cwd = Path::new("/home/user/work");
        assert_eq!(
            absolutize(cwd, Path::new("../pkgs/zlib.tgz")),
            PathBuf::from("/home/user/pkgs/zlib.tgz")
        );
        assert_eq!(
            absolutize(cwd, Path::new("/srv/feed")),
            PathBuf::from("/srv/feed")
        );
    }
}
