//! Install-root layout and user settings.
//!
//! The engine never reads process-global state for paths: everything is
//! derived from the `Config` handed to the catalog and the manager.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runtime::Runtime;

/// Optional `settings.json` in the state directory.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Settings {
    /// Extra glob patterns of feed locations never to scan.
    #[serde(default)]
    pub do_not_scan: Vec<String>,
    /// Feeds to register when no cache has been saved yet.
    #[serde(default)]
    pub system_feeds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub root: PathBuf,
    /// True when `root` is the machine-wide location.
    pub system_wide: bool,
    pub settings: Settings,
}

impl Config {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            system_wide: false,
            settings: Settings::default(),
        }
    }

    /// Picks the root (explicit, else the default for this user) and reads
    /// settings from it if present.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, root: Option<PathBuf>) -> Result<Self> {
        let (root, system_wide) = match root {
            Some(path) => {
                let system_wide = path == system_root();
                (path, system_wide)
            }
            None => default_root(runtime)?,
        };
        info!("Using install root: {}", root.display());

        let mut config = Config {
            root,
            system_wide,
            settings: Settings::default(),
        };

        let settings_file = config.settings_file();
        if runtime.exists(&settings_file) {
            debug!("Loading settings from {}", settings_file.display());
            let content = runtime.read_to_string(&settings_file)?;
            config.settings = serde_json::from_str(&content)
                .with_context(|| format!("Invalid settings file {}", settings_file.display()))?;
        }
        Ok(config)
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    pub fn include_dir(&self) -> PathBuf {
        self.root.join("include")
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.root.join("etc")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(".cache")
    }

    /// Where acquired package files are stored.
    pub fn package_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("packages")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".state")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.state_dir().join("cache.json")
    }

    pub fn products_dir(&self) -> PathBuf {
        self.state_dir().join("products")
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.state_dir().join("receipts")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.state_dir().join("settings.json")
    }

    /// Feed locations never scanned: the extracted payloads plus user patterns.
    pub fn exclusions(&self) -> Vec<String> {
        let apps = self.apps_dir();
        let mut patterns = vec![
            apps.to_string_lossy().to_string(),
            apps.join("**").to_string_lossy().to_string(),
        ];
        patterns.extend(self.settings.do_not_scan.iter().cloned());
        patterns
    }

    /// Whether this caller may repair shared state such as current-version markers.
    pub fn elevated<R: Runtime + ?Sized>(&self, runtime: &R) -> bool {
        !self.system_wide || runtime.is_privileged()
    }
}

/// The default root: the system location for privileged users, `~/.trellis` otherwise.
/// Returns the root and whether it is the system location.
#[tracing::instrument(skip(runtime))]
pub fn default_root<R: Runtime + ?Sized>(runtime: &R) -> Result<(PathBuf, bool)> {
    if runtime.is_privileged() {
        Ok((system_root(), true))
    } else {
        let home = runtime
            .home_dir()
            .context("Could not find home directory")?;
        Ok((home.join(".trellis"), false))
    }
}

#[cfg(target_os = "macos")]
fn system_root() -> PathBuf {
    PathBuf::from("/opt/trellis")
}

#[cfg(target_os = "windows")]
fn system_root() -> PathBuf {
    PathBuf::from(r"C:\ProgramData\trellis")
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn system_root() -> PathBuf {
    PathBuf::from("/usr/local/trellis")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use crate::test_utils::{test_home, test_root};
    use mockall::predicate::eq;

    #[test]
    fn test_default_root_unprivileged() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| false);
        runtime.expect_home_dir().returning(|| Some(test_home()));

        let (root, system_wide) = default_root(&runtime).unwrap();
        assert_eq!(root, test_home().join(".trellis"));
        assert!(!system_wide);
    }

    #[test]
    fn test_default_root_privileged() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| true);

        let (root, system_wide) = default_root(&runtime).unwrap();
        assert_eq!(root, system_root());
        assert!(system_wide);
    }

    #[test]
    fn test_default_root_without_home_fails() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| false);
        runtime.expect_home_dir().returning(|| None);
        assert!(default_root(&runtime).is_err());
    }

    #[test]
    fn test_load_reads_settings() {
        // --- Setup ---
        let root = test_root();
        let settings_file = root.join(".state").join("settings.json");

        let mut runtime = MockRuntime::new();
        runtime
            .expect_exists()
            .with(eq(settings_file.clone()))
            .returning(|_| true);
        runtime
            .expect_read_to_string()
            .with(eq(settings_file))
            .returning(|_| {
                Ok(r#"{"do_not_scan": ["/mnt/slow/**"], "system_feeds": ["/srv/feed"]}"#.into())
            });

        // --- Execute ---
        let config = Config::load(&runtime, Some(root.clone())).unwrap();

        // --- Verify ---
        assert_eq!(config.root, root);
        assert!(!config.system_wide);
        assert_eq!(config.settings.system_feeds, vec!["/srv/feed".to_string()]);
        let exclusions = config.exclusions();
        assert_eq!(exclusions.len(), 3);
        assert!(exclusions.contains(&"/mnt/slow/**".to_string()));
    }

    #[test]
    fn test_load_without_settings_file() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);

        let config = Config::load(&runtime, Some(test_root())).unwrap();
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.package_cache_dir(), test_root().join(".cache").join("packages"));
    }

    #[test]
    fn test_elevated() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| false);

        let mut config = Config::new(test_root());
        assert!(config.elevated(&runtime));
        config.system_wide = true;
        assert!(!config.elevated(&runtime));
    }
}
