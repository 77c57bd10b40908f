use anyhow::Result;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::acquire::RemoteAcquirer;
use crate::error::{PackageError, package_error};
use crate::feed::recursive_location;
use crate::manager::{CancelToken, InstallReport, PackageManager, ProgressEvent};
use crate::runtime::{Runtime, absolutize};

use super::open_catalog;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallOptions {
    /// Package names, package files or feed locations.
    pub names: Vec<String>,
    /// Only report what would be acquired and installed.
    pub pretend: bool,
    /// Globs of packages to install exactly as named.
    pub as_specified: Vec<String>,
    /// Globs of packages that may be upgraded to newer versions.
    pub upgrade: Vec<String>,
    /// Directories scanned with all their subdirectories for this run.
    pub recursive_scan: Vec<String>,
    /// Globs of locations not to scan during this run.
    pub no_scan: Vec<String>,
}

/// Install packages and their dependencies.
#[tracing::instrument(skip(runtime, cancel))]
pub async fn install(
    runtime: Arc<dyn Runtime>,
    install_root: Option<PathBuf>,
    options: InstallOptions,
    cancel: CancelToken,
) -> Result<()> {
    let catalog = open_catalog(runtime.clone(), install_root)?;
    catalog.exclude_from_scan(&options.no_scan);
    let cwd = runtime.current_dir()?;
    for directory in &options.recursive_scan {
        let directory = absolutize(&cwd, Path::new(directory));
        catalog.add_session_feed(&recursive_location(&directory.to_string_lossy()));
    }
    let acquirer = Arc::new(RemoteAcquirer::new(runtime)?);
    let mut manager = PackageManager::new(catalog.clone(), acquirer)
        .with_dry_run(options.pretend)
        .with_cancel_token(cancel)
        .with_as_specified(&options.as_specified)
        .with_upgradable(&options.upgrade);

    let mut progress = print_progress;
    let result = manager.install(&options.names, &mut progress).await;

    if let Err(e) = catalog.save_cache() {
        warn!("Failed to save cache: {:#}", e);
    }

    match result {
        Ok(report) => {
            print_report(&report, options.pretend);
            Ok(())
        }
        Err(e) => {
            for line in explain(&e) {
                eprintln!("{}", line);
            }
            Err(e)
        }
    }
}

/// Prints lifecycle events, leaving out intermediate percentages.
pub(crate) fn print_progress(event: ProgressEvent) {
    match &event {
        ProgressEvent::Installing { percent, .. } | ProgressEvent::Removing { percent, .. }
            if *percent != 0 =>
        {
            debug!("{}", event)
        }
        ProgressEvent::FailedInstall { .. } => eprintln!("{}", event),
        _ => println!("{}", event),
    }
}

fn print_report(report: &InstallReport, pretend: bool) {
    if report.cancelled {
        println!("Install cancelled.");
        return;
    }
    if pretend {
        if report.would_acquire.is_empty() && report.would_install.is_empty() {
            println!("Nothing to do.");
            return;
        }
        for name in &report.would_acquire {
            println!("  [GET] {}", name);
        }
        for name in &report.would_install {
            println!("  [ADD] {}", name);
        }
        return;
    }
    if report.installed.is_empty() {
        println!("Everything requested is already installed.");
    }
    for name in &report.installed {
        println!("Installed {}", name);
    }
}

/// Extra lines describing why an install could not proceed.
fn explain(err: &anyhow::Error) -> Vec<String> {
    match package_error(err) {
        Some(PackageError::PotentialUpgrades {
            package,
            candidates,
        }) => {
            let mut lines = vec![format!("Newer versions can replace {}:", package)];
            for (i, candidate) in candidates.iter().enumerate() {
                if i == 0 {
                    lines.push(format!("  {} [Latest]", candidate));
                } else {
                    lines.push(format!("  {}", candidate));
                }
            }
            lines.push(
                "Use --upgrade[=<pattern>] to accept them, or --as-specified[=<pattern>] to keep the requested version."
                    .to_string(),
            );
            lines
        }
        Some(PackageError::PackageNotSatisfied { unsatisfied, .. }) if !unsatisfied.is_empty() => {
            let mut lines = vec!["Unsatisfied dependencies:".to_string()];
            for (depth, name) in unsatisfied.iter().enumerate() {
                lines.push(format!("{}{}", "  ".repeat(depth + 1), name));
            }
            lines
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{runtime, write_package};
    use crate::test_utils::TOKEN;
    use tempfile::tempdir;

    fn options(names: &[&str]) -> InstallOptions {
        InstallOptions {
            names: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_install_from_directory_feed() {
        let root = tempdir().unwrap();
        let feed = tempdir().unwrap();
        write_package(feed.path(), "zlib", "1.2.8", &[]);
        write_package(feed.path(), "curl", "7.0", &["zlib-1.2.8"]);
        let feed_location = feed.path().to_string_lossy().to_string();

        install(
            runtime(),
            Some(root.path().to_path_buf()),
            options(&[&feed_location, "curl"]),
            CancelToken::new(),
        )
        .await
        .unwrap();

        let apps = root.path().join("apps");
        assert!(apps.join("curl-7.0.0.0-x64/bin/curl").exists());
        assert!(apps.join("zlib-1.2.8.0-x64/bin/zlib").exists());
        let link = root.path().join("bin/curl");
        assert!(link.is_symlink());
        assert_eq!(
            std::fs::canonicalize(&link).unwrap(),
            std::fs::canonicalize(apps.join("curl-7.0.0.0-x64/bin/curl")).unwrap()
        );

        let marker = root
            .path()
            .join(".state/products")
            .join(format!("curl-{}.json", TOKEN));
        let content = std::fs::read_to_string(marker).unwrap();
        assert!(content.contains("7.0.0.0"));
        assert!(root.path().join(".state/cache.json").exists());
    }

    #[tokio::test]
    async fn test_pretend_installs_nothing() {
        let root = tempdir().unwrap();
        let feed = tempdir().unwrap();
        write_package(feed.path(), "zlib", "1.2.8", &[]);
        let feed_location = feed.path().to_string_lossy().to_string();

        let mut opts = options(&[&feed_location, "zlib"]);
        opts.pretend = true;
        install(
            runtime(),
            Some(root.path().to_path_buf()),
            opts,
            CancelToken::new(),
        )
        .await
        .unwrap();

        assert!(!root.path().join("apps").exists());
        assert!(!root.path().join("bin/zlib").exists());
    }

    #[tokio::test]
    async fn test_install_unknown_package_fails() {
        let root = tempdir().unwrap();
        let err = install(
            runtime(),
            Some(root.path().to_path_buf()),
            options(&["nosuchthing"]),
            CancelToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(
            package_error(&err),
            Some(&PackageError::PackageNotFound("nosuchthing".into()))
        );
    }

    #[tokio::test]
    async fn test_cancelled_install_does_nothing() {
        let root = tempdir().unwrap();
        let feed = tempdir().unwrap();
        write_package(feed.path(), "zlib", "1.2.8", &[]);
        let feed_location = feed.path().to_string_lossy().to_string();
        let cancel = CancelToken::new();
        cancel.cancel();

        install(
            runtime(),
            Some(root.path().to_path_buf()),
            options(&[&feed_location, "zlib"]),
            cancel,
        )
        .await
        .unwrap();
        assert!(!root.path().join("apps").exists());
    }

    #[tokio::test]
    async fn test_recursive_scan_finds_nested_packages() {
        let root = tempdir().unwrap();
        let feed = tempdir().unwrap();
        let nested = feed.path().join("vendor/compression");
        std::fs::create_dir_all(&nested).unwrap();
        write_package(&nested, "zlib", "1.2.8", &[]);

        let mut opts = options(&["zlib"]);
        opts.recursive_scan = vec![feed.path().to_string_lossy().to_string()];
        install(
            runtime(),
            Some(root.path().to_path_buf()),
            opts,
            CancelToken::new(),
        )
        .await
        .unwrap();

        assert!(root.path().join("apps/zlib-1.2.8.0-x64/bin/zlib").exists());
    }

    #[tokio::test]
    async fn test_no_scan_skips_matching_feeds() {
        let root = tempdir().unwrap();
        let feed = tempdir().unwrap();
        write_package(feed.path(), "zlib", "1.2.8", &[]);
        let feed_location = feed.path().to_string_lossy().to_string();

        let mut opts = options(&[&feed_location, "zlib"]);
        opts.no_scan = vec![feed_location.clone()];
        let err = install(
            runtime(),
            Some(root.path().to_path_buf()),
            opts,
            CancelToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(
            package_error(&err),
            Some(&PackageError::PackageNotFound("zlib".into()))
        );
        assert!(!root.path().join("apps").exists());
    }

    #[test]
    fn test_explain_marks_latest_candidate() {
        let err: anyhow::Error = PackageError::PotentialUpgrades {
            package: "foo-1.0.0.0-x64".into(),
            candidates: vec!["foo-3.0.0.0-x64".into(), "foo-2.0.0.0-x64".into()],
        }
        .into();
        let lines = explain(&err);
        assert_eq!(lines[1], "  foo-3.0.0.0-x64 [Latest]");
        assert_eq!(lines[2], "  foo-2.0.0.0-x64");
        assert!(lines[3].contains("--upgrade"));
    }

    #[test]
    fn test_explain_indents_unsatisfied_chain() {
        let err: anyhow::Error = PackageError::PackageNotSatisfied {
            package: "app".into(),
            unsatisfied: vec!["app".into(), "lib".into()],
        }
        .into();
        assert_eq!(
            explain(&err),
            vec!["Unsatisfied dependencies:", "  app", "    lib"]
        );
    }

    #[test]
    fn test_explain_other_errors_add_nothing() {
        let err = anyhow::anyhow!("disk full");
        assert!(explain(&err).is_empty());
    }
}
