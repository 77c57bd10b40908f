use anyhow::Result;
use log::{debug, warn};
use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::Arc;

use crate::acquire::RemoteAcquirer;
use crate::catalog::ScanRequest;
use crate::identity::PackageName;
use crate::manager::PackageManager;
use crate::package::Package;
use crate::runtime::Runtime;

use super::open_catalog;

/// List known packages matching `filter`
#[tracing::instrument(skip(runtime))]
pub fn list(
    runtime: Arc<dyn Runtime>,
    install_root: Option<PathBuf>,
    filter: Option<&str>,
    installed_only: bool,
) -> Result<()> {
    let catalog = open_catalog(runtime.clone(), install_root)?;
    let filter = filter.unwrap_or("*");
    catalog.scan(&ScanRequest::Filter(filter.to_string()))?;

    let matcher = PackageName::parse(filter).filter();
    let mut packages: Vec<Package> = catalog
        .find(&matcher)
        .iter()
        .filter_map(|id| catalog.package(id))
        .filter(|p| !is_placeholder(p))
        .collect();
    packages.sort_by_key(|p| {
        (
            p.identity().name().to_ascii_lowercase(),
            Reverse(p.identity().version()),
        )
    });

    let acquirer = Arc::new(RemoteAcquirer::new(runtime)?);
    let manager = PackageManager::new(catalog.clone(), acquirer);

    let mut shown = 0;
    for package in &packages {
        let installed = catalog.is_installed(&package.id())?;
        if installed_only && !installed {
            continue;
        }
        let current = installed
            && manager.current_package(package.identity())? == Some(package.id());
        println!("{}", describe(package, installed, current));
        shown += 1;
    }

    if let Err(e) = catalog.save_cache() {
        warn!("Failed to save cache: {:#}", e);
    }
    debug!("Listed {} of {} package(s)", shown, packages.len());
    if shown == 0 {
        println!("No packages found.");
    }
    Ok(())
}

/// Dependencies nothing has been found for yet.
fn is_placeholder(package: &Package) -> bool {
    !package.has_local_copy()
        && package.remote_location.is_empty()
        && package.installed_state() != Some(true)
}

fn describe(package: &Package, installed: bool, current: bool) -> String {
    let mut line = package.identity().cosmetic_name().to_string();
    if installed {
        line.push_str(" [installed]");
    }
    if current {
        line.push_str(" [current]");
    }
    if let Some(description) = &package.description {
        line.push_str(&format!("  {}", description));
    }
    line
}
