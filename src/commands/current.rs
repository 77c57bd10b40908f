use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::acquire::RemoteAcquirer;
use crate::manager::PackageManager;
use crate::runtime::Runtime;

use super::open_catalog;

/// Make an installed version the current one of its product
#[tracing::instrument(skip(runtime))]
pub fn set_current(
    runtime: Arc<dyn Runtime>,
    install_root: Option<PathBuf>,
    name: &str,
) -> Result<()> {
    let catalog = open_catalog(runtime.clone(), install_root)?;
    let acquirer = Arc::new(RemoteAcquirer::new(runtime)?);
    let mut manager = PackageManager::new(catalog.clone(), acquirer);

    let id = manager.set_current(name)?;
    let package = catalog.require(&id)?;
    println!(
        "{} is now the current version of {}",
        package.identity().version(),
        package.identity().name()
    );
    Ok(())
}
