use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::acquire::RemoteAcquirer;
use crate::manager::{CancelToken, PackageManager};
use crate::runtime::Runtime;

use super::install::print_progress;
use super::open_catalog;

/// Remove installed packages
#[tracing::instrument(skip(runtime, cancel))]
pub fn remove(
    runtime: Arc<dyn Runtime>,
    install_root: Option<PathBuf>,
    names: &[String],
    cancel: CancelToken,
) -> Result<()> {
    let catalog = open_catalog(runtime.clone(), install_root)?;
    let acquirer = Arc::new(RemoteAcquirer::new(runtime)?);
    let mut manager = PackageManager::new(catalog, acquirer).with_cancel_token(cancel);

    let mut progress = print_progress;
    for name in manager.remove(names, &mut progress)? {
        println!("Removed {}", name);
    }
    Ok(())
}
