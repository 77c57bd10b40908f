use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::runtime::Runtime;

use super::open_catalog;

/// Forget every file remembered as not being a package
#[tracing::instrument(skip(runtime))]
pub fn flush_cache(runtime: Arc<dyn Runtime>, install_root: Option<PathBuf>) -> Result<()> {
    let catalog = open_catalog(runtime, install_root)?;
    catalog.flush_cache()?;
    println!("Cache flushed.");
    Ok(())
}
