//! Handlers behind the `trellis` subcommands. Each one opens the catalog
//! for the selected root, runs one engine operation and prints the outcome.

use anyhow::Result;
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::format::ArchiveFormat;
use crate::runtime::Runtime;

mod cache;
mod current;
mod feed;
mod install;
mod list;
mod remove;

pub use cache::flush_cache;
pub use current::set_current;
pub use feed::{FeedAction, feed};
pub use install::{InstallOptions, install};
pub use list::list;
pub use remove::remove;

/// Loads settings for `root` and opens a catalog over the archive format
/// with the persisted cache applied.
#[tracing::instrument(skip(runtime))]
pub(crate) fn open_catalog(
    runtime: Arc<dyn Runtime>,
    root: Option<PathBuf>,
) -> Result<Arc<Catalog>> {
    let config = Config::load(runtime.as_ref(), root)?;
    debug!("Opening catalog at {}", config.root.display());
    let format = Arc::new(ArchiveFormat::new(runtime.clone(), config.clone()));
    let catalog = Arc::new(Catalog::new(runtime, format, config));
    catalog.load_cache()?;
    Ok(catalog)
}
