use anyhow::{Result, bail};
use std::path::PathBuf;
use std::sync::Arc;

use crate::recognizer::{Recognized, recognize};
use crate::runtime::Runtime;

use super::open_catalog;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedAction {
    Add(String),
    Remove(String),
    List,
}

/// Manage the system feeds scanned on every run
#[tracing::instrument(skip(runtime))]
pub fn feed(
    runtime: Arc<dyn Runtime>,
    install_root: Option<PathBuf>,
    action: FeedAction,
) -> Result<()> {
    let catalog = open_catalog(runtime.clone(), install_root)?;

    match action {
        FeedAction::Add(location) => {
            let Recognized::Feed(location) = recognize(runtime.as_ref(), &location) else {
                bail!("Not a feed location: {}", location);
            };
            if catalog.add_system_feed(&location) {
                catalog.save_cache()?;
                println!("Added feed {}", location);
            } else {
                println!("Feed {} is already registered", location);
            }
        }
        FeedAction::Remove(location) => {
            let location = match recognize(runtime.as_ref(), &location) {
                Recognized::Feed(resolved) => resolved,
                _ => location,
            };
            if !catalog.remove_system_feed(&location) {
                bail!("Feed is not registered: {}", location);
            }
            catalog.save_cache()?;
            println!("Removed feed {}", location);
        }
        FeedAction::List => {
            let feeds = catalog.system_feeds();
            if feeds.is_empty() {
                println!("No feeds registered.");
            }
            for location in feeds {
                println!("{}", location);
            }
        }
    }
    Ok(())
}
