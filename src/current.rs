//! Persisted "current version" markers, one JSON file per product under
//! `.state/products/<generalName>.json`.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::identity::Version;
use crate::runtime::Runtime;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct Marker {
    current_version: Version,
}

pub struct CurrentMarkers<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    dir: PathBuf,
}

impl<'a, R: Runtime + ?Sized> CurrentMarkers<'a, R> {
    pub fn new(runtime: &'a R, dir: &Path) -> Self {
        Self {
            runtime,
            dir: dir.to_path_buf(),
        }
    }

    fn path(&self, general_name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", general_name))
    }

    /// The recorded version, or `None` if there is no readable marker.
    pub fn get(&self, general_name: &str) -> Result<Option<Version>> {
        let path = self.path(general_name);
        if !self.runtime.exists(&path) {
            return Ok(None);
        }
        let content = self.runtime.read_to_string(&path)?;
        match serde_json::from_str::<Marker>(&content) {
            Ok(marker) => Ok(Some(marker.current_version)),
            Err(e) => {
                warn!("Ignoring unreadable marker {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn set(&self, general_name: &str, version: Version) -> Result<()> {
        let path = self.path(general_name);
        debug!("Marking {} current for {}", version, general_name);
        self.runtime.create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(&Marker {
            current_version: version,
        })?;
        self.runtime
            .write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write marker {}", path.display()))
    }

    pub fn clear(&self, general_name: &str) -> Result<()> {
        let path = self.path(general_name);
        if self.runtime.exists(&path) {
            self.runtime.remove_file(&path)?;
        }
        Ok(())
    }
}
