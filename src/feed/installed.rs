use anyhow::Result;
use log::debug;

use super::Feed;
use crate::catalog::{Catalog, INSTALLED_FEED};
use crate::identity::{PackageId, matches_wildcard, wildcard};

/// Packages the format handler reports as installed. Rescanned on every
/// request since installs and removals change it within a session.
pub struct InstalledFeed;

impl Feed for InstalledFeed {
    fn location(&self) -> &str {
        INSTALLED_FEED
    }

    fn find_packages(&self, catalog: &Catalog, filter: &str) -> Result<Vec<PackageId>> {
        let filter = wildcard(filter);
        let mut ids = Vec::new();
        for path in catalog.format().installed_package_files()? {
            match catalog.get_or_build_from_file(&path) {
                Ok(id) if matches_wildcard(&filter, id.as_str()) => {
                    catalog.add_feed_location(&id, INSTALLED_FEED)?;
                    ids.push(id);
                }
                Ok(_) => {}
                Err(e) => debug!("Skipping installed file {}: {:#}", path.display(), e),
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{identity, metadata, test_catalog};
    use tempfile::tempdir;

    #[test]
    fn test_lists_only_installed_packages() {
        let dir = tempdir().unwrap();
        let (catalog, format) = test_catalog();
        for name in ["foo", "bar"] {
            let path = dir.path().join(format!("{}.tgz", name));
            std::fs::write(&path, "fake").unwrap();
            format.add_file(&path, metadata(name, "1.0"));
        }
        format.mark_installed(&identity("foo", "1.0"));

        let found = InstalledFeed.find_packages(&catalog, "*").unwrap();
        assert_eq!(found, vec![identity("foo", "1.0").id()]);

        format.mark_installed(&identity("bar", "1.0"));
        let found = InstalledFeed.find_packages(&catalog, "bar*").unwrap();
        assert_eq!(found, vec![identity("bar", "1.0").id()]);
    }
}
