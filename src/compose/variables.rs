//! `${name}` substitution for composition rules.

use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Config;
use crate::package::Package;

const MAX_DEPTH: usize = 16;

/// Variable table. Names are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl Variables {
    /// The standard table for one package installed into `package_dir`.
    pub fn for_package(config: &Config, package: &Package, package_dir: &Path) -> Self {
        let identity = package.identity();
        let mut vars = Self::default();
        vars.set("root", display(&config.root));
        vars.set("apps", display(&config.apps_dir()));
        vars.set("bin", display(&config.bin_dir()));
        vars.set("lib", display(&config.lib_dir()));
        vars.set("include", display(&config.include_dir()));
        vars.set("etc", display(&config.etc_dir()));
        vars.set("cache", display(&config.cache_dir()));
        vars.set("packagedir", display(package_dir));
        vars.set("publishedpackagedir", "${apps}/${productname}");
        vars.set("productname", identity.name());
        vars.set("version", identity.version().to_string());
        vars.set("arch", identity.architecture().as_str());
        vars.set("publickeytoken", identity.public_key_token());
        vars.set("canonicalname", identity.canonical_name());
        vars.set("cosmeticname", identity.cosmetic_name());
        vars.set("publisher", package.publisher.clone().unwrap_or_default());
        vars
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Expands every `${name}`, including references inside values.
    /// Unknown names and unterminated references are errors.
    pub fn expand(&self, text: &str) -> Result<String> {
        self.expand_at(text, 0)
    }

    fn expand_at(&self, text: &str, depth: usize) -> Result<String> {
        if depth > MAX_DEPTH {
            bail!("Variable expansion is too deep in '{}'", text);
        }
        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                bail!("Unterminated variable reference in '{}'", text);
            };
            let name = &after[..end];
            let Some(value) = self.get(name) else {
                bail!("Unknown variable '{}' in '{}'", name, text);
            };
            result.push_str(&self.expand_at(value, depth + 1)?);
            rest = &after[end + 1..];
        }
        result.push_str(rest);
        Ok(result)
    }
}
