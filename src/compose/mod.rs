//! Filesystem composition: the links that expose installed package content
//! at stable locations under the install root.
//!
//! Every link must live under the install root and every target under the
//! package's own directory. Links are never removed unless they still point
//! at the target this package gave them.

mod rule;
mod variables;

pub use rule::{CompositionAction, CompositionRule, implicit_rules};
pub use variables::Variables;

use anyhow::{Result, bail};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use crate::package::Package;
use crate::runtime::{Runtime, absolutize, is_path_under, normalize_path, relative_symlink_path};

/// Implicit role rules followed by the package's own rules.
pub fn package_rules(package: &Package) -> Vec<CompositionRule> {
    let mut rules = implicit_rules(&package.roles);
    for rule in &package.composition_rules {
        if !rules.contains(rule) {
            rules.push(rule.clone());
        }
    }
    rules
}

/// A rule with variables expanded and paths checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRule {
    pub action: CompositionAction,
    pub link: PathBuf,
    pub target: PathBuf,
}

/// State of a rule's link location.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkStatus {
    /// Nothing there yet.
    Missing,
    /// Points at this rule's target.
    Current,
    /// A link or shortcut pointing somewhere else.
    Other,
    /// A real file or directory.
    Occupied,
}

pub struct Composer<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    root: PathBuf,
}

impl<'a, R: Runtime + ?Sized> Composer<'a, R> {
    pub fn new(runtime: &'a R, root: &Path) -> Self {
        Self {
            runtime,
            root: normalize_path(root),
        }
    }

    pub fn resolve(
        &self,
        rule: &CompositionRule,
        vars: &Variables,
        package_dir: &Path,
    ) -> Result<ResolvedRule> {
        let link = absolutize(&self.root, Path::new(&vars.expand(&rule.location)?));
        let target = absolutize(package_dir, Path::new(&vars.expand(&rule.target)?));

        if !is_path_under(&link, &self.root) || link == self.root {
            bail!("Link {} is outside the install root", link.display());
        }
        if !is_path_under(&target, package_dir) {
            bail!(
                "Target {} is outside the package directory {}",
                target.display(),
                package_dir.display()
            );
        }
        if is_path_under(&link, package_dir) {
            bail!("Link {} is inside the package directory", link.display());
        }
        Ok(ResolvedRule {
            action: rule.action,
            link,
            target,
        })
    }

    pub fn status(&self, rule: &ResolvedRule) -> LinkStatus {
        match rule.action {
            CompositionAction::Shortcut => {
                if !self.runtime.exists(&rule.link) {
                    return LinkStatus::Missing;
                }
                match self.runtime.read_to_string(&rule.link) {
                    Ok(content) if is_shortcut(&content) => {
                        if shortcut_target(&content) == Some(rule.target.as_path()) {
                            LinkStatus::Current
                        } else {
                            LinkStatus::Other
                        }
                    }
                    _ => LinkStatus::Occupied,
                }
            }
            CompositionAction::SymlinkFile | CompositionAction::SymlinkFolder => {
                if self.runtime.is_symlink(&rule.link) {
                    match self.runtime.resolve_link(&rule.link) {
                        Ok(resolved) if normalize_path(&resolved) == rule.target => {
                            LinkStatus::Current
                        }
                        _ => LinkStatus::Other,
                    }
                } else if self.runtime.exists(&rule.link) {
                    LinkStatus::Occupied
                } else {
                    LinkStatus::Missing
                }
            }
        }
    }

    /// Creates the links for `rules`. Existing links are only replaced when
    /// `make_current` is set. Returns how many links were written.
    pub fn apply(
        &self,
        rules: &[CompositionRule],
        vars: &Variables,
        package_dir: &Path,
        make_current: bool,
    ) -> Result<usize> {
        let mut written = 0;
        for rule in rules {
            let resolved = match self.resolve(rule, vars, package_dir) {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Skipping composition rule {:?}: {:#}", rule, e);
                    continue;
                }
            };
            if !self.runtime.exists(&resolved.target) {
                debug!("Target {} does not exist, skipping", resolved.target.display());
                continue;
            }
            let expects_dir = resolved.action == CompositionAction::SymlinkFolder;
            if resolved.action != CompositionAction::Shortcut
                && self.runtime.is_dir(&resolved.target) != expects_dir
            {
                warn!(
                    "Target {} is not a {}",
                    resolved.target.display(),
                    if expects_dir { "directory" } else { "file" }
                );
                continue;
            }

            match self.status(&resolved) {
                LinkStatus::Current => continue,
                LinkStatus::Occupied => {
                    warn!(
                        "{} exists and is not managed by trellis, leaving it alone",
                        resolved.link.display()
                    );
                    continue;
                }
                LinkStatus::Other if !make_current => {
                    debug!("{} already points elsewhere", resolved.link.display());
                    continue;
                }
                LinkStatus::Other => self.remove_link(&resolved)?,
                LinkStatus::Missing => {}
            }
            self.create_link(&resolved)?;
            written += 1;
        }
        Ok(written)
    }

    /// Removes the links for `rules` that still point at their targets.
    /// Returns how many were removed.
    pub fn undo(
        &self,
        rules: &[CompositionRule],
        vars: &Variables,
        package_dir: &Path,
    ) -> Result<usize> {
        let mut removed = 0;
        for rule in rules {
            let Ok(resolved) = self.resolve(rule, vars, package_dir) else {
                continue;
            };
            if self.status(&resolved) == LinkStatus::Current {
                self.remove_link(&resolved)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn create_link(&self, rule: &ResolvedRule) -> Result<()> {
        if let Some(parent) = rule.link.parent()
            && !self.runtime.exists(parent)
        {
            self.runtime.create_dir_all(parent)?;
        }
        debug!("Linking {} -> {}", rule.link.display(), rule.target.display());
        match rule.action {
            CompositionAction::Shortcut => {
                let name = rule
                    .link
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                let content = format!(
                    "[Desktop Entry]\nType=Application\nName={}\nExec={}\n",
                    name,
                    rule.target.display()
                );
                self.runtime.write(&rule.link, content.as_bytes())
            }
            _ => match relative_symlink_path(&rule.link, &rule.target) {
                Some(relative) => self.runtime.symlink(&relative, &rule.link),
                None => self.runtime.symlink(&rule.target, &rule.link),
            },
        }
    }

    fn remove_link(&self, rule: &ResolvedRule) -> Result<()> {
        debug!("Removing {}", rule.link.display());
        match rule.action {
            CompositionAction::Shortcut => self.runtime.remove_file(&rule.link),
            _ => self.runtime.remove_symlink(&rule.link),
        }
    }
}

fn is_shortcut(content: &str) -> bool {
    content.lines().next().map(str::trim) == Some("[Desktop Entry]")
}

fn shortcut_target(content: &str) -> Option<&Path> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("Exec="))
        .map(|target| Path::new(target.trim()))
}
