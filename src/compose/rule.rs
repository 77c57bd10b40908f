//! Composition rules: declarative links from stable locations to
//! version-specific install content.

use serde::{Deserialize, Serialize};

use crate::package::{Role, RoleKind};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CompositionAction {
    SymlinkFolder,
    SymlinkFile,
    /// A launcher entry pointing at the target.
    Shortcut,
}

/// `location` is the link, `target` the real path; both may contain `${variables}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositionRule {
    pub action: CompositionAction,
    pub location: String,
    pub target: String,
}

impl CompositionRule {
    pub fn new(action: CompositionAction, location: &str, target: &str) -> Self {
        Self {
            action,
            location: location.to_string(),
            target: target.to_string(),
        }
    }
}

/// Rules implied by a package's roles.
pub fn implicit_rules(roles: &[Role]) -> Vec<CompositionRule> {
    let mut rules = Vec::new();
    for role in roles {
        let implied = match role.kind {
            RoleKind::Application => vec![CompositionRule::new(
                CompositionAction::SymlinkFolder,
                "${publishedpackagedir}",
                "${packagedir}",
            )],
            RoleKind::SharedLib => vec![CompositionRule::new(
                CompositionAction::SymlinkFolder,
                "${lib}/${arch}/${productname}",
                "${packagedir}/lib",
            )],
            RoleKind::DeveloperLib => vec![CompositionRule::new(
                CompositionAction::SymlinkFolder,
                "${include}/${productname}",
                "${packagedir}/include",
            )],
            RoleKind::SourceCode => Vec::new(),
        };
        for rule in implied {
            if !rules.contains(&rule) {
                rules.push(rule);
            }
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_deserialize() {
        let json = r#"{"action": "symlink-file", "location": "${bin}/zcat", "target": "${packagedir}/bin/zcat"}"#;
        let rule: CompositionRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.action, CompositionAction::SymlinkFile);
        assert_eq!(rule.location, "${bin}/zcat");
    }

    #[test]
    fn test_application_role_links_published_dir() {
        let rules = implicit_rules(&[Role::new(RoleKind::Application, "")]);
        assert_eq!(
            rules,
            vec![CompositionRule::new(
                CompositionAction::SymlinkFolder,
                "${publishedpackagedir}",
                "${packagedir}"
            )]
        );
    }

    #[test]
    fn test_roles_combine_without_duplicates() {
        let rules = implicit_rules(&[
            Role::new(RoleKind::SharedLib, ""),
            Role::new(RoleKind::SharedLib, "debug"),
            Role::new(RoleKind::DeveloperLib, ""),
            Role::new(RoleKind::SourceCode, ""),
        ]);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].location, "${lib}/${arch}/${productname}");
        assert_eq!(rules[1].location, "${include}/${productname}");
    }
}
