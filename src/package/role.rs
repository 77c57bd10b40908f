use serde::{Deserialize, Serialize};
use std::fmt;

/// What a package contributes to the system.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    SharedLib,
    DeveloperLib,
    SourceCode,
    Application,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleKind::SharedLib => "sharedlib",
            RoleKind::DeveloperLib => "developerlib",
            RoleKind::SourceCode => "sourcecode",
            RoleKind::Application => "application",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Role {
    #[serde(rename = "role")]
    pub kind: RoleKind,
    #[serde(default)]
    pub flavor: String,
}

impl Role {
    pub fn new(kind: RoleKind, flavor: &str) -> Self {
        Self {
            kind,
            flavor: flavor.to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flavor.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}[{}]", self.kind, self.flavor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_json() {
        let role: Role = serde_json::from_str(r#"{"role": "developerlib"}"#).unwrap();
        assert_eq!(role, Role::new(RoleKind::DeveloperLib, ""));

        let json = serde_json::to_string(&Role::new(RoleKind::Application, "gui")).unwrap();
        assert_eq!(json, r#"{"role":"application","flavor":"gui"}"#);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::new(RoleKind::SharedLib, "").to_string(), "sharedlib");
        assert_eq!(Role::new(RoleKind::SharedLib, "debug").to_string(), "sharedlib[debug]");
    }
}
