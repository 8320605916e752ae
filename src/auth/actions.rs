//! Access actions and the append-only registry of (action, resource) capabilities.

use crate::config::AccessRule;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an endpoint does to a resource. Open set: custom actions are allowed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccessAction {
    Create,
    View,
    Update,
    Delete,
    Custom(String),
}

impl AccessAction {
    pub fn as_str(&self) -> &str {
        match self {
            AccessAction::Create => "Create",
            AccessAction::View => "View",
            AccessAction::Update => "Update",
            AccessAction::Delete => "Delete",
            AccessAction::Custom(s) => s,
        }
    }
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for AccessAction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Create" => AccessAction::Create,
            "View" => AccessAction::View,
            "Update" => AccessAction::Update,
            "Delete" => AccessAction::Delete,
            _ => AccessAction::Custom(s),
        }
    }
}

impl From<AccessAction> for String {
    fn from(a: AccessAction) -> Self {
        a.as_str().to_string()
    }
}

/// One grantable capability.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAction {
    pub roles: Vec<String>,
    pub action: AccessAction,
    pub resource: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Every (action, resource) pair registered during router assembly, unique per pair.
///
/// Written only while routes are assembled; the assembled app shares it read-only.
#[derive(Clone, Debug)]
pub struct AuthActionRegistry {
    actions: Vec<AuthAction>,
}

impl AuthActionRegistry {
    pub fn new() -> Self {
        AuthActionRegistry {
            actions: vec![AuthAction {
                roles: Vec::new(),
                action: AccessAction::Custom("Manage".into()),
                resource: "all".into(),
                name: "Manage all resources".into(),
                description: Some("Unrestricted access to every resource".into()),
                error_message: None,
            }],
        }
    }

    /// Register a capability. Returns false (and changes nothing) when the pair already exists.
    pub fn add(&mut self, action: AccessAction, resource: &str, rule: Option<&AccessRule>) -> bool {
        if self.find(&action, resource).is_some() {
            return false;
        }
        let name = rule
            .and_then(|r| r.name.clone())
            .unwrap_or_else(|| format!("{} {}", action, resource));
        self.actions.push(AuthAction {
            roles: rule.map(|r| r.roles.clone()).unwrap_or_default(),
            action,
            resource: resource.to_string(),
            name,
            description: rule.and_then(|r| r.description.clone()),
            error_message: rule.and_then(|r| r.error_message.clone()),
        });
        true
    }

    pub fn find(&self, action: &AccessAction, resource: &str) -> Option<&AuthAction> {
        self.actions
            .iter()
            .find(|a| &a.action == action && a.resource == resource)
    }

    pub fn all(&self) -> &[AuthAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for AuthActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_per_pair() {
        let mut registry = AuthActionRegistry::new();
        let seeded = registry.len();
        assert!(registry.add(AccessAction::Create, "user", None));
        assert!(!registry.add(AccessAction::Create, "user", None));
        assert_eq!(registry.len(), seeded + 1);
        assert!(registry.add(AccessAction::View, "user", None));
        assert_eq!(registry.len(), seeded + 2);
    }

    #[test]
    fn rule_metadata_is_copied() {
        let mut registry = AuthActionRegistry::new();
        let rule = AccessRule {
            roles: vec!["admin".into()],
            name: Some("Remove users".into()),
            description: None,
            error_message: Some("admins only".into()),
        };
        registry.add(AccessAction::Delete, "user", Some(&rule));
        let entry = registry.find(&AccessAction::Delete, "user").unwrap();
        assert_eq!(entry.roles, vec!["admin"]);
        assert_eq!(entry.name, "Remove users");
        assert_eq!(entry.error_message.as_deref(), Some("admins only"));
    }

    #[test]
    fn custom_actions_round_trip_as_strings() {
        let a: AccessAction = serde_json::from_str("\"Publish\"").unwrap();
        assert_eq!(a, AccessAction::Custom("Publish".into()));
        assert_eq!(serde_json::to_string(&AccessAction::View).unwrap(), "\"View\"");
    }
}
