use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::authz::compile::{compile, Plan};
use crate::authz::condition::Condition;
use crate::authz::errors::AuthzError;
use crate::authz::registry::Registry;
use crate::authz::types::{Action, Principal, ResourceType};

/// Uncompiled permission as written in a policy file or built in code.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionDef {
    pub role: String,
    pub resource_type: ResourceType,
    pub action: String,
    /// `None` grants unconditionally.
    pub condition: Option<Condition>,
}

impl PermissionDef {
    pub fn new(
        role: impl Into<String>,
        resource_type: impl Into<ResourceType>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            resource_type: resource_type.into(),
            action: action.into(),
            condition: None,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// A validated permission with its condition compiled for its resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct Permission {
    /// `role:type:action#n`, unique within the set it was loaded into.
    pub id: String,
    pub role: String,
    pub action: Action,
    pub condition: Option<Condition>,
    pub(crate) plan: Option<Plan>,
}

impl Permission {
    pub fn is_unconditional(&self) -> bool {
        self.plan.is_none()
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.condition {
            Some(condition) => write!(f, "{} when {condition}", self.id),
            None => write!(f, "{} (unconditional)", self.id),
        }
    }
}

type ByRole = HashMap<String, Vec<Arc<Permission>>>;

/// Permission snapshot grouped by (resource type, action, role).
///
/// Built once per role-assignment change by the caller and handed to the
/// engine on every call; the engine never keeps one.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    grouped: HashMap<ResourceType, HashMap<String, ByRole>>,
    len: usize,
}

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate and compile `defs` against `registry`. Any failing definition
    /// rejects the whole set.
    pub fn load(
        registry: &Registry,
        defs: impl IntoIterator<Item = PermissionDef>,
    ) -> Result<Self, AuthzError> {
        let mut set = Self::default();

        for def in defs {
            if def.role.trim().is_empty() {
                return Err(AuthzError::InvalidPermission(format!(
                    "permission on {}:{} has an empty role",
                    def.resource_type, def.action
                )));
            }
            let actions = registry.actions();
            actions.actions_for(&def.resource_type)?;
            let action = actions
                .resolve_action(&def.resource_type, &def.action)
                .map_err(|_| {
                    AuthzError::InvalidPermission(format!(
                        "role `{}` names action `{}` which `{}` does not support",
                        def.role, def.action, def.resource_type
                    ))
                })?
                .clone();

            let plan = def
                .condition
                .as_ref()
                .map(|c| compile(c, &def.resource_type, registry))
                .transpose()?;

            let by_role = set
                .grouped
                .entry(def.resource_type.clone())
                .or_default()
                .entry(action.key.clone())
                .or_default();
            let slot = by_role.entry(def.role.clone()).or_default();
            let id = format!("{}:{}#{}", def.role, action, slot.len());

            slot.push(Arc::new(Permission {
                id,
                role: def.role,
                action,
                condition: def.condition,
                plan,
            }));
            set.len += 1;
        }

        tracing::debug!(permissions = set.len, "Compiled permission set");
        Ok(set)
    }

    /// Permissions any of `principal`'s roles hold for (`resource_type`,
    /// `action`). Roles are visited in name order, permissions in load order.
    pub fn candidates(
        &self,
        principal: &Principal,
        resource_type: &ResourceType,
        action: &str,
    ) -> Vec<Arc<Permission>> {
        let Some(by_role) = self
            .grouped
            .get(resource_type)
            .and_then(|by_action| by_action.get(action))
        else {
            return Vec::new();
        };
        principal
            .roles
            .iter()
            .filter_map(|role| by_role.get(role))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Permission>> {
        self.grouped
            .values()
            .flat_map(|by_action| by_action.values())
            .flat_map(|by_role| by_role.values())
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::condition::parse_condition;
    use crate::authz::testing::fixture_registry;

    fn cond(src: &str) -> Condition {
        parse_condition(src).unwrap()
    }

    #[test]
    fn test_load_groups_by_role_type_action() {
        let registry = fixture_registry();
        let set = PermissionSet::load(
            &registry,
            vec![
                PermissionDef::new("user", "note", "view")
                    .when(cond("caseAssignee == principal.id")),
                PermissionDef::new("user", "note", "view").when(cond("shared == true")),
                PermissionDef::new("admin", "note", "view"),
                PermissionDef::new("admin", "note", "delete"),
            ],
        )
        .unwrap();
        assert_eq!(set.len(), 4);

        let note = ResourceType::new("note");
        let user = Principal::new("alice").with_role("user");
        let ids: Vec<String> = set
            .candidates(&user, &note, "view")
            .iter()
            .map(|p| p.id.clone())
            .collect();
        assert_eq!(ids, vec!["user:note:view#0", "user:note:view#1"]);

        let both = Principal::new("alice").with_role("user").with_role("admin");
        let found = set.candidates(&both, &note, "view");
        assert_eq!(found.len(), 3);
        assert!(found[0].is_unconditional());

        assert!(set.candidates(&user, &note, "delete").is_empty());
        assert!(set.candidates(&Principal::new("eve"), &note, "view").is_empty());
    }

    #[test]
    fn test_unknown_action_rejects_whole_set() {
        let registry = fixture_registry();
        let err = PermissionSet::load(
            &registry,
            vec![
                PermissionDef::new("user", "note", "view"),
                PermissionDef::new("user", "note", "archive"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidPermission(_)));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let registry = fixture_registry();
        let defs = vec![PermissionDef::new("user", "invoice", "view")];
        let err = PermissionSet::load(&registry, defs).unwrap_err();
        assert!(matches!(err, AuthzError::UnknownResourceType(ref t) if t == "invoice"));
    }

    #[test]
    fn test_condition_errors_surface_at_load() {
        let registry = fixture_registry();
        let err = PermissionSet::load(
            &registry,
            vec![PermissionDef::new("user", "task", "view").when(cond(r#"status > "OPEN""#))],
        )
        .unwrap_err();
        assert!(matches!(err, AuthzError::UnsupportedOperator { .. }));

        let err = PermissionSet::load(
            &registry,
            vec![PermissionDef::new("user", "task", "view").when(cond(r#"owner.name == "x""#))],
        )
        .unwrap_err();
        assert!(matches!(err, AuthzError::UnknownRelation { .. }));
    }

    #[test]
    fn test_empty_role_rejected() {
        let registry = fixture_registry();
        let defs = vec![PermissionDef::new(" ", "note", "view")];
        let err = PermissionSet::load(&registry, defs).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidPermission(_)));
    }

    #[test]
    fn test_display() {
        let registry = fixture_registry();
        let set = PermissionSet::load(
            &registry,
            vec![
                PermissionDef::new("user", "note", "view").when(cond(r#"shared == true"#)),
                PermissionDef::new("admin", "note", "view"),
            ],
        )
        .unwrap();
        let mut shown: Vec<String> = set.iter().map(|p| p.to_string()).collect();
        shown.sort();
        assert_eq!(
            shown,
            vec![
                "admin:note:view#0 (unconditional)".to_string(),
                "user:note:view#0 when shared == true".to_string(),
            ]
        );
    }
}
