use std::collections::HashMap;
use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::provider::{CapabilityProvider, Relation};
use crate::authz::types::{Action, ResourceType};

/// Closed set of actions per resource type.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    /// resource_type -> actions in registration order
    actions: HashMap<ResourceType, Vec<Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `actions` for `resource_type`. Either all actions are added or
    /// none are.
    pub fn register(
        &mut self,
        resource_type: &ResourceType,
        actions: impl IntoIterator<Item = Action>,
    ) -> Result<(), AuthzError> {
        let existing = self.actions.get(resource_type);
        let mut incoming: Vec<Action> = Vec::new();

        for action in actions {
            if action.resource_type != *resource_type {
                return Err(AuthzError::InvalidProvider {
                    resource_type: resource_type.to_string(),
                    message: format!("action `{action}` belongs to another resource type"),
                });
            }
            let taken = existing
                .map(|known| known.iter().any(|a| a.key == action.key))
                .unwrap_or(false)
                || incoming.iter().any(|a| a.key == action.key);
            if taken {
                return Err(AuthzError::DuplicateAction {
                    resource_type: resource_type.to_string(),
                    action: action.key,
                });
            }
            incoming.push(action);
        }

        self.actions
            .entry(resource_type.clone())
            .or_default()
            .extend(incoming);
        Ok(())
    }

    pub fn actions_for(&self, resource_type: &ResourceType) -> Result<&[Action], AuthzError> {
        self.actions
            .get(resource_type)
            .map(|v| v.as_slice())
            .ok_or_else(|| AuthzError::UnknownResourceType(resource_type.to_string()))
    }

    pub fn resolve_action(
        &self,
        resource_type: &ResourceType,
        key: &str,
    ) -> Result<&Action, AuthzError> {
        self.actions_for(resource_type)?
            .iter()
            .find(|a| a.key == key)
            .ok_or_else(|| AuthzError::UnknownAction {
                resource_type: resource_type.to_string(),
                action: key.to_string(),
            })
    }
}

/// Startup-phase collector for capability providers. Call [`build`] once all
/// resource types are registered.
///
/// [`build`]: RegistryBuilder::build
#[derive(Default)]
pub struct RegistryBuilder {
    actions: ActionRegistry,
    providers: HashMap<ResourceType, Arc<dyn CapabilityProvider>>,
    relations: HashMap<ResourceType, HashMap<String, Relation>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn CapabilityProvider>) -> Result<Self, AuthzError> {
        let resource_type = provider.resource_type();
        if self.providers.contains_key(&resource_type) {
            return Err(AuthzError::InvalidProvider {
                resource_type: resource_type.to_string(),
                message: "a provider is already registered for this resource type".into(),
            });
        }

        let actions = provider.available_actions();
        if actions.is_empty() {
            return Err(AuthzError::InvalidProvider {
                resource_type: resource_type.to_string(),
                message: "no actions declared".into(),
            });
        }
        self.actions.register(&resource_type, actions)?;

        let mut relations = HashMap::new();
        for relation in provider.relations() {
            if relations.contains_key(&relation.name) {
                return Err(AuthzError::InvalidProvider {
                    resource_type: resource_type.to_string(),
                    message: format!("relation `{}` declared twice", relation.name),
                });
            }
            relations.insert(relation.name.clone(), relation);
        }

        self.relations.insert(resource_type.clone(), relations);
        self.providers.insert(resource_type, provider);
        Ok(self)
    }

    /// Freeze the registrations. Every relation must point at a registered type.
    pub fn build(self) -> Result<Registry, AuthzError> {
        for relations in self.relations.values() {
            for relation in relations.values() {
                if !self.providers.contains_key(&relation.target) {
                    return Err(AuthzError::UnknownResourceType(relation.target.to_string()));
                }
            }
        }

        tracing::info!(
            resource_types = self.providers.len(),
            relations = self.relations.values().map(|r| r.len()).sum::<usize>(),
            "Built authorization registry"
        );

        Ok(Registry {
            actions: self.actions,
            providers: self.providers,
            relations: self.relations,
        })
    }
}

/// Immutable reference data shared by every resolution call: the action
/// registry plus a tagged map from resource type to its provider.
pub struct Registry {
    actions: ActionRegistry,
    providers: HashMap<ResourceType, Arc<dyn CapabilityProvider>>,
    relations: HashMap<ResourceType, HashMap<String, Relation>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn provider(
        &self,
        resource_type: &ResourceType,
    ) -> Result<&Arc<dyn CapabilityProvider>, AuthzError> {
        self.providers
            .get(resource_type)
            .ok_or_else(|| AuthzError::UnknownResourceType(resource_type.to_string()))
    }

    pub fn relation(
        &self,
        resource_type: &ResourceType,
        name: &str,
    ) -> Result<&Relation, AuthzError> {
        self.relations
            .get(resource_type)
            .ok_or_else(|| AuthzError::UnknownResourceType(resource_type.to_string()))?
            .get(name)
            .ok_or_else(|| AuthzError::unknown_relation(resource_type.as_str(), name))
    }

    pub fn contains(&self, resource_type: &ResourceType) -> bool {
        self.providers.contains_key(resource_type)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.providers.keys()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("actions", &self.actions)
            .field("relations", &self.relations)
            .finish_non_exhaustive()
    }
}
