//! Capability interfaces implemented by domain resource types.
//!
//! The engine never sees concrete resource structs. Each resource type
//! registers a [`CapabilityProvider`] that lists the actions it supports and
//! knows how to reach related instances by relation name; instances are read
//! through the [`Resource`] field accessor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::types::{Action, ResourceType, Value};

/// Read access to the attributes of one resource instance.
pub trait Resource: Send + Sync {
    /// Returns `None` when the field is absent; absent fields compare as null.
    fn field(&self, name: &str) -> Option<Value>;
}

/// A named, typed edge from one resource type to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub target: ResourceType,
}

impl Relation {
    pub fn new(name: impl Into<String>, target: impl Into<ResourceType>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
        }
    }
}

/// Instances reached through a relation.
#[derive(Clone)]
pub enum Related {
    Missing,
    One(Arc<dyn Resource>),
    Many(Vec<Arc<dyn Resource>>),
}

impl Related {
    pub fn into_vec(self) -> Vec<Arc<dyn Resource>> {
        match self {
            Related::Missing => Vec::new(),
            Related::One(r) => vec![r],
            Related::Many(rs) => rs,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::Missing => 0,
            Related::One(_) => 1,
            Related::Many(rs) => rs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Related {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Related::Missing => f.write_str("Related::Missing"),
            Related::One(_) => f.write_str("Related::One(..)"),
            Related::Many(rs) => write!(f, "Related::Many(len={})", rs.len()),
        }
    }
}

/// Per-resource-type declaration of supported actions and relation lookup.
pub trait CapabilityProvider: Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Fixed, non-empty action set. Order is for display only.
    fn available_actions(&self) -> Vec<Action>;

    /// Relations this type can resolve. Conditions may only traverse these.
    fn relations(&self) -> Vec<Relation> {
        Vec::new()
    }

    /// Resolve a named relation for `instance`. Must be side-effect free.
    fn related_resource(
        &self,
        instance: &dyn Resource,
        relation: &str,
    ) -> Result<Related, AuthzError> {
        let _ = instance;
        Err(AuthzError::unknown_relation(
            self.resource_type().as_str(),
            relation,
        ))
    }
}

/// Related instances the caller already holds, keyed by relation name on the
/// target instance. Consulted before the provider is asked.
#[derive(Debug, Clone, Default)]
pub struct RelatedContext {
    entries: HashMap<String, Related>,
}

impl RelatedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, relation: impl Into<String>, related: Related) -> Self {
        self.entries.insert(relation.into(), related);
        self
    }

    pub fn get(&self, relation: &str) -> Option<&Related> {
        self.entries.get(relation)
    }
}
