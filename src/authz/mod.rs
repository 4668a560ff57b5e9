//! Role- and attribute-based authorization engine.
//!
//! Resource types register a [`CapabilityProvider`] in a frozen [`Registry`].
//! Permissions are compiled once into a [`PermissionSet`] snapshot, and the
//! [`AuthorizationService`] answers two questions against it: may this
//! principal act on this instance ([`AuthorizationService::check`]), and which
//! records may it act on ([`AuthorizationService::compile_predicate`]). Both
//! answers come from the same compiled [`Plan`], rendered either by the
//! evaluator or through a store-specific [`QueryBuilder`].

pub mod compile;
pub mod condition;
pub mod context;
pub mod engine;
pub mod errors;
pub mod evaluate;
pub mod loader;
pub mod memory;
pub mod permission;
pub mod policy;
pub mod predicate;
pub mod provider;
pub mod registry;
pub mod sql;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use compile::Plan;
pub use condition::{parse_condition, Condition, Operand, Operator};
pub use context::ContextResolver;
pub use engine::{AuthorizationRequest, AuthorizationService, CompiledPredicate, Decision};
pub use errors::AuthzError;
pub use memory::{MemoryPredicate, MemoryQueryBuilder, RecordSource};
pub use permission::{Permission, PermissionDef, PermissionSet};
pub use predicate::QueryBuilder;
pub use provider::{CapabilityProvider, Related, RelatedContext, Relation, Resource};
pub use registry::{ActionRegistry, Registry, RegistryBuilder};
pub use types::{Action, Principal, Record, ResourceType, Value, ValueType};
