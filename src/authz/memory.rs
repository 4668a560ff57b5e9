//! In-process predicate adapter.
//!
//! [`MemoryQueryBuilder`] renders a plan into a [`MemoryPredicate`] tree that
//! can be applied to loaded records. Relation hops are followed through a
//! [`RecordSource`], which for most callers is the [`Registry`] itself.

use std::fmt;
use std::sync::Arc;

use crate::authz::condition::Operator;
use crate::authz::context::ContextResolver;
use crate::authz::errors::AuthzError;
use crate::authz::evaluate::compare_values;
use crate::authz::predicate::QueryBuilder;
use crate::authz::provider::Resource;
use crate::authz::registry::Registry;
use crate::authz::types::{ResourceType, Value};

/// Follows a relation from one record to the records it reaches.
pub trait RecordSource {
    fn join(
        &self,
        resource_type: &ResourceType,
        record: &dyn Resource,
        relation: &str,
    ) -> Result<Vec<Arc<dyn Resource>>, AuthzError>;
}

impl RecordSource for Registry {
    fn join(
        &self,
        resource_type: &ResourceType,
        record: &dyn Resource,
        relation: &str,
    ) -> Result<Vec<Arc<dyn Resource>>, AuthzError> {
        let (_, related) = ContextResolver::new(self).related(resource_type, record, relation)?;
        Ok(related.into_vec())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryPredicate {
    Always,
    Compare {
        field: String,
        operator: Operator,
        value: Value,
    },
    /// Holds when at least one record reached over `relation` satisfies `inner`.
    Traverse {
        from: ResourceType,
        relation: String,
        inner: Box<MemoryPredicate>,
    },
    And(Vec<MemoryPredicate>),
    Or(Vec<MemoryPredicate>),
    Not(Box<MemoryPredicate>),
}

impl MemoryPredicate {
    pub fn matches(
        &self,
        source: &dyn RecordSource,
        record: &dyn Resource,
    ) -> Result<bool, AuthzError> {
        match self {
            MemoryPredicate::Always => Ok(true),
            MemoryPredicate::Compare {
                field,
                operator,
                value,
            } => compare_values(field, record.field(field), *operator, value),
            MemoryPredicate::Traverse {
                from,
                relation,
                inner,
            } => {
                for related in source.join(from, record, relation)? {
                    if inner.matches(source, related.as_ref())? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            MemoryPredicate::And(parts) => {
                for part in parts {
                    if !part.matches(source, record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            MemoryPredicate::Or(parts) => {
                for part in parts {
                    if part.matches(source, record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            MemoryPredicate::Not(inner) => Ok(!inner.matches(source, record)?),
        }
    }
}

impl fmt::Display for MemoryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryPredicate::Always => f.write_str("true"),
            MemoryPredicate::Compare {
                field,
                operator,
                value,
            } => write!(f, "{field} {operator} {value}"),
            MemoryPredicate::Traverse { relation, inner, .. } => write!(f, "{relation}{{{inner}}}"),
            MemoryPredicate::And(parts) => joined(f, parts, "&&", "true"),
            MemoryPredicate::Or(parts) => joined(f, parts, "||", "false"),
            MemoryPredicate::Not(inner) => write!(f, "!{inner}"),
        }
    }
}

fn joined(
    f: &mut fmt::Formatter<'_>,
    parts: &[MemoryPredicate],
    sep: &str,
    empty: &str,
) -> fmt::Result {
    if parts.is_empty() {
        return f.write_str(empty);
    }
    f.write_str("(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, " {sep} ")?;
        }
        write!(f, "{part}")?;
    }
    f.write_str(")")
}

/// Builder scoped to `resource_type`, reached from the root through `hops`.
#[derive(Debug, Clone)]
pub struct MemoryQueryBuilder<'a> {
    registry: &'a Registry,
    resource_type: ResourceType,
    /// (type the hop starts from, relation name), outermost first
    hops: Vec<(ResourceType, String)>,
}

impl<'a> MemoryQueryBuilder<'a> {
    pub fn new(registry: &'a Registry, resource_type: impl Into<ResourceType>) -> Self {
        Self {
            registry,
            resource_type: resource_type.into(),
            hops: Vec::new(),
        }
    }
}

impl QueryBuilder for MemoryQueryBuilder<'_> {
    type Fragment = MemoryPredicate;

    fn compare_field(
        &self,
        field: &str,
        operator: Operator,
        value: &Value,
    ) -> Result<MemoryPredicate, AuthzError> {
        let leaf = MemoryPredicate::Compare {
            field: field.to_string(),
            operator,
            value: value.clone(),
        };
        Ok(self
            .hops
            .iter()
            .rev()
            .fold(leaf, |inner, (from, relation)| MemoryPredicate::Traverse {
                from: from.clone(),
                relation: relation.clone(),
                inner: Box::new(inner),
            }))
    }

    fn traverse_relation(&self, relation: &str) -> Result<Self, AuthzError> {
        let target = self.registry.relation(&self.resource_type, relation)?.target.clone();
        let mut hops = self.hops.clone();
        hops.push((self.resource_type.clone(), relation.to_string()));
        Ok(Self {
            registry: self.registry,
            resource_type: target,
            hops,
        })
    }

    fn and(&self, fragments: Vec<MemoryPredicate>) -> MemoryPredicate {
        MemoryPredicate::And(fragments)
    }

    fn or(&self, fragments: Vec<MemoryPredicate>) -> MemoryPredicate {
        MemoryPredicate::Or(fragments)
    }

    fn not(&self, fragment: MemoryPredicate) -> MemoryPredicate {
        MemoryPredicate::Not(Box::new(fragment))
    }

    fn always(&self) -> MemoryPredicate {
        MemoryPredicate::Always
    }
}

/// Keep the records `predicate` matches, preserving order.
pub fn filter<R: Resource>(
    predicate: &MemoryPredicate,
    source: &dyn RecordSource,
    records: &[Arc<R>],
) -> Result<Vec<Arc<R>>, AuthzError> {
    let mut kept = Vec::new();
    for record in records {
        if predicate.matches(source, &**record)? {
            kept.push(record.clone());
        }
    }
    Ok(kept)
}
