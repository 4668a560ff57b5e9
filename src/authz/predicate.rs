//! Predicate renderer: turns a [`Plan`] into a store-native filter fragment.
//!
//! The store vocabulary is supplied by the caller through [`QueryBuilder`],
//! so this module knows nothing about any particular backend. See
//! [`crate::authz::memory`] and [`crate::authz::sql`] for adapters.

use crate::authz::compile::Plan;
use crate::authz::condition::Operator;
use crate::authz::errors::AuthzError;
use crate::authz::types::{Principal, Value};

/// Store vocabulary consumed by [`to_predicate`].
///
/// A builder is scoped to one resource type. [`traverse_relation`] returns a
/// builder scoped to the related type whose comparisons match a record when
/// at least one related record satisfies them.
///
/// Fragments must be two-valued: a comparison on a null or absent field is
/// false for every operator except [`Operator::NotEquals`], where it is true.
///
/// [`traverse_relation`]: QueryBuilder::traverse_relation
pub trait QueryBuilder: Sized {
    type Fragment;

    /// `value` is already coerced to the declared type; for
    /// [`Operator::In`] it is a non-empty `Value::List`.
    fn compare_field(
        &self,
        field: &str,
        operator: Operator,
        value: &Value,
    ) -> Result<Self::Fragment, AuthzError>;

    fn traverse_relation(&self, relation: &str) -> Result<Self, AuthzError>;

    fn and(&self, fragments: Vec<Self::Fragment>) -> Self::Fragment;

    fn or(&self, fragments: Vec<Self::Fragment>) -> Self::Fragment;

    fn not(&self, fragment: Self::Fragment) -> Self::Fragment;

    /// Matches every record.
    fn always(&self) -> Self::Fragment;
}

/// Render `plan` with principal references bound from `principal`.
pub fn to_predicate<B: QueryBuilder>(
    plan: &Plan,
    builder: &B,
    principal: &Principal,
) -> Result<B::Fragment, AuthzError> {
    match plan {
        Plan::Compare(cmp) => {
            let value = cmp.operand_value(principal)?;
            let Some((first, rest)) = cmp.path.relations.split_first() else {
                return builder.compare_field(&cmp.path.field, cmp.operator, &value);
            };
            let mut scoped = builder.traverse_relation(first)?;
            for relation in rest {
                scoped = scoped.traverse_relation(relation)?;
            }
            scoped.compare_field(&cmp.path.field, cmp.operator, &value)
        }
        Plan::And(parts) => {
            let fragments = parts
                .iter()
                .map(|p| to_predicate(p, builder, principal))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(builder.and(fragments))
        }
        Plan::Or(parts) => {
            let fragments = parts
                .iter()
                .map(|p| to_predicate(p, builder, principal))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(builder.or(fragments))
        }
        Plan::Not(inner) => Ok(builder.not(to_predicate(inner, builder, principal)?)),
    }
}
