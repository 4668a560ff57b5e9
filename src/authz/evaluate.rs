//! Evaluator renderer: decides a [`Plan`] against one in-memory instance.

use std::cmp::Ordering;

use crate::authz::compile::{Comparison, Plan};
use crate::authz::condition::Operator;
use crate::authz::context::ContextResolver;
use crate::authz::errors::AuthzError;
use crate::authz::provider::{RelatedContext, Resource};
use crate::authz::types::{Principal, ResourceType, Value, ValueType};

/// Everything the evaluator needs besides the plan and the instance.
pub struct EvalScope<'a> {
    pub resolver: &'a ContextResolver<'a>,
    pub resource_type: &'a ResourceType,
    pub principal: &'a Principal,
    pub related: Option<&'a RelatedContext>,
}

/// Evaluate `plan` against `instance`. AND/OR short-circuit; relations are
/// resolved lazily, only for comparisons that are actually reached.
pub fn evaluate(
    plan: &Plan,
    instance: &dyn Resource,
    scope: &EvalScope<'_>,
) -> Result<bool, AuthzError> {
    match plan {
        Plan::Compare(cmp) => evaluate_comparison(cmp, instance, scope),
        Plan::And(parts) => {
            for part in parts {
                if !evaluate(part, instance, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Plan::Or(parts) => {
            for part in parts {
                if evaluate(part, instance, scope)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Plan::Not(inner) => Ok(!evaluate(inner, instance, scope)?),
    }
}

fn evaluate_comparison(
    cmp: &Comparison,
    instance: &dyn Resource,
    scope: &EvalScope<'_>,
) -> Result<bool, AuthzError> {
    let expected = cmp.operand_value(scope.principal)?;

    if cmp.path.relations.is_empty() {
        let actual = instance.field(&cmp.path.field);
        return compare_values(&cmp.path.field, actual, cmp.operator, &expected);
    }

    // A relation comparison holds when any reached instance satisfies it.
    let targets = scope.resolver.resolve_path(
        scope.resource_type,
        instance,
        &cmp.path.relations,
        scope.related,
    )?;
    for target in targets {
        if compare_values(
            &cmp.path.field,
            target.field(&cmp.path.field),
            cmp.operator,
            &expected,
        )? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Compare a field value against an already-coerced operand.
///
/// Null (or absent) fields satisfy only `!=`. Non-null field values are
/// coerced to the operand's type; failure is a [`AuthzError::FieldType`].
pub fn compare_values(
    field: &str,
    actual: Option<Value>,
    operator: Operator,
    expected: &Value,
) -> Result<bool, AuthzError> {
    let actual = actual.unwrap_or(Value::Null);
    if actual.is_null() {
        return Ok(operator == Operator::NotEquals);
    }
    let Some(declared) = declared_type(expected) else {
        return Ok(false);
    };

    match operator {
        Operator::Equals => Ok(coerce_field(field, &actual, declared)? == *expected),
        Operator::NotEquals => Ok(coerce_field(field, &actual, declared)? != *expected),
        Operator::In => {
            let actual = coerce_field(field, &actual, declared)?;
            match expected {
                Value::List(items) => Ok(items.contains(&actual)),
                other => Ok(*other == actual),
            }
        }
        Operator::GreaterThan | Operator::LessThan => {
            let actual = coerce_field(field, &actual, declared)?;
            let wanted = if operator == Operator::GreaterThan {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            Ok(order(&actual, expected) == Some(wanted))
        }
        Operator::Contains => match (&actual, expected) {
            (Value::String(haystack), Value::String(needle)) => {
                Ok(haystack.contains(needle.as_str()))
            }
            (Value::List(items), _) => {
                for item in items {
                    if item.is_null() {
                        continue;
                    }
                    if coerce_field(field, item, declared)? == *expected {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(AuthzError::FieldType {
                field: field.to_string(),
                expected: "string or list".into(),
                found: actual.kind().into(),
            }),
        },
    }
}

/// The declared type travels with the coerced operand; lists carry it in
/// their (non-empty, homogeneous) elements.
pub(crate) fn declared_type(expected: &Value) -> Option<ValueType> {
    match expected {
        Value::String(_) => Some(ValueType::String),
        Value::Number(_) => Some(ValueType::Number),
        Value::Boolean(_) => Some(ValueType::Boolean),
        Value::Date(_) => Some(ValueType::Date),
        Value::List(items) => items.first().and_then(declared_type),
        Value::Null => None,
    }
}

fn coerce_field(field: &str, actual: &Value, declared: ValueType) -> Result<Value, AuthzError> {
    actual.coerce(declared).ok_or_else(|| AuthzError::FieldType {
        field: field.to_string(),
        expected: declared.name().into(),
        found: actual.kind().into(),
    })
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
