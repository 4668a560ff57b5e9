//! Load-time compilation of a [`Condition`] into a checked [`Plan`].
//!
//! The plan is the single intermediate form consumed by both the instance
//! evaluator and the predicate renderer. Every relation hop is resolved
//! against the registry and every literal is coerced to its declared type
//! here, so neither renderer has to validate anything.

use std::fmt;

use crate::authz::condition::{Condition, Literal, Operand, Operator};
use crate::authz::errors::AuthzError;
use crate::authz::registry::Registry;
use crate::authz::types::{Principal, ResourceType, Value, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Compare(Comparison),
    And(Vec<Plan>),
    Or(Vec<Plan>),
    Not(Box<Plan>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub path: FieldPath,
    pub operator: Operator,
    pub operand: BoundOperand,
    pub value_type: ValueType,
}

/// `relations` are traversed in order, `field` is read on the last hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub relations: Vec<String>,
    pub field: String,
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rel in &self.relations {
            write!(f, "{rel}.")?;
        }
        f.write_str(&self.field)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundOperand {
    /// Already coerced; a `Value::List` for `in`.
    Value(Value),
    Principal(String),
}

impl Comparison {
    /// The right-hand value for this request.
    pub fn operand_value(&self, principal: &Principal) -> Result<Value, AuthzError> {
        match &self.operand {
            BoundOperand::Value(v) => Ok(v.clone()),
            BoundOperand::Principal(attr) => {
                let raw = principal
                    .attribute(attr)
                    .ok_or_else(|| AuthzError::MissingPrincipalAttribute(attr.clone()))?;
                raw.coerce(self.value_type)
                    .ok_or_else(|| AuthzError::TypeMismatch {
                        field: format!("principal.{attr}"),
                        message: format!("{} cannot be read as {}", raw.kind(), self.value_type),
                    })
            }
        }
    }
}

/// Compile `condition` for permissions on `resource_type`.
pub fn compile(
    condition: &Condition,
    resource_type: &ResourceType,
    registry: &Registry,
) -> Result<Plan, AuthzError> {
    match condition {
        Condition::Compare {
            field,
            operator,
            operand,
        } => compile_comparison(field, *operator, operand, resource_type, registry)
            .map(Plan::Compare),
        Condition::And(parts) => Ok(Plan::And(
            parts
                .iter()
                .map(|p| compile(p, resource_type, registry))
                .collect::<Result<_, _>>()?,
        )),
        Condition::Or(parts) => Ok(Plan::Or(
            parts
                .iter()
                .map(|p| compile(p, resource_type, registry))
                .collect::<Result<_, _>>()?,
        )),
        Condition::Not(inner) => Ok(Plan::Not(Box::new(compile(
            inner,
            resource_type,
            registry,
        )?))),
    }
}

fn compile_comparison(
    field: &str,
    operator: Operator,
    operand: &Operand,
    resource_type: &ResourceType,
    registry: &Registry,
) -> Result<Comparison, AuthzError> {
    let path = resolve_path(field, resource_type, registry)?;

    let unsupported = |value_type: &str| AuthzError::UnsupportedOperator {
        field: field.to_string(),
        operator: operator.to_string(),
        value_type: value_type.to_string(),
    };

    let (operand, value_type) = match (operator, operand) {
        (Operator::In, Operand::List(items)) => {
            let first = items.first().ok_or_else(|| {
                AuthzError::InvalidCondition(format!("`{field} in` needs at least one value"))
            })?;
            let declared = first.declared;
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                if item.declared != declared {
                    return Err(AuthzError::TypeMismatch {
                        field: field.to_string(),
                        message: format!(
                            "list mixes {} and {} values",
                            declared, item.declared
                        ),
                    });
                }
                values.push(coerce_literal(field, item)?);
            }
            (BoundOperand::Value(Value::List(values)), declared)
        }
        (Operator::In, _) => return Err(unsupported("single")),
        (_, Operand::List(_)) => return Err(unsupported("list")),
        (_, Operand::Literal(lit)) => (
            BoundOperand::Value(coerce_literal(field, lit)?),
            lit.declared,
        ),
        (_, Operand::Principal {
            attribute,
            declared,
        }) => (BoundOperand::Principal(attribute.clone()), *declared),
    };

    if matches!(operator, Operator::GreaterThan | Operator::LessThan) && !value_type.is_ordinal() {
        return Err(unsupported(value_type.name()));
    }

    Ok(Comparison {
        path,
        operator,
        operand,
        value_type,
    })
}

fn coerce_literal(field: &str, literal: &Literal) -> Result<Value, AuthzError> {
    literal
        .value
        .coerce(literal.declared)
        .ok_or_else(|| AuthzError::TypeMismatch {
            field: field.to_string(),
            message: format!("{} cannot be read as {}", literal.value, literal.declared),
        })
}

/// Split a dotted path and check each relation hop exists.
fn resolve_path(
    field: &str,
    resource_type: &ResourceType,
    registry: &Registry,
) -> Result<FieldPath, AuthzError> {
    let mut segments: Vec<&str> = field.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(AuthzError::InvalidCondition(format!(
            "invalid field path `{field}`"
        )));
    }
    let last = segments.pop().unwrap_or_default();

    let mut current = resource_type.clone();
    let mut relations = Vec::with_capacity(segments.len());
    for seg in segments {
        let relation = registry.relation(&current, seg)?;
        current = relation.target.clone();
        relations.push(seg.to_string());
    }

    Ok(FieldPath {
        relations,
        field: last.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::condition::parse_condition;
    use crate::authz::testing::fixture_registry;

    fn compile_str(src: &str, rt: &str) -> Result<Plan, AuthzError> {
        let registry = fixture_registry();
        compile(&parse_condition(src)?, &ResourceType::new(rt), &registry)
    }

    #[test]
    fn test_compile_relation_chain() {
        let plan = compile_str(r#"relatedCase.parent.status == "OPEN""#, "task").unwrap();
        match plan {
            Plan::Compare(cmp) => {
                assert_eq!(cmp.path.relations, vec!["relatedCase", "parent"]);
                assert_eq!(cmp.path.field, "status");
                assert_eq!(cmp.path.to_string(), "relatedCase.parent.status");
                assert_eq!(cmp.value_type, ValueType::String);
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_relation_fails() {
        let err = compile_str(r#"owner.status == "OPEN""#, "task").unwrap_err();
        assert!(matches!(
            err,
            AuthzError::UnknownRelation { ref relation, .. } if relation == "owner"
        ));
    }

    #[test]
    fn test_literal_coercion() {
        let plan = compile_str(r#"due < date("2024-05-01")"#, "task").unwrap();
        let Plan::Compare(cmp) = plan else {
            panic!("expected comparison");
        };
        assert!(matches!(cmp.operand, BoundOperand::Value(Value::Date(_))));

        let err = compile_str(r#"priority > number("high")"#, "task").unwrap_err();
        assert!(matches!(err, AuthzError::TypeMismatch { .. }));
    }

    #[test]
    fn test_ordering_needs_ordinal_type() {
        let err = compile_str(r#"status > "OPEN""#, "task").unwrap_err();
        assert!(matches!(err, AuthzError::UnsupportedOperator { .. }));

        let err = compile_str("archived < true", "task").unwrap_err();
        assert!(matches!(err, AuthzError::UnsupportedOperator { .. }));

        assert!(compile_str("priority > 2", "task").is_ok());
    }

    #[test]
    fn test_list_operand_rules() {
        let err = compile_str(r#"status in ["OPEN", 3]"#, "task").unwrap_err();
        assert!(matches!(err, AuthzError::TypeMismatch { .. }));

        let err = compile_str(r#"status == ["OPEN"]"#, "task");
        assert!(err.is_err());

        let err = compile_str(r#"status in "OPEN""#, "task").unwrap_err();
        assert!(matches!(err, AuthzError::UnsupportedOperator { .. }));
    }

    #[test]
    fn test_principal_operand_binding() {
        let plan = compile_str("level < number(principal.clearance)", "task").unwrap();
        let Plan::Compare(cmp) = plan else {
            panic!("expected comparison");
        };

        let p = Principal::new("alice").with_attribute("clearance", "5");
        assert_eq!(cmp.operand_value(&p).unwrap(), Value::Number(5.0));

        let p = Principal::new("alice").with_attribute("clearance", "top");
        assert!(matches!(
            cmp.operand_value(&p),
            Err(AuthzError::TypeMismatch { .. })
        ));

        let p = Principal::new("alice");
        assert!(matches!(
            cmp.operand_value(&p),
            Err(AuthzError::MissingPrincipalAttribute(_))
        ));
    }
}
