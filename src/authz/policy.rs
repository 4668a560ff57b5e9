use kdl::{KdlDocument, KdlNode};

use crate::authz::condition::parse_condition;
use crate::authz::errors::AuthzError;
use crate::authz::permission::PermissionDef;
use crate::authz::types::ResourceType;

/// Everything one or more policy files declare.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPolicy {
    pub resources: Vec<ResourceDeclaration>,
    pub permissions: Vec<PermissionDef>,
}

/// A resource type declared in a policy file, for callers that describe their
/// resource types in policy rather than in code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDeclaration {
    pub resource_type: ResourceType,
    pub actions: Vec<String>,
    pub relations: Vec<RelationDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDeclaration {
    pub name: String,
    pub target: ResourceType,
    pub link: Link,
}

/// How related records are found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// This record's field holds the target's `id`.
    Key(String),
    /// Targets whose field holds this record's `id`.
    Foreign(String),
}

/// Parse a KDL document string into typed policy structs.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "resource" => policy.resources.push(parse_resource(node)?),
            "permission" => policy.permissions.extend(parse_permission(node)?),
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

fn parse_resource(node: &KdlNode) -> Result<ResourceDeclaration, AuthzError> {
    let resource_type = first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidPolicy(
            "resource node requires a string argument (e.g. resource \"note\")".into(),
        )
    })?;

    let mut actions = Vec::new();
    let mut relations = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "actions" => actions = dash_list(child),
                "relation" => relations.push(parse_relation(&resource_type, child)?),
                other => {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "unexpected child `{other}` in resource `{resource_type}` (expected `actions` or `relation`)"
                    )));
                }
            }
        }
    }

    Ok(ResourceDeclaration {
        resource_type: ResourceType::new(resource_type),
        actions,
        relations,
    })
}

fn parse_relation(resource_type: &str, node: &KdlNode) -> Result<RelationDeclaration, AuthzError> {
    let name = first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidPolicy(format!(
            "relation in resource `{resource_type}` requires a name (e.g. relation \"relatedCase\" target=\"case\" key=\"caseId\")"
        ))
    })?;

    let target = string_prop(node, "target").ok_or_else(|| {
        AuthzError::InvalidPolicy(format!(
            "relation `{resource_type}.{name}` missing `target` property"
        ))
    })?;

    let link = match (string_prop(node, "key"), string_prop(node, "foreign")) {
        (Some(field), None) => Link::Key(field),
        (None, Some(field)) => Link::Foreign(field),
        _ => {
            return Err(AuthzError::InvalidPolicy(format!(
                "relation `{resource_type}.{name}` needs exactly one of `key` or `foreign`"
            )))
        }
    };

    Ok(RelationDeclaration {
        name,
        target: ResourceType::new(target),
        link,
    })
}

/// One `permission` node may name several actions; each becomes its own
/// definition and is checked independently.
fn parse_permission(node: &KdlNode) -> Result<Vec<PermissionDef>, AuthzError> {
    let role = first_string_arg(node).ok_or_else(|| {
        AuthzError::InvalidPolicy(
            "permission node requires a role argument (e.g. permission \"user\" on=\"note\" action=\"view\")"
                .into(),
        )
    })?;

    let on = string_prop(node, "on").ok_or_else(|| {
        AuthzError::InvalidPolicy(format!(
            "permission for `{role}` missing `on` property (e.g. on=\"note\")"
        ))
    })?;

    let mut actions: Vec<String> = string_prop(node, "action").into_iter().collect();
    let mut condition = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "actions" => actions.extend(dash_list(child)),
                "condition" => {
                    if condition.is_some() {
                        return Err(AuthzError::InvalidPolicy(format!(
                            "permission `{role}` on `{on}` has more than one condition"
                        )));
                    }
                    let text = first_string_arg(child).ok_or_else(|| {
                        AuthzError::InvalidPolicy(format!(
                            "condition in permission `{role}` on `{on}` requires a string argument"
                        ))
                    })?;
                    condition = Some(parse_condition(&text)?);
                }
                other => {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "unexpected child `{other}` in permission `{role}` on `{on}`"
                    )));
                }
            }
        }
    }

    if actions.is_empty() {
        return Err(AuthzError::InvalidPolicy(format!(
            "permission `{role}` on `{on}` names no action"
        )));
    }

    Ok(actions
        .into_iter()
        .map(|action| PermissionDef {
            role: role.clone(),
            resource_type: ResourceType::new(on.as_str()),
            action,
            condition: condition.clone(),
        })
        .collect())
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// actions {
///     - "view"
///     - "modify"
/// }
/// ```
fn dash_list(node: &KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
