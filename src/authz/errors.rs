use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    // ---------- configuration errors (registration / permission load) ----------
    #[error("Action `{action}` is already registered for resource type `{resource_type}`")]
    #[diagnostic(
        code(warrant::authz::duplicate_action),
        help("Each action key may be registered only once per resource type")
    )]
    DuplicateAction {
        resource_type: String,
        action: String,
    },

    #[error("Unknown resource type `{0}`")]
    #[diagnostic(
        code(warrant::authz::unknown_resource_type),
        help("Register a capability provider for the resource type before referencing it")
    )]
    UnknownResourceType(String),

    #[error("Invalid permission: {0}")]
    #[diagnostic(
        code(warrant::authz::invalid_permission),
        help("A permission may only name actions listed by the resource type's provider")
    )]
    InvalidPermission(String),

    #[error("Operator `{operator}` is not supported for {value_type} values in `{field}`")]
    #[diagnostic(
        code(warrant::authz::unsupported_operator),
        help("`>` and `<` need number or date values; `in` needs a list; `==`, `!=` and `contains` need a single value")
    )]
    UnsupportedOperator {
        field: String,
        operator: String,
        value_type: String,
    },

    #[error("Type mismatch in `{field}`: {message}")]
    #[diagnostic(
        code(warrant::authz::type_mismatch),
        help("Literal values must coerce to their declared type (string, number, bool, date)")
    )]
    TypeMismatch { field: String, message: String },

    #[error("Invalid capability provider for `{resource_type}`: {message}")]
    #[diagnostic(
        code(warrant::authz::invalid_provider),
        help("Providers must declare a non-empty set of actions for their own resource type")
    )]
    InvalidProvider {
        resource_type: String,
        message: String,
    },

    #[error("Invalid condition expression: {0}")]
    #[diagnostic(
        code(warrant::authz::invalid_condition),
        help("Supported operators: ==, !=, >, <, in, contains, &&, ||, !. Relation paths use dot notation (e.g. relatedCase.status)")
    )]
    InvalidCondition(String),

    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(warrant::authz::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(warrant::authz::invalid_policy),
        help("Each policy file may contain `resource` and `permission` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(warrant::authz::kdl_parse),
        help("Check the KDL file syntax, see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(warrant::authz::io))]
    Io(#[from] std::io::Error),

    // ---------- resolution errors (per request) ----------
    #[error("Unknown action `{action}` for resource type `{resource_type}`")]
    #[diagnostic(code(warrant::authz::unknown_action))]
    UnknownAction {
        resource_type: String,
        action: String,
    },

    #[error("Unknown relation `{relation}` on resource type `{resource_type}`")]
    #[diagnostic(
        code(warrant::authz::unknown_relation),
        help("Declare the relation in the resource type's capability provider")
    )]
    UnknownRelation {
        resource_type: String,
        relation: String,
    },

    #[error("Field `{field}` holds {found}, expected a {expected} value")]
    #[diagnostic(code(warrant::authz::field_type))]
    FieldType {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Principal has no attribute `{0}`")]
    #[diagnostic(code(warrant::authz::missing_principal_attribute))]
    MissingPrincipalAttribute(String),
}

impl AuthzError {
    pub(crate) fn unknown_relation(resource_type: &str, relation: &str) -> Self {
        AuthzError::UnknownRelation {
            resource_type: resource_type.to_string(),
            relation: relation.to_string(),
        }
    }
}
