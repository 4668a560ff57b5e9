use miette::Diagnostic;
use thiserror::Error;

use crate::authz::errors::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum WarrantError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(warrant::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(warrant::serde))]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error("Catalog error: {0}")]
    #[diagnostic(
        code(warrant::catalog),
        help("The catalog is a JSON object mapping resource type names to arrays of records")
    )]
    Catalog(String),

    #[error("Bad request: {0}")]
    #[diagnostic(code(warrant::bad_request))]
    BadRequest(String),
}
