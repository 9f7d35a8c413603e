use thiserror::Error;

use crate::fact::FactId;

/// Errors raised by fact store operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FactError {
    /// No fact with the given identity is present in the store.
    #[error("fact not found: {0}")]
    NotFound(FactId),

    /// An attribute name or value was rejected.
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// A JSON document could not be converted into facts.
    #[error("invalid fact document: {0}")]
    Json(String),
}
