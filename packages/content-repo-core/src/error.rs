//! Repository error types.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepoError>;

/// Repository operation errors.
///
/// Configuration errors are raised while the registry is built, never at
/// request time. Store errors pass through unmodified.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepoError {
    /// Collection or global not registered
    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    /// Same name registered twice
    #[error("Collection '{0}' is already registered")]
    DuplicateCollection(String),

    /// Relation target could not be evaluated at build time
    #[error("Relation '{field}' in collection '{collection}' has an unresolvable target: {message}")]
    UnresolvedRelation {
        collection: String,
        field: String,
        message: String,
    },

    /// Declared title names no known field
    #[error("Title field '{field}' is not defined in collection '{collection}'")]
    UnknownTitleField { collection: String, field: String },

    /// Field kind not present in the field type registry
    #[error("Field '{field}' in collection '{collection}' uses unknown type '{kind}'")]
    UnknownFieldType {
        collection: String,
        field: String,
        kind: String,
    },

    /// Workflow stage not declared
    #[error("Stage '{stage}' is not declared for '{collection}'")]
    UnknownStage { collection: String, stage: String },

    /// Any other invalid declaration
    #[error("Invalid configuration for '{collection}': {message}")]
    InvalidConfiguration { collection: String, message: String },

    /// Collection-level access denied
    #[error("Access denied: {operation} on '{collection}'")]
    AccessDenied {
        collection: String,
        operation: String,
    },

    /// Field-level write access denied
    #[error("Access denied: cannot write field '{field}' on '{collection}'")]
    FieldAccessDenied { collection: String, field: String },

    /// Record not found or not visible
    #[error("Record '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: String },

    /// Payload failed validation before persistence
    #[error("Validation failed for '{collection}.{field}': {message}")]
    Validation {
        collection: String,
        field: String,
        message: String,
    },

    /// Hook returned an error
    #[error("Hook failed on '{collection}': {message}")]
    Hook { collection: String, message: String },

    /// Job queue rejected a publish
    #[error("Job queue error: {0}")]
    JobQueue(String),

    /// Configuration file could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// Store-level error
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepoError {
    /// Returns true for errors raised while building the registry.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RepoError::DuplicateCollection(_)
                | RepoError::UnresolvedRelation { .. }
                | RepoError::UnknownTitleField { .. }
                | RepoError::UnknownFieldType { .. }
                | RepoError::UnknownStage { .. }
                | RepoError::InvalidConfiguration { .. }
                | RepoError::Config(_)
        )
    }

    /// Returns true for access-denied outcomes.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            RepoError::AccessDenied { .. } | RepoError::FieldAccessDenied { .. }
        )
    }

    /// Returns true for not-found outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }

    pub(crate) fn validation(
        collection: &str,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        RepoError::Validation {
            collection: collection.to_string(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid(collection: &str, message: impl Into<String>) -> Self {
        RepoError::InvalidConfiguration {
            collection: collection.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(collection: &str, id: &serde_json::Value) -> Self {
        RepoError::NotFound {
            collection: collection.to_string(),
            id: match id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }
}
