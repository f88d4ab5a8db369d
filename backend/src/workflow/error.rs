use std::collections::HashMap;
use uuid::Uuid;

use crate::store::StoreError;

/// Errors raised by the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// The caller does not own the dossier, or lacks the admin role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("cannot {action} from status {from}")]
    IllegalStateTransition { from: String, action: &'static str },

    #[error("validation failed on {} field(s)", details.len())]
    ValidationFailed { details: HashMap<String, Vec<String>> },

    /// Strict approval found required items that are not APPROVED.
    #[error("required items not approved: {}", missing.join(", "))]
    IncompleteValidation { missing: Vec<String> },

    /// A natural-key conflict that the caller of the failing attempt should
    /// resolve by re-reading and trying again.
    #[error("conflict on {0}")]
    ConflictRetryable(String),

    #[error("{service} failed: {message}")]
    UpstreamFailure { service: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn illegal(from: impl std::fmt::Display, action: &'static str) -> Self {
        Self::IllegalStateTransition { from: from.to_string(), action }
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut details = HashMap::new();
        details.insert(field.into(), vec![message.into()]);
        Self::ValidationFailed { details }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
