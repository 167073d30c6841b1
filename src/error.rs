use crate::interrupt::InterruptReason;
use crate::types::{BuildId, CollectionId};
use thiserror::Error;

/// Recoverable failures returned by the registry and its waits.
///
/// Broken registry invariants (a missing record on unregister, a non-empty
/// registry at an assumed-quiescent point) are not represented here. Those
/// panic, because the shared state can no longer be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexBuildError {
    #[error("Index build already registered: {0}")]
    BuildAlreadyExists(BuildId),

    #[error("Operation forbidden: {0}")]
    OperationForbidden(String),

    #[error("Index build not found: {0}")]
    NotFound(BuildId),

    #[error("Operation interrupted: {0}")]
    Cancelled(InterruptReason),

    #[error("Index build already in progress on collection {collection} for index '{index}'")]
    IndexBuildAlreadyInProgress {
        collection: CollectionId,
        index: String,
    },

    #[error("Admission slot was acquired from a different registry")]
    ForeignAdmissionSlot,

    #[error("Index build teardown failed: {0}")]
    Teardown(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, IndexBuildError>;

impl From<std::io::Error> for IndexBuildError {
    fn from(e: std::io::Error) -> Self {
        IndexBuildError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for IndexBuildError {
    fn from(e: serde_json::Error) -> Self {
        IndexBuildError::Json(e.to_string())
    }
}

impl IndexBuildError {
    /// Stable machine-readable code, suitable for surfacing in command replies.
    pub fn code(&self) -> &'static str {
        match self {
            IndexBuildError::BuildAlreadyExists(_) => "build_already_exists",
            IndexBuildError::OperationForbidden(_) => "operation_forbidden",
            IndexBuildError::NotFound(_) => "no_such_index_build",
            IndexBuildError::Cancelled(reason) => reason.code(),
            IndexBuildError::IndexBuildAlreadyInProgress { .. } => {
                "index_build_already_in_progress"
            }
            IndexBuildError::ForeignAdmissionSlot => "foreign_admission_slot",
            IndexBuildError::Teardown(_) => "teardown_failed",
            IndexBuildError::Config(_) => "config_error",
            IndexBuildError::Io(_) => "io_error",
            IndexBuildError::Json(_) => "json_error",
        }
    }

    /// Whether the same request can succeed later without any caller-side fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexBuildError::OperationForbidden(_)
                | IndexBuildError::IndexBuildAlreadyInProgress { .. }
                | IndexBuildError::Cancelled(_)
        )
    }
}
