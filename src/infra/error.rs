//! Error types for herbtrace

use thiserror::Error;

use crate::domain::{BatchId, BatchStatus, PrincipalId, Transition};

/// Errors that fail a whole operation.
///
/// Ledger failures never fail a transition and are not represented here; they
/// surface as [`crate::lifecycle::LedgerOutcome`].
#[derive(Error, Debug)]
pub enum BatchError {
    /// Malformed payload, rejected before any write
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Principal may not perform the transition or read the batch
    #[error("forbidden: {principal} may not {action}: {reason}")]
    Forbidden {
        principal: PrincipalId,
        action: String,
        reason: String,
    },

    /// Current state does not satisfy the transition precondition, including a
    /// lost compare-and-set race
    #[error(
        "invalid transition for batch {batch_id}: {transition} requires {expected}, \
         batch is {current}{}",
        fmt_detail(.detail)
    )]
    InvalidTransition {
        batch_id: BatchId,
        transition: Transition,
        current: BatchStatus,
        expected: String,
        detail: Option<String>,
    },

    /// Batch id or QR code does not resolve
    #[error("batch not found: {0}")]
    NotFound(String),

    /// Batch id or QR code already taken
    #[error("duplicate batch: {0}")]
    DuplicateBatch(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored data could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

fn fmt_detail(detail: &Option<String>) -> String {
    detail.as_ref().map(|d| format!(" ({d})")).unwrap_or_default()
}

impl BatchError {
    /// Attach context, e.g. who already collected the batch
    pub(crate) fn with_detail(mut self, text: impl Into<String>) -> Self {
        if let BatchError::InvalidTransition { detail, .. } = &mut self {
            *detail = Some(text.into());
        }
        self
    }

    pub(crate) fn invalid_transition(
        batch_id: &BatchId,
        transition: Transition,
        current: BatchStatus,
    ) -> Self {
        let expected = transition
            .expected_statuses()
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" or ");
        BatchError::InvalidTransition {
            batch_id: batch_id.clone(),
            transition,
            current,
            expected,
            detail: None,
        }
    }

    /// Short machine-readable class, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchError::ValidationFailed(_) => "validation_failed",
            BatchError::Forbidden { .. } => "forbidden",
            BatchError::InvalidTransition { .. } => "invalid_transition",
            BatchError::NotFound(_) => "not_found",
            BatchError::DuplicateBatch(_) => "duplicate_batch",
            BatchError::Database(_) => "database",
            BatchError::Serialization(_) => "serialization",
            BatchError::Configuration(_) => "configuration",
            BatchError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(e: serde_json::Error) -> Self {
        BatchError::Serialization(e.to_string())
    }
}

/// Result type for herbtrace operations
pub type Result<T> = std::result::Result<T, BatchError>;
