//! Error types for RampTx core.

use ramptx_codec::{CodecError, Timestamp};
use ramptx_store::StoreError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in RampTx core operations.
///
/// None of these describe a corrupted transaction: every intermediate state
/// the protocol can leave behind is resolvable by recovery, so callers are
/// only ever told to retry.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Store returned a result code the protocol does not handle itself.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Staging metadata could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The document is already staged by another transaction.
    #[error("conflict on {key}: already staged by {holder:?}")]
    Conflict {
        /// The contended document.
        key: String,
        /// Timestamp of the transaction holding the document, if readable.
        holder: Option<Timestamp>,
    },

    /// The document does not exist.
    #[error("document not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The store stayed unreachable after all retries.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the last failure.
        message: String,
    },

    /// Conditional writes kept losing to concurrent writers.
    #[error("gave up on {key} after {attempts} CAS mismatches")]
    CasContention {
        /// The contended document.
        key: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The transaction was resolved as rolled back by someone else.
    #[error("transaction {timestamp} aborted: {reason}")]
    TransactionAborted {
        /// The aborted transaction.
        timestamp: Timestamp,
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in the transaction's current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { message } => Self::StoreUnavailable { message },
            StoreError::KeyNotFound { key } => Self::NotFound { key },
            other => Self::Store(other),
        }
    }
}

impl CoreError {
    /// Creates a conflict error.
    pub fn conflict(key: impl Into<String>, holder: Option<Timestamp>) -> Self {
        Self::Conflict {
            key: key.into(),
            holder,
        }
    }

    /// Creates a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(timestamp: Timestamp, reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            timestamp,
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the whole transaction may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::StoreUnavailable { .. }
                | Self::CasContention { .. }
                | Self::TransactionAborted { .. }
        )
    }
}
