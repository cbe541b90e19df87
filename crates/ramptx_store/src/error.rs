//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result codes a document store reports for a failed operation.
///
/// Most variants are ordinary outcomes of conditional writes rather than
/// faults; callers branch on them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The document does not exist.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// The missing key.
        key: String,
    },

    /// An insert found the document already present.
    #[error("key already exists: {key}")]
    KeyExists {
        /// The existing key.
        key: String,
    },

    /// The hidden field does not exist on the document.
    #[error("field {field} not found on {key}")]
    FieldNotFound {
        /// Document key.
        key: String,
        /// Field name.
        field: String,
    },

    /// An insert-if-absent found the hidden field already present.
    #[error("field {field} already exists on {key}")]
    FieldExists {
        /// Document key.
        key: String,
        /// Field name.
        field: String,
    },

    /// A CAS-guarded write observed a newer version of the document.
    #[error("cas mismatch on {key}: expected {expected}, found {actual}")]
    CasMismatch {
        /// Document key.
        key: String,
        /// CAS the caller supplied.
        expected: u64,
        /// CAS currently stored.
        actual: u64,
    },

    /// The store could not be reached. The operation may or may not have
    /// been applied server-side.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The stored document could not be interpreted (e.g. a counter that
    /// is not a number).
    #[error("malformed document {key}: {message}")]
    Malformed {
        /// Document key.
        key: String,
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Creates a key not found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Creates a key exists error.
    pub fn key_exists(key: impl Into<String>) -> Self {
        Self::KeyExists { key: key.into() }
    }

    /// Creates a field not found error.
    pub fn field_not_found(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::FieldNotFound {
            key: key.into(),
            field: field.into(),
        }
    }

    /// Creates a field exists error.
    pub fn field_exists(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::FieldExists {
            key: key.into(),
            field: field.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns true if the failure is transient and the call may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Returns true for `KeyNotFound`.
    #[must_use]
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }

    /// Returns true for `FieldNotFound`.
    #[must_use]
    pub fn is_field_not_found(&self) -> bool {
        matches!(self, Self::FieldNotFound { .. })
    }

    /// Returns true for `CasMismatch`.
    #[must_use]
    pub fn is_cas_mismatch(&self) -> bool {
        matches!(self, Self::CasMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_transient() {
        assert!(StoreError::unavailable("timeout").is_transient());
        assert!(!StoreError::key_not_found("a").is_transient());
        assert!(!StoreError::field_exists("a", "txn").is_transient());
    }

    #[test]
    fn display_includes_key_and_field() {
        let err = StoreError::field_not_found("a", "txn");
        assert_eq!(err.to_string(), "field txn not found on a");
    }
}
