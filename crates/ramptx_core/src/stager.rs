//! Enlisting a single document into a transaction, and taking it back out.

use crate::commit::read_marker;
use crate::config::{Config, PlaceholderPolicy};
use crate::error::{CoreError, CoreResult};
use crate::retry::with_retry;
use ramptx_codec::{StagingRecord, Timestamp, STAGING_FIELD};
use ramptx_store::{DocumentStore, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a successful [`ParticipantStager::stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// True if the document did not exist and was inserted empty.
    pub created: bool,
}

/// Result of [`ParticipantStager::unstage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnstageOutcome {
    /// The staging record was removed; the visible value is untouched.
    RolledBack,
    /// The document was an untouched placeholder and has been deleted.
    PlaceholderRemoved,
    /// The document carries no staging record for this transaction.
    NotStaged,
    /// Promotion of this transaction has already begun on the document, so
    /// it must be committed instead.
    CommitStarted,
}

/// Writes and removes staging records on individual documents.
pub struct ParticipantStager {
    store: Arc<dyn DocumentStore>,
    config: Config,
}

impl ParticipantStager {
    /// Creates a stager over `store`.
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// Stages `key` into transaction `timestamp`.
    ///
    /// A missing document is first inserted with an empty value. The record
    /// is then attached with an insert-if-absent on the staging field, so
    /// plain reads of the value proceed undisturbed and two transactions can
    /// never both own the document.
    ///
    /// Finding a record that carries `timestamp` itself counts as success:
    /// it is an earlier attempt of this same call whose reply was lost.
    ///
    /// # Errors
    ///
    /// - `Conflict` if another transaction's record is present
    /// - `NotFound` if the document vanished between insert and attach
    pub fn stage(
        &self,
        key: &str,
        pending_value: &[u8],
        timestamp: Timestamp,
        sibling_refs: &[String],
    ) -> CoreResult<StageOutcome> {
        let created = match with_retry(&self.config.retry, "insert", key, || {
            self.store.insert(key, b"")
        }) {
            Ok(_) => {
                debug!(key, %timestamp, "inserted placeholder");
                true
            }
            Err(StoreError::KeyExists { .. }) => false,
            Err(err) => return Err(err.into()),
        };

        let record = StagingRecord::new(timestamp, sibling_refs.to_vec(), pending_value.to_vec())
            .with_placeholder(created);
        let bytes = record.encode()?;

        match with_retry(&self.config.retry, "insert_field", key, || {
            self.store.insert_field(key, STAGING_FIELD, &bytes)
        }) {
            Ok(_) => {
                debug!(key, %timestamp, siblings = sibling_refs.len(), "staged participant");
                Ok(StageOutcome { created })
            }
            Err(StoreError::FieldExists { .. }) => {
                let holder = self.holder(key)?;
                if holder == Some(timestamp) {
                    debug!(key, %timestamp, "participant already staged by this transaction");
                    Ok(StageOutcome { created })
                } else {
                    warn!(key, %timestamp, ?holder, "document staged by another transaction");
                    Err(CoreError::conflict(key, holder))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Removes the staging record of transaction `timestamp` from `key`
    /// without promoting its pending value.
    ///
    /// Records of other transactions are left alone. A placeholder whose
    /// value is still empty is deleted when the policy says so.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be decoded or the store keeps
    /// failing.
    pub fn unstage(
        &self,
        key: &str,
        timestamp: Timestamp,
        policy: PlaceholderPolicy,
    ) -> CoreResult<UnstageOutcome> {
        for _ in 0..self.config.max_cas_retries.max(1) {
            let doc = match with_retry(&self.config.retry, "get_document", key, || {
                self.store.get_document(key)
            }) {
                Ok(doc) => doc,
                Err(StoreError::KeyNotFound { .. }) => return Ok(UnstageOutcome::NotStaged),
                Err(err) => return Err(err.into()),
            };

            let Some(raw) = doc.field(STAGING_FIELD) else {
                return Ok(UnstageOutcome::NotStaged);
            };
            let record = StagingRecord::decode(raw)?;
            if record.timestamp != timestamp {
                return Ok(UnstageOutcome::NotStaged);
            }
            if read_marker(&doc)?.contains(timestamp) {
                return Ok(UnstageOutcome::CommitStarted);
            }

            let remove_placeholder = record.placeholder
                && policy == PlaceholderPolicy::Remove
                && doc.value.is_empty();

            let result = if remove_placeholder {
                with_retry(&self.config.retry, "remove", key, || {
                    self.store.remove(key, Some(doc.cas))
                })
                .map(|()| UnstageOutcome::PlaceholderRemoved)
            } else {
                with_retry(&self.config.retry, "remove_field", key, || {
                    self.store.remove_field(key, STAGING_FIELD, Some(doc.cas))
                })
                .map(|_| UnstageOutcome::RolledBack)
            };

            match result {
                Ok(outcome) => {
                    debug!(key, %timestamp, ?outcome, "unstaged participant");
                    return Ok(outcome);
                }
                Err(
                    StoreError::CasMismatch { .. }
                    | StoreError::KeyNotFound { .. }
                    | StoreError::FieldNotFound { .. },
                ) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(CoreError::CasContention {
            key: key.to_string(),
            attempts: self.config.max_cas_retries,
        })
    }

    /// Reads the timestamp of the transaction currently staged on `key`.
    fn holder(&self, key: &str) -> CoreResult<Option<Timestamp>> {
        match with_retry(&self.config.retry, "get_field", key, || {
            self.store.get_field(key, STAGING_FIELD)
        }) {
            Ok(field) => Ok(Some(StagingRecord::decode(&field.value)?.timestamp)),
            // Resolved between our insert and this read
            Err(StoreError::FieldNotFound { .. } | StoreError::KeyNotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for ParticipantStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantStager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
