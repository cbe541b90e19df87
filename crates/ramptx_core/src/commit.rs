//! Promoting a staged document's pending value.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::retry::with_retry;
use ramptx_codec::{CommitMarker, StagingRecord, Timestamp, COMMIT_MARKER_FIELD, STAGING_FIELD};
use ramptx_store::{Document, DocumentStore, StoreError, StoreResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of a commit call on one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// The pending value was promoted by this call.
    Committed,
    /// Nothing was staged; the document is already resolved.
    AlreadyCommitted,
    /// The requested transaction is no longer staged here and never began
    /// promotion here: it was rolled back.
    RolledBack,
}

/// Decodes the commit marker of a document, empty if absent.
pub(crate) fn read_marker(doc: &Document) -> CoreResult<CommitMarker> {
    match doc.field(COMMIT_MARKER_FIELD) {
        Some(raw) => Ok(CommitMarker::decode(raw)?),
        None => Ok(CommitMarker::new()),
    }
}

/// Promotes staged values into visible values, one document at a time.
///
/// Promotion of a document is three CAS-guarded writes:
///
/// 1. record the timestamp in the document's commit marker
/// 2. replace the visible value with the pending value
/// 3. remove the staging record
///
/// Once step 1 lands the transaction can no longer be rolled back anywhere.
/// A crash after any step leaves a document on which calling commit again
/// finishes the job, so every call is safe to repeat. Siblings are never
/// read.
pub struct CommitExecutor {
    store: Arc<dyn DocumentStore>,
    config: Config,
}

impl CommitExecutor {
    /// Creates a commit executor over `store`.
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// Promotes whatever transaction is staged on `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the document does not exist.
    pub fn commit(&self, key: &str) -> CoreResult<CommitStatus> {
        self.promote(key, None)
    }

    /// Promotes transaction `timestamp` on `key`.
    ///
    /// If a different transaction is staged, or nothing is, the status tells
    /// whether `timestamp` was committed here earlier or rolled back.
    ///
    /// # Errors
    ///
    /// `NotFound` if the document does not exist.
    pub fn commit_at(&self, key: &str, timestamp: Timestamp) -> CoreResult<CommitStatus> {
        self.promote(key, Some(timestamp))
    }

    fn promote(&self, key: &str, expected: Option<Timestamp>) -> CoreResult<CommitStatus> {
        for _ in 0..self.config.max_cas_retries.max(1) {
            let doc = self.retry("get_document", key, || self.store.get_document(key))?;
            let mut marker = read_marker(&doc)?;

            let record = match doc.field(STAGING_FIELD) {
                Some(raw) => Some(StagingRecord::decode(raw)?),
                None => None,
            }
            .filter(|record| expected.map_or(true, |ts| ts == record.timestamp));

            let Some(record) = record else {
                return Ok(match expected {
                    Some(ts) if !marker.contains(ts) => CommitStatus::RolledBack,
                    _ => CommitStatus::AlreadyCommitted,
                });
            };
            let timestamp = record.timestamp;
            let mut cas = doc.cas;

            if !marker.contains(timestamp) {
                marker.record(
                    timestamp,
                    self.config.commit_history,
                    self.config.staleness_threshold,
                );
                let encoded = marker.encode()?;
                match self.retry("upsert_field", key, || {
                    self.store
                        .upsert_field(key, COMMIT_MARKER_FIELD, &encoded, Some(cas))
                }) {
                    Ok(next) => cas = next,
                    Err(err) if is_stale(&err) => continue,
                    Err(err) => return Err(err.into()),
                }
                debug!(key, %timestamp, "recorded commit marker");
            }

            if doc.value != record.pending_value {
                match self.retry("replace", key, || {
                    self.store.replace(key, &record.pending_value, Some(cas))
                }) {
                    Ok(next) => cas = next,
                    Err(err) if is_stale(&err) => continue,
                    Err(err) => return Err(err.into()),
                }
                debug!(key, %timestamp, "promoted pending value");
            }

            match self.retry("remove_field", key, || {
                self.store.remove_field(key, STAGING_FIELD, Some(cas))
            }) {
                Ok(_) => {
                    info!(key, %timestamp, "committed participant");
                    return Ok(CommitStatus::Committed);
                }
                Err(err) if is_stale(&err) || err.is_field_not_found() => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(CoreError::CasContention {
            key: key.to_string(),
            attempts: self.config.max_cas_retries,
        })
    }

    fn retry<T>(
        &self,
        op: &'static str,
        key: &str,
        call: impl FnMut() -> StoreResult<T>,
    ) -> StoreResult<T> {
        with_retry(&self.config.retry, op, key, call)
    }
}

/// The document changed or vanished under us; re-read and start over.
fn is_stale(err: &StoreError) -> bool {
    err.is_cas_mismatch() || err.is_key_not_found()
}

impl std::fmt::Debug for CommitExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
