//! Finishing transactions whose coordinator went away.
//!
//! Recovery is advisory: any reader that runs into staging metadata may
//! call it, concurrently with live coordinators and with other recovery
//! runs. It only ever uses the same conditional writes as the stager and
//! the commit executor, so a racing transaction is never overwritten.
//!
//! ## Decision rule
//!
//! An abandoned transaction is driven forward if promotion started on any
//! of its participants (the participant's commit marker records the
//! timestamp), and backward otherwise. Once one participant shows the new
//! value, the transaction is never unwound elsewhere.

use crate::clock::TimestampSource;
use crate::commit::{read_marker, CommitExecutor, CommitStatus};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::retry::with_retry;
use crate::stager::{ParticipantStager, UnstageOutcome};
use ramptx_codec::{StagingRecord, Timestamp, STAGING_FIELD};
use ramptx_store::{Document, DocumentStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a document's staging metadata says about its transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    /// No staging metadata, or no document at all.
    Clean,
    /// Staged by a transaction younger than the staleness threshold.
    StagedActive {
        /// The owning transaction.
        timestamp: Timestamp,
        /// The other participants.
        siblings: Vec<String>,
    },
    /// Staged by a transaction old enough to be presumed dead.
    Abandoned {
        /// The owning transaction.
        timestamp: Timestamp,
        /// The other participants.
        siblings: Vec<String>,
    },
}

impl Inspection {
    /// Returns the owning transaction, if the document is staged.
    #[must_use]
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Clean => None,
            Self::StagedActive { timestamp, .. } | Self::Abandoned { timestamp, .. } => {
                Some(*timestamp)
            }
        }
    }

    /// Returns true for [`Inspection::Abandoned`].
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned { .. })
    }
}

/// Result of [`RecoveryScanner::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing to do.
    AlreadyClean,
    /// The transaction may still be live; left alone.
    Deferred {
        /// The owning transaction.
        timestamp: Timestamp,
    },
    /// Driven forward on every participant.
    Committed {
        /// The resolved transaction.
        timestamp: Timestamp,
        /// Every participant, the inspected document first.
        participants: Vec<String>,
    },
    /// Driven backward on every participant.
    RolledBack {
        /// The resolved transaction.
        timestamp: Timestamp,
        /// Every participant, the inspected document first.
        participants: Vec<String>,
    },
}

/// A transaction reconstructed from the staging records left in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightTransaction {
    /// The transaction.
    pub timestamp: Timestamp,
    /// Documents still carrying its staging record, sorted.
    pub staged: Vec<String>,
    /// Every participant named by those records, sorted.
    pub participants: Vec<String>,
    /// Whether the transaction is past the staleness threshold.
    pub abandoned: bool,
}

/// Inspects and resolves staged documents.
pub struct RecoveryScanner {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn TimestampSource>,
    config: Config,
    stager: ParticipantStager,
    committer: CommitExecutor,
}

impl RecoveryScanner {
    /// Creates a scanner. Staleness is measured against `clock`, which must
    /// be the source the coordinators use.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn TimestampSource>,
        config: Config,
    ) -> Self {
        Self {
            stager: ParticipantStager::new(Arc::clone(&store), config.clone()),
            committer: CommitExecutor::new(Arc::clone(&store), config.clone()),
            store,
            clock,
            config,
        }
    }

    /// Classifies the staging metadata on `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or the clock fails, or the record
    /// cannot be decoded.
    pub fn inspect(&self, key: &str) -> CoreResult<Inspection> {
        let Some(doc) = self.read(key)? else {
            return Ok(Inspection::Clean);
        };
        self.classify(&doc)
    }

    /// Drives the transaction staged on `key` to a final state, if it is
    /// abandoned.
    ///
    /// If no participant's commit marker records the transaction, its
    /// participants are unstaged one by one with no shared rollback record.
    /// A coordinator that is merely slow, not dead, could still promote a
    /// participant that has not been unstaged yet, leaving a mixed outcome.
    /// [`Config::staleness_threshold`] must therefore exceed the longest time
    /// a live coordinator takes between issuing a timestamp and writing the
    /// first commit marker.
    ///
    /// # Errors
    ///
    /// Returns an error if a participant cannot be read or written. Nothing
    /// is left inconsistent; calling again continues where this call
    /// stopped.
    pub fn resolve(&self, key: &str) -> CoreResult<Resolution> {
        let (timestamp, siblings) = match self.inspect(key)? {
            Inspection::Clean => return Ok(Resolution::AlreadyClean),
            Inspection::StagedActive { timestamp, .. } => {
                debug!(key, %timestamp, "transaction still active, deferring");
                return Ok(Resolution::Deferred { timestamp });
            }
            Inspection::Abandoned {
                timestamp,
                siblings,
            } => (timestamp, siblings),
        };

        let participants: Vec<String> = std::iter::once(key.to_string())
            .chain(siblings)
            .collect();

        if let Some(evidence) = self.commit_evidence(&participants, timestamp)? {
            info!(key, %timestamp, evidence = %evidence, "abandoned transaction was committing, rolling forward");
            self.commit_all(&participants, timestamp)?;
            return Ok(Resolution::Committed {
                timestamp,
                participants,
            });
        }

        for participant in &participants {
            let outcome =
                self.stager
                    .unstage(participant, timestamp, self.config.placeholder_policy)?;
            if outcome == UnstageOutcome::CommitStarted {
                warn!(key = %participant, %timestamp, "promotion started during rollback, rolling forward");
                self.commit_all(&participants, timestamp)?;
                return Ok(Resolution::Committed {
                    timestamp,
                    participants,
                });
            }
        }

        info!(key, %timestamp, participants = participants.len(), "rolled back abandoned transaction");
        Ok(Resolution::RolledBack {
            timestamp,
            participants,
        })
    }

    /// Lists the transactions whose staging records are still in the store.
    ///
    /// This is the whole transaction log: nothing else records a
    /// transaction. The scan is not a snapshot; records may come and go
    /// while it runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned.
    pub fn in_flight(&self) -> CoreResult<Vec<InFlightTransaction>> {
        let now = self.clock.current()?;
        let keys = with_retry(&self.config.retry, "keys", "*", || self.store.keys())?;

        let mut found: BTreeMap<Timestamp, InFlightTransaction> = BTreeMap::new();
        for key in keys {
            let Some(doc) = self.read(&key)? else {
                continue;
            };
            let Some(record) = staged_record(&doc)? else {
                continue;
            };

            let entry = found
                .entry(record.timestamp)
                .or_insert_with(|| InFlightTransaction {
                    timestamp: record.timestamp,
                    staged: Vec::new(),
                    participants: Vec::new(),
                    abandoned: self.is_abandoned(record.timestamp, now),
                });
            entry.participants.push(key.clone());
            entry.participants.extend(record.participant_refs);
            entry.staged.push(key);
        }

        Ok(found
            .into_values()
            .map(|mut txn| {
                txn.staged.sort();
                txn.participants.sort();
                txn.participants.dedup();
                txn
            })
            .collect())
    }

    /// Resolves every abandoned transaction found by [`in_flight`](Self::in_flight).
    ///
    /// A transaction that fails to resolve is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be scanned.
    pub fn resolve_abandoned(&self) -> CoreResult<Vec<Resolution>> {
        let mut resolutions = Vec::new();
        for txn in self.in_flight()?.into_iter().filter(|t| t.abandoned) {
            let Some(key) = txn.staged.first() else {
                continue;
            };
            match self.resolve(key) {
                Ok(resolution) => resolutions.push(resolution),
                Err(err) => {
                    warn!(timestamp = %txn.timestamp, key = %key, error = %err, "failed to resolve abandoned transaction");
                }
            }
        }
        Ok(resolutions)
    }

    /// Reads the visible value of `key`, finishing any transaction on it
    /// that can be finished.
    ///
    /// An abandoned transaction is resolved first. A transaction whose
    /// promotion already started on `key` is committed, whatever its age. A
    /// live transaction is left alone and the current value returned.
    ///
    /// # Errors
    ///
    /// `NotFound` if the document does not exist (or was a placeholder that
    /// rollback removed).
    pub fn read_resolved(&self, key: &str) -> CoreResult<Vec<u8>> {
        for _ in 0..self.config.max_cas_retries.max(1) {
            let Some(doc) = self.read(key)? else {
                return Err(CoreError::not_found(key));
            };
            let Some(record) = staged_record(&doc)? else {
                return Ok(doc.value);
            };

            if read_marker(&doc)?.contains(record.timestamp) {
                self.finish_commit(key, record.timestamp)?;
                continue;
            }

            match self.classify(&doc)? {
                Inspection::Abandoned { .. } => {
                    self.resolve(key)?;
                }
                _ => return Ok(doc.value),
            }
        }

        Err(CoreError::CasContention {
            key: key.to_string(),
            attempts: self.config.max_cas_retries,
        })
    }

    fn classify(&self, doc: &Document) -> CoreResult<Inspection> {
        let Some(record) = staged_record(doc)? else {
            return Ok(Inspection::Clean);
        };
        let now = self.clock.current()?;
        let timestamp = record.timestamp;
        let siblings = record.participant_refs;

        Ok(if self.is_abandoned(timestamp, now) {
            Inspection::Abandoned {
                timestamp,
                siblings,
            }
        } else {
            Inspection::StagedActive {
                timestamp,
                siblings,
            }
        })
    }

    fn is_abandoned(&self, timestamp: Timestamp, now: Timestamp) -> bool {
        timestamp.ticks_until(now) >= self.config.staleness_threshold
    }

    /// Returns the first participant whose commit marker records `timestamp`.
    fn commit_evidence(
        &self,
        participants: &[String],
        timestamp: Timestamp,
    ) -> CoreResult<Option<String>> {
        for key in participants {
            if let Some(doc) = self.read(key)? {
                if read_marker(&doc)?.contains(timestamp) {
                    return Ok(Some(key.clone()));
                }
            }
        }
        Ok(None)
    }

    fn commit_all(&self, participants: &[String], timestamp: Timestamp) -> CoreResult<()> {
        for key in participants {
            self.finish_commit(key, timestamp)?;
        }
        Ok(())
    }

    fn finish_commit(&self, key: &str, timestamp: Timestamp) -> CoreResult<()> {
        match self.committer.commit_at(key, timestamp) {
            Ok(CommitStatus::RolledBack) => {
                // Never staged here, or taken back before the marker landed
                warn!(key, %timestamp, "participant of committed transaction is not staged");
                Ok(())
            }
            Ok(status) => {
                debug!(key, %timestamp, ?status, "rolled participant forward");
                Ok(())
            }
            Err(CoreError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn read(&self, key: &str) -> CoreResult<Option<Document>> {
        match with_retry(&self.config.retry, "get_document", key, || {
            self.store.get_document(key)
        }) {
            Ok(doc) => Ok(Some(doc)),
            Err(StoreError::KeyNotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn staged_record(doc: &Document) -> CoreResult<Option<StagingRecord>> {
    match doc.field(STAGING_FIELD) {
        Some(raw) => Ok(Some(StagingRecord::decode(raw)?)),
        None => Ok(None),
    }
}

impl std::fmt::Debug for RecoveryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryScanner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
