//! Transaction coordinator.

use crate::clock::TimestampSource;
use crate::commit::{CommitExecutor, CommitStatus};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::recovery::RecoveryScanner;
use crate::stager::{ParticipantStager, UnstageOutcome};
use crate::transaction::state::{Transaction, TransactionState};
use ramptx_codec::Timestamp;
use ramptx_store::DocumentStore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of [`TransactionCoordinator::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every participant was promoted.
    Committed {
        /// The committed transaction.
        timestamp: Timestamp,
    },
    /// Some participants could not be reached. The transaction is still
    /// committed if `committed` is non-empty; recovery finishes the rest.
    PartialFailure {
        /// The transaction.
        timestamp: Timestamp,
        /// Participants promoted (or found already promoted).
        committed: Vec<String>,
        /// Participants left staged.
        unresolved: Vec<String>,
    },
}

impl CommitOutcome {
    /// Returns the transaction timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Committed { timestamp } | Self::PartialFailure { timestamp, .. } => *timestamp,
        }
    }

    /// Returns true if every participant was promoted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Drives transactions across their participant documents.
///
/// The coordinator keeps no shared in-memory state between transactions:
/// any number of coordinators, in any number of processes, may work against
/// the same store. All mutual exclusion happens through the staging field's
/// insert-if-absent.
///
/// ## Lifecycle
///
/// ```text
/// begin -> write* -> stage -> commit
///                         \-> rollback
/// ```
///
/// # Example
///
/// ```rust
/// use ramptx_core::{AtomicClock, Config, TransactionCoordinator};
/// use ramptx_store::{DocumentStore, InMemoryStore};
/// use std::sync::Arc;
///
/// let store = Arc::new(InMemoryStore::new());
/// let coordinator =
///     TransactionCoordinator::new(store.clone(), Arc::new(AtomicClock::new()), Config::default());
///
/// let mut txn = coordinator.begin().unwrap();
/// txn.write("a", "jeff").unwrap();
/// txn.write("b", "mike").unwrap();
/// coordinator.stage(&mut txn).unwrap();
/// assert!(coordinator.commit(&mut txn).unwrap().is_complete());
///
/// assert_eq!(store.get("a").unwrap().value, b"jeff");
/// ```
pub struct TransactionCoordinator {
    clock: Arc<dyn TimestampSource>,
    config: Config,
    stager: ParticipantStager,
    committer: CommitExecutor,
    recovery: RecoveryScanner,
}

impl TransactionCoordinator {
    /// Creates a coordinator.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn TimestampSource>,
        config: Config,
    ) -> Self {
        Self {
            stager: ParticipantStager::new(Arc::clone(&store), config.clone()),
            committer: CommitExecutor::new(Arc::clone(&store), config.clone()),
            recovery: RecoveryScanner::new(store, Arc::clone(&clock), config.clone()),
            clock,
            config,
        }
    }

    /// Returns the recovery scanner sharing this coordinator's store, clock
    /// and configuration.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryScanner {
        &self.recovery
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Begins a transaction by acquiring a fresh timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamp source fails.
    pub fn begin(&self) -> CoreResult<Transaction> {
        let timestamp = self.clock.next()?;
        debug!(%timestamp, "began transaction");
        Ok(Transaction::new(timestamp))
    }

    /// Stages every participant.
    ///
    /// Each participant's record references all the others. If any
    /// participant cannot be staged, the ones already staged in this call
    /// are unstaged again and the transaction ends up `RolledBack`.
    ///
    /// # Errors
    ///
    /// `Conflict` if a participant belongs to another in-flight transaction;
    /// resolve or wait for it, then retry with a new transaction.
    pub fn stage(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_state(&[TransactionState::Begun], "stage")?;
        let timestamp = txn.timestamp();

        for index in 0..txn.len() {
            let siblings = txn.siblings_of(index);
            let participant = &txn.participants()[index];
            let key = participant.key().to_string();

            match self
                .stager
                .stage(&key, participant.value(), timestamp, &siblings)
            {
                Ok(outcome) => txn.mark_staged_participant(index, outcome.created),
                Err(err) => {
                    warn!(%timestamp, key = %key, error = %err, "staging failed, rolling back");
                    self.unstage_all(txn);
                    txn.set_state(TransactionState::RolledBack);
                    return Err(err);
                }
            }
        }

        txn.set_state(TransactionState::Staged);
        info!(%timestamp, participants = txn.len(), "staged transaction");
        Ok(())
    }

    /// Commits a staged transaction.
    ///
    /// Participants are promoted independently. Failures after the first
    /// promotion do not undo anything: they are reported as
    /// [`CommitOutcome::PartialFailure`] and left for recovery.
    ///
    /// # Errors
    ///
    /// - `TransactionAborted` if recovery rolled the transaction back before
    ///   anything was promoted
    /// - the store error, if no participant could be promoted; the
    ///   transaction stays `Committing` and `commit` may be called again
    pub fn commit(&self, txn: &mut Transaction) -> CoreResult<CommitOutcome> {
        txn.ensure_state(
            &[TransactionState::Staged, TransactionState::Committing],
            "commit",
        )?;
        let timestamp = txn.timestamp();
        txn.set_state(TransactionState::Committing);

        let keys: Vec<String> = txn.keys().map(str::to_string).collect();
        let mut committed = Vec::new();
        let mut unresolved = Vec::new();
        let mut last_error = None;

        for key in &keys {
            let key = key.as_str();
            match self.committer.commit_at(key, timestamp) {
                Ok(CommitStatus::Committed | CommitStatus::AlreadyCommitted) => {
                    committed.push(key.to_string());
                }
                Ok(CommitStatus::RolledBack) if committed.is_empty() => {
                    warn!(%timestamp, key, "transaction was rolled back by recovery");
                    txn.set_state(TransactionState::RolledBack);
                    return Err(CoreError::transaction_aborted(
                        timestamp,
                        format!("participant {key} was rolled back"),
                    ));
                }
                Ok(CommitStatus::RolledBack) => {
                    error!(%timestamp, key, "participant rolled back after commit began");
                    unresolved.push(key.to_string());
                }
                Err(err) => {
                    warn!(%timestamp, key, error = %err, "participant commit failed");
                    unresolved.push(key.to_string());
                    last_error = Some(err);
                }
            }
        }

        if committed.is_empty() {
            if let Some(err) = last_error {
                // Nothing promoted; the caller may retry the commit
                return Err(err);
            }
        }
        txn.set_state(TransactionState::Committed);

        if unresolved.is_empty() {
            info!(%timestamp, participants = committed.len(), "committed transaction");
            Ok(CommitOutcome::Committed { timestamp })
        } else {
            warn!(
                %timestamp,
                committed = committed.len(),
                unresolved = unresolved.len(),
                "transaction partially committed"
            );
            Ok(CommitOutcome::PartialFailure {
                timestamp,
                committed,
                unresolved,
            })
        }
    }

    /// Rolls back a transaction that has not committed.
    ///
    /// Staging records are removed without promotion. Placeholder documents
    /// are handled per [`Config::placeholder_policy`].
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if promotion has already started on a participant;
    /// the transaction must then be committed instead.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<()> {
        txn.ensure_state(
            &[
                TransactionState::Begun,
                TransactionState::Staged,
                TransactionState::Committing,
                TransactionState::RolledBack,
            ],
            "roll back",
        )?;
        let timestamp = txn.timestamp();
        if txn.state() == TransactionState::Begun {
            txn.set_state(TransactionState::RolledBack);
            return Ok(());
        }

        let keys: Vec<String> = txn.keys().map(str::to_string).collect();
        for key in &keys {
            let key = key.as_str();
            match self
                .stager
                .unstage(key, timestamp, self.config.placeholder_policy)?
            {
                UnstageOutcome::CommitStarted => {
                    txn.set_state(TransactionState::Committing);
                    return Err(CoreError::invalid_operation(format!(
                        "commit of {timestamp} already started on {key}"
                    )));
                }
                outcome => debug!(%timestamp, key, ?outcome, "rolled back participant"),
            }
        }

        txn.clear_staged();
        txn.set_state(TransactionState::RolledBack);
        info!(%timestamp, "rolled back transaction");
        Ok(())
    }

    /// Runs a whole transaction: begin, stage, commit.
    ///
    /// On `Conflict` the attempt is abandoned and retried with a fresh
    /// timestamp, up to [`Config::max_conflict_retries`] times. With
    /// [`Config::recover_on_conflict`] the conflicting document is handed to
    /// recovery first, which clears it if its transaction was abandoned.
    ///
    /// # Errors
    ///
    /// The last staging error once retries are exhausted.
    pub fn execute<I, K, V>(&self, writes: I) -> CoreResult<CommitOutcome>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let writes: Vec<(String, Vec<u8>)> = writes
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let mut attempt = 0;
        loop {
            let mut txn = self.begin()?;
            for (key, value) in &writes {
                txn.write(key.clone(), value.clone())?;
            }

            match self.stage(&mut txn) {
                Ok(()) => return self.commit(&mut txn),
                Err(CoreError::Conflict { key, holder }) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    warn!(key = %key, ?holder, attempt, "conflict, retrying transaction");
                    if self.config.recover_on_conflict {
                        match self.recovery.resolve(&key) {
                            Ok(resolution) => debug!(key = %key, ?resolution, "recovery on conflict"),
                            Err(err) => warn!(key = %key, error = %err, "recovery on conflict failed"),
                        }
                    }
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Unstages participants staged by an interrupted `stage` call.
    fn unstage_all(&self, txn: &mut Transaction) {
        let timestamp = txn.timestamp();
        for participant in txn.participants().iter().filter(|p| p.is_staged()) {
            if let Err(err) =
                self.stager
                    .unstage(participant.key(), timestamp, self.config.placeholder_policy)
            {
                // Left for recovery
                warn!(%timestamp, key = participant.key(), error = %err, "unstage failed");
            }
        }
        txn.clear_staged();
    }
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::AtomicClock;
    use crate::config::{PlaceholderPolicy, RetryConfig};
    use ramptx_codec::{StagingRecord, STAGING_FIELD};
    use ramptx_store::InMemoryStore;

    fn create_coordinator(config: Config) -> (Arc<InMemoryStore>, TransactionCoordinator) {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = TransactionCoordinator::new(
            store.clone(),
            Arc::new(AtomicClock::new()),
            config.retry(RetryConfig::immediate(3)),
        );
        (store, coordinator)
    }

    fn record(store: &InMemoryStore, key: &str) -> StagingRecord {
        StagingRecord::decode(&store.get_field(key, STAGING_FIELD).unwrap().value).unwrap()
    }

    #[test]
    fn begin_issues_increasing_timestamps() {
        let (_store, tc) = create_coordinator(Config::default());
        let t1 = tc.begin().unwrap();
        let t2 = tc.begin().unwrap();
        assert!(t2.timestamp() > t1.timestamp());
        assert_eq!(t1.state(), TransactionState::Begun);
    }

    #[test]
    fn stage_links_every_participant() {
        let (store, tc) = create_coordinator(Config::default());
        let mut txn = tc.begin().unwrap();
        txn.write("a", "1").unwrap();
        txn.write("b", "2").unwrap();
        txn.write("c", "3").unwrap();
        tc.stage(&mut txn).unwrap();

        assert_eq!(txn.state(), TransactionState::Staged);
        assert_eq!(record(&store, "a").participant_refs, vec!["b", "c"]);
        assert_eq!(record(&store, "b").participant_refs, vec!["a", "c"]);
        assert_eq!(record(&store, "c").participant_refs, vec!["a", "b"]);
        assert!(txn.participants().iter().all(|p| p.is_staged() && p.created()));
    }

    #[test]
    fn stage_conflict_undoes_the_round() {
        let (store, tc) = create_coordinator(Config::default());
        store.insert("a", b"A").unwrap();
        store.insert("b", b"B").unwrap();

        let mut holder = tc.begin().unwrap();
        holder.write("b", "held").unwrap();
        tc.stage(&mut holder).unwrap();

        let mut txn = tc.begin().unwrap();
        txn.write("a", "new-a").unwrap();
        txn.write("b", "new-b").unwrap();
        let err = tc.stage(&mut txn).unwrap_err();

        assert!(matches!(err, CoreError::Conflict { ref key, .. } if key == "b"));
        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert!(store.get_field("a", STAGING_FIELD).unwrap_err().is_field_not_found());
        assert_eq!(record(&store, "b").timestamp, holder.timestamp());
    }

    #[test]
    fn commit_requires_staging() {
        let (_store, tc) = create_coordinator(Config::default());
        let mut txn = tc.begin().unwrap();
        txn.write("a", "x").unwrap();
        assert!(matches!(
            tc.commit(&mut txn),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn commit_promotes_all() {
        let (store, tc) = create_coordinator(Config::default());
        let mut txn = tc.begin().unwrap();
        txn.write("a", "jeff").unwrap();
        txn.write("b", "mike").unwrap();
        tc.stage(&mut txn).unwrap();

        let outcome = tc.commit(&mut txn).unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                timestamp: txn.timestamp()
            }
        );
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(store.get("a").unwrap().value, b"jeff");
        assert_eq!(store.get("b").unwrap().value, b"mike");
    }

    #[test]
    fn cannot_commit_twice() {
        let (_store, tc) = create_coordinator(Config::default());
        let mut txn = tc.begin().unwrap();
        txn.write("a", "x").unwrap();
        tc.stage(&mut txn).unwrap();
        tc.commit(&mut txn).unwrap();
        assert!(tc.commit(&mut txn).is_err());
    }

    #[test]
    fn rollback_restores_values() {
        let (store, tc) = create_coordinator(Config::default());
        store.insert("a", b"old").unwrap();

        let mut txn = tc.begin().unwrap();
        txn.write("a", "new").unwrap();
        txn.write("b", "fresh").unwrap();
        tc.stage(&mut txn).unwrap();
        tc.rollback(&mut txn).unwrap();

        assert_eq!(txn.state(), TransactionState::RolledBack);
        assert_eq!(store.get("a").unwrap().value, b"old");
        assert!(store.get_field("a", STAGING_FIELD).unwrap_err().is_field_not_found());
        // Placeholder kept as an empty document by default
        assert_eq!(store.get("b").unwrap().value, b"");
    }

    #[test]
    fn rollback_can_remove_placeholders() {
        let (store, tc) =
            create_coordinator(Config::new().placeholder_policy(PlaceholderPolicy::Remove));

        let mut txn = tc.begin().unwrap();
        txn.write("b", "fresh").unwrap();
        tc.stage(&mut txn).unwrap();
        tc.rollback(&mut txn).unwrap();

        assert!(!store.exists("b").unwrap());
    }

    #[test]
    fn cannot_rollback_after_commit() {
        let (_store, tc) = create_coordinator(Config::default());
        let mut txn = tc.begin().unwrap();
        txn.write("a", "x").unwrap();
        tc.stage(&mut txn).unwrap();
        tc.commit(&mut txn).unwrap();
        assert!(tc.rollback(&mut txn).is_err());
    }

    #[test]
    fn commit_after_recovery_rollback_is_aborted() {
        let (_store, tc) = create_coordinator(Config::new().staleness_threshold(0));
        let mut txn = tc.begin().unwrap();
        txn.write("a", "x").unwrap();
        txn.write("b", "y").unwrap();
        tc.stage(&mut txn).unwrap();

        tc.recovery().resolve("a").unwrap();

        let err = tc.commit(&mut txn).unwrap_err();
        assert!(matches!(err, CoreError::TransactionAborted { .. }));
        assert_eq!(txn.state(), TransactionState::RolledBack);
    }

    #[test]
    fn execute_commits() {
        let (store, tc) = create_coordinator(Config::default());
        let outcome = tc.execute([("a", "jeff"), ("b", "mike")]).unwrap();
        assert!(outcome.is_complete());
        assert_eq!(store.get("b").unwrap().value, b"mike");
    }

    #[test]
    fn execute_clears_abandoned_conflict() {
        let (store, tc) = create_coordinator(Config::new().staleness_threshold(1));

        let mut stuck = tc.begin().unwrap();
        stuck.write("a", "stuck").unwrap();
        tc.stage(&mut stuck).unwrap();
        // Coordinator of `stuck` dies here

        let outcome = tc.execute([("a", "fresh")]).unwrap();

        assert!(outcome.is_complete());
        assert_eq!(store.get("a").unwrap().value, b"fresh");
    }

    #[test]
    fn execute_gives_up_on_live_conflict() {
        let (_store, tc) = create_coordinator(
            Config::new()
                .staleness_threshold(1_000)
                .max_conflict_retries(2),
        );

        let mut live = tc.begin().unwrap();
        live.write("a", "live").unwrap();
        tc.stage(&mut live).unwrap();

        let err = tc.execute([("a", "other")]).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }
}
