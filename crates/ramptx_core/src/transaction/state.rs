//! Transaction state.

use crate::error::{CoreError, CoreResult};
use ramptx_codec::Timestamp;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Timestamp acquired, participants being collected.
    Begun,
    /// Every participant carries a staging record.
    Staged,
    /// Promotion is under way; some participants may still be staged.
    Committing,
    /// At least one participant was promoted, so the transaction is
    /// committed.
    Committed,
    /// Staging records were removed without promotion.
    RolledBack,
}

/// A document enlisted in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    key: String,
    value: Vec<u8>,
    staged: bool,
    created: bool,
}

impl Participant {
    /// Returns the document key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the value the document will hold after commit.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Returns true once the staging record is written.
    #[must_use]
    pub fn is_staged(&self) -> bool {
        self.staged
    }

    /// Returns true if staging inserted the document as a placeholder.
    #[must_use]
    pub fn created(&self) -> bool {
        self.created
    }
}

/// A multi-document transaction.
///
/// The transaction is a client-side handle only. Nothing about it is
/// persisted apart from the staging records on its participants.
#[derive(Debug)]
pub struct Transaction {
    timestamp: Timestamp,
    state: TransactionState,
    participants: Vec<Participant>,
}

impl Transaction {
    pub(crate) fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            state: TransactionState::Begun,
            participants: Vec::new(),
        }
    }

    /// Returns the transaction timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Records the value `key` should hold after commit.
    ///
    /// Writing the same key twice keeps its original position and replaces
    /// the value.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` once staging has started.
    pub fn write(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.ensure_state(&[TransactionState::Begun], "write")?;
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.participants.iter_mut().find(|p| p.key == key) {
            existing.value = value;
        } else {
            self.participants.push(Participant {
                key,
                value,
                staged: false,
                created: false,
            });
        }
        Ok(())
    }

    /// Returns the participants in enlistment order.
    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Returns the participant keys in enlistment order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.key.as_str())
    }

    /// Returns the number of participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Keys of every participant except the one at `index`.
    pub(crate) fn siblings_of(&self, index: usize) -> Vec<String> {
        self.participants
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, p)| p.key.clone())
            .collect()
    }

    pub(crate) fn mark_staged_participant(&mut self, index: usize, created: bool) {
        if let Some(p) = self.participants.get_mut(index) {
            p.staged = true;
            p.created = created;
        }
    }

    pub(crate) fn clear_staged(&mut self) {
        for p in &mut self.participants {
            p.staged = false;
        }
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub(crate) fn ensure_state(&self, allowed: &[TransactionState], op: &str) -> CoreResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "cannot {op} transaction {} in state {:?}",
                self.timestamp, self.state
            )))
        }
    }
}
