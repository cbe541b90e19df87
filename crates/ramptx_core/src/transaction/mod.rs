//! Transactions and their coordinator.

mod coordinator;
mod state;

pub use coordinator::{CommitOutcome, TransactionCoordinator};
pub use state::{Participant, Transaction, TransactionState};
