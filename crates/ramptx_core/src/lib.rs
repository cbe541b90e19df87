//! # RampTx Core
//!
//! Multi-document atomic transactions over a store that is only atomic per
//! document.
//!
//! This crate provides:
//! - Timestamp sources ([`AtomicClock`], [`StoreClock`])
//! - Staging of pending values into hidden per-document metadata
//! - Idempotent, per-document promotion of staged values
//! - A coordinator driving begin, stage, commit and rollback
//! - Recovery of transactions abandoned by a crashed coordinator
//!
//! There is no transaction log. A transaction exists only as the staging
//! records on its participants, each of which names all the others, so any
//! reader can find and finish it.
//!
//! ## Example
//!
//! ```rust
//! use ramptx_core::{AtomicClock, Config, TransactionCoordinator};
//! use ramptx_store::{DocumentStore, InMemoryStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let coordinator =
//!     TransactionCoordinator::new(store.clone(), Arc::new(AtomicClock::new()), Config::default());
//!
//! coordinator.execute([("a", "jeff"), ("b", "mike")]).unwrap();
//!
//! assert_eq!(store.get("a").unwrap().value, b"jeff");
//! assert_eq!(store.get("b").unwrap().value, b"mike");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod commit;
mod config;
mod error;
mod recovery;
mod retry;
mod stager;
mod transaction;

pub use clock::{AtomicClock, StoreClock, TimestampSource};
pub use commit::{CommitExecutor, CommitStatus};
pub use config::{Config, PlaceholderPolicy, RetryConfig};
pub use error::{CoreError, CoreResult};
pub use ramptx_codec::Timestamp;
pub use recovery::{InFlightTransaction, Inspection, RecoveryScanner, Resolution};
pub use stager::{ParticipantStager, StageOutcome, UnstageOutcome};
pub use transaction::{
    CommitOutcome, Participant, Transaction, TransactionCoordinator, TransactionState,
};
