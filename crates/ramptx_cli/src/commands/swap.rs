//! Swap command implementation.

use super::{print_documents, snapshot, DocumentView};
use ramptx_core::{AtomicClock, Config, TransactionCoordinator};
use ramptx_store::{DocumentStore, InMemoryStore};
use serde::Serialize;
use std::sync::Arc;

/// Swap scenario result.
#[derive(Debug, Serialize)]
pub struct SwapResult {
    /// Transaction timestamp.
    pub timestamp: u64,
    /// Documents once both participants are staged.
    pub after_stage: Vec<DocumentView>,
    /// Documents once the transaction is committed.
    pub after_commit: Vec<DocumentView>,
}

/// Runs the swap command.
pub fn run(
    config: Config,
    first: &str,
    second: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    store.insert("a", b"")?;
    store.insert("b", b"")?;

    let coordinator = TransactionCoordinator::new(store.clone(), Arc::new(AtomicClock::new()), config);
    let mut txn = coordinator.begin()?;
    txn.write("a", first)?;
    txn.write("b", second)?;

    coordinator.stage(&mut txn)?;
    let after_stage = snapshot(store.as_ref())?;

    let outcome = coordinator.commit(&mut txn)?;
    if !outcome.is_complete() {
        return Err(format!("transaction {} only partially committed", outcome.timestamp()).into());
    }
    let after_commit = snapshot(store.as_ref())?;

    let result = SwapResult {
        timestamp: txn.timestamp().as_u64(),
        after_stage,
        after_commit,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Transaction ts:{}", result.timestamp);
            println!();
            print_documents("After stage:", &result.after_stage);
            print_documents("After commit:", &result.after_commit);
        }
    }

    Ok(())
}
