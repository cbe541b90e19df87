//! Scan command implementation.

use super::crash::ResolutionView;
use ramptx_core::{AtomicClock, Config, ParticipantStager, RecoveryScanner, TimestampSource};
use ramptx_store::InMemoryStore;
use serde::Serialize;
use std::sync::Arc;

/// Scan result.
#[derive(Debug, Serialize)]
pub struct ScanResult {
    /// Clock value the scan measured staleness against.
    pub now: u64,
    /// Transactions found in flight.
    pub in_flight: Vec<InFlightView>,
    /// Recovery decisions, if resolution was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolutions: Option<Vec<ResolutionView>>,
}

/// A transaction reconstructed from staging records.
#[derive(Debug, Serialize)]
pub struct InFlightView {
    /// Transaction timestamp.
    pub ts: u64,
    /// Age in logical ticks.
    pub age: u64,
    /// Documents still staged.
    pub staged: Vec<String>,
    /// All participants named by the records.
    pub participants: Vec<String>,
    /// Whether the transaction is past the staleness threshold.
    pub abandoned: bool,
}

/// Runs the scan command.
///
/// Each transaction `i` stages documents `txn-i-a` and `txn-i-b`, but its
/// coordinator stops after staging only the first. Transactions are spaced
/// out on the clock so that the oldest ones count as abandoned.
pub fn run(
    config: Config,
    transactions: usize,
    resolve: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(AtomicClock::new());
    let stager = ParticipantStager::new(store.clone(), config.clone());
    let step = (config.staleness_threshold / 2).max(1);

    for i in 0..transactions {
        let ts = clock.next()?;
        let first = format!("txn-{i}-a");
        let second = format!("txn-{i}-b");
        stager.stage(&first, format!("value-{i}").as_bytes(), ts, &[second])?;
        clock.advance(step);
    }

    let scanner = RecoveryScanner::new(store, clock.clone(), config);
    let now = clock.current()?;
    let in_flight = scanner
        .in_flight()?
        .into_iter()
        .map(|txn| InFlightView {
            ts: txn.timestamp.as_u64(),
            age: txn.timestamp.ticks_until(now),
            staged: txn.staged,
            participants: txn.participants,
            abandoned: txn.abandoned,
        })
        .collect();

    let resolutions = if resolve {
        Some(
            scanner
                .resolve_abandoned()?
                .into_iter()
                .map(ResolutionView::from)
                .collect(),
        )
    } else {
        None
    };

    let result = ScanResult {
        now: now.as_u64(),
        in_flight,
        resolutions,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

fn print_text_output(result: &ScanResult) {
    println!("In-flight transactions at ts:{}", result.now);
    if result.in_flight.is_empty() {
        println!("  (none)");
    }
    for txn in &result.in_flight {
        println!(
            "  ts:{:<6} age {:<4} {:<10} staged [{}] of [{}]",
            txn.ts,
            txn.age,
            if txn.abandoned { "abandoned" } else { "active" },
            txn.staged.join(", "),
            txn.participants.join(", ")
        );
    }

    if let Some(resolutions) = &result.resolutions {
        println!();
        println!("Resolved:");
        if resolutions.is_empty() {
            println!("  nothing abandoned");
        }
        for r in resolutions {
            println!(
                "  ts:{} {} [{}]",
                r.ts.unwrap_or_default(),
                r.action,
                r.participants.join(", ")
            );
        }
    }
}
