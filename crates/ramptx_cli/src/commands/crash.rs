//! Crash command implementation.

use super::{print_documents, snapshot, DocumentView};
use ramptx_core::{CommitOutcome, Config, CoreResult, Resolution};
use ramptx_testkit::{Applied, TestWorld};
use serde::Serialize;
use std::collections::BTreeMap;

/// Crash scenario result.
#[derive(Debug, Serialize)]
pub struct CrashResult {
    /// Store writes completed before the crash.
    pub writes_before_crash: usize,
    /// What the coordinator saw.
    pub coordinator: String,
    /// Documents as the dead coordinator left them.
    pub after_crash: Vec<DocumentView>,
    /// What recovery did.
    pub resolutions: Vec<ResolutionView>,
    /// Documents after recovery.
    pub after_recovery: Vec<DocumentView>,
    /// `all`, `nothing` or `mixed`.
    pub applied: String,
}

/// One recovery decision.
#[derive(Debug, Serialize)]
pub struct ResolutionView {
    /// `committed`, `rolled_back`, `deferred` or `clean`.
    pub action: &'static str,
    /// Resolved transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
    /// Participants touched.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
}

impl From<Resolution> for ResolutionView {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::AlreadyClean => Self {
                action: "clean",
                ts: None,
                participants: Vec::new(),
            },
            Resolution::Deferred { timestamp } => Self {
                action: "deferred",
                ts: Some(timestamp.as_u64()),
                participants: Vec::new(),
            },
            Resolution::Committed {
                timestamp,
                participants,
            } => Self {
                action: "committed",
                ts: Some(timestamp.as_u64()),
                participants,
            },
            Resolution::RolledBack {
                timestamp,
                participants,
            } => Self {
                action: "rolled_back",
                ts: Some(timestamp.as_u64()),
                participants,
            },
        }
    }
}

/// Runs the crash command.
pub fn run(
    config: Config,
    after: usize,
    participants: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if participants < 2 {
        return Err("at least two participants are required".into());
    }

    let world = TestWorld::with_config(config);
    let mut writes = BTreeMap::new();
    let mut originals = BTreeMap::new();
    for i in 0..participants {
        let key = format!("doc-{i}");
        // Every other document exists beforehand
        let original = (i % 2 == 0).then(|| format!("old-{i}").into_bytes());
        if let Some(value) = &original {
            world.seed([(key.as_str(), value.as_slice())]);
        }
        writes.insert(key.clone(), format!("new-{i}").into_bytes());
        originals.insert(key, original);
    }

    world.faulty.crash_after(after);
    let coordinator = describe(run_transaction(&world, &writes));
    let writes_before_crash = world.faulty.mutations();
    let after_crash = snapshot(world.store.as_ref())?;

    let resolutions = world.recover().into_iter().map(ResolutionView::from).collect();
    let after_recovery = snapshot(world.store.as_ref())?;
    let applied = match world.applied(&writes, &originals) {
        Applied::All => "all",
        Applied::Nothing => "nothing",
        Applied::Mixed(_) => "mixed",
    }
    .to_string();

    let result = CrashResult {
        writes_before_crash,
        coordinator,
        after_crash,
        resolutions,
        after_recovery,
        applied,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text_output(&result),
    }

    Ok(())
}

fn run_transaction(world: &TestWorld, writes: &BTreeMap<String, Vec<u8>>) -> CoreResult<CommitOutcome> {
    let coordinator = world.coordinator();
    let mut txn = coordinator.begin()?;
    for (key, value) in writes {
        txn.write(key.clone(), value.clone())?;
    }
    coordinator.stage(&mut txn)?;
    coordinator.commit(&mut txn)
}

fn describe(result: CoreResult<CommitOutcome>) -> String {
    match result {
        Ok(CommitOutcome::Committed { timestamp }) => format!("committed {timestamp}"),
        Ok(CommitOutcome::PartialFailure {
            timestamp,
            committed,
            unresolved,
        }) => format!(
            "partially committed {timestamp}: committed [{}], unresolved [{}]",
            committed.join(", "),
            unresolved.join(", ")
        ),
        Err(err) => format!("failed: {err}"),
    }
}

fn print_text_output(result: &CrashResult) {
    println!("Coordinator crashed after {} store writes", result.writes_before_crash);
    println!("Coordinator saw: {}", result.coordinator);
    println!();
    print_documents("After crash:", &result.after_crash);

    println!("Recovery:");
    if result.resolutions.is_empty() {
        println!("  nothing to resolve");
    }
    for r in &result.resolutions {
        match r.ts {
            Some(ts) => println!("  ts:{ts} {} [{}]", r.action, r.participants.join(", ")),
            None => println!("  {}", r.action),
        }
    }
    println!();
    print_documents("After recovery:", &result.after_recovery);
    println!("Applied: {}", result.applied);
}
