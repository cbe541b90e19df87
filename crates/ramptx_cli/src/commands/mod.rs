//! CLI command implementations.

pub mod crash;
pub mod scan;
pub mod swap;

use ramptx_codec::{CommitMarker, StagingRecord, COMMIT_MARKER_FIELD, STAGING_FIELD};
use ramptx_store::DocumentStore;
use serde::Serialize;

/// A document as the protocol sees it.
#[derive(Debug, Serialize)]
pub struct DocumentView {
    /// Document key.
    pub key: String,
    /// Visible value, lossily decoded as UTF-8.
    pub value: String,
    /// Staging metadata, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<StagedView>,
    /// Timestamps recorded in the commit marker, newest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub committed: Vec<u64>,
}

/// Decoded staging record.
#[derive(Debug, Serialize)]
pub struct StagedView {
    /// Owning transaction.
    pub ts: u64,
    /// Sibling participants.
    pub refs: Vec<String>,
    /// Value promoted on commit.
    pub pending: String,
    /// Whether the document was created for this transaction.
    pub placeholder: bool,
}

/// Reads every document in the store, sorted by key.
pub fn snapshot(store: &dyn DocumentStore) -> Result<Vec<DocumentView>, Box<dyn std::error::Error>> {
    let mut keys = store.keys()?;
    keys.sort();

    let mut views = Vec::with_capacity(keys.len());
    for key in keys {
        let doc = store.get_document(&key)?;
        let staged = doc
            .field(STAGING_FIELD)
            .map(StagingRecord::decode)
            .transpose()?
            .map(|record| StagedView {
                ts: record.timestamp.as_u64(),
                refs: record.participant_refs,
                pending: String::from_utf8_lossy(&record.pending_value).into_owned(),
                placeholder: record.placeholder,
            });
        let committed = match doc.field(COMMIT_MARKER_FIELD) {
            Some(raw) => CommitMarker::decode(raw)?
                .timestamps()
                .iter()
                .map(|ts| ts.as_u64())
                .collect(),
            None => Vec::new(),
        };
        views.push(DocumentView {
            key,
            value: String::from_utf8_lossy(&doc.value).into_owned(),
            staged,
            committed,
        });
    }
    Ok(views)
}

/// Prints documents as an aligned table under a heading.
pub fn print_documents(heading: &str, docs: &[DocumentView]) {
    println!("{heading}");
    if docs.is_empty() {
        println!("  (no documents)");
    }
    for doc in docs {
        let staged = match &doc.staged {
            Some(s) => format!(
                "staged ts:{} pending={:?} refs=[{}]{}",
                s.ts,
                s.pending,
                s.refs.join(", "),
                if s.placeholder { " placeholder" } else { "" }
            ),
            None => "clean".to_string(),
        };
        println!("  {:<12} {:<16} {}", doc.key, format!("{:?}", doc.value), staged);
    }
    println!();
}
