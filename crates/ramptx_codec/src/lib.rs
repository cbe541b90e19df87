//! # RampTx Codec
//!
//! Wire format of the hidden metadata RampTx attaches to documents.
//!
//! Two records live in a document's hidden field namespace:
//!
//! - [`StagingRecord`] - the in-flight transaction that owns the document:
//!   its timestamp, the sibling participant keys and the pending value.
//! - [`CommitMarker`] - timestamps of transactions whose promotion has
//!   started on the document.
//!
//! Both are CBOR maps with short text keys. Payloads are carried as CBOR
//! byte strings, so the codec never interprets application values.
//!
//! ## Usage
//!
//! ```
//! use ramptx_codec::{StagingRecord, Timestamp};
//!
//! let record = StagingRecord::new(Timestamp::new(7), vec!["b".into()], b"jeff".to_vec());
//! let bytes = record.encode().unwrap();
//! assert_eq!(StagingRecord::decode(&bytes).unwrap(), record);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod marker;
mod record;

pub use error::{CodecError, CodecResult};
pub use marker::CommitMarker;
pub use record::{StagingRecord, Timestamp};

/// Hidden field holding the [`StagingRecord`].
pub const STAGING_FIELD: &str = "txn";

/// Hidden field holding the [`CommitMarker`].
pub const COMMIT_MARKER_FIELD: &str = "txn_commit";
