//! # RampTx Store
//!
//! Document store abstraction for RampTx.
//!
//! This crate is the lowest layer: a key-value store that is atomic on one
//! document at a time and knows nothing about transactions. Documents hold
//! an opaque visible value plus named hidden fields, and every mutation
//! bumps a CAS version token.
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing, demos and ephemeral use
//!
//! Network-backed stores implement [`DocumentStore`] outside this workspace.
//!
//! ## Example
//!
//! ```rust
//! use ramptx_store::{DocumentStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! let cas = store.insert("a", b"").unwrap();
//! store.replace("a", b"jeff", Some(cas)).unwrap();
//! assert_eq!(store.get("a").unwrap().value, b"jeff");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{parse_counter, InMemoryStore};
pub use store::{Cas, Document, DocumentStore, Versioned};
