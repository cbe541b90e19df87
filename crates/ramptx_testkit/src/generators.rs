//! Property-based test generators using proptest.
//!
//! Keys and values are drawn so that pending values never collide with
//! original ones, which keeps "which value is visible" unambiguous.

use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for document keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,6}".prop_map(|s| format!("doc:{s}"))
}

/// Strategy for values a document holds before a transaction.
pub fn original_value_strategy() -> impl Strategy<Value = Vec<u8>> {
    "[a-z0-9]{0,12}".prop_map(|s| format!("old-{s}").into_bytes())
}

/// Strategy for values a transaction writes.
pub fn pending_value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..48).prop_map(|bytes| {
        let mut value = b"new-".to_vec();
        value.extend(bytes);
        value
    })
}

/// A transaction and the state of the store before it runs.
#[derive(Debug, Clone)]
pub struct TransactionCase {
    /// Value each participant should hold after commit.
    pub writes: BTreeMap<String, Vec<u8>>,
    /// Value each participant held before, `None` if it did not exist.
    pub originals: BTreeMap<String, Option<Vec<u8>>>,
}

/// Strategy for transactions over `min..=max` distinct documents, some of
/// which exist beforehand.
pub fn transaction_case_strategy(min: usize, max: usize) -> impl Strategy<Value = TransactionCase> {
    prop::collection::btree_map(
        key_strategy(),
        (
            pending_value_strategy(),
            prop::option::of(original_value_strategy()),
        ),
        min..=max,
    )
    .prop_map(|entries| {
        let mut writes = BTreeMap::new();
        let mut originals = BTreeMap::new();
        for (key, (pending, original)) in entries {
            writes.insert(key.clone(), pending);
            originals.insert(key, original);
        }
        TransactionCase { writes, originals }
    })
}
