//! In-memory document store.

use crate::error::{StoreError, StoreResult};
use crate::store::{Cas, Document, DocumentStore, Versioned};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
struct Entry {
    value: Vec<u8>,
    fields: BTreeMap<String, Vec<u8>>,
    cas: u64,
}

#[derive(Debug, Default)]
struct Inner {
    docs: HashMap<String, Entry>,
    next_cas: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_cas += 1;
        self.next_cas
    }

    fn entry_mut(&mut self, key: &str, cas: Option<Cas>) -> StoreResult<&mut Entry> {
        let entry = self
            .docs
            .get_mut(key)
            .ok_or_else(|| StoreError::key_not_found(key))?;
        check_cas(key, entry, cas)?;
        Ok(entry)
    }
}

fn check_cas(key: &str, entry: &Entry, cas: Option<Cas>) -> StoreResult<()> {
    match cas {
        Some(expected) if expected.as_u64() != entry.cas => Err(StoreError::CasMismatch {
            key: key.to_string(),
            expected: expected.as_u64(),
            actual: entry.cas,
        }),
        _ => Ok(()),
    }
}

/// An in-memory document store.
///
/// Every operation takes the single lock for the duration of one document
/// mutation, which gives the per-document atomicity a real store offers and
/// nothing more. Suitable for:
/// - Unit and integration tests
/// - Demos and the CLI
///
/// # Example
///
/// ```rust
/// use ramptx_store::{DocumentStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// store.insert("a", b"").unwrap();
/// store.insert_field("a", "txn", b"staged").unwrap();
/// assert!(store.insert_field("a", "txn", b"other").is_err());
/// assert_eq!(store.get("a").unwrap().value, b"");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().docs.len()
    }

    /// Returns true if the store holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().docs.is_empty()
    }

    /// Removes every document.
    pub fn clear(&self) {
        self.inner.write().docs.clear();
    }
}

impl DocumentStore for InMemoryStore {
    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.inner.read().docs.contains_key(key))
    }

    fn get(&self, key: &str) -> StoreResult<Versioned<Vec<u8>>> {
        let inner = self.inner.read();
        let entry = inner
            .docs
            .get(key)
            .ok_or_else(|| StoreError::key_not_found(key))?;
        Ok(Versioned {
            value: entry.value.clone(),
            cas: Cas::new(entry.cas),
        })
    }

    fn get_document(&self, key: &str) -> StoreResult<Document> {
        let inner = self.inner.read();
        let entry = inner
            .docs
            .get(key)
            .ok_or_else(|| StoreError::key_not_found(key))?;
        Ok(Document {
            value: entry.value.clone(),
            fields: entry.fields.clone(),
            cas: Cas::new(entry.cas),
        })
    }

    fn insert(&self, key: &str, value: &[u8]) -> StoreResult<Cas> {
        let mut inner = self.inner.write();
        if inner.docs.contains_key(key) {
            return Err(StoreError::key_exists(key));
        }
        let cas = inner.bump();
        inner.docs.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                fields: BTreeMap::new(),
                cas,
            },
        );
        Ok(Cas::new(cas))
    }

    fn replace(&self, key: &str, value: &[u8], cas: Option<Cas>) -> StoreResult<Cas> {
        let mut inner = self.inner.write();
        let next = inner.next_cas + 1;
        let entry = inner.entry_mut(key, cas)?;
        entry.value = value.to_vec();
        entry.cas = next;
        inner.next_cas = next;
        Ok(Cas::new(next))
    }

    fn remove(&self, key: &str, cas: Option<Cas>) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.entry_mut(key, cas)?;
        inner.docs.remove(key);
        Ok(())
    }

    fn insert_field(&self, key: &str, name: &str, value: &[u8]) -> StoreResult<Cas> {
        let mut inner = self.inner.write();
        let next = inner.next_cas + 1;
        let entry = inner.entry_mut(key, None)?;
        if entry.fields.contains_key(name) {
            return Err(StoreError::field_exists(key, name));
        }
        entry.fields.insert(name.to_string(), value.to_vec());
        entry.cas = next;
        inner.next_cas = next;
        Ok(Cas::new(next))
    }

    fn get_field(&self, key: &str, name: &str) -> StoreResult<Versioned<Vec<u8>>> {
        let inner = self.inner.read();
        let entry = inner
            .docs
            .get(key)
            .ok_or_else(|| StoreError::key_not_found(key))?;
        let value = entry
            .fields
            .get(name)
            .ok_or_else(|| StoreError::field_not_found(key, name))?;
        Ok(Versioned {
            value: value.clone(),
            cas: Cas::new(entry.cas),
        })
    }

    fn upsert_field(
        &self,
        key: &str,
        name: &str,
        value: &[u8],
        cas: Option<Cas>,
    ) -> StoreResult<Cas> {
        let mut inner = self.inner.write();
        let next = inner.next_cas + 1;
        let entry = inner.entry_mut(key, cas)?;
        entry.fields.insert(name.to_string(), value.to_vec());
        entry.cas = next;
        inner.next_cas = next;
        Ok(Cas::new(next))
    }

    fn remove_field(&self, key: &str, name: &str, cas: Option<Cas>) -> StoreResult<Cas> {
        let mut inner = self.inner.write();
        let next = inner.next_cas + 1;
        let entry = inner.entry_mut(key, cas)?;
        if entry.fields.remove(name).is_none() {
            return Err(StoreError::field_not_found(key, name));
        }
        entry.cas = next;
        inner.next_cas = next;
        Ok(Cas::new(next))
    }

    fn increment(&self, key: &str, delta: u64) -> StoreResult<u64> {
        let mut inner = self.inner.write();
        let cas = inner.bump();
        let entry = inner.docs.entry(key.to_string()).or_default();
        let current = if entry.value.is_empty() && entry.cas == 0 {
            0
        } else {
            parse_counter(key, &entry.value)?
        };
        let updated = current.saturating_add(delta);
        entry.value = updated.to_string().into_bytes();
        entry.cas = cas;
        Ok(updated)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self.inner.read().docs.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Parses the decimal representation a counter document holds.
///
/// # Errors
///
/// `Malformed` if the bytes are not an unsigned decimal number.
pub fn parse_counter(key: &str, value: &[u8]) -> StoreResult<u64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| StoreError::Malformed {
            key: key.to_string(),
            message: "counter value is not an unsigned integer".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn insert_then_get() {
        let store = InMemoryStore::new();
        store.insert("a", b"hello").unwrap();
        assert!(store.exists("a").unwrap());
        assert_eq!(store.get("a").unwrap().value, b"hello");
    }

    #[test]
    fn insert_existing_fails() {
        let store = InMemoryStore::new();
        store.insert("a", b"").unwrap();
        let result = store.insert("a", b"x");
        assert!(matches!(result, Err(StoreError::KeyExists { .. })));
    }

    #[test]
    fn get_missing_is_key_not_found() {
        let store = InMemoryStore::new();
        assert!(store.get("nope").unwrap_err().is_key_not_found());
    }

    #[test]
    fn fields_are_hidden_from_get() {
        let store = InMemoryStore::new();
        store.insert("a", b"visible").unwrap();
        store.insert_field("a", "txn", b"hidden").unwrap();

        assert_eq!(store.get("a").unwrap().value, b"visible");
        assert_eq!(store.get_field("a", "txn").unwrap().value, b"hidden");

        let doc = store.get_document("a").unwrap();
        assert_eq!(doc.field("txn"), Some(&b"hidden"[..]));
    }

    #[test]
    fn insert_field_is_insert_if_absent() {
        let store = InMemoryStore::new();
        store.insert("a", b"").unwrap();
        store.insert_field("a", "txn", b"one").unwrap();

        let result = store.insert_field("a", "txn", b"two");
        assert!(matches!(result, Err(StoreError::FieldExists { .. })));
        assert_eq!(store.get_field("a", "txn").unwrap().value, b"one");
    }

    #[test]
    fn insert_field_on_missing_document() {
        let store = InMemoryStore::new();
        let result = store.insert_field("a", "txn", b"x");
        assert!(result.unwrap_err().is_key_not_found());
    }

    #[test]
    fn replace_preserves_fields() {
        let store = InMemoryStore::new();
        store.insert("a", b"").unwrap();
        store.insert_field("a", "txn", b"meta").unwrap();
        store.replace("a", b"new", None).unwrap();

        assert_eq!(store.get("a").unwrap().value, b"new");
        assert_eq!(store.get_field("a", "txn").unwrap().value, b"meta");
    }

    #[test]
    fn every_mutation_changes_cas() {
        let store = InMemoryStore::new();
        let c1 = store.insert("a", b"").unwrap();
        let c2 = store.insert_field("a", "txn", b"m").unwrap();
        let c3 = store.replace("a", b"v", None).unwrap();
        let c4 = store.remove_field("a", "txn", None).unwrap();
        assert!(c1 < c2 && c2 < c3 && c3 < c4);
        assert_eq!(store.get("a").unwrap().cas, c4);
    }

    #[test]
    fn stale_cas_is_rejected() {
        let store = InMemoryStore::new();
        let stale = store.insert("a", b"").unwrap();
        store.replace("a", b"x", None).unwrap();

        let result = store.replace("a", b"y", Some(stale));
        assert!(result.unwrap_err().is_cas_mismatch());
        assert!(store.remove_field("a", "txn", Some(stale)).unwrap_err().is_cas_mismatch());
        assert!(store.remove("a", Some(stale)).unwrap_err().is_cas_mismatch());
        assert_eq!(store.get("a").unwrap().value, b"x");
    }

    #[test]
    fn upsert_field_overwrites() {
        let store = InMemoryStore::new();
        store.insert("a", b"").unwrap();
        store.upsert_field("a", "m", b"1", None).unwrap();
        store.upsert_field("a", "m", b"2", None).unwrap();
        assert_eq!(store.get_field("a", "m").unwrap().value, b"2");
    }

    #[test]
    fn remove_field_missing() {
        let store = InMemoryStore::new();
        store.insert("a", b"").unwrap();
        assert!(store.remove_field("a", "txn", None).unwrap_err().is_field_not_found());
    }

    #[test]
    fn remove_drops_fields() {
        let store = InMemoryStore::new();
        store.insert("a", b"").unwrap();
        store.insert_field("a", "txn", b"m").unwrap();
        store.remove("a", None).unwrap();
        assert!(!store.exists("a").unwrap());

        store.insert("a", b"").unwrap();
        assert!(store.get_field("a", "txn").unwrap_err().is_field_not_found());
    }

    #[test]
    fn increment_creates_and_counts() {
        let store = InMemoryStore::new();
        assert_eq!(store.increment("counter", 1).unwrap(), 1);
        assert_eq!(store.increment("counter", 1).unwrap(), 2);
        assert_eq!(store.increment("counter", 5).unwrap(), 7);
        assert_eq!(store.get("counter").unwrap().value, b"7");
    }

    #[test]
    fn increment_non_counter_fails() {
        let store = InMemoryStore::new();
        store.insert("a", b"not a number").unwrap();
        let result = store.increment("a", 1);
        assert!(matches!(result, Err(StoreError::Malformed { .. })));
    }

    #[test]
    fn keys_are_sorted() {
        let store = InMemoryStore::new();
        store.insert("b", b"").unwrap();
        store.insert("a", b"").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
