//! Document store trait definition.

use crate::error::StoreResult;
use std::collections::BTreeMap;
use std::fmt;

/// Version token of a document.
///
/// Every mutation of a document (value or any hidden field) produces a new
/// CAS. Writes that take `Some(cas)` only apply if the document still has
/// that version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cas(pub u64);

impl Cas {
    /// Creates a CAS from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw CAS value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cas:{}", self.0)
    }
}

/// A value read together with the document version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The value.
    pub value: T,
    /// Document CAS at the time of the read.
    pub cas: Cas,
}

/// Full snapshot of a document: visible value plus every hidden field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// The visible value, as returned by a plain `get`.
    pub value: Vec<u8>,
    /// Hidden fields, keyed by name.
    pub fields: BTreeMap<String, Vec<u8>>,
    /// Document CAS at the time of the read.
    pub cas: Cas,
}

impl Document {
    /// Returns the named hidden field, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(Vec::as_slice)
    }
}

/// A key-value document store with single-document atomicity.
///
/// The store has no multi-key primitive. Each call is atomic on one
/// document and reports its outcome as a [`StoreError`](crate::StoreError)
/// code rather than panicking.
///
/// # Hidden fields
///
/// A document carries, besides its visible value, a namespace of named
/// hidden fields. They are never returned by [`get`](Self::get) and are
/// preserved by [`replace`](Self::replace); only the `*_field` operations
/// and [`get_document`](Self::get_document) see them.
///
/// # Failure model
///
/// A call that fails with `Unavailable` may still have been applied by the
/// store. Callers must design each step to be safe to retry.
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - reference implementation
pub trait DocumentStore: Send + Sync {
    /// Returns true if the document exists.
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Reads the visible value.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the document does not exist.
    fn get(&self, key: &str) -> StoreResult<Versioned<Vec<u8>>>;

    /// Reads the visible value and all hidden fields in one atomic lookup.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the document does not exist.
    fn get_document(&self, key: &str) -> StoreResult<Document>;

    /// Creates a document.
    ///
    /// # Errors
    ///
    /// `KeyExists` if the document already exists.
    fn insert(&self, key: &str, value: &[u8]) -> StoreResult<Cas>;

    /// Replaces the visible value, keeping hidden fields intact.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the document does not exist, `CasMismatch` if `cas`
    /// is given and stale.
    fn replace(&self, key: &str, value: &[u8], cas: Option<Cas>) -> StoreResult<Cas>;

    /// Removes the document with all of its hidden fields.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the document does not exist, `CasMismatch` if `cas`
    /// is given and stale.
    fn remove(&self, key: &str, cas: Option<Cas>) -> StoreResult<()>;

    /// Creates a hidden field only if it is absent (insert-if-absent).
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the document does not exist, `FieldExists` if the
    /// field is already present.
    fn insert_field(&self, key: &str, name: &str, value: &[u8]) -> StoreResult<Cas>;

    /// Reads a hidden field.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` or `FieldNotFound`.
    fn get_field(&self, key: &str, name: &str) -> StoreResult<Versioned<Vec<u8>>>;

    /// Creates or overwrites a hidden field.
    ///
    /// # Errors
    ///
    /// `KeyNotFound`, or `CasMismatch` if `cas` is given and stale.
    fn upsert_field(
        &self,
        key: &str,
        name: &str,
        value: &[u8],
        cas: Option<Cas>,
    ) -> StoreResult<Cas>;

    /// Removes a hidden field.
    ///
    /// # Errors
    ///
    /// `KeyNotFound`, `FieldNotFound`, or `CasMismatch` if `cas` is given and
    /// stale.
    fn remove_field(&self, key: &str, name: &str, cas: Option<Cas>) -> StoreResult<Cas>;

    /// Atomically adds `delta` to a counter document and returns the new
    /// value. A missing counter is created with value `delta`.
    ///
    /// # Errors
    ///
    /// `Malformed` if the document exists but is not a counter.
    fn increment(&self, key: &str, delta: u64) -> StoreResult<u64>;

    /// Lists every key in the store.
    fn keys(&self) -> StoreResult<Vec<String>>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    fn exists(&self, key: &str) -> StoreResult<bool> {
        (**self).exists(key)
    }

    fn get(&self, key: &str) -> StoreResult<Versioned<Vec<u8>>> {
        (**self).get(key)
    }

    fn get_document(&self, key: &str) -> StoreResult<Document> {
        (**self).get_document(key)
    }

    fn insert(&self, key: &str, value: &[u8]) -> StoreResult<Cas> {
        (**self).insert(key, value)
    }

    fn replace(&self, key: &str, value: &[u8], cas: Option<Cas>) -> StoreResult<Cas> {
        (**self).replace(key, value, cas)
    }

    fn remove(&self, key: &str, cas: Option<Cas>) -> StoreResult<()> {
        (**self).remove(key, cas)
    }

    fn insert_field(&self, key: &str, name: &str, value: &[u8]) -> StoreResult<Cas> {
        (**self).insert_field(key, name, value)
    }

    fn get_field(&self, key: &str, name: &str) -> StoreResult<Versioned<Vec<u8>>> {
        (**self).get_field(key, name)
    }

    fn upsert_field(
        &self,
        key: &str,
        name: &str,
        value: &[u8],
        cas: Option<Cas>,
    ) -> StoreResult<Cas> {
        (**self).upsert_field(key, name, value, cas)
    }

    fn remove_field(&self, key: &str, name: &str, cas: Option<Cas>) -> StoreResult<Cas> {
        (**self).remove_field(key, name, cas)
    }

    fn increment(&self, key: &str, delta: u64) -> StoreResult<u64> {
        (**self).increment(key, delta)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        (**self).keys()
    }
}
