//! Fault injection for protocol testing.
//!
//! [`FaultyStore`] wraps a healthy store and makes it misbehave the way a
//! remote store does:
//!
//! 1. **Transient failures** - calls fail with `Unavailable` without
//!    reaching the store
//! 2. **Lost replies** - mutations are applied but reported as
//!    `Unavailable`, so the caller cannot tell whether they landed
//! 3. **Crash** - after a number of mutations every call fails, as if the
//!    coordinator process had died
//!
//! Recovery is then run against the wrapped store directly, playing the
//! part of a different, healthy process.
//!
//! ## Usage
//!
//! ```rust
//! use ramptx_store::{DocumentStore, InMemoryStore};
//! use ramptx_testkit::crash::FaultyStore;
//! use std::sync::Arc;
//!
//! let inner = Arc::new(InMemoryStore::new());
//! let faulty = FaultyStore::new(inner.clone());
//! faulty.crash_after(1);
//!
//! assert!(faulty.insert("a", b"1").is_ok());
//! assert!(faulty.insert("b", b"2").is_err());
//! assert!(faulty.has_crashed());
//! assert!(!inner.exists("b").unwrap());
//! ```

use ramptx_store::{Cas, Document, DocumentStore, StoreError, StoreResult, Versioned};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A store wrapper that injects failures.
pub struct FaultyStore {
    inner: Arc<dyn DocumentStore>,
    crash_after_mutations: AtomicUsize,
    mutations: AtomicUsize,
    crashed: AtomicBool,
    fail_next: AtomicUsize,
    lose_next: AtomicUsize,
}

impl FaultyStore {
    /// Creates a healthy wrapper around `inner`.
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            crash_after_mutations: AtomicUsize::new(usize::MAX),
            mutations: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            lose_next: AtomicUsize::new(0),
        }
    }

    /// Crashes once `mutations` more mutating calls have reached the store.
    pub fn crash_after(&self, mutations: usize) {
        let done = self.mutations.load(Ordering::SeqCst);
        self.crash_after_mutations
            .store(done.saturating_add(mutations), Ordering::SeqCst);
    }

    /// Fails the next `calls` calls, reads included, before they reach the
    /// store.
    pub fn fail_next(&self, calls: usize) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    /// Applies the next `mutations` mutating calls but reports them as
    /// failed.
    pub fn lose_next_replies(&self, mutations: usize) {
        self.lose_next.store(mutations, Ordering::SeqCst);
    }

    /// Clears every injected fault.
    pub fn reset(&self) {
        self.crash_after_mutations
            .store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_next.store(0, Ordering::SeqCst);
        self.lose_next.store(0, Ordering::SeqCst);
    }

    /// Returns whether the simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns how many mutating calls reached the store.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &Arc<dyn DocumentStore> {
        &self.inner
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read<T>(&self, call: impl FnOnce(&dyn DocumentStore) -> StoreResult<T>) -> StoreResult<T> {
        if self.has_crashed() {
            return Err(StoreError::unavailable("crashed"));
        }
        if Self::take(&self.fail_next) {
            return Err(StoreError::unavailable("injected failure"));
        }
        call(self.inner.as_ref())
    }

    fn mutate<T>(&self, call: impl FnOnce(&dyn DocumentStore) -> StoreResult<T>) -> StoreResult<T> {
        if self.has_crashed() {
            return Err(StoreError::unavailable("crashed"));
        }
        if self.mutations.load(Ordering::SeqCst) >= self.crash_after_mutations.load(Ordering::SeqCst)
        {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(StoreError::unavailable("crashed"));
        }
        if Self::take(&self.fail_next) {
            return Err(StoreError::unavailable("injected failure"));
        }

        self.mutations.fetch_add(1, Ordering::SeqCst);
        let result = call(self.inner.as_ref());
        if Self::take(&self.lose_next) {
            return Err(StoreError::unavailable("reply lost"));
        }
        result
    }
}

impl DocumentStore for FaultyStore {
    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.read(|s| s.exists(key))
    }

    fn get(&self, key: &str) -> StoreResult<Versioned<Vec<u8>>> {
        self.read(|s| s.get(key))
    }

    fn get_document(&self, key: &str) -> StoreResult<Document> {
        self.read(|s| s.get_document(key))
    }

    fn insert(&self, key: &str, value: &[u8]) -> StoreResult<Cas> {
        self.mutate(|s| s.insert(key, value))
    }

    fn replace(&self, key: &str, value: &[u8], cas: Option<Cas>) -> StoreResult<Cas> {
        self.mutate(|s| s.replace(key, value, cas))
    }

    fn remove(&self, key: &str, cas: Option<Cas>) -> StoreResult<()> {
        self.mutate(|s| s.remove(key, cas))
    }

    fn insert_field(&self, key: &str, name: &str, value: &[u8]) -> StoreResult<Cas> {
        self.mutate(|s| s.insert_field(key, name, value))
    }

    fn get_field(&self, key: &str, name: &str) -> StoreResult<Versioned<Vec<u8>>> {
        self.read(|s| s.get_field(key, name))
    }

    fn upsert_field(
        &self,
        key: &str,
        name: &str,
        value: &[u8],
        cas: Option<Cas>,
    ) -> StoreResult<Cas> {
        self.mutate(|s| s.upsert_field(key, name, value, cas))
    }

    fn remove_field(&self, key: &str, name: &str, cas: Option<Cas>) -> StoreResult<Cas> {
        self.mutate(|s| s.remove_field(key, name, cas))
    }

    fn increment(&self, key: &str, delta: u64) -> StoreResult<u64> {
        self.mutate(|s| s.increment(key, delta))
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.read(|s| s.keys())
    }
}

impl std::fmt::Debug for FaultyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyStore")
            .field("mutations", &self.mutations())
            .field("crashed", &self.has_crashed())
            .finish_non_exhaustive()
    }
}
