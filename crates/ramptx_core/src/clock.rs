//! Transaction timestamp sources.
//!
//! A timestamp is a transaction's only identity, so a source must never
//! hand out the same value twice and must hand them out in increasing
//! order. `current` is what staleness is measured against.

use crate::config::RetryConfig;
use crate::error::CoreResult;
use crate::retry::with_retry;
use ramptx_codec::Timestamp;
use ramptx_store::{parse_counter, DocumentStore, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonic source of transaction timestamps.
pub trait TimestampSource: Send + Sync {
    /// Issues a fresh timestamp, strictly greater than any issued before.
    fn next(&self) -> CoreResult<Timestamp>;

    /// Returns the most recently issued timestamp without issuing one.
    fn current(&self) -> CoreResult<Timestamp>;
}

/// Process-wide counter.
///
/// Only meaningful when every coordinator touching the store shares the
/// same instance; use [`StoreClock`] across processes.
#[derive(Debug, Default)]
pub struct AtomicClock {
    last: AtomicU64,
}

impl AtomicClock {
    /// Creates a clock whose first timestamp is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock whose first timestamp is `last + 1`.
    #[must_use]
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Moves the clock forward by `ticks` without issuing timestamps.
    pub fn advance(&self, ticks: u64) {
        self.last.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl TimestampSource for AtomicClock {
    fn next(&self) -> CoreResult<Timestamp> {
        Ok(Timestamp::new(self.last.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn current(&self) -> CoreResult<Timestamp> {
        Ok(Timestamp::new(self.last.load(Ordering::SeqCst)))
    }
}

/// Counter document kept in the store itself.
///
/// Every process sharing the store shares the sequence, which makes
/// staleness comparable across coordinators.
pub struct StoreClock {
    store: Arc<dyn DocumentStore>,
    key: String,
    retry: RetryConfig,
}

impl StoreClock {
    /// Default key of the counter document.
    pub const DEFAULT_KEY: &'static str = "ramptx::counter";

    /// Creates a clock backed by the default counter document.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_key(store, Self::DEFAULT_KEY)
    }

    /// Creates a clock backed by the counter document `key`.
    pub fn with_key(store: Arc<dyn DocumentStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the retry policy for counter calls.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl TimestampSource for StoreClock {
    fn next(&self) -> CoreResult<Timestamp> {
        // A retried increment may skip a value; the sequence stays increasing.
        let raw = with_retry(&self.retry, "increment", &self.key, || {
            self.store.increment(&self.key, 1)
        })?;
        Ok(Timestamp::new(raw))
    }

    fn current(&self) -> CoreResult<Timestamp> {
        match with_retry(&self.retry, "get", &self.key, || self.store.get(&self.key)) {
            Ok(doc) => Ok(Timestamp::new(parse_counter(&self.key, &doc.value)?)),
            Err(StoreError::KeyNotFound { .. }) => Ok(Timestamp::default()),
            Err(err) => Err(err.into()),
        }
    }
}

impl std::fmt::Debug for StoreClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClock")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
