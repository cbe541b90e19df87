//! Test fixtures and store helpers.
//!
//! [`TestWorld`] wires a coordinator to a [`FaultyStore`] and a recovery
//! scanner to the healthy store underneath it, sharing one clock.

use crate::crash::FaultyStore;
use ramptx_codec::STAGING_FIELD;
use ramptx_core::{
    AtomicClock, Config, RecoveryScanner, Resolution, RetryConfig, TransactionCoordinator,
};
use ramptx_store::{DocumentStore, InMemoryStore};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Staleness threshold used by [`test_config`].
pub const TEST_STALENESS: u64 = 8;

/// Configuration for tests: short staleness, retries without sleeping.
pub fn test_config() -> Config {
    Config::new()
        .staleness_threshold(TEST_STALENESS)
        .retry(RetryConfig::immediate(3))
}

/// How much of a transaction is visible after recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Every participant shows its pending value.
    All,
    /// Every participant shows its original value.
    Nothing,
    /// Atomicity violated: these participants show the pending value while
    /// others do not.
    Mixed(Vec<String>),
}

/// A store, a faulty view of it, and a shared clock.
pub struct TestWorld {
    /// The healthy store.
    pub store: Arc<InMemoryStore>,
    /// The view coordinators write through.
    pub faulty: Arc<FaultyStore>,
    /// Clock shared by coordinators and recovery.
    pub clock: Arc<AtomicClock>,
    /// Configuration handed to every component.
    pub config: Config,
}

impl TestWorld {
    /// Creates a world with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Creates a world with a custom configuration.
    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            faulty: Arc::new(FaultyStore::new(store.clone())),
            store,
            clock: Arc::new(AtomicClock::new()),
            config,
        }
    }

    /// A coordinator writing through the faulty store.
    pub fn coordinator(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(
            self.faulty.clone(),
            self.clock.clone(),
            self.config.clone(),
        )
    }

    /// A recovery scanner on the healthy store.
    pub fn recovery(&self) -> RecoveryScanner {
        RecoveryScanner::new(self.store.clone(), self.clock.clone(), self.config.clone())
    }

    /// Inserts documents directly into the healthy store.
    pub fn seed<K, V>(&self, docs: impl IntoIterator<Item = (K, V)>)
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        for (key, value) in docs {
            self.store
                .insert(key.as_ref(), value.as_ref())
                .expect("Failed to seed document");
        }
    }

    /// Advances the clock far enough for every staged record to be
    /// abandoned.
    pub fn age_out(&self) {
        self.clock.advance(self.config.staleness_threshold);
    }

    /// Ages everything out and resolves it from a healthy process.
    pub fn recover(&self) -> Vec<Resolution> {
        self.age_out();
        self.recovery()
            .resolve_abandoned()
            .expect("Recovery sweep failed")
    }

    /// Visible value of `key`, `None` if the document does not exist.
    pub fn visible(&self, key: &str) -> Option<Vec<u8>> {
        self.store.get(key).ok().map(|v| v.value)
    }

    /// Keys still carrying a staging record, sorted.
    pub fn staged_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .store
            .keys()
            .expect("Failed to list keys")
            .into_iter()
            .filter(|key| self.store.get_field(key, STAGING_FIELD).is_ok())
            .collect();
        keys.sort();
        keys
    }

    /// Compares visible values against a transaction's writes.
    ///
    /// `originals` holds each participant's value before the transaction,
    /// `None` for documents that did not exist. Such a document counts as
    /// original when it is absent or an empty placeholder.
    pub fn applied(
        &self,
        writes: &BTreeMap<String, Vec<u8>>,
        originals: &BTreeMap<String, Option<Vec<u8>>>,
    ) -> Applied {
        let mut pending = Vec::new();
        let mut original = 0;

        for (key, value) in writes {
            let visible = self.visible(key);
            if visible.as_ref() == Some(value) {
                pending.push(key.clone());
            } else if is_original(visible.as_deref(), originals.get(key).cloned().flatten()) {
                original += 1;
            }
        }

        if pending.len() == writes.len() {
            Applied::All
        } else if original == writes.len() {
            Applied::Nothing
        } else {
            Applied::Mixed(pending)
        }
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

fn is_original(visible: Option<&[u8]>, original: Option<Vec<u8>>) -> bool {
    match (visible, original) {
        (None, None) => true,
        (Some(v), None) => v.is_empty(),
        (Some(v), Some(o)) => v == o.as_slice(),
        (None, Some(_)) => false,
    }
}
