//! Commit marker: evidence that promotion of a transaction started on a
//! document.

use crate::error::{CodecError, CodecResult};
use crate::record::{as_map, from_bytes, get_u64, require, text, to_bytes, Timestamp};
use ciborium::Value;

const COMMITTED: &str = "committed";

/// Bounded history of transactions whose commit began on a document.
///
/// Entries are kept newest first. Once a timestamp is recorded here the
/// transaction must never be rolled back on any participant, so an entry is
/// only evicted once it is old enough that no sibling can still be waiting
/// on it as evidence.
///
/// Wire format: CBOR map `{"committed": [uint, ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitMarker {
    committed: Vec<Timestamp>,
}

impl CommitMarker {
    /// Creates an empty marker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `timestamp` is recorded.
    #[must_use]
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.committed.contains(&timestamp)
    }

    /// Records `timestamp`, then trims the history back towards `capacity`
    /// entries.
    ///
    /// The oldest entry is only evicted once it is at least `retain_ticks`
    /// older than the newest one, so the marker can grow past `capacity`
    /// under a burst of commits. Recording a timestamp that is already
    /// present is a no-op.
    pub fn record(&mut self, timestamp: Timestamp, capacity: usize, retain_ticks: u64) {
        if self.contains(timestamp) {
            return;
        }
        let at = self.committed.partition_point(|ts| *ts > timestamp);
        self.committed.insert(at, timestamp);

        let newest = self.committed.first().copied().unwrap_or(timestamp);
        while self.committed.len() > capacity.max(1) {
            match self.committed.last() {
                Some(oldest) if oldest.ticks_until(newest) >= retain_ticks => {
                    self.committed.pop();
                }
                _ => break,
            }
        }
    }

    /// Returns the recorded timestamps, newest first.
    #[must_use]
    pub fn timestamps(&self) -> &[Timestamp] {
        &self.committed
    }

    /// Returns the most recently recorded timestamp.
    #[must_use]
    pub fn latest(&self) -> Option<Timestamp> {
        self.committed.first().copied()
    }

    /// Encodes the marker to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let list = self
            .committed
            .iter()
            .map(|ts| Value::Integer(ts.as_u64().into()))
            .collect();
        to_bytes(&Value::Map(vec![(text(COMMITTED), Value::Array(list))]))
    }

    /// Decodes a marker from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid marker.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_bytes(bytes)?;
        let committed = require(as_map(&value)?, COMMITTED)?
            .as_array()
            .ok_or(CodecError::InvalidField {
                field: COMMITTED,
                expected: "array",
            })?
            .iter()
            .map(|v| get_u64(v, COMMITTED).map(Timestamp::new))
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self { committed })
    }
}
