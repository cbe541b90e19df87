//! The staging record attached to a participant document.

use crate::error::{CodecError, CodecResult};
use ciborium::Value;
use std::fmt;

/// Logical transaction timestamp.
///
/// Timestamps are issued by a monotonic counter. They identify a
/// transaction and order transactions against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a timestamp from a raw counter value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Number of ticks from `self` up to `later`, zero if `later` is older.
    #[must_use]
    pub const fn ticks_until(self, later: Timestamp) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts:{}", self.0)
    }
}

const TS: &str = "ts";
const REFS: &str = "md";
const VALUE: &str = "value";
const PLACEHOLDER: &str = "ph";

/// Hidden per-document record of an in-flight transaction.
///
/// Wire format is a CBOR map:
///
/// | key     | type          | meaning                                    |
/// |---------|---------------|--------------------------------------------|
/// | `ts`    | uint          | transaction timestamp                      |
/// | `md`    | array of text | keys of the other participants             |
/// | `value` | bytes         | value to promote on commit                 |
/// | `ph`    | bool          | document was created empty for this record |
///
/// `ph` is optional on decode and defaults to `false`. Unknown keys are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingRecord {
    /// Transaction that owns the document.
    pub timestamp: Timestamp,
    /// Keys of the sibling participants, in transaction order.
    pub participant_refs: Vec<String>,
    /// Value that becomes visible on commit.
    pub pending_value: Vec<u8>,
    /// True if the stager inserted the document as an empty placeholder.
    pub placeholder: bool,
}

impl StagingRecord {
    /// Creates a record for an existing document.
    pub fn new(timestamp: Timestamp, participant_refs: Vec<String>, pending_value: Vec<u8>) -> Self {
        Self {
            timestamp,
            participant_refs,
            pending_value,
            placeholder: false,
        }
    }

    /// Marks the record as belonging to a placeholder document.
    #[must_use]
    pub fn with_placeholder(mut self, placeholder: bool) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Encodes the record to CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let refs = self
            .participant_refs
            .iter()
            .map(|key| Value::Text(key.clone()))
            .collect();
        let map = Value::Map(vec![
            (text(TS), Value::Integer(self.timestamp.as_u64().into())),
            (text(REFS), Value::Array(refs)),
            (text(VALUE), Value::Bytes(self.pending_value.clone())),
            (text(PLACEHOLDER), Value::Bool(self.placeholder)),
        ]);
        to_bytes(&map)
    }

    /// Decodes a record from CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not CBOR or a required entry is
    /// missing or mistyped.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_bytes(bytes)?;
        let entries = as_map(&value)?;

        let timestamp = Timestamp::new(get_u64(require(entries, TS)?, TS)?);

        let participant_refs = require(entries, REFS)?
            .as_array()
            .ok_or(CodecError::InvalidField {
                field: REFS,
                expected: "array",
            })?
            .iter()
            .map(|item| {
                item.as_text()
                    .map(str::to_string)
                    .ok_or(CodecError::InvalidField {
                        field: REFS,
                        expected: "array of text",
                    })
            })
            .collect::<CodecResult<Vec<_>>>()?;

        let pending_value = require(entries, VALUE)?
            .as_bytes()
            .cloned()
            .ok_or(CodecError::InvalidField {
                field: VALUE,
                expected: "bytes",
            })?;

        let placeholder = match lookup(entries, PLACEHOLDER) {
            None => false,
            Some(v) => v.as_bool().ok_or(CodecError::InvalidField {
                field: PLACEHOLDER,
                expected: "bool",
            })?,
        };

        Ok(Self {
            timestamp,
            participant_refs,
            pending_value,
            placeholder,
        })
    }
}

pub(crate) fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

pub(crate) fn to_bytes(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn from_bytes(bytes: &[u8]) -> CodecResult<Value> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

pub(crate) fn as_map(value: &Value) -> CodecResult<&[(Value, Value)]> {
    value
        .as_map()
        .map(Vec::as_slice)
        .ok_or_else(|| CodecError::decoding_failed("expected a CBOR map"))
}

pub(crate) fn lookup<'a>(entries: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| k.as_text() == Some(name))
        .map(|(_, v)| v)
}

pub(crate) fn require<'a>(
    entries: &'a [(Value, Value)],
    name: &'static str,
) -> CodecResult<&'a Value> {
    lookup(entries, name).ok_or(CodecError::MissingField { field: name })
}

pub(crate) fn get_u64(value: &Value, field: &'static str) -> CodecResult<u64> {
    value
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or(CodecError::InvalidField {
            field,
            expected: "unsigned integer",
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap_record() -> StagingRecord {
        StagingRecord::new(Timestamp::new(7), vec!["b".to_string()], b"jeff".to_vec())
    }

    #[test]
    fn decode_returns_what_was_encoded() {
        let record = swap_record().with_placeholder(true);
        let bytes = record.encode().unwrap();
        assert_eq!(StagingRecord::decode(&bytes).unwrap(), record);
    }

    #[test]
    fn pending_value_is_a_byte_string() {
        let bytes = swap_record().encode().unwrap();
        let value: Value = ciborium::from_reader(bytes.as_slice()).unwrap();
        let entries = value.as_map().unwrap();
        assert_eq!(
            lookup(entries, VALUE).and_then(Value::as_bytes),
            Some(&b"jeff".to_vec())
        );
    }

    #[test]
    fn missing_placeholder_defaults_to_false() {
        let map = Value::Map(vec![
            (text(TS), Value::Integer(3u64.into())),
            (text(REFS), Value::Array(vec![text("a")])),
            (text(VALUE), Value::Bytes(vec![1, 2])),
        ]);
        let record = StagingRecord::decode(&to_bytes(&map).unwrap()).unwrap();
        assert!(!record.placeholder);
        assert_eq!(record.participant_refs, vec!["a".to_string()]);
    }

    #[test]
    fn unknown_entries_are_ignored() {
        let map = Value::Map(vec![
            (text("extra"), Value::Null),
            (text(TS), Value::Integer(3u64.into())),
            (text(REFS), Value::Array(vec![])),
            (text(VALUE), Value::Bytes(vec![])),
        ]);
        assert!(StagingRecord::decode(&to_bytes(&map).unwrap()).is_ok());
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        let map = Value::Map(vec![
            (text(REFS), Value::Array(vec![])),
            (text(VALUE), Value::Bytes(vec![])),
        ]);
        let err = StagingRecord::decode(&to_bytes(&map).unwrap()).unwrap_err();
        assert_eq!(err, CodecError::MissingField { field: TS });
    }

    #[test]
    fn negative_timestamp_is_rejected() {
        let map = Value::Map(vec![
            (text(TS), Value::Integer((-1i64).into())),
            (text(REFS), Value::Array(vec![])),
            (text(VALUE), Value::Bytes(vec![])),
        ]);
        let err = StagingRecord::decode(&to_bytes(&map).unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { field: TS, .. }));
    }

    #[test]
    fn non_text_reference_is_rejected() {
        let map = Value::Map(vec![
            (text(TS), Value::Integer(1u64.into())),
            (text(REFS), Value::Array(vec![Value::Integer(1u64.into())])),
            (text(VALUE), Value::Bytes(vec![])),
        ]);
        let err = StagingRecord::decode(&to_bytes(&map).unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { field: REFS, .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(StagingRecord::decode(b"").is_err());
        assert!(StagingRecord::decode(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn timestamp_ticks_saturate() {
        let old = Timestamp::new(5);
        assert_eq!(old.ticks_until(Timestamp::new(9)), 4);
        assert_eq!(Timestamp::new(9).ticks_until(old), 0);
        assert_eq!(format!("{old}"), "ts:5");
    }
}
