//! Message envelope and stream entry types
//!
//! A payload is stored as a single JSON-encoded field, `messageBody`, inside
//! a stream entry. Entries are identified by the store-assigned id
//! (`"<unix_ms>-<seq>"`), which is also the delivery handle used for
//! acknowledgment.

use crate::error::QueueError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the field holding the encoded payload
pub const MESSAGE_BODY_FIELD: &str = "messageBody";

/// Flat list of field/value pairs as stored in an entry
pub type Fields = Vec<(String, String)>;

/// Store-assigned entry identifier (e.g., "1712345678901-0")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the id into its millisecond and sequence parts
    fn parts(&self) -> Option<(u64, u64)> {
        let (ms, seq) = self.0.split_once('-')?;
        Some((ms.parse().ok()?, seq.parse().ok()?))
    }

    /// When the entry was appended, parsed from the id
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let (ms, _) = self.parts()?;
        DateTime::from_timestamp_millis(i64::try_from(ms).ok()?)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl PartialOrd for EntryId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Numeric order on (ms, seq); ids that do not parse sort lexically after valid ones
impl Ord for EntryId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self.parts(), other.parts()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

/// A raw entry as returned by the log store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub id: EntryId,
    pub fields: Fields,
}

impl StoreEntry {
    pub fn new(id: impl Into<EntryId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Look up a field value by name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Decode the `messageBody` field into `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<QueueMessage<T>, QueueError> {
        let raw = self
            .field(MESSAGE_BODY_FIELD)
            .ok_or_else(|| QueueError::Decode {
                stream_id: self.id.to_string(),
                message: format!(
                    "missing '{}' field (fields: {:?})",
                    MESSAGE_BODY_FIELD,
                    self.fields.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>()
                ),
            })?;

        let body = serde_json::from_str::<T>(raw).map_err(|e| QueueError::Decode {
            stream_id: self.id.to_string(),
            message: e.to_string(),
        })?;

        Ok(QueueMessage::new(self.id.clone(), body))
    }
}

/// Encode a payload into the wire field list
pub fn encode_envelope<T: Serialize + ?Sized>(payload: &T) -> Result<Fields, QueueError> {
    let body = serde_json::to_string(payload)?;
    Ok(vec![(MESSAGE_BODY_FIELD.to_string(), body)])
}

/// A delivered message: its stream id plus the decoded payload
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage<T> {
    /// Entry id, used for acknowledgment
    pub stream_id: EntryId,

    /// The decoded payload
    pub body: T,

    /// When the entry was appended (parsed from the stream id)
    pub timestamp: DateTime<Utc>,
}

impl<T> QueueMessage<T> {
    pub fn new(stream_id: EntryId, body: T) -> Self {
        let timestamp = stream_id.timestamp().unwrap_or_else(Utc::now);
        Self {
            stream_id,
            body,
            timestamp,
        }
    }

    /// How long ago the entry was appended
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }

    pub fn into_body(self) -> T {
        self.body
    }
}
