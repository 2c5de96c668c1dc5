//! Wire messages.
//!
//! Every frame is a JSON array `[tag, body]`:
//!
//! | tag       | body                               |
//! |-----------|------------------------------------|
//! | `"hello"` | `{ seq, messages?, heads? }`       |
//! | `"add"`   | `{ metadata, content }`            |
//! | `"remove"`| `{ id }`                           |
//! | `"ack"`   | `{ seq }`                          |

use crate::error::SyncError;
use quire_model::{DeviceName, Entry, EntryId, Metadata, Watermark};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One entry as it travels: sealed metadata and content, no admin fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPayload {
    pub metadata: Metadata,
    pub content: Value,
}

impl EntryPayload {
    pub fn into_entry(self) -> Entry {
        Entry::new(self.metadata, self.content)
    }
}

impl From<Entry> for EntryPayload {
    fn from(entry: Entry) -> Self {
        Self {
            metadata: entry.metadata,
            content: entry.content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Sender's `lastAdded`; `null` when it has never added anything.
    pub seq: Option<Watermark>,
    /// The sender's unsynced entries, ascending. Omitted when there are none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<EntryPayload>>,
    /// Highest localSeq the sender holds per device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heads: Option<BTreeMap<DeviceName, u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remove {
    pub id: EntryId,
}

/// Receipt for a `hello` batch or an `add`. `seq` is the highest watermark
/// admitted, or `null` if nothing was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub seq: Option<Watermark>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    Hello(Hello),
    Add(EntryPayload),
    Remove(Remove),
    Ack(Ack),
}

impl SyncMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            SyncMessage::Hello(_) => "hello",
            SyncMessage::Add(_) => "add",
            SyncMessage::Remove(_) => "remove",
            SyncMessage::Ack(_) => "ack",
        }
    }

    /// Whether the peer answers this message with an [`Ack`].
    pub fn expects_ack(&self) -> bool {
        match self {
            SyncMessage::Hello(hello) => hello.messages.as_ref().is_some_and(|m| !m.is_empty()),
            SyncMessage::Add(_) => true,
            SyncMessage::Remove(_) | SyncMessage::Ack(_) => false,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        let body = match self {
            SyncMessage::Hello(m) => serde_json::to_value(m),
            SyncMessage::Add(m) => serde_json::to_value(m),
            SyncMessage::Remove(m) => serde_json::to_value(m),
            SyncMessage::Ack(m) => serde_json::to_value(m),
        }
        .map_err(|e| SyncError::Malformed(e.to_string()))?;
        serde_json::to_vec(&(self.tag(), body)).map_err(|e| SyncError::Malformed(e.to_string()))
    }

    pub fn decode(frame: &[u8]) -> Result<Self, SyncError> {
        let (tag, body): (String, Value) =
            serde_json::from_slice(frame).map_err(|e| SyncError::Malformed(e.to_string()))?;
        let malformed = |e: serde_json::Error| SyncError::Malformed(format!("{tag}: {e}"));
        match tag.as_str() {
            "hello" => Ok(SyncMessage::Hello(serde_json::from_value(body).map_err(malformed)?)),
            "add" => Ok(SyncMessage::Add(serde_json::from_value(body).map_err(malformed)?)),
            "remove" => Ok(SyncMessage::Remove(serde_json::from_value(body).map_err(malformed)?)),
            "ack" => Ok(SyncMessage::Ack(serde_json::from_value(body).map_err(malformed)?)),
            other => Err(SyncError::Malformed(format!("unknown tag {other:?}"))),
        }
    }
}
