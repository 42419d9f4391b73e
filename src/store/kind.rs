//! Data kinds and serialized items
//!
//! The store never interprets payloads except to learn an item's version
//! during an upsert, which it asks the item's `DataKind` to do.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A named partition of items, plus the knowledge of how to read an item's
/// version out of its serialized form.
pub trait DataKind: Send + Sync {
    /// Stable name; becomes the suffix of the partition's key
    fn name(&self) -> &str;

    /// Recover the version and deletion flag from a serialized item
    fn deserialize(&self, serialized: &[u8]) -> Result<ItemHeader>;
}

/// Version information decoded from a serialized item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHeader {
    pub version: u64,
    pub deleted: bool,
}

/// An item as the store sees it
///
/// Only `payload` is written to the backend. `version` and `deleted` describe
/// the item being written; items read back carry `version = 0` and
/// `deleted = false` because reads do not decode the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedItem {
    pub version: u64,
    pub deleted: bool,
    pub payload: Bytes,
}

impl SerializedItem {
    pub fn new(version: u64, deleted: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            version,
            deleted,
            payload: payload.into(),
        }
    }

    /// Item read back from the backend
    pub(crate) fn stored(payload: Bytes) -> Self {
        Self {
            version: 0,
            deleted: false,
            payload,
        }
    }
}

/// Every item of one kind, as handed to `init`
pub struct Collection<'a> {
    pub kind: &'a dyn DataKind,
    pub items: Vec<(String, SerializedItem)>,
}

impl<'a> Collection<'a> {
    pub fn new(kind: &'a dyn DataKind, items: Vec<(String, SerializedItem)>) -> Self {
        Self { kind, items }
    }
}

// =============================================================================
// Envelope format
// =============================================================================

/// On-the-wire form used by `EnvelopeKind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEnvelope {
    pub version: u64,
    pub deleted: bool,
    pub body: Vec<u8>,
}

/// A `DataKind` whose payloads are bincode-encoded `ItemEnvelope`s
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeKind {
    name: String,
}

impl EnvelopeKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Encode an item of this kind
    pub fn item(&self, version: u64, body: impl Into<Vec<u8>>) -> Result<SerializedItem> {
        self.encode(ItemEnvelope {
            version,
            deleted: false,
            body: body.into(),
        })
    }

    /// Encode a deletion marker of this kind
    pub fn tombstone(&self, version: u64) -> Result<SerializedItem> {
        self.encode(ItemEnvelope {
            version,
            deleted: true,
            body: Vec::new(),
        })
    }

    pub fn encode(&self, envelope: ItemEnvelope) -> Result<SerializedItem> {
        let payload = bincode::serialize(&envelope)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(SerializedItem::new(envelope.version, envelope.deleted, payload))
    }

    pub fn decode(&self, serialized: &[u8]) -> Result<ItemEnvelope> {
        bincode::deserialize(serialized).map_err(|e| {
            StoreError::Serialization(format!("unreadable \"{}\" item: {}", self.name, e))
        })
    }
}

impl DataKind for EnvelopeKind {
    fn name(&self) -> &str {
        &self.name
    }

    fn deserialize(&self, serialized: &[u8]) -> Result<ItemHeader> {
        let envelope = self.decode(serialized)?;
        Ok(ItemHeader {
            version: envelope.version,
            deleted: envelope.deleted,
        })
    }
}
