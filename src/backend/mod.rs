//! Backend Module
//!
//! The boundary between the stores and the key-value engine.
//!
//! ## Responsibilities
//! - Hash field reads (`HGET`, `HGETALL`), string reads, set reads
//! - Atomic multi-command batches (`MULTI`/`EXEC`)
//! - Optimistic transactions: `WATCH` a key, read, then `EXEC` only if the
//!   watched key was not modified in between
//! - Existence checks and liveness pings
//!
//! ## Implementations
//! - `RedisBackend`: a Redis server or cluster via the `redis` crate
//! - `MemoryBackend`: in-process keyspace with the same WATCH semantics,
//!   for tests and embedded hosts

mod memory;
mod redis_engine;

pub use self::memory::{MemoryBackend, MemoryWatch};
pub use self::redis_engine::{parse_cluster_nodes, ClusterNode, RedisBackend, RedisWatch};

use bytes::Bytes;

use crate::error::Result;

/// A write issued as part of a batch or a watched commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Delete a key of any type
    Del { key: String },

    /// Set one field of a hash
    HSet { key: String, field: String, value: Bytes },

    /// Set a string value
    Set { key: String, value: String },

    /// Add members to a set
    SAdd { key: String, members: Vec<String> },
}

impl WriteOp {
    /// The key this operation touches
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Del { key }
            | WriteOp::HSet { key, .. }
            | WriteOp::Set { key, .. }
            | WriteOp::SAdd { key, .. } => key,
        }
    }

    /// Whether the operation leaves the keyspace unchanged (`SADD` with no members)
    pub fn is_noop(&self) -> bool {
        matches!(self, WriteOp::SAdd { members, .. } if members.is_empty())
    }
}

/// Result of committing a watched transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All writes were applied
    Committed,

    /// A watched key changed since the watch began; nothing was written
    Aborted,
}

/// A key-value engine the stores can run on.
///
/// Implementations must be safe to share between threads; callers never add
/// their own locking around a backend.
pub trait Backend: Send + Sync {
    /// Session type holding a watch until it is committed or dropped
    type Watch<'a>: WatchSession
    where
        Self: 'a;

    /// Round trip to the engine
    fn ping(&self) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// String value of a key, `None` if absent
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// One hash field, `None` if the hash or the field is absent
    fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>>;

    /// Every field of a hash; a missing hash yields an empty list
    fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>>;

    /// Members of a set; a missing set yields an empty list
    fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Apply every operation atomically, or none of them
    fn exec_atomic(&self, ops: &[WriteOp]) -> Result<()>;

    /// Start watching `key` for modification
    fn watch(&self, key: &str) -> Result<Self::Watch<'_>>;

    /// Release the handle. Calling it more than once is harmless.
    fn close(&self) -> Result<()>;
}

/// An open optimistic transaction over one watched key
pub trait WatchSession {
    /// Read a hash field inside the session
    fn hget(&mut self, key: &str, field: &str) -> Result<Option<Bytes>>;

    /// Apply `ops` if the watched key is unchanged since the watch began
    fn commit(self, ops: &[WriteOp]) -> Result<CommitOutcome>;
}
