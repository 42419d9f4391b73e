//! Store Module
//!
//! The two capabilities a host can ask for, and their Redis implementations.
//!
//! ## Capabilities
//! - `PersistentDataStore`: versioned, kind-partitioned items
//! - `BigSegmentStore`: read-only big segment membership
//!
//! Both are synchronous. Each store owns its own backend handle.

mod big_segments;
mod data_store;
mod kind;
mod membership;
pub mod optimistic;

pub use big_segments::{BigSegmentStoreMetadata, RedisBigSegmentStore};
pub use data_store::RedisDataStore;
pub use kind::{Collection, DataKind, EnvelopeKind, ItemEnvelope, ItemHeader, SerializedItem};
pub use membership::SegmentMembership;

use crate::error::Result;

/// Versioned item storage
pub trait PersistentDataStore: Send + Sync {
    /// Replace the contents of every given kind and mark the store
    /// initialized, atomically.
    fn init(&self, collections: &[Collection<'_>]) -> Result<()>;

    /// One item, or `None` if absent
    fn get(&self, kind: &dyn DataKind, key: &str) -> Result<Option<SerializedItem>>;

    /// Every item of a kind; empty if the kind has none
    fn get_all(&self, kind: &dyn DataKind) -> Result<Vec<(String, SerializedItem)>>;

    /// Write `item` if its version is newer than the stored one.
    ///
    /// Returns `false` when the stored item is the same version or newer.
    fn upsert(&self, kind: &dyn DataKind, key: &str, item: &SerializedItem) -> Result<bool>;

    /// Whether `init` has ever succeeded. Errors read as `false`.
    fn is_initialized(&self) -> bool;

    /// Whether the backend answers at all
    fn is_available(&self) -> bool;

    fn close(&self) -> Result<()>;
}

/// Big segment membership lookups
pub trait BigSegmentStore: Send + Sync {
    /// Last sync time; never-synced is an error
    fn get_metadata(&self) -> Result<BigSegmentStoreMetadata>;

    fn get_user_membership(&self, user_hash: &str) -> Result<SegmentMembership>;

    fn close(&self) -> Result<()>;
}
