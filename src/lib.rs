//! # ld-redis-store
//!
//! A Redis-backed persistent data store with:
//! - Versioned items partitioned by kind, one Redis hash per kind
//! - Optimistic-concurrency upserts (WATCH/MULTI/EXEC with bounded retry)
//! - Cluster-safe key namespacing via a shared hash tag
//! - A read-only big segment membership store
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Config / factory                          │
//! │        (one builder, two typed store constructors)           │
//! └──────────────┬───────────────────────────────┬──────────────┘
//!                │                               │
//!                ▼                               ▼
//!   ┌─────────────────────────┐     ┌─────────────────────────┐
//!   │     RedisDataStore      │     │  RedisBigSegmentStore   │
//!   │ init/get/upsert (OCC)   │     │ metadata / membership   │
//!   └────────────┬────────────┘     └────────────┬────────────┘
//!                │        KeyNamespace           │
//!                ▼                               ▼
//!   ┌─────────────────────────────────────────────────────────┐
//!   │                    Backend trait                         │
//!   │          RedisBackend  |  MemoryBackend                  │
//!   └─────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod keys;

pub mod backend;
pub mod store;
mod factory;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{StoreError, Result};
pub use config::Config;
pub use keys::KeyNamespace;
pub use backend::{Backend, MemoryBackend, RedisBackend};
pub use store::{
    BigSegmentStore, BigSegmentStoreMetadata, Collection, DataKind, EnvelopeKind,
    PersistentDataStore, RedisBigSegmentStore, RedisDataStore, SegmentMembership,
    SerializedItem,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
