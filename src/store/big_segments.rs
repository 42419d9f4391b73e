//! Big segment store
//!
//! Read-only view of the big segment data a synchronizer writes into Redis:
//! a sync timestamp plus, per user hash, a set of segment refs that include
//! the user and a set that exclude them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::membership::SegmentMembership;
use super::BigSegmentStore;
use crate::backend::{Backend, RedisBackend};
use crate::error::{Result, StoreError};
use crate::keys::KeyNamespace;

/// Metadata written by the big segment synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigSegmentStoreMetadata {
    /// Unix milliseconds of the last completed sync
    pub last_up_to_date: u64,
}

impl BigSegmentStoreMetadata {
    pub fn last_up_to_date_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_up_to_date)
    }
}

/// Big segment store over a Redis-compatible backend
pub struct RedisBigSegmentStore<B: Backend = RedisBackend> {
    backend: B,
    keys: KeyNamespace,
}

impl<B: Backend> RedisBigSegmentStore<B> {
    pub fn new(backend: B, keys: KeyNamespace) -> Self {
        Self { backend, keys }
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.keys
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> BigSegmentStore for RedisBigSegmentStore<B> {
    fn get_metadata(&self) -> Result<BigSegmentStoreMetadata> {
        let raw = self
            .backend
            .get(&self.keys.sync_time_key())?
            .ok_or(StoreError::MissingMetadata)?;

        let last_up_to_date = raw.trim().parse::<u64>().map_err(|e| {
            StoreError::InvalidMetadata(format!("sync time \"{}\": {}", raw, e))
        })?;

        Ok(BigSegmentStoreMetadata { last_up_to_date })
    }

    fn get_user_membership(&self, user_hash: &str) -> Result<SegmentMembership> {
        let included = self.backend.smembers(&self.keys.include_key(user_hash))?;
        let excluded = self.backend.smembers(&self.keys.exclude_key(user_hash))?;

        tracing::trace!(
            "User hash {}: {} included refs, {} excluded refs",
            user_hash,
            included.len(),
            excluded.len()
        );

        Ok(SegmentMembership::from_segment_refs(included, excluded))
    }

    fn close(&self) -> Result<()> {
        self.backend.close()
    }
}
