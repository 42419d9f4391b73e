//! Versioned data store
//!
//! Items of each kind live in one Redis hash, `<prefix>:<kind>`, keyed by
//! item key. Writes after `init` go through `upsert`, which only replaces an
//! item with a strictly newer version.
//!
//! ## Upsert
//! ```text
//!   WATCH <prefix>:<kind>
//!   HGET  <prefix>:<kind> <key>        -> current version (absent = oldest)
//!   current >= proposed ?  --yes-->  UNWATCH, return false
//!   MULTI / HSET ... / EXEC
//!   EXEC nil (watched key changed) --> retry from WATCH
//! ```

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use super::kind::{Collection, DataKind, SerializedItem};
use super::optimistic::{self, Attempt, MAX_ATTEMPTS};
use super::PersistentDataStore;
use crate::backend::{Backend, CommitOutcome, RedisBackend, WatchSession, WriteOp};
use crate::error::Result;
use crate::keys::{validate_kind_name, KeyNamespace};

type TxHook = Arc<dyn Fn() + Send + Sync>;

/// Persistent data store over a Redis-compatible backend
pub struct RedisDataStore<B: Backend = RedisBackend> {
    backend: B,
    keys: KeyNamespace,

    /// Fail upserts whose stored item cannot be decoded
    strict_version_check: bool,

    max_attempts: usize,

    /// Runs between the read and the conditional write of every upsert
    /// attempt; lets tests slip in a competing writer
    tx_hook: RwLock<Option<TxHook>>,
}

impl<B: Backend> RedisDataStore<B> {
    pub fn new(backend: B, keys: KeyNamespace) -> Self {
        Self {
            backend,
            keys,
            strict_version_check: false,
            max_attempts: MAX_ATTEMPTS,
            tx_hook: RwLock::new(None),
        }
    }

    pub fn with_strict_version_check(mut self, strict: bool) -> Self {
        self.strict_version_check = strict;
        self
    }

    /// Install a hook that runs inside every upsert attempt, after the
    /// current item has been read and before the write is committed.
    #[doc(hidden)]
    pub fn set_concurrent_modification_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.tx_hook.write() = Some(Arc::new(hook));
    }

    #[doc(hidden)]
    pub fn clear_concurrent_modification_hook(&self) {
        *self.tx_hook.write() = None;
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.keys
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn kind_key(&self, kind: &dyn DataKind) -> Result<String> {
        validate_kind_name(kind.name())?;
        Ok(self.keys.kind_key(kind.name()))
    }

    /// Version of the stored item, per the strictness setting
    fn stored_version(&self, kind: &dyn DataKind, key: &str, item: &SerializedItem) -> Result<u64> {
        match kind.deserialize(&item.payload) {
            Ok(header) => Ok(header.version),
            Err(e) if self.strict_version_check => Err(e),
            Err(e) => {
                tracing::warn!(
                    "Stored item {} in \"{}\" is unreadable ({}); treating it as version {}",
                    key,
                    kind.name(),
                    e,
                    item.version
                );
                Ok(item.version)
            }
        }
    }
}

/// Shared tail of every point read
fn found(kind: &dyn DataKind, key: &str, raw: Option<Bytes>) -> Option<SerializedItem> {
    match raw {
        Some(payload) => Some(SerializedItem::stored(payload)),
        None => {
            tracing::debug!("Key: {} not found in \"{}\"", key, kind.name());
            None
        }
    }
}

impl<B: Backend> PersistentDataStore for RedisDataStore<B> {
    fn init(&self, collections: &[Collection<'_>]) -> Result<()> {
        let mut ops = Vec::new();
        let mut item_count = 0;

        for collection in collections {
            let base_key = self.kind_key(collection.kind)?;
            ops.push(WriteOp::Del {
                key: base_key.clone(),
            });

            for (key, item) in &collection.items {
                ops.push(WriteOp::HSet {
                    key: base_key.clone(),
                    field: key.clone(),
                    value: item.payload.clone(),
                });
            }
            item_count += collection.items.len();
        }

        ops.push(WriteOp::Set {
            key: self.keys.inited_key(),
            value: String::new(),
        });

        self.backend.exec_atomic(&ops)?;

        tracing::debug!(
            "Initialized {} collections with {} items under \"{}\"",
            collections.len(),
            item_count,
            self.keys.prefix()
        );
        Ok(())
    }

    fn get(&self, kind: &dyn DataKind, key: &str) -> Result<Option<SerializedItem>> {
        let base_key = self.kind_key(kind)?;
        let raw = self.backend.hget(&base_key, key)?;
        Ok(found(kind, key, raw))
    }

    fn get_all(&self, kind: &dyn DataKind) -> Result<Vec<(String, SerializedItem)>> {
        let base_key = self.kind_key(kind)?;
        Ok(self
            .backend
            .hgetall(&base_key)?
            .into_iter()
            .map(|(key, payload)| (key, SerializedItem::stored(payload)))
            .collect())
    }

    fn upsert(&self, kind: &dyn DataKind, key: &str, item: &SerializedItem) -> Result<bool> {
        let base_key = self.kind_key(kind)?;

        optimistic::retry(self.max_attempts, |attempt| {
            let mut watch = self.backend.watch(&base_key)?;
            let current = found(kind, key, watch.hget(&base_key, key)?);

            let hook = self.tx_hook.read().clone();
            if let Some(hook) = hook {
                hook();
            }

            let current_version = match &current {
                Some(stored) => Some(self.stored_version(kind, key, stored)?),
                None => None,
            };

            if !optimistic::supersedes(current_version, item.version) {
                let operation = if item.deleted { "delete" } else { "update" };
                tracing::debug!(
                    "Attempted to {} key: {} version: {} in \"{}\" with a version that is the same or older: {}",
                    operation,
                    key,
                    current_version.unwrap_or_default(),
                    kind.name(),
                    item.version
                );
                return Ok(Attempt::Done(false));
            }

            let write = WriteOp::HSet {
                key: base_key.clone(),
                field: key.to_string(),
                value: item.payload.clone(),
            };

            match watch.commit(&[write])? {
                CommitOutcome::Committed => Ok(Attempt::Done(true)),
                CommitOutcome::Aborted => {
                    tracing::debug!(
                        "Concurrent modification detected on attempt {}, retrying",
                        attempt
                    );
                    Ok(Attempt::Conflict)
                }
            }
        })
    }

    fn is_initialized(&self) -> bool {
        self.backend
            .exists(&self.keys.inited_key())
            .unwrap_or(false)
    }

    fn is_available(&self) -> bool {
        self.backend.exists(&self.keys.inited_key()).is_ok()
    }

    fn close(&self) -> Result<()> {
        self.backend.close()
    }
}
