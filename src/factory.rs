//! Store construction
//!
//! One `Config`, two typed constructors: a data store and a big segment
//! store. Each call builds its own backend handle. The `_with` variants take
//! any `Backend` instead of connecting to Redis.
//!
//! If the startup check fails the freshly built backend is closed before the
//! error is returned; no half-built store escapes.

use crate::backend::{Backend, RedisBackend};
use crate::config::Config;
use crate::error::Result;
use crate::store::{RedisBigSegmentStore, RedisDataStore};

impl Config {
    /// Connect to Redis and build a data store
    pub fn create_data_store(&self) -> Result<RedisDataStore<RedisBackend>> {
        let backend = RedisBackend::open(self, &self.namespace())?;
        self.create_data_store_with(backend)
    }

    /// Build a data store over an existing backend
    pub fn create_data_store_with<B: Backend>(&self, backend: B) -> Result<RedisDataStore<B>> {
        self.validate()?;
        self.startup_check(&backend, "RedisDataStore")?;

        let namespace = self.namespace();
        tracing::info!("RedisDataStore: using key prefix \"{}\"", namespace.prefix());

        Ok(RedisDataStore::new(backend, namespace)
            .with_strict_version_check(self.strict_version_check))
    }

    /// Connect to Redis and build a big segment store
    pub fn create_big_segment_store(&self) -> Result<RedisBigSegmentStore<RedisBackend>> {
        let backend = RedisBackend::open(self, &self.namespace())?;
        self.create_big_segment_store_with(backend)
    }

    /// Build a big segment store over an existing backend
    pub fn create_big_segment_store_with<B: Backend>(
        &self,
        backend: B,
    ) -> Result<RedisBigSegmentStore<B>> {
        self.validate()?;
        self.startup_check(&backend, "RedisBigSegmentStore")?;

        let namespace = self.namespace();
        tracing::info!("RedisBigSegmentStore: using key prefix \"{}\"", namespace.prefix());

        Ok(RedisBigSegmentStore::new(backend, namespace))
    }

    fn startup_check<B: Backend>(&self, backend: &B, label: &str) -> Result<()> {
        if !self.check_on_startup {
            return Ok(());
        }

        if let Err(e) = backend.ping() {
            tracing::error!("{}: startup connectivity check failed: {}", label, e);
            let _ = backend.close();
            return Err(e);
        }
        Ok(())
    }
}
