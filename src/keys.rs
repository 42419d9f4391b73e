//! Key Namespace
//!
//! Computes every Redis key the stores touch.
//!
//! ## Key Layout
//! ```text
//! <prefix>:<kind>                                hash: item key -> serialized item
//! <prefix>:$inited                               existence-only marker
//! <prefix>:big_segments_synchronized_on          unix millis, as a decimal string
//! <prefix>:big_segment_include:<user hash>       set of segment refs
//! <prefix>:big_segment_exclude:<user hash>       set of segment refs
//! ```
//!
//! In cluster mode the prefix becomes `{ld}.<prefix>` unless it already
//! contains a `{...}` hash tag, so every key lands in the same hash slot and
//! WATCH/MULTI/EXEC never spans shards.

use crate::error::{Result, StoreError};

/// Prefix used when none (or an empty one) is configured
pub const DEFAULT_PREFIX: &str = "launchdarkly";

/// Hash tag prepended to the prefix when talking to a cluster
pub const DEFAULT_CLUSTER_PREFIX: &str = "{ld}.";

/// Separator between the prefix and the key suffix
pub const SEPARATOR: char = ':';

const INITED_SUFFIX: &str = "$inited";
const SYNC_TIME_SUFFIX: &str = "big_segments_synchronized_on";
const INCLUDE_SUFFIX: &str = "big_segment_include:";
const EXCLUDE_SUFFIX: &str = "big_segment_exclude:";

/// Resolved key namespace for one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    prefix: String,
}

impl KeyNamespace {
    /// Build a namespace from the configured prefix.
    ///
    /// `collocate` is true when the backing engine is a cluster.
    pub fn new(prefix: &str, collocate: bool) -> Self {
        let prefix = if prefix.is_empty() { DEFAULT_PREFIX } else { prefix };

        let prefix = if collocate && !has_hash_tag(prefix) {
            format!("{}{}", DEFAULT_CLUSTER_PREFIX, prefix)
        } else {
            prefix.to_string()
        };

        Self { prefix }
    }

    /// The effective prefix, including any colocation tag
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Hash holding every item of a kind
    pub fn kind_key(&self, kind: &str) -> String {
        self.key(kind)
    }

    /// Marker set by a successful init
    pub fn inited_key(&self) -> String {
        self.key(INITED_SUFFIX)
    }

    /// Big segment synchronization timestamp
    pub fn sync_time_key(&self) -> String {
        self.key(SYNC_TIME_SUFFIX)
    }

    /// Set of segment refs that include the user
    pub fn include_key(&self, user_hash: &str) -> String {
        format!("{}{}{}{}", self.prefix, SEPARATOR, INCLUDE_SUFFIX, user_hash)
    }

    /// Set of segment refs that exclude the user
    pub fn exclude_key(&self, user_hash: &str) -> String {
        format!("{}{}{}{}", self.prefix, SEPARATOR, EXCLUDE_SUFFIX, user_hash)
    }

    fn key(&self, suffix: &str) -> String {
        let mut key = String::with_capacity(self.prefix.len() + 1 + suffix.len());
        key.push_str(&self.prefix);
        key.push(SEPARATOR);
        key.push_str(suffix);
        key
    }
}

/// Reject kind names that would collide with a metadata key.
pub fn validate_kind_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidKind("kind name is empty".to_string()));
    }

    if name == INITED_SUFFIX
        || name == SYNC_TIME_SUFFIX
        || name.starts_with(INCLUDE_SUFFIX)
        || name.starts_with(EXCLUDE_SUFFIX)
    {
        return Err(StoreError::InvalidKind(format!(
            "\"{}\" is reserved for store metadata",
            name
        )));
    }

    Ok(())
}

fn has_hash_tag(prefix: &str) -> bool {
    prefix.contains('{')
}
