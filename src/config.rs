//! Configuration for the Redis data store
//!
//! Centralized configuration with sensible defaults. One `Config` can build
//! either store; see `factory` for the constructors.

use crate::error::{Result, StoreError};
use crate::keys::{KeyNamespace, DEFAULT_PREFIX};

/// Address used when neither addresses nor a URL are configured
pub const DEFAULT_ADDRESS: &str = "localhost:6379";

/// Main configuration for the stores
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Key Configuration
    // -------------------------------------------------------------------------
    /// Prepended (with a colon) to every key
    pub prefix: String,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// `host:port` addresses. More than one means a cluster.
    /// Mutually exclusive with `url`.
    pub addresses: Vec<String>,

    /// `redis://` or `rediss://` URL. Mutually exclusive with `addresses`.
    pub url: Option<String>,

    /// Ping the server while building a store and fail if it is unreachable
    pub check_on_startup: bool,

    /// Connect timeout (milliseconds, 0 = client default)
    pub connect_timeout_ms: u64,

    /// Read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,

    /// ACL username for address mode. A URL carries its own.
    pub username: Option<String>,

    /// Password for address mode. A URL carries its own.
    pub password: Option<String>,

    /// Logical database for address mode. A URL carries its own.
    pub db: i64,

    // -------------------------------------------------------------------------
    // Upsert Configuration
    // -------------------------------------------------------------------------
    /// Fail an upsert when the stored item cannot be deserialized.
    /// Off by default: the unreadable item is treated as version 0 and a
    /// warning is logged.
    pub strict_version_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            addresses: Vec::new(),
            url: None,
            check_on_startup: true,
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            username: None,
            password: None,
            db: 0,
            strict_version_check: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject contradictory or unparseable settings
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.url {
            if !self.addresses.is_empty() {
                return Err(StoreError::Config(
                    "Redis data store must be configured with either addresses or URL, but not both"
                        .to_string(),
                ));
            }
            if redis::parse_redis_url(url).is_none() {
                return Err(StoreError::Config(format!("invalid Redis URL \"{}\"", url)));
            }
        }
        for address in &self.addresses {
            split_address(address)?;
        }
        if self.db < 0 {
            return Err(StoreError::Config(format!("invalid Redis database {}", self.db)));
        }
        Ok(())
    }

    /// Configured addresses, or the default address if there are none
    pub fn effective_addresses(&self) -> Vec<String> {
        if self.addresses.is_empty() {
            vec![DEFAULT_ADDRESS.to_string()]
        } else {
            self.addresses.clone()
        }
    }

    /// Whether keys must be colocated for a cluster
    pub fn is_cluster(&self) -> bool {
        self.url.is_none() && self.addresses.len() > 1
    }

    /// Key namespace derived from the prefix and cluster mode
    pub fn namespace(&self) -> KeyNamespace {
        KeyNamespace::new(&self.prefix, self.is_cluster())
    }

    /// Short description of the store type for host diagnostics
    pub fn describe(&self) -> &'static str {
        "Redis"
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the key prefix. An empty prefix means the default.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.config.prefix = if prefix.is_empty() {
            DEFAULT_PREFIX.to_string()
        } else {
            prefix
        };
        self
    }

    /// Shortcut for a single `host:port` address (replaces any addresses)
    pub fn host_and_port(self, host: &str, port: u16) -> Self {
        self.addresses([format!("{}:{}", host, port)])
    }

    /// Set the server addresses (replaces any previous addresses)
    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Set the server URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    /// Set the ACL username used with `addresses`
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password used with `addresses`
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set the logical database used with `addresses`
    pub fn db(mut self, db: i64) -> Self {
        self.config.db = db;
        self
    }

    /// Set whether to check connectivity when building a store
    pub fn check_on_startup(mut self, check: bool) -> Self {
        self.config.check_on_startup = check;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Make an unreadable stored item fail the upsert instead of counting as version 0
    pub fn strict_version_check(mut self, strict: bool) -> Self {
        self.config.strict_version_check = strict;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Split `host:port`; the port is the part after the last colon
pub(crate) fn split_address(address: &str) -> Result<(&str, u16)> {
    address
        .rsplit_once(':')
        .and_then(|(host, port)| {
            let port = port.parse::<u16>().ok()?;
            (!host.is_empty()).then_some((host, port))
        })
        .ok_or_else(|| {
            StoreError::Config(format!("invalid Redis address \"{}\", expected host:port", address))
        })
}
