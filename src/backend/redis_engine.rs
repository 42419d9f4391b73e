//! Redis backend
//!
//! Talks to a Redis server through the `redis` crate.
//!
//! ## Connections
//! Connections are kept in a lock-free idle pool. A call checks one out and
//! returns it when done; a watch session keeps its connection until it
//! commits or is dropped, because WATCH state lives on the connection.
//! Connections that report themselves closed, or on which any command
//! failed, are not returned to the pool.
//!
//! With `addresses`, the configured username, password and database apply
//! to every connection, including the cluster seeds. A URL carries its own.
//!
//! ## Cluster
//! With more than one configured address, every key the stores use shares
//! one hash tag and therefore one slot. The backend asks a seed node which
//! master serves that slot (`CLUSTER KEYSLOT` + `CLUSTER NODES`) and sends
//! all traffic there.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::queue::SegQueue;
use redis::{ConnectionAddr, ConnectionInfo, ConnectionLike, FromRedisValue, RedisConnectionInfo};

use super::{Backend, CommitOutcome, WatchSession, WriteOp};
use crate::config::{split_address, Config};
use crate::error::{Result, StoreError};
use crate::keys::KeyNamespace;

/// Backend connected to a Redis server (or the owning master of a cluster slot)
pub struct RedisBackend {
    client: redis::Client,

    pool: ConnectionPool<redis::Connection>,

    /// Where this backend sends traffic, for logging
    endpoint: String,

    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl RedisBackend {
    /// Build a backend from validated configuration.
    ///
    /// For a single node this does not touch the network. For a cluster it
    /// contacts the seed addresses to locate the master serving the
    /// namespace's hash slot.
    pub fn open(config: &Config, namespace: &KeyNamespace) -> Result<Self> {
        config.validate()?;

        let connect_timeout = millis(config.connect_timeout_ms);
        let read_timeout = millis(config.read_timeout_ms);
        let write_timeout = millis(config.write_timeout_ms);

        let (client, endpoint) = match config.url.as_deref() {
            Some(url) => (open_client(url, url)?, url.to_string()),
            None => {
                let addresses = config.effective_addresses();
                let address = if addresses.len() > 1 {
                    locate_slot_owner(&addresses, namespace.prefix(), config, connect_timeout)?
                } else {
                    addresses[0].clone()
                };
                (open_client(address_info(&address, config)?, &address)?, address)
            }
        };

        tracing::debug!("Redis backend targeting {}", endpoint);

        Ok(Self {
            client,
            pool: ConnectionPool::new(),
            endpoint,
            connect_timeout,
            read_timeout,
            write_timeout,
        })
    }

    /// Address or URL this backend sends traffic to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self) -> Result<redis::Connection> {
        let conn = match self.connect_timeout {
            Some(timeout) => self.client.get_connection_with_timeout(timeout)?,
            None => self.client.get_connection()?,
        };
        conn.set_read_timeout(self.read_timeout)?;
        conn.set_write_timeout(self.write_timeout)?;
        Ok(conn)
    }

    fn checkout(&self) -> Result<PooledConnection<'_, redis::Connection>> {
        self.pool.checkout(|| self.connect())
    }
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("endpoint", &self.endpoint)
            .field("idle", &self.pool.idle_len())
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl Backend for RedisBackend {
    type Watch<'a> = RedisWatch<'a>;

    fn ping(&self) -> Result<()> {
        self.checkout()?.query::<String>(&redis::cmd("PING"))?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.checkout()?.query(redis::cmd("EXISTS").arg(key))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.checkout()?.query(redis::cmd("GET").arg(key))
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        self.checkout()?.hget(key, field)
    }

    fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>> {
        let values: HashMap<String, Vec<u8>> =
            self.checkout()?.query(redis::cmd("HGETALL").arg(key))?;
        Ok(values
            .into_iter()
            .map(|(field, value)| (field, Bytes::from(value)))
            .collect())
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.checkout()?.query(redis::cmd("SMEMBERS").arg(key))
    }

    fn exec_atomic(&self, ops: &[WriteOp]) -> Result<()> {
        if ops.iter().all(WriteOp::is_noop) {
            return Ok(());
        }
        self.checkout()?.query_pipeline::<()>(&transaction(ops))
    }

    fn watch(&self, key: &str) -> Result<RedisWatch<'_>> {
        let mut conn = self.checkout()?;
        conn.query::<()>(redis::cmd("WATCH").arg(key))?;
        Ok(RedisWatch {
            conn,
            finished: false,
        })
    }

    fn close(&self) -> Result<()> {
        if self.pool.close() {
            tracing::debug!("Redis backend for {} closed", self.endpoint);
        }
        Ok(())
    }
}

/// Open watch on a pooled connection
pub struct RedisWatch<'a, C: ConnectionLike = redis::Connection> {
    conn: PooledConnection<'a, C>,

    /// Set once EXEC has run, which clears the watch server-side
    finished: bool,
}

impl<C: ConnectionLike> WatchSession for RedisWatch<'_, C> {
    fn hget(&mut self, key: &str, field: &str) -> Result<Option<Bytes>> {
        self.conn.hget(key, field)
    }

    fn commit(mut self, ops: &[WriteOp]) -> Result<CommitOutcome> {
        // EXEC replies nil when a watched key changed. An empty pipeline would
        // never reach the server, so nothing-to-write still runs MULTI/EXEC.
        let reply: Option<redis::Value> = if ops.iter().all(WriteOp::is_noop) {
            self.conn.query::<()>(&redis::cmd("MULTI"))?;
            self.conn.query(&redis::cmd("EXEC"))?
        } else {
            self.conn.query_pipeline(&transaction(ops))?
        };
        self.finished = true;

        Ok(match reply {
            Some(_) => CommitOutcome::Committed,
            None => CommitOutcome::Aborted,
        })
    }
}

impl<C: ConnectionLike> Drop for RedisWatch<'_, C> {
    fn drop(&mut self) {
        // A poisoned connection is discarded, which ends the watch with it
        if !self.finished && !self.conn.poisoned {
            let _ = self.conn.query::<()>(&redis::cmd("UNWATCH"));
        }
    }
}

// =============================================================================
// Connection pool
// =============================================================================

/// Idle connections ready for reuse
struct ConnectionPool<C> {
    idle: SegQueue<C>,
    closed: AtomicBool,
}

impl<C: ConnectionLike> ConnectionPool<C> {
    fn new() -> Self {
        Self {
            idle: SegQueue::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn checkout<F>(&self, connect: F) -> Result<PooledConnection<'_, C>>
    where
        F: FnOnce() -> Result<C>,
    {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let conn = match self.idle.pop() {
            Some(conn) => conn,
            None => connect()?,
        };

        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
            poisoned: false,
        })
    }

    /// Drop every idle connection and refuse new checkouts.
    /// Returns false if the pool was already closed.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        while self.idle.pop().is_some() {}
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn idle_len(&self) -> usize {
        self.idle.len()
    }
}

/// Connection borrowed from the pool.
///
/// Any failed command poisons it: after a timeout the reply may still be in
/// flight, so the connection is discarded instead of going back to the pool.
struct PooledConnection<'a, C: ConnectionLike> {
    pool: &'a ConnectionPool<C>,
    conn: Option<C>,
    poisoned: bool,
}

impl<C: ConnectionLike> PooledConnection<'_, C> {
    fn query<T: FromRedisValue>(&mut self, cmd: &redis::Cmd) -> Result<T> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        let result = cmd.query(conn);
        self.poisoned |= result.is_err();
        Ok(result?)
    }

    fn query_pipeline<T: FromRedisValue>(&mut self, pipe: &redis::Pipeline) -> Result<T> {
        let conn = self.conn.as_mut().ok_or(StoreError::Closed)?;
        let result = pipe.query(conn);
        self.poisoned |= result.is_err();
        Ok(result?)
    }

    fn hget(&mut self, key: &str, field: &str) -> Result<Option<Bytes>> {
        let value: Option<Vec<u8>> = self.query(redis::cmd("HGET").arg(key).arg(field))?;
        Ok(value.map(Bytes::from))
    }
}

impl<C: ConnectionLike> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.poisoned && conn.is_open() && !self.pool.is_closed() {
                self.pool.idle.push(conn);
            }
        }
    }
}

/// MULTI/EXEC pipeline for a list of writes
fn transaction(ops: &[WriteOp]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in ops.iter().filter(|op| !op.is_noop()) {
        match op {
            WriteOp::Del { key } => {
                pipe.cmd("DEL").arg(key).ignore();
            }
            WriteOp::HSet { key, field, value } => {
                pipe.cmd("HSET").arg(key).arg(field).arg(value.as_ref()).ignore();
            }
            WriteOp::Set { key, value } => {
                pipe.cmd("SET").arg(key).arg(value).ignore();
            }
            WriteOp::SAdd { key, members } => {
                pipe.cmd("SADD").arg(key).arg(members).ignore();
            }
        }
    }
    pipe
}

/// Connection details for one `host:port`, with the configured credentials
fn address_info(address: &str, config: &Config) -> Result<ConnectionInfo> {
    let (host, port) = split_address(address)?;
    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host.to_string(), port),
        redis: RedisConnectionInfo {
            db: config.db,
            username: config.username.clone(),
            password: config.password.clone(),
            ..Default::default()
        },
    })
}

fn open_client<T: redis::IntoConnectionInfo>(target: T, description: &str) -> Result<redis::Client> {
    redis::Client::open(target)
        .map_err(|e| StoreError::Config(format!("invalid Redis target \"{}\": {}", description, e)))
}

fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// =============================================================================
// Cluster slot discovery
// =============================================================================

/// One line of `CLUSTER NODES` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: String,

    /// `host:port` clients should connect to
    pub address: String,

    pub is_master: bool,

    /// Inclusive slot ranges served by this node
    pub slots: Vec<(u16, u16)>,
}

impl ClusterNode {
    pub fn serves(&self, slot: u16) -> bool {
        self.slots.iter().any(|&(start, end)| start <= slot && slot <= end)
    }
}

/// Parse `CLUSTER NODES` output.
///
/// Each line is `<id> <ip:port@cport[,hostname]> <flags> <master> <ping-sent>
/// <pong-recv> <config-epoch> <link-state> <slot> <slot> ...`. Importing or
/// migrating slot markers (`[...]`) and failed nodes are skipped.
pub fn parse_cluster_nodes(text: &str) -> Vec<ClusterNode> {
    let mut nodes = Vec::new();

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }

        let flags: Vec<&str> = fields[2].split(',').collect();
        if flags.iter().any(|f| *f == "fail" || *f == "noaddr" || *f == "handshake") {
            continue;
        }

        let address = fields[1].split('@').next().unwrap_or_default().to_string();
        if address.is_empty() || address.starts_with(':') {
            continue;
        }

        let slots = fields[8..]
            .iter()
            .filter(|s| !s.starts_with('['))
            .filter_map(|s| parse_slot_range(s))
            .collect();

        nodes.push(ClusterNode {
            id: fields[0].to_string(),
            address,
            is_master: flags.contains(&"master"),
            slots,
        });
    }

    nodes
}

fn parse_slot_range(token: &str) -> Option<(u16, u16)> {
    match token.split_once('-') {
        Some((start, end)) => Some((start.parse().ok()?, end.parse().ok()?)),
        None => {
            let slot = token.parse().ok()?;
            Some((slot, slot))
        }
    }
}

/// Ask the seed nodes which master serves the slot of `prefix`.
fn locate_slot_owner(
    seeds: &[String],
    prefix: &str,
    config: &Config,
    connect_timeout: Option<Duration>,
) -> Result<String> {
    let mut last_error = None;

    for seed in seeds {
        match query_slot_owner(seed, prefix, config, connect_timeout) {
            Ok(address) => {
                tracing::info!("Cluster slot for \"{}\" is served by {}", prefix, address);
                return Ok(address);
            }
            Err(e) => {
                tracing::warn!("Cluster seed {} could not resolve slot owner: {}", seed, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        StoreError::Config("no cluster addresses configured".to_string())
    }))
}

fn query_slot_owner(
    seed: &str,
    prefix: &str,
    config: &Config,
    connect_timeout: Option<Duration>,
) -> Result<String> {
    let client = open_client(address_info(seed, config)?, seed)?;
    let mut conn = match connect_timeout {
        Some(timeout) => client.get_connection_with_timeout(timeout)?,
        None => client.get_connection()?,
    };

    let slot: u16 = redis::cmd("CLUSTER").arg("KEYSLOT").arg(prefix).query(&mut conn)?;
    let listing: String = redis::cmd("CLUSTER").arg("NODES").query(&mut conn)?;

    let owner = parse_cluster_nodes(&listing)
        .into_iter()
        .find(|node| node.is_master && node.serves(slot))
        .ok_or_else(|| StoreError::Backend(format!("no master serves cluster slot {}", slot)))?;

    tracing::debug!("Cluster slot {} owned by node {}", slot, owner.id);
    Ok(owner.address)
}
