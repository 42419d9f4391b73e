//! In-process backend
//!
//! A keyspace held in memory with Redis-compatible semantics for the commands
//! the stores use. Every key carries a modification revision; a watch records
//! the revision it saw and a commit is refused if it moved.
//!
//! Cloning a `MemoryBackend` yields a second handle onto the same keyspace,
//! the way two connections share one Redis server. Each handle can be closed
//! independently.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use super::{Backend, CommitOutcome, WatchSession, WriteOp};
use crate::error::{Result, StoreError};

/// Value stored under a key
#[derive(Debug)]
enum Value {
    Str(String),
    Hash(BTreeMap<String, Bytes>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    Str,
    Hash,
    Set,
}

impl ValueType {
    fn name(self) -> &'static str {
        match self {
            ValueType::Str => "string",
            ValueType::Hash => "hash",
            ValueType::Set => "set",
        }
    }
}

impl Value {
    fn value_type(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::Str,
            Value::Hash(_) => ValueType::Hash,
            Value::Set(_) => ValueType::Set,
        }
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    values: HashMap<String, Value>,

    /// Last revision at which each key was modified (kept after deletion)
    revisions: HashMap<String, u64>,

    next_revision: u64,
}

impl Keyspace {
    fn revision(&self, key: &str) -> u64 {
        self.revisions.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &str) {
        self.next_revision += 1;
        self.revisions.insert(key.to_string(), self.next_revision);
    }

    /// Walk the batch tracking only the type each touched key would hold.
    /// Fails on the first operation Redis would reject, before anything is
    /// written.
    fn check_batch(&self, ops: &[WriteOp], fail_at: Option<usize>) -> Result<()> {
        let mut types: HashMap<&str, Option<ValueType>> = HashMap::new();

        for (index, op) in ops.iter().enumerate() {
            if fail_at == Some(index) {
                return Err(StoreError::Backend(format!(
                    "injected failure at batch operation {}",
                    index
                )));
            }

            let key = op.key();
            let current = match types.get(key) {
                Some(pending) => *pending,
                None => self.values.get(key).map(Value::value_type),
            };

            let next = match op {
                WriteOp::Del { .. } => None,
                WriteOp::Set { .. } => Some(ValueType::Str),
                _ if op.is_noop() => current,
                WriteOp::HSet { .. } => Some(expect_type(key, current, ValueType::Hash)?),
                WriteOp::SAdd { .. } => Some(expect_type(key, current, ValueType::Set)?),
            };
            types.insert(key, next);
        }

        Ok(())
    }

    /// Apply an operation already accepted by `check_batch`
    fn apply(&mut self, op: &WriteOp) {
        if op.is_noop() {
            return;
        }

        match op {
            WriteOp::Del { key } => {
                if self.values.remove(key).is_some() {
                    self.touch(key);
                }
                return;
            }
            WriteOp::HSet { key, field, value } => {
                if let Value::Hash(fields) = self
                    .values
                    .entry(key.clone())
                    .or_insert_with(|| Value::Hash(BTreeMap::new()))
                {
                    fields.insert(field.clone(), value.clone());
                }
            }
            WriteOp::Set { key, value } => {
                self.values.insert(key.clone(), Value::Str(value.clone()));
            }
            WriteOp::SAdd { key, members } => {
                if let Value::Set(set) = self
                    .values
                    .entry(key.clone())
                    .or_insert_with(|| Value::Set(BTreeSet::new()))
                {
                    set.extend(members.iter().cloned());
                }
            }
        }
        self.touch(op.key());
    }

    /// Either every op lands or none do. Writes happen in place, so the cost
    /// is proportional to the batch, not the keyspace.
    fn apply_all(&mut self, ops: &[WriteOp], fail_at: Option<usize>) -> Result<()> {
        self.check_batch(ops, fail_at)?;
        for op in ops {
            self.apply(op);
        }
        Ok(())
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(other) => Err(wrong_type(key, other.value_type())),
        }
    }
}

fn expect_type(key: &str, current: Option<ValueType>, wanted: ValueType) -> Result<ValueType> {
    match current {
        Some(found) if found != wanted => Err(wrong_type(key, found)),
        _ => Ok(wanted),
    }
}

fn wrong_type(key: &str, found: ValueType) -> StoreError {
    StoreError::Backend(format!(
        "WRONGTYPE operation against key \"{}\" holding a {}",
        key,
        found.name()
    ))
}

#[derive(Debug, Default)]
struct Shared {
    keyspace: RwLock<Keyspace>,

    /// Simulates a lost connection for every handle
    unavailable: AtomicBool,

    /// Index of the batch operation that should fail, if any
    fail_batch_at: Mutex<Option<usize>>,
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl Clone for MemoryBackend {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }
    }
}

impl MemoryBackend {
    /// Create an empty keyspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on every handle fail as if the server were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next atomic batch fail when it reaches operation `index`.
    /// Nothing from that batch is applied.
    pub fn fail_next_batch_at(&self, index: usize) {
        *self.shared.fail_batch_at.lock() = Some(index);
    }

    /// All keys currently present, sorted
    pub fn keys(&self) -> Vec<String> {
        let keyspace = self.shared.keyspace.read();
        let mut keys: Vec<String> = keyspace.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".to_string()));
        }
        Ok(())
    }
}

impl Backend for MemoryBackend {
    type Watch<'a> = MemoryWatch<'a>;

    fn ping(&self) -> Result<()> {
        self.check()
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.shared.keyspace.read().values.contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        match self.shared.keyspace.read().values.get(key) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(other) => Err(wrong_type(key, other.value_type())),
        }
    }

    fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        self.check()?;
        self.shared.keyspace.read().hget(key, field)
    }

    fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>> {
        self.check()?;
        match self.shared.keyspace.read().values.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Hash(fields)) => Ok(fields
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()),
            Some(other) => Err(wrong_type(key, other.value_type())),
        }
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        match self.shared.keyspace.read().values.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(other) => Err(wrong_type(key, other.value_type())),
        }
    }

    fn exec_atomic(&self, ops: &[WriteOp]) -> Result<()> {
        self.check()?;
        let fail_at = self.shared.fail_batch_at.lock().take();
        self.shared.keyspace.write().apply_all(ops, fail_at)
    }

    fn watch(&self, key: &str) -> Result<MemoryWatch<'_>> {
        self.check()?;
        let revision = self.shared.keyspace.read().revision(key);
        Ok(MemoryWatch {
            backend: self,
            key: key.to_string(),
            revision,
        })
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Watch over one key of a `MemoryBackend`
#[derive(Debug)]
pub struct MemoryWatch<'a> {
    backend: &'a MemoryBackend,
    key: String,
    revision: u64,
}

impl WatchSession for MemoryWatch<'_> {
    fn hget(&mut self, key: &str, field: &str) -> Result<Option<Bytes>> {
        self.backend.hget(key, field)
    }

    fn commit(self, ops: &[WriteOp]) -> Result<CommitOutcome> {
        self.backend.check()?;
        let mut keyspace = self.backend.shared.keyspace.write();
        if keyspace.revision(&self.key) != self.revision {
            return Ok(CommitOutcome::Aborted);
        }
        keyspace.apply_all(ops, None)?;
        Ok(CommitOutcome::Committed)
    }
}
