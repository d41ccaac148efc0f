//! In-process backing store
//!
//! Keeps values in a sorted map so that scan cursors are stable offsets.
//! Every trait call is counted, and the store can be switched to an
//! unavailable state in which every call fails.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::store::{KeyType, KvStore, ScanPage};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Value {
    String(String),
    List(Vec<String>),
    Set(BTreeSet<String>),
    Hash(BTreeMap<String, String>),
}

impl Value {
    fn key_type(&self) -> KeyType {
        match self {
            Value::String(_) => KeyType::String,
            Value::List(_) => KeyType::List,
            Value::Set(_) => KeyType::Set,
            Value::Hash(_) => KeyType::Hash,
        }
    }
}

/// Per-operation call counters
#[derive(Debug, Default)]
pub struct StoreOps {
    pings: AtomicU64,
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    types: AtomicU64,
    scans: AtomicU64,
}

impl StoreOps {
    /// Number of `ping` calls
    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    /// Number of `get` calls
    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of `set` calls
    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Number of `delete` calls
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Number of `key_type` calls
    pub fn types(&self) -> u64 {
        self.types.load(Ordering::Relaxed)
    }

    /// Number of `scan` calls
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Total number of calls of any kind
    pub fn total(&self) -> u64 {
        self.pings() + self.gets() + self.sets() + self.deletes() + self.types() + self.scans()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Backing store that lives in the current process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
    ops: StoreOps,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a string value without counting it as a call
    pub fn insert_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .write()
            .insert(key.into(), Value::String(value.into()));
    }

    /// Store a list value
    pub fn insert_list<I, T>(&self, key: impl Into<String>, items: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let list = items.into_iter().map(Into::into).collect();
        self.entries.write().insert(key.into(), Value::List(list));
    }

    /// Store a set value
    pub fn insert_set<I, T>(&self, key: impl Into<String>, members: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let set = members.into_iter().map(Into::into).collect();
        self.entries.write().insert(key.into(), Value::Set(set));
    }

    /// Store a hash value
    pub fn insert_hash<I, F, V>(&self, key: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        let hash = fields
            .into_iter()
            .map(|(field, value)| (field.into(), value.into()))
            .collect();
        self.entries.write().insert(key.into(), Value::Hash(hash));
    }

    /// Peek at a string value without counting it as a call
    pub fn peek(&self, key: &str) -> Option<String> {
        match self.entries.read().get(key) {
            Some(Value::String(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Switch every operation to fail with [`Error::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Call counters
    pub fn ops(&self) -> &StoreOps {
        &self.ops
    }

    /// Number of keys of any type
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        StoreOps::bump(&self.ops.pings);
        self.check_available()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        StoreOps::bump(&self.ops.gets);
        self.check_available()?;

        match self.entries.read().get(key) {
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(_) => Err(Error::Protocol(WRONGTYPE.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<bool> {
        StoreOps::bump(&self.ops.sets);
        self.check_available()?;

        self.insert_string(key, value);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        StoreOps::bump(&self.ops.deletes);
        self.check_available()?;

        Ok(self.entries.write().remove(key).map_or(0, |_| 1))
    }

    async fn key_type(&self, key: &str) -> Result<KeyType> {
        StoreOps::bump(&self.ops.types);
        self.check_available()?;

        Ok(self
            .entries
            .read()
            .get(key)
            .map_or(KeyType::None, Value::key_type))
    }

    async fn scan(&self, cursor: u64, count: usize) -> Result<ScanPage> {
        StoreOps::bump(&self.ops.scans);
        self.check_available()?;

        let entries = self.entries.read();
        let start = cursor as usize;
        let count = count.max(1);
        let keys: Vec<String> = entries.keys().skip(start).take(count).cloned().collect();

        let next = start + keys.len();
        let cursor = if keys.len() < count || next >= entries.len() {
            0
        } else {
            next as u64
        };

        Ok(ScanPage { cursor, keys })
    }
}
