//! The capability set a backing store must offer

use async_trait::async_trait;

use crate::error::Result;

/// Type of the value stored under a key, as reported by `TYPE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    /// Plain string value
    String,
    /// List
    List,
    /// Set
    Set,
    /// Sorted set
    ZSet,
    /// Hash
    Hash,
    /// Stream
    Stream,
    /// Key does not exist
    None,
    /// Any type this crate does not know about (module types), as reported
    Other(String),
}

impl KeyType {
    /// Map a `TYPE` reply to a key type
    pub fn from_reply(reply: &str) -> Self {
        match reply.to_ascii_lowercase().as_str() {
            "string" => KeyType::String,
            "list" => KeyType::List,
            "set" => KeyType::Set,
            "zset" => KeyType::ZSet,
            "hash" => KeyType::Hash,
            "stream" => KeyType::Stream,
            "none" => KeyType::None,
            _ => KeyType::Other(reply.to_string()),
        }
    }

    /// Only string values are mirrored by a local cache
    pub fn is_scalar(&self) -> bool {
        matches!(self, KeyType::String)
    }
}

/// One page of a cursor-based key scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call; `0` means the scan is complete
    pub cursor: u64,
    /// Keys returned by this call (may be empty even mid-scan)
    pub keys: Vec<String>,
}

/// Remote key-value store used as the source of truth
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Check that the store answers
    async fn ping(&self) -> Result<()>;

    /// Read a string value; `None` if the key does not exist
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value, returning the store's success indicator
    async fn set(&self, key: &str, value: &str) -> Result<bool>;

    /// Delete a key, returning the number of keys removed
    async fn delete(&self, key: &str) -> Result<u64>;

    /// Report the type of the value under `key`
    async fn key_type(&self, key: &str) -> Result<KeyType>;

    /// Fetch one page of keys starting at `cursor`
    ///
    /// `count` is a hint for the page size, not a limit.
    async fn scan(&self, cursor: u64, count: usize) -> Result<ScanPage>;
}

/// Streaming enumeration of every key in a store
///
/// Pages are pulled one at a time so the keyspace is never held in memory
/// as a whole.
pub struct KeyScan<'a, S: KvStore + ?Sized> {
    store: &'a S,
    cursor: u64,
    count: usize,
    finished: bool,
}

impl<'a, S: KvStore + ?Sized> KeyScan<'a, S> {
    /// Start a scan over `store` with the given page size hint
    pub fn new(store: &'a S, count: usize) -> Self {
        Self {
            store,
            cursor: 0,
            count: count.max(1),
            finished: false,
        }
    }

    /// Fetch the next non-empty batch of keys, or `None` once exhausted
    pub async fn next_batch(&mut self) -> Result<Option<Vec<String>>> {
        while !self.finished {
            let page = self.store.scan(self.cursor, self.count).await?;
            self.cursor = page.cursor;
            self.finished = page.cursor == 0;

            if !page.keys.is_empty() {
                return Ok(Some(page.keys));
            }
        }
        Ok(None)
    }
}
