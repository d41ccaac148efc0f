//! # mirrorstore
//!
//! Boundary between a local mirror and the key-value store it mirrors.
//!
//! ## Contents
//! - **KvStore**: ping, get, set, delete, type, and cursor scan
//! - **RedisStore**: `KvStore` over a Redis connection manager
//! - **MemoryStore**: in-process `KvStore` with call counters
//! - **ConnectionParams**: host/port/password validation

#![warn(missing_docs)]

mod error;
mod memory;
mod params;
mod remote;
mod store;

pub use error::{ConfigError, Error, Result};
pub use memory::{MemoryStore, StoreOps};
pub use params::{ConnectionParams, Endpoint};
pub use remote::RedisStore;
pub use store::{KeyScan, KeyType, KvStore, ScanPage};
