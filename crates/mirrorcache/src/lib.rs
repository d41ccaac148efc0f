//! # mirrorcache
//!
//! In-process mirror of a remote key-value store.
//!
//! ## Behaviour
//! - **get**: served from the mirror, else read through from the store
//! - **set**: written to the mirror and through to the store
//! - **delete**: removed from the mirror and the store
//! - **population**: one background scan of string keys at startup
//!
//! The mirror is unbounded and has no expiry.

#![warn(missing_docs)]

mod cache;
mod error;
mod mirror;
mod populate;
mod stats;

pub use cache::{CacheConfig, CachingClient, DEFAULT_SCAN_BATCH};
pub use error::SetupError;
pub use populate::PopulationState;
pub use stats::{CacheStats, StatsSnapshot};
