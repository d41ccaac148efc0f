//! One-shot background population of the mirror
//!
//! Walks the whole keyspace with a cursor scan, keeps only string-typed
//! keys, and inserts their values into the mirror. Entries already present
//! are left alone, and a key written or deleted in the foreground while its
//! value was in flight is skipped, so foreground writes always win.

use std::sync::Arc;

use mirrorstore::{KeyScan, KvStore};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::mirror::Mirror;
use crate::stats::CacheStats;

/// Progress of the population pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulationState {
    /// The pass was turned off by configuration
    Disabled,
    /// The pass is still walking the keyspace
    Running,
    /// The pass completed
    Done {
        /// Keys inserted by the pass
        cached: usize,
    },
    /// The pass aborted; the mirror holds whatever was cached before the error
    Failed {
        /// Keys inserted before the failure
        cached: usize,
        /// Error that stopped the pass
        reason: String,
    },
}

impl PopulationState {
    /// Whether the pass will make no further progress
    pub fn is_finished(&self) -> bool {
        !matches!(self, PopulationState::Running)
    }
}

/// Run the pass to completion and publish the outcome
pub(crate) async fn run<S: KvStore>(
    store: Arc<S>,
    mirror: Arc<Mirror>,
    stats: Arc<CacheStats>,
    batch: usize,
    state: watch::Sender<PopulationState>,
) {
    let mut cached = 0;
    let outcome = populate(store.as_ref(), &mirror, &stats, batch, &mut cached).await;

    let next = match outcome {
        Ok(()) => {
            info!("Cached {} keys", mirror.len());
            PopulationState::Done { cached }
        }
        Err(e) => {
            error!("Error during caching after {} keys: {}", cached, e);
            PopulationState::Failed {
                cached,
                reason: e.to_string(),
            }
        }
    };

    state.send_replace(next);
}

async fn populate<S: KvStore + ?Sized>(
    store: &S,
    mirror: &Mirror,
    stats: &CacheStats,
    batch: usize,
    cached: &mut usize,
) -> mirrorstore::Result<()> {
    let mut scan = KeyScan::new(store, batch);

    while let Some(keys) = scan.next_batch().await? {
        for key in keys {
            let seen = mirror.epoch(&key);
            let key_type = store.key_type(&key).await?;
            if !key_type.is_scalar() {
                debug!("Skipping {} ({:?})", key, key_type);
                continue;
            }

            // Deleted between SCAN and GET
            let Some(value) = store.get(&key).await? else {
                continue;
            };

            if mirror.fill(key, value, seen) {
                stats.record_insert();
                *cached += 1;
            }
        }
    }

    Ok(())
}
