//! Setup errors

use mirrorstore::ConfigError;
use thiserror::Error;

/// Unrecoverable problems found while bringing a caching client up
///
/// Callers are expected to treat every variant as fatal.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Connection parameters failed validation; no connection was attempted
    #[error("invalid connection settings: {0}")]
    Config(#[from] ConfigError),

    /// The store could not be reached while connecting
    #[error("error while connecting to store: {0}")]
    Connect(#[source] mirrorstore::Error),

    /// The store did not answer the liveness check
    #[error("store is not available: {0}")]
    Liveness(#[source] mirrorstore::Error),
}
