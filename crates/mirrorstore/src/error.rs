//! Error types for mirrorstore

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a backing store while serving an operation
#[derive(Debug, Error)]
pub enum Error {
    /// Error reported by the Redis client (I/O, protocol, or server reply)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store refused the operation because it is not reachable
    #[error("Store unavailable")]
    Unavailable,

    /// A value could not be decoded as UTF-8
    #[error("Decode error: {0}")]
    Decode(String),

    /// The store replied with something the operation did not expect
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors found while validating connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Host was given as a URL instead of a host name
    #[error("host should not start with http: {0}")]
    HttpScheme(String),

    /// Host is empty after parsing
    #[error("host not found")]
    MissingHost,

    /// No port given and none embedded in the host
    #[error("port number not found")]
    MissingPort,

    /// Port is not a positive integer in range
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Only UTF-8 responses are supported
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),
}
