//! Connection parameters and their validation
//!
//! Accepted host forms:
//! ```text
//! myhost            (port taken from the explicit port)
//! myhost:1234       (embedded port wins over the explicit port)
//! ```
//! URL-style hosts (`http://...`, `https://...`) are rejected.

use std::fmt;

use crate::error::ConfigError;

/// Raw connection settings as they come from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Host name, optionally with an embedded `:port`
    pub host: String,
    /// Explicit port, overridden by a port embedded in `host`
    pub port: Option<u16>,
    /// Password; dropped unless longer than one character
    pub password: Option<String>,
    /// ACL user name
    pub username: Option<String>,
    /// Logical database index
    pub database: i64,
    /// Response encoding, only UTF-8 is supported
    pub encoding: String,
    /// Decode values as strict UTF-8 instead of lossy byte conversion
    pub decode_responses: bool,
}

impl ConnectionParams {
    /// Create parameters for `host` with all other settings at their defaults
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            password: None,
            username: None,
            database: 0,
            encoding: "utf-8".to_string(),
            decode_responses: true,
        }
    }

    /// Set the explicit port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the ACL user name
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Select the logical database
    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    /// Set the response encoding
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Toggle strict UTF-8 decoding of values
    pub fn with_decode_responses(mut self, decode: bool) -> Self {
        self.decode_responses = decode;
        self
    }

    /// Validate the parameters and produce a connectable endpoint
    ///
    /// # Returns
    /// * `Result<Endpoint, ConfigError>` - Endpoint, or the first problem found
    pub fn resolve(&self) -> Result<Endpoint, ConfigError> {
        let raw = self.host.trim();

        if has_http_scheme(raw) {
            return Err(ConfigError::HttpScheme(raw.to_string()));
        }

        let (host, port) = match raw.split_once(':') {
            Some((host, port)) => (host, Some(parse_port(port)?)),
            None => (raw, self.port),
        };

        if host.is_empty() {
            return Err(ConfigError::MissingHost);
        }

        let port = match port {
            Some(port) if port > 0 => port,
            _ => return Err(ConfigError::MissingPort),
        };

        if !is_utf8_label(&self.encoding) {
            return Err(ConfigError::UnsupportedEncoding(self.encoding.clone()));
        }

        Ok(Endpoint {
            host: host.to_string(),
            port,
            password: self
                .password
                .clone()
                .filter(|password| password.chars().count() > 1),
            username: self.username.clone().filter(|name| !name.is_empty()),
            database: self.database,
            decode_responses: self.decode_responses,
        })
    }
}

/// Validated connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name without port
    pub host: String,
    /// Positive port number
    pub port: u16,
    /// Password to authenticate with
    pub password: Option<String>,
    /// ACL user name
    pub username: Option<String>,
    /// Logical database index
    pub database: i64,
    /// Decode values as strict UTF-8
    pub decode_responses: bool,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn has_http_scheme(host: &str) -> bool {
    let lower = host.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidPort(raw.to_string()))
}

fn is_utf8_label(encoding: &str) -> bool {
    matches!(encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8")
}
