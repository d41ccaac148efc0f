//! Redis-backed store
//!
//! Uses a single multiplexed connection; each call clones the handle, which
//! shares the underlying socket. The connection is made once with no retry.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, IntoConnectionInfo, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::params::Endpoint;
use crate::store::{KeyType, KvStore, ScanPage};

/// Store backed by a Redis server
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    decode_responses: bool,
}

impl RedisStore {
    /// Connect to the server at `endpoint`
    ///
    /// The initial connection is made eagerly, so an unreachable server is
    /// reported here rather than on the first operation.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let mut info = (endpoint.host.clone(), endpoint.port).into_connection_info()?;
        info.redis.db = endpoint.database;
        info.redis.username = endpoint.username.clone();
        info.redis.password = endpoint.password.clone();

        let client = redis::Client::open(info)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!("Connected to {}", endpoint);

        Ok(Self {
            conn,
            decode_responses: endpoint.decode_responses,
        })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;

        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(Error::Protocol(format!("unexpected PING reply: {}", reply)))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn.get(key).await?;

        match raw {
            Some(bytes) if self.decode_responses => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| Error::Decode(e.to_string())),
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Value = conn.set(key, value).await?;

        Ok(match reply {
            Value::Okay => true,
            Value::Status(status) => status.eq_ignore_ascii_case("OK"),
            _ => false,
        })
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed)
    }

    async fn key_type(&self, key: &str) -> Result<KeyType> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
        Ok(KeyType::from_reply(&reply))
    }

    async fn scan(&self, cursor: u64, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        Ok(ScanPage { cursor, keys })
    }
}
