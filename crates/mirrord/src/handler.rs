//! Command handler for the RESP proxy

use std::sync::Arc;

use mirrorcache::{CachingClient, PopulationState};
use mirrorstore::KvStore;
use tracing::warn;

use crate::resp::Frame;

/// Dispatches decoded commands to a caching client
pub struct CommandHandler<S: KvStore> {
    client: Arc<CachingClient<S>>,
}

impl<S: KvStore> CommandHandler<S> {
    /// Handler serving every connection from the same shared client
    pub fn new(client: Arc<CachingClient<S>>) -> Self {
        Self { client }
    }

    /// Execute one command frame and produce its reply
    pub async fn handle(&self, cmd: Frame) -> Frame {
        let args = match cmd {
            Frame::Array(Some(args)) if !args.is_empty() => args,
            _ => return Frame::error("ERR invalid command format"),
        };

        let Some(name) = text(&args[0]) else {
            return Frame::error("ERR invalid command");
        };
        let name = name.to_ascii_uppercase();
        let args = &args[1..];

        match name.as_str() {
            "PING" => self.ping(args),
            "ECHO" => self.echo(args),
            "GET" => self.get(args).await,
            "SET" => self.set(args).await,
            "DEL" => self.del(args).await,
            "EXISTS" => self.exists(args).await,
            "DBSIZE" => Frame::Integer(self.client.cache_len() as i64),
            "INFO" => self.info(),
            "CLIENT" => self.client_cmd(args),
            // redis-cli asks for the command table on connect
            "COMMAND" => Frame::Array(Some(vec![])),
            _ => Frame::error(format!("ERR unknown command '{}'", name)),
        }
    }

    fn ping(&self, args: &[Frame]) -> Frame {
        match args {
            [] => Frame::Simple("PONG".to_string()),
            [message] => message.clone(),
            _ => wrong_arity("ping"),
        }
    }

    fn echo(&self, args: &[Frame]) -> Frame {
        match args {
            [message] => message.clone(),
            _ => wrong_arity("echo"),
        }
    }

    async fn get(&self, args: &[Frame]) -> Frame {
        let [key] = args else {
            return wrong_arity("get");
        };
        let Some(key) = text(key) else {
            return Frame::error("ERR invalid key");
        };

        match self.client.get(&key).await {
            Ok(Some(value)) => Frame::bulk(value),
            Ok(None) => Frame::null(),
            Err(e) => store_error("GET", e),
        }
    }

    async fn set(&self, args: &[Frame]) -> Frame {
        let (key, value) = match args {
            [key, value] => (key, value),
            [_, _, ..] => return Frame::error("ERR syntax error"),
            _ => return wrong_arity("set"),
        };
        let (Some(key), Some(value)) = (text(key), text(value)) else {
            return Frame::error("ERR invalid key or value");
        };

        match self.client.set(&key, &value).await {
            Ok(true) => Frame::ok(),
            Ok(false) if key.is_empty() || value.is_empty() => {
                Frame::error("ERR empty key or value")
            }
            Ok(false) => Frame::null(),
            Err(e) => store_error("SET", e),
        }
    }

    async fn del(&self, args: &[Frame]) -> Frame {
        if args.is_empty() {
            return wrong_arity("del");
        }

        let mut removed = 0u64;
        for arg in args {
            let Some(key) = text(arg) else {
                return Frame::error("ERR invalid key");
            };
            match self.client.delete(&key).await {
                Ok(n) => removed += n,
                Err(e) => return store_error("DEL", e),
            }
        }

        Frame::Integer(removed as i64)
    }

    async fn exists(&self, args: &[Frame]) -> Frame {
        if args.is_empty() {
            return wrong_arity("exists");
        }

        let mut count = 0i64;
        for arg in args {
            let Some(key) = text(arg) else {
                return Frame::error("ERR invalid key");
            };
            match self.client.get(&key).await {
                Ok(Some(_)) => count += 1,
                Ok(None) => {}
                Err(e) => return store_error("EXISTS", e),
            }
        }

        Frame::Integer(count)
    }

    fn info(&self) -> Frame {
        let stats = self.client.stats().snapshot();
        let (population, populated) = match self.client.population() {
            PopulationState::Disabled => ("disabled", 0),
            PopulationState::Running => ("running", 0),
            PopulationState::Done { cached } => ("done", cached),
            PopulationState::Failed { cached, .. } => ("failed", cached),
        };

        let info = format!(
            "# Server\r\n\
             mirrord_version:{}\r\n\
             \r\n\
             # Mirror\r\n\
             cached_keys:{}\r\n\
             cache_hits:{}\r\n\
             cache_misses:{}\r\n\
             cache_inserts:{}\r\n\
             cache_removals:{}\r\n\
             cache_hit_ratio:{:.2}\r\n\
             population:{}\r\n\
             populated_keys:{}\r\n",
            env!("CARGO_PKG_VERSION"),
            self.client.cache_len(),
            stats.hits,
            stats.misses,
            stats.inserts,
            stats.removals,
            stats.hit_ratio,
            population,
            populated,
        );
        Frame::bulk(info)
    }

    fn client_cmd(&self, args: &[Frame]) -> Frame {
        let Some(sub) = args.first().and_then(text) else {
            return wrong_arity("client");
        };

        match sub.to_ascii_uppercase().as_str() {
            // Client libraries announce themselves on connect
            "SETINFO" | "SETNAME" => Frame::ok(),
            _ => Frame::error(format!("ERR unknown subcommand '{}'", sub)),
        }
    }
}

fn text(frame: &Frame) -> Option<String> {
    match frame {
        Frame::Bulk(Some(data)) => String::from_utf8(data.clone()).ok(),
        Frame::Simple(s) => Some(s.clone()),
        _ => None,
    }
}

fn wrong_arity(command: &str) -> Frame {
    Frame::error(format!(
        "ERR wrong number of arguments for '{}' command",
        command
    ))
}

fn store_error(command: &str, e: mirrorstore::Error) -> Frame {
    warn!("{} failed: {}", command, e);
    Frame::error(format!("ERR {}", e))
}
