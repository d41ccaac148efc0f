//! TCP accept loop and per-connection frame pump

use std::sync::Arc;

use anyhow::Result;
use bytes::BytesMut;
use mirrorcache::CachingClient;
use mirrorstore::KvStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::handler::CommandHandler;
use crate::resp::Frame;

/// Accept clients forever, serving each on its own task
pub async fn serve<S: KvStore>(listener: TcpListener, client: Arc<CachingClient<S>>) -> Result<()> {
    let handler = Arc::new(CommandHandler::new(client));

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let handler = Arc::clone(&handler);

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, handler).await {
                        error!("Error handling client {}: {}", addr, e);
                    }
                    debug!("Connection closed: {}", addr);
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
            }
        }
    }
}

async fn handle_client<S: KvStore>(
    mut stream: TcpStream,
    handler: Arc<CommandHandler<S>>,
) -> Result<()> {
    let mut buffer = BytesMut::with_capacity(4096);
    let mut replies = BytesMut::with_capacity(4096);

    loop {
        if stream.read_buf(&mut buffer).await? == 0 {
            return Ok(());
        }

        // Answer every complete frame before writing, so pipelined
        // requests go back in one write.
        loop {
            match Frame::decode(&mut buffer) {
                Ok(Some(cmd)) => handler.handle(cmd).await.encode(&mut replies),
                Ok(None) => break,
                Err(e) => {
                    warn!("Parse error: {}", e);
                    Frame::error(format!("ERR Protocol error: {}", e)).encode(&mut replies);
                    buffer.clear();
                    break;
                }
            }
        }

        if !replies.is_empty() {
            stream.write_all(&replies).await?;
            replies.clear();
        }
    }
}

/// Bind `addr` and log where the proxy listens
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("Proxy listening on {}", listener.local_addr()?);
    Ok(listener)
}
