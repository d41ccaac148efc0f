//! MirrorKV Daemon - RESP proxy in front of a locally mirrored Redis

use std::fmt::Display;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use mirrorcache::{CacheConfig, CachingClient, DEFAULT_SCAN_BATCH};
use mirrorstore::ConnectionParams;
use tokio::net::TcpStream;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Store host, optionally with an embedded port (host:port)
    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    host: String,

    /// Store port (a port embedded in --host wins)
    #[arg(short, long, env = "REDIS_PORT", default_value_t = 6379)]
    port: u16,

    /// Store password (ignored unless longer than one character)
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Store ACL user
    #[arg(long, env = "REDIS_USERNAME")]
    username: Option<String>,

    /// Logical database index
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    database: i64,

    /// Response encoding
    #[arg(long, default_value = "utf-8")]
    encoding: String,

    /// Convert non-UTF-8 values lossily instead of failing the read
    #[arg(long)]
    raw_responses: bool,

    /// Proxy bind address
    #[arg(short, long, env = "MIRRORD_BIND", default_value = "127.0.0.1:6380")]
    bind: String,

    /// Page size hint for the startup scan
    #[arg(long, default_value_t = DEFAULT_SCAN_BATCH)]
    scan_batch: usize,

    /// Skip the startup scan; the mirror fills on reads only
    #[arg(long)]
    no_populate: bool,

    /// Health check mode (for Docker)
    #[arg(long)]
    health: bool,
}

impl Args {
    fn connection_params(&self) -> ConnectionParams {
        let mut params = ConnectionParams::new(self.host.clone())
            .with_port(self.port)
            .with_database(self.database)
            .with_encoding(self.encoding.clone())
            .with_decode_responses(!self.raw_responses);

        if let Some(password) = &self.password {
            params = params.with_password(password.clone());
        }
        if let Some(username) = &self.username {
            params = params.with_username(username.clone());
        }
        params
    }

    fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            populate_on_start: !self.no_populate,
            scan_batch: self.scan_batch,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    if args.health {
        match TcpStream::connect(&args.bind).await {
            Ok(_) => {
                println!("OK");
                std::process::exit(0);
            }
            Err(_) => {
                eprintln!("FAILED");
                std::process::exit(1);
            }
        }
    }

    info!("Starting MirrorKV Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Starting store mirror on {}:{}", args.host, args.port);

    let client = match CachingClient::connect(&args.connection_params(), args.cache_config()).await
    {
        Ok(client) => client,
        Err(e) => fatal(e),
    };

    if let Err(e) = client.ensure_live().await {
        fatal(unreachable_store(&e, &args.host, args.port));
    }

    let listener = mirrord::bind(&args.bind).await?;

    println!("\nMirrorKV proxy ready");
    println!("   Connection String: redis://{}", args.bind);
    println!("   Mirroring:         {}:{}", args.host, args.port);
    println!(
        "   Population:        {}",
        if args.no_populate { "off" } else { "background scan" }
    );
    println!("\nPress Ctrl+C to stop\n");

    mirrord::serve(listener, Arc::new(client)).await
}

fn fatal(e: impl Display) -> ! {
    error!("{}", e);
    std::process::exit(1);
}

fn unreachable_store(e: &impl Display, host: &str, port: u16) -> String {
    format!("{} ({}:{})", e, host, port)
}
