//! Sessionrpc Server - serves the example user/broadcast application.
//!
//! Prints `RPC_PORT=<port>` on stdout once listening, so a parent process can
//! pick up an auto-assigned port.

use anyhow::Result;
use clap::Parser;
use sessionrpc_core::{
    ConcurrencyPolicy, DispatcherConfig, LogConfig, MemorySessionStore, SessionConfig,
    SessionStore, SessionStoreConfig, SqliteSessionStore,
};
use sessionrpc_server::{demo, start_server};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "sessionrpc-server")]
#[command(about = "Session-scoped RPC server with WebSocket push")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// SQLite file for durable sessions (in-memory when omitted)
    #[arg(long)]
    session_db: Option<PathBuf>,

    /// Seconds a session survives without being written
    #[arg(
        long,
        default_value = "86400",
        value_parser = clap::value_parser!(u64).range(1..=SessionConfig::MAX_AGE_LIMIT.as_secs())
    )]
    session_max_age: u64,

    /// Let overlapping calls on one session race instead of queueing them
    #[arg(long)]
    last_write_wins: bool,

    /// Log outgoing proxy requests
    #[arg(long)]
    log_requests: bool,

    /// Include payloads in call and request log lines
    #[arg(long)]
    log_data: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting sessionrpc server");

    let store_config = SessionStoreConfig {
        max_age: Duration::from_secs(args.session_max_age),
        ..Default::default()
    };
    let store: Arc<dyn SessionStore> = match &args.session_db {
        Some(path) => {
            info!("Session database: {}", path.display());
            Arc::new(SqliteSessionStore::with_config(path, store_config)?)
        }
        None => Arc::new(MemorySessionStore::with_config(store_config)),
    };

    let config = DispatcherConfig {
        log: LogConfig {
            requests: args.log_requests,
            data: args.log_data,
            ..Default::default()
        },
        policy: if args.last_write_wins {
            ConcurrencyPolicy::LastWriteWins
        } else {
            ConcurrencyPolicy::SerializedPerSession
        },
    };

    let dispatcher = demo::build_dispatcher(store, config)?;
    let addr = start_server(Arc::new(dispatcher), &args.host, args.port).await?;

    // Print port for the parent process to read (intentional stdout)
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
