//! `beetle-server`: loads configuration, opens the sharded storage engine,
//! and serves the RESP wire protocol until a shutdown signal arrives.

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

use beetle::config::Config;
use beetle::net::Acceptor;
use beetle::storage::ShardedEngine;

/// Args for beetle-server.
#[derive(Parser)]
#[clap(author, version, about)]
struct ServerArgs {
    /// Path to a beetle config file; defaults are used for anything it
    /// doesn't mention, and entirely if this is omitted.
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("{e}");
        exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();
    let config = match args.config {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    info!("starting beetle-server with {config}");

    let engine = Arc::new(ShardedEngine::open_with_config(
        &config.storage_directory,
        config.database_shards,
        config.log_file_size,
    )?);
    spawn_maintenance_tasks(Arc::clone(&engine), &config);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let acceptor = Arc::new(Acceptor::bind(addr, Arc::clone(&engine)).await?);
    let worker_count = 2 * num_cpus::get();

    acceptor.run(worker_count, shutdown_signal()).await;

    info!("flushing shards before exit");
    engine.sync_all()?;
    Ok(())
}

/// Runs the periodic `log_rotation_interval`/`merge_interval` ticks from
/// spec.md section 4.E as independent background tasks, one per concern,
/// shared across every shard.
fn spawn_maintenance_tasks(engine: Arc<ShardedEngine>, config: &Config) {
    let rotation_interval = config.log_rotation_interval;
    let rotation_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(rotation_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            let engine = Arc::clone(&rotation_engine);
            match tokio::task::spawn_blocking(move || engine.rotate_all()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("scheduled rotation failed: {e}"),
                Err(e) => warn!("scheduled rotation task panicked: {e}"),
            }
        }
    });

    let merge_interval = config.merge_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(merge_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let engine = Arc::clone(&engine);
            match tokio::task::spawn_blocking(move || engine.merge_all()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("scheduled merge failed: {e}"),
                Err(e) => warn!("scheduled merge task panicked: {e}"),
            }
        }
    });
}

/// Resolves once a `SIGINT` (or `SIGTERM` on unix) arrives, so the acceptor
/// can stop accepting and every shard can flush before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
