//! stakeindex daemon — sync a chain node into the local relational model.
//!
//! Usage:
//! ```bash
//! stakeindex run       # follow the node configured via environment
//! stakeindex status    # print the persisted sync position
//! stakeindex version
//! ```
//!
//! Configuration (environment):
//! - `STAKEINDEX_NODE_URL`       node base URL (default `http://localhost:8732`)
//! - `STAKEINDEX_DB`             SQLite path (default `./stakeindex.db`)
//! - `STAKEINDEX_GENESIS`        genesis block hash
//! - `STAKEINDEX_POLL_MS`        head poll interval (default 1000)
//! - `STAKEINDEX_DIAG_SECS`      diagnostics interval, 0 disables (default 600)
//!
//! Exit status: non-zero on fatal errors (schema mismatch, corrupt genesis,
//! unknown protocol); transient node trouble never exits — the observer
//! retries with backoff and the status accessor reports unhealthy.

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use stakeindex_core::diagnostics::Diagnostics;
use stakeindex_core::engine::IndexingEngine;
use stakeindex_core::observer::{Observer, ObserverConfig, SyncStatus};
use stakeindex_core::store::Storage;
use stakeindex_node::HttpNodeClient;
use stakeindex_proto::standard_registry;
use stakeindex_storage::sqlite::SqliteStorage;

const DEFAULT_GENESIS: &str = "BLockGenesisGenesis11111111111111111111111111111111";

#[derive(Debug, Clone)]
struct Config {
    node_url: String,
    db_path: String,
    genesis: String,
    poll_interval: Duration,
    diagnostics_interval: Option<Duration>,
}

fn config_from_env() -> Result<Config> {
    let env_or = |key: &str, default: &str| env::var(key).unwrap_or_else(|_| default.into());
    let poll_ms: u64 = env_or("STAKEINDEX_POLL_MS", "1000")
        .parse()
        .context("STAKEINDEX_POLL_MS must be an integer")?;
    let diag_secs: u64 = env_or("STAKEINDEX_DIAG_SECS", "600")
        .parse()
        .context("STAKEINDEX_DIAG_SECS must be an integer")?;
    Ok(Config {
        node_url: env_or("STAKEINDEX_NODE_URL", "http://localhost:8732"),
        db_path: env_or("STAKEINDEX_DB", "./stakeindex.db"),
        genesis: env_or("STAKEINDEX_GENESIS", DEFAULT_GENESIS),
        poll_interval: Duration::from_millis(poll_ms),
        diagnostics_interval: (diag_secs > 0).then(|| Duration::from_secs(diag_secs)),
    })
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("run");

    let result = match command {
        "run" => cmd_run().await,
        "status" => cmd_status().await,
        "version" | "--version" | "-V" => {
            println!("stakeindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("stakeindex: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("stakeindex {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe indexer for cycle-based proof-of-stake chains\n");
    println!("USAGE:");
    println!("    stakeindex <COMMAND>\n");
    println!("COMMANDS:");
    println!("    run      Follow the configured node (default)");
    println!("    status   Print the persisted sync position");
    println!("    version  Print version");
    println!("    help     Print this help");
}

async fn cmd_run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config_from_env()?;
    tracing::info!(node = %config.node_url, db = %config.db_path, "starting");

    // A schema version mismatch fails here, before anything else runs.
    let store: Arc<dyn Storage> =
        Arc::new(SqliteStorage::open(&config.db_path).await.context("open storage")?);

    let engine = IndexingEngine::bootstrap(store.clone(), standard_registry(), &config.genesis, 0)
        .await
        .context("bootstrap")?;

    let node = Arc::new(HttpNodeClient::default_for(&config.node_url));
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let observer = Observer::new(
        node.clone(),
        engine,
        ObserverConfig { poll_interval: config.poll_interval, ..Default::default() },
        cancel_rx.clone(),
    );
    let status = observer.status();

    let diag_handle = config.diagnostics_interval.map(|interval| {
        let diagnostics = Diagnostics::new(node, store.clone(), interval);
        tokio::spawn(diagnostics.run(cancel_rx))
    });

    let mut observer_handle = tokio::spawn(observer.run());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            cancel_tx.send(true).ok();
            observer_handle.await.context("join observer")??;
        }
        result = &mut observer_handle => {
            // Only fatal errors make the observer return.
            result.context("join observer")??;
        }
    }
    if let Some(handle) = diag_handle {
        handle.abort();
    }

    let final_status = status.read().expect("status lock poisoned").clone();
    tracing::info!(level = final_status.level, hash = %final_status.hash, "stopped");
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let config = config_from_env()?;
    let store = SqliteStorage::open(&config.db_path).await.context("open storage")?;
    match store.load_app_state().await? {
        Some(state) => {
            let status = SyncStatus {
                level: state.level,
                hash: state.hash.clone(),
                protocol: state.protocol.clone(),
                is_syncing: !state.is_synced(),
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        None => println!("(empty database)"),
    }
    Ok(())
}
