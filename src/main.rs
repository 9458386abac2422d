use std::path::PathBuf;

use tabdeck_server::ServerConfig;
use tabdeck_store::Database;
use tabdeck_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() {
    init_telemetry(TelemetryConfig::default());

    tracing::info!("starting tabdeck coordinator");

    let cache_dir = dirs_home().join(".tabdeck").join("database");
    std::fs::create_dir_all(&cache_dir).expect("failed to create database directory");
    let db_path = cache_dir.join("cache.db");

    let db = Database::open(&db_path).expect("failed to open cache database");

    let config = ServerConfig::default();
    let port = config.port;
    let _handle = tabdeck_server::start(config, db)
        .await
        .expect("failed to start coordinator server");

    tracing::info!(port, "tabdeck coordinator ready");

    // Long-lived background agent: run until interrupted.
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
