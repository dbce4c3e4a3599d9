mod commands;
mod config;
mod connection;
mod db;
mod handler;
mod lists;
mod rdb;
mod replication;
mod resp;
mod types;

use anyhow::Context;
use clap::Parser;
use commands::Registry;
use config::Config;
use db::InMemoryDB;
use handler::handle_client;
use rdb::load_db_from_rdb;
use replication::link::run_replica_link;
use replication::ReplicationManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use types::{Role, ServerState};

const REAP_INTERVAL: Duration = Duration::from_secs(1);

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(Config::parse());
    let primary = config.primary_addr()?;

    let db = InMemoryDB::new();
    let rdb_path = config.rdb_path();
    let table = load_db_from_rdb(&rdb_path)
        .await
        .with_context(|| format!("refusing to start with unreadable snapshot {}", rdb_path.display()))?;
    let loaded = db.load_snapshot(table);
    info!(path = %rdb_path.display(), keys = loaded, "snapshot loaded");
    db.spawn_reaper(REAP_INTERVAL);

    let role = if config.is_replica() { Role::Slave } else { Role::Master };
    let state = Arc::new(ServerState::new(role));
    let registry = Arc::new(Registry::new(db.clone(), config.clone(), state));
    let replication = Arc::new(ReplicationManager::new());

    if let Some(primary) = primary {
        info!(%primary, "starting as replica");
        tokio::spawn(run_replica_link(primary, config.port, registry.clone(), db.clone()));
    }

    let listener_address = format!("127.0.0.1:{}", config.port);
    let listener = TcpListener::bind(&listener_address)
        .await
        .with_context(|| format!("failed to bind {listener_address}"))?;
    info!(address = %listener_address, %role, "listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                tokio::spawn(handle_client(
                    stream,
                    peer,
                    registry.clone(),
                    replication.clone(),
                ));
            }
            Err(err) => error!(error = %err, "accept failed"),
        }
    }
}
