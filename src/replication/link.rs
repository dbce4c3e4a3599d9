use super::handshake::Handshake;
use crate::commands::Registry;
use crate::db::InMemoryDB;
use crate::rdb;
use crate::resp::{ProtocolError, RespReader, Value};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Keeps this replica attached to `primary` forever, starting over after
/// `RETRY_DELAY` whenever the link fails or closes.
pub async fn run_replica_link(
    primary: String,
    listening_port: u16,
    registry: Arc<Registry>,
    db: InMemoryDB,
) {
    loop {
        match sync_with_primary(&primary, listening_port, &registry, &db).await {
            Ok(()) => info!(%primary, "primary closed the replication link"),
            Err(err) => warn!(%primary, error = %format!("{err:#}"), "replication link failed"),
        }
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

async fn sync_with_primary(
    primary: &str,
    listening_port: u16,
    registry: &Registry,
    db: &InMemoryDB,
) -> anyhow::Result<()> {
    let stream = TcpStream::connect(primary)
        .await
        .with_context(|| format!("failed to connect to primary {primary}"))?;
    info!(%primary, "connected to primary");

    // The write half must outlive the command stream: dropping it shuts the socket down.
    let (read, mut write) = stream.into_split();
    let mut reader = RespReader::new(read);

    let resync = Handshake::new(listening_port)
        .run(&mut reader, &mut write)
        .await?;
    let snapshot = reader
        .read_raw_file()
        .await
        .context("failed to read resync snapshot")?;
    let table = rdb::parse(&snapshot).context("primary sent an invalid snapshot")?;
    let loaded = db.replace_with_snapshot(table);
    info!(replid = %resync.replid, offset = resync.offset, keys = loaded, "full resync complete");

    apply_stream(&mut reader, registry).await?;
    Ok(())
}

/// Applies propagated commands until the primary closes the stream. Replies are
/// computed and dropped; the primary expects none.
pub async fn apply_stream<R>(
    reader: &mut RespReader<R>,
    registry: &Registry,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    while let Some(value) = reader.read_value().await? {
        let argv = match value {
            Value::Array(argv) => argv,
            other => {
                warn!(value = ?other, "ignoring non-command from primary");
                continue;
            }
        };
        if let Value::SimpleError(msg) = registry.dispatch(&argv) {
            debug!(%msg, "propagated command failed");
        }
    }
    Ok(())
}
