//! Primary/replica plumbing.
//!
//! On a primary, [`ReplicationManager`] owns the set of connected replicas and pushes
//! every write command to them. On a replica, [`link`] keeps a connection to the
//! primary alive, running the [`handshake`] and then applying the command stream.

pub mod handshake;
pub mod link;

use crate::connection::{write_bytes, ConnWriter};
use crate::resp::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Default)]
pub struct ReplicationManager {
    replicas: RwLock<HashMap<String, ConnWriter>>,
}

impl ReplicationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// An id unique to one replica connection: its address plus the moment it
    /// upgraded.
    pub fn replica_id(peer: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        format!("replica_{peer}_{nanos}")
    }

    pub fn add_replica(&self, id: String, conn: ConnWriter) {
        let mut replicas = self.replicas.write();
        replicas.insert(id.clone(), conn);
        info!(replica = %id, total = replicas.len(), "replica added");
    }

    pub fn remove_replica(&self, id: &str) -> bool {
        let mut replicas = self.replicas.write();
        let removed = replicas.remove(id).is_some();
        if removed {
            info!(replica = %id, total = replicas.len(), "replica removed");
        }
        removed
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().len()
    }

    /// Sends `argv` as a command array to every registered replica. The set is copied
    /// out under the lock and written to after it is released; a replica whose write
    /// fails is only logged; its own session notices the broken socket.
    pub async fn propagate_command(&self, argv: &[Value]) {
        let targets: Vec<(String, ConnWriter)> = self
            .replicas
            .read()
            .iter()
            .map(|(id, conn)| (id.clone(), conn.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let encoded = Value::Array(argv.to_vec()).encode();
        for (id, conn) in targets {
            if let Err(err) = write_bytes(&conn, &encoded).await {
                warn!(replica = %id, error = %err, "failed to propagate command");
            }
        }
    }
}
