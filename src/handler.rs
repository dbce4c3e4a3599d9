use crate::commands::{command_name, CommandError, Registry};
use crate::connection::{self, write_value, ConnWriter};
use crate::replication::ReplicationManager;
use crate::resp::{RespReader, Value};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    replication: Arc<ReplicationManager>,
) {
    let (reader, writer) = connection::split(stream);
    Session::new(reader, writer, peer.to_string(), registry, replication)
        .run()
        .await;
}

/// One client connection: decode a command, run it, reply, repeat.
///
/// A connection that sends PSYNC becomes a replica. From then on it only gets replies
/// to handshake commands, and the replication manager streams writes to it.
pub struct Session<R> {
    reader: RespReader<R>,
    writer: ConnWriter,
    peer: String,
    registry: Arc<Registry>,
    replication: Arc<ReplicationManager>,
    replica_id: Option<String>,
}

impl<R: AsyncRead + Unpin> Session<R> {
    pub fn new(
        reader: RespReader<R>,
        writer: ConnWriter,
        peer: String,
        registry: Arc<Registry>,
        replication: Arc<ReplicationManager>,
    ) -> Self {
        Self {
            reader,
            writer,
            peer,
            registry,
            replication,
            replica_id: None,
        }
    }

    fn is_replica(&self) -> bool {
        self.replica_id.is_some()
    }

    pub async fn run(mut self) {
        loop {
            match self.reader.read_value().await {
                Ok(Some(value)) => {
                    if let Err(err) = self.handle(value).await {
                        debug!(peer = %self.peer, error = %err, "write failed, closing connection");
                        break;
                    }
                }
                Ok(None) => {
                    debug!(peer = %self.peer, "connection closed");
                    break;
                }
                Err(err) => {
                    warn!(peer = %self.peer, error = %err, "protocol error, closing connection");
                    break;
                }
            }
        }

        if let Some(id) = self.replica_id.take() {
            self.replication.remove_replica(&id);
        }
    }

    /// Runs one command. Writes are forwarded to replicas only when they did not
    /// produce an error reply.
    async fn handle(&mut self, value: Value) -> io::Result<()> {
        let argv = match value {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        let name = match command_name(&argv) {
            Ok(name) => name,
            Err(_) if self.is_replica() => return Ok(()),
            Err(err) => return write_value(&self.writer, &err.into()).await,
        };

        let Some(command) = self.registry.lookup(&name) else {
            if self.is_replica() {
                return Ok(());
            }
            return write_value(&self.writer, &CommandError::UnknownCommand(name).into()).await;
        };

        if name == "PSYNC" && !self.is_replica() {
            let reply = command.execute(&argv[1..]);
            return self.become_replica(reply).await;
        }

        let reply = command.execute(&argv[1..]);
        let succeeded = !matches!(reply, Value::SimpleError(_));

        if !self.is_replica() && succeeded && self.registry.is_write_command(&name) {
            self.replication.propagate_command(&argv).await;
        }
        if !self.is_replica() || self.registry.is_handshake_command(&name) {
            write_value(&self.writer, &reply).await?;
        }
        Ok(())
    }

    /// Registers this connection as a replica and sends the resync reply. The writer
    /// stays locked across both, so no propagated command can overtake the snapshot.
    async fn become_replica(&mut self, reply: Value) -> io::Result<()> {
        let id = ReplicationManager::replica_id(&self.peer);
        let encoded = reply.encode();

        let mut writer = self.writer.lock().await;
        self.replication.add_replica(id.clone(), self.writer.clone());
        self.replica_id = Some(id);
        writer.write_all(&encoded).await?;
        writer.flush().await
    }
}
