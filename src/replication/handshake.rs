use crate::resp::{ProtocolError, RespReader, Value};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Where a replica is in its handshake with the primary. Each step moves forward by
/// one on an accepted reply; any failure drops back to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Disconnected,
    Connected,
    PingAcked,
    PortAcked,
    CapaAcked,
    ResyncAcked,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("{step}: failed to send command: {source}")]
    Send { step: &'static str, source: io::Error },
    #[error("{step}: failed to read reply: {source}")]
    Read {
        step: &'static str,
        source: ProtocolError,
    },
    #[error("{step}: primary closed the connection")]
    Closed { step: &'static str },
    #[error("{step}: unexpected reply {reply:?}")]
    UnexpectedReply { step: &'static str, reply: Value },
}

/// What the primary said when it accepted the resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullResync {
    pub replid: String,
    pub offset: u64,
}

struct Step {
    name: &'static str,
    command: Value,
    accepts: fn(&Value) -> bool,
    next: HandshakeState,
}

fn is_simple(reply: &Value, expected: &str) -> bool {
    matches!(reply, Value::SimpleString(s) if s == expected)
}

fn is_full_resync(reply: &Value) -> bool {
    matches!(reply, Value::SimpleString(s) if s.starts_with("FULLRESYNC ") && s.len() > 11)
}

pub struct Handshake {
    state: HandshakeState,
    listening_port: u16,
}

impl Handshake {
    pub fn new(listening_port: u16) -> Self {
        Self {
            state: HandshakeState::Disconnected,
            listening_port,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn step(&self) -> Option<Step> {
        let port = self.listening_port.to_string();
        let step = match self.state {
            HandshakeState::Connected => Step {
                name: "PING",
                command: Value::command(&["PING"]),
                accepts: |r| is_simple(r, "PONG"),
                next: HandshakeState::PingAcked,
            },
            HandshakeState::PingAcked => Step {
                name: "REPLCONF listening-port",
                command: Value::command(&["REPLCONF", "listening-port", port.as_str()]),
                accepts: |r| is_simple(r, "OK"),
                next: HandshakeState::PortAcked,
            },
            HandshakeState::PortAcked => Step {
                name: "REPLCONF capa",
                command: Value::command(&["REPLCONF", "capa", "psync2"]),
                accepts: |r| is_simple(r, "OK"),
                next: HandshakeState::CapaAcked,
            },
            HandshakeState::CapaAcked => Step {
                name: "PSYNC",
                command: Value::command(&["PSYNC", "?", "-1"]),
                accepts: is_full_resync,
                next: HandshakeState::ResyncAcked,
            },
            HandshakeState::Disconnected | HandshakeState::ResyncAcked => return None,
        };
        Some(step)
    }

    /// Runs every step over an already connected stream. The snapshot payload that
    /// follows the resync reply is left unread.
    pub async fn run<R, W>(
        &mut self,
        reader: &mut RespReader<R>,
        writer: &mut W,
    ) -> Result<FullResync, HandshakeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.state = HandshakeState::Connected;
        match self.drive(reader, writer).await {
            Ok(resync) => Ok(resync),
            Err(err) => {
                self.state = HandshakeState::Disconnected;
                Err(err)
            }
        }
    }

    async fn drive<R, W>(
        &mut self,
        reader: &mut RespReader<R>,
        writer: &mut W,
    ) -> Result<FullResync, HandshakeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut last = Value::null();

        while let Some(step) = self.step() {
            let encoded = step.command.encode();
            let sent = async {
                writer.write_all(&encoded).await?;
                writer.flush().await
            };
            sent.await.map_err(|source| HandshakeError::Send {
                step: step.name,
                source,
            })?;

            let reply = reader
                .read_value()
                .await
                .map_err(|source| HandshakeError::Read {
                    step: step.name,
                    source,
                })?
                .ok_or(HandshakeError::Closed { step: step.name })?;

            if !(step.accepts)(&reply) {
                return Err(HandshakeError::UnexpectedReply {
                    step: step.name,
                    reply,
                });
            }

            debug!(step = step.name, "handshake step acknowledged");
            self.state = step.next;
            last = reply;
        }

        Ok(parse_full_resync(&last))
    }
}

fn parse_full_resync(reply: &Value) -> FullResync {
    let text = match reply {
        Value::SimpleString(s) => s.as_str(),
        _ => "",
    };
    let mut parts = text.split_whitespace().skip(1);
    FullResync {
        replid: parts.next().unwrap_or_default().to_string(),
        offset: parts.next().and_then(|o| o.parse().ok()).unwrap_or(0),
    }
}
