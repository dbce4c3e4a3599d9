use crate::resp::{RespReader, Value};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Write half of a client socket. The session writes replies through it and, once the
/// client is a replica, the replication manager writes propagated commands through it.
pub type ConnWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

pub fn shared_writer<W>(writer: W) -> ConnWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(writer)))
}

pub fn split(stream: TcpStream) -> (RespReader<OwnedReadHalf>, ConnWriter) {
    let (read, write) = stream.into_split();
    (RespReader::new(read), shared_writer(write))
}

pub async fn write_bytes(writer: &ConnWriter, bytes: &[u8]) -> io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Encodes `value` completely before the first byte goes out.
pub async fn write_value(writer: &ConnWriter, value: &Value) -> io::Result<()> {
    write_bytes(writer, &value.encode()).await
}
