use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const CRLF: &[u8] = b"\r\n";

/// Deepest array nesting a peer may send before the connection is dropped.
const MAX_DEPTH: usize = 512;

/// One unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    SimpleString(String),
    SimpleError(String),
    Integer(i64),
    /// `None` is the null bulk string (`$-1\r\n`).
    BulkString(Option<Bytes>),
    Array(Vec<Value>),
    /// A simple-string preamble followed by `$<len>\r\n<payload>` with no trailing CRLF.
    /// Only ever produced for the full-resync reply.
    RawFile { preamble: String, payload: Bytes },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown type byte 0x{0:02x}")]
    UnknownType(u8),
    #[error("invalid numeric header {0:?}")]
    InvalidNumber(String),
    #[error("missing CRLF after bulk string")]
    MissingCrlf,
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("arrays nested too deeply")]
    TooDeep,
}

enum ParseError {
    Incomplete,
    Protocol(ProtocolError),
}

impl From<ProtocolError> for ParseError {
    fn from(err: ProtocolError) -> ParseError {
        ParseError::Protocol(err)
    }
}

impl Value {
    pub fn simple(s: impl Into<String>) -> Value {
        Value::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Value {
        Value::SimpleError(s.into())
    }

    pub fn ok() -> Value {
        Value::simple("OK")
    }

    pub fn bulk(b: impl Into<Bytes>) -> Value {
        Value::BulkString(Some(b.into()))
    }

    pub fn null() -> Value {
        Value::BulkString(None)
    }

    pub fn bulk_array<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Bytes>,
    {
        Value::Array(items.into_iter().map(Value::bulk).collect())
    }

    /// Builds a command the way clients send it: an array of bulk strings.
    pub fn command(argv: &[&str]) -> Value {
        Value::bulk_array(argv.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())))
    }

    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Value::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Serializes the whole value up front so a reply is never written half-way.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Value::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Value::SimpleError(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Value::Integer(n) => {
                buf.put_u8(b':');
                write_decimal(buf, *n);
            }
            Value::BulkString(None) => buf.put_slice(b"$-1\r\n"),
            Value::BulkString(Some(data)) => {
                buf.put_u8(b'$');
                write_decimal(buf, data.len() as i64);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Value::Array(items) => {
                buf.put_u8(b'*');
                write_decimal(buf, items.len() as i64);
                for item in items {
                    item.write_to(buf);
                }
            }
            Value::RawFile { preamble, payload } => {
                Value::simple(preamble.as_str()).write_to(buf);
                buf.put_u8(b'$');
                write_decimal(buf, payload.len() as i64);
                buf.put_slice(payload);
            }
        }
    }
}

fn write_decimal(buf: &mut BytesMut, n: i64) {
    buf.put_slice(n.to_string().as_bytes());
    buf.put_slice(CRLF);
}

/// Decodes values from any async byte source, buffering partial frames.
#[derive(Debug)]
pub struct RespReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> RespReader<R> {
    pub fn new(reader: R) -> RespReader<R> {
        RespReader {
            reader,
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Reads exactly one value. `Ok(None)` means the peer closed the stream cleanly
    /// between values; closing in the middle of a value is an error.
    pub async fn read_value(&mut self) -> Result<Option<Value>, ProtocolError> {
        loop {
            let mut src = Cursor::new(&self.buffer[..]);
            match parse(&mut src) {
                Ok(value) => {
                    let len = src.position() as usize;
                    self.buffer.advance(len);
                    return Ok(Some(value));
                }
                Err(ParseError::Incomplete) => {}
                Err(ParseError::Protocol(err)) => return Err(err),
            }

            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::ConnectionReset);
            }
        }
    }

    /// Reads a `$<len>\r\n<bytes>` frame that has no trailing CRLF, as sent after
    /// `FULLRESYNC`.
    pub async fn read_raw_file(&mut self) -> Result<Bytes, ProtocolError> {
        loop {
            let mut src = Cursor::new(&self.buffer[..]);
            match parse_raw_file(&mut src) {
                Ok(payload) => {
                    let len = src.position() as usize;
                    self.buffer.advance(len);
                    return Ok(payload);
                }
                Err(ParseError::Incomplete) => {}
                Err(ParseError::Protocol(err)) => return Err(err),
            }

            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return Err(ProtocolError::ConnectionReset);
            }
        }
    }
}

fn parse(src: &mut Cursor<&[u8]>) -> Result<Value, ParseError> {
    parse_nested(src, 0)
}

fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Value, ParseError> {
    match get_u8(src)? {
        b'+' => Ok(Value::SimpleString(get_text(src)?)),
        b'-' => Ok(Value::SimpleError(get_text(src)?)),
        b':' => Ok(Value::Integer(get_number(src)?)),
        b'$' => {
            let len = get_number(src)?;
            if len == -1 {
                return Ok(Value::null());
            }
            let len = to_len(len)?;
            let data = get_bytes(src, len)?;
            if get_bytes(src, 2)? != CRLF {
                return Err(ProtocolError::MissingCrlf.into());
            }
            Ok(Value::bulk(data))
        }
        b'*' => {
            if depth >= MAX_DEPTH {
                return Err(ProtocolError::TooDeep.into());
            }
            let len = get_number(src)?;
            if len == -1 {
                return Ok(Value::null());
            }
            let len = to_len(len)?;
            let mut items = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                items.push(parse_nested(src, depth + 1)?);
            }
            Ok(Value::Array(items))
        }
        other => Err(ProtocolError::UnknownType(other).into()),
    }
}

fn parse_raw_file(src: &mut Cursor<&[u8]>) -> Result<Bytes, ParseError> {
    match get_u8(src)? {
        b'$' => {
            let len = to_len(get_number(src)?)?;
            get_bytes(src, len)
        }
        other => Err(ProtocolError::UnknownType(other).into()),
    }
}

fn to_len(n: i64) -> Result<usize, ParseError> {
    usize::try_from(n).map_err(|_| ProtocolError::InvalidNumber(n.to_string()).into())
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, ParseError> {
    if !src.has_remaining() {
        return Err(ParseError::Incomplete);
    }
    Ok(src.get_u8())
}

fn get_bytes(src: &mut Cursor<&[u8]>, n: usize) -> Result<Bytes, ParseError> {
    if src.remaining() < n {
        return Err(ParseError::Incomplete);
    }
    let data = Bytes::copy_from_slice(&src.chunk()[..n]);
    src.advance(n);
    Ok(data)
}

/// Returns the bytes up to the next CRLF and moves past it.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ParseError> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    match buf[start..].windows(2).position(|w| w == CRLF) {
        Some(offset) => {
            src.set_position((start + offset + 2) as u64);
            Ok(&buf[start..start + offset])
        }
        None => Err(ParseError::Incomplete),
    }
}

fn get_text(src: &mut Cursor<&[u8]>) -> Result<String, ParseError> {
    let line = get_line(src)?;
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(text.to_string())
}

fn get_number(src: &mut Cursor<&[u8]>) -> Result<i64, ParseError> {
    let line = get_line(src)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            ProtocolError::InvalidNumber(String::from_utf8_lossy(line).into_owned()).into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn decode_all(input: &[u8]) -> Result<Option<Value>, ProtocolError> {
        RespReader::new(input).read_value().await
    }

    #[tokio::test]
    async fn values_survive_a_round_trip() {
        let values = vec![
            Value::simple("OK"),
            Value::error("ERR boom"),
            Value::Integer(-42),
            Value::bulk("hello"),
            Value::bulk(""),
            Value::null(),
            Value::Array(vec![]),
            Value::Array(vec![
                Value::bulk("SET"),
                Value::Array(vec![Value::Integer(1), Value::null()]),
                Value::simple("PONG"),
            ]),
        ];

        for value in values {
            let encoded = value.encode();
            let decoded = decode_all(&encoded).await.unwrap();
            assert_eq!(decoded, Some(value));
        }
    }

    #[test]
    fn null_bulk_is_not_the_string_null() {
        assert_eq!(&Value::null().encode()[..], b"$-1\r\n");
        assert_eq!(&Value::bulk("null").encode()[..], b"$4\r\nnull\r\n");
    }

    #[test]
    fn raw_file_has_no_trailing_crlf() {
        let value = Value::RawFile {
            preamble: "FULLRESYNC abc 0".to_string(),
            payload: Bytes::from_static(b"REDIS"),
        };
        assert_eq!(&value.encode()[..], b"+FULLRESYNC abc 0\r\n$5\r\nREDIS");
    }

    #[test]
    fn command_is_an_array_of_bulks() {
        let value = Value::command(&["SET", "x", "y"]);
        assert_eq!(&value.encode()[..], b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\ny\r\n");
    }

    #[tokio::test]
    async fn rejects_arrays_nested_too_deep() {
        let mut input = "*1\r\n".repeat(200_000);
        input.push_str("+x\r\n");
        assert!(matches!(
            decode_all(input.as_bytes()).await,
            Err(ProtocolError::TooDeep)
        ));

        let mut input = "*1\r\n".repeat(MAX_DEPTH);
        input.push_str("+x\r\n");
        let mut value = decode_all(input.as_bytes()).await.unwrap().unwrap();
        let mut depth = 0;
        while let Value::Array(mut items) = value {
            value = items.remove(0);
            depth += 1;
        }
        assert_eq!(depth, MAX_DEPTH);
        assert_eq!(value, Value::simple("x"));
    }

    #[tokio::test]
    async fn rejects_unknown_type_byte() {
        let err = decode_all(b"?what\r\n").await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(b'?')));
    }

    #[tokio::test]
    async fn rejects_non_numeric_length() {
        let err = decode_all(b"$abc\r\nxyz\r\n").await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidNumber(_)));

        let err = decode_all(b"*-3\r\n").await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidNumber(_)));
    }

    #[tokio::test]
    async fn rejects_bulk_without_crlf() {
        let err = decode_all(b"$3\r\nabcde").await.unwrap_err();
        assert!(matches!(err, ProtocolError::MissingCrlf));
    }

    #[tokio::test]
    async fn clean_end_of_stream_is_not_an_error() {
        assert!(decode_all(b"").await.unwrap().is_none());

        let mut reader = RespReader::new(&b"+PONG\r\n"[..]);
        assert_eq!(reader.read_value().await.unwrap(), Some(Value::simple("PONG")));
        assert!(reader.read_value().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn end_of_stream_inside_a_value_is_an_error() {
        let err = decode_all(b"*2\r\n$3\r\nGET\r\n").await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionReset));
    }

    #[tokio::test]
    async fn reassembles_values_split_across_reads() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = RespReader::new(rx);

        tokio::spawn(async move {
            tx.write_all(b"*2\r\n$4\r\nECHO").await.unwrap();
            tokio::task::yield_now().await;
            tx.write_all(b"\r\n$2\r\nhi\r\n+OK\r\n").await.unwrap();
        });

        assert_eq!(
            reader.read_value().await.unwrap(),
            Some(Value::command(&["ECHO", "hi"]))
        );
        assert_eq!(reader.read_value().await.unwrap(), Some(Value::ok()));
        assert!(reader.read_value().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reads_raw_file_then_continues_with_commands() {
        let mut input = b"+FULLRESYNC id 0\r\n$5\r\nREDIS".to_vec();
        input.extend_from_slice(&Value::command(&["PING"]).encode());

        let mut reader = RespReader::new(&input[..]);
        assert_eq!(
            reader.read_value().await.unwrap(),
            Some(Value::simple("FULLRESYNC id 0"))
        );
        assert_eq!(&reader.read_raw_file().await.unwrap()[..], b"REDIS");
        assert_eq!(
            reader.read_value().await.unwrap(),
            Some(Value::command(&["PING"]))
        );
    }
}
