use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: &[u8] = b"REDIS";
const HEADER_LEN: usize = 9;

const OP_AUX: u8 = 0xFA;
const OP_RESIZE_DB: u8 = 0xFB;
const OP_EXPIRE_MS: u8 = 0xFC;
const OP_EXPIRE_SECS: u8 = 0xFD;
const OP_SELECT_DB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;

const TYPE_STRING: u8 = 0x00;

const ENC_INT8: u8 = 0xC0;
const ENC_INT16: u8 = 0xC1;
const ENC_INT32: u8 = 0xC2;

/// An empty version 11 snapshot, shipped to replicas on full resync.
const EMPTY_RDB_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

pub struct RdbEntry {
    pub value: Bytes,
    /// Absolute expiry in Unix milliseconds.
    pub expiry_ms: Option<u64>,
}

pub type SnapshotTable = HashMap<Bytes, RdbEntry>;

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid header {0:?}")]
    BadHeader(String),
    #[error("unexpected end of file while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("unexpected opcode 0x{0:02X} at offset {1}")]
    UnexpectedOpcode(u8, usize),
    #[error("unsupported value type 0x{0:02X}")]
    UnsupportedValueType(u8),
    #[error("unsupported string encoding 0x{0:02X}")]
    UnsupportedEncoding(u8),
}

pub fn empty_rdb() -> Bytes {
    Bytes::from(hex::decode(EMPTY_RDB_HEX).expect("embedded snapshot is valid hex"))
}

/// Reads the snapshot at `path`. A missing file is an empty key space.
pub async fn load_db_from_rdb(path: &Path) -> Result<SnapshotTable, RdbError> {
    match tokio::fs::read(path).await {
        Ok(data) => parse(&data),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(SnapshotTable::new()),
        Err(source) => Err(RdbError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Parses a whole snapshot into a table. Nothing is returned unless the file parses
/// through to its end-of-file opcode.
pub fn parse(data: &[u8]) -> Result<SnapshotTable, RdbError> {
    let mut reader = RdbReader::new(data);
    reader.read_header()?;

    let mut table = SnapshotTable::new();
    loop {
        match reader.read_u8("opcode")? {
            OP_AUX => {
                reader.read_string()?;
                reader.read_string()?;
            }
            OP_SELECT_DB => reader.read_database(&mut table)?,
            OP_EOF => return Ok(table),
            op => return Err(RdbError::UnexpectedOpcode(op, reader.pos - 1)),
        }
    }
}

enum Length {
    Len(usize),
    /// Top bits `11`: the byte names an integer encoding instead.
    Encoded(u8),
}

struct RdbReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RdbReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_header(&mut self) -> Result<(), RdbError> {
        let header = self.read_exact(HEADER_LEN, "header")?;
        let (magic, version) = header.split_at(MAGIC.len());
        if magic != MAGIC || !version.iter().all(u8::is_ascii_digit) {
            return Err(RdbError::BadHeader(
                String::from_utf8_lossy(header).into_owned(),
            ));
        }
        Ok(())
    }

    fn read_database(&mut self, table: &mut SnapshotTable) -> Result<(), RdbError> {
        self.read_size()?;

        if self.read_u8("database section")? == OP_RESIZE_DB {
            self.read_size()?;
            self.read_size()?;
        } else {
            self.unread();
        }

        loop {
            let mut value_type = self.read_u8("key record")?;
            let mut expiry_ms = None;

            match value_type {
                OP_SELECT_DB | OP_AUX | OP_EOF => {
                    self.unread();
                    return Ok(());
                }
                OP_EXPIRE_SECS => {
                    expiry_ms = Some(u64::from(self.read_u32_le()?) * 1000);
                    value_type = self.read_u8("value type")?;
                }
                OP_EXPIRE_MS => {
                    expiry_ms = Some(self.read_u64_le()?);
                    value_type = self.read_u8("value type")?;
                }
                _ => {}
            }

            if value_type != TYPE_STRING {
                return Err(RdbError::UnsupportedValueType(value_type));
            }

            let key = self.read_string()?;
            let value = self.read_string()?;
            table.insert(key, RdbEntry { value, expiry_ms });
        }
    }

    fn read_u8(&mut self, what: &'static str) -> Result<u8, RdbError> {
        let byte = *self.buf.get(self.pos).ok_or(RdbError::UnexpectedEof(what))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Steps back over the byte just read.
    fn unread(&mut self) {
        self.pos -= 1;
    }

    fn read_exact(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], RdbError> {
        let end = self.pos.checked_add(n).ok_or(RdbError::UnexpectedEof(what))?;
        let bytes = self.buf.get(self.pos..end).ok_or(RdbError::UnexpectedEof(what))?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], RdbError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N, what)?);
        Ok(out)
    }

    fn read_u32_le(&mut self) -> Result<u32, RdbError> {
        Ok(u32::from_le_bytes(self.read_array("expiry seconds")?))
    }

    fn read_u64_le(&mut self) -> Result<u64, RdbError> {
        Ok(u64::from_le_bytes(self.read_array("expiry milliseconds")?))
    }

    fn read_length(&mut self) -> Result<Length, RdbError> {
        let first = self.read_u8("length")?;
        match first >> 6 {
            0b00 => Ok(Length::Len(usize::from(first & 0x3F))),
            0b01 => {
                let next = self.read_u8("14-bit length")?;
                Ok(Length::Len((usize::from(first & 0x3F) << 8) | usize::from(next)))
            }
            0b10 => {
                let len = u32::from_be_bytes(self.read_array("32-bit length")?);
                Ok(Length::Len(len as usize))
            }
            _ => Ok(Length::Encoded(first)),
        }
    }

    fn read_size(&mut self) -> Result<usize, RdbError> {
        match self.read_length()? {
            Length::Len(n) => Ok(n),
            Length::Encoded(tag) => Err(RdbError::UnsupportedEncoding(tag)),
        }
    }

    fn read_string(&mut self) -> Result<Bytes, RdbError> {
        let text = match self.read_length()? {
            Length::Len(n) => return Ok(Bytes::copy_from_slice(self.read_exact(n, "string")?)),
            Length::Encoded(ENC_INT8) => i8::from_le_bytes(self.read_array("8-bit int")?).to_string(),
            Length::Encoded(ENC_INT16) => {
                i16::from_le_bytes(self.read_array("16-bit int")?).to_string()
            }
            Length::Encoded(ENC_INT32) => {
                i32::from_le_bytes(self.read_array("32-bit int")?).to_string()
            }
            Length::Encoded(tag) => return Err(RdbError::UnsupportedEncoding(tag)),
        };
        Ok(Bytes::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::unix_millis;

    fn string(s: &str) -> Vec<u8> {
        let mut out = vec![s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn snapshot(records: &[u8]) -> Vec<u8> {
        let mut out = b"REDIS0011".to_vec();
        out.push(OP_AUX);
        out.extend(string("redis-ver"));
        out.extend(string("7.2.0"));
        out.extend([OP_SELECT_DB, 0x00, OP_RESIZE_DB, 0x01, 0x00]);
        out.extend_from_slice(records);
        out.push(OP_EOF);
        out.extend([0u8; 8]);
        out
    }

    fn plain(key: &str, value: &str) -> Vec<u8> {
        let mut out = vec![TYPE_STRING];
        out.extend(string(key));
        out.extend(string(value));
        out
    }

    #[test]
    fn empty_snapshot_is_empty() {
        let table = parse(&empty_rdb()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn reads_a_single_key() {
        let table = parse(&snapshot(&plain("foo", "bar"))).unwrap();
        assert_eq!(table.len(), 1);
        let entry = &table[&b"foo"[..]];
        assert_eq!(&entry.value[..], b"bar");
        assert_eq!(entry.expiry_ms, None);
    }

    #[test]
    fn reads_both_expiry_forms() {
        let mut records = vec![OP_EXPIRE_MS];
        records.extend(1_713_824_559_637u64.to_le_bytes());
        records.extend(plain("ms", "a"));
        records.push(OP_EXPIRE_SECS);
        records.extend(1_714_089_298u32.to_le_bytes());
        records.extend(plain("secs", "b"));

        let table = parse(&snapshot(&records)).unwrap();
        assert_eq!(table[&b"ms"[..]].expiry_ms, Some(1_713_824_559_637));
        assert_eq!(table[&b"secs"[..]].expiry_ms, Some(1_714_089_298_000));
    }

    #[test]
    fn decodes_integer_encoded_strings() {
        let mut records = vec![TYPE_STRING];
        records.extend(string("small"));
        records.extend([ENC_INT8, 0x7B]);
        records.push(TYPE_STRING);
        records.extend(string("mid"));
        records.push(ENC_INT16);
        records.extend(1234i16.to_le_bytes());
        records.push(TYPE_STRING);
        records.extend(string("big"));
        records.push(ENC_INT32);
        records.extend((-70000i32).to_le_bytes());

        let table = parse(&snapshot(&records)).unwrap();
        assert_eq!(&table[&b"small"[..]].value[..], b"123");
        assert_eq!(&table[&b"mid"[..]].value[..], b"1234");
        assert_eq!(&table[&b"big"[..]].value[..], b"-70000");
    }

    #[test]
    fn decodes_wide_lengths() {
        let long = "x".repeat(300);
        let mut records = vec![TYPE_STRING];
        records.extend(string("k14"));
        records.extend([0x40 | (300 >> 8) as u8, (300 & 0xFF) as u8]);
        records.extend_from_slice(long.as_bytes());
        records.push(TYPE_STRING);
        records.extend(string("k32"));
        records.push(0x80);
        records.extend(300u32.to_be_bytes());
        records.extend_from_slice(long.as_bytes());

        let table = parse(&snapshot(&records)).unwrap();
        assert_eq!(table[&b"k14"[..]].value.len(), 300);
        assert_eq!(table[&b"k32"[..]].value.len(), 300);
    }

    #[test]
    fn resize_hint_is_optional() {
        let mut data = b"REDIS0011".to_vec();
        data.extend([OP_SELECT_DB, 0x00]);
        data.extend(plain("a", "1"));
        data.extend([OP_SELECT_DB, 0x01]);
        data.extend(plain("b", "2"));
        data.push(OP_EOF);

        let table = parse(&data).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = snapshot(&plain("foo", "bar"));
        data[..5].copy_from_slice(b"RADIS");
        assert!(matches!(parse(&data), Err(RdbError::BadHeader(_))));
    }

    #[test]
    fn rejects_truncated_files() {
        let data = snapshot(&plain("foo", "bar"));
        let cut = data.len() - 12;
        assert!(matches!(parse(&data[..cut]), Err(RdbError::UnexpectedEof(_))));
        assert!(matches!(parse(b"REDIS"), Err(RdbError::UnexpectedEof("header"))));
    }

    #[test]
    fn rejects_non_string_values() {
        let mut records = vec![0x01];
        records.extend(string("list"));
        assert!(matches!(
            parse(&snapshot(&records)),
            Err(RdbError::UnsupportedValueType(0x01))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_table() {
        let path = std::env::temp_dir().join(format!("missing-{}.rdb", unix_millis()));
        assert!(load_db_from_rdb(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn loads_from_disk() {
        let path = std::env::temp_dir().join(format!(
            "rdb-test-{}-{}.rdb",
            std::process::id(),
            unix_millis()
        ));
        tokio::fs::write(&path, snapshot(&plain("foo", "bar")))
            .await
            .unwrap();

        let table = load_db_from_rdb(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert_eq!(table.keys().cloned().collect::<Vec<_>>(), vec![Bytes::from("foo")]);
    }
}
