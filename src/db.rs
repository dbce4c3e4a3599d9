use crate::rdb::SnapshotTable;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum RedisValue {
    String(Bytes),
    List(VecDeque<Bytes>),
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) value: RedisValue,
    pub(crate) expires_at: Option<Instant>,
}

impl Entry {
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
pub struct WrongType;

/// Shared handle to the key space. Cloning is cheap; all clones see the same table.
///
/// Every lock is taken for the duration of one map operation and never held across
/// an `.await`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDB {
    pub(crate) map: Arc<RwLock<HashMap<Bytes, Entry>>>,
}

impl InMemoryDB {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: Bytes, value: Bytes) {
        self.insert(key, RedisValue::String(value), None);
    }

    pub fn set_with_expiry(&self, key: Bytes, value: Bytes, expires_at: Instant) {
        self.insert(key, RedisValue::String(value), Some(expires_at));
    }

    fn insert(&self, key: Bytes, value: RedisValue, expires_at: Option<Instant>) {
        self.map.write().insert(key, Entry { value, expires_at });
    }

    /// Returns the string stored at `key`. An expired entry is removed and reported
    /// as missing.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, WrongType> {
        {
            let map = self.map.read();
            match map.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    return match &entry.value {
                        RedisValue::String(s) => Ok(Some(s.clone())),
                        RedisValue::List(_) => Err(WrongType),
                    };
                }
                Some(_) => {}
            }
        }

        let mut map = self.map.write();
        remove_if_expired(&mut map, key);
        Ok(None)
    }

    /// Removes `key`, returning whether a live entry was there.
    pub fn delete(&self, key: &[u8]) -> bool {
        let mut map = self.map.write();
        match map.remove(key) {
            Some(entry) => !entry.is_expired(Instant::now()),
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<Bytes> {
        let now = Instant::now();
        self.map
            .read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn key_type(&self, key: &[u8]) -> Option<&'static str> {
        let map = self.map.read();
        let entry = map.get(key).filter(|e| !e.is_expired(Instant::now()))?;
        Some(match entry.value {
            RedisValue::String(_) => "string",
            RedisValue::List(_) => "list",
        })
    }

    /// Deletes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.map.write();
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now));
        before - map.len()
    }

    /// Inserts every record of a loaded snapshot, skipping those whose absolute expiry
    /// has already passed. Returns the number of keys inserted.
    pub fn load_snapshot(&self, table: SnapshotTable) -> usize {
        let now_ms = unix_millis();
        let now = Instant::now();
        let mut map = self.map.write();
        let mut loaded = 0;

        for (key, record) in table {
            let expires_at = match record.expiry_ms {
                Some(at) if at <= now_ms => continue,
                Some(at) => now.checked_add(Duration::from_millis(at - now_ms)),
                None => None,
            };
            map.insert(
                key,
                Entry {
                    value: RedisValue::String(record.value),
                    expires_at,
                },
            );
            loaded += 1;
        }
        loaded
    }

    /// Drops the whole key space and loads `table` in its place, as a replica does
    /// after a full resync.
    pub fn replace_with_snapshot(&self, table: SnapshotTable) -> usize {
        self.map.write().clear();
        self.load_snapshot(table)
    }

    /// Starts the background sweep. The task ends once every handle to this store has
    /// been dropped.
    pub fn spawn_reaper(&self, every: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.map);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(map) = weak.upgrade() else { break };
                let removed = InMemoryDB { map }.purge_expired();
                if removed > 0 {
                    debug!(removed, "reaped expired keys");
                }
            }
        })
    }
}

pub(crate) fn remove_if_expired(map: &mut HashMap<Bytes, Entry>, key: &[u8]) {
    if map.get(key).map_or(false, |e| e.is_expired(Instant::now())) {
        map.remove(key);
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
