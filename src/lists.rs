use crate::db::{remove_if_expired, Entry, InMemoryDB, RedisValue, WrongType};
use bytes::Bytes;
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::time::Instant;

impl InMemoryDB {
    /// Appends `elements` to the tail of the list at `key`, creating it if needed.
    pub fn rpush(&self, key: Bytes, elements: Vec<Bytes>) -> Result<usize, WrongType> {
        self.push(key, elements, |list, element| list.push_back(element))
    }

    /// Prepends each element in turn, so the last one given ends up first.
    pub fn lpush(&self, key: Bytes, elements: Vec<Bytes>) -> Result<usize, WrongType> {
        self.push(key, elements, |list, element| list.push_front(element))
    }

    fn push<F>(&self, key: Bytes, elements: Vec<Bytes>, mut put: F) -> Result<usize, WrongType>
    where
        F: FnMut(&mut VecDeque<Bytes>, Bytes),
    {
        let mut map = self.map.write();
        remove_if_expired(&mut map, &key);

        let entry = map.entry(key).or_insert_with(|| Entry {
            value: RedisValue::List(VecDeque::new()),
            expires_at: None,
        });

        match &mut entry.value {
            RedisValue::List(list) => {
                for element in elements {
                    put(list, element);
                }
                Ok(list.len())
            }
            RedisValue::String(_) => Err(WrongType),
        }
    }

    pub fn lpop(&self, key: &[u8]) -> Result<Option<Bytes>, WrongType> {
        Ok(self
            .lpop_count(key, 1)?
            .and_then(|popped| popped.into_iter().next()))
    }

    /// Pops up to `count` elements from the head. `None` when there is no list at
    /// `key`; a list emptied here is removed.
    pub fn lpop_count(&self, key: &[u8], count: usize) -> Result<Option<Vec<Bytes>>, WrongType> {
        let mut map = self.map.write();
        remove_if_expired(&mut map, key);

        let Some(entry) = map.get_mut(key) else {
            return Ok(None);
        };
        let RedisValue::List(list) = &mut entry.value else {
            return Err(WrongType);
        };

        let n = count.min(list.len());
        let popped: Vec<Bytes> = list.drain(..n).collect();
        if list.is_empty() {
            map.remove(key);
        }
        Ok(Some(popped))
    }

    pub fn llen(&self, key: &[u8]) -> Result<usize, WrongType> {
        let map = self.map.read();
        match map.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.value {
                RedisValue::List(list) => Ok(list.len()),
                RedisValue::String(_) => Err(WrongType),
            },
            _ => Ok(0),
        }
    }

    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>, WrongType> {
        let map = self.map.read();
        let list = match map.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.value {
                RedisValue::List(list) => list,
                RedisValue::String(_) => return Err(WrongType),
            },
            _ => return Ok(vec![]),
        };

        Ok(match normalize_range(list.len(), start, stop) {
            Some(range) => list.range(range).cloned().collect(),
            None => vec![],
        })
    }
}

/// Maps a Redis-style inclusive `[start, stop]` (negative counts from the end) onto
/// `[0, len)`. `None` when nothing is selected.
pub fn normalize_range(len: usize, start: i64, stop: i64) -> Option<RangeInclusive<usize>> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if len == 0 || start >= len || stop < 0 || start > stop {
        return None;
    }
    Some(start as usize..=stop as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn items(values: &[&str]) -> Vec<Bytes> {
        values.iter().map(|v| b(v)).collect()
    }

    #[test]
    fn lpush_puts_newest_first() {
        let db = InMemoryDB::new();
        assert_eq!(db.lpush(b("mylist"), items(&["a", "b"])), Ok(2));
        assert_eq!(db.llen(b"mylist"), Ok(2));
        assert_eq!(db.lrange(b"mylist", 0, -1), Ok(items(&["b", "a"])));
    }

    #[test]
    fn rpush_appends() {
        let db = InMemoryDB::new();
        db.rpush(b("l"), items(&["a", "b"])).unwrap();
        assert_eq!(db.rpush(b("l"), items(&["c"])), Ok(3));
        assert_eq!(db.lrange(b"l", 0, -1), Ok(items(&["a", "b", "c"])));
    }

    #[test]
    fn pushing_onto_a_string_is_wrong_type() {
        let db = InMemoryDB::new();
        db.set(b("s"), b("v"));
        assert_eq!(db.lpush(b("s"), items(&["a"])), Err(WrongType));
        assert_eq!(db.rpush(b("s"), items(&["a"])), Err(WrongType));
        assert_eq!(db.llen(b"s"), Err(WrongType));
        assert_eq!(db.lrange(b"s", 0, 1), Err(WrongType));
    }

    #[test]
    fn missing_lists_are_empty() {
        let db = InMemoryDB::new();
        assert_eq!(db.llen(b"nope"), Ok(0));
        assert_eq!(db.lpop(b"nope"), Ok(None));
        assert_eq!(db.lpop_count(b"nope", 3), Ok(None));
        assert_eq!(db.lrange(b"nope", 0, -1), Ok(vec![]));
    }

    #[test]
    fn lpop_drains_and_removes_the_key() {
        let db = InMemoryDB::new();
        db.rpush(b("l"), items(&["a", "b", "c"])).unwrap();

        assert_eq!(db.lpop(b"l"), Ok(Some(b("a"))));
        assert_eq!(db.lpop_count(b"l", 5), Ok(Some(items(&["b", "c"]))));
        assert_eq!(db.key_type(b"l"), None);
    }

    #[test]
    fn ranges_are_clamped() {
        assert_eq!(normalize_range(5, 0, -1), Some(0..=4));
        assert_eq!(normalize_range(5, -2, -1), Some(3..=4));
        assert_eq!(normalize_range(5, -100, 2), Some(0..=2));
        assert_eq!(normalize_range(5, 1, 100), Some(1..=4));
        assert_eq!(normalize_range(5, 3, 1), None);
        assert_eq!(normalize_range(5, 5, 10), None);
        assert_eq!(normalize_range(5, 0, -6), None);
        assert_eq!(normalize_range(0, 0, -1), None);
    }
}
