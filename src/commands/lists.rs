use super::{arity, bulk, bulks, integer, Command, CommandError};
use crate::db::InMemoryDB;
use crate::resp::Value;

/// LPUSH and RPUSH differ only in which end they push to.
pub struct Push {
    db: InMemoryDB,
    left: bool,
}

impl Push {
    pub fn left(db: InMemoryDB) -> Self {
        Self { db, left: true }
    }

    pub fn right(db: InMemoryDB) -> Self {
        Self { db, left: false }
    }
}

impl Command for Push {
    fn name(&self) -> &'static str {
        if self.left {
            "LPUSH"
        } else {
            "RPUSH"
        }
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, if self.left { "lpush" } else { "rpush" }, 2, None)?;
        let key = bulk(&args[0])?.clone();
        let elements = bulks(&args[1..])?;

        let len = if self.left {
            self.db.lpush(key, elements)?
        } else {
            self.db.rpush(key, elements)?
        };
        Ok(Value::Integer(len as i64))
    }
}

/// `LPOP key [count]`
pub struct LPop {
    db: InMemoryDB,
}

impl LPop {
    pub fn new(db: InMemoryDB) -> Self {
        Self { db }
    }
}

impl Command for LPop {
    fn name(&self) -> &'static str {
        "LPOP"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "lpop", 1, Some(2))?;
        let key = bulk(&args[0])?;

        match args.get(1) {
            None => Ok(match self.db.lpop(key)? {
                Some(element) => Value::bulk(element),
                None => Value::null(),
            }),
            Some(count) => {
                let count: usize = integer(count)?;
                Ok(match self.db.lpop_count(key, count)? {
                    Some(elements) => Value::bulk_array(elements),
                    None => Value::null(),
                })
            }
        }
    }
}

pub struct LLen {
    db: InMemoryDB,
}

impl LLen {
    pub fn new(db: InMemoryDB) -> Self {
        Self { db }
    }
}

impl Command for LLen {
    fn name(&self) -> &'static str {
        "LLEN"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "llen", 1, Some(1))?;
        Ok(Value::Integer(self.db.llen(bulk(&args[0])?)? as i64))
    }
}

pub struct LRange {
    db: InMemoryDB,
}

impl LRange {
    pub fn new(db: InMemoryDB) -> Self {
        Self { db }
    }
}

impl Command for LRange {
    fn name(&self) -> &'static str {
        "LRANGE"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "lrange", 3, Some(3))?;
        let key = bulk(&args[0])?;
        let start: i64 = integer(&args[1])?;
        let stop: i64 = integer(&args[2])?;
        Ok(Value::bulk_array(self.db.lrange(key, start, stop)?))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{registry, run};
    use crate::resp::Value;

    fn bulks(items: &[&'static str]) -> Value {
        Value::Array(items.iter().map(|i| Value::bulk(*i)).collect())
    }

    #[test]
    fn lpush_llen_lrange() {
        let (registry, _) = registry();
        assert_eq!(run(&registry, &["LPUSH", "mylist", "a", "b"]), Value::Integer(2));
        assert_eq!(run(&registry, &["LLEN", "mylist"]), Value::Integer(2));
        assert_eq!(
            run(&registry, &["LRANGE", "mylist", "0", "-1"]),
            bulks(&["b", "a"])
        );
    }

    #[test]
    fn rpush_and_ranges() {
        let (registry, _) = registry();
        run(&registry, &["RPUSH", "l", "a", "b", "c", "d"]);
        assert_eq!(run(&registry, &["LRANGE", "l", "1", "2"]), bulks(&["b", "c"]));
        assert_eq!(run(&registry, &["LRANGE", "l", "-2", "99"]), bulks(&["c", "d"]));
        assert_eq!(run(&registry, &["LRANGE", "l", "3", "1"]), bulks(&[]));
        assert_eq!(run(&registry, &["LRANGE", "missing", "0", "-1"]), bulks(&[]));
        assert_eq!(
            run(&registry, &["LRANGE", "l", "zero", "1"]),
            Value::error("ERR value is not an integer or out of range")
        );
    }

    #[test]
    fn lpop_forms() {
        let (registry, _) = registry();
        run(&registry, &["RPUSH", "l", "a", "b", "c"]);
        assert_eq!(run(&registry, &["LPOP", "l"]), Value::bulk("a"));
        assert_eq!(run(&registry, &["LPOP", "l", "5"]), bulks(&["b", "c"]));
        assert_eq!(run(&registry, &["LPOP", "l"]), Value::null());
        assert_eq!(run(&registry, &["LPOP", "l", "2"]), Value::null());
        assert_eq!(run(&registry, &["LLEN", "l"]), Value::Integer(0));
    }

    #[test]
    fn list_commands_on_strings_are_wrong_type() {
        let (registry, _) = registry();
        run(&registry, &["SET", "s", "v"]);
        let wrong = Value::error("WRONGTYPE Operation against a key holding the wrong kind of value");
        assert_eq!(run(&registry, &["LPUSH", "s", "a"]), wrong);
        assert_eq!(run(&registry, &["LPOP", "s"]), wrong);
        assert_eq!(run(&registry, &["LLEN", "s"]), wrong);
    }
}
