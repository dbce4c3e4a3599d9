use super::{arity, bulk, integer, text, Command, CommandError};
use crate::db::InMemoryDB;
use crate::resp::Value;
use std::time::{Duration, Instant};

pub struct Get {
    db: InMemoryDB,
}

impl Get {
    pub fn new(db: InMemoryDB) -> Self {
        Self { db }
    }
}

impl Command for Get {
    fn name(&self) -> &'static str {
        "GET"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "get", 1, Some(1))?;
        match self.db.get(bulk(&args[0])?)? {
            Some(value) => Ok(Value::bulk(value)),
            None => Ok(Value::null()),
        }
    }
}

/// `SET key value [EX seconds | PX milliseconds]`
pub struct Set {
    db: InMemoryDB,
}

impl Set {
    pub fn new(db: InMemoryDB) -> Self {
        Self { db }
    }

    /// Turns the expiry options into an absolute deadline. A deadline the clock cannot
    /// represent is rejected like a non-positive one.
    fn parse_expiry(options: &[Value]) -> Result<Option<Instant>, CommandError> {
        match options {
            [] => Ok(None),
            [unit, amount] => {
                let unit = text(unit)?.to_ascii_uppercase();
                let amount: i64 = integer(amount)?;
                let amount = u64::try_from(amount)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or(CommandError::InvalidExpire("set"))?;
                let ttl = match unit.as_str() {
                    "PX" => Duration::from_millis(amount),
                    "EX" => Duration::from_secs(amount),
                    _ => return Err(CommandError::Syntax),
                };
                Instant::now()
                    .checked_add(ttl)
                    .map(Some)
                    .ok_or(CommandError::InvalidExpire("set"))
            }
            _ => Err(CommandError::Syntax),
        }
    }
}

impl Command for Set {
    fn name(&self) -> &'static str {
        "SET"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "set", 2, None)?;
        let key = bulk(&args[0])?.clone();
        let value = bulk(&args[1])?.clone();

        match Self::parse_expiry(&args[2..])? {
            Some(deadline) => self.db.set_with_expiry(key, value, deadline),
            None => self.db.set(key, value),
        }
        Ok(Value::ok())
    }
}

pub struct Del {
    db: InMemoryDB,
}

impl Del {
    pub fn new(db: InMemoryDB) -> Self {
        Self { db }
    }
}

impl Command for Del {
    fn name(&self) -> &'static str {
        "DEL"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "del", 1, None)?;
        let mut removed = 0;
        for key in args {
            if self.db.delete(bulk(key)?) {
                removed += 1;
            }
        }
        Ok(Value::Integer(removed))
    }
}

pub struct Type {
    db: InMemoryDB,
}

impl Type {
    pub fn new(db: InMemoryDB) -> Self {
        Self { db }
    }
}

impl Command for Type {
    fn name(&self) -> &'static str {
        "TYPE"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "type", 1, Some(1))?;
        let kind = self.db.key_type(bulk(&args[0])?).unwrap_or("none");
        Ok(Value::simple(kind))
    }
}
