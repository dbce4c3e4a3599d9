use super::{arity, bulk, text, Command, CommandError};
use crate::config::Config;
use crate::db::InMemoryDB;
use crate::rdb::empty_rdb;
use crate::resp::Value;
use crate::types::ServerState;
use std::sync::Arc;

pub struct Ping;

impl Command for Ping {
    fn name(&self) -> &'static str {
        "PING"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "ping", 0, Some(1))?;
        match args.first() {
            Some(message) => Ok(Value::bulk(bulk(message)?.clone())),
            None => Ok(Value::simple("PONG")),
        }
    }
}

pub struct Echo;

impl Command for Echo {
    fn name(&self) -> &'static str {
        "ECHO"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "echo", 1, Some(1))?;
        Ok(Value::bulk(bulk(&args[0])?.clone()))
    }
}

pub struct ConfigCmd {
    config: Arc<Config>,
}

impl ConfigCmd {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl Command for ConfigCmd {
    fn name(&self) -> &'static str {
        "CONFIG"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "config", 1, None)?;
        let subcommand = text(&args[0])?;
        if !subcommand.eq_ignore_ascii_case("GET") {
            return Err(CommandError::UnknownSubcommand(subcommand));
        }
        arity(&args[1..], "config|get", 1, None)?;

        let mut reply = Vec::new();
        for param in &args[1..] {
            let name = text(param)?.to_ascii_lowercase();
            if let Some(value) = self.config.parameter(&name) {
                reply.push(Value::bulk(name));
                reply.push(Value::bulk(value));
            }
        }
        Ok(Value::Array(reply))
    }
}

pub struct Info {
    state: Arc<ServerState>,
}

impl Info {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

impl Command for Info {
    fn name(&self) -> &'static str {
        "INFO"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "info", 0, Some(1))?;
        let section = match args.first() {
            Some(arg) => text(arg)?.to_ascii_lowercase(),
            None => "all".to_string(),
        };

        match section.as_str() {
            "replication" | "all" | "default" | "everything" => {
                let info = format!(
                    "role:{}\r\nmaster_replid:{}\r\nmaster_repl_offset:{}",
                    self.state.role, self.state.master_replid, self.state.master_repl_offset
                );
                Ok(Value::bulk(info))
            }
            _ => Ok(Value::bulk("")),
        }
    }
}

pub struct Keys {
    db: InMemoryDB,
}

impl Keys {
    pub fn new(db: InMemoryDB) -> Self {
        Self { db }
    }
}

impl Command for Keys {
    fn name(&self) -> &'static str {
        "KEYS"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "keys", 1, Some(1))?;
        if &bulk(&args[0])?[..] != b"*" {
            return Err(CommandError::UnsupportedPattern);
        }
        Ok(Value::bulk_array(self.db.keys()))
    }
}

pub struct ReplConf;

impl Command for ReplConf {
    fn name(&self) -> &'static str {
        "REPLCONF"
    }

    fn call(&self, _args: &[Value]) -> Result<Value, CommandError> {
        Ok(Value::ok())
    }
}

/// Always answers with a full resync followed by an inline snapshot.
pub struct Psync {
    state: Arc<ServerState>,
}

impl Psync {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

impl Command for Psync {
    fn name(&self) -> &'static str {
        "PSYNC"
    }

    fn call(&self, args: &[Value]) -> Result<Value, CommandError> {
        arity(args, "psync", 2, Some(2))?;
        bulk(&args[0])?;
        bulk(&args[1])?;

        Ok(Value::RawFile {
            preamble: format!(
                "FULLRESYNC {} {}",
                self.state.master_replid, self.state.master_repl_offset
            ),
            payload: empty_rdb(),
        })
    }
}
