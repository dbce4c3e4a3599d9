mod lists;
mod server;
mod strings;

use crate::config::Config;
use crate::db::{InMemoryDB, WrongType};
use crate::resp::Value;
use crate::types::ServerState;
use bytes::Bytes;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Commands whose effects are forwarded to replicas.
const WRITE_COMMANDS: &[&str] = &["SET", "DEL", "LPUSH", "RPUSH", "LPOP"];

/// Commands a connection still gets replies for after it has become a replica.
const HANDSHAKE_COMMANDS: &[&str] = &["PING", "REPLCONF", "PSYNC"];

/// Failures that are reported back to the client as an error reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
    #[error("ERR invalid argument type")]
    InvalidArgumentType,
    #[error("ERR value is not an integer or out of range")]
    NotInteger,
    #[error(transparent)]
    WrongType(#[from] WrongType),
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(&'static str),
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR unsupported pattern for the 'keys' command")]
    UnsupportedPattern,
    #[error("ERR unknown subcommand '{0}'. Try CONFIG GET.")]
    UnknownSubcommand(String),
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR invalid command format")]
    InvalidFormat,
}

impl From<CommandError> for Value {
    fn from(err: CommandError) -> Value {
        Value::error(err.to_string())
    }
}

pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the command against its arguments (the name is not included).
    fn call(&self, args: &[Value]) -> Result<Value, CommandError>;

    /// Like `call`, but folds failures into an error reply.
    fn execute(&self, args: &[Value]) -> Value {
        self.call(args).unwrap_or_else(Value::from)
    }
}

/// Name to handler table, fixed once built.
pub struct Registry {
    commands: HashMap<&'static str, Box<dyn Command>>,
}

impl Registry {
    pub fn new(db: InMemoryDB, config: Arc<Config>, state: Arc<ServerState>) -> Self {
        let mut registry = Registry {
            commands: HashMap::new(),
        };

        registry.register(server::Ping);
        registry.register(server::Echo);
        registry.register(server::ConfigCmd::new(config));
        registry.register(server::Info::new(state.clone()));
        registry.register(server::Keys::new(db.clone()));
        registry.register(server::ReplConf);
        registry.register(server::Psync::new(state));

        registry.register(strings::Get::new(db.clone()));
        registry.register(strings::Set::new(db.clone()));
        registry.register(strings::Del::new(db.clone()));
        registry.register(strings::Type::new(db.clone()));

        registry.register(lists::Push::left(db.clone()));
        registry.register(lists::Push::right(db.clone()));
        registry.register(lists::LPop::new(db.clone()));
        registry.register(lists::LLen::new(db.clone()));
        registry.register(lists::LRange::new(db));

        registry
    }

    fn register(&mut self, command: impl Command + 'static) {
        self.commands.insert(command.name(), Box::new(command));
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Command> {
        self.commands
            .get(name.to_ascii_uppercase().as_str())
            .map(|c| &**c)
    }

    pub fn is_write_command(&self, name: &str) -> bool {
        WRITE_COMMANDS.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn is_handshake_command(&self, name: &str) -> bool {
        HANDSHAKE_COMMANDS.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Looks up and runs a full command array, name first.
    pub fn dispatch(&self, argv: &[Value]) -> Value {
        let name = match command_name(argv) {
            Ok(name) => name,
            Err(err) => return err.into(),
        };
        match self.lookup(&name) {
            Some(command) => command.execute(&argv[1..]),
            None => CommandError::UnknownCommand(name).into(),
        }
    }
}

/// Uppercased name of a command array, which must be non-empty and start with a
/// bulk string.
pub fn command_name(argv: &[Value]) -> Result<String, CommandError> {
    let name = argv
        .first()
        .and_then(Value::as_bulk)
        .ok_or(CommandError::InvalidFormat)?;
    Ok(String::from_utf8_lossy(name).to_ascii_uppercase())
}

fn arity(
    args: &[Value],
    name: &'static str,
    min: usize,
    max: Option<usize>,
) -> Result<(), CommandError> {
    if args.len() < min || max.map_or(false, |max| args.len() > max) {
        return Err(CommandError::WrongArity(name));
    }
    Ok(())
}

fn bulk(arg: &Value) -> Result<&Bytes, CommandError> {
    arg.as_bulk().ok_or(CommandError::InvalidArgumentType)
}

fn bulks(args: &[Value]) -> Result<Vec<Bytes>, CommandError> {
    args.iter().map(|a| bulk(a).cloned()).collect()
}

fn text(arg: &Value) -> Result<String, CommandError> {
    Ok(String::from_utf8_lossy(bulk(arg)?).into_owned())
}

fn integer<T: FromStr>(arg: &Value) -> Result<T, CommandError> {
    std::str::from_utf8(bulk(arg)?)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}
