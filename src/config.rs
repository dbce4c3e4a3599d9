use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;

/// Startup flags. Built once in `main` and shared read-only afterwards.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Directory holding the snapshot file.
    #[arg(long, default_value = "/tmp")]
    pub dir: String,

    /// Snapshot file name inside `dir`.
    #[arg(long, default_value = "dump.rdb")]
    pub dbfilename: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// Run as a replica of "<host> <port>".
    #[arg(long)]
    pub replicaof: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dir: "/tmp".to_string(),
            dbfilename: "dump.rdb".to_string(),
            port: 6379,
            replicaof: None,
        }
    }
}

impl Config {
    /// Looks up a parameter by its CONFIG GET name.
    pub fn parameter(&self, name: &str) -> Option<String> {
        match name.to_ascii_lowercase().as_str() {
            "dir" => Some(self.dir.clone()),
            "dbfilename" => Some(self.dbfilename.clone()),
            "port" => Some(self.port.to_string()),
            _ => None,
        }
    }

    pub fn rdb_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }

    pub fn is_replica(&self) -> bool {
        self.replicaof.is_some()
    }

    /// The primary's `host:port`, when running as a replica.
    pub fn primary_addr(&self) -> anyhow::Result<Option<String>> {
        let Some(replicaof) = &self.replicaof else {
            return Ok(None);
        };

        let parts: Vec<&str> = replicaof.split_whitespace().collect();
        let [host, port] = parts.as_slice() else {
            bail!("--replicaof expects \"<host> <port>\", got {replicaof:?}");
        };
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid primary port {port:?}"))?;
        Ok(Some(format!("{host}:{port}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let config = Config::parse_from([
            "redis-replica",
            "--dir",
            "/tmp/redis-files",
            "--dbfilename",
            "snap.rdb",
            "--port",
            "6380",
            "--replicaof",
            "localhost 6379",
        ]);

        assert_eq!(config.parameter("dir").as_deref(), Some("/tmp/redis-files"));
        assert_eq!(config.parameter("DBFILENAME").as_deref(), Some("snap.rdb"));
        assert_eq!(config.parameter("port").as_deref(), Some("6380"));
        assert_eq!(config.parameter("maxmemory"), None);
        assert_eq!(config.rdb_path(), PathBuf::from("/tmp/redis-files/snap.rdb"));
        assert_eq!(
            config.primary_addr().unwrap().as_deref(),
            Some("localhost:6379")
        );
    }

    #[test]
    fn defaults_to_primary() {
        let config = Config::parse_from(["redis-replica"]);
        assert!(!config.is_replica());
        assert_eq!(config.primary_addr().unwrap(), None);
        assert_eq!(config.port, 6379);
    }

    #[test]
    fn rejects_malformed_replicaof() {
        let config = Config {
            replicaof: Some("localhost".to_string()),
            ..Config::default()
        };
        assert!(config.primary_addr().is_err());

        let config = Config {
            replicaof: Some("localhost port".to_string()),
            ..Config::default()
        };
        assert!(config.primary_addr().is_err());
    }
}
