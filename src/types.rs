use rand::Rng;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Master => "master",
            Role::Slave => "slave",
        })
    }
}

/// Process-wide replication facts reported by INFO and PSYNC.
///
/// The offset is never advanced; full resync always reports 0.
#[derive(Debug, Clone)]
pub struct ServerState {
    pub role: Role,
    pub master_replid: String,
    pub master_repl_offset: u64,
}

impl ServerState {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            master_replid: generate_replid(),
            master_repl_offset: 0,
        }
    }
}

/// 40 hex characters, like the ids Redis hands out.
fn generate_replid() -> String {
    let bytes: [u8; 20] = rand::thread_rng().gen();
    hex::encode(bytes)
}
