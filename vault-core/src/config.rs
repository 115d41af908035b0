use crate::routing_table::DEFAULT_GROUP_SIZE;
use std::path::PathBuf;
use std::time::Duration;

/// Default chunk store capacity: 2 GiB.
pub const DEFAULT_MAX_CAPACITY: u64 = 2 * 1024 * 1024 * 1024;

/// Runtime settings of a vault, resolved from the server's configuration file.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub chunk_store_root: PathBuf,
    pub max_capacity: u64,
    pub group_size: usize,
    /// How long refresh votes wait for their quorum.
    pub accumulator_timeout: Duration,
    /// How long a pending write waits for the group to agree on it.
    pub pending_write_timeout: Duration,
    /// How long we wait for a data holder to answer a get before asking another one.
    pub get_from_holder_timeout: Duration,
    pub status_log_interval: Duration,
    /// How long a proxied client request waits for the close group.
    pub request_timeout: Duration,
    /// Peers silent for longer than this are dropped from the routing table.
    pub peer_timeout: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            chunk_store_root: std::env::temp_dir().join("safe_vault_chunk_store"),
            max_capacity: DEFAULT_MAX_CAPACITY,
            group_size: DEFAULT_GROUP_SIZE,
            accumulator_timeout: Duration::from_secs(180),
            pending_write_timeout: Duration::from_secs(60),
            get_from_holder_timeout: Duration::from_secs(60),
            status_log_interval: Duration::from_secs(120),
            request_timeout: Duration::from_secs(30),
            peer_timeout: Duration::from_secs(60),
        }
    }
}
