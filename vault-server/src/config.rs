use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use safe_vault::{PeerInfo, Result, VaultConfig, VaultError, XorName};

pub const DEFAULT_CONFIG_FILE: &str = "safe_vault.crust.config";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hex encoded vault name. A random name is chosen when absent.
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default = "default_client_bind_addr")]
    pub client_bind_addr: String,
    #[serde(default = "default_peer_bind_addr")]
    pub peer_bind_addr: String,
    /// Peer address other vaults use to reach us.
    #[serde(default)]
    pub advertise_addr: Option<String>,
    /// Peer addresses of vaults to join through.
    #[serde(default)]
    pub hard_coded_contacts: Vec<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub chunk_store_root: Option<PathBuf>,
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_store_root: None,
            max_capacity: default_max_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            group_size: default_group_size(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            peer_timeout_secs: default_peer_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

fn default_client_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_peer_bind_addr() -> String {
    "0.0.0.0:5100".to_string()
}

fn default_max_capacity() -> u64 {
    safe_vault::config::DEFAULT_MAX_CAPACITY
}

fn default_group_size() -> usize {
    safe_vault::DEFAULT_GROUP_SIZE
}

fn default_heartbeat_interval_secs() -> u64 {
    20
}

fn default_peer_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_maintenance_interval_secs() -> u64 {
    5
}

/// Settings the server runs with, resolved from `Config`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub our_info: PeerInfo,
    pub client_bind_addr: String,
    pub peer_bind_addr: String,
    pub contacts: Vec<String>,
    pub heartbeat_interval: Duration,
    pub maintenance_interval: Duration,
    pub vault: VaultConfig,
}

impl Config {
    /// Loads `path` (JSON) and applies `SAFE_VAULT__*` environment overrides.
    /// A missing file is only an error when `required` is set.
    pub fn from_file(path: &str, required: bool) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::new(path, ::config::FileFormat::Json).required(required))
            .add_source(
                ::config::Environment::with_prefix("SAFE_VAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| VaultError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| VaultError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn runtime(&self) -> Result<RuntimeConfig> {
        let name = match &self.node_name {
            Some(hex) => XorName::from_hex(hex)
                .map_err(|e| VaultError::Config(format!("invalid node_name '{}': {}", hex, e)))?,
            None => XorName::random(),
        };
        if self.network.group_size == 0 {
            return Err(VaultError::Config("network.group_size must be at least 1".to_string()));
        }

        let defaults = VaultConfig::default();
        let vault = VaultConfig {
            chunk_store_root: self
                .storage
                .chunk_store_root
                .clone()
                .unwrap_or(defaults.chunk_store_root.clone()),
            max_capacity: self.storage.max_capacity,
            group_size: self.network.group_size,
            request_timeout: Duration::from_secs(self.network.request_timeout_secs),
            peer_timeout: Duration::from_secs(self.network.peer_timeout_secs),
            ..defaults
        };

        Ok(RuntimeConfig {
            our_info: PeerInfo {
                name,
                address: self
                    .advertise_addr
                    .clone()
                    .unwrap_or_else(|| self.peer_bind_addr.clone()),
            },
            client_bind_addr: self.client_bind_addr.clone(),
            peer_bind_addr: self.peer_bind_addr.clone(),
            contacts: self.hard_coded_contacts.clone(),
            heartbeat_interval: Duration::from_secs(self.network.heartbeat_interval_secs.max(1)),
            maintenance_interval: Duration::from_secs(
                self.network.maintenance_interval_secs.max(1),
            ),
            vault,
        })
    }
}
