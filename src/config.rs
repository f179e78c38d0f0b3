//! Configuration types for the wallet engine
//!
//! Manages network selection, discovery parameters (gap limit, scan batch
//! size) and the indexer retry policy.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::indexer::RetryPolicy;
use crate::types::AddressType;

/// Bitcoin network type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Regtest,
    Signet,
    Testnet,
    Mainnet,
}

impl NetworkType {
    /// BIP-44 coin type for this network (0 for mainnet, 1 for test nets)
    pub fn coin_type(&self) -> u32 {
        match self {
            NetworkType::Mainnet => 0,
            NetworkType::Testnet | NetworkType::Signet | NetworkType::Regtest => 1,
        }
    }

    /// Map to the `bitcoin` crate network
    pub fn to_bitcoin_network(&self) -> bitcoin::Network {
        match self {
            NetworkType::Mainnet => bitcoin::Network::Bitcoin,
            NetworkType::Testnet => bitcoin::Network::Testnet,
            NetworkType::Signet => bitcoin::Network::Signet,
            NetworkType::Regtest => bitcoin::Network::Regtest,
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Regtest => write!(f, "regtest"),
            NetworkType::Signet => write!(f, "signet"),
            NetworkType::Testnet => write!(f, "testnet"),
            NetworkType::Mainnet => write!(f, "mainnet"),
        }
    }
}

impl std::str::FromStr for NetworkType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "regtest" => Ok(NetworkType::Regtest),
            "signet" => Ok(NetworkType::Signet),
            "testnet" => Ok(NetworkType::Testnet),
            "mainnet" | "bitcoin" => Ok(NetworkType::Mainnet),
            other => Err(ConfigError::InvalidNetwork(other.to_string())),
        }
    }
}

/// Engine configuration
///
/// Discovery parameters default to the common Electrum-style convention:
/// a gap limit of 20 unused look-ahead addresses, scanned in batches of
/// the same size so every completed round leaves at least one full batch
/// of unused addresses beyond the high-water mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Selected network
    pub network: NetworkType,

    /// Default address type for newly generated addresses
    #[serde(default = "default_address_type")]
    pub address_type: AddressType,

    /// Minimum number of unused look-ahead addresses beyond the highest
    /// used index, per branch (receive/change)
    #[serde(default = "default_gap_limit")]
    pub gap_limit: u32,

    /// Number of addresses generated and queried per discovery round.
    /// Must be >= `gap_limit` so a completed round satisfies the
    /// look-ahead invariant.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: u32,

    /// Retry policy for indexer calls (broadcast is never retried)
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_address_type() -> AddressType {
    AddressType::P2wpkh
}

fn default_gap_limit() -> u32 {
    20
}

fn default_scan_batch_size() -> u32 {
    20
}

impl EngineConfig {
    /// Default configuration for a given network
    pub fn for_network(network: NetworkType) -> Self {
        Self {
            network,
            address_type: default_address_type(),
            gap_limit: default_gap_limit(),
            scan_batch_size: default_scan_batch_size(),
            retry: RetryPolicy::default(),
        }
    }

    /// Effective batch size, clamped so one round always covers the
    /// configured look-ahead
    pub fn batch_size(&self) -> u32 {
        self.scan_batch_size.max(self.gap_limit).max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_network(NetworkType::Regtest)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("Config directory not found")]
    DirectoryNotFound,
}

/// Configuration overrides from environment variables
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub network: Option<NetworkType>,
    pub address_type: Option<AddressType>,
    pub gap_limit: Option<u32>,
    pub scan_batch_size: Option<u32>,
}

impl ConfigOverrides {
    /// Create empty overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from environment variables
    ///
    /// Supported: `WALLET_NETWORK`, `WALLET_ADDRESS_TYPE`,
    /// `WALLET_GAP_LIMIT`, `WALLET_SCAN_BATCH_SIZE`.
    pub fn from_env() -> Self {
        Self {
            network: std::env::var("WALLET_NETWORK")
                .ok()
                .and_then(|s| s.parse().ok()),
            address_type: std::env::var("WALLET_ADDRESS_TYPE")
                .ok()
                .and_then(|s| s.parse().ok()),
            gap_limit: std::env::var("WALLET_GAP_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok()),
            scan_batch_size: std::env::var("WALLET_SCAN_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Merge with another set of overrides (other takes precedence)
    pub fn merge(mut self, other: Self) -> Self {
        if other.network.is_some() {
            self.network = other.network;
        }
        if other.address_type.is_some() {
            self.address_type = other.address_type;
        }
        if other.gap_limit.is_some() {
            self.gap_limit = other.gap_limit;
        }
        if other.scan_batch_size.is_some() {
            self.scan_batch_size = other.scan_batch_size;
        }
        self
    }
}

/// Get the default configuration directory path
///
/// Returns: `~/.wallet-engine/`
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".wallet-engine"))
        .ok_or(ConfigError::DirectoryNotFound)
}

/// Get the default configuration file path
///
/// Returns: `~/.wallet-engine/config.json`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join("config.json"))
}

/// Load configuration from file with overrides
///
/// # Priority (highest to lowest):
/// 1. Caller-supplied overrides
/// 2. Environment variables
/// 3. Config file
/// 4. Network defaults
pub fn load_config(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<EngineConfig, ConfigError> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path)?;
        serde_json::from_str(&contents)?
    } else {
        EngineConfig::for_network(overrides.network.unwrap_or(NetworkType::Regtest))
    };

    apply_overrides(&mut config, ConfigOverrides::from_env());
    apply_overrides(&mut config, overrides);

    Ok(config)
}

/// Save configuration to file
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &EngineConfig, config_path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;

    Ok(())
}

/// Apply configuration overrides (internal helper)
fn apply_overrides(config: &mut EngineConfig, overrides: ConfigOverrides) {
    if let Some(network) = overrides.network {
        config.network = network;
    }
    if let Some(address_type) = overrides.address_type {
        config.address_type = address_type;
    }
    if let Some(gap_limit) = overrides.gap_limit {
        config.gap_limit = gap_limit;
    }
    if let Some(batch) = overrides.scan_batch_size {
        config.scan_batch_size = batch;
    }
}
