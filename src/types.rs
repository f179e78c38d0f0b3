//! Shared types for the wallet engine
//!
//! Closed enumerations and small value types used across the engine.
//! Anything that was a free-form string in looser wallet designs (address
//! types, fee tiers, boost kinds) is a closed enum here with exhaustive
//! matching.

use serde::{Deserialize, Serialize};

/// Supported on-chain address types
///
/// Each type maps to a distinct BIP-43 purpose segment of the derivation
/// path, so switching address types never reuses key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    /// Legacy pay-to-pubkey-hash (BIP-44, purpose 44')
    P2pkh,

    /// Wrapped segwit pay-to-script-hash over P2WPKH (BIP-49, purpose 49')
    P2shP2wpkh,

    /// Native segwit pay-to-witness-pubkey-hash (BIP-84, purpose 84')
    P2wpkh,
}

impl AddressType {
    /// BIP-43 purpose field for this address type
    pub fn purpose(&self) -> u32 {
        match self {
            AddressType::P2pkh => 44,
            AddressType::P2shP2wpkh => 49,
            AddressType::P2wpkh => 84,
        }
    }

    /// Resolve an address type from a BIP-43 purpose field
    pub fn from_purpose(purpose: u32) -> Option<Self> {
        match purpose {
            44 => Some(AddressType::P2pkh),
            49 => Some(AddressType::P2shP2wpkh),
            84 => Some(AddressType::P2wpkh),
            _ => None,
        }
    }

    /// Whether inputs of this type carry a witness
    pub fn is_segwit(&self) -> bool {
        !matches!(self, AddressType::P2pkh)
    }
}

impl std::fmt::Display for AddressType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressType::P2pkh => write!(f, "p2pkh"),
            AddressType::P2shP2wpkh => write!(f, "p2sh-p2wpkh"),
            AddressType::P2wpkh => write!(f, "p2wpkh"),
        }
    }
}

impl std::str::FromStr for AddressType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "p2pkh" | "legacy" => Ok(AddressType::P2pkh),
            "p2sh-p2wpkh" | "p2sh" | "wrapped-segwit" => Ok(AddressType::P2shP2wpkh),
            "p2wpkh" | "segwit" | "bech32" => Ok(AddressType::P2wpkh),
            _ => Err(format!(
                "Unsupported address type '{}'. Valid options: p2pkh, p2sh-p2wpkh, p2wpkh",
                s
            )),
        }
    }
}

/// Fee tier selected for a draft transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    /// Target next-block confirmation
    Fast,

    /// Target confirmation within a few blocks
    Normal,

    /// Low priority, confirmation whenever
    Slow,

    /// User-entered fee rate
    Custom,
}

impl Default for FeeTier {
    fn default() -> Self {
        FeeTier::Normal
    }
}

/// Kind of fee bump applied to a pending transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostKind {
    /// Replace-By-Fee: the replacement spends the same inputs and fully
    /// supersedes the original
    Rbf,

    /// Child-Pays-For-Parent: a new child transaction spends an output of
    /// the original and pays enough fee for both
    Cpfp,
}

impl std::fmt::Display for BoostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoostKind::Rbf => write!(f, "RBF"),
            BoostKind::Cpfp => write!(f, "CPFP"),
        }
    }
}

/// A single requested transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Destination address string
    pub address: String,

    /// Output value in satoshis
    pub value_sats: u64,
}

/// Result of a sync round against the indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Snapshot reflects the latest indexer responses
    Synced,

    /// The indexer was unreachable; the snapshot is the previous cached
    /// state and may be stale
    Degraded,
}

impl SyncStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SyncStatus::Degraded)
    }
}

/// Derived activity feed entry
///
/// Regenerated from the transaction history plus boost-chain resolution.
/// Never persisted independently of its source transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityItem {
    /// Transaction id of the chain tip this item represents
    pub id: String,

    /// Externally visible value in satoshis (negative for sends)
    pub value_sats: i64,

    /// Fee paid by the chain tip in satoshis
    pub fee_sats: u64,

    /// Whether the tip transaction is confirmed
    pub confirmed: bool,

    /// Unix timestamp of the tip transaction
    pub timestamp: i64,

    /// Whether this item is the result of one or more boosts
    pub boosted: bool,
}
