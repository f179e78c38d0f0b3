//! Persisted wallet state models
//!
//! The shapes in this module are what gets backed up and restored, so
//! they must stay forward-compatible: unknown fields are ignored on read
//! (serde default behavior) and new fields carry `#[serde(default)]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::keys::WalletAddress;
use crate::types::{AddressType, BoostKind, FeeTier, OutputSpec};

/// An unspent transaction output controlled by the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Funding transaction id
    pub tx_id: String,

    /// Output position within the funding transaction
    pub tx_pos: u32,

    /// Owning address
    pub address: String,

    /// Script hash of the owning address
    pub script_hash: String,

    /// Canonical derivation path of the owning address
    pub path: String,

    /// Value in satoshis
    pub value_sats: u64,

    /// Confirmation height (0 if unconfirmed)
    pub confirmation_height: u32,
}

impl Utxo {
    /// Outpoint identifier in `txid:vout` form
    pub fn outpoint_id(&self) -> String {
        format!("{}:{}", self.tx_id, self.tx_pos)
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmation_height > 0
    }
}

/// A transaction known to the wallet (sent or received)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Transaction id
    pub tx_id: String,

    /// Net value from the wallet's perspective in satoshis (negative for
    /// sends)
    pub value_sats: i64,

    /// Fee paid in satoshis
    pub fee_sats: u64,

    /// Whether the transaction is confirmed
    pub confirmed: bool,

    /// Confirmation height (0 if unconfirmed)
    #[serde(default)]
    pub height: u32,

    /// Unix timestamp when the wallet first saw the transaction
    pub timestamp: i64,

    /// Whether the transaction signals replaceability
    #[serde(default)]
    pub rbf: bool,

    /// Inputs consumed by this transaction (kept for RBF rebuilds)
    #[serde(default)]
    pub inputs: Vec<Utxo>,

    /// Requested outputs (kept for RBF rebuilds)
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,

    /// Change address used, if any
    #[serde(default)]
    pub change_address: Option<String>,
}

/// An in-progress transaction being assembled by the send flow
///
/// Invariant maintained by the builder: `fee_sats` always equals
/// `ceil(virtual size) * fee_rate` for the current inputs/outputs, and
/// never exceeds half of the funds controlled by `inputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftTransaction {
    /// Candidate inputs (all spendable UTXOs, or a manual selection)
    pub inputs: Vec<Utxo>,

    /// Requested outputs
    pub outputs: Vec<OutputSpec>,

    /// Change address, absent for send-max drafts
    pub change_address: Option<String>,

    /// Fee rate in satoshis per virtual byte
    pub fee_rate: u64,

    /// Current total fee in satoshis
    pub fee_sats: u64,

    /// Whether inputs signal replaceability
    pub rbf: bool,

    /// Selected fee tier
    #[serde(default)]
    pub fee_tier: FeeTier,

    /// Whether this draft is a send-max (single output, no change)
    #[serde(default)]
    pub max: bool,
}

impl DraftTransaction {
    /// Total value controlled by the draft's inputs
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|u| u.value_sats).sum()
    }

    /// Total value of the requested outputs
    pub fn output_total(&self) -> u64 {
        self.outputs.iter().map(|o| o.value_sats).sum()
    }
}

/// Record of one fee bump applied to a pending transaction
///
/// Append-only: records are created when a boost is broadcast and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoostRecord {
    /// Transactions this boost supersedes or builds on
    pub parent_transaction_ids: Vec<String>,

    /// The boosting transaction
    pub child_transaction_id: String,

    /// RBF replacement or CPFP child
    pub kind: BoostKind,

    /// Additional fee introduced by this boost, in satoshis
    pub fee_delta_sats: u64,
}

fn no_index() -> i64 {
    -1
}

/// Per-(wallet, network) persisted state
///
/// This is the shared store every engine component reads and writes. The
/// address maps are keyed by script hash, matching the indexer's query
/// key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletState {
    /// Receive addresses keyed by script hash
    #[serde(default)]
    pub addresses: BTreeMap<String, WalletAddress>,

    /// Change addresses keyed by script hash
    #[serde(default)]
    pub change_addresses: BTreeMap<String, WalletAddress>,

    /// Highest used receive index (-1 if none used yet)
    #[serde(default = "no_index")]
    pub address_index: i64,

    /// Highest used change index (-1 if none used yet)
    #[serde(default = "no_index")]
    pub change_address_index: i64,

    /// Address type all derivation in this state uses
    pub address_type: AddressType,

    /// Current unspent output set
    #[serde(default)]
    pub utxos: Vec<Utxo>,

    /// Outpoint ids excluded from coin selection without being removed
    /// from the raw set
    #[serde(default)]
    pub blacklisted: BTreeSet<String>,

    /// Sum of non-blacklisted UTXO values, in satoshis
    #[serde(default)]
    pub balance_sats: u64,

    /// Known transactions keyed by txid
    #[serde(default)]
    pub transactions: BTreeMap<String, TxRecord>,

    /// Boost records keyed by child txid
    #[serde(default)]
    pub boosted: BTreeMap<String, BoostRecord>,

    /// In-progress draft transaction, if a send flow is active
    #[serde(default)]
    pub draft: Option<DraftTransaction>,

    /// Last successful sync timestamp
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl WalletState {
    /// Fresh state for a newly created wallet
    pub fn new(address_type: AddressType) -> Self {
        Self {
            addresses: BTreeMap::new(),
            change_addresses: BTreeMap::new(),
            address_index: -1,
            change_address_index: -1,
            address_type,
            utxos: Vec::new(),
            blacklisted: BTreeSet::new(),
            balance_sats: 0,
            transactions: BTreeMap::new(),
            boosted: BTreeMap::new(),
            draft: None,
            last_sync: None,
        }
    }

    /// Union of all known receive and change script hashes
    pub fn all_script_hashes(&self) -> Vec<String> {
        self.addresses
            .keys()
            .chain(self.change_addresses.keys())
            .cloned()
            .collect()
    }

    /// Whether the wallet owns the given address (either branch)
    pub fn owns_address(&self, address: &str) -> bool {
        self.addresses.values().any(|a| a.address == address)
            || self.change_addresses.values().any(|a| a.address == address)
    }

    /// Next unused receive index
    pub fn next_receive_index(&self) -> u32 {
        (self.address_index + 1) as u32
    }

    /// Next unused change index
    pub fn next_change_index(&self) -> u32 {
        (self.change_address_index + 1) as u32
    }

    /// Look up a receive address by branch index
    pub fn receive_address_at(&self, index: u32) -> Option<&WalletAddress> {
        self.addresses.values().find(|a| a.index == index)
    }

    /// Look up a change address by branch index
    pub fn change_address_at(&self, index: u32) -> Option<&WalletAddress> {
        self.change_addresses.values().find(|a| a.index == index)
    }

    /// Highest generated index on a branch, if any addresses exist
    pub fn highest_generated_index(&self, change: bool) -> Option<u32> {
        let map = if change {
            &self.change_addresses
        } else {
            &self.addresses
        };
        map.values().map(|a| a.index).max()
    }

    /// UTXOs eligible for coin selection (not blacklisted)
    pub fn spendable_utxos(&self) -> Vec<Utxo> {
        self.utxos
            .iter()
            .filter(|u| !self.blacklisted.contains(&u.outpoint_id()))
            .cloned()
            .collect()
    }

    /// Exclude a UTXO from coin selection without removing it
    ///
    /// Returns false if no such outpoint is in the raw set.
    pub fn blacklist_utxo(&mut self, outpoint_id: &str) -> bool {
        if self.utxos.iter().any(|u| u.outpoint_id() == outpoint_id) {
            self.blacklisted.insert(outpoint_id.to_string());
            self.balance_sats = crate::tracker::balance_of(&self.utxos, &self.blacklisted);
            true
        } else {
            false
        }
    }

    /// Make a blacklisted UTXO selectable again
    pub fn unblacklist_utxo(&mut self, outpoint_id: &str) -> bool {
        let removed = self.blacklisted.remove(outpoint_id);
        if removed {
            self.balance_sats = crate::tracker::balance_of(&self.utxos, &self.blacklisted);
        }
        removed
    }
}
