//! UTXO and balance tracking
//!
//! Queries the indexer's unspent listing for the union of all known
//! receive and change script hashes and aggregates the balance. All
//! amounts are integer satoshis; no floating point appears anywhere in
//! this subsystem.

use std::collections::{BTreeMap, BTreeSet};

use crate::indexer::{with_retry, IndexerClient, IndexerError, RetryPolicy};
use crate::keys::WalletAddress;
use crate::storage::models::Utxo;

/// Tracker errors
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Indexer error: {0}")]
    Indexer(#[from] IndexerError),
}

/// Result of one UTXO scan
#[derive(Debug, Clone)]
pub struct UtxoScanResult {
    /// Full unspent set, blacklisted outputs included
    pub utxos: Vec<Utxo>,

    /// Sum of non-blacklisted UTXO values in satoshis
    pub balance_sats: u64,
}

/// Exact balance over the non-blacklisted UTXO set
pub fn balance_of(utxos: &[Utxo], blacklisted: &BTreeSet<String>) -> u64 {
    utxos
        .iter()
        .filter(|u| !blacklisted.contains(&u.outpoint_id()))
        .map(|u| u.value_sats)
        .sum()
}

/// Scan the indexer for unspent outputs belonging to the wallet
///
/// The query covers every known address, used or not; unused addresses
/// simply return empty rows. Blacklisted outpoints stay in the returned
/// set (they remain recoverable) but are excluded from the balance.
pub fn scan_utxos<C: IndexerClient + ?Sized>(
    client: &C,
    retry: &RetryPolicy,
    addresses: &BTreeMap<String, WalletAddress>,
    change_addresses: &BTreeMap<String, WalletAddress>,
    blacklisted: &BTreeSet<String>,
) -> Result<UtxoScanResult, TrackerError> {
    let mut owners: BTreeMap<&str, &WalletAddress> = BTreeMap::new();
    for (hash, addr) in addresses.iter().chain(change_addresses.iter()) {
        owners.insert(hash.as_str(), addr);
    }

    let hashes: Vec<String> = owners.keys().map(|h| h.to_string()).collect();
    if hashes.is_empty() {
        return Ok(UtxoScanResult {
            utxos: Vec::new(),
            balance_sats: 0,
        });
    }

    let rows = with_retry(retry, "list_unspent", || client.list_unspent(&hashes))?;
    if rows.len() != hashes.len() {
        return Err(TrackerError::Indexer(IndexerError::MalformedResponse(
            format!("expected {} unspent rows, got {}", hashes.len(), rows.len()),
        )));
    }

    let mut utxos = Vec::new();
    for (hash, entries) in hashes.iter().zip(rows) {
        let owner = owners[hash.as_str()];
        for entry in entries {
            utxos.push(Utxo {
                tx_id: entry.tx_hash,
                tx_pos: entry.tx_pos,
                address: owner.address.clone(),
                script_hash: hash.clone(),
                path: owner.path.clone(),
                value_sats: entry.value_sats,
                confirmation_height: entry.height,
            });
        }
    }

    // Largest first, matching coin-selection preference
    utxos.sort_by(|a, b| b.value_sats.cmp(&a.value_sats));

    let balance_sats = balance_of(&utxos, blacklisted);

    log::debug!(
        "utxo scan: {} outputs, {} sats spendable",
        utxos.len(),
        balance_sats
    );

    Ok(UtxoScanResult { utxos, balance_sats })
}
