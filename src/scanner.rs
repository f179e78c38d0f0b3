//! Address gap-limit scanner
//!
//! Discovers the highest used address index per branch by iterative
//! widening: generate a batch, query the indexer for confirmed and
//! mempool history of every script hash in one round, advance the
//! high-water mark, and widen while any use lands within a batch of the
//! boundary. "Used" means the indexer reports at least one historical or
//! mempool transaction for the script hash.
//!
//! Receive and change branches advance in the same round through a single
//! combined batch query, so a scan never pays extra round trips for the
//! second branch.

use std::collections::BTreeMap;

use crate::config::NetworkType;
use crate::indexer::{with_retry, IndexerClient, IndexerError, RetryPolicy};
use crate::keys::{derive_address, DerivationPath, KeyError, Seed, WalletAddress};
use crate::types::AddressType;

/// Upper bound on widening rounds, so a hostile indexer claiming every
/// address is used cannot spin the scanner forever
const MAX_SCAN_ROUNDS: usize = 512;

/// Scanner errors
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Indexer error: {0}")]
    Indexer(#[from] IndexerError),

    #[error("Key derivation error: {0}")]
    Key(#[from] KeyError),

    #[error("Scan exceeded {0} widening rounds")]
    Overrun(usize),
}

/// Discovery result for one branch (receive or change)
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    /// All generated addresses keyed by script hash, including the
    /// look-ahead window
    pub addresses: BTreeMap<String, WalletAddress>,

    /// Highest used index (-1 if no address on this branch was ever used)
    pub last_used_index: i64,
}

impl BranchOutcome {
    /// Public "next address" index: high-water mark + 1, or 0 if none used
    pub fn next_index(&self) -> u32 {
        (self.last_used_index + 1) as u32
    }

    /// Number of generated but unused addresses beyond the high-water mark
    pub fn lookahead(&self) -> u32 {
        let highest_generated = self
            .addresses
            .values()
            .map(|a| a.index as i64)
            .max()
            .unwrap_or(-1);
        (highest_generated - self.last_used_index).max(0) as u32
    }
}

/// Combined discovery result for both branches
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub receive: BranchOutcome,
    pub change: BranchOutcome,

    /// Widening rounds performed (for logging/diagnostics)
    pub rounds: usize,
}

/// Parameters for one discovery run
#[derive(Debug, Clone, Copy)]
pub struct ScanParams<'a> {
    pub seed: &'a Seed,
    pub network: NetworkType,
    pub address_type: AddressType,

    /// Minimum unused look-ahead to leave beyond the high-water mark
    pub gap_limit: u32,

    /// Addresses generated and queried per round and branch
    pub batch_size: u32,

    /// Last known used receive index (-1 if unknown/none)
    pub last_receive_index: i64,

    /// Last known used change index (-1 if unknown/none)
    pub last_change_index: i64,
}

struct Branch {
    change: bool,
    addresses: BTreeMap<String, WalletAddress>,
    last_used: i64,
    next_gen: u32,
    widening: bool,
}

impl Branch {
    fn new(change: bool, last_known: i64) -> Self {
        Self {
            change,
            addresses: BTreeMap::new(),
            last_used: last_known,
            // Restart the batch window at the last known used index so a
            // restored wallet re-verifies it instead of trusting it
            next_gen: last_known.max(0) as u32,
            widening: true,
        }
    }
}

/// Run the iterative widening discovery
///
/// On indexer failure the round aborts with an error and no partial
/// result is produced; the caller keeps its previously known indexes
/// unchanged (the store is never regressed on error).
pub fn discover_addresses<C: IndexerClient + ?Sized>(
    client: &C,
    retry: &RetryPolicy,
    params: ScanParams<'_>,
) -> Result<ScanOutcome, ScanError> {
    let batch = params.batch_size.max(params.gap_limit).max(1);

    let mut receive = Branch::new(false, params.last_receive_index);
    let mut change = Branch::new(true, params.last_change_index);
    let mut rounds = 0usize;

    while receive.widening || change.widening {
        rounds += 1;
        if rounds > MAX_SCAN_ROUNDS {
            return Err(ScanError::Overrun(MAX_SCAN_ROUNDS));
        }

        // Generate this round's batch for every branch still widening and
        // collect the script hashes for one combined indexer round.
        let mut queried: Vec<(bool, u32, String)> = Vec::new();
        for branch in [&mut receive, &mut change] {
            if !branch.widening {
                continue;
            }
            let start = branch.next_gen;
            for index in start..start + batch {
                let path = if branch.change {
                    DerivationPath::change(params.address_type, params.network, index)
                } else {
                    DerivationPath::receive(params.address_type, params.network, index)
                };
                let address = derive_address(params.seed, &path, params.network)?;
                queried.push((branch.change, index, address.script_hash.clone()));
                branch.addresses.insert(address.script_hash.clone(), address);
            }
            branch.next_gen = start + batch;
        }

        let hashes: Vec<String> = queried.iter().map(|(_, _, h)| h.clone()).collect();
        let histories = with_retry(retry, "get_histories", || client.get_histories(&hashes))?;
        let mempools = with_retry(retry, "get_mempools", || client.get_mempools(&hashes))?;

        if histories.len() != hashes.len() || mempools.len() != hashes.len() {
            return Err(ScanError::Indexer(IndexerError::MalformedResponse(format!(
                "expected {} result rows, got {} history / {} mempool",
                hashes.len(),
                histories.len(),
                mempools.len()
            ))));
        }

        // Advance high-water marks; the mark only ever moves forward.
        for (i, (is_change, index, _)) in queried.iter().enumerate() {
            let used = !histories[i].is_empty() || !mempools[i].is_empty();
            if used {
                let branch = if *is_change { &mut change } else { &mut receive };
                branch.last_used = branch.last_used.max(*index as i64);
            }
        }

        // A branch keeps widening while its high-water mark sits within
        // one batch of the current boundary.
        for branch in [&mut receive, &mut change] {
            if branch.widening {
                branch.widening = branch.last_used + batch as i64 >= branch.next_gen as i64;
            }
        }
    }

    let outcome = ScanOutcome {
        receive: BranchOutcome {
            addresses: receive.addresses,
            last_used_index: receive.last_used,
        },
        change: BranchOutcome {
            addresses: change.addresses,
            last_used_index: change.last_used,
        },
        rounds,
    };

    log::debug!(
        "address discovery finished in {} rounds: receive next={} lookahead={}, change next={} lookahead={}",
        outcome.rounds,
        outcome.receive.next_index(),
        outcome.receive.lookahead(),
        outcome.change.next_index(),
        outcome.change.lookahead(),
    );

    Ok(outcome)
}
