//! Boosted-transaction resolution
//!
//! A "boost" bumps the fee of a pending transaction, either by replacing
//! it outright (RBF) or by attaching a high-fee child spend (CPFP). Each
//! broadcast boost appends a [`BoostRecord`]; this module decides which
//! kind applies to a transaction and re-derives the externally visible
//! value of a boosted chain for activity display.
//!
//! Value reconciliation treats the two kinds differently: a CPFP chain's
//! visible value is the root value minus the accumulated parent fees
//! (each child spends what its parent left behind), while an RBF chain
//! reports the root value unchanged because a replacement fully
//! supersedes its parent instead of chaining onto it.

use std::collections::{BTreeMap, BTreeSet};

use crate::storage::models::{BoostRecord, TxRecord};
use crate::types::BoostKind;

/// Boost bookkeeping errors
#[derive(Debug, thiserror::Error)]
pub enum BoostError {
    #[error("Transaction {0} already has a boost record")]
    DuplicateChild(String),

    #[error("Transaction {parent} is already boosted by {child}")]
    ParentAlreadyBoosted { parent: String, child: String },

    #[error("Boost record for {0} would create a cycle")]
    CyclicChain(String),
}

/// Resolved view of a possibly-boosted transaction chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBoost {
    /// Root (non-boosted) ancestor txid; equals the queried txid when the
    /// transaction was never boosted or its chain could not be followed
    pub root_tx_id: String,

    /// Externally visible value in satoshis (wallet perspective)
    pub value_sats: i64,

    /// Total fee spent across the chain, parents included
    pub chain_fee_sats: u64,

    /// Whether the queried transaction sits in a boost chain
    pub boosted: bool,
}

/// Which boost kind applies to a transaction, if any
///
/// Only unconfirmed transactions can be boosted. Replaceable
/// transactions get an RBF replacement; everything else gets a CPFP
/// child.
pub fn can_boost(record: &TxRecord) -> Option<BoostKind> {
    if record.confirmed {
        return None;
    }
    Some(if record.rbf {
        BoostKind::Rbf
    } else {
        BoostKind::Cpfp
    })
}

/// Append a boost record, enforcing chain integrity
///
/// Every child maps to exactly one record, a transaction may be the
/// parent of at most one active boost, and the record must not close a
/// cycle through the existing chain.
pub fn insert_boost_record(
    boosted: &mut BTreeMap<String, BoostRecord>,
    record: BoostRecord,
) -> Result<(), BoostError> {
    if boosted.contains_key(&record.child_transaction_id) {
        return Err(BoostError::DuplicateChild(record.child_transaction_id));
    }

    for parent in &record.parent_transaction_ids {
        if let Some(existing) = boosted
            .values()
            .find(|r| r.parent_transaction_ids.contains(parent))
        {
            return Err(BoostError::ParentAlreadyBoosted {
                parent: parent.clone(),
                child: existing.child_transaction_id.clone(),
            });
        }
    }

    // Following the new record's parents upward must never reach the
    // child again.
    for parent in &record.parent_transaction_ids {
        let mut current = parent.clone();
        let mut visited = BTreeSet::new();
        loop {
            if current == record.child_transaction_id {
                return Err(BoostError::CyclicChain(record.child_transaction_id));
            }
            if !visited.insert(current.clone()) {
                break;
            }
            match boosted.get(&current).and_then(|r| r.parent_transaction_ids.first()) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
    }

    boosted.insert(record.child_transaction_id.clone(), record);
    Ok(())
}

/// Resolve the externally visible value of a transaction
///
/// Walks the parent chain from `tx_id` back to the root (non-boosted)
/// ancestor, accumulating each parent's fee. CPFP chains report
/// `root value - accumulated parent fees`; RBF chains report the root
/// value as-is. A broken chain (missing root in the known transactions,
/// or a cycle in stored records) degrades to the transaction's own
/// recorded value rather than failing the activity feed.
pub fn resolve_value(
    tx_id: &str,
    boosted: &BTreeMap<String, BoostRecord>,
    transactions: &BTreeMap<String, TxRecord>,
) -> ResolvedBoost {
    let own = transactions.get(tx_id);
    let fallback = ResolvedBoost {
        root_tx_id: tx_id.to_string(),
        value_sats: own.map(|t| t.value_sats).unwrap_or(0),
        chain_fee_sats: own.map(|t| t.fee_sats).unwrap_or(0),
        boosted: boosted.contains_key(tx_id),
    };

    let Some(first) = boosted.get(tx_id) else {
        return fallback;
    };

    let mut visited = BTreeSet::new();
    visited.insert(tx_id.to_string());

    let mut parent_fees: u64 = 0;
    let mut record = first;

    // Assigned on every pass before the loop can break.
    let mut root_kind;

    let root_id = loop {
        let Some(parent) = record.parent_transaction_ids.first() else {
            // A record with no parents is malformed; degrade.
            return fallback;
        };
        if !visited.insert(parent.clone()) {
            log::warn!("boost chain for {} contains a cycle at {}", tx_id, parent);
            return fallback;
        }

        match transactions.get(parent) {
            Some(parent_tx) => parent_fees += parent_tx.fee_sats,
            None => {
                log::warn!(
                    "boost chain for {} references unknown parent {}",
                    tx_id,
                    parent
                );
                return fallback;
            }
        }

        root_kind = record.kind;
        match boosted.get(parent) {
            Some(next) => record = next,
            None => break parent.clone(),
        }
    };

    // Root presence was checked while accumulating fees.
    let Some(root) = transactions.get(&root_id) else {
        return fallback;
    };

    let value_sats = match root_kind {
        BoostKind::Cpfp => root.value_sats - parent_fees as i64,
        BoostKind::Rbf => root.value_sats,
    };

    let own_fee = own.map(|t| t.fee_sats).unwrap_or(0);

    ResolvedBoost {
        root_tx_id: root_id,
        value_sats,
        chain_fee_sats: parent_fees + own_fee,
        boosted: true,
    }
}
