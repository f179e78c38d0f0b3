//! Blockchain indexer client surface
//!
//! The engine consumes a batched, script-hash-keyed RPC surface: history,
//! mempool and unspent queries plus transaction fetch, header queries and
//! broadcast. Connection management (reconnect, resubscribe) belongs to
//! the client implementation, not to this crate's callers.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Errors surfaced by indexer clients
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("Network request failed: {0}")]
    Request(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Indexer unavailable")]
    Unavailable,

    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("Malformed indexer response: {0}")]
    MalformedResponse(String),
}

impl IndexerError {
    /// Whether a bounded retry is worthwhile for this failure
    ///
    /// Broadcast rejections and malformed responses are never retried: a
    /// resend could double-spend, and a protocol mismatch will not fix
    /// itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexerError::Request(_) | IndexerError::Timeout | IndexerError::Unavailable
        )
    }
}

/// One confirmed history entry for a script hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHistoryEntry {
    /// Transaction id
    pub tx_hash: String,

    /// Confirmation height (0 for mempool entries reported via history)
    pub height: u32,
}

/// One mempool entry for a script hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolEntry {
    /// Transaction id
    pub tx_hash: String,

    /// Fee in satoshis as reported by the indexer
    pub fee_sats: u64,
}

/// One unspent output for a script hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentEntry {
    /// Funding transaction id
    pub tx_hash: String,

    /// Output position within the funding transaction
    pub tx_pos: u32,

    /// Output value in satoshis
    pub value_sats: u64,

    /// Confirmation height (0 if unconfirmed)
    pub height: u32,
}

/// Chain tip information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    /// Tip height
    pub height: u32,

    /// Tip block hash, hex-encoded
    pub block_hash: String,
}

/// Handle for an active script-hash or header subscription
///
/// Dropping the handle does not cancel the subscription; call `cancel()`.
#[derive(Debug, Clone)]
pub struct Subscription {
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stop delivering notifications for this subscription
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

/// Batched indexer client
///
/// All script-hash queries take a batch and return one result vector per
/// input key, in order. A single round trip covers the whole batch, which
/// is how the engine fans out receive- and change-branch queries within
/// one discovery round.
pub trait IndexerClient {
    /// Confirmed transaction history per script hash
    fn get_histories(
        &self,
        script_hashes: &[String],
    ) -> Result<Vec<Vec<TxHistoryEntry>>, IndexerError>;

    /// Mempool transactions per script hash
    fn get_mempools(
        &self,
        script_hashes: &[String],
    ) -> Result<Vec<Vec<MempoolEntry>>, IndexerError>;

    /// Unspent outputs per script hash
    fn list_unspent(
        &self,
        script_hashes: &[String],
    ) -> Result<Vec<Vec<UnspentEntry>>, IndexerError>;

    /// Raw transactions by id, hex-encoded
    fn get_transactions(&self, tx_hashes: &[String]) -> Result<Vec<String>, IndexerError>;

    /// Current chain tip
    fn get_header(&self) -> Result<HeaderInfo, IndexerError>;

    /// Broadcast a raw transaction, returning the accepted txid
    ///
    /// Implementations must propagate rejection messages verbatim via
    /// `IndexerError::BroadcastRejected`.
    fn broadcast(&self, raw_tx_hex: &str) -> Result<String, IndexerError>;

    /// Subscribe to status changes for a script hash
    ///
    /// The handler receives the script hash whose status changed. It must
    /// be a pure state-update hook; implementations stop invoking it once
    /// the returned handle is cancelled.
    fn subscribe_script_hash(
        &self,
        script_hash: &str,
        handler: Box<dyn Fn(&str) + Send>,
    ) -> Result<Subscription, IndexerError>;

    /// Subscribe to new chain tips
    fn subscribe_headers(
        &self,
        handler: Box<dyn Fn(&HeaderInfo) + Send>,
    ) -> Result<Subscription, IndexerError>;
}

/// Bounded retry policy for indexer calls
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Base backoff in milliseconds, doubled after each failed attempt
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 250,
        }
    }
}

/// Run an indexer call with bounded retry and exponential backoff
///
/// Every retried failure is logged as a warning so fallback paths stay
/// observable. Non-retryable errors (broadcast rejection, malformed
/// responses) are returned immediately.
pub fn with_retry<T, F>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T, IndexerError>
where
    F: FnMut() -> Result<T, IndexerError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut backoff = Duration::from_millis(policy.backoff_ms);

    for attempt in 1..=attempts {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                log::warn!(
                    "indexer {} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation,
                    attempt,
                    attempts,
                    err,
                    backoff
                );
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop always returns")
}
