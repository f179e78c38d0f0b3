//! Shared test helpers: a scripted in-memory indexer and wallet fixtures
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use wallet_engine::indexer::{
    HeaderInfo, IndexerClient, IndexerError, MempoolEntry, Subscription, TxHistoryEntry,
    UnspentEntry,
};
use wallet_engine::keys::{derive_address, seed_from_mnemonic, DerivationPath, Seed, WalletAddress};
use wallet_engine::{AddressType, EngineConfig, NetworkType, RetryPolicy};

/// Standard BIP-39 test mnemonic
pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

static INIT_LOGGING: std::sync::Once = std::sync::Once::new();

/// Route engine logs through the test harness
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn test_seed() -> Seed {
    seed_from_mnemonic(TEST_MNEMONIC, "").expect("test mnemonic is valid")
}

/// Derive a wallet address from the test seed
pub fn test_address(
    network: NetworkType,
    address_type: AddressType,
    change: bool,
    index: u32,
) -> WalletAddress {
    let path = if change {
        DerivationPath::change(address_type, network, index)
    } else {
        DerivationPath::receive(address_type, network, index)
    };
    derive_address(&test_seed(), &path, network).expect("derivation succeeds")
}

/// Build a raw deposit transaction paying `value_sats` to `address`
///
/// Returns `(txid, raw_hex)`. The input spends a null outpoint nobody
/// would serve, but the engine only inspects outputs and sequence
/// numbers when it ingests a transaction.
pub fn deposit_transaction(address: &str, value_sats: u64, rbf: bool) -> (String, String) {
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

    let dest = address
        .parse::<bitcoin::Address<bitcoin::address::NetworkUnchecked>>()
        .expect("valid address")
        .assume_checked();
    let sequence = if rbf {
        Sequence::from_consensus(0xFFFF_FFFD)
    } else {
        Sequence::from_consensus(0xFFFF_FFFE)
    };
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value_sats),
            script_pubkey: dest.script_pubkey(),
        }],
    };
    (
        tx.compute_txid().to_string(),
        bitcoin::consensus::encode::serialize_hex(&tx),
    )
}

/// Engine config tuned for tests: no retry backoff delays
pub fn test_config(network: NetworkType) -> EngineConfig {
    let mut config = EngineConfig::for_network(network);
    config.gap_limit = 5;
    config.scan_batch_size = 5;
    config.retry = RetryPolicy {
        max_attempts: 1,
        backoff_ms: 1,
    };
    config
}

#[derive(Default)]
struct MockState {
    histories: BTreeMap<String, Vec<TxHistoryEntry>>,
    mempools: BTreeMap<String, Vec<MempoolEntry>>,
    unspent: BTreeMap<String, Vec<UnspentEntry>>,
    transactions: BTreeMap<String, String>,
    tip_height: u32,
    /// Number of upcoming calls that fail with `Unavailable`
    fail_next: u32,
    broadcast_rejection: Option<String>,
    broadcasts: Vec<String>,
}

/// Scripted indexer for tests
///
/// Responses are keyed per script hash; unknown hashes return empty rows
/// (exactly what a real indexer reports for unused addresses). Failures
/// can be injected for a fixed number of upcoming calls.
#[derive(Default)]
pub struct MockIndexer {
    state: Mutex<MockState>,
}

impl MockIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock indexer lock")
    }

    /// Mark a script hash as used with one confirmed history entry
    pub fn mark_used(&self, script_hash: &str, tx_id: &str, height: u32) {
        self.lock()
            .histories
            .entry(script_hash.to_string())
            .or_default()
            .push(TxHistoryEntry {
                tx_hash: tx_id.to_string(),
                height,
            });
    }

    /// Mark a script hash as used via the mempool only
    pub fn mark_mempool(&self, script_hash: &str, tx_id: &str, fee_sats: u64) {
        self.lock()
            .mempools
            .entry(script_hash.to_string())
            .or_default()
            .push(MempoolEntry {
                tx_hash: tx_id.to_string(),
                fee_sats,
            });
    }

    /// Fund a script hash with an unspent output
    pub fn fund(&self, script_hash: &str, tx_id: &str, tx_pos: u32, value_sats: u64, height: u32) {
        self.lock()
            .unspent
            .entry(script_hash.to_string())
            .or_default()
            .push(UnspentEntry {
                tx_hash: tx_id.to_string(),
                tx_pos,
                value_sats,
                height,
            });
    }

    /// Remove all unspent entries for a script hash
    pub fn clear_unspent(&self, script_hash: &str) {
        self.lock().unspent.remove(script_hash);
    }

    /// Serve a raw transaction through `get_transactions`
    pub fn add_transaction(&self, tx_id: &str, raw_hex: &str) {
        self.lock()
            .transactions
            .insert(tx_id.to_string(), raw_hex.to_string());
    }

    /// Register a confirmed deposit paying the address: raw bytes,
    /// history entry and unspent output in one step. Returns the txid.
    pub fn deposit_confirmed(
        &self,
        address: &WalletAddress,
        value_sats: u64,
        height: u32,
    ) -> String {
        let (tx_id, raw_hex) = deposit_transaction(&address.address, value_sats, false);
        self.add_transaction(&tx_id, &raw_hex);
        self.mark_used(&address.script_hash, &tx_id, height);
        self.fund(&address.script_hash, &tx_id, 0, value_sats, height);
        tx_id
    }

    /// Register an unconfirmed deposit: raw bytes, mempool entry and a
    /// zero-height unspent output. Returns the txid.
    pub fn deposit_pending(
        &self,
        address: &WalletAddress,
        value_sats: u64,
        fee_sats: u64,
    ) -> String {
        let (tx_id, raw_hex) = deposit_transaction(&address.address, value_sats, false);
        self.add_transaction(&tx_id, &raw_hex);
        self.mark_mempool(&address.script_hash, &tx_id, fee_sats);
        self.fund(&address.script_hash, &tx_id, 0, value_sats, 0);
        tx_id
    }

    /// Make the next `n` calls fail with `Unavailable`
    pub fn fail_next(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Reject all broadcasts with the given message
    pub fn reject_broadcasts(&self, message: &str) {
        self.lock().broadcast_rejection = Some(message.to_string());
    }

    /// Raw transactions broadcast so far
    pub fn broadcasts(&self) -> Vec<String> {
        self.lock().broadcasts.clone()
    }

    pub fn set_tip_height(&self, height: u32) {
        self.lock().tip_height = height;
    }

    fn check_failure(&self) -> Result<(), IndexerError> {
        let mut state = self.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(IndexerError::Unavailable);
        }
        Ok(())
    }
}

impl IndexerClient for MockIndexer {
    fn get_histories(
        &self,
        script_hashes: &[String],
    ) -> Result<Vec<Vec<TxHistoryEntry>>, IndexerError> {
        self.check_failure()?;
        let state = self.lock();
        Ok(script_hashes
            .iter()
            .map(|h| state.histories.get(h).cloned().unwrap_or_default())
            .collect())
    }

    fn get_mempools(
        &self,
        script_hashes: &[String],
    ) -> Result<Vec<Vec<MempoolEntry>>, IndexerError> {
        self.check_failure()?;
        let state = self.lock();
        Ok(script_hashes
            .iter()
            .map(|h| state.mempools.get(h).cloned().unwrap_or_default())
            .collect())
    }

    fn list_unspent(
        &self,
        script_hashes: &[String],
    ) -> Result<Vec<Vec<UnspentEntry>>, IndexerError> {
        self.check_failure()?;
        let state = self.lock();
        Ok(script_hashes
            .iter()
            .map(|h| state.unspent.get(h).cloned().unwrap_or_default())
            .collect())
    }

    fn get_transactions(&self, tx_hashes: &[String]) -> Result<Vec<String>, IndexerError> {
        self.check_failure()?;
        let state = self.lock();
        tx_hashes
            .iter()
            .map(|h| {
                state
                    .transactions
                    .get(h)
                    .cloned()
                    .ok_or_else(|| IndexerError::MalformedResponse(format!("unknown tx {}", h)))
            })
            .collect()
    }

    fn get_header(&self) -> Result<HeaderInfo, IndexerError> {
        self.check_failure()?;
        Ok(HeaderInfo {
            height: self.lock().tip_height,
            block_hash: "00".repeat(32),
        })
    }

    fn broadcast(&self, raw_tx_hex: &str) -> Result<String, IndexerError> {
        let mut state = self.lock();
        if let Some(message) = &state.broadcast_rejection {
            return Err(IndexerError::BroadcastRejected(message.clone()));
        }

        let tx: bitcoin::Transaction = bitcoin::consensus::encode::deserialize_hex(raw_tx_hex)
            .map_err(|e| IndexerError::BroadcastRejected(format!("undecodable tx: {}", e)))?;
        state.broadcasts.push(raw_tx_hex.to_string());
        Ok(tx.compute_txid().to_string())
    }

    fn subscribe_script_hash(
        &self,
        _script_hash: &str,
        _handler: Box<dyn Fn(&str) + Send>,
    ) -> Result<Subscription, IndexerError> {
        Ok(Subscription::new())
    }

    fn subscribe_headers(
        &self,
        _handler: Box<dyn Fn(&HeaderInfo) + Send>,
    ) -> Result<Subscription, IndexerError> {
        Ok(Subscription::new())
    }
}
