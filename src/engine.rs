//! Wallet engine orchestrator
//!
//! Ties the subsystems together behind one handle: key material in the
//! secret store, derived addresses and discovery, the UTXO set and
//! balance, the draft/send flow and fee bumps. Every mutation goes
//! through `&mut self`, so state transitions are serialized by
//! construction; observers receive immutable snapshots through
//! registered update listeners and never mutate engine state.
//!
//! Sync is deliberately forgiving: when the indexer stays unreachable
//! after bounded retries the engine keeps its cached snapshot and reports
//! a degraded status instead of failing, so a wallet opened offline still
//! shows its last known balance and history.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};

use crate::boost::{self, BoostError};
use crate::builder::{self, SendError};
use crate::config::{EngineConfig, NetworkType};
use crate::indexer::{with_retry, IndexerClient, IndexerError, Subscription};
use crate::keys::{
    derive_address, generate_mnemonic, script_hash_of, seed_from_mnemonic, DerivationPath,
    KeyError, Seed, WalletAddress,
};
use crate::scanner::{discover_addresses, ScanError, ScanParams};
use crate::storage::models::{BoostRecord, DraftTransaction, TxRecord, WalletState};
use crate::storage::secrets::{SecretError, SecretStore};
use crate::storage::{StoreError, WalletStore};
use crate::tracker::{self, TrackerError};
use crate::types::{ActivityItem, BoostKind, FeeTier, OutputSpec, SyncStatus};

/// Engine-level errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Wallet '{0}' already exists")]
    WalletExists(String),

    #[error("Wallet '{0}' not found")]
    WalletNotFound(String),

    #[error("No draft transaction in progress")]
    NoDraft,

    #[error("Transaction {0} cannot be boosted: {1}")]
    NotBoostable(String, String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Boost error: {0}")]
    Boost(#[from] BoostError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Secret store error: {0}")]
    Secret(#[from] SecretError),

    #[error("Indexer error: {0}")]
    Indexer(#[from] IndexerError),
}

/// Snapshot notifications emitted after state mutations
///
/// Listeners receive these after the mutation has been persisted; the
/// payloads are copies, never live references into engine state.
#[derive(Debug, Clone)]
pub enum StateUpdate {
    /// Address maps changed (counts per branch)
    Addresses { receive: usize, change: usize },

    /// UTXO set or balance changed
    Balance { utxos: usize, balance_sats: u64 },

    /// Transaction history changed
    Transactions { count: usize },

    /// Draft transaction changed (None after completion/cancellation)
    Draft(Option<DraftTransaction>),

    /// A boost was recorded for the given child txid
    Boosted { child_tx_id: String },
}

type UpdateListener = Box<dyn Fn(&StateUpdate) + Send>;

/// The wallet engine
///
/// Generic over the indexer client and the wallet store so tests can
/// substitute scripted implementations.
pub struct WalletEngine<C: IndexerClient, S: WalletStore> {
    config: EngineConfig,
    client: C,
    store: S,
    secrets: Box<dyn SecretStore + Send>,
    wallet_id: String,
    state: WalletState,
    listeners: Vec<UpdateListener>,
}

fn mnemonic_key(wallet_id: &str) -> String {
    format!("mnemonic/{}", wallet_id)
}

fn passphrase_key(wallet_id: &str) -> String {
    format!("passphrase/{}", wallet_id)
}

impl<C: IndexerClient, S: WalletStore> WalletEngine<C, S> {
    /// Create a brand-new wallet
    ///
    /// Generates a 12-word mnemonic, stores it (and the optional
    /// passphrase) in the secret store keyed by wallet id, initializes
    /// fresh per-network state with a full look-ahead window, and
    /// persists it. Returns the engine and the phrase for user backup;
    /// the phrase is never written anywhere except the secret store.
    pub fn create_wallet(
        wallet_id: &str,
        passphrase: Option<&str>,
        config: EngineConfig,
        client: C,
        store: S,
        secrets: Box<dyn SecretStore + Send>,
    ) -> Result<(Self, String), EngineError> {
        let phrase = generate_mnemonic()?.to_string();
        let engine = Self::restore_wallet(
            wallet_id, &phrase, passphrase, config, client, store, secrets,
        )?;
        Ok((engine, phrase))
    }

    /// Restore a wallet from an existing mnemonic
    ///
    /// The phrase must pass BIP-39 validation before anything is stored.
    #[allow(clippy::too_many_arguments)]
    pub fn restore_wallet(
        wallet_id: &str,
        phrase: &str,
        passphrase: Option<&str>,
        config: EngineConfig,
        client: C,
        store: S,
        secrets: Box<dyn SecretStore + Send>,
    ) -> Result<Self, EngineError> {
        let passphrase = passphrase.unwrap_or("");
        seed_from_mnemonic(phrase, passphrase)?;

        if store.load(wallet_id, config.network)?.is_some() {
            return Err(EngineError::WalletExists(wallet_id.to_string()));
        }

        let mut engine = Self {
            state: WalletState::new(config.address_type),
            config,
            client,
            store,
            secrets,
            wallet_id: wallet_id.to_string(),
            listeners: Vec::new(),
        };

        engine
            .secrets
            .set_secret(&mnemonic_key(wallet_id), phrase.as_bytes())?;
        if !passphrase.is_empty() {
            engine
                .secrets
                .set_secret(&passphrase_key(wallet_id), passphrase.as_bytes())?;
        }

        engine.ensure_lookahead()?;
        engine.persist()?;

        log::info!("wallet '{}' initialized on {}", wallet_id, engine.config.network);
        Ok(engine)
    }

    /// Open a previously created wallet
    pub fn open(
        wallet_id: &str,
        config: EngineConfig,
        client: C,
        store: S,
        secrets: Box<dyn SecretStore + Send>,
    ) -> Result<Self, EngineError> {
        let state = store
            .load(wallet_id, config.network)?
            .ok_or_else(|| EngineError::WalletNotFound(wallet_id.to_string()))?;

        if secrets.get_secret(&mnemonic_key(wallet_id))?.is_none() {
            return Err(EngineError::WalletNotFound(wallet_id.to_string()));
        }

        Ok(Self {
            config,
            client,
            store,
            secrets,
            wallet_id: wallet_id.to_string(),
            state,
            listeners: Vec::new(),
        })
    }

    /// Register an update listener
    pub fn on_update(&mut self, listener: UpdateListener) {
        self.listeners.push(listener);
    }

    /// Read-only view of the current state
    pub fn state(&self) -> &WalletState {
        &self.state
    }

    /// Current spendable balance in satoshis
    pub fn balance_sats(&self) -> u64 {
        self.state.balance_sats
    }

    /// Currently selected network
    pub fn network(&self) -> NetworkType {
        self.config.network
    }

    /// The underlying indexer client
    pub fn client(&self) -> &C {
        &self.client
    }

    fn emit(&self, update: StateUpdate) {
        for listener in &self.listeners {
            listener(&update);
        }
    }

    fn persist(&mut self) -> Result<(), EngineError> {
        self.store
            .save(&self.wallet_id, self.config.network, &self.state)?;
        Ok(())
    }

    /// Reconstruct the seed from the secret store
    fn seed(&self) -> Result<Seed, EngineError> {
        let phrase_bytes = self
            .secrets
            .get_secret(&mnemonic_key(&self.wallet_id))?
            .ok_or_else(|| EngineError::WalletNotFound(self.wallet_id.clone()))?;
        let phrase = String::from_utf8(phrase_bytes)
            .map_err(|e| KeyError::InvalidSeed(e.to_string()))?;

        let passphrase = match self.secrets.get_secret(&passphrase_key(&self.wallet_id))? {
            Some(bytes) => {
                String::from_utf8(bytes).map_err(|e| KeyError::InvalidSeed(e.to_string()))?
            }
            None => String::new(),
        };

        Ok(seed_from_mnemonic(&phrase, &passphrase)?)
    }

    /// Derive addresses until each branch has a full look-ahead window
    /// beyond its high-water mark
    ///
    /// Pure derivation, no indexer involved; existing entries are never
    /// regenerated.
    fn ensure_lookahead(&mut self) -> Result<(), EngineError> {
        let seed = self.seed()?;
        let gap = self.config.gap_limit.max(1);
        let mut changed = false;

        for change in [false, true] {
            let last_used = if change {
                self.state.change_address_index
            } else {
                self.state.address_index
            };
            let target = (last_used + gap as i64).max(0) as u32;
            let from = self
                .state
                .highest_generated_index(change)
                .map(|i| i + 1)
                .unwrap_or(0);

            for index in from..=target {
                let path = if change {
                    DerivationPath::change(self.state.address_type, self.config.network, index)
                } else {
                    DerivationPath::receive(self.state.address_type, self.config.network, index)
                };
                let address = derive_address(&seed, &path, self.config.network)?;
                let map = if change {
                    &mut self.state.change_addresses
                } else {
                    &mut self.state.addresses
                };
                map.insert(address.script_hash.clone(), address);
                changed = true;
            }
        }

        if changed {
            self.emit(StateUpdate::Addresses {
                receive: self.state.addresses.len(),
                change: self.state.change_addresses.len(),
            });
        }
        Ok(())
    }

    /// Next unused receive address, with the look-ahead window already
    /// replenished behind it
    pub fn next_receive_address(&mut self) -> Result<WalletAddress, EngineError> {
        self.ensure_lookahead()?;
        let index = self.state.next_receive_index();
        let address = self
            .state
            .receive_address_at(index)
            .cloned()
            .ok_or_else(|| KeyError::Bip32(format!("missing receive address {}", index)))?;
        Ok(address)
    }

    /// Full sync round: address discovery, UTXO refresh, transaction
    /// ledger refresh
    ///
    /// On indexer failure (after bounded retries) the cached snapshot is
    /// kept untouched and `Degraded` is returned; high-water marks are
    /// never regressed.
    pub fn sync(&mut self) -> Result<SyncStatus, EngineError> {
        let seed = self.seed()?;
        let params = ScanParams {
            seed: &seed,
            network: self.config.network,
            address_type: self.state.address_type,
            gap_limit: self.config.gap_limit,
            batch_size: self.config.batch_size(),
            last_receive_index: self.state.address_index,
            last_change_index: self.state.change_address_index,
        };

        let outcome = match discover_addresses(&self.client, &self.config.retry, params) {
            Ok(outcome) => outcome,
            Err(ScanError::Indexer(e)) => {
                log::warn!("sync degraded, keeping cached snapshot: {}", e);
                return Ok(SyncStatus::Degraded);
            }
            Err(e) => return Err(e.into()),
        };

        // High-water marks only ever move forward.
        self.state.address_index = self.state.address_index.max(outcome.receive.last_used_index);
        self.state.change_address_index = self
            .state
            .change_address_index
            .max(outcome.change.last_used_index);
        self.state.addresses.extend(outcome.receive.addresses);
        self.state.change_addresses.extend(outcome.change.addresses);
        self.ensure_lookahead()?;

        let scan = match tracker::scan_utxos(
            &self.client,
            &self.config.retry,
            &self.state.addresses,
            &self.state.change_addresses,
            &self.state.blacklisted,
        ) {
            Ok(scan) => scan,
            Err(TrackerError::Indexer(e)) => {
                log::warn!("utxo refresh degraded, keeping cached snapshot: {}", e);
                self.persist()?;
                return Ok(SyncStatus::Degraded);
            }
        };
        self.state.utxos = scan.utxos;
        self.state.balance_sats = scan.balance_sats;

        if let Err(e) = self.refresh_transactions() {
            log::warn!("transaction refresh degraded: {}", e);
            self.persist()?;
            return Ok(SyncStatus::Degraded);
        }

        self.state.last_sync = Some(Utc::now());
        self.persist()?;

        self.emit(StateUpdate::Balance {
            utxos: self.state.utxos.len(),
            balance_sats: self.state.balance_sats,
        });
        self.emit(StateUpdate::Transactions {
            count: self.state.transactions.len(),
        });

        log::info!(
            "sync complete: {} addresses, {} utxos, {} sats",
            self.state.addresses.len() + self.state.change_addresses.len(),
            self.state.utxos.len(),
            self.state.balance_sats
        );
        Ok(SyncStatus::Synced)
    }

    /// Refresh the transaction ledger from the indexer
    ///
    /// One history/mempool round does two jobs: transactions the indexer
    /// reports on wallet script hashes that the ledger has never seen
    /// (deposits, or sends signed by another copy of the seed) are
    /// ingested from their raw bytes, and known pending records are
    /// marked confirmed once they appear in confirmed history.
    fn refresh_transactions(&mut self) -> Result<(), IndexerError> {
        let hashes = self.state.all_script_hashes();
        if hashes.is_empty() {
            return Ok(());
        }

        let histories = with_retry(&self.config.retry, "get_histories", || {
            self.client.get_histories(&hashes)
        })?;
        let mempools = with_retry(&self.config.retry, "get_mempools", || {
            self.client.get_mempools(&hashes)
        })?;

        let mut confirmed_at: BTreeMap<String, u32> = BTreeMap::new();
        for entries in &histories {
            for entry in entries {
                if entry.height > 0 {
                    confirmed_at.insert(entry.tx_hash.clone(), entry.height);
                }
            }
        }
        let mut mempool_fees: BTreeMap<String, u64> = BTreeMap::new();
        for entries in &mempools {
            for entry in entries {
                mempool_fees.insert(entry.tx_hash.clone(), entry.fee_sats);
            }
        }

        let unknown: Vec<String> = confirmed_at
            .keys()
            .chain(mempool_fees.keys())
            .filter(|id| !self.state.transactions.contains_key(*id))
            .cloned()
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        if !unknown.is_empty() {
            let raws = with_retry(&self.config.retry, "get_transactions", || {
                self.client.get_transactions(&unknown)
            })?;
            for (tx_id, raw_hex) in unknown.iter().zip(&raws) {
                self.ingest_transaction(tx_id, raw_hex, &confirmed_at, &mempool_fees);
            }
        }

        for (tx_id, height) in &confirmed_at {
            if let Some(record) = self.state.transactions.get_mut(tx_id) {
                if !record.confirmed {
                    record.confirmed = true;
                    record.height = *height;
                    log::debug!("transaction {} confirmed at height {}", tx_id, height);
                }
            }
        }
        Ok(())
    }

    /// Build a ledger record for a transaction first seen on the indexer
    ///
    /// The credited value is the sum of outputs paying wallet-owned
    /// scripts; the fee comes from the mempool entry when there is one.
    /// A transaction that pays the wallet nothing (a spend signed
    /// elsewhere, already reflected in the UTXO set) is skipped, as are
    /// undecodable bytes, rather than failing the sync round.
    fn ingest_transaction(
        &mut self,
        tx_id: &str,
        raw_hex: &str,
        confirmed_at: &BTreeMap<String, u32>,
        mempool_fees: &BTreeMap<String, u64>,
    ) {
        let tx: bitcoin::Transaction = match bitcoin::consensus::encode::deserialize_hex(raw_hex) {
            Ok(tx) => tx,
            Err(e) => {
                log::warn!("skipping undecodable transaction {}: {}", tx_id, e);
                return;
            }
        };

        let mut received: u64 = 0;
        for output in &tx.output {
            let hash = script_hash_of(&output.script_pubkey);
            if self.state.addresses.contains_key(&hash)
                || self.state.change_addresses.contains_key(&hash)
            {
                received += output.value.to_sat();
            }
        }
        if received == 0 {
            log::debug!("transaction {} pays the wallet nothing, not recorded", tx_id);
            return;
        }

        let height = confirmed_at.get(tx_id).copied().unwrap_or(0);
        let record = TxRecord {
            tx_id: tx_id.to_string(),
            value_sats: received as i64,
            fee_sats: mempool_fees.get(tx_id).copied().unwrap_or(0),
            confirmed: height > 0,
            height,
            timestamp: Utc::now().timestamp(),
            rbf: tx.input.iter().any(|input| input.sequence.is_rbf()),
            inputs: Vec::new(),
            outputs: Vec::new(),
            change_address: None,
        };
        self.state.transactions.insert(tx_id.to_string(), record);
        log::info!("ingested incoming transaction {} ({} sats)", tx_id, received);
    }

    /// Exclude a UTXO from coin selection
    pub fn blacklist_utxo(&mut self, outpoint_id: &str) -> Result<bool, EngineError> {
        let changed = self.state.blacklist_utxo(outpoint_id);
        if changed {
            self.persist()?;
            self.emit(StateUpdate::Balance {
                utxos: self.state.utxos.len(),
                balance_sats: self.state.balance_sats,
            });
        }
        Ok(changed)
    }

    /// Make a blacklisted UTXO selectable again
    pub fn unblacklist_utxo(&mut self, outpoint_id: &str) -> Result<bool, EngineError> {
        let changed = self.state.unblacklist_utxo(outpoint_id);
        if changed {
            self.persist()?;
            self.emit(StateUpdate::Balance {
                utxos: self.state.utxos.len(),
                balance_sats: self.state.balance_sats,
            });
        }
        Ok(changed)
    }

    // --- draft / send flow -------------------------------------------------

    /// Start a draft transaction, replacing any previous draft
    pub fn start_draft(
        &mut self,
        fee_rate: u64,
        fee_tier: FeeTier,
        selection: Option<&[String]>,
    ) -> Result<DraftTransaction, EngineError> {
        self.ensure_lookahead()?;
        let draft = builder::setup_draft(
            &self.state,
            self.config.network,
            fee_rate,
            fee_tier,
            selection,
        )?;
        self.state.draft = Some(draft.clone());
        self.persist()?;
        self.emit(StateUpdate::Draft(Some(draft.clone())));
        Ok(draft)
    }

    /// Current draft, if a send flow is active
    pub fn draft(&self) -> Option<&DraftTransaction> {
        self.state.draft.as_ref()
    }

    /// Abandon the current draft
    pub fn cancel_draft(&mut self) -> Result<(), EngineError> {
        self.state.draft = None;
        self.persist()?;
        self.emit(StateUpdate::Draft(None));
        Ok(())
    }

    fn with_draft<T>(
        &mut self,
        apply: impl FnOnce(&mut DraftTransaction, NetworkType) -> Result<T, SendError>,
    ) -> Result<T, EngineError> {
        let network = self.config.network;
        let draft = self.state.draft.as_mut().ok_or(EngineError::NoDraft)?;
        let result = apply(draft, network)?;
        let snapshot = draft.clone();
        self.persist()?;
        self.emit(StateUpdate::Draft(Some(snapshot)));
        Ok(result)
    }

    /// Add an output to the draft
    pub fn add_draft_output(&mut self, address: &str, value_sats: u64) -> Result<(), EngineError> {
        self.with_draft(|draft, network| builder::add_output(draft, network, address, value_sats))
    }

    /// Set the draft fee rate, returning the new total fee
    pub fn set_draft_fee_rate(&mut self, fee_rate: u64) -> Result<u64, EngineError> {
        self.with_draft(|draft, network| builder::set_fee_rate(draft, network, fee_rate))
    }

    /// Adjust the draft fee rate by a signed delta
    pub fn adjust_draft_fee_rate(&mut self, delta: i64) -> Result<u64, EngineError> {
        self.with_draft(|draft, network| builder::adjust_fee_rate(draft, network, delta))
    }

    /// Convert the draft into a send-max
    pub fn draft_send_max(&mut self) -> Result<(), EngineError> {
        self.with_draft(|draft, network| builder::send_max(draft, network))
    }

    /// Sign, broadcast and record the current draft
    ///
    /// Broadcast is never retried. On success the spent UTXOs leave the
    /// set immediately so the balance reflects the pending send, and the
    /// draft is cleared.
    pub fn send(&mut self) -> Result<TxRecord, EngineError> {
        let draft = self.state.draft.clone().ok_or(EngineError::NoDraft)?;
        let seed = self.seed()?;

        let built = builder::build(&draft, &self.state, &seed, self.config.network)?;
        let tx_id = builder::broadcast_transaction(&self.client, &built)?;

        let record = self.record_outgoing(&tx_id, &draft, built.fee_sats);
        self.state.draft = None;
        self.persist()?;

        self.emit(StateUpdate::Draft(None));
        self.emit(StateUpdate::Balance {
            utxos: self.state.utxos.len(),
            balance_sats: self.state.balance_sats,
        });
        self.emit(StateUpdate::Transactions {
            count: self.state.transactions.len(),
        });

        log::info!("broadcast {} ({} sats fee)", tx_id, record.fee_sats);
        Ok(record)
    }

    /// Record a broadcast transaction and drop its spent inputs
    fn record_outgoing(&mut self, tx_id: &str, draft: &DraftTransaction, fee_sats: u64) -> TxRecord {
        let record = TxRecord {
            tx_id: tx_id.to_string(),
            value_sats: -((draft.output_total() + fee_sats) as i64),
            fee_sats,
            confirmed: false,
            height: 0,
            timestamp: Utc::now().timestamp(),
            rbf: draft.rbf,
            inputs: draft.inputs.clone(),
            outputs: draft.outputs.clone(),
            change_address: draft.change_address.clone(),
        };
        self.state
            .transactions
            .insert(tx_id.to_string(), record.clone());

        let spent: Vec<String> = draft.inputs.iter().map(|u| u.outpoint_id()).collect();
        self.state.utxos.retain(|u| !spent.contains(&u.outpoint_id()));
        self.state.balance_sats =
            tracker::balance_of(&self.state.utxos, &self.state.blacklisted);

        // The change address becomes used the moment the tx exists.
        if let Some(change) = &draft.change_address {
            if let Some(addr) = self
                .state
                .change_addresses
                .values()
                .find(|a| &a.address == change)
            {
                self.state.change_address_index =
                    self.state.change_address_index.max(addr.index as i64);
            }
        }

        record
    }

    // --- boosting ----------------------------------------------------------

    /// Which boost kind applies to a transaction, if any
    pub fn can_boost(&self, tx_id: &str) -> Option<BoostKind> {
        self.state.transactions.get(tx_id).and_then(boost::can_boost)
    }

    /// Bump the fee of a pending transaction
    ///
    /// Replaceable sends are rebuilt from their recorded inputs/outputs at
    /// the higher rate (RBF); everything else gets a child transaction
    /// sweeping one of the pending outputs back to the wallet (CPFP).
    pub fn boost(&mut self, tx_id: &str, fee_rate: u64) -> Result<TxRecord, EngineError> {
        let parent = self
            .state
            .transactions
            .get(tx_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTransaction(tx_id.to_string()))?;

        let kind = boost::can_boost(&parent).ok_or_else(|| {
            EngineError::NotBoostable(tx_id.to_string(), "already confirmed".to_string())
        })?;

        let (record, fee_delta) = match kind {
            BoostKind::Rbf => self.boost_rbf(&parent, fee_rate)?,
            BoostKind::Cpfp => self.boost_cpfp(&parent, fee_rate)?,
        };

        boost::insert_boost_record(
            &mut self.state.boosted,
            BoostRecord {
                parent_transaction_ids: vec![tx_id.to_string()],
                child_transaction_id: record.tx_id.clone(),
                kind,
                fee_delta_sats: fee_delta,
            },
        )?;
        self.persist()?;

        self.emit(StateUpdate::Boosted {
            child_tx_id: record.tx_id.clone(),
        });
        self.emit(StateUpdate::Balance {
            utxos: self.state.utxos.len(),
            balance_sats: self.state.balance_sats,
        });

        log::info!(
            "boosted {} via {} child {} (+{} sats fee)",
            tx_id,
            kind,
            record.tx_id,
            fee_delta
        );
        Ok(record)
    }

    /// Rebuild the original transaction at a higher fee rate
    fn boost_rbf(
        &mut self,
        parent: &TxRecord,
        fee_rate: u64,
    ) -> Result<(TxRecord, u64), EngineError> {
        if parent.inputs.is_empty() || parent.outputs.is_empty() {
            return Err(EngineError::NotBoostable(
                parent.tx_id.clone(),
                "original inputs/outputs not recorded".to_string(),
            ));
        }

        let was_send_max = parent.change_address.is_none() && parent.outputs.len() == 1;
        let mut draft = DraftTransaction {
            inputs: parent.inputs.clone(),
            outputs: parent.outputs.clone(),
            change_address: parent.change_address.clone(),
            fee_rate,
            fee_sats: 0,
            rbf: true,
            fee_tier: FeeTier::Custom,
            max: was_send_max,
        };
        if was_send_max {
            builder::send_max(&mut draft, self.config.network)?;
        } else {
            builder::recompute_fee(&mut draft, self.config.network)?;
        }

        if draft.fee_sats <= parent.fee_sats {
            return Err(EngineError::Send(SendError::InvalidFeeRate(format!(
                "replacement fee {} sats does not exceed original fee {} sats",
                draft.fee_sats, parent.fee_sats
            ))));
        }

        let seed = self.seed()?;
        let built = builder::build(&draft, &self.state, &seed, self.config.network)?;
        let tx_id = builder::broadcast_transaction(&self.client, &built)?;

        let fee_delta = built.fee_sats - parent.fee_sats;
        let record = self.record_outgoing(&tx_id, &draft, built.fee_sats);
        Ok((record, fee_delta))
    }

    /// Attach a high-fee child sweeping a pending output back to the
    /// wallet
    fn boost_cpfp(
        &mut self,
        parent: &TxRecord,
        fee_rate: u64,
    ) -> Result<(TxRecord, u64), EngineError> {
        let anchor = self
            .state
            .spendable_utxos()
            .into_iter()
            .find(|u| u.tx_id == parent.tx_id)
            .ok_or_else(|| {
                EngineError::NotBoostable(
                    parent.tx_id.clone(),
                    "no wallet-owned output available to anchor a child".to_string(),
                )
            })?;

        self.ensure_lookahead()?;
        let sweep = self
            .state
            .change_address_at(self.state.next_change_index())
            .cloned()
            .ok_or(EngineError::Send(SendError::NoChangeAddress))?;

        let mut draft = DraftTransaction {
            inputs: vec![anchor],
            outputs: vec![OutputSpec {
                address: sweep.address.clone(),
                value_sats: 0,
            }],
            change_address: None,
            fee_rate,
            fee_sats: 0,
            rbf: true,
            fee_tier: FeeTier::Custom,
            max: true,
        };
        builder::send_max(&mut draft, self.config.network)?;

        let seed = self.seed()?;
        let built = builder::build(&draft, &self.state, &seed, self.config.network)?;
        let tx_id = builder::broadcast_transaction(&self.client, &built)?;

        let mut record = self.record_outgoing(&tx_id, &draft, built.fee_sats);
        // The sweep returns to the wallet, so only the fee leaves.
        record.value_sats = -(built.fee_sats as i64);
        self.state.transactions.insert(tx_id, record.clone());

        // The sweep output consumes a change address, not the draft's
        // change slot, so advance the high-water mark here.
        self.state.change_address_index =
            self.state.change_address_index.max(sweep.index as i64);
        self.ensure_lookahead()?;

        Ok((record.clone(), built.fee_sats))
    }

    // --- activity ----------------------------------------------------------

    /// Activity feed entries, newest first
    ///
    /// Only chain tips appear: a transaction superseded or anchored by a
    /// boost is folded into its tip's resolved value instead of showing
    /// twice.
    pub fn activity(&self) -> Vec<ActivityItem> {
        let superseded: std::collections::BTreeSet<&String> = self
            .state
            .boosted
            .values()
            .flat_map(|r| r.parent_transaction_ids.iter())
            .collect();

        let mut items: Vec<ActivityItem> = self
            .state
            .transactions
            .values()
            .filter(|t| !superseded.contains(&t.tx_id))
            .map(|tip| {
                let resolved =
                    boost::resolve_value(&tip.tx_id, &self.state.boosted, &self.state.transactions);
                ActivityItem {
                    id: tip.tx_id.clone(),
                    value_sats: resolved.value_sats,
                    fee_sats: resolved.chain_fee_sats,
                    confirmed: tip.confirmed,
                    timestamp: tip.timestamp,
                    boosted: resolved.boosted,
                }
            })
            .collect();

        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items
    }

    // --- network switching & subscriptions ---------------------------------

    /// Switch the engine to another network
    ///
    /// The current network's state is persisted first, then the target
    /// network's state is loaded (or freshly initialized). Discovery
    /// results still in flight for the old network can never land in the
    /// new state because all mutation is serialized through `&mut self`.
    pub fn switch_network(&mut self, network: NetworkType) -> Result<(), EngineError> {
        if network == self.config.network {
            return Ok(());
        }

        self.persist()?;
        self.config.network = network;

        self.state = match self.store.load(&self.wallet_id, network)? {
            Some(state) => state,
            None => WalletState::new(self.config.address_type),
        };
        self.ensure_lookahead()?;
        self.persist()?;

        self.emit(StateUpdate::Addresses {
            receive: self.state.addresses.len(),
            change: self.state.change_addresses.len(),
        });
        self.emit(StateUpdate::Balance {
            utxos: self.state.utxos.len(),
            balance_sats: self.state.balance_sats,
        });

        log::info!("switched wallet '{}' to {}", self.wallet_id, network);
        Ok(())
    }

    /// Subscribe to status changes for every known script hash
    ///
    /// The handler is a pure notification hook (typically scheduling a
    /// `sync`); cancel the returned handles to stop delivery.
    pub fn subscribe_addresses(
        &self,
        handler: impl Fn(&str) + Send + Clone + 'static,
    ) -> Result<Vec<Subscription>, EngineError> {
        let mut handles = Vec::new();
        for hash in self.state.all_script_hashes() {
            let handler = handler.clone();
            handles.push(
                self.client
                    .subscribe_script_hash(&hash, Box::new(move |h| handler(h)))?,
            );
        }
        Ok(handles)
    }

    /// Subscribe to new chain tips
    pub fn subscribe_headers(
        &self,
        handler: Box<dyn Fn(&crate::indexer::HeaderInfo) + Send>,
    ) -> Result<Subscription, EngineError> {
        Ok(self.client.subscribe_headers(handler)?)
    }

    /// Delete this wallet's state and secrets
    ///
    /// Destroys the mnemonic. Irreversible unless the user kept the
    /// backup phrase.
    pub fn wipe(mut self) -> Result<(), EngineError> {
        self.store.delete(&self.wallet_id)?;
        self.secrets.delete_secret(&mnemonic_key(&self.wallet_id))?;
        self.secrets.delete_secret(&passphrase_key(&self.wallet_id))?;
        log::warn!("wallet '{}' wiped", self.wallet_id);
        Ok(())
    }
}
