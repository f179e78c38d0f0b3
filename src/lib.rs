//! Self-custodial Bitcoin wallet engine
//!
//! A library crate implementing the on-chain core of an HD wallet:
//!
//! - **Key derivation** ([`keys`]): BIP-39 mnemonic handling and
//!   BIP-44/49/84 address derivation for legacy, wrapped-segwit and
//!   native-segwit address types.
//! - **Address discovery** ([`scanner`]): gap-limit scanning against a
//!   batched script-hash indexer, maintaining look-ahead windows on both
//!   the receive and change branches.
//! - **UTXO & balance tracking** ([`tracker`]): unspent-output refresh
//!   and integer-satoshi balance aggregation with UTXO blacklisting.
//! - **Fee & transaction building** ([`builder`]): draft assembly,
//!   weight-based fee estimation, fee-rate adjustment with a hard
//!   half-balance rail, send-max, RBF signalling and signing.
//! - **Boost resolution** ([`boost`]): RBF/CPFP fee-bump bookkeeping and
//!   chain value reconciliation for activity display.
//! - **Orchestration** ([`engine`]): a single [`engine::WalletEngine`]
//!   handle tying the subsystems to a pluggable indexer client, wallet
//!   store and secret store.
//!
//! The engine never talks to a specific indexer implementation; callers
//! provide anything implementing [`indexer::IndexerClient`]. Persistence
//! goes through [`storage::WalletStore`] and secrets through
//! [`storage::secrets::SecretStore`], so the whole engine runs against
//! in-memory fakes in tests.
//!
//! All amounts are integer satoshis end to end; no floating point ever
//! enters a balance or fee calculation.

pub mod boost;
pub mod builder;
pub mod config;
pub mod engine;
pub mod indexer;
pub mod keys;
pub mod scanner;
pub mod storage;
pub mod tracker;
pub mod types;

pub use builder::{BuiltTransaction, SendError, DUST_THRESHOLD_SATS};
pub use config::{EngineConfig, NetworkType};
pub use engine::{EngineError, StateUpdate, WalletEngine};
pub use indexer::{IndexerClient, IndexerError, RetryPolicy, Subscription};
pub use keys::{DerivationPath, KeyError, Seed, WalletAddress};
pub use storage::models::{BoostRecord, DraftTransaction, TxRecord, Utxo, WalletState};
pub use storage::secrets::SecretStore;
pub use storage::{WalletStore, StoreError};
pub use types::{ActivityItem, AddressType, BoostKind, FeeTier, OutputSpec, SyncStatus};
