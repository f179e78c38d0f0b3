//! Wallet store and secret store
//!
//! The engine depends on the `WalletStore` and `SecretStore` interfaces,
//! never on a concrete backend, so embedders can swap persistence without
//! touching the engine.

pub mod file_system;
pub mod memory;
pub mod models;
pub mod secrets;

pub use file_system::FileWalletStore;
pub use memory::MemoryWalletStore;
pub use models::{BoostRecord, DraftTransaction, TxRecord, Utxo, WalletState};
pub use secrets::{EncryptedFileSecretStore, MemorySecretStore, SecretError, SecretStore};

use crate::config::NetworkType;

/// Wallet store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store directory not found")]
    DirectoryNotFound,
}

/// Persistence interface for per-(wallet, network) state
///
/// Implementations only store and retrieve opaque snapshots; all
/// invariants live in the engine and the models.
pub trait WalletStore {
    /// Load the state for a wallet on a network, if any was saved
    fn load(
        &self,
        wallet_id: &str,
        network: NetworkType,
    ) -> Result<Option<WalletState>, StoreError>;

    /// Persist the state for a wallet on a network
    fn save(
        &mut self,
        wallet_id: &str,
        network: NetworkType,
        state: &WalletState,
    ) -> Result<(), StoreError>;

    /// Remove all persisted state for a wallet (wallet wipe)
    fn delete(&mut self, wallet_id: &str) -> Result<(), StoreError>;
}
