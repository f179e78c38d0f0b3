//! File system wallet store
//!
//! Persists one JSON document per (wallet, network) under a base
//! directory:
//!
//! `<base>/wallets/<wallet_id>/<network>.json`
//!
//! Snapshots round-trip through the forward-compatible models in
//! [`crate::storage::models`], so restoring a backup written by a newer
//! version only drops fields this version does not know about.

use std::fs;
use std::path::PathBuf;

use crate::config::NetworkType;
use crate::storage::models::WalletState;
use crate::storage::{StoreError, WalletStore};

/// Wallet store writing JSON snapshots to disk
#[derive(Debug)]
pub struct FileWalletStore {
    base_dir: PathBuf,
}

impl FileWalletStore {
    /// Create a store rooted at the given directory
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Create a store rooted at the default location
    ///
    /// Returns: `~/.wallet-engine/wallets/`
    pub fn with_default_dir() -> Result<Self, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::DirectoryNotFound)?;
        Ok(Self::new(home.join(".wallet-engine").join("wallets")))
    }

    fn wallet_dir(&self, wallet_id: &str) -> PathBuf {
        self.base_dir.join(wallet_id)
    }

    fn state_path(&self, wallet_id: &str, network: NetworkType) -> PathBuf {
        self.wallet_dir(wallet_id).join(format!("{}.json", network))
    }
}

impl WalletStore for FileWalletStore {
    fn load(
        &self,
        wallet_id: &str,
        network: NetworkType,
    ) -> Result<Option<WalletState>, StoreError> {
        let path = self.state_path(wallet_id, network);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        let state = serde_json::from_str(&contents)?;
        Ok(Some(state))
    }

    fn save(
        &mut self,
        wallet_id: &str,
        network: NetworkType,
        state: &WalletState,
    ) -> Result<(), StoreError> {
        let dir = self.wallet_dir(wallet_id);
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(state)?;
        fs::write(self.state_path(wallet_id, network), json)?;
        Ok(())
    }

    fn delete(&mut self, wallet_id: &str) -> Result<(), StoreError> {
        let dir = self.wallet_dir(wallet_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}
