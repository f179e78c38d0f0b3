//! In-memory wallet store
//!
//! Used by tests and by embedders that manage persistence themselves.

use std::collections::BTreeMap;

use crate::config::NetworkType;
use crate::storage::models::WalletState;
use crate::storage::{StoreError, WalletStore};

/// Wallet store backed by a plain map
#[derive(Debug, Default)]
pub struct MemoryWalletStore {
    states: BTreeMap<(String, NetworkType), WalletState>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored (wallet, network) snapshots
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl WalletStore for MemoryWalletStore {
    fn load(
        &self,
        wallet_id: &str,
        network: NetworkType,
    ) -> Result<Option<WalletState>, StoreError> {
        Ok(self
            .states
            .get(&(wallet_id.to_string(), network))
            .cloned())
    }

    fn save(
        &mut self,
        wallet_id: &str,
        network: NetworkType,
        state: &WalletState,
    ) -> Result<(), StoreError> {
        self.states
            .insert((wallet_id.to_string(), network), state.clone());
        Ok(())
    }

    fn delete(&mut self, wallet_id: &str) -> Result<(), StoreError> {
        self.states.retain(|(id, _), _| id != wallet_id);
        Ok(())
    }
}
