//! Key derivation engine
//!
//! Turns a BIP-39 seed plus a derivation path into addresses, public keys
//! and script hashes for the supported address types. Everything in this
//! module is pure and deterministic: for a fixed (seed, path, network) the
//! derived address is always the same, and no network access ever happens
//! here.

use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address, CompressedPublicKey, PrivateKey, PublicKey, ScriptBuf};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::NetworkType;
use crate::types::AddressType;

/// 64-byte BIP-39 seed
pub type Seed = [u8; 64];

/// Key derivation errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("BIP32 derivation error: {0}")]
    Bip32(String),

    #[error("Unsupported address type for purpose {0}")]
    UnsupportedAddressType(u32),

    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),
}

/// Five-segment BIP-43 derivation path
///
/// Rendered as `m/purpose'/coin_type'/account'/change/index`. The first
/// three segments are hardened, the last two are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationPath {
    pub purpose: u32,
    pub coin_type: u32,
    pub account: u32,
    pub change: u32,
    pub address_index: u32,
}

impl DerivationPath {
    /// Build a path for the given address type, network and branch
    ///
    /// `change` must be 0 (receive) or 1 (change); the coin type is
    /// derived from the network (0 mainnet, 1 test nets).
    pub fn new(
        address_type: AddressType,
        network: NetworkType,
        account: u32,
        change: u32,
        address_index: u32,
    ) -> Result<Self, KeyError> {
        if change > 1 {
            return Err(KeyError::InvalidPath(format!(
                "change segment must be 0 or 1, got {}",
                change
            )));
        }

        Ok(Self {
            purpose: address_type.purpose(),
            coin_type: network.coin_type(),
            account,
            change,
            address_index,
        })
    }

    /// Receive-branch path at the given index (account 0)
    pub fn receive(
        address_type: AddressType,
        network: NetworkType,
        address_index: u32,
    ) -> Self {
        Self {
            purpose: address_type.purpose(),
            coin_type: network.coin_type(),
            account: 0,
            change: 0,
            address_index,
        }
    }

    /// Change-branch path at the given index (account 0)
    pub fn change(
        address_type: AddressType,
        network: NetworkType,
        address_index: u32,
    ) -> Self {
        Self {
            purpose: address_type.purpose(),
            coin_type: network.coin_type(),
            account: 0,
            change: 1,
            address_index,
        }
    }

    /// Same path with a different address index
    pub fn at_index(mut self, address_index: u32) -> Self {
        self.address_index = address_index;
        self
    }

    /// Whether this path is on the change branch
    pub fn is_change(&self) -> bool {
        self.change == 1
    }

    /// Address type implied by the purpose segment
    pub fn address_type(&self) -> Result<AddressType, KeyError> {
        AddressType::from_purpose(self.purpose)
            .ok_or(KeyError::UnsupportedAddressType(self.purpose))
    }

    /// Convert to a `bitcoin` crate BIP-32 path
    fn to_bip32(self) -> Result<bitcoin::bip32::DerivationPath, KeyError> {
        let segments = vec![
            ChildNumber::from_hardened_idx(self.purpose)
                .map_err(|e| KeyError::InvalidPath(e.to_string()))?,
            ChildNumber::from_hardened_idx(self.coin_type)
                .map_err(|e| KeyError::InvalidPath(e.to_string()))?,
            ChildNumber::from_hardened_idx(self.account)
                .map_err(|e| KeyError::InvalidPath(e.to_string()))?,
            ChildNumber::from_normal_idx(self.change)
                .map_err(|e| KeyError::InvalidPath(e.to_string()))?,
            ChildNumber::from_normal_idx(self.address_index)
                .map_err(|e| KeyError::InvalidPath(e.to_string()))?,
        ];
        Ok(bitcoin::bip32::DerivationPath::from(segments))
    }
}

impl std::fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "m/{}'/{}'/{}'/{}/{}",
            self.purpose, self.coin_type, self.account, self.change, self.address_index
        )
    }
}

impl std::str::FromStr for DerivationPath {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("m/")
            .ok_or_else(|| KeyError::InvalidPath(format!("path must start with 'm/': {}", s)))?;

        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() != 5 {
            return Err(KeyError::InvalidPath(format!(
                "expected 5 segments, got {} in '{}'",
                segments.len(),
                s
            )));
        }

        let hardened = |seg: &str| -> Result<u32, KeyError> {
            seg.strip_suffix('\'')
                .or_else(|| seg.strip_suffix('h'))
                .ok_or_else(|| KeyError::InvalidPath(format!("segment '{}' must be hardened", seg)))?
                .parse()
                .map_err(|_| KeyError::InvalidPath(format!("invalid segment '{}'", seg)))
        };
        let normal = |seg: &str| -> Result<u32, KeyError> {
            seg.parse()
                .map_err(|_| KeyError::InvalidPath(format!("invalid segment '{}'", seg)))
        };

        let change = normal(segments[3])?;
        if change > 1 {
            return Err(KeyError::InvalidPath(format!(
                "change segment must be 0 or 1, got {}",
                change
            )));
        }

        Ok(Self {
            purpose: hardened(segments[0])?,
            coin_type: hardened(segments[1])?,
            account: hardened(segments[2])?,
            change,
            address_index: normal(segments[4])?,
        })
    }
}

/// A derived wallet address
///
/// Immutable once generated; keyed by `script_hash` inside the wallet
/// store. Regenerating from the same seed always reproduces the same
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddress {
    /// Address index within its branch
    pub index: u32,

    /// Canonical derivation path string
    pub path: String,

    /// Address string for the configured network
    pub address: String,

    /// Indexer subscription/query key: SHA-256 of the output script,
    /// reversed to big-endian hex (Electrum convention)
    pub script_hash: String,

    /// Compressed public key, hex-encoded
    pub public_key: String,
}

/// Generate a new BIP-39 mnemonic (12 words, 128 bits of entropy)
pub fn generate_mnemonic() -> Result<bip39::Mnemonic, KeyError> {
    let mut entropy = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut entropy);

    bip39::Mnemonic::from_entropy(&entropy).map_err(|e| KeyError::InvalidSeed(e.to_string()))
}

/// Validate a mnemonic phrase and derive the 64-byte seed
///
/// The phrase must pass the BIP-39 checksum; anything else is rejected
/// with `InvalidSeed` before any derivation happens.
pub fn seed_from_mnemonic(phrase: &str, passphrase: &str) -> Result<Seed, KeyError> {
    let mnemonic =
        bip39::Mnemonic::parse(phrase).map_err(|e| KeyError::InvalidSeed(e.to_string()))?;
    Ok(mnemonic.to_seed(passphrase))
}

/// Compute the indexer script hash for an output script
///
/// SHA-256 of the raw script bytes, reversed, hex-encoded. This must match
/// the indexer's hashing convention exactly or every query returns empty.
pub fn script_hash_of(script: &ScriptBuf) -> String {
    let digest = Sha256::digest(script.as_bytes());
    let mut bytes = digest.to_vec();
    bytes.reverse();
    hex::encode(bytes)
}

/// Derive the address for a path
///
/// The address type is taken from the path's purpose segment
/// (44'/49'/84'). Pure function of `(seed, path, network)`.
pub fn derive_address(
    seed: &Seed,
    path: &DerivationPath,
    network: NetworkType,
) -> Result<WalletAddress, KeyError> {
    let address_type = path.address_type()?;
    let btc_network = network.to_bitcoin_network();

    let secp = Secp256k1::new();
    let master = Xpriv::new_master(btc_network, seed)
        .map_err(|e| KeyError::Bip32(format!("Failed to create master key: {}", e)))?;
    let child = master
        .derive_priv(&secp, &path.to_bip32()?)
        .map_err(|e| KeyError::Bip32(format!("Derivation failed: {}", e)))?;

    let secp_pubkey = child.private_key.public_key(&secp);
    let compressed = CompressedPublicKey(secp_pubkey);

    let address = match address_type {
        AddressType::P2pkh => {
            let pubkey = PublicKey::new(secp_pubkey);
            Address::p2pkh(&pubkey, btc_network)
        }
        AddressType::P2shP2wpkh => Address::p2shwpkh(&compressed, btc_network),
        AddressType::P2wpkh => Address::p2wpkh(&compressed, btc_network),
    };

    let script = address.script_pubkey();

    Ok(WalletAddress {
        index: path.address_index,
        path: path.to_string(),
        address: address.to_string(),
        script_hash: script_hash_of(&script),
        public_key: hex::encode(secp_pubkey.serialize()),
    })
}

/// Derive the private key for a path as a WIF string
pub fn derive_private_key(
    seed: &Seed,
    path: &DerivationPath,
    network: NetworkType,
) -> Result<String, KeyError> {
    let btc_network = network.to_bitcoin_network();

    let secp = Secp256k1::new();
    let master = Xpriv::new_master(btc_network, seed)
        .map_err(|e| KeyError::Bip32(format!("Failed to create master key: {}", e)))?;
    let child = master
        .derive_priv(&secp, &path.to_bip32()?)
        .map_err(|e| KeyError::Bip32(format!("Derivation failed: {}", e)))?;

    Ok(PrivateKey::new(child.private_key, btc_network).to_wif())
}

/// Derive the secp256k1 keypair for a path (used when signing inputs)
pub fn derive_keypair(
    seed: &Seed,
    path: &DerivationPath,
    network: NetworkType,
) -> Result<(bitcoin::secp256k1::SecretKey, bitcoin::secp256k1::PublicKey), KeyError> {
    let secp = Secp256k1::new();
    let master = Xpriv::new_master(network.to_bitcoin_network(), seed)
        .map_err(|e| KeyError::Bip32(format!("Failed to create master key: {}", e)))?;
    let child = master
        .derive_priv(&secp, &path.to_bip32()?)
        .map_err(|e| KeyError::Bip32(format!("Derivation failed: {}", e)))?;

    let public = child.private_key.public_key(&secp);
    Ok((child.private_key, public))
}
