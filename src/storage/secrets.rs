//! Secure secret store
//!
//! Holds the mnemonic and optional passphrase, keyed by wallet id. The
//! engine only depends on the `SecretStore` trait; the file-backed
//! implementation encrypts every value with AES-256-GCM under a
//! PBKDF2-derived key before it touches disk.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// PBKDF2-HMAC-SHA256 iteration count (OWASP recommendation)
const PBKDF2_ITERATIONS: u32 = 600_000;

/// Secret store errors
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Secret store directory not found")]
    DirectoryNotFound,
}

/// Key-value interface for wallet secrets
pub trait SecretStore {
    /// Read a secret, returning `None` if absent
    fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>, SecretError>;

    /// Write a secret, replacing any previous value
    fn set_secret(&mut self, key: &str, value: &[u8]) -> Result<(), SecretError>;

    /// Remove a secret if present
    fn delete_secret(&mut self, key: &str) -> Result<(), SecretError>;
}

/// Plain in-memory secret store for tests and ephemeral wallets
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: BTreeMap<String, Vec<u8>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>, SecretError> {
        Ok(self.secrets.get(key).cloned())
    }

    fn set_secret(&mut self, key: &str, value: &[u8]) -> Result<(), SecretError> {
        self.secrets.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete_secret(&mut self, key: &str) -> Result<(), SecretError> {
        self.secrets.remove(key);
        Ok(())
    }
}

/// File-backed secret store with password-based encryption
///
/// Each secret is written to `<dir>/<key>.secret` as hex-encoded
/// `salt || nonce || ciphertext || tag`. Path separators in keys are
/// flattened so a key like `mnemonic/wallet0` stays a single file.
#[derive(Debug)]
pub struct EncryptedFileSecretStore {
    dir: PathBuf,
    password: String,
}

impl EncryptedFileSecretStore {
    /// Create a store rooted at the given directory
    pub fn new(dir: PathBuf, password: &str) -> Self {
        Self {
            dir,
            password: password.to_string(),
        }
    }

    /// Create a store rooted at the default location
    ///
    /// Returns: `~/.wallet-engine/secrets/`
    pub fn with_default_dir(password: &str) -> Result<Self, SecretError> {
        let home = dirs::home_dir().ok_or(SecretError::DirectoryNotFound)?;
        Ok(Self::new(
            home.join(".wallet-engine").join("secrets"),
            password,
        ))
    }

    fn secret_path(&self, key: &str) -> PathBuf {
        let flat = key.replace(['/', '\\'], "_");
        self.dir.join(format!("{}.secret", flat))
    }
}

impl SecretStore for EncryptedFileSecretStore {
    fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>, SecretError> {
        let path = self.secret_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let encrypted_hex = fs::read_to_string(&path)?;
        let plaintext = decrypt_data(encrypted_hex.trim(), &self.password)?;
        Ok(Some(plaintext))
    }

    fn set_secret(&mut self, key: &str, value: &[u8]) -> Result<(), SecretError> {
        fs::create_dir_all(&self.dir)?;
        let encrypted = encrypt_data(value, &self.password)?;
        fs::write(self.secret_path(key), encrypted)?;
        Ok(())
    }

    fn delete_secret(&mut self, key: &str) -> Result<(), SecretError> {
        let path = self.secret_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Encrypt data using AES-256-GCM with a password-derived key
///
/// - PBKDF2-HMAC-SHA256 with 600,000 iterations
/// - Random 128-bit salt, random 96-bit nonce per encryption
/// - Output: hex of `salt (16) || nonce (12) || ciphertext || tag (16)`
pub fn encrypt_data(data: &[u8], password: &str) -> Result<String, SecretError> {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);

    let mut key_bytes = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key_bytes);
    let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&key_bytes);

    let cipher = Aes256Gcm::new(key);

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|e| SecretError::Encryption(e.to_string()))?;

    let mut result = salt.to_vec();
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(hex::encode(result))
}

/// Decrypt data encrypted with [`encrypt_data`]
pub fn decrypt_data(encrypted_hex: &str, password: &str) -> Result<Vec<u8>, SecretError> {
    let encrypted_bytes =
        hex::decode(encrypted_hex).map_err(|e| SecretError::Decryption(e.to_string()))?;

    // Minimum size: salt (16) + nonce (12) + tag (16) = 44 bytes
    if encrypted_bytes.len() < 44 {
        return Err(SecretError::Decryption(
            "Data too short (minimum 44 bytes required)".to_string(),
        ));
    }

    let (salt, rest) = encrypted_bytes.split_at(16);
    let (nonce_bytes, ciphertext) = rest.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let mut key_bytes = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key_bytes);
    let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&key_bytes);

    let cipher = Aes256Gcm::new(key);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| SecretError::Decryption(format!("Decryption failed (wrong password?): {}", e)))
}
