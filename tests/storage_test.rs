//! Wallet store, secret store and forward-compatibility tests

mod common;

use common::test_address;
use wallet_engine::storage::models::{Utxo, WalletState};
use wallet_engine::storage::secrets::{
    decrypt_data, encrypt_data, EncryptedFileSecretStore, MemorySecretStore, SecretError,
    SecretStore,
};
use wallet_engine::storage::{FileWalletStore, MemoryWalletStore, WalletStore};
use wallet_engine::{AddressType, NetworkType};

fn sample_state() -> WalletState {
    let receive = test_address(NetworkType::Regtest, AddressType::P2wpkh, false, 0);
    let mut state = WalletState::new(AddressType::P2wpkh);
    state.address_index = 0;
    state.utxos.push(Utxo {
        tx_id: "ab".repeat(32),
        tx_pos: 0,
        address: receive.address.clone(),
        script_hash: receive.script_hash.clone(),
        path: receive.path.clone(),
        value_sats: 123_456,
        confirmation_height: 42,
    });
    state.balance_sats = 123_456;
    state.addresses.insert(receive.script_hash.clone(), receive);
    state
}

fn assert_states_match(a: &WalletState, b: &WalletState) {
    assert_eq!(a.addresses, b.addresses);
    assert_eq!(a.address_index, b.address_index);
    assert_eq!(a.utxos, b.utxos);
    assert_eq!(a.balance_sats, b.balance_sats);
    assert_eq!(a.transactions, b.transactions);
}

#[test]
fn test_memory_store_round_trips_per_wallet_and_network() {
    let mut store = MemoryWalletStore::new();
    let state = sample_state();

    store
        .save("w0", NetworkType::Regtest, &state)
        .expect("save should succeed");

    let loaded = store
        .load("w0", NetworkType::Regtest)
        .expect("load should succeed")
        .expect("state should exist");
    assert_states_match(&state, &loaded);

    assert!(
        store
            .load("w0", NetworkType::Mainnet)
            .expect("load should succeed")
            .is_none(),
        "state is scoped per network"
    );
    assert!(store.load("other", NetworkType::Regtest).expect("load").is_none());

    store.delete("w0").expect("delete should succeed");
    assert!(store.load("w0", NetworkType::Regtest).expect("load").is_none());
}

#[test]
fn test_file_store_round_trips_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = FileWalletStore::new(dir.path().to_path_buf());
    let state = sample_state();

    store
        .save("w0", NetworkType::Signet, &state)
        .expect("save should succeed");
    assert!(
        dir.path().join("w0").join("signet.json").exists(),
        "one JSON document per (wallet, network)"
    );

    let loaded = store
        .load("w0", NetworkType::Signet)
        .expect("load should succeed")
        .expect("state should exist");
    assert_states_match(&state, &loaded);

    store.delete("w0").expect("delete should succeed");
    assert!(!dir.path().join("w0").exists());
}

#[test]
fn test_unknown_fields_are_ignored_on_load() {
    // A snapshot written by a newer version with extra fields.
    let json = r#"{
        "address_type": "p2wpkh",
        "balance_sats": 5000,
        "some_future_field": {"nested": true},
        "another_new_list": [1, 2, 3]
    }"#;

    let state: WalletState =
        serde_json::from_str(json).expect("unknown fields must not break restore");
    assert_eq!(state.balance_sats, 5000);
    assert_eq!(state.address_index, -1, "missing index defaults to none-used");
    assert!(state.addresses.is_empty());
    assert!(state.draft.is_none());
}

#[test]
fn test_secret_encryption_round_trip() {
    let plaintext = b"abandon abandon about";
    let encrypted = encrypt_data(plaintext, "correct horse").expect("encrypt");

    let decrypted = decrypt_data(&encrypted, "correct horse").expect("decrypt");
    assert_eq!(decrypted, plaintext);

    // Fresh salt and nonce per encryption.
    let again = encrypt_data(plaintext, "correct horse").expect("encrypt");
    assert_ne!(encrypted, again, "ciphertexts must not repeat");
}

#[test]
fn test_wrong_password_fails_decryption() {
    let encrypted = encrypt_data(b"secret", "right").expect("encrypt");
    let result = decrypt_data(&encrypted, "wrong");
    match result {
        Err(SecretError::Decryption(message)) => {
            assert!(message.contains("wrong password"), "got '{}'", message);
        }
        other => panic!("expected Decryption error, got {:?}", other),
    }
}

#[test]
fn test_truncated_ciphertext_is_rejected() {
    assert!(matches!(
        decrypt_data("deadbeef", "pw"),
        Err(SecretError::Decryption(_))
    ));
}

#[test]
fn test_encrypted_file_secret_store_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = EncryptedFileSecretStore::new(dir.path().to_path_buf(), "pw");

    assert!(store.get_secret("mnemonic/w0").expect("get").is_none());

    store
        .set_secret("mnemonic/w0", b"some words")
        .expect("set should succeed");
    let loaded = store
        .get_secret("mnemonic/w0")
        .expect("get should succeed")
        .expect("secret should exist");
    assert_eq!(loaded, b"some words");

    // Nothing readable on disk without the password.
    let file = dir.path().join("mnemonic_w0.secret");
    let raw = std::fs::read_to_string(&file).expect("secret file exists");
    assert!(!raw.contains("some words"), "plaintext must never touch disk");

    let wrong = EncryptedFileSecretStore::new(dir.path().to_path_buf(), "other");
    assert!(wrong.get_secret("mnemonic/w0").is_err());

    store.delete_secret("mnemonic/w0").expect("delete");
    assert!(!file.exists());
}

#[test]
fn test_memory_secret_store_round_trip() {
    let mut store = MemorySecretStore::new();
    store.set_secret("k", b"v").expect("set");
    assert_eq!(store.get_secret("k").expect("get"), Some(b"v".to_vec()));
    store.delete_secret("k").expect("delete");
    assert_eq!(store.get_secret("k").expect("get"), None);
}
