//! Fee computation and transaction building
//!
//! Assembles draft transactions from the tracked UTXO set, keeps the
//! draft's fee consistent with its estimated virtual size after every
//! mutation, enforces the half-balance fee rail, and signs the final
//! transaction for all three supported input types.
//!
//! Virtual size is estimated in integer weight units (1 vbyte = 4 WU)
//! so no floating point enters any amount calculation.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Witness,
};
use std::str::FromStr;

use crate::config::NetworkType;
use crate::indexer::{IndexerClient, IndexerError};
use crate::keys::{derive_keypair, DerivationPath, KeyError, Seed};
use crate::storage::models::{DraftTransaction, Utxo, WalletState};
use crate::types::{AddressType, FeeTier, OutputSpec};

/// Outputs below this value are rejected as dust
pub const DUST_THRESHOLD_SATS: u64 = 546;

/// Sequence signalling replaceability (BIP-125)
const SEQUENCE_RBF: u32 = 0xFFFF_FFFD;

/// Sequence for non-replaceable inputs (locktime still enforceable)
const SEQUENCE_NO_RBF: u32 = 0xFFFF_FFFE;

/// Fixed transaction weight: version, locktime and the two count varints
const TX_BASE_WEIGHT: u64 = 40;

/// Segwit marker + flag bytes (counted once, only for witness txs)
const SEGWIT_MARKER_WEIGHT: u64 = 2;

/// Errors from the send flow
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Insufficient funds: need {needed} sats, have {available} sats")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Fee too high: {fee} sats exceeds half the current balance of {balance} sats")]
    FeeTooHigh { fee: u64, balance: u64 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Dust output: {value} sats is below the {dust} sat threshold")]
    DustOutput { value: u64, dust: u64 },

    #[error("Transaction has no outputs")]
    NoOutputs,

    #[error("Invalid fee rate: {0}")]
    InvalidFeeRate(String),

    #[error("UTXO not found: {0}")]
    UtxoNotFound(String),

    #[error("Change address {0} is not owned by this wallet")]
    ChangeNotOwned(String),

    #[error("No change address available")]
    NoChangeAddress,

    #[error("Invalid draft: {0}")]
    InvalidDraft(String),

    #[error("Transaction build failed: {0}")]
    BuildFailed(String),

    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// A fully signed transaction ready for broadcast
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    /// Transaction id
    pub tx_id: String,

    /// Raw transaction, hex-encoded
    pub raw_hex: String,

    /// Actual fee paid in satoshis
    pub fee_sats: u64,

    /// Final virtual size in vbytes
    pub vsize: usize,

    /// Whether the inputs signal replaceability
    pub rbf: bool,
}

/// Input weight in weight units for an input type
///
/// Legacy inputs carry the signature in the script, segwit inputs in the
/// witness (discounted 4x).
fn input_weight(kind: AddressType) -> u64 {
    match kind {
        // 36 outpoint + 1 script len + ~107 scriptSig + 4 sequence, no witness
        AddressType::P2pkh => 592,
        // 36 + 1 + 23 redeem push + 4, plus 107 witness bytes
        AddressType::P2shP2wpkh => 363,
        // 36 + 1 + 0 + 4, plus 107 witness bytes
        AddressType::P2wpkh => 271,
    }
}

/// Input type of a UTXO, taken from its derivation path purpose
fn input_kind(utxo: &Utxo) -> Result<AddressType, SendError> {
    let path = DerivationPath::from_str(&utxo.path)?;
    Ok(path.address_type()?)
}

/// Parse and network-check a destination address
fn output_script(address: &str, network: NetworkType) -> Result<ScriptBuf, SendError> {
    let parsed = Address::from_str(address)
        .map_err(|e| SendError::InvalidAddress(format!("{}: {}", address, e)))?;
    let checked = parsed
        .require_network(network.to_bitcoin_network())
        .map_err(|_| {
            SendError::InvalidAddress(format!("{} is not valid on {}", address, network))
        })?;
    Ok(checked.script_pubkey())
}

/// Output weight in weight units for a script
fn output_weight(script: &ScriptBuf) -> u64 {
    // 8 value bytes + 1 script-length varint + script, all non-witness
    4 * (8 + 1 + script.len() as u64)
}

/// Estimated weight of the draft, change output included when present
fn estimate_weight(draft: &DraftTransaction, network: NetworkType) -> Result<u64, SendError> {
    let mut weight = TX_BASE_WEIGHT;

    let mut any_segwit = false;
    for input in &draft.inputs {
        let kind = input_kind(input)?;
        any_segwit |= kind.is_segwit();
        weight += input_weight(kind);
    }
    if any_segwit {
        weight += SEGWIT_MARKER_WEIGHT;
    }

    for output in &draft.outputs {
        weight += output_weight(&output_script(&output.address, network)?);
    }
    if let Some(change) = &draft.change_address {
        weight += output_weight(&output_script(change, network)?);
    }

    Ok(weight)
}

/// Estimated virtual size of the draft in vbytes
pub fn estimate_vsize(draft: &DraftTransaction, network: NetworkType) -> Result<u64, SendError> {
    Ok((estimate_weight(draft, network)? + 3) / 4)
}

/// Recompute the draft fee from its current shape
///
/// Maintains the invariant `fee == ceil(vsize) * fee_rate` and the hard
/// rail that the fee never exceeds half of the funds controlled by the
/// inputs. The rail is a rejection, never a silent clamp.
pub fn recompute_fee(draft: &mut DraftTransaction, network: NetworkType) -> Result<u64, SendError> {
    let fee = estimate_vsize(draft, network)? * draft.fee_rate;

    let balance = draft.input_total();
    if fee > balance / 2 {
        return Err(SendError::FeeTooHigh { fee, balance });
    }

    draft.fee_sats = fee;
    Ok(fee)
}

/// Start a draft transaction from the wallet's spendable UTXO set
///
/// All non-blacklisted UTXOs become candidate inputs unless the caller
/// passes a manual selection of outpoint ids. Change is directed to the
/// wallet's next unused change address.
pub fn setup_draft(
    state: &WalletState,
    network: NetworkType,
    fee_rate: u64,
    fee_tier: FeeTier,
    selection: Option<&[String]>,
) -> Result<DraftTransaction, SendError> {
    if fee_rate == 0 {
        return Err(SendError::InvalidFeeRate(
            "fee rate must be at least 1 sat/vB".to_string(),
        ));
    }

    let spendable = state.spendable_utxos();
    let inputs = match selection {
        Some(ids) => {
            let mut chosen = Vec::with_capacity(ids.len());
            for id in ids {
                let utxo = spendable
                    .iter()
                    .find(|u| &u.outpoint_id() == id)
                    .ok_or_else(|| SendError::UtxoNotFound(id.clone()))?;
                chosen.push(utxo.clone());
            }
            chosen
        }
        None => spendable,
    };

    if inputs.is_empty() {
        return Err(SendError::InsufficientFunds {
            needed: DUST_THRESHOLD_SATS,
            available: 0,
        });
    }

    let change_address = state
        .change_address_at(state.next_change_index())
        .map(|a| a.address.clone())
        .ok_or(SendError::NoChangeAddress)?;

    let mut draft = DraftTransaction {
        inputs,
        outputs: Vec::new(),
        change_address: Some(change_address),
        fee_rate,
        fee_sats: 0,
        rbf: true,
        fee_tier,
        max: false,
    };
    recompute_fee(&mut draft, network)?;

    Ok(draft)
}

/// Add an output to the draft and refresh the fee
pub fn add_output(
    draft: &mut DraftTransaction,
    network: NetworkType,
    address: &str,
    value_sats: u64,
) -> Result<(), SendError> {
    // Fail early on malformed or wrong-network addresses
    output_script(address, network)?;

    draft.outputs.push(OutputSpec {
        address: address.to_string(),
        value_sats,
    });
    recompute_fee(draft, network)?;
    Ok(())
}

/// Set the fee rate and refresh the fee
///
/// Returns the new total fee. Rejected with `FeeTooHigh` when the
/// resulting fee would exceed half the funds controlled by the inputs.
pub fn set_fee_rate(
    draft: &mut DraftTransaction,
    network: NetworkType,
    fee_rate: u64,
) -> Result<u64, SendError> {
    if fee_rate == 0 {
        return Err(SendError::InvalidFeeRate(
            "fee rate must be at least 1 sat/vB".to_string(),
        ));
    }

    let previous = draft.fee_rate;
    draft.fee_rate = fee_rate;
    match recompute_fee(draft, network) {
        Ok(fee) => {
            if draft.max {
                solve_send_max(draft, network)?;
            }
            Ok(fee)
        }
        Err(e) => {
            draft.fee_rate = previous;
            Err(e)
        }
    }
}

/// Adjust the fee rate by a signed delta
///
/// `adjust_fee_rate(draft, net, 1)` strictly increases the fee;
/// a negative delta may not push the rate below 1 sat/vB.
pub fn adjust_fee_rate(
    draft: &mut DraftTransaction,
    network: NetworkType,
    delta: i64,
) -> Result<u64, SendError> {
    let new_rate = draft.fee_rate as i64 + delta;
    if new_rate < 1 {
        return Err(SendError::InvalidFeeRate(format!(
            "fee rate cannot go below 1 sat/vB (requested {})",
            new_rate
        )));
    }
    let fee = set_fee_rate(draft, network, new_rate as u64)?;
    draft.fee_tier = FeeTier::Custom;
    Ok(fee)
}

fn solve_send_max(draft: &mut DraftTransaction, network: NetworkType) -> Result<(), SendError> {
    let input_total = draft.input_total();

    // The fee depends on the final shape; dropping change shrinks the
    // transaction, so iterate until the value stops moving.
    for _ in 0..4 {
        let fee = estimate_vsize(draft, network)? * draft.fee_rate;
        if fee > input_total / 2 {
            return Err(SendError::FeeTooHigh {
                fee,
                balance: input_total,
            });
        }
        let value = input_total.checked_sub(fee).ok_or(SendError::InsufficientFunds {
            needed: fee,
            available: input_total,
        })?;
        if value < DUST_THRESHOLD_SATS {
            return Err(SendError::InsufficientFunds {
                needed: fee + DUST_THRESHOLD_SATS,
                available: input_total,
            });
        }

        let previous = draft.outputs[0].value_sats;
        draft.outputs[0].value_sats = value;
        draft.fee_sats = fee;
        if previous == value {
            break;
        }
    }

    Ok(())
}

/// Turn the draft into a send-max: the single output consumes the entire
/// input total minus the fee, and no change output is produced
pub fn send_max(draft: &mut DraftTransaction, network: NetworkType) -> Result<(), SendError> {
    if draft.outputs.len() != 1 {
        return Err(SendError::InvalidDraft(format!(
            "send-max requires exactly one output, draft has {}",
            draft.outputs.len()
        )));
    }

    draft.change_address = None;
    draft.max = true;
    solve_send_max(draft, network)
}

/// Validate a draft before signing
///
/// Enforces: at least one output, no dust outputs, outputs plus fee
/// covered by the inputs, the half-balance fee rail, and wallet-owned
/// change.
pub fn validate(
    draft: &DraftTransaction,
    state: &WalletState,
    network: NetworkType,
) -> Result<(), SendError> {
    if draft.outputs.is_empty() {
        return Err(SendError::NoOutputs);
    }

    for output in &draft.outputs {
        output_script(&output.address, network)?;
        if output.value_sats < DUST_THRESHOLD_SATS {
            return Err(SendError::DustOutput {
                value: output.value_sats,
                dust: DUST_THRESHOLD_SATS,
            });
        }
    }

    let input_total = draft.input_total();
    let needed = draft
        .output_total()
        .checked_add(draft.fee_sats)
        .ok_or_else(|| SendError::InvalidDraft("output total overflows".to_string()))?;
    if needed > input_total {
        return Err(SendError::InsufficientFunds {
            needed,
            available: input_total,
        });
    }

    if draft.fee_sats > input_total / 2 {
        return Err(SendError::FeeTooHigh {
            fee: draft.fee_sats,
            balance: input_total,
        });
    }

    if let Some(change) = &draft.change_address {
        if !state.owns_address(change) {
            return Err(SendError::ChangeNotOwned(change.clone()));
        }
    }

    Ok(())
}

/// Sign the draft and produce the final transaction
///
/// Inputs are signed per type: legacy sighash for P2PKH, BIP-143 for
/// P2WPKH, and BIP-143 plus a redeem-script push for wrapped segwit.
/// Change below the dust threshold is absorbed into the fee rather than
/// producing an unspendable output.
pub fn build(
    draft: &DraftTransaction,
    state: &WalletState,
    seed: &Seed,
    network: NetworkType,
) -> Result<BuiltTransaction, SendError> {
    validate(draft, state, network)?;

    let sequence = Sequence::from_consensus(if draft.rbf {
        SEQUENCE_RBF
    } else {
        SEQUENCE_NO_RBF
    });

    let mut inputs = Vec::with_capacity(draft.inputs.len());
    for utxo in &draft.inputs {
        let txid = utxo
            .tx_id
            .parse::<bitcoin::Txid>()
            .map_err(|e| SendError::BuildFailed(format!("invalid input txid: {}", e)))?;
        inputs.push(TxIn {
            previous_output: OutPoint {
                txid,
                vout: utxo.tx_pos,
            },
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        });
    }

    let mut outputs = Vec::with_capacity(draft.outputs.len() + 1);
    for request in &draft.outputs {
        outputs.push(TxOut {
            value: Amount::from_sat(request.value_sats),
            script_pubkey: output_script(&request.address, network)?,
        });
    }

    let mut fee_sats = draft.fee_sats;
    if let Some(change) = &draft.change_address {
        let change_value = draft.input_total() - draft.output_total() - draft.fee_sats;
        if change_value >= DUST_THRESHOLD_SATS {
            outputs.push(TxOut {
                value: Amount::from_sat(change_value),
                script_pubkey: output_script(change, network)?,
            });
        } else if change_value > 0 {
            // Dust change folds into the fee
            fee_sats += change_value;
        }
    } else {
        fee_sats = draft.input_total() - draft.output_total();
    }

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: outputs,
    };

    sign_inputs(&mut tx, draft, seed, network)?;

    if draft.rbf {
        let signalling = tx
            .input
            .iter()
            .all(|i| i.sequence.to_consensus_u32() < SEQUENCE_NO_RBF);
        if !signalling {
            return Err(SendError::BuildFailed(
                "RBF requested but inputs do not signal replaceability".to_string(),
            ));
        }
    }

    let built = BuiltTransaction {
        tx_id: tx.compute_txid().to_string(),
        raw_hex: bitcoin::consensus::encode::serialize_hex(&tx),
        fee_sats,
        vsize: tx.vsize(),
        rbf: draft.rbf,
    };

    log::info!(
        "built transaction {}: {} inputs, {} outputs, {} sats fee, {} vB",
        built.tx_id,
        tx.input.len(),
        tx.output.len(),
        built.fee_sats,
        built.vsize
    );

    Ok(built)
}

fn sign_inputs(
    tx: &mut Transaction,
    draft: &DraftTransaction,
    seed: &Seed,
    network: NetworkType,
) -> Result<(), SendError> {
    let secp = Secp256k1::new();
    let unsigned = tx.clone();
    let mut cache = SighashCache::new(&unsigned);

    for (i, utxo) in draft.inputs.iter().enumerate() {
        let path = DerivationPath::from_str(&utxo.path)?;
        let kind = path.address_type()?;
        let (secret_key, public_key) = derive_keypair(seed, &path, network)?;
        let compressed = CompressedPublicKey(public_key);

        match kind {
            AddressType::P2pkh => {
                let script_pubkey = output_script(&utxo.address, network)?;
                let sighash = cache
                    .legacy_signature_hash(i, &script_pubkey, EcdsaSighashType::All.to_u32())
                    .map_err(|e| SendError::BuildFailed(format!("legacy sighash: {}", e)))?;
                let signature = sign_ecdsa(&secp, sighash.to_byte_array(), &secret_key);

                let sig_push = PushBytesBuf::try_from(signature.to_vec())
                    .map_err(|e| SendError::BuildFailed(format!("signature push: {}", e)))?;
                tx.input[i].script_sig = bitcoin::script::Builder::new()
                    .push_slice(sig_push)
                    .push_key(&bitcoin::PublicKey::new(public_key))
                    .into_script();
            }
            AddressType::P2wpkh => {
                let script_pubkey = output_script(&utxo.address, network)?;
                let sighash = cache
                    .p2wpkh_signature_hash(
                        i,
                        &script_pubkey,
                        Amount::from_sat(utxo.value_sats),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| SendError::BuildFailed(format!("segwit sighash: {}", e)))?;
                let signature = sign_ecdsa(&secp, sighash.to_byte_array(), &secret_key);

                tx.input[i].witness = Witness::p2wpkh(&signature, &public_key);
            }
            AddressType::P2shP2wpkh => {
                // Witness data commits to the inner p2wpkh script
                let redeem = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
                let sighash = cache
                    .p2wpkh_signature_hash(
                        i,
                        &redeem,
                        Amount::from_sat(utxo.value_sats),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| SendError::BuildFailed(format!("segwit sighash: {}", e)))?;
                let signature = sign_ecdsa(&secp, sighash.to_byte_array(), &secret_key);

                tx.input[i].witness = Witness::p2wpkh(&signature, &public_key);
                let redeem_push = PushBytesBuf::try_from(redeem.into_bytes())
                    .map_err(|e| SendError::BuildFailed(format!("redeem push: {}", e)))?;
                tx.input[i].script_sig = bitcoin::script::Builder::new()
                    .push_slice(redeem_push)
                    .into_script();
            }
        }
    }

    Ok(())
}

fn sign_ecdsa(
    secp: &Secp256k1<bitcoin::secp256k1::All>,
    digest: [u8; 32],
    secret_key: &bitcoin::secp256k1::SecretKey,
) -> bitcoin::ecdsa::Signature {
    let message = Message::from_digest(digest);
    bitcoin::ecdsa::Signature {
        signature: secp.sign_ecdsa(&message, secret_key),
        sighash_type: EcdsaSighashType::All,
    }
}

/// Broadcast a built transaction through the indexer
///
/// Replaceability signalling is re-checked on the final bytes before the
/// transaction leaves the engine. Broadcast is never retried: a resend
/// after an ambiguous failure could double-spend. Rejection messages are
/// propagated verbatim.
pub fn broadcast_transaction<C: IndexerClient + ?Sized>(
    client: &C,
    built: &BuiltTransaction,
) -> Result<String, SendError> {
    if built.rbf {
        let tx: Transaction = bitcoin::consensus::encode::deserialize_hex(&built.raw_hex)
            .map_err(|e| SendError::BuildFailed(format!("re-parse before broadcast: {}", e)))?;
        let signalling = tx
            .input
            .iter()
            .all(|i| i.sequence.to_consensus_u32() < SEQUENCE_NO_RBF);
        if !signalling {
            return Err(SendError::BuildFailed(
                "RBF requested but inputs do not signal replaceability".to_string(),
            ));
        }
    }

    match client.broadcast(&built.raw_hex) {
        Ok(txid) => Ok(txid),
        Err(IndexerError::BroadcastRejected(msg)) => Err(SendError::BroadcastRejected(msg)),
        Err(e) => Err(SendError::Network(e.to_string())),
    }
}
