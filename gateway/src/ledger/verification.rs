//! Transaction verification.
//!
//! Two layers. [`verify_transaction`] checks a transaction on its own:
//! shape, hash integrity, signature, and that the embedded key owns the
//! sender address. [`verify_against_chain`] then checks it against ledger
//! state: nonce, parent linkage and balance. Within each layer the checks
//! run cheapest first.

use thiserror::Error;

use super::address::Address;
use super::chain::Chain;
use super::transaction::Transaction;
use crate::config::MAX_FUTURE_SKEW_MS;
use crate::crypto::{LedgerPublicKey, LedgerSignature};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("amount must be > 0")]
    ZeroAmount,

    #[error("sender and recipient must differ: both are {address}")]
    SelfTransfer { address: Address },

    #[error("timestamp {timestamp_ms} is more than {max_ms}ms in the future")]
    TimestampTooFarInFuture { timestamp_ms: u64, max_ms: u64 },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("transaction is unsigned")]
    MissingSignature,

    #[error("malformed signature")]
    MalformedSignature,

    #[error("sender public key missing or malformed")]
    MalformedPublicKey,

    #[error("public key does not own sender address {sender}")]
    SenderKeyMismatch { sender: Address },

    #[error("signature does not verify for sender {sender}")]
    InvalidSignature { sender: Address },

    #[error("nonce out of order: expected {expected}, got {actual}")]
    NonceOutOfOrder { expected: u64, actual: u64 },

    #[error("parent mismatch: expected {expected:?}, got {actual:?}")]
    ParentMismatch {
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: u64, required: u64 },
}

/// Stateless checks. `now_ms` is the verifier's current time, used to bound
/// how far in the future a transaction may be stamped.
pub fn verify_transaction(tx: &Transaction, now_ms: u64) -> Result<(), ValidationError> {
    if tx.amount == 0 {
        return Err(ValidationError::ZeroAmount);
    }

    if tx.sender == tx.recipient {
        return Err(ValidationError::SelfTransfer { address: tx.sender });
    }

    if tx.timestamp > now_ms.saturating_add(MAX_FUTURE_SKEW_MS) {
        return Err(ValidationError::TimestampTooFarInFuture {
            timestamp_ms: tx.timestamp,
            max_ms: MAX_FUTURE_SKEW_MS,
        });
    }

    let expected = tx.compute_hash();
    if tx.hash != expected {
        return Err(ValidationError::HashMismatch {
            expected,
            actual: tx.hash.clone(),
        });
    }

    let signature = tx
        .signature
        .as_deref()
        .ok_or(ValidationError::MissingSignature)?;
    let signature =
        LedgerSignature::from_hex(signature).map_err(|_| ValidationError::MalformedSignature)?;

    let public_key = tx
        .sender_public_key
        .as_deref()
        .ok_or(ValidationError::MalformedPublicKey)?;
    let public_key =
        LedgerPublicKey::from_hex(public_key).map_err(|_| ValidationError::MalformedPublicKey)?;

    // Without this a valid signature from any key would pass.
    if Address::from_public_key(&public_key) != tx.sender {
        return Err(ValidationError::SenderKeyMismatch { sender: tx.sender });
    }

    if !public_key.verify(&tx.signable_bytes(), &signature) {
        return Err(ValidationError::InvalidSignature { sender: tx.sender });
    }

    Ok(())
}

/// Stateful checks against the sender's current chain and spendable
/// balance.
pub fn verify_against_chain(
    tx: &Transaction,
    chain: &Chain,
    balance: u64,
) -> Result<(), ValidationError> {
    let expected_nonce = chain.next_nonce();
    if tx.nonce != expected_nonce {
        return Err(ValidationError::NonceOutOfOrder {
            expected: expected_nonce,
            actual: tx.nonce,
        });
    }

    let expected_parent = chain.tail_hash();
    if tx.parent != expected_parent {
        return Err(ValidationError::ParentMismatch {
            expected: expected_parent,
            actual: tx.parent.clone(),
        });
    }

    if tx.amount > balance {
        return Err(ValidationError::InsufficientBalance {
            balance,
            required: tx.amount,
        });
    }

    Ok(())
}
