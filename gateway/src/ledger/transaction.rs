//! Transactions and their construction.
//!
//! The [`TransactionBuilder`] produces an unsigned [`Transaction`] whose
//! `hash` is already fixed: it covers every field except the signature and
//! the embedded public key, so signing never changes it.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::address::Address;
use crate::config::TRANSACTION_VERSION;
use crate::crypto::{double_sha256, LedgerKeypair};

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A transfer of `amount` from `sender` to `recipient`.
///
/// `nonce` is the sender's sequence number (0 for its first transaction) and
/// `parent` is the hash of the sender's previous transaction, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// `hex(double_sha256(signable_bytes))`.
    pub hash: String,
    pub version: u16,
    pub sender: Address,
    pub recipient: Address,
    pub amount: u64,
    pub nonce: u64,
    pub parent: Option<String>,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub payload: Option<Vec<u8>>,
    /// Hex-encoded Ed25519 public key, set when signed.
    pub sender_public_key: Option<String>,
    /// Hex-encoded Ed25519 signature over [`Transaction::signable_bytes`].
    pub signature: Option<String>,
}

impl Transaction {
    /// Canonical bytes for hashing and signing.
    ///
    /// Fixed-width little-endian integers and length-prefixed optional
    /// fields. Excludes `hash`, `sender_public_key` and `signature`.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(160);

        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(self.recipient.as_bytes());
        buf.extend_from_slice(&self.amount.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());

        match &self.parent {
            Some(parent) => {
                buf.push(0x01);
                buf.extend_from_slice(parent.as_bytes());
                buf.push(0x00);
            }
            None => buf.push(0x00),
        }

        buf.extend_from_slice(&self.timestamp.to_le_bytes());

        match &self.payload {
            Some(payload) => {
                buf.push(0x01);
                buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                buf.extend_from_slice(payload);
            }
            None => buf.push(0x00),
        }

        buf
    }

    pub fn compute_hash(&self) -> String {
        hex::encode(double_sha256(&self.signable_bytes()))
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Signs in place and embeds the signer's public key. Re-signing
    /// overwrites the previous signature.
    pub fn sign(&mut self, keypair: &LedgerKeypair) {
        let signature = keypair.sign(&self.signable_bytes());
        self.signature = Some(signature.to_hex());
        self.sender_public_key = Some(keypair.public_key().to_hex());
    }
}

// ---------------------------------------------------------------------------
// TransactionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for unsigned transactions.
///
/// ```
/// use wallet_gateway::ledger::{Address, TransactionBuilder};
///
/// let tx = TransactionBuilder::new()
///     .sender(Address::from_bytes([1; 32]))
///     .recipient(Address::from_bytes([2; 32]))
///     .amount(5)
///     .nonce(0)
///     .build();
/// assert_eq!(tx.hash, tx.compute_hash());
/// assert!(!tx.is_signed());
/// ```
pub struct TransactionBuilder {
    version: u16,
    sender: Address,
    recipient: Address,
    amount: u64,
    nonce: u64,
    parent: Option<String>,
    timestamp: Option<u64>,
    payload: Option<Vec<u8>>,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self {
            version: TRANSACTION_VERSION,
            sender: Address::from_bytes([0; 32]),
            recipient: Address::from_bytes([0; 32]),
            amount: 0,
            nonce: 0,
            parent: None,
            timestamp: None,
            payload: None,
        }
    }

    pub fn sender(mut self, address: Address) -> Self {
        self.sender = address;
        self
    }

    pub fn recipient(mut self, address: Address) -> Self {
        self.recipient = address;
        self
    }

    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    /// Unix milliseconds. Defaults to the system clock at `build()`; callers
    /// submitting to a ledger stamp it with [`Ledger::timestamp_ms`](super::Ledger::timestamp_ms).
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn payload(mut self, payload: Option<Vec<u8>>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Transaction {
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis().max(0) as u64);

        let mut tx = Transaction {
            hash: String::new(),
            version: self.version,
            sender: self.sender,
            recipient: self.recipient,
            amount: self.amount,
            nonce: self.nonce,
            parent: self.parent,
            timestamp,
            payload: self.payload,
            sender_public_key: None,
            signature: None,
        };
        tx.hash = tx.compute_hash();
        tx
    }
}
