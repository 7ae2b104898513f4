//! # Ledger Boundary
//!
//! Everything the gateway needs from the ledger it fronts, expressed as the
//! [`Ledger`] trait: fresh custodied addresses, per-address chains, key
//! material, signing, validation, persistence and publication, plus the
//! read paths for balances and history.
//!
//! [`LocalLedger`] implements the trait on sled. A deployment that talks to
//! a remote node implements the same trait and slots in without touching
//! the account store, faucet or orchestrator.
//!
//! ## Types
//!
//! - [`Address`] — BLAKE3 of an Ed25519 public key.
//! - [`Transaction`] / [`TransactionBuilder`] — a signed transfer.
//! - [`Chain`] — an address's outgoing transactions, oldest first.

pub mod address;
pub mod chain;
pub mod local;
pub mod transaction;
pub mod verification;

pub use address::{Address, AddressError};
pub use chain::Chain;
pub use local::LocalLedger;
pub use transaction::{Transaction, TransactionBuilder};
pub use verification::{verify_against_chain, verify_transaction, ValidationError};

use thiserror::Error;

use crate::crypto::{KeyError, LedgerKeypair, LedgerPublicKey};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no key material held for {address}")]
    UnknownKey { address: Address },

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("transaction rejected: {0}")]
    Invalid(#[from] ValidationError),

    #[error("failed to persist transaction {hash}: {reason}")]
    Persistence { hash: String, reason: String },

    #[error("failed to publish transaction {hash}: {reason}")]
    Publication { hash: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// A newly minted custodied address. The secret stays in the ledger's
/// keystore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub address: Address,
    pub public_key: LedgerPublicKey,
}

// ---------------------------------------------------------------------------
// Ledger Trait
// ---------------------------------------------------------------------------

/// Operations the gateway consumes from the ledger. Implementations must be
/// safe to share across threads.
pub trait Ledger: Send + Sync {
    /// Generates a keypair, stores it, and returns its address.
    fn derive_new_address(&self) -> LedgerResult<DerivedAddress>;

    /// `None` when the ledger has never seen a transaction from `address`.
    fn read_chain(&self, address: &Address) -> LedgerResult<Option<Chain>>;

    fn key_material(&self, address: &Address) -> LedgerResult<LedgerKeypair>;

    /// The ledger's current time in milliseconds. New transactions are
    /// stamped with it and validation measures clock skew against it.
    fn timestamp_ms(&self) -> u64;

    fn sign_transaction(&self, tx: &mut Transaction, key: &LedgerKeypair) -> LedgerResult<()> {
        tx.sign(key);
        Ok(())
    }

    fn validate_transaction(&self, tx: &Transaction) -> LedgerResult<()>;

    /// Durably records a validated transaction in the sender's chain.
    fn persist_transaction(&self, tx: &Transaction) -> LedgerResult<()>;

    /// Broadcasts a persisted transaction. May be retried on its own.
    fn publish_transaction(&self, tx: &Transaction) -> LedgerResult<()>;

    fn find_transaction(&self, hash: &str) -> LedgerResult<Option<Transaction>>;

    fn balance(&self, address: &Address) -> LedgerResult<u64>;

    /// Incoming and outgoing transactions touching `address`, oldest first.
    fn history(&self, address: &Address) -> LedgerResult<Vec<Transaction>>;
}
