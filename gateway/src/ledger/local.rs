//! # LocalLedger — sled-backed Ledger
//!
//! A self-contained [`Ledger`] for single-node deployments and tests. It
//! keeps custodied keys, per-address chains and a publication log in the
//! same sled database as the account store.
//!
//! ## Tree Layout
//!
//! | Tree                  | Key                                  | Value                  |
//! |-----------------------|--------------------------------------|------------------------|
//! | `ledger_keys`         | `address` (32B)                      | secret key (32B)       |
//! | `ledger_chains`       | `address` (32B) ++ `nonce` (8B BE)   | tx hash (hex bytes)    |
//! | `ledger_transactions` | tx hash (hex bytes)                  | `bincode(Transaction)` |
//! | `ledger_incoming`     | `recipient` ++ `timestamp` ++ hash   | amount (8B BE)         |
//! | `ledger_allocations`  | `address` (32B)                      | amount (8B BE)         |
//! | `ledger_allocations`  | `__genesis__`                        | genesis address (32B)  |
//! | `ledger_published`    | tx hash (hex bytes)                  | publish time (8B BE)   |
//!
//! Nonces and timestamps are big-endian so prefix scans come back in order.
//!
//! ## Atomicity
//!
//! Persisting a transaction writes `ledger_transactions`, `ledger_chains`
//! and `ledger_incoming` in one sled transaction. The chain slot for
//! `(sender, nonce)` is checked inside it, so two writers racing for the
//! same nonce cannot both land.
//!
//! Published transactions are also pushed onto a broadcast channel for
//! anyone watching via [`LocalLedger::subscribe`].

use std::path::Path;
use std::sync::Arc;

use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Db, Transactional, Tree};
use tokio::sync::broadcast;

use super::{
    verify_against_chain, verify_transaction, Address, Chain, DerivedAddress, Ledger, LedgerError,
    LedgerResult, Transaction,
};
use crate::clock::{Clock, SystemClock};
use crate::config::ADDRESS_LENGTH;
use crate::crypto::LedgerKeypair;
use crate::telemetry::Telemetry;

/// Buffered published transactions per subscriber before it starts lagging.
const PUBLISH_CHANNEL_CAPACITY: usize = 1024;

/// Set in `ledger_allocations` once the genesis allocation has been credited.
const GENESIS_MARKER: &[u8] = b"__genesis__";

#[derive(Debug)]
pub struct LocalLedger {
    db: Db,
    keys: Tree,
    chains: Tree,
    transactions: Tree,
    incoming: Tree,
    allocations: Tree,
    published: Tree,
    events: broadcast::Sender<Transaction>,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
}

impl LocalLedger {
    pub fn open<P: AsRef<Path>>(path: P, telemetry: Telemetry) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(&db, telemetry)
    }

    /// In-memory ledger, removed on drop.
    pub fn open_temporary() -> LedgerResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(&db, Telemetry::detached())
    }

    /// Opens the ledger trees inside an existing database.
    pub fn from_db(db: &Db, telemetry: Telemetry) -> LedgerResult<Self> {
        let (events, _) = broadcast::channel(PUBLISH_CHANNEL_CAPACITY);
        Ok(Self {
            db: db.clone(),
            keys: db.open_tree("ledger_keys")?,
            chains: db.open_tree("ledger_chains")?,
            transactions: db.open_tree("ledger_transactions")?,
            incoming: db.open_tree("ledger_incoming")?,
            allocations: db.open_tree("ledger_allocations")?,
            published: db.open_tree("ledger_published")?,
            events,
            clock: Arc::new(SystemClock),
            telemetry,
        })
    }

    /// Replaces the system clock used for transaction timestamps, skew
    /// checks and publish times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Credits `amount` to `address` outside of any transaction. This is how
    /// the faucet account gets its initial supply.
    pub fn allocate(&self, address: &Address, amount: u64) -> LedgerResult<u64> {
        let updated = self
            .allocations
            .update_and_fetch(address.as_bytes(), |old| {
                let current = old.map_or(0, decode_u64);
                Some(current.saturating_add(amount).to_be_bytes().to_vec())
            })?;
        let total = updated.as_deref().map_or(0, decode_u64);
        tracing::info!(parent: self.telemetry.span(), %address, amount, total, "allocation credited");
        Ok(total)
    }

    /// Credits the genesis allocation to `address` unless a genesis has
    /// already been applied to this ledger. Returns whether it was credited.
    pub fn apply_genesis(&self, address: &Address, amount: u64) -> LedgerResult<bool> {
        let result: Result<bool, TransactionError<LedgerError>> =
            self.allocations
                .transaction(|tree| -> ConflictableTransactionResult<bool, LedgerError> {
                    if tree.get(GENESIS_MARKER)?.is_some() {
                        return Ok(false);
                    }
                    let current = tree.get(address.as_bytes())?.as_deref().map_or(0, decode_u64);
                    let total = current.saturating_add(amount);
                    tree.insert(&address.as_bytes()[..], &total.to_be_bytes()[..])?;
                    tree.insert(GENESIS_MARKER, &address.as_bytes()[..])?;
                    Ok(true)
                });
        let applied = match result {
            Ok(applied) => applied,
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(LedgerError::Storage(e)),
        };
        self.db.flush()?;

        if applied {
            tracing::info!(parent: self.telemetry.span(), %address, amount, "genesis allocation credited");
        } else {
            tracing::debug!(parent: self.telemetry.span(), "genesis allocation already applied");
        }
        Ok(applied)
    }

    pub fn allocation(&self, address: &Address) -> LedgerResult<u64> {
        Ok(self
            .allocations
            .get(address.as_bytes())?
            .as_deref()
            .map_or(0, decode_u64))
    }

    pub fn is_published(&self, hash: &str) -> LedgerResult<bool> {
        Ok(self.published.contains_key(hash.as_bytes())?)
    }

    /// Receives every transaction published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Transaction> {
        self.events.subscribe()
    }

    fn load_transaction(&self, hash: &[u8]) -> LedgerResult<Option<Transaction>> {
        match self.transactions.get(hash)? {
            Some(bytes) => Ok(Some(decode_transaction(&bytes)?)),
            None => Ok(None),
        }
    }

    fn incoming_total(&self, address: &Address) -> LedgerResult<u64> {
        let mut total = 0u64;
        for entry in self.incoming.scan_prefix(address.as_bytes()) {
            let (_, amount) = entry?;
            total = total.saturating_add(decode_u64(&amount));
        }
        Ok(total)
    }

    fn incoming_transactions(&self, address: &Address) -> LedgerResult<Vec<Transaction>> {
        let mut txs = Vec::new();
        for entry in self.incoming.scan_prefix(address.as_bytes()) {
            let (key, _) = entry?;
            let hash = &key[ADDRESS_LENGTH + 8..];
            if let Some(tx) = self.load_transaction(hash)? {
                txs.push(tx);
            }
        }
        Ok(txs)
    }
}

impl Ledger for LocalLedger {
    fn derive_new_address(&self) -> LedgerResult<DerivedAddress> {
        let keypair = LedgerKeypair::generate();
        let public_key = keypair.public_key();
        let address = Address::from_public_key(&public_key);
        self.keys
            .insert(&address.as_bytes()[..], &keypair.secret_key_bytes()[..])?;
        tracing::debug!(parent: self.telemetry.span(), %address, "address derived");
        Ok(DerivedAddress {
            address,
            public_key,
        })
    }

    fn read_chain(&self, address: &Address) -> LedgerResult<Option<Chain>> {
        let mut transactions = Vec::new();
        for entry in self.chains.scan_prefix(address.as_bytes()) {
            let (_, hash) = entry?;
            let tx = self
                .load_transaction(&hash)?
                .ok_or_else(|| LedgerError::Serialization(format!(
                    "chain of {address} references missing transaction {}",
                    String::from_utf8_lossy(&hash)
                )))?;
            transactions.push(tx);
        }
        if transactions.is_empty() {
            return Ok(None);
        }
        Ok(Some(Chain {
            address: *address,
            transactions,
        }))
    }

    fn key_material(&self, address: &Address) -> LedgerResult<LedgerKeypair> {
        let secret = self
            .keys
            .get(address.as_bytes())?
            .ok_or(LedgerError::UnknownKey { address: *address })?;
        Ok(LedgerKeypair::try_from_slice(&secret)?)
    }

    fn timestamp_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn validate_transaction(&self, tx: &Transaction) -> LedgerResult<()> {
        verify_transaction(tx, self.timestamp_ms())?;
        let chain = self
            .read_chain(&tx.sender)?
            .unwrap_or_else(|| Chain::empty(tx.sender));
        let balance = self.balance(&tx.sender)?;
        verify_against_chain(tx, &chain, balance)?;
        Ok(())
    }

    fn persist_transaction(&self, tx: &Transaction) -> LedgerResult<()> {
        let encoded =
            bincode::serialize(tx).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let hash = tx.hash.as_bytes();

        let mut slot = Vec::with_capacity(ADDRESS_LENGTH + 8);
        slot.extend_from_slice(tx.sender.as_bytes());
        slot.extend_from_slice(&tx.nonce.to_be_bytes());

        let mut incoming_key = Vec::with_capacity(ADDRESS_LENGTH + 8 + hash.len());
        incoming_key.extend_from_slice(tx.recipient.as_bytes());
        incoming_key.extend_from_slice(&tx.timestamp.to_be_bytes());
        incoming_key.extend_from_slice(hash);

        let result: Result<(), TransactionError<LedgerError>> =
            (&self.transactions, &self.chains, &self.incoming).transaction(
                |(transactions, chains, incoming)| {
                    if chains.get(&slot[..])?.is_some() {
                        return Err(ConflictableTransactionError::Abort(
                            LedgerError::Persistence {
                                hash: tx.hash.clone(),
                                reason: format!(
                                    "nonce {} already used by {}",
                                    tx.nonce, tx.sender
                                ),
                            },
                        ));
                    }
                    if transactions.get(hash)?.is_some() {
                        return Err(ConflictableTransactionError::Abort(
                            LedgerError::Persistence {
                                hash: tx.hash.clone(),
                                reason: "transaction already persisted".into(),
                            },
                        ));
                    }
                    transactions.insert(hash, encoded.as_slice())?;
                    chains.insert(&slot[..], hash)?;
                    incoming.insert(&incoming_key[..], &tx.amount.to_be_bytes()[..])?;
                    Ok(())
                },
            );

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => {
                return Err(LedgerError::Persistence {
                    hash: tx.hash.clone(),
                    reason: e.to_string(),
                })
            }
        }

        self.db.flush().map_err(|e| LedgerError::Persistence {
            hash: tx.hash.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(
            parent: self.telemetry.span(),
            hash = %tx.hash,
            sender = %tx.sender,
            nonce = tx.nonce,
            "transaction persisted"
        );
        Ok(())
    }

    fn publish_transaction(&self, tx: &Transaction) -> LedgerResult<()> {
        if !self.transactions.contains_key(tx.hash.as_bytes())? {
            return Err(LedgerError::Publication {
                hash: tx.hash.clone(),
                reason: "transaction was never persisted".into(),
            });
        }
        let now = self.timestamp_ms();
        self.published
            .insert(tx.hash.as_bytes(), &now.to_be_bytes()[..])?;
        // No subscribers is fine.
        let _ = self.events.send(tx.clone());
        tracing::info!(parent: self.telemetry.span(), hash = %tx.hash, "transaction published");
        Ok(())
    }

    fn find_transaction(&self, hash: &str) -> LedgerResult<Option<Transaction>> {
        self.load_transaction(hash.as_bytes())
    }

    fn balance(&self, address: &Address) -> LedgerResult<u64> {
        let credited = self
            .allocation(address)?
            .saturating_add(self.incoming_total(address)?);
        let spent = self
            .read_chain(address)?
            .map_or(0, |chain| chain.total_sent());
        Ok(credited.saturating_sub(spent))
    }

    fn history(&self, address: &Address) -> LedgerResult<Vec<Transaction>> {
        let mut txs = self
            .read_chain(address)?
            .map(|chain| chain.transactions)
            .unwrap_or_default();
        txs.extend(self.incoming_transactions(address)?);
        txs.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        Ok(txs)
    }
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    u64::from_be_bytes(buf)
}

fn decode_transaction(bytes: &[u8]) -> LedgerResult<Transaction> {
    bincode::deserialize(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::clock::ManualClock;
    use crate::ledger::{TransactionBuilder, ValidationError};

    fn funded(ledger: &LocalLedger, amount: u64) -> Address {
        let derived = ledger.derive_new_address().unwrap();
        ledger.allocate(&derived.address, amount).unwrap();
        derived.address
    }

    fn transfer(ledger: &LocalLedger, from: Address, to: Address, amount: u64) -> Transaction {
        let chain = ledger
            .read_chain(&from)
            .unwrap()
            .unwrap_or_else(|| Chain::empty(from));
        let mut tx = TransactionBuilder::new()
            .sender(from)
            .recipient(to)
            .amount(amount)
            .nonce(chain.next_nonce())
            .parent(chain.tail_hash())
            .timestamp(ledger.timestamp_ms())
            .build();
        let key = ledger.key_material(&from).unwrap();
        ledger.sign_transaction(&mut tx, &key).unwrap();
        tx
    }

    #[test]
    fn derived_keys_are_retrievable() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let derived = ledger.derive_new_address().unwrap();
        let key = ledger.key_material(&derived.address).unwrap();
        assert_eq!(key.public_key(), derived.public_key);
        assert_eq!(Address::from_public_key(&key.public_key()), derived.address);
    }

    #[test]
    fn unknown_address_has_no_key_and_no_chain() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let stranger = Address::from_bytes([5; 32]);
        assert!(matches!(
            ledger.key_material(&stranger),
            Err(LedgerError::UnknownKey { .. })
        ));
        assert!(ledger.read_chain(&stranger).unwrap().is_none());
        assert_eq!(ledger.balance(&stranger).unwrap(), 0);
    }

    #[test]
    fn full_transfer_moves_balance_and_extends_chain() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let alice = funded(&ledger, 100);
        let bob = ledger.derive_new_address().unwrap().address;

        let tx = transfer(&ledger, alice, bob, 30);
        ledger.validate_transaction(&tx).unwrap();
        ledger.persist_transaction(&tx).unwrap();
        ledger.publish_transaction(&tx).unwrap();

        assert_eq!(ledger.balance(&alice).unwrap(), 70);
        assert_eq!(ledger.balance(&bob).unwrap(), 30);
        assert!(ledger.is_published(&tx.hash).unwrap());
        assert_eq!(ledger.find_transaction(&tx.hash).unwrap(), Some(tx.clone()));

        let chain = ledger.read_chain(&alice).unwrap().unwrap();
        assert_eq!(chain.next_nonce(), 1);
        assert_eq!(chain.tail_hash(), Some(tx.hash.clone()));

        let second = transfer(&ledger, alice, bob, 10);
        assert_eq!(second.parent, Some(tx.hash));
        ledger.validate_transaction(&second).unwrap();
    }

    #[test]
    fn overspend_is_rejected() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let alice = funded(&ledger, 10);
        let bob = Address::from_bytes([3; 32]);
        let tx = transfer(&ledger, alice, bob, 11);
        assert!(matches!(
            ledger.validate_transaction(&tx),
            Err(LedgerError::Invalid(ValidationError::InsufficientBalance { .. }))
        ));
    }

    #[test]
    fn same_nonce_cannot_be_persisted_twice() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let alice = funded(&ledger, 100);
        let a = transfer(&ledger, alice, Address::from_bytes([3; 32]), 1);
        let b = transfer(&ledger, alice, Address::from_bytes([4; 32]), 1);
        assert_eq!(a.nonce, b.nonce);

        ledger.persist_transaction(&a).unwrap();
        assert!(matches!(
            ledger.persist_transaction(&b),
            Err(LedgerError::Persistence { .. })
        ));
        assert!(ledger.find_transaction(&b.hash).unwrap().is_none());
    }

    #[test]
    fn publishing_requires_persistence() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let alice = funded(&ledger, 100);
        let tx = transfer(&ledger, alice, Address::from_bytes([3; 32]), 1);
        assert!(matches!(
            ledger.publish_transaction(&tx),
            Err(LedgerError::Publication { .. })
        ));
    }

    #[test]
    fn subscribers_see_published_transactions() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let mut rx = ledger.subscribe();
        let alice = funded(&ledger, 100);
        let tx = transfer(&ledger, alice, Address::from_bytes([3; 32]), 1);
        ledger.persist_transaction(&tx).unwrap();
        ledger.publish_transaction(&tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), tx);
    }

    #[test]
    fn history_merges_incoming_and_outgoing() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let alice = funded(&ledger, 100);
        let bob = funded(&ledger, 100);

        let out = transfer(&ledger, alice, bob, 5);
        ledger.persist_transaction(&out).unwrap();
        let back = transfer(&ledger, bob, alice, 2);
        ledger.persist_transaction(&back).unwrap();

        let history = ledger.history(&alice).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().any(|tx| tx.hash == out.hash));
        assert!(history.iter().any(|tx| tx.hash == back.hash));
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[test]
    fn genesis_is_credited_once() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let faucet = Address::from_bytes([7; 32]);
        ledger.allocate(&faucet, 5).unwrap();

        assert!(ledger.apply_genesis(&faucet, 1_000).unwrap());
        assert!(!ledger.apply_genesis(&faucet, 1_000).unwrap());
        assert!(!ledger.apply_genesis(&Address::from_bytes([8; 32]), 1_000).unwrap());
        assert_eq!(ledger.allocation(&faucet).unwrap(), 1_005);
        assert_eq!(ledger.balance(&Address::from_bytes([8; 32])).unwrap(), 0);
    }

    #[test]
    fn injected_clock_drives_skew_checks_and_publish_time() {
        let clock = Arc::new(ManualClock::new(Utc::now() - Duration::hours(1)));
        let ledger = LocalLedger::open_temporary()
            .unwrap()
            .with_clock(clock.clone());
        assert_eq!(ledger.timestamp_ms(), clock.now_ms());

        let alice = funded(&ledger, 100);
        let bob = Address::from_bytes([3; 32]);

        // Stamped by the wall clock, an hour ahead of the ledger.
        let chain = Chain::empty(alice);
        let mut early = TransactionBuilder::new()
            .sender(alice)
            .recipient(bob)
            .amount(1)
            .nonce(chain.next_nonce())
            .timestamp(Utc::now().timestamp_millis() as u64)
            .build();
        ledger
            .sign_transaction(&mut early, &ledger.key_material(&alice).unwrap())
            .unwrap();
        assert!(matches!(
            ledger.validate_transaction(&early),
            Err(LedgerError::Invalid(ValidationError::TimestampTooFarInFuture { .. }))
        ));

        let tx = transfer(&ledger, alice, bob, 1);
        assert_eq!(tx.timestamp, clock.now_ms());
        ledger.validate_transaction(&tx).unwrap();
        ledger.persist_transaction(&tx).unwrap();
        clock.advance(Duration::seconds(2));
        ledger.publish_transaction(&tx).unwrap();
        let published_at = ledger.published.get(tx.hash.as_bytes()).unwrap().unwrap();
        assert_eq!(decode_u64(&published_at), clock.now_ms());
    }

    #[test]
    fn allocations_accumulate() {
        let ledger = LocalLedger::open_temporary().unwrap();
        let addr = Address::from_bytes([6; 32]);
        assert_eq!(ledger.allocate(&addr, 10).unwrap(), 10);
        assert_eq!(ledger.allocate(&addr, 5).unwrap(), 15);
        assert_eq!(ledger.allocation(&addr).unwrap(), 15);
    }
}
