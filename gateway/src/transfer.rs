//! # Transaction Orchestrator
//!
//! Turns "user X, authenticated with secret S, wants to send N to address A"
//! into a published ledger transaction:
//!
//! 1. Resolve the sender account.
//! 2. Authenticate the sender.
//! 3. Read the sender's chain (an address the ledger has never seen gets an
//!    empty chain).
//! 4. Derive nonce and parent from the chain tail.
//! 5. Build the unsigned transaction.
//! 6. Fetch key material and sign.
//! 7. Validate against ledger rules.
//! 8. Persist, then publish.
//! 9. Return the transaction.
//!
//! Steps 1–7 have no side effects. A persistence failure is a
//! [`GatewayError::LedgerFailure`]. A publication failure after persistence
//! is a [`GatewayError::PublishFailure`] carrying the signed transaction, so
//! the caller can [`republish`](TransferOrchestrator::republish) it without
//! signing again.
//!
//! Steps 3–8 run under a per-sender lock. Two transfers from the same
//! account never read the same chain tail. A lock nobody is waiting on is
//! dropped from the table once its holder finishes. Timestamps come from
//! the ledger's clock.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::accounts::AccountStore;
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::{Address, Chain, Ledger, LedgerResult, Transaction, TransactionBuilder};
use crate::telemetry::Telemetry;

pub struct TransferOrchestrator {
    accounts: Arc<AccountStore>,
    ledger: Arc<dyn Ledger>,
    sender_locks: DashMap<Address, Arc<Mutex<()>>>,
    telemetry: Telemetry,
}

impl TransferOrchestrator {
    pub fn new(accounts: Arc<AccountStore>, ledger: Arc<dyn Ledger>, telemetry: Telemetry) -> Self {
        Self {
            accounts,
            ledger,
            sender_locks: DashMap::new(),
            telemetry,
        }
    }

    pub fn submit_transfer(
        &self,
        sender_username: &str,
        sender_secret: &str,
        recipient: Address,
        amount: u64,
        payload: Option<Vec<u8>>,
    ) -> GatewayResult<Transaction> {
        let sender = self.accounts.query_by_username(sender_username)?;
        if !self.accounts.authenticate(sender_username, sender_secret)? {
            return Err(GatewayError::invalid_credentials(sender_username));
        }
        let from = sender.address();

        let lock = self.sender_lock(from);
        let result = {
            let _guard = lock.lock();
            self.submit_locked(sender_username, from, recipient, amount, payload)
        };
        drop(lock);
        self.sender_locks
            .remove_if(&from, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn submit_locked(
        &self,
        sender_username: &str,
        from: Address,
        recipient: Address,
        amount: u64,
        payload: Option<Vec<u8>>,
    ) -> GatewayResult<Transaction> {
        let chain = self
            .ledger
            .read_chain(&from)?
            .unwrap_or_else(|| Chain::empty(from));

        let mut tx = TransactionBuilder::new()
            .sender(from)
            .recipient(recipient)
            .amount(amount)
            .nonce(chain.next_nonce())
            .parent(chain.tail_hash())
            .payload(payload)
            .timestamp(self.ledger.timestamp_ms())
            .build();

        if let Err(e) = self.sign_and_persist(&mut tx) {
            self.telemetry.metrics().transfers_failed_total.inc();
            tracing::debug!(
                parent: self.telemetry.span(),
                sender = sender_username,
                error = %e,
                "transfer rejected before publication"
            );
            return Err(e.into());
        }

        if let Err(source) = self.ledger.publish_transaction(&tx) {
            self.telemetry.metrics().publish_failures_total.inc();
            tracing::warn!(
                parent: self.telemetry.span(),
                hash = %tx.hash,
                error = %source,
                "transaction persisted but not published"
            );
            return Err(GatewayError::PublishFailure {
                transaction: Box::new(tx),
                source,
            });
        }

        self.telemetry.metrics().transfers_published_total.inc();
        tracing::info!(
            parent: self.telemetry.span(),
            hash = %tx.hash,
            sender = sender_username,
            %recipient,
            amount,
            nonce = tx.nonce,
            "transfer published"
        );
        Ok(tx)
    }

    /// Publishes an already persisted transaction again.
    pub fn republish(&self, hash: &str) -> GatewayResult<Transaction> {
        let tx = self
            .ledger
            .find_transaction(hash)?
            .ok_or_else(|| GatewayError::not_found("transaction", hash))?;
        if let Err(source) = self.ledger.publish_transaction(&tx) {
            self.telemetry.metrics().publish_failures_total.inc();
            return Err(GatewayError::PublishFailure {
                transaction: Box::new(tx),
                source,
            });
        }
        self.telemetry.metrics().transfers_published_total.inc();
        tracing::info!(parent: self.telemetry.span(), hash, "transaction republished");
        Ok(tx)
    }

    pub fn balance(&self, username: &str) -> GatewayResult<u64> {
        let account = self.accounts.query_by_username(username)?;
        Ok(self.ledger.balance(&account.address())?)
    }

    pub fn history(&self, username: &str) -> GatewayResult<Vec<Transaction>> {
        let account = self.accounts.query_by_username(username)?;
        Ok(self.ledger.history(&account.address())?)
    }

    /// Hash of the account's most recent outgoing transaction.
    pub fn last_transaction_hash(&self, username: &str) -> GatewayResult<Option<String>> {
        let account = self.accounts.query_by_username(username)?;
        Ok(self
            .ledger
            .read_chain(&account.address())?
            .and_then(|chain| chain.tail_hash()))
    }

    fn sign_and_persist(&self, tx: &mut Transaction) -> LedgerResult<()> {
        let key = self.ledger.key_material(&tx.sender)?;
        self.ledger.sign_transaction(tx, &key)?;
        self.ledger.validate_transaction(tx)?;
        self.ledger.persist_transaction(tx)
    }

    fn sender_lock(&self, address: Address) -> Arc<Mutex<()>> {
        self.sender_locks
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }
}

impl std::fmt::Debug for TransferOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOrchestrator")
            .field("tracked_senders", &self.sender_locks.len())
            .finish_non_exhaustive()
    }
}
