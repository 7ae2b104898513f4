//! Per-address transaction chains.

use serde::{Deserialize, Serialize};

use super::address::Address;
use super::transaction::Transaction;

/// Ordered outgoing transactions of one address, oldest first.
///
/// A chain with no transactions is valid: it is what the orchestrator
/// starts from when the ledger has never seen the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub address: Address,
    pub transactions: Vec<Transaction>,
}

impl Chain {
    pub fn empty(address: Address) -> Self {
        Self {
            address,
            transactions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn tail(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    /// Hash of the last transaction, which becomes the next parent.
    pub fn tail_hash(&self) -> Option<String> {
        self.tail().map(|tx| tx.hash.clone())
    }

    /// Nonce the next transaction must carry.
    pub fn next_nonce(&self) -> u64 {
        self.tail().map_or(0, |tx| tx.nonce + 1)
    }

    pub fn total_sent(&self) -> u64 {
        self.transactions
            .iter()
            .fold(0u64, |acc, tx| acc.saturating_add(tx.amount))
    }
}
