//! # Account Store
//!
//! Persistent user accounts: one record per username, holding the password
//! hash, the custodied ledger address, session tokens, push tokens and the
//! faucet claim state.
//!
//! Records live in a sled tree keyed by the BLAKE3 hash of the username. A
//! second tree maps each address back to its account key so lookups by
//! address do not scan.

mod store;
mod types;

pub use store::AccountStore;
pub use types::{Account, AccountSummary, ClaimIntent, ClaimRecord};
