//! # Faucet
//!
//! Rate-limited payouts from a designated faucet account.
//!
//! An account is in exactly one [`ClaimState`]:
//!
//! - `Banned` — its address is on the ruleset's ban list.
//! - `Cooling` — it claimed less than one claim period ago.
//! - `Eligible` — everything else, including never having claimed.
//!
//! ## Claim Lifecycle
//!
//! A claim is reserved, eligibility check included, in a single store
//! transaction that also writes a [`ClaimIntent`](crate::accounts::ClaimIntent).
//! The faucet then transfers from its own account to the claimant:
//!
//! | Transfer outcome                  | Intent                          |
//! |-----------------------------------|---------------------------------|
//! | published                         | cleared                         |
//! | rejected before reaching ledger   | reverted, previous claim restored |
//! | persisted, publication failed     | kept with the transaction hash  |
//!
//! [`Faucet::reconcile`] resolves whatever intents are left over, typically
//! at startup.

pub mod engine;
pub mod keystore;
pub mod ruleset;

pub use engine::StandardFaucet;
pub use keystore::{FaucetKeystore, KeystoreError, LoadedKeystore};
pub use ruleset::{Ruleset, StandardRuleset};

pub use crate::clock::{Clock, ManualClock, SystemClock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::accounts::{Account, ClaimRecord};
use crate::error::GatewayResult;
use crate::ledger::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimState {
    Eligible,
    Cooling { until: DateTime<Utc> },
    Banned,
}

impl ClaimState {
    pub fn can_claim(&self) -> bool {
        matches!(self, ClaimState::Eligible)
    }
}

/// Result of a successful claim.
#[derive(Debug, Clone)]
pub struct ClaimReceipt {
    pub username: String,
    pub amount: u64,
    pub claimed_at: DateTime<Utc>,
    pub next_claim_at: DateTime<Utc>,
    pub transaction: Transaction,
}

/// What [`Faucet::reconcile`] did, by username.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Transfer found on the ledger and (re)published; intent cleared.
    pub republished: Vec<String>,
    /// No transfer ever reached the ledger; claim rolled back.
    pub reverted: Vec<String>,
    /// Publication failed again; intent left for the next run.
    pub still_pending: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.still_pending.is_empty()
    }
}

pub trait Faucet: Send + Sync {
    fn ruleset(&self) -> &dyn Ruleset;

    /// State of `account` as of now. Does not re-read the store.
    fn claim_state(&self, account: &Account) -> ClaimState;

    fn account_can_claim(&self, username: &str) -> GatewayResult<bool>;

    fn account_last_claim(&self, username: &str) -> GatewayResult<Option<ClaimRecord>>;

    /// Zero while banned or cooling, otherwise the ruleset maximum.
    fn amount_can_claim(&self, username: &str) -> GatewayResult<u64>;

    /// When the current cooling period ends. `None` if the account has never
    /// claimed.
    fn next_claim_at(&self, username: &str) -> GatewayResult<Option<DateTime<Utc>>>;

    /// Zero when the cooling period is already over.
    fn time_until_next_claim(&self, username: &str) -> GatewayResult<Duration>;

    fn claim(&self, username: &str, requested: u64) -> GatewayResult<ClaimReceipt>;

    /// Bans the account's address. Returns `false` if it already was.
    fn ban_user(&self, username: &str) -> GatewayResult<bool>;

    fn reconcile(&self) -> GatewayResult<ReconcileReport>;
}
