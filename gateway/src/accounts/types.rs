//! Persisted account record and the claim bookkeeping attached to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credentials::SessionToken;
use crate::ledger::Address;

/// A completed (or reserved) faucet claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub time: DateTime<Utc>,
    pub amount: u64,
}

/// A claim whose transfer has not yet been confirmed published.
///
/// Written in the same storage transaction that reserves the claim. It is
/// cleared on success, rolled back (restoring `previous`) on a transfer
/// failure before publication, and kept with `transaction_hash` set when
/// the transfer was persisted but publication failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimIntent {
    pub id: Uuid,
    pub amount: u64,
    pub reserved_at: DateTime<Utc>,
    pub previous: Option<ClaimRecord>,
    pub transaction_hash: Option<String>,
}

/// One user's account.
///
/// `address` is fixed at creation; no store operation writes it again.
/// `version` increments on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub(crate) username: String,
    pub(crate) password_hash: String,
    pub(crate) address: Address,
    pub(crate) tokens: Vec<SessionToken>,
    pub(crate) push_tokens: Vec<String>,
    pub(crate) last_claim: Option<ClaimRecord>,
    pub(crate) pending_claim: Option<ClaimIntent>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) version: u64,
}

impl Account {
    pub(crate) fn new(
        username: &str,
        password_hash: String,
        address: Address,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            username: username.to_string(),
            password_hash,
            address,
            tokens: Vec::new(),
            push_tokens: Vec::new(),
            last_claim: None,
            pending_claim: None,
            created_at,
            version: 0,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn tokens(&self) -> &[SessionToken] {
        &self.tokens
    }

    pub fn push_tokens(&self) -> &[String] {
        &self.push_tokens
    }

    pub fn last_claim(&self) -> Option<&ClaimRecord> {
        self.last_claim.as_ref()
    }

    pub fn pending_claim(&self) -> Option<&ClaimIntent> {
        self.pending_claim.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn has_active_token(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        self.tokens.iter().any(|t| t.matches(fingerprint, now))
    }

    /// Public view with no credential material. Tokens expired at `now`
    /// are not counted.
    pub fn summary(&self, now: DateTime<Utc>) -> AccountSummary {
        AccountSummary {
            username: self.username.clone(),
            address: self.address,
            created_at: self.created_at,
            last_claim: self.last_claim.clone(),
            pending_claim: self.pending_claim.is_some(),
            active_tokens: self.tokens.iter().filter(|t| t.is_active(now)).count(),
            push_tokens: self.push_tokens.clone(),
        }
    }
}

/// What an operator or client is allowed to see about an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub username: String,
    pub address: Address,
    pub created_at: DateTime<Utc>,
    pub last_claim: Option<ClaimRecord>,
    pub pending_claim: bool,
    pub active_tokens: usize,
    pub push_tokens: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_hides_credentials() {
        let account = Account::new(
            "alice",
            "$argon2id$secret".into(),
            Address::from_bytes([1; 32]),
            Utc::now(),
        );
        let json = serde_json::to_string(&account.summary(Utc::now())).unwrap();
        assert!(json.contains("alice"));
        assert!(!json.contains("argon2id"));
    }

    #[test]
    fn summary_counts_only_unexpired_tokens() {
        let now = Utc::now();
        let mut account = Account::new("carol", "h".into(), Address::from_bytes([3; 32]), now);
        let token = |fp: &str, expires_at: Option<DateTime<Utc>>| SessionToken {
            fingerprint: fp.into(),
            issued_at: now,
            expires_at,
            scope: None,
        };
        account.tokens.push(token("expired", Some(now - chrono::Duration::seconds(1))));
        account.tokens.push(token("live", Some(now + chrono::Duration::hours(1))));
        account.tokens.push(token("forever", None));

        assert_eq!(account.summary(now).active_tokens, 2);
        assert_eq!(account.summary(now + chrono::Duration::hours(2)).active_tokens, 1);
    }

    #[test]
    fn bincode_round_trip_keeps_every_field() {
        let mut account = Account::new("bob", "h".into(), Address::from_bytes([2; 32]), Utc::now());
        account.last_claim = Some(ClaimRecord {
            time: Utc::now(),
            amount: 5,
        });
        account.push_tokens.push("fcm-1".into());
        let bytes = bincode::serialize(&account).unwrap();
        let back: Account = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, account);
    }
}
