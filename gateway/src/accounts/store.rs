//! sled-backed account persistence.
//!
//! ## Tree Layout
//!
//! | Tree        | Key                      | Value               |
//! |-------------|--------------------------|---------------------|
//! | `accounts`  | `BLAKE3(username)` (32B) | `bincode(Account)`  |
//! | `addresses` | `address` (32B)          | `BLAKE3(username)`  |
//!
//! ## Atomicity
//!
//! Every write is a sled transaction. Creation and deletion span both trees
//! so the index never points at a missing record and never misses one.
//! Updates to an existing record go through [`AccountStore::mutate`], which
//! reads, applies a closure and writes back inside one transaction; sled
//! retries the whole closure on conflict, so concurrent writers to the same
//! account serialize instead of losing updates.
//!
//! Password verification is expensive, so it runs before the transaction.
//! The transaction then re-checks that the credential which verified is
//! still on the record (same password hash, same token fingerprint). A
//! password reset racing a token issuance therefore fails the issuance
//! rather than minting a token against a stale password.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionResult,
};
use sled::{Db, Transactional, Tree};
use uuid::Uuid;

use super::types::{Account, AccountSummary, ClaimIntent, ClaimRecord};
use crate::clock::Clock;
use crate::config::{GatewayConfig, MAX_USERNAME_LENGTH, MIN_PASSWORD_LENGTH};
use crate::credentials::{fingerprint, CredentialStore};
use crate::crypto::blake3_hash;
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::{Address, Ledger};
use crate::telemetry::Telemetry;

/// Which credential verified a request. Carried into the write transaction
/// so it can confirm the credential is still current.
#[derive(Debug, Clone)]
enum Verified {
    Password { hash: String },
    Token { fingerprint: String },
}

impl Verified {
    fn still_current(&self, account: &Account, now: DateTime<Utc>) -> bool {
        match self {
            Self::Password { hash } => account.password_hash == *hash,
            Self::Token { fingerprint } => account.has_active_token(fingerprint, now),
        }
    }
}

pub struct AccountStore {
    accounts: Tree,
    addresses: Tree,
    credentials: CredentialStore,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    token_ttl: Option<Duration>,
    telemetry: Telemetry,
}

impl AccountStore {
    /// Opens the account trees inside `db`.
    pub fn from_db(
        db: &Db,
        ledger: Arc<dyn Ledger>,
        config: &GatewayConfig,
        clock: Arc<dyn Clock>,
        telemetry: Telemetry,
    ) -> GatewayResult<Self> {
        Ok(Self {
            accounts: db
                .open_tree("accounts")
                .map_err(|e| GatewayError::storage("open accounts tree", e))?,
            addresses: db
                .open_tree("addresses")
                .map_err(|e| GatewayError::storage("open addresses tree", e))?,
            credentials: CredentialStore::new(&config.credentials)?,
            ledger,
            clock,
            token_ttl: config.tokens.ttl(),
            telemetry,
        })
    }

    // -- Creation -----------------------------------------------------------

    /// Creates an account bound to a freshly derived ledger address.
    pub fn create_account(&self, username: &str, password: &str) -> GatewayResult<Account> {
        validate_username(username)?;
        validate_password(password)?;

        // Skip deriving a key for a name that is obviously taken. The insert
        // transaction re-checks.
        let taken = self
            .accounts
            .contains_key(account_key(username))
            .map_err(|e| GatewayError::storage("create account", e))?;
        if taken {
            return Err(GatewayError::already_exists("account", username));
        }

        let derived = self.ledger.derive_new_address()?;
        self.insert(username, password, derived.address)
    }

    /// Creates an account bound to a caller-supplied address.
    pub fn import_account(
        &self,
        username: &str,
        password: &str,
        address: Address,
    ) -> GatewayResult<Account> {
        validate_username(username)?;
        validate_password(password)?;
        self.insert(username, password, address)
    }

    fn insert(&self, username: &str, password: &str, address: Address) -> GatewayResult<Account> {
        let key = account_key(username);
        let hash = self.credentials.hash_password(password)?;
        let account = Account::new(username, hash, address, self.clock.now());
        let encoded = encode(&account)?;

        let result: TransactionResult<(), GatewayError> = (&self.accounts, &self.addresses)
            .transaction(|(accounts, addresses)| {
                if accounts.get(key)?.is_some() {
                    return abort(GatewayError::already_exists("account", username));
                }
                if addresses.get(address.as_bytes())?.is_some() {
                    return abort(GatewayError::already_exists("address", address.to_string()));
                }
                accounts.insert(&key[..], encoded.as_slice())?;
                addresses.insert(&address.as_bytes()[..], &key[..])?;
                Ok(())
            });
        flatten(result, "create account")?;

        self.telemetry.metrics().accounts_created_total.inc();
        tracing::info!(parent: self.telemetry.span(), username, %address, "account created");
        Ok(account)
    }

    // -- Lookup -------------------------------------------------------------

    pub fn query_by_username(&self, username: &str) -> GatewayResult<Account> {
        let bytes = self
            .accounts
            .get(account_key(username))
            .map_err(|e| GatewayError::storage("query account", e))?
            .ok_or_else(|| GatewayError::not_found("account", username))?;
        decode(&bytes)
    }

    /// [`Account::summary`] as of the store's clock.
    pub fn account_summary(&self, username: &str) -> GatewayResult<AccountSummary> {
        Ok(self.query_by_username(username)?.summary(self.clock.now()))
    }

    /// Resolves an address through the secondary index.
    pub fn query_by_address(&self, address: &Address) -> GatewayResult<Account> {
        let not_found = || GatewayError::not_found("address", address.to_string());
        let key = self
            .addresses
            .get(address.as_bytes())
            .map_err(|e| GatewayError::storage("query address", e))?
            .ok_or_else(not_found)?;
        let bytes = self
            .accounts
            .get(&key)
            .map_err(|e| GatewayError::storage("query address", e))?
            .ok_or_else(not_found)?;
        decode(&bytes)
    }

    /// Every username, sorted.
    pub fn usernames(&self) -> GatewayResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.accounts.iter() {
            let (_, bytes) = entry.map_err(|e| GatewayError::storage("list accounts", e))?;
            names.push(decode(&bytes)?.username);
        }
        names.sort();
        Ok(names)
    }

    // -- Credentials --------------------------------------------------------

    /// True iff `secret` is the password or an unexpired session token.
    pub fn authenticate(&self, username: &str, secret: &str) -> GatewayResult<bool> {
        let account = self.query_by_username(username)?;
        let verified = self.verify(&account, secret)?;
        if verified.is_none() {
            self.note_auth_failure(username);
        }
        Ok(verified.is_some())
    }

    /// Issues an unscoped session token. The raw token is returned once.
    pub fn issue_token(&self, username: &str, secret: &str) -> GatewayResult<String> {
        self.issue_scoped_token(username, secret, None)
    }

    pub fn issue_scoped_token(
        &self,
        username: &str,
        secret: &str,
        scope: Option<String>,
    ) -> GatewayResult<String> {
        let (_, verified) = self.require(username, secret)?;
        let now = self.clock.now();
        let expires_at = match self.token_ttl {
            Some(ttl) => Some(now.checked_add_signed(ttl).ok_or_else(|| {
                GatewayError::invalid_input("tokens.ttl_secs", "token expiry out of range")
            })?),
            None => None,
        };
        let (token, record) = self.credentials.issue_token(now, expires_at, scope)?;

        self.mutate(username, "issue token", |account| {
            if !verified.still_current(account, now) {
                return Err(GatewayError::invalid_credentials(username));
            }
            account.tokens.push(record.clone());
            Ok(())
        })?;

        self.telemetry.metrics().tokens_issued_total.inc();
        tracing::info!(parent: self.telemetry.span(), username, "session token issued");
        Ok(token)
    }

    /// Token-only authentication. Returns the account's address.
    pub fn validate_token(&self, username: &str, token: &str) -> GatewayResult<Address> {
        let account = self.query_by_username(username)?;
        if account.has_active_token(&fingerprint(token), self.clock.now()) {
            return Ok(account.address);
        }
        self.note_auth_failure(username);
        Err(GatewayError::invalid_credentials(username))
    }

    /// Replaces the password hash. Only the current password is accepted as
    /// proof, not a session token.
    pub fn reset_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> GatewayResult<()> {
        validate_password(new_password)?;
        let account = self.query_by_username(username)?;
        if !self
            .credentials
            .verify_password(&account.password_hash, old_password)?
        {
            self.note_auth_failure(username);
            return Err(GatewayError::invalid_credentials(username));
        }

        let verified_hash = account.password_hash;
        let new_hash = self.credentials.hash_password(new_password)?;
        self.mutate(username, "reset password", |account| {
            if account.password_hash != verified_hash {
                return Err(GatewayError::invalid_credentials(username));
            }
            account.password_hash = new_hash.clone();
            Ok(())
        })?;

        tracing::info!(parent: self.telemetry.span(), username, "password reset");
        Ok(())
    }

    /// Removes the account and its address index entry.
    pub fn delete_account(&self, username: &str, secret: &str) -> GatewayResult<()> {
        let (_, verified) = self.require(username, secret)?;
        let key = account_key(username);
        let now = self.clock.now();

        let result: TransactionResult<Address, GatewayError> = (&self.accounts, &self.addresses)
            .transaction(|(accounts, addresses)| {
                let Some(bytes) = accounts.get(key)? else {
                    return abort(GatewayError::not_found("account", username));
                };
                let current = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                if !verified.still_current(&current, now) {
                    return abort(GatewayError::invalid_credentials(username));
                }
                accounts.remove(&key[..])?;
                addresses.remove(&current.address.as_bytes()[..])?;
                Ok(current.address)
            });
        let address = flatten(result, "delete account")?;

        self.telemetry.metrics().accounts_deleted_total.inc();
        tracing::info!(parent: self.telemetry.span(), username, %address, "account deleted");
        Ok(())
    }

    /// Registers a push-delivery token. Duplicates are rejected.
    pub fn add_push_token(
        &self,
        username: &str,
        secret: &str,
        push_token: &str,
    ) -> GatewayResult<()> {
        if push_token.trim().is_empty() {
            return Err(GatewayError::invalid_input("push token", "must not be empty"));
        }
        let (_, verified) = self.require(username, secret)?;
        let now = self.clock.now();

        self.mutate(username, "add push token", |account| {
            if !verified.still_current(account, now) {
                return Err(GatewayError::invalid_credentials(username));
            }
            if account.push_tokens.iter().any(|t| t == push_token) {
                return Err(GatewayError::already_exists("push token", push_token));
            }
            account.push_tokens.push(push_token.to_string());
            Ok(())
        })?;

        tracing::debug!(parent: self.telemetry.span(), username, "push token registered");
        Ok(())
    }

    // -- Faucet claim bookkeeping ------------------------------------------

    /// Reserves a claim: runs `eligibility` against the freshly read record,
    /// then writes `last_claim` and a [`ClaimIntent`] in the same
    /// transaction.
    pub fn record_faucet_claim<F>(
        &self,
        username: &str,
        amount: u64,
        now: DateTime<Utc>,
        intent_id: Uuid,
        eligibility: F,
    ) -> GatewayResult<Account>
    where
        F: Fn(&Account) -> GatewayResult<()>,
    {
        self.mutate(username, "record faucet claim", |account| {
            eligibility(account)?;
            if let Some(last) = &account.last_claim {
                if now < last.time {
                    return Err(GatewayError::invalid_input(
                        "claim time",
                        format!("{now} precedes previous claim at {}", last.time),
                    ));
                }
            }
            if let Some(pending) = &account.pending_claim {
                return Err(GatewayError::invalid_input(
                    "claim",
                    format!("claim {} is still awaiting reconciliation", pending.id),
                ));
            }
            account.pending_claim = Some(ClaimIntent {
                id: intent_id,
                amount,
                reserved_at: now,
                previous: account.last_claim.clone(),
                transaction_hash: None,
            });
            account.last_claim = Some(ClaimRecord { time: now, amount });
            Ok(())
        })
    }

    /// Clears the intent once its transfer is published.
    pub fn settle_faucet_claim(&self, username: &str, intent_id: Uuid) -> GatewayResult<Account> {
        self.mutate(username, "settle faucet claim", |account| {
            if account.pending_claim.as_ref().map(|p| p.id) == Some(intent_id) {
                account.pending_claim = None;
            }
            Ok(())
        })
    }

    /// Keeps the claim but remembers which persisted transaction still has
    /// to be published.
    pub fn mark_claim_unpublished(
        &self,
        username: &str,
        intent_id: Uuid,
        transaction_hash: &str,
    ) -> GatewayResult<Account> {
        self.mutate(username, "mark claim unpublished", |account| {
            if let Some(pending) = account.pending_claim.as_mut() {
                if pending.id == intent_id {
                    pending.transaction_hash = Some(transaction_hash.to_string());
                }
            }
            Ok(())
        })
    }

    /// Restores `last_claim` to what it was before the intent. Returns
    /// whether anything was reverted.
    pub fn revert_faucet_claim(&self, username: &str, intent_id: Uuid) -> GatewayResult<bool> {
        let before = self.query_by_username(username)?;
        if before.pending_claim.as_ref().map(|p| p.id) != Some(intent_id) {
            return Ok(false);
        }
        let after = self.mutate(username, "revert faucet claim", |account| {
            if let Some(pending) = account.pending_claim.take() {
                if pending.id == intent_id {
                    account.last_claim = pending.previous;
                } else {
                    account.pending_claim = Some(pending);
                }
            }
            Ok(())
        })?;
        Ok(after.pending_claim.is_none())
    }

    /// Accounts holding an unresolved claim intent.
    pub fn pending_claims(&self) -> GatewayResult<Vec<Account>> {
        let mut pending = Vec::new();
        for entry in self.accounts.iter() {
            let (_, bytes) = entry.map_err(|e| GatewayError::storage("scan pending claims", e))?;
            let account = decode(&bytes)?;
            if account.pending_claim.is_some() {
                pending.push(account);
            }
        }
        Ok(pending)
    }

    // -- Internals ----------------------------------------------------------

    /// Atomic read-modify-write of one account. Bumps `version`.
    fn mutate<F>(&self, username: &str, operation: &'static str, apply: F) -> GatewayResult<Account>
    where
        F: Fn(&mut Account) -> GatewayResult<()>,
    {
        let key = account_key(username);
        let result: TransactionResult<Account, GatewayError> = self.accounts.transaction(|tree| {
            let Some(bytes) = tree.get(key)? else {
                return abort(GatewayError::not_found("account", username));
            };
            let mut account = decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
            apply(&mut account).map_err(ConflictableTransactionError::Abort)?;
            account.version += 1;
            let encoded = encode(&account).map_err(ConflictableTransactionError::Abort)?;
            tree.insert(&key[..], encoded)?;
            Ok(account)
        });
        flatten(result, operation)
    }

    fn verify(&self, account: &Account, secret: &str) -> GatewayResult<Option<Verified>> {
        let now = self.clock.now();
        let token_fingerprint = fingerprint(secret);
        if account.has_active_token(&token_fingerprint, now) {
            return Ok(Some(Verified::Token {
                fingerprint: token_fingerprint,
            }));
        }
        if self
            .credentials
            .verify_password(&account.password_hash, secret)?
        {
            return Ok(Some(Verified::Password {
                hash: account.password_hash.clone(),
            }));
        }
        Ok(None)
    }

    fn require(&self, username: &str, secret: &str) -> GatewayResult<(Account, Verified)> {
        let account = self.query_by_username(username)?;
        match self.verify(&account, secret)? {
            Some(verified) => Ok((account, verified)),
            None => {
                self.note_auth_failure(username);
                Err(GatewayError::invalid_credentials(username))
            }
        }
    }

    fn note_auth_failure(&self, username: &str) {
        self.telemetry.metrics().auth_failures_total.inc();
        tracing::warn!(parent: self.telemetry.span(), username, "authentication failed");
    }
}

impl std::fmt::Debug for AccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountStore")
            .field("accounts", &self.accounts.len())
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn account_key(username: &str) -> [u8; 32] {
    blake3_hash(username.as_bytes())
}

fn validate_username(username: &str) -> GatewayResult<()> {
    if username.trim().is_empty() {
        return Err(GatewayError::invalid_input("username", "must not be empty"));
    }
    if username.len() > MAX_USERNAME_LENGTH {
        return Err(GatewayError::invalid_input(
            "username",
            format!("longer than {MAX_USERNAME_LENGTH} bytes"),
        ));
    }
    if username.chars().any(char::is_control) {
        return Err(GatewayError::invalid_input(
            "username",
            "contains control characters",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> GatewayResult<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(GatewayError::invalid_input("password", "must not be empty"));
    }
    Ok(())
}

fn encode(account: &Account) -> GatewayResult<Vec<u8>> {
    bincode::serialize(account).map_err(|e| GatewayError::storage("encode account", e))
}

fn decode(bytes: &[u8]) -> GatewayResult<Account> {
    bincode::deserialize(bytes).map_err(|e| GatewayError::storage("decode account", e))
}

fn abort<T>(err: GatewayError) -> ConflictableTransactionResult<T, GatewayError> {
    Err(ConflictableTransactionError::Abort(err))
}

fn flatten<T>(result: TransactionResult<T, GatewayError>, operation: &'static str) -> GatewayResult<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => GatewayError::storage(operation, e),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
