//! Error taxonomy surfaced to the transport layer.
//!
//! Every variant carries the identifier that caused it (a username, an
//! address, a transaction hash) so a caller can render a message without
//! re-deriving context. Lower layers have their own error enums
//! ([`CredentialError`], [`LedgerError`]); they fold into [`GatewayError`]
//! at the component boundary.

use thiserror::Error;

use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::ledger::{LedgerError, Transaction};

/// Result alias used by every public gateway operation.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Coarse classification of a [`GatewayError`], for status-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    InvalidCredentials,
    ClaimTooLarge,
    ClaimTooSmall,
    InvalidInput,
    StorageFailure,
    CryptoFailure,
    LedgerFailure,
    PublishFailure,
}

/// Errors returned by the account store, faucet engine and transfer
/// orchestrator.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A record keyed by `id` is already present.
    #[error("{what} already exists: {id}")]
    AlreadyExists { what: &'static str, id: String },

    /// No record keyed by `id`.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// Password or token did not verify for `username`.
    #[error("invalid credentials for {username}")]
    InvalidCredentials { username: String },

    /// The requested claim exceeds what the account may currently claim.
    #[error("{username} cannot claim {requested}: at most {allowed} is claimable right now")]
    ClaimTooLarge {
        username: String,
        requested: u64,
        allowed: u64,
    },

    /// The requested claim is below the ruleset minimum (or zero).
    #[error("{username} cannot claim {requested}: minimum claim is {minimum}")]
    ClaimTooSmall {
        username: String,
        requested: u64,
        minimum: u64,
    },

    /// A caller-supplied value is malformed.
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The embedded store failed (I/O, serialization, corruption). Never
    /// retried here.
    #[error("storage failure during {operation}: {reason}")]
    StorageFailure {
        operation: &'static str,
        reason: String,
    },

    /// RNG or hash primitive failure.
    #[error("crypto failure: {0}")]
    CryptoFailure(#[from] CredentialError),

    /// Signing, validation or persistence rejected by the ledger boundary.
    #[error("ledger failure: {0}")]
    LedgerFailure(#[from] LedgerError),

    /// The transaction was validated and persisted but publication failed.
    /// Publication alone can be retried with the carried transaction.
    #[error("transaction {} persisted but not published: {source}", .transaction.hash)]
    PublishFailure {
        transaction: Box<Transaction>,
        #[source]
        source: LedgerError,
    },
}

impl GatewayError {
    pub(crate) fn already_exists(what: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            what,
            id: id.into(),
        }
    }

    pub(crate) fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    pub(crate) fn invalid_credentials(username: &str) -> Self {
        Self::InvalidCredentials {
            username: username.to_string(),
        }
    }

    pub(crate) fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::StorageFailure {
            operation,
            reason: err.to_string(),
        }
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidCredentials { .. } => ErrorKind::InvalidCredentials,
            Self::ClaimTooLarge { .. } => ErrorKind::ClaimTooLarge,
            Self::ClaimTooSmall { .. } => ErrorKind::ClaimTooSmall,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::StorageFailure { .. } => ErrorKind::StorageFailure,
            Self::CryptoFailure(_) => ErrorKind::CryptoFailure,
            Self::LedgerFailure(_) => ErrorKind::LedgerFailure,
            Self::PublishFailure { .. } => ErrorKind::PublishFailure,
        }
    }
}

impl From<sled::Error> for GatewayError {
    fn from(err: sled::Error) -> Self {
        Self::storage("sled", err)
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid { field, reason } => Self::InvalidInput { field, reason },
            other => Self::storage("load config", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_offending_identifier() {
        let err = GatewayError::already_exists("account", "alice");
        assert_eq!(err.to_string(), "account already exists: alice");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = GatewayError::ClaimTooLarge {
            username: "bob".into(),
            requested: 20,
            allowed: 10,
        };
        assert!(err.to_string().contains("bob"));
        assert!(err.to_string().contains("20"));
        assert_eq!(err.kind(), ErrorKind::ClaimTooLarge);
    }

    #[test]
    fn sled_errors_become_storage_failures() {
        let err: GatewayError = sled::Error::Unsupported("nope".into()).into();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
    }
}
