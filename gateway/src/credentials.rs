//! # Credential Store
//!
//! Password hashing and session-token issuance. This module is pure: it
//! never touches the account store. [`crate::accounts::AccountStore`] calls
//! into it and owns persistence.
//!
//! ## Passwords
//!
//! Argon2id, encoded as a PHC string (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`).
//! The salt and cost parameters travel inside the string, so a hash created
//! under old parameters keeps verifying after an operator raises them.
//!
//! ## Tokens
//!
//! A session token is 32 bytes from the OS RNG, hex-encoded, returned to the
//! caller exactly once. Only its SHA-256 fingerprint is stored. Matching a
//! token means fingerprinting the candidate and comparing fingerprints.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{CredentialParams, TOKEN_BYTES};
use crate::crypto::sha256_hex;

/// Salt length drawn for each password hash.
const SALT_BYTES: usize = 16;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("random number generator failed: {0}")]
    Rng(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("stored password hash is malformed: {0}")]
    MalformedHash(String),

    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),
}

/// A session token as it is persisted: fingerprint and metadata, never the
/// token itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub fingerprint: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

impl SessionToken {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| now < expiry)
    }

    pub fn matches(&self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        self.fingerprint == fingerprint && self.is_active(now)
    }
}

/// Argon2id hasher plus token generator.
#[derive(Clone)]
pub struct CredentialStore {
    argon2: Argon2<'static>,
}

impl CredentialStore {
    pub fn new(params: &CredentialParams) -> Result<Self, CredentialError> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|e| CredentialError::InvalidParams(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hashes `plaintext` under a fresh random salt.
    pub fn hash_password(&self, plaintext: &str) -> Result<String, CredentialError> {
        let salt_bytes = random_bytes::<SALT_BYTES>()?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| CredentialError::Hash(e.to_string()))?;
        let hash = self
            .argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| CredentialError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// `Ok(false)` on mismatch. An error means the stored hash could not be
    /// parsed or the primitive itself failed, which is not the same thing as
    /// a wrong password.
    pub fn verify_password(&self, stored: &str, candidate: &str) -> Result<bool, CredentialError> {
        let parsed =
            PasswordHash::new(stored).map_err(|e| CredentialError::MalformedHash(e.to_string()))?;
        match self.argon2.verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CredentialError::Hash(e.to_string())),
        }
    }

    /// Generates a token and the record to persist for it. The raw token is
    /// the first element; it is not recoverable afterwards.
    pub fn issue_token(
        &self,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        scope: Option<String>,
    ) -> Result<(String, SessionToken), CredentialError> {
        let token = random_hex::<TOKEN_BYTES>()?;
        let record = SessionToken {
            fingerprint: fingerprint(&token),
            issued_at,
            expires_at,
            scope,
        };
        Ok((token, record))
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

/// Fingerprint stored in place of a token.
pub fn fingerprint(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

/// `N` random bytes as lowercase hex. Also used for generated passwords.
pub fn random_hex<const N: usize>() -> Result<String, CredentialError> {
    Ok(hex::encode(random_bytes::<N>()?))
}

fn random_bytes<const N: usize>() -> Result<[u8; N], CredentialError> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CredentialError::Rng(e.to_string()))?;
    Ok(bytes)
}
