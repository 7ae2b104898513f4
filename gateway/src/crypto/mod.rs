//! # Cryptographic Primitives
//!
//! Hashing and Ed25519 key handling shared by the ledger boundary and the
//! account store. Password hashing lives in [`crate::credentials`] because
//! it carries policy (cost parameters, token expiry) and not just math.

pub mod hash;
pub mod keys;

pub use hash::{blake3_hash, double_sha256, sha256_array, sha256_hex};
pub use keys::{KeyError, LedgerKeypair, LedgerPublicKey, LedgerSignature};
