//! # Hashing Utilities
//!
//! Two hash functions, each with one job:
//!
//! - **BLAKE3** for anything the gateway keys storage by: the account key
//!   derived from a username, and the address derived from a public key.
//! - **SHA-256** for token fingerprints and (doubled) transaction hashes,
//!   which are what ledger tooling expects to see.

use sha2::{Digest, Sha256};

/// BLAKE3 digest as a fixed-size array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// SHA-256 digest as a fixed-size array.
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA-256 rendered as lowercase hex. Used for token fingerprints, so the
/// raw token never touches disk.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_array(data))
}

/// `SHA-256(SHA-256(data))`. Transaction hashes use this construction.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256_array(&sha256_array(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn double_sha256_is_sha256_applied_twice() {
        let once = sha256_array(b"wallet");
        assert_eq!(double_sha256(b"wallet"), sha256_array(&once));
        assert_ne!(double_sha256(b"wallet"), once);
    }

    #[test]
    fn blake3_is_deterministic_and_input_sensitive() {
        assert_eq!(blake3_hash(b"alice"), blake3_hash(b"alice"));
        assert_ne!(blake3_hash(b"alice"), blake3_hash(b"Alice"));
    }
}
