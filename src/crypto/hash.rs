//! Hash functions
//!
//! This module provides the SHA-256 helpers used to derive key material from
//! database-wide secrets and to fingerprint catalog files.
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::crypto::HashUtils;
//!
//! // Hex-encoded SHA-256 digest
//! let hash = HashUtils::sha256_bytes(b"Hello, World!");
//!
//! // Derive a scalar below a modulus from a secret
//! let share = HashUtils::derive_scalar(&secret, "sdb_row_id", &n);
//! ```

use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};

/// Hash utilities
///
/// Provides methods for computing cryptographic hashes.
pub struct HashUtils;

impl HashUtils {
    /// Compute SHA-256 hash of bytes
    ///
    /// # Arguments
    /// * `data` - Input bytes to hash
    ///
    /// # Returns
    /// Hex-encoded SHA-256 hash string
    pub fn sha256_bytes(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Derive a scalar in `[1, modulus)` from a secret and a domain label
    ///
    /// The same secret and label always produce the same scalar, which lets
    /// the proxy recompute a shared key share without storing it.
    ///
    /// # Arguments
    /// * `secret` - Database-wide shared secret
    /// * `label` - Domain separation label
    /// * `modulus` - Upper bound (exclusive) of the result, must exceed 1
    pub fn derive_scalar(secret: &BigUint, label: &str, modulus: &BigUint) -> BigUint {
        let mut hasher = Sha256::new();
        hasher.update(secret.to_bytes_be());
        hasher.update(b"/");
        hasher.update(label.as_bytes());
        let digest = BigUint::from_bytes_be(&hasher.finalize());

        let scalar = digest % modulus;
        if scalar.is_zero() {
            BigUint::from(1u32)
        } else {
            scalar
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_bytes() {
        let hash = HashUtils::sha256_bytes(b"abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_derive_scalar_is_deterministic_and_bounded() {
        let secret = BigUint::from(123_456_789u64);
        let modulus = BigUint::from(3233u32);

        let a = HashUtils::derive_scalar(&secret, "sdb_row_id", &modulus);
        let b = HashUtils::derive_scalar(&secret, "sdb_row_id", &modulus);
        assert_eq!(a, b);
        assert!(a < modulus);
        assert!(!a.is_zero());

        let other = HashUtils::derive_scalar(&secret, "other", &BigUint::from(u64::MAX));
        let same_label = HashUtils::derive_scalar(&secret, "sdb_row_id", &BigUint::from(u64::MAX));
        assert_ne!(other, same_label);
    }
}
