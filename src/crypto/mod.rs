//! Cryptographic primitives module
//!
//! This module provides the cryptographic capabilities the rewriting core
//! orchestrates:
//! - Hash functions (SHA-256 key derivation)
//! - Random big integers and prime generation
//! - Database parameter and column key generation
//! - The value encoding scheme used to map query constants to ciphertexts
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::crypto::{CipherScheme, KeyGenerator, OrderPreservingScheme};
//!
//! let mut rng = rand::rng();
//! let db = KeyGenerator::generate_database(&mut rng, "shop", 512)?;
//!
//! let scheme = OrderPreservingScheme::new();
//! let cipher = scheme.encrypt(42, &db.domain_key)?;
//! ```

pub mod hash;
pub mod keys;
pub mod random;
pub mod scheme;

// Re-export main types for convenience
pub use hash::HashUtils;
pub use keys::KeyGenerator;
pub use random::RandomUtils;
pub use scheme::{CipherScheme, OrderPreservingScheme};
