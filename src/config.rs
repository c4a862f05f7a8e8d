//! Rewrite configuration
//!
//! This module provides the configuration structure that controls how
//! sensitive columns are named and typed at the backend, how identifiers are
//! compared, and which backend functions carry ciphertext arithmetic.
//!
//! # Overview
//!
//! The rewrite configuration:
//! - Names the storage column of every sensitive column
//! - Sizes the ciphertext storage type
//! - Selects the identifier case policy
//! - Names the backend UDFs for homomorphic operations

use crate::catalog::{is_reserved_column, NameMatch};
use crate::error::Result;
use crate::types::DataType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Names of the backend functions that operate on ciphertexts
///
/// Each function receives the public modulus `n` as its last argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UdfNames {
    /// Ciphertext addition
    pub add: String,

    /// Ciphertext subtraction
    pub sub: String,

    /// Ciphertext scaling by a plaintext constant
    pub scale: String,

    /// Ciphertext sum aggregate
    pub sum: String,
}

impl Default for UdfNames {
    fn default() -> Self {
        Self {
            add: "sdb_add".to_string(),
            sub: "sdb_sub".to_string(),
            scale: "sdb_scale".to_string(),
            sum: "sdb_sum".to_string(),
        }
    }
}

/// Configuration for the rewriting pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RewriteConfig {
    /// Suffix appended to a sensitive column name to form its storage name
    pub cipher_suffix: String,

    /// Decimal precision of the ciphertext storage type
    pub cipher_precision: u32,

    /// Compare identifiers case-sensitively
    pub case_sensitive: bool,

    /// Bit length of each secret prime generated at provisioning
    pub prime_bits: u64,

    /// Backend ciphertext functions
    pub udf: UdfNames,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            cipher_suffix: "_enc".to_string(),
            cipher_precision: 1000,
            case_sensitive: false,
            prime_bits: 512,
            udf: UdfNames::default(),
        }
    }
}

impl RewriteConfig {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    ///
    /// # Arguments
    /// * `path` - Path of the JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Backend storage type of ciphertext columns
    pub fn cipher_type(&self) -> DataType {
        DataType::Decimal(self.cipher_precision)
    }

    /// Storage name of a sensitive column
    ///
    /// Reserved columns are already storage-only and keep their name.
    pub fn storage_name(&self, column: &str) -> String {
        if is_reserved_column(column) {
            column.to_string()
        } else {
            format!("{}{}", column, self.cipher_suffix)
        }
    }

    /// Identifier comparison policy
    pub fn name_match(&self) -> NameMatch {
        if self.case_sensitive {
            NameMatch::Exact
        } else {
            NameMatch::IgnoreAsciiCase
        }
    }

    /// Compare two identifiers under the configured case policy
    pub fn ident_eq(&self, a: &str, b: &str) -> bool {
        self.name_match().matches(a, b)
    }
}
