//! Error types
//!
//! Every stage of the pipeline (catalog lookup, binding, reference resolution,
//! join-chain validation, rewriting) reports failures through [`Error`]. All
//! variants are terminal for the statement being processed: the first error
//! aborts the statement and no partially rewritten tree is ever returned.

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of catalog object that a lookup failed to find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Database
    Database,

    /// Table (or a table qualifier used in a query)
    Table,

    /// Column
    Column,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Database => write!(f, "database"),
            ObjectKind::Table => write!(f, "table"),
            ObjectKind::Column => write!(f, "column"),
        }
    }
}

/// Errors raised by the proxy core
#[derive(Debug, Error)]
pub enum Error {
    /// Catalog lookup miss
    #[error("{kind} `{name}` not found")]
    NotFound { kind: ObjectKind, name: String },

    /// A column reference could not be linked to the expression producing it
    #[error("resolution error: {0}")]
    Resolution(String),

    /// Structural invariant of a statement violated (join chain, reserved names)
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// No ciphertext-domain equivalent exists for an operator or function
    #[error("cannot rewrite `{operator}` over `{operand}`")]
    UnsupportedRewrite { operator: String, operand: String },

    /// SQL text could not be lowered into the statement model
    #[error("parse error: {0}")]
    Parse(String),

    /// Catalog metadata is malformed or inconsistent
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Cryptographic primitive failure
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Catalog persistence I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catalog (de)serialization failure
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::NotFound`]
    pub fn not_found(kind: ObjectKind, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for a [`Error::UnsupportedRewrite`]
    pub fn unsupported(operator: impl Into<String>, operand: impl Into<String>) -> Self {
        Error::UnsupportedRewrite {
            operator: operator.into(),
            operand: operand.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found(ObjectKind::Column, "T1.zzz");
        assert_eq!(err.to_string(), "column `T1.zzz` not found");
    }

    #[test]
    fn test_unsupported_message_names_operator() {
        let err = Error::unsupported("avg", "T.salary");
        assert!(err.to_string().contains("avg"));
        assert!(err.to_string().contains("T.salary"));
    }
}
