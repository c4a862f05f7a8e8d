//! Catalog module
//!
//! This module provides the metadata model the rewriting engine resolves
//! queries against, including:
//! - Databases with their cryptosystem parameters
//! - Tables and columns with sensitivity flags and key material
//! - JSON persistence with validation on load
//! - A shared handle giving concurrent readers consistent snapshots

pub mod handle;
pub mod meta;
pub mod storage;

// Re-export main types for convenience
pub use handle::CatalogHandle;
pub use meta::{
    Catalog, ColumnKey, ColumnMeta, CryptoParams, DatabaseMeta, DatabaseSecrets, TableMeta,
};
pub use storage::CatalogStorage;

/// Reserved row identifier column
pub const ROW_ID_COLUMN: &str = "sdb_row_id";

/// Reserved auxiliary column `R`
pub const R_COLUMN: &str = "sdb_r";

/// Reserved auxiliary column `S`
pub const S_COLUMN: &str = "sdb_s";

/// All reserved columns, in the order they are appended to a table
pub const RESERVED_COLUMNS: [&str; 3] = [ROW_ID_COLUMN, R_COLUMN, S_COLUMN];

/// Width of the reserved-key upper-bound range owned by each table slot
pub const SLOT_BITS: u64 = 64;

/// Whether a column name is reserved for proxy bookkeeping
pub fn is_reserved_column(name: &str) -> bool {
    RESERVED_COLUMNS.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Identifier comparison policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameMatch {
    /// Byte-for-byte equality
    Exact,

    /// ASCII case-insensitive equality
    #[default]
    IgnoreAsciiCase,
}

impl NameMatch {
    /// Compare two identifiers under this policy
    pub fn matches(self, a: &str, b: &str) -> bool {
        match self {
            NameMatch::Exact => a == b,
            NameMatch::IgnoreAsciiCase => a.eq_ignore_ascii_case(b),
        }
    }
}
