//! Catalog metadata
//!
//! This module defines the static metadata the rewriting engine resolves
//! queries against: databases with their cryptosystem parameters, tables and
//! columns with their sensitivity flag and key material.
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::catalog::{Catalog, NameMatch};
//!
//! let column = catalog.column("shop", "orders", "amount", NameMatch::IgnoreAsciiCase)?;
//! assert!(column.sensitive);
//! ```

use super::{is_reserved_column, NameMatch, RESERVED_COLUMNS, SLOT_BITS};
use crate::error::{Error, ObjectKind, Result};
use crate::types::DataType;
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Serde adapter writing big integers as decimal strings
pub(crate) mod decimal {
    use num_bigint::BigUint;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let text = String::deserialize(deserializer)?;
        BigUint::parse_bytes(text.as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid decimal integer `{}`", text)))
    }
}

/// Key descriptor of a sensitive column
///
/// Columns sharing a key form one key domain: their ciphertexts can be
/// compared and combined with each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnKey {
    /// Multiplicative component, at least 1
    #[serde(with = "decimal")]
    pub lower: BigUint,

    /// Additive component
    #[serde(with = "decimal")]
    pub upper: BigUint,
}

impl ColumnKey {
    /// Create a key descriptor
    pub fn new(lower: BigUint, upper: BigUint) -> Self {
        Self { lower, upper }
    }
}

/// Public cryptosystem parameters of a database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoParams {
    /// Modulus `n = p1 * p2`
    #[serde(with = "decimal")]
    pub n: BigUint,

    /// Generator
    #[serde(with = "decimal")]
    pub g: BigUint,
}

/// Proxy-only secrets of a database
///
/// These are never emitted into SQL sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSecrets {
    /// First secret prime
    #[serde(with = "decimal")]
    pub p1: BigUint,

    /// Second secret prime
    #[serde(with = "decimal")]
    pub p2: BigUint,

    /// Shared secret used to derive the row identity key
    #[serde(with = "decimal")]
    pub row_secret: BigUint,
}

/// Column metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name
    pub name: String,

    /// Plaintext logical type
    pub data_type: DataType,

    /// Whether the column is stored encrypted
    pub sensitive: bool,

    /// Key material, present iff the column is sensitive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ColumnKey>,
}

impl ColumnMeta {
    /// Create a non-sensitive column
    pub fn plain(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            sensitive: false,
            key: None,
        }
    }

    /// Create a sensitive column with its key
    pub fn sensitive(name: impl Into<String>, data_type: DataType, key: ColumnKey) -> Self {
        Self {
            name: name.into(),
            data_type,
            sensitive: true,
            key: Some(key),
        }
    }
}

/// Table metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Table name
    pub name: String,

    /// Columns in declaration order, reserved columns included
    pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
    /// Create a table
    pub fn new(name: impl Into<String>, columns: Vec<ColumnMeta>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Look up a column by name
    pub fn column(&self, name: &str, names: NameMatch) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| names.matches(&c.name, name))
    }

    /// Key shared by the reserved columns, if the table carries them
    pub fn reserved_key(&self) -> Option<&ColumnKey> {
        self.columns
            .iter()
            .find(|c| is_reserved_column(&c.name))
            .and_then(|c| c.key.as_ref())
    }

    /// Slot whose range holds the reserved key's upper bound
    pub fn reserved_slot(&self) -> Option<BigUint> {
        self.reserved_key()
            .map(|key| &key.upper >> SLOT_BITS as usize)
    }

    /// Replace the key shared by the reserved columns
    pub fn set_reserved_key(&mut self, key: &ColumnKey) {
        for column in self
            .columns
            .iter_mut()
            .filter(|c| is_reserved_column(&c.name))
        {
            column.key = Some(key.clone());
        }
    }

    /// Validate column uniqueness, key presence and reserved columns
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::Catalog(format!("table {} has no columns", self.name)));
        }

        let mut names = HashSet::new();
        for column in &self.columns {
            if !names.insert(column.name.to_ascii_lowercase()) {
                return Err(Error::Catalog(format!(
                    "table {} has duplicate column: {}",
                    self.name, column.name
                )));
            }
            match (&column.key, column.sensitive) {
                (Some(key), true) if key.lower.is_zero() => {
                    return Err(Error::Catalog(format!(
                        "column {}.{} has a zero key lower bound",
                        self.name, column.name
                    )));
                }
                (Some(_), true) | (None, false) => {}
                (None, true) => {
                    return Err(Error::Catalog(format!(
                        "sensitive column {}.{} has no key",
                        self.name, column.name
                    )));
                }
                (Some(_), false) => {
                    return Err(Error::Catalog(format!(
                        "non-sensitive column {}.{} carries a key",
                        self.name, column.name
                    )));
                }
            }
            if column.sensitive && !column.data_type.is_integral() {
                return Err(Error::Catalog(format!(
                    "sensitive column {}.{} must be an integer, found {}",
                    self.name, column.name, column.data_type
                )));
            }
        }

        let reserved: Vec<&ColumnMeta> = self
            .columns
            .iter()
            .filter(|c| is_reserved_column(&c.name))
            .collect();
        if !reserved.is_empty() {
            if reserved.len() != RESERVED_COLUMNS.len() {
                return Err(Error::Catalog(format!(
                    "table {} carries {} of {} reserved columns",
                    self.name,
                    reserved.len(),
                    RESERVED_COLUMNS.len()
                )));
            }
            let key = &reserved[0].key;
            if reserved.iter().any(|c| !c.sensitive || &c.key != key) {
                return Err(Error::Catalog(format!(
                    "reserved columns of table {} must share one key",
                    self.name
                )));
            }
        }

        Ok(())
    }
}

/// Database metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMeta {
    /// Database name
    pub name: String,

    /// Public cryptosystem parameters
    pub params: CryptoParams,

    /// Secret primes and row secret, absent on proxies that only rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<DatabaseSecrets>,

    /// Key of sensitive columns created without explicit key material
    pub domain_key: ColumnKey,

    /// Tables in creation order
    #[serde(default)]
    pub tables: Vec<TableMeta>,
}

impl DatabaseMeta {
    /// Look up a table by name
    pub fn table(&self, name: &str, names: NameMatch) -> Result<&TableMeta> {
        self.tables
            .iter()
            .find(|t| names.matches(&t.name, name))
            .ok_or_else(|| Error::not_found(ObjectKind::Table, name))
    }

    /// Whether a table exists
    pub fn has_table(&self, name: &str, names: NameMatch) -> bool {
        self.tables.iter().any(|t| names.matches(&t.name, name))
    }

    /// Table whose reserved key lies in `slot`
    pub fn slot_owner(&self, slot: &BigUint) -> Option<&TableMeta> {
        self.tables
            .iter()
            .find(|t| t.reserved_slot().as_ref() == Some(slot))
    }

    /// Lowest slot above every slot in use
    ///
    /// Tables without reserved columns do not occupy a slot.
    pub fn next_slot(&self) -> usize {
        self.tables
            .iter()
            .filter_map(|t| t.reserved_slot())
            .filter_map(|slot| slot.to_usize())
            .map(|slot| slot.saturating_add(1))
            .max()
            .unwrap_or(0)
    }

    /// Add a table
    ///
    /// # Returns
    /// `Err(Error::Catalog)` if a table with that name exists, its reserved
    /// key slot is taken or the table is invalid
    pub fn add_table(&mut self, table: TableMeta) -> Result<()> {
        if self.has_table(&table.name, NameMatch::IgnoreAsciiCase) {
            return Err(Error::Catalog(format!("table {} already exists", table.name)));
        }
        table.validate()?;
        if let Some(slot) = table.reserved_slot() {
            if let Some(owner) = self.slot_owner(&slot) {
                return Err(Error::Catalog(format!(
                    "reserved key slot {} of table {} is taken by table {}",
                    slot, table.name, owner.name
                )));
            }
        }
        self.tables.push(table);
        Ok(())
    }

    /// Validate parameters, secrets and every table
    pub fn validate(&self) -> Result<()> {
        let one = BigUint::one();
        if self.params.n <= one {
            return Err(Error::Catalog(format!(
                "database {} has a degenerate modulus",
                self.name
            )));
        }
        if self.params.g < BigUint::from(2u32) || self.params.g >= self.params.n {
            return Err(Error::Catalog(format!(
                "database {} generator is outside [2, n)",
                self.name
            )));
        }
        if let Some(secrets) = &self.secrets {
            if secrets.p1 == secrets.p2 || &secrets.p1 * &secrets.p2 != self.params.n {
                return Err(Error::Catalog(format!(
                    "database {} modulus does not match its primes",
                    self.name
                )));
            }
            if secrets.row_secret.is_zero() || secrets.row_secret >= self.params.n {
                return Err(Error::Catalog(format!(
                    "database {} row secret is outside [1, n)",
                    self.name
                )));
            }
        }
        if self.domain_key.lower.is_zero() {
            return Err(Error::Catalog(format!(
                "database {} domain key has a zero lower bound",
                self.name
            )));
        }

        let mut names = HashSet::new();
        let mut slots = HashSet::new();
        for table in &self.tables {
            if !names.insert(table.name.to_ascii_lowercase()) {
                return Err(Error::Catalog(format!(
                    "database {} has duplicate table: {}",
                    self.name, table.name
                )));
            }
            table.validate()?;
            if let Some(slot) = table.reserved_slot() {
                if !slots.insert(slot.clone()) {
                    return Err(Error::Catalog(format!(
                        "database {} reuses reserved key slot {} in table {}",
                        self.name, slot, table.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Catalog of databases
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Databases in provisioning order
    pub databases: Vec<DatabaseMeta>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a database by name
    pub fn database(&self, name: &str, names: NameMatch) -> Result<&DatabaseMeta> {
        self.databases
            .iter()
            .find(|d| names.matches(&d.name, name))
            .ok_or_else(|| Error::not_found(ObjectKind::Database, name))
    }

    /// Mutable lookup of a database by name
    pub fn database_mut(&mut self, name: &str, names: NameMatch) -> Result<&mut DatabaseMeta> {
        self.databases
            .iter_mut()
            .find(|d| names.matches(&d.name, name))
            .ok_or_else(|| Error::not_found(ObjectKind::Database, name))
    }

    /// Look up a table
    pub fn table(&self, database: &str, table: &str, names: NameMatch) -> Result<&TableMeta> {
        self.database(database, names)?.table(table, names)
    }

    /// Look up a column
    ///
    /// # Returns
    /// `Err(Error::NotFound)` naming the first missing level
    pub fn column(
        &self,
        database: &str,
        table: &str,
        column: &str,
        names: NameMatch,
    ) -> Result<&ColumnMeta> {
        self.table(database, table, names)?
            .column(column, names)
            .ok_or_else(|| Error::not_found(ObjectKind::Column, format!("{}.{}", table, column)))
    }

    /// Add a database
    pub fn add_database(&mut self, database: DatabaseMeta) -> Result<()> {
        if self
            .databases
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(&database.name))
        {
            return Err(Error::Catalog(format!(
                "database {} already exists",
                database.name
            )));
        }
        database.validate()?;
        self.databases.push(database);
        Ok(())
    }

    /// Validate every database
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for database in &self.databases {
            if !names.insert(database.name.to_ascii_lowercase()) {
                return Err(Error::Catalog(format!(
                    "duplicate database: {}",
                    database.name
                )));
            }
            database.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::catalog::{ROW_ID_COLUMN, R_COLUMN, S_COLUMN};

    pub fn key(lower: u64, upper: u64) -> ColumnKey {
        ColumnKey::new(BigUint::from(lower), BigUint::from(upper))
    }

    /// Reserved key whose upper bound lies `offset` into `slot`
    pub fn slot_key(lower: u64, slot: u64, offset: u64) -> ColumnKey {
        ColumnKey::new(
            BigUint::from(lower),
            (BigUint::from(slot) << SLOT_BITS as usize) + offset,
        )
    }

    fn reserved(key: ColumnKey) -> Vec<ColumnMeta> {
        [ROW_ID_COLUMN, R_COLUMN, S_COLUMN]
            .iter()
            .map(|name| ColumnMeta::sensitive(*name, DataType::BigInt, key.clone()))
            .collect()
    }

    /// Small catalog with three tables sharing the `(1, 3)` domain key
    pub fn dummy_catalog() -> Catalog {
        let domain = key(1, 3);

        let mut t1 = vec![
            ColumnMeta::sensitive("id", DataType::Int, domain.clone()),
            ColumnMeta::sensitive("a", DataType::Int, domain.clone()),
            ColumnMeta::sensitive("c", DataType::Int, domain.clone()),
        ];
        t1.extend(reserved(slot_key(2, 0, 4)));

        let mut t2 = vec![
            ColumnMeta::sensitive("id", DataType::Int, domain.clone()),
            ColumnMeta::sensitive("b", DataType::Int, domain.clone()),
            ColumnMeta::plain("c", DataType::Int),
        ];
        t2.extend(reserved(slot_key(3, 1, 5)));

        let mut t3 = vec![
            ColumnMeta::sensitive("id1", DataType::Int, domain.clone()),
            ColumnMeta::plain("id2", DataType::Int),
            ColumnMeta::sensitive("d", DataType::Int, key(5, 9)),
            ColumnMeta::plain("name", DataType::Varchar(20)),
        ];
        t3.extend(reserved(slot_key(4, 2, 6)));

        let database = DatabaseMeta {
            name: "dummy_db".to_string(),
            params: CryptoParams {
                n: BigUint::from(3233u32),
                g: BigUint::from(7u32),
            },
            secrets: Some(DatabaseSecrets {
                p1: BigUint::from(61u32),
                p2: BigUint::from(53u32),
                row_secret: BigUint::from(17u32),
            }),
            domain_key: domain,
            tables: vec![
                TableMeta::new("T1", t1),
                TableMeta::new("T2", t2),
                TableMeta::new("T3", t3),
            ],
        };

        Catalog {
            databases: vec![database],
        }
    }
}
