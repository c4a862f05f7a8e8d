//! Catalog storage layer
//!
//! This module provides functionality for persisting the catalog to disk and
//! loading it back. A catalog is validated before it is written and after it
//! is read, so malformed metadata never reaches a rewrite.
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::catalog::CatalogStorage;
//!
//! let storage = CatalogStorage::new();
//! storage.save(&catalog, "catalog.json")?;
//! let loaded = storage.load("catalog.json")?;
//! ```

use super::meta::Catalog;
use crate::crypto::HashUtils;
use crate::error::Result;
use log::debug;
use std::fs;
use std::path::Path;

/// Catalog storage
///
/// Provides methods for saving and loading catalogs as JSON.
#[derive(Debug, Clone, Default)]
pub struct CatalogStorage;

impl CatalogStorage {
    /// Create a new catalog storage instance
    pub fn new() -> Self {
        Self
    }

    /// Save a catalog to a file
    ///
    /// # Arguments
    /// * `catalog` - Catalog to save
    /// * `path` - File path to save to
    ///
    /// # Returns
    /// `Ok(())` if successful, `Err` if the catalog is invalid or cannot be written
    pub fn save(&self, catalog: &Catalog, path: impl AsRef<Path>) -> Result<()> {
        catalog.validate()?;

        let json = serde_json::to_string_pretty(catalog)?;
        fs::write(path.as_ref(), json)?;

        debug!("Saved catalog to {}", path.as_ref().display());
        Ok(())
    }

    /// Content fingerprint of a catalog
    ///
    /// Hex-encoded SHA-256 of the compact JSON form; equal catalogs always
    /// share a fingerprint.
    pub fn fingerprint(&self, catalog: &Catalog) -> Result<String> {
        let json = serde_json::to_vec(catalog)?;
        Ok(HashUtils::sha256_bytes(&json))
    }

    /// Load a catalog from a file
    ///
    /// # Arguments
    /// * `path` - File path to load from
    ///
    /// # Returns
    /// `Ok(Catalog)` if the file parses and validates, `Err` otherwise
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Catalog> {
        let contents = fs::read_to_string(path.as_ref())?;
        let catalog: Catalog = serde_json::from_str(&contents)?;

        catalog.validate()?;

        debug!(
            "Loaded catalog with {} database(s) from {}",
            catalog.databases.len(),
            path.as_ref().display()
        );
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::meta::fixtures::dummy_catalog;
    use crate::error::Error;

    #[test]
    fn test_storage_save_and_load() {
        let storage = CatalogStorage::new();
        let catalog = dummy_catalog();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        storage.save(&catalog, &path).unwrap();

        let loaded = storage.load(&path).unwrap();
        assert_eq!(loaded, catalog);
    }

    #[test]
    fn test_load_rejects_invalid_catalog() {
        let storage = CatalogStorage::new();
        let mut catalog = dummy_catalog();
        catalog.databases[0].domain_key.lower = num_bigint::BigUint::from(0u32);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, serde_json::to_string(&catalog).unwrap()).unwrap();

        assert!(matches!(storage.load(&path), Err(Error::Catalog(_))));
        assert!(storage.save(&catalog, &path).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let storage = CatalogStorage::new();
        let catalog = dummy_catalog();
        let fingerprint = storage.fingerprint(&catalog).unwrap();
        assert_eq!(fingerprint.len(), 64);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        storage.save(&catalog, &path).unwrap();
        let loaded = storage.load(&path).unwrap();
        assert_eq!(storage.fingerprint(&loaded).unwrap(), fingerprint);

        let mut changed = catalog;
        changed.databases[0].tables.pop();
        assert_ne!(storage.fingerprint(&changed).unwrap(), fingerprint);
    }

    #[test]
    fn test_load_missing_file() {
        let storage = CatalogStorage::new();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            storage.load(dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }
}
