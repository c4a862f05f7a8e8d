//! Shared catalog handle
//!
//! Rewrites read the catalog concurrently; schema changes replace it. The
//! handle follows a read-copy-update policy: readers take an `Arc` snapshot
//! that stays consistent for the whole rewrite, while updates build and
//! validate a new catalog before swapping it in under the write lock.

use super::meta::{Catalog, DatabaseMeta, TableMeta};
use super::storage::CatalogStorage;
use super::NameMatch;
use crate::error::Result;
use log::info;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

/// Handle to the process-wide catalog
#[derive(Debug, Default)]
pub struct CatalogHandle {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogHandle {
    /// Create a handle over a validated catalog
    pub fn new(catalog: Catalog) -> Result<Self> {
        catalog.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(catalog)),
        })
    }

    /// Current catalog snapshot
    ///
    /// The snapshot is unaffected by later reloads.
    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.current.read())
    }

    /// Replace the catalog
    ///
    /// The new catalog is validated before it becomes visible; on error the
    /// current catalog is kept.
    pub fn replace(&self, catalog: Catalog) -> Result<()> {
        catalog.validate()?;
        *self.current.write() = Arc::new(catalog);
        Ok(())
    }

    /// Reload the catalog from a file
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<()> {
        let storage = CatalogStorage::new();
        let catalog = storage.load(path.as_ref())?;
        let fingerprint = storage.fingerprint(&catalog)?;
        self.replace(catalog)?;
        info!(
            "Reloaded catalog from {} (fingerprint {})",
            path.as_ref().display(),
            fingerprint
        );
        Ok(())
    }

    /// Install a table created by a rewritten CREATE statement
    ///
    /// # Arguments
    /// * `database` - Database receiving the table
    /// * `table` - Table metadata produced by the rewrite
    /// * `names` - Identifier policy used to find the database
    pub fn install_table(&self, database: &str, table: TableMeta, names: NameMatch) -> Result<()> {
        self.install_table_with(database, names, |_| Ok(table))
            .map(|_| ())
    }

    /// Install a table built against the latest version of its database
    ///
    /// `prepare` runs under the write lock and sees every table installed
    /// before this one, so it can move the table's reserved key to a free
    /// slot.
    ///
    /// # Returns
    /// The installed table
    pub fn install_table_with<F>(
        &self,
        database: &str,
        names: NameMatch,
        prepare: F,
    ) -> Result<TableMeta>
    where
        F: FnOnce(&DatabaseMeta) -> Result<TableMeta>,
    {
        let mut guard = self.current.write();
        let mut next = Catalog::clone(&guard);
        let target = next.database_mut(database, names)?;
        let table = prepare(target)?;
        target.add_table(table.clone())?;
        next.validate()?;
        *guard = Arc::new(next);
        info!("Installed table {} into database {}", table.name, database);
        Ok(table)
    }
}
