//! Statement pipeline
//!
//! [`QueryPipeline`] chains the stages a client statement goes through:
//! parse, validate, bind, resolve, rewrite and emit. Every call works on one
//! catalog snapshot, so a concurrent reload never changes the metadata in the
//! middle of a statement.
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::catalog::CatalogHandle;
//! use sdb_proxy::config::RewriteConfig;
//! use sdb_proxy::query::QueryPipeline;
//! use std::sync::Arc;
//!
//! let handle = Arc::new(CatalogHandle::new(catalog)?);
//! let pipeline = QueryPipeline::new(handle, RewriteConfig::default(), "shop");
//! let output = pipeline.rewrite_sql("SELECT amount FROM orders WHERE amount > 10")?;
//! println!("{}", output.sql);
//! ```

use super::binder::Binder;
use super::emitter::SqlEmitter;
use super::parser::QueryParser;
use super::resolver::Resolver;
use super::rewriter::Rewriter;
use crate::ast::{Statement, StatementTree};
use crate::catalog::{Catalog, CatalogHandle, TableMeta};
use crate::config::RewriteConfig;
use crate::crypto::{CipherScheme, KeyGenerator, OrderPreservingScheme};
use crate::error::{Error, Result};
use log::{debug, info, warn};
use rand::RngCore;
use std::sync::Arc;

/// Result of running one statement through the pipeline
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Backend SQL text
    pub sql: String,

    /// Rewritten statement tree
    pub tree: StatementTree,

    /// Metadata of the table a CREATE statement defines
    pub table: Option<TableMeta>,
}

/// Rewrites client SQL against one database of a shared catalog
pub struct QueryPipeline {
    catalog: Arc<CatalogHandle>,
    config: RewriteConfig,
    database: String,
    parser: QueryParser,
    scheme: Arc<dyn CipherScheme>,
}

impl QueryPipeline {
    /// Create a pipeline using the order-preserving scheme
    ///
    /// # Arguments
    /// * `catalog` - Shared catalog handle
    /// * `config` - Rewriting configuration
    /// * `database` - Database the statements run against
    pub fn new(catalog: Arc<CatalogHandle>, config: RewriteConfig, database: &str) -> Self {
        Self {
            catalog,
            config,
            database: database.to_string(),
            parser: QueryParser::new(),
            scheme: Arc::new(OrderPreservingScheme::new()),
        }
    }

    /// Replace the cipher scheme
    pub fn with_scheme(mut self, scheme: Arc<dyn CipherScheme>) -> Self {
        self.scheme = scheme;
        self
    }

    /// Rewriting configuration
    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Parse, validate, bind and resolve a statement
    pub fn analyze(&self, sql: &str) -> Result<StatementTree> {
        let catalog = self.catalog.snapshot();
        self.analyze_with(&catalog, sql)
    }

    fn analyze_with(&self, catalog: &Catalog, sql: &str) -> Result<StatementTree> {
        let names = self.config.name_match();
        let database = catalog.database(&self.database, names)?;

        let mut tree = self.parser.parse(sql)?;
        tree.validate()?;
        debug!("Parsed statement with {} expression node(s)", tree.arena.len());

        Binder::new(database, names).bind(&mut tree)?;
        Resolver::new(names).resolve(&mut tree)?;
        Ok(tree)
    }

    /// Rewrite one statement into backend SQL
    ///
    /// # Arguments
    /// * `sql` - Client SQL text
    ///
    /// # Returns
    /// The backend SQL, the rewritten tree and, for CREATE, the new table's
    /// metadata
    pub fn rewrite_sql(&self, sql: &str) -> Result<PipelineOutput> {
        self.rewrite_sql_with_rng(sql, &mut rand::rng())
    }

    /// Rewrite one statement drawing key material from `rng`
    pub fn rewrite_sql_with_rng<R: RngCore + ?Sized>(
        &self,
        sql: &str,
        rng: &mut R,
    ) -> Result<PipelineOutput> {
        let result = self.run(sql, rng);
        if let Err(e) = &result {
            warn!("Rewrite failed: {}", e);
        }
        result
    }

    fn run<R: RngCore + ?Sized>(&self, sql: &str, rng: &mut R) -> Result<PipelineOutput> {
        let catalog = self.catalog.snapshot();
        let tree = self.analyze_with(&catalog, sql)?;
        let database = catalog.database(&self.database, self.config.name_match())?;

        let output = Rewriter::new(&self.config, database, self.scheme.as_ref())
            .rewrite_with_rng(&tree, rng)?;
        let sql = SqlEmitter::emit(&output.tree);

        match &output.tree.statement {
            Statement::Select(_) => info!("Rewrote SELECT against database {}", self.database),
            Statement::Create(create) => info!(
                "Rewrote CREATE TABLE {} against database {}",
                create.table_name, self.database
            ),
        }

        Ok(PipelineOutput {
            sql,
            tree: output.tree,
            table: output.table,
        })
    }

    /// Install the table defined by a rewritten CREATE into the catalog
    ///
    /// # Returns
    /// The installed table, or `Err(Error::Catalog)` if the output defines no
    /// table or the table conflicts with the catalog
    pub fn install(&self, output: &PipelineOutput) -> Result<TableMeta> {
        self.install_with_rng(output, &mut rand::rng())
    }

    /// Install a created table, drawing a new reserved key from `rng` if
    /// another table took its slot since the statement was rewritten
    ///
    /// Reserved keys never appear in the emitted CREATE, so moving one to a
    /// free slot does not invalidate the statement sent to the backend.
    pub fn install_with_rng<R: RngCore + ?Sized>(
        &self,
        output: &PipelineOutput,
        rng: &mut R,
    ) -> Result<TableMeta> {
        let mut table = output.table.clone().ok_or_else(|| {
            Error::Catalog("statement does not define a table".to_string())
        })?;
        self.catalog
            .install_table_with(&self.database, self.config.name_match(), |database| {
                let taken = table
                    .reserved_slot()
                    .and_then(|slot| database.slot_owner(&slot));
                if let Some(owner) = taken {
                    let slot = database.next_slot();
                    warn!(
                        "Reserved key slot of table {} is taken by table {}, moving to slot {}",
                        table.name, owner.name, slot
                    );
                    table.set_reserved_key(&KeyGenerator::reserved_key(rng, database, slot));
                }
                Ok(table)
            })
    }
}
