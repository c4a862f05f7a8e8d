//! SDB Proxy: query analysis and rewriting over encrypted columns
//!
//! This library is the core of a transparent SQL proxy. Clients send plain
//! SQL; sensitive columns are stored at the backend as ciphertexts, and the
//! proxy rewrites each statement so that the backend evaluates it over
//! ciphertexts while computing the same result.
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::catalog::{CatalogHandle, CatalogStorage};
//! use sdb_proxy::config::RewriteConfig;
//! use sdb_proxy::query::QueryPipeline;
//! use std::sync::Arc;
//!
//! let catalog = CatalogStorage::new().load("catalog.json")?;
//! let handle = Arc::new(CatalogHandle::new(catalog)?);
//! let pipeline = QueryPipeline::new(handle, RewriteConfig::default(), "shop");
//!
//! let output = pipeline.rewrite_sql("SELECT sum(amount) FROM orders WHERE amount > 10")?;
//! println!("{}", output.sql);
//! ```

/// SDB Proxy version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Main modules
pub mod ast;
pub mod catalog;
pub mod config;
pub mod crypto;
pub mod error;
pub mod query;
pub mod types;
pub mod utils;

pub use config::RewriteConfig;
pub use error::{Error, Result};
pub use query::{PipelineOutput, QueryPipeline};
