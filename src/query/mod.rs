//! Query processing module
//!
//! This module turns client SQL into backend SQL over the encrypted storage
//! layout.
//!
//! The query processing module consists of:
//! - `parser`: SQL text lowered into the statement model
//! - `binder`: column references bound to catalog metadata
//! - `resolver`: view-column and alias references linked to their producers
//! - `rewriter`: ciphertext-domain rewriting of the analyzed tree
//! - `emitter`: statement model rendered back to SQL text
//! - `pipeline`: the stages above run against one catalog snapshot
//!
//! # Workflow
//!
//! 1. **Parse**: Lower the SQL text into a [`StatementTree`](crate::ast::StatementTree)
//! 2. **Bind**: Attach type, sensitivity and key of every base column
//! 3. **Resolve**: Link view columns and aliases to the expressions producing them
//! 4. **Rewrite**: Map the tree onto ciphertext columns and functions
//! 5. **Emit**: Render the rewritten tree as backend SQL
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::query::QueryPipeline;
//!
//! let output = pipeline.rewrite_sql("SELECT a + b FROM T1 JOIN T2 ON T1.id = T2.id")?;
//! assert!(output.sql.contains("sdb_add"));
//! ```

pub mod binder;
pub mod emitter;
pub mod parser;
pub mod pipeline;
pub mod resolver;
pub mod rewriter;

// Re-export main types for convenience
pub use binder::Binder;
pub use emitter::SqlEmitter;
pub use parser::QueryParser;
pub use pipeline::{PipelineOutput, QueryPipeline};
pub use resolver::Resolver;
pub use rewriter::{RewriteOutput, Rewriter};
