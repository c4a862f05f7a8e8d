//! Utilities module
//!
//! This module provides utilities shared by the binary:
//! - Logging setup
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::utils::Logger;
//!
//! // Initialize logger
//! Logger::init();
//! ```

pub mod logger;

// Re-export main types for convenience
pub use logger::Logger;
