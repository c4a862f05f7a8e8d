//! Logging setup
//!
//! The library only emits records through the `log` facade. Installing a
//! logger is left to the binary, which calls [`Logger::init`] once at start.
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::utils::Logger;
//!
//! Logger::init();
//! log::info!("proxy started");
//! ```

use log::LevelFilter;

/// Logger installation helpers
pub struct Logger;

impl Logger {
    /// Install `env_logger` at `info`, overridable through `RUST_LOG`
    pub fn init() {
        Self::init_with_level(LevelFilter::Info);
    }

    /// Install `env_logger` with a default level
    ///
    /// `RUST_LOG` still takes precedence over `level`. Installing twice is a
    /// no-op.
    ///
    /// # Arguments
    /// * `level` - Level used when `RUST_LOG` is unset
    pub fn init_with_level(level: LevelFilter) {
        let _ = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .try_init();
    }

    /// Default level for a verbosity count (`-v` flags)
    pub fn level_for(verbosity: u8) -> LevelFilter {
        match verbosity {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_init_twice() {
        Logger::init();
        Logger::init_with_level(LevelFilter::Debug);
        log::info!("logger installed");
    }

    #[test]
    fn test_level_for() {
        assert_eq!(Logger::level_for(0), LevelFilter::Info);
        assert_eq!(Logger::level_for(1), LevelFilter::Debug);
        assert_eq!(Logger::level_for(4), LevelFilter::Trace);
    }
}
