//! # Linetab Utilities
//!
//! Shared utilities, logging, and config helpers for Linetab.
//!
//! The decoder library only emits `tracing` events; this crate owns the
//! subscriber that turns them into output, so binaries pick a format and
//! level once at startup.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
