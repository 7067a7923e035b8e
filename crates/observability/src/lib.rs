//! Tracing/logging (shared setup).

/// Initialize process-wide logging with JSON output on stdout.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    self::tracing::init();
}

/// Tracing configuration (filters, format, log file).
pub mod tracing;

pub use self::tracing::{DEFAULT_LOG_FILE, LogFormat, LogInitError, LogOptions, init_with};
