//! Tracing/logging setup shared by ledger binaries.

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::LogFormat;

/// Initialize process-wide JSON logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize process-wide logging in the given format.
pub fn init_with(format: LogFormat) {
    tracing::init_with(format);
}
