//! Tracing and logging setup shared by every memberflow process.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize with human-readable output (operator terminals).
pub fn init_pretty() {
    tracing::init(LogFormat::Pretty);
}

pub use self::tracing::LogFormat;

/// Tracing configuration (filters, layers).
pub mod tracing;
