//! Tracing and structured logging (shared setup).

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, formats, worker spans).
pub mod tracing;

pub use self::tracing::{LogFormat, worker_span};
