//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing from the environment (`RUST_LOG`, `BAZAAR_LOG_FORMAT`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    self::tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogConfig, LogFormat, UnknownLogFormat};
