//! Process-wide logging setup.

/// Initialize tracing for the process from `RUST_LOG` and `LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .map(|v| tracing::LogFormat::parse(&v))
        .unwrap_or_default();
    tracing::init(format);
}

/// Subscriber configuration (filters, output format).
pub mod tracing;
