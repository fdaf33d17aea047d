// src/logging.rs

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Installs the global subscriber once.
///
/// Level comes from `RUST_LOG`, e.g. `RUST_LOG=debug,valkey_guard=trace`;
/// defaults to `info`.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        tracing::info!("Logging initialized");
    });
}

/// Logs one admission decision
#[macro_export]
macro_rules! admission_event {
    ($algorithm:expr, $key:expr, $allowed:expr, $remaining:expr) => {
        tracing::debug!(
            algorithm = $algorithm,
            key = $key,
            allowed = $allowed,
            remaining = $remaining,
            "Admission decision"
        )
    };
}

/// Logs a storage operation with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
