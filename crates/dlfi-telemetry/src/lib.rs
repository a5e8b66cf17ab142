//! Structured logging setup shared by every other crate in this workspace.
//!
//! Components log through `tracing` spans/events; this crate only wires the
//! subscriber. Nothing in the archive engine depends on this crate — it is
//! wired in by whatever binary or embedder initializes logging, the same
//! separation of concerns as the teacher's own telemetry crate.

#![warn(missing_docs)]

use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Errors raised initializing the global tracing subscriber.
#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("global tracing subscriber already set")]
    AlreadySet,
}

/// Install a JSON-formatted `tracing` subscriber reading its filter from
/// `RUST_LOG` (defaulting to `info`). Safe to call once per process; a second
/// call is a no-op.
pub fn init_json_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true);
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// True once a global subscriber has been installed by this or any other crate.
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic_on_repeated_calls() {
        init_json_logging();
        init_json_logging();
        assert!(is_initialized());
    }
}
