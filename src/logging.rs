//! Logging and tracing infrastructure for diagscrub.
//!
//! Structured logging through the tracing crate. Library code only emits
//! events; embedding applications call one of the `init_*` functions once.

use std::sync::Once;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber.
///
/// Subsequent calls are ignored. Filtering follows `RUST_LOG`, falling back
/// to `info`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true);

        // try_init: an embedding application may already own the global subscriber
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();

        info!("diagscrub tracing initialized");
    });
}

/// Initialize tracing with JSON output for structured logging.
pub fn init_tracing_json() {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();

        info!("diagscrub tracing initialized (JSON mode)");
    });
}

/// Span wrapping all work done on one archive.
#[macro_export]
macro_rules! archive_span {
    ($name:expr) => {
        tracing::info_span!("archive", archive = %$name)
    };
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!("archive", archive = %$name, $($field)*)
    };
}

/// Log an error and hand it back, for use in `map_err` chains.
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let e = $err;
        tracing::error!(error = %e, "Operation failed");
        e
    }};
    ($err:expr, $msg:expr) => {{
        let e = $err;
        tracing::error!(error = %e, context = $msg, "Operation failed");
        e
    }};
}
