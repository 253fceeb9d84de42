/*!
 * Structured Tracing
 * Subscriber setup and correlation ids for batch and messenger logs
 *
 * Environment variables:
 * - RUST_LOG: log level filter (default: info)
 * - GATHERKIT_TRACE_JSON: `1` or `true` for JSON output
 */

use std::error::Error as StdError;
use tracing::info;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Environment switch for JSON output
pub const ENV_TRACE_JSON: &str = "GATHERKIT_TRACE_JSON";

fn json_requested() -> bool {
    std::env::var(ENV_TRACE_JSON)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false)
}

/// Install the global subscriber, failing if one is already set
pub fn try_init_tracing() -> Result<(), Box<dyn StdError + Send + Sync + 'static>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    if json_requested() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
        info!("structured tracing initialized with JSON output");
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
        info!("structured tracing initialized");
    }
    Ok(())
}

/// Install the global subscriber; a second call is a no-op
pub fn init_tracing() {
    if let Err(e) = try_init_tracing() {
        tracing::debug!(error = %e, "tracing already initialized");
    }
}

/// Unique id for correlating the log lines of one batch
pub fn generate_trace_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        assert!(try_init_tracing().is_err());
    }

    #[test]
    fn test_trace_ids_unique() {
        assert_ne!(generate_trace_id(), generate_trace_id());
    }
}
