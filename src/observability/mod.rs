pub mod token_counter;

use crate::config::FeaturesConfig;
use crate::protocol::anthropic::{StopReason, Usage};
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `json` switches the formatter to one JSON object per line. A second call
/// is a no-op.
pub fn init_tracing(log_level: &str, json: bool) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// [`init_tracing`] from the `features` section of the config.
pub fn init_from_config(features: &FeaturesConfig) {
    init_tracing(&features.log_level, features.log_format.eq_ignore_ascii_case("json"));
}

/// Log usage for a completed stream, computing duration from start time.
pub fn log_stream_complete(
    model: &str,
    usage: &Usage,
    stop_reason: StopReason,
    start_time: std::time::Instant,
) {
    token_counter::log_stream_usage(model, usage, stop_reason, start_time.elapsed());
}
