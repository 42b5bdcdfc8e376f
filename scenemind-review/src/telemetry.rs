//! Tracing subscriber setup for the `scenemind` binary.

use scenemind_core::config::TelemetryConfig;
use tracing_subscriber::EnvFilter;

use crate::error::{ReviewError, Result};

/// Filter from `level`, falling back to `info` when it does not parse.
#[must_use]
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Logs go to stderr so stdout stays clean
/// for `--json` reports.
///
/// # Errors
/// [`ReviewError::Telemetry`] if a global subscriber is already set.
pub fn init_tracing(telemetry: &TelemetryConfig, log_level: &str) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(log_level))
        .with_writer(std::io::stderr);
    let installed = if telemetry.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ReviewError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_falls_back_to_info() {
        assert_eq!(build_filter("scenemind=loudest").to_string(), "info");
        assert_eq!(build_filter("debug").to_string(), "debug");
    }
}
