//! Structured logging bootstrap.
//!
//! Initializes a single global `tracing` subscriber from the crate's
//! [`crate::config::LoggingConfig`], matching the teacher's
//! `tracing_v4::init_from_config` pattern. Console output is human-readable
//! by default; set `RUST_LOG` to override the configured level with an
//! env-filter directive string.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber.
///
/// Idempotent: a second call (e.g. from a test harness that also
/// initializes logging) is not an error.
pub fn init(config: &LoggingConfig) -> Result<(), String> {
    let level = parse_level(&config.level)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str(level)));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_ansi(config.path.is_none())
        .with_filter(env_filter);

    let result = tracing_subscriber::registry().with(fmt_layer).try_init();
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(format!("failed to initialize tracing: {e}")),
    }
}

fn parse_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(format!(
            "invalid log level '{other}': must be one of trace, debug, info, warn, error"
        )),
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels_case_insensitively() {
        assert!(matches!(parse_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_level("Warn"), Ok(Level::WARN)));
        assert!(parse_level("bogus").is_err());
    }
}
