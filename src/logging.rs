//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; applications decide where they
//! go. [`init`] installs a `tracing-subscriber` fmt layer in one of three
//! formats, filtered by `RUST_LOG` when set and by the configured level
//! otherwise.
//!
//! ```no_run
//! use orcacam::config::LoggingConfig;
//! use orcacam::logging::{self, LogFormat};
//!
//! logging::init(&LoggingConfig { level: "debug".into(), format: LogFormat::Json })?;
//! tracing::info!("ready");
//! # Ok::<(), String>(())
//! ```

use crate::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line with colors, for interactive use.
    #[default]
    Pretty,
    /// One line per event, no colors.
    Compact,
    /// One JSON object per event.
    Json,
}

/// Parse a level name (`trace` … `error`, any case).
pub fn parse_level(level: &str) -> Result<Level, String> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}

/// Install the global subscriber.
///
/// Calling it again after a subscriber is installed (by this function or
/// anyone else) returns `Ok(())` and changes nothing.
pub fn init(config: &LoggingConfig) -> Result<(), String> {
    let level = parse_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_names(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_thread_names(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_thread_names(true)
            .with_filter(filter)
            .boxed(),
    };

    // An already installed subscriber is fine; tests and embedding
    // applications commonly set their own.
    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("warn").unwrap(), Level::WARN);
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn init_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "chatty".into(),
            format: LogFormat::Pretty,
        };
        assert!(init(&config).is_err());
    }

    #[test]
    fn format_names_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: LogFormat,
        }
        let parsed: Wrapper = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(parsed.format, LogFormat::Json);
    }
}
