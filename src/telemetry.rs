//! Logging setup
//!
//! Installs a `tracing` subscriber with an `EnvFilter` and either
//! human-readable or JSON output. A non-empty `RUST_LOG` replaces the
//! configured level entirely; otherwise the configured level applies and the
//! HTTP stack is held at warn.

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of plain text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Parsed level; unknown names fall back to info
    pub fn level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Install the global subscriber
///
/// Returns false if one was already installed (e.g. by the host application
/// or an earlier call), in which case nothing changes.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = build_filter(config, std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref());

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };
    result.is_ok()
}

fn build_filter(config: &LogConfig, rust_log: Option<&str>) -> EnvFilter {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::builder().parse_lossy(directives);
    }

    let level = LevelFilter::from_level(config.level());
    let mut filter = EnvFilter::default().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        let config = |level: &str| LogConfig {
            level: level.to_string(),
            json: false,
        };
        assert_eq!(config("DEBUG").level(), Level::DEBUG);
        assert_eq!(config("warn").level(), Level::WARN);
        assert_eq!(config("verbose").level(), Level::INFO);
    }

    #[test]
    fn test_rust_log_takes_precedence() {
        let config = LogConfig {
            level: "error".to_string(),
            json: false,
        };

        let filter = build_filter(&config, Some("quotecache=trace,reqwest=debug")).to_string();
        assert!(filter.contains("quotecache=trace"));
        assert!(filter.contains("reqwest=debug"));
        assert!(!filter.contains("error"));

        let filter = build_filter(&config, Some("  ")).to_string();
        assert!(filter.contains("error"));
        assert!(filter.contains("hyper=warn"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }
}
