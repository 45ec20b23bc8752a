//! Structured logging for herbtrace
//!
//! A `tracing` subscriber with an env filter and either a compact or a JSON
//! formatter. Log lines carry `batch_id`, `revision` and `transition`
//! fields wherever a batch is involved.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    /// Write log lines to stderr
    pub enable_console: bool,
    /// One JSON object per line instead of the compact format
    pub json_format: bool,
    /// Filter directive, e.g. `info` or `herbtrace=debug,sqlx=warn`
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "herbtrace".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            enable_console: true,
            json_format: false,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// `LOG_LEVEL` (falling back to `RUST_LOG`), `LOG_JSON`, `LOG_CONSOLE`
    pub fn from_env() -> Self {
        Self {
            enable_console: std::env::var("LOG_CONSOLE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            json_format: std::env::var("LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
            ..Self::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Fails if one is already set.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::registry().with(config.filter());

    if !config.enable_console {
        subscriber.try_init()?;
        return Ok(());
    }

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr);
        subscriber.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr);
        subscriber.with(fmt_layer).try_init()?;
    }

    tracing::debug!(
        service = %config.service_name,
        version = %config.service_version,
        "logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_compact_info() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "herbtrace");
        assert_eq!(config.log_level, "info");
        assert!(config.enable_console);
        assert!(!config.json_format);
    }

    #[test]
    fn bad_filter_falls_back_to_info() {
        let config = TelemetryConfig {
            log_level: "herbtrace=[".into(),
            ..TelemetryConfig::default()
        };
        assert_eq!(
            config.filter().max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::INFO)
        );
    }
}
