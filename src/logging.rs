//! Structured logging setup.
//!
//! Every runtime event is emitted through `tracing` with structured fields
//! (`connection_id`, `seq_num`, `handler_name`, ...). This module wires those
//! events to stdout, either as JSON lines for production or pretty-printed
//! for development, with optional sampling and a non-blocking writer.
//!
//! ## Environment Variables
//!
//! | Variable                   | Values                         | Default   |
//! |----------------------------|--------------------------------|-----------|
//! | `MAYRPC_LOG_LEVEL`         | trace/debug/info/warn/error    | `info`    |
//! | `MAYRPC_LOG_FORMAT`        | json/pretty                    | `json`    |
//! | `MAYRPC_LOG_SAMPLING_MODE` | all/error-only/sampled         | `all`     |
//! | `MAYRPC_LOG_SAMPLING_RATE` | 0.0-1.0                        | `1.0`     |
//! | `MAYRPC_LOG_ASYNC`         | true/false                     | `true`    |
//! | `MAYRPC_LOG_TARGET_FILTER` | comma-separated directives     | unset     |
//!
//! `RUST_LOG`, when set, takes precedence over `MAYRPC_LOG_LEVEL`.

use anyhow::{Context, Result};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Level, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Which events reach the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Everything that passes the level filter
    All,
    /// WARN and ERROR only
    ErrorOnly,
    /// Every WARN/ERROR plus a fraction of the rest
    Sampled,
}

impl SamplingMode {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error-only" | "error_only" => SamplingMode::ErrorOnly,
            "sampled" => SamplingMode::Sampled,
            _ => SamplingMode::All,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    pub sampling_mode: SamplingMode,
    /// Fraction (0.0-1.0) of non-error events kept in `Sampled` mode
    pub sampling_rate: f64,
    /// Write through a background thread instead of blocking the caller
    pub async_logging: bool,
    /// Extra `EnvFilter` directives, comma-separated
    pub target_filter: Option<String>,
    /// Include file:line location
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            sampling_mode: SamplingMode::All,
            sampling_rate: 1.0,
            async_logging: true,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    /// Read configuration from `MAYRPC_LOG_*` variables, defaulting the rest.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: env::var("MAYRPC_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: env::var("MAYRPC_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.format),
            sampling_mode: env::var("MAYRPC_LOG_SAMPLING_MODE")
                .map(|s| SamplingMode::parse(&s))
                .unwrap_or(defaults.sampling_mode),
            sampling_rate: env::var("MAYRPC_LOG_SAMPLING_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.sampling_rate),
            async_logging: env::var("MAYRPC_LOG_ASYNC")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.async_logging),
            target_filter: env::var("MAYRPC_LOG_TARGET_FILTER").ok(),
            include_location: defaults.include_location,
        }
    }

    /// Verbose, synchronous, human-readable output for local runs
    #[must_use]
    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            async_logging: false,
            include_location: true,
            ..Self::default()
        }
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Drops a deterministic share of low-severity events.
pub struct SamplingLayer {
    mode: SamplingMode,
    sampling_rate: f64,
    counter: AtomicU64,
}

impl SamplingLayer {
    #[must_use]
    pub fn new(mode: SamplingMode, sampling_rate: f64) -> Self {
        Self {
            mode,
            sampling_rate: sampling_rate.clamp(0.0, 1.0),
            counter: AtomicU64::new(0),
        }
    }

    fn should_sample(&self, metadata: &Metadata<'_>) -> bool {
        let severe = matches!(*metadata.level(), Level::WARN | Level::ERROR);
        match self.mode {
            SamplingMode::All => true,
            SamplingMode::ErrorOnly => severe,
            SamplingMode::Sampled => {
                if severe {
                    return true;
                }
                if self.sampling_rate <= 0.0 {
                    return false;
                }
                let interval = (1.0 / self.sampling_rate) as u64;
                let count = self.counter.fetch_add(1, Ordering::Relaxed);
                interval > 0 && count % interval == 0
            }
        }
    }
}

impl<S> Layer<S> for SamplingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: LayerContext<'_, S>) -> bool {
        // Spans are never sampled away; only events are.
        !metadata.is_event() || self.should_sample(metadata)
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level().as_str()));

    if let Some(targets) = &config.target_filter {
        for directive in targets.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(_) => eprintln!("Warning: Invalid log filter directive: {directive}"),
            }
        }
    }
    filter
}

/// Install the global subscriber.
///
/// With `async_logging` the returned guard owns the background writer; keep
/// it alive until exit or buffered lines are lost.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with_config(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = if config.async_logging {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer),
            Some(guard),
        )
    } else {
        (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout),
            None,
        )
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(SamplingLayer::new(config.sampling_mode, config.sampling_rate))
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// Install logging configured from the environment.
pub fn init_logging() -> Result<Option<WorkerGuard>> {
    init_logging_with_config(&LogConfig::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::callsite::Identifier;
    use tracing::metadata::Kind;

    struct TestCallsite;
    impl tracing::callsite::Callsite for TestCallsite {
        fn set_interest(&self, _: tracing::subscriber::Interest) {}
        fn metadata(&self) -> &Metadata<'_> {
            unimplemented!()
        }
    }
    static CALLSITE: TestCallsite = TestCallsite;

    fn event_meta(level: Level) -> Metadata<'static> {
        Metadata::new(
            "test",
            "mayrpc::test",
            level,
            None,
            None,
            None,
            tracing::field::FieldSet::new(&[], Identifier(&CALLSITE)),
            Kind::EVENT,
        )
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("invalid"), LogFormat::Json);
    }

    #[test]
    fn test_sampling_mode_parse() {
        assert_eq!(SamplingMode::parse("all"), SamplingMode::All);
        assert_eq!(SamplingMode::parse("error-only"), SamplingMode::ErrorOnly);
        assert_eq!(SamplingMode::parse("error_only"), SamplingMode::ErrorOnly);
        assert_eq!(SamplingMode::parse("sampled"), SamplingMode::Sampled);
        assert_eq!(SamplingMode::parse("whatever"), SamplingMode::All);
    }

    #[test]
    fn test_error_only_keeps_warn_and_error() {
        let layer = SamplingLayer::new(SamplingMode::ErrorOnly, 1.0);
        assert!(layer.should_sample(&event_meta(Level::ERROR)));
        assert!(layer.should_sample(&event_meta(Level::WARN)));
        assert!(!layer.should_sample(&event_meta(Level::INFO)));
        assert!(!layer.should_sample(&event_meta(Level::DEBUG)));
    }

    #[test]
    fn test_sampled_keeps_one_in_interval() {
        let layer = SamplingLayer::new(SamplingMode::Sampled, 0.25);
        let kept = (0..100)
            .filter(|_| layer.should_sample(&event_meta(Level::INFO)))
            .count();
        assert_eq!(kept, 25);
        assert!(layer.should_sample(&event_meta(Level::ERROR)));

        let silent = SamplingLayer::new(SamplingMode::Sampled, 0.0);
        assert!(!silent.should_sample(&event_meta(Level::INFO)));
    }

    #[test]
    fn test_dev_config_is_synchronous_and_verbose() {
        let config = LogConfig::default_dev();
        assert_eq!(config.level(), Level::DEBUG);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(!config.async_logging);
        assert_eq!(LogConfig::default().level(), Level::INFO);
    }
}
