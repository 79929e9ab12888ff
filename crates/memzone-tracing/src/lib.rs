//! Shared tracing configuration for the memzone workspace.
//!
//! Binaries, integration tests and embedding runtimes install their `tracing` subscriber through
//! this crate so the device workers' logs look the same everywhere.

pub mod wait;

use std::env;
use std::time::Duration;

pub use wait::WaitTimer;

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Configuration describing how the shared tracing subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Optional tracing directives (e.g. `memzone_backends=trace,info`). When absent the crate
    /// falls back to `RUST_LOG` and finally to [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    /// Fallback directive used when neither `directives` nor `RUST_LOG` resolve to a filter.
    pub default_directive: String,
    /// Controls whether event targets (module paths) appear in output.
    pub include_targets: bool,
    /// Controls whether the emitting thread's name appears in output. Worker threads are named
    /// after their zone, so this is on by default.
    pub include_thread_names: bool,
    /// Controls ANSI formatting. Disable for CI logs that strip colour codes.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Output format for the formatter layer.
    pub output: TracingOutput,
    /// Blocking waits longer than this are reported at `warn` by [`WaitTimer`].
    pub slow_wait_threshold: Duration,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, ANSI-enabled output for local development.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            include_thread_names: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            slow_wait_threshold: wait::DEFAULT_SLOW_WAIT,
        }
    }

    /// JSON output without ANSI codes for CI and log collection.
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            include_thread_names: true,
            ansi: false,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Json,
            slow_wait_threshold: wait::DEFAULT_SLOW_WAIT,
        }
    }

    /// Build a configuration using environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `MEMZONE_TRACING_PROFILE` - Profile preset: `local` (default) or `ci`
    /// - `MEMZONE_TRACING_DIRECTIVES` - Overrides tracing directives
    /// - `MEMZONE_TRACING_FORMAT` - Output format: `pretty`, `compact`, or `json`
    /// - `MEMZONE_SLOW_WAIT_US` - Slow-wait threshold in microseconds
    pub fn from_env() -> Self {
        let profile = env::var("MEMZONE_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("MEMZONE_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var("MEMZONE_TRACING_FORMAT") {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if matches!(config.output, TracingOutput::Json) {
                    config.ansi = false;
                }
            }
        }

        if let Ok(threshold) = env::var("MEMZONE_SLOW_WAIT_US") {
            if let Ok(us) = threshold.trim().parse::<u64>() {
                config.slow_wait_threshold = Duration::from_micros(us);
            }
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

/// Errors surfaced when configuring the shared tracing subscriber fails.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    /// The provided directive string could not be parsed.
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),
    /// Installing the global subscriber failed (usually because one is already set).
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a `tracing` subscriber using the provided configuration.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    Ok(Registry::default().with(format_layer(config)).with(filter))
}

fn format_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_thread_names(config.include_thread_names)
        .with_span_events(config.span_events.clone());

    match config.output {
        TracingOutput::Compact => Box::new(layer.compact().with_ansi(config.ansi)),
        TracingOutput::Pretty => Box::new(layer.pretty().with_ansi(config.ansi)),
        TracingOutput::Json => Box::new(layer.json().with_ansi(false)),
    }
}

/// Install the configured subscriber as the process-wide default and apply its slow-wait
/// threshold.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?.try_init()?;
    wait::set_slow_wait_threshold(config.slow_wait_threshold);
    Ok(())
}

/// Output format choices for the tracing formatter layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_env(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn rejects_invalid_directive() {
        reset_env(&["MEMZONE_TRACING_DIRECTIVES", "RUST_LOG"]);
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        let result = build_subscriber(&config);
        assert!(matches!(result, Err(TracingSetupError::InvalidFilter(_))));
    }

    #[test]
    #[serial]
    fn builds_with_defaults() {
        reset_env(&["RUST_LOG"]);
        assert!(build_subscriber(&TracingConfig::default()).is_ok());
        assert!(build_subscriber(&TracingConfig::for_ci()).is_ok());
    }

    #[test]
    #[serial]
    fn from_env_respects_profile_and_format() {
        reset_env(&[
            "MEMZONE_TRACING_PROFILE",
            "MEMZONE_TRACING_FORMAT",
            "MEMZONE_TRACING_DIRECTIVES",
        ]);

        env::set_var("MEMZONE_TRACING_PROFILE", "ci");
        env::set_var("MEMZONE_TRACING_FORMAT", "compact");
        env::set_var("MEMZONE_TRACING_DIRECTIVES", "memzone_backends=trace");

        let config = TracingConfig::from_env();
        assert_eq!(config.directives.as_deref(), Some("memzone_backends=trace"));
        assert!(!config.ansi);
        assert_eq!(config.output, TracingOutput::Compact);

        reset_env(&[
            "MEMZONE_TRACING_PROFILE",
            "MEMZONE_TRACING_FORMAT",
            "MEMZONE_TRACING_DIRECTIVES",
        ]);
    }

    #[test]
    #[serial]
    fn json_format_disables_ansi() {
        reset_env(&["MEMZONE_TRACING_PROFILE", "MEMZONE_TRACING_DIRECTIVES"]);
        env::set_var("MEMZONE_TRACING_FORMAT", "json");

        let config = TracingConfig::from_env();
        assert_eq!(config.output, TracingOutput::Json);
        assert!(!config.ansi);

        reset_env(&["MEMZONE_TRACING_FORMAT"]);
    }

    #[test]
    #[serial]
    fn from_env_reads_slow_wait_threshold() {
        env::set_var("MEMZONE_SLOW_WAIT_US", "1500");
        assert_eq!(TracingConfig::from_env().slow_wait_threshold, Duration::from_micros(1500));

        env::set_var("MEMZONE_SLOW_WAIT_US", "soon");
        assert_eq!(TracingConfig::from_env().slow_wait_threshold, wait::DEFAULT_SLOW_WAIT);

        reset_env(&["MEMZONE_SLOW_WAIT_US"]);
    }

    #[test]
    fn unknown_format_is_ignored() {
        assert_eq!(TracingOutput::from_env_value("xml"), None);
        assert_eq!(TracingOutput::from_env_value(" Pretty "), Some(TracingOutput::Pretty));
    }
}
