//! Shared tracing configuration for the vexel workspace.
//!
//! Executables, integration tests and tools install their `tracing`
//! subscriber through this crate so the logging surface stays consistent
//! across binaries instead of each one re-assembling builder logic.

use std::env;
use std::error::Error;
use std::fmt;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format choices for the formatter layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// How the shared subscriber should behave
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Tracing directives (e.g. `vexel_engine=debug,info`). When absent
    /// the crate falls back to `RUST_LOG` and then to `default_directive`.
    pub directives: Option<String>,
    /// Fallback when neither `directives` nor `RUST_LOG` parse
    pub default_directive: String,
    /// Include event targets (module paths) in output
    pub include_targets: bool,
    /// ANSI formatting; disable for CI log collection
    pub ansi: bool,
    /// Formatter layer choice
    pub output: TracingOutput,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Tuned for local development: pretty, ANSI-enabled.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            output: TracingOutput::Pretty,
        }
    }

    /// Tuned for CI: compact, no colour codes.
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: false,
            output: TracingOutput::Compact,
        }
    }

    /// Build from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `VEXEL_TRACING_PROFILE` - `local` (default) or `ci`
    /// - `VEXEL_TRACING_DIRECTIVES` - overrides tracing directives
    /// - `VEXEL_TRACING_FORMAT` - `pretty` or `compact`
    pub fn from_env() -> Self {
        let profile = env::var("VEXEL_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("VEXEL_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }
        if let Ok(format) = env::var("VEXEL_TRACING_FORMAT") {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
            }
        }
        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        if let Some(directives) = &self.directives {
            EnvFilter::try_new(directives)
                .map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
        } else {
            match EnvFilter::try_from_default_env() {
                Ok(filter) => Ok(filter),
                Err(_) => Ok(EnvFilter::new(self.default_directive.clone())),
            }
        }
    }
}

/// Errors surfaced when subscriber configuration fails
#[derive(Debug)]
pub enum TracingSetupError {
    /// The provided directive string could not be parsed
    InvalidFilter(String),
    /// Installing the global subscriber failed (usually already set)
    SubscriberInit(tracing_subscriber::util::TryInitError),
}

impl fmt::Display for TracingSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingSetupError::InvalidFilter(msg) => {
                write!(f, "invalid tracing directive: {msg}")
            }
            TracingSetupError::SubscriberInit(err) => {
                write!(f, "failed to install global tracing subscriber: {err}")
            }
        }
    }
}

impl Error for TracingSetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TracingSetupError::SubscriberInit(err) => Some(err),
            _ => None,
        }
    }
}

/// Build a subscriber from `config`.
pub fn build_subscriber(
    config: &TracingConfig,
) -> Result<Box<dyn Subscriber + Send + Sync>, TracingSetupError> {
    let filter = config.resolve_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_targets)
        .with_ansi(config.ansi);

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.output {
        TracingOutput::Compact => Box::new(builder.compact().finish()),
        TracingOutput::Pretty => Box::new(builder.pretty().finish()),
    };
    Ok(subscriber)
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment-variable tests share process state; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn reset_env() {
        for key in [
            "VEXEL_TRACING_PROFILE",
            "VEXEL_TRACING_DIRECTIVES",
            "VEXEL_TRACING_FORMAT",
            "RUST_LOG",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn rejects_invalid_directive() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_env();
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        assert!(matches!(
            build_subscriber(&config),
            Err(TracingSetupError::InvalidFilter(_))
        ));
    }

    #[test]
    fn builds_with_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_env();
        assert!(build_subscriber(&TracingConfig::default()).is_ok());
    }

    #[test]
    fn from_env_respects_profile_and_format() {
        let _guard = ENV_LOCK.lock().unwrap();
        reset_env();
        env::set_var("VEXEL_TRACING_PROFILE", "ci");
        env::set_var("VEXEL_TRACING_FORMAT", "compact");
        env::set_var("VEXEL_TRACING_DIRECTIVES", "vexel_engine=debug");

        let config = TracingConfig::from_env();
        assert!(!config.ansi);
        assert_eq!(config.output, TracingOutput::Compact);
        assert_eq!(config.directives.as_deref(), Some("vexel_engine=debug"));
        reset_env();
    }
}
