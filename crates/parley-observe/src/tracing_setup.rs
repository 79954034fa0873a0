//! Tracing subscriber initialization with structured logging.
//!
//! # Usage
//!
//! ```no_run
//! use parley_types::config::LoggingConfig;
//!
//! parley_observe::tracing_setup::init_tracing(&LoggingConfig::default()).unwrap();
//! ```

use parley_types::config::{LogFormat, LoggingConfig};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// - Filter directives come from `RUST_LOG` when it is set, otherwise from
///   `config.filter`.
/// - `LogFormat::Pretty` installs a human-readable `fmt` layer with target
///   visibility and span close timing; `LogFormat::Json` emits one JSON
///   object per event.
///
/// # Errors
///
/// Returns an error if the filter directives do not parse or the global
/// subscriber has already been set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let directives = select_directives(std::env::var("RUST_LOG").ok(), &config.filter);
    let env_filter = EnvFilter::try_new(&directives)?;

    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_events(FmtSpan::CLOSE);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init()?;
        }
    }

    tracing::debug!(filter = %directives, format = ?config.format, "Tracing initialized");
    Ok(())
}

/// `RUST_LOG` wins over the configured filter unless it is blank.
fn select_directives(env: Option<String>, configured: &str) -> String {
    match env {
        Some(env) if !env.trim().is_empty() => env,
        _ => configured.to_string(),
    }
}
