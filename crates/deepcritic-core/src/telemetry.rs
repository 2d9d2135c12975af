use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::DeepCriticError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

/// Configuration options when initialising telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Filter directive used when `RUST_LOG` is unset (e.g. the configured `logging.level`).
    pub default_filter: Option<String>,
    pub with_ansi: bool,
    pub with_target: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            default_filter: None,
            with_ansi: true,
            with_target: false,
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// Safe to call multiple times; only the first invocation installs the subscriber.
/// `RUST_LOG` always wins over the configured level.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), DeepCriticError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or(options.default_filter)
        .unwrap_or_else(|| "info".to_string());

    fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_ansi(options.with_ansi)
        .with_target(options.with_target)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| {
            DeepCriticError::InvalidConfiguration(format!("telemetry init failed: {err}"))
        })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}
