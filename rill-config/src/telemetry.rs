//! Tracing subscriber setup.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::LogSettings;

/// Installs the global subscriber described by `settings`.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this again
/// once a subscriber is installed leaves the existing one in place.
pub fn init_tracing(settings: &LogSettings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|err| anyhow!("invalid log level '{}': {err}", settings.level))?,
    };
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if settings.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
