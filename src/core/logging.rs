//! core::logging
//!
//! Tracing subscriber setup for applications embedding the cache.
//!
//! The library itself only emits `tracing` events. Call [`init`] once near
//! program start to print them; later calls are no-ops. `RUST_LOG` takes
//! precedence over the filter passed in.

use anyhow::{Context, Result};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, Registry};

use super::config::CacheConfig;

/// Filter used when neither `RUST_LOG` nor the caller supplies one.
pub const DEFAULT_FILTER: &str = "strata=info";

/// Install a global fmt subscriber filtered by `RUST_LOG`, else `filter`,
/// else [`DEFAULT_FILTER`].
///
/// # Errors
///
/// Fails when `filter` is not a valid filter directive.
pub fn init(filter: Option<&str>) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => {
            let directive = filter.unwrap_or(DEFAULT_FILTER);
            EnvFilter::try_new(directive)
                .with_context(|| format!("invalid log filter '{directive}'"))?
        }
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber).ok();
    Ok(())
}

/// [`init`] with the filter configured in `config`.
pub fn init_from_config(config: &CacheConfig) -> Result<()> {
    init(config.log_filter.as_deref())
}
