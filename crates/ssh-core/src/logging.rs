//! Tracing setup with a runtime-adjustable level.

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt};

use crate::error::{SshCoreError, SshResult};

static RELOAD: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Install the global subscriber. `RUST_LOG` wins; otherwise `info`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_to_str(LevelFilter::INFO)));
    let (filter, handle) = reload::Layer::new(env_filter);
    if tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
    {
        let _ = RELOAD.set(handle);
    }
}

/// Apply `level` at runtime unless `RUST_LOG` is set, which keeps precedence.
///
/// Returns whether the level was applied.
pub fn set_level(level: LevelFilter) -> bool {
    if rust_log_present() {
        return false;
    }
    match RELOAD.get() {
        Some(handle) => handle.reload(EnvFilter::new(level_to_str(level))).is_ok(),
        None => false,
    }
}

pub fn parse_level(name: &str) -> SshResult<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "off" => Ok(LevelFilter::OFF),
        "error" => Ok(LevelFilter::ERROR),
        "warn" | "warning" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        "trace" => Ok(LevelFilter::TRACE),
        other => Err(SshCoreError::InvalidLevel(other.to_string())),
    }
}

fn rust_log_present() -> bool {
    matches!(std::env::var("RUST_LOG"), Ok(s) if !s.trim().is_empty())
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "off",
        LevelFilter::ERROR => "error",
        LevelFilter::WARN => "warn",
        LevelFilter::DEBUG => "debug",
        LevelFilter::TRACE => "trace",
        _ => "info",
    }
}
