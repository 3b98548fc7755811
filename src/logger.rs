//! Logging initialisation via tracing-subscriber.
//!
//! The effective level comes from, in order: `-v` flags, `RUST_LOG`,
//! `LATERAL_LOG_LEVEL`, `server.log_level`. Config and env values are
//! checked at load time with [`validate_level`] so a typo fails startup with
//! the name of the setting instead of silently logging nothing.

use std::fmt;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// HTTP client internals that flood `debug`. Capped at `warn` unless the
/// level is `trace` or the filter comes from `RUST_LOG`.
const NOISY_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "h2=warn", "rustls=warn", "reqwest=warn"];

/// Where a level string came from; named in validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSource {
    Env,
    Config,
}

impl fmt::Display for LevelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Env => "LATERAL_LOG_LEVEL",
            Self::Config => "server.log_level",
        })
    }
}

/// Initialise the global tracing subscriber.
///
/// If `prefer_level` is `true` (a `-v` flag was given), `level` wins and
/// `RUST_LOG` is only a fallback when `level` does not parse. Otherwise
/// `RUST_LOG` wins and `level` is the fallback.
pub fn init(level: &str, prefer_level: bool) -> Result<(), AppError> {
    let filter = if prefer_level {
        match level_filter(level) {
            Ok(filter) => filter,
            Err(level_err) => EnvFilter::try_from_default_env().map_err(|env_err| {
                AppError::Logger(format!("{level_err}; RUST_LOG parse failed: {env_err}"))
            })?,
        }
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => level_filter(level)?,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Filter for a configured level, with [`NOISY_TARGETS`] capped below
/// `trace`.
fn level_filter(level: &str) -> Result<EnvFilter, AppError> {
    let directives = filter_directives(level);
    EnvFilter::try_new(&directives)
        .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))
}

fn filter_directives(level: &str) -> String {
    if parse_level(level).is_ok_and(|l| l != LevelFilter::TRACE && l != LevelFilter::OFF) {
        format!("{level},{}", NOISY_TARGETS.join(","))
    } else {
        level.to_string()
    }
}

/// Parse a bare level name (`"error"` .. `"trace"`, `"off"`).
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

/// Accept a bare level or a full filter directive such as
/// `"info,lateral::subsystems::search=debug"`. A bare word that is not a
/// level is rejected even though `EnvFilter` would read it as a target.
pub fn validate_level(level: &str, source: LevelSource) -> Result<(), AppError> {
    let parts_ok = !level.trim().is_empty()
        && level
            .split(',')
            .all(|part| parse_level(part.trim()).is_ok() || part.contains('='));
    if parts_ok && EnvFilter::try_new(level).is_ok() {
        Ok(())
    } else {
        Err(AppError::Logger(format!("{source}: invalid log level '{level}'")))
    }
}
