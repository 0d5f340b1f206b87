//! Runtime core for looplab: the gapless loop player, runtime
//! configuration, and the logger.
//!
//! The analysis side of the project lives in `looplab-analysis`; this crate
//! owns everything that runs at playback time plus the shared plumbing the
//! front-ends need.

pub mod config;
pub mod errors;
pub mod logger;
pub mod player;

use std::path::PathBuf;

/// The per-user configuration directory for looplab.
///
/// # Errors
///
/// Fails when the platform has no conventional config location.
#[inline]
pub fn get_config_dir() -> Result<PathBuf, errors::SettingsError> {
    directories::ProjectDirs::from("", "", "looplab")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(errors::SettingsError::NoConfigDir)
}

/// Formats a duration in seconds as `m:ss.mmm`, for log lines and tables.
#[must_use]
#[inline]
pub fn format_duration(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor();
    let rest = seconds - minutes * 60.0;
    format!("{minutes:.0}:{rest:06.3}")
}
