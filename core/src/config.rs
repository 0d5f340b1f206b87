//! Runtime configuration.
//!
//! Settings come from a `Looplab.toml` (created with defaults on first run)
//! layered with `LOOPLAB_`-prefixed environment variables. The `[finder]`
//! section is an overlay: unset keys keep the analysis crate's defaults.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use std::path::PathBuf;

use looplab_analysis::LoopFinderConfig;

use crate::errors::SettingsError;
use crate::player::WrapMode;

pub static DEFAULT_CONFIG: &str = include_str!("../Looplab.toml");

#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Overrides for the loop finder's tunables.
    #[serde(default)]
    pub finder: FinderSettings,
    /// Playback behavior.
    #[serde(default)]
    pub player: PlayerSettings,
}

impl Settings {
    /// Loads settings from the given config file plus `LOOPLAB_`-prefixed
    /// environment variables (e.g. `LOOPLAB_FINDER__FFT_LENGTH`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    #[inline]
    pub fn init(config: PathBuf) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(config))
            .add_source(Environment::with_prefix("LOOPLAB").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    /// The default config file path, created with the default contents if it
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Fails when the config directory cannot be located or created.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn get_config_path() -> Result<PathBuf, SettingsError> {
        let config_dir = crate::get_config_dir()?;
        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir)?;
        }
        let config_file = config_dir.join("Looplab.toml");
        if !config_file.exists() {
            std::fs::write(&config_file, DEFAULT_CONFIG)?;
        }
        Ok(config_file)
    }
}

/// Overrides for [`LoopFinderConfig`]; every key is optional and unset keys
/// keep the finder's defaults.
#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct FinderSettings {
    pub n_best_durations: Option<usize>,
    pub n_best_pairs: Option<usize>,
    pub left_ignore: Option<f32>,
    pub right_ignore: Option<f32>,
    pub sample_diff_tol: Option<f32>,
    pub min_loop_length: Option<f32>,
    pub min_time_diff: Option<f32>,
    pub fft_length: Option<usize>,
    pub overlap_percent: Option<f32>,
    pub t1_estimate: Option<f32>,
    pub t2_estimate: Option<f32>,
    pub tau_radius: Option<f32>,
    pub t1_radius: Option<f32>,
    pub t2_radius: Option<f32>,
    pub tau_penalty: Option<f32>,
    pub t1_penalty: Option<f32>,
    pub t2_penalty: Option<f32>,
    pub use_fade_detection: Option<bool>,
    pub use_mono_audio: Option<bool>,
    pub framerate_reduction_factor: Option<usize>,
    pub framerate_reduction_limit: Option<usize>,
    pub length_limit: Option<usize>,
    pub noise_regularization: Option<f32>,
    pub confidence_regularization: Option<f32>,
    pub db_level: Option<f32>,
}

impl FinderSettings {
    /// Applies the overlay onto the finder's default configuration.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items, clippy::too_many_lines)]
    pub fn to_config(&self) -> LoopFinderConfig {
        let mut cfg = LoopFinderConfig::default();
        if let Some(v) = self.n_best_durations {
            cfg.n_best_durations = v;
        }
        if let Some(v) = self.n_best_pairs {
            cfg.n_best_pairs = v;
        }
        if let Some(v) = self.left_ignore {
            cfg.left_ignore = v;
        }
        if let Some(v) = self.right_ignore {
            cfg.right_ignore = v;
        }
        if let Some(v) = self.sample_diff_tol {
            cfg.sample_diff_tol = v;
        }
        if let Some(v) = self.min_loop_length {
            cfg.min_loop_length = v;
        }
        if let Some(v) = self.min_time_diff {
            cfg.min_time_diff = v;
        }
        if let Some(v) = self.fft_length {
            cfg.fft_length = v;
        }
        if let Some(v) = self.overlap_percent {
            cfg.overlap_percent = v;
        }
        if let Some(v) = self.t1_estimate {
            cfg.t1_estimate = v;
        }
        if let Some(v) = self.t2_estimate {
            cfg.t2_estimate = v;
        }
        if let Some(v) = self.tau_radius {
            cfg.tau_radius = v;
        }
        if let Some(v) = self.t1_radius {
            cfg.t1_radius = v;
        }
        if let Some(v) = self.t2_radius {
            cfg.t2_radius = v;
        }
        if let Some(v) = self.tau_penalty {
            cfg.tau_penalty = v;
        }
        if let Some(v) = self.t1_penalty {
            cfg.t1_penalty = v;
        }
        if let Some(v) = self.t2_penalty {
            cfg.t2_penalty = v;
        }
        if let Some(v) = self.use_fade_detection {
            cfg.use_fade_detection = v;
        }
        if let Some(v) = self.use_mono_audio {
            cfg.use_mono_audio = v;
        }
        if let Some(v) = self.framerate_reduction_factor {
            cfg.framerate_reduction_factor = v;
        }
        if let Some(v) = self.framerate_reduction_limit {
            cfg.framerate_reduction_limit = v;
        }
        if let Some(v) = self.length_limit {
            cfg.length_limit = v;
        }
        if let Some(v) = self.noise_regularization {
            cfg.noise_regularization = v;
        }
        if let Some(v) = self.confidence_regularization {
            cfg.confidence_regularization = v;
        }
        if let Some(v) = self.db_level {
            cfg.db_level = v;
        }
        cfg
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerSettings {
    /// Loop-end comparison, `strict` or `inclusive`.
    pub wrap_mode: WrapMode,
    /// Initial volume multiplier; 1.0 is unity.
    pub volume_multiplier: f64,
}

impl Default for PlayerSettings {
    #[inline]
    fn default() -> Self {
        Self {
            wrap_mode: WrapMode::default(),
            volume_multiplier: 1.0,
        }
    }
}
