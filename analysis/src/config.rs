//! Tunable parameters for the loop finder.

/// Reference power level used in decibel calculations.
pub const POW_REF: f32 = 1e-12;

/// Which endpoint estimates are available to constrain the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LoopMode {
    /// No estimates; search the whole track.
    Auto,
    /// Both a start and an end estimate.
    T1T2,
    /// Only a start estimate.
    T1Only,
    /// Only an end estimate.
    T2Only,
}

/// A snapshot of every knob the finder exposes.
///
/// Every analysis entry point takes the config by reference and runs on a
/// [`sanitized`](Self::sanitized) copy, so out-of-range values are clamped
/// rather than rejected. Estimates are in seconds; `-1.0` means "absent".
#[derive(Debug, Clone, PartialEq)]
pub struct LoopFinderConfig {
    /// How many base duration (lag) candidates to return.
    pub n_best_durations: usize,
    /// How many start/end pairs to return per duration.
    pub n_best_pairs: usize,

    /// Seconds to ignore at the head of the sliding-MSE curve.
    pub left_ignore: f32,
    /// Seconds to ignore at the tail of the sliding-MSE curve.
    pub right_ignore: f32,

    /// Tolerance on the amplitude gap between a pair's start and end frames.
    pub sample_diff_tol: f32,
    /// Minimum seconds of harmonic similarity for a pair to count as a loop.
    pub min_loop_length: f32,
    /// Minimum spacing in seconds for non-minimum suppression.
    pub min_time_diff: f32,

    /// FFT size per spectrogram window. Must be a power of two.
    pub fft_length: usize,
    /// Spectrogram window overlap, as a fraction in `[0, 1)`.
    pub overlap_percent: f32,

    /// Estimated loop start in seconds, or `-1.0` for none.
    pub t1_estimate: f32,
    /// Estimated loop end in seconds, or `-1.0` for none.
    pub t2_estimate: f32,

    /// Allowed deviation in seconds from the estimated duration.
    pub tau_radius: f32,
    /// Allowed deviation in seconds from the estimated start.
    pub t1_radius: f32,
    /// Allowed deviation in seconds from the estimated end.
    pub t2_radius: f32,

    // Penalties are in [0, 1]. 0 weights everything inside the radius
    // equally; 1 forbids any deviation from the estimate; in between, loss
    // grows linearly with deviation at slope `penalty / (1 - penalty)`.
    pub tau_penalty: f32,
    pub t1_penalty: f32,
    pub t2_penalty: f32,

    /// Detect and truncate a trailing fade before analysis.
    pub use_fade_detection: bool,
    /// Run the differencing kernels on the mono mixdown instead of per channel.
    pub use_mono_audio: bool,
    /// Requested framerate reduction factor.
    pub framerate_reduction_factor: usize,
    /// Largest reduction factor allowed before resorting to truncation.
    pub framerate_reduction_limit: usize,
    /// Cap on the reduced frame count.
    pub length_limit: usize,

    /// Regularization for the energy denominator of the noise-weighted MSE.
    pub noise_regularization: f32,
    /// Regularization for the loss-to-confidence sigmoid.
    pub confidence_regularization: f32,
    /// Decibel level the track's average volume is shifted to before
    /// spectrum comparisons; bins below 0 dB after the shift are ignored.
    pub db_level: f32,
}

impl Default for LoopFinderConfig {
    #[inline]
    fn default() -> Self {
        Self {
            n_best_durations: 12,
            n_best_pairs: 5,
            left_ignore: 5.0,
            right_ignore: 5.0,
            sample_diff_tol: 0.05,
            min_loop_length: 5.0,
            min_time_diff: 0.1,
            fft_length: 1 << 15,
            overlap_percent: 0.5,
            t1_estimate: -1.0,
            t2_estimate: -1.0,
            tau_radius: 1.0,
            t1_radius: 1.0,
            t2_radius: 1.0,
            tau_penalty: 0.0,
            t1_penalty: 0.0,
            t2_penalty: 0.0,
            use_fade_detection: false,
            use_mono_audio: true,
            framerate_reduction_factor: 6,
            framerate_reduction_limit: 10,
            length_limit: 4_000_000,
            noise_regularization: 1e-3,
            confidence_regularization: 2.5,
            db_level: 60.0,
        }
    }
}

impl LoopFinderConfig {
    /// Returns a copy with every field clamped to its legal range.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn sanitized(&self) -> Self {
        let mut cfg = self.clone();
        cfg.n_best_durations = cfg.n_best_durations.max(1);
        cfg.n_best_pairs = cfg.n_best_pairs.max(1);
        cfg.left_ignore = floor_at(cfg.left_ignore, 0.0);
        cfg.right_ignore = floor_at(cfg.right_ignore, 0.0);
        cfg.sample_diff_tol = floor_at(cfg.sample_diff_tol, 0.0);
        cfg.min_loop_length = floor_at(cfg.min_loop_length, 0.0);
        cfg.min_time_diff = floor_at(cfg.min_time_diff, 0.0);
        cfg.fft_length = crate::spectra::next_pow2(cfg.fft_length.max(16));
        cfg.overlap_percent = cfg.overlap_percent.clamp(0.0, 0.99);
        if cfg.t1_estimate < 0.0 {
            cfg.t1_estimate = -1.0;
        }
        if cfg.t2_estimate < 0.0 {
            cfg.t2_estimate = -1.0;
        }
        cfg.tau_radius = floor_at(cfg.tau_radius, 0.0);
        cfg.t1_radius = floor_at(cfg.t1_radius, 0.0);
        cfg.t2_radius = floor_at(cfg.t2_radius, 0.0);
        cfg.tau_penalty = cfg.tau_penalty.clamp(0.0, 1.0);
        cfg.t1_penalty = cfg.t1_penalty.clamp(0.0, 1.0);
        cfg.t2_penalty = cfg.t2_penalty.clamp(0.0, 1.0);
        cfg.framerate_reduction_factor = cfg.framerate_reduction_factor.max(1);
        cfg.framerate_reduction_limit = cfg
            .framerate_reduction_limit
            .max(cfg.framerate_reduction_factor);
        cfg.length_limit = cfg.length_limit.max(1);
        cfg.noise_regularization = floor_at(cfg.noise_regularization, 0.0);
        cfg.confidence_regularization = floor_at(cfg.confidence_regularization, 0.0);
        cfg
    }

    #[must_use]
    #[inline]
    pub fn has_t1_estimate(&self) -> bool {
        self.t1_estimate >= 0.0
    }

    #[must_use]
    #[inline]
    pub fn has_t2_estimate(&self) -> bool {
        self.t2_estimate >= 0.0
    }

    /// The loop mode implied by which estimates are present.
    #[must_use]
    #[inline]
    pub fn loop_mode(&self) -> LoopMode {
        match (self.has_t1_estimate(), self.has_t2_estimate()) {
            (false, false) => LoopMode::Auto,
            (true, true) => LoopMode::T1T2,
            (true, false) => LoopMode::T1Only,
            (false, true) => LoopMode::T2Only,
        }
    }

    /// Loss slope per second of deviation from an estimate. A penalty of 1
    /// maps to an infinite slope: no deviation is tolerated.
    #[must_use]
    #[inline]
    pub fn slope_from_penalty(penalty: f32) -> f32 {
        if penalty >= 1.0 {
            f32::INFINITY
        } else {
            penalty / (1.0 - penalty)
        }
    }
}

fn floor_at(value: f32, min: f32) -> f32 {
    if value.is_nan() { min } else { value.max(min) }
}
