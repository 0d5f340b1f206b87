//! Automatic loop-point finder for musical audio.
//!
//! Given a track that is meant to loop seamlessly (game soundtracks, ambient
//! beds), [`find_loop`] proposes a ranked list of `(start_frame, end_frame)`
//! pairs such that splicing from the end frame back to the start frame is
//! inaudible. The pipeline: convert the PCM to reduced-framerate float stereo,
//! score every candidate lag with a noise-weighted sliding MSE, then for the
//! best lags compare the track against its lag-shifted self window-by-window
//! in the spectral domain, infer the loop region, refine endpoints, and turn
//! the per-lag losses into normalized confidences.
//!
//! The finder is an offline batch over a whole track; it consumes decoded PCM
//! (16/32-bit int or 32-bit float, interleaved, mono or stereo) and knows
//! nothing about container formats or playback.

#![deny(clippy::missing_inline_in_public_items)]

pub mod candidates;
pub mod config;
pub mod differencing;
pub mod errors;
pub mod fade;
pub mod prep;
pub mod spectra;
pub mod synthesis;

use std::sync::atomic::AtomicBool;

use log::{debug, warn};

pub use config::{LoopFinderConfig, LoopMode};
pub use errors::{FinderError, FinderResult};
pub use synthesis::LoopResult;

/// Sample encodings the finder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SampleFormat {
    Int16,
    Int32,
    Float,
}

/// Borrowed interleaved PCM, one variant per supported sample format.
#[derive(Debug, Clone, Copy)]
pub enum PcmSamples<'a> {
    Int16(&'a [i16]),
    Int32(&'a [i32]),
    Float(&'a [f32]),
}

impl PcmSamples<'_> {
    /// Total number of samples, counted across all channels.
    #[must_use]
    #[inline]
    pub const fn len(&self) -> usize {
        match self {
            Self::Int16(s) => s.len(),
            Self::Int32(s) => s.len(),
            Self::Float(s) => s.len(),
        }
    }

    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    #[inline]
    pub const fn format(&self) -> SampleFormat {
        match self {
            Self::Int16(_) => SampleFormat::Int16,
            Self::Int32(_) => SampleFormat::Int32,
            Self::Float(_) => SampleFormat::Float,
        }
    }
}

/// A decoded audio track, as handed to the finder. Caller-owned and
/// immutable for the duration of the analysis.
#[derive(Debug, Clone, Copy)]
pub struct AudioData<'a> {
    /// Interleaved sample data.
    pub samples: PcmSamples<'a>,
    /// Number of channels in `samples`. Must be 1 or 2.
    pub num_channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: f64,
}

impl AudioData<'_> {
    /// Number of frames (samples per channel).
    #[must_use]
    #[inline]
    pub const fn num_frames(&self) -> usize {
        self.samples.len() / self.num_channels as usize
    }
}

/// De-interleaved stereo float audio in `[-1, 1]`, at the reduced framerate
/// the analysis runs at.
#[derive(Debug, Clone, Default)]
pub struct AudioDataFloat {
    pub channel0: Vec<f32>,
    pub channel1: Vec<f32>,
    /// `0.5 * (channel0 + channel1)`, filled by [`prep::fill_mono`].
    pub mono: Option<Vec<f32>>,
    /// Post-reduction frame count.
    pub num_frames: usize,
}

impl AudioDataFloat {
    /// The mono mixdown, falling back to channel 0 if it has not been filled.
    #[must_use]
    #[inline]
    pub fn mono_signal(&self) -> &[f32] {
        self.mono.as_deref().unwrap_or(&self.channel0)
    }
}

/// Finds and ranks possible loop points for a track.
///
/// Candidates come back ordered by ascending base duration (ties by ascending
/// first start frame); the entry with the highest confidence is the best
/// guess. All frame values in the result are in the track's original
/// framerate, even though the analysis itself runs at a reduced one.
///
/// When estimates are present in `config` the search is constrained to their
/// neighborhoods and deviation from the estimates is penalized; see
/// [`LoopFinderConfig`].
///
/// # Errors
///
/// Fails fast on malformed input (zero-length audio, more than two channels,
/// interleave not divisible by the channel count) and on scratch-buffer
/// allocation failure. An analysis that simply finds nothing is *not* an
/// error: the result is empty and flagged degenerate.
#[inline]
pub fn find_loop(audio: &AudioData<'_>, config: &LoopFinderConfig) -> FinderResult<LoopResult> {
    find_loop_with_cancel(audio, config, &AtomicBool::new(false))
}

/// [`find_loop`] with a cancellation flag.
///
/// Cancellation is coarse: the flag is consulted before each lag's
/// spectrogram pass, so raising it aborts the analysis within one lag's
/// worth of work and surfaces [`FinderError::Cancelled`].
///
/// # Errors
///
/// As [`find_loop`], plus [`FinderError::Cancelled`].
#[allow(clippy::missing_inline_in_public_items)]
pub fn find_loop_with_cancel(
    audio: &AudioData<'_>,
    config: &LoopFinderConfig,
    cancel: &AtomicBool,
) -> FinderResult<LoopResult> {
    let cfg = config.sanitized();

    if audio.num_channels == 0 || audio.num_channels > 2 {
        return Err(FinderError::UnsupportedChannelLayout(audio.num_channels));
    }
    if audio.samples.is_empty() {
        return Err(FinderError::EmptySamples);
    }
    if audio.samples.len() % audio.num_channels as usize != 0 {
        return Err(FinderError::RaggedInterleave {
            samples: audio.samples.len(),
            channels: audio.num_channels,
        });
    }

    let frame_limit = prep::frame_limit(
        audio.num_frames(),
        cfg.framerate_reduction_limit,
        cfg.length_limit,
    );
    let reduction_factor = prep::reduction_factor_for(
        cfg.framerate_reduction_factor,
        frame_limit,
        cfg.framerate_reduction_limit,
        cfg.length_limit,
    );
    debug!(
        "analyzing {} frames at {} Hz ({} format), framerate reduced by {reduction_factor}",
        frame_limit,
        audio.sample_rate,
        audio.samples.format()
    );

    let mut float = prep::to_float_stereo(audio, frame_limit, reduction_factor)?;
    prep::fill_mono(&mut float);

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let effective_framerate = (audio.sample_rate / reduction_factor as f64) as f32;

    if cfg.use_fade_detection {
        if let Some(fade_start) = fade::detect_fade(&float) {
            debug!("fade detected at reduced frame {fade_start}, truncating");
            float.channel0.truncate(fade_start);
            float.channel1.truncate(fade_start);
            if let Some(mono) = &mut float.mono {
                mono.truncate(fade_start);
            }
            float.num_frames = fade_start;
        }
    }

    let avg_pow = prep::calc_avg_pow(&float);
    // A silent track has no meaningful volume reference; leave spectra unshifted.
    let db_shift = if avg_pow > 0.0 {
        cfg.db_level - prep::pow_to_db(avg_pow)
    } else {
        warn!("track has zero average power");
        0.0
    };

    let mut result = synthesis::run(&float, &cfg, effective_framerate, db_shift, cancel)?;
    result.scale_frames(reduction_factor);
    Ok(result)
}
