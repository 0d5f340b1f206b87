//! Signal preconditioning: PCM-to-float conversion, framerate reduction,
//! mono mixdown, and loudness measurement.
//!
//! The finder never looks at the raw PCM directly; everything downstream of
//! this module works on [`AudioDataFloat`] at a reduced framerate. Reducing
//! the framerate keeps the quadratic-ish correlation work tractable for long
//! tracks while preserving the low-frequency structure that matters for seam
//! perception.

use ebur128::{EbuR128, Mode};
use log::debug;

use crate::config::POW_REF;
use crate::errors::{scratch, FinderError, FinderResult};
use crate::{AudioData, AudioDataFloat, PcmSamples};

/// Converts a power value to a decibel level relative to [`POW_REF`].
#[must_use]
#[inline]
pub fn pow_to_db(power: f32) -> f32 {
    10.0 * (power / POW_REF).log10()
}

/// Boxcar framerate reduction: `reduced[k]` is the mean of
/// `x[k*factor .. (k+1)*factor]`. Output length is `⌊n/factor⌋`.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn reduce_framerate(x: &[f32], factor: usize) -> Vec<f32> {
    if factor <= 1 {
        return x.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let divisor = factor as f32;
    x.chunks_exact(factor)
        .map(|window| window.iter().sum::<f32>() / divisor)
        .collect()
}

/// Caps the frame count so that dividing by the largest allowed reduction
/// factor still respects `length_limit`. Frames past the cap are truncated
/// before reduction.
#[must_use]
#[inline]
pub fn frame_limit(num_frames: usize, reduction_limit: usize, length_limit: usize) -> usize {
    // Integer truncation is intentional here.
    if num_frames / reduction_limit > length_limit {
        length_limit * reduction_limit
    } else {
        num_frames
    }
}

/// Picks the reduction factor actually used: the requested one if it obeys
/// the length limit, otherwise the smallest factor (up to the limit) that
/// brings the reduced length under `length_limit`.
#[must_use]
#[inline]
pub fn reduction_factor_for(
    requested: usize,
    num_frames: usize,
    reduction_limit: usize,
    length_limit: usize,
) -> usize {
    if num_frames / requested > length_limit {
        reduction_limit.min(num_frames.div_ceil(length_limit))
    } else {
        requested
    }
}

fn normalize_sample(samples: &PcmSamples<'_>, index: usize) -> f32 {
    match samples {
        PcmSamples::Int16(s) => f32::from(s[index]) / 32_768.0,
        #[allow(clippy::cast_precision_loss)]
        PcmSamples::Int32(s) => s[index] as f32 / 2_147_483_648.0,
        PcmSamples::Float(s) => s[index],
    }
}

/// De-interleaves `audio` into normalized float stereo at a reduced
/// framerate. Mono input is duplicated into both channels. Only the first
/// `frame_limit` frames participate.
///
/// # Errors
///
/// Fails with [`FinderError::OutOfMemory`] if the channel buffers cannot be
/// allocated.
#[allow(clippy::missing_inline_in_public_items)]
pub fn to_float_stereo(
    audio: &AudioData<'_>,
    frame_limit: usize,
    reduction_factor: usize,
) -> FinderResult<AudioDataFloat> {
    let channels = audio.num_channels as usize;
    let frames = frame_limit.min(audio.num_frames());

    let mut channel0 = scratch(frames)?;
    for (frame, value) in channel0.iter_mut().enumerate() {
        *value = normalize_sample(&audio.samples, frame * channels);
    }

    let channel1 = if channels == 2 {
        let mut channel1 = scratch(frames)?;
        for (frame, value) in channel1.iter_mut().enumerate() {
            *value = normalize_sample(&audio.samples, frame * channels + 1);
        }
        channel1
    } else {
        channel0.clone()
    };

    let channel0 = reduce_framerate(&channel0, reduction_factor);
    let channel1 = reduce_framerate(&channel1, reduction_factor);
    let num_frames = channel0.len();
    Ok(AudioDataFloat {
        channel0,
        channel1,
        mono: None,
        num_frames,
    })
}

/// Fills the mono mixdown, `0.5 * (channel0 + channel1)`.
#[allow(clippy::missing_inline_in_public_items)]
pub fn fill_mono(audio: &mut AudioDataFloat) {
    let mono = audio
        .channel0
        .iter()
        .zip(&audio.channel1)
        .map(|(a, b)| 0.5 * (a + b))
        .collect();
    audio.mono = Some(mono);
}

fn mean_square(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = x.len() as f32;
    x.iter().map(|v| v * v).sum::<f32>() / n
}

/// Average power of the track, mean of the two channels' mean squares.
#[must_use]
#[inline]
pub fn calc_avg_pow(audio: &AudioDataFloat) -> f32 {
    (mean_square(&audio.channel0) + mean_square(&audio.channel1)) / 2.0
}

/// Average volume of the track in decibels.
#[must_use]
#[inline]
pub fn calc_avg_volume(audio: &AudioDataFloat) -> f32 {
    pow_to_db(calc_avg_pow(audio))
}

/// Integrated loudness in LUFS per EBU R 128 / ITU-R BS.1770-4, computed on
/// the interleaved float buffer with the channel layout preserved. The same
/// frame-limit rules as the analysis apply, so very long tracks are
/// downsampled rather than rejected.
///
/// # Errors
///
/// Surfaces [`FinderError::Loudness`] when the loudness engine refuses the
/// buffer; callers are expected to fall back to [`calc_avg_volume`].
#[allow(clippy::missing_inline_in_public_items)]
pub fn integrated_lufs(
    audio: &AudioData<'_>,
    reduction_limit: usize,
    length_limit: usize,
) -> FinderResult<f64> {
    let channels = audio.num_channels as usize;
    let frames = frame_limit(audio.num_frames(), reduction_limit, length_limit);
    let factor = reduction_factor_for(1, frames, reduction_limit, length_limit);

    let reduced_frames = frames / factor;
    let mut interleaved = scratch(reduced_frames * channels)?;
    #[allow(clippy::cast_precision_loss)]
    let divisor = factor as f32;
    for frame in 0..reduced_frames {
        for ch in 0..channels {
            let mut acc = 0.0;
            for j in 0..factor {
                acc += normalize_sample(&audio.samples, (frame * factor + j) * channels + ch);
            }
            interleaved[frame * channels + ch] = acc / divisor;
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rate = (audio.sample_rate / factor as f64).round() as u32;
    #[allow(clippy::cast_possible_truncation)]
    let mut state = EbuR128::new(channels as u32, rate, Mode::I)
        .map_err(|e| FinderError::Loudness(e.to_string()))?;
    state
        .add_frames_f32(&interleaved)
        .map_err(|e| FinderError::Loudness(e.to_string()))?;
    let loudness = state
        .loudness_global()
        .map_err(|e| FinderError::Loudness(e.to_string()))?;
    debug!("integrated loudness: {loudness:.2} LUFS (reduction factor {factor})");
    Ok(loudness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn boxcar_reduction_averages_windows() {
        let x = [1.0, 3.0, 5.0, 7.0, 2.0, 4.0, 9.0];
        assert_eq!(reduce_framerate(&x, 2), vec![2.0, 6.0, 3.0]);
        assert_eq!(reduce_framerate(&x, 1), x.to_vec());
        assert_eq!(reduce_framerate(&x, 8), Vec::<f32>::new());
    }

    #[rstest]
    #[case(1_000, 10, 200, 1_000)] // under the limit, untouched
    #[case(10_000, 10, 200, 2_000)] // truncated to limit * reduction
    #[case(2_000, 10, 200, 2_000)] // exactly at the boundary
    fn frame_limit_truncates(
        #[case] frames: usize,
        #[case] reduction_limit: usize,
        #[case] length_limit: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(frame_limit(frames, reduction_limit, length_limit), expected);
    }

    #[rstest]
    #[case(4, 1_000, 10, 500, 4)] // requested factor respected
    #[case(1, 1_000, 10, 200, 5)] // bumped to honor the length limit
    #[case(1, 10_000, 10, 200, 10)] // capped at the reduction limit
    fn reduction_factor_honors_limits(
        #[case] requested: usize,
        #[case] frames: usize,
        #[case] reduction_limit: usize,
        #[case] length_limit: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(
            reduction_factor_for(requested, frames, reduction_limit, length_limit),
            expected
        );
    }

    #[test]
    fn int16_normalization_is_symmetric() {
        let samples = [i16::MIN, 0, i16::MAX, i16::MAX, 0, i16::MIN];
        let audio = crate::AudioData {
            samples: PcmSamples::Int16(&samples),
            num_channels: 2,
            sample_rate: 44100.0,
        };
        let float = to_float_stereo(&audio, usize::MAX, 1).unwrap();
        assert_eq!(float.num_frames, 3);
        assert_eq!(float.channel0, vec![-1.0, 32767.0 / 32768.0, 0.0]);
        assert_eq!(float.channel1, vec![0.0, 32767.0 / 32768.0, -1.0]);
    }

    #[test]
    fn mono_input_duplicates_channel0() {
        let samples = [0.25f32, -0.5, 0.75];
        let audio = crate::AudioData {
            samples: PcmSamples::Float(&samples),
            num_channels: 1,
            sample_rate: 8000.0,
        };
        let float = to_float_stereo(&audio, usize::MAX, 1).unwrap();
        assert_eq!(float.channel0, float.channel1);
    }

    #[test]
    fn mono_mixdown_is_channel_mean() {
        let mut audio = AudioDataFloat {
            channel0: vec![1.0, 0.0, -1.0],
            channel1: vec![0.0, 0.0, 1.0],
            mono: None,
            num_frames: 3,
        };
        fill_mono(&mut audio);
        assert_eq!(audio.mono.unwrap(), vec![0.5, 0.0, 0.0]);
    }

    #[test]
    fn avg_volume_of_full_scale_square_wave() {
        let audio = AudioDataFloat {
            channel0: vec![1.0; 512],
            channel1: vec![-1.0; 512],
            mono: None,
            num_frames: 512,
        };
        // mean power 1.0 relative to 1e-12 is exactly 120 dB
        let vol = calc_avg_volume(&audio);
        assert!((vol - 120.0).abs() < 1e-4, "{vol} !~= 120");
    }

    #[test]
    fn integrated_loudness_of_sine_is_plausible() {
        let rate = 48_000usize;
        let samples: Vec<f32> = (0..rate * 4)
            .flat_map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = i as f32 / rate as f32;
                let v = (2.0 * std::f32::consts::PI * 997.0 * t).sin();
                [v, v]
            })
            .collect();
        let audio = crate::AudioData {
            samples: PcmSamples::Float(&samples),
            num_channels: 2,
            sample_rate: 48_000.0,
        };
        let lufs = integrated_lufs(&audio, 10, 4_000_000).unwrap();
        // a full-scale 997 Hz stereo sine sits around 0 LUFS
        assert!((-4.0..=1.0).contains(&lufs), "unexpected loudness {lufs}");
    }
}
