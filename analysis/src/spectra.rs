//! Power spectra and spectrogram differencing.
//!
//! Spectrum comparisons happen in the decibel domain, shifted so the track's
//! average volume sits at the configured reference level; bins that fall
//! below 0 dB after the shift carry no perceptual weight and are excluded
//! from the MSE.

use rustfft::{num_complex::Complex, FftPlanner};

use crate::errors::{scratch, FinderResult};
use crate::prep::pow_to_db;

/// Highest frequency (Hz) compared between spectra. Seam audibility is
/// dominated by content well below this.
pub const FMAX: f32 = 10_000.0;

/// Floor applied to powers before decibel conversion, so empty bins come out
/// around -180 dB instead of -inf.
const POWER_FLOOR: f32 = 1e-30;

/// The next power of two at or above `n`.
#[must_use]
#[inline]
pub fn next_pow2(n: usize) -> usize {
    n.next_power_of_two()
}

/// In-place rectangular smoothing with the given radius. Window bounds are
/// clamped at the edges, so edge values average over fewer neighbors.
#[allow(clippy::missing_inline_in_public_items)]
pub fn smoothen(signal: &mut [f32], radius: usize) {
    if radius == 0 || signal.len() < 2 {
        return;
    }
    let source = signal.to_vec();
    for (i, slot) in signal.iter_mut().enumerate() {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius + 1).min(source.len());
        #[allow(clippy::cast_precision_loss)]
        let mean = source[lo..hi].iter().sum::<f32>() / (hi - lo) as f32;
        *slot = mean;
    }
}

/// Power spectrum of a signal up to `fmax`, zero-padded to the next power of
/// two. Returns bins `0 ..= ⌈fmax·N/Fs⌉` (capped at Nyquist).
///
/// # Errors
///
/// Fails with [`crate::FinderError::OutOfMemory`] if the FFT buffer cannot be
/// allocated.
#[allow(clippy::missing_inline_in_public_items)]
pub fn power_spectrum(
    signal: &[f32],
    framerate: f32,
    fmax: f32,
    planner: &mut FftPlanner<f32>,
) -> FinderResult<Vec<f32>> {
    if signal.is_empty() {
        return Ok(Vec::new());
    }
    let n = next_pow2(signal.len());
    let mut buf: Vec<Complex<f32>> = scratch(n)?;
    for (slot, &v) in buf.iter_mut().zip(signal) {
        *slot = Complex::new(v, 0.0);
    }
    planner.plan_fft_forward(n).process(&mut buf);

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let fmax_bin = ((fmax * n as f32 / framerate).ceil() as usize).min(n / 2);
    Ok(buf[..=fmax_bin].iter().map(|c| c.norm_sqr()).collect())
}

/// Decibel-domain MSE between two power spectra over their shared bins.
/// `db_shift` moves both spectra so that the track's average volume maps to
/// the configured reference level; bins not above 0 dB in both spectra after
/// the shift are ignored. Returns 0 when no bin qualifies.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn spectrum_mse(a: &[f32], b: &[f32], db_shift: f32) -> f32 {
    let mut acc = 0.0f64;
    let mut count = 0usize;
    for (&pa, &pb) in a.iter().zip(b) {
        let da = pow_to_db(pa.max(POWER_FLOOR)) + db_shift;
        let db = pow_to_db(pb.max(POWER_FLOOR)) + db_shift;
        if da > 0.0 && db > 0.0 {
            acc += f64::from(da - db) * f64::from(da - db);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let mse = (acc / count as f64) as f32;
        mse
    }
}

/// Window-wise decibel MSEs between the spectrograms of a signal and a
/// lag-shifted copy of itself.
#[derive(Debug, Clone, Default)]
pub struct DiffSpectrogram {
    /// Spectrum MSE per window.
    pub mses: Vec<f32>,
    /// Starting frame of each window, in the unlagged signal.
    pub start_samples: Vec<usize>,
    /// Frame count of each window (the last one may be partial).
    pub window_sizes: Vec<usize>,
    /// Overlap-adjusted duration of each window in seconds: the difference
    /// of consecutive start frames, except the last window which counts its
    /// own raw duration.
    pub effective_window_durations: Vec<f32>,
}

impl DiffSpectrogram {
    #[must_use]
    #[inline]
    pub fn n_windows(&self) -> usize {
        self.mses.len()
    }
}

/// Compares windowed spectra of `signal[..n−lag]` against
/// `signal[lag..]`, window by window.
///
/// Windows are `fft_length` frames with a hop of
/// `fft_length · (1 − overlap_percent)`; the trailing partial window is
/// kept. A lag at or past the signal length yields an empty result.
///
/// # Errors
///
/// Propagates scratch allocation failure from the FFT stage.
#[allow(clippy::missing_inline_in_public_items)]
pub fn diff_spectrogram(
    signal: &[f32],
    lag: usize,
    framerate: f32,
    fft_length: usize,
    overlap_percent: f32,
    db_shift: f32,
) -> FinderResult<DiffSpectrogram> {
    let n = signal.len();
    if lag >= n {
        return Ok(DiffSpectrogram::default());
    }
    let compared = n - lag;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let hop = ((fft_length as f32 * (1.0 - overlap_percent)).round() as usize).max(1);

    // One planner for the whole spectrogram; rustfft memoizes plans per size,
    // so the repeated full-size windows share a single plan.
    let mut planner = FftPlanner::new();

    let mut result = DiffSpectrogram::default();
    let mut start = 0;
    while start < compared {
        let window = fft_length.min(compared - start);
        let spectrum_a = power_spectrum(
            &signal[start..start + window],
            framerate,
            FMAX,
            &mut planner,
        )?;
        let spectrum_b = power_spectrum(
            &signal[lag + start..lag + start + window],
            framerate,
            FMAX,
            &mut planner,
        )?;
        result.mses.push(spectrum_mse(&spectrum_a, &spectrum_b, db_shift));
        result.start_samples.push(start);
        result.window_sizes.push(window);
        start += hop;
    }

    let n_windows = result.n_windows();
    result.effective_window_durations = (0..n_windows)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            if i + 1 < n_windows {
                (result.start_samples[i + 1] - result.start_samples[i]) as f32 / framerate
            } else {
                result.window_sizes[i] as f32 / framerate
            }
        })
        .collect();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1)]
    #[case(5, 8)]
    #[case(1024, 1024)]
    #[case(1025, 2048)]
    fn next_pow2_rounds_up(#[case] n: usize, #[case] expected: usize) {
        assert_eq!(next_pow2(n), expected);
    }

    #[test]
    fn smoothen_is_a_clamped_moving_average() {
        let mut signal = [0.0, 0.0, 3.0, 0.0, 0.0];
        smoothen(&mut signal, 1);
        assert_eq!(signal, [0.0, 1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn power_spectrum_peaks_at_the_signal_frequency() {
        let framerate = 8000.0f32;
        let freq = 1000.0f32;
        let n = 1024usize;
        let signal: Vec<f32> = (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = i as f32 / framerate;
                (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect();
        let mut planner = FftPlanner::new();
        let spectrum = power_spectrum(&signal, framerate, 4000.0, &mut planner).unwrap();
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        #[allow(clippy::cast_precision_loss)]
        let expected = (freq * n as f32 / framerate).round() as usize;
        assert_eq!(peak, expected);
    }

    #[test]
    fn identical_spectra_have_zero_mse() {
        let spectrum = vec![1.0, 0.5, 0.25, 1e-6];
        assert_eq!(spectrum_mse(&spectrum, &spectrum, 0.0), 0.0);
    }

    #[test]
    fn quiet_bins_are_excluded_from_the_mse() {
        // with a strong negative shift no bin clears 0 dB
        let a = vec![1.0, 0.5];
        let b = vec![0.25, 0.125];
        assert_eq!(spectrum_mse(&a, &b, -500.0), 0.0);
        // with a positive shift the bins differ and the mse is positive
        assert!(spectrum_mse(&a, &b, 0.0) > 0.0);
    }

    #[test]
    fn diff_spectrogram_of_periodic_signal_matches_at_the_period() {
        let period = 512usize;
        let framerate = 8000.0f32;
        let signal: Vec<f32> = (0..8192)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let phase = (i % period) as f32 / period as f32;
                (2.0 * std::f32::consts::PI * phase).sin()
            })
            .collect();
        let spec = diff_spectrogram(&signal, period, framerate, 1024, 0.5, 120.0).unwrap();
        assert!(spec.n_windows() > 1);
        for (i, &mse) in spec.mses.iter().enumerate() {
            assert!(mse < 1.0, "window {i} mse {mse}");
        }
        // hop bookkeeping: starts advance by fft_length/2, durations match
        assert_eq!(spec.start_samples[1] - spec.start_samples[0], 512);
        assert!((spec.effective_window_durations[0] - 512.0 / framerate).abs() < 1e-6);
        let last = spec.n_windows() - 1;
        #[allow(clippy::cast_precision_loss)]
        let last_duration = spec.window_sizes[last] as f32 / framerate;
        assert!((spec.effective_window_durations[last] - last_duration).abs() < 1e-6);
    }

    #[test]
    fn diff_spectrogram_with_lag_past_the_end_is_empty() {
        let signal = vec![0.0f32; 64];
        let spec = diff_spectrogram(&signal, 64, 8000.0, 32, 0.5, 0.0).unwrap();
        assert_eq!(spec.n_windows(), 0);
    }
}
