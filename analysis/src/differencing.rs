//! Sliding-window differencing kernels.
//!
//! The workhorse is the noise-weighted sliding mean squared error: for every
//! relative shift between a signal and a (possibly lagged) copy, the sum of
//! squared differences over the overlap, divided by the total energy of the
//! two overlapping stretches plus a regularizer. Straight MSE favors quiet
//! sections; dividing by local energy makes the metric a dimensionless
//! "relative match quality" so silent regions don't dominate.
//!
//! Squared-error sums are never computed directly: the numerator expands to
//! `‖a‖² + ‖b‖² − 2·(a ⋆ b)`, with the cross-correlation done by FFT and the
//! energies by prefix sums.

use rustfft::{num_complex::Complex, FftPlanner};

use crate::errors::{scratch, FinderResult};
use crate::spectra::next_pow2;
use crate::AudioDataFloat;

/// Per-shift overlap energies of two signals, from f64 prefix sums.
///
/// Shift indices follow the correlation convention used throughout this
/// module: index `k` corresponds to lag `ℓ = k − (nB − 1)`, i.e. `a[i]` is
/// compared against `b[i − ℓ]`, for `k ∈ [0, nA + nB − 1)`.
struct OverlapEnergies {
    prefix_a: Vec<f64>,
    prefix_b: Vec<f64>,
}

impl OverlapEnergies {
    fn new(a: &[f32], b: &[f32]) -> Self {
        let prefix = |x: &[f32]| {
            let mut p = Vec::with_capacity(x.len() + 1);
            p.push(0.0f64);
            let mut acc = 0.0f64;
            for &v in x {
                acc += f64::from(v) * f64::from(v);
                p.push(acc);
            }
            p
        };
        Self {
            prefix_a: prefix(a),
            prefix_b: prefix(b),
        }
    }

    /// Energy of the overlapping stretch of `a` and of `b` at shift index `k`.
    fn at(&self, k: usize) -> (f64, f64) {
        let n_a = self.prefix_a.len() - 1;
        let n_b = self.prefix_b.len() - 1;
        #[allow(clippy::cast_possible_wrap)]
        let lag = k as isize - (n_b as isize - 1);
        #[allow(clippy::cast_sign_loss)]
        let a_lo = lag.max(0) as usize;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        let a_hi = (n_a as isize).min(n_b as isize + lag).max(0) as usize;
        if a_lo >= a_hi {
            return (0.0, 0.0);
        }
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        let b_lo = (a_lo as isize - lag) as usize;
        let b_hi = b_lo + (a_hi - a_lo);
        (
            self.prefix_a[a_hi] - self.prefix_a[a_lo],
            self.prefix_b[b_hi] - self.prefix_b[b_lo],
        )
    }
}

/// Full cross-correlation of two signals via FFT.
///
/// The result has `a.len() + b.len() − 1` entries; entry `k` is
/// `Σ_i a[i]·b[i − ℓ]` over the valid overlap, with `ℓ = k − (b.len() − 1)`.
///
/// # Errors
///
/// Fails with [`crate::FinderError::OutOfMemory`] if the FFT scratch buffers
/// cannot be allocated.
#[allow(clippy::missing_inline_in_public_items)]
pub fn xcorr(a: &[f32], b: &[f32]) -> FinderResult<Vec<f32>> {
    if a.is_empty() || b.is_empty() {
        return Ok(Vec::new());
    }
    let n_out = a.len() + b.len() - 1;
    let n = next_pow2(n_out);

    let mut fa: Vec<Complex<f32>> = scratch(n)?;
    for (slot, &v) in fa.iter_mut().zip(a) {
        *slot = Complex::new(v, 0.0);
    }
    let mut fb: Vec<Complex<f32>> = scratch(n)?;
    for (slot, &v) in fb.iter_mut().zip(b) {
        *slot = Complex::new(v, 0.0);
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut fa);
    fft.process(&mut fb);
    for (x, y) in fa.iter_mut().zip(&fb) {
        *x *= y.conj();
    }
    planner.plan_fft_inverse(n).process(&mut fa);

    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / n as f32;
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    let result = (0..n_out)
        .map(|k| {
            let lag = k as isize - (b.len() as isize - 1);
            let idx = lag.rem_euclid(n as isize) as usize;
            fa[idx].re * scale
        })
        .collect();
    Ok(result)
}

/// Sliding sum of squared errors between two signals for every relative
/// shift, same indexing as [`xcorr`].
///
/// # Errors
///
/// Propagates scratch allocation failure from [`xcorr`].
#[allow(clippy::missing_inline_in_public_items)]
pub fn sliding_sse(a: &[f32], b: &[f32]) -> FinderResult<Vec<f32>> {
    let corr = xcorr(a, b)?;
    let energies = OverlapEnergies::new(a, b);
    Ok(corr
        .iter()
        .enumerate()
        .map(|(k, &r)| {
            let (ea, eb) = energies.at(k);
            #[allow(clippy::cast_possible_truncation)]
            let sse = (ea + eb - 2.0 * f64::from(r)).max(0.0) as f32;
            sse
        })
        .collect())
}

/// Noise-weighted sliding MSE between two signals, same indexing as
/// [`xcorr`]: squared-error sum over the overlap divided by the overlap
/// energies plus `noise_regularization`.
///
/// # Errors
///
/// Propagates scratch allocation failure from [`xcorr`].
#[allow(clippy::missing_inline_in_public_items)]
pub fn sliding_weighted_mse(
    a: &[f32],
    b: &[f32],
    noise_regularization: f32,
) -> FinderResult<Vec<f32>> {
    let corr = xcorr(a, b)?;
    let energies = OverlapEnergies::new(a, b);
    Ok(corr
        .iter()
        .enumerate()
        .map(|(k, &r)| {
            let (ea, eb) = energies.at(k);
            let sse = (ea + eb - 2.0 * f64::from(r)).max(0.0);
            #[allow(clippy::cast_possible_truncation)]
            let mse = (sse / (ea + eb + f64::from(noise_regularization))) as f32;
            mse
        })
        .collect())
}

/// Noise-weighted sliding MSE of a signal against itself, for nonnegative
/// lags only. `result[ℓ]` compares `x[..n−ℓ]` with `x[ℓ..]`; `result[0]` is
/// exactly 0.
///
/// # Errors
///
/// Propagates scratch allocation failure from [`xcorr`].
#[allow(clippy::missing_inline_in_public_items)]
pub fn auto_sliding_weighted_mse(x: &[f32], noise_regularization: f32) -> FinderResult<Vec<f32>> {
    let n = x.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let corr = xcorr(x, x)?;

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &v in x {
        acc += f64::from(v) * f64::from(v);
        prefix.push(acc);
    }

    let mut result = scratch(n)?;
    for (lag, slot) in result.iter_mut().enumerate().skip(1) {
        let head = prefix[n - lag];
        let tail = prefix[n] - prefix[lag];
        let sse = (head + tail - 2.0 * f64::from(corr[n - 1 + lag])).max(0.0);
        #[allow(clippy::cast_possible_truncation)]
        let mse = (sse / (head + tail + f64::from(noise_regularization))) as f32;
        *slot = mse;
    }
    Ok(result)
}

/// Auto MSE curve of a track: one pass over the mono mixdown, or the mean of
/// the two per-channel curves.
///
/// # Errors
///
/// Propagates scratch allocation failure.
#[allow(clippy::missing_inline_in_public_items)]
pub fn audio_auto_mse(
    audio: &AudioDataFloat,
    use_mono: bool,
    noise_regularization: f32,
) -> FinderResult<Vec<f32>> {
    if use_mono {
        return auto_sliding_weighted_mse(audio.mono_signal(), noise_regularization);
    }
    let mut curve = auto_sliding_weighted_mse(&audio.channel0, noise_regularization)?;
    let other = auto_sliding_weighted_mse(&audio.channel1, noise_regularization)?;
    for (c, o) in curve.iter_mut().zip(&other) {
        *c = 0.5 * (*c + o);
    }
    Ok(curve)
}

/// Noise-weighted sliding MSE between two explicit frame ranges of a track,
/// stereo-averaged unless `use_mono` is set. Indexing as [`xcorr`] over the
/// two range signals.
///
/// # Errors
///
/// Propagates scratch allocation failure.
#[allow(clippy::missing_inline_in_public_items)]
pub fn audio_mse(
    audio: &AudioDataFloat,
    use_mono: bool,
    range_a: std::ops::Range<usize>,
    range_b: std::ops::Range<usize>,
    noise_regularization: f32,
) -> FinderResult<Vec<f32>> {
    if use_mono {
        let mono = audio.mono_signal();
        return sliding_weighted_mse(
            &mono[range_a],
            &mono[range_b],
            noise_regularization,
        );
    }
    let mut curve = sliding_weighted_mse(
        &audio.channel0[range_a.clone()],
        &audio.channel0[range_b.clone()],
        noise_regularization,
    )?;
    let other = sliding_weighted_mse(
        &audio.channel1[range_a],
        &audio.channel1[range_b],
        noise_regularization,
    )?;
    for (c, o) in curve.iter_mut().zip(&other) {
        *c = 0.5 * (*c + o);
    }
    Ok(curve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn naive_xcorr(a: &[f32], b: &[f32]) -> Vec<f32> {
        let n_out = a.len() + b.len() - 1;
        (0..n_out)
            .map(|k| {
                let lag = k as isize - (b.len() as isize - 1);
                a.iter()
                    .enumerate()
                    .filter_map(|(i, &av)| {
                        let j = i as isize - lag;
                        (j >= 0 && (j as usize) < b.len()).then(|| av * b[j as usize])
                    })
                    .sum()
            })
            .collect()
    }

    #[test]
    fn xcorr_matches_naive() {
        let a = [1.0, 2.0, 3.0, -1.0];
        let b = [0.5, -1.0, 2.0];
        let fast = xcorr(&a, &b).unwrap();
        let naive = naive_xcorr(&a, &b);
        assert_eq!(fast.len(), 6);
        for (f, n) in fast.iter().zip(&naive) {
            assert!((f - n).abs() < 1e-4, "{f} !~= {n}");
        }
    }

    #[test]
    fn sliding_sse_matches_naive() {
        let a = [1.0, -2.0, 0.5, 3.0];
        let b = [2.0, 1.0];
        let sse = sliding_sse(&a, &b).unwrap();
        // lag 0 (k = 1), full overlap: (1-2)^2 + (-2-1)^2 = 10
        assert!((sse[1] - 10.0).abs() < 1e-4, "{}", sse[1]);
        // rightmost shift: only a[3] vs b[0]: (3-2)^2 = 1
        assert!((sse[4] - 1.0).abs() < 1e-4, "{}", sse[4]);
    }

    #[test]
    fn auto_mse_is_zero_at_lag_zero_and_bounded() {
        let mut rng = SmallRng::seed_from_u64(0xB10B);
        let x: Vec<f32> = (0..4096).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let curve = auto_sliding_weighted_mse(&x, 1e-3).unwrap();
        assert_eq!(curve.len(), x.len());
        assert_eq!(curve[0], 0.0);
        for (lag, &v) in curve.iter().enumerate() {
            assert!((0.0..=1.0).contains(&v), "NWMSE({lag}) = {v} out of bounds");
        }
    }

    #[test]
    fn auto_mse_dips_at_the_period_of_a_periodic_signal() {
        let period = 128usize;
        let x: Vec<f32> = (0..4096)
            .map(|i| (2.0 * std::f32::consts::PI * (i % period) as f32 / period as f32).sin())
            .collect();
        let curve = auto_sliding_weighted_mse(&x, 1e-3).unwrap();
        // the curve at the period should be far below the half-period value
        assert!(curve[period] < 1e-3, "{}", curve[period]);
        assert!(curve[period / 2] > 0.1, "{}", curve[period / 2]);
    }

    #[test]
    fn stereo_curve_is_channel_mean() {
        let audio = AudioDataFloat {
            channel0: vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
            channel1: vec![0.0; 8],
            mono: None,
            num_frames: 8,
        };
        let stereo = audio_auto_mse(&audio, false, 1e-3).unwrap();
        let left = auto_sliding_weighted_mse(&audio.channel0, 1e-3).unwrap();
        for (s, l) in stereo.iter().zip(&left) {
            assert!((s - 0.5 * l).abs() < 1e-6);
        }
    }

    #[test]
    fn ranged_mse_finds_matching_ranges() {
        let mut rng = SmallRng::seed_from_u64(42);
        let body: Vec<f32> = (0..512).map(|_| rng.gen_range(-1.0..1.0)).collect();
        // two copies of the same body, separated by noise
        let mut x = body.clone();
        x.extend((0..100).map(|_| rng.gen_range(-1.0f32..1.0)));
        x.extend(&body);
        let audio = AudioDataFloat {
            channel0: x.clone(),
            channel1: x,
            mono: None,
            num_frames: 512 * 2 + 100,
        };
        let curve = audio_mse(&audio, false, 0..512, 612..1124, 1e-3).unwrap();
        // full overlap at lag 0 between the two identical ranges: k = 511
        assert!(curve[511] < 1e-4, "{}", curve[511]);
    }
}
