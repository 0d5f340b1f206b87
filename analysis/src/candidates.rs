//! Candidate selection and refinement: spaced-minima suppression over MSE
//! curves, loop-region inference from the spectrogram MSE distribution, lag
//! refinement, and endpoint-pair selection.

use log::trace;
use ndarray::Array1;
use ndarray_stats::{interpolate::Lower, Quantile1dExt};
use noisy_float::types::{n32, n64, N32};

use crate::config::LoopFinderConfig;
use crate::differencing::sliding_weighted_mse;
use crate::errors::FinderResult;
use crate::spectra::DiffSpectrogram;
use crate::AudioDataFloat;

/// Comparison window length (frames) for per-start lag refinement.
const REFINE_WINDOW: usize = 2048;

/// Windows with a decibel-domain spectrum MSE above this never count as
/// matching, no matter where the distribution puts the percentile cutoff.
/// 10 dB² is roughly a 3 dB RMS deviation per bin, well past seamless.
const MATCHED_WINDOW_MSE_CEILING: f32 = 10.0;

/// Quantile of a slice (`Lower` interpolation); 0 for an empty slice.
fn quantile(values: &[f32], q: f64) -> f32 {
    let mut arr: Array1<N32> = values.iter().map(|&v| n32(v)).collect();
    arr.quantile_mut(n64(q), &Lower).map_or(0.0, N32::raw)
}

/// Picks up to `n` indices of smallest values such that any two picks are at
/// least `min_spacing` apart, by repeatedly taking the global minimum among
/// unsuppressed positions and suppressing its neighborhood. Non-finite
/// values are never picked. Indices come back in selection order, so the
/// values at them are non-decreasing.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn spaced_minima(values: &[f32], n: usize, min_spacing: usize) -> Vec<usize> {
    let spacing = min_spacing.max(1);
    let mut suppressed = vec![false; values.len()];
    let mut picks = Vec::with_capacity(n);
    while picks.len() < n {
        let best = values
            .iter()
            .enumerate()
            .filter(|&(i, v)| !suppressed[i] && v.is_finite())
            .min_by(|a, b| a.1.total_cmp(b.1).then(a.0.cmp(&b.0)));
        let Some((idx, _)) = best else { break };
        picks.push(idx);
        let lo = idx.saturating_sub(spacing - 1);
        let hi = (idx + spacing).min(values.len());
        for flag in &mut suppressed[lo..hi] {
            *flag = true;
        }
    }
    picks
}

/// The contiguous stretch of spectrogram windows within which the track
/// matches its lagged copy under the inferred cutoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopRegion {
    pub start_window: usize,
    /// Inclusive.
    pub end_window: usize,
    /// First frame of the region in the unlagged signal.
    pub start_sample: usize,
    /// One past the last frame of the region.
    pub end_sample: usize,
    /// The ceiling MSE value that defines the region.
    pub cutoff: f32,
}

/// Infers the loop region from the distribution of window MSEs: the cutoff
/// is the 30th percentile (capped at [`MATCHED_WINDOW_MSE_CEILING`] so a lag
/// that matches nowhere cannot manufacture a region out of its least-bad
/// windows), and the region is the longest contiguous run of windows at or
/// below it. Returns `None` for an empty spectrogram or when no window
/// clears the cutoff.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn infer_loop_region(spec: &DiffSpectrogram) -> Option<LoopRegion> {
    if spec.n_windows() == 0 {
        return None;
    }
    let cutoff = quantile(&spec.mses, 0.3).min(MATCHED_WINDOW_MSE_CEILING);

    let mut best: Option<(usize, usize)> = None;
    let mut run_start = None;
    for (i, &mse) in spec.mses.iter().enumerate() {
        if mse <= cutoff {
            run_start.get_or_insert(i);
            let start = run_start.unwrap_or(i);
            if best.is_none_or(|(bs, be)| i - start > be - bs) {
                best = Some((start, i));
            }
        } else {
            run_start = None;
        }
    }

    let (start_window, end_window) = best?;
    trace!("loop region windows {start_window}..={end_window} at cutoff {cutoff}");
    Some(LoopRegion {
        start_window,
        end_window,
        start_sample: spec.start_samples[start_window],
        end_sample: spec.start_samples[end_window] + spec.window_sizes[end_window],
        cutoff,
    })
}

/// Roughly how long the track matches its lagged copy, in seconds: the total
/// effective duration of windows at or below the cutoff.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn match_length(spec: &DiffSpectrogram, cutoff: f32) -> f32 {
    spec.mses
        .iter()
        .zip(&spec.effective_window_durations)
        .filter(|&(&mse, _)| mse <= cutoff)
        .map(|(_, &duration)| duration)
        .sum()
}

/// Roughly how long the track *fails* to match outside the loop region, in
/// seconds: the total effective duration of windows outside
/// `[region_start, region_end]` with MSE above the cutoff.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn mismatch_length(
    spec: &DiffSpectrogram,
    region_start: usize,
    region_end: usize,
    cutoff: f32,
) -> f32 {
    spec.mses
        .iter()
        .zip(&spec.effective_window_durations)
        .enumerate()
        .filter(|&(i, (&mse, _))| (i < region_start || i > region_end) && mse > cutoff)
        .map(|(_, (_, &duration))| duration)
        .sum()
}

/// Biased mean of the region's window MSEs: the mean of values at or below
/// the `1 − alpha` quantile, so the worst `alpha` share of windows (chord
/// changes, one-shot transients) does not dominate.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn biased_mean_spectrum_mse(
    mses: &[f32],
    region_start: usize,
    region_end: usize,
    alpha: f32,
) -> f32 {
    if mses.is_empty() || region_start > region_end {
        return 0.0;
    }
    let region = &mses[region_start..=region_end.min(mses.len() - 1)];
    let ceiling = quantile(region, f64::from(1.0 - alpha.clamp(0.0, 1.0)));
    let kept: Vec<f32> = region.iter().copied().filter(|&v| v <= ceiling).collect();
    if kept.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let mean = (kept.iter().map(|&v| f64::from(v)).sum::<f64>() / kept.len() as f64) as f32;
    mean
}

/// Minimum of a sliding-NWMSE curve over the shifts where `a` fully overlaps
/// `b`, preferring `center` (a shift of `b`'s offset) on ties. Returns the
/// winning shift. Requires `a.len() <= b.len()`.
fn best_shift_near(a: &[f32], b: &[f32], center: usize, eps: f32) -> FinderResult<usize> {
    let curve = sliding_weighted_mse(a, b, eps)?;
    let max_shift = b.len() - a.len();
    let center = center.min(max_shift);
    // a[i] vs b[i + s] corresponds to curve index b.len() - 1 - s
    let mut best = (center, curve[b.len() - 1 - center]);
    for s in 0..=max_shift {
        let value = curve[b.len() - 1 - s];
        if value < best.1 {
            best = (s, value);
        }
    }
    Ok(best.0)
}

/// Refines a candidate lag within the inferred loop region: slides the
/// region against its lag-shifted neighborhood (bounded by `radius` frames)
/// and keeps the alignment with the smallest noise-weighted MSE. Corrects
/// the sub-window drift left over from the coarse spectrogram stage.
///
/// # Errors
///
/// Propagates scratch allocation failure from the differencing kernel.
#[allow(clippy::missing_inline_in_public_items)]
pub fn refine_lag(
    signal: &[f32],
    lag: usize,
    region_start: usize,
    region_end: usize,
    radius: usize,
    eps: f32,
) -> FinderResult<usize> {
    let n = signal.len();
    let rs = region_start.min(n);
    let re = region_end.min(n.saturating_sub(lag));
    if rs >= re || lag == 0 || lag >= n {
        return Ok(lag);
    }
    let a = &signal[rs..re];
    let b_lo = (rs + lag).saturating_sub(radius);
    let b_hi = (re + lag + radius).min(n);
    let b = &signal[b_lo..b_hi];
    if b.len() < a.len() {
        return Ok(lag);
    }
    let center = rs + lag - b_lo;
    let shift = best_shift_near(a, b, center, eps)?;
    let shifted = b_lo + shift;
    if shifted <= rs {
        return Ok(lag);
    }
    Ok(shifted - rs)
}

/// The selected start/end pairs for one base duration. `lags[k]` is the
/// per-start refined lag, so the end frame of pair `k` is
/// `starts[k] + lags[k]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointPairs {
    pub starts: Vec<usize>,
    pub lags: Vec<usize>,
    pub sample_diffs: Vec<f32>,
}

/// Finds the best loop start/end pairs for a base lag.
///
/// For each candidate start the lag is re-refined locally (sliding NWMSE of
/// a short window at the start against the neighborhood of its lagged
/// position, bounded by `lag_radius`), then the pair is scored by the
/// amplitude gap between start and end across both channels. Pairs within
/// `sample_diff_tol` outrank pairs outside it; spaced-minima suppression on
/// the start positions keeps returned pairs at least `min_time_diff` apart;
/// at most `n_best_pairs` pairs come back, best first.
///
/// # Errors
///
/// Propagates scratch allocation failure from the differencing kernel.
#[allow(clippy::missing_inline_in_public_items)]
pub fn find_endpoint_pairs(
    audio: &AudioDataFloat,
    lag: usize,
    start_candidates: &[usize],
    lag_radius: usize,
    cfg: &LoopFinderConfig,
    framerate: f32,
) -> FinderResult<EndpointPairs> {
    let n = audio.num_frames;
    let mono = audio.mono_signal();
    let lag_radius = lag_radius.min(REFINE_WINDOW);

    let mut scored: Vec<(usize, usize, f32)> = Vec::with_capacity(start_candidates.len());
    for &start in start_candidates {
        if start >= n || start + lag >= n {
            continue;
        }
        let window = REFINE_WINDOW.min(n - start - lag);
        let refined = if window == 0 {
            lag
        } else {
            let a = &mono[start..start + window];
            let b_lo = (start + lag).saturating_sub(lag_radius);
            let b_hi = (start + lag + window + lag_radius).min(n);
            let b = &mono[b_lo..b_hi];
            if b.len() < a.len() {
                lag
            } else {
                let center = start + lag - b_lo;
                let shifted = b_lo + best_shift_near(a, b, center, cfg.noise_regularization)?;
                if shifted <= start { lag } else { shifted - start }
            }
        };
        let end = start + refined;
        if refined == 0 || end >= n {
            continue;
        }
        let diff = (audio.channel0[start] - audio.channel0[end]).abs()
            + (audio.channel1[start] - audio.channel1[end]).abs();
        scored.push((start, refined, diff));
    }

    // Pairs inside the tolerance outrank pairs outside it, then smaller
    // amplitude gaps win.
    scored.sort_by(|a, b| {
        (a.2 > cfg.sample_diff_tol)
            .cmp(&(b.2 > cfg.sample_diff_tol))
            .then(a.2.total_cmp(&b.2))
            .then(a.0.cmp(&b.0))
    });

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let spacing = ((cfg.min_time_diff * framerate).ceil() as usize).max(1);
    let mut pairs = EndpointPairs::default();
    for (start, refined, diff) in scored {
        if pairs.starts.len() >= cfg.n_best_pairs {
            break;
        }
        if pairs.starts.iter().all(|&s| s.abs_diff(start) >= spacing) {
            pairs.starts.push(start);
            pairs.lags.push(refined);
            pairs.sample_diffs.push(diff);
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn spectrogram(mses: Vec<f32>) -> DiffSpectrogram {
        let n = mses.len();
        DiffSpectrogram {
            mses,
            start_samples: (0..n).map(|i| i * 100).collect(),
            window_sizes: vec![200; n],
            effective_window_durations: vec![0.5; n],
        }
    }

    #[test]
    fn spaced_minima_respects_spacing() {
        let values = [5.0, 1.0, 1.1, 4.0, 0.5, 3.0, 2.0, 6.0];
        let picks = spaced_minima(&values, 3, 2);
        assert_eq!(picks, vec![4, 1, 6]);
        for (i, &a) in picks.iter().enumerate() {
            for &b in &picks[i + 1..] {
                assert!(a.abs_diff(b) >= 2);
            }
        }
        // picked values are non-decreasing in selection order
        assert!(values[picks[0]] <= values[picks[1]]);
        assert!(values[picks[1]] <= values[picks[2]]);
    }

    #[test]
    fn spaced_minima_skips_non_finite_and_exhausts() {
        let values = [f32::INFINITY, 2.0, f32::NAN, 1.0];
        let picks = spaced_minima(&values, 10, 1);
        assert_eq!(picks, vec![3, 1]);
    }

    #[test]
    fn region_covers_the_longest_quiet_run() {
        let spec = spectrogram(vec![9.0, 8.0, 0.1, 0.1, 0.1, 7.0, 0.1, 9.0]);
        let region = infer_loop_region(&spec).unwrap();
        assert_eq!((region.start_window, region.end_window), (2, 4));
        assert_eq!(region.start_sample, 200);
        assert_eq!(region.end_sample, 400 + 200);
        assert!((region.cutoff - 0.1).abs() < 1e-6);
    }

    #[test]
    fn a_lag_that_matches_nowhere_has_no_region() {
        let spec = spectrogram(vec![120.0, 95.0, 60.0, 88.0]);
        assert!(infer_loop_region(&spec).is_none());
    }

    #[test]
    fn match_length_counts_windows_under_the_cutoff() {
        let spec = spectrogram(vec![0.1, 5.0, 0.2, 0.3]);
        assert!((match_length(&spec, 0.3) - 1.5).abs() < 1e-6);
        assert!((mismatch_length(&spec, 2, 3, 0.3) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn match_and_mismatch_lengths_are_monotone_in_the_cutoff() {
        let mut rng = SmallRng::seed_from_u64(7);
        let spec = spectrogram((0..64).map(|_| rng.gen_range(0.0..10.0)).collect());
        let cutoffs = [0.5f32, 2.0, 5.0, 9.5];
        for pair in cutoffs.windows(2) {
            assert!(match_length(&spec, pair[0]) <= match_length(&spec, pair[1]));
            assert!(mismatch_length(&spec, 10, 20, pair[0]) >= mismatch_length(&spec, 10, 20, pair[1]));
        }
    }

    #[test]
    fn biased_mean_drops_the_worst_windows() {
        let mses = vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 100.0];
        let biased = biased_mean_spectrum_mse(&mses, 0, 9, 0.1);
        assert!((biased - 1.0).abs() < 1e-6, "{biased}");
    }

    #[test]
    fn refine_lag_recovers_the_true_offset() {
        let mut rng = SmallRng::seed_from_u64(0xCAFE);
        let body: Vec<f32> = (0..400).map(|_| rng.gen_range(-1.0..1.0)).collect();
        // signal = body ++ body: true lag is 400
        let mut signal = body.clone();
        signal.extend(&body);
        let refined = refine_lag(&signal, 396, 0, 300, 8, 1e-3).unwrap();
        assert_eq!(refined, 400);
    }

    #[test]
    fn endpoint_pairs_prefer_small_amplitude_gaps_and_keep_spacing() {
        let mut rng = SmallRng::seed_from_u64(3);
        let body: Vec<f32> = (0..600).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut x = body.clone();
        x.extend(&body);
        let audio = AudioDataFloat {
            channel0: x.clone(),
            channel1: x,
            mono: None,
            num_frames: 1200,
        };
        let cfg = LoopFinderConfig {
            n_best_pairs: 3,
            min_time_diff: 10.0, // at 1 Hz framerate: spacing of 10 frames
            sample_diff_tol: 0.05,
            ..LoopFinderConfig::default()
        };
        let starts = [5, 6, 40, 80, 120];
        let pairs = find_endpoint_pairs(&audio, 600, &starts, 4, &cfg, 1.0).unwrap();
        assert!(!pairs.starts.is_empty());
        assert!(pairs.starts.len() <= 3);
        // exact copy: every selected pair has a tiny gap and the exact lag
        for (&lag, &diff) in pairs.lags.iter().zip(&pairs.sample_diffs) {
            assert_eq!(lag, 600);
            assert!(diff < 1e-6);
        }
        for (i, &a) in pairs.starts.iter().enumerate() {
            for &b in &pairs.starts[i + 1..] {
                assert!(a.abs_diff(b) >= 10);
            }
        }
    }
}
