//! End-to-end synthesis: drives the differencing, spectra, and candidate
//! stages for both the unconstrained and the estimate-guided modes, applies
//! estimator-bias penalties, and turns per-lag losses into normalized
//! confidences.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use rayon::prelude::*;

use crate::candidates::{
    biased_mean_spectrum_mse, find_endpoint_pairs, infer_loop_region, match_length,
    mismatch_length, refine_lag, spaced_minima, EndpointPairs,
};
use crate::config::{LoopFinderConfig, LoopMode};
use crate::differencing::audio_auto_mse;
use crate::errors::{FinderError, FinderResult};
use crate::spectra::{diff_spectrogram, smoothen};
use crate::AudioDataFloat;

/// Weight (loss per second) of the mismatch-length term in a lag's loss.
const MISMATCH_WEIGHT: f32 = 1.0;

/// Ranked loop candidates for a track.
///
/// Rows are ordered by ascending base duration, ties by ascending first
/// start frame. Per row, `start_frames[i]`, `end_frames[i]`, and
/// `sample_differences[i]` hold up to `n_best_pairs` endpoint pairs, best
/// first; `end_frames[i][k] - start_frames[i][k]` may differ from
/// `base_durations[i]` by the per-pair refinement. All frame values are in
/// the track's original framerate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopResult {
    pub base_durations: Vec<usize>,
    pub start_frames: Vec<Vec<usize>>,
    pub end_frames: Vec<Vec<usize>>,
    /// Per-duration confidence; sums to 1 unless `degenerate` is set.
    pub confidences: Vec<f32>,
    pub sample_differences: Vec<Vec<f32>>,
    /// Set when no candidate survived, or when every loss was identical with
    /// zero regularization (confidences are NaN in that case).
    pub degenerate: bool,
}

impl LoopResult {
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.base_durations.is_empty()
    }

    /// Index of the highest-confidence candidate.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn best(&self) -> Option<usize> {
        self.confidences
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_nan())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    fn empty_degenerate() -> Self {
        Self {
            degenerate: true,
            ..Self::default()
        }
    }

    /// Converts reduced-framerate frame values back to original frames.
    pub(crate) fn scale_frames(&mut self, factor: usize) {
        if factor <= 1 {
            return;
        }
        for duration in &mut self.base_durations {
            *duration *= factor;
        }
        for row in &mut self.start_frames {
            for frame in row {
                *frame *= factor;
            }
        }
        for row in &mut self.end_frames {
            for frame in row {
                *frame *= factor;
            }
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

/// Turns nonnegative losses into confidences that sum to 1.
///
/// Each confidence is `σ(−(L − min L) / (r + median spread))`, renormalized.
/// When every loss is identical and the regularization is zero the
/// denominator vanishes; confidences come back NaN with the degenerate flag
/// set, and the caller may renormalize uniformly instead.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn calc_confidence(losses: &[f32], regularization: f32) -> (Vec<f32>, bool) {
    if losses.is_empty() {
        return (Vec::new(), false);
    }
    let min = losses.iter().copied().fold(f32::INFINITY, f32::min);
    if !min.is_finite() {
        return (vec![f32::NAN; losses.len()], true);
    }
    let spreads: Vec<f32> = losses.iter().map(|l| l - min).collect();
    // infinite losses (forbidden by an estimator penalty) get confidence 0
    // and stay out of the spread statistics
    let finite: Vec<f32> = spreads.iter().copied().filter(|s| s.is_finite()).collect();
    let denominator = regularization + median(&finite);
    if denominator == 0.0 {
        return (vec![f32::NAN; losses.len()], true);
    }
    let mut confidences: Vec<f32> = spreads
        .iter()
        .map(|&d| if d.is_finite() { sigmoid(-d / denominator) } else { 0.0 })
        .collect();
    let total: f32 = confidences.iter().sum();
    if total > 0.0 {
        for c in &mut confidences {
            *c /= total;
        }
    }
    (confidences, false)
}

/// Multiplier applied to a loss for deviating from an estimate. An infinite
/// slope (penalty 1) forbids any deviation outright.
fn penalty_factor(slope: f32, deviation_seconds: f32) -> f32 {
    if slope.is_infinite() {
        if deviation_seconds > 0.0 {
            f32::INFINITY
        } else {
            1.0
        }
    } else {
        slope.mul_add(deviation_seconds, 1.0)
    }
}

/// Frame-domain view of the configured estimates.
struct Estimates {
    s1: Option<usize>,
    s2: Option<usize>,
    tau_radius: usize,
    t1_radius: usize,
    t2_radius: usize,
    slope_tau: f32,
    slope_t1: f32,
    slope_t2: f32,
}

impl Estimates {
    fn from_config(cfg: &LoopFinderConfig, framerate: f32) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames = |seconds: f32| (seconds * framerate).round() as usize;
        Self {
            s1: cfg.has_t1_estimate().then(|| frames(cfg.t1_estimate)),
            s2: cfg.has_t2_estimate().then(|| frames(cfg.t2_estimate)),
            tau_radius: frames(cfg.tau_radius),
            t1_radius: frames(cfg.t1_radius),
            t2_radius: frames(cfg.t2_radius),
            slope_tau: LoopFinderConfig::slope_from_penalty(cfg.tau_penalty),
            slope_t1: LoopFinderConfig::slope_from_penalty(cfg.t1_penalty),
            slope_t2: LoopFinderConfig::slope_from_penalty(cfg.t2_penalty),
        }
    }

    /// Legal lag range, when constrained by the estimates.
    fn lag_bounds(&self) -> Option<(usize, usize)> {
        match (self.s1, self.s2) {
            (Some(s1), Some(s2)) if s2 > s1 => {
                let estimate = s2 - s1;
                Some((
                    estimate.saturating_sub(self.tau_radius),
                    estimate + self.tau_radius,
                ))
            }
            _ => None,
        }
    }

    fn start_bounds(&self) -> Option<(usize, usize)> {
        self.s1
            .map(|s1| (s1.saturating_sub(self.t1_radius), s1 + self.t1_radius))
    }

    fn end_bounds(&self) -> Option<(usize, usize)> {
        self.s2
            .map(|s2| (s2.saturating_sub(self.t2_radius), s2 + self.t2_radius))
    }
}

/// Everything known about one base lag after its spectral pass.
struct LagAnalysis {
    lag: usize,
    pairs: EndpointPairs,
    loss: f32,
    /// The lag did not match for at least `min_loop_length` seconds, so it
    /// does not count as a loop.
    disqualified: bool,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn seconds_to_frames(seconds: f32, framerate: f32) -> usize {
    (seconds * framerate).ceil() as usize
}

/// Amplitude gap between a frame and its lagged partner, both channels.
fn amplitude_gap(audio: &AudioDataFloat, start: usize, lag: usize) -> f32 {
    (audio.channel0[start] - audio.channel0[start + lag]).abs()
        + (audio.channel1[start] - audio.channel1[start + lag]).abs()
}

/// Candidate starts for a lag: the quietest spectrogram windows inside the
/// loop region, each contributing the start with the smallest amplitude gap
/// within it.
fn starts_from_region(
    audio: &AudioDataFloat,
    lag: usize,
    spec: &crate::spectra::DiffSpectrogram,
    region: &crate::candidates::LoopRegion,
    cfg: &LoopFinderConfig,
    framerate: f32,
) -> Vec<usize> {
    let n = audio.num_frames;
    let region_mses = &spec.mses[region.start_window..=region.end_window];
    let hop = if spec.n_windows() > 1 {
        (spec.start_samples[1] - spec.start_samples[0]).max(1)
    } else {
        1
    };
    let frame_spacing = seconds_to_frames(cfg.min_time_diff, framerate).max(1);
    let window_spacing = frame_spacing.div_ceil(hop);
    let picks = spaced_minima(region_mses, cfg.n_best_pairs, window_spacing);

    let mut starts = Vec::with_capacity(picks.len());
    for pick in picks {
        let window = region.start_window + pick;
        let lo = spec.start_samples[window];
        let hi = (lo + spec.window_sizes[window]).min(n.saturating_sub(lag));
        if let Some(best) = (lo..hi).min_by(|&a, &b| {
            amplitude_gap(audio, a, lag).total_cmp(&amplitude_gap(audio, b, lag))
        }) {
            starts.push(best);
        }
    }
    starts
}

/// Candidate starts constrained to an estimate window: spaced minima of the
/// amplitude gap over the window.
fn starts_from_bounds(
    audio: &AudioDataFloat,
    lag: usize,
    bounds: (usize, usize),
    cfg: &LoopFinderConfig,
    framerate: f32,
) -> Vec<usize> {
    let n = audio.num_frames;
    let lo = bounds.0;
    let hi = (bounds.1 + 1).min(n.saturating_sub(lag));
    if lo >= hi {
        return Vec::new();
    }
    let gaps: Vec<f32> = (lo..hi).map(|s| amplitude_gap(audio, s, lag)).collect();
    let spacing = seconds_to_frames(cfg.min_time_diff, framerate).max(1);
    spaced_minima(&gaps, cfg.n_best_pairs, spacing)
        .into_iter()
        .map(|i| lo + i)
        .collect()
}

fn analyze_lag(
    audio: &AudioDataFloat,
    lag: usize,
    cfg: &LoopFinderConfig,
    framerate: f32,
    db_shift: f32,
    estimates: Option<&Estimates>,
) -> FinderResult<LagAnalysis> {
    let mono = audio.mono_signal();
    let spec = diff_spectrogram(
        mono,
        lag,
        framerate,
        cfg.fft_length,
        cfg.overlap_percent,
        db_shift,
    )?;
    let Some(region) = infer_loop_region(&spec) else {
        return Ok(LagAnalysis {
            lag,
            pairs: EndpointPairs::default(),
            loss: f32::INFINITY,
            disqualified: true,
        });
    };

    let tau_radius_frames = estimates.map_or_else(
        || seconds_to_frames(cfg.tau_radius, framerate),
        |est| est.tau_radius,
    );
    let mut refined = refine_lag(
        mono,
        lag,
        region.start_sample,
        region.end_sample,
        tau_radius_frames,
        cfg.noise_regularization,
    )?;
    if let Some((lo, hi)) = estimates.and_then(Estimates::lag_bounds) {
        refined = refined.clamp(lo, hi);
    }

    let start_bounds = estimates.and_then(Estimates::start_bounds);
    let end_bounds = estimates.and_then(Estimates::end_bounds);
    let scan_bounds = start_bounds.or_else(|| {
        end_bounds.map(|(lo, hi)| (lo.saturating_sub(refined), hi.saturating_sub(refined)))
    });
    let starts = match scan_bounds {
        Some(bounds) => starts_from_bounds(audio, refined, bounds, cfg, framerate),
        None => starts_from_region(audio, refined, &spec, &region, cfg, framerate),
    };

    let mut pairs = find_endpoint_pairs(audio, refined, &starts, tau_radius_frames, cfg, framerate)?;
    if start_bounds.is_some() || end_bounds.is_some() {
        let mut kept = EndpointPairs::default();
        for ((&start, &pair_lag), &diff) in pairs
            .starts
            .iter()
            .zip(&pairs.lags)
            .zip(&pairs.sample_diffs)
        {
            let end = start + pair_lag;
            let start_ok = start_bounds.is_none_or(|(lo, hi)| (lo..=hi).contains(&start));
            let end_ok = end_bounds.is_none_or(|(lo, hi)| (lo..=hi).contains(&end));
            if start_ok && end_ok {
                kept.starts.push(start);
                kept.lags.push(pair_lag);
                kept.sample_diffs.push(diff);
            }
        }
        pairs = kept;
    }

    let biased = biased_mean_spectrum_mse(&spec.mses, region.start_window, region.end_window, 0.1);
    let matched = match_length(&spec, region.cutoff);
    let mismatched = mismatch_length(&spec, region.start_window, region.end_window, region.cutoff);
    let mut loss = MISMATCH_WEIGHT.mul_add(mismatched, biased);
    let disqualified = matched < cfg.min_loop_length;

    if let Some(est) = estimates {
        if let (Some(s1), Some(s2)) = (est.s1, est.s2) {
            #[allow(clippy::cast_precision_loss)]
            let deviation = refined.abs_diff(s2 - s1) as f32 / framerate;
            loss *= penalty_factor(est.slope_tau, deviation);
        }
        // start/end penalties judge the lag by its best surviving pair
        if let (Some(&start), Some(&pair_lag)) = (pairs.starts.first(), pairs.lags.first()) {
            #[allow(clippy::cast_precision_loss)]
            if let Some(s1) = est.s1 {
                loss *= penalty_factor(est.slope_t1, start.abs_diff(s1) as f32 / framerate);
            }
            #[allow(clippy::cast_precision_loss)]
            if let Some(s2) = est.s2 {
                let end = start + pair_lag;
                loss *= penalty_factor(est.slope_t2, end.abs_diff(s2) as f32 / framerate);
            }
        }
    }

    debug!(
        "lag {lag} -> refined {refined}: {} pairs, match {matched:.2}s, mismatch {mismatched:.2}s, loss {loss:.4}{}",
        pairs.starts.len(),
        if disqualified { " (too short to loop)" } else { "" }
    );
    Ok(LagAnalysis {
        lag: refined,
        pairs,
        loss,
        disqualified,
    })
}

/// Masks the parts of the auto-MSE curve that may not produce lags: the
/// configured head/tail ignore windows, lags shorter than the minimum loop
/// length, and (when estimates constrain the search) lags outside their
/// bounds. Lag 0 is always masked.
fn mask_lag_curve(
    curve: &mut [f32],
    cfg: &LoopFinderConfig,
    framerate: f32,
    bounds: Option<(usize, usize)>,
) {
    let n = curve.len();
    let left = seconds_to_frames(cfg.left_ignore, framerate)
        .max(seconds_to_frames(cfg.min_loop_length, framerate))
        .max(1);
    for value in curve.iter_mut().take(left.min(n)) {
        *value = f32::INFINITY;
    }
    let right = n.saturating_sub(seconds_to_frames(cfg.right_ignore, framerate));
    for value in curve.iter_mut().skip(right) {
        *value = f32::INFINITY;
    }
    if let Some((lo, hi)) = bounds {
        for (lag, value) in curve.iter_mut().enumerate() {
            if lag < lo || lag > hi {
                *value = f32::INFINITY;
            }
        }
    }
}

fn assemble(analyses: Vec<LagAnalysis>, cfg: &LoopFinderConfig) -> LoopResult {
    let mut analyses: Vec<LagAnalysis> = analyses
        .into_iter()
        .filter(|a| !a.disqualified && !a.pairs.starts.is_empty())
        .collect();
    if analyses.is_empty() {
        warn!("no loop candidates survived filtering");
        return LoopResult::empty_degenerate();
    }

    // Two coarse lags can refine to the same base duration; keep the better.
    analyses.sort_by(|a, b| a.lag.cmp(&b.lag).then(a.loss.total_cmp(&b.loss)));
    analyses.dedup_by(|next, kept| next.lag == kept.lag);

    analyses.sort_by(|a, b| {
        a.lag
            .cmp(&b.lag)
            .then(a.pairs.starts.first().cmp(&b.pairs.starts.first()))
    });

    let losses: Vec<f32> = analyses.iter().map(|a| a.loss).collect();
    let (confidences, degenerate) = calc_confidence(&losses, cfg.confidence_regularization);

    let mut result = LoopResult {
        confidences,
        degenerate,
        ..LoopResult::default()
    };
    for analysis in analyses {
        result.base_durations.push(analysis.lag);
        result.end_frames.push(
            analysis
                .pairs
                .starts
                .iter()
                .zip(&analysis.pairs.lags)
                .map(|(s, l)| s + l)
                .collect(),
        );
        result.start_frames.push(analysis.pairs.starts);
        result.sample_differences.push(analysis.pairs.sample_diffs);
    }
    result
}

fn find_loop_candidates(
    audio: &AudioDataFloat,
    cfg: &LoopFinderConfig,
    framerate: f32,
    db_shift: f32,
    estimates: Option<&Estimates>,
    cancel: &AtomicBool,
) -> FinderResult<LoopResult> {
    let mut curve = audio_auto_mse(audio, cfg.use_mono_audio, cfg.noise_regularization)?;
    smoothen(&mut curve, 2);
    mask_lag_curve(
        &mut curve,
        cfg,
        framerate,
        estimates.and_then(Estimates::lag_bounds),
    );

    let spacing = seconds_to_frames(cfg.min_time_diff, framerate).max(1);
    let lags = spaced_minima(&curve, cfg.n_best_durations, spacing);
    if lags.is_empty() {
        warn!("every lag was masked away; returning an empty result");
        return Ok(LoopResult::empty_degenerate());
    }
    debug!("selected {} base lags: {lags:?}", lags.len());

    // Each lag's spectral pass is independent; collect preserves lag order.
    // Cancellation is coarse: the flag is consulted once per lag, before
    // its spectrogram pass.
    let analyses = lags
        .par_iter()
        .map(|&lag| {
            if cancel.load(Ordering::Acquire) {
                return Err(FinderError::Cancelled);
            }
            analyze_lag(audio, lag, cfg, framerate, db_shift, estimates)
        })
        .collect::<FinderResult<Vec<_>>>()?;
    Ok(assemble(analyses, cfg))
}

/// Runs the full pipeline in the mode implied by the configured estimates.
///
/// # Errors
///
/// Propagates scratch allocation failure from the kernels, or
/// [`FinderError::Cancelled`] once the flag is raised.
#[allow(clippy::missing_inline_in_public_items)]
pub(crate) fn run(
    audio: &AudioDataFloat,
    cfg: &LoopFinderConfig,
    framerate: f32,
    db_shift: f32,
    cancel: &AtomicBool,
) -> FinderResult<LoopResult> {
    match cfg.loop_mode() {
        LoopMode::Auto => find_loop_candidates(audio, cfg, framerate, db_shift, None, cancel),
        mode => {
            debug!("estimate-guided search ({mode})");
            let estimates = Estimates::from_config(cfg, framerate);
            if let (Some(s1), Some(s2)) = (estimates.s1, estimates.s2) {
                if s2 <= s1 {
                    warn!("t2 estimate precedes t1 estimate; ignoring both");
                    return find_loop_candidates(audio, cfg, framerate, db_shift, None, cancel);
                }
            }
            find_loop_candidates(audio, cfg, framerate, db_shift, Some(&estimates), cancel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn confidences_sum_to_one_and_order_by_loss() {
        let (confidences, degenerate) = calc_confidence(&[0.1, 0.5, 3.0], 0.5);
        assert!(!degenerate);
        let total: f32 = confidences.iter().sum();
        assert!((total - 1.0).abs() < 1e-6, "sum {total}");
        assert!(confidences[0] > confidences[1]);
        assert!(confidences[1] > confidences[2]);
    }

    #[test]
    fn single_loss_gets_full_confidence() {
        let (confidences, degenerate) = calc_confidence(&[0.7], 1.0);
        assert!(!degenerate);
        assert_eq!(confidences, vec![1.0]);
    }

    #[test]
    fn identical_losses_with_zero_regularization_are_degenerate() {
        let (confidences, degenerate) = calc_confidence(&[0.0, 0.0, 0.0], 0.0);
        assert!(degenerate);
        assert!(confidences.iter().all(|c| c.is_nan()));
    }

    #[test]
    fn infinite_losses_are_ignored_by_ranking() {
        let (confidences, degenerate) = calc_confidence(&[0.2, f32::INFINITY], 1.0);
        assert!(!degenerate);
        assert!(confidences[0] > 0.99);
        assert!(confidences[1] < 1e-6);
    }

    #[test]
    fn penalty_factor_handles_the_forbidding_slope() {
        assert_eq!(penalty_factor(2.0, 0.5), 2.0);
        assert_eq!(penalty_factor(f32::INFINITY, 0.0), 1.0);
        assert!(penalty_factor(f32::INFINITY, 0.25).is_infinite());
    }

    /// A small concatenated-loop track: intro, two copies of a body, outro.
    fn looped_track(framerate: usize) -> (AudioDataFloat, usize, usize) {
        let mut rng = SmallRng::seed_from_u64(0x100B);
        let tone = |rng: &mut SmallRng, len: usize| -> Vec<f32> {
            // bandlimited-ish pseudo-random: a few sinusoids with random phases
            let partials: Vec<(f32, f32, f32)> = (0..8)
                .map(|_| {
                    (
                        rng.gen_range(20.0..400.0),
                        rng.gen_range(0.0..std::f32::consts::TAU),
                        rng.gen_range(0.05..0.2),
                    )
                })
                .collect();
            (0..len)
                .map(|i| {
                    #[allow(clippy::cast_precision_loss)]
                    let t = i as f32 / framerate as f32;
                    partials
                        .iter()
                        .map(|(f, p, a)| a * (std::f32::consts::TAU * f * t + p).sin())
                        .sum()
                })
                .collect()
        };
        let intro = tone(&mut rng, framerate * 2);
        let body = tone(&mut rng, framerate * 6);
        let mut signal = intro;
        let loop_start = signal.len();
        signal.extend(&body);
        signal.extend(&body);
        signal.extend(&body[..framerate]);
        let n = signal.len();
        let audio = AudioDataFloat {
            channel0: signal.clone(),
            channel1: signal,
            mono: None,
            num_frames: n,
        };
        (audio, loop_start, body.len())
    }

    fn test_config() -> LoopFinderConfig {
        LoopFinderConfig {
            n_best_durations: 4,
            n_best_pairs: 3,
            left_ignore: 1.0,
            right_ignore: 1.0,
            min_loop_length: 2.0,
            min_time_diff: 0.1,
            fft_length: 1024,
            framerate_reduction_factor: 1,
            ..LoopFinderConfig::default()
        }
    }

    #[test]
    fn finds_the_body_length_of_a_concatenated_loop() {
        let framerate = 2000usize;
        let (mut audio, _, body_len) = looped_track(framerate);
        crate::prep::fill_mono(&mut audio);
        let cfg = test_config().sanitized();
        #[allow(clippy::cast_precision_loss)]
        let result = run(&audio, &cfg, framerate as f32, 40.0, &AtomicBool::new(false)).unwrap();

        assert!(!result.is_empty());
        let best = result.best().unwrap();
        let duration = result.base_durations[best];
        assert!(
            duration.abs_diff(body_len) <= framerate / 10,
            "best duration {duration}, body {body_len}"
        );
        // rows are ordered by ascending base duration
        for pair in result.base_durations.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn estimates_with_full_penalty_pin_the_duration() {
        let framerate = 2000usize;
        let (mut audio, loop_start, body_len) = looped_track(framerate);
        crate::prep::fill_mono(&mut audio);
        #[allow(clippy::cast_precision_loss)]
        let cfg = LoopFinderConfig {
            t1_estimate: loop_start as f32 / framerate as f32,
            t2_estimate: (loop_start + body_len) as f32 / framerate as f32,
            tau_penalty: 1.0,
            t1_penalty: 1.0,
            t2_penalty: 1.0,
            tau_radius: 0.5,
            t1_radius: 0.5,
            t2_radius: 0.5,
            ..test_config()
        }
        .sanitized();
        #[allow(clippy::cast_precision_loss)]
        let result = run(&audio, &cfg, framerate as f32, 40.0, &AtomicBool::new(false)).unwrap();

        assert!(!result.is_empty());
        let tau_radius_frames = framerate / 2;
        for (&duration, row) in result.base_durations.iter().zip(&result.start_frames) {
            assert!(
                duration.abs_diff(body_len) <= tau_radius_frames,
                "duration {duration} strays from {body_len}"
            );
            for &start in row {
                assert!(
                    start.abs_diff(loop_start) <= framerate / 2,
                    "start {start} strays from {loop_start}"
                );
            }
        }
    }

    #[test]
    fn silence_yields_an_empty_degenerate_result() {
        let mut audio = AudioDataFloat {
            channel0: vec![0.0; 4000],
            channel1: vec![0.0; 4000],
            mono: None,
            num_frames: 4000,
        };
        crate::prep::fill_mono(&mut audio);
        // ignore windows cover the whole 2-second track
        let cfg = LoopFinderConfig {
            left_ignore: 1.0,
            right_ignore: 1.0,
            min_loop_length: 1.0,
            framerate_reduction_factor: 1,
            ..LoopFinderConfig::default()
        }
        .sanitized();
        let result = run(&audio, &cfg, 2000.0, 0.0, &AtomicBool::new(false)).unwrap();
        assert!(result.is_empty());
        assert!(result.degenerate);
        assert_eq!(result.confidences.len(), 0);
    }
}
