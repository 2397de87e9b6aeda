//! Epidemic statistics over count series.
//!
//! All functions are pure and total: numeric edge cases such as empty
//! series, zero counts and zero denominators map to documented sentinel
//! values instead of errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reproduction number reported when no growth rate can be fitted.
pub const NEUTRAL_R: f64 = 1.0;

/// Bounds of the R0 estimate.
pub const R0_BOUNDS: (f64, f64) = (0.5, 10.0);

/// Growth rate reported when the past count is zero but the current one is not.
pub const UNBOUNDED_GROWTH: f64 = 100.0;

/// Default window of [`calculate_growth_rate`], in days.
pub const GROWTH_RATE_WINDOW_DAYS: f64 = 3.0;

/// Number of trailing values averaged by [`calculate_trend`].
pub const TREND_WINDOW: usize = 5;

/// Half-width of the band classified as [`Trend::Stable`].
pub const TREND_TOLERANCE: f64 = 0.1;

/// Number of steps covering `window_days`, at least two.
pub fn window_steps(window_days: f64, time_step: f64) -> usize {
    ((window_days / time_step).floor() as usize).max(2)
}

/// Exponential growth rate per day fitted to the positive entries of `series`.
///
/// Fits `ln I(t) = a + lambda * t` by least squares, with `t = index * time_step`.
/// Zero entries are skipped. Returns `None` with fewer than two positive entries.
pub fn growth_exponent(series: &[usize], time_step: f64) -> Option<f64> {
    let points: Vec<(f64, f64)> = series
        .iter()
        .enumerate()
        .filter(|&(_, &val)| val > 0)
        .map(|(idx, &val)| (idx as f64 * time_step, (val as f64).ln()))
        .collect();
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let t_mean = points.iter().map(|p| p.0).sum::<f64>() / n;
    let y_mean = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (cov, var) = points.iter().fold((0.0, 0.0), |(cov, var), &(t, y)| {
        (cov + (t - t_mean) * (y - y_mean), var + (t - t_mean).powi(2))
    });
    if var <= 0.0 {
        return None;
    }
    Some(cov / var)
}

/// Effective reproduction number from the trailing `window_days` of `series`.
///
/// Uses `Rt = 1 + lambda * infectious_period`, floored at zero, where `lambda`
/// is the [`growth_exponent`] of the window. Returns [`NEUTRAL_R`] for series
/// shorter than two entries or windows with fewer than two positive entries.
pub fn calculate_rt(
    series: &[usize],
    infectious_period: f64,
    time_step: f64,
    window_days: f64,
) -> f64 {
    if series.len() < 2 {
        return NEUTRAL_R;
    }
    let n_vals = window_steps(window_days, time_step).min(series.len());
    let recent = &series[series.len() - n_vals..];
    match growth_exponent(recent, time_step) {
        Some(lambda) => (1.0 + lambda * infectious_period).max(0.0),
        None => NEUTRAL_R,
    }
}

/// Basic reproduction number from the early phase of `series`.
///
/// The early phase is the first tenth of the series, capped at 20 days and
/// at least 5 entries. The estimate is clamped to [`R0_BOUNDS`]; edge cases
/// follow [`calculate_rt`].
pub fn estimate_r0(
    series: &[usize],
    infectious_period: f64,
    time_step: f64,
    population: usize,
) -> f64 {
    if series.len() < 2 || population == 0 {
        return NEUTRAL_R;
    }
    let max_early = (20.0 / time_step).floor() as usize;
    let early_end = (series.len() / 10).min(max_early).max(5).min(series.len());
    match growth_exponent(&series[..early_end], time_step) {
        Some(lambda) => (1.0 + lambda * infectious_period).clamp(R0_BOUNDS.0, R0_BOUNDS.1),
        None => NEUTRAL_R,
    }
}

/// Shortest observed doubling time, in days.
///
/// Considers every index `t` in a growth phase (`0 < I(t) < I(t+1)`) and the
/// first later index where the count reaches `2 * I(t)`. Returns `None` if
/// no growth phase ever doubles.
pub fn calculate_doubling_time(series: &[usize], time_step: f64) -> Option<f64> {
    let mut best: Option<usize> = None;
    for t in 0..series.len().saturating_sub(1) {
        let base = series[t];
        if base == 0 || series[t + 1] <= base {
            continue;
        }
        let horizon = match best {
            Some(lag) => (t + lag).min(series.len() - 1),
            None => series.len() - 1,
        };
        if let Some(lag) = (t + 1..=horizon)
            .find(|&k| series[k] / 2 >= base)
            .map(|k| k - t)
        {
            best = Some(best.map_or(lag, |b| b.min(lag)));
        }
    }
    best.map(|lag| lag as f64 * time_step)
}

/// Percentage of the population ever infected, in `[0, 100]`.
///
/// `population` must be positive.
pub fn calculate_attack_rate(total_infected: usize, population: usize) -> f64 {
    debug_assert!(population > 0, "population must be positive");
    (100.0 * total_infected as f64 / population as f64).clamp(0.0, 100.0)
}

/// Percentage of infections that ended in death, in `[0, 100]`.
///
/// Zero when there were no infections.
pub fn calculate_case_fatality_rate(total_infected: usize, deaths: usize) -> f64 {
    if total_infected == 0 {
        return 0.0;
    }
    (100.0 * deaths as f64 / total_infected as f64).clamp(0.0, 100.0)
}

/// Relative change `(I_now - I_past) / I_past` over the trailing `window_days`.
///
/// Zero for series shorter than two entries or when both counts are zero;
/// [`UNBOUNDED_GROWTH`] when only the past count is zero. The result never
/// exceeds [`UNBOUNDED_GROWTH`].
pub fn calculate_growth_rate(series: &[usize], time_step: f64, window_days: f64) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let n_vals = window_steps(window_days, time_step).min(series.len());
    let past = series[series.len() - n_vals] as f64;
    let now = series[series.len() - 1] as f64;
    if past == 0.0 {
        return if now == 0.0 { 0.0 } else { UNBOUNDED_GROWTH };
    }
    ((now - past) / past).min(UNBOUNDED_GROWTH)
}

/// Maximum of `series` and the index of its first occurrence; `(0, 0)` if empty.
pub fn calculate_peak_metrics(series: &[usize]) -> (usize, usize) {
    series
        .iter()
        .enumerate()
        .fold((0, 0), |(max, i_max), (idx, &val)| {
            if val > max { (val, idx) } else { (max, i_max) }
        })
}

/// Number of entries strictly above `threshold`.
pub fn calculate_epidemic_duration(series: &[usize], threshold: usize) -> usize {
    series.iter().filter(|&&val| val > threshold).count()
}

/// Direction of an epidemic indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
        })
    }
}

/// Classify the mean of the last [`TREND_WINDOW`] values against `center`.
///
/// Use a center of 1 for reproduction numbers and 0 for growth rates.
/// Means within [`TREND_TOLERANCE`] of the center, and series shorter
/// than two values, are [`Trend::Stable`].
pub fn calculate_trend(series: &[f64], center: f64) -> Trend {
    if series.len() < 2 {
        return Trend::Stable;
    }
    let recent = &series[series.len().saturating_sub(TREND_WINDOW)..];
    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    if mean > center + TREND_TOLERANCE {
        Trend::Increasing
    } else if mean < center - TREND_TOLERANCE {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Trailing moving average of width `window`.
///
/// The output has the input's length. The first `window - 1` entries
/// average over the values available so far. A window of zero acts as one.
pub fn smooth_series(series: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut sum = 0.0;
    let mut smoothed = Vec::with_capacity(series.len());
    for (idx, &val) in series.iter().enumerate() {
        sum += val;
        if idx >= window {
            sum -= series[idx - window];
        }
        smoothed.push(sum / (idx + 1).min(window) as f64);
    }
    smoothed
}

/// Running mean and variance (Welford).
#[derive(Debug, Clone)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: if self.n_vals > 0 { self.mean } else { f64::NAN },
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}
