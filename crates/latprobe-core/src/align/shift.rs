//! Time-shift searches between two event traces
//!
//! Two brute-force searches over a fixed grid of candidate shifts:
//! - [`find_shifts`] scores every shift by a squared-product correlation and
//!   the best shift is the `argmax` (accelerometer-style traces).
//! - [`find_best_shift`] picks the shift that makes sparse events land on the
//!   flattest stretch of a dense reference trace (`argmin` of the standard
//!   deviation), refined over successively finer grids (drag-style traces).
//!
//! The grid ranges bound what can be measured: a latency outside
//! `[0, steps * step_ms)` is not found, it lands on the grid edge.

use serde::{Deserialize, Serialize};

use super::numeric::{argmax, argmin, interp, stdev};

/// One timestamped sample of an event trace
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Time in milliseconds
    pub t: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(t: f64, value: f64) -> Self {
        Self { t, value }
    }
}

fn default_grid_steps() -> usize {
    401
}

fn default_grid_step_ms() -> f64 {
    0.1
}

/// Candidate shifts for the correlation search: `i * step_ms` for
/// `i in 0..steps`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftGrid {
    #[serde(default = "default_grid_steps")]
    pub steps: usize,
    #[serde(default = "default_grid_step_ms")]
    pub step_ms: f64,
}

impl Default for ShiftGrid {
    fn default() -> Self {
        Self {
            steps: default_grid_steps(),
            step_ms: default_grid_step_ms(),
        }
    }
}

impl ShiftGrid {
    /// Shift (ms) at grid index `i`
    pub fn shift(&self, i: usize) -> f64 {
        i as f64 * self.step_ms
    }

    /// Largest measurable shift (ms)
    pub fn range_ms(&self) -> f64 {
        self.shift(self.steps.saturating_sub(1))
    }
}

fn default_search_steps() -> usize {
    1500
}

fn default_search_passes() -> Vec<f64> {
    vec![0.1, 0.01]
}

/// Grid for the standard-deviation search
///
/// Each pass evaluates `steps` shifts spaced by its step, centred on the
/// best shift of the previous pass. The first pass is centred on
/// `passes_ms[0] * steps / 2`, so it covers `[0, passes_ms[0] * steps)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestShiftSearch {
    #[serde(default = "default_search_steps")]
    pub steps: usize,
    /// Step size of each refinement pass, coarse to fine (ms)
    #[serde(default = "default_search_passes")]
    pub passes_ms: Vec<f64>,
}

impl Default for BestShiftSearch {
    fn default() -> Self {
        Self {
            steps: default_search_steps(),
            passes_ms: default_search_passes(),
        }
    }
}

/// Correlation score of every shift in `grid`.
///
/// For each shift the probe trace is read at `phone.t - shift` and the score
/// is `sum((phone.value * probe_value)^2)`. Both traces must be sorted by
/// time and already on the same value scale.
pub fn find_shifts(phone: &[Sample], probe: &[Sample], grid: &ShiftGrid) -> Vec<f64> {
    let probe_t: Vec<f64> = probe.iter().map(|s| s.t).collect();
    let probe_v: Vec<f64> = probe.iter().map(|s| s.value).collect();

    let mut shifted = vec![0.0; phone.len()];
    (0..grid.steps)
        .map(|i| {
            let shift = grid.shift(i);
            for (slot, s) in shifted.iter_mut().zip(phone) {
                *slot = s.t - shift;
            }
            let interpolated = interp(&shifted, &probe_t, &probe_v);
            phone
                .iter()
                .zip(&interpolated)
                .map(|(p, w)| (p.value * w).powi(2))
                .sum()
        })
        .collect()
}

/// Shift (ms) with the highest correlation score
pub fn best_shift(scores: &[f64], grid: &ShiftGrid) -> f64 {
    grid.shift(argmax(scores))
}

fn shift_error(
    events_t: &[f64],
    ref_t: &[f64],
    ref_y: &[f64],
    shift: f64,
    buf: &mut Vec<f64>,
) -> f64 {
    buf.clear();
    buf.extend(events_t.iter().map(|t| t + shift));
    stdev(&interp(buf.as_slice(), ref_t, ref_y))
}

/// Shift (ms) that makes `events_t` land on the flattest part of the
/// reference trace `(ref_t, ref_y)`.
///
/// `events_t` and `ref_t` must be increasing. Returns 0.0 when the search
/// has no passes.
pub fn find_best_shift(
    events_t: &[f64],
    ref_t: &[f64],
    ref_y: &[f64],
    search: &BestShiftSearch,
) -> f64 {
    let Some(&first_step) = search.passes_ms.first() else {
        return 0.0;
    };
    let steps = search.steps as f64;
    let mut best = first_step * steps / 2.0;
    let mut errors = vec![0.0; search.steps];
    let mut buf = Vec::with_capacity(events_t.len());

    for &step in &search.passes_ms {
        let start = best - step * steps / 2.0;
        for (i, slot) in errors.iter_mut().enumerate() {
            *slot = shift_error(events_t, ref_t, ref_y, start + step * i as f64, &mut buf);
        }
        best = start + step * argmin(&errors) as f64;
        tracing::trace!(step_ms = step, best_shift_ms = best, "find_best_shift pass");
    }
    best
}

/// Centred moving average over `2 * window + 1` samples.
///
/// Edge samples without a full window on both sides are dropped; a trace
/// shorter than `2 * window + 1` yields nothing.
pub fn smooth_entries(entries: &[Sample], window: usize) -> Vec<Sample> {
    let width = 2 * window + 1;
    if entries.len() < width {
        return Vec::new();
    }
    entries
        .windows(width)
        .map(|w| {
            let avg = w.iter().map(|s| s.value).sum::<f64>() / width as f64;
            Sample::new(w[window].t, avg)
        })
        .collect()
}
