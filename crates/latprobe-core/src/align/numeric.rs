//! Numeric helpers over `f64` sequences
//!
//! Small, allocation-light building blocks for the shift searches. Empty
//! input never panics: central-tendency helpers return NaN and index
//! helpers return 0.

use super::AlignError;

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of an already sorted slice; NaN for an empty slice.
///
/// Sorting is the caller's job.
///
/// # Example
/// ```
/// use latprobe_core::align::numeric::median;
///
/// assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
/// assert!(median(&[]).is_nan());
/// ```
pub fn median(sorted: &[f64]) -> f64 {
    let len = sorted.len();
    if len == 0 {
        return f64::NAN;
    }
    if len % 2 == 1 {
        sorted[len / 2]
    } else {
        0.5 * (sorted[len / 2] + sorted[len / 2 - 1])
    }
}

/// Population standard deviation; NaN for an empty slice.
pub fn stdev(values: &[f64]) -> f64 {
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (sum_sq / values.len() as f64).sqrt()
}

/// Index of the first minimum; 0 for an empty slice.
pub fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v < values[best] {
            best = i;
        }
    }
    best
}

/// Index of the first maximum; 0 for an empty slice.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Values of `values` at the positions where `indicator == wanted`.
pub fn extract(indicator: &[i32], wanted: i32, values: &[f64]) -> Result<Vec<f64>, AlignError> {
    if indicator.len() != values.len() {
        return Err(AlignError::LengthMismatch {
            indicator: indicator.len(),
            values: values.len(),
        });
    }
    Ok(indicator
        .iter()
        .zip(values)
        .filter(|&(&i, _)| i == wanted)
        .map(|(_, &v)| v)
        .collect())
}

/// Piecewise-linear interpolation of `(xp, yp)` at the points `x`.
///
/// `x` and `xp` must both be increasing and `yp` must be as long as `xp`.
/// A single merge pass over both sequences. Query points outside
/// `[xp[0], xp[last]]` are left at 0.0.
///
/// # Example
/// ```
/// use latprobe_core::align::numeric::interp;
///
/// let y = interp(&[5.0, 6.0, 16.0, 17.0], &[0.0, 10.0, 12.0, 18.0], &[35.0, 50.0, 75.0, 93.0]);
/// assert_eq!(y, vec![42.5, 44.0, 87.0, 90.0]);
/// ```
pub fn interp(x: &[f64], xp: &[f64], yp: &[f64]) -> Vec<f64> {
    debug_assert_eq!(xp.len(), yp.len(), "xp and yp must have equal length");
    let mut y = vec![0.0; x.len()];
    let Some(&first) = xp.first() else {
        return y;
    };

    // Skip queries before the data
    let mut i = x.iter().take_while(|&&v| v < first).count();
    let mut ip = 0;
    while i < x.len() {
        while ip < xp.len() && xp[ip] < x[i] {
            ip += 1;
        }
        if ip >= xp.len() {
            break;
        }
        y[i] = if xp[ip] == x[i] {
            yp[ip]
        } else {
            // x[i] >= xp[0] and xp[ip] > x[i] so ip >= 1
            let dy = yp[ip] - yp[ip - 1];
            let dx = xp[ip] - xp[ip - 1];
            yp[ip - 1] + dy / dx * (x[i] - xp[ip - 1])
        };
        i += 1;
    }
    y
}

/// Smallest value, NaN when empty
pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(f64::NAN)
}

/// Largest value, NaN when empty
pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(f64::NAN)
}
