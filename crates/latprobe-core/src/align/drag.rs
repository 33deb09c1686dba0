//! Drag latency
//!
//! A finger drags up and down across a laser beam that the probe watches.
//! Each beam crossing happens at one of two fixed screen heights (the beam's
//! upper and lower edge), so once the crossing times are shifted by the
//! touch latency, the reported touch position at those times is constant
//! per edge. The latency is the shift minimizing the spread of those
//! positions, averaged over both edges.

use super::numeric::extract;
use super::shift::{find_best_shift, BestShiftSearch};
use super::AlignError;
use crate::protocol::TriggerMessage;

/// Minimum touch samples for a usable trace
pub const MIN_TOUCH_SAMPLES: usize = 100;

/// Minimum beam crossings inside the touch span
pub const MIN_CROSSINGS: usize = 8;

/// A touch position report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchSample {
    /// Event time on the probe timebase (µs)
    pub t_us: i64,
    /// Vertical position (px)
    pub y: f64,
}

/// A beam crossing reported by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    /// Probe time (µs)
    pub t_us: i64,
    /// 0 = into the beam (light off), 1 = out of the beam
    pub value: i32,
}

impl From<TriggerMessage> for Crossing {
    fn from(msg: TriggerMessage) -> Self {
        Self {
            t_us: msg.t,
            value: msg.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragResult {
    /// Average of the per-edge shifts (ms)
    pub latency_ms: f64,
    /// Best shift for each beam edge (ms)
    pub side_shifts_ms: [f64; 2],
    /// Crossings inside the touch span that were used
    pub crossings_used: usize,
}

/// Edge label of the `i`-th crossing: the edges alternate 0, 1, 1, 0, 0, ...
fn side_of(i: usize) -> i32 {
    (((i + 1) / 2) % 2) as i32
}

/// Estimate drag latency from touch reports and beam crossings.
///
/// Both inputs must be sorted by time. Times are rebased to the first touch
/// and converted to milliseconds; crossings outside the touch span are
/// dropped.
pub fn drag_latency(
    touches: &[TouchSample],
    crossings: &[Crossing],
    search: &BestShiftSearch,
) -> Result<DragResult, AlignError> {
    if touches.len() < MIN_TOUCH_SAMPLES {
        return Err(AlignError::InsufficientData {
            what: "touch samples",
            required: MIN_TOUCH_SAMPLES,
            actual: touches.len(),
        });
    }
    let t0 = touches[0].t_us;
    let t_last = touches[touches.len() - 1].t_us;

    let to_ms = |t_us: i64| (t_us - t0) as f64 / 1000.0;
    let touch_t: Vec<f64> = touches.iter().map(|s| to_ms(s.t_us)).collect();
    let touch_y: Vec<f64> = touches.iter().map(|s| s.y).collect();

    let usable: Vec<&Crossing> = crossings
        .iter()
        .filter(|c| (t0..=t_last).contains(&c.t_us))
        .collect();
    if usable.len() < MIN_CROSSINGS {
        return Err(AlignError::InsufficientData {
            what: "beam crossings overlapping touch events",
            required: MIN_CROSSINGS,
            actual: usable.len(),
        });
    }
    if usable[0].value != 0 {
        return Err(AlignError::BadFirstCrossing(usable[0].value));
    }

    let crossing_t: Vec<f64> = usable.iter().map(|c| to_ms(c.t_us)).collect();
    let sides: Vec<i32> = (0..usable.len()).map(side_of).collect();

    let mut side_shifts_ms = [0.0; 2];
    for (side, slot) in side_shifts_ms.iter_mut().enumerate() {
        let side_t = extract(&sides, side as i32, &crossing_t)?;
        *slot = find_best_shift(&side_t, &touch_t, &touch_y, search);
        tracing::debug!(side, shift_ms = *slot, "Drag edge shift");
    }
    let latency_ms = (side_shifts_ms[0] + side_shifts_ms[1]) / 2.0;
    tracing::info!(latency_ms, crossings = usable.len(), "Drag latency");

    Ok(DragResult {
        latency_ms,
        side_shifts_ms,
        crossings_used: usable.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    const PERIOD_MS: f64 = 400.0;
    const AMPLITUDE: f64 = 100.0;
    const BEAM_HALF_WIDTH: f64 = 10.0;

    fn finger(t_ms: f64) -> f64 {
        AMPLITUDE * (2.0 * PI * t_ms / PERIOD_MS).cos()
    }

    /// Touch reports lagging the finger by `latency_ms`, one per ms
    fn touches(latency_ms: f64, duration_ms: i64) -> Vec<TouchSample> {
        (0..=duration_ms)
            .map(|ms| TouchSample {
                t_us: ms * 1000,
                y: finger(ms as f64 - latency_ms),
            })
            .collect()
    }

    /// Crossings of the beam edges at `y = ±BEAM_HALF_WIDTH`, finger starting
    /// above the beam and moving down
    fn crossings(until_ms: f64) -> Vec<Crossing> {
        let top = PERIOD_MS / (2.0 * PI) * (BEAM_HALF_WIDTH / AMPLITUDE).acos();
        let bottom = PERIOD_MS / (2.0 * PI) * (-BEAM_HALF_WIDTH / AMPLITUDE).acos();
        let mut out = Vec::new();
        let mut k = 0.0;
        loop {
            let base = k * PERIOD_MS;
            let times = [
                (base + top, 0),
                (base + bottom, 1),
                (base + PERIOD_MS - bottom, 0),
                (base + PERIOD_MS - top, 1),
            ];
            for (t, value) in times {
                if t > until_ms {
                    return out;
                }
                out.push(Crossing {
                    t_us: (t * 1000.0).round() as i64,
                    value,
                });
            }
            k += 1.0;
        }
    }

    #[test]
    fn test_side_labels_alternate_in_pairs() {
        let sides: Vec<i32> = (0..8).map(side_of).collect();
        assert_eq!(sides, vec![0, 1, 1, 0, 0, 1, 1, 0]);
    }

    #[test]
    fn test_drag_latency_recovers_delay() {
        let latency = 30.0;
        let result = drag_latency(
            &touches(latency, 2000),
            &crossings(1800.0),
            &BestShiftSearch::default(),
        )
        .unwrap();

        assert_eq!(result.crossings_used, 18);
        assert_abs_diff_eq!(result.side_shifts_ms[0], latency, epsilon = 0.05);
        assert_abs_diff_eq!(result.side_shifts_ms[1], latency, epsilon = 0.05);
        assert_abs_diff_eq!(result.latency_ms, latency, epsilon = 0.05);
    }

    #[test]
    fn test_crossings_outside_touch_span_are_dropped() {
        let mut all = vec![Crossing {
            t_us: -5_000,
            value: 1,
        }];
        all.extend(crossings(1800.0));
        all.push(Crossing {
            t_us: 5_000_000,
            value: 0,
        });
        let result =
            drag_latency(&touches(30.0, 2000), &all, &BestShiftSearch::default()).unwrap();
        assert_eq!(result.crossings_used, 18);
    }

    #[test]
    fn test_too_few_touches() {
        let err = drag_latency(
            &touches(30.0, 50),
            &crossings(1800.0),
            &BestShiftSearch::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            AlignError::InsufficientData {
                what: "touch samples",
                required: MIN_TOUCH_SAMPLES,
                actual: 51,
            }
        );
    }

    #[test]
    fn test_too_few_crossings() {
        let err = drag_latency(
            &touches(30.0, 2000),
            &crossings(600.0),
            &BestShiftSearch::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AlignError::InsufficientData { actual: 6, .. }
        ));
    }

    #[test]
    fn test_first_crossing_must_enter_beam() {
        let all = crossings(1800.0);
        let err = drag_latency(&touches(30.0, 2000), &all[1..], &BestShiftSearch::default())
            .unwrap_err();
        assert_eq!(err, AlignError::BadFirstCrossing(1));
    }

    #[test]
    fn test_crossing_from_trigger() {
        let msg = TriggerMessage::parse_line("G L 12902345 1 1").unwrap();
        let crossing = Crossing::from(msg);
        assert_eq!(crossing.t_us, 12902345);
        assert_eq!(crossing.value, 1);
    }
}
