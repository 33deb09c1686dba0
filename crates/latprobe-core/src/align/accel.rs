//! Accelerometer latency
//!
//! The probe streams its own accelerometer readings after an `'o'` marker as
//! `"<t_us> <value>"` lines. Both traces record the same physical shaking,
//! so after putting them on a common value scale, the phone trace's delay
//! behind the probe trace is the shift with the highest correlation.

use super::numeric::{argmax, max, mean, min};
use super::shift::{find_shifts, smooth_entries, Sample, ShiftGrid};
use super::AlignError;

/// Marker preceding the probe's accelerometer samples
pub const DUMP_MARKER: char = 'o';

/// Line that ends the probe's accelerometer stream
pub const DUMP_END: &str = "end";

/// Half-width of the smoothing window applied to the probe trace
pub const SMOOTHING_WINDOW: usize = 4;

/// One phone accelerometer reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhoneAccelEvent {
    /// When the sensor callback ran, on the probe timebase (ms)
    pub callback_ms: f64,
    /// Sensor timestamp from the kernel, on the probe timebase (ms)
    pub kernel_ms: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccelResult {
    /// Phone delay behind the probe (ms)
    pub latency_ms: f64,
    /// Mean sensor-timestamp to callback delay (ms)
    pub kernel_to_callback_ms: f64,
    /// Correlation score per grid shift
    pub scores: Vec<f64>,
}

/// Parse the probe's accelerometer dump into samples (ms, raw value).
///
/// Everything up to and including the first `'o'` is ignored, as is a
/// trailing `"end"` line.
pub fn parse_accel_dump(dump: &str) -> Result<Vec<Sample>, AlignError> {
    let body = match dump.find(DUMP_MARKER) {
        Some(idx) => &dump[idx + DUMP_MARKER.len_utf8()..],
        None => dump,
    };
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != DUMP_END)
        .map(|line| {
            let mut parts = line.split_whitespace();
            let t_us = parts.next().and_then(|s| s.parse::<i64>().ok());
            let value = parts.next().and_then(|s| s.parse::<i64>().ok());
            match (t_us, value) {
                (Some(t_us), Some(value)) => Ok(Sample::new(t_us as f64 / 1000.0, value as f64)),
                _ => Err(AlignError::MalformedDump(line.to_string())),
            }
        })
        .collect()
}

/// Estimate accelerometer latency from the probe dump and phone readings.
pub fn accel_latency(
    dump: &str,
    phone_events: &[PhoneAccelEvent],
    grid: &ShiftGrid,
) -> Result<AccelResult, AlignError> {
    let mut probe = smooth_entries(&parse_accel_dump(dump)?, SMOOTHING_WINDOW);
    let (Some(first), Some(last)) = (probe.first().copied(), probe.last().copied()) else {
        return Err(AlignError::EmptyTrace("probe accelerometer"));
    };

    // Phone readings outside the probe span cannot be matched
    let mut phone: Vec<Sample> = phone_events
        .iter()
        .map(|e| Sample::new(e.callback_ms, e.value))
        .filter(|s| s.t >= first.t && s.t <= last.t)
        .collect();
    if phone.is_empty() {
        return Err(AlignError::EmptyTrace("phone accelerometer"));
    }

    // Rescale the probe trace onto the phone's range, then centre both
    let phone_values: Vec<f64> = phone.iter().map(|s| s.value).collect();
    let phone_mean = mean(&phone_values);
    let phone_min = min(&phone_values);
    let phone_range = max(&phone_values) - phone_min;
    let probe_values: Vec<f64> = probe.iter().map(|s| s.value).collect();
    let probe_min = min(&probe_values);
    let probe_range = max(&probe_values) - probe_min;
    let scale = if probe_range > 0.0 {
        phone_range / probe_range
    } else {
        0.0
    };
    for s in &mut probe {
        s.value = (s.value - probe_min) * scale + phone_min - phone_mean;
    }
    for s in &mut phone {
        s.value -= phone_mean;
    }

    let scores = find_shifts(&phone, &probe, grid);
    let latency_ms = grid.shift(argmax(&scores));

    let deltas: Vec<f64> = phone_events
        .iter()
        .map(|e| e.callback_ms - e.kernel_ms)
        .collect();
    let kernel_to_callback_ms = mean(&deltas);
    tracing::info!(latency_ms, kernel_to_callback_ms, "Accelerometer latency");

    Ok(AccelResult {
        latency_ms,
        kernel_to_callback_ms,
        scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;
    use std::fmt::Write;

    const PERIOD_MS: f64 = 100.0;

    fn probe_dump(duration_ms: i64) -> String {
        let mut dump = String::from("o\n");
        for ms in 0..=duration_ms {
            let value = 20_000.0 + 10_000.0 * (2.0 * PI * ms as f64 / PERIOD_MS).sin();
            writeln!(dump, "{} {}", ms * 1000, value.round() as i64).unwrap();
        }
        dump.push_str("end\n");
        dump
    }

    fn phone_events(latency_ms: f64) -> Vec<PhoneAccelEvent> {
        (0..577)
            .map(|i| {
                let t = 20.0 + 5.0 * i as f64;
                PhoneAccelEvent {
                    callback_ms: t,
                    kernel_ms: t - 1.5,
                    value: 9.8 + 4.0 * (2.0 * PI * (t - latency_ms) / PERIOD_MS).sin(),
                }
            })
            .collect()
    }

    #[test]
    fn test_parse_accel_dump() {
        let samples = parse_accel_dump("a12\no\n1000 5\n2500 -3\nend\n").unwrap();
        assert_eq!(
            samples,
            vec![Sample::new(1.0, 5.0), Sample::new(2.5, -3.0)]
        );
    }

    #[test]
    fn test_parse_accel_dump_rejects_garbage() {
        assert_eq!(
            parse_accel_dump("o\n1000 5\nnot a sample\n"),
            Err(AlignError::MalformedDump("not a sample".into()))
        );
    }

    #[test]
    fn test_accel_latency_recovers_delay() {
        let result =
            accel_latency(&probe_dump(3000), &phone_events(12.0), &ShiftGrid::default()).unwrap();
        assert_abs_diff_eq!(result.latency_ms, 12.0, epsilon = 0.3);
        assert_abs_diff_eq!(result.kernel_to_callback_ms, 1.5, epsilon = 1e-9);
        assert_eq!(result.scores.len(), 401);
    }

    #[test]
    fn test_accel_latency_empty_probe() {
        let err = accel_latency("o\n1000 1\n", &phone_events(12.0), &ShiftGrid::default())
            .unwrap_err();
        assert_eq!(err, AlignError::EmptyTrace("probe accelerometer"));
    }

    #[test]
    fn test_accel_latency_no_overlap() {
        let late: Vec<PhoneAccelEvent> = phone_events(0.0)
            .into_iter()
            .map(|mut e| {
                e.callback_ms += 10_000.0;
                e
            })
            .collect();
        let err = accel_latency(&probe_dump(3000), &late, &ShiftGrid::default()).unwrap_err();
        assert_eq!(err, AlignError::EmptyTrace("phone accelerometer"));
    }
}
