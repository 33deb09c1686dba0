//! Remote clock model
//!
//! All times are microseconds. Local time is [`local_micros`], a monotonic
//! clock counted from the first time this process asked for it.
//! `base_time` is the local time at which the probe clock read zero, so
//! `local_micros() - base_time` is the best available reading of the probe
//! clock.
//!
//! Immediately after a sync or a lag refresh, for the true probe time
//! `t_remote`:
//!
//! ```text
//! t_remote + min_lag <= local_micros() - base_time <= t_remote + max_lag
//! ```
//!
//! The bounds drift apart from reality as the two oscillators disagree;
//! [`RemoteClockInfo::mean_lag`] is the point estimate of that drift.

pub mod sync;

use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic local time in microseconds
pub fn local_micros() -> i64 {
    epoch().elapsed().as_micros() as i64
}

/// Best knowledge of the probe clock
///
/// A value type: every sync produces a fresh snapshot and readers never see
/// a partially updated one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteClockInfo {
    /// Local time (µs) at which the probe clock read zero
    pub base_time: i64,
    /// Lower lag bound (µs)
    pub min_lag: i32,
    /// Upper lag bound (µs)
    pub max_lag: i32,
}

impl RemoteClockInfo {
    /// Current best estimate of the probe clock reading (µs)
    pub fn micros(&self) -> i64 {
        local_micros() - self.base_time
    }

    /// Midpoint of the lag bounds
    pub fn mean_lag(&self) -> i32 {
        // Widen so extreme bounds cannot overflow
        ((i64::from(self.min_lag) + i64::from(self.max_lag)) / 2) as i32
    }

    /// Width of the uncertainty interval (µs)
    pub fn uncertainty(&self) -> i64 {
        i64::from(self.max_lag) - i64::from(self.min_lag)
    }

    /// Same base time with new lag bounds
    pub fn with_lag(&self, min_lag: i32, max_lag: i32) -> Self {
        Self {
            base_time: self.base_time,
            min_lag,
            max_lag,
        }
    }

    /// Convert a probe timestamp (µs) to local time (µs)
    pub fn to_local(&self, t_remote: i64) -> i64 {
        t_remote + self.base_time
    }
}

impl fmt::Display for RemoteClockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Remote clock [us]: current time = {} baseTime = {} lagBounds = ({}, {})",
            self.micros(),
            self.base_time,
            self.min_lag,
            self.max_lag
        )
    }
}
