//! Signal alignment
//!
//! Turns two independently clocked event traces (locally captured samples
//! and probe-observed events) into a latency estimate:
//! - `numeric`: interpolation and small statistics helpers
//! - `shift`: correlation and standard-deviation shift searches
//! - `drag`: drag latency from touch positions and beam crossings
//! - `accel`: accelerometer latency from phone and probe accelerometer traces

pub mod accel;
pub mod drag;
pub mod numeric;
pub mod shift;

use thiserror::Error;

pub use accel::{accel_latency, parse_accel_dump, AccelResult, PhoneAccelEvent};
pub use drag::{drag_latency, Crossing, DragResult, TouchSample};
pub use shift::{
    best_shift, find_best_shift, find_shifts, smooth_entries, BestShiftSearch, Sample, ShiftGrid,
};

/// Errors that can occur while aligning traces
#[derive(Error, Debug, PartialEq)]
pub enum AlignError {
    #[error("Indicator length {indicator} does not match value length {values}")]
    LengthMismatch { indicator: usize, values: usize },

    #[error("Not enough {what}: need at least {required}, got {actual}")]
    InsufficientData {
        what: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("First beam crossing must be into the beam (value 0), got {0}")]
    BadFirstCrossing(i32),

    #[error("Empty {0} trace")]
    EmptyTrace(&'static str),

    #[error("Malformed accelerometer dump line: {0:?}")]
    MalformedDump(String),
}
