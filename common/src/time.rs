// Time helpers shared by the supervisor
//
// Limits are configured as floating point seconds and stored as signed
// `TimeDelta`s: the remaining budget of a test may become negative after
// accounting and that state has to be representable.

use chrono::TimeDelta;

// Convert configured seconds into a signed delta
// Returns None for NaN, infinities and values out of the nanosecond range
pub fn delta_from_secs(secs: f64) -> Option<TimeDelta> {
    let nanos = secs * 1e9;
    if !nanos.is_finite() || nanos.abs() >= i64::MAX as f64 {
        return None;
    }

    Some(TimeDelta::nanoseconds(nanos.round() as i64))
}

// Inverse of delta_from_secs, used for reports and messages
pub fn delta_as_secs_f64(delta: TimeDelta) -> f64 {
    delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) / 1e9
}

// Human readable seconds, `10s`, `2.5s`, `-0.001s`
pub fn format_secs(delta: TimeDelta) -> String {
    format!("{}s", delta_as_secs_f64(delta))
}
