//! Bucketing of continuous field values
//!
//! A value `v` is stored as the integer bucket `floor((v - shift) / precision + 0.5)`
//! and read back as `bucket * precision + shift`. The shift is derived once per
//! field from its declared minimum (see [`range_shift`]).

use serde::{Deserialize, Serialize};

/// Precision used for fields that no definition declares.
pub const DEFAULT_PRECISION: f64 = 1e-7;

/// Upper bound on walk steps in [`range_shift`]; a declared minimum far below
/// zero with a tiny precision would otherwise spin for a very long time.
const MAX_SHIFT_STEPS: u64 = 10_000_000;

/// Precision and range shift of one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantizer {
    pub precision: f64,
    pub shift: f64,
}

impl Quantizer {
    pub const DEFAULT: Self = Self {
        precision: DEFAULT_PRECISION,
        shift: 0.0,
    };

    pub const fn new(precision: f64, shift: f64) -> Self {
        Self { precision, shift }
    }

    /// Quantizer for a field declared as `[min, ..]` with the given precision.
    pub fn for_range(min: f64, precision: f64) -> Self {
        Self::new(precision, range_shift(min, precision))
    }

    pub fn bucket(&self, value: f64) -> i64 {
        ((value - self.shift) / self.precision + 0.5).floor() as i64
    }

    pub fn value(&self, bucket: i64) -> f64 {
        bucket as f64 * self.precision + self.shift
    }

    /// Round `value` onto the bucket grid.
    pub fn snap(&self, value: f64) -> f64 {
        self.value(self.bucket(value))
    }
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn close_to_integer(value: f64, precision: f64) -> bool {
    (value - value.trunc()).abs() < 0.1 * precision
}

/// Offset that places bucket 0 at a stable point of a field's range.
///
/// Starting from `min`, walk up by `precision` while the value is negative. A
/// value within a tenth of a precision of an integer yields shift 0 (the grid
/// already passes through zero); otherwise the first non-negative value
/// reached is the shift. Non-negative minimums are their own shift.
pub fn range_shift(min: f64, precision: f64) -> f64 {
    if !(precision > 0.0) || !min.is_finite() {
        return 0.0;
    }

    let mut current = min;
    let mut steps = 0u64;
    while current < 0.0 {
        if close_to_integer(current, precision) {
            return 0.0;
        }
        if steps >= MAX_SHIFT_STEPS {
            // Jump straight to the first grid point at or above zero.
            let remaining = (-current / precision).ceil();
            return (current + remaining * precision).max(0.0);
        }
        current += precision;
        steps += 1;
    }
    current
}

/// Whether a field name denotes an angle declared in degrees.
pub fn is_angle_field(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("angle") || lower.contains("gimbal")
}

/// Degree-to-radian heuristic applied once when a definition is finalized.
///
/// Fields with an explicit precision convert when the precision is at least
/// 0.1; bound-only entries convert when either bound has magnitude 2 or more.
pub fn declared_in_degrees(min: f64, max: f64, precision: Option<f64>) -> bool {
    match precision {
        Some(precision) => precision >= 0.1,
        None => min.abs() >= 2.0 || max.abs() >= 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_rounds_half_up() {
        let q = Quantizer::new(0.5, 0.0);
        assert_eq!(q.bucket(0.0), 0);
        assert_eq!(q.bucket(0.24), 0);
        assert_eq!(q.bucket(0.25), 1);
        assert_eq!(q.bucket(1.0), 2);
        assert_eq!(q.bucket(-0.26), -1);
        assert_eq!(q.value(2), 1.0);
    }

    #[test]
    fn test_range_shift_zero_for_integral_minimum() {
        assert_eq!(range_shift(-2.0, 0.5), 0.0);
        assert_eq!(range_shift(-35.0, 5.0), 0.0);
    }

    #[test]
    fn test_range_shift_for_offset_minimum() {
        let shift = range_shift(-2.25, 0.5);
        assert!((shift - 0.25).abs() < 1e-12);
        let q = Quantizer::for_range(-2.25, 0.5);
        assert_eq!(q.bucket(-2.25), -5);
        assert_eq!(q.bucket(0.25), 0);
    }

    #[test]
    fn test_range_shift_non_negative_minimum() {
        assert_eq!(range_shift(0.0, 1.0), 0.0);
        assert_eq!(range_shift(3.0, 1.0), 3.0);
    }

    #[test]
    fn test_range_shift_far_below_zero() {
        let shift = range_shift(-1.0e6 - 0.5, 1e-3);
        assert!(shift >= 0.0);
        assert!(shift < 1e-3 + 1e-9);
    }

    #[test]
    fn test_snap_is_idempotent() {
        let q = Quantizer::for_range(-5.0, 0.3);
        for v in [-5.0, -1.37, 0.0, 0.149, 0.151, 2.3, 7.77] {
            let snapped = q.snap(v);
            assert!((snapped - v).abs() <= q.precision / 2.0 + 1e-9);
            assert_eq!(q.bucket(snapped), q.bucket(v));
        }
    }

    #[test]
    fn test_angle_heuristics() {
        assert!(is_angle_field("angleX"));
        assert!(is_angle_field("gimbalMDPX"));
        assert!(!is_angle_field("thrust"));

        assert!(declared_in_degrees(-35.0, 35.0, Some(5.0)));
        assert!(!declared_in_degrees(-0.5, 0.5, Some(0.05)));
        assert!(declared_in_degrees(-15.0, 15.0, None));
        assert!(!declared_in_degrees(-1.0, 1.0, None));
    }
}
