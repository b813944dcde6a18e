//! Conversions between real-valued features and the fixed-point domain.

use crate::model::SCALE;

/// Convert a real value into fixed-point, rounding to the nearest micro unit.
#[inline]
pub fn to_fixed(value: f64) -> i64 {
    (value * SCALE as f64).round() as i64
}

/// Convert a fixed-point value back to `f64`.
#[inline]
pub fn from_fixed(value: i64) -> f64 {
    value as f64 / SCALE as f64
}

/// Logistic function, numerically stable for large magnitudes.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_roundtrip() {
        assert_eq!(to_fixed(7.0), 7 * SCALE);
        assert_eq!(to_fixed(0.1234564), 123_456);
        assert_eq!(to_fixed(-2.5), -2_500_000);
        assert!((from_fixed(to_fixed(60.25)) - 60.25).abs() < 1e-9);
    }

    #[test]
    fn test_sigmoid_bounds() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(40.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(2.0) > 0.85);
        assert!((sigmoid(3.0) + sigmoid(-3.0) - 1.0).abs() < 1e-12);
    }
}
