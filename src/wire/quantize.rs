//! Fixed-point conversion for poses and inputs

/// Fixed-point units per world unit
pub const SCALE: f32 = 10.0;

/// Convert a world value to fixed point, saturating at the i32 range
///
/// NaN maps to zero.
#[inline]
pub fn quantize(value: f32) -> i32 {
    // `as` saturates for out-of-range floats and maps NaN to 0
    (value * SCALE).round() as i32
}

#[inline]
pub fn dequantize(value: i32) -> f32 {
    value as f32 / SCALE
}

/// Convert a distance in world units (meters) to fixed-point units
#[inline]
pub fn meters(value: f32) -> i32 {
    quantize(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_rounds_to_nearest() {
        assert_eq!(quantize(1.04), 10);
        assert_eq!(quantize(1.06), 11);
        assert_eq!(quantize(-2.5), -25);
        assert_eq!(quantize(0.0), 0);
    }

    #[test]
    fn test_quantize_saturates() {
        assert_eq!(quantize(f32::MAX), i32::MAX);
        assert_eq!(quantize(f32::MIN), i32::MIN);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn test_dequantize_inverts_scale() {
        assert_eq!(dequantize(25), 2.5);
        assert_eq!(dequantize(-10), -1.0);
        assert_eq!(meters(300.0), 3_000);
    }
}
