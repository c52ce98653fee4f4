//! Vote share and turnout percentages

/// `round(part / whole * 100, 2)`, or exactly `0.0` when `whole <= 0`.
///
/// Used with total votes as `whole` for vote share and with the nominal list
/// as `whole` for turnout. Never yields NaN or infinity.
pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

/// Round to two decimals, half away from zero
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half() {
        assert_eq!(percentage(50, 100), 50.00);
    }

    #[test]
    fn test_zero_denominator_is_sentinel() {
        let p = percentage(0, 0);
        assert_eq!(p, 0.0);
        assert!(p.is_finite());
        assert_eq!(percentage(25, 0), 0.0);
        assert_eq!(percentage(25, -3), 0.0);
    }

    #[test]
    fn test_rounds_to_two_decimals() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(1, 8), 12.5);
    }

    #[test]
    fn test_over_one_hundred_is_not_clamped() {
        // Last-seen totals can be smaller than accumulated votes
        assert_eq!(percentage(150, 100), 150.00);
    }
}
