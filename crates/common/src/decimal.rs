//! Fixed-point amount helpers

use bigdecimal::{BigDecimal, RoundingMode};

/// Round half-up to `scale` fractional digits
pub fn round(value: &BigDecimal, scale: u32) -> BigDecimal {
    value.with_scale_round(i64::from(scale), RoundingMode::HalfUp)
}

/// Percentage of `value`, unrounded
pub fn percent_of(value: &BigDecimal, percent: &BigDecimal) -> BigDecimal {
    value * percent / BigDecimal::from(100)
}

/// Percent change from `previous` to `current`; `None` when `previous` is zero
pub fn change_percent(previous: &BigDecimal, current: &BigDecimal) -> Option<BigDecimal> {
    if previous == &BigDecimal::from(0) {
        return None;
    }
    Some((current - previous) * BigDecimal::from(100) / previous)
}
