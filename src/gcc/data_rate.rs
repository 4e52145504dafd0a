use std::fmt;

use super::time::TimeDelta;

/// A bitrate in bits per second.
///
/// Stored as `f64` so that products such as `target * pacing_factor` are
/// carried exactly to the pacer instead of being truncated to whole bits.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct DataRate {
    value: f64,
}

impl DataRate {
    pub fn from_bits_per_sec(value: i64) -> Self {
        Self {
            value: value as f64,
        }
    }

    pub fn from_bits_per_sec_f64(value: f64) -> Self {
        Self { value }
    }

    pub fn from_kilobits_per_sec(value: i64) -> Self {
        Self {
            value: 1000.0 * value as f64,
        }
    }

    pub const fn zero() -> Self {
        Self { value: 0.0 }
    }

    pub const fn infinity() -> Self {
        Self {
            value: f64::INFINITY,
        }
    }

    /// Rounded to the nearest whole bit per second.
    pub fn bps(&self) -> i64 {
        self.value.round() as i64
    }

    pub fn bps_f64(&self) -> f64 {
        self.value
    }

    pub fn kbps(&self) -> i64 {
        (self.value / 1000.0) as i64
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite()
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0.0
    }

    pub fn max(self, other: Self) -> Self {
        Self {
            value: f64::max(self.value, other.value),
        }
    }

    pub fn min(self, other: Self) -> Self {
        Self {
            value: f64::min(self.value, other.value),
        }
    }
}

impl std::ops::Add for DataRate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            value: self.value + rhs.value,
        }
    }
}

impl std::ops::Sub for DataRate {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            value: self.value - rhs.value,
        }
    }
}

impl std::ops::Mul<f64> for DataRate {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self {
            value: self.value * rhs,
        }
    }
}

impl std::ops::Mul<DataRate> for f64 {
    type Output = DataRate;

    fn mul(self, rhs: DataRate) -> Self::Output {
        rhs * self
    }
}

impl std::ops::Mul<TimeDelta> for DataRate {
    type Output = DataSize;

    fn mul(self, rhs: TimeDelta) -> Self::Output {
        let bytes = self.value * rhs.us() as f64 / 8_000_000.0;
        DataSize::from_bytes(bytes.round() as i64)
    }
}

impl std::ops::Div<f64> for DataRate {
    type Output = Self;

    fn div(self, rhs: f64) -> Self::Output {
        Self {
            value: self.value / rhs,
        }
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bps", self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DataSize {
    value: i64,
}

impl DataSize {
    pub const fn from_bytes(value: i64) -> Self {
        Self { value }
    }

    pub const fn bytes(&self) -> i64 {
        self.value
    }

    pub const fn zero() -> Self {
        Self { value: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn fractional_products_are_kept() {
        let rate = DataRate::from_bits_per_sec(450_001) * 2.5;
        assert_abs_diff_eq!(rate.bps_f64(), 1_125_002.5, epsilon = 1e-9);
        assert_eq!(rate.bps(), 1_125_003);
    }

    #[test]
    fn window_over_one_second_rounds_to_bytes() {
        let window = DataRate::from_bits_per_sec(750_000) * TimeDelta::from_seconds(1);
        assert_eq!(window.bytes(), 93_750);
        let window = DataRate::from_bits_per_sec(1_001) * TimeDelta::from_millis(500);
        assert_eq!(window.bytes(), 63);
    }

    #[test]
    fn min_max_pick_the_right_side() {
        let a = DataRate::from_kilobits_per_sec(300);
        let b = DataRate::zero();
        assert_eq!(a.max(b), a);
        assert_eq!(a.min(b), b);
        assert!(DataRate::infinity().max(a).bps_f64().is_infinite());
    }
}
