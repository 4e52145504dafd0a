use std::fmt;
use std::time::Duration;

const PLUS_INFINITY_VAL: i64 = i64::MAX;
const MINUS_INFINITY_VAL: i64 = i64::MIN;

/// A point in time on the caller's clock, with microsecond resolution.
///
/// The controller never reads a clock of its own; every `Timestamp` it sees
/// comes from the transport driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    value: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeDelta {
    value: i64,
}

macro_rules! microsecond_resolution {
    ($type_name:ty) => {
        impl $type_name {
            pub const fn from_seconds(value: i64) -> Self {
                Self::from_micros(1_000_000 * value)
            }

            pub const fn from_millis(value: i64) -> Self {
                Self::from_micros(1_000 * value)
            }

            pub const fn from_micros(value: i64) -> Self {
                Self { value }
            }

            pub const fn zero() -> Self {
                Self { value: 0 }
            }

            pub const fn plus_infinity() -> Self {
                Self::from_micros(PLUS_INFINITY_VAL)
            }

            pub const fn minus_infinity() -> Self {
                Self::from_micros(MINUS_INFINITY_VAL)
            }

            pub const fn seconds(&self) -> i64 {
                self.us() / 1_000_000
            }

            pub const fn ms(&self) -> i64 {
                self.us() / 1_000
            }

            pub const fn us(&self) -> i64 {
                self.value
            }

            pub const fn is_zero(&self) -> bool {
                self.value == 0
            }

            pub const fn is_plus_infinity(&self) -> bool {
                self.us() == PLUS_INFINITY_VAL
            }

            pub const fn is_minus_infinity(&self) -> bool {
                self.us() == MINUS_INFINITY_VAL
            }

            pub const fn is_infinite(&self) -> bool {
                self.is_plus_infinity() || self.is_minus_infinity()
            }

            pub const fn is_finite(&self) -> bool {
                !self.is_infinite()
            }
        }
    };
}

microsecond_resolution!(Timestamp);
microsecond_resolution!(TimeDelta);

impl TimeDelta {
    /// Converts to a std `Duration`, clamping negative deltas to zero and
    /// infinity to `Duration::MAX`.
    pub fn to_duration(self) -> Duration {
        if self.is_plus_infinity() {
            Duration::MAX
        } else if self.value <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.value as u64)
        }
    }
}

impl std::ops::Add<TimeDelta> for Timestamp {
    type Output = Self;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        if self.is_plus_infinity() || rhs.is_plus_infinity() {
            Self::plus_infinity()
        } else if self.is_minus_infinity() || rhs.is_minus_infinity() {
            Self::minus_infinity()
        } else {
            Self::from_micros(self.us() + rhs.us())
        }
    }
}

impl std::ops::Sub<TimeDelta> for Timestamp {
    type Output = Self;

    fn sub(self, rhs: TimeDelta) -> Self::Output {
        if self.is_plus_infinity() || rhs.is_minus_infinity() {
            Self::plus_infinity()
        } else if self.is_minus_infinity() || rhs.is_plus_infinity() {
            Self::minus_infinity()
        } else {
            Self::from_micros(self.us() - rhs.us())
        }
    }
}

impl std::ops::AddAssign<TimeDelta> for Timestamp {
    fn add_assign(&mut self, rhs: TimeDelta) {
        *self = *self + rhs
    }
}

impl std::ops::Sub<Timestamp> for Timestamp {
    type Output = TimeDelta;

    fn sub(self, rhs: Timestamp) -> Self::Output {
        TimeDelta::from_micros(self.value.saturating_sub(rhs.value))
    }
}

impl std::ops::Add for TimeDelta {
    type Output = Self;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        Self {
            value: self.value.saturating_add(rhs.value),
        }
    }
}

impl std::ops::Sub for TimeDelta {
    type Output = Self;

    fn sub(self, rhs: TimeDelta) -> Self::Output {
        Self {
            value: self.value.saturating_sub(rhs.value),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_plus_infinity() {
            write!(f, "+inf ms")
        } else if self.is_minus_infinity() {
            write!(f, "-inf ms")
        } else {
            write!(f, "{} ms", self.ms())
        }
    }
}

impl fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_plus_infinity() {
            write!(f, "+inf ms")
        } else if self.is_minus_infinity() {
            write!(f, "-inf ms")
        } else {
            write!(f, "{} ms", self.ms())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_timestamps_absorb_deltas() {
        let t = Timestamp::plus_infinity() + TimeDelta::from_millis(5);
        assert!(t.is_plus_infinity());
        let t = Timestamp::from_millis(10) + TimeDelta::minus_infinity();
        assert!(t.is_minus_infinity());
    }

    #[test]
    fn timestamp_difference() {
        let a = Timestamp::from_millis(1_500);
        let b = Timestamp::from_millis(1_000);
        assert_eq!(a - b, TimeDelta::from_millis(500));
        assert_eq!((b - a).ms(), -500);
    }

    #[test]
    fn duration_conversion_clamps() {
        assert_eq!(
            TimeDelta::from_millis(25).to_duration(),
            Duration::from_millis(25)
        );
        assert_eq!(TimeDelta::from_millis(-3).to_duration(), Duration::ZERO);
        assert_eq!(TimeDelta::plus_infinity().to_duration(), Duration::MAX);
    }
}
