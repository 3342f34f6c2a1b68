//! Rational presentation timestamps

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Presentation timestamp expressed as `value / timescale` seconds.
///
/// A timescale of zero marks an invalid time, which is what a freshly created
/// stream reports before its first sample.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MediaTime {
    /// Tick count
    pub value: i64,
    /// Ticks per second
    pub timescale: i32,
}

impl MediaTime {
    /// The invalid time
    pub const INVALID: MediaTime = MediaTime {
        value: 0,
        timescale: 0,
    };

    /// Zero seconds at a 1 kHz timescale
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1000,
    };

    /// Create a time from ticks and a timescale
    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    /// Create a time from seconds at the given timescale, rounding to the nearest tick
    pub fn from_seconds(seconds: f64, timescale: i32) -> Self {
        Self {
            value: (seconds * timescale as f64).round() as i64,
            timescale,
        }
    }

    /// Whether the time carries a usable timescale
    pub fn is_valid(&self) -> bool {
        self.timescale > 0
    }

    /// Time in seconds, `None` for an invalid time
    pub fn seconds(&self) -> Option<f64> {
        if self.is_valid() {
            Some(self.value as f64 / self.timescale as f64)
        } else {
            None
        }
    }

    /// Rescale to another timescale, rounding to the nearest tick
    pub fn convert_scale(&self, timescale: i32) -> Self {
        match self.seconds() {
            Some(seconds) => Self::from_seconds(seconds, timescale),
            None => Self::INVALID,
        }
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.is_valid(), other.is_valid()) {
            (true, true) => {
                // cross-multiply in i128 so differing timescales compare exactly
                let lhs = self.value as i128 * other.timescale as i128;
                let rhs = other.value as i128 * self.timescale as i128;
                Some(lhs.cmp(&rhs))
            }
            (false, false) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.seconds() {
            Some(seconds) => write!(f, "{:.3}s", seconds),
            None => write!(f, "invalid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_conversion() {
        assert_eq!(MediaTime::new(1500, 1000).seconds(), Some(1.5));
        assert_eq!(MediaTime::new(90000, 90000).seconds(), Some(1.0));
        assert_eq!(MediaTime::INVALID.seconds(), None);
        assert!(!MediaTime::default().is_valid());
    }

    #[test]
    fn test_cross_timescale_ordering() {
        let a = MediaTime::new(1, 30);
        let b = MediaTime::new(3000, 90000);
        assert_eq!(a, b);
        assert!(MediaTime::new(2, 30) > b);
        assert_eq!(a.partial_cmp(&MediaTime::INVALID), None);
    }

    #[test]
    fn test_from_seconds_and_rescale() {
        let t = MediaTime::from_seconds(0.040, 600);
        assert_eq!(t.value, 24);
        assert_eq!(t.convert_scale(1000).value, 40);
        assert_eq!(t.to_string(), "0.040s");
        assert_eq!(MediaTime::INVALID.to_string(), "invalid");
    }
}
