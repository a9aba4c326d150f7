//! Time type shared by the estimator and the aligner.
//!
//! [`ClockTime`] is a monotonic nanosecond value (8 bytes, Copy). It is used
//! both as an instant (sample timestamps) and as a span (periods, timeouts),
//! the same way stream timestamps and their differences are handled in a
//! media pipeline.

use rkyv::{Archive, Deserialize, Serialize};
use std::time::Duration;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Time in nanoseconds (8 bytes, Copy).
///
/// # Special Values
///
/// - `ClockTime::ZERO`: Zero time
/// - `ClockTime::NONE`: Unset time (sentinel value), used to detect first use
/// - `ClockTime::MAX`: Maximum representable time
///
/// # Examples
///
/// ```rust
/// use streamalign::clock::ClockTime;
///
/// let t1 = ClockTime::from_secs(1);
/// let t2 = ClockTime::from_millis(500);
/// let t3 = t1 + t2;
///
/// assert_eq!(t3.millis(), 1500);
/// assert_eq!(format!("{}", t3), "1.500s");
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Archive,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Maximum representable time (one less than NONE sentinel).
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Unset time (sentinel value).
    pub const NONE: Self = Self(u64::MAX);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from microseconds.
    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us.saturating_mul(1_000))
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000_000))
    }

    /// Create from fractional seconds, rounded to the nearest nanosecond.
    ///
    /// Negative and NaN inputs clamp to zero, overly large ones to `MAX`.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() || secs <= 0.0 {
            return Self::ZERO;
        }
        let nanos = (secs * NANOS_PER_SEC).round();
        if nanos >= Self::MAX.0 as f64 {
            Self::MAX
        } else {
            Self(nanos as u64)
        }
    }

    /// Get as nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Get as milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Get as seconds (truncated).
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Get as fractional seconds. `NONE` maps to NaN.
    #[inline]
    pub fn secs_f64(self) -> f64 {
        if self.is_none() {
            f64::NAN
        } else {
            self.0 as f64 / NANOS_PER_SEC
        }
    }

    /// Check if this is the NONE sentinel value.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Check if this is a valid time (not NONE).
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Convert to Option, returning None for the NONE sentinel.
    #[inline]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }

    /// Saturating addition. Returns NONE if either operand is NONE.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        let result = self.0.saturating_add(rhs.0);
        if result == u64::MAX {
            Self::MAX
        } else {
            Self(result)
        }
    }

    /// Saturating subtraction. Returns NONE if either operand is NONE.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Signed distance from `origin` to `self`, in seconds.
    ///
    /// Unlike `self - origin` this does not saturate, so it can express
    /// samples that arrive before the origin.
    pub fn seconds_since(self, origin: Self) -> f64 {
        let delta = self.0 as i128 - origin.0 as i128;
        delta as f64 / NANOS_PER_SEC
    }

    /// Shift by a signed number of seconds, saturating at `ZERO` and `MAX`.
    ///
    /// Returns NONE when `self` is NONE.
    pub fn offset_by_secs(self, secs: f64) -> Self {
        if self.is_none() {
            return Self::NONE;
        }
        let shifted = self.0 as i128 + (secs * NANOS_PER_SEC).round() as i128;
        if shifted <= 0 {
            Self::ZERO
        } else if shifted >= Self::MAX.0 as i128 {
            Self::MAX
        } else {
            Self(shifted as u64)
        }
    }

    /// Divide by another span, rounding the quotient up.
    ///
    /// Returns None when either operand is NONE or the divisor is zero.
    pub const fn div_ceil(self, rhs: Self) -> Option<u64> {
        if self.is_none() || rhs.is_none() || rhs.0 == 0 {
            return None;
        }
        Some(self.0.div_ceil(rhs.0))
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::AddAssign for ClockTime {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    #[inline]
    fn from(d: Duration) -> Self {
        let nanos = d.as_nanos();
        if nanos >= Self::MAX.0 as u128 {
            Self::MAX
        } else {
            Self(nanos as u64)
        }
    }
}

impl From<ClockTime> for Duration {
    #[inline]
    fn from(t: ClockTime) -> Self {
        if t.is_none() {
            Duration::ZERO
        } else {
            Duration::from_nanos(t.0)
        }
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            let secs = self.secs();
            let ms = (self.0 / 1_000_000) % 1000;
            write!(f, "{}.{:03}s", secs, ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_time_creation() {
        assert_eq!(ClockTime::from_nanos(1_000).nanos(), 1_000);
        assert_eq!(ClockTime::from_micros(1_000).nanos(), 1_000_000);
        assert_eq!(ClockTime::from_millis(1_000).nanos(), 1_000_000_000);
        assert_eq!(ClockTime::from_secs(1).nanos(), 1_000_000_000);
    }

    #[test]
    fn test_clock_time_from_secs_f64() {
        assert_eq!(ClockTime::from_secs_f64(1.5), ClockTime::from_millis(1500));
        assert_eq!(ClockTime::from_secs_f64(-3.0), ClockTime::ZERO);
        assert_eq!(ClockTime::from_secs_f64(f64::NAN), ClockTime::ZERO);
        assert_eq!(ClockTime::from_secs_f64(1e30), ClockTime::MAX);
        assert!(ClockTime::NONE.secs_f64().is_nan());
    }

    #[test]
    fn test_clock_time_none_arithmetic() {
        let t = ClockTime::from_secs(1);
        let none = ClockTime::NONE;

        assert!((t + none).is_none());
        assert!((none - t).is_none());
        assert!(none.offset_by_secs(1.0).is_none());
        assert_eq!(t.div_ceil(none), None);
        assert_eq!(none.to_option(), None);
    }

    #[test]
    fn test_clock_time_saturating() {
        let t = ClockTime::from_secs(1);
        assert_eq!(ClockTime::from_millis(100) - t, ClockTime::ZERO);
        assert_eq!(ClockTime::MAX + t, ClockTime::MAX);
    }

    #[test]
    fn test_seconds_since_is_signed() {
        let early = ClockTime::from_millis(500);
        let late = ClockTime::from_secs(2);
        assert!((late.seconds_since(early) - 1.5).abs() < 1e-12);
        assert!((early.seconds_since(late) + 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_offset_by_secs() {
        let t = ClockTime::from_secs(10);
        assert_eq!(t.offset_by_secs(0.25), ClockTime::from_millis(10_250));
        assert_eq!(t.offset_by_secs(-0.25), ClockTime::from_millis(9_750));
        assert_eq!(t.offset_by_secs(-20.0), ClockTime::ZERO);
    }

    #[test]
    fn test_div_ceil() {
        let timeout = ClockTime::from_secs(2);
        assert_eq!(timeout.div_ceil(ClockTime::from_millis(300)), Some(7));
        assert_eq!(timeout.div_ceil(ClockTime::from_secs(1)), Some(2));
        assert_eq!(timeout.div_ceil(ClockTime::ZERO), None);
    }

    #[test]
    fn test_clock_time_display() {
        assert_eq!(format!("{}", ClockTime::from_millis(1500)), "1.500s");
        assert_eq!(format!("{}", ClockTime::NONE), "NONE");
    }

    #[test]
    fn test_clock_time_duration_conversion() {
        let t = ClockTime::from_millis(1500);
        let d: Duration = t.into();
        assert_eq!(d, Duration::from_millis(1500));
        let back: ClockTime = d.into();
        assert_eq!(back, t);
        assert_eq!(Duration::from(ClockTime::NONE), Duration::ZERO);
    }
}
