//! Monotonic tick time.
//!
//! `Ticks` is the single time currency of the control loop: both instants
//! (milliseconds since an arbitrary monotonic origin) and durations. All
//! cooldowns, dwell times and rate limits are expressed as "elapsed since a
//! recorded instant" compared against a configured duration, re-evaluated
//! every tick.

use core::fmt;
use core::ops::{Add, AddAssign, Sub};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Monotonic tick counter / duration, milliseconds.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Ticks(u64);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    pub const fn from_millis(ms: u64) -> Self {
        Ticks(ms)
    }

    pub const fn from_secs(s: u64) -> Self {
        Ticks(s * 1000)
    }

    pub const fn from_mins(m: u64) -> Self {
        Ticks(m * 60_000)
    }

    pub const fn from_hours(h: u64) -> Self {
        Ticks(h * 3_600_000)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    pub fn since(self, earlier: Ticks) -> Ticks {
        Ticks(self.0.saturating_sub(earlier.0))
    }

    pub fn min(self, other: Ticks) -> Ticks {
        Ticks(self.0.min(other.0))
    }

    pub fn saturating_mul(self, n: u64) -> Ticks {
        Ticks(self.0.saturating_mul(n))
    }
}

impl fmt::Debug for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticks({}ms)", self.0)
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}s", self.as_secs_f64())
    }
}

impl Add for Ticks {
    type Output = Ticks;
    fn add(self, rhs: Ticks) -> Ticks {
        Ticks(self.0 + rhs.0)
    }
}

impl AddAssign for Ticks {
    fn add_assign(&mut self, rhs: Ticks) {
        self.0 += rhs.0;
    }
}

impl Sub for Ticks {
    type Output = Ticks;
    fn sub(self, rhs: Ticks) -> Ticks {
        Ticks(self.0.saturating_sub(rhs.0))
    }
}

/// Monotonic wall clock yielding `Ticks` since process start.
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> Ticks {
        Ticks(self.origin.elapsed().as_millis() as u64)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors() {
        assert_eq!(Ticks::from_secs(2), Ticks::from_millis(2000));
        assert_eq!(Ticks::from_mins(1), Ticks::from_secs(60));
        assert_eq!(Ticks::from_hours(1), Ticks::from_mins(60));
    }

    #[test]
    fn since_saturates() {
        let a = Ticks::from_secs(5);
        let b = Ticks::from_secs(8);
        assert_eq!(b.since(a), Ticks::from_secs(3));
        assert_eq!(a.since(b), Ticks::ZERO);
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = Clock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
