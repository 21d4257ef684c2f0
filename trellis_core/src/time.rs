// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic time for the scheduler.
//!
//! [`HostTime`] is a point on the host's monotonic clock, in backend-defined
//! ticks. [`Duration`] is a span in the same units. [`Timebase`] converts
//! ticks to nanoseconds so that configuration expressed in milliseconds can
//! be mapped onto any backend's tick rate.
//!
//! The scheduler never reads a global clock. It asks a [`Clock`], which the
//! embedder supplies: a backend clock in production, [`ManualClock`] in tests
//! and simulations.

use core::cell::Cell;
use core::fmt;
use core::ops::{Add, Sub};

/// A point in time expressed as monotonic host ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Returns the span between `self` and an earlier time, or zero if
    /// `earlier` is actually later.
    #[inline]
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Adds a duration, clamping at the end of the tick range.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.0))
    }

    /// Subtracts a duration, clamping at tick zero.
    #[inline]
    #[must_use]
    pub const fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.0))
    }
}

impl Add<Duration> for HostTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for HostTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Self) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}

/// Rational conversion factor from ticks to nanoseconds.
///
/// `nanoseconds = ticks * numer / denom`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timebase {
    /// Numerator of the ticks-to-nanoseconds ratio.
    pub numer: u32,
    /// Denominator of the ticks-to-nanoseconds ratio.
    pub denom: u32,
}

impl Timebase {
    /// Ticks are nanoseconds.
    pub const NANOS: Self = Self { numer: 1, denom: 1 };

    /// Ticks are microseconds (the web backend's `performance.now()` scale).
    pub const MICROS: Self = Self {
        numer: 1000,
        denom: 1,
    };

    /// Creates a new timebase.
    ///
    /// # Panics
    ///
    /// Panics if `denom` is zero.
    #[inline]
    #[must_use]
    pub const fn new(numer: u32, denom: u32) -> Self {
        assert!(denom != 0, "timebase denominator must not be zero");
        Self { numer, denom }
    }

    /// Converts a tick count to nanoseconds.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn ticks_to_nanos(self, ticks: u64) -> u64 {
        let wide = ticks as u128 * self.numer as u128 / self.denom as u128;
        wide as u64
    }

    /// Converts nanoseconds to a tick count.
    #[inline]
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "u128 intermediate avoids overflow; truncation back to u64 is intentional"
    )]
    pub const fn nanos_to_ticks(self, nanos: u64) -> u64 {
        let wide = nanos as u128 * self.denom as u128 / self.numer as u128;
        wide as u64
    }
}

impl fmt::Debug for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timebase({}/{})", self.numer, self.denom)
    }
}

/// A span of host ticks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub u64);

impl Duration {
    /// A zero-length duration.
    pub const ZERO: Self = Self(0);

    /// Returns the raw tick value.
    #[inline]
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Creates a duration of `ms` milliseconds in the given timebase.
    #[inline]
    #[must_use]
    pub const fn from_millis(ms: u64, timebase: Timebase) -> Self {
        Self(timebase.nanos_to_ticks(ms.saturating_mul(1_000_000)))
    }

    /// Converts this duration to nanoseconds using the given timebase.
    #[inline]
    #[must_use]
    pub const fn to_nanos(self, timebase: Timebase) -> u64 {
        timebase.ticks_to_nanos(self.0)
    }

    /// Saturating addition.
    #[inline]
    #[must_use]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Source of monotonic time for a [`Scheduler`](crate::scheduler::Scheduler).
pub trait Clock {
    /// Returns the current host time.
    fn now(&self) -> HostTime;

    /// Blocks (or, for virtual clocks, jumps) until `deadline` has passed.
    ///
    /// Event loops call this when the only remaining work is a delayed task.
    fn sleep_until(&self, deadline: HostTime);
}

/// A virtual clock that only moves when told to.
///
/// Ticks are nanoseconds ([`Timebase::NANOS`]).
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub const fn new(start: HostTime) -> Self {
        Self {
            now: Cell::new(start.0),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by.0));
    }

    /// Sets the clock to `t`. Time never runs backwards; earlier values are
    /// ignored.
    pub fn set(&self, t: HostTime) {
        if t.0 > self.now.get() {
            self.now.set(t.0);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> HostTime {
        HostTime(self.now.get())
    }

    fn sleep_until(&self, deadline: HostTime) {
        self.set(deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_follow_timebase() {
        assert_eq!(Duration::from_millis(5, Timebase::NANOS), Duration(5_000_000));
        assert_eq!(Duration::from_millis(5, Timebase::MICROS), Duration(5_000));
    }

    #[test]
    fn saturating_ops_clamp() {
        let t = HostTime(10);
        assert_eq!(t.saturating_sub(Duration(20)), HostTime(0));
        assert_eq!(HostTime(u64::MAX).saturating_add(Duration(1)), HostTime(u64::MAX));
        assert_eq!(t.saturating_duration_since(HostTime(15)), Duration::ZERO);
        assert_eq!(t.saturating_duration_since(HostTime(4)), Duration(6));
    }

    #[test]
    fn manual_clock_only_moves_forward() {
        let clock = ManualClock::new(HostTime(100));
        clock.advance(Duration(50));
        assert_eq!(clock.now(), HostTime(150));
        clock.set(HostTime(120));
        assert_eq!(clock.now(), HostTime(150), "set must not rewind");
        clock.sleep_until(HostTime(400));
        assert_eq!(clock.now(), HostTime(400));
    }

    #[test]
    fn overflow_safe_conversion() {
        let tb = Timebase::new(125, 3);
        assert_eq!(tb.ticks_to_nanos(24_000_000), 1_000_000_000, "24 MHz -> 1s");
        let _ = tb.ticks_to_nanos(u64::MAX / 2);
    }
}
