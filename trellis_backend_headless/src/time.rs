// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic host clock backed by [`Instant`].

use std::time::Instant;

use trellis_core::time::{Clock, HostTime, Timebase};

/// Returns the headless [`Timebase`]: host ticks are nanoseconds.
#[must_use]
pub const fn timebase() -> Timebase {
    Timebase::NANOS
}

/// A [`Clock`] reading nanoseconds since it was created.
///
/// Use with [`SchedulerConfig::headless`](trellis_core::scheduler::SchedulerConfig::headless).
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose zero is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> HostTime {
        let nanos = self.origin.elapsed().as_nanos();
        HostTime(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    fn sleep_until(&self, deadline: HostTime) {
        let remaining = deadline.ticks().saturating_sub(self.now().ticks());
        if remaining > 0 {
            std::thread::sleep(std::time::Duration::from_nanos(remaining));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timebase_is_nanos_identity() {
        assert_eq!(timebase(), Timebase::NANOS);
    }

    #[test]
    fn now_is_monotonic_non_decreasing() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first, "monotonic clock should not go backwards");
    }

    #[test]
    fn sleep_until_reaches_deadline() {
        let clock = MonotonicClock::new();
        let deadline = HostTime(clock.now().ticks() + 2_000_000);
        clock.sleep_until(deadline);
        assert!(clock.now() >= deadline, "woke before the deadline");
    }

    #[test]
    fn sleep_until_past_deadline_returns_immediately() {
        let clock = MonotonicClock::new();
        clock.sleep_until(HostTime(0));
    }
}
