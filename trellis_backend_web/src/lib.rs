// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Web backend for trellis.
//!
//! This crate provides integration with browser APIs:
//!
//! - [`DomHost`]: a [`HostRenderer`](trellis_core::host::HostRenderer) over
//!   real DOM nodes, with `on*` props registered as event listeners
//! - [`PerformanceClock`]: a scheduler clock reading `performance.now()`
//! - [`MessageLoop`]: services scheduler macrotasks and timers from
//!   `setTimeout` callbacks
//!
//! Host time is in microsecond ticks; pair the clock with
//! [`SchedulerConfig::browser`](trellis_core::scheduler::SchedulerConfig::browser).

#![no_std]

extern crate alloc;

mod dom;
mod message_loop;

pub use dom::DomHost;
pub use message_loop::{DEFAULT_IDLE_POLL_MS, MessageLoop};

use trellis_core::time::{Clock, HostTime, Timebase};
use wasm_bindgen::prelude::*;

// Direct global bindings instead of `web_sys::Window` methods, so reading the
// clock or posting a timer never has to fetch (and unwrap) the window.
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = performance, js_name = "now")]
    fn performance_now() -> f64;

    #[wasm_bindgen(js_name = "setTimeout")]
    pub(crate) fn set_timeout(callback: &JsValue, delay_ms: i32) -> i32;

    #[wasm_bindgen(js_name = "clearTimeout")]
    pub(crate) fn clear_timeout(id: i32);
}

/// Returns the current host time from `performance.now()`.
///
/// The returned [`HostTime`] is in microsecond ticks. Use [`timebase`] to
/// convert to nanoseconds.
#[must_use]
pub fn now() -> HostTime {
    millis_to_host_time(performance_now())
}

fn millis_to_host_time(ms: f64) -> HostTime {
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "performance.now() returns a small positive f64; µs fits in u64"
    )]
    let us = (ms * 1000.0) as u64;
    HostTime(us)
}

/// Returns the web [`Timebase`]: 1 tick = 1 µs = 1000 ns.
#[must_use]
pub const fn timebase() -> Timebase {
    Timebase::MICROS
}

/// A [`Clock`] backed by `performance.now()`.
///
/// The browser cannot block, so [`sleep_until`](Clock::sleep_until) returns
/// immediately; [`MessageLoop`] waits for timers with `setTimeout` instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct PerformanceClock;

impl Clock for PerformanceClock {
    fn now(&self) -> HostTime {
        now()
    }

    fn sleep_until(&self, deadline: HostTime) {
        log::debug!("PerformanceClock cannot block; ignoring sleep until {deadline:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timebase_is_microsecond() {
        let tb = timebase();
        assert_eq!(tb.ticks_to_nanos(1), 1000);
        assert_eq!(tb.ticks_to_nanos(1_000_000), 1_000_000_000);
    }

    #[test]
    fn millis_convert_to_microsecond_ticks() {
        assert_eq!(millis_to_host_time(16.5), HostTime(16_500));
        assert_eq!(millis_to_host_time(-1.0), HostTime(0), "negative saturates");
    }
}
