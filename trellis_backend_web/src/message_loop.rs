// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `setTimeout`-driven scheduler loop.
//!
//! The scheduler only records that it wants a macrotask or a timer. A
//! [`MessageLoop`] turns those requests into `setTimeout` callbacks: a pending
//! macrotask is serviced after a 0 ms timeout, a host timeout after its
//! remaining delay. When the scheduler is idle the loop polls at a fixed
//! interval; call [`wake`](MessageLoop::wake) after dispatching updates from
//! outside a scheduler task to have them picked up without waiting for the
//! next poll.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::{Cell, RefCell};

use trellis_core::scheduler::Scheduler;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;

use crate::{clear_timeout, set_timeout};

/// Default idle poll interval in milliseconds.
pub const DEFAULT_IDLE_POLL_MS: i32 = 16;

type TimeoutClosure = Closure<dyn FnMut()>;

struct LoopInner {
    scheduler: Scheduler,
    closure: RefCell<Option<TimeoutClosure>>,
    running: Cell<bool>,
    timeout_id: Cell<Option<i32>>,
    idle_poll_ms: i32,
}

impl LoopInner {
    /// Services one scheduler request, then re-arms the timeout.
    fn turn(&self) {
        self.timeout_id.set(None);
        if !self.running.get() {
            return;
        }
        if !self.scheduler.run_macrotask() {
            self.scheduler.fire_timeout();
        }
        self.arm();
    }

    /// Posts the next `setTimeout` for whatever the scheduler asked for.
    fn arm(&self) {
        if !self.running.get() {
            return;
        }
        if let Some(id) = self.timeout_id.take() {
            clear_timeout(id);
        }
        let delay = if self.scheduler.has_pending_macrotask() {
            0
        } else if let Some(deadline) = self.scheduler.next_timeout() {
            let remaining = deadline.saturating_duration_since(self.scheduler.now());
            let nanos = remaining.to_nanos(self.scheduler.config().timebase);
            i32::try_from(nanos.div_ceil(1_000_000)).unwrap_or(i32::MAX)
        } else {
            self.idle_poll_ms
        };
        if let Some(closure) = &*self.closure.borrow() {
            self.timeout_id
                .set(Some(set_timeout(closure.as_ref().unchecked_ref(), delay)));
        }
    }
}

/// Drives a [`Scheduler`] from browser timeouts.
///
/// The loop runs from [`start`](Self::start) until [`stop`](Self::stop) or
/// drop.
pub struct MessageLoop {
    inner: Rc<LoopInner>,
}

impl MessageLoop {
    /// Creates a loop over `scheduler` that is **not yet running**.
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self::with_idle_poll(scheduler, DEFAULT_IDLE_POLL_MS)
    }

    /// Creates a loop that polls an idle scheduler every `idle_poll_ms`.
    #[must_use]
    pub fn with_idle_poll(scheduler: Scheduler, idle_poll_ms: i32) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                scheduler,
                closure: RefCell::new(None),
                running: Cell::new(false),
                timeout_id: Cell::new(None),
                idle_poll_ms: idle_poll_ms.max(1),
            }),
        }
    }

    /// Starts servicing the scheduler. A no-op if already running.
    pub fn start(&self) {
        if self.inner.running.get() {
            return;
        }
        self.inner.running.set(true);
        if self.inner.closure.borrow().is_none() {
            // The closure holds a weak reference so the loop can be dropped
            // while a timeout is pending.
            let weak = Rc::downgrade(&self.inner);
            let closure = Closure::wrap(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.turn();
                }
            }) as Box<dyn FnMut()>);
            *self.inner.closure.borrow_mut() = Some(closure);
        }
        self.inner.arm();
    }

    /// Re-arms the loop so newly scheduled work runs on the next timeout
    /// instead of the next idle poll.
    pub fn wake(&self) {
        self.inner.arm();
    }

    /// Stops the loop and cancels the pending timeout. Can be restarted.
    pub fn stop(&self) {
        if !self.inner.running.replace(false) {
            return;
        }
        if let Some(id) = self.inner.timeout_id.take() {
            clear_timeout(id);
        }
    }

    /// Returns `true` if the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        self.stop();
        self.inner.closure.borrow_mut().take();
    }
}

impl core::fmt::Debug for MessageLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageLoop")
            .field("running", &self.inner.running.get())
            .field("timeout_id", &self.inner.timeout_id.get())
            .field("idle_poll_ms", &self.inner.idle_poll_ms)
            .finish_non_exhaustive()
    }
}
