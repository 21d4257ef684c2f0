// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Headless backend for trellis.
//!
//! Everything needed to run a [`Root`](trellis_core::root::Root) without a
//! platform UI:
//!
//! - [`HeadlessHost`]: an in-memory host tree that logs every operation and
//!   serializes to markup. Listeners stored as properties can be fired with
//!   [`dispatch_event`].
//! - [`MonotonicClock`]: a [`Clock`](trellis_core::time::Clock) backed by
//!   [`std::time::Instant`], with nanosecond ticks.
//! - [`EventLoop`]: services scheduler macrotasks and timers until the
//!   scheduler goes idle.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use trellis_backend_headless::{EventLoop, HeadlessHost, MonotonicClock};
//! use trellis_core::element::h;
//! use trellis_core::root::{Root, RootConfig};
//! use trellis_core::scheduler::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(Rc::new(MonotonicClock::new()), SchedulerConfig::headless());
//! let host = Rc::new(RefCell::new(HeadlessHost::new()));
//! let container = host.borrow_mut().create_container();
//! let root = Root::new(container, host.clone(), scheduler.clone(), RootConfig::new());
//!
//! root.render(h("p").child("hello"));
//! EventLoop::new(scheduler).run_until_idle().unwrap();
//! assert_eq!(host.borrow().inner_markup(container), "<p>hello</p>");
//! ```

mod event_loop;
mod host;
mod time;

pub use event_loop::{DEFAULT_TURN_LIMIT, EventLoop, EventLoopError, Turn};
pub use host::{HeadlessHost, HostOp, dispatch_event};
pub use time::{MonotonicClock, timebase};
