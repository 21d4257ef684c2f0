// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A blocking event loop that services a [`Scheduler`].
//!
//! Each turn does one of three things, in this order:
//!
//! 1. runs the pending macrotask, if the scheduler asked for one;
//! 2. fires the host timeout, if its deadline has passed;
//! 3. otherwise reports the deadline it is waiting for, or that it is idle.
//!
//! [`EventLoop::run_until_idle`] repeats turns, sleeping on the scheduler's
//! clock between timers, until no work is left.

use trellis_core::scheduler::Scheduler;
use trellis_core::time::{Clock, HostTime};

/// Default number of turns before [`EventLoop::run_until_idle`] gives up.
pub const DEFAULT_TURN_LIMIT: usize = 100_000;

/// What a single [`EventLoop::turn`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Turn {
    /// A macrotask ran.
    RanMacrotask,
    /// A due timeout fired and moved delayed tasks to the ready queue.
    FiredTimeout,
    /// Nothing is ready; the earliest delayed task starts at this time.
    Waiting(HostTime),
    /// No work is queued.
    Idle,
}

/// Why [`EventLoop::run_until_idle`] stopped early.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EventLoopError {
    /// The scheduler still had work after the turn limit.
    #[error("scheduler still busy after {0} turns")]
    TurnLimit(usize),
}

/// Drives a [`Scheduler`] from the current thread.
#[derive(Clone, Debug)]
pub struct EventLoop {
    scheduler: Scheduler,
    turn_limit: usize,
}

impl EventLoop {
    /// Creates a loop over `scheduler` with [`DEFAULT_TURN_LIMIT`].
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            turn_limit: DEFAULT_TURN_LIMIT,
        }
    }

    /// Sets the number of turns [`run_until_idle`](Self::run_until_idle) may
    /// take.
    #[must_use]
    pub fn with_turn_limit(mut self, turns: usize) -> Self {
        self.turn_limit = turns.max(1);
        self
    }

    /// The scheduler this loop drives.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Performs one turn without blocking.
    pub fn turn(&self) -> Turn {
        if self.scheduler.run_macrotask() {
            return Turn::RanMacrotask;
        }
        if self.scheduler.fire_timeout() {
            return Turn::FiredTimeout;
        }
        match self.scheduler.next_timeout() {
            Some(deadline) => Turn::Waiting(deadline),
            None => Turn::Idle,
        }
    }

    /// Runs turns until the scheduler is idle, sleeping until each timer
    /// deadline. Returns the number of turns that did work.
    ///
    /// # Errors
    ///
    /// Returns [`EventLoopError::TurnLimit`] if work remains after the turn
    /// limit, which usually means a task keeps rescheduling itself.
    pub fn run_until_idle(&self) -> Result<usize, EventLoopError> {
        let mut worked = 0;
        for _ in 0..self.turn_limit {
            match self.turn() {
                Turn::RanMacrotask | Turn::FiredTimeout => worked += 1,
                Turn::Waiting(deadline) => {
                    log::trace!("event loop sleeping until {deadline:?}");
                    self.scheduler.clock().sleep_until(deadline);
                }
                Turn::Idle => return Ok(worked),
            }
        }
        log::warn!("event loop gave up after {} turns", self.turn_limit);
        Err(EventLoopError::TurnLimit(self.turn_limit))
    }

    /// Runs only the work that is ready now, without sleeping for timers.
    /// Returns the number of turns that did work.
    pub fn run_ready(&self) -> usize {
        let mut worked = 0;
        while worked < self.turn_limit
            && matches!(self.turn(), Turn::RanMacrotask | Turn::FiredTimeout)
        {
            worked += 1;
        }
        worked
    }
}
