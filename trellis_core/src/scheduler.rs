// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cooperative task scheduling.
//!
//! The [`Scheduler`] keeps two min-heaps of tasks: a ready queue ordered by
//! expiration time and a timer queue of delayed tasks ordered by start time.
//! Work happens in macrotasks. Scheduling a ready task never runs it
//! synchronously; it asks the host for a macrotask, and the embedder calls
//! [`Scheduler::run_macrotask`] when the host event loop gets to it.
//!
//! # Time slicing
//!
//! A macrotask drains the ready queue until the slice has run for
//! [`SchedulerConfig::yield_interval`] and the next task has not yet
//! expired. Expired tasks always run, so starvation is bounded by each
//! priority's timeout. A callback can split itself into pieces by returning a
//! continuation, which stays queued under the same task.
//!
//! # Host integration
//!
//! The scheduler never blocks and never reads a global clock. It records two
//! kinds of host requests:
//!
//! - a pending macrotask ([`has_pending_macrotask`](Scheduler::has_pending_macrotask)),
//!   to be serviced with [`run_macrotask`](Scheduler::run_macrotask);
//! - a host timeout ([`next_timeout`](Scheduler::next_timeout)) for the
//!   earliest delayed task, to be serviced with
//!   [`fire_timeout`](Scheduler::fire_timeout) once the deadline passes.
//!
//! Backends wrap this in an event loop.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell, RefMut};
use core::fmt;

use crate::error::TaskError;
use crate::heap::{HeapNode, MinHeap};
use crate::time::{Clock, Duration, HostTime, Timebase};
use crate::trace::{TaskBeginEvent, TaskEndEvent, TaskOutcome, TraceSink, Tracer};

/// Largest positive signed 31-bit integer; the idle timeout in milliseconds.
pub const MAX_SIGNED_31_BIT_INT: u64 = 1_073_741_823;

/// Task priority. Lower values are more urgent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    /// Must run as soon as possible; expires immediately.
    Immediate = 1,
    /// Responds to direct user input.
    UserBlocking = 2,
    /// Ordinary updates.
    #[default]
    Normal = 3,
    /// Work that can wait.
    Low = 4,
    /// Work that runs only when nothing else is queued.
    Idle = 5,
}

impl Priority {
    /// The numeric priority level.
    #[inline]
    #[must_use]
    pub const fn level(self) -> u8 {
        self as u8
    }
}

/// Configuration for the [`Scheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Tick rate of the clock the scheduler reads.
    pub timebase: Timebase,
    /// How long a macrotask may run before yielding to the host.
    pub yield_interval: Duration,
    /// Timeout for [`Priority::UserBlocking`] tasks.
    pub user_blocking_timeout: Duration,
    /// Timeout for [`Priority::Normal`] tasks.
    pub normal_timeout: Duration,
    /// Timeout for [`Priority::Low`] tasks.
    pub low_timeout: Duration,
    /// Timeout for [`Priority::Idle`] tasks.
    pub idle_timeout: Duration,
}

impl SchedulerConfig {
    /// Standard timeouts (5 ms slices; 250 ms, 5 s, 10 s, never) expressed
    /// in the given timebase.
    #[must_use]
    pub const fn for_timebase(timebase: Timebase) -> Self {
        Self {
            timebase,
            yield_interval: Duration::from_millis(5, timebase),
            user_blocking_timeout: Duration::from_millis(250, timebase),
            normal_timeout: Duration::from_millis(5000, timebase),
            low_timeout: Duration::from_millis(10_000, timebase),
            idle_timeout: Duration::from_millis(MAX_SIGNED_31_BIT_INT, timebase),
        }
    }

    /// Default configuration for the web backend (microsecond ticks).
    #[must_use]
    pub const fn browser() -> Self {
        Self::for_timebase(Timebase::MICROS)
    }

    /// Default configuration for nanosecond clocks (headless, tests).
    #[must_use]
    pub const fn headless() -> Self {
        Self::for_timebase(Timebase::NANOS)
    }

    /// Expiration time of a task of `priority` that becomes ready at `start`.
    ///
    /// Immediate tasks expire one tick before they start, so they count as
    /// timed out from the moment they are queued.
    #[must_use]
    pub const fn expiration(&self, priority: Priority, start: HostTime) -> HostTime {
        match priority {
            Priority::Immediate => start.saturating_sub(Duration(1)),
            Priority::UserBlocking => start.saturating_add(self.user_blocking_timeout),
            Priority::Normal => start.saturating_add(self.normal_timeout),
            Priority::Low => start.saturating_add(self.low_timeout),
            Priority::Idle => start.saturating_add(self.idle_timeout),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::headless()
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// What a task callback returns: a continuation to keep the task queued,
/// nothing to finish it, or an error.
pub type TaskResult = Result<Option<Callback>, TaskError>;

/// A task body. Receives `did_timeout`: whether the task's expiration time
/// had passed when it was called.
pub struct Callback(Box<dyn FnOnce(bool) -> TaskResult>);

impl Callback {
    /// Wraps a closure.
    pub fn new(f: impl FnOnce(bool) -> TaskResult + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Wraps a closure that always finishes the task.
    pub fn once(f: impl FnOnce(bool) + 'static) -> Self {
        Self::new(move |did_timeout| {
            f(did_timeout);
            Ok(None)
        })
    }

    fn call(self, did_timeout: bool) -> TaskResult {
        (self.0)(did_timeout)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// Options for [`Scheduler::schedule_callback_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// How long to wait before the task becomes ready.
    pub delay: Duration,
}

struct Task {
    id: u64,
    priority: Priority,
    start_time: HostTime,
    expiration_time: HostTime,
    sort_index: Cell<u64>,
    callback: RefCell<Option<Callback>>,
}

impl Task {
    fn ready_sort_index(&self) -> u64 {
        self.expiration_time
            .ticks()
            .saturating_add(u64::from(self.priority.level()))
    }

    fn is_cancelled(&self) -> bool {
        self.callback.borrow().is_none()
    }
}

impl HeapNode for Rc<Task> {
    fn sort_index(&self) -> u64 {
        self.sort_index.get()
    }

    fn id(&self) -> u64 {
        self.id
    }
}

/// Handle to a scheduled task, used for cancellation.
#[derive(Clone)]
pub struct TaskHandle(Rc<Task>);

impl TaskHandle {
    /// Scheduler-assigned id. Ids increase in scheduling order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// The task's priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.0.priority
    }

    /// When the task becomes (or became) ready.
    #[must_use]
    pub fn start_time(&self) -> HostTime {
        self.0.start_time
    }

    /// When the task times out.
    #[must_use]
    pub fn expiration_time(&self) -> HostTime {
        self.0.expiration_time
    }

    /// Returns `true` once the task has been cancelled or has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.0.is_cancelled()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.0.id)
            .field("priority", &self.0.priority)
            .finish_non_exhaustive()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TaskHandle {}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct State {
    task_queue: MinHeap<Rc<Task>>,
    timer_queue: MinHeap<Rc<Task>>,
    next_id: u64,
    current_priority: Priority,
    is_performing_work: bool,
    is_host_callback_scheduled: bool,
    is_host_timeout_scheduled: bool,
    macrotask_pending: bool,
    host_timeout: Option<HostTime>,
    slice_start: HostTime,
    errors: Vec<TaskError>,
    failed_tasks: u64,
}

struct Inner {
    clock: Rc<dyn Clock>,
    config: SchedulerConfig,
    state: RefCell<State>,
    trace_sink: RefCell<Option<Rc<RefCell<dyn TraceSink>>>>,
}

/// A cooperative, single-threaded task scheduler.
///
/// `Scheduler` is a cheap handle; clones share the same queues. Task
/// callbacks may schedule and cancel tasks freely: no internal borrow is held
/// while a callback runs.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.borrow();
        f.debug_struct("Scheduler")
            .field("ready", &st.task_queue.len())
            .field("timers", &st.timer_queue.len())
            .field("macrotask_pending", &st.macrotask_pending)
            .field("host_timeout", &st.host_timeout)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler that reads time from `clock`.
    #[must_use]
    pub fn new(clock: Rc<dyn Clock>, config: SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(Inner {
                clock,
                config,
                state: RefCell::new(State {
                    task_queue: MinHeap::new(),
                    timer_queue: MinHeap::new(),
                    next_id: 1,
                    current_priority: Priority::Normal,
                    is_performing_work: false,
                    is_host_callback_scheduled: false,
                    is_host_timeout_scheduled: false,
                    macrotask_pending: false,
                    host_timeout: None,
                    slice_start: HostTime(0),
                    errors: Vec::new(),
                    failed_tasks: 0,
                }),
                trace_sink: RefCell::new(None),
            }),
        }
    }

    /// The configuration this scheduler was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// The clock this scheduler reads.
    #[must_use]
    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.inner.clock
    }

    /// Current host time.
    #[must_use]
    pub fn now(&self) -> HostTime {
        self.inner.clock.now()
    }

    /// Installs (or removes) a trace sink for task events.
    pub fn set_trace_sink(&self, sink: Option<Rc<RefCell<dyn TraceSink>>>) {
        *self.inner.trace_sink.borrow_mut() = sink;
    }

    fn state(&self) -> RefMut<'_, State> {
        self.inner.state.borrow_mut()
    }

    /// Schedules `callback` to run at `priority` as soon as possible.
    pub fn schedule_callback(&self, priority: Priority, callback: Callback) -> TaskHandle {
        self.schedule_callback_with(priority, callback, ScheduleOptions::default())
    }

    /// Schedules `callback` with options (such as a start delay).
    pub fn schedule_callback_with(
        &self,
        priority: Priority,
        callback: Callback,
        options: ScheduleOptions,
    ) -> TaskHandle {
        let now = self.now();
        let start_time = now.saturating_add(options.delay);
        let expiration_time = self.inner.config.expiration(priority, start_time);

        let mut st = self.state();
        let id = st.next_id;
        st.next_id += 1;
        let task = Rc::new(Task {
            id,
            priority,
            start_time,
            expiration_time,
            sort_index: Cell::new(0),
            callback: RefCell::new(Some(callback)),
        });

        if start_time > now {
            task.sort_index.set(start_time.ticks());
            st.timer_queue.push(task.clone());
            let is_first_timer = st.timer_queue.peek().is_some_and(|t| Rc::ptr_eq(t, &task));
            if st.task_queue.is_empty() && is_first_timer {
                // All ready work is done and this is the earliest timer.
                st.is_host_timeout_scheduled = true;
                st.host_timeout = Some(start_time);
            }
            log::trace!("scheduled delayed task {id} ({priority:?}) for {start_time:?}");
        } else {
            task.sort_index.set(task.ready_sort_index());
            st.task_queue.push(task.clone());
            if !st.is_host_callback_scheduled && !st.is_performing_work {
                st.is_host_callback_scheduled = true;
                st.macrotask_pending = true;
            }
            log::trace!("scheduled task {id} ({priority:?})");
        }
        TaskHandle(task)
    }

    /// Cancels a task. The task stays in its heap and is discarded when it
    /// reaches the top.
    pub fn cancel_callback(&self, handle: &TaskHandle) {
        handle.0.callback.borrow_mut().take();
    }

    /// Priority of the task currently running, or of the innermost
    /// [`run_with_priority`](Self::run_with_priority) scope. `Normal`
    /// otherwise.
    #[must_use]
    pub fn get_current_priority_level(&self) -> Priority {
        self.inner.state.borrow().current_priority
    }

    /// Runs `f` with the current priority level set to `priority`.
    pub fn run_with_priority<R>(&self, priority: Priority, f: impl FnOnce() -> R) -> R {
        let previous = core::mem::replace(&mut self.state().current_priority, priority);
        let result = f();
        self.state().current_priority = previous;
        result
    }

    /// Returns `true` once the current slice has used up its yield interval.
    #[must_use]
    pub fn should_yield(&self) -> bool {
        let slice_start = self.inner.state.borrow().slice_start;
        self.now().saturating_duration_since(slice_start) >= self.inner.config.yield_interval
    }

    /// Returns `true` if the scheduler has asked the host for a macrotask.
    #[must_use]
    pub fn has_pending_macrotask(&self) -> bool {
        self.inner.state.borrow().macrotask_pending
    }

    /// The host timeout the scheduler is waiting for, if any.
    #[must_use]
    pub fn next_timeout(&self) -> Option<HostTime> {
        self.inner.state.borrow().host_timeout
    }

    /// Number of queued tasks (ready and delayed, including cancelled ones
    /// not yet discarded).
    #[must_use]
    pub fn queued_task_count(&self) -> usize {
        let st = self.inner.state.borrow();
        st.task_queue.len() + st.timer_queue.len()
    }

    /// Returns and clears the errors of failed tasks.
    pub fn take_task_errors(&self) -> Vec<TaskError> {
        core::mem::take(&mut self.state().errors)
    }

    /// Total number of tasks that have failed.
    #[must_use]
    pub fn failed_task_count(&self) -> u64 {
        self.inner.state.borrow().failed_tasks
    }

    /// Services a pending macrotask: drains ready tasks until the slice
    /// expires or the queue empties.
    ///
    /// Returns `false` if no macrotask was pending. If work remains after the
    /// slice, a new macrotask is requested.
    pub fn run_macrotask(&self) -> bool {
        let now = self.now();
        {
            let mut st = self.state();
            if !st.macrotask_pending {
                return false;
            }
            st.macrotask_pending = false;
            st.slice_start = now;
        }
        let has_more_work = self.flush_work(now);
        let mut st = self.state();
        if has_more_work {
            st.macrotask_pending = true;
        } else {
            st.is_host_callback_scheduled = false;
        }
        true
    }

    /// Services the host timeout if its deadline has passed.
    ///
    /// Returns `false` if there is no timeout or it is not due yet.
    pub fn fire_timeout(&self) -> bool {
        let now = self.now();
        {
            let mut st = self.state();
            match st.host_timeout {
                Some(deadline) if deadline <= now => st.host_timeout = None,
                _ => return false,
            }
        }
        self.handle_timeout(now);
        true
    }

    fn handle_timeout(&self, now: HostTime) {
        let mut st = self.state();
        st.is_host_timeout_scheduled = false;
        advance_timers(&mut st, now);
        if st.is_host_callback_scheduled {
            return;
        }
        if st.task_queue.peek().is_some() {
            st.is_host_callback_scheduled = true;
            st.macrotask_pending = true;
        } else if let Some(first) = st.timer_queue.peek() {
            let start = first.start_time;
            st.is_host_timeout_scheduled = true;
            st.host_timeout = Some(start);
        }
    }

    fn flush_work(&self, initial_time: HostTime) -> bool {
        let previous_priority = {
            let mut st = self.state();
            st.is_host_callback_scheduled = false;
            if st.is_host_timeout_scheduled {
                st.is_host_timeout_scheduled = false;
                st.host_timeout = None;
            }
            st.is_performing_work = true;
            st.current_priority
        };
        let has_more_work = self.work_loop(initial_time);
        let mut st = self.state();
        st.current_priority = previous_priority;
        st.is_performing_work = false;
        has_more_work
    }

    fn work_loop(&self, initial_time: HostTime) -> bool {
        let mut current_time = initial_time;
        advance_timers(&mut self.state(), current_time);

        loop {
            let task = {
                let mut st = self.state();
                let Some(top) = st.task_queue.peek() else {
                    break;
                };
                if top.expiration_time > current_time {
                    drop(st);
                    if self.should_yield() {
                        return true;
                    }
                    st = self.state();
                }
                let Some(task) = st.task_queue.pop() else {
                    break;
                };
                task
            };

            let Some(callback) = task.callback.borrow_mut().take() else {
                // Cancelled.
                continue;
            };

            let did_timeout = task.expiration_time <= current_time;
            self.state().current_priority = task.priority;
            self.trace(|t| {
                t.task_begin(&TaskBeginEvent {
                    task_id: task.id,
                    priority: task.priority,
                    did_timeout,
                    timestamp: current_time,
                });
            });

            let result = callback.call(did_timeout);
            current_time = self.now();

            let outcome = match result {
                Ok(Some(continuation)) => {
                    *task.callback.borrow_mut() = Some(continuation);
                    task.sort_index.set(task.ready_sort_index());
                    self.state().task_queue.push(task.clone());
                    TaskOutcome::Continued
                }
                Ok(None) => TaskOutcome::Completed,
                Err(err) => {
                    log::error!("scheduler task {} failed: {err}", task.id);
                    let mut st = self.state();
                    st.failed_tasks += 1;
                    st.errors.push(err);
                    TaskOutcome::Failed
                }
            };
            self.trace(|t| {
                t.task_end(&TaskEndEvent {
                    task_id: task.id,
                    outcome,
                    timestamp: current_time,
                });
            });
            advance_timers(&mut self.state(), current_time);
        }

        let mut st = self.state();
        if st.task_queue.is_empty() {
            if let Some(first) = st.timer_queue.peek() {
                let start = first.start_time;
                st.is_host_timeout_scheduled = true;
                st.host_timeout = Some(start);
            }
            false
        } else {
            true
        }
    }

    fn trace(&self, f: impl FnOnce(&mut Tracer<'_>)) {
        let sink = self.inner.trace_sink.borrow().clone();
        let Some(sink) = sink else {
            return;
        };
        // A sink that is already borrowed (the embedder is inspecting it)
        // misses the event rather than panicking.
        if let Ok(mut guard) = sink.try_borrow_mut() {
            let mut tracer = Tracer::new(&mut *guard);
            f(&mut tracer);
        }
    }

    /// Runs macrotasks and due timeouts until nothing is left, jumping the
    /// clock forward to each timer deadline.
    #[cfg(test)]
    pub(crate) fn flush_all(&self) {
        for _ in 0..10_000 {
            if self.run_macrotask() {
                continue;
            }
            match self.next_timeout() {
                Some(deadline) => {
                    self.inner.clock.sleep_until(deadline);
                    self.fire_timeout();
                }
                None => return,
            }
        }
        panic!("scheduler did not go idle");
    }
}

/// Moves started timers to the ready queue and discards cancelled ones.
fn advance_timers(st: &mut State, now: HostTime) {
    while let Some(timer) = st.timer_queue.peek() {
        if timer.is_cancelled() {
            st.timer_queue.pop();
        } else if timer.start_time <= now {
            let Some(timer) = st.timer_queue.pop() else {
                break;
            };
            timer.sort_index.set(timer.ready_sort_index());
            st.task_queue.push(timer);
        } else {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use alloc::string::String;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn setup() -> (Rc<ManualClock>, Scheduler, Log) {
        let clock = Rc::new(ManualClock::new(HostTime(1_000)));
        let scheduler = Scheduler::new(clock.clone(), SchedulerConfig::headless());
        (clock, scheduler, Rc::new(RefCell::new(Vec::new())))
    }

    fn logger(log: &Log, label: &'static str) -> Callback {
        let log = log.clone();
        Callback::once(move |_| log.borrow_mut().push(label))
    }

    #[test]
    fn runs_in_priority_order() {
        let (_clock, s, log) = setup();
        s.schedule_callback(Priority::Normal, logger(&log, "normal"));
        s.schedule_callback(Priority::UserBlocking, logger(&log, "userBlocking"));
        s.schedule_callback(Priority::Immediate, logger(&log, "immediate"));
        assert!(log.borrow().is_empty(), "tasks never run synchronously");
        assert!(s.has_pending_macrotask());

        assert!(s.run_macrotask());
        assert_eq!(*log.borrow(), ["immediate", "userBlocking", "normal"]);
        assert!(!s.has_pending_macrotask());
        assert!(!s.run_macrotask());
    }

    #[test]
    fn equal_priority_is_fifo() {
        let (_clock, s, log) = setup();
        s.schedule_callback(Priority::Normal, logger(&log, "a"));
        s.schedule_callback(Priority::Normal, logger(&log, "b"));
        s.run_macrotask();
        assert_eq!(*log.borrow(), ["a", "b"]);
    }

    #[test]
    fn cancelled_task_is_skipped() {
        let (_clock, s, log) = setup();
        let a = s.schedule_callback(Priority::Normal, logger(&log, "a"));
        s.schedule_callback(Priority::Normal, logger(&log, "b"));
        s.cancel_callback(&a);
        assert!(a.is_done());
        s.run_macrotask();
        assert_eq!(*log.borrow(), ["b"]);
        assert_eq!(s.queued_task_count(), 0);
    }

    #[test]
    fn continuation_keeps_task_queued() {
        let (_clock, s, log) = setup();
        let log2 = log.clone();
        s.schedule_callback(
            Priority::Normal,
            Callback::new(move |_| {
                log2.borrow_mut().push("first");
                let log3 = log2.clone();
                Ok(Some(Callback::once(move |_| log3.borrow_mut().push("second"))))
            }),
        );
        s.schedule_callback(Priority::Low, logger(&log, "low"));
        s.run_macrotask();
        assert_eq!(*log.borrow(), ["first", "second", "low"]);
    }

    #[test]
    fn yields_after_slice_and_resumes() {
        let (clock, s, log) = setup();
        let clock2 = clock.clone();
        let log2 = log.clone();
        s.schedule_callback(
            Priority::Normal,
            Callback::once(move |_| {
                log2.borrow_mut().push("slow");
                clock2.advance(Duration::from_millis(6, Timebase::NANOS));
            }),
        );
        s.schedule_callback(Priority::Normal, logger(&log, "next"));

        assert!(s.run_macrotask());
        assert_eq!(*log.borrow(), ["slow"]);
        assert!(s.has_pending_macrotask(), "remaining work requests a new slice");

        assert!(s.run_macrotask());
        assert_eq!(*log.borrow(), ["slow", "next"]);
    }

    #[test]
    fn expired_tasks_run_even_when_slice_is_used_up() {
        let (clock, s, log) = setup();
        let (s2, log2) = (s.clone(), log.clone());
        s.schedule_callback(
            Priority::Normal,
            Callback::once(move |_| {
                clock.advance(Duration::from_millis(6, Timebase::NANOS));
                let log3 = log2.clone();
                s2.schedule_callback(
                    Priority::Immediate,
                    Callback::once(move |did_timeout| {
                        assert!(did_timeout, "immediate tasks are always timed out");
                        log3.borrow_mut().push("immediate");
                    }),
                );
            }),
        );
        s.schedule_callback(Priority::Low, logger(&log, "low"));

        s.run_macrotask();
        assert_eq!(*log.borrow(), ["immediate"], "low waits for the next slice");
        s.run_macrotask();
        assert_eq!(*log.borrow(), ["immediate", "low"]);
    }

    #[test]
    fn delayed_task_waits_for_host_timeout() {
        let (clock, s, log) = setup();
        let delay = Duration::from_millis(10, Timebase::NANOS);
        s.schedule_callback_with(
            Priority::Normal,
            logger(&log, "delayed"),
            ScheduleOptions { delay },
        );
        assert!(!s.has_pending_macrotask());
        assert_eq!(s.next_timeout(), Some(HostTime(1_000) + delay));
        assert!(!s.fire_timeout(), "not due yet");

        clock.advance(delay);
        assert!(s.fire_timeout());
        assert!(s.has_pending_macrotask());
        s.run_macrotask();
        assert_eq!(*log.borrow(), ["delayed"]);
        assert_eq!(s.next_timeout(), None);
    }

    #[test]
    fn failed_task_is_reported_and_loop_continues() {
        let (_clock, s, log) = setup();
        s.schedule_callback(
            Priority::Normal,
            Callback::new(|_| Err(TaskError::Failed(String::from("nope")))),
        );
        s.schedule_callback(Priority::Normal, logger(&log, "after"));
        s.run_macrotask();
        assert_eq!(*log.borrow(), ["after"]);
        assert_eq!(s.failed_task_count(), 1);
        let errors = s.take_task_errors();
        assert!(matches!(errors.as_slice(), [TaskError::Failed(m)] if m == "nope"));
        assert!(s.take_task_errors().is_empty());
    }

    #[test]
    fn current_priority_follows_running_task() {
        let (_clock, s, _log) = setup();
        let seen = Rc::new(Cell::new(None));
        let (s2, seen2) = (s.clone(), seen.clone());
        s.schedule_callback(
            Priority::UserBlocking,
            Callback::once(move |_| seen2.set(Some(s2.get_current_priority_level()))),
        );
        s.run_macrotask();
        assert_eq!(seen.get(), Some(Priority::UserBlocking));
        assert_eq!(s.get_current_priority_level(), Priority::Normal);

        let inner = s.run_with_priority(Priority::Idle, || s.get_current_priority_level());
        assert_eq!(inner, Priority::Idle);
        assert_eq!(s.get_current_priority_level(), Priority::Normal);
    }

    #[test]
    fn tasks_scheduled_from_callbacks_run_in_same_slice() {
        let (_clock, s, log) = setup();
        let (s2, log2) = (s.clone(), log.clone());
        s.schedule_callback(
            Priority::Normal,
            Callback::once(move |_| {
                log2.borrow_mut().push("outer");
                s2.schedule_callback(Priority::Immediate, logger(&log2, "inner"));
            }),
        );
        s.flush_all();
        assert_eq!(*log.borrow(), ["outer", "inner"]);
    }

    #[test]
    fn browser_config_uses_microsecond_ticks() {
        let config = SchedulerConfig::browser();
        assert_eq!(config.yield_interval, Duration(5_000));
        assert_eq!(config.user_blocking_timeout, Duration(250_000));
        let start = HostTime(10);
        assert_eq!(config.expiration(Priority::Immediate, start), HostTime(9));
        assert_eq!(
            config.expiration(Priority::Idle, start),
            HostTime(10 + MAX_SIGNED_31_BIT_INT * 1000)
        );
        assert_eq!(Priority::Immediate.level(), 1);
        assert_eq!(Priority::Idle.level(), 5);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn task_events_reach_sink() {
        #[derive(Default)]
        struct Outcomes(Vec<TaskOutcome>);
        impl TraceSink for Outcomes {
            fn on_task_end(&mut self, e: &TaskEndEvent) {
                self.0.push(e.outcome);
            }
        }

        let (_clock, s, log) = setup();
        let sink = Rc::new(RefCell::new(Outcomes::default()));
        s.set_trace_sink(Some(sink.clone()));
        s.schedule_callback(
            Priority::Normal,
            Callback::new(|_| Ok(Some(Callback::once(|_| {})))),
        );
        s.schedule_callback(
            Priority::Normal,
            Callback::new(|_| Err(TaskError::Failed(String::from("x")))),
        );
        s.schedule_callback(Priority::Normal, logger(&log, "done"));
        s.run_macrotask();
        assert_eq!(
            sink.borrow().0,
            [
                TaskOutcome::Continued,
                TaskOutcome::Completed,
                TaskOutcome::Failed,
                TaskOutcome::Completed,
            ]
        );
    }
}
