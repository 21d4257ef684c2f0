// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Roots: the entry point that ties a host container, a scheduler and a
//! fiber tree together.
//!
//! A [`Root`] owns the fiber store of one tree. Updates (a new element via
//! [`Root::render`], or a hook dispatch inside the tree) are recorded with a
//! lane and the root makes sure a scheduler task is queued at the priority of
//! its most urgent pending lane. That task renders and commits one pass:
//!
//! ```text
//!   render() / dispatch ──► pending lanes ──► ensure_root_is_scheduled
//!                                                     │
//!                                             scheduler task
//!                                                     │
//!     flush passive ─► mark updates ─► render ─► mutation ─► layout
//!                                                     │
//!                                      passive task (RootConfig::passive_priority)
//! ```
//!
//! Hooks reach the root through a weak [`RootHandle`]; dispatching to a
//! dropped root does nothing.
//!
//! A pass that fails while rendering leaves the host untouched. A pass that
//! fails during the mutation phase keeps the previous fiber tree as current,
//! but the host nodes it already changed stay changed; the error is logged
//! and returned.

use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, Ref, RefCell};
use core::fmt;

use crate::commit::{Commit, EffectErrors, PendingPassive, flush_passive_effects};
use crate::element::Node;
use crate::error::{EffectError, ReconcileError};
use crate::fiber::{FiberFlags, FiberId, FiberStore};
use crate::host::{HostHandle, HostRenderer};
use crate::lane::{EventPriority, Lanes, TransitionCursor, get_next_lanes, lanes_to_event_priority};
use crate::scheduler::{Callback, Priority, Scheduler, TaskHandle};
#[cfg(feature = "trace")]
use crate::trace::{EffectErrorEvent, PhaseBeginEvent, PhaseEndEvent};
use crate::trace::{CommitSummaryBuilder, PhaseKind, TraceSink, Tracer};
use crate::work_loop::RenderSession;

/// Passes a single [`Root::flush_sync`] call may run before giving up on a
/// tree that keeps scheduling updates from its own effects.
const NESTED_UPDATE_LIMIT: u32 = 50;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What happens when an effect body returns an error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EffectFailurePolicy {
    /// Record the failure and keep running the remaining effects.
    #[default]
    Continue,
    /// Stop the effect pass and return the failure.
    Abort,
}

/// Per-root configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootConfig {
    /// How effect failures are handled.
    pub effect_failure: EffectFailurePolicy,
    /// Scheduler priority of the task that runs passive effects.
    pub passive_priority: Priority,
}

impl RootConfig {
    /// The default configuration: continue past failed effects, run passive
    /// effects at normal priority.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            effect_failure: EffectFailurePolicy::Continue,
            passive_priority: Priority::Normal,
        }
    }
}

impl Default for RootConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// The root record: container binding, tree pointers, and pending lanes.
struct FiberRoot {
    container: HostHandle,
    /// The committed root fiber.
    current: Cell<u32>,
    /// The rendered root fiber while it is being committed.
    finished_work: Cell<Option<u32>>,
    pending_lanes: Cell<Lanes>,
}

/// State only the render/commit path touches.
struct WorkState {
    store: FiberStore,
    pending_passive: Option<PendingPassive>,
    pass_index: u64,
}

struct RootShared {
    this: Weak<Self>,
    root: FiberRoot,
    config: RootConfig,
    scheduler: Scheduler,
    host: Rc<RefCell<dyn HostRenderer>>,
    work: RefCell<WorkState>,

    // -- Update queues --
    /// Hook dispatches waiting to be marked on their fibers.
    updates: RefCell<Vec<(FiberId, Lanes)>>,
    /// The latest element passed to `render`, with the lanes it was sent in.
    pending_element: RefCell<Option<(Node, Lanes)>>,

    // -- Scheduling --
    callback: RefCell<Option<(TaskHandle, Priority)>>,
    passive_task: RefCell<Option<TaskHandle>>,
    update_priority: Cell<Option<EventPriority>>,
    transition_lane: Cell<Option<Lanes>>,
    transitions: Cell<TransitionCursor>,

    // -- Diagnostics --
    effect_errors: RefCell<Vec<EffectError>>,
    trace_sink: RefCell<Option<Rc<RefCell<dyn TraceSink>>>>,
}

impl RootShared {
    fn request_update_lane(&self) -> Lanes {
        self.transition_lane
            .get()
            .unwrap_or_else(|| self.update_priority.get().unwrap_or_default().lane())
    }

    fn mark_root_updated(&self, lane: Lanes) {
        let pending = self.root.pending_lanes.get();
        self.root.pending_lanes.set(pending | lane);
        self.ensure_root_is_scheduled();
    }

    fn schedule_update_on_fiber(&self, fiber: FiberId, lane: Lanes) {
        self.updates.borrow_mut().push((fiber, lane));
        self.mark_root_updated(lane);
    }

    fn update_container(&self, element: Node) {
        let lane = self.request_update_lane();
        {
            let mut pending = self.pending_element.borrow_mut();
            let lanes = pending.take().map_or(lane, |(_, lanes)| lanes | lane);
            *pending = Some((element, lanes));
        }
        self.mark_root_updated(lane);
    }

    fn start_transition(&self, f: impl FnOnce()) {
        let mut cursor = self.transitions.get();
        let lane = cursor.claim();
        self.transitions.set(cursor);
        let previous = self.transition_lane.replace(Some(lane));
        f();
        self.transition_lane.set(previous);
    }

    /// Makes sure a render task is queued at the priority of the most urgent
    /// pending lane, reusing the queued task when its priority matches.
    fn ensure_root_is_scheduled(&self) {
        let next = get_next_lanes(self.root.pending_lanes.get(), Lanes::NONE);
        let mut callback = self.callback.borrow_mut();
        if next.is_empty() {
            if let Some((task, _)) = callback.take() {
                self.scheduler.cancel_callback(&task);
            }
            return;
        }
        let priority = lanes_to_event_priority(next).scheduler_priority();
        if let Some((task, existing)) = &*callback {
            if !task.is_done() && *existing == priority {
                return;
            }
            self.scheduler.cancel_callback(task);
        }
        let this = self.this.clone();
        let task = self.scheduler.schedule_callback(
            priority,
            Callback::new(move |_| {
                let Some(shared) = this.upgrade() else {
                    return Ok(None);
                };
                *shared.callback.borrow_mut() = None;
                shared.perform_work_on_root()?;
                Ok(None)
            }),
        );
        *callback = Some((task, priority));
    }

    fn schedule_passive_flush(&self) {
        let mut passive = self.passive_task.borrow_mut();
        if passive.as_ref().is_some_and(|task| !task.is_done()) {
            return;
        }
        let this = self.this.clone();
        *passive = Some(self.scheduler.schedule_callback(
            self.config.passive_priority,
            Callback::new(move |_| {
                let Some(shared) = this.upgrade() else {
                    return Ok(None);
                };
                match shared.flush_passive() {
                    // A pass is running; it flushes before rendering.
                    Err(ReconcileError::RootBusy) => Ok(None),
                    result => {
                        result?;
                        Ok(None)
                    }
                }
            }),
        ));
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    fn flush_passive(&self) -> Result<(), ReconcileError> {
        let mut work = self
            .work
            .try_borrow_mut()
            .map_err(|_| ReconcileError::RootBusy)?;
        self.flush_pending_passive(&mut work)
    }

    fn flush_pending_passive(&self, work: &mut WorkState) -> Result<(), ReconcileError> {
        let Some(pending) = work.pending_passive.take() else {
            return Ok(());
        };
        let pass_index = pending.pass_index;
        self.phase_event(pass_index, PhaseKind::Passive, true, None);
        let mut errors = EffectErrors::new();
        let result = flush_passive_effects(
            &mut work.store,
            pending,
            self.config.effect_failure,
            &mut errors,
        );
        self.phase_event(pass_index, PhaseKind::Passive, false, None);
        self.report_effect_errors(pass_index, errors, None);
        result
    }

    /// Renders and commits the most urgent pending lanes.
    fn perform_work_on_root(&self) -> Result<(), ReconcileError> {
        let mut work = self
            .work
            .try_borrow_mut()
            .map_err(|_| ReconcileError::RootBusy)?;
        let mut host = self
            .host
            .try_borrow_mut()
            .map_err(|_| ReconcileError::RootBusy)?;
        let work = &mut *work;

        self.flush_pending_passive(work)?;

        let updates = core::mem::take(&mut *self.updates.borrow_mut());
        for (fiber, lane) in updates {
            if !work.store.mark_update_lane(fiber, lane) {
                log::trace!("dropping update for unmounted fiber {fiber:?}");
            }
        }

        let lanes = get_next_lanes(self.root.pending_lanes.get(), Lanes::NONE);
        if lanes.is_empty() {
            return Ok(());
        }
        let pass_index = work.pass_index;
        work.pass_index += 1;
        let current = self.root.current.get();

        let element = {
            let mut pending = self.pending_element.borrow_mut();
            match pending.take() {
                Some((element, element_lanes)) if element_lanes.includes_some(lanes) => {
                    Some(element)
                }
                other => {
                    *pending = other;
                    None
                }
            }
        };
        if element.is_some() {
            work.store.add_lanes(current, lanes);
        }

        log::debug!("pass {pass_index}: rendering {lanes:?}");
        let mut summary = CommitSummaryBuilder::new(pass_index, lanes);
        self.phase_event(pass_index, PhaseKind::Render, true, Some(&mut summary));
        let handle = RootHandle(self.this.clone());
        let mut session = RenderSession::new(&mut work.store, &mut *host, &handle, lanes);
        let rendered = session.render_root(current, element);
        let stats = session.stats;
        self.phase_event(pass_index, PhaseKind::Render, false, Some(&mut summary));
        summary.render_counts(stats.visited, stats.bailouts);

        let finished = match rendered {
            Ok(finished) => finished,
            Err(err) => {
                log::error!("pass {pass_index} failed to render: {err}");
                let pending = self.root.pending_lanes.get();
                self.root.pending_lanes.set(pending.remove(lanes));
                self.ensure_root_is_scheduled();
                return Err(err);
            }
        };
        self.root.finished_work.set(Some(finished));

        let mut commit = Commit::new(&mut work.store, &mut *host, self.config.effect_failure);
        self.phase_event(pass_index, PhaseKind::Mutation, true, Some(&mut summary));
        let mutated = commit.commit_mutation_effects(finished);
        match &mutated {
            Ok(()) => self.root.current.set(finished),
            // Host mutations already applied are not rolled back.
            Err(err) => log::error!(
                "pass {pass_index} failed during mutation; the host tree no longer matches \
                 the committed fibers: {err}"
            ),
        }
        self.root.finished_work.set(None);
        self.phase_event(pass_index, PhaseKind::Mutation, false, Some(&mut summary));
        self.phase_event(pass_index, PhaseKind::Layout, true, Some(&mut summary));
        let result = mutated.and_then(|()| commit.commit_layout_effects(finished));
        self.phase_event(pass_index, PhaseKind::Layout, false, Some(&mut summary));

        let stats = commit.stats;
        let errors = core::mem::take(&mut commit.errors);
        let destroys = core::mem::take(&mut commit.passive_destroys);
        #[cfg(feature = "trace-rich")]
        let mutations = core::mem::take(&mut commit.mutations);
        summary.mutation_counts(stats.placements, stats.updates, stats.deletions);
        self.report_effect_errors(pass_index, errors, Some(&mut summary));

        let root_fiber = self.root.current.get();
        let has_passive = work.store.subtree_flags[root_fiber as usize]
            .contains(FiberFlags::PASSIVE)
            || !destroys.is_empty();
        if has_passive {
            work.pending_passive = Some(PendingPassive {
                pass_index,
                root: root_fiber,
                destroys,
            });
        }

        // Whatever the pass left behind, plus updates dispatched during it.
        let mut remaining = work.store.lanes[root_fiber as usize]
            | work.store.child_lanes[root_fiber as usize];
        for (_, lane) in self.updates.borrow().iter() {
            remaining |= *lane;
        }
        if let Some((_, element_lanes)) = &*self.pending_element.borrow() {
            remaining |= *element_lanes;
        }
        self.root.pending_lanes.set(remaining);
        drop(host);

        log::debug!(
            "pass {pass_index} committed: {} placed, {} updated, {} deleted",
            stats.placements,
            stats.updates,
            stats.deletions,
        );
        #[cfg(feature = "trace-rich")]
        self.trace(|t| t.mutations(pass_index, &mutations));
        let summary = summary.finish();
        self.trace(|t| t.commit_summary(&summary));

        if has_passive {
            self.schedule_passive_flush();
        }
        self.ensure_root_is_scheduled();
        result
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    fn report_effect_errors(
        &self,
        pass_index: u64,
        errors: EffectErrors,
        mut summary: Option<&mut CommitSummaryBuilder>,
    ) {
        if errors.is_empty() {
            return;
        }
        for (phase, error) in &errors {
            if let Some(summary) = summary.as_deref_mut() {
                summary.effect_error();
            }
            #[cfg(feature = "trace")]
            self.trace(|t| {
                t.effect_error(&EffectErrorEvent {
                    pass_index,
                    phase: *phase,
                    error,
                });
            });
            #[cfg(not(feature = "trace"))]
            {
                _ = (pass_index, phase, error);
            }
        }
        self.effect_errors
            .borrow_mut()
            .extend(errors.into_iter().map(|(_, error)| error));
    }

    fn phase_event(
        &self,
        pass_index: u64,
        phase: PhaseKind,
        begin: bool,
        summary: Option<&mut CommitSummaryBuilder>,
    ) {
        let timestamp = self.scheduler.now();
        if let Some(summary) = summary {
            if begin {
                summary.phase_begin(phase, timestamp);
            } else {
                summary.phase_end(phase, timestamp);
            }
        }
        #[cfg(feature = "trace")]
        self.trace(|t| {
            if begin {
                t.phase_begin(&PhaseBeginEvent {
                    pass_index,
                    phase,
                    timestamp,
                });
            } else {
                t.phase_end(&PhaseEndEvent {
                    pass_index,
                    phase,
                    timestamp,
                });
            }
        });
        #[cfg(not(feature = "trace"))]
        {
            _ = pass_index;
        }
    }

    fn trace(&self, f: impl FnOnce(&mut Tracer<'_>)) {
        let sink = self.trace_sink.borrow().clone();
        let Some(sink) = sink else {
            return;
        };
        if let Ok(mut guard) = sink.try_borrow_mut() {
            let mut tracer = Tracer::new(&mut *guard);
            f(&mut tracer);
        }
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Weak reference from hooks back to their root.
#[derive(Clone, Debug)]
pub struct RootHandle(Weak<RootShared>);

impl RootHandle {
    pub(crate) fn request_update_lane(&self) -> Lanes {
        self.0
            .upgrade()
            .map_or(Lanes::DEFAULT, |shared| shared.request_update_lane())
    }

    pub(crate) fn schedule_update_on_fiber(&self, fiber: FiberId, lane: Lanes) {
        if let Some(shared) = self.0.upgrade() {
            shared.schedule_update_on_fiber(fiber, lane);
        }
    }

    pub(crate) fn start_transition(&self, f: impl FnOnce()) {
        match self.0.upgrade() {
            Some(shared) => shared.start_transition(f),
            None => f(),
        }
    }
}

/// A tree rendered into one host container.
///
/// Work is performed by scheduler tasks; embedders drive the [`Scheduler`]
/// the root was created with, or call [`flush_sync`](Self::flush_sync).
pub struct Root {
    shared: Rc<RootShared>,
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("container", &self.shared.root.container)
            .field("current", &self.shared.root.current.get())
            .field("pending_lanes", &self.shared.root.pending_lanes.get())
            .finish_non_exhaustive()
    }
}

impl Root {
    /// Creates an empty root bound to `container`.
    pub fn new(
        container: HostHandle,
        host: Rc<RefCell<dyn HostRenderer>>,
        scheduler: Scheduler,
        config: RootConfig,
    ) -> Self {
        let mut store = FiberStore::new();
        let current = store.create_host_root(container);
        let shared = Rc::new_cyclic(|this| RootShared {
            this: this.clone(),
            root: FiberRoot {
                container,
                current: Cell::new(current),
                finished_work: Cell::new(None),
                pending_lanes: Cell::new(Lanes::NONE),
            },
            config,
            scheduler,
            host,
            work: RefCell::new(WorkState {
                store,
                pending_passive: None,
                pass_index: 0,
            }),
            updates: RefCell::new(Vec::new()),
            pending_element: RefCell::new(None),
            callback: RefCell::new(None),
            passive_task: RefCell::new(None),
            update_priority: Cell::new(None),
            transition_lane: Cell::new(None),
            transitions: Cell::new(TransitionCursor::new()),
            effect_errors: RefCell::new(Vec::new()),
            trace_sink: RefCell::new(None),
        });
        Self { shared }
    }

    /// Schedules `element` to replace the tree's content.
    pub fn render(&self, element: impl Into<Node>) {
        self.update_container(element.into());
    }

    /// Schedules `element` to replace the tree's content, in the lane of the
    /// current update priority.
    pub fn update_container(&self, element: Node) {
        self.shared.update_container(element);
    }

    /// Schedules removal of the whole tree.
    pub fn unmount(&self) {
        self.update_container(Node::Empty);
    }

    /// Renders and commits all pending work now, then runs pending passive
    /// effects. Updates scheduled by those effects are processed too.
    ///
    /// # Errors
    ///
    /// Returns the first render or commit failure, or
    /// [`ReconcileError::RootBusy`] if called from inside a pass.
    pub fn flush_sync(&self) -> Result<(), ReconcileError> {
        let mut passes = 0;
        loop {
            if self.shared.root.pending_lanes.get().is_empty() {
                self.shared.flush_passive()?;
                if self.shared.root.pending_lanes.get().is_empty() {
                    return Ok(());
                }
            }
            if passes == NESTED_UPDATE_LIMIT {
                log::error!(
                    "maximum update depth exceeded: the tree kept scheduling updates after \
                     {NESTED_UPDATE_LIMIT} passes"
                );
                return Ok(());
            }
            passes += 1;
            self.shared.perform_work_on_root()?;
        }
    }

    /// Runs pending passive effects now.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::RootBusy`] if called from inside a pass, or
    /// an effect failure under [`EffectFailurePolicy::Abort`].
    pub fn flush_passive_effects(&self) -> Result<(), ReconcileError> {
        self.shared.flush_passive()
    }

    /// Runs `f` with `priority` as the update priority: updates dispatched
    /// inside it render in that priority's lane.
    pub fn run_with_priority<R>(&self, priority: EventPriority, f: impl FnOnce() -> R) -> R {
        let previous = self.shared.update_priority.replace(Some(priority));
        let result = f();
        self.shared.update_priority.set(previous);
        result
    }

    /// Runs `f`; updates dispatched inside it render in a transition lane.
    pub fn start_transition(&self, f: impl FnOnce()) {
        self.shared.start_transition(f);
    }

    /// Drains the effect failures recorded since the last call.
    pub fn take_effect_errors(&self) -> Vec<EffectError> {
        core::mem::take(&mut *self.shared.effect_errors.borrow_mut())
    }

    /// Installs or removes the sink that receives this root's phase events
    /// and commit summaries.
    pub fn set_trace_sink(&self, sink: Option<Rc<RefCell<dyn TraceSink>>>) {
        *self.shared.trace_sink.borrow_mut() = sink;
    }

    /// The host container.
    #[must_use]
    pub fn container(&self) -> HostHandle {
        self.shared.root.container
    }

    /// Lanes with work that has not been committed yet.
    #[must_use]
    pub fn pending_lanes(&self) -> Lanes {
        self.shared.root.pending_lanes.get()
    }

    /// The scheduler this root queues its work on.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }

    /// The committed root fiber.
    ///
    /// # Panics
    ///
    /// Panics if called while the root is rendering.
    #[must_use]
    pub fn current(&self) -> FiberId {
        self.shared.work.borrow().store.id_of(self.shared.root.current.get())
    }

    /// Read access to the fiber store, for inspection and debugging.
    ///
    /// # Panics
    ///
    /// Panics if called while the root is rendering.
    #[must_use]
    pub fn fibers(&self) -> Ref<'_, FiberStore> {
        Ref::map(self.shared.work.borrow(), |work| &work.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::element::{ClassType, Component, ContextValue, ElementType, FunctionComponent};
    use crate::element::{PropValue, Props, h, memo, text};
    use crate::fiber::{INVALID, StateNode};
    use crate::hooks::{EffectResult, SetState};
    use crate::host::testing::{Op, TestHost};
    use crate::scheduler::SchedulerConfig;
    use crate::time::{HostTime, ManualClock};
    use alloc::boxed::Box;
    use alloc::string::{String, ToString};
    use alloc::vec;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Harness {
        scheduler: Scheduler,
        host: Rc<RefCell<TestHost>>,
        root: Root,
    }

    impl Harness {
        fn new(config: RootConfig) -> Self {
            let clock = Rc::new(ManualClock::new(HostTime(0)));
            let scheduler = Scheduler::new(clock, SchedulerConfig::headless());
            let host = Rc::new(RefCell::new(TestHost::new()));
            let container = host.borrow_mut().create_container();
            let root = Root::new(container, host.clone(), scheduler.clone(), config);
            Self {
                scheduler,
                host,
                root,
            }
        }

        fn render(&self, node: Node) {
            self.root.render(node);
            self.scheduler.flush_all();
        }

        fn markup(&self) -> String {
            self.host.borrow().inner(self.root.container())
        }

        fn take_ops(&self) -> Vec<Op> {
            self.host.borrow_mut().take_ops()
        }
    }

    fn list(keys: &[&str]) -> Node {
        h("ul")
            .children(keys.iter().map(|k| h("li").key(*k).child(*k).build()))
            .build()
    }

    fn push(log: &Log, entry: &str) {
        log.borrow_mut().push(entry.into());
    }

    fn placements(ops: &[Op]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, Op::Append(..) | Op::Insert(..)))
            .count()
    }

    fn creations(ops: &[Op]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, Op::Create(..) | Op::CreateText(..)))
            .count()
    }

    #[test]
    fn mount_builds_host_tree() {
        let t = Harness::new(RootConfig::default());
        t.render(list(&["a", "b", "c"]));
        assert_eq!(t.markup(), "<ul><li>a</li><li>b</li><li>c</li></ul>");
        assert!(t.root.pending_lanes().is_empty());
    }

    #[test]
    fn keyed_swap_moves_one_node_without_creating() {
        let t = Harness::new(RootConfig::default());
        t.render(list(&["a", "b", "c", "d"]));
        t.take_ops();

        t.render(list(&["a", "c", "b", "d"]));
        let ops = t.take_ops();
        assert_eq!(creations(&ops), 0);
        assert_eq!(placements(&ops), 1, "{ops:?}");
        assert_eq!(t.markup(), "<ul><li>a</li><li>c</li><li>b</li><li>d</li></ul>");
    }

    #[test]
    fn insert_lands_before_stable_sibling() {
        let t = Harness::new(RootConfig::default());
        t.render(list(&["a", "b"]));
        t.take_ops();

        t.render(list(&["a", "x", "b"]));
        let ops = t.take_ops();
        assert_eq!(creations(&ops), 1);
        assert!(ops.iter().any(|op| matches!(op, Op::Insert(..))), "{ops:?}");
        assert_eq!(t.markup(), "<ul><li>a</li><li>x</li><li>b</li></ul>");
    }

    #[test]
    fn removed_child_is_detached_and_released() {
        let t = Harness::new(RootConfig::default());
        t.render(list(&["a", "b", "c"]));
        t.take_ops();

        t.render(list(&["a", "c"]));
        let ops = t.take_ops();
        assert_eq!(ops.iter().filter(|op| matches!(op, Op::Remove(..))).count(), 1);
        assert_eq!(ops.iter().filter(|op| matches!(op, Op::Release(..))).count(), 1);
        assert_eq!(placements(&ops), 0);
        assert_eq!(t.markup(), "<ul><li>a</li><li>c</li></ul>");
    }

    #[test]
    fn props_and_text_are_patched_in_place() {
        let t = Harness::new(RootConfig::default());
        t.render(h("a").attr("href", "/x").child("one").build());
        t.take_ops();

        t.render(h("a").attr("title", "t").child("two").build());
        let ops = t.take_ops();
        assert_eq!(creations(&ops), 0);
        assert_eq!(t.markup(), "<a title=\"t\">two</a>");
    }

    #[test]
    fn text_content_switches_to_children() {
        let t = Harness::new(RootConfig::default());
        t.render(h("div").child("plain").build());
        t.render(h("div").child(h("span").child("nested")).build());
        assert_eq!(t.markup(), "<div><span>nested</span></div>");
        t.render(h("div").child("plain again").build());
        assert_eq!(t.markup(), "<div>plain again</div>");
    }

    #[test]
    fn fragments_and_components_place_their_host_children() {
        let t = Harness::new(RootConfig::default());
        let pair = FunctionComponent::new("Pair", |_, props| {
            let label = props
                .get("label")
                .and_then(|v| v.to_text())
                .unwrap_or_default();
            Node::list([h("b").child(label.clone()).build(), h("i").child(label).build()])
        });
        t.render(
            h("p")
                .child(pair.element().key("1").attr("label", "x"))
                .child(h("hr").key("hr"))
                .build(),
        );
        assert_eq!(t.markup(), "<p><b>x</b><i>x</i><hr></hr></p>");
        t.take_ops();

        // Moving the component moves both of its host nodes.
        t.render(
            h("p")
                .child(h("hr").key("hr"))
                .child(pair.element().key("1").attr("label", "x"))
                .build(),
        );
        assert_eq!(t.markup(), "<p><hr></hr><b>x</b><i>x</i></p>");
        let ops = t.take_ops();
        assert_eq!(creations(&ops), 0);
        assert_eq!(placements(&ops), 2);
    }

    #[test]
    fn state_update_rerenders_component() {
        let t = Harness::new(RootConfig::default());
        let slot: Rc<RefCell<Option<SetState<i32>>>> = Rc::default();
        let renders = Rc::new(Cell::new(0));
        let counter = {
            let slot = slot.clone();
            let renders = renders.clone();
            FunctionComponent::new("Counter", move |cx, _| {
                renders.set(renders.get() + 1);
                let (n, set) = cx.use_state(|| 0);
                *slot.borrow_mut() = Some(set);
                h("span").child(n.to_string()).build()
            })
        };
        t.render(h("div").child(counter.element()).child(h("em")).build());
        assert_eq!(t.markup(), "<div><span>0</span><em></em></div>");
        t.take_ops();

        let set = slot.borrow().clone().unwrap();
        set.set(5);
        set.update(|n| n + 1);
        t.scheduler.flush_all();
        assert_eq!(t.markup(), "<div><span>6</span><em></em></div>");
        assert_eq!(renders.get(), 2, "both updates render in one pass");
        let ops = t.take_ops();
        assert_eq!(ops, vec![Op::SetText(1, "6".into())]);
    }

    #[test]
    fn update_after_unmount_is_dropped() {
        let t = Harness::new(RootConfig::default());
        let slot: Rc<RefCell<Option<SetState<i32>>>> = Rc::default();
        let counter = {
            let slot = slot.clone();
            FunctionComponent::new("Counter", move |cx, _| {
                let (n, set) = cx.use_state(|| 0);
                *slot.borrow_mut() = Some(set);
                text(n.to_string())
            })
        };
        t.render(counter.element().build());
        t.render(Node::Empty);
        assert_eq!(t.markup(), "");

        slot.borrow().clone().unwrap().set(3);
        t.scheduler.flush_all();
        assert_eq!(t.markup(), "");
        assert_eq!(t.root.fibers().live_count(), 2, "only the root pair is left");
    }

    #[test]
    fn effects_run_in_order_with_cleanups() {
        let t = Harness::new(RootConfig::default());
        let log: Log = Rc::default();
        let fx = {
            let log = log.clone();
            FunctionComponent::new("Fx", move |cx, props| {
                let dep = props.get("dep").cloned().unwrap_or(crate::element::PropValue::Null);
                let (l1, l2) = (log.clone(), log.clone());
                cx.use_layout_effect(
                    move || -> EffectResult {
                        push(&l1, "layout");
                        Ok(Some(Box::new(move || push(&l1, "layout cleanup"))))
                    },
                    Some(vec![dep.clone()]),
                );
                cx.use_effect(
                    move || -> EffectResult {
                        push(&l2, "passive");
                        Ok(Some(Box::new(move || push(&l2, "passive cleanup"))))
                    },
                    Some(vec![dep]),
                );
                Node::Empty
            })
        };

        t.render(fx.element().attr("dep", 1).build());
        assert_eq!(*log.borrow(), ["layout", "passive"]);
        log.borrow_mut().clear();

        t.render(fx.element().attr("dep", 1).build());
        assert!(log.borrow().is_empty(), "unchanged deps skip both effects");

        t.render(fx.element().attr("dep", 2).build());
        assert_eq!(
            *log.borrow(),
            ["layout cleanup", "layout", "passive cleanup", "passive"]
        );
        log.borrow_mut().clear();

        t.render(Node::Empty);
        assert_eq!(*log.borrow(), ["layout cleanup", "passive cleanup"]);
    }

    #[test]
    fn failed_effect_is_recorded_and_others_run() {
        let t = Harness::new(RootConfig::default());
        let ran = Rc::new(Cell::new(false));
        let fx = {
            let ran = ran.clone();
            FunctionComponent::new("Broken", move |cx, _| {
                cx.use_layout_effect(|| Err(EffectError::new("boom")), Some(vec![]));
                let ran = ran.clone();
                cx.use_layout_effect(
                    move || {
                        ran.set(true);
                        Ok(None)
                    },
                    Some(vec![]),
                );
                Node::Empty
            })
        };
        t.render(fx.element().build());
        assert!(ran.get());
        let errors = t.root.take_effect_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "effect in `Broken` failed: boom");
    }

    #[test]
    fn abort_policy_returns_effect_error() {
        let t = Harness::new(RootConfig {
            effect_failure: EffectFailurePolicy::Abort,
            ..RootConfig::default()
        });
        let fx = FunctionComponent::new("Broken", |cx, _| {
            cx.use_layout_effect(|| Err(EffectError::new("boom")), None);
            h("div").build()
        });
        t.root.render(fx.element().build());
        let result = t.root.flush_sync();
        assert!(matches!(result, Err(ReconcileError::Effect(_))));
        // The host tree was still committed.
        assert_eq!(t.markup(), "<div></div>");
    }

    #[test]
    fn context_change_reaches_consumer_below_memo() {
        let t = Harness::new(RootConfig::default());
        let theme = Context::new(String::from("light"));
        let middle_renders = Rc::new(Cell::new(0));

        let leaf = {
            let theme = theme.clone();
            FunctionComponent::new("Leaf", move |cx, _| {
                let value = cx.use_context(&theme);
                text(value.to_string())
            })
        };
        let middle = {
            let renders = middle_renders.clone();
            let leaf = leaf.clone();
            memo(ElementType::Function(FunctionComponent::new("Middle", move |_, _| {
                renders.set(renders.get() + 1);
                h("section").child(leaf.element()).build()
            })))
        };
        let app = |value: &str| {
            theme
                .provider(value.to_string())
                .child(middle.element())
                .child(theme.consumer(|v: &String| h("i").child(v.clone()).build()))
                .build()
        };

        t.render(app("light"));
        assert_eq!(t.markup(), "<section>light</section><i>light</i>");
        t.render(app("dark"));
        assert_eq!(t.markup(), "<section>dark</section><i>dark</i>");
        assert_eq!(middle_renders.get(), 1, "memo parent was skipped");
    }

    #[test]
    fn memo_skips_equal_props() {
        let t = Harness::new(RootConfig::default());
        let renders = Rc::new(Cell::new(0));
        let inner = {
            let renders = renders.clone();
            FunctionComponent::new("Label", move |_, props| {
                renders.set(renders.get() + 1);
                text(props.get("text").and_then(|v| v.to_text()).unwrap_or_default())
            })
        };
        let label = memo(ElementType::Function(inner));
        t.render(label.element().attr("text", "a").build());
        t.render(label.element().attr("text", "a").build());
        assert_eq!(renders.get(), 1);
        t.render(label.element().attr("text", "b").build());
        assert_eq!(renders.get(), 2);
        assert_eq!(t.markup(), "b");
    }

    struct Lifecycle {
        log: Log,
    }

    impl Component for Lifecycle {
        fn render(&mut self, props: &Props, context: Option<&ContextValue>) -> Node {
            let prefix = context
                .and_then(|c| c.downcast_ref::<&'static str>())
                .copied()
                .unwrap_or("");
            let n = props.get("n").and_then(|v| v.to_text()).unwrap_or_default();
            h("b").child(alloc::format!("{prefix}{n}")).build()
        }

        fn did_mount(&mut self) -> Result<(), EffectError> {
            push(&self.log, "mount");
            Ok(())
        }

        fn did_update(&mut self, prev_props: &Props) -> Result<(), EffectError> {
            let prev = prev_props.get("n").and_then(|v| v.to_text()).unwrap_or_default();
            push(&self.log, &alloc::format!("update from {prev}"));
            Ok(())
        }

        fn will_unmount(&mut self) {
            push(&self.log, "unmount");
        }
    }

    #[test]
    fn class_lifecycle_and_context_type() {
        let t = Harness::new(RootConfig::default());
        let log: Log = Rc::default();
        let prefix = Context::new("#");
        let class = {
            let log = log.clone();
            ClassType::with_context("Lifecycle", prefix.handle().clone(), move |_| {
                Box::new(Lifecycle { log: log.clone() })
            })
        };

        t.render(class.element().attr("n", 1).build());
        assert_eq!(t.markup(), "<b>#1</b>");
        t.render(prefix.provider("n=").child(class.element().attr("n", 2)).build());
        assert_eq!(t.markup(), "<b>n=2</b>");
        t.render(Node::Empty);
        // The provider wrapper changes the position, so the second render
        // mounts a new instance.
        assert_eq!(*log.borrow(), ["mount", "unmount", "mount", "unmount"]);

        log.borrow_mut().clear();
        t.render(class.element().attr("n", 1).build());
        t.render(class.element().attr("n", 2).build());
        assert_eq!(*log.borrow(), ["mount", "update from 1"]);
    }

    #[test]
    fn priorities_pick_lanes() {
        let t = Harness::new(RootConfig::default());
        t.root.run_with_priority(EventPriority::Discrete, || {
            t.root.render(h("div").build());
        });
        assert_eq!(t.root.pending_lanes(), Lanes::SYNC);
        t.root.start_transition(|| t.root.render(h("p").build()));
        assert!(t.root.pending_lanes().includes_some(Lanes::TRANSITIONS));

        // The most recent element wins, whichever lane renders it.
        t.root.flush_sync().unwrap();
        assert_eq!(t.markup(), "<p></p>");
        assert!(t.root.pending_lanes().is_empty());
    }

    #[test]
    fn listener_must_be_callable() {
        let t = Harness::new(RootConfig::default());
        t.root.render(h("button").attr("onClick", "nope").build());
        let result = t.root.flush_sync();
        assert!(matches!(result, Err(ReconcileError::NotCallable { .. })));
        assert_eq!(t.markup(), "");
        assert_eq!(t.root.fibers().live_count(), 2, "failed work is freed");

        t.root.render(h("button").on("onClick", |_| {}).build());
        t.root.flush_sync().unwrap();
        assert_eq!(t.markup(), "<button></button>");
    }

    #[test]
    fn memo_callback_and_ref_keep_identity_while_deps_are_equal() {
        type Seen = Rc<RefCell<Vec<(Rc<String>, Rc<dyn Fn() -> i32>, Rc<RefCell<u32>>)>>>;
        let t = Harness::new(RootConfig::default());
        let seen: Seen = Rc::default();
        let computes = Rc::new(Cell::new(0));
        let component = {
            let seen = seen.clone();
            let computes = computes.clone();
            FunctionComponent::new("Memo", move |cx, props| {
                let dep = |key: &str| props.get(key).cloned().unwrap_or(PropValue::Null);
                let deps = vec![dep("k"), dep("x")];
                let calls = computes.clone();
                let value = cx.use_memo(
                    move || {
                        calls.set(calls.get() + 1);
                        String::from("computed")
                    },
                    Some(deps.clone()),
                );
                let callback: Rc<dyn Fn() -> i32> = cx.use_callback(|| 1_i32, Some(deps));
                let hits = cx.use_ref(|| 0_u32);
                *hits.borrow_mut() += 1;
                seen.borrow_mut().push((value, callback, hits));
                Node::Empty
            })
        };
        let render = |x: f64| t.render(component.element().attr("k", "a").attr("x", x).build());

        // Fresh but equal deps, NaN included.
        render(f64::NAN);
        render(f64::NAN);
        {
            let seen = seen.borrow();
            assert_eq!(seen.len(), 2);
            assert!(Rc::ptr_eq(&seen[0].0, &seen[1].0), "memo value is reused");
            assert!(Rc::ptr_eq(&seen[0].1, &seen[1].1), "callback keeps its identity");
            assert_eq!(computes.get(), 1);
        }

        // +0 and -0 are different deps.
        render(0.0);
        render(-0.0);
        let seen = seen.borrow();
        assert_eq!(computes.get(), 3);
        assert!(!Rc::ptr_eq(&seen[2].0, &seen[3].0));
        assert!(!Rc::ptr_eq(&seen[2].1, &seen[3].1));
        assert!(seen.iter().all(|(_, _, hits)| Rc::ptr_eq(hits, &seen[0].2)));
        assert_eq!(*seen[3].2.borrow(), 4, "the ref survives every render");
    }

    #[test]
    fn commit_clears_mutation_and_layout_flags() {
        let t = Harness::new(RootConfig::default());
        let fx = FunctionComponent::new("Fx", |cx, props| {
            cx.use_layout_effect(|| Ok(None), None);
            text(props.get("n").and_then(|v| v.to_text()).unwrap_or_default())
        });
        let tree = |keys: &[&str], n: i32| {
            h("div")
                .child(list(keys))
                .child(fx.element().attr("n", n))
                .build()
        };
        t.render(tree(&["a", "b", "c"], 1));
        t.render(tree(&["c", "a", "x"], 2));
        assert_eq!(t.markup(), "<div><ul><li>c</li><li>a</li><li>x</li></ul>2</div>");

        let store = t.root.fibers();
        let handled = FiberFlags::MUTATION_MASK | FiberFlags::LAYOUT_MASK | FiberFlags::PASSIVE;
        for (idx, flags) in store.flags.iter().enumerate() {
            if store.alive[idx] {
                assert!(!flags.intersects(handled), "fiber {idx} kept {flags:?}");
            }
        }
    }

    #[test]
    fn bailed_out_sibling_does_not_rerun_layout_effect() {
        let t = Harness::new(RootConfig::default());
        let log: Log = Rc::default();
        let slot: Rc<RefCell<Option<SetState<i32>>>> = Rc::default();
        let fx = {
            let log = log.clone();
            FunctionComponent::new("Fx", move |cx, _| {
                push(&log, "render");
                let log = log.clone();
                cx.use_layout_effect(
                    move || -> EffectResult {
                        push(&log, "layout");
                        Ok(None)
                    },
                    None,
                );
                h("hr").build()
            })
        };
        let counter = {
            let slot = slot.clone();
            FunctionComponent::new("Counter", move |cx, _| {
                let (n, set) = cx.use_state(|| 0);
                *slot.borrow_mut() = Some(set);
                h("span").child(n.to_string()).build()
            })
        };
        t.render(h("div").child(fx.element()).child(counter.element()).build());
        assert_eq!(*log.borrow(), ["render", "layout"]);

        // The sibling gets its first alternate here, cloned from current.
        slot.borrow().clone().unwrap().set(1);
        t.scheduler.flush_all();
        assert_eq!(t.markup(), "<div><hr></hr><span>1</span></div>");
        assert_eq!(*log.borrow(), ["render", "layout"]);
    }

    #[test]
    fn failed_mutation_keeps_previous_tree_current() {
        let t = Harness::new(RootConfig::default());
        t.render(h("p").build());
        let before = t.root.current();
        {
            // Without a container the root cannot detach its old child.
            let mut work = t.root.shared.work.borrow_mut();
            let root = t.root.shared.root.current.get();
            let alternate = work.store.alternate[root as usize];
            work.store.state_node[root as usize] = StateNode::None;
            if alternate != INVALID {
                work.store.state_node[alternate as usize] = StateNode::None;
            }
        }

        t.root.render(h("i").build());
        let result = t.root.flush_sync();
        assert!(matches!(result, Err(ReconcileError::MissingHostParent(_))), "{result:?}");
        assert_eq!(t.root.current(), before);
        assert_eq!(t.markup(), "<p></p>");
    }
}
