// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the scheduler and the reconciler.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! scheduler and each render pass call at their instrumentation points. All
//! method bodies default to no-ops, so implementing only the events you care
//! about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing. When **on**, each
//! method performs a single `Option` branch before dispatching.
//!
//! [`CommitSummaryBuilder`] collects phase timestamps and mutation counts
//! during one render pass and produces a [`CommitSummary`] at the end.
//!
//! Sinks are installed on a [`Scheduler`](crate::scheduler::Scheduler) or a
//! [`Root`](crate::root::Root) as `Rc<RefCell<dyn TraceSink>>`. The same sink
//! may be installed on both; neither holds the borrow while user code runs.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`): gates [`MutationRecord`] events plus the
//!   corresponding `TraceSink` method.

use crate::error::EffectError;
#[cfg(feature = "trace-rich")]
use crate::host::HostHandle;
use crate::lane::Lanes;
use crate::scheduler::Priority;
use crate::time::HostTime;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of a render pass is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Begin/complete walk over the work-in-progress tree.
    Render,
    /// Host mutations: deletions, placements, property updates.
    Mutation,
    /// Layout effects, run synchronously after mutations.
    Layout,
    /// Passive effects, run in a later scheduler task.
    Passive,
}

impl PhaseKind {
    /// A short lowercase name, used by exporters.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Mutation => "mutation",
            Self::Layout => "layout",
            Self::Passive => "passive",
        }
    }
}

/// How a scheduler task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskOutcome {
    /// The callback finished and the task was removed.
    Completed,
    /// The callback returned a continuation; the task stays queued.
    Continued,
    /// The callback returned an error.
    Failed,
}

/// What a host mutation did.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// A host node was inserted or appended.
    Placement,
    /// Host properties or text were updated in place.
    Update,
    /// A host node was removed.
    Deletion,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted just before a scheduler task callback runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskBeginEvent {
    /// Scheduler-assigned task id.
    pub task_id: u64,
    /// The task's priority.
    pub priority: Priority,
    /// Whether the task's expiration time had already passed.
    pub did_timeout: bool,
    /// Host time when the callback was entered.
    pub timestamp: HostTime,
}

/// Emitted just after a scheduler task callback returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskEndEvent {
    /// Scheduler-assigned task id.
    pub task_id: u64,
    /// How the callback ended.
    pub outcome: TaskOutcome,
    /// Host time when the callback returned.
    pub timestamp: HostTime,
}

/// Marks the beginning of a render-pass phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseBeginEvent {
    /// Per-root pass counter.
    pub pass_index: u64,
    /// Which phase is starting.
    pub phase: PhaseKind,
    /// Host time at the start of the phase.
    pub timestamp: HostTime,
}

/// Marks the end of a render-pass phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseEndEvent {
    /// Per-root pass counter.
    pub pass_index: u64,
    /// Which phase is ending.
    pub phase: PhaseKind,
    /// Host time at the end of the phase.
    pub timestamp: HostTime,
}

/// Emitted when an effect body fails.
#[derive(Clone, Copy, Debug)]
pub struct EffectErrorEvent<'a> {
    /// Per-root pass counter.
    pub pass_index: u64,
    /// Layout or passive.
    pub phase: PhaseKind,
    /// The failure.
    pub error: &'a EffectError,
}

/// Per-pass summary produced by [`CommitSummaryBuilder`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Per-root pass counter.
    pub pass_index: u64,
    /// The lanes this pass rendered.
    pub lanes: Lanes,
    /// Render phase duration in ticks (0 if not measured).
    pub render_ticks: u64,
    /// Mutation phase duration in ticks (0 if not measured).
    pub mutation_ticks: u64,
    /// Layout phase duration in ticks (0 if not measured).
    pub layout_ticks: u64,
    /// Fibers whose begin step ran.
    pub fibers_visited: u32,
    /// Fibers that bailed out without rendering.
    pub bailouts: u32,
    /// Host nodes inserted or appended.
    pub placements: u32,
    /// Host nodes updated in place.
    pub updates: u32,
    /// Subtrees removed.
    pub deletions: u32,
    /// Effect bodies that failed.
    pub effect_errors: u32,
}

/// A single host mutation.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MutationRecord {
    /// What happened.
    pub kind: MutationKind,
    /// Arena index of the fiber that caused it.
    pub fiber_index: u32,
    /// The host node affected.
    pub host: HostHandle,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the scheduler and render passes.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called before a task callback runs.
    fn on_task_begin(&mut self, e: &TaskBeginEvent) {
        _ = e;
    }

    /// Called after a task callback returns.
    fn on_task_end(&mut self, e: &TaskEndEvent) {
        _ = e;
    }

    /// Called at the beginning of a render-pass phase.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a render-pass phase.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called when an effect body fails.
    fn on_effect_error(&mut self, e: &EffectErrorEvent<'_>) {
        _ = e;
    }

    /// Called with a per-pass summary after the commit.
    fn on_commit_summary(&mut self, s: &CommitSummary) {
        _ = s;
    }

    /// Called with the host mutations of one pass (requires `trace-rich`).
    #[cfg(feature = "trace-rich")]
    fn on_mutations(&mut self, pass_index: u64, mutations: &[MutationRecord]) {
        _ = (pass_index, mutations);
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Returns `true` if events reach a sink.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        #[cfg(feature = "trace")]
        {
            self.sink.is_some()
        }
        #[cfg(not(feature = "trace"))]
        {
            false
        }
    }

    /// Emits a [`TaskBeginEvent`].
    #[inline]
    pub fn task_begin(&mut self, e: &TaskBeginEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_task_begin(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`TaskEndEvent`].
    #[inline]
    pub fn task_end(&mut self, e: &TaskEndEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_task_end(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseBeginEvent`].
    #[inline]
    pub fn phase_begin(&mut self, e: &PhaseBeginEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_begin(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`PhaseEndEvent`].
    #[inline]
    pub fn phase_end(&mut self, e: &PhaseEndEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_phase_end(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits an [`EffectErrorEvent`].
    #[inline]
    pub fn effect_error(&mut self, e: &EffectErrorEvent<'_>) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_effect_error(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`CommitSummary`].
    #[inline]
    pub fn commit_summary(&mut self, s: &CommitSummary) {
        #[cfg(feature = "trace")]
        if let Some(sink) = &mut self.sink {
            sink.on_commit_summary(s);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = s;
        }
    }

    /// Emits host mutations (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn mutations(&mut self, pass_index: u64, mutations: &[MutationRecord]) {
        if let Some(s) = &mut self.sink {
            s.on_mutations(pass_index, mutations);
        }
    }
}

// ---------------------------------------------------------------------------
// CommitSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps and counts during a pass and produces a
/// [`CommitSummary`].
#[derive(Debug)]
pub struct CommitSummaryBuilder {
    summary: CommitSummary,
    phase_starts: [Option<HostTime>; 3],
    phase_ends: [Option<HostTime>; 3],
}

impl CommitSummaryBuilder {
    /// Starts building a summary for a pass over `lanes`.
    #[must_use]
    pub fn new(pass_index: u64, lanes: Lanes) -> Self {
        Self {
            summary: CommitSummary {
                pass_index,
                lanes,
                ..CommitSummary::default()
            },
            phase_starts: [None; 3],
            phase_ends: [None; 3],
        }
    }

    /// Records the start of a phase. Passive phases run outside the pass and
    /// are ignored.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: HostTime) {
        if let Some(i) = phase_index(phase) {
            self.phase_starts[i] = Some(t);
        }
    }

    /// Records the end of a phase.
    pub fn phase_end(&mut self, phase: PhaseKind, t: HostTime) {
        if let Some(i) = phase_index(phase) {
            self.phase_ends[i] = Some(t);
        }
    }

    /// Adds the render phase counters: fibers begun and fibers skipped.
    pub fn render_counts(&mut self, visited: u32, bailouts: u32) {
        self.summary.fibers_visited += visited;
        self.summary.bailouts += bailouts;
    }

    /// Adds host mutation counters.
    pub fn mutation_counts(&mut self, placements: u32, updates: u32, deletions: u32) {
        self.summary.placements += placements;
        self.summary.updates += updates;
        self.summary.deletions += deletions;
    }

    /// Counts a failed effect.
    pub fn effect_error(&mut self) {
        self.summary.effect_errors += 1;
    }

    /// The counts gathered so far.
    #[must_use]
    pub fn counts(&self) -> &CommitSummary {
        &self.summary
    }

    /// Consumes the builder and produces the final [`CommitSummary`].
    #[must_use]
    pub fn finish(self) -> CommitSummary {
        CommitSummary {
            render_ticks: self.phase_duration(PhaseKind::Render),
            mutation_ticks: self.phase_duration(PhaseKind::Mutation),
            layout_ticks: self.phase_duration(PhaseKind::Layout),
            ..self.summary
        }
    }

    fn phase_duration(&self, phase: PhaseKind) -> u64 {
        let Some(idx) = phase_index(phase) else {
            return 0;
        };
        match (self.phase_starts[idx], self.phase_ends[idx]) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).ticks(),
            _ => 0,
        }
    }
}

const fn phase_index(phase: PhaseKind) -> Option<usize> {
    match phase {
        PhaseKind::Render => Some(0),
        PhaseKind::Mutation => Some(1),
        PhaseKind::Layout => Some(2),
        PhaseKind::Passive => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_task_begin(&TaskBeginEvent {
            task_id: 1,
            priority: Priority::Normal,
            did_timeout: false,
            timestamp: HostTime(0),
        });
        sink.on_commit_summary(&CommitSummary::default());
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        assert!(!tracer.is_active());
        tracer.phase_begin(&PhaseBeginEvent {
            pass_index: 0,
            phase: PhaseKind::Render,
            timestamp: HostTime(0),
        });
    }

    #[test]
    fn summary_builder_computes_durations() {
        let mut builder = CommitSummaryBuilder::new(3, Lanes::DEFAULT);
        builder.phase_begin(PhaseKind::Render, HostTime(100));
        builder.phase_end(PhaseKind::Render, HostTime(400));
        builder.phase_begin(PhaseKind::Mutation, HostTime(400));
        builder.phase_end(PhaseKind::Mutation, HostTime(450));
        builder.phase_begin(PhaseKind::Passive, HostTime(450));
        builder.mutation_counts(2, 0, 1);
        builder.render_counts(1, 0);

        let summary = builder.finish();
        assert_eq!(summary.pass_index, 3);
        assert_eq!(summary.lanes, Lanes::DEFAULT);
        assert_eq!(summary.render_ticks, 300);
        assert_eq!(summary.mutation_ticks, 50);
        assert_eq!(summary.layout_ticks, 0, "unmeasured phases are zero");
        assert_eq!(summary.placements, 2);
        assert_eq!(summary.deletions, 1);
        assert_eq!(summary.fibers_visited, 1);
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_sink() {
        use alloc::vec::Vec;

        struct RecordingSink {
            phases: Vec<PhaseKind>,
        }
        impl TraceSink for RecordingSink {
            fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
                self.phases.push(e.phase);
            }
        }

        let mut sink = RecordingSink { phases: Vec::new() };
        let mut tracer = Tracer::new(&mut sink);
        assert!(tracer.is_active());
        tracer.phase_begin(&PhaseBeginEvent {
            pass_index: 0,
            phase: PhaseKind::Mutation,
            timestamp: HostTime(5),
        });
        drop(tracer);
        assert_eq!(sink.phases, &[PhaseKind::Mutation]);
    }
}
