// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! and phase durations are converted to microseconds using a [`Timebase`].

use std::io::Write;

use trellis_core::time::{HostTime, Timebase};
use trellis_core::trace::{
    CommitSummary, EffectErrorEvent, MutationKind, MutationRecord, PhaseBeginEvent,
    PhaseEndEvent, TaskBeginEvent, TaskEndEvent, TaskOutcome, TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    timebase: Timebase,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("timebase", &self.timebase)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr(timebase: Timebase) -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
            timebase,
        }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }

    /// Consumes the sink and returns its writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn ticks_to_us(&self, ticks: u64) -> f64 {
        self.timebase.ticks_to_nanos(ticks) as f64 / 1000.0
    }

    fn host_us(&self, t: HostTime) -> f64 {
        self.ticks_to_us(t.ticks())
    }
}

fn outcome_name(outcome: TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Completed => "done",
        TaskOutcome::Continued => "yield",
        TaskOutcome::Failed => "FAILED",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_task_begin(&mut self, e: &TaskBeginEvent) {
        let timeout = if e.did_timeout { " timeout" } else { "" };
        let _ = writeln!(
            self.writer,
            "[task:begin] id={} {:?}{timeout} at {:.1}µs",
            e.task_id,
            e.priority,
            self.host_us(e.timestamp),
        );
    }

    fn on_task_end(&mut self, e: &TaskEndEvent) {
        let _ = writeln!(
            self.writer,
            "[task:end] id={} {} at {:.1}µs",
            e.task_id,
            outcome_name(e.outcome),
            self.host_us(e.timestamp),
        );
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:begin] pass={} {} at {:.1}µs",
            e.pass_index,
            e.phase.name(),
            self.host_us(e.timestamp),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:end] pass={} {} at {:.1}µs",
            e.pass_index,
            e.phase.name(),
            self.host_us(e.timestamp),
        );
    }

    fn on_effect_error(&mut self, e: &EffectErrorEvent<'_>) {
        let _ = writeln!(
            self.writer,
            "[effect:error] pass={} {} {}",
            e.pass_index,
            e.phase.name(),
            e.error,
        );
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        let _ = writeln!(
            self.writer,
            "[summary] pass={} lanes={:?} render={:.1}µs mutation={:.1}µs \
             layout={:.1}µs visited={} bailouts={} +{} ~{} -{} errors={}",
            s.pass_index,
            s.lanes,
            self.ticks_to_us(s.render_ticks),
            self.ticks_to_us(s.mutation_ticks),
            self.ticks_to_us(s.layout_ticks),
            s.fibers_visited,
            s.bailouts,
            s.placements,
            s.updates,
            s.deletions,
            s.effect_errors,
        );
    }

    fn on_mutations(&mut self, pass_index: u64, mutations: &[MutationRecord]) {
        let mut line = format!("[mutations] pass={pass_index}");
        for m in mutations {
            let sigil = match m.kind {
                MutationKind::Placement => '+',
                MutationKind::Update => '~',
                MutationKind::Deletion => '-',
            };
            line.push_str(&format!(" {sigil}{}", m.host.0));
        }
        let _ = writeln!(self.writer, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::host::HostHandle;
    use trellis_core::lane::Lanes;
    use trellis_core::scheduler::Priority;
    use trellis_core::trace::PhaseKind;

    fn output(sink: PrettyPrintSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn task_lines_name_priority_and_outcome() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new(), Timebase::NANOS);
        sink.on_task_begin(&TaskBeginEvent {
            task_id: 4,
            priority: Priority::UserBlocking,
            did_timeout: true,
            timestamp: HostTime(2_000),
        });
        sink.on_task_end(&TaskEndEvent {
            task_id: 4,
            outcome: TaskOutcome::Continued,
            timestamp: HostTime(3_500),
        });
        let out = output(sink);
        assert!(out.contains("[task:begin] id=4 UserBlocking timeout at 2.0µs"), "got: {out}");
        assert!(out.contains("[task:end] id=4 yield at 3.5µs"), "got: {out}");
    }

    #[test]
    fn summary_and_mutations() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new(), Timebase::NANOS);
        sink.on_phase_begin(&PhaseBeginEvent {
            pass_index: 2,
            phase: PhaseKind::Mutation,
            timestamp: HostTime(1_000),
        });
        sink.on_commit_summary(&CommitSummary {
            pass_index: 2,
            lanes: Lanes::DEFAULT,
            placements: 1,
            ..CommitSummary::default()
        });
        sink.on_mutations(
            2,
            &[
                MutationRecord {
                    kind: MutationKind::Placement,
                    fiber_index: 7,
                    host: HostHandle(3),
                },
                MutationRecord {
                    kind: MutationKind::Deletion,
                    fiber_index: 9,
                    host: HostHandle(5),
                },
            ],
        );
        let out = output(sink);
        assert!(out.contains("[phase:begin] pass=2 mutation at 1.0µs"), "got: {out}");
        assert!(out.contains("+1 ~0 -0"), "got: {out}");
        assert!(out.contains("[mutations] pass=2 +3 -5"), "got: {out}");
    }
}
