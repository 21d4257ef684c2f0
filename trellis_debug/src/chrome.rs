// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][spec] JSON to the given writer.
//!
//! Scheduler tasks are duration events on thread 0, render-pass phases are
//! duration events on thread 1. Summaries, effect errors and mutation batches
//! carry no timestamp of their own; they are placed at the most recent
//! timestamp seen in the recording.
//!
//! [spec]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use trellis_core::time::{HostTime, Timebase};
use trellis_core::trace::MutationKind;

use crate::recorder::{RecordedEvent, decode};

const TID_SCHEDULER: u32 = 0;
const TID_RENDER: u32 = 1;

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Timestamps are converted to microseconds using the provided [`Timebase`].
pub fn export(bytes: &[u8], timebase: Timebase, writer: &mut dyn Write) -> io::Result<()> {
    let events = to_trace_events(bytes, timebase);
    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

/// Converts recorded bytes into Chrome trace event objects.
#[must_use]
pub fn to_trace_events(bytes: &[u8], timebase: Timebase) -> Vec<Value> {
    let mut events: Vec<Value> = Vec::new();
    let mut last_ts = 0.0;

    for recorded in decode(bytes) {
        if let Some(t) = timestamp_of(&recorded) {
            last_ts = ticks_to_us(t.ticks(), timebase);
        }
        match recorded {
            RecordedEvent::TaskBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": format!("Task {:?}", e.priority),
                    "cat": "Scheduler",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_SCHEDULER,
                    "args": {
                        "task_id": e.task_id,
                        "did_timeout": e.did_timeout,
                    }
                }));
            }
            RecordedEvent::TaskEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "cat": "Scheduler",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_SCHEDULER,
                    "args": {
                        "task_id": e.task_id,
                        "outcome": format!("{:?}", e.outcome),
                    }
                }));
            }
            RecordedEvent::PhaseBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": e.phase.name(),
                    "cat": "Render",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_RENDER,
                    "args": {
                        "pass_index": e.pass_index,
                    }
                }));
            }
            RecordedEvent::PhaseEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": e.phase.name(),
                    "cat": "Render",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_RENDER,
                    "args": {
                        "pass_index": e.pass_index,
                    }
                }));
            }
            RecordedEvent::EffectError {
                pass_index,
                phase,
                component,
                message,
            } => {
                events.push(json!({
                    "ph": "i",
                    "name": "EffectError",
                    "cat": "Render",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_RENDER,
                    "s": "t",
                    "args": {
                        "pass_index": pass_index,
                        "phase": phase.name(),
                        "component": component,
                        "message": message,
                    }
                }));
            }
            RecordedEvent::CommitSummary(s) => {
                events.push(json!({
                    "ph": "i",
                    "name": "CommitSummary",
                    "cat": "Summary",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_RENDER,
                    "s": "t",
                    "args": {
                        "pass_index": s.pass_index,
                        "lanes": format!("{:#x}", s.lanes.bits()),
                        "render_us": ticks_to_us(s.render_ticks, timebase),
                        "mutation_us": ticks_to_us(s.mutation_ticks, timebase),
                        "layout_us": ticks_to_us(s.layout_ticks, timebase),
                        "fibers_visited": s.fibers_visited,
                        "bailouts": s.bailouts,
                        "placements": s.placements,
                        "updates": s.updates,
                        "deletions": s.deletions,
                        "effect_errors": s.effect_errors,
                    }
                }));
            }
            RecordedEvent::Mutations {
                pass_index,
                records,
            } => {
                let count = |kind| records.iter().filter(|r| r.kind == kind).count();
                events.push(json!({
                    "ph": "i",
                    "name": "Mutations",
                    "cat": "Rich",
                    "ts": last_ts,
                    "pid": 0,
                    "tid": TID_RENDER,
                    "s": "t",
                    "args": {
                        "pass_index": pass_index,
                        "placements": count(MutationKind::Placement),
                        "updates": count(MutationKind::Update),
                        "deletions": count(MutationKind::Deletion),
                    }
                }));
            }
        }
    }

    events
}

fn timestamp_of(event: &RecordedEvent) -> Option<HostTime> {
    match event {
        RecordedEvent::TaskBegin(e) => Some(e.timestamp),
        RecordedEvent::TaskEnd(e) => Some(e.timestamp),
        RecordedEvent::PhaseBegin(e) => Some(e.timestamp),
        RecordedEvent::PhaseEnd(e) => Some(e.timestamp),
        _ => None,
    }
}

fn ticks_to_us(ticks: u64, timebase: Timebase) -> f64 {
    timebase.ticks_to_nanos(ticks) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use trellis_core::lane::Lanes;
    use trellis_core::scheduler::Priority;
    use trellis_core::trace::{
        CommitSummary, PhaseBeginEvent, PhaseEndEvent, PhaseKind, TaskBeginEvent, TaskEndEvent,
        TaskOutcome, TraceSink,
    };

    #[test]
    fn export_produces_valid_json() {
        let mut rec = RecorderSink::new();
        rec.on_task_begin(&TaskBeginEvent {
            task_id: 1,
            priority: Priority::Normal,
            did_timeout: false,
            timestamp: HostTime(1_000_000),
        });
        rec.on_phase_begin(&PhaseBeginEvent {
            pass_index: 0,
            phase: PhaseKind::Render,
            timestamp: HostTime(1_000_000),
        });
        rec.on_phase_end(&PhaseEndEvent {
            pass_index: 0,
            phase: PhaseKind::Render,
            timestamp: HostTime(1_000_100),
        });
        rec.on_commit_summary(&CommitSummary {
            pass_index: 0,
            lanes: Lanes::DEFAULT,
            ..CommitSummary::default()
        });
        rec.on_task_end(&TaskEndEvent {
            task_id: 1,
            outcome: TaskOutcome::Completed,
            timestamp: HostTime(1_000_200),
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), Timebase::NANOS, &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed.len(), 5);

        assert_eq!(parsed[0]["ph"], "B");
        assert_eq!(parsed[0]["name"], "Task Normal");
        assert_eq!(parsed[0]["tid"], TID_SCHEDULER);

        assert_eq!(parsed[1]["ph"], "B");
        assert_eq!(parsed[1]["name"], "render");
        assert_eq!(parsed[2]["ph"], "E");
        assert_eq!(parsed[2]["ts"], 1000.1);

        assert_eq!(parsed[3]["name"], "CommitSummary");
        assert_eq!(parsed[3]["ts"], 1000.1, "placed at the last seen timestamp");
        assert_eq!(parsed[3]["args"]["lanes"], "0x20");

        assert_eq!(parsed[4]["ph"], "E");
        assert_eq!(parsed[4]["args"]["outcome"], "Completed");
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], Timebase::NANOS, &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert!(parsed.is_empty());
    }
}
