// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as tagged little-endian records. [`decode`] reads them back as
//! an iterator of [`RecordedEvent`].
//!
//! Effect errors keep their component name and message as length-prefixed
//! UTF-8. Mutation batches keep every record.

use trellis_core::host::HostHandle;
use trellis_core::lane::Lanes;
use trellis_core::scheduler::Priority;
use trellis_core::time::HostTime;
use trellis_core::trace::{
    CommitSummary, EffectErrorEvent, MutationKind, MutationRecord, PhaseBeginEvent,
    PhaseEndEvent, PhaseKind, TaskBeginEvent, TaskEndEvent, TaskOutcome, TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_TASK_BEGIN: u8 = 1;
const TAG_TASK_END: u8 = 2;
const TAG_PHASE_BEGIN: u8 = 3;
const TAG_PHASE_END: u8 = 4;
const TAG_EFFECT_ERROR: u8 = 5;
const TAG_COMMIT_SUMMARY: u8 = 6;
const TAG_MUTATIONS: u8 = 7;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Discards everything recorded so far.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_len(&mut self, len: usize) {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "recorded lengths are capped at u32::MAX"
        )]
        self.write_u32(len.min(u32::MAX as usize) as u32);
    }

    fn write_str(&mut self, s: &str) {
        let bytes = &s.as_bytes()[..s.len().min(u32::MAX as usize)];
        self.write_len(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    fn write_phase(&mut self, p: PhaseKind) {
        self.write_u8(match p {
            PhaseKind::Render => 0,
            PhaseKind::Mutation => 1,
            PhaseKind::Layout => 2,
            PhaseKind::Passive => 3,
        });
    }

    fn write_outcome(&mut self, o: TaskOutcome) {
        self.write_u8(match o {
            TaskOutcome::Completed => 0,
            TaskOutcome::Continued => 1,
            TaskOutcome::Failed => 2,
        });
    }

    fn write_mutation_kind(&mut self, k: MutationKind) {
        self.write_u8(match k {
            MutationKind::Placement => 0,
            MutationKind::Update => 1,
            MutationKind::Deletion => 2,
        });
    }
}

impl TraceSink for RecorderSink {
    fn on_task_begin(&mut self, e: &TaskBeginEvent) {
        self.write_u8(TAG_TASK_BEGIN);
        self.write_u64(e.task_id);
        self.write_u8(e.priority.level());
        self.write_u8(u8::from(e.did_timeout));
        self.write_u64(e.timestamp.ticks());
    }

    fn on_task_end(&mut self, e: &TaskEndEvent) {
        self.write_u8(TAG_TASK_END);
        self.write_u64(e.task_id);
        self.write_outcome(e.outcome);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_u8(TAG_PHASE_BEGIN);
        self.write_u64(e.pass_index);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_u8(TAG_PHASE_END);
        self.write_u64(e.pass_index);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_effect_error(&mut self, e: &EffectErrorEvent<'_>) {
        self.write_u8(TAG_EFFECT_ERROR);
        self.write_u64(e.pass_index);
        self.write_phase(e.phase);
        self.write_str(&e.error.component);
        self.write_str(&e.error.message);
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.write_u8(TAG_COMMIT_SUMMARY);
        self.write_u64(s.pass_index);
        self.write_u32(s.lanes.bits());
        self.write_u64(s.render_ticks);
        self.write_u64(s.mutation_ticks);
        self.write_u64(s.layout_ticks);
        self.write_u32(s.fibers_visited);
        self.write_u32(s.bailouts);
        self.write_u32(s.placements);
        self.write_u32(s.updates);
        self.write_u32(s.deletions);
        self.write_u32(s.effect_errors);
    }

    fn on_mutations(&mut self, pass_index: u64, mutations: &[MutationRecord]) {
        let count = mutations.len().min(u32::MAX as usize);
        self.write_u8(TAG_MUTATIONS);
        self.write_u64(pass_index);
        self.write_len(count);
        for m in &mutations[..count] {
            self.write_mutation_kind(m.kind);
            self.write_u32(m.fiber_index);
            self.write_u32(m.host.0);
        }
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedEvent {
    /// A [`TaskBeginEvent`].
    TaskBegin(TaskBeginEvent),
    /// A [`TaskEndEvent`].
    TaskEnd(TaskEndEvent),
    /// A [`PhaseBeginEvent`].
    PhaseBegin(PhaseBeginEvent),
    /// A [`PhaseEndEvent`].
    PhaseEnd(PhaseEndEvent),
    /// An [`EffectErrorEvent`], with the error flattened to owned strings.
    EffectError {
        /// Per-root pass counter.
        pass_index: u64,
        /// Layout or passive.
        phase: PhaseKind,
        /// Component that owns the effect.
        component: String,
        /// The failure message.
        message: String,
    },
    /// A [`CommitSummary`].
    CommitSummary(CommitSummary),
    /// The host mutations of one pass.
    Mutations {
        /// Per-root pass counter.
        pass_index: u64,
        /// The mutations in commit order.
        records: Vec<MutationRecord>,
    },
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
///
/// Iteration stops at the first unknown tag or truncated record.
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn read_u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn read_u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn read_string(&mut self) -> Option<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_phase(&mut self) -> Option<PhaseKind> {
        Some(match self.read_u8()? {
            0 => PhaseKind::Render,
            1 => PhaseKind::Mutation,
            2 => PhaseKind::Layout,
            _ => PhaseKind::Passive,
        })
    }

    fn read_priority(&mut self) -> Option<Priority> {
        Some(match self.read_u8()? {
            1 => Priority::Immediate,
            2 => Priority::UserBlocking,
            3 => Priority::Normal,
            4 => Priority::Low,
            _ => Priority::Idle,
        })
    }

    fn read_outcome(&mut self) -> Option<TaskOutcome> {
        Some(match self.read_u8()? {
            0 => TaskOutcome::Completed,
            1 => TaskOutcome::Continued,
            _ => TaskOutcome::Failed,
        })
    }

    fn read_mutation_kind(&mut self) -> Option<MutationKind> {
        Some(match self.read_u8()? {
            0 => MutationKind::Placement,
            1 => MutationKind::Update,
            _ => MutationKind::Deletion,
        })
    }

    fn decode_task_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::TaskBegin(TaskBeginEvent {
            task_id: self.read_u64()?,
            priority: self.read_priority()?,
            did_timeout: self.read_u8()? != 0,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_task_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::TaskEnd(TaskEndEvent {
            task_id: self.read_u64()?,
            outcome: self.read_outcome()?,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_phase_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseBegin(PhaseBeginEvent {
            pass_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_phase_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseEnd(PhaseEndEvent {
            pass_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_effect_error(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::EffectError {
            pass_index: self.read_u64()?,
            phase: self.read_phase()?,
            component: self.read_string()?,
            message: self.read_string()?,
        })
    }

    fn decode_commit_summary(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::CommitSummary(CommitSummary {
            pass_index: self.read_u64()?,
            lanes: Lanes(self.read_u32()?),
            render_ticks: self.read_u64()?,
            mutation_ticks: self.read_u64()?,
            layout_ticks: self.read_u64()?,
            fibers_visited: self.read_u32()?,
            bailouts: self.read_u32()?,
            placements: self.read_u32()?,
            updates: self.read_u32()?,
            deletions: self.read_u32()?,
            effect_errors: self.read_u32()?,
        }))
    }

    fn decode_mutations(&mut self) -> Option<RecordedEvent> {
        let pass_index = self.read_u64()?;
        let count = self.read_u32()? as usize;
        // Each record is 9 bytes; refuse counts the buffer cannot hold.
        if count > (self.data.len() - self.pos) / 9 {
            return None;
        }
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(MutationRecord {
                kind: self.read_mutation_kind()?,
                fiber_index: self.read_u32()?,
                host: HostHandle(self.read_u32()?),
            });
        }
        Some(RecordedEvent::Mutations {
            pass_index,
            records,
        })
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_u8()? {
            TAG_TASK_BEGIN => self.decode_task_begin(),
            TAG_TASK_END => self.decode_task_end(),
            TAG_PHASE_BEGIN => self.decode_phase_begin(),
            TAG_PHASE_END => self.decode_phase_end(),
            TAG_EFFECT_ERROR => self.decode_effect_error(),
            TAG_COMMIT_SUMMARY => self.decode_commit_summary(),
            TAG_MUTATIONS => self.decode_mutations(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::error::EffectError;

    fn sample_summary() -> CommitSummary {
        CommitSummary {
            pass_index: 7,
            lanes: Lanes::SYNC | Lanes::DEFAULT,
            render_ticks: 1_500,
            mutation_ticks: 200,
            layout_ticks: 40,
            fibers_visited: 12,
            bailouts: 3,
            placements: 1,
            updates: 2,
            deletions: 0,
            effect_errors: 1,
        }
    }

    #[test]
    fn task_and_phase_events_decode_in_order() {
        let mut rec = RecorderSink::new();
        rec.on_task_begin(&TaskBeginEvent {
            task_id: 3,
            priority: Priority::Low,
            did_timeout: true,
            timestamp: HostTime(1_000),
        });
        rec.on_phase_begin(&PhaseBeginEvent {
            pass_index: 1,
            phase: PhaseKind::Layout,
            timestamp: HostTime(1_100),
        });
        rec.on_phase_end(&PhaseEndEvent {
            pass_index: 1,
            phase: PhaseKind::Layout,
            timestamp: HostTime(1_200),
        });
        rec.on_task_end(&TaskEndEvent {
            task_id: 3,
            outcome: TaskOutcome::Failed,
            timestamp: HostTime(1_300),
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 4);
        match &events[0] {
            RecordedEvent::TaskBegin(e) => {
                assert_eq!(e.task_id, 3);
                assert_eq!(e.priority, Priority::Low);
                assert!(e.did_timeout);
            }
            other => panic!("expected TaskBegin, got {other:?}"),
        }
        assert!(matches!(
            events[1],
            RecordedEvent::PhaseBegin(PhaseBeginEvent {
                phase: PhaseKind::Layout,
                ..
            })
        ));
        assert!(matches!(events[2], RecordedEvent::PhaseEnd(_)));
        match &events[3] {
            RecordedEvent::TaskEnd(e) => assert_eq!(e.outcome, TaskOutcome::Failed),
            other => panic!("expected TaskEnd, got {other:?}"),
        }
    }

    #[test]
    fn summary_keeps_every_counter() {
        let mut rec = RecorderSink::new();
        rec.on_commit_summary(&sample_summary());
        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events, [RecordedEvent::CommitSummary(sample_summary())]);
    }

    #[test]
    fn effect_error_keeps_component_and_message() {
        let mut rec = RecorderSink::new();
        let error = EffectError {
            component: "Clock".into(),
            message: "timer gone".into(),
        };
        rec.on_effect_error(&EffectErrorEvent {
            pass_index: 4,
            phase: PhaseKind::Passive,
            error: &error,
        });
        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(
            events,
            [RecordedEvent::EffectError {
                pass_index: 4,
                phase: PhaseKind::Passive,
                component: "Clock".into(),
                message: "timer gone".into(),
            }]
        );
    }

    #[test]
    fn mutation_batch_keeps_records() {
        let mut rec = RecorderSink::new();
        let records = [
            MutationRecord {
                kind: MutationKind::Deletion,
                fiber_index: 2,
                host: HostHandle(8),
            },
            MutationRecord {
                kind: MutationKind::Placement,
                fiber_index: 5,
                host: HostHandle(9),
            },
        ];
        rec.on_mutations(11, &records);
        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(
            events,
            [RecordedEvent::Mutations {
                pass_index: 11,
                records: records.to_vec(),
            }]
        );
    }

    #[test]
    fn truncated_record_stops_iteration() {
        let mut rec = RecorderSink::new();
        rec.on_commit_summary(&sample_summary());
        rec.on_commit_summary(&sample_summary());
        let bytes = rec.into_bytes();
        let events: Vec<_> = decode(&bytes[..bytes.len() - 3]).collect();
        assert_eq!(events.len(), 1, "the cut-off second record is dropped");
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        assert_eq!(decode(&[]).count(), 0);
    }
}
