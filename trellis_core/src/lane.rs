// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Priority lanes.
//!
//! A lane is one bit of a 31-bit mask; a set of lanes is the OR of its bits.
//! Lower bits are more urgent, so the most urgent lane in a set is its lowest
//! set bit (`lanes & -lanes`).
//!
//! ```text
//!  bit  0        1     2..=7             8..=21          22..=25   26..=30
//!      SyncHyd  Sync  Input/Default..   14 transitions   4 retries idle, offscreen, deferred
//! ```
//!
//! [`EventPriority`] is the coarser vocabulary that updates are tagged with;
//! it maps onto a single lane and onto a scheduler
//! [`Priority`](crate::scheduler::Priority).

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use crate::scheduler::Priority;

/// Number of usable lane bits.
pub const TOTAL_LANES: u32 = 31;

/// A set of priority lanes. A single lane is a `Lanes` with one bit set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Lanes(pub u32);

impl Lanes {
    /// The empty set.
    pub const NONE: Self = Self(0);

    /// Hydration counterpart of [`SYNC`](Self::SYNC).
    pub const SYNC_HYDRATION: Self = Self(0b000_0000_0000_0000_0000_0000_0000_0001);
    /// Discrete user input (clicks, key presses).
    pub const SYNC: Self = Self(0b000_0000_0000_0000_0000_0000_0000_0010);
    /// Hydration counterpart of [`INPUT_CONTINUOUS`](Self::INPUT_CONTINUOUS).
    pub const INPUT_CONTINUOUS_HYDRATION: Self = Self(0b000_0000_0000_0000_0000_0000_0000_0100);
    /// Continuous user input (pointer moves, scrolling).
    pub const INPUT_CONTINUOUS: Self = Self(0b000_0000_0000_0000_0000_0000_0000_1000);
    /// Hydration counterpart of [`DEFAULT`](Self::DEFAULT).
    pub const DEFAULT_HYDRATION: Self = Self(0b000_0000_0000_0000_0000_0000_0001_0000);
    /// Updates with no more specific priority.
    pub const DEFAULT: Self = Self(0b000_0000_0000_0000_0000_0000_0010_0000);
    /// Gesture-driven updates.
    pub const GESTURE: Self = Self(0b000_0000_0000_0000_0000_0000_0100_0000);
    /// Hydration counterpart of the transition lanes.
    pub const TRANSITION_HYDRATION: Self = Self(0b000_0000_0000_0000_0000_0000_1000_0000);
    /// All 14 transition lanes.
    pub const TRANSITIONS: Self = Self(0b000_0000_0011_1111_1111_1111_0000_0000);
    /// The first transition lane; the cursor wraps back here.
    pub const TRANSITION_1: Self = Self(1 << 8);
    /// The last transition lane.
    pub const TRANSITION_14: Self = Self(1 << 21);
    /// All 4 retry lanes.
    pub const RETRIES: Self = Self(0b000_0011_1100_0000_0000_0000_0000_0000);
    /// The first retry lane.
    pub const RETRY_1: Self = Self(1 << 22);
    /// Selective hydration.
    pub const SELECTIVE_HYDRATION: Self = Self(1 << 26);
    /// Every lane that is not idle, offscreen, or deferred.
    pub const NON_IDLE: Self = Self(0b000_0111_1111_1111_1111_1111_1111_1111);
    /// Hydration counterpart of [`IDLE`](Self::IDLE).
    pub const IDLE_HYDRATION: Self = Self(1 << 27);
    /// Work that runs only when nothing else is pending.
    pub const IDLE: Self = Self(1 << 28);
    /// Hidden subtrees.
    pub const OFFSCREEN: Self = Self(1 << 29);
    /// Deferred values; always entangled with other work.
    pub const DEFERRED: Self = Self(1 << 30);

    /// The lanes that are batched together and treated as one synchronous
    /// group by [`get_highest_priority_lanes`].
    pub const SYNC_UPDATES: Self = Self(Self::SYNC.0 | Self::INPUT_CONTINUOUS.0 | Self::DEFAULT.0);

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if no lane is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `a | b`
    #[inline]
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// `a & b`
    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// `set & !subset`
    #[inline]
    #[must_use]
    pub const fn remove(self, subset: Self) -> Self {
        Self(self.0 & !subset.0)
    }

    /// Returns `true` if the two sets share at least one lane.
    #[inline]
    #[must_use]
    pub const fn includes_some(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `true` if every lane of `self` is in `set`.
    #[inline]
    #[must_use]
    pub const fn is_subset_of(self, set: Self) -> bool {
        self.0 & set.0 == self.0
    }

    /// The most urgent lane in the set: its lowest set bit.
    #[inline]
    #[must_use]
    pub const fn highest_priority_lane(self) -> Self {
        Self(self.0 & self.0.wrapping_neg())
    }

    /// Returns `true` if the set contains work above idle.
    #[inline]
    #[must_use]
    pub const fn includes_non_idle_work(self) -> bool {
        self.0 & Self::NON_IDLE.0 != 0
    }

    /// Returns `true` if the set is non-empty and contains only transitions.
    #[inline]
    #[must_use]
    pub const fn includes_only_transitions(self) -> bool {
        self.0 != 0 && self.0 & Self::TRANSITIONS.0 == self.0
    }

    /// Returns `true` if nothing in the set is synchronous, continuous
    /// input, or default priority.
    #[inline]
    #[must_use]
    pub const fn includes_only_non_urgent_lanes(self) -> bool {
        const URGENT: u32 = Lanes::SYNC.0 | Lanes::INPUT_CONTINUOUS.0 | Lanes::DEFAULT.0;
        self.0 & URGENT == 0
    }
}

impl BitOr for Lanes {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

impl BitOrAssign for Lanes {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Lanes {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl BitAndAssign for Lanes {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for Lanes {
    type Output = Self;

    #[inline]
    fn not(self) -> Self {
        Self(!self.0 & ((1 << TOTAL_LANES) - 1))
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lanes({:#033b})", self.0)
    }
}

/// Returns whichever single lane is more urgent. `NONE` loses to anything.
#[inline]
#[must_use]
pub const fn higher_priority_lane(a: Lanes, b: Lanes) -> Lanes {
    if a.0 != 0 && (b.0 == 0 || a.0 < b.0) {
        a
    } else {
        b
    }
}

/// Returns the group of lanes that should be rendered together, starting from
/// the most urgent lane in `lanes`.
///
/// Sync, continuous input, and default updates form one group. Transitions
/// and retries are each rendered as a batch.
#[must_use]
pub const fn get_highest_priority_lanes(lanes: Lanes) -> Lanes {
    let pending_sync = lanes.0 & Lanes::SYNC_UPDATES.0;
    if pending_sync != 0 {
        return Lanes(pending_sync);
    }

    let highest = lanes.highest_priority_lane();
    if highest.0 & Lanes::TRANSITIONS.0 != 0 {
        return Lanes(lanes.0 & Lanes::TRANSITIONS.0);
    }
    if highest.0 & Lanes::RETRIES.0 != 0 {
        return Lanes(lanes.0 & Lanes::RETRIES.0);
    }
    match highest.0 {
        // Deferred work is always entangled with some other lane.
        x if x == Lanes::DEFERRED.0 => Lanes::NONE,
        0 => lanes,
        _ => highest,
    }
}

/// Picks the lanes to render next.
///
/// `wip_lanes` are the lanes of a render that is already underway (or
/// already scheduled). Those are kept unless the pending work is strictly more
/// urgent, because switching would throw away progress. A default-priority
/// update is not allowed to interrupt a transition.
#[must_use]
pub fn get_next_lanes(pending_lanes: Lanes, wip_lanes: Lanes) -> Lanes {
    if pending_lanes.is_empty() {
        return Lanes::NONE;
    }

    let non_idle = pending_lanes & Lanes::NON_IDLE;
    let next_lanes = if non_idle.is_empty() {
        get_highest_priority_lanes(pending_lanes)
    } else {
        get_highest_priority_lanes(non_idle)
    };
    if next_lanes.is_empty() {
        return Lanes::NONE;
    }

    if !wip_lanes.is_empty() && wip_lanes != next_lanes {
        let next_lane = next_lanes.highest_priority_lane();
        let wip_lane = wip_lanes.highest_priority_lane();
        if next_lane.0 >= wip_lane.0
            || (next_lane == Lanes::DEFAULT && wip_lane.includes_some(Lanes::TRANSITIONS))
        {
            return wip_lanes;
        }
    }
    next_lanes
}

/// Round-robin allocator over the 14 transition lanes.
///
/// Successive transitions get distinct lanes so they can be rendered
/// independently; after the last lane the cursor wraps to the first.
#[derive(Clone, Copy, Debug)]
pub struct TransitionCursor {
    next: Lanes,
}

impl Default for TransitionCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionCursor {
    /// Creates a cursor pointing at the first transition lane.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: Lanes::TRANSITION_1,
        }
    }

    /// Returns the next transition lane and advances the cursor.
    pub fn claim(&mut self) -> Lanes {
        let lane = self.next;
        self.next = Lanes(self.next.0 << 1);
        if !self.next.includes_some(Lanes::TRANSITIONS) {
            self.next = Lanes::TRANSITION_1;
        }
        lane
    }
}

// ---------------------------------------------------------------------------
// Event priorities
// ---------------------------------------------------------------------------

/// Priority of the event that caused an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum EventPriority {
    /// Discrete input; renders in [`Lanes::SYNC`].
    Discrete,
    /// Continuous input; renders in [`Lanes::INPUT_CONTINUOUS`].
    Continuous,
    /// Anything else; renders in [`Lanes::DEFAULT`].
    #[default]
    Default,
    /// Background work; renders in [`Lanes::IDLE`].
    Idle,
}

impl EventPriority {
    /// The lane this priority renders in.
    #[must_use]
    pub const fn lane(self) -> Lanes {
        match self {
            Self::Discrete => Lanes::SYNC,
            Self::Continuous => Lanes::INPUT_CONTINUOUS,
            Self::Default => Lanes::DEFAULT,
            Self::Idle => Lanes::IDLE,
        }
    }

    /// The scheduler priority a render task for this event runs at.
    #[must_use]
    pub const fn scheduler_priority(self) -> Priority {
        match self {
            Self::Discrete => Priority::Immediate,
            Self::Continuous => Priority::UserBlocking,
            Self::Default => Priority::Normal,
            Self::Idle => Priority::Idle,
        }
    }
}

/// Maps a set of lanes to the event priority of its most urgent lane.
#[must_use]
pub fn lanes_to_event_priority(lanes: Lanes) -> EventPriority {
    let lane = lanes.highest_priority_lane();
    if !is_higher_event_priority(EventPriority::Discrete.lane(), lane) {
        return EventPriority::Discrete;
    }
    if !is_higher_event_priority(EventPriority::Continuous.lane(), lane) {
        return EventPriority::Continuous;
    }
    if lane.includes_non_idle_work() {
        return EventPriority::Default;
    }
    EventPriority::Idle
}

fn is_higher_event_priority(a: Lanes, b: Lanes) -> bool {
    a.0 != 0 && a.0 < b.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_lane_is_lowest_bit() {
        let set = Lanes::DEFAULT | Lanes::TRANSITION_1 | Lanes::IDLE;
        assert_eq!(set.highest_priority_lane(), Lanes::DEFAULT);
        assert_eq!(Lanes::NONE.highest_priority_lane(), Lanes::NONE);
    }

    #[test]
    fn set_operations() {
        let a = Lanes::SYNC | Lanes::DEFAULT;
        let b = Lanes::DEFAULT | Lanes::IDLE;
        assert_eq!(a.merge(b), Lanes::SYNC | Lanes::DEFAULT | Lanes::IDLE);
        assert_eq!(a.intersect(b), Lanes::DEFAULT);
        assert_eq!(a.remove(b), Lanes::SYNC);
        assert!(a.includes_some(b));
        assert!(Lanes::SYNC.is_subset_of(a));
        assert!(!Lanes::IDLE.is_subset_of(a));
    }

    #[test]
    fn higher_priority_lane_prefers_smaller_nonzero() {
        assert_eq!(higher_priority_lane(Lanes::SYNC, Lanes::DEFAULT), Lanes::SYNC);
        assert_eq!(higher_priority_lane(Lanes::IDLE, Lanes::DEFAULT), Lanes::DEFAULT);
        assert_eq!(higher_priority_lane(Lanes::NONE, Lanes::IDLE), Lanes::IDLE);
        assert_eq!(higher_priority_lane(Lanes::IDLE, Lanes::NONE), Lanes::IDLE);
    }

    #[test]
    fn transition_block_layout() {
        assert_eq!(Lanes::TRANSITIONS.0.count_ones(), 14, "14 transition lanes");
        assert_eq!(Lanes::RETRIES.0.count_ones(), 4, "4 retry lanes");
        assert!(Lanes::TRANSITION_1.is_subset_of(Lanes::TRANSITIONS));
        assert!(Lanes::TRANSITION_14.is_subset_of(Lanes::TRANSITIONS));
        assert_eq!(Lanes::NON_IDLE.0, (1 << 27) - 1);
    }

    #[test]
    fn grouped_lanes_batch_together() {
        let pending = Lanes(Lanes::TRANSITION_1.0 | (1 << 9) | Lanes::IDLE.0);
        assert_eq!(
            get_highest_priority_lanes(pending),
            Lanes(Lanes::TRANSITION_1.0 | (1 << 9))
        );
        let urgent = Lanes::SYNC | Lanes::DEFAULT | Lanes::TRANSITION_1;
        assert_eq!(get_highest_priority_lanes(urgent), Lanes::SYNC | Lanes::DEFAULT);
        assert_eq!(get_highest_priority_lanes(Lanes::DEFERRED), Lanes::NONE);
    }

    #[test]
    fn next_lanes_without_render_in_progress() {
        assert_eq!(get_next_lanes(Lanes::NONE, Lanes::NONE), Lanes::NONE);
        let pending = Lanes::TRANSITION_1 | Lanes::IDLE;
        assert_eq!(get_next_lanes(pending, Lanes::NONE), Lanes::TRANSITION_1);
        assert_eq!(get_next_lanes(Lanes::IDLE, Lanes::NONE), Lanes::IDLE);
    }

    #[test]
    fn next_lanes_keeps_in_progress_unless_strictly_more_urgent() {
        // Idle work does not interrupt a transition.
        let pending = Lanes::TRANSITION_1 | Lanes::IDLE;
        assert_eq!(get_next_lanes(Lanes::IDLE, Lanes::TRANSITION_1), Lanes::TRANSITION_1);
        // Sync work does.
        let pending_sync = pending | Lanes::SYNC;
        assert_eq!(get_next_lanes(pending_sync, Lanes::TRANSITION_1), Lanes::SYNC);
        // Default work does not interrupt a transition.
        assert_eq!(
            get_next_lanes(Lanes::DEFAULT | Lanes::TRANSITION_1, Lanes::TRANSITION_1),
            Lanes::TRANSITION_1
        );
    }

    #[test]
    fn transition_cursor_wraps() {
        let mut cursor = TransitionCursor::new();
        let first = cursor.claim();
        assert_eq!(first, Lanes::TRANSITION_1);
        let mut last = first;
        for _ in 1..14 {
            last = cursor.claim();
        }
        assert_eq!(last, Lanes::TRANSITION_14);
        assert_eq!(cursor.claim(), Lanes::TRANSITION_1, "cursor wraps to lane 1");
    }

    #[test]
    fn event_priority_round_trip() {
        for p in [
            EventPriority::Discrete,
            EventPriority::Continuous,
            EventPriority::Default,
            EventPriority::Idle,
        ] {
            assert_eq!(lanes_to_event_priority(p.lane()), p);
        }
        assert_eq!(
            lanes_to_event_priority(Lanes::TRANSITION_1),
            EventPriority::Default
        );
        assert_eq!(
            lanes_to_event_priority(Lanes::SYNC | Lanes::IDLE),
            EventPriority::Discrete
        );
    }
}
