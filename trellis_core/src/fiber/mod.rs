// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fiber tree data model.
//!
//! A *fiber* is one position in the rendered tree. Each fiber has:
//!
//! - An identity ([`FiberId`]): a generational handle that becomes stale when
//!   the fiber is freed, so a dispatcher captured by an unmounted component
//!   can never mark lanes on a recycled slot.
//! - Topology: `parent`, first-`child`, and `sibling` links forming an
//!   ordered tree, plus the fiber's `index` among its siblings.
//! - An `alternate`: the same position in the other buffer. The tree on
//!   screen is *current*; the tree being rendered is *work-in-progress*.
//!   After a commit the roles swap. A fiber and its alternate are allocated
//!   and freed together.
//! - Props and state: `pending_props` (input to this render),
//!   `memoized_props` / `memoized_state` (output of the last one).
//! - Effects: `flags` for the fiber's own commit work, `subtree_flags` as
//!   the union of its descendants', and `deletions` for removed children.
//! - Scheduling: `lanes` for the fiber's own pending updates and
//!   `child_lanes` for pending work anywhere below it.
//!
//! Fibers are stored in struct-of-arrays layout in a [`FiberStore`].

mod id;
mod store;
mod traverse;

pub use id::{FiberId, INVALID};
pub use store::{FiberFlags, FiberStore, FiberTag, StateNode};
pub use traverse::Children;

pub(crate) use store::{FiberState, UpdatePayload};
