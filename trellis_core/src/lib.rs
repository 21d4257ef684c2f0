// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A fiber reconciler with priority lanes and a cooperative scheduler.
//!
//! `trellis_core` turns declarative element trees into minimal mutations of a
//! host tree (a DOM, an in-memory tree, native views). It is `no_std`
//! compatible (with `alloc`), single-threaded, and keeps its fiber tree in
//! struct-of-arrays storage addressed by index handles.
//!
//! # Architecture
//!
//! ```text
//!   Root::render / hook dispatch
//!       │
//!       ▼
//!   pending lanes ──► Scheduler task (priority from the most urgent lane)
//!                             │
//!                 ┌───────────┘
//!                 ▼
//!   RenderSession: begin/complete ──► ChildReconciler ──► finished tree
//!                                                            │
//!                 ┌──────────────────────────────────────────┘
//!                 ▼
//!   Commit: mutation ──► HostRenderer ──► layout effects ──► passive task
//! ```
//!
//! **[`element`]**: The declarative tree: [`Node`](element::Node),
//! elements, props, component types, and the `h`/`fragment`/`text` builders.
//!
//! **[`fiber`]**: Double-buffered fiber storage with generational handles,
//! effect flags, and update-lane bookkeeping.
//!
//! **[`lane`]**: Priority lanes as a 31-bit set, lane selection, and the
//! mapping from event priorities to scheduler priorities.
//!
//! **[`scheduler`]**: A cooperative task scheduler: a ready queue keyed by
//! expiration time, a timer queue for delayed tasks, and time-sliced work
//! loops that yield back to the host.
//!
//! **[`heap`]**: The array-backed min-heap behind the scheduler's queues.
//!
//! **[`hooks`]**: The [`RenderCx`](hooks::RenderCx) passed to function
//! components: state, reducers, memos, refs, effects, context and
//! transitions.
//!
//! **[`context`]**: Typed contexts and the provider value stack.
//!
//! **[`host`]**: The [`HostRenderer`](host::HostRenderer) trait that backends
//! implement.
//!
//! **[`root`]**: [`Root`](root::Root), which binds a container, a host and a
//! scheduler, and drives render passes.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) and the event types for
//! scheduler and render-pass instrumentation, with a zero-overhead
//! [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Gates per-mutation
//!   host events.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

mod commit;
pub mod context;
pub mod element;
pub mod error;
pub mod fiber;
pub mod heap;
pub mod hooks;
pub mod host;
pub mod lane;
mod reconcile;
pub mod root;
pub mod scheduler;
pub mod time;
pub mod trace;
mod work_loop;
