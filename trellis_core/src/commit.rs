// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The commit phase: applies a finished tree to the host.
//!
//! A commit runs in two synchronous passes over the finished tree, followed
//! by a deferred one:
//!
//! 1. **Mutation**: deletions, placements and host updates, children before
//!    their parent. Layout-effect cleanups of changed components run here.
//! 2. **Layout**: layout effects and class lifecycle hooks, children before
//!    their parent, after the host tree is complete.
//! 3. **Passive** ([`flush_passive_effects`]): `use_effect` cleanups and
//!    bodies, run later from a scheduler task or before the next render.
//!
//! Passes only descend into subtrees whose `subtree_flags` say there is
//! something to do.

use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::error::{EffectError, ReconcileError};
use crate::fiber::{FiberFlags, FiberStore, FiberTag, INVALID, StateNode};
use crate::hooks::{EffectInstance, HookFlags};
use crate::host::{HostHandle, HostRenderer};
use crate::root::EffectFailurePolicy;
#[cfg(feature = "trace-rich")]
use crate::trace::{MutationKind, MutationRecord};
use crate::trace::PhaseKind;
use crate::work_loop::host_prop_name;

/// Host mutation counts for one commit.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CommitStats {
    pub(crate) placements: u32,
    pub(crate) updates: u32,
    pub(crate) deletions: u32,
}

/// Effect failures collected during a commit, with the phase they came from.
pub(crate) type EffectErrors = Vec<(PhaseKind, EffectError)>;

/// State for the mutation and layout passes of one commit.
pub(crate) struct Commit<'a> {
    store: &'a mut FiberStore,
    host: &'a mut dyn HostRenderer,
    policy: EffectFailurePolicy,
    pub(crate) errors: EffectErrors,
    /// Passive cleanups of deleted components, run by the next passive flush.
    pub(crate) passive_destroys: Vec<Rc<EffectInstance>>,
    pub(crate) stats: CommitStats,
    #[cfg(feature = "trace-rich")]
    pub(crate) mutations: Vec<MutationRecord>,
}

impl core::fmt::Debug for Commit<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Commit")
            .field("policy", &self.policy)
            .field("errors", &self.errors.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<'a> Commit<'a> {
    pub(crate) fn new(
        store: &'a mut FiberStore,
        host: &'a mut dyn HostRenderer,
        policy: EffectFailurePolicy,
    ) -> Self {
        Self {
            store,
            host,
            policy,
            errors: Vec::new(),
            passive_destroys: Vec::new(),
            stats: CommitStats::default(),
            #[cfg(feature = "trace-rich")]
            mutations: Vec::new(),
        }
    }

    fn report(
        &mut self,
        phase: PhaseKind,
        fiber: u32,
        err: EffectError,
    ) -> Result<(), ReconcileError> {
        report_effect_error(self.store, self.policy, &mut self.errors, phase, fiber, err)
    }

    #[cfg(feature = "trace-rich")]
    fn record(&mut self, kind: MutationKind, fiber: u32, host: HostHandle) {
        self.mutations.push(MutationRecord {
            kind,
            fiber_index: fiber,
            host,
        });
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Applies deletions, placements and host updates below `finished`.
    pub(crate) fn commit_mutation_effects(&mut self, finished: u32) -> Result<(), ReconcileError> {
        self.mutation_effects_on_fiber(finished)
    }

    fn mutation_effects_on_fiber(&mut self, fiber: u32) -> Result<(), ReconcileError> {
        let f = fiber as usize;
        if self.store.flags[f].contains(FiberFlags::CHILD_DELETION) {
            let deletions = core::mem::take(&mut self.store.deletions[f]);
            for deleted in deletions {
                self.commit_deletion(fiber, deleted)?;
            }
            self.store.flags[f].remove(FiberFlags::CHILD_DELETION);
        }
        if self.store.subtree_flags[f].intersects(FiberFlags::MUTATION_MASK) {
            let mut child = self.store.child[f];
            while child != INVALID {
                self.mutation_effects_on_fiber(child)?;
                child = self.store.sibling[child as usize];
            }
        }

        if self.store.flags[f].contains(FiberFlags::PLACEMENT) {
            self.commit_placement(fiber)?;
            self.store.flags[f].remove(FiberFlags::PLACEMENT);
        }

        let flags = self.store.flags[f];
        match self.store.tag[f] {
            FiberTag::HostComponent => {
                self.store.flags[f].remove(FiberFlags::UPDATE | FiberFlags::CONTENT_RESET);
                let Some(node) = self.store.state_node[f].host() else {
                    return Ok(());
                };
                if flags.contains(FiberFlags::CONTENT_RESET) {
                    self.host.set_text_content(node, "");
                }
                if flags.contains(FiberFlags::UPDATE) {
                    self.commit_host_update(fiber, node);
                }
            }
            FiberTag::HostText => {
                self.store.flags[f].remove(FiberFlags::UPDATE);
                if flags.contains(FiberFlags::UPDATE)
                    && let Some(node) = self.store.state_node[f].host()
                {
                    let text = self.store.memoized_props[f]
                        .children()
                        .as_text()
                        .unwrap_or_default();
                    self.host.set_text_content(node, text);
                    self.stats.updates += 1;
                    #[cfg(feature = "trace-rich")]
                    self.record(MutationKind::Update, fiber, node);
                }
            }
            FiberTag::FunctionComponent => {
                if flags.contains(FiberFlags::UPDATE)
                    && let Some(ring) = &self.store.update_queue[f]
                {
                    ring.unmount(HookFlags::LAYOUT | HookFlags::HAS_EFFECT);
                }
            }
            FiberTag::HostRoot
            | FiberTag::ClassComponent
            | FiberTag::Fragment
            | FiberTag::ContextProvider
            | FiberTag::ContextConsumer
            | FiberTag::MemoComponent => {}
        }
        Ok(())
    }

    fn commit_host_update(&mut self, fiber: u32, node: HostHandle) {
        let Some(payload) = self.store.update_payload[fiber as usize].take() else {
            return;
        };
        for (key, value) in &payload {
            if &**key == "children" {
                let text = value.to_text().unwrap_or_default();
                self.host.set_text_content(node, &text);
            } else {
                self.host.set_property(node, host_prop_name(key), value);
            }
        }
        self.stats.updates += 1;
        #[cfg(feature = "trace-rich")]
        self.record(MutationKind::Update, fiber, node);
    }

    /// Nearest ancestor that owns a host node children attach to.
    fn host_parent_fiber(&self, fiber: u32) -> Result<u32, ReconcileError> {
        let mut node = self.store.parent[fiber as usize];
        while node != INVALID {
            if self.store.tag[node as usize].is_host_parent() {
                return Ok(node);
            }
            node = self.store.parent[node as usize];
        }
        Err(ReconcileError::MissingHostParent(self.store.id_of(fiber)))
    }

    fn host_parent_node(&self, fiber: u32) -> Result<(u32, HostHandle), ReconcileError> {
        let parent = self.host_parent_fiber(fiber)?;
        let node = self.store.state_node[parent as usize]
            .host()
            .ok_or_else(|| ReconcileError::MissingHostParent(self.store.id_of(fiber)))?;
        Ok((parent, node))
    }

    /// The host node that `fiber`'s nodes must be inserted before: the first
    /// host node after it that is not itself being placed.
    fn host_sibling(&self, fiber: u32) -> Option<HostHandle> {
        let s = &*self.store;
        let mut node = fiber;
        'siblings: loop {
            while s.sibling[node as usize] == INVALID {
                let parent = s.parent[node as usize];
                if parent == INVALID || s.tag[parent as usize].is_host_parent() {
                    return None;
                }
                node = parent;
            }
            node = s.sibling[node as usize];
            while !s.tag[node as usize].is_host() {
                // A placed subtree is not stable; a childless one has no host.
                if s.flags[node as usize].contains(FiberFlags::PLACEMENT)
                    || s.child[node as usize] == INVALID
                {
                    continue 'siblings;
                }
                node = s.child[node as usize];
            }
            if !s.flags[node as usize].contains(FiberFlags::PLACEMENT) {
                return s.state_node[node as usize].host();
            }
        }
    }

    fn commit_placement(&mut self, fiber: u32) -> Result<(), ReconcileError> {
        let (parent_fiber, parent_node) = self.host_parent_node(fiber)?;
        let p = parent_fiber as usize;
        if self.store.tag[p] == FiberTag::HostComponent
            && self.store.flags[p].contains(FiberFlags::CONTENT_RESET)
        {
            self.host.set_text_content(parent_node, "");
            self.store.flags[p].remove(FiberFlags::CONTENT_RESET);
        }
        let before = self.host_sibling(fiber);
        self.insert_or_append(fiber, before, parent_node);
        Ok(())
    }

    fn insert_or_append(&mut self, fiber: u32, before: Option<HostHandle>, parent: HostHandle) {
        let f = fiber as usize;
        if self.store.tag[f].is_host() {
            let Some(node) = self.store.state_node[f].host() else {
                return;
            };
            match before {
                Some(before) => self.host.insert_before(parent, node, before),
                None => self.host.append_child(parent, node),
            }
            self.stats.placements += 1;
            #[cfg(feature = "trace-rich")]
            self.record(MutationKind::Placement, fiber, node);
            return;
        }
        let mut child = self.store.child[f];
        while child != INVALID {
            self.insert_or_append(child, before, parent);
            child = self.store.sibling[child as usize];
        }
    }

    fn commit_deletion(&mut self, parent: u32, deleted: u32) -> Result<(), ReconcileError> {
        // Start from the fiber that recorded the deletion; the deleted
        // fiber's own parent link belongs to the old tree.
        let host_fiber = if self.store.tag[parent as usize].is_host_parent() {
            parent
        } else {
            self.host_parent_fiber(parent)?
        };
        let host_parent = self.store.state_node[host_fiber as usize]
            .host()
            .ok_or_else(|| ReconcileError::MissingHostParent(self.store.id_of(deleted)))?;
        self.deletion_effects(deleted, Some(host_parent));
        self.store.free_subtree(deleted);
        self.stats.deletions += 1;
        Ok(())
    }

    /// Detaches the host nodes of a deleted subtree and runs its unmount
    /// work. Only the top-most host nodes are removed from `host_parent`;
    /// nested ones go with them.
    fn deletion_effects(&mut self, fiber: u32, host_parent: Option<HostHandle>) {
        let f = fiber as usize;
        match self.store.tag[f] {
            FiberTag::HostComponent | FiberTag::HostText => {
                self.deletion_effects_on_children(fiber, None);
                if let Some(node) = self.store.state_node[f].host() {
                    if let Some(parent) = host_parent {
                        self.host.remove_child(parent, node);
                        #[cfg(feature = "trace-rich")]
                        self.record(MutationKind::Deletion, fiber, node);
                    }
                    self.host.release_instance(node);
                }
                return;
            }
            FiberTag::FunctionComponent => {
                if let Some(ring) = self.store.update_queue[f].clone() {
                    for inst in ring.instances(HookFlags::LAYOUT) {
                        inst.destroy();
                    }
                    self.passive_destroys
                        .extend(ring.instances(HookFlags::PASSIVE).cloned());
                }
            }
            FiberTag::ClassComponent => {
                if let StateNode::Instance(instance) = self.store.state_node[f].clone() {
                    instance.borrow_mut().will_unmount();
                }
            }
            FiberTag::HostRoot
            | FiberTag::Fragment
            | FiberTag::ContextProvider
            | FiberTag::ContextConsumer
            | FiberTag::MemoComponent => {}
        }
        self.deletion_effects_on_children(fiber, host_parent);
    }

    fn deletion_effects_on_children(&mut self, fiber: u32, host_parent: Option<HostHandle>) {
        let mut child = self.store.child[fiber as usize];
        while child != INVALID {
            self.deletion_effects(child, host_parent);
            child = self.store.sibling[child as usize];
        }
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    /// Runs layout effects and class lifecycle hooks below `finished`.
    pub(crate) fn commit_layout_effects(&mut self, finished: u32) -> Result<(), ReconcileError> {
        self.layout_effects_on_fiber(finished)
    }

    fn layout_effects_on_fiber(&mut self, fiber: u32) -> Result<(), ReconcileError> {
        let f = fiber as usize;
        if self.store.subtree_flags[f].intersects(FiberFlags::LAYOUT_MASK) {
            let mut child = self.store.child[f];
            while child != INVALID {
                self.layout_effects_on_fiber(child)?;
                child = self.store.sibling[child as usize];
            }
        }
        if !self.store.flags[f].intersects(FiberFlags::LAYOUT_MASK) {
            return Ok(());
        }
        // Component updates are finished once their layout work has run.
        self.store.flags[f].remove(FiberFlags::LAYOUT_MASK);
        match self.store.tag[f] {
            FiberTag::FunctionComponent => {
                if let Some(ring) = self.store.update_queue[f].clone() {
                    ring.mount(HookFlags::LAYOUT | HookFlags::HAS_EFFECT, |err| {
                        self.report(PhaseKind::Layout, fiber, err)
                    })?;
                }
            }
            FiberTag::ClassComponent => {
                let StateNode::Instance(instance) = self.store.state_node[f].clone() else {
                    return Ok(());
                };
                let alternate = self.store.alternate[f];
                let result = if alternate == INVALID {
                    instance.borrow_mut().did_mount()
                } else {
                    let prev_props = self.store.memoized_props[alternate as usize].clone();
                    instance.borrow_mut().did_update(&prev_props)
                };
                if let Err(err) = result {
                    self.report(PhaseKind::Layout, fiber, err)?;
                }
            }
            FiberTag::HostRoot
            | FiberTag::HostComponent
            | FiberTag::HostText
            | FiberTag::Fragment
            | FiberTag::ContextProvider
            | FiberTag::ContextConsumer
            | FiberTag::MemoComponent => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Passive
// ---------------------------------------------------------------------------

/// Passive work left behind by a commit.
#[derive(Debug, Default)]
pub(crate) struct PendingPassive {
    /// The pass that committed the effects.
    pub(crate) pass_index: u64,
    /// The committed root fiber.
    pub(crate) root: u32,
    /// Cleanups of components deleted by the commit.
    pub(crate) destroys: Vec<Rc<EffectInstance>>,
}

/// Runs passive cleanups and bodies for a committed tree.
///
/// Queued cleanups of deleted components run first. Then every passive
/// cleanup with work runs, then every passive body.
pub(crate) fn flush_passive_effects(
    store: &mut FiberStore,
    pending: PendingPassive,
    policy: EffectFailurePolicy,
    errors: &mut EffectErrors,
) -> Result<(), ReconcileError> {
    for destroy in &pending.destroys {
        destroy.destroy();
    }

    let mut fibers = Vec::new();
    collect_passive(store, pending.root, &mut fibers);
    let mask = HookFlags::PASSIVE | HookFlags::HAS_EFFECT;
    for &fiber in &fibers {
        if let Some(ring) = &store.update_queue[fiber as usize] {
            ring.unmount(mask);
        }
    }
    for &fiber in &fibers {
        store.flags[fiber as usize].remove(FiberFlags::PASSIVE);
        let Some(ring) = store.update_queue[fiber as usize].clone() else {
            continue;
        };
        ring.mount(mask, |err| {
            report_effect_error(store, policy, errors, PhaseKind::Passive, fiber, err)
        })?;
    }
    Ok(())
}

/// Fibers with passive work below `fiber`, children before parents.
fn collect_passive(store: &FiberStore, fiber: u32, out: &mut Vec<u32>) {
    if !store.alive[fiber as usize] {
        return;
    }
    let f = fiber as usize;
    if store.subtree_flags[f].contains(FiberFlags::PASSIVE) {
        for child in store.children_at(fiber) {
            collect_passive(store, child, out);
        }
    }
    if store.flags[f].contains(FiberFlags::PASSIVE) {
        out.push(fiber);
    }
}

fn report_effect_error(
    store: &FiberStore,
    policy: EffectFailurePolicy,
    errors: &mut EffectErrors,
    phase: PhaseKind,
    fiber: u32,
    err: EffectError,
) -> Result<(), ReconcileError> {
    let err = err.in_component(store.name_at(fiber));
    log::warn!("{phase:?} {err}");
    errors.push((phase, err.clone()));
    match policy {
        EffectFailurePolicy::Continue => Ok(()),
        EffectFailurePolicy::Abort => Err(err.into()),
    }
}
