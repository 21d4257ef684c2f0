// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Struct-of-arrays fiber storage with allocation, double buffering, and
//! update-lane marking.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use crate::context::ContextId;
use crate::element::{Component, Element, ElementType, Key, Node, PropValue, Props};
use crate::hooks::{EffectRing, Hook};
use crate::host::HostHandle;
use crate::lane::Lanes;

use super::id::{FiberId, INVALID};
use super::traverse::{ChildIndices, Children};

/// What kind of tree position a fiber represents.
///
/// The set is closed: every match over it is exhaustive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FiberTag {
    /// The root of a tree, bound to a host container.
    HostRoot,
    /// A host element (`div`, `li`, …).
    HostComponent,
    /// A host text node.
    HostText,
    /// A function component.
    FunctionComponent,
    /// A class component.
    ClassComponent,
    /// A fragment (keyed fragment element or nested child list).
    Fragment,
    /// A context provider.
    ContextProvider,
    /// A context consumer.
    ContextConsumer,
    /// A memo wrapper; its single child renders the wrapped type.
    MemoComponent,
}

impl FiberTag {
    /// Tag for fibers of the given element type.
    #[must_use]
    pub fn for_type(ty: &ElementType) -> Self {
        match ty {
            ElementType::Host(_) => Self::HostComponent,
            ElementType::Function(_) => Self::FunctionComponent,
            ElementType::Class(_) => Self::ClassComponent,
            ElementType::Fragment => Self::Fragment,
            ElementType::Provider(_) => Self::ContextProvider,
            ElementType::Consumer(_) => Self::ContextConsumer,
            ElementType::Memo(_) => Self::MemoComponent,
        }
    }

    /// Returns `true` for fibers that own a host node.
    #[inline]
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::HostComponent | Self::HostText)
    }

    /// Returns `true` for fibers that host nodes can be inserted into.
    #[inline]
    #[must_use]
    pub const fn is_host_parent(self) -> bool {
        matches!(self, Self::HostComponent | Self::HostRoot)
    }
}

bitflags::bitflags! {
    /// Side effects recorded on a fiber during render and applied at commit.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FiberFlags: u16 {
        /// The fiber's host nodes must be inserted or moved.
        const PLACEMENT = 1 << 1;
        /// Host properties changed, or layout effects must run.
        const UPDATE = 1 << 2;
        /// The fiber's host node lost its text content.
        const CONTENT_RESET = 1 << 4;
        /// `deletions` holds children to remove.
        const CHILD_DELETION = 1 << 5;
        /// Passive effects must run.
        const PASSIVE = 1 << 11;

        /// Flags handled by the mutation pass.
        const MUTATION_MASK = Self::PLACEMENT.bits()
            | Self::UPDATE.bits()
            | Self::CONTENT_RESET.bits()
            | Self::CHILD_DELETION.bits();
        /// Flags handled by the layout pass.
        const LAYOUT_MASK = Self::UPDATE.bits();
        /// Flags handled by the passive pass.
        const PASSIVE_MASK = Self::PASSIVE.bits() | Self::CHILD_DELETION.bits();
    }
}

/// The object a fiber stands for outside the tree.
#[derive(Clone, Default)]
pub enum StateNode {
    /// Nothing (components without instances, fragments, …).
    #[default]
    None,
    /// A host node.
    Host(HostHandle),
    /// A class component instance.
    Instance(Rc<RefCell<alloc::boxed::Box<dyn Component>>>),
    /// The root's host container.
    Root(HostHandle),
}

impl StateNode {
    /// The host node, for host fibers and the root.
    #[must_use]
    pub fn host(&self) -> Option<HostHandle> {
        match self {
            Self::Host(h) | Self::Root(h) => Some(*h),
            Self::None | Self::Instance(_) => None,
        }
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Host(h) => write!(f, "Host({h:?})"),
            Self::Instance(_) => f.write_str("Instance"),
            Self::Root(h) => write!(f, "Root({h:?})"),
        }
    }
}

/// Per-fiber memoized state.
#[derive(Clone, Default)]
pub(crate) enum FiberState {
    #[default]
    None,
    /// The element rendered into the root.
    Root { element: Node },
    /// The hook list of a function component.
    Hooks(Rc<[Hook]>),
}

/// Property changes computed in the exit step and applied at commit.
/// A `Null` value removes the property.
pub(crate) type UpdatePayload = Vec<(Rc<str>, PropValue)>;

/// Struct-of-arrays storage for all fibers of one root.
///
/// Fibers are addressed internally by slot index and externally by
/// [`FiberId`]. Both buffers of the double-buffered tree live here; a fiber
/// and its `alternate` are always allocated and freed together.
pub struct FiberStore {
    // -- Identity --
    pub(crate) tag: Vec<FiberTag>,
    pub(crate) key: Vec<Option<Key>>,
    pub(crate) ty: Vec<Option<ElementType>>,
    pub(crate) state_node: Vec<StateNode>,

    // -- Topology --
    pub(crate) parent: Vec<u32>,
    pub(crate) child: Vec<u32>,
    pub(crate) sibling: Vec<u32>,
    pub(crate) index: Vec<u32>,
    pub(crate) alternate: Vec<u32>,

    // -- Props and state --
    pub(crate) pending_props: Vec<Props>,
    pub(crate) memoized_props: Vec<Props>,
    pub(crate) memoized_state: Vec<FiberState>,
    pub(crate) update_queue: Vec<Option<Rc<EffectRing>>>,
    pub(crate) dependencies: Vec<Vec<ContextId>>,
    pub(crate) update_payload: Vec<Option<UpdatePayload>>,

    // -- Effects and scheduling --
    pub(crate) flags: Vec<FiberFlags>,
    pub(crate) subtree_flags: Vec<FiberFlags>,
    pub(crate) deletions: Vec<Vec<u32>>,
    pub(crate) lanes: Vec<Lanes>,
    pub(crate) child_lanes: Vec<Lanes>,

    // -- Allocation --
    pub(crate) generation: Vec<u32>,
    pub(crate) alive: Vec<bool>,
    pub(crate) free_list: Vec<u32>,
}

impl fmt::Debug for FiberStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberStore")
            .field("slots", &self.tag.len())
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}

impl Default for FiberStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FiberStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tag: Vec::new(),
            key: Vec::new(),
            ty: Vec::new(),
            state_node: Vec::new(),
            parent: Vec::new(),
            child: Vec::new(),
            sibling: Vec::new(),
            index: Vec::new(),
            alternate: Vec::new(),
            pending_props: Vec::new(),
            memoized_props: Vec::new(),
            memoized_state: Vec::new(),
            update_queue: Vec::new(),
            dependencies: Vec::new(),
            update_payload: Vec::new(),
            flags: Vec::new(),
            subtree_flags: Vec::new(),
            deletions: Vec::new(),
            lanes: Vec::new(),
            child_lanes: Vec::new(),
            generation: Vec::new(),
            alive: Vec::new(),
            free_list: Vec::new(),
        }
    }

    // -- Allocation --

    fn alloc(
        &mut self,
        tag: FiberTag,
        ty: Option<ElementType>,
        key: Option<Key>,
        pending_props: Props,
        lanes: Lanes,
    ) -> u32 {
        if let Some(idx) = self.free_list.pop() {
            let i = idx as usize;
            self.tag[i] = tag;
            self.key[i] = key;
            self.ty[i] = ty;
            self.state_node[i] = StateNode::None;
            self.parent[i] = INVALID;
            self.child[i] = INVALID;
            self.sibling[i] = INVALID;
            self.index[i] = 0;
            self.alternate[i] = INVALID;
            self.pending_props[i] = pending_props;
            self.memoized_props[i] = Props::default();
            self.memoized_state[i] = FiberState::None;
            self.update_queue[i] = None;
            self.dependencies[i].clear();
            self.update_payload[i] = None;
            self.flags[i] = FiberFlags::empty();
            self.subtree_flags[i] = FiberFlags::empty();
            self.deletions[i].clear();
            self.lanes[i] = lanes;
            self.child_lanes[i] = Lanes::NONE;
            self.alive[i] = true;
            idx
        } else {
            let idx = u32::try_from(self.tag.len()).unwrap_or(INVALID);
            assert!(idx != INVALID, "fiber store is full");
            self.tag.push(tag);
            self.key.push(key);
            self.ty.push(ty);
            self.state_node.push(StateNode::None);
            self.parent.push(INVALID);
            self.child.push(INVALID);
            self.sibling.push(INVALID);
            self.index.push(0);
            self.alternate.push(INVALID);
            self.pending_props.push(pending_props);
            self.memoized_props.push(Props::default());
            self.memoized_state.push(FiberState::None);
            self.update_queue.push(None);
            self.dependencies.push(Vec::new());
            self.update_payload.push(None);
            self.flags.push(FiberFlags::empty());
            self.subtree_flags.push(FiberFlags::empty());
            self.deletions.push(Vec::new());
            self.lanes.push(lanes);
            self.child_lanes.push(Lanes::NONE);
            self.generation.push(0);
            self.alive.push(true);
            idx
        }
    }

    /// Creates the root fiber for a host container.
    pub(crate) fn create_host_root(&mut self, container: HostHandle) -> u32 {
        let idx = self.alloc(FiberTag::HostRoot, None, None, Props::default(), Lanes::NONE);
        self.state_node[idx as usize] = StateNode::Root(container);
        self.memoized_state[idx as usize] = FiberState::Root {
            element: Node::Empty,
        };
        idx
    }

    /// Creates a fiber for an element.
    pub(crate) fn create_fiber_from_element(&mut self, element: &Element, lanes: Lanes) -> u32 {
        self.alloc(
            FiberTag::for_type(&element.ty),
            Some(element.ty.clone()),
            element.key.clone(),
            element.props.clone(),
            lanes,
        )
    }

    /// Creates an unkeyed fiber of `ty` (the inner fiber of a memo wrapper).
    pub(crate) fn create_fiber_from_type(
        &mut self,
        ty: &ElementType,
        props: Props,
        lanes: Lanes,
    ) -> u32 {
        self.alloc(FiberTag::for_type(ty), Some(ty.clone()), None, props, lanes)
    }

    /// Creates a host text fiber.
    pub(crate) fn create_fiber_from_text(&mut self, text: Rc<str>, lanes: Lanes) -> u32 {
        self.alloc(FiberTag::HostText, None, None, Props::from_text(text), lanes)
    }

    /// Creates a fragment fiber for a nested child list.
    pub(crate) fn create_fiber_from_fragment(&mut self, children: Node, lanes: Lanes) -> u32 {
        self.alloc(
            FiberTag::Fragment,
            Some(ElementType::Fragment),
            None,
            Props::from_children(children),
            lanes,
        )
    }

    /// Returns the work-in-progress counterpart of `current`, allocating it
    /// on first use.
    ///
    /// A new alternate starts with `current`'s flags; a reused one has its
    /// effect fields reset. In both cases the children, memoized props and
    /// state, effect ring, position, lanes and context dependencies are
    /// copied from `current`.
    pub(crate) fn create_work_in_progress(&mut self, current: u32, pending_props: Props) -> u32 {
        let c = current as usize;
        let mut wip = self.alternate[c];
        if wip == INVALID {
            wip = self.alloc(
                self.tag[c],
                self.ty[c].clone(),
                self.key[c].clone(),
                pending_props,
                Lanes::NONE,
            );
            self.state_node[wip as usize] = self.state_node[c].clone();
            self.flags[wip as usize] = self.flags[c];
            self.alternate[wip as usize] = current;
            self.alternate[c] = wip;
        } else {
            let w = wip as usize;
            self.pending_props[w] = pending_props;
            self.ty[w] = self.ty[c].clone();
            self.flags[w] = FiberFlags::empty();
            self.subtree_flags[w] = FiberFlags::empty();
            self.deletions[w].clear();
            self.update_payload[w] = None;
        }

        let w = wip as usize;
        self.child[w] = self.child[c];
        self.memoized_props[w] = self.memoized_props[c].clone();
        self.memoized_state[w] = self.memoized_state[c].clone();
        self.update_queue[w] = self.update_queue[c].clone();
        self.sibling[w] = self.sibling[c];
        self.index[w] = self.index[c];
        self.lanes[w] = self.lanes[c];
        self.child_lanes[w] = self.child_lanes[c];
        if self.dependencies[w] != self.dependencies[c] {
            self.dependencies[w] = self.dependencies[c].clone();
        }
        wip
    }

    /// Frees a fiber and its alternate.
    ///
    /// Freeing an already freed slot is a no-op.
    pub(crate) fn free_pair(&mut self, idx: u32) {
        if !self.alive[idx as usize] {
            return;
        }
        let alt = self.alternate[idx as usize];
        self.free_one(idx);
        if alt != INVALID && self.alive[alt as usize] && self.alternate[alt as usize] == idx {
            self.free_one(alt);
        }
    }

    fn free_one(&mut self, idx: u32) {
        let i = idx as usize;
        self.alive[i] = false;
        self.generation[i] = self.generation[i].wrapping_add(1);
        // Drop shared state now rather than when the slot is reused.
        self.ty[i] = None;
        self.key[i] = None;
        self.state_node[i] = StateNode::None;
        self.pending_props[i] = Props::default();
        self.memoized_props[i] = Props::default();
        self.memoized_state[i] = FiberState::None;
        self.update_queue[i] = None;
        self.update_payload[i] = None;
        self.deletions[i].clear();
        self.alternate[i] = INVALID;
        self.free_list.push(idx);
    }

    /// Frees `root` and every fiber below it, along with their alternates.
    ///
    /// Only the links of `root`'s own buffer are followed; the alternate
    /// buffer may hold stale child links.
    pub(crate) fn free_subtree(&mut self, root: u32) {
        if !self.alive[root as usize] {
            return;
        }
        let mut stack = Vec::new();
        stack.push(root);
        while let Some(idx) = stack.pop() {
            if !self.alive[idx as usize] {
                continue;
            }
            let mut c = self.child[idx as usize];
            while c != INVALID {
                stack.push(c);
                c = self.sibling[c as usize];
            }
            self.free_pair(idx);
        }
    }

    // -- Handles --

    /// Returns the handle for a live slot.
    pub(crate) fn id_of(&self, idx: u32) -> FiberId {
        FiberId {
            idx,
            generation: self.generation[idx as usize],
        }
    }

    /// Resolves a handle to a slot index, or `None` if it is stale.
    #[must_use]
    pub fn resolve(&self, id: FiberId) -> Option<u32> {
        let i = id.idx as usize;
        (i < self.tag.len() && self.alive[i] && self.generation[i] == id.generation)
            .then_some(id.idx)
    }

    /// Returns whether the handle refers to a live fiber.
    #[must_use]
    pub fn is_alive(&self, id: FiberId) -> bool {
        self.resolve(id).is_some()
    }

    /// Number of live fibers, counting both buffers.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.alive.iter().filter(|a| **a).count()
    }

    // -- Queries --

    /// The fiber's tag.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn tag(&self, id: FiberId) -> FiberTag {
        self.tag[self.validate(id) as usize]
    }

    /// The fiber's key.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn key(&self, id: FiberId) -> Option<&str> {
        self.key[self.validate(id) as usize].as_deref()
    }

    /// The fiber's host node, for host fibers and the root.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn host_node(&self, id: FiberId) -> Option<HostHandle> {
        self.state_node[self.validate(id) as usize].host()
    }

    /// The fiber's alternate, if it has one.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn alternate(&self, id: FiberId) -> Option<FiberId> {
        let alt = self.alternate[self.validate(id) as usize];
        (alt != INVALID).then(|| self.id_of(alt))
    }

    /// The fiber's pending lanes.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    #[must_use]
    pub fn lanes(&self, id: FiberId) -> Lanes {
        self.lanes[self.validate(id) as usize]
    }

    /// Iterates the direct children of a fiber.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    pub fn children(&self, id: FiberId) -> Children<'_> {
        let idx = self.validate(id);
        Children::new(self, self.child[idx as usize])
    }

    pub(crate) fn children_at(&self, idx: u32) -> ChildIndices<'_> {
        Children::new(self, self.child[idx as usize]).indices()
    }

    fn validate(&self, id: FiberId) -> u32 {
        match self.resolve(id) {
            Some(idx) => idx,
            None => panic!("stale fiber handle {id:?}"),
        }
    }

    // -- Update marking --

    /// Records an update of `lane` on a fiber: the fiber (both buffers) gains
    /// the lane, and every ancestor (both buffers) gains it in
    /// `child_lanes`.
    ///
    /// Returns `false` if the handle is stale, in which case nothing is
    /// marked.
    pub(crate) fn mark_update_lane(&mut self, id: FiberId, lane: Lanes) -> bool {
        let Some(idx) = self.resolve(id) else {
            return false;
        };
        self.add_lanes(idx, lane);
        let mut node = idx;
        loop {
            let p = self.parent[node as usize];
            if p == INVALID {
                return true;
            }
            self.add_child_lanes(p, lane);
            node = p;
        }
    }

    /// Adds `lanes` to a fiber and its alternate.
    pub(crate) fn add_lanes(&mut self, idx: u32, lanes: Lanes) {
        self.lanes[idx as usize] |= lanes;
        let alt = self.alternate[idx as usize];
        if alt != INVALID {
            self.lanes[alt as usize] |= lanes;
        }
    }

    /// Adds `lanes` to the `child_lanes` of a fiber and its alternate.
    pub(crate) fn add_child_lanes(&mut self, idx: u32, lanes: Lanes) {
        self.child_lanes[idx as usize] |= lanes;
        let alt = self.alternate[idx as usize];
        if alt != INVALID {
            self.child_lanes[alt as usize] |= lanes;
        }
    }

    /// Name of the component a fiber renders, for diagnostics.
    pub(crate) fn name_at(&self, idx: u32) -> &str {
        match (&self.ty[idx as usize], self.tag[idx as usize]) {
            (Some(ty), _) => ty.name(),
            (None, FiberTag::HostRoot) => "Root",
            (None, _) => "#text",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::h;

    fn host_fiber(store: &mut FiberStore, tag: &str) -> u32 {
        let el = h(tag).build_element();
        store.create_fiber_from_element(&el, Lanes::DEFAULT)
    }

    #[test]
    fn work_in_progress_is_allocated_once() {
        let mut store = FiberStore::new();
        let current = host_fiber(&mut store, "div");
        store.flags[current as usize] = FiberFlags::PLACEMENT;

        let props = store.pending_props[current as usize].clone();
        let wip = store.create_work_in_progress(current, props.clone());
        assert_ne!(wip, current);
        assert_eq!(store.alternate[wip as usize], current);
        assert_eq!(store.alternate[current as usize], wip);
        assert_eq!(
            store.flags[wip as usize],
            FiberFlags::PLACEMENT,
            "a new alternate starts from current's flags"
        );

        store.flags[wip as usize] = FiberFlags::UPDATE | FiberFlags::CHILD_DELETION;
        store.deletions[wip as usize].push(42);
        let live = store.live_count();

        let again = store.create_work_in_progress(current, props);
        assert_eq!(again, wip, "the alternate is reused");
        assert_eq!(store.live_count(), live, "no new allocation");
        assert!(store.flags[wip as usize].is_empty(), "a reused alternate is reset");
        assert!(store.deletions[wip as usize].is_empty());
    }

    #[test]
    fn work_in_progress_copies_topology_and_lanes() {
        let mut store = FiberStore::new();
        let parent = host_fiber(&mut store, "ul");
        let a = host_fiber(&mut store, "li");
        let b = host_fiber(&mut store, "li");
        store.child[parent as usize] = a;
        store.sibling[a as usize] = b;
        store.index[b as usize] = 1;
        store.lanes[b as usize] = Lanes::SYNC;
        store.child_lanes[parent as usize] = Lanes::TRANSITION_1;

        let wip_parent = store.create_work_in_progress(parent, Props::default());
        assert_eq!(store.child[wip_parent as usize], a);
        assert_eq!(store.child_lanes[wip_parent as usize], Lanes::TRANSITION_1);

        let wip_b = store.create_work_in_progress(b, Props::default());
        assert_eq!(store.index[wip_b as usize], 1);
        assert_eq!(store.lanes[wip_b as usize], Lanes::SYNC);
    }

    #[test]
    fn freed_slots_are_reused_with_new_generation() {
        let mut store = FiberStore::new();
        let a = host_fiber(&mut store, "div");
        let old_id = store.id_of(a);
        store.free_pair(a);
        assert!(!store.is_alive(old_id));
        store.free_pair(a);
        assert_eq!(store.free_list.len(), 1, "double free is a no-op");

        let b = host_fiber(&mut store, "span");
        assert_eq!(b, a, "slot is recycled");
        assert!(store.is_alive(store.id_of(b)));
        assert!(!store.is_alive(old_id), "old handle stays stale");
    }

    #[test]
    fn free_subtree_frees_alternates() {
        let mut store = FiberStore::new();
        let parent = host_fiber(&mut store, "ul");
        let child = host_fiber(&mut store, "li");
        store.child[parent as usize] = child;
        store.parent[child as usize] = parent;
        let _alt = store.create_work_in_progress(child, Props::default());
        assert_eq!(store.live_count(), 3);

        store.free_subtree(parent);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn update_marking_walks_both_buffers() {
        let mut store = FiberStore::new();
        let root = store.create_host_root(HostHandle(0));
        let child = store.create_fiber_from_element(&h("div").build_element(), Lanes::NONE);
        store.child[root as usize] = child;
        store.parent[child as usize] = root;
        let root_alt = store.create_work_in_progress(root, Props::default());

        assert!(store.mark_update_lane(store.id_of(child), Lanes::SYNC));
        assert_eq!(store.lanes[child as usize], Lanes::SYNC);
        assert_eq!(store.child_lanes[root as usize], Lanes::SYNC);
        assert_eq!(store.child_lanes[root_alt as usize], Lanes::SYNC);

        let stale = store.id_of(child);
        store.free_pair(child);
        assert!(!store.mark_update_lane(stale, Lanes::DEFAULT));
    }

    #[test]
    #[should_panic(expected = "stale fiber handle")]
    fn stale_handle_panics_on_query() {
        let mut store = FiberStore::new();
        let a = host_fiber(&mut store, "div");
        let id = store.id_of(a);
        store.free_pair(a);
        let _ = store.tag(id);
    }
}
