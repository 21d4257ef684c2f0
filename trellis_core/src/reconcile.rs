// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The child reconciler: diffs a fiber's current children against a new
//! child specification.
//!
//! The result is a new first child whose siblings are the work-in-progress
//! children. Reused fibers come from [`FiberStore::create_work_in_progress`];
//! everything else is freshly allocated. With side-effect tracking on, moved
//! or inserted fibers get [`FiberFlags::PLACEMENT`] and removed ones are
//! queued on the parent's `deletions`.
//!
//! # Lists
//!
//! Lists are diffed in one forward pass, not with a minimal edit script:
//!
//! 1. Walk old and new in step while slots match (same key, or both
//!    unkeyed at the same index).
//! 2. If the new list ran out, delete the rest of the old one. If the old
//!    one ran out, create the rest of the new one.
//! 3. Otherwise index the remaining old fibers by key (or index) and look up
//!    each remaining new child; leftovers are deleted.
//!
//! A reused fiber is marked for placement only if its old index is below
//! `last_placed_index`, the highest old index kept in place so far. Moving
//! one item forward therefore moves that item; moving one item back moves
//! every item it passed.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;

use crate::element::{Element, ElementType, Key, Node, Props};
use crate::fiber::{FiberFlags, FiberStore, FiberTag, INVALID};
use crate::lane::Lanes;

/// Lookup key for the map phase of list reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum MapKey {
    Key(Key),
    Index(u32),
}

/// One reconciliation strategy. [`UPDATE`](Self::UPDATE) tracks placements
/// and deletions; [`MOUNT`](Self::MOUNT) does not, because a newly mounted
/// parent inserts its whole subtree at once.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChildReconciler {
    track_side_effects: bool,
}

impl ChildReconciler {
    pub(crate) const MOUNT: Self = Self {
        track_side_effects: false,
    };
    pub(crate) const UPDATE: Self = Self {
        track_side_effects: true,
    };

    /// Reconciles `new_child` against the list starting at `current_first`
    /// and returns the new first child of `parent` (or `INVALID`).
    pub(crate) fn reconcile_child_fibers(
        self,
        store: &mut FiberStore,
        parent: u32,
        current_first: u32,
        new_child: &Node,
        lanes: Lanes,
    ) -> u32 {
        // An unkeyed fragment at the top is treated as its children.
        let unwrapped;
        let new_child = match new_child {
            Node::Element(el) if matches!(el.ty, ElementType::Fragment) && el.key.is_none() => {
                unwrapped = el.props.children().clone();
                &unwrapped
            }
            other => other,
        };

        match new_child {
            Node::Element(el) => {
                let fiber =
                    self.reconcile_single_element(store, parent, current_first, el, lanes);
                self.place_single_child(store, fiber)
            }
            Node::List(items) => {
                self.reconcile_children_array(store, parent, current_first, items, lanes)
            }
            Node::Text(text) if !text.is_empty() => {
                let fiber =
                    self.reconcile_single_text(store, parent, current_first, text.clone(), lanes);
                self.place_single_child(store, fiber)
            }
            Node::Text(_) | Node::Empty => {
                self.delete_remaining_children(store, parent, current_first);
                INVALID
            }
        }
    }

    // -- Deletion --

    fn delete_child(self, store: &mut FiberStore, parent: u32, child: u32) {
        if !self.track_side_effects {
            return;
        }
        store.deletions[parent as usize].push(child);
        store.flags[parent as usize] |= FiberFlags::CHILD_DELETION;
    }

    fn delete_remaining_children(self, store: &mut FiberStore, parent: u32, first: u32) {
        if !self.track_side_effects {
            return;
        }
        let mut child = first;
        while child != INVALID {
            self.delete_child(store, parent, child);
            child = store.sibling[child as usize];
        }
    }

    // -- Placement --

    fn use_fiber(store: &mut FiberStore, fiber: u32, props: Props) -> u32 {
        let clone = store.create_work_in_progress(fiber, props);
        store.index[clone as usize] = 0;
        store.sibling[clone as usize] = INVALID;
        clone
    }

    fn place_child(
        self,
        store: &mut FiberStore,
        fiber: u32,
        last_placed: u32,
        new_idx: u32,
    ) -> u32 {
        store.index[fiber as usize] = new_idx;
        if !self.track_side_effects {
            return last_placed;
        }
        let current = store.alternate[fiber as usize];
        if current == INVALID {
            store.flags[fiber as usize] |= FiberFlags::PLACEMENT;
            return last_placed;
        }
        let old_index = store.index[current as usize];
        if old_index < last_placed {
            store.flags[fiber as usize] |= FiberFlags::PLACEMENT;
            last_placed
        } else {
            old_index
        }
    }

    fn place_single_child(self, store: &mut FiberStore, fiber: u32) -> u32 {
        if self.track_side_effects && store.alternate[fiber as usize] == INVALID {
            store.flags[fiber as usize] |= FiberFlags::PLACEMENT;
        }
        fiber
    }

    // -- Slot updates --

    fn update_text_node(
        store: &mut FiberStore,
        parent: u32,
        current: u32,
        text: Rc<str>,
        lanes: Lanes,
    ) -> u32 {
        let fiber = if current == INVALID || store.tag[current as usize] != FiberTag::HostText {
            store.create_fiber_from_text(text, lanes)
        } else {
            Self::use_fiber(store, current, Props::from_text(text))
        };
        store.parent[fiber as usize] = parent;
        fiber
    }

    fn update_element(
        store: &mut FiberStore,
        parent: u32,
        current: u32,
        el: &Element,
        lanes: Lanes,
    ) -> u32 {
        let reusable = current != INVALID
            && store.ty[current as usize]
                .as_ref()
                .is_some_and(|ty| ty.same_type(&el.ty));
        let fiber = if reusable {
            Self::use_fiber(store, current, el.props.clone())
        } else {
            store.create_fiber_from_element(el, lanes)
        };
        store.parent[fiber as usize] = parent;
        fiber
    }

    fn update_fragment(
        store: &mut FiberStore,
        parent: u32,
        current: u32,
        children: Node,
        lanes: Lanes,
    ) -> u32 {
        let fiber = if current == INVALID || store.tag[current as usize] != FiberTag::Fragment {
            store.create_fiber_from_fragment(children, lanes)
        } else {
            Self::use_fiber(store, current, Props::from_children(children))
        };
        store.parent[fiber as usize] = parent;
        fiber
    }

    fn create_child(store: &mut FiberStore, parent: u32, new_child: &Node, lanes: Lanes) -> u32 {
        let fiber = match new_child {
            Node::Text(text) if !text.is_empty() => {
                store.create_fiber_from_text(text.clone(), lanes)
            }
            Node::Element(el) => store.create_fiber_from_element(el, lanes),
            Node::List(_) => store.create_fiber_from_fragment(new_child.clone(), lanes),
            Node::Text(_) | Node::Empty => return INVALID,
        };
        store.parent[fiber as usize] = parent;
        fiber
    }

    /// Reuses or replaces `old` for `new_child` if their keys match.
    /// Returns `INVALID` on a key mismatch (or an empty child).
    fn update_slot(
        store: &mut FiberStore,
        parent: u32,
        old: u32,
        new_child: &Node,
        lanes: Lanes,
    ) -> u32 {
        let key = if old == INVALID {
            None
        } else {
            store.key[old as usize].clone()
        };
        match new_child {
            Node::Text(text) if !text.is_empty() => {
                if key.is_some() {
                    return INVALID;
                }
                Self::update_text_node(store, parent, old, text.clone(), lanes)
            }
            Node::Element(el) => {
                if el.key != key {
                    return INVALID;
                }
                Self::update_element(store, parent, old, el, lanes)
            }
            Node::List(_) => {
                if key.is_some() {
                    return INVALID;
                }
                Self::update_fragment(store, parent, old, new_child.clone(), lanes)
            }
            Node::Text(_) | Node::Empty => INVALID,
        }
    }

    fn map_key(new_child: &Node, new_idx: u32) -> MapKey {
        match new_child {
            Node::Element(el) => match &el.key {
                Some(key) => MapKey::Key(key.clone()),
                None => MapKey::Index(new_idx),
            },
            _ => MapKey::Index(new_idx),
        }
    }

    fn map_remaining_children(store: &FiberStore, first: u32) -> BTreeMap<MapKey, u32> {
        let mut map = BTreeMap::new();
        let mut child = first;
        while child != INVALID {
            let key = match &store.key[child as usize] {
                Some(key) => MapKey::Key(key.clone()),
                None => MapKey::Index(store.index[child as usize]),
            };
            map.insert(key, child);
            child = store.sibling[child as usize];
        }
        map
    }

    fn update_from_map(
        store: &mut FiberStore,
        map: &BTreeMap<MapKey, u32>,
        parent: u32,
        new_idx: u32,
        new_child: &Node,
        lanes: Lanes,
    ) -> u32 {
        let matched = map
            .get(&Self::map_key(new_child, new_idx))
            .copied()
            .unwrap_or(INVALID);
        match new_child {
            Node::Text(text) if !text.is_empty() => {
                Self::update_text_node(store, parent, matched, text.clone(), lanes)
            }
            Node::Element(el) => Self::update_element(store, parent, matched, el, lanes),
            Node::List(_) => {
                Self::update_fragment(store, parent, matched, new_child.clone(), lanes)
            }
            Node::Text(_) | Node::Empty => INVALID,
        }
    }

    // -- Shapes --

    fn reconcile_single_element(
        self,
        store: &mut FiberStore,
        parent: u32,
        current_first: u32,
        el: &Element,
        lanes: Lanes,
    ) -> u32 {
        let mut child = current_first;
        while child != INVALID {
            if store.key[child as usize] == el.key {
                let same_type = store.ty[child as usize]
                    .as_ref()
                    .is_some_and(|ty| ty.same_type(&el.ty));
                if same_type {
                    self.delete_remaining_children(store, parent, store.sibling[child as usize]);
                    let existing = Self::use_fiber(store, child, el.props.clone());
                    store.parent[existing as usize] = parent;
                    return existing;
                }
                // Same key, different type: nothing later can match either.
                self.delete_remaining_children(store, parent, child);
                break;
            }
            self.delete_child(store, parent, child);
            child = store.sibling[child as usize];
        }
        let created = store.create_fiber_from_element(el, lanes);
        store.parent[created as usize] = parent;
        created
    }

    fn reconcile_single_text(
        self,
        store: &mut FiberStore,
        parent: u32,
        current_first: u32,
        text: Rc<str>,
        lanes: Lanes,
    ) -> u32 {
        if current_first != INVALID && store.tag[current_first as usize] == FiberTag::HostText {
            self.delete_remaining_children(store, parent, store.sibling[current_first as usize]);
            let existing = Self::use_fiber(store, current_first, Props::from_text(text));
            store.parent[existing as usize] = parent;
            return existing;
        }
        self.delete_remaining_children(store, parent, current_first);
        let created = store.create_fiber_from_text(text, lanes);
        store.parent[created as usize] = parent;
        created
    }

    fn reconcile_children_array(
        self,
        store: &mut FiberStore,
        parent: u32,
        current_first: u32,
        new_children: &[Node],
        lanes: Lanes,
    ) -> u32 {
        let len = u32::try_from(new_children.len()).unwrap_or(u32::MAX);
        let mut chain = Chain::new();

        let mut old = current_first;
        let mut last_placed = 0;
        let mut new_idx = 0_u32;
        let mut next_old;

        while old != INVALID && new_idx < len {
            if store.index[old as usize] > new_idx {
                next_old = old;
                old = INVALID;
            } else {
                next_old = store.sibling[old as usize];
            }
            let new_fiber =
                Self::update_slot(store, parent, old, &new_children[new_idx as usize], lanes);
            if new_fiber == INVALID {
                if old == INVALID {
                    old = next_old;
                }
                break;
            }
            if self.track_side_effects
                && old != INVALID
                && store.alternate[new_fiber as usize] == INVALID
            {
                // The slot matched by key but the type changed.
                self.delete_child(store, parent, old);
            }
            last_placed = self.place_child(store, new_fiber, last_placed, new_idx);
            chain.link(store, new_fiber);
            old = next_old;
            new_idx += 1;
        }

        if new_idx == len {
            self.delete_remaining_children(store, parent, old);
            return chain.first;
        }

        if old == INVALID {
            while new_idx < len {
                let new_fiber =
                    Self::create_child(store, parent, &new_children[new_idx as usize], lanes);
                if new_fiber != INVALID {
                    last_placed = self.place_child(store, new_fiber, last_placed, new_idx);
                    chain.link(store, new_fiber);
                }
                new_idx += 1;
            }
            return chain.first;
        }

        let mut existing = Self::map_remaining_children(store, old);
        while new_idx < len {
            let new_child = &new_children[new_idx as usize];
            let new_fiber =
                Self::update_from_map(store, &existing, parent, new_idx, new_child, lanes);
            if new_fiber != INVALID {
                if self.track_side_effects && store.alternate[new_fiber as usize] != INVALID {
                    existing.remove(&Self::map_key(new_child, new_idx));
                }
                last_placed = self.place_child(store, new_fiber, last_placed, new_idx);
                chain.link(store, new_fiber);
            }
            new_idx += 1;
        }

        if self.track_side_effects {
            for child in existing.into_values() {
                self.delete_child(store, parent, child);
            }
        }
        chain.first
    }
}

/// Builds a sibling list front to back.
struct Chain {
    first: u32,
    last: u32,
}

impl Chain {
    fn new() -> Self {
        Self {
            first: INVALID,
            last: INVALID,
        }
    }

    fn link(&mut self, store: &mut FiberStore, fiber: u32) {
        if self.last == INVALID {
            self.first = fiber;
        } else {
            store.sibling[self.last as usize] = fiber;
        }
        self.last = fiber;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementBuilder, h};
    use crate::host::HostHandle;
    use alloc::vec::Vec;

    fn li(key: &str) -> Node {
        h("li").key(key).child(key).build()
    }

    fn list(keys: &[&str]) -> Node {
        Node::list(keys.iter().map(|k| li(k)))
    }

    /// Mounts `ul > children` under a root and returns (store, current ul).
    fn mounted(children: &Node) -> (FiberStore, u32) {
        let mut store = FiberStore::new();
        let root = store.create_host_root(HostHandle(0));
        let ul = store.create_fiber_from_element(&h("ul").build_element(), Lanes::DEFAULT);
        store.parent[ul as usize] = root;
        let first = ChildReconciler::MOUNT.reconcile_child_fibers(
            &mut store,
            ul,
            INVALID,
            children,
            Lanes::DEFAULT,
        );
        store.child[ul as usize] = first;
        (store, ul)
    }

    fn update(store: &mut FiberStore, current: u32, children: &Node) -> (u32, u32) {
        let props = store.pending_props[current as usize].clone();
        let wip = store.create_work_in_progress(current, props);
        let first = ChildReconciler::UPDATE.reconcile_child_fibers(
            store,
            wip,
            store.child[current as usize],
            children,
            Lanes::DEFAULT,
        );
        store.child[wip as usize] = first;
        (wip, first)
    }

    fn siblings(store: &FiberStore, first: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut c = first;
        while c != INVALID {
            out.push(c);
            c = store.sibling[c as usize];
        }
        out
    }

    fn placed_keys(store: &FiberStore, first: u32) -> Vec<&str> {
        siblings(store, first)
            .into_iter()
            .filter(|c| store.flags[*c as usize].contains(FiberFlags::PLACEMENT))
            .filter_map(|c| store.key[c as usize].as_deref())
            .collect()
    }

    #[test]
    fn mount_does_not_track_effects() {
        let (store, ul) = mounted(&list(&["a", "b"]));
        let kids = siblings(&store, store.child[ul as usize]);
        assert_eq!(kids.len(), 2);
        assert!(kids.iter().all(|c| store.flags[*c as usize].is_empty()));
        assert_eq!(store.index[kids[1] as usize], 1);
        assert!(kids.iter().all(|c| store.parent[*c as usize] == ul));
    }

    #[test]
    fn unchanged_list_has_no_placements_or_deletions() {
        let (mut store, ul) = mounted(&list(&["a", "b", "c"]));
        let old = siblings(&store, store.child[ul as usize]);
        let (wip, first) = update(&mut store, ul, &list(&["a", "b", "c"]));

        let new = siblings(&store, first);
        assert_eq!(new.len(), 3);
        for (n, o) in new.iter().zip(&old) {
            assert_eq!(store.alternate[*n as usize], *o, "every fiber is reused");
        }
        assert!(placed_keys(&store, first).is_empty());
        assert!(store.deletions[wip as usize].is_empty());
        assert!(!store.flags[wip as usize].contains(FiberFlags::CHILD_DELETION));
    }

    #[test]
    fn single_move_places_one_fiber() {
        let (mut store, ul) = mounted(&list(&["a", "b", "c", "d"]));
        let (wip, first) = update(&mut store, ul, &list(&["a", "c", "b", "d"]));

        let placed = placed_keys(&store, first);
        assert_eq!(placed.len(), 1, "exactly one of b/c moves: {placed:?}");
        assert!(placed[0] == "b" || placed[0] == "c");
        assert!(store.deletions[wip as usize].is_empty());
        let indices: Vec<u32> = siblings(&store, first)
            .into_iter()
            .map(|c| store.index[c as usize])
            .collect();
        assert_eq!(indices, [0, 1, 2, 3]);
    }

    #[test]
    fn removed_and_inserted_items() {
        let (mut store, ul) = mounted(&list(&["a", "b", "c"]));
        let old_b = siblings(&store, store.child[ul as usize])[1];
        let (wip, first) = update(&mut store, ul, &list(&["a", "c", "x"]));

        assert_eq!(store.deletions[wip as usize], [old_b]);
        assert!(store.flags[wip as usize].contains(FiberFlags::CHILD_DELETION));
        assert_eq!(placed_keys(&store, first), ["x"]);
    }

    #[test]
    fn shrinking_list_deletes_tail() {
        let (mut store, ul) = mounted(&list(&["a", "b", "c"]));
        let old = siblings(&store, store.child[ul as usize]);
        let (wip, first) = update(&mut store, ul, &list(&["a"]));
        assert_eq!(siblings(&store, first).len(), 1);
        assert_eq!(store.deletions[wip as usize], old[1..]);
    }

    #[test]
    fn same_key_different_type_replaces_fiber() {
        let (mut store, ul) = mounted(&list(&["a", "b"]));
        let old = siblings(&store, store.child[ul as usize]);

        let next = ElementBuilder::new(ElementType::Host("p".into()))
            .key("a")
            .build();
        let (wip, first) = update(&mut store, ul, &next);

        assert_eq!(store.alternate[first as usize], INVALID, "fresh fiber");
        assert_eq!(store.tag[first as usize], FiberTag::HostComponent);
        assert!(store.flags[first as usize].contains(FiberFlags::PLACEMENT));
        assert_eq!(store.deletions[wip as usize], old, "the whole chain is deleted");
    }

    #[test]
    fn single_element_skips_mismatched_keys() {
        let (mut store, ul) = mounted(&list(&["a", "b", "c"]));
        let old = siblings(&store, store.child[ul as usize]);
        let (wip, first) = update(&mut store, ul, &li("b"));

        assert_eq!(store.alternate[first as usize], old[1]);
        assert!(store.flags[first as usize].is_empty());
        assert_eq!(store.deletions[wip as usize], [old[0], old[2]]);
    }

    #[test]
    fn text_reuses_text_fiber() {
        let (mut store, ul) = mounted(&Node::text("hello"));
        let old = store.child[ul as usize];
        assert_eq!(store.tag[old as usize], FiberTag::HostText);
        let (wip, first) = update(&mut store, ul, &Node::text("world"));
        assert_eq!(store.alternate[first as usize], old);
        assert_eq!(
            store.pending_props[first as usize].children().as_text(),
            Some("world")
        );
        assert!(store.deletions[wip as usize].is_empty());
    }

    #[test]
    fn empty_children_delete_everything() {
        let (mut store, ul) = mounted(&list(&["a", "b"]));
        let (wip, first) = update(&mut store, ul, &Node::Empty);
        assert_eq!(first, INVALID);
        assert_eq!(store.deletions[wip as usize].len(), 2);
    }

    #[test]
    fn unkeyed_fragment_is_unwrapped() {
        let frag = crate::element::fragment().child(li("a")).child(li("b")).build();
        let (store, ul) = mounted(&frag);
        let kids = siblings(&store, store.child[ul as usize]);
        assert_eq!(kids.len(), 2);
        assert!(
            kids.iter()
                .all(|c| store.tag[*c as usize] == FiberTag::HostComponent)
        );
    }

    #[test]
    fn nested_lists_become_fragments() {
        let nested = Node::list([li("a"), list(&["b", "c"])]);
        let (store, ul) = mounted(&nested);
        let kids = siblings(&store, store.child[ul as usize]);
        assert_eq!(kids.len(), 2);
        assert_eq!(store.tag[kids[1] as usize], FiberTag::Fragment);
    }

    #[test]
    fn empty_slots_keep_indices() {
        let (mut store, ul) = mounted(&Node::list([li("a"), Node::Empty, li("c")]));
        let kids = siblings(&store, store.child[ul as usize]);
        assert_eq!(kids.len(), 2);
        assert_eq!(store.index[kids[1] as usize], 2);

        let same = Node::list([li("a"), Node::Empty, li("c")]);
        let (wip, first) = update(&mut store, ul, &same);
        assert!(placed_keys(&store, first).is_empty());
        assert!(store.deletions[wip as usize].is_empty());
    }
}
