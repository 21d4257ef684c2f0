// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The render phase: builds the work-in-progress tree.
//!
//! A [`RenderSession`] owns everything that lives for exactly one pass: the
//! cursor into the tree, the lanes being rendered, and the context stack.
//! The walk is depth first and iterative. Entering a fiber ("begin") renders
//! it and reconciles its children; leaving it ("complete") creates or diffs
//! host nodes and folds the fiber's flags and lanes into its parent.
//!
//! A fiber whose props are identical to last time and which has no update in
//! the rendered lanes is skipped. Its children are cloned only if something
//! below it has work; otherwise the whole subtree is reused as is.
//!
//! The session never touches the host tree that is on screen. Host nodes
//! created here stay detached until the commit inserts them.

use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::context::{ContextId, ContextStack};
use crate::element::{
    ClassType, ContextValue, ElementType, FunctionComponent, MemoType, Node, PropValue, Props,
};
use crate::error::ReconcileError;
use crate::fiber::{FiberFlags, FiberState, FiberStore, FiberTag, INVALID, StateNode, UpdatePayload};
use crate::hooks::RenderCx;
use crate::host::{HostHandle, HostRenderer};
use crate::lane::Lanes;
use crate::reconcile::ChildReconciler;
use crate::root::RootHandle;

/// Counters collected during one render.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RenderStats {
    pub(crate) visited: u32,
    pub(crate) bailouts: u32,
}

/// Pass-scoped render state.
pub(crate) struct RenderSession<'a> {
    store: &'a mut FiberStore,
    host: &'a mut dyn HostRenderer,
    root: &'a RootHandle,
    render_lanes: Lanes,
    work_in_progress: u32,
    wip_root: u32,
    contexts: ContextStack,
    /// The current root's first child before this pass re-pointed it.
    root_child_before: u32,
    pub(crate) stats: RenderStats,
}

impl core::fmt::Debug for RenderSession<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RenderSession")
            .field("render_lanes", &self.render_lanes)
            .field("work_in_progress", &self.work_in_progress)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<'a> RenderSession<'a> {
    pub(crate) fn new(
        store: &'a mut FiberStore,
        host: &'a mut dyn HostRenderer,
        root: &'a RootHandle,
        render_lanes: Lanes,
    ) -> Self {
        Self {
            store,
            host,
            root,
            render_lanes,
            work_in_progress: INVALID,
            wip_root: INVALID,
            contexts: ContextStack::new(),
            root_child_before: INVALID,
            stats: RenderStats::default(),
        }
    }

    /// Renders the whole tree below `current_root` and returns the finished
    /// work-in-progress root.
    ///
    /// `element`, if given, replaces the element rendered into the root. On
    /// failure the current tree is left exactly as it was and every fiber
    /// allocated by the pass is freed.
    pub(crate) fn render_root(
        &mut self,
        current_root: u32,
        element: Option<Node>,
    ) -> Result<u32, ReconcileError> {
        let props = self.store.memoized_props[current_root as usize].clone();
        let wip_root = self.store.create_work_in_progress(current_root, props);
        if let Some(element) = element {
            self.store.memoized_state[wip_root as usize] = FiberState::Root { element };
        }
        self.store.parent[wip_root as usize] = INVALID;
        self.root_child_before = self.store.child[current_root as usize];
        self.wip_root = wip_root;
        self.work_in_progress = wip_root;

        while self.work_in_progress != INVALID {
            match self.perform_unit_of_work(self.work_in_progress) {
                Ok(next) => self.work_in_progress = next,
                Err(err) => {
                    log::debug!("render of {:?} failed: {err}", self.render_lanes);
                    self.discard_work_in_progress(current_root);
                    return Err(err);
                }
            }
        }
        debug_assert_eq!(self.contexts.depth(), 0, "unbalanced context push/pop");
        Ok(wip_root)
    }

    fn perform_unit_of_work(&mut self, unit: u32) -> Result<u32, ReconcileError> {
        let current = self.store.alternate[unit as usize];
        let next = self.begin_work(current, unit)?;
        self.store.memoized_props[unit as usize] = self.store.pending_props[unit as usize].clone();
        if next == INVALID {
            self.complete_unit_of_work(unit)
        } else {
            Ok(next)
        }
    }

    fn complete_unit_of_work(&mut self, unit: u32) -> Result<u32, ReconcileError> {
        let mut completed = unit;
        loop {
            let current = self.store.alternate[completed as usize];
            self.complete_work(current, completed)?;
            let sibling = self.store.sibling[completed as usize];
            if sibling != INVALID {
                return Ok(sibling);
            }
            if completed == self.wip_root {
                return Ok(INVALID);
            }
            completed = self.store.parent[completed as usize];
            if completed == INVALID {
                return Ok(INVALID);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Begin
    // -----------------------------------------------------------------------

    fn begin_work(&mut self, current: u32, wip: u32) -> Result<u32, ReconcileError> {
        self.stats.visited += 1;
        let w = wip as usize;
        let has_own_work = self.store.lanes[w].includes_some(self.render_lanes);
        if current != INVALID {
            let unchanged = Props::ptr_eq(
                &self.store.memoized_props[current as usize],
                &self.store.pending_props[w],
            );
            if unchanged && !has_own_work {
                return Ok(self.attempt_early_bailout(current, wip));
            }
        }
        self.store.lanes[w] = Lanes::NONE;

        let ty = self.store.ty[w].clone();
        match (self.store.tag[w], ty) {
            (FiberTag::HostRoot, _) => Ok(self.update_host_root(current, wip)),
            (FiberTag::HostComponent, Some(ElementType::Host(tag))) => {
                Ok(self.update_host_component(current, wip, &tag))
            }
            (FiberTag::HostText, _) => Ok(INVALID),
            (FiberTag::FunctionComponent, Some(ElementType::Function(component))) => {
                Ok(self.update_function_component(current, wip, &component))
            }
            (FiberTag::ClassComponent, Some(ElementType::Class(class))) => {
                Ok(self.update_class_component(current, wip, &class))
            }
            (FiberTag::Fragment, _) => {
                let children = self.store.pending_props[w].children().clone();
                Ok(self.reconcile_children(current, wip, &children))
            }
            (FiberTag::ContextProvider, Some(ElementType::Provider(ctx))) => {
                Ok(self.update_context_provider(current, wip, ctx.id(), ctx.default_value()))
            }
            (FiberTag::ContextConsumer, Some(ElementType::Consumer(ctx))) => {
                let value = self.contexts.read(&ctx);
                self.store.dependencies[w].clear();
                self.store.dependencies[w].push(ctx.id());
                let props = self.store.pending_props[w].clone();
                let render = props
                    .render_prop()
                    .ok_or(ReconcileError::MissingRenderProp)?;
                let children = render.call(&value);
                Ok(self.reconcile_children(current, wip, &children))
            }
            (FiberTag::MemoComponent, Some(ElementType::Memo(memo))) => {
                Ok(self.update_memo_component(current, wip, &memo, has_own_work))
            }
            (tag, ty) => unreachable!("fiber tag {tag:?} does not match its type {ty:?}"),
        }
    }

    fn attempt_early_bailout(&mut self, current: u32, wip: u32) -> u32 {
        // Providers still push so the matching pop in complete stays balanced.
        if let Some(ElementType::Provider(ctx)) = &self.store.ty[wip as usize] {
            let value = provided_value(&self.store.memoized_props[current as usize])
                .unwrap_or_else(|| ctx.default_value().clone());
            self.contexts.push_provider(ctx.id(), value);
        }
        self.bailout_on_already_finished_work(wip)
    }

    fn bailout_on_already_finished_work(&mut self, wip: u32) -> u32 {
        self.stats.bailouts += 1;
        if !self.store.child_lanes[wip as usize].includes_some(self.render_lanes) {
            log::trace!("skipping subtree at fiber {wip}");
            return INVALID;
        }
        self.clone_child_fibers(wip);
        self.store.child[wip as usize]
    }

    fn clone_child_fibers(&mut self, wip: u32) {
        let mut current_child = self.store.child[wip as usize];
        if current_child == INVALID {
            return;
        }
        let props = self.store.pending_props[current_child as usize].clone();
        let mut new_child = self.store.create_work_in_progress(current_child, props);
        self.store.child[wip as usize] = new_child;
        self.store.parent[new_child as usize] = wip;
        loop {
            current_child = self.store.sibling[current_child as usize];
            if current_child == INVALID {
                break;
            }
            let props = self.store.pending_props[current_child as usize].clone();
            let next = self.store.create_work_in_progress(current_child, props);
            self.store.sibling[new_child as usize] = next;
            self.store.parent[next as usize] = wip;
            new_child = next;
        }
        self.store.sibling[new_child as usize] = INVALID;
    }

    fn reconcile_children(&mut self, current: u32, wip: u32, children: &Node) -> u32 {
        let first = if current == INVALID {
            ChildReconciler::MOUNT.reconcile_child_fibers(
                self.store,
                wip,
                INVALID,
                children,
                self.render_lanes,
            )
        } else {
            let current_first = self.store.child[current as usize];
            ChildReconciler::UPDATE.reconcile_child_fibers(
                self.store,
                wip,
                current_first,
                children,
                self.render_lanes,
            )
        };
        self.store.child[wip as usize] = first;
        first
    }

    fn update_host_root(&mut self, current: u32, wip: u32) -> u32 {
        let element = root_element(&self.store.memoized_state[wip as usize]);
        let previous = root_element(&self.store.memoized_state[current as usize]);
        if element.is(&previous) {
            return self.bailout_on_already_finished_work(wip);
        }
        let first = self.reconcile_children(current, wip, &element);
        // The current root sees the new children right away; undone if the
        // pass fails.
        self.store.child[current as usize] = first;
        first
    }

    fn update_host_component(&mut self, current: u32, wip: u32, tag: &str) -> u32 {
        let props = self.store.pending_props[wip as usize].clone();
        let mut children = props.children().clone();
        if should_set_text_content(tag, &props) {
            // The host sets the text directly; no child fibers.
            children = Node::Empty;
        } else if current != INVALID
            && should_set_text_content(tag, &self.store.memoized_props[current as usize])
        {
            self.store.flags[wip as usize] |= FiberFlags::CONTENT_RESET;
        }
        self.reconcile_children(current, wip, &children)
    }

    fn update_function_component(
        &mut self,
        current: u32,
        wip: u32,
        component: &FunctionComponent,
    ) -> u32 {
        let props = self.store.pending_props[wip as usize].clone();
        let prev_hooks = match (current != INVALID)
            .then(|| &self.store.memoized_state[current as usize])
        {
            Some(FiberState::Hooks(hooks)) => Some(hooks.clone()),
            _ => None,
        };
        let id = self.store.id_of(wip);

        let mut cx = RenderCx::new(
            id,
            component.name(),
            &self.contexts,
            self.root,
            prev_hooks.as_deref(),
        );
        let children = component.render(&mut cx, &props);
        let output = cx.finish();

        let w = wip as usize;
        self.store.memoized_state[w] = FiberState::Hooks(output.hooks);
        self.store.update_queue[w] = output.ring;
        self.store.flags[w] |= output.flags;
        self.store.dependencies[w] = output.dependencies;
        self.reconcile_children(current, wip, &children)
    }

    fn update_class_component(&mut self, current: u32, wip: u32, class: &ClassType) -> u32 {
        let w = wip as usize;
        let props = self.store.pending_props[w].clone();
        let instance = match &self.store.state_node[w] {
            StateNode::Instance(instance) => instance.clone(),
            _ => {
                let instance = class.construct(&props);
                self.store.state_node[w] = StateNode::Instance(instance.clone());
                instance
            }
        };
        self.store.dependencies[w].clear();
        let context = class.context_type().map(|ctx| {
            self.store.dependencies[w].push(ctx.id());
            self.contexts.read(ctx)
        });
        let children = instance.borrow_mut().render(&props, context.as_ref());
        // did_mount / did_update run in the layout pass.
        self.store.flags[w] |= FiberFlags::UPDATE;
        self.reconcile_children(current, wip, &children)
    }

    fn update_context_provider(
        &mut self,
        current: u32,
        wip: u32,
        ctx: ContextId,
        default: &ContextValue,
    ) -> u32 {
        let props = self.store.pending_props[wip as usize].clone();
        let value = provided_value(&props).unwrap_or_else(|| default.clone());
        self.contexts.push_provider(ctx, value.clone());

        if current != INVALID {
            let old_props = self.store.memoized_props[current as usize].clone();
            let old_value = provided_value(&old_props).unwrap_or_else(|| default.clone());
            if same_value(&old_value, &value) {
                if old_props.children().is(props.children()) {
                    return self.bailout_on_already_finished_work(wip);
                }
            } else {
                self.propagate_context_change(wip, ctx);
            }
        }
        let children = props.children().clone();
        self.reconcile_children(current, wip, &children)
    }

    /// Schedules every fiber below `provider` that read `ctx` for this
    /// render. Nested providers of the same context shadow it, so their
    /// subtrees are skipped.
    fn propagate_context_change(&mut self, provider: u32, ctx: ContextId) {
        let mut stack: Vec<u32> = self.store.children_at(provider).collect();
        while let Some(fiber) = stack.pop() {
            let f = fiber as usize;
            if self.store.dependencies[f].contains(&ctx) {
                self.store.add_lanes(fiber, self.render_lanes);
                let mut node = self.store.parent[f];
                while node != INVALID {
                    self.store.add_child_lanes(node, self.render_lanes);
                    if node == provider || self.store.alternate[node as usize] == provider {
                        break;
                    }
                    node = self.store.parent[node as usize];
                }
            }
            let shadows = matches!(
                &self.store.ty[f],
                Some(ElementType::Provider(inner)) if inner.id() == ctx
            );
            if !shadows {
                stack.extend(self.store.children_at(fiber));
            }
        }
    }

    fn update_memo_component(
        &mut self,
        current: u32,
        wip: u32,
        memo: &MemoType,
        has_own_work: bool,
    ) -> u32 {
        let props = self.store.pending_props[wip as usize].clone();
        let current_child = if current == INVALID {
            INVALID
        } else {
            self.store.child[current as usize]
        };

        let child = if current_child == INVALID {
            self.store
                .create_fiber_from_type(memo.inner(), props, self.render_lanes)
        } else {
            let equal =
                memo.props_equal(&self.store.memoized_props[current_child as usize], &props);
            if equal && !has_own_work {
                return self.bailout_on_already_finished_work(wip);
            }
            self.store.create_work_in_progress(current_child, props)
        };
        let c = child as usize;
        self.store.parent[c] = wip;
        self.store.sibling[c] = INVALID;
        self.store.index[c] = 0;
        self.store.child[wip as usize] = child;
        child
    }

    // -----------------------------------------------------------------------
    // Complete
    // -----------------------------------------------------------------------

    fn complete_work(&mut self, current: u32, wip: u32) -> Result<(), ReconcileError> {
        let w = wip as usize;
        match self.store.tag[w] {
            FiberTag::HostComponent => {
                let existing = self.store.state_node[w].host();
                match existing {
                    Some(_) if current != INVALID => self.diff_host_component(current, wip)?,
                    _ => {
                        let props = self.store.pending_props[w].clone();
                        let tag = match &self.store.ty[w] {
                            Some(ty) => ty.name(),
                            None => "",
                        };
                        let node = self.host.create_instance(tag, &props);
                        self.store.state_node[w] = StateNode::Host(node);
                        self.append_all_children(node, wip);
                        finalize_initial_children(self.host, node, &props)?;
                    }
                }
            }
            FiberTag::HostText => {
                let text = text_of(&self.store.pending_props[w]);
                match self.store.state_node[w].host() {
                    Some(_) if current != INVALID => {
                        if text_of(&self.store.memoized_props[current as usize]) != text {
                            self.store.flags[w] |= FiberFlags::UPDATE;
                        }
                    }
                    _ => {
                        let node = self.host.create_text_instance(&text);
                        self.store.state_node[w] = StateNode::Host(node);
                    }
                }
            }
            FiberTag::ContextProvider => {
                if let Some(ElementType::Provider(ctx)) = &self.store.ty[w] {
                    self.contexts.pop_provider(ctx.id());
                }
            }
            FiberTag::HostRoot
            | FiberTag::FunctionComponent
            | FiberTag::ClassComponent
            | FiberTag::Fragment
            | FiberTag::ContextConsumer
            | FiberTag::MemoComponent => {}
        }
        self.bubble_properties(current, wip);
        Ok(())
    }

    fn diff_host_component(&mut self, current: u32, wip: u32) -> Result<(), ReconcileError> {
        let old = &self.store.memoized_props[current as usize];
        let new = &self.store.pending_props[wip as usize];
        if Props::ptr_eq(old, new) {
            return Ok(());
        }
        let payload = diff_properties(old, new)?;
        if !payload.is_empty() {
            self.store.update_payload[wip as usize] = Some(payload);
            self.store.flags[wip as usize] |= FiberFlags::UPDATE;
        }
        Ok(())
    }

    /// Appends the top-level host nodes below `wip` to `parent_node`.
    fn append_all_children(&mut self, parent_node: HostHandle, wip: u32) {
        let mut node = self.store.child[wip as usize];
        while node != INVALID {
            let n = node as usize;
            if self.store.tag[n].is_host() {
                if let Some(child) = self.store.state_node[n].host() {
                    self.host.append_child(parent_node, child);
                }
            } else if self.store.child[n] != INVALID {
                node = self.store.child[n];
                continue;
            }
            while self.store.sibling[node as usize] == INVALID {
                let parent = self.store.parent[node as usize];
                if parent == INVALID || parent == wip {
                    return;
                }
                node = parent;
            }
            node = self.store.sibling[node as usize];
        }
    }

    fn bubble_properties(&mut self, current: u32, wip: u32) {
        let w = wip as usize;
        let did_bailout = if self.store.tag[w] == FiberTag::HostRoot {
            self.root_child_before == self.store.child[w]
        } else {
            current != INVALID && self.store.child[current as usize] == self.store.child[w]
        };

        let mut child_lanes = Lanes::NONE;
        let mut subtree_flags = FiberFlags::empty();
        let mut child = self.store.child[w];
        while child != INVALID {
            let c = child as usize;
            child_lanes |= self.store.lanes[c] | self.store.child_lanes[c];
            if !did_bailout {
                subtree_flags |= self.store.subtree_flags[c] | self.store.flags[c];
                self.store.parent[c] = wip;
            }
            child = self.store.sibling[c];
        }
        self.store.child_lanes[w] = child_lanes;
        self.store.subtree_flags[w] |= subtree_flags;
    }

    // -----------------------------------------------------------------------
    // Failure
    // -----------------------------------------------------------------------

    /// Undoes a failed pass: restores the current root's child link and frees
    /// every fiber that exists only in the work-in-progress tree.
    fn discard_work_in_progress(&mut self, current_root: u32) {
        self.store.child[current_root as usize] = self.root_child_before;
        let mut stack = Vec::new();
        stack.push(self.wip_root);
        while let Some(fiber) = stack.pop() {
            let alternate = self.store.alternate[fiber as usize];
            if alternate == INVALID {
                self.release_hosts(fiber);
                self.store.free_subtree(fiber);
                continue;
            }
            if self.store.child[fiber as usize] == self.store.child[alternate as usize] {
                // Untouched or bailed out: the children are current fibers.
                continue;
            }
            stack.extend(self.store.children_at(fiber));
        }
    }

    fn release_hosts(&mut self, fiber: u32) {
        let mut stack = Vec::new();
        stack.push(fiber);
        while let Some(f) = stack.pop() {
            if let Some(node) = self.store.state_node[f as usize].host() {
                self.host.release_instance(node);
            }
            stack.extend(self.store.children_at(f));
        }
    }
}

// ---------------------------------------------------------------------------
// Host helpers
// ---------------------------------------------------------------------------

const INNER_HTML_PROP: &str = "dangerouslySetInnerHTML";

/// Whether a host element's content is set as text instead of child fibers.
fn should_set_text_content(tag: &str, props: &Props) -> bool {
    tag == "textarea"
        || tag == "noscript"
        || props.children().as_text().is_some()
        || props
            .get(INNER_HTML_PROP)
            .is_some_and(|v| !matches!(v, PropValue::Null))
}

/// `onClick`-style props must hold listeners.
fn is_event_prop(key: &str) -> bool {
    key.len() > 2 && key.starts_with("on") && key.as_bytes()[2].is_ascii_uppercase()
}

/// The name a prop is applied under on the host.
pub(crate) fn host_prop_name(key: &str) -> &str {
    if key == INNER_HTML_PROP {
        "innerHTML"
    } else {
        key
    }
}

fn finalize_initial_children(
    host: &mut dyn HostRenderer,
    node: HostHandle,
    props: &Props,
) -> Result<(), ReconcileError> {
    for (key, value) in props.attrs() {
        if is_event_prop(key) {
            props.listener(key)?;
        }
        if matches!(value, PropValue::Null) {
            continue;
        }
        host.set_property(node, host_prop_name(key), value);
    }
    if let Some(text) = props.children().as_text() {
        host.set_text_content(node, text);
    }
    Ok(())
}

/// Computes the property changes from `old` to `new`. Removed props map to
/// `Null`; a changed text child is reported under `"children"`.
fn diff_properties(old: &Props, new: &Props) -> Result<UpdatePayload, ReconcileError> {
    let mut payload = UpdatePayload::new();
    for (key, _) in old.attrs() {
        if new.get(key).is_none() {
            payload.push((key.into(), PropValue::Null));
        }
    }
    for (key, value) in new.attrs() {
        if old.get(key).is_some_and(|prev| prev.is(value)) {
            continue;
        }
        if is_event_prop(key) {
            new.listener(key)?;
        }
        payload.push((key.into(), value.clone()));
    }
    if let Some(text) = new.children().as_text()
        && old.children().as_text() != Some(text)
    {
        payload.push(("children".into(), PropValue::Str(text.into())));
    }
    Ok(payload)
}

fn text_of(props: &Props) -> Rc<str> {
    match props.children() {
        Node::Text(text) => text.clone(),
        _ => "".into(),
    }
}

fn root_element(state: &FiberState) -> Node {
    match state {
        FiberState::Root { element } => element.clone(),
        FiberState::None | FiberState::Hooks(_) => Node::Empty,
    }
}

fn provided_value(props: &Props) -> Option<ContextValue> {
    match props.get("value") {
        Some(PropValue::Any(value)) => Some(value.clone()),
        _ => None,
    }
}

fn same_value(a: &ContextValue, b: &ContextValue) -> bool {
    core::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}
