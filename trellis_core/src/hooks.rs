// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-fiber local state for function components.
//!
//! A function component receives a [`RenderCx`] and calls its `use_*`
//! methods in the same order on every render. Each call claims the next
//! position in the fiber's hook list; on update, the previous list is read
//! position by position and entries are carried forward by reference.
//!
//! State updates are applied eagerly: [`Dispatch::dispatch`] runs the
//! reducer against the shared state cell immediately, then queues the
//! owning fiber on the root in the lane chosen by
//! the root's current update priority. The next render pass marks the lane
//! on the fiber and its ancestors and re-renders it.
//!
//! Effects are collected into a circular [`EffectRing`] per render. An
//! effect whose dependencies are unchanged is still recorded (so its cleanup
//! runs on unmount) but without [`HookFlags::HAS_EFFECT`], which keeps the
//! commit from running it.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::cell::RefCell;
use core::fmt;

use crate::context::{Context, ContextId, ContextStack};
use crate::element::PropValue;
use crate::error::{EffectError, ReconcileError};
use crate::fiber::{FiberFlags, FiberId};
use crate::root::RootHandle;

/// Cleanup returned by an effect.
pub type Destroy = Box<dyn FnOnce()>;

/// What an effect body returns: an optional cleanup, or a failure.
pub type EffectResult = Result<Option<Destroy>, EffectError>;

type Create = Box<dyn FnOnce() -> EffectResult>;

bitflags::bitflags! {
    /// Tags on an effect ring entry.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HookFlags: u8 {
        /// The effect must run in this commit.
        const HAS_EFFECT = 1 << 0;
        /// Runs synchronously after mutation (`use_layout_effect`).
        const LAYOUT = 1 << 2;
        /// Runs in the deferred passive pass (`use_effect`).
        const PASSIVE = 1 << 3;
    }
}

// ---------------------------------------------------------------------------
// Effect ring
// ---------------------------------------------------------------------------

/// Cleanup storage shared by every render's copy of one effect.
#[derive(Default)]
pub(crate) struct EffectInstance {
    destroy: RefCell<Option<Destroy>>,
}

impl EffectInstance {
    /// Runs and clears the stored cleanup, if any.
    pub(crate) fn destroy(&self) {
        let destroy = self.destroy.borrow_mut().take();
        if let Some(destroy) = destroy {
            destroy();
        }
    }
}

impl fmt::Debug for EffectInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectInstance")
            .field("has_destroy", &self.destroy.borrow().is_some())
            .finish()
    }
}

pub(crate) struct Effect {
    pub(crate) tag: HookFlags,
    create: RefCell<Option<Create>>,
    pub(crate) deps: Option<Rc<[PropValue]>>,
    pub(crate) inst: Rc<EffectInstance>,
    next: usize,
}

/// The effects of one render, linked in a circle.
///
/// `last` is the most recently pushed entry; traversal starts at its `next`,
/// which is the first pushed, and stops on returning there.
#[derive(Default)]
pub(crate) struct EffectRing {
    effects: Vec<Effect>,
    last: usize,
}

impl fmt::Debug for EffectRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.iter()
                    .map(|e| (e.tag, e.deps.as_deref().map(<[PropValue]>::len))),
            )
            .finish()
    }
}

impl EffectRing {
    fn push(
        &mut self,
        tag: HookFlags,
        create: Option<Create>,
        deps: Option<Rc<[PropValue]>>,
        inst: Rc<EffectInstance>,
    ) {
        let idx = self.effects.len();
        let next = if idx == 0 {
            0
        } else {
            let first = self.effects[self.last].next;
            self.effects[self.last].next = idx;
            first
        };
        self.effects.push(Effect {
            tag,
            create: RefCell::new(create),
            deps,
            inst,
            next,
        });
        self.last = idx;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub(crate) fn iter(&self) -> RingIter<'_> {
        let start = self.effects.get(self.last).map(|e| e.next);
        RingIter {
            ring: self,
            start,
            cursor: start,
        }
    }

    /// Runs the stored cleanup of every effect tagged with all of `mask`.
    pub(crate) fn unmount(&self, mask: HookFlags) {
        for effect in self.iter() {
            if effect.tag.contains(mask) {
                effect.inst.destroy();
            }
        }
    }

    /// Runs the body of every effect tagged with all of `mask`, storing the
    /// returned cleanups. Failures go to `report`; an `Err` from `report`
    /// stops the walk.
    pub(crate) fn mount(
        &self,
        mask: HookFlags,
        mut report: impl FnMut(EffectError) -> Result<(), ReconcileError>,
    ) -> Result<(), ReconcileError> {
        for effect in self.iter() {
            if !effect.tag.contains(mask) {
                continue;
            }
            let create = effect.create.borrow_mut().take();
            let Some(create) = create else {
                continue;
            };
            match create() {
                Ok(destroy) => *effect.inst.destroy.borrow_mut() = destroy,
                Err(err) => report(err)?,
            }
        }
        Ok(())
    }

    /// Cleanup holders of every effect tagged with all of `mask`.
    pub(crate) fn instances(&self, mask: HookFlags) -> impl Iterator<Item = &Rc<EffectInstance>> {
        self.iter()
            .filter(move |e| e.tag.contains(mask))
            .map(|e| &e.inst)
    }
}

pub(crate) struct RingIter<'a> {
    ring: &'a EffectRing,
    start: Option<usize>,
    cursor: Option<usize>,
}

impl<'a> Iterator for RingIter<'a> {
    type Item = &'a Effect;

    fn next(&mut self) -> Option<&'a Effect> {
        let idx = self.cursor?;
        let effect = &self.ring.effects[idx];
        self.cursor = Some(effect.next).filter(|n| Some(*n) != self.start);
        Some(effect)
    }
}

// ---------------------------------------------------------------------------
// Hook list
// ---------------------------------------------------------------------------

/// One entry of a fiber's hook list.
#[derive(Clone)]
pub(crate) enum Hook {
    /// A `ReducerCell<S, A>`.
    State(Rc<dyn Any>),
    Memo {
        value: Rc<dyn Any>,
        deps: Option<Rc<[PropValue]>>,
    },
    Ref(Rc<dyn Any>),
    Effect {
        inst: Rc<EffectInstance>,
        deps: Option<Rc<[PropValue]>>,
    },
}

impl Hook {
    fn kind(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Memo { .. } => "memo",
            Self::Ref(_) => "ref",
            Self::Effect { .. } => "effect",
        }
    }
}

/// Element-wise `Object.is` comparison. Absent dependencies never match.
pub(crate) fn deps_equal(next: Option<&[PropValue]>, prev: Option<&[PropValue]>) -> bool {
    match (next, prev) {
        (Some(next), Some(prev)) => {
            next.len() == prev.len() && next.iter().zip(prev).all(|(a, b)| a.is(b))
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Sends actions to a reducer hook.
///
/// Dispatching after the owning component unmounted is a no-op.
pub struct Dispatch<A>(Rc<dyn Fn(A)>);

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dispatch")
    }
}

impl<A> Dispatch<A> {
    /// Applies `action` and schedules a re-render of the owning component.
    pub fn dispatch(&self, action: A) {
        (self.0)(action);
    }
}

type StateAction<S> = Box<dyn FnOnce(&S) -> S>;

/// Setter returned by [`RenderCx::use_state`].
pub struct SetState<S>(Dispatch<StateAction<S>>);

impl<S> Clone for SetState<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<S> fmt::Debug for SetState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SetState")
    }
}

impl<S: 'static> SetState<S> {
    /// Replaces the state.
    pub fn set(&self, value: S) {
        self.0.dispatch(Box::new(move |_| value));
    }

    /// Computes the next state from the current one.
    pub fn update(&self, f: impl FnOnce(&S) -> S + 'static) {
        self.0.dispatch(Box::new(f));
    }
}

struct ReducerCell<S, A> {
    state: RefCell<Rc<S>>,
    reducer: RefCell<Rc<dyn Fn(&S, A) -> S>>,
    dispatch: Dispatch<A>,
}

/// Starts transitions; returned by [`RenderCx::use_transition`].
#[derive(Clone, Debug)]
pub struct StartTransition {
    root: RootHandle,
}

impl StartTransition {
    /// Runs `f`; updates dispatched inside it render in a transition lane.
    pub fn start(&self, f: impl FnOnce()) {
        self.root.start_transition(f);
    }
}

// ---------------------------------------------------------------------------
// RenderCx
// ---------------------------------------------------------------------------

/// What one function-component render left behind.
pub(crate) struct RenderOutput {
    pub(crate) hooks: Rc<[Hook]>,
    pub(crate) ring: Option<Rc<EffectRing>>,
    pub(crate) flags: FiberFlags,
    pub(crate) dependencies: Vec<ContextId>,
}

/// The hooks dispatcher passed to a function component's render.
pub struct RenderCx<'a, 'b> {
    fiber: FiberId,
    component: &'a str,
    contexts: &'a ContextStack,
    root: &'a RootHandle,
    prev: Option<&'b [Hook]>,
    cursor: usize,
    hooks: Vec<Hook>,
    ring: EffectRing,
    flags: FiberFlags,
    dependencies: Vec<ContextId>,
}

impl fmt::Debug for RenderCx<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCx")
            .field("fiber", &self.fiber)
            .field("component", &self.component)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl<'a, 'b> RenderCx<'a, 'b> {
    pub(crate) fn new(
        fiber: FiberId,
        component: &'a str,
        contexts: &'a ContextStack,
        root: &'a RootHandle,
        prev: Option<&'b [Hook]>,
    ) -> Self {
        Self {
            fiber,
            component,
            contexts,
            root,
            prev,
            cursor: 0,
            hooks: Vec::new(),
            ring: EffectRing::default(),
            flags: FiberFlags::empty(),
            dependencies: Vec::new(),
        }
    }

    /// Name of the component being rendered.
    #[must_use]
    pub fn component_name(&self) -> &str {
        self.component
    }

    fn next_prev(&mut self) -> Option<&'b Hook> {
        let hook = self.prev.and_then(|prev| prev.get(self.cursor));
        self.cursor += 1;
        hook
    }

    fn mismatch(&self, expected: &str, found: &Hook) {
        log::error!(
            "hook {} of `{}` changed from {} to {expected} between renders",
            self.cursor - 1,
            self.component,
            found.kind(),
        );
        if cfg!(debug_assertions) {
            panic!("hook order changed between renders of `{}`", self.component);
        }
    }

    /// A state cell updated through a reducer.
    ///
    /// `init` runs on mount only. The reducer passed on the latest render is
    /// the one dispatches use.
    pub fn use_reducer<S: 'static, A: 'static>(
        &mut self,
        reducer: impl Fn(&S, A) -> S + 'static,
        init: impl FnOnce() -> S,
    ) -> (Rc<S>, Dispatch<A>) {
        let reducer: Rc<dyn Fn(&S, A) -> S> = Rc::new(reducer);
        let existing = match self.next_prev() {
            Some(Hook::State(any)) => match any.clone().downcast::<ReducerCell<S, A>>() {
                Ok(cell) => Some(cell),
                Err(_) => {
                    self.mismatch("state of another type", &Hook::State(any.clone()));
                    None
                }
            },
            Some(other) => {
                self.mismatch("state", other);
                None
            }
            None => None,
        };
        let cell = match existing {
            Some(cell) => {
                *cell.reducer.borrow_mut() = reducer;
                cell
            }
            None => self.mount_reducer(reducer, init()),
        };
        self.hooks.push(Hook::State(cell.clone()));
        let state = cell.state.borrow().clone();
        (state, cell.dispatch.clone())
    }

    fn mount_reducer<S: 'static, A: 'static>(
        &self,
        reducer: Rc<dyn Fn(&S, A) -> S>,
        initial: S,
    ) -> Rc<ReducerCell<S, A>> {
        let fiber = self.fiber;
        let root = self.root.clone();
        Rc::new_cyclic(|weak: &Weak<ReducerCell<S, A>>| {
            let weak = weak.clone();
            let dispatch = Dispatch(Rc::new(move |action: A| {
                let Some(cell) = weak.upgrade() else {
                    return;
                };
                let lane = root.request_update_lane();
                let reducer = cell.reducer.borrow().clone();
                let current = cell.state.borrow().clone();
                let next = reducer(&current, action);
                *cell.state.borrow_mut() = Rc::new(next);
                root.schedule_update_on_fiber(fiber, lane);
            }));
            ReducerCell {
                state: RefCell::new(Rc::new(initial)),
                reducer: RefCell::new(reducer),
                dispatch,
            }
        })
    }

    /// A state cell with a setter.
    pub fn use_state<S: 'static>(&mut self, init: impl FnOnce() -> S) -> (Rc<S>, SetState<S>) {
        let (state, dispatch) =
            self.use_reducer(|s: &S, action: StateAction<S>| action(s), init);
        (state, SetState(dispatch))
    }

    /// Memoizes `compute()` until `deps` change.
    ///
    /// With `deps` of `None` the value is recomputed on every render. With
    /// unchanged deps the previous `Rc` is returned as is.
    pub fn use_memo<T: 'static>(
        &mut self,
        compute: impl FnOnce() -> T,
        deps: Option<Vec<PropValue>>,
    ) -> Rc<T> {
        let deps: Option<Rc<[PropValue]>> = deps.map(Rc::from);
        match self.next_prev() {
            Some(Hook::Memo {
                value,
                deps: prev_deps,
            }) => {
                if deps_equal(deps.as_deref(), prev_deps.as_deref())
                    && let Ok(value) = value.clone().downcast::<T>()
                {
                    self.hooks.push(Hook::Memo {
                        value: value.clone(),
                        deps: prev_deps.clone(),
                    });
                    return value;
                }
            }
            Some(other) => self.mismatch("memo", other),
            None => {}
        }
        let value = Rc::new(compute());
        self.hooks.push(Hook::Memo {
            value: value.clone(),
            deps,
        });
        value
    }

    /// Memoizes a callback until `deps` change.
    pub fn use_callback<F: 'static>(&mut self, f: F, deps: Option<Vec<PropValue>>) -> Rc<F> {
        self.use_memo(move || f, deps)
    }

    /// A mutable box that lives as long as the component.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        match self.next_prev() {
            Some(Hook::Ref(any)) => {
                if let Ok(cell) = any.clone().downcast::<RefCell<T>>() {
                    self.hooks.push(Hook::Ref(cell.clone()));
                    return cell;
                }
                self.mismatch("ref of another type", &Hook::Ref(any.clone()));
            }
            Some(other) => self.mismatch("ref", other),
            None => {}
        }
        let cell = Rc::new(RefCell::new(init()));
        self.hooks.push(Hook::Ref(cell.clone()));
        cell
    }

    /// Runs `create` after the commit, in the deferred passive pass.
    pub fn use_effect(
        &mut self,
        create: impl FnOnce() -> EffectResult + 'static,
        deps: Option<Vec<PropValue>>,
    ) {
        self.push_effect(HookFlags::PASSIVE, FiberFlags::PASSIVE, Box::new(create), deps);
    }

    /// Runs `create` synchronously after host mutations are applied.
    pub fn use_layout_effect(
        &mut self,
        create: impl FnOnce() -> EffectResult + 'static,
        deps: Option<Vec<PropValue>>,
    ) {
        self.push_effect(HookFlags::LAYOUT, FiberFlags::UPDATE, Box::new(create), deps);
    }

    fn push_effect(
        &mut self,
        kind: HookFlags,
        fiber_flag: FiberFlags,
        create: Create,
        deps: Option<Vec<PropValue>>,
    ) {
        let deps: Option<Rc<[PropValue]>> = deps.map(Rc::from);
        let inst = match self.next_prev() {
            Some(Hook::Effect {
                inst,
                deps: prev_deps,
            }) => {
                if deps_equal(deps.as_deref(), prev_deps.as_deref()) {
                    self.ring.push(kind, None, deps.clone(), inst.clone());
                    self.hooks.push(Hook::Effect {
                        inst: inst.clone(),
                        deps,
                    });
                    return;
                }
                inst.clone()
            }
            Some(other) => {
                self.mismatch("effect", other);
                Rc::default()
            }
            None => Rc::default(),
        };
        self.flags |= fiber_flag;
        self.ring
            .push(kind | HookFlags::HAS_EFFECT, Some(create), deps.clone(), inst.clone());
        self.hooks.push(Hook::Effect { inst, deps });
    }

    /// Reads the nearest provided value of `ctx`, or its default.
    ///
    /// The component is re-rendered when that provider's value changes.
    pub fn use_context<T: 'static>(&mut self, ctx: &Context<T>) -> Rc<T> {
        let id = ctx.handle().id();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        match self.contexts.read(ctx.handle()).downcast::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::error!(
                    "`{}` read {id:?} but the provided value has another type",
                    self.component
                );
                ctx.default_value().clone()
            }
        }
    }

    /// A handle for starting transitions. The handle is stable across
    /// renders.
    pub fn use_transition(&mut self) -> StartTransition {
        let root = self.root.clone();
        let handle = self.use_memo(move || StartTransition { root }, Some(Vec::new()));
        (*handle).clone()
    }

    pub(crate) fn finish(self) -> RenderOutput {
        if let Some(prev) = self.prev
            && prev.len() != self.hooks.len()
        {
            log::error!(
                "`{}` rendered {} hooks, previous render had {}",
                self.component,
                self.hooks.len(),
                prev.len(),
            );
            debug_assert_eq!(
                prev.len(),
                self.hooks.len(),
                "hook count changed between renders"
            );
        }
        RenderOutput {
            hooks: self.hooks.into(),
            ring: (!self.ring.is_empty()).then(|| Rc::new(self.ring)),
            flags: self.flags,
            dependencies: self.dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        (log, move |s: &str| sink.borrow_mut().push(s.into()))
    }

    #[test]
    fn ring_iterates_in_push_order() {
        let mut ring = EffectRing::default();
        assert_eq!(ring.iter().count(), 0);
        for tag in [HookFlags::LAYOUT, HookFlags::PASSIVE, HookFlags::LAYOUT] {
            ring.push(tag, None, None, Rc::default());
        }
        let tags: Vec<_> = ring.iter().map(|e| e.tag).collect();
        assert_eq!(
            tags,
            vec![HookFlags::LAYOUT, HookFlags::PASSIVE, HookFlags::LAYOUT]
        );
        assert_eq!(ring.effects[ring.last].next, 0, "last links back to first");
    }

    #[test]
    fn mount_then_unmount_runs_cleanup() {
        let (log, push) = recorder();
        let mut ring = EffectRing::default();
        let p = push.clone();
        ring.push(
            HookFlags::LAYOUT | HookFlags::HAS_EFFECT,
            Some(Box::new(move || -> EffectResult {
                p("create");
                let p = p.clone();
                Ok(Some(Box::new(move || p("destroy")) as Destroy))
            })),
            None,
            Rc::default(),
        );
        ring.push(
            HookFlags::PASSIVE | HookFlags::HAS_EFFECT,
            Some(Box::new(move || -> EffectResult {
                push("passive");
                Ok(None)
            })),
            None,
            Rc::default(),
        );

        ring.mount(HookFlags::LAYOUT | HookFlags::HAS_EFFECT, |_| Ok(()))
            .unwrap();
        assert_eq!(*log.borrow(), vec![String::from("create")]);

        ring.unmount(HookFlags::LAYOUT);
        ring.unmount(HookFlags::LAYOUT);
        assert_eq!(
            *log.borrow(),
            vec![String::from("create"), String::from("destroy")],
            "cleanup runs once"
        );
    }

    #[test]
    fn mount_reports_failures_and_continues() {
        let mut ring = EffectRing::default();
        let ran = Rc::new(RefCell::new(0));
        ring.push(
            HookFlags::PASSIVE | HookFlags::HAS_EFFECT,
            Some(Box::new(|| -> EffectResult { Err(EffectError::new("first")) })),
            None,
            Rc::default(),
        );
        let r = ran.clone();
        ring.push(
            HookFlags::PASSIVE | HookFlags::HAS_EFFECT,
            Some(Box::new(move || -> EffectResult {
                *r.borrow_mut() += 1;
                Ok(None)
            })),
            None,
            Rc::default(),
        );
        let mut errors = Vec::new();
        ring.mount(HookFlags::PASSIVE | HookFlags::HAS_EFFECT, |e| {
            errors.push(e);
            Ok(())
        })
        .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(*ran.borrow(), 1);
    }

    #[test]
    fn mount_stops_when_report_fails() {
        let mut ring = EffectRing::default();
        let ran = Rc::new(RefCell::new(false));
        ring.push(
            HookFlags::LAYOUT | HookFlags::HAS_EFFECT,
            Some(Box::new(|| -> EffectResult { Err(EffectError::new("boom")) })),
            None,
            Rc::default(),
        );
        let r = ran.clone();
        ring.push(
            HookFlags::LAYOUT | HookFlags::HAS_EFFECT,
            Some(Box::new(move || -> EffectResult {
                *r.borrow_mut() = true;
                Ok(None)
            })),
            None,
            Rc::default(),
        );
        let result = ring.mount(HookFlags::LAYOUT | HookFlags::HAS_EFFECT, |e| {
            Err(ReconcileError::Effect(e))
        });
        assert!(matches!(result, Err(ReconcileError::Effect(_))));
        assert!(!*ran.borrow());
    }

    #[test]
    fn effects_without_has_effect_are_skipped() {
        let mut ring = EffectRing::default();
        ring.push(
            HookFlags::PASSIVE,
            Some(Box::new(|| -> EffectResult { panic!("must not run") })),
            None,
            Rc::default(),
        );
        ring.mount(HookFlags::PASSIVE | HookFlags::HAS_EFFECT, |_| Ok(()))
            .unwrap();
        assert_eq!(ring.instances(HookFlags::PASSIVE).count(), 1);
    }

    #[test]
    fn deps_compare_with_object_is() {
        let a = [PropValue::Int(1), PropValue::from("x")];
        let b = [PropValue::Float(1.0), PropValue::from("x")];
        assert!(deps_equal(Some(&a), Some(&b)));
        assert!(!deps_equal(Some(&a), Some(&a[..1])));
        assert!(!deps_equal(None, None), "absent deps always differ");
        assert!(deps_equal(Some(&[]), Some(&[])));
        let nan = [PropValue::Float(f64::NAN)];
        assert!(deps_equal(Some(&nan), Some(&nan)));
    }
}
