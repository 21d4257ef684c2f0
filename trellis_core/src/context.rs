// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Context values and the provider stack.
//!
//! A [`Context`] is a typed handle with a default value. Providers push a
//! value for their subtree when the work loop enters them and pop it when it
//! leaves, so the [`ContextStack`] only stays consistent if pushes and pops
//! nest exactly like the depth-first walk. Each render pass owns its own
//! stack; nothing here is global.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::element::{ContextValue, ElementBuilder, ElementType, Node, PropValue};

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Unique identity of a context object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u32);

/// Type-erased context: identity plus default value.
#[derive(Clone)]
pub struct ContextHandle {
    id: ContextId,
    default: ContextValue,
}

impl ContextHandle {
    /// The context's identity.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The value read when no provider is above the reader.
    #[must_use]
    pub fn default_value(&self) -> &ContextValue {
        &self.default
    }
}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A typed context.
pub struct Context<T> {
    handle: ContextHandle,
    default: Rc<T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            default: self.default.clone(),
        }
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context({:?})", self.handle.id)
    }
}

impl<T: 'static> Context<T> {
    /// Creates a new context with a default value.
    #[must_use]
    pub fn new(default: T) -> Self {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        let default = Rc::new(default);
        let erased: ContextValue = default.clone();
        Self {
            handle: ContextHandle {
                id,
                default: erased,
            },
            default,
        }
    }

    /// The typed default value.
    #[must_use]
    pub fn default_value(&self) -> &Rc<T> {
        &self.default
    }

    /// The type-erased handle.
    #[must_use]
    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    /// Starts a provider element for `value`.
    #[must_use]
    pub fn provider(&self, value: T) -> ElementBuilder {
        self.provider_rc(Rc::new(value))
    }

    /// Starts a provider element for a shared value.
    ///
    /// Consumers below are only re-rendered when the provided `Rc` changes,
    /// so passing the same `Rc` across renders avoids needless updates.
    #[must_use]
    pub fn provider_rc(&self, value: Rc<T>) -> ElementBuilder {
        let value: ContextValue = value;
        ElementBuilder::new(ElementType::Provider(self.handle.clone()))
            .attr("value", PropValue::Any(value))
    }

    /// Starts a consumer element whose children are `render(value)`.
    #[must_use]
    pub fn consumer(&self, render: impl Fn(&T) -> Node + 'static) -> ElementBuilder {
        ElementBuilder::new(ElementType::Consumer(self.handle.clone())).render(move |value| {
            value.downcast_ref::<T>().map_or(Node::Empty, &render)
        })
    }
}

/// Saved-value stack for context providers.
#[derive(Default)]
pub struct ContextStack {
    current: BTreeMap<ContextId, ContextValue>,
    saved: Vec<(ContextId, Option<ContextValue>)>,
}

impl fmt::Debug for ContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStack")
            .field("depth", &self.saved.len())
            .finish_non_exhaustive()
    }
}

impl ContextStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `value` current for `ctx`, saving the previous value.
    pub fn push_provider(&mut self, ctx: ContextId, value: ContextValue) {
        let previous = self.current.insert(ctx, value);
        self.saved.push((ctx, previous));
    }

    /// Restores the value `ctx` had before the matching push.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the top of the stack belongs to a different
    /// context (unbalanced push/pop).
    pub fn pop_provider(&mut self, ctx: ContextId) {
        let Some((top, previous)) = self.saved.pop() else {
            debug_assert!(false, "pop_provider({ctx:?}) on an empty context stack");
            return;
        };
        debug_assert_eq!(top, ctx, "unbalanced context push/pop");
        match previous {
            Some(v) => {
                self.current.insert(top, v);
            }
            None => {
                self.current.remove(&top);
            }
        }
    }

    /// Reads the current value of a context, or its default.
    #[must_use]
    pub fn read(&self, ctx: &ContextHandle) -> ContextValue {
        self.current
            .get(&ctx.id)
            .cloned()
            .unwrap_or_else(|| ctx.default.clone())
    }

    /// Number of active providers.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}
