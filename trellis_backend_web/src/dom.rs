// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! DOM host renderer.
//!
//! [`DomHost`] owns the DOM nodes the reconciler creates and addresses them by
//! slot index. Props named `onXxx` holding a listener become `xxx` event
//! listeners; every other prop becomes an attribute, except `innerHTML` and
//! `className`, which map to their DOM properties.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use trellis_core::element::{PropValue, Props};
use trellis_core::host::{HostHandle, HostRenderer};
use wasm_bindgen::JsCast as _;
use wasm_bindgen::JsValue;
use wasm_bindgen::closure::Closure;
use web_sys::{Document, Element, Event, Node};

type ListenerClosure = Closure<dyn FnMut(Event)>;

struct Slot {
    node: Node,
    listeners: Vec<(String, ListenerClosure)>,
}

/// Maps [`HostHandle`]s to live DOM nodes.
///
/// Create one per document, register the mount point with
/// [`mount`](Self::mount), and share it with a
/// [`Root`](trellis_core::root::Root) as `Rc<RefCell<DomHost>>`. DOM
/// exceptions are logged and the operation is skipped.
pub struct DomHost {
    document: Document,
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
}

impl core::fmt::Debug for DomHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DomHost")
            .field("slots", &self.slots.len())
            .field("free", &self.free.len())
            .finish_non_exhaustive()
    }
}

impl DomHost {
    /// Creates a host that creates nodes in `document`.
    #[must_use]
    pub fn new(document: Document) -> Self {
        Self {
            document,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Creates a host for the current window's document, if there is one.
    #[must_use]
    pub fn for_window() -> Option<Self> {
        let document = web_sys::window()?.document()?;
        Some(Self::new(document))
    }

    /// Registers an existing element as a container and returns its handle.
    pub fn mount(&mut self, container: Element) -> HostHandle {
        self.alloc(container.into())
    }

    /// The DOM node behind a handle.
    #[must_use]
    pub fn node(&self, handle: HostHandle) -> Option<&Node> {
        self.slot(handle).map(|s| &s.node)
    }

    fn alloc(&mut self, node: Node) -> HostHandle {
        let slot = Slot {
            node,
            listeners: Vec::new(),
        };
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(slot);
            return HostHandle(index);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Some(slot));
        HostHandle(index)
    }

    fn slot(&self, handle: HostHandle) -> Option<&Slot> {
        let slot = self.slots.get(handle.0 as usize).and_then(Option::as_ref);
        if slot.is_none() {
            log::error!("DOM host: {handle:?} is not a live node");
        }
        slot
    }

    fn element(&self, handle: HostHandle) -> Option<&Element> {
        self.slot(handle)?.node.dyn_ref::<Element>()
    }

    fn set_listener(&mut self, handle: HostHandle, key: &str, value: &PropValue) {
        let event = event_name(key);
        let Some(slot) = self.slots.get_mut(handle.0 as usize).and_then(Option::as_mut) else {
            return;
        };
        if let Some(at) = slot.listeners.iter().position(|(name, _)| *name == event) {
            let (_, old) = slot.listeners.swap_remove(at);
            report(
                slot.node
                    .remove_event_listener_with_callback(&event, old.as_ref().unchecked_ref()),
            );
        }
        let PropValue::Callback(listener) = value else {
            return;
        };
        let listener = listener.clone();
        let closure = Closure::wrap(Box::new(move |event: Event| {
            listener.call(&event);
        }) as Box<dyn FnMut(Event)>);
        report(
            slot.node
                .add_event_listener_with_callback(&event, closure.as_ref().unchecked_ref()),
        );
        slot.listeners.push((event, closure));
    }
}

/// `onClick` → `click`.
fn event_name(key: &str) -> String {
    key.strip_prefix("on").unwrap_or(key).to_ascii_lowercase()
}

fn is_event_key(key: &str) -> bool {
    key.len() > 2 && key.starts_with("on") && key.as_bytes()[2].is_ascii_uppercase()
}

fn report<T>(result: Result<T, JsValue>) {
    if let Err(err) = result {
        log::error!("DOM operation failed: {err:?}");
    }
}

impl HostRenderer for DomHost {
    fn create_instance(&mut self, tag: &str, _props: &Props) -> HostHandle {
        let node: Node = match self.document.create_element(tag) {
            Ok(element) => element.into(),
            Err(err) => {
                log::error!("cannot create <{tag}>: {err:?}");
                self.document.create_text_node("").into()
            }
        };
        self.alloc(node)
    }

    fn create_text_instance(&mut self, text: &str) -> HostHandle {
        let node = self.document.create_text_node(text);
        self.alloc(node.into())
    }

    fn set_property(&mut self, node: HostHandle, key: &str, value: &PropValue) {
        if is_event_key(key) {
            self.set_listener(node, key, value);
            return;
        }
        let Some(element) = self.element(node) else {
            return;
        };
        let text = match value {
            PropValue::Null | PropValue::Bool(false) => None,
            PropValue::Bool(true) => Some(String::new()),
            PropValue::Callback(_) | PropValue::Any(_) => {
                log::warn!("DOM host: prop `{key}` holds a value with no DOM form");
                return;
            }
            other => other.to_text(),
        };
        match (key, text) {
            ("innerHTML", text) => element.set_inner_html(text.as_deref().unwrap_or("")),
            ("className", text) => element.set_class_name(text.as_deref().unwrap_or("")),
            (_, Some(text)) => report(element.set_attribute(key, &text)),
            (_, None) => report(element.remove_attribute(key)),
        }
    }

    fn set_text_content(&mut self, node: HostHandle, text: &str) {
        if let Some(slot) = self.slot(node) {
            slot.node.set_text_content(Some(text));
        }
    }

    fn append_child(&mut self, parent: HostHandle, child: HostHandle) {
        if let (Some(p), Some(c)) = (self.slot(parent), self.slot(child)) {
            report(p.node.append_child(&c.node));
        }
    }

    fn insert_before(&mut self, parent: HostHandle, child: HostHandle, before: HostHandle) {
        let slots = (self.slot(parent), self.slot(child), self.slot(before));
        if let (Some(p), Some(c), Some(b)) = slots {
            report(p.node.insert_before(&c.node, Some(&b.node)));
        }
    }

    fn remove_child(&mut self, parent: HostHandle, child: HostHandle) {
        if let (Some(p), Some(c)) = (self.slot(parent), self.slot(child)) {
            report(p.node.remove_child(&c.node));
        }
    }

    fn release_instance(&mut self, node: HostHandle) {
        let Some(slot) = self.slots.get_mut(node.0 as usize).and_then(Option::take) else {
            return;
        };
        for (event, closure) in &slot.listeners {
            report(
                slot.node
                    .remove_event_listener_with_callback(event, closure.as_ref().unchecked_ref()),
            );
        }
        self.free.push(node.0);
    }
}
