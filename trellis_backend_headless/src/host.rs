// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory host tree.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use trellis_core::element::{Listener, PropValue, Props};
use trellis_core::host::{HostHandle, HostRenderer};

/// One call made by the reconciler, in the order it arrived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    /// An element node was created.
    CreateElement {
        /// The new node.
        node: HostHandle,
        /// Its tag.
        tag: String,
    },
    /// A text node was created.
    CreateText {
        /// The new node.
        node: HostHandle,
        /// Its initial text.
        text: String,
    },
    /// A property was set. `value` is `None` for removals and listeners.
    SetProperty {
        /// The node.
        node: HostHandle,
        /// Property name.
        key: String,
        /// Text form of the new value.
        value: Option<String>,
    },
    /// A node's content was replaced with text.
    SetText {
        /// The node.
        node: HostHandle,
        /// The new text.
        text: String,
    },
    /// `child` was appended to `parent`.
    Append {
        /// The parent.
        parent: HostHandle,
        /// The appended node.
        child: HostHandle,
    },
    /// `child` was inserted before `before`.
    InsertBefore {
        /// The parent.
        parent: HostHandle,
        /// The inserted node.
        child: HostHandle,
        /// The reference sibling.
        before: HostHandle,
    },
    /// `child` was detached from `parent`.
    Remove {
        /// The parent.
        parent: HostHandle,
        /// The removed node.
        child: HostHandle,
    },
    /// A node's storage was released.
    Release {
        /// The released node.
        node: HostHandle,
    },
}

#[derive(Debug)]
enum NodeKind {
    Container,
    Element {
        tag: String,
        props: BTreeMap<String, PropValue>,
    },
    Text,
}

#[derive(Debug)]
struct HostNode {
    kind: NodeKind,
    text: String,
    children: Vec<HostHandle>,
    parent: Option<HostHandle>,
}

impl HostNode {
    fn new(kind: NodeKind, text: String) -> Self {
        Self {
            kind,
            text,
            children: Vec::new(),
            parent: None,
        }
    }
}

/// An in-memory [`HostRenderer`].
///
/// Nodes live in a slot vector; released slots are reused. Every call is
/// appended to an operation log ([`ops`](Self::ops)) so tests can assert on
/// exactly what the reconciler did. Invalid handles are logged and ignored.
#[derive(Debug, Default)]
pub struct HeadlessHost {
    nodes: Vec<Option<HostNode>>,
    free: Vec<u32>,
    ops: Vec<HostOp>,
    created: u64,
}

impl HeadlessHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a container node to mount a root into.
    pub fn create_container(&mut self) -> HostHandle {
        self.alloc(HostNode::new(NodeKind::Container, String::new()))
    }

    fn alloc(&mut self, node: HostNode) -> HostHandle {
        self.created += 1;
        if let Some(slot) = self.free.pop() {
            self.nodes[slot as usize] = Some(node);
            return HostHandle(slot);
        }
        let slot = u32::try_from(self.nodes.len()).unwrap_or(u32::MAX);
        self.nodes.push(Some(node));
        HostHandle(slot)
    }

    fn node(&self, handle: HostHandle) -> Option<&HostNode> {
        self.nodes.get(handle.0 as usize).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, handle: HostHandle) -> Option<&mut HostNode> {
        let node = self.nodes.get_mut(handle.0 as usize).and_then(Option::as_mut);
        if node.is_none() {
            log::error!("headless host: {handle:?} is not a live node");
        }
        node
    }

    fn detach(&mut self, child: HostHandle) {
        let Some(parent) = self.node_mut(child).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|c| *c != child);
        }
    }

    // -- Inspection --

    /// The operation log.
    #[must_use]
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    /// Drains the operation log.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Number of nodes created over the host's lifetime, containers included.
    #[must_use]
    pub fn created_count(&self) -> u64 {
        self.created
    }

    /// Number of nodes currently allocated.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// The children of a node, in order.
    #[must_use]
    pub fn children(&self, node: HostHandle) -> &[HostHandle] {
        self.node(node).map(|n| n.children.as_slice()).unwrap_or_default()
    }

    /// The parent of an attached node.
    #[must_use]
    pub fn parent(&self, node: HostHandle) -> Option<HostHandle> {
        self.node(node).and_then(|n| n.parent)
    }

    /// The tag of an element node.
    #[must_use]
    pub fn tag(&self, node: HostHandle) -> Option<&str> {
        match &self.node(node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.as_str()),
            _ => None,
        }
    }

    /// The text of a text node, or the text content set on an element.
    #[must_use]
    pub fn text(&self, node: HostHandle) -> Option<&str> {
        self.node(node).map(|n| n.text.as_str())
    }

    /// A property of an element node.
    #[must_use]
    pub fn property(&self, node: HostHandle, key: &str) -> Option<&PropValue> {
        match &self.node(node)?.kind {
            NodeKind::Element { props, .. } => props.get(key),
            _ => None,
        }
    }

    /// Finds the first element with `tag` in document order below `from`.
    #[must_use]
    pub fn find_by_tag(&self, from: HostHandle, tag: &str) -> Option<HostHandle> {
        for &child in self.children(from) {
            if self.tag(child) == Some(tag) {
                return Some(child);
            }
            if let Some(found) = self.find_by_tag(child, tag) {
                return Some(found);
            }
        }
        None
    }

    /// Markup of a node's children.
    #[must_use]
    pub fn inner_markup(&self, node: HostHandle) -> String {
        let mut out = String::new();
        for &child in self.children(node) {
            self.write_markup(child, &mut out);
        }
        out
    }

    /// Markup of a node and its subtree.
    #[must_use]
    pub fn markup(&self, node: HostHandle) -> String {
        let mut out = String::new();
        self.write_markup(node, &mut out);
        out
    }

    fn write_markup(&self, handle: HostHandle, out: &mut String) {
        let Some(node) = self.node(handle) else {
            return;
        };
        let tag = match &node.kind {
            NodeKind::Text => {
                escape_into(&node.text, out);
                return;
            }
            NodeKind::Container => "root",
            NodeKind::Element { tag, .. } => tag.as_str(),
        };
        out.push('<');
        out.push_str(tag);
        if let NodeKind::Element { props, .. } = &node.kind {
            for (key, value) in props {
                write_attribute(key, value, out);
            }
        }
        out.push('>');
        escape_into(&node.text, out);
        for &child in &node.children {
            self.write_markup(child, out);
        }
        let _ = write!(out, "</{tag}>");
    }

    /// Listeners for `event` on `node` and its ancestors, innermost first.
    #[must_use]
    pub fn listeners(&self, node: HostHandle, event: &str) -> Vec<Listener> {
        let mut found = Vec::new();
        let mut cursor = Some(node);
        while let Some(handle) = cursor {
            let Some(n) = self.node(handle) else {
                break;
            };
            if let NodeKind::Element { props, .. } = &n.kind
                && let Some(PropValue::Callback(listener)) = props.get(event)
            {
                found.push(listener.clone());
            }
            cursor = n.parent;
        }
        found
    }
}

/// Fires `event` at `node`, bubbling through its ancestors.
///
/// Listeners are collected first and called after the host borrow is
/// released, so they may dispatch updates or flush the root. Returns the
/// number of listeners that ran.
pub fn dispatch_event<E: 'static>(
    host: &RefCell<HeadlessHost>,
    node: HostHandle,
    event: &str,
    payload: &E,
) -> usize {
    let listeners = host.borrow().listeners(node, event);
    for listener in &listeners {
        listener.call(payload);
    }
    listeners.len()
}

fn write_attribute(key: &str, value: &PropValue, out: &mut String) {
    match value {
        PropValue::Null | PropValue::Bool(false) | PropValue::Callback(_) | PropValue::Any(_) => {}
        PropValue::Bool(true) => {
            let _ = write!(out, " {key}");
        }
        other => {
            let _ = write!(out, " {key}=\"");
            escape_into(&other.to_text().unwrap_or_default(), out);
            out.push('"');
        }
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

impl HostRenderer for HeadlessHost {
    fn create_instance(&mut self, tag: &str, _props: &Props) -> HostHandle {
        let node = self.alloc(HostNode::new(
            NodeKind::Element {
                tag: tag.into(),
                props: BTreeMap::new(),
            },
            String::new(),
        ));
        self.ops.push(HostOp::CreateElement {
            node,
            tag: tag.into(),
        });
        node
    }

    fn create_text_instance(&mut self, text: &str) -> HostHandle {
        let node = self.alloc(HostNode::new(NodeKind::Text, text.into()));
        self.ops.push(HostOp::CreateText {
            node,
            text: text.into(),
        });
        node
    }

    fn set_property(&mut self, node: HostHandle, key: &str, value: &PropValue) {
        if let Some(NodeKind::Element { props, .. }) = self.node_mut(node).map(|n| &mut n.kind) {
            if matches!(value, PropValue::Null) {
                props.remove(key);
            } else {
                props.insert(key.into(), value.clone());
            }
        }
        let value = match value {
            PropValue::Null => None,
            other => other.to_text(),
        };
        self.ops.push(HostOp::SetProperty {
            node,
            key: key.into(),
            value,
        });
    }

    fn set_text_content(&mut self, node: HostHandle, text: &str) {
        let mut orphans = Vec::new();
        if let Some(n) = self.node_mut(node) {
            n.text = text.into();
            if !matches!(n.kind, NodeKind::Text) {
                orphans = std::mem::take(&mut n.children);
            }
        }
        for child in orphans {
            if let Some(c) = self.node_mut(child) {
                c.parent = None;
            }
        }
        self.ops.push(HostOp::SetText {
            node,
            text: text.into(),
        });
    }

    fn append_child(&mut self, parent: HostHandle, child: HostHandle) {
        self.detach(child);
        if let Some(p) = self.node_mut(parent) {
            p.children.push(child);
            if let Some(c) = self.node_mut(child) {
                c.parent = Some(parent);
            }
        }
        self.ops.push(HostOp::Append { parent, child });
    }

    fn insert_before(&mut self, parent: HostHandle, child: HostHandle, before: HostHandle) {
        self.detach(child);
        if let Some(p) = self.node_mut(parent) {
            let at = p
                .children
                .iter()
                .position(|c| *c == before)
                .unwrap_or(p.children.len());
            p.children.insert(at, child);
            if let Some(c) = self.node_mut(child) {
                c.parent = Some(parent);
            }
        }
        self.ops.push(HostOp::InsertBefore {
            parent,
            child,
            before,
        });
    }

    fn remove_child(&mut self, parent: HostHandle, child: HostHandle) {
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|c| *c != child);
        }
        if let Some(c) = self.node_mut(child) {
            c.parent = None;
        }
        self.ops.push(HostOp::Remove { parent, child });
    }

    fn release_instance(&mut self, node: HostHandle) {
        if let Some(slot) = self.nodes.get_mut(node.0 as usize)
            && slot.take().is_some()
        {
            self.free.push(node.0);
        }
        self.ops.push(HostOp::Release { node });
    }
}
