// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host contract for platform integrations.
//!
//! The reconciler never touches a platform tree directly. It drives a
//! [`HostRenderer`], which owns the real nodes (DOM elements, an in-memory
//! tree, native views) and hands back opaque [`HostHandle`]s.
//!
//! Two kinds of calls arrive, at different times:
//!
//! - **Creation** during the render phase: [`create_instance`],
//!   [`create_text_instance`], the initial [`set_property`] /
//!   [`set_text_content`] calls, and [`append_child`] to assemble a detached
//!   subtree bottom-up. Nothing created here is visible yet.
//! - **Mutation** during the commit: [`insert_before`], [`append_child`] and
//!   [`remove_child`] against attached parents, and property or text updates
//!   on existing nodes.
//!
//! Backends live in their own crates (`trellis_backend_headless`,
//! `trellis_backend_web`) and are wired together with a
//! [`Root`](crate::root::Root) by application code.
//!
//! [`create_instance`]: HostRenderer::create_instance
//! [`create_text_instance`]: HostRenderer::create_text_instance
//! [`set_property`]: HostRenderer::set_property
//! [`set_text_content`]: HostRenderer::set_text_content
//! [`append_child`]: HostRenderer::append_child
//! [`insert_before`]: HostRenderer::insert_before
//! [`remove_child`]: HostRenderer::remove_child

use core::fmt;

use crate::element::{PropValue, Props};

/// Opaque handle to a node owned by a [`HostRenderer`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostHandle(pub u32);

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostHandle({})", self.0)
    }
}

/// Creates and mutates platform nodes on behalf of the reconciler.
///
/// Both DOM-based and in-memory hosts implement this trait, enabling generic
/// roots and test doubles.
pub trait HostRenderer {
    /// Creates a detached element node for `tag`.
    ///
    /// `props` are passed for hosts that need them at creation time; the
    /// reconciler follows up with [`set_property`](Self::set_property) for
    /// every attribute.
    fn create_instance(&mut self, tag: &str, props: &Props) -> HostHandle;

    /// Creates a detached text node.
    fn create_text_instance(&mut self, text: &str) -> HostHandle;

    /// Sets (or, for [`PropValue::Null`], removes) a property.
    fn set_property(&mut self, node: HostHandle, key: &str, value: &PropValue);

    /// Replaces a node's content with text. Used for text nodes and for
    /// elements whose only child is text.
    fn set_text_content(&mut self, node: HostHandle, text: &str);

    /// Appends `child` as the last child of `parent`, moving it if it is
    /// already attached.
    fn append_child(&mut self, parent: HostHandle, child: HostHandle);

    /// Inserts `child` before `before` under `parent`, moving it if it is
    /// already attached.
    fn insert_before(&mut self, parent: HostHandle, child: HostHandle, before: HostHandle);

    /// Detaches `child` from `parent`.
    fn remove_child(&mut self, parent: HostHandle, child: HostHandle);

    /// Called once for every host node of a deleted subtree after it has been
    /// detached. Hosts that keep per-node storage can free it here.
    fn release_instance(&mut self, node: HostHandle) {
        _ = node;
    }
}
