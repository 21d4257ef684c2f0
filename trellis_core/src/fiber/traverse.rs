// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Sibling-list iteration.

use super::id::{FiberId, INVALID};
use super::store::FiberStore;

/// An iterator over the direct children of a fiber.
///
/// Created by [`FiberStore::children`].
#[derive(Debug)]
pub struct Children<'a> {
    store: &'a FiberStore,
    current: u32,
}

impl<'a> Children<'a> {
    pub(crate) fn new(store: &'a FiberStore, first: u32) -> Self {
        Self {
            store,
            current: first,
        }
    }

    /// Switches to yielding raw slot indices.
    pub(crate) fn indices(self) -> ChildIndices<'a> {
        ChildIndices {
            store: self.store,
            current: self.current,
        }
    }
}

impl Iterator for Children<'_> {
    type Item = FiberId;

    fn next(&mut self) -> Option<FiberId> {
        if self.current == INVALID {
            return None;
        }
        let idx = self.current;
        self.current = self.store.sibling[idx as usize];
        Some(self.store.id_of(idx))
    }
}

/// Like [`Children`], but yields slot indices.
#[derive(Debug)]
pub(crate) struct ChildIndices<'a> {
    store: &'a FiberStore,
    current: u32,
}

impl Iterator for ChildIndices<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.current == INVALID {
            return None;
        }
        let idx = self.current;
        self.current = self.store.sibling[idx as usize];
        Some(idx)
    }
}
