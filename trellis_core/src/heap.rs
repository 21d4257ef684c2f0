// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binary min-heap keyed by `(sort_index, id)`.

use alloc::vec::Vec;
use core::cmp::Ordering;

/// An entry that can live in a [`MinHeap`].
pub trait HeapNode {
    /// Primary ordering key; smaller pops first.
    fn sort_index(&self) -> u64;
    /// Tie-breaker; smaller (earlier) pops first.
    fn id(&self) -> u64;
}

/// A binary min-heap ordered by [`HeapNode::sort_index`], then
/// [`HeapNode::id`].
///
/// Entries with equal sort indices pop in id order, which gives FIFO
/// behavior when ids are assigned in creation order.
#[derive(Debug)]
pub struct MinHeap<T> {
    nodes: Vec<T>,
}

impl<T> Default for MinHeap<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T: HeapNode> MinHeap<T> {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the heap has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the smallest entry without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.nodes.first()
    }

    /// Inserts an entry.
    pub fn push(&mut self, node: T) {
        self.nodes.push(node);
        self.sift_up(self.nodes.len() - 1);
    }

    /// Removes and returns the smallest entry.
    pub fn pop(&mut self) -> Option<T> {
        if self.nodes.is_empty() {
            return None;
        }
        let first = self.nodes.swap_remove(0);
        if !self.nodes.is_empty() {
            self.sift_down(0);
        }
        Some(first)
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if compare(&self.nodes[parent], &self.nodes[i]) == Ordering::Greater {
                self.nodes.swap(parent, i);
                i = parent;
            } else {
                return;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.nodes.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut smallest = i;
            if left < len && compare(&self.nodes[left], &self.nodes[smallest]) == Ordering::Less {
                smallest = left;
            }
            if right < len && compare(&self.nodes[right], &self.nodes[smallest]) == Ordering::Less
            {
                smallest = right;
            }
            if smallest == i {
                return;
            }
            self.nodes.swap(i, smallest);
            i = smallest;
        }
    }
}

fn compare<T: HeapNode>(a: &T, b: &T) -> Ordering {
    a.sort_index()
        .cmp(&b.sort_index())
        .then_with(|| a.id().cmp(&b.id()))
}
