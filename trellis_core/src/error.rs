// Copyright 2026 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.
//!
//! Structural problems (a placement with no host ancestor, a consumer without
//! a render prop) surface as [`ReconcileError`] from the pass that hit them.
//! Effect bodies report failure through [`EffectError`]; whether a failed
//! effect stops the commit is decided by
//! [`EffectFailurePolicy`](crate::root::EffectFailurePolicy). Scheduler tasks
//! fail with [`TaskError`], which the scheduler logs and keeps for the
//! embedder without stopping the drain loop.

use alloc::string::String;

use crate::fiber::FiberId;

/// A failure raised while rendering or committing a tree.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A placed or deleted fiber has no host ancestor to attach to.
    #[error("expected to find a host parent above {0:?}")]
    MissingHostParent(FiberId),
    /// A prop that must be a listener holds something else.
    #[error("prop `{prop}` is not callable (found {found})")]
    NotCallable {
        /// The prop name.
        prop: String,
        /// Debug rendering of the value found instead.
        found: String,
    },
    /// A context consumer was rendered without a render prop.
    #[error("context consumer has no render prop")]
    MissingRenderProp,
    /// An effect failed and the root is configured to abort.
    #[error(transparent)]
    Effect(#[from] EffectError),
    /// A render or commit was requested while one was already running.
    #[error("root is already rendering")]
    RootBusy,
}

/// A failed effect body.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("effect in `{component}` failed: {message}")]
pub struct EffectError {
    /// Name of the component that owns the effect. Filled in by the commit.
    pub component: String,
    /// What went wrong.
    pub message: String,
}

impl EffectError {
    /// Creates an error with a message. The component name is attached when
    /// the commit records the failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            component: String::new(),
            message: message.into(),
        }
    }

    pub(crate) fn in_component(mut self, name: &str) -> Self {
        if self.component.is_empty() {
            self.component = name.into();
        }
        self
    }
}

/// A failed scheduler task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// A render or commit failed.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    /// Any other failure reported by a task callback.
    #[error("task failed: {0}")]
    Failed(String),
}
