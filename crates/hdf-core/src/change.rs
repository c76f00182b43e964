// SPDX-License-Identifier: Apache-2.0
//! Deferred change requests: a single-threaded cooperative task queue.
//!
//! Mode switches and nested-context schedule recomputation must not run
//! inside a firing — they would mutate rates while the engine is
//! mid-traversal of the current schedule. Instead the coordinators enqueue
//! a named closure through [`ChangeContext::request_change`]; the host
//! engine drains the queue at iteration boundaries, executing each request
//! exactly once before the next `get_schedule` call. This is an event-queue
//! pattern, not threading: "at most one pending transition" is enforced by
//! a boolean in [`crate::modal::ModeCoordinator`], not by a lock.

use std::fmt;

use thiserror::Error;

use crate::balance::SchedulingError;
use crate::graph::GraphError;
use crate::guard::GuardError;
use crate::modal::TransitionError;

/// Failure raised while executing a queued change request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeError {
    /// Graph mutation failed (stale handle, wrong port kind).
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Transition commitment failed.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Guard evaluation failed inside a deferred action.
    #[error(transparent)]
    Guard(#[from] GuardError),
    /// Deferred schedule recomputation failed.
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

/// A named, non-persistent deferred mutation of the host's model `M`.
pub struct ChangeRequest<M> {
    name: &'static str,
    apply: Box<dyn FnOnce(&mut M) -> Result<(), ChangeError>>,
}

impl<M> ChangeRequest<M> {
    /// Wraps a closure with a diagnostic name.
    pub fn new(
        name: &'static str,
        apply: impl FnOnce(&mut M) -> Result<(), ChangeError> + 'static,
    ) -> Self {
        Self {
            name,
            apply: Box::new(apply),
        }
    }

    /// Diagnostic name of the request.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Consumes the request, applying it to the model.
    pub fn execute(self, model: &mut M) -> Result<(), ChangeError> {
        (self.apply)(model)
    }
}

impl<M> fmt::Debug for ChangeRequest<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRequest")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The enqueue seam offered to coordinators by the execution manager.
pub trait ChangeContext<M> {
    /// Queues `request` for execution at the next safe point.
    fn request_change(&mut self, request: ChangeRequest<M>);
}

/// FIFO of pending change requests, drained by the host loop.
#[derive(Debug, Default)]
pub struct ChangeQueue<M> {
    pending: Vec<ChangeRequest<M>>,
}

impl<M> ChangeQueue<M> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Number of queued requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Executes every queued request against `model`, in enqueue order.
    ///
    /// Requests enqueued by an executing request run in the same drain, so
    /// the queue is empty when this returns. The first failure aborts the
    /// drain, dropping the remaining requests (fatal errors halt the run).
    pub fn drain(&mut self, model: &mut M) -> Result<(), ChangeError> {
        while !self.pending.is_empty() {
            let batch: Vec<_> = self.pending.drain(..).collect();
            for request in batch {
                request.execute(model)?;
            }
        }
        Ok(())
    }
}

impl<M> ChangeContext<M> for ChangeQueue<M> {
    fn request_change(&mut self, request: ChangeRequest<M>) {
        self.pending.push(request);
    }
}
