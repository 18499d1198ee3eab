// SPDX-License-Identifier: MIT OR Apache-2.0
//! Concurrent wait over a set of operations that share one cancellation
//! scope.
//!
//! [`Harvest::join`] cancels every sibling as soon as one operation fails,
//! keeps polling until each has finished unwinding, and only then returns the
//! first error. [`Harvest::join_settled`] never cancels early and returns one
//! slot per operation.
//!
//! Operations are polled inside the caller's task; nothing is spawned. When
//! `join` returns, no operation is left pending. If the `join` future itself
//! is dropped, every operation is dropped with it.
//!
//! Operations must watch the [`CancelToken`] they are handed. One that
//! ignores it keeps `join` waiting for as long as it runs.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use pw_cancel::{CancelReason, CancelToken};
use pw_error::{Classify, ErrorKind};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors returned by [`Harvest`].
#[derive(Debug, Error)]
pub enum HarvestError<E> {
    /// The first operation error. Every sibling was cancelled and drained
    /// before this was returned.
    #[error("{0}")]
    Failed(E),

    /// The deadline elapsed before all operations finished.
    #[error("deadline of {0:?} elapsed")]
    Timeout(Duration),

    /// The enclosing scope was cancelled from outside.
    #[error("harvest scope was cancelled")]
    Cancelled,
}

impl<E> HarvestError<E> {
    /// The operation error, if this is [`HarvestError::Failed`].
    pub fn into_failed(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` for [`HarvestError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl<E: Classify> Classify for HarvestError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Failed(e) => e.kind(),
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

enum Trigger<E> {
    Failure(E),
    Deadline,
    External,
}

/// A set of operations to run concurrently under one cancellation scope.
pub struct Harvest<'a, T, E> {
    scope: CancelToken,
    timeout: Option<Duration>,
    ops: Vec<BoxFuture<'a, Result<T, E>>>,
}

impl<'a, T, E> Harvest<'a, T, E>
where
    T: Send + 'a,
    E: Send + 'a,
{
    /// Empty harvest with a fresh root scope.
    pub fn new() -> Self {
        Self::with_scope(&CancelToken::new())
    }

    /// Empty harvest whose scope is a child of `parent`. Cancelling `parent`
    /// cancels every operation; the harvest's own cancellation never
    /// propagates upward.
    pub fn with_scope(parent: &CancelToken) -> Self {
        Self {
            scope: parent.child(),
            timeout: None,
            ops: Vec::new(),
        }
    }

    /// Set (or clear) the deadline.
    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// The shared scope token handed to each operation.
    pub fn scope(&self) -> &CancelToken {
        &self.scope
    }

    /// Number of operations added so far.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if no operation has been added.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Add an operation. `op` receives a clone of the scope token.
    pub fn push<F, Fut>(&mut self, op: F)
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        let fut = op(self.scope.clone());
        self.ops.push(Box::pin(fut));
    }

    /// Builder-style [`push`](Self::push).
    pub fn with<F, Fut>(mut self, op: F) -> Self
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        self.push(op);
        self
    }

    /// Run every operation; cancel the rest on the first error.
    ///
    /// Returns values in push order.
    pub async fn join(self) -> Result<Vec<T>, HarvestError<E>> {
        let timeout = self.timeout;
        let (outcomes, trigger) = drive(self.scope, timeout, self.ops, true).await;
        match trigger {
            Some(Trigger::Failure(e)) => Err(HarvestError::Failed(e)),
            Some(Trigger::Deadline) => Err(HarvestError::Timeout(timeout.unwrap_or_default())),
            Some(Trigger::External) => Err(HarvestError::Cancelled),
            None => outcomes
                .into_iter()
                .flatten()
                .collect::<Result<Vec<T>, E>>()
                .map_err(HarvestError::Failed),
        }
    }

    /// Run every operation to completion without cancelling on errors.
    ///
    /// Returns one slot per operation in push order. The deadline and
    /// external cancellation still apply.
    pub async fn join_settled(self) -> Result<Vec<Result<T, E>>, HarvestError<E>> {
        let timeout = self.timeout;
        let (outcomes, trigger) = drive(self.scope, timeout, self.ops, false).await;
        match trigger {
            Some(Trigger::Failure(e)) => Err(HarvestError::Failed(e)),
            Some(Trigger::Deadline) => Err(HarvestError::Timeout(timeout.unwrap_or_default())),
            Some(Trigger::External) => Err(HarvestError::Cancelled),
            None => Ok(outcomes.into_iter().flatten().collect()),
        }
    }
}

impl<'a, T, E> Default for Harvest<'a, T, E>
where
    T: Send + 'a,
    E: Send + 'a,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn drive<'a, T, E>(
    scope: CancelToken,
    timeout: Option<Duration>,
    ops: Vec<BoxFuture<'a, Result<T, E>>>,
    cancel_on_error: bool,
) -> (Vec<Option<Result<T, E>>>, Option<Trigger<E>>) {
    let mut outcomes: Vec<Option<Result<T, E>>> =
        std::iter::repeat_with(|| None).take(ops.len()).collect();
    let mut pending: FuturesUnordered<_> = ops
        .into_iter()
        .enumerate()
        .map(|(index, op)| async move { (index, op.await) })
        .collect();

    let deadline = async move {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut trigger: Option<Trigger<E>> = None;
    while !pending.is_empty() {
        tokio::select! {
            biased;
            Some((index, outcome)) = pending.next() => {
                match outcome {
                    Err(e) if cancel_on_error && trigger.is_none() => {
                        debug!(target: "pipewright.harvest", index, "operation failed; cancelling siblings");
                        scope.cancel_with(CancelReason::Failure);
                        trigger = Some(Trigger::Failure(e));
                    }
                    outcome => outcomes[index] = Some(outcome),
                }
            }
            _ = &mut deadline, if trigger.is_none() => {
                debug!(target: "pipewright.harvest", ?timeout, remaining = pending.len(), "deadline elapsed; cancelling");
                scope.cancel_with(CancelReason::Deadline);
                trigger = Some(Trigger::Deadline);
            }
            _ = scope.cancelled(), if trigger.is_none() => {
                debug!(target: "pipewright.harvest", remaining = pending.len(), "scope cancelled from outside");
                trigger = Some(Trigger::External);
            }
        }
    }
    (outcomes, trigger)
}
