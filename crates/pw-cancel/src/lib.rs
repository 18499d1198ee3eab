// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative cancellation for pipewright.
//!
//! A [`CancelToken`] is cloneable and backed by an `Arc`; cancelling any clone
//! wakes every waiter. Tokens can form scopes: a [`child`](CancelToken::child)
//! observes its parent's cancellation, but cancelling the child leaves the
//! parent untouched. The first [`CancelReason`] recorded on a token wins.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::Notify;

// ── CancelReason ────────────────────────────────────────────────────

/// Why a scope was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller asked for cancellation.
    Requested,
    /// A sibling operation in the same scope failed.
    Failure,
    /// A deadline elapsed.
    Deadline,
}

impl CancelReason {
    /// Human-readable description of the reason.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Requested => "cancelled by caller",
            Self::Failure => "cancelled because a sibling failed",
            Self::Deadline => "cancelled because the deadline elapsed",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

// ── CancelToken ─────────────────────────────────────────────────────

/// Cloneable cancellation token with optional parent scope.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    notify: Notify,
    parent: Option<CancelToken>,
}

impl CancelToken {
    /// Create a new root token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<CancelToken>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify: Notify::new(),
                parent,
            }),
        }
    }

    /// Create a child scope. The child is cancelled whenever `self` is, but
    /// cancelling the child does not propagate upward.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// Signal cancellation with [`CancelReason::Requested`].
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Requested);
    }

    /// Signal cancellation, recording `reason` if none was recorded yet.
    ///
    /// Idempotent; only the first reason sticks.
    pub fn cancel_with(&self, reason: CancelReason) {
        {
            let mut slot = self
                .inner
                .reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` if this token or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
    }

    /// Reason recorded on this token, falling back to the nearest cancelled
    /// ancestor's reason.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        let own = *self
            .inner
            .reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        own.or_else(|| self.inner.parent.as_ref().and_then(CancelToken::reason))
    }

    /// Returns `true` if the cancellation came from an ancestor rather than
    /// from this token itself.
    #[must_use]
    pub fn cancelled_by_parent(&self) -> bool {
        !self.inner.cancelled.load(Ordering::SeqCst) && self.is_cancelled()
    }

    /// Wait until this token or an ancestor is cancelled. Resolves
    /// immediately if that already happened.
    pub async fn cancelled(&self) {
        match &self.inner.parent {
            None => self.own_cancelled().await,
            Some(parent) => {
                tokio::select! {
                    _ = self.own_cancelled() => {}
                    _ = Box::pin(parent.cancelled()) => {}
                }
            }
        }
    }

    async fn own_cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        loop {
            // Register before checking the flag so a concurrent cancel cannot
            // slip between the check and the wait.
            notified.as_mut().enable();
            if self.inner.cancelled.load(Ordering::SeqCst) {
                return;
            }
            notified.as_mut().await;
            notified.set(self.inner.notify.notified());
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
