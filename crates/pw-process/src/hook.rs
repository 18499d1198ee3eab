// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-stage lifecycle hooks.

use crate::error::RunError;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle transition being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The stage was spawned.
    Start,
    /// The stage finished, or failed to start.
    Stop,
    /// The stage is about to be terminated because of a sibling failure,
    /// the deadline, or cancellation.
    Signal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Signal => "signal",
        })
    }
}

/// What a hook sees about a stage.
#[derive(Debug, Clone)]
pub struct StageInfo {
    /// Position in the pipeline; substituted commands share the index of the
    /// stage that uses them.
    pub index: usize,
    /// Display name.
    pub name: String,
    /// OS process id, once spawned.
    pub pid: Option<u32>,
    /// Exit code, on `Stop` after a normal exit.
    pub exit_code: Option<i32>,
    /// The failure, on `Stop`.
    pub failure: Option<RunError>,
}

/// Error returned by a hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type HookCallback = dyn Fn(Phase, &StageInfo) -> Result<(), HookError> + Send + Sync;

/// Shared lifecycle callback. Runs synchronously on the supervising task and
/// must not block.
#[derive(Clone)]
pub struct Hook(Arc<HookCallback>);

impl Hook {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Phase, &StageInfo) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call(&self, phase: Phase, info: &StageInfo) -> Result<(), HookError> {
        (self.0)(phase, info)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook(..)")
    }
}
