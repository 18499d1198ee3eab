// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for command construction and pipeline execution.

use crate::encoding::DecodeError;
use crate::hook::{HookError, Phase};
use crate::redirect::Stream;
use crate::result::{PipelineResult, Reason};
use pw_error::{Classify, ErrorKind};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building a [`Command`](crate::Command). Nothing has
/// been spawned when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The flattened argument list is empty.
    #[error("command has no program name")]
    MissingProgram,

    /// A null value appeared in the argument list.
    #[error("argument {index} is null")]
    NullArgument {
        /// Position in the flattened argument list.
        index: usize,
    },

    /// Map, set and placeholder arguments are reserved.
    #[error("{syntax} arguments are not supported yet")]
    Reserved {
        /// Which reserved syntax was used.
        syntax: &'static str,
    },

    /// `append` was combined with something other than a path.
    #[error("append requires a path target, got {target}")]
    InvalidAppend {
        /// Kind of the rejected target.
        target: &'static str,
    },

    /// The target cannot be used on this stream.
    #[error("{target} cannot be used to redirect {stream}")]
    InvalidRedirect {
        /// Stream being redirected.
        stream: Stream,
        /// Kind of the rejected target.
        target: &'static str,
    },

    /// An option value could not be parsed.
    #[error("invalid {option}: {reason}")]
    InvalidOption {
        /// Option name.
        option: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl Classify for CommandError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Reserved { .. } => ErrorKind::NotYetSupported,
            _ => ErrorKind::InvalidConstruction,
        }
    }
}

/// Errors raised while starting or supervising a pipeline.
///
/// `Clone` so a [`Runner`](crate::Runner) can hand the same outcome to
/// every caller of `wait`.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// The pipeline could not be built.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The OS refused to create the process.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The audit hook rejected the spawn.
    #[error("spawn of '{program}' vetoed: {reason}")]
    Vetoed {
        /// Program that was vetoed.
        program: String,
        /// Reason given by the hook.
        reason: String,
    },

    /// The operation is unavailable on this system.
    #[error("{operation} is not supported: {reason}")]
    Unsupported {
        /// What was attempted.
        operation: &'static str,
        /// Why it cannot run.
        reason: String,
    },

    /// One stage finished with a rejected status. Handed to `Stop` hooks.
    #[error("stage '{name}' {reason}")]
    Stage {
        /// Stage display name.
        name: String,
        /// How it finished.
        reason: Reason,
        /// Exit code, if it exited normally.
        exit_code: Option<i32>,
    },

    /// At least one stage failed.
    #[error("{}", .0.summary())]
    Exit(Box<PipelineResult>),

    /// The pipeline deadline elapsed.
    #[error("pipeline timed out after {after:?}")]
    Timeout {
        /// The configured deadline.
        after: Duration,
        /// Per-stage results at the time of the deadline.
        result: Box<PipelineResult>,
    },

    /// The pipeline was cancelled.
    #[error("pipeline was cancelled")]
    Cancelled {
        /// Per-stage results collected while unwinding.
        result: Box<PipelineResult>,
    },

    /// A lifecycle hook returned an error.
    #[error("{phase} hook for '{stage}' failed: {source}")]
    Hook {
        /// Phase being reported.
        phase: Phase,
        /// Stage display name.
        stage: String,
        /// Error returned by the hook.
        #[source]
        source: HookError,
    },

    /// Pipe, pty or exit-status I/O failed.
    #[error("i/o error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// Output could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl RunError {
    pub(crate) fn io(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }

    pub(crate) fn spawn(program: impl Into<String>, err: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source: Arc::new(err),
        }
    }

    /// The per-stage results, when the error carries them.
    pub fn result(&self) -> Option<&PipelineResult> {
        match self {
            Self::Exit(result) => Some(&**result),
            Self::Timeout { result, .. } | Self::Cancelled { result } => Some(&**result),
            _ => None,
        }
    }
}

impl From<io::Error> for RunError {
    fn from(err: io::Error) -> Self {
        Self::io(err)
    }
}

impl Classify for RunError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Command(e) => e.kind(),
            Self::Unsupported { .. } | Self::Vetoed { .. } => ErrorKind::Unsupported,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Spawn { .. }
            | Self::Stage { .. }
            | Self::Exit(_)
            | Self::Hook { .. }
            | Self::Io(_)
            | Self::Decode(_) => ErrorKind::Execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_errors_classify() {
        assert_eq!(CommandError::MissingProgram.kind(), ErrorKind::InvalidConstruction);
        assert_eq!(
            CommandError::Reserved { syntax: "map" }.kind(),
            ErrorKind::NotYetSupported
        );
        let run: RunError = CommandError::NullArgument { index: 2 }.into();
        assert_eq!(run.kind(), ErrorKind::InvalidConstruction);
    }

    #[test]
    fn vetoed_is_unsupported() {
        let err = RunError::Vetoed {
            program: "rm".into(),
            reason: "no".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.to_string(), "spawn of 'rm' vetoed: no");
    }

    #[test]
    fn io_errors_are_cloneable() {
        let err = RunError::io(io::Error::other("boom"));
        let copy = err.clone();
        assert_eq!(copy.to_string(), "i/o error: boom");
        assert!(copy.result().is_none());
    }
}
