// SPDX-License-Identifier: MIT OR Apache-2.0
//! Prompt errors.

use crate::state::PromptState;
use pw_error::{Classify, ErrorKind};
use pw_process::DecodeError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by [`Prompt`](crate::Prompt).
#[derive(Debug, Error)]
pub enum PromptError {
    /// The marker did not appear in time. Output read so far is kept.
    #[error("prompt {marker:?} not seen within {after:?}")]
    Timeout {
        /// The marker being waited for.
        marker: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Output reached end of file before the marker.
    #[error("output closed before prompt was seen")]
    Closed,

    /// The runner has no captured stdin or stdout to drive.
    #[error("runner has no captured {0}")]
    NotInteractive(&'static str),

    /// The marker cannot be represented in the runner's encoding.
    #[error("prompt marker {marker:?} cannot be encoded as {encoding}")]
    InvalidMarker {
        /// The rejected marker.
        marker: String,
        /// The runner's encoding.
        encoding: String,
    },

    /// The operation is not allowed in the current state.
    #[error("invalid prompt transition from {from} to {to}")]
    InvalidState {
        /// Current state.
        from: PromptState,
        /// Requested state.
        to: PromptState,
    },

    /// Writing or reading failed.
    #[error("prompt i/o failed: {0}")]
    Io(#[from] io::Error),

    /// Output could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl Classify for PromptError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotInteractive(_) | Self::InvalidMarker { .. } => ErrorKind::InvalidConstruction,
            Self::Closed | Self::InvalidState { .. } | Self::Io(_) | Self::Decode(_) => ErrorKind::Execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classifies_as_timeout() {
        let err = PromptError::Timeout {
            marker: "$ ".into(),
            after: Duration::from_millis(50),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "prompt \"$ \" not seen within 50ms");
    }

    #[test]
    fn missing_streams_are_construction_errors() {
        assert!(PromptError::NotInteractive("stdin").kind().is_construction());
        assert_eq!(PromptError::Closed.kind(), ErrorKind::Execution);
    }
}
