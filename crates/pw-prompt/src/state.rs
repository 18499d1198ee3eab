// SPDX-License-Identifier: MIT OR Apache-2.0
//! Prompt state machine.

use serde::Serialize;
use std::fmt;

/// Where a [`Prompt`](crate::Prompt) is in its send/read cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptState {
    /// Ready for the next `send`.
    #[default]
    Idle,
    /// Writing input to the runner.
    Sending,
    /// Reading output until the marker shows up.
    AwaitingPrompt,
    /// The marker was found; about to return to `Idle`.
    Matched,
    /// The last `send` timed out. Unread output is kept and the prompt can
    /// be used again.
    TimedOut,
    /// Output reached end of file, or the prompt was closed. Terminal.
    Closed,
}

impl PromptState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition(&self, next: &PromptState) -> bool {
        use PromptState::*;
        matches!(
            (self, next),
            (Idle | TimedOut, Sending)
                | (Idle | TimedOut, AwaitingPrompt)
                | (Sending, AwaitingPrompt)
                | (AwaitingPrompt, Matched)
                | (AwaitingPrompt, TimedOut)
                | (Matched, Idle)
                | (Idle | Sending | AwaitingPrompt | TimedOut, Closed)
        )
    }

    /// Returns `true` once closed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for PromptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::AwaitingPrompt => "awaiting_prompt",
            Self::Matched => "matched",
            Self::TimedOut => "timed_out",
            Self::Closed => "closed",
        })
    }
}
