// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-stage and whole-pipeline results, and the runner state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// How a stage finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Exited with an accepted code.
    Success,
    /// Exited with a code its `ExitCodes` rejects.
    NonZero,
    /// Killed by a signal it was not sent by the runner.
    Signalled,
    /// Terminated by the runner because the deadline elapsed.
    TimedOut,
    /// Terminated by the runner because of cancellation or a sibling's
    /// failure.
    Cancelled,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "succeeded",
            Self::NonZero => "exited with a rejected status",
            Self::Signalled => "was killed by a signal",
            Self::TimedOut => "timed out",
            Self::Cancelled => "was cancelled",
        })
    }
}

/// Lifecycle of a [`Runner`](crate::Runner).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum RunState {
    /// Nothing spawned yet.
    #[default]
    NotStarted,
    /// At least one stage is live.
    Running,
    /// Every stage has been reaped.
    Finished(Reason),
}

impl RunState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition(&self, next: &RunState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Running)
                | (Self::NotStarted, Self::Finished(_))
                | (Self::Running, Self::Finished(_))
        )
    }

    /// Returns `true` once finished.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Running => f.write_str("running"),
            Self::Finished(reason) => write!(f, "finished ({reason})"),
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    /// Display name.
    pub name: String,
    /// OS process id.
    pub pid: Option<u32>,
    /// Exit code; `None` when killed by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal number, if any.
    pub signal: Option<i32>,
    /// How the stage finished.
    pub reason: Reason,
    /// Captured stdout (last stage and substitutions only).
    pub stdout: Vec<u8>,
    /// Captured stderr.
    pub stderr: Vec<u8>,
    /// When the process was spawned.
    pub started_at: DateTime<Utc>,
    /// When the process was reaped.
    pub ended_at: DateTime<Utc>,
    /// `true` for a process-substitution helper.
    pub aux: bool,
}

impl StageResult {
    /// Returns `true` when the stage succeeded.
    pub fn success(&self) -> bool {
        self.reason == Reason::Success
    }

    /// Wall-clock run time.
    pub fn duration(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}

/// Outcome of a whole pipeline, one [`StageResult`] per spawned process in
/// spawn order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    /// Stage results, including substitution helpers.
    pub stages: Vec<StageResult>,
}

impl PipelineResult {
    /// The last non-helper stage, which carries the pipeline's value.
    pub fn last(&self) -> Option<&StageResult> {
        self.stages.iter().rev().find(|s| !s.aux)
    }

    /// Exit code of the last stage.
    pub fn exit_code(&self) -> Option<i32> {
        self.last().and_then(|s| s.exit_code)
    }

    /// Raw stdout of the last stage.
    pub fn stdout(&self) -> &[u8] {
        self.last().map(|s| s.stdout.as_slice()).unwrap_or_default()
    }

    /// Move the last stage's stdout out.
    pub fn take_stdout(&mut self) -> Vec<u8> {
        self.stages
            .iter_mut()
            .rev()
            .find(|s| !s.aux)
            .map(|s| std::mem::take(&mut s.stdout))
            .unwrap_or_default()
    }

    /// The stage that caused the failure, if any: the first one that exited
    /// with a rejected status or died from a foreign signal, else the first
    /// one the runner terminated.
    pub fn first_failure(&self) -> Option<&StageResult> {
        self.stages
            .iter()
            .find(|s| matches!(s.reason, Reason::NonZero | Reason::Signalled))
            .or_else(|| self.stages.iter().find(|s| !s.success()))
    }

    /// Overall reason: the first failure's, or `Success`.
    pub fn reason(&self) -> Reason {
        self.first_failure().map_or(Reason::Success, |s| s.reason)
    }

    /// Returns `true` when every stage succeeded.
    pub fn success(&self) -> bool {
        self.first_failure().is_none()
    }

    /// One-line description for error messages.
    pub fn summary(&self) -> String {
        match self.first_failure() {
            None => "pipeline succeeded".to_string(),
            Some(stage) => match (stage.exit_code, stage.signal) {
                (Some(code), _) => format!("stage '{}' {} (exit code {code})", stage.name, stage.reason),
                (None, Some(sig)) => format!("stage '{}' {} (signal {sig})", stage.name, stage.reason),
                (None, None) => format!("stage '{}' {}", stage.name, stage.reason),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, reason: Reason, code: Option<i32>, aux: bool) -> StageResult {
        let now = Utc::now();
        StageResult {
            name: name.into(),
            pid: Some(1),
            exit_code: code,
            signal: None,
            reason,
            stdout: name.as_bytes().to_vec(),
            stderr: Vec::new(),
            started_at: now,
            ended_at: now,
            aux,
        }
    }

    #[test]
    fn state_transitions() {
        let running = RunState::Running;
        assert!(RunState::NotStarted.can_transition(&running));
        assert!(running.can_transition(&RunState::Finished(Reason::Success)));
        assert!(!running.can_transition(&RunState::NotStarted));
        assert!(!RunState::Finished(Reason::NonZero).can_transition(&running));
    }

    #[test]
    fn last_skips_helpers() {
        let mut result = PipelineResult {
            stages: vec![
                stage("a", Reason::Success, Some(0), false),
                stage("sub", Reason::Success, Some(0), true),
            ],
        };
        assert_eq!(result.last().unwrap().name, "a");
        assert_eq!(result.take_stdout(), b"a");
        assert!(result.stdout().is_empty());
    }

    #[test]
    fn summary_names_first_failure() {
        let result = PipelineResult {
            stages: vec![
                stage("sleep", Reason::Cancelled, None, false),
                stage("false", Reason::NonZero, Some(1), false),
            ],
        };
        assert!(!result.success());
        assert_eq!(result.reason(), Reason::NonZero);
        assert_eq!(
            result.summary(),
            "stage 'false' exited with a rejected status (exit code 1)"
        );
    }
}
