// SPDX-License-Identifier: MIT OR Apache-2.0
//! Redirection targets for the three standard streams.

use crate::command::Command;
use crate::error::CommandError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::RawFd;
use std::path::PathBuf;

/// One of the three standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    /// Standard input.
    Stdin,
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Where a stream's bytes come from or go to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Redirect {
    /// A file, opened for reading (stdin) or writing.
    Path {
        /// File path.
        path: PathBuf,
        /// Append instead of truncating.
        append: bool,
    },
    /// A descriptor owned by the caller. It is duplicated at spawn time.
    Fd(RawFd),
    /// The stream's default. For stdin this is `/dev/null`, or the
    /// terminal when the command runs on a pty. Stdin only.
    Default,
    /// `/dev/null`.
    Null,
    /// A pipe whose parent end the runner keeps: buffered, streamed or
    /// written by the caller.
    Capture,
    /// The parent's own stream.
    Inherit,
    /// Literal input bytes. Stdin only.
    Feed(Vec<u8>),
    /// Merge into stdout. Stderr only.
    Stdout,
    /// Another command's pipe. Stdin and stdout only.
    Command(Command),
}

impl Redirect {
    /// Truncating path target.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path {
            path: path.into(),
            append: false,
        }
    }

    /// Literal input.
    pub fn feed(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Feed(bytes.into())
    }

    /// Short name of the target kind, used in errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Path { .. } => "path",
            Self::Fd(_) => "fd",
            Self::Default => "default",
            Self::Null => "null",
            Self::Capture => "capture",
            Self::Inherit => "inherit",
            Self::Feed(_) => "feed",
            Self::Stdout => "stdout",
            Self::Command(_) => "command",
        }
    }

    /// Reject targets that make no sense on `stream`.
    pub(crate) fn check(&self, stream: Stream) -> Result<(), CommandError> {
        let allowed = match self {
            Self::Feed(_) | Self::Default => stream == Stream::Stdin,
            Self::Stdout => stream == Stream::Stderr,
            Self::Command(_) => stream != Stream::Stderr,
            Self::Path { append: true, .. } => stream != Stream::Stdin,
            _ => true,
        };
        if allowed {
            Ok(())
        } else if matches!(self, Self::Path { .. }) {
            Err(CommandError::InvalidAppend { target: "stdin" })
        } else {
            Err(CommandError::InvalidRedirect {
                stream,
                target: self.kind(),
            })
        }
    }

    /// The same target with `append` set. Only paths can append.
    pub(crate) fn into_append(self) -> Result<Self, CommandError> {
        match self {
            Self::Path { path, .. } => Ok(Self::Path { path, append: true }),
            other => Err(CommandError::InvalidAppend {
                target: other.kind(),
            }),
        }
    }
}

impl From<PathBuf> for Redirect {
    fn from(path: PathBuf) -> Self {
        Self::path(path)
    }
}

impl From<&std::path::Path> for Redirect {
    fn from(path: &std::path::Path) -> Self {
        Self::path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_is_stdin_only() {
        assert!(Redirect::feed("x").check(Stream::Stdin).is_ok());
        assert_eq!(
            Redirect::feed("x").check(Stream::Stdout),
            Err(CommandError::InvalidRedirect {
                stream: Stream::Stdout,
                target: "feed"
            })
        );
    }

    #[test]
    fn merge_is_stderr_only() {
        assert!(Redirect::Stdout.check(Stream::Stderr).is_ok());
        assert!(Redirect::Stdout.check(Stream::Stdin).is_err());
    }

    #[test]
    fn default_is_stdin_only() {
        assert!(Redirect::Default.check(Stream::Stdin).is_ok());
        assert_eq!(
            Redirect::Default.check(Stream::Stdout),
            Err(CommandError::InvalidRedirect {
                stream: Stream::Stdout,
                target: "default"
            })
        );
    }

    #[test]
    fn append_only_for_paths() {
        assert!(Redirect::path("/tmp/out").into_append().is_ok());
        assert_eq!(
            Redirect::Null.into_append(),
            Err(CommandError::InvalidAppend { target: "null" })
        );
        assert_eq!(
            Redirect::Fd(3).into_append(),
            Err(CommandError::InvalidAppend { target: "fd" })
        );
    }
}
