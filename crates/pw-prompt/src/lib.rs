// SPDX-License-Identifier: MIT OR Apache-2.0
//! Line-oriented automation of interactive programs.
//!
//! A [`Prompt`] borrows a running [`Runner`] whose first stage reads a
//! captured stdin (a pty stage reads its terminal by default) and whose
//! last stage writes a captured stdout. Each
//! [`send`](Prompt::send) writes one line and then reads until the output
//! ends with a literal marker, returning what came before it.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use pw_process::{PtyMode, cmd};
//! use pw_prompt::Prompt;
//! use std::time::Duration;
//!
//! let sh = cmd!("sh")?
//!     .pty(PtyMode::CookedNoEcho)
//!     .env("PS1", "$ ");
//! let mut runner = sh.start().await?;
//! let mut repl = Prompt::new(&mut runner, "$ ")?.timeout(Duration::from_secs(3));
//! repl.send(None).await?;
//! assert_eq!(repl.send(Some("echo 123")).await?, "123");
//! repl.close();
//! runner.close_stdin().await;
//! runner.wait().await?;
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod state;

pub use error::PromptError;
pub use state::PromptState;

use pw_process::{Charset, Context, Encoding, Runner, decode};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

const CHUNK: usize = 4 * 1024;

/// REPL driver over a borrowed [`Runner`].
///
/// Echo mode and newline normalisation default from the runner's pty mode:
/// a cooked terminal echoes input and turns `\n` into `\r\n`.
pub struct Prompt<'r> {
    runner: &'r mut Runner,
    marker: String,
    marker_bytes: Vec<u8>,
    timeout: Option<Duration>,
    echo: bool,
    normalize_newlines: bool,
    encoding: Encoding,
    pending: Vec<u8>,
    state: PromptState,
}

impl<'r> Prompt<'r> {
    /// Drive `runner`, treating `marker` as the end of each response.
    ///
    /// Fails if the runner's stdout is not captured, or if the marker is
    /// empty or cannot be written in the runner's encoding.
    pub fn new(runner: &'r mut Runner, marker: impl Into<String>) -> Result<Self, PromptError> {
        let marker = marker.into();
        let encoding = runner.encoding();
        let marker_bytes = match encode(&marker, encoding) {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => {
                return Err(PromptError::InvalidMarker {
                    marker,
                    encoding: encoding.to_string(),
                });
            }
        };
        if runner.stdout_mut().is_none() {
            return Err(PromptError::NotInteractive("stdout"));
        }
        let pty = runner.pty_mode();
        Ok(Self {
            runner,
            marker,
            marker_bytes,
            timeout: None,
            echo: pty.echoes(),
            normalize_newlines: pty.is_enabled(),
            encoding,
            pending: Vec::new(),
            state: PromptState::Idle,
        })
    }

    /// Like [`new`](Self::new), with the default timeout taken from `ctx`.
    pub fn from_context(runner: &'r mut Runner, marker: impl Into<String>, ctx: &Context) -> Result<Self, PromptError> {
        let mut prompt = Self::new(runner, marker)?;
        prompt.timeout = ctx.prompt_timeout();
        Ok(prompt)
    }

    /// Default timeout for [`send`](Self::send).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override echo stripping.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Override `\r\n` to `\n` normalisation.
    pub fn normalize_newlines(mut self, normalize: bool) -> Self {
        self.normalize_newlines = normalize;
        self
    }

    /// Current state.
    pub fn state(&self) -> PromptState {
        self.state
    }

    /// The marker that ends each response.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Output read but not yet returned.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Remove and return the pending output, e.g. a response that failed
    /// to decode.
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    /// Send `input` (if any) followed by `\n`, then wait for the marker
    /// under the default timeout.
    pub async fn send(&mut self, input: Option<&str>) -> Result<String, PromptError> {
        self.send_with_timeout(input, self.timeout).await
    }

    /// [`send`](Self::send) with an explicit timeout; `None` waits
    /// indefinitely.
    ///
    /// On timeout the output read so far stays pending for the next call.
    /// A response that cannot be decoded also stays pending, marker
    /// included, and the error is [`PromptError::Decode`].
    #[tracing::instrument(target = "pipewright.prompt", level = "debug", skip_all, fields(marker = %self.marker))]
    pub async fn send_with_timeout(
        &mut self,
        input: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<String, PromptError> {
        if self.state.is_terminal() {
            return Err(PromptError::Closed);
        }
        if let Some(line) = input {
            self.transition(PromptState::Sending)?;
            if let Err(e) = self.write_line(line).await {
                debug!(target: "pipewright.prompt", error = %e, "write failed");
                self.state = PromptState::Closed;
                return Err(e);
            }
        }
        self.transition(PromptState::AwaitingPrompt)?;

        let found = match timeout {
            Some(after) => match tokio::time::timeout(after, self.fill()).await {
                Ok(found) => found,
                Err(_) => {
                    self.transition(PromptState::TimedOut)?;
                    debug!(target: "pipewright.prompt", ?after, pending = self.pending.len(), "timed out");
                    return Err(PromptError::Timeout {
                        marker: self.marker.clone(),
                        after,
                    });
                }
            },
            None => self.fill().await,
        };
        match found {
            Ok(true) => {}
            Ok(false) => {
                self.transition(PromptState::Closed)?;
                debug!(target: "pipewright.prompt", pending = self.pending.len(), "output closed");
                return Err(PromptError::Closed);
            }
            Err(e) => {
                self.state = PromptState::Closed;
                return Err(e.into());
            }
        }

        self.transition(PromptState::Matched)?;
        let body = &self.pending[..self.pending.len() - self.marker_bytes.len()];
        let decoded = decode(body, self.encoding);
        self.transition(PromptState::Idle)?;
        let mut text = match decoded {
            Ok(text) => text,
            Err(e) => {
                debug!(target: "pipewright.prompt", pending = self.pending.len(), error = %e, "undecodable response kept");
                return Err(e.into());
            }
        };
        self.pending.clear();
        if self.normalize_newlines {
            text = text.replace("\r\n", "\n");
        }
        let mut response: &str = &text;
        if let (true, Some(line)) = (self.echo, input) {
            response = strip_echo(response, line);
        }
        let response = strip_terminator(response).to_string();
        debug!(target: "pipewright.prompt", len = response.len(), "matched");
        Ok(response)
    }

    /// Stop automating. Pending output is discarded; the runner is left
    /// running.
    pub fn close(self) {
        debug!(
            target: "pipewright.prompt",
            state = %self.state,
            discarded = self.pending.len(),
            "closed"
        );
    }

    fn transition(&mut self, next: PromptState) -> Result<(), PromptError> {
        if !self.state.can_transition(&next) {
            return Err(PromptError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        trace!(target: "pipewright.prompt", from = %self.state, to = %next, "transition");
        self.state = next;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), PromptError> {
        let mut bytes = encode(line, self.encoding).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("input cannot be encoded as {}", self.encoding),
            )
        })?;
        bytes.push(b'\n');
        let writer = self
            .runner
            .stdin_mut()
            .ok_or(PromptError::NotInteractive("stdin"))?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        trace!(target: "pipewright.prompt", len = bytes.len(), "sent");
        Ok(())
    }

    /// Read until the pending output ends with the marker (`true`) or the
    /// output closes (`false`). Safe to cancel between reads.
    async fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; CHUNK];
        loop {
            if self.pending.ends_with(&self.marker_bytes) {
                return Ok(true);
            }
            let reader = self
                .runner
                .stdout_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stdout already taken"))?;
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(false);
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

impl std::fmt::Debug for Prompt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("marker", &self.marker)
            .field("state", &self.state)
            .field("echo", &self.echo)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Bytes for `text` in `encoding`, or `None` if a character has no
/// representation.
fn encode(text: &str, encoding: Encoding) -> Option<Vec<u8>> {
    match encoding.charset {
        Charset::Utf8 => Some(text.as_bytes().to_vec()),
        Charset::Latin1 => text.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect(),
    }
}

/// Drop one leading echo of `line` and the terminator after it.
fn strip_echo<'a>(text: &'a str, line: &str) -> &'a str {
    match text.strip_prefix(line) {
        Some(rest) => strip_leading_terminator(rest),
        None => text,
    }
}

fn strip_leading_terminator(text: &str) -> &str {
    text.strip_prefix("\r\n")
        .or_else(|| text.strip_prefix('\n'))
        .unwrap_or(text)
}

fn strip_terminator(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}
