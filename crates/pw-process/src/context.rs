// SPDX-License-Identifier: MIT OR Apache-2.0
//! Default options shared by every command built from one context.

use crate::arg::Arg;
use crate::command::Command;
use crate::encoding::{Encoding, EncodingParseError};
use crate::error::CommandError;
use crate::options::{EnvValue, ExitCodes, Options, PtyMode};
use crate::redirect::{Redirect, Stream};
use nix::sys::signal::Signal;
use pw_config::PipewrightConfig;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default [`Options`] for new commands.
///
/// Setters mutate the context in place; commands already built keep the
/// options they were built with.
///
/// ```
/// use pw_process::Context;
/// let mut ctx = Context::new();
/// ctx.env("LANG", "C");
/// let ls = ctx.command(["ls"]).unwrap();
/// assert!(ls.options().env().unwrap().contains_key("LANG"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    options: Options,
    prompt_timeout: Option<Duration>,
}

impl Context {
    /// Context with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded from loaded configuration.
    pub fn from_config(config: &PipewrightConfig) -> Result<Self, CommandError> {
        let encoding: Encoding = config.encoding.parse().map_err(|e: EncodingParseError| {
            CommandError::InvalidOption {
                option: "encoding",
                reason: e.to_string(),
            }
        })?;
        let cancel_signal: Signal = config
            .cancel_signal
            .parse()
            .map_err(|e: nix::Error| CommandError::InvalidOption {
                option: "cancel_signal",
                reason: format!("{}: {e}", config.cancel_signal),
            })?;
        let options = Options {
            encoding,
            cancel_signal,
            cancel_timeout: Duration::from_millis(config.cancel_timeout_ms),
            timeout: config.timeout_secs.map(Duration::from_secs),
            ..Options::default()
        };
        Ok(Self {
            options,
            prompt_timeout: config.prompt_timeout_secs.map(Duration::from_secs),
        })
    }

    /// Build a command with this context's options.
    pub fn command<I, A>(&self, args: I) -> Result<Command, CommandError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Command::with_options(args, self.options.clone())
    }

    /// The current default options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Default timeout for prompts on runners started from this context.
    pub fn prompt_timeout(&self) -> Option<Duration> {
        self.prompt_timeout
    }

    /// Set one environment variable for later commands.
    pub fn env(&mut self, key: impl Into<String>, value: impl fmt::Display) -> &mut Self {
        self.options.set_env(key.into(), EnvValue::Set(value.to_string()));
        self
    }

    /// Pass the parent's `key` through to later commands.
    pub fn env_inherit(&mut self, key: impl Into<String>) -> &mut Self {
        self.options.set_env(key.into(), EnvValue::Inherit);
        self
    }

    /// Whether later commands start from the parent environment.
    pub fn inherit_env(&mut self, inherit: bool) -> &mut Self {
        self.options.inherit_env = inherit;
        self
    }

    /// Working directory for later commands.
    pub fn cwd(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.options.cwd = Some(dir.into());
        self
    }

    /// Default stderr target.
    pub fn stderr(&mut self, target: impl Into<Redirect>) -> Result<&mut Self, CommandError> {
        self.options.set_redirect(Stream::Stderr, target.into())?;
        Ok(self)
    }

    /// Default accepted exit codes.
    pub fn exit_codes(&mut self, codes: ExitCodes) -> &mut Self {
        self.options.exit_codes = codes;
        self
    }

    /// Default output encoding.
    pub fn encoding(&mut self, encoding: Encoding) -> &mut Self {
        self.options.encoding = encoding;
        self
    }

    /// Default deadline.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Default cancel signal.
    pub fn cancel_signal(&mut self, signal: Signal) -> &mut Self {
        self.options.cancel_signal = signal;
        self
    }

    /// Default grace period before `SIGKILL`.
    pub fn cancel_timeout(&mut self, grace: Duration) -> &mut Self {
        self.options.cancel_timeout = grace;
        self
    }

    /// Default pty mode.
    pub fn pty(&mut self, mode: PtyMode) -> &mut Self {
        self.options.pty = mode;
        self
    }

    /// Default prompt timeout.
    pub fn set_prompt_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.prompt_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::DecodeErrors;

    #[test]
    fn env_persists_into_later_commands() {
        let mut ctx = Context::new();
        let before = ctx.command(["env"]).unwrap();
        ctx.env("PW_CTX", 7);
        let after = ctx.command(["env"]).unwrap();
        assert!(before.options().env().is_none());
        assert_eq!(
            after.options().env().unwrap().get("PW_CTX"),
            Some(&EnvValue::Set("7".into()))
        );
    }

    #[test]
    fn from_config_maps_fields() {
        let config = PipewrightConfig {
            encoding: "latin-1 replace".into(),
            cancel_signal: "SIGINT".into(),
            cancel_timeout_ms: 250,
            timeout_secs: Some(9),
            prompt_timeout_secs: Some(2),
            ..PipewrightConfig::default()
        };
        let ctx = Context::from_config(&config).unwrap();
        let opts = ctx.options();
        assert_eq!(opts.encoding().errors, DecodeErrors::Replace);
        assert_eq!(opts.cancel_signal(), Signal::SIGINT);
        assert_eq!(opts.cancel_timeout(), Duration::from_millis(250));
        assert_eq!(opts.timeout(), Some(Duration::from_secs(9)));
        assert_eq!(ctx.prompt_timeout(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn from_config_rejects_unknown_signal() {
        let config = PipewrightConfig {
            cancel_signal: "SIGNOPE".into(),
            ..PipewrightConfig::default()
        };
        let err = Context::from_config(&config).unwrap_err();
        assert!(matches!(
            err,
            CommandError::InvalidOption {
                option: "cancel_signal",
                ..
            }
        ));
    }
}
