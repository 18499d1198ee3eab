// SPDX-License-Identifier: MIT OR Apache-2.0
//! Immutable per-command options.

use crate::encoding::Encoding;
use crate::error::CommandError;
use crate::hook::Hook;
use crate::redirect::{Redirect, Stream};
use nix::sys::signal::Signal;
use serde::de::Error as _;
use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default grace period between the cancel signal and `SIGKILL`.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(3);

/// Pseudo-terminal mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PtyMode {
    /// Plain pipes.
    #[default]
    Off,
    /// Pty with the terminal's default (echoing) line discipline.
    Cooked,
    /// Pty with echo turned off.
    CookedNoEcho,
}

impl PtyMode {
    /// Returns `true` unless [`PtyMode::Off`].
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Returns `true` when the terminal echoes input back.
    pub fn echoes(&self) -> bool {
        matches!(self, Self::Cooked)
    }
}

/// Value of one environment overlay entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvValue {
    /// Set to this value.
    Set(String),
    /// Copy the parent's value, even when inheritance is off.
    Inherit,
}

/// Which exit codes count as success.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCodes {
    /// Only the listed codes.
    Only(BTreeSet<i32>),
    /// Any normal exit. Signals still fail.
    Any,
}

impl ExitCodes {
    /// Accept exactly `codes`.
    pub fn only(codes: impl IntoIterator<Item = i32>) -> Self {
        Self::Only(codes.into_iter().collect())
    }

    /// Whether `code` is accepted.
    pub fn accepts(&self, code: i32) -> bool {
        match self {
            Self::Only(codes) => codes.contains(&code),
            Self::Any => true,
        }
    }
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self::only([0])
    }
}

/// Everything about a command except its arguments.
///
/// Values are never mutated in place. Each setter on
/// [`Command`](crate::Command) or [`Context`](crate::Context) clones the
/// options and changes one field; the environment overlay is shared behind
/// an `Arc` and copied only on write.
///
/// Equality and hashing ignore the hook. Serializing options that carry a
/// hook fails.
#[derive(Clone)]
pub struct Options {
    pub(crate) env: Option<Arc<BTreeMap<String, EnvValue>>>,
    pub(crate) inherit_env: bool,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) stdin: Redirect,
    pub(crate) stdout: Redirect,
    pub(crate) stderr: Redirect,
    pub(crate) pty: PtyMode,
    pub(crate) alt_name: Option<String>,
    pub(crate) hook: Option<Hook>,
    pub(crate) exit_codes: ExitCodes,
    pub(crate) encoding: Encoding,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel_signal: Signal,
    pub(crate) cancel_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            env: None,
            inherit_env: true,
            cwd: None,
            stdin: Redirect::Default,
            stdout: Redirect::Capture,
            stderr: Redirect::Capture,
            pty: PtyMode::Off,
            alt_name: None,
            hook: None,
            exit_codes: ExitCodes::default(),
            encoding: Encoding::default(),
            timeout: None,
            cancel_signal: Signal::SIGTERM,
            cancel_timeout: DEFAULT_CANCEL_TIMEOUT,
        }
    }
}

impl Options {
    /// The environment overlay.
    pub fn env(&self) -> Option<&BTreeMap<String, EnvValue>> {
        self.env.as_deref()
    }

    /// Whether the parent environment is inherited.
    pub fn inherit_env(&self) -> bool {
        self.inherit_env
    }

    /// Working directory.
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Redirect for `stream`.
    pub fn redirect(&self, stream: Stream) -> &Redirect {
        match stream {
            Stream::Stdin => &self.stdin,
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    /// Pty mode.
    pub fn pty(&self) -> PtyMode {
        self.pty
    }

    /// Alternate display name.
    pub fn alt_name(&self) -> Option<&str> {
        self.alt_name.as_deref()
    }

    /// The lifecycle hook.
    pub fn hook(&self) -> Option<&Hook> {
        self.hook.as_ref()
    }

    /// Accepted exit codes.
    pub fn exit_codes(&self) -> &ExitCodes {
        &self.exit_codes
    }

    /// Output encoding.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Deadline for a pipeline containing this command.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Signal sent on cancellation.
    pub fn cancel_signal(&self) -> Signal {
        self.cancel_signal
    }

    /// Grace period before `SIGKILL`.
    pub fn cancel_timeout(&self) -> Duration {
        self.cancel_timeout
    }

    /// The complete child environment, or `None` when the child simply
    /// inherits the parent's environment unchanged.
    pub fn merged_env(&self) -> Option<BTreeMap<OsString, OsString>> {
        if self.inherit_env && self.env.is_none() {
            return None;
        }
        let mut merged: BTreeMap<OsString, OsString> = if self.inherit_env {
            std::env::vars_os().collect()
        } else {
            BTreeMap::new()
        };
        for (key, value) in self.env.iter().flat_map(|env| env.iter()) {
            match value {
                EnvValue::Set(v) => {
                    merged.insert(key.into(), v.into());
                }
                EnvValue::Inherit => match std::env::var_os(key) {
                    Some(v) => {
                        merged.insert(key.into(), v);
                    }
                    None => {
                        merged.remove(OsString::from(key).as_os_str());
                    }
                },
            }
        }
        Some(merged)
    }

    // -- crate-private mutators, always applied to a fresh clone ----------

    pub(crate) fn set_env(&mut self, key: String, value: EnvValue) {
        let env = self.env.get_or_insert_with(Default::default);
        Arc::make_mut(env).insert(key, value);
    }

    pub(crate) fn set_redirect(&mut self, stream: Stream, target: Redirect) -> Result<(), CommandError> {
        target.check(stream)?;
        match stream {
            Stream::Stdin => self.stdin = target,
            Stream::Stdout => self.stdout = target,
            Stream::Stderr => self.stderr = target,
        }
        Ok(())
    }
}

impl PartialEq for Options {
    fn eq(&self, other: &Self) -> bool {
        self.env == other.env
            && self.inherit_env == other.inherit_env
            && self.cwd == other.cwd
            && self.stdin == other.stdin
            && self.stdout == other.stdout
            && self.stderr == other.stderr
            && self.pty == other.pty
            && self.alt_name == other.alt_name
            && self.exit_codes == other.exit_codes
            && self.encoding == other.encoding
            && self.timeout == other.timeout
            && self.cancel_signal == other.cancel_signal
            && self.cancel_timeout == other.cancel_timeout
    }
}

impl Eq for Options {}

impl Hash for Options {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.env.hash(state);
        self.inherit_env.hash(state);
        self.cwd.hash(state);
        self.stdin.hash(state);
        self.stdout.hash(state);
        self.stderr.hash(state);
        self.pty.hash(state);
        self.alt_name.hash(state);
        self.exit_codes.hash(state);
        self.encoding.hash(state);
        self.timeout.hash(state);
        self.cancel_signal.hash(state);
        self.cancel_timeout.hash(state);
    }
}

impl Serialize for Options {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.hook.is_some() {
            return Err(S::Error::custom(
                "options with a lifecycle hook cannot be serialized",
            ));
        }
        let mut st = serializer.serialize_struct("Options", 13)?;
        st.serialize_field("env", &self.env.as_deref())?;
        st.serialize_field("inherit_env", &self.inherit_env)?;
        st.serialize_field("cwd", &self.cwd)?;
        st.serialize_field("stdin", &self.stdin)?;
        st.serialize_field("stdout", &self.stdout)?;
        st.serialize_field("stderr", &self.stderr)?;
        st.serialize_field("pty", &self.pty)?;
        st.serialize_field("alt_name", &self.alt_name)?;
        st.serialize_field("exit_codes", &self.exit_codes)?;
        st.serialize_field("encoding", &self.encoding)?;
        st.serialize_field("timeout", &self.timeout)?;
        st.serialize_field("cancel_signal", self.cancel_signal.as_str())?;
        st.serialize_field("cancel_timeout", &self.cancel_timeout)?;
        st.end()
    }
}

/// Serialized form of [`Options`]. The hook has no representation.
#[derive(Deserialize)]
struct OptionsRepr {
    env: Option<BTreeMap<String, EnvValue>>,
    inherit_env: bool,
    cwd: Option<PathBuf>,
    stdin: Redirect,
    stdout: Redirect,
    stderr: Redirect,
    pty: PtyMode,
    alt_name: Option<String>,
    exit_codes: ExitCodes,
    encoding: Encoding,
    timeout: Option<Duration>,
    cancel_signal: String,
    cancel_timeout: Duration,
}

impl<'de> Deserialize<'de> for Options {
    /// Redirects are checked against their stream as the setters do.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = OptionsRepr::deserialize(deserializer)?;
        let cancel_signal: Signal = repr
            .cancel_signal
            .parse()
            .map_err(|_| D::Error::custom(format!("unknown signal '{}'", repr.cancel_signal)))?;
        let mut options = Options {
            env: repr.env.map(Arc::new),
            inherit_env: repr.inherit_env,
            cwd: repr.cwd,
            pty: repr.pty,
            alt_name: repr.alt_name,
            hook: None,
            exit_codes: repr.exit_codes,
            encoding: repr.encoding,
            timeout: repr.timeout,
            cancel_signal,
            cancel_timeout: repr.cancel_timeout,
            ..Options::default()
        };
        for (stream, target) in [
            (Stream::Stdin, repr.stdin),
            (Stream::Stdout, repr.stdout),
            (Stream::Stderr, repr.stderr),
        ] {
            options.set_redirect(stream, target).map_err(D::Error::custom)?;
        }
        Ok(options)
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Option<Vec<&str>> = self
            .env
            .as_ref()
            .map(|env| env.keys().map(String::as_str).collect());
        f.debug_struct("Options")
            .field("env_keys", &env_keys)
            .field("inherit_env", &self.inherit_env)
            .field("cwd", &self.cwd)
            .field("stdin", &self.stdin.kind())
            .field("stdout", &self.stdout.kind())
            .field("stderr", &self.stderr.kind())
            .field("pty", &self.pty)
            .field("alt_name", &self.alt_name)
            .field("hook", &self.hook.is_some())
            .field("exit_codes", &self.exit_codes)
            .field("encoding", &self.encoding)
            .field("timeout", &self.timeout)
            .field("cancel_signal", &self.cancel_signal)
            .field("cancel_timeout", &self.cancel_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_env_is_none_by_default() {
        assert!(Options::default().merged_env().is_none());
    }

    #[test]
    fn merged_env_without_inheritance_is_overlay_only() {
        let mut opts = Options {
            inherit_env: false,
            ..Options::default()
        };
        opts.set_env("PW_ONLY".into(), EnvValue::Set("1".into()));
        let env = opts.merged_env().unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get(&OsString::from("PW_ONLY")), Some(&OsString::from("1")));
    }

    #[test]
    fn env_inherit_passes_one_variable_through() {
        let mut opts = Options {
            inherit_env: false,
            ..Options::default()
        };
        opts.set_env("PATH".into(), EnvValue::Inherit);
        let env = opts.merged_env().unwrap();
        assert_eq!(
            env.get(&OsString::from("PATH")).cloned(),
            std::env::var_os("PATH")
        );
    }

    #[test]
    fn env_overlay_is_copied_on_write() {
        let mut a = Options::default();
        a.set_env("A".into(), EnvValue::Set("1".into()));
        let mut b = a.clone();
        assert!(Arc::ptr_eq(a.env.as_ref().unwrap(), b.env.as_ref().unwrap()));
        b.set_env("B".into(), EnvValue::Set("2".into()));
        assert_eq!(a.env().unwrap().len(), 1);
        assert_eq!(b.env().unwrap().len(), 2);
    }

    #[test]
    fn hook_is_ignored_by_equality_but_blocks_serialization() {
        let plain = Options::default();
        let hooked = Options {
            hook: Some(Hook::new(|_, _| Ok(()))),
            ..Options::default()
        };
        assert_eq!(plain, hooked);
        assert!(serde_json::to_string(&plain).is_ok());
        let err = serde_json::to_string(&hooked).unwrap_err();
        assert!(err.to_string().contains("lifecycle hook"));
    }

    #[test]
    fn serialized_options_read_back_equal() {
        let mut opts = Options {
            inherit_env: false,
            cwd: Some("/tmp".into()),
            stdin: Redirect::feed("abc"),
            stdout: Redirect::Path {
                path: "/tmp/out".into(),
                append: true,
            },
            stderr: Redirect::Stdout,
            pty: PtyMode::CookedNoEcho,
            alt_name: Some("job".into()),
            exit_codes: ExitCodes::only([0, 3]),
            encoding: "latin-1 replace".parse().unwrap(),
            timeout: Some(Duration::from_millis(1500)),
            cancel_signal: Signal::SIGINT,
            cancel_timeout: Duration::from_secs(1),
            ..Options::default()
        };
        opts.set_env("A".into(), EnvValue::Set("1".into()));
        opts.set_env("PATH".into(), EnvValue::Inherit);

        let json = serde_json::to_string(&opts).unwrap();
        let back: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
        assert_eq!(back.cancel_signal, Signal::SIGINT);

        let defaults: Options = serde_json::from_str(&serde_json::to_string(&Options::default()).unwrap()).unwrap();
        assert_eq!(defaults, Options::default());
    }

    #[test]
    fn deserialize_rejects_misplaced_redirects_and_bad_signals() {
        let mut value = serde_json::to_value(Options::default()).unwrap();
        value["stdout"] = serde_json::json!({ "feed": [120] });
        let err = serde_json::from_value::<Options>(value).unwrap_err();
        assert!(err.to_string().contains("feed"), "{err}");

        let mut value = serde_json::to_value(Options::default()).unwrap();
        value["cancel_signal"] = serde_json::json!("SIGNOPE");
        let err = serde_json::from_value::<Options>(value).unwrap_err();
        assert!(err.to_string().contains("SIGNOPE"), "{err}");
    }

    #[test]
    fn debug_hides_env_values() {
        let mut opts = Options::default();
        opts.set_env("TOKEN".into(), EnvValue::Set("hunter2".into()));
        let shown = format!("{opts:?}");
        assert!(shown.contains("TOKEN"));
        assert!(!shown.contains("hunter2"));
    }
}
