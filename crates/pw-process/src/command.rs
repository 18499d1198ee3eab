// SPDX-License-Identifier: MIT OR Apache-2.0
//! The immutable [`Command`] value and its composition operators.

use crate::arg::{self, Arg, ArgValue};
use crate::encoding::Encoding;
use crate::error::{CommandError, RunError};
use crate::hook::{Hook, HookError, Phase, StageInfo};
use crate::options::{EnvValue, ExitCodes, Options, PtyMode};
use crate::pipeline::Pipeline;
use crate::redirect::{Redirect, Stream};
use crate::result::PipelineResult;
use crate::runner::Runner;
use futures::future::BoxFuture;
use nix::sys::signal::Signal;
use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::future::IntoFuture;
use std::hash::{Hash, Hasher};
use std::ops::{BitOr, Rem, RemAssign};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Names longer than this are shortened by [`Command::name`].
const MAX_NAME_CHARS: usize = 31;

/// A program, its arguments and its [`Options`].
///
/// Cheap to clone; every setter returns a new command and leaves the
/// original untouched.
///
/// ```no_run
/// # async fn demo() -> Result<(), pw_process::RunError> {
/// use pw_process::cmd;
/// let greeting = cmd!("echo", "hello")?.await?;
/// assert_eq!(greeting, "hello");
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Command {
    inner: Arc<CommandInner>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CommandInner {
    args: Arc<[ArgValue]>,
    options: Options,
}

impl Command {
    /// Build a command from a program name and arguments.
    ///
    /// Fails with [`CommandError::MissingProgram`] when the flattened list
    /// is empty.
    pub fn new<I, A>(args: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Self::with_options(args, Options::default())
    }

    pub(crate) fn with_options<I, A>(args: I, options: Options) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let mut flat = Vec::new();
        arg::flatten(args.into_iter().map(Into::into), &mut flat)?;
        if flat.is_empty() {
            return Err(CommandError::MissingProgram);
        }
        Ok(Self::from_parts(flat.into(), options))
    }

    fn from_parts(args: Arc<[ArgValue]>, options: Options) -> Self {
        Self {
            inner: Arc::new(CommandInner { args, options }),
        }
    }

    fn map_options(&self, f: impl FnOnce(&mut Options)) -> Self {
        let mut options = self.inner.options.clone();
        f(&mut options);
        Self::from_parts(self.inner.args.clone(), options)
    }

    fn try_map_options(
        &self,
        f: impl FnOnce(&mut Options) -> Result<(), CommandError>,
    ) -> Result<Self, CommandError> {
        let mut options = self.inner.options.clone();
        f(&mut options)?;
        Ok(Self::from_parts(self.inner.args.clone(), options))
    }

    // -- accessors ---------------------------------------------------------

    /// The program (first argument).
    pub fn program(&self) -> &ArgValue {
        &self.inner.args[0]
    }

    /// Every argument, program included.
    pub fn args(&self) -> &[ArgValue] {
        &self.inner.args
    }

    /// The options.
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Returns `true` when both handles point at the same command value.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Display name: the alternate name if set, otherwise the program,
    /// shortened to `...` plus its last 31 characters when longer.
    pub fn name(&self) -> String {
        if let Some(alt) = self.inner.options.alt_name() {
            return alt.to_string();
        }
        let program = self.program().to_string_lossy();
        let count = program.chars().count();
        if count <= MAX_NAME_CHARS {
            program
        } else {
            let tail: String = program.chars().skip(count - MAX_NAME_CHARS).collect();
            format!("...{tail}")
        }
    }

    // -- argument algebra ----------------------------------------------------

    /// Append arguments. An empty list returns this same command.
    pub fn with_args<I, A>(&self, args: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let mut extra = Vec::new();
        arg::flatten(args.into_iter().map(Into::into), &mut extra)?;
        if extra.is_empty() {
            return Ok(self.clone());
        }
        let mut all = self.inner.args.to_vec();
        all.extend(extra);
        Ok(Self::from_parts(all.into(), self.inner.options.clone()))
    }

    /// Concatenate argument lists, keeping this command's options.
    pub fn concat(&self, other: &Command) -> Self {
        let mut all = self.inner.args.to_vec();
        all.extend(other.inner.args.iter().cloned());
        Self::from_parts(all.into(), self.inner.options.clone())
    }

    // -- redirection -----------------------------------------------------------

    /// Redirect stdin.
    pub fn stdin(&self, target: impl Into<Redirect>) -> Result<Self, CommandError> {
        let target = target.into();
        self.try_map_options(|o| o.set_redirect(Stream::Stdin, target))
    }

    /// Redirect stdout.
    pub fn stdout(&self, target: impl Into<Redirect>) -> Result<Self, CommandError> {
        let target = target.into();
        self.try_map_options(|o| o.set_redirect(Stream::Stdout, target))
    }

    /// Redirect stderr.
    pub fn stderr(&self, target: impl Into<Redirect>) -> Result<Self, CommandError> {
        let target = target.into();
        self.try_map_options(|o| o.set_redirect(Stream::Stderr, target))
    }

    /// Append stdout to a file. Any target other than a path is
    /// [`CommandError::InvalidAppend`].
    pub fn stdout_append(&self, target: impl Into<Redirect>) -> Result<Self, CommandError> {
        let target = target.into().into_append()?;
        self.try_map_options(|o| o.set_redirect(Stream::Stdout, target))
    }

    /// Append stderr to a file. Any target other than a path is
    /// [`CommandError::InvalidAppend`].
    pub fn stderr_append(&self, target: impl Into<Redirect>) -> Result<Self, CommandError> {
        let target = target.into().into_append()?;
        self.try_map_options(|o| o.set_redirect(Stream::Stderr, target))
    }

    // -- environment and options -------------------------------------------------

    /// Set one environment variable. The value is stringified.
    pub fn env(&self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let (key, value) = (key.into(), EnvValue::Set(value.to_string()));
        self.map_options(|o| o.set_env(key, value))
    }

    /// Pass the parent's value of `key` through, even when inheritance is
    /// off.
    pub fn env_inherit(&self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.map_options(|o| o.set_env(key, EnvValue::Inherit))
    }

    /// Whether to start from the parent environment.
    pub fn inherit_env(&self, inherit: bool) -> Self {
        self.map_options(|o| o.inherit_env = inherit)
    }

    /// Working directory.
    pub fn cwd(&self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.map_options(|o| o.cwd = Some(dir))
    }

    /// Pseudo-terminal mode.
    pub fn pty(&self, mode: PtyMode) -> Self {
        self.map_options(|o| o.pty = mode)
    }

    /// Alternate display name.
    pub fn alt_name(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.map_options(|o| o.alt_name = Some(name))
    }

    /// Lifecycle hook.
    pub fn hook<F>(&self, hook: F) -> Self
    where
        F: Fn(Phase, &StageInfo) -> Result<(), HookError> + Send + Sync + 'static,
    {
        let hook = Hook::new(hook);
        self.map_options(|o| o.hook = Some(hook))
    }

    /// Accepted exit codes.
    pub fn exit_codes(&self, codes: ExitCodes) -> Self {
        self.map_options(|o| o.exit_codes = codes)
    }

    /// Output encoding.
    pub fn encoding(&self, encoding: Encoding) -> Self {
        self.map_options(|o| o.encoding = encoding)
    }

    /// Deadline for any pipeline containing this command.
    pub fn timeout(&self, timeout: Duration) -> Self {
        self.map_options(|o| o.timeout = Some(timeout))
    }

    /// Signal sent when the stage is cancelled.
    pub fn cancel_signal(&self, signal: Signal) -> Self {
        self.map_options(|o| o.cancel_signal = signal)
    }

    /// Grace period between the cancel signal and `SIGKILL`.
    pub fn cancel_timeout(&self, grace: Duration) -> Self {
        self.map_options(|o| o.cancel_timeout = grace)
    }

    // -- execution -----------------------------------------------------------------

    /// Run and return stdout decoded, with one trailing line terminator
    /// stripped.
    pub async fn output(&self) -> Result<String, RunError> {
        Pipeline::from(self.clone()).output().await
    }

    /// Run and return raw stdout.
    pub async fn output_bytes(&self) -> Result<Vec<u8>, RunError> {
        Pipeline::from(self.clone()).output_bytes().await
    }

    /// Run to completion.
    pub async fn run(&self) -> Result<PipelineResult, RunError> {
        Pipeline::from(self.clone()).run().await
    }

    /// Start and return the live runner.
    pub async fn start(&self) -> Result<Runner, RunError> {
        Pipeline::from(self.clone()).start().await
    }

    /// Run `f` against the live runner, then always finish the runner.
    /// See [`Pipeline::scope`].
    pub async fn scope<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: for<'r> FnOnce(&'r mut Runner) -> BoxFuture<'r, Result<R, E>>,
        E: From<RunError>,
    {
        Pipeline::from(self.clone()).scope(f).await
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        Command::ptr_eq(self, other) || self.inner == other.inner
    }
}

impl Eq for Command {}

impl Hash for Command {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Command", 2)?;
        st.serialize_field("args", &*self.inner.args)?;
        st.serialize_field("options", &self.inner.options)?;
        st.end()
    }
}

#[derive(Deserialize)]
struct CommandRepr {
    args: Vec<ArgValue>,
    options: Options,
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = CommandRepr::deserialize(deserializer)?;
        if repr.args.is_empty() {
            return Err(D::Error::custom(CommandError::MissingProgram));
        }
        Ok(Self::from_parts(repr.args.into(), repr.options))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program().to_string_lossy())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.inner.args.iter().map(ArgValue::to_string_lossy).collect();
        f.debug_struct("Command")
            .field("args", &args)
            .field("options", &self.inner.options)
            .finish()
    }
}

// -- operators -------------------------------------------------------------------

impl Rem for Command {
    type Output = Command;

    fn rem(self, rhs: Command) -> Command {
        self.concat(&rhs)
    }
}

impl Rem<&Command> for &Command {
    type Output = Command;

    fn rem(self, rhs: &Command) -> Command {
        self.concat(rhs)
    }
}

impl RemAssign for Command {
    fn rem_assign(&mut self, rhs: Command) {
        *self = self.concat(&rhs);
    }
}

impl BitOr for Command {
    type Output = Pipeline;

    fn bitor(self, rhs: Command) -> Pipeline {
        Pipeline::from(self) | Pipeline::from(rhs)
    }
}

impl BitOr<Pipeline> for Command {
    type Output = Pipeline;

    fn bitor(self, rhs: Pipeline) -> Pipeline {
        Pipeline::from(self) | rhs
    }
}

impl IntoFuture for Command {
    type Output = Result<String, RunError>;
    type IntoFuture = BoxFuture<'static, Result<String, RunError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.output().await })
    }
}
