// SPDX-License-Identifier: MIT OR Apache-2.0
//! External-process pipelines with composable redirection, pseudo-terminals,
//! deadlines and cancellation.
//!
//! [`Command`] and [`Options`] are immutable values. `|` joins commands into
//! a [`Pipeline`] and `%` concatenates argument lists. Running a pipeline
//! produces a [`Runner`], which owns every process, descriptor and pump task
//! it creates and releases them on every exit path.
//!
//! ```no_run
//! # async fn demo() -> Result<(), pw_process::RunError> {
//! use pw_process::{Arg, cmd};
//! let count = (cmd!("printf", "a\nb\n")? | cmd!("wc", "-l")?).await?;
//! assert_eq!(count.trim(), "2");
//!
//! let diff = cmd!("diff", Arg::output_of(cmd!("ls", "a")?), Arg::output_of(cmd!("ls", "b")?))?;
//! let _ = diff.run().await;
//! # Ok(()) }
//! ```
//!
//! Unix only.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod arg;
mod audit;
mod command;
mod context;
mod encoding;
mod error;
mod hook;
mod options;
mod pipeline;
mod redirect;
mod result;
mod runner;
mod watcher;

pub use arg::{Arg, ArgValue, Subst, SubstDirection};
pub use audit::{AUDIT_EVENT_SUBPROCESS_SPAWN, AuditEvent, AuditVeto, clear_audit_hook, set_audit_hook};
pub use command::Command;
pub use context::Context;
pub use encoding::{Charset, DecodeError, DecodeErrors, Encoding, EncodingParseError, decode};
pub use error::{CommandError, RunError};
pub use hook::{Hook, HookError, Phase, StageInfo};
pub use options::{DEFAULT_CANCEL_TIMEOUT, EnvValue, ExitCodes, Options, PtyMode};
pub use pipeline::Pipeline;
pub use redirect::{Redirect, Stream};
pub use result::{PipelineResult, Reason, RunState, StageResult};
pub use runner::{PtyMaster, Runner, StdinWriter, StdoutReader};
pub use watcher::{ExitWatcher, PollingWatcher, TokioWatcher, default_watcher, install_watcher, watcher_from_config};

pub use nix::sys::signal::Signal;
