// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wiring and spawning stages.
//!
//! Stages are spawned strictly left to right. A stage's substituted commands
//! are spawned just before it. Every descriptor the parent opens for a child
//! is close-on-exec and is dropped right after that child is spawned; the
//! only descriptors a child inherits are its three standard streams and the
//! `/dev/fd/N` ends of its substitutions.

use super::pump::{self, SharedBuf};
use super::sys::{self, PtyMaster, StdinWriter, StdoutReader};
use super::{Runner, StageSlot, fire_hook};
use crate::arg::{ArgValue, SubstDirection};
use crate::audit::{self, AUDIT_EVENT_SUBPROCESS_SPAWN, AuditEvent};
use crate::command::Command;
use crate::error::{CommandError, RunError};
use crate::hook::{Phase, StageInfo};
use crate::options::Options;
use crate::redirect::{Redirect, Stream};
use chrono::Utc;
use pw_cancel::CancelToken;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

/// Descriptor directory used to name substitution pipes.
const DEV_FD: &str = "/dev/fd";

/// What the child gets for one standard stream.
#[derive(Debug)]
enum ChildEnd {
    Fd(OwnedFd),
    Inherit,
    Null,
}

impl ChildEnd {
    /// A second handle on the same target, for `2>&1`.
    fn duplicate(&self) -> io::Result<ChildEnd> {
        match self {
            Self::Fd(fd) => fd.try_clone().map(Self::Fd),
            Self::Inherit => io::stdout().as_fd().try_clone_to_owned().map(Self::Fd),
            Self::Null => Ok(Self::Null),
        }
    }
}

impl From<ChildEnd> for Stdio {
    fn from(end: ChildEnd) -> Self {
        match end {
            ChildEnd::Fd(fd) => Stdio::from(fd),
            ChildEnd::Inherit => Stdio::inherit(),
            ChildEnd::Null => Stdio::null(),
        }
    }
}

/// Resolved streams for one stage, plus the parent-side endpoints.
#[derive(Debug)]
struct Wiring {
    stdin: ChildEnd,
    stdout: ChildEnd,
    stderr: ChildEnd,
    stdin_writer: Option<StdinWriter>,
    feed: Option<(StdinWriter, Vec<u8>)>,
    stdout_reader: Option<StdoutReader>,
    stderr_reader: Option<StdoutReader>,
    /// Pty slave, held until the child has taken it as its terminal.
    terminal: Option<OwnedFd>,
}

/// Where a command sits in the run.
#[derive(Debug, Clone, Copy)]
pub(super) struct Placement {
    pub(super) index: usize,
    pub(super) aux: bool,
    pub(super) first: bool,
    pub(super) last: bool,
}

impl Placement {
    fn helper(index: usize) -> Self {
        Self {
            index,
            aux: true,
            first: false,
            last: false,
        }
    }
}

fn open_path(stream: Stream, path: &Path, append: bool) -> io::Result<File> {
    let opened = if stream == Stream::Stdin {
        File::open(path)
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)
    };
    opened.map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}

/// Targets that need no parent-side endpoint.
fn plain_end(stream: Stream, target: &Redirect) -> Result<ChildEnd, RunError> {
    match target {
        Redirect::Path { path, append } => Ok(ChildEnd::Fd(open_path(stream, path, *append)?.into())),
        Redirect::Fd(fd) => Ok(ChildEnd::Fd(sys::dup_raw(*fd)?)),
        Redirect::Null => Ok(ChildEnd::Null),
        Redirect::Inherit => Ok(ChildEnd::Inherit),
        Redirect::Command(_) => Err(RunError::Unsupported {
            operation: "redirecting a substituted command to another command",
            reason: "pipe the commands together instead".into(),
        }),
        other => Err(CommandError::InvalidRedirect {
            stream,
            target: other.kind(),
        }
        .into()),
    }
}

/// Resolve every stream of `options`. `stdin` and `stdout` override the
/// configured redirects when the stage is connected to a neighbour or is a
/// substitution helper.
fn wire(options: &Options, stdin: Option<OwnedFd>, stdout: Option<OwnedFd>) -> Result<Wiring, RunError> {
    let pty = if options.pty().is_enabled() {
        Some(sys::open_pty(options.pty().echoes())?)
    } else {
        None
    };

    let mut stdin_writer = None;
    let mut feed = None;
    let stdin = match stdin {
        Some(fd) => ChildEnd::Fd(fd),
        None => match options.redirect(Stream::Stdin) {
            // On a terminal, the default stdin is the terminal itself.
            target @ (Redirect::Capture | Redirect::Default) => match &pty {
                Some((master, slave)) => {
                    stdin_writer = Some(StdinWriter::Pty(PtyMaster::new(master.try_clone()?)?));
                    ChildEnd::Fd(slave.try_clone()?)
                }
                None if *target == Redirect::Default => ChildEnd::Null,
                None => {
                    let (read, write) = sys::pipe_cloexec()?;
                    stdin_writer = Some(StdinWriter::pipe(write)?);
                    ChildEnd::Fd(read)
                }
            },
            Redirect::Feed(bytes) => {
                let (read, write) = sys::pipe_cloexec()?;
                feed = Some((StdinWriter::pipe(write)?, bytes.clone()));
                ChildEnd::Fd(read)
            }
            other => plain_end(Stream::Stdin, other)?,
        },
    };

    let mut stdout_reader = None;
    let stdout = match stdout {
        Some(fd) => ChildEnd::Fd(fd),
        None => match options.redirect(Stream::Stdout) {
            Redirect::Capture => match &pty {
                Some((master, slave)) => {
                    stdout_reader = Some(StdoutReader::Pty(PtyMaster::new(master.try_clone()?)?));
                    ChildEnd::Fd(slave.try_clone()?)
                }
                None => {
                    let (read, write) = sys::pipe_cloexec()?;
                    stdout_reader = Some(StdoutReader::pipe(read)?);
                    ChildEnd::Fd(write)
                }
            },
            other => plain_end(Stream::Stdout, other)?,
        },
    };

    let mut stderr_reader = None;
    let stderr = match options.redirect(Stream::Stderr) {
        Redirect::Stdout => stdout.duplicate()?,
        // On a terminal, stderr shares the stdout stream.
        Redirect::Capture => match &pty {
            Some((_, slave)) => ChildEnd::Fd(slave.try_clone()?),
            None => {
                let (read, write) = sys::pipe_cloexec()?;
                stderr_reader = Some(StdoutReader::pipe(read)?);
                ChildEnd::Fd(write)
            }
        },
        other => plain_end(Stream::Stderr, other)?,
    };

    Ok(Wiring {
        stdin,
        stdout,
        stderr,
        stdin_writer,
        feed,
        stdout_reader,
        stderr_reader,
        terminal: pty.map(|(_, slave)| slave),
    })
}

/// Substitutions name their pipe as `/dev/fd/N`; without that directory
/// they cannot work at all.
fn check_fd_dir() -> Result<(), RunError> {
    if Path::new(DEV_FD).is_dir() {
        Ok(())
    } else {
        Err(RunError::Unsupported {
            operation: "process substitution",
            reason: format!("{DEV_FD} is not available on this system"),
        })
    }
}

fn audit_event(options: &Options, env: Option<&BTreeMap<OsString, OsString>>, argv: &[OsString]) -> AuditEvent {
    let env_keys: BTreeSet<OsString> = match env {
        Some(env) => env.keys().cloned().collect(),
        None => std::env::vars_os().map(|(k, _)| k).collect(),
    };
    let path_var = match env {
        Some(env) => env.get(&OsString::from("PATH")).cloned(),
        None => std::env::var_os("PATH"),
    };
    let program = Path::new(&argv[0]);
    AuditEvent {
        event: AUDIT_EVENT_SUBPROCESS_SPAWN,
        program: audit::which(program, path_var.as_deref()).unwrap_or_else(|| program.to_path_buf()),
        args: argv.to_vec(),
        env_keys,
        cwd: options.cwd().map(PathBuf::from),
    }
}

impl Runner {
    /// Spawn every stage of `stages`, left to right, connecting neighbours
    /// with pipes.
    pub(super) fn launch(&mut self, stages: &[Command]) -> Result<(), RunError> {
        let count = stages.len();
        let mut upstream: Option<OwnedFd> = None;
        for (index, command) in stages.iter().enumerate() {
            let (next, stdout) = if index + 1 < count {
                let (read, write) = sys::pipe_cloexec()?;
                (Some(read), Some(write))
            } else {
                (None, None)
            };
            let placement = Placement {
                index,
                aux: false,
                first: index == 0,
                last: index + 1 == count,
            };
            self.launch_command(command, placement, upstream.take(), stdout)?;
            upstream = next;
        }
        Ok(())
    }

    fn launch_command(
        &mut self,
        command: &Command,
        placement: Placement,
        stdin: Option<OwnedFd>,
        stdout: Option<OwnedFd>,
    ) -> Result<(), RunError> {
        // Substitutions first, so their pipe ends exist before the outer
        // argument list is built.
        let mut argv = Vec::with_capacity(command.args().len());
        let mut passed: Vec<OwnedFd> = Vec::new();
        for arg in command.args() {
            match arg {
                ArgValue::Subst(subst) => {
                    check_fd_dir()?;
                    let (read, write) = sys::pipe_cloexec()?;
                    let kept = match subst.direction {
                        SubstDirection::Output => {
                            self.launch_command(&subst.command, Placement::helper(placement.index), None, Some(write))?;
                            read
                        }
                        SubstDirection::Input => {
                            self.launch_command(&subst.command, Placement::helper(placement.index), Some(read), None)?;
                            write
                        }
                    };
                    argv.push(OsString::from(format!("{DEV_FD}/{}", kept.as_raw_fd())));
                    passed.push(kept);
                }
                other => argv.extend(other.to_os_string()),
            }
        }

        let name = command.name();
        let options = command.options();
        match self.spawn_process(command, placement, argv, &passed, stdin, stdout) {
            Ok(()) => Ok(()),
            Err(err) => {
                let info = StageInfo {
                    index: placement.index,
                    name,
                    pid: None,
                    exit_code: None,
                    failure: Some(err.clone()),
                };
                fire_hook(&self.hook_error, options, Phase::Stop, &info);
                Err(err)
            }
        }
    }

    fn spawn_process(
        &mut self,
        command: &Command,
        placement: Placement,
        argv: Vec<OsString>,
        passed: &[OwnedFd],
        stdin: Option<OwnedFd>,
        stdout: Option<OwnedFd>,
    ) -> Result<(), RunError> {
        let name = command.name();
        let options = command.options();
        let wiring = wire(options, stdin, stdout)?;
        let env = options.merged_env();

        let mut child_cmd = tokio::process::Command::new(&argv[0]);
        child_cmd
            .args(&argv[1..])
            .stdin(wiring.stdin)
            .stdout(wiring.stdout)
            .stderr(wiring.stderr)
            .kill_on_drop(true);
        if let Some(env) = &env {
            child_cmd.env_clear().envs(env);
        }
        if let Some(cwd) = options.cwd() {
            child_cmd.current_dir(cwd);
        }
        let inherit: Vec<RawFd> = passed.iter().map(AsRawFd::as_raw_fd).collect();
        sys::prepare_child(&mut child_cmd, inherit, wiring.terminal.as_ref().map(AsRawFd::as_raw_fd));

        let event = audit_event(options, env.as_ref(), &argv);
        audit::emit(&event).map_err(|veto| RunError::Vetoed {
            program: name.clone(),
            reason: veto.0,
        })?;

        let child = child_cmd.spawn().map_err(|e| RunError::spawn(name.clone(), e))?;
        // Close the parent's copies of everything the child now owns.
        drop(child_cmd);
        drop(wiring.terminal);

        let pid = child.id();
        info!(
            target: "pipewright.runner",
            stage = %name,
            index = placement.index,
            aux = placement.aux,
            pid,
            "spawned"
        );

        let mut slot = StageSlot {
            index: placement.index,
            name: name.clone(),
            options: options.clone(),
            aux: placement.aux,
            child,
            pid,
            started_at: Utc::now(),
            pumps: Vec::new(),
            pump_stop: CancelToken::new(),
            stdout: SharedBuf::default(),
            stderr: SharedBuf::default(),
            result: None,
        };

        if let Some(reader) = wiring.stderr_reader {
            slot.pumps.push(pump::capture("stderr", name.clone(), reader, slot.stderr.clone(), slot.pump_stop.clone()));
        }
        if let Some((writer, bytes)) = wiring.feed {
            slot.pumps.push(pump::feed(name.clone(), writer, bytes, slot.pump_stop.clone()));
        }
        if let Some(reader) = wiring.stdout_reader {
            if placement.last {
                self.stdout = Some(reader);
            } else {
                slot.pumps.push(pump::capture("stdout", name.clone(), reader, slot.stdout.clone(), slot.pump_stop.clone()));
            }
        }
        match wiring.stdin_writer {
            Some(writer) if placement.first => self.stdin = Some(writer),
            // Nobody can write to a helper's stdin; dropping it sends EOF.
            Some(_) => debug!(target: "pipewright.runner", stage = %name, "closing captured stdin of a helper"),
            None => {}
        }

        fire_hook(&self.hook_error, options, Phase::Start, &slot.info(None, None));
        if placement.last {
            self.last = Some(self.stages.len());
        }
        self.stages.push(slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PtyMode;

    #[test]
    fn merge_duplicates_the_stdout_target() {
        let (_read, write) = sys::pipe_cloexec().unwrap();
        let raw = write.as_raw_fd();
        let end = ChildEnd::Fd(write);
        match end.duplicate().unwrap() {
            ChildEnd::Fd(dup) => assert_ne!(dup.as_raw_fd(), raw),
            other => panic!("expected a descriptor, got {other:?}"),
        }
        assert!(matches!(ChildEnd::Null.duplicate().unwrap(), ChildEnd::Null));
    }

    #[tokio::test]
    async fn capture_on_every_stream_opens_parent_ends() {
        let wiring = wire(&Options::default(), None, None).unwrap();
        assert!(wiring.stdout_reader.is_some());
        assert!(wiring.stderr_reader.is_some());
        assert!(wiring.stdin_writer.is_none());
        assert!(matches!(wiring.stdin, ChildEnd::Null));
    }

    #[tokio::test]
    async fn default_stdin_on_a_pty_is_the_terminal() {
        let options = Options {
            pty: PtyMode::Cooked,
            ..Options::default()
        };
        let wiring = wire(&options, None, None).unwrap();
        assert!(matches!(wiring.stdin_writer, Some(StdinWriter::Pty(_))));
        assert!(matches!(wiring.stdin, ChildEnd::Fd(_)));
        assert!(wiring.terminal.is_some());

        let upstream = sys::pipe_cloexec().unwrap().0;
        let connected = wire(&options, Some(upstream), None).unwrap();
        assert!(connected.stdin_writer.is_none());
    }

    #[tokio::test]
    async fn stdin_path_must_exist() {
        let options = Options {
            stdin: Redirect::path("/definitely/not/here"),
            ..Options::default()
        };
        let err = wire(&options, None, None).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"));
    }
}
