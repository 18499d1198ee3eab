// SPDX-License-Identifier: MIT OR Apache-2.0
//! The live handle for one pipeline execution.
//!
//! A [`Runner`] owns every child process, descriptor and pump task it
//! creates. [`Runner::wait`] supervises the stages with a
//! [`Harvest`](pw_harvest::Harvest): the first stage to fail cancels its
//! siblings, which get `cancel_signal`, then `cancel_timeout` to exit, then
//! `SIGKILL`. The pipeline deadline races all of them.

mod pump;
mod spawn;
pub(crate) mod sys;

pub use sys::{PtyMaster, StdinWriter, StdoutReader};

use crate::encoding::{Encoding, decode};
use crate::error::RunError;
use crate::hook::{Phase, StageInfo};
use crate::options::{Options, PtyMode};
use crate::pipeline::Pipeline;
use crate::result::{PipelineResult, Reason, RunState, StageResult};
use crate::watcher::{ExitWatcher, default_watcher};
use chrono::{DateTime, Utc};
use futures::Stream;
use futures::stream::{self, StreamExt};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use pump::{FLUSH_GRACE, SharedBuf};
use pw_cancel::{CancelReason, CancelToken};
use pw_harvest::{Harvest, HarvestError};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Byte sent to a terminal to signal end of input.
const VEOF: &[u8] = b"\x04";

/// One spawned process and everything attached to it.
#[derive(Debug)]
struct StageSlot {
    index: usize,
    name: String,
    options: Options,
    aux: bool,
    child: Child,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    pumps: Vec<JoinHandle<io::Result<()>>>,
    pump_stop: CancelToken,
    stdout: SharedBuf,
    stderr: SharedBuf,
    result: Option<StageResult>,
}

impl StageSlot {
    fn info(&self, exit_code: Option<i32>, failure: Option<RunError>) -> StageInfo {
        StageInfo {
            index: self.index,
            name: self.name.clone(),
            pid: self.pid,
            exit_code,
            failure,
        }
    }
}

/// Why a supervised stage made the harvest fail.
#[derive(Debug)]
enum StageFault {
    Rejected,
    Io(RunError),
}

/// Call the hook in `options`, keeping the first error it returns.
fn fire_hook(first_error: &Mutex<Option<RunError>>, options: &Options, phase: Phase, info: &StageInfo) {
    let Some(hook) = options.hook() else {
        return;
    };
    if let Err(source) = hook.call(phase, info) {
        warn!(target: "pipewright.runner", %phase, stage = %info.name, error = %source, "hook failed");
        let mut first = first_error.lock().unwrap_or_else(PoisonError::into_inner);
        if first.is_none() {
            *first = Some(RunError::Hook {
                phase,
                stage: info.name.clone(),
                source,
            });
        }
    }
}

/// Live (or finished) execution of a [`Pipeline`].
///
/// Single use: once finished it cannot be restarted. Dropping an unfinished
/// runner kills its children and aborts its pumps without waiting; use
/// [`wait`](Self::wait) or [`Pipeline::scope`] for an orderly shutdown.
#[derive(Debug)]
pub struct Runner {
    stages: Vec<StageSlot>,
    /// Slot of the last pipeline stage, which carries the pipeline's value.
    last: Option<usize>,
    cancel: CancelToken,
    deadline: Option<Duration>,
    started: Instant,
    watcher: Arc<dyn ExitWatcher>,
    stdin: Option<StdinWriter>,
    stdout: Option<StdoutReader>,
    state: RunState,
    outcome: Option<Result<PipelineResult, RunError>>,
    hook_error: Mutex<Option<RunError>>,
    pty: PtyMode,
    encoding: Encoding,
}

impl Runner {
    /// Start `pipeline` under the process-wide exit watcher.
    pub async fn start(pipeline: &Pipeline) -> Result<Self, RunError> {
        Self::start_with(pipeline, default_watcher()).await
    }

    /// Start `pipeline` under `watcher`.
    ///
    /// If any stage fails to spawn, the stages already running are
    /// cancelled and reaped before the error is returned.
    #[tracing::instrument(target = "pipewright.runner", level = "debug", skip_all, fields(stages = pipeline.len()))]
    pub async fn start_with(pipeline: &Pipeline, watcher: Arc<dyn ExitWatcher>) -> Result<Self, RunError> {
        let first = pipeline.stages().first();
        let last = pipeline.stages().last();
        let mut runner = Self {
            stages: Vec::with_capacity(pipeline.len()),
            last: None,
            cancel: CancelToken::new(),
            deadline: pipeline.deadline(),
            started: Instant::now(),
            watcher,
            stdin: None,
            stdout: None,
            state: RunState::Running,
            outcome: None,
            hook_error: Mutex::new(None),
            pty: first.map(|c| c.options().pty()).unwrap_or_default(),
            encoding: last.map(|c| c.options().encoding()).unwrap_or_default(),
        };
        match runner.launch(pipeline.stages()) {
            Ok(()) => Ok(runner),
            Err(err) => {
                warn!(
                    target: "pipewright.runner",
                    error = %err,
                    spawned = runner.stages.len(),
                    "start failed; unwinding spawned stages"
                );
                runner.cancel.cancel_with(CancelReason::Failure);
                if let Err(cleanup) = runner.wait().await {
                    debug!(target: "pipewright.runner", error = %cleanup, "unwound after failed start");
                }
                Err(err)
            }
        }
    }

    /// Supervise every stage to completion.
    ///
    /// Closes the caller's stdin writer and captures any stdout the caller
    /// has not read. The outcome is cached; later calls return it again.
    #[tracing::instrument(target = "pipewright.runner", level = "debug", skip_all, fields(stages = self.stages.len()))]
    pub async fn wait(&mut self) -> Result<PipelineResult, RunError> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        self.close_stdin().await;
        if let (Some(reader), Some(last)) = (self.stdout.take(), self.last) {
            let slot = &mut self.stages[last];
            slot.pumps.push(pump::capture(
                "stdout",
                slot.name.clone(),
                reader,
                slot.stdout.clone(),
                slot.pump_stop.clone(),
            ));
        }

        let remaining = self.deadline.map(|d| d.saturating_sub(self.started.elapsed()));
        let joined = {
            let hook_error = &self.hook_error;
            let mut harvest = Harvest::with_scope(&self.cancel).timeout(remaining);
            for slot in self.stages.iter_mut() {
                let watcher = self.watcher.clone();
                harvest.push(move |scope| supervise(slot, scope, watcher, hook_error));
            }
            harvest.join().await
        };

        let result = PipelineResult {
            stages: self.stages.iter().filter_map(|s| s.result.clone()).collect(),
        };
        let collected = result.reason();
        let hook_error = self.hook_error.lock().unwrap_or_else(PoisonError::into_inner).take();
        let (outcome, reason) = match joined {
            Ok(_) => match hook_error {
                Some(err) => (Err(err), collected),
                None => (Ok(result), collected),
            },
            Err(HarvestError::Failed(StageFault::Rejected)) => (Err(RunError::Exit(Box::new(result))), collected),
            Err(HarvestError::Failed(StageFault::Io(err))) => (Err(err), collected),
            Err(HarvestError::Timeout(_)) => (
                Err(RunError::Timeout {
                    after: self.deadline.unwrap_or_default(),
                    result: Box::new(result),
                }),
                Reason::TimedOut,
            ),
            Err(HarvestError::Cancelled) => (
                Err(RunError::Cancelled {
                    result: Box::new(result),
                }),
                Reason::Cancelled,
            ),
        };

        let next = RunState::Finished(reason);
        debug_assert!(self.state.can_transition(&next));
        self.state = next;
        debug!(target: "pipewright.runner", state = %self.state, "pipeline finished");
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Lines of the last stage's stdout, decoded under its encoding, with
    /// terminators kept.
    ///
    /// At end of output the runner is finished; a failure is yielded as the
    /// final item. Stops early when the runner is cancelled or its deadline
    /// elapses.
    pub fn lines(&mut self) -> impl Stream<Item = Result<String, RunError>> + Send + '_ {
        let encoding = self.encoding;
        self.byte_lines()
            .map(move |line| line.and_then(|bytes| decode(&bytes, encoding).map_err(RunError::from)))
    }

    /// Raw-bytes variant of [`lines`](Self::lines).
    pub fn byte_lines(&mut self) -> impl Stream<Item = Result<Vec<u8>, RunError>> + Send + '_ {
        let reader = self.stdout.take().map(BufReader::new);
        stream::unfold(Some((self, reader)), |state| async move {
            let (runner, mut reader) = state?;
            if let Some(buffered) = reader.as_mut() {
                let mut line = Vec::new();
                match runner.next_line(buffered, &mut line).await {
                    Ok(true) => return Some((Ok(line), Some((runner, reader)))),
                    Ok(false) => {}
                    Err(e) => {
                        warn!(target: "pipewright.runner", error = %e, "reading stdout failed");
                        runner.cancel.cancel_with(CancelReason::Failure);
                        if let Err(cleanup) = runner.wait().await {
                            debug!(target: "pipewright.runner", error = %cleanup, "unwound after read failure");
                        }
                        return Some((Err(RunError::io(e)), None));
                    }
                }
            }
            drop(reader);
            match runner.wait().await {
                Ok(_) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Read one line, giving up quietly on cancellation or deadline.
    async fn next_line(&self, reader: &mut BufReader<StdoutReader>, line: &mut Vec<u8>) -> io::Result<bool> {
        let deadline = self.deadline.map(|d| self.started + d);
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            read = reader.read_until(b'\n', line) => read.map(|n| n > 0),
            _ = self.cancel.cancelled() => Ok(false),
            _ = expired => Ok(false),
        }
    }

    /// Writer for the first stage's `Capture` stdin.
    pub fn stdin_mut(&mut self) -> Option<&mut StdinWriter> {
        self.stdin.as_mut()
    }

    /// Close the caller's stdin writer. On a terminal this sends end-of-file
    /// first. Does nothing when already closed.
    pub async fn close_stdin(&mut self) {
        let Some(mut writer) = self.stdin.take() else {
            return;
        };
        if writer.is_pty() {
            if let Err(e) = writer.write_all(VEOF).await {
                debug!(target: "pipewright.runner", error = %e, "sending end-of-file to terminal");
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!(target: "pipewright.runner", error = %e, "closing stdin");
        }
    }

    /// Reader for the last stage's `Capture` stdout, until
    /// [`wait`](Self::wait) or [`lines`](Self::lines) takes it over.
    pub fn stdout_mut(&mut self) -> Option<&mut StdoutReader> {
        self.stdout.as_mut()
    }

    /// Request cancellation. Takes effect in [`wait`](Self::wait), or right
    /// away if it is already running.
    pub fn cancel(&self) {
        debug!(target: "pipewright.runner", "cancel requested");
        self.cancel.cancel();
    }

    /// The runner's cancellation token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The finished result, including one carried by an error.
    pub fn result(&self) -> Option<&PipelineResult> {
        match self.outcome.as_ref()? {
            Ok(result) => Some(result),
            Err(err) => err.result(),
        }
    }

    /// Process ids in spawn order.
    pub fn pids(&self) -> Vec<u32> {
        self.stages.iter().filter_map(|s| s.pid).collect()
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Pty mode of the first stage.
    pub fn pty_mode(&self) -> PtyMode {
        self.pty
    }

    /// Encoding of the last stage.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if self.state.is_finished() {
            return;
        }
        self.cancel.cancel();
        for slot in &mut self.stages {
            slot.pump_stop.cancel();
            for pump in &slot.pumps {
                pump.abort();
            }
            if let Err(e) = slot.child.start_kill() {
                debug!(target: "pipewright.runner", stage = %slot.name, error = %e, "kill on drop");
            }
        }
        debug!(target: "pipewright.runner", stages = self.stages.len(), "dropped unfinished runner");
    }
}

/// Wait for one stage, terminate it if the scope is cancelled first, drain
/// its pumps and record its result.
async fn supervise(
    slot: &mut StageSlot,
    scope: CancelToken,
    watcher: Arc<dyn ExitWatcher>,
    hook_error: &Mutex<Option<RunError>>,
) -> Result<(), StageFault> {
    if let Some(result) = &slot.result {
        return verdict(result.reason);
    }

    let exited = tokio::select! {
        status = watcher.wait(&mut slot.child) => Some(status),
        _ = scope.cancelled() => None,
    };
    let (status, terminated) = match exited {
        Some(status) => (status, false),
        None => terminate(slot, watcher.as_ref(), hook_error).await,
    };
    drain(slot, &scope).await;

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            let err = RunError::io(e);
            fire_hook(hook_error, &slot.options, Phase::Stop, &slot.info(None, Some(err.clone())));
            return Err(StageFault::Io(err));
        }
    };

    let reason = classify(&slot.options, status, terminated, &scope);
    let result = StageResult {
        name: slot.name.clone(),
        pid: slot.pid,
        exit_code: status.code(),
        signal: status.signal(),
        reason,
        stdout: pump::take(&slot.stdout),
        stderr: pump::take(&slot.stderr),
        started_at: slot.started_at,
        ended_at: Utc::now(),
        aux: slot.aux,
    };
    debug!(
        target: "pipewright.runner",
        stage = %slot.name,
        exit_code = ?result.exit_code,
        signal = ?result.signal,
        %reason,
        "stage finished"
    );
    let failure = (!result.success()).then(|| RunError::Stage {
        name: slot.name.clone(),
        reason,
        exit_code: result.exit_code,
    });
    fire_hook(hook_error, &slot.options, Phase::Stop, &slot.info(result.exit_code, failure));
    slot.result = Some(result);
    verdict(reason)
}

/// Stages the runner terminated report through the harvest trigger, not as
/// their own failure.
fn verdict(reason: Reason) -> Result<(), StageFault> {
    match reason {
        Reason::NonZero | Reason::Signalled => Err(StageFault::Rejected),
        Reason::Success | Reason::TimedOut | Reason::Cancelled => Ok(()),
    }
}

fn classify(options: &Options, status: ExitStatus, terminated: bool, scope: &CancelToken) -> Reason {
    if terminated {
        return match scope.reason() {
            Some(CancelReason::Deadline) => Reason::TimedOut,
            _ => Reason::Cancelled,
        };
    }
    match status.code() {
        Some(code) if options.exit_codes().accepts(code) => Reason::Success,
        Some(_) => Reason::NonZero,
        None => Reason::Signalled,
    }
}

/// Send the cancel signal, give the stage its grace period, then kill it.
/// Returns `terminated = false` if it had already exited on its own.
async fn terminate(
    slot: &mut StageSlot,
    watcher: &dyn ExitWatcher,
    hook_error: &Mutex<Option<RunError>>,
) -> (io::Result<ExitStatus>, bool) {
    if let Ok(status) = tokio::time::timeout(Duration::ZERO, watcher.wait(&mut slot.child)).await {
        return (status, false);
    }
    fire_hook(hook_error, &slot.options, Phase::Signal, &slot.info(None, None));

    let signal = slot.options.cancel_signal();
    if let Some(pid) = slot.pid {
        debug!(target: "pipewright.runner", stage = %slot.name, pid, signal = signal.as_str(), "terminating");
        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(target: "pipewright.runner", stage = %slot.name, error = %e, "sending cancel signal"),
        }
    }
    let grace = slot.options.cancel_timeout();
    let status = match tokio::time::timeout(grace, watcher.wait(&mut slot.child)).await {
        Ok(status) => status,
        Err(_) => {
            warn!(target: "pipewright.runner", stage = %slot.name, ?grace, "still running after cancel signal; killing");
            if let Err(e) = slot.child.start_kill() {
                warn!(target: "pipewright.runner", stage = %slot.name, error = %e, "kill failed");
            }
            watcher.wait(&mut slot.child).await
        }
    };
    (status, true)
}

/// Await every pump, removing each handle only once it has completed. If
/// this future is dropped part way, the unfinished handles stay in `pumps`
/// where [`Runner`]'s `Drop` can abort them.
async fn join_pumps(pumps: &mut Vec<JoinHandle<io::Result<()>>>) -> Vec<Result<io::Result<()>, JoinError>> {
    let mut done = Vec::with_capacity(pumps.len());
    while let Some(handle) = pumps.last_mut() {
        let joined = handle.await;
        pumps.pop();
        done.push(joined);
    }
    done
}

/// Wait for the stage's pumps. Under cancellation they get [`FLUSH_GRACE`]
/// to finish before being told to stop.
async fn drain(slot: &mut StageSlot, scope: &CancelToken) {
    if slot.pumps.is_empty() {
        return;
    }
    let all = join_pumps(&mut slot.pumps);
    tokio::pin!(all);
    let finished = tokio::select! {
        done = &mut all => Some(done),
        _ = scope.cancelled() => None,
    };
    let done = match finished {
        Some(done) => done,
        None => match tokio::time::timeout(FLUSH_GRACE, &mut all).await {
            Ok(done) => done,
            Err(_) => {
                debug!(target: "pipewright.pump", stage = %slot.name, "flush grace elapsed; stopping pumps");
                slot.pump_stop.cancel();
                all.await
            }
        },
    };
    for joined in done {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(target: "pipewright.pump", stage = %slot.name, error = %e, "pump ended with error"),
            Err(e) => warn!(target: "pipewright.pump", stage = %slot.name, error = %e, "pump task failed"),
        }
    }
}
