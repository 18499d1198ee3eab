// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered stages connected by pipes.

use crate::command::Command;
use crate::encoding::decode;
use crate::error::RunError;
use crate::redirect::{Redirect, Stream};
use crate::result::PipelineResult;
use crate::runner::Runner;
use futures::future::BoxFuture;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::future::IntoFuture;
use std::ops::BitOr;
use std::time::Duration;
use tracing::{debug, warn};

/// Commands whose stdout feeds the next command's stdin.
///
/// The pipeline's value comes from the last stage; it fails if any stage
/// fails. Connecting pipes take precedence over the stdin of every stage but
/// the first and the stdout of every stage but the last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Pipeline {
    stages: Vec<Command>,
    timeout: Option<Duration>,
}

impl Pipeline {
    /// The stages, in order.
    pub fn stages(&self) -> &[Command] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always `false`: a pipeline has at least one stage.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Set a pipeline-wide deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The effective deadline: the pipeline's own, or else the shortest
    /// stage timeout.
    pub fn deadline(&self) -> Option<Duration> {
        self.timeout
            .or_else(|| self.stages.iter().filter_map(|c| c.options().timeout()).min())
    }

    /// Start every stage and return the live runner.
    pub async fn start(&self) -> Result<Runner, RunError> {
        Runner::start(self).await
    }

    /// Run to completion and return every stage's result.
    pub async fn run(&self) -> Result<PipelineResult, RunError> {
        let mut runner = self.start().await?;
        runner.wait().await
    }

    /// Run and return the last stage's raw stdout.
    pub async fn output_bytes(&self) -> Result<Vec<u8>, RunError> {
        let mut result = self.run().await?;
        Ok(result.take_stdout())
    }

    /// Run and return the last stage's stdout, decoded under its encoding,
    /// with one trailing `\n` or `\r\n` stripped.
    pub async fn output(&self) -> Result<String, RunError> {
        let encoding = self
            .stages
            .last()
            .map(|c| c.options().encoding())
            .unwrap_or_default();
        let bytes = self.output_bytes().await?;
        let mut text = decode(&bytes, encoding)?;
        if text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }
        Ok(text)
    }

    /// Run `f` against the live runner, then always finish the runner.
    ///
    /// When `f` succeeds the pipeline's own failure, if any, is returned.
    /// When `f` fails the runner is cancelled and drained first; errors from
    /// that cleanup are logged and `f`'s error is returned.
    ///
    /// ```no_run
    /// # async fn demo() -> Result<(), pw_process::RunError> {
    /// use pw_process::{cmd, Redirect};
    /// use tokio::io::AsyncReadExt;
    /// let cat = cmd!("cat")?.stdin(Redirect::Capture)?;
    /// let n = cat
    ///     .scope(|runner| Box::pin(async move {
    ///         runner.close_stdin().await;
    ///         let mut buf = Vec::new();
    ///         if let Some(out) = runner.stdout_mut() {
    ///             out.read_to_end(&mut buf).await?;
    ///         }
    ///         Ok::<_, pw_process::RunError>(buf.len())
    ///     }))
    ///     .await?;
    /// assert_eq!(n, 0);
    /// # Ok(()) }
    /// ```
    pub async fn scope<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: for<'r> FnOnce(&'r mut Runner) -> BoxFuture<'r, Result<R, E>>,
        E: From<RunError>,
    {
        let mut runner = self.start().await?;
        match f(&mut runner).await {
            Ok(value) => {
                runner.wait().await?;
                Ok(value)
            }
            Err(err) => {
                runner.cancel();
                match runner.wait().await {
                    Ok(_) | Err(RunError::Cancelled { .. }) => {
                        debug!(target: "pipewright.runner", "scope body failed; runner drained")
                    }
                    Err(cleanup) => {
                        warn!(target: "pipewright.runner", error = %cleanup, "cleanup after failed scope")
                    }
                }
                Err(err)
            }
        }
    }
}

#[derive(Deserialize)]
struct PipelineRepr {
    stages: Vec<Command>,
    timeout: Option<Duration>,
}

impl<'de> Deserialize<'de> for Pipeline {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let PipelineRepr { stages, timeout } = PipelineRepr::deserialize(deserializer)?;
        if stages.is_empty() {
            return Err(D::Error::custom("a pipeline needs at least one stage"));
        }
        Ok(Self { stages, timeout })
    }
}

/// Splice `Redirect::Command` targets into neighbouring stages.
impl From<Command> for Pipeline {
    fn from(command: Command) -> Self {
        let mut stages = Vec::new();
        let mut command = command;
        if let Redirect::Command(source) = command.options().redirect(Stream::Stdin) {
            stages.extend(Pipeline::from(source.clone()).stages);
            command = command.stdin(Redirect::Default).unwrap_or(command);
        }
        let sink = match command.options().redirect(Stream::Stdout) {
            Redirect::Command(sink) => Some(sink.clone()),
            _ => None,
        };
        if sink.is_some() {
            command = command.stdout(Redirect::Capture).unwrap_or(command);
        }
        stages.push(command);
        if let Some(sink) = sink {
            stages.extend(Pipeline::from(sink).stages);
        }
        Self {
            stages,
            timeout: None,
        }
    }
}

impl BitOr for Pipeline {
    type Output = Pipeline;

    fn bitor(mut self, rhs: Pipeline) -> Pipeline {
        self.stages.extend(rhs.stages);
        self.timeout = match (self.timeout, rhs.timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self
    }
}

impl BitOr<Command> for Pipeline {
    type Output = Pipeline;

    fn bitor(self, rhs: Command) -> Pipeline {
        self | Pipeline::from(rhs)
    }
}

impl IntoFuture for Pipeline {
    type Output = Result<String, RunError>;
    type IntoFuture = BoxFuture<'static, Result<String, RunError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.output().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd;

    #[test]
    fn serialized_pipelines_read_back_equal() {
        let pipeline = (cmd!("printf", "b\na\n").unwrap() | cmd!("sort").unwrap().stderr(Redirect::Null).unwrap())
            .timeout(Duration::from_secs(5));
        let json = serde_json::to_string(&pipeline).unwrap();
        let back: Pipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pipeline);
        assert_eq!(back.deadline(), Some(Duration::from_secs(5)));

        let empty = serde_json::json!({ "stages": [], "timeout": null });
        assert!(serde_json::from_value::<Pipeline>(empty).is_err());
    }

    #[test]
    fn redirect_to_command_becomes_stages() {
        let source = cmd!("printf", "x").unwrap();
        let sink = cmd!("wc", "-c").unwrap();
        let middle = cmd!("cat")
            .unwrap()
            .stdin(Redirect::Command(source.clone()))
            .unwrap()
            .stdout(Redirect::Command(sink.clone()))
            .unwrap();
        let pipeline = Pipeline::from(middle);
        let names: Vec<String> = pipeline.stages().iter().map(Command::name).collect();
        assert_eq!(names, ["printf", "cat", "wc"]);
        assert_eq!(pipeline.stages()[0], source);
        assert_eq!(pipeline.stages()[2], sink);
    }

    #[test]
    fn deadline_prefers_pipeline_timeout() {
        let a = cmd!("a").unwrap().timeout(Duration::from_secs(5));
        let b = cmd!("b").unwrap().timeout(Duration::from_secs(2));
        let p = a | b;
        assert_eq!(p.deadline(), Some(Duration::from_secs(2)));
        assert_eq!(
            p.timeout(Duration::from_secs(9)).deadline(),
            Some(Duration::from_secs(9))
        );
    }
}
