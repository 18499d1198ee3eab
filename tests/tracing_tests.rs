// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured log output from running pipelines and prompts.
//!
//! A capturing `fmt` subscriber is installed as the thread default; the
//! current-thread test runtime keeps every spawned task on that thread.

use pipewright::{Prompt, PtyMode, Redirect, RunError, cmd};
use pipewright::config::PipewrightConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

// ---------------------------------------------------------------------------
// Capturing infrastructure
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;
    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }

    fn lines_for(&self, target: &str) -> Vec<String> {
        let needle = format!("{target}:");
        self.contents()
            .lines()
            .filter(|line| line.contains(&needle))
            .map(str::to_string)
            .collect()
    }
}

fn capturing_subscriber() -> (tracing::subscriber::DefaultGuard, CapturedLogs) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (guard, logs)
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[tokio::test]
async fn each_stage_logs_its_spawn() {
    let (_guard, logs) = capturing_subscriber();
    let out = (cmd!("printf", "a\nb\n").unwrap() | cmd!("wc", "-l").unwrap())
        .output()
        .await
        .unwrap();
    assert_eq!(out.trim(), "2");

    let runner = logs.lines_for("pipewright.runner");
    let spawned: Vec<_> = runner.iter().filter(|l| l.contains("spawned")).collect();
    assert_eq!(spawned.len(), 2, "{runner:#?}");
    assert!(spawned[0].contains("stage=printf"), "{}", spawned[0]);
    assert!(spawned[1].contains("stage=wc"), "{}", spawned[1]);
    assert!(runner.iter().any(|l| l.contains("pipeline finished")), "{runner:#?}");
}

#[tokio::test]
async fn spawns_are_audited() {
    let (_guard, logs) = capturing_subscriber();
    cmd!("true").unwrap().run().await.unwrap();

    let audit = logs.lines_for("pipewright.audit");
    assert_eq!(audit.len(), 1, "{audit:#?}");
    assert!(audit[0].contains("pipewright.subprocess.spawn"), "{}", audit[0]);
    assert!(audit[0].contains("program=/"), "{}", audit[0]);
}

#[tokio::test]
async fn cancellation_logs_the_signal_sent() {
    let (_guard, logs) = capturing_subscriber();
    let mut runner = cmd!("sleep", "10").unwrap().start().await.unwrap();
    runner.cancel();
    let err = runner.wait().await.unwrap_err();
    assert!(matches!(err, RunError::Cancelled { .. }), "{err:?}");

    let runner_logs = logs.lines_for("pipewright.runner");
    let terminating = runner_logs
        .iter()
        .find(|l| l.contains("terminating"))
        .unwrap_or_else(|| panic!("no terminating line in {runner_logs:#?}"));
    assert!(terminating.contains("SIGTERM"), "{terminating}");
    assert!(runner_logs.iter().any(|l| l.contains("cancel requested")));
}

#[tokio::test]
async fn stage_results_are_logged_with_their_reason() {
    let (_guard, logs) = capturing_subscriber();
    let err = cmd!("sh", "-c", "exit 3").unwrap().run().await.unwrap_err();
    assert!(matches!(err, RunError::Exit(_)), "{err:?}");

    let finished: Vec<_> = logs
        .lines_for("pipewright.runner")
        .into_iter()
        .filter(|l| l.contains("stage finished"))
        .collect();
    assert_eq!(finished.len(), 1, "{finished:#?}");
    assert!(finished[0].contains("exit_code=Some(3)"), "{}", finished[0]);
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompt_round_trips_are_logged() {
    let (_guard, logs) = capturing_subscriber();
    let mut runner = cmd!("sh", "-c", r#"printf "> "; while read l; do echo "$l"; printf "> "; done"#)
        .unwrap()
        .stdin(Redirect::Capture)
        .unwrap()
        .pty(PtyMode::CookedNoEcho)
        .start()
        .await
        .unwrap();
    {
        let mut prompt = Prompt::new(&mut runner, "> ").unwrap().timeout(Duration::from_secs(5));
        prompt.send(None).await.unwrap();
        assert_eq!(prompt.send(Some("hi")).await.unwrap(), "hi");
        prompt.close();
    }
    runner.close_stdin().await;
    runner.wait().await.unwrap();

    let prompt_logs = logs.lines_for("pipewright.prompt");
    assert_eq!(
        prompt_logs.iter().filter(|l| l.contains("matched")).count(),
        2,
        "{prompt_logs:#?}"
    );
    assert!(prompt_logs.iter().any(|l| l.contains("closed")));
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

#[test]
fn config_warnings_are_logged_by_setup() {
    let (_guard, logs) = capturing_subscriber();
    let config = PipewrightConfig {
        cancel_timeout_ms: 5,
        ..PipewrightConfig::default()
    };
    pipewright::from_config(config).unwrap();

    let warnings: Vec<_> = logs
        .contents()
        .lines()
        .filter(|l| l.contains("config warning"))
        .map(str::to_string)
        .collect();
    assert_eq!(warnings.len(), 1, "{warnings:#?}");
    assert!(warnings[0].contains("WARN"));
    assert!(warnings[0].contains("cancel_timeout_ms of 5ms"), "{}", warnings[0]);
}
