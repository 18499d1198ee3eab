// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end: configuration file to context, then pipelines, substitutions
//! and a prompt session built from that context.

use pipewright::config::WatcherKind;
use pipewright::process::{Charset, Signal};
use pipewright::{Arg, Prompt, Reason, Redirect, RunError, cmd};
use std::io::Write;
use std::time::Duration;

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn setup_reads_a_config_file() {
    let file = write_config(
        r#"
            timeout_secs = 30
            cancel_timeout_ms = 500
            cancel_signal = "SIGINT"
            encoding = "latin-1"
            prompt_timeout_secs = 2
            watcher = "polling"
            poll_interval_ms = 15
        "#,
    );
    let setup = pipewright::setup(Some(file.path())).unwrap();

    assert_eq!(setup.config.watcher, WatcherKind::Polling);
    let options = setup.context.options();
    assert_eq!(options.timeout(), Some(Duration::from_secs(30)));
    assert_eq!(setup.context.prompt_timeout(), Some(Duration::from_secs(2)));
    assert_eq!(options.encoding().charset, Charset::Latin1);
    assert_eq!(options.cancel_signal(), Signal::SIGINT);
    assert_eq!(options.cancel_timeout(), Duration::from_millis(500));
    let watcher = format!("{:?}", setup.watcher);
    assert!(watcher.contains("PollingWatcher") && watcher.contains("15ms"), "{watcher}");
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = pipewright::setup(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(format!("{err:#}").contains("load pipewright config"), "{err:#}");
}

#[test]
fn invalid_config_file_is_an_error() {
    let file = write_config("encoding = \"ebcdic\"\n");
    let err = pipewright::setup(Some(file.path())).unwrap_err();
    assert!(format!("{err:#}").contains("validate pipewright config"), "{err:#}");
}

#[tokio::test]
async fn context_commands_run_with_configured_defaults() {
    let file = write_config("timeout_secs = 1\ncancel_timeout_ms = 200\n");
    let setup = pipewright::setup(Some(file.path())).unwrap();

    let quick = setup.context.command(["echo", "fine"]).unwrap();
    assert_eq!(quick.await.unwrap(), "fine");

    let slow = setup.context.command(["sleep", "10"]).unwrap();
    let err = slow.run().await.unwrap_err();
    let RunError::Timeout { result, .. } = &err else {
        panic!("expected Timeout, got {err:?}");
    };
    assert_eq!(result.reason(), Reason::TimedOut);
}

#[tokio::test]
async fn substitution_feeds_a_pipeline_into_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.txt");

    let sorted = cmd!("sh", "-c", "printf 'pear\\napple\\nfig\\n' | sort").unwrap();
    let numbered = cmd!("cat", "-n", Arg::output_of(sorted)).unwrap();
    let pipeline = numbered | cmd!("tr", "-s", " ").unwrap().stdout(report.as_path()).unwrap();
    let result = pipeline.run().await.unwrap();
    assert!(result.success());
    assert_eq!(result.stages.iter().filter(|s| s.aux).count(), 1);

    let text = std::fs::read_to_string(&report).unwrap();
    let words: Vec<_> = text.lines().filter_map(|l| l.split_whitespace().nth(1)).collect();
    assert_eq!(words, ["apple", "fig", "pear"]);
}

#[tokio::test]
async fn prompt_session_from_context() {
    let file = write_config("prompt_timeout_secs = 5\n");
    let setup = pipewright::setup(Some(file.path())).unwrap();

    let calc = setup
        .context
        .command([
            "sh",
            "-c",
            r#"printf "= "; while read a b; do echo $((a + b)); printf "= "; done"#,
        ])
        .unwrap()
        .stdin(Redirect::Capture)
        .unwrap();
    let mut runner = calc.start().await.unwrap();
    {
        let mut prompt = Prompt::from_context(&mut runner, "= ", &setup.context).unwrap();
        prompt.send(None).await.unwrap();
        assert_eq!(prompt.send(Some("1 2")).await.unwrap(), "3");
        assert_eq!(prompt.send(Some("40 2")).await.unwrap(), "42");
        prompt.close();
    }
    runner.close_stdin().await;
    let result = runner.wait().await.unwrap();
    assert_eq!(result.exit_code(), Some(0));
}
