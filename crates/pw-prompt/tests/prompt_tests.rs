// SPDX-License-Identifier: MIT OR Apache-2.0
//! Driving a small line-reading loop through pipes and through a pty.

use pw_error::{Classify, ErrorKind};
use pw_process::{Command, Context, PtyMode, Redirect, Runner, cmd};
use pw_prompt::{Prompt, PromptError, PromptState};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MARKER: &str = "> ";

const LOOP: &str = r#"printf "> "; while read line; do [ "$line" = quit ] && exit 0; echo "got $line"; printf "> "; done"#;

const SLOW_LOOP: &str =
    r#"printf "> "; while read line; do echo "start $line"; sleep 0.3; echo "end"; printf "> "; done"#;

fn repl(script: &str) -> Command {
    cmd!("sh", "-c", script).unwrap().stdin(Redirect::Capture).unwrap()
}

async fn finish(mut runner: Runner) -> pw_process::PipelineResult {
    runner.close_stdin().await;
    runner.wait().await.unwrap()
}

// ---------------------------------------------------------------------------
// Pipes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_returns_text_before_the_marker() {
    let mut runner = repl(LOOP).start().await.unwrap();
    {
        let mut prompt = Prompt::new(&mut runner, MARKER).unwrap().timeout(Duration::from_secs(5));
        assert_eq!(prompt.state(), PromptState::Idle);
        assert_eq!(prompt.send(None).await.unwrap(), "");
        assert_eq!(prompt.send(Some("a")).await.unwrap(), "got a");
        assert_eq!(prompt.send(Some("b c")).await.unwrap(), "got b c");
        assert_eq!(prompt.state(), PromptState::Idle);
        prompt.close();
    }
    let result = finish(runner).await;
    assert_eq!(result.exit_code(), Some(0));
}

#[tokio::test]
async fn multi_line_responses_keep_inner_newlines() {
    let mut runner = repl(SLOW_LOOP).start().await.unwrap();
    let mut prompt = Prompt::new(&mut runner, MARKER).unwrap().timeout(Duration::from_secs(5));
    prompt.send(None).await.unwrap();
    assert_eq!(prompt.send(Some("x")).await.unwrap(), "start x\nend");
    prompt.close();
    finish(runner).await;
}

#[tokio::test]
async fn undecodable_response_stays_pending() {
    let script = r#"printf 'ok\377> '; while read line; do echo "got $line"; printf "> "; done"#;
    let mut runner = repl(script).start().await.unwrap();
    {
        let mut prompt = Prompt::new(&mut runner, MARKER).unwrap().timeout(Duration::from_secs(5));
        let err = prompt.send(None).await.unwrap_err();
        assert!(matches!(err, PromptError::Decode(_)), "{err:?}");
        assert_eq!(prompt.state(), PromptState::Idle);
        assert_eq!(prompt.pending(), b"ok\xff> ");

        assert_eq!(prompt.take_pending(), b"ok\xff> ");
        assert!(prompt.pending().is_empty());
        assert_eq!(prompt.send(Some("a")).await.unwrap(), "got a");
        prompt.close();
    }
    finish(runner).await;
}

#[tokio::test]
async fn timeout_keeps_unread_output() {
    let mut runner = repl(SLOW_LOOP).start().await.unwrap();
    let mut prompt = Prompt::new(&mut runner, MARKER).unwrap();
    prompt.send_with_timeout(None, Some(Duration::from_secs(5))).await.unwrap();

    let err = prompt
        .send_with_timeout(Some("x"), Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, PromptError::Timeout { .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(prompt.state(), PromptState::TimedOut);
    assert_eq!(prompt.pending(), b"start x\n");

    let rest = prompt.send_with_timeout(None, Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(rest, "start x\nend");
    assert_eq!(prompt.state(), PromptState::Idle);
    prompt.close();
    finish(runner).await;
}

#[tokio::test]
async fn end_of_output_closes_the_prompt() {
    let mut runner = repl(LOOP).start().await.unwrap();
    {
        let mut prompt = Prompt::new(&mut runner, MARKER).unwrap().timeout(Duration::from_secs(5));
        prompt.send(None).await.unwrap();
        let err = prompt.send(Some("quit")).await.unwrap_err();
        assert!(matches!(err, PromptError::Closed), "{err:?}");
        assert_eq!(prompt.state(), PromptState::Closed);
        assert!(matches!(prompt.send(None).await, Err(PromptError::Closed)));
    }
    assert_eq!(finish(runner).await.exit_code(), Some(0));
}

#[tokio::test]
async fn uncaptured_stdout_is_rejected() {
    let mut runner = cmd!("true")
        .unwrap()
        .stdout(Redirect::Null)
        .unwrap()
        .start()
        .await
        .unwrap();
    let err = Prompt::new(&mut runner, MARKER).unwrap_err();
    assert!(matches!(err, PromptError::NotInteractive("stdout")), "{err:?}");
    assert!(err.kind().is_construction());
    runner.wait().await.unwrap();
}

#[tokio::test]
async fn sending_without_captured_stdin_fails() {
    let mut runner = cmd!("sh", "-c", "printf '> '; sleep 5").unwrap().start().await.unwrap();
    {
        let mut prompt = Prompt::new(&mut runner, MARKER).unwrap().timeout(Duration::from_secs(5));
        prompt.send(None).await.unwrap();
        let err = prompt.send(Some("x")).await.unwrap_err();
        assert!(matches!(err, PromptError::NotInteractive("stdin")), "{err:?}");
    }
    runner.cancel();
    assert!(runner.wait().await.is_err());
}

#[tokio::test]
async fn empty_marker_is_rejected() {
    let mut runner = repl(LOOP).start().await.unwrap();
    let err = Prompt::new(&mut runner, "").unwrap_err();
    assert!(matches!(err, PromptError::InvalidMarker { .. }), "{err:?}");
    finish(runner).await;
}

#[tokio::test]
async fn context_supplies_the_default_timeout() {
    let mut ctx = Context::new();
    ctx.set_prompt_timeout(Duration::from_millis(50));
    let mut runner = ctx.command(["sleep", "5"]).unwrap().start().await.unwrap();
    {
        let mut prompt = Prompt::from_context(&mut runner, MARKER, &ctx).unwrap();
        let err = prompt.send(None).await.unwrap_err();
        assert!(
            matches!(err, PromptError::Timeout { after, .. } if after == Duration::from_millis(50)),
            "{err:?}"
        );
    }
    runner.cancel();
    assert!(runner.wait().await.is_err());
}

#[tokio::test]
async fn prompt_inside_a_scope() {
    let replies = repl(LOOP)
        .scope(|runner| {
            Box::pin(async move {
                let mut prompt = Prompt::new(runner, MARKER)?.timeout(Duration::from_secs(5));
                prompt.send(None).await?;
                let one = prompt.send(Some("1")).await?;
                let two = prompt.send(Some("2")).await?;
                prompt.close();
                runner.close_stdin().await;
                Ok::<_, anyhow::Error>(vec![one, two])
            })
        })
        .await
        .unwrap();
    assert_eq!(replies, ["got 1", "got 2"]);
}

// ---------------------------------------------------------------------------
// Pty
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cooked_pty_echo_is_stripped() {
    let mut runner = repl(LOOP).pty(PtyMode::Cooked).start().await.unwrap();
    {
        let mut prompt = Prompt::new(&mut runner, MARKER).unwrap().timeout(Duration::from_secs(5));
        prompt.send(None).await.unwrap();
        assert_eq!(prompt.send(Some("a")).await.unwrap(), "got a");
        prompt.close();
    }
    {
        let mut raw = Prompt::new(&mut runner, MARKER)
            .unwrap()
            .echo(false)
            .timeout(Duration::from_secs(5));
        assert_eq!(raw.send(Some("b")).await.unwrap(), "b\ngot b");
        let err = raw.send(Some("quit")).await.unwrap_err();
        assert!(matches!(err, PromptError::Closed), "{err:?}");
    }
    assert_eq!(runner.wait().await.unwrap().exit_code(), Some(0));
}

#[tokio::test]
async fn no_echo_pty_returns_output_only() {
    let mut runner = repl(LOOP).pty(PtyMode::CookedNoEcho).start().await.unwrap();
    {
        let mut prompt = Prompt::new(&mut runner, MARKER).unwrap().timeout(Duration::from_secs(5));
        prompt.send(None).await.unwrap();
        assert_eq!(prompt.send(Some("a")).await.unwrap(), "got a");
        assert_eq!(prompt.send(Some("")).await.unwrap(), "got ");
        prompt.close();
    }
    runner.close_stdin().await;
    assert_eq!(runner.wait().await.unwrap().exit_code(), Some(0));
}
