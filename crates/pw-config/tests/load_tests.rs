// SPDX-License-Identifier: MIT OR Apache-2.0
//! File-based loading tests for `pw-config`.

use pw_config::{ConfigError, WatcherKind, load_config, validate_config};
use std::io::Write;

#[test]
fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
cancel_timeout_ms = 250
watcher = "polling"
poll_interval_ms = 10
prompt_timeout_secs = 5
"#
    )
    .unwrap();

    let cfg = load_config(Some(file.path())).unwrap();
    assert_eq!(cfg.prompt_timeout_secs, Some(5));
    let warnings = validate_config(&cfg).unwrap();
    assert!(warnings.is_empty(), "{warnings:?}");
    // Env may override the watcher in CI; only check the file value when unset.
    if std::env::var_os("PIPEWRIGHT_WATCHER").is_none() {
        assert_eq!(cfg.watcher, WatcherKind::Polling);
    }
    if std::env::var_os("PIPEWRIGHT_CANCEL_TIMEOUT_MS").is_none() {
        assert_eq!(cfg.cancel_timeout_ms, 250);
    }
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
    match err {
        ConfigError::FileNotFound { path } => assert!(path.ends_with("absent.toml")),
        other => panic!("expected FileNotFound, got {other:?}"),
    }
}

#[test]
fn unknown_keys_are_rejected_by_validation_not_parse() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cancel_signal = \"SIGWINCH\"").unwrap();
    let cfg = load_config(Some(file.path())).unwrap();
    if std::env::var_os("PIPEWRIGHT_CANCEL_SIGNAL").is_none() {
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
