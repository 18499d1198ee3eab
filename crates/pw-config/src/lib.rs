// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for pipewright.
//!
//! [`PipewrightConfig`] holds the engine defaults a `Context` starts from:
//! deadlines, the cancellation signal and grace period, the output encoding,
//! the prompt timeout and the exit-watcher strategy. It loads from TOML,
//! takes `PIPEWRIGHT_*` environment overrides, and validates into hard
//! errors plus advisory [`ConfigWarning`]s.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use pw_error::{Classify, ErrorKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

impl Classify for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A deadline is unusually large.
    LargeTimeout {
        /// Field name.
        field: String,
        /// Value in seconds.
        secs: u64,
    },
    /// The cancellation grace period is so short that children rarely get
    /// to clean up before `SIGKILL`.
    ShortCancelTimeout {
        /// Value in milliseconds.
        millis: u64,
    },
    /// Polling interval set while the tokio watcher is selected.
    UnusedPollInterval,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeTimeout { field, secs } => {
                write!(f, "'{field}' is unusually large ({secs}s)")
            }
            ConfigWarning::ShortCancelTimeout { millis } => {
                write!(f, "cancel_timeout_ms of {millis}ms leaves little time for cleanup")
            }
            ConfigWarning::UnusedPollInterval => {
                f.write_str("poll_interval_ms is ignored unless watcher = \"polling\"")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Which exit-watcher strategy to install process-wide.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatcherKind {
    /// tokio's SIGCHLD-driven reaper.
    #[default]
    Tokio,
    /// Periodic non-blocking `try_wait`.
    Polling,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct PipewrightConfig {
    /// Log level hint for the embedding application (e.g. `"debug"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Default pipeline deadline in seconds. `None` means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Grace period between the cancel signal and `SIGKILL`, in milliseconds.
    #[serde(default = "default_cancel_timeout_ms")]
    pub cancel_timeout_ms: u64,

    /// Signal sent to a stage being cancelled (e.g. `"SIGTERM"`).
    #[serde(default = "default_cancel_signal")]
    pub cancel_signal: String,

    /// Output encoding, optionally followed by an error policy
    /// (`"utf-8"`, `"utf-8 replace"`, `"latin-1"`).
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Default timeout for prompt round-trips, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_timeout_secs: Option<u64>,

    /// Exit-watcher strategy.
    #[serde(default)]
    pub watcher: WatcherKind,

    /// Poll interval for [`WatcherKind::Polling`], in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

fn default_cancel_timeout_ms() -> u64 {
    DEFAULT_CANCEL_TIMEOUT_MS
}

fn default_cancel_signal() -> String {
    "SIGTERM".into()
}

fn default_encoding() -> String {
    "utf-8".into()
}

impl Default for PipewrightConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".into()),
            timeout_secs: None,
            cancel_timeout_ms: default_cancel_timeout_ms(),
            cancel_signal: default_cancel_signal(),
            encoding: default_encoding(),
            prompt_timeout_secs: None,
            watcher: WatcherKind::Tokio,
            poll_interval_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default grace period before `SIGKILL`.
pub const DEFAULT_CANCEL_TIMEOUT_MS: u64 = 3_000;

/// Default poll interval for the polling watcher.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Maximum allowed timeout in seconds (24 hours).
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Threshold above which a timeout generates a warning.
const LARGE_TIMEOUT_THRESHOLD: u64 = 3_600;

/// Grace periods below this generate a warning.
const SHORT_CANCEL_TIMEOUT_MS: u64 = 10;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Signals accepted for `cancel_signal`.
const VALID_SIGNALS: &[&str] = &[
    "SIGTERM", "SIGINT", "SIGHUP", "SIGQUIT", "SIGKILL", "SIGUSR1", "SIGUSR2",
];

/// Recognised encoding names.
const VALID_ENCODINGS: &[&str] = &["utf-8", "utf8", "latin-1", "latin1", "iso-8859-1"];

/// Recognised encoding error policies.
const VALID_ERROR_POLICIES: &[&str] = &["strict", "replace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`PipewrightConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`PipewrightConfig::default()`].
///
/// Environment variable overrides from the current process are applied on
/// top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<PipewrightConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => PipewrightConfig::default(),
    };
    apply_env_overrides(&mut config, std::env::vars())?;
    Ok(config)
}

/// Parse a TOML string into a [`PipewrightConfig`].
pub fn parse_toml(content: &str) -> Result<PipewrightConfig, ConfigError> {
    toml::from_str::<PipewrightConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides from `vars`.
///
/// Recognised variables:
/// - `PIPEWRIGHT_LOG_LEVEL`
/// - `PIPEWRIGHT_TIMEOUT_SECS`
/// - `PIPEWRIGHT_CANCEL_TIMEOUT_MS`
/// - `PIPEWRIGHT_CANCEL_SIGNAL`
/// - `PIPEWRIGHT_ENCODING`
/// - `PIPEWRIGHT_PROMPT_TIMEOUT_SECS`
/// - `PIPEWRIGHT_WATCHER` (`tokio` | `polling`)
/// - `PIPEWRIGHT_POLL_INTERVAL_MS`
///
/// Unrelated variables are ignored. A recognised variable with an
/// unparsable value is a [`ConfigError::ParseError`].
pub fn apply_env_overrides<I, K, V>(config: &mut PipewrightConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (key, value) in vars {
        let value: String = value.into();
        match key.as_ref() {
            "PIPEWRIGHT_LOG_LEVEL" => config.log_level = Some(value),
            "PIPEWRIGHT_TIMEOUT_SECS" => config.timeout_secs = Some(parse_number(key.as_ref(), &value)?),
            "PIPEWRIGHT_CANCEL_TIMEOUT_MS" => {
                config.cancel_timeout_ms = parse_number(key.as_ref(), &value)?
            }
            "PIPEWRIGHT_CANCEL_SIGNAL" => config.cancel_signal = value,
            "PIPEWRIGHT_ENCODING" => config.encoding = value,
            "PIPEWRIGHT_PROMPT_TIMEOUT_SECS" => {
                config.prompt_timeout_secs = Some(parse_number(key.as_ref(), &value)?)
            }
            "PIPEWRIGHT_WATCHER" => {
                config.watcher = match value.as_str() {
                    "tokio" => WatcherKind::Tokio,
                    "polling" => WatcherKind::Polling,
                    other => {
                        return Err(ConfigError::ParseError {
                            reason: format!("PIPEWRIGHT_WATCHER: unknown watcher '{other}'"),
                        });
                    }
                }
            }
            "PIPEWRIGHT_POLL_INTERVAL_MS" => {
                config.poll_interval_ms = Some(parse_number(key.as_ref(), &value)?)
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_number(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::ParseError {
        reason: format!("{key}: expected an unsigned integer, got '{value}'"),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (unknown log level, signal or encoding, out-of-range
/// timeouts) come back as a [`ConfigError::ValidationError`].
pub fn validate_config(config: &PipewrightConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level {
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            errors.push(format!("invalid log_level '{level}'"));
        }
    }

    for (field, value) in [
        ("timeout_secs", config.timeout_secs),
        ("prompt_timeout_secs", config.prompt_timeout_secs),
    ] {
        if let Some(t) = value {
            if t == 0 || t > MAX_TIMEOUT_SECS {
                errors.push(format!(
                    "{field}: {t}s out of range (1..{MAX_TIMEOUT_SECS})"
                ));
            } else if t > LARGE_TIMEOUT_THRESHOLD {
                warnings.push(ConfigWarning::LargeTimeout {
                    field: field.into(),
                    secs: t,
                });
            }
        }
    }

    if config.cancel_timeout_ms < SHORT_CANCEL_TIMEOUT_MS {
        warnings.push(ConfigWarning::ShortCancelTimeout {
            millis: config.cancel_timeout_ms,
        });
    }

    if !VALID_SIGNALS.contains(&config.cancel_signal.as_str()) {
        errors.push(format!("invalid cancel_signal '{}'", config.cancel_signal));
    }

    let mut parts = config.encoding.split_whitespace();
    match parts.next() {
        Some(name) if VALID_ENCODINGS.contains(&name.to_ascii_lowercase().as_str()) => {}
        _ => errors.push(format!("invalid encoding '{}'", config.encoding)),
    }
    if let Some(policy) = parts.next() {
        if !VALID_ERROR_POLICIES.contains(&policy) {
            errors.push(format!("invalid encoding error policy '{policy}'"));
        }
    }
    if parts.next().is_some() {
        errors.push(format!("invalid encoding '{}'", config.encoding));
    }

    match (config.watcher, config.poll_interval_ms) {
        (WatcherKind::Polling, Some(0)) => {
            errors.push("poll_interval_ms must be at least 1".into());
        }
        (WatcherKind::Tokio, Some(_)) => warnings.push(ConfigWarning::UnusedPollInterval),
        _ => {}
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Optional values in `overlay` take precedence;
/// required values are taken from `overlay` when they differ from the
/// defaults.
pub fn merge_configs(base: PipewrightConfig, overlay: PipewrightConfig) -> PipewrightConfig {
    let defaults = PipewrightConfig::default();
    PipewrightConfig {
        log_level: overlay.log_level.or(base.log_level),
        timeout_secs: overlay.timeout_secs.or(base.timeout_secs),
        cancel_timeout_ms: if overlay.cancel_timeout_ms != defaults.cancel_timeout_ms {
            overlay.cancel_timeout_ms
        } else {
            base.cancel_timeout_ms
        },
        cancel_signal: if overlay.cancel_signal != defaults.cancel_signal {
            overlay.cancel_signal
        } else {
            base.cancel_signal
        },
        encoding: if overlay.encoding != defaults.encoding {
            overlay.encoding
        } else {
            base.encoding
        },
        prompt_timeout_secs: overlay.prompt_timeout_secs.or(base.prompt_timeout_secs),
        watcher: if overlay.watcher != defaults.watcher {
            overlay.watcher
        } else {
            base.watcher
        },
        poll_interval_ms: overlay.poll_interval_ms.or(base.poll_interval_ms),
    }
}

/// JSON schema of [`PipewrightConfig`], for editor tooling.
pub fn config_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(PipewrightConfig)).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
