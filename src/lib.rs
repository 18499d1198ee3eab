// SPDX-License-Identifier: MIT OR Apache-2.0
//! pipewright
//!
//! Build external-process pipelines as values, run them under deadlines and
//! cancellation, and drive interactive programs line by line.
//!
//! This crate re-exports the workspace crates and adds the one-call
//! bootstrap an application usually wants: load configuration, install
//! logging, and get a [`Context`] plus the configured exit watcher.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! let setup = pipewright::setup(None)?;
//! pipewright::init_tracing(&setup.config)?;
//! setup.install_watcher();
//!
//! let ls = setup.context.command(["ls", "-1"])?;
//! let wc = setup.context.command(["wc", "-l"])?;
//! let count = (ls | wc).await?;
//! println!("{} entries", count.trim());
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use pw_cancel as cancel;
pub use pw_config as config;
pub use pw_error as error;
pub use pw_harvest as harvest;
pub use pw_process as process;
pub use pw_prompt as prompt;

pub use pw_process::{
    Arg, Command, CommandError, Context, Encoding, ExitCodes, ExitWatcher, Phase, Pipeline, PipelineResult, PtyMode,
    Reason, Redirect, RunError, RunState, Runner, StageResult, args, cmd,
};
pub use pw_prompt::{Prompt, PromptError, PromptState};

use anyhow::Context as _;
use pw_config::PipewrightConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Everything [`setup`] derives from one configuration.
#[derive(Debug, Clone)]
pub struct Setup {
    /// The loaded, validated configuration.
    pub config: PipewrightConfig,
    /// Default options for new commands.
    pub context: Context,
    /// The configured exit-watching strategy.
    pub watcher: Arc<dyn ExitWatcher>,
}

impl Setup {
    /// Make [`watcher`](Self::watcher) the process-wide default. Returns
    /// `false`, leaving the current one in place, if a default was already
    /// installed or used.
    pub fn install_watcher(&self) -> bool {
        match pw_process::install_watcher(self.watcher.clone()) {
            Ok(()) => true,
            Err(_) => {
                debug!(target: "pipewright", "exit watcher already installed");
                false
            }
        }
    }
}

/// Load configuration from `path` (or defaults) with `PIPEWRIGHT_*`
/// overrides, validate it, and build the context and watcher from it.
/// Validation warnings are logged.
pub fn setup(path: Option<&Path>) -> anyhow::Result<Setup> {
    let config = pw_config::load_config(path).context("load pipewright config")?;
    from_config(config)
}

/// [`setup`] for an already loaded configuration.
pub fn from_config(config: PipewrightConfig) -> anyhow::Result<Setup> {
    let warnings = pw_config::validate_config(&config).context("validate pipewright config")?;
    for warning in &warnings {
        warn!(target: "pipewright", %warning, "config warning");
    }
    let context = Context::from_config(&config).context("build default context")?;
    let watcher = pw_process::watcher_from_config(&config);
    Ok(Setup {
        config,
        context,
        watcher,
    })
}

/// Log filter for `config`: its `log_level` (default `info`) applied to
/// every `pipewright` target.
pub fn tracing_filter(config: &PipewrightConfig) -> EnvFilter {
    let level = config.log_level.as_deref().unwrap_or("info");
    EnvFilter::new(format!("pipewright={level}"))
}

/// Install a `fmt` subscriber filtered by [`tracing_filter`]. Fails if a
/// global subscriber is already set.
pub fn init_tracing(config: &PipewrightConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter(config))
        .try_init()
        .map_err(|e| anyhow::anyhow!("install tracing subscriber: {e}"))
}
