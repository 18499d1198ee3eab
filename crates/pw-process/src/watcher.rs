// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pluggable strategies for awaiting child exit.
//!
//! The runner never reaps processes itself; it asks an [`ExitWatcher`].
//! One watcher is installed per process with [`install_watcher`]; runners
//! started without an explicit watcher use [`default_watcher`].

use async_trait::async_trait;
use pw_config::{DEFAULT_POLL_INTERVAL_MS, PipewrightConfig, WatcherKind};
use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Child;

/// Suspends until a child process exits.
#[async_trait]
pub trait ExitWatcher: Send + Sync + fmt::Debug {
    /// Wait for `child` to exit and return its status. Must be safe to drop
    /// before completion.
    async fn wait(&self, child: &mut Child) -> io::Result<ExitStatus>;
}

/// tokio's SIGCHLD-driven reaper.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioWatcher;

#[async_trait]
impl ExitWatcher for TokioWatcher {
    async fn wait(&self, child: &mut Child) -> io::Result<ExitStatus> {
        child.wait().await
    }
}

/// Polls `try_wait` on a fixed interval. Useful where SIGCHLD is owned by
/// other code.
#[derive(Debug, Clone, Copy)]
pub struct PollingWatcher {
    interval: Duration,
}

impl PollingWatcher {
    /// Poll every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for PollingWatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }
}

#[async_trait]
impl ExitWatcher for PollingWatcher {
    async fn wait(&self, child: &mut Child) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

static WATCHER: OnceLock<Arc<dyn ExitWatcher>> = OnceLock::new();

/// Install the process-wide watcher. Fails, returning `watcher`, if one was
/// already installed or the default was already taken.
pub fn install_watcher(watcher: Arc<dyn ExitWatcher>) -> Result<(), Arc<dyn ExitWatcher>> {
    WATCHER.set(watcher)
}

/// The process-wide watcher, installing [`TokioWatcher`] on first use.
pub fn default_watcher() -> Arc<dyn ExitWatcher> {
    WATCHER.get_or_init(|| Arc::new(TokioWatcher)).clone()
}

/// Build the watcher selected by `config`.
pub fn watcher_from_config(config: &PipewrightConfig) -> Arc<dyn ExitWatcher> {
    match config.watcher {
        WatcherKind::Tokio => Arc::new(TokioWatcher),
        WatcherKind::Polling => Arc::new(PollingWatcher::new(Duration::from_millis(
            config.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        ))),
    }
}
