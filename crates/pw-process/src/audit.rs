// SPDX-License-Identifier: MIT OR Apache-2.0
//! Spawn auditing.
//!
//! A single process-wide hook sees every spawn before it happens and may
//! veto it. Every spawn is also logged at `debug` on `pipewright.audit`.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

/// Name of the event reported before each spawn.
pub const AUDIT_EVENT_SUBPROCESS_SPAWN: &str = "pipewright.subprocess.spawn";

/// Everything known about a process about to be spawned.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Always [`AUDIT_EVENT_SUBPROCESS_SPAWN`].
    pub event: &'static str,
    /// Program resolved through `PATH`, or as given when not found.
    pub program: PathBuf,
    /// Arguments, program first.
    pub args: Vec<OsString>,
    /// Names of the variables in the child environment.
    pub env_keys: BTreeSet<OsString>,
    /// Working directory, when set.
    pub cwd: Option<PathBuf>,
}

/// Returned by an audit hook to stop a spawn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AuditVeto(pub String);

type AuditFn = dyn Fn(&AuditEvent) -> Result<(), AuditVeto> + Send + Sync;

static AUDIT_HOOK: RwLock<Option<Arc<AuditFn>>> = RwLock::new(None);

/// Install (or replace) the process-wide audit hook.
pub fn set_audit_hook<F>(hook: F)
where
    F: Fn(&AuditEvent) -> Result<(), AuditVeto> + Send + Sync + 'static,
{
    *AUDIT_HOOK.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
}

/// Remove the audit hook.
pub fn clear_audit_hook() {
    *AUDIT_HOOK.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Report `event`; called immediately before the OS spawn.
pub(crate) fn emit(event: &AuditEvent) -> Result<(), AuditVeto> {
    debug!(
        target: "pipewright.audit",
        event = event.event,
        program = %event.program.display(),
        argc = event.args.len(),
        env_keys = event.env_keys.len(),
        cwd = ?event.cwd,
        "spawn"
    );
    let hook = AUDIT_HOOK
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match hook {
        Some(hook) => hook(event),
        None => Ok(()),
    }
}

/// Locate `program` on `PATH` the way a shell would. Names containing a
/// separator are taken as paths.
pub(crate) fn which(program: &Path, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.exists().then(|| program.to_path_buf());
    }
    let path_var = path_var?;
    std::env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn which_finds_sh() {
        let path = std::env::var_os("PATH");
        let found = which(Path::new("sh"), path.as_deref()).expect("sh on PATH");
        assert!(found.is_absolute());
        assert!(which(Path::new("no-such-binary-pw"), path.as_deref()).is_none());
    }

    #[test]
    fn which_takes_paths_verbatim() {
        assert_eq!(which(Path::new("/bin/sh"), None), Some(PathBuf::from("/bin/sh")));
        assert_eq!(which(Path::new("./definitely/missing"), None), None);
    }
}
