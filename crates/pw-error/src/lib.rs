// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared error taxonomy for pipewright.
//!
//! Each crate keeps its own `thiserror` enum; this crate only provides the
//! broad [`ErrorKind`] every one of those enums maps onto, so callers can
//! branch on "what kind of failure" without matching crate-specific variants.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Broad family an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A command or option was built from invalid input. Raised before any
    /// process exists.
    InvalidConstruction,
    /// The input uses syntax reserved for a future feature.
    NotYetSupported,
    /// The operation cannot run on this platform or was vetoed.
    Unsupported,
    /// A process ran and failed, or its I/O failed.
    Execution,
    /// A configured deadline elapsed.
    Timeout,
    /// The operation was cancelled.
    Cancelled,
    /// Configuration could not be loaded or validated.
    Config,
}

impl ErrorKind {
    /// Stable `&'static str` tag (e.g. `"INVALID_CONSTRUCTION"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConstruction => "INVALID_CONSTRUCTION",
            Self::NotYetSupported => "NOT_YET_SUPPORTED",
            Self::Unsupported => "UNSUPPORTED",
            Self::Execution => "EXECUTION",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Config => "CONFIG",
        }
    }

    /// Returns `true` for failures detected before anything was spawned.
    pub fn is_construction(&self) -> bool {
        matches!(self, Self::InvalidConstruction | Self::NotYetSupported)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Classify
// ---------------------------------------------------------------------------

/// Implemented by every pipewright error enum.
pub trait Classify {
    /// The broad kind of this error.
    fn kind(&self) -> ErrorKind;
}

// ---------------------------------------------------------------------------
// ErrorReport
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an error and its source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error kind.
    pub kind: ErrorKind,
    /// Display text of the top-level error.
    pub message: String,
    /// Display text of each `source()` in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ErrorReport {
    /// Build a report from any classified error.
    pub fn new<E>(err: &E) -> Self
    where
        E: Classify + std::error::Error,
    {
        let mut causes = Vec::new();
        let mut next = err.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }
        Self {
            kind: err.kind(),
            message: err.to_string(),
            causes,
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        for cause in &self.causes {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}
