//! Harness error taxonomy
//!
//! Every fallible harness operation returns [`HarnessResult`]. Errors surface
//! directly to the calling test; the harness never retries on its own.

use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by harness operations.
#[derive(Debug, Error, Diagnostic)]
pub enum HarnessError {
    /// Directory creation/removal, symlink management or file access failed.
    #[error("filesystem error: cannot {action} '{}': {source}", .path.display())]
    #[diagnostic(code(harness::filesystem))]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The analyzer process could not be launched.
    #[error("failed to spawn '{program}': {source}")]
    #[diagnostic(
        code(harness::spawn),
        help("set PCAP_HARNESS_ANALYZER to the analyzer binary or build it next to the test tree")
    )]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A template is missing or references an undefined parameter.
    #[error("template error: {0}")]
    #[diagnostic(code(harness::template))]
    Template(#[from] minijinja::Error),

    /// A line of structured output is not valid JSON.
    #[error("cannot decode '{}' line {line}: {source}", .path.display())]
    #[diagnostic(code(harness::decode))]
    Decode {
        path: PathBuf,
        /// 1-based line number of the offending line
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A polled condition did not become true in time.
    #[error("timeout waiting for condition: waited {:.2}s (limit {:.2}s)", .elapsed.as_secs_f64(), .timeout.as_secs_f64())]
    #[diagnostic(code(harness::timeout))]
    Timeout { timeout: Duration, elapsed: Duration },

    /// The test identity cannot be used as a directory name.
    #[error("invalid test identity '{0}'")]
    #[diagnostic(
        code(harness::identity),
        help("identities must be non-empty and must not contain path separators")
    )]
    InvalidIdentity(String),

    /// Waiting on or signalling a started process failed.
    #[error("process {pid}: cannot {action}: {source}")]
    #[diagnostic(code(harness::process))]
    Process {
        pid: u32,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    pub(crate) fn fs(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn process(pid: u32, action: &'static str, source: std::io::Error) -> Self {
        HarnessError::Process { pid, action, source }
    }
}

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
