#![forbid(unsafe_code)]
//! pcap-harness: integration tests for a packet analyzer
//!
//! The analyzer under test is an opaque executable. Each test renders a
//! configuration from a template, replays a recorded capture through the
//! analyzer (or starts it in the background), and inspects what it left
//! behind: newline-delimited JSON records and its captured log. Every test
//! owns `run/<identity>/` under the harness base directory, and `last_run`
//! points at the newest one.
//!
//! ## Panic Policy
//!
//! This codebase follows explicit error handling:
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. Every fallible operation returns
//!   [`HarnessResult`]; the `cli` module enforces `#![deny(clippy::unwrap_used)]`.
//!
//! - **Cleanup code**: `Drop` implementations never panic. Errors raised while terminating a process are logged with
//!   `tracing::warn!` and swallowed.
//!
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

pub mod case;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod log;
pub mod output;
pub mod process;
pub mod render;
pub mod run;
pub mod sync;
pub mod workdir;

pub use case::TestCase;
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use identity::TestIdentity;
pub use log::log_contains;
pub use output::{OutputRecord, count_records, read_output};
pub use process::ProcessHandle;
pub use render::{ConfigRenderer, HarnessContext, TemplateParams};
pub use run::{AnalyzerRunner, RunOptions, RunOutcome};
pub use sync::wait_until;
pub use workdir::WorkingDirectory;
