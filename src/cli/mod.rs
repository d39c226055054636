//! CLI module for pcap-harness
//!
//! Operator front-end over the harness library, for replaying a capture by
//! hand or inspecting what a test left behind.
//!
//! ## Commands
//!
//! - `replay <capture>` - Render a config, replay the capture, print the records
//! - `records <file>` - Decode an output file
//! - `grep <log> <text>` - Search a captured log (exit 0 on match, 1 otherwise)
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::HarnessConfig;

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
    /// The command itself could not do its job (unreadable file, bad input).
    pub const ERROR: ExitCode = ExitCode(2);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a new CLI error with a message and exit code.
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create an error with a custom exit code.
    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        Self::new(message, ExitCode(code))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Packet analyzer integration harness
#[derive(Parser, Debug)]
#[command(name = "pcap-harness")]
#[command(version = VERSION)]
#[command(about = "Replay captures through a packet analyzer and inspect its output", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Harness base directory (holds run/ and last_run)
    #[arg(long, global = true, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Analyzer executable
    #[arg(long, global = true, value_name = "PATH")]
    pub analyzer: Option<PathBuf>,

    /// Analyzer name, used for default file names
    #[arg(long, global = true, value_name = "NAME")]
    pub name: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render a config, replay a capture and print the decoded records
    Replay {
        /// Capture file, relative to the capture directory
        #[arg(value_name = "CAPTURE")]
        capture: PathBuf,
        /// Working directory identity (default: replay.<capture stem>)
        #[arg(long, value_name = "ID")]
        id: Option<String>,
        /// Template to render (default: <name>.conf.j2)
        #[arg(long, value_name = "TEMPLATE")]
        template: Option<String>,
        /// Template parameter; the value is parsed as JSON when possible
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Extra analyzer argument (repeatable)
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Debug selector (repeatable)
        #[arg(short = 'd', long = "debug", value_name = "SELECTOR")]
        debug: Vec<String>,
        /// Stop the analyzer if it runs longer than this many seconds
        #[arg(long, value_name = "SECS", value_parser = parse_secs)]
        timeout: Option<Duration>,
    },

    /// Decode a structured output file
    Records {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Pretty-print each record
        #[arg(long)]
        pretty: bool,
    },

    /// Search a captured log for a literal string
    Grep {
        #[arg(value_name = "LOG")]
        log: PathBuf,
        #[arg(value_name = "TEXT")]
        text: String,
    },
}

fn parse_secs(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw.parse().map_err(|e| format!("invalid seconds '{}': {}", raw, e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid seconds '{}': {}", raw, e))
}

impl Cli {
    /// Environment-derived configuration with the global flags applied on top.
    pub fn harness_config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::from_env();
        if let Some(name) = &self.name {
            config = config.with_analyzer_name(name.clone());
        }
        if let Some(dir) = &self.base_dir {
            config = config.with_base_dir(dir.clone());
        }
        if let Some(analyzer) = &self.analyzer {
            config = config.with_analyzer(analyzer.clone());
        }
        config
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let config = cli.harness_config();

    match cli.command {
        Some(Command::Replay {
            capture,
            id,
            template,
            params,
            args,
            debug,
            timeout,
        }) => commands::replay(
            config,
            commands::ReplayRequest {
                capture,
                id,
                template,
                params,
                args,
                debug,
                timeout,
            },
        ),
        Some(Command::Records { file, pretty }) => commands::print_records(&file, pretty),
        Some(Command::Grep { log, text }) => commands::grep_log(&log, &text),
        None => Err(CliError::with_code(
            "Error: no command given (try `pcap-harness --help`)",
            ExitCode::ERROR.0,
        )),
    }
}

// ============================================================================
// Tests
// ============================================================================
