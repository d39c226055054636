//! Stand-in analyzer for the harness's own tests
//!
//! Speaks the analyzer CLI contract (`-e -I <capture> -c <config> -t -d a,b`).
//! Captures are newline-delimited JSON; every line is "published" unchanged to
//! the configured output file. Log lines go to both stdout and stderr so
//! tests can check that the two streams land in one file.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

const HEARTBEAT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "mock-analyzer")]
#[command(about = "Fake packet analyzer for harness tests", long_about = None)]
struct Args {
    /// Log to stderr
    #[arg(short = 'e')]
    log_stderr: bool,

    /// Capture file to replay
    #[arg(short = 'I', value_name = "FILE")]
    input: Option<PathBuf>,

    /// Configuration file
    #[arg(short = 'c', value_name = "FILE")]
    config: PathBuf,

    /// Exit once the capture has been replayed
    #[arg(short = 't')]
    one_shot: bool,

    /// Comma-separated debug selectors
    #[arg(short = 'd', value_name = "SELECTORS", value_delimiter = ',')]
    debug: Vec<String>,

    /// Replay without publishing
    #[arg(short = 'N')]
    no_publish: bool,

    /// Keep running after a one-shot replay
    #[arg(long)]
    linger: bool,

    /// Status to exit with after a one-shot replay
    #[arg(long, default_value_t = 0)]
    exit_code: u8,

    /// Name used for the default output file
    #[arg(long, default_value = "packetbeat")]
    name: String,
}

#[derive(Debug, thiserror::Error)]
enum MockError {
    #[error("loading config '{}' failed: {source}", .path.display())]
    Config { path: PathBuf, source: io::Error },
    #[error("replaying '{}' failed: {source}", .path.display())]
    Capture { path: PathBuf, source: io::Error },
    #[error("writing output '{}' failed: {source}", .path.display())]
    Output { path: PathBuf, source: io::Error },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode, MockError> {
    println!("INFO mock-analyzer starting (pid {})", std::process::id());
    if args.log_stderr {
        eprintln!("INFO logging to stderr");
    }
    let settings = load_config(&args.config)?;
    eprintln!("INFO config loaded from {}", args.config.display());
    for selector in &args.debug {
        eprintln!("DBG  [{}] selector enabled", selector);
    }

    let output_path = settings
        .get("output_path")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new("output").join(&args.name));

    if let Some(capture) = &args.input {
        let published = replay(capture, &output_path, args)?;
        println!("INFO published {} records", published);
        if args.one_shot && !args.linger {
            println!("INFO input exhausted, exiting");
            return Ok(ExitCode::from(args.exit_code));
        }
    }

    serve()
}

/// `key = value` lines; blanks, `#` comments and `[section]` headers are skipped.
fn load_config(path: &Path) -> Result<BTreeMap<String, String>, MockError> {
    let text = fs::read_to_string(path).map_err(|source| MockError::Config {
        path: path.to_path_buf(),
        source,
    })?;
    let settings = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('['))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().trim_matches('"').to_string()))
        .collect();
    Ok(settings)
}

fn replay(capture: &Path, output_path: &Path, args: &Args) -> Result<usize, MockError> {
    let capture_err = |source| MockError::Capture {
        path: capture.to_path_buf(),
        source,
    };
    let output_err = |source| MockError::Output {
        path: output_path.to_path_buf(),
        source,
    };

    let input = File::open(capture).map_err(capture_err)?;
    let mut output = if args.no_publish {
        None
    } else {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(output_err)?;
        }
        Some(BufWriter::new(File::create(output_path).map_err(output_err)?))
    };

    let mut published = 0;
    for (index, line) in BufReader::new(input).lines().enumerate() {
        let line = line.map_err(capture_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let record: serde_json::Value = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                eprintln!("WARN skipping malformed packet at line {}: {}", index + 1, e);
                continue;
            }
        };
        if let Some(out) = output.as_mut() {
            writeln!(out, "{}", record).map_err(output_err)?;
        }
        if !args.debug.is_empty() {
            eprintln!("DBG  packet {} decoded", index + 1);
        }
        published += 1;
    }

    if let Some(mut out) = output {
        out.flush().map_err(output_err)?;
    }
    Ok(published)
}

/// Run until terminated.
fn serve() -> Result<ExitCode, MockError> {
    println!("ready");
    let started = Instant::now();
    let mut beats = 0u64;
    loop {
        thread::sleep(Duration::from_millis(50));
        let due = started.elapsed().as_secs() / HEARTBEAT.as_secs().max(1);
        if due > beats {
            beats = due;
            eprintln!("INFO heartbeat {}", beats);
        }
    }
}
