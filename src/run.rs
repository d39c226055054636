//! Analyzer invocation
//!
//! Two modes on top of [`ProcessHandle`]:
//!
//! - **one-shot** ([`AnalyzerRunner::run_once`]): replay a finite capture and
//!   block until the analyzer exits on its own;
//! - **background** ([`AnalyzerRunner::run_background`]): start the analyzer
//!   and hand the live process back to the caller.
//!
//! ## Argument order
//!
//! ```text
//! one-shot:   <analyzer> -e -I <capture> -c <config> -t [extra...] [-d a,b]
//! background: <analyzer> -e -c <config> [extra...] [-d a,b]
//! ```
//!
//! Extra arguments that repeat a flag the harness already emitted for the run
//! are dropped (with their value), so the harness's own flags always win.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::process::ProcessHandle;
use crate::sync::wait_until;
use crate::workdir::WorkingDirectory;

/// Flags of the analyzer CLI contract.
pub mod flags {
    /// Log to stderr instead of syslog/files
    pub const LOG_STDERR: &str = "-e";
    /// Read traffic from a capture file
    pub const INPUT: &str = "-I";
    /// Configuration file
    pub const CONFIG: &str = "-c";
    /// Exit once the finite input is fully processed
    pub const ONE_SHOT: &str = "-t";
    /// Comma-separated debug selectors
    pub const DEBUG: &str = "-d";

    /// Flags that consume the following argument.
    pub const TAKES_VALUE: [&str; 3] = [INPUT, CONFIG, DEBUG];
}

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    config: Option<PathBuf>,
    log: Option<PathBuf>,
    extra_args: Vec<String>,
    debug_selectors: Vec<String>,
    timeout: Option<Duration>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered config file, relative to the working directory.
    pub fn config(mut self, name: impl Into<PathBuf>) -> Self {
        self.config = Some(name.into());
        self
    }

    /// File receiving the analyzer's stdout/stderr, relative to the working directory.
    pub fn log(mut self, name: impl Into<PathBuf>) -> Self {
        self.log = Some(name.into());
        self
    }

    pub fn extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn debug_selector(mut self, selector: impl Into<String>) -> Self {
        self.debug_selectors.push(selector.into());
        self
    }

    pub fn debug_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.debug_selectors.extend(selectors.into_iter().map(Into::into));
        self
    }

    /// Bound a one-shot run. On expiry the analyzer gets SIGTERM, then
    /// SIGKILL once the kill grace has passed, and the run fails with
    /// [`HarnessError::Timeout`]. Without a timeout `run_once`
    /// trusts the analyzer to exit at the end of the capture.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }
}

/// Result of a completed one-shot run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: ExitStatus,
    pub pid: u32,
    pub log_path: PathBuf,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Builds analyzer command lines and runs them in a working directory.
#[derive(Debug, Clone)]
pub struct AnalyzerRunner {
    binary: PathBuf,
    pcap_dir: PathBuf,
    analyzer_name: String,
    poll_interval: Duration,
    kill_grace: Duration,
}

impl AnalyzerRunner {
    pub fn new(config: &HarnessConfig) -> HarnessResult<Self> {
        // A bare program name is left to PATH lookup; anything with a
        // directory part is pinned to the base directory, because the child
        // runs inside its working directory.
        let binary = if config.analyzer.components().count() > 1 || config.analyzer.is_absolute() {
            absolute(&config.resolve(&config.analyzer))?
        } else {
            config.analyzer.clone()
        };
        Ok(Self {
            binary,
            pcap_dir: absolute(&config.resolve(&config.pcap_dir))?,
            analyzer_name: config.analyzer_name.clone(),
            poll_interval: config.poll_interval,
            kill_grace: config.kill_grace,
        })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Replay `capture` and block until the analyzer exits.
    #[tracing::instrument(skip_all, fields(identity = %workdir.identity(), capture = %capture.as_ref().display()))]
    pub fn run_once(
        &self,
        workdir: &WorkingDirectory,
        capture: impl AsRef<Path>,
        options: &RunOptions,
    ) -> HarnessResult<RunOutcome> {
        let capture = self.pcap_dir.join(capture.as_ref());
        let config = workdir.join(self.config_name(options));
        let args = self.build_args(Some(&capture), &config, options);

        let started = Instant::now();
        let mut handle = self.prepare(workdir, args, options)?;
        handle.spawn()?;
        let pid = handle.pid().unwrap_or_default();

        let status = match options.timeout {
            None => handle.wait()?,
            Some(limit) => self.wait_bounded(&mut handle, limit)?,
        };

        Ok(RunOutcome {
            status,
            pid,
            log_path: handle.output_path().to_path_buf(),
            duration: started.elapsed(),
        })
    }

    /// Start the analyzer without a capture and return the live process.
    ///
    /// The caller must eventually stop it; dropping the handle terminates it.
    #[tracing::instrument(skip_all, fields(identity = %workdir.identity()))]
    pub fn run_background(&self, workdir: &WorkingDirectory, options: &RunOptions) -> HarnessResult<ProcessHandle> {
        let config = workdir.join(self.config_name(options));
        let args = self.build_args(None, &config, options);
        let mut handle = self.prepare(workdir, args, options)?;
        handle.spawn()?;
        Ok(handle)
    }

    /// Assemble the argument vector. `capture` selects one-shot mode.
    pub fn build_args(&self, capture: Option<&Path>, config: &Path, options: &RunOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![self.binary.clone().into_os_string()];
        let mut owned = vec![flags::LOG_STDERR, flags::CONFIG];

        args.push(flags::LOG_STDERR.into());
        if let Some(capture) = capture {
            owned.push(flags::INPUT);
            owned.push(flags::ONE_SHOT);
            args.push(flags::INPUT.into());
            args.push(capture.as_os_str().to_os_string());
        }
        args.push(flags::CONFIG.into());
        args.push(config.as_os_str().to_os_string());
        if capture.is_some() {
            args.push(flags::ONE_SHOT.into());
        }

        if !options.debug_selectors.is_empty() {
            owned.push(flags::DEBUG);
        }
        args.extend(strip_owned_flags(&options.extra_args, &owned).map(OsString::from));

        if !options.debug_selectors.is_empty() {
            args.push(flags::DEBUG.into());
            args.push(options.debug_selectors.join(",").into());
        }
        args
    }

    fn config_name(&self, options: &RunOptions) -> PathBuf {
        options
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.conf", self.analyzer_name)))
    }

    fn log_name(&self, options: &RunOptions) -> PathBuf {
        options
            .log
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.log", self.analyzer_name)))
    }

    fn prepare(
        &self,
        workdir: &WorkingDirectory,
        args: Vec<OsString>,
        options: &RunOptions,
    ) -> HarnessResult<ProcessHandle> {
        let log = workdir.join(self.log_name(options));
        Ok(ProcessHandle::new(args, log)?
            .with_current_dir(workdir.path())
            .with_kill_grace(self.kill_grace))
    }

    fn wait_bounded(&self, handle: &mut ProcessHandle, limit: Duration) -> HarnessResult<ExitStatus> {
        let mut exited = None;
        let mut poll_error = None;
        let waited = wait_until(
            || match handle.try_wait() {
                Ok(Some(status)) => {
                    exited = Some(status);
                    true
                }
                Ok(None) => false,
                Err(e) => {
                    poll_error = Some(e);
                    true
                }
            },
            limit,
            self.poll_interval,
        );

        if let Some(e) = poll_error {
            return Err(e);
        }
        if let Err(timeout) = waited {
            tracing::warn!(pid = ?handle.pid(), limit_ms = limit.as_millis() as u64, "one-shot run exceeded its timeout, stopping");
            if let Err(e) = handle.stop_with_grace(self.kill_grace) {
                tracing::warn!(error = %e, "stopping timed-out analyzer failed");
            }
            return Err(timeout);
        }
        match exited {
            Some(status) => Ok(status),
            None => handle.wait(),
        }
    }
}

/// Drop extra arguments that repeat one of `owned`, along with their value.
///
/// Recognizes `-c x`, `--c x`, `-c=x` and `--c=x`. Attached values such as
/// `-dall` are left alone: the analyzer parses flags Go-style, where that is a
/// flag named `dall`, and single-dash long flags like `-dump` exist.
fn strip_owned_flags<'a>(extra: &'a [String], owned: &[&'static str]) -> impl Iterator<Item = &'a String> {
    let owned: Vec<&'static str> = owned.iter().map(|f| f.trim_start_matches('-')).collect();
    let mut skip_next = false;
    extra.iter().filter(move |arg| {
        if skip_next {
            skip_next = false;
            return false;
        }
        let Some(stripped) = arg.strip_prefix('-') else {
            return true;
        };
        let stripped = stripped.strip_prefix('-').unwrap_or(stripped);
        let (name, inline_value) = match stripped.split_once('=') {
            Some((name, _)) => (name, true),
            None => (stripped, false),
        };
        if !owned.contains(&name) {
            return true;
        }
        tracing::warn!(flag = %arg, "extra argument collides with a harness flag, dropping it");
        let takes_value = flags::TAKES_VALUE.iter().any(|f| f.trim_start_matches('-') == name);
        skip_next = takes_value && !inline_value;
        false
    })
}

fn absolute(path: &Path) -> HarnessResult<PathBuf> {
    std::path::absolute(path).map_err(|e| HarnessError::fs("resolve", path, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn runner() -> AnalyzerRunner {
        let config = HarnessConfig::new()
            .with_base_dir("/harness")
            .with_analyzer("/opt/bin/packetbeat");
        AnalyzerRunner::new(&config).unwrap()
    }

    fn render(args: &[OsString]) -> String {
        args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
    }

    fn strip(extra: &[&str], owned: &[&'static str]) -> Vec<String> {
        let extra: Vec<String> = extra.iter().map(|s| s.to_string()).collect();
        strip_owned_flags(&extra, owned).cloned().collect()
    }

    #[test]
    fn test_one_shot_args() {
        let args = runner().build_args(
            Some(Path::new("/harness/pcaps/redis_session.pcap")),
            Path::new("/harness/run/t/packetbeat.conf"),
            &RunOptions::new().debug_selectors(["redis", "tcp"]),
        );
        insta::assert_snapshot!(render(&args), @"/opt/bin/packetbeat -e -I /harness/pcaps/redis_session.pcap -c /harness/run/t/packetbeat.conf -t -d redis,tcp");
    }

    #[test]
    fn test_background_args() {
        let args = runner().build_args(
            None,
            Path::new("/harness/run/t/packetbeat.conf"),
            &RunOptions::new().extra_args(["-i", "lo"]),
        );
        insta::assert_snapshot!(render(&args), @"/opt/bin/packetbeat -e -c /harness/run/t/packetbeat.conf -i lo");
    }

    #[test]
    fn test_colliding_extra_flags_are_dropped() {
        let args = runner().build_args(
            Some(Path::new("/p/x.pcap")),
            Path::new("/w/packetbeat.conf"),
            &RunOptions::new()
                .extra_args(["-c", "/tmp/other.conf", "-N", "-t", "--c=/tmp/x.conf", "-d", "all"])
                .debug_selector("mysql"),
        );
        insta::assert_snapshot!(render(&args), @"/opt/bin/packetbeat -e -I /p/x.pcap -c /w/packetbeat.conf -t -N -d mysql");
    }

    #[test]
    fn test_debug_flag_is_free_without_selectors() {
        assert_eq!(strip(&["-d", "all", "-N"], &["-e", "-c"]), ["-d", "all", "-N"]);
    }

    #[test]
    fn test_input_flag_is_free_in_background_mode() {
        let args = runner().build_args(
            None,
            Path::new("/w/packetbeat.conf"),
            &RunOptions::new().extra_args(["-I", "/p/live.pcap"]),
        );
        assert_eq!(render(&args), "/opt/bin/packetbeat -e -c /w/packetbeat.conf -I /p/live.pcap");
    }

    #[test]
    fn test_inline_value_does_not_swallow_next_arg() {
        assert_eq!(strip(&["-c=/a.conf", "-N"], &["-c"]), ["-N"]);
        assert_eq!(strip(&["--c", "/a.conf", "-N"], &["-c"]), ["-N"]);
        assert_eq!(strip(&["-e", "-N"], &["-e"]), ["-N"]);
    }

    #[test]
    fn test_long_single_dash_flags_pass_through() {
        assert_eq!(
            strip(&["-dump", "/tmp/x.pcap", "-dall", "-cpuprofile", "/tmp/cpu"], &["-d", "-c"]),
            ["-dump", "/tmp/x.pcap", "-dall", "-cpuprofile", "/tmp/cpu"]
        );
    }

    #[test]
    fn test_relative_paths_resolve_against_base_dir() {
        let config = HarnessConfig::new().with_base_dir("/harness");
        let runner = AnalyzerRunner::new(&config).unwrap();
        assert_eq!(runner.binary(), Path::new("/harness/../packetbeat"));
        assert_eq!(runner.pcap_dir, Path::new("/harness/pcaps"));
    }

    #[test]
    fn test_bare_binary_name_uses_path_lookup() {
        let config = HarnessConfig::new().with_analyzer("packetbeat");
        let runner = AnalyzerRunner::new(&config).unwrap();
        assert_eq!(runner.binary(), Path::new("packetbeat"));
    }
}
