//! External process handles
//!
//! A [`ProcessHandle`] owns one analyzer invocation: its argument vector, the
//! file that receives its interleaved stdout/stderr, and the child process.
//! Dropping a handle that was never waited on terminates the child (SIGTERM,
//! then SIGKILL after a grace period), reaps it, and closes the file. Errors
//! during that implicit cleanup are logged and swallowed.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::error::{HarnessError, HarnessResult};

/// Time a dropped process gets to exit after SIGTERM before it is killed.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

const REAP_POLL: Duration = Duration::from_millis(10);

/// One external process with its output redirected to a file.
#[derive(Debug)]
pub struct ProcessHandle {
    args: Vec<OsString>,
    output_path: PathBuf,
    output: Option<File>,
    child: Option<Child>,
    status: Option<ExitStatus>,
    current_dir: Option<PathBuf>,
    kill_grace: Duration,
}

impl ProcessHandle {
    /// Prepare a process. `args[0]` is the program.
    ///
    /// The output file is created (truncated) here and stays open for the
    /// lifetime of the handle.
    pub fn new<I, S>(args: I, output_path: impl Into<PathBuf>) -> HarnessResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output_path = output_path.into();
        let output = File::create(&output_path).map_err(|e| HarnessError::fs("open", &output_path, e))?;
        Ok(Self {
            args: args.into_iter().map(|a| a.as_ref().to_os_string()).collect(),
            output_path,
            output: Some(output),
            child: None,
            status: None,
            current_dir: None,
            kill_grace: DEFAULT_KILL_GRACE,
        })
    }

    /// Open `output_path` and spawn `args` with stdout and stderr sent there.
    pub fn start<I, S>(args: I, output_path: impl Into<PathBuf>) -> HarnessResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut handle = Self::new(args, output_path)?;
        handle.spawn()?;
        Ok(handle)
    }

    /// Run the child in `dir` instead of the caller's current directory.
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Grace period between SIGTERM and SIGKILL during drop cleanup.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Launch the prepared process. Calling it on a started handle is a no-op.
    pub fn spawn(&mut self) -> HarnessResult<()> {
        if self.child.is_some() || self.status.is_some() {
            return Ok(());
        }
        let program = self.program().to_string_lossy().into_owned();
        let spawn_err = |source| HarnessError::Spawn {
            program: program.clone(),
            source,
        };

        let Some(output) = self.output.as_ref() else {
            return Err(spawn_err(std::io::Error::other("output file already closed")));
        };
        // Both streams share one open file description, so writes land in
        // arrival order.
        let stdout = output.try_clone().map_err(|e| HarnessError::fs("clone", &self.output_path, e))?;
        let stderr = output.try_clone().map_err(|e| HarnessError::fs("clone", &self.output_path, e))?;

        let mut cmd = Command::new(self.program());
        cmd.args(self.args.iter().skip(1))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(spawn_err)?;
        tracing::debug!(pid = child.id(), args = ?self.args, output = %self.output_path.display(), "spawned process");
        self.child = Some(child);
        Ok(())
    }

    /// Block until the process exits on its own.
    pub fn wait(&mut self) -> HarnessResult<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let child = self.started_child()?;
        let pid = child.id();
        let status = child.wait().map_err(|e| HarnessError::process(pid, "wait", e))?;
        Ok(self.finish(status))
    }

    /// Check for exit without blocking.
    pub fn try_wait(&mut self) -> HarnessResult<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        let child = self.started_child()?;
        let pid = child.id();
        match child.try_wait().map_err(|e| HarnessError::process(pid, "poll", e))? {
            Some(status) => Ok(Some(self.finish(status))),
            None => Ok(None),
        }
    }

    /// Ask the process to terminate and block until it has exited.
    ///
    /// Safe to call repeatedly and on processes that already exited.
    pub fn stop_and_wait(&mut self) -> HarnessResult<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }
        let child = self.started_child()?;
        let pid = child.id();
        if let Err(e) = terminate(child) {
            // The child may have exited between the poll and the signal.
            if child.try_wait().ok().flatten().is_none() {
                return Err(HarnessError::process(pid, "terminate", e));
            }
        }
        self.wait()
    }

    /// Terminate-then-kill: SIGTERM, up to `grace` for a voluntary exit, then
    /// SIGKILL. Blocks until the process is reaped.
    pub fn stop_with_grace(&mut self, grace: Duration) -> HarnessResult<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }
        let child = self.started_child()?;
        let pid = child.id();
        if let Err(e) = terminate(child) {
            if child.try_wait().ok().flatten().is_none() {
                return Err(HarnessError::process(pid, "terminate", e));
            }
        }

        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(REAP_POLL);
        }

        tracing::warn!(pid, grace_ms = grace.as_millis() as u64, "process ignored SIGTERM, killing");
        let child = self.started_child()?;
        if let Err(e) = child.kill() {
            if child.try_wait().ok().flatten().is_none() {
                return Err(HarnessError::process(pid, "kill", e));
            }
        }
        self.wait()
    }

    /// Whether the process has been started and has not exited yet.
    pub fn is_running(&mut self) -> bool {
        self.child.is_some() && matches!(self.try_wait(), Ok(None))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn program(&self) -> &OsStr {
        self.args.first().map(OsString::as_os_str).unwrap_or_default()
    }

    fn started_child(&mut self) -> HarnessResult<&mut Child> {
        self.child.as_mut().ok_or_else(|| HarnessError::Spawn {
            program: self.args.first().map(|a| a.to_string_lossy().into_owned()).unwrap_or_default(),
            source: std::io::Error::other("process was never started"),
        })
    }

    fn finish(&mut self, status: ExitStatus) -> ExitStatus {
        tracing::info!(pid = ?self.pid(), %status, "process exited");
        self.status = Some(status);
        self.output = None;
        status
    }

    /// Escalation used by `Drop`; errors are logged, never returned.
    fn cleanup(&mut self) {
        if self.child.is_none() || self.status.is_some() {
            return;
        }
        let pid = self.pid();
        if let Err(e) = self.stop_with_grace(self.kill_grace) {
            tracing::warn!(pid = ?pid, error = %e, "cleanup: stopping process failed");
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.cleanup();
        self.output = None;
    }
}

#[cfg(unix)]
fn terminate(child: &Child) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(std::io::Error::other)?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn pid_alive(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[test]
    fn test_wait_collects_interleaved_output() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("proc.log");

        let mut proc = ProcessHandle::start(sh("echo one; echo two >&2; echo three"), &log).unwrap();
        let status = proc.wait().unwrap();

        assert!(status.success());
        assert_eq!(fs::read_to_string(&log).unwrap(), "one\ntwo\nthree\n");
    }

    #[test]
    fn test_start_truncates_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("proc.log");
        fs::write(&log, "stale content from a previous run\n").unwrap();

        let mut proc = ProcessHandle::start(sh("echo fresh"), &log).unwrap();
        proc.wait().unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "fresh\n");
    }

    #[test]
    fn test_missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcessHandle::start(["/nonexistent/analyzer", "-e"], dir.path().join("x.log")).unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }));
    }

    #[test]
    fn test_stop_and_wait_terminates_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = ProcessHandle::start(["sleep", "30"], dir.path().join("sleep.log")).unwrap();
        assert!(proc.is_running());

        let started = Instant::now();
        let status = proc.stop_and_wait().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!status.success());
        assert!(!proc.is_running());

        // second call on the exited process
        let again = proc.stop_and_wait().unwrap();
        assert_eq!(status, again);
    }

    #[test]
    fn test_stop_and_wait_after_natural_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = ProcessHandle::start(sh("exit 3"), dir.path().join("exit.log")).unwrap();
        let waited = proc.wait().unwrap();
        let stopped = proc.stop_and_wait().unwrap();
        assert_eq!(waited.code(), Some(3));
        assert_eq!(stopped.code(), Some(3));
    }

    #[test]
    fn test_drop_terminates_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let proc = ProcessHandle::start(["sleep", "30"], dir.path().join("sleep.log")).unwrap();
        let pid = proc.pid().unwrap();
        assert!(pid_alive(pid));

        drop(proc);
        assert!(!pid_alive(pid));
    }

    #[test]
    fn test_drop_kills_process_ignoring_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("stubborn.log");
        let proc = ProcessHandle::start(sh("trap '' TERM; echo armed; while :; do sleep 0.05; done"), &log)
            .unwrap()
            .with_kill_grace(Duration::from_millis(200));
        let pid = proc.pid().unwrap();

        // wait for the trap to be installed before dropping
        crate::sync::wait_until(
            || fs::read_to_string(&log).map(|s| s.contains("armed")).unwrap_or(false),
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .unwrap();

        let started = Instant::now();
        drop(proc);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(!pid_alive(pid));
    }

    #[test]
    fn test_stop_with_grace_kills_process_ignoring_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("stubborn.log");
        let mut proc = ProcessHandle::start(sh("trap '' TERM; echo armed; while :; do sleep 0.05; done"), &log).unwrap();
        let pid = proc.pid().unwrap();
        crate::sync::wait_until(
            || fs::read_to_string(&log).map(|s| s.contains("armed")).unwrap_or(false),
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .unwrap();

        let started = Instant::now();
        let status = proc.stop_with_grace(Duration::from_millis(150)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!status.success());
        assert_eq!(proc.status(), Some(status));
        assert!(!pid_alive(pid));
    }

    #[test]
    fn test_stop_with_grace_returns_early_on_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = ProcessHandle::start(["sleep", "30"], dir.path().join("sleep.log")).unwrap();

        let started = Instant::now();
        proc.stop_with_grace(Duration::from_secs(10)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_before_start_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut proc = ProcessHandle::new(["true"], dir.path().join("t.log")).unwrap();
        assert!(proc.wait().is_err());
        assert!(!proc.is_running());
        proc.spawn().unwrap();
        assert!(proc.wait().unwrap().success());
    }
}
