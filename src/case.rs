//! Per-test scaffolding
//!
//! [`TestCase`] bundles the working directory, template renderer and analyzer
//! runner of one test, with every default (file names, timeouts, directories)
//! taken from a [`HarnessConfig`]. A typical protocol test:
//!
//! ```no_run
//! use pcap_harness::{TemplateParams, TestCase, test_identity};
//!
//! # fn main() -> pcap_harness::HarnessResult<()> {
//! let case = TestCase::setup(test_identity!("redis_basic")?)?;
//! case.render_config_template(&TemplateParams::new().with("redis_ports", vec![6380]))?;
//! case.run_analyzer("redis-basic.pcap")?;
//!
//! let records = case.read_output()?;
//! assert_eq!(records[0]["method"], "SET");
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::HarnessConfig;
use crate::error::HarnessResult;
use crate::identity::TestIdentity;
use crate::output::{self, OutputRecord};
use crate::process::ProcessHandle;
use crate::render::{ConfigRenderer, HarnessContext, TemplateParams};
use crate::run::{AnalyzerRunner, RunOptions, RunOutcome};
use crate::workdir::WorkingDirectory;
use crate::{log, sync};

/// One test's harness state.
pub struct TestCase {
    config: HarnessConfig,
    workdir: WorkingDirectory,
    context: HarnessContext,
    renderer: ConfigRenderer,
    runner: AnalyzerRunner,
}

impl TestCase {
    /// Set up with configuration taken from the environment.
    pub fn setup(identity: TestIdentity) -> HarnessResult<Self> {
        Self::setup_with(HarnessConfig::from_env(), identity)
    }

    /// Create a fresh working directory for `identity` and point `last_run`
    /// at it.
    pub fn setup_with(config: HarnessConfig, identity: TestIdentity) -> HarnessResult<Self> {
        let workdir = WorkingDirectory::create(&config.base_dir, &identity)?;
        workdir.point_last_run()?;

        let context = HarnessContext::new(&workdir, &config.analyzer_name);
        let renderer = ConfigRenderer::new(config.resolve(&config.template_dir));
        let runner = AnalyzerRunner::new(&config)?;

        Ok(Self {
            config,
            workdir,
            context,
            renderer,
            runner,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn workdir(&self) -> &WorkingDirectory {
        &self.workdir
    }

    pub fn context(&self) -> &HarnessContext {
        &self.context
    }

    pub fn runner(&self) -> &AnalyzerRunner {
        &self.runner
    }

    /// Render `<name>.conf.j2` into `<name>.conf`.
    pub fn render_config_template(&self, params: &TemplateParams) -> HarnessResult<PathBuf> {
        self.render_config(
            &self.config.default_template_name(),
            self.config.default_config_name(),
            params,
        )
    }

    /// Render an explicit template into an explicit file of the working directory.
    pub fn render_config(
        &self,
        template: &str,
        output: impl AsRef<Path>,
        params: &TemplateParams,
    ) -> HarnessResult<PathBuf> {
        self.renderer
            .render(&self.workdir, &self.context, template, output, params)
    }

    /// Replay a capture from the capture directory with default options.
    pub fn run_analyzer(&self, capture: impl AsRef<Path>) -> HarnessResult<RunOutcome> {
        self.run_analyzer_with(capture, &RunOptions::new())
    }

    pub fn run_analyzer_with(&self, capture: impl AsRef<Path>, options: &RunOptions) -> HarnessResult<RunOutcome> {
        self.runner.run_once(&self.workdir, capture, options)
    }

    /// Start the analyzer in the background with default options.
    pub fn start_analyzer(&self) -> HarnessResult<ProcessHandle> {
        self.start_analyzer_with(&RunOptions::new())
    }

    pub fn start_analyzer_with(&self, options: &RunOptions) -> HarnessResult<ProcessHandle> {
        self.runner.run_background(&self.workdir, options)
    }

    /// Records of `output/<name>`.
    pub fn read_output(&self) -> HarnessResult<Vec<OutputRecord>> {
        self.read_output_from(self.config.default_output_path())
    }

    /// Records of a file relative to the working directory.
    pub fn read_output_from(&self, path: impl AsRef<Path>) -> HarnessResult<Vec<OutputRecord>> {
        output::read_output(self.workdir.join(path))
    }

    /// Number of records written to `output/<name>` so far.
    pub fn output_len(&self) -> usize {
        output::count_records(self.workdir.join(self.config.default_output_path()))
    }

    /// Search `<name>.log`.
    pub fn log_contains(&self, msg: &str) -> HarnessResult<bool> {
        self.log_contains_in(msg, self.config.default_log_name())
    }

    pub fn log_contains_in(&self, msg: &str, logfile: impl AsRef<Path>) -> HarnessResult<bool> {
        log::log_contains(self.workdir.join(logfile), msg)
    }

    /// Poll with the configured timeout and interval.
    pub fn wait_until<F>(&self, condition: F) -> HarnessResult<()>
    where
        F: FnMut() -> bool,
    {
        sync::wait_until(condition, self.config.wait_timeout, self.config.poll_interval)
    }

    pub fn wait_until_with<F>(&self, condition: F, max_timeout: Duration, poll_interval: Duration) -> HarnessResult<()>
    where
        F: FnMut() -> bool,
    {
        sync::wait_until(condition, max_timeout, poll_interval)
    }

    /// Copy fixtures from the configured files directory.
    pub fn copy_files<P: AsRef<Path>>(&self, files: &[P]) -> HarnessResult<()> {
        let source = self.config.resolve(&self.config.files_dir);
        self.workdir.copy_files(files, &source)
    }
}
