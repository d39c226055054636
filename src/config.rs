//! Harness configuration
//!
//! Where the harness finds the analyzer, its templates, captures and fixture
//! files, and where it puts per-test working directories.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default analyzer name; also names the default config, log and output files.
pub const DEFAULT_ANALYZER_NAME: &str = "packetbeat";

/// Default limit for [`crate::sync::wait_until`] conditions.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default spacing between condition evaluations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Environment variable names read by [`HarnessConfig::from_env`].
pub mod vars {
    pub const BASE_DIR: &str = "PCAP_HARNESS_BASE_DIR";
    pub const ANALYZER: &str = "PCAP_HARNESS_ANALYZER";
    pub const NAME: &str = "PCAP_HARNESS_NAME";
    pub const TEMPLATES: &str = "PCAP_HARNESS_TEMPLATES";
    pub const PCAPS: &str = "PCAP_HARNESS_PCAPS";
    pub const FILES: &str = "PCAP_HARNESS_FILES";
}

/// Harness configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Directory holding `run/` and the `last_run` link
    pub base_dir: PathBuf,
    /// Analyzer executable
    pub analyzer: PathBuf,
    /// Analyzer name, used for default file names (`<name>.conf`, `output/<name>`)
    pub analyzer_name: String,
    /// Root directory of configuration templates
    pub template_dir: PathBuf,
    /// Directory of recorded captures
    pub pcap_dir: PathBuf,
    /// Directory of fixture files for [`crate::case::TestCase::copy_files`]
    pub files_dir: PathBuf,
    /// Default limit for polled conditions
    pub wait_timeout: Duration,
    /// Default spacing between condition evaluations
    pub poll_interval: Duration,
    /// How long a dropped process gets between SIGTERM and SIGKILL
    pub kill_grace: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            analyzer: PathBuf::from(format!("../{}", DEFAULT_ANALYZER_NAME)),
            analyzer_name: DEFAULT_ANALYZER_NAME.to_string(),
            template_dir: PathBuf::from("templates"),
            pcap_dir: PathBuf::from("pcaps"),
            files_dir: PathBuf::from("files"),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            kill_grace: crate::process::DEFAULT_KILL_GRACE,
        }
    }
}

impl HarnessConfig {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `PCAP_HARNESS_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(name) = env_var(vars::NAME) {
            config = config.with_analyzer_name(name);
        }
        if let Some(dir) = env_var(vars::BASE_DIR) {
            config.base_dir = PathBuf::from(dir);
        }
        if let Some(bin) = env_var(vars::ANALYZER) {
            config.analyzer = PathBuf::from(bin);
        }
        if let Some(dir) = env_var(vars::TEMPLATES) {
            config.template_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var(vars::PCAPS) {
            config.pcap_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_var(vars::FILES) {
            config.files_dir = PathBuf::from(dir);
        }
        config
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn with_analyzer(mut self, path: impl Into<PathBuf>) -> Self {
        self.analyzer = path.into();
        self
    }

    /// Set the analyzer name. A default analyzer path follows the new name.
    pub fn with_analyzer_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if self.analyzer == Path::new(&format!("../{}", self.analyzer_name)) {
            self.analyzer = PathBuf::from(format!("../{}", name));
        }
        self.analyzer_name = name;
        self
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    pub fn with_pcap_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pcap_dir = dir.into();
        self
    }

    pub fn with_files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = dir.into();
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Resolve a configured directory against the base directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Default rendered config file name (`<name>.conf`).
    pub fn default_config_name(&self) -> String {
        format!("{}.conf", self.analyzer_name)
    }

    /// Default template name (`<name>.conf.j2`).
    pub fn default_template_name(&self) -> String {
        format!("{}.conf.j2", self.analyzer_name)
    }

    /// Default captured log file name (`<name>.log`).
    pub fn default_log_name(&self) -> String {
        format!("{}.log", self.analyzer_name)
    }

    /// Default structured output path relative to the working directory.
    pub fn default_output_path(&self) -> PathBuf {
        Path::new("output").join(&self.analyzer_name)
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_names() {
        let config = HarnessConfig::default();
        assert_eq!(config.default_config_name(), "packetbeat.conf");
        assert_eq!(config.default_template_name(), "packetbeat.conf.j2");
        assert_eq!(config.default_log_name(), "packetbeat.log");
        assert_eq!(config.default_output_path(), Path::new("output/packetbeat"));
    }

    #[test]
    fn test_default_timeouts() {
        let config = HarnessConfig::default();
        assert_eq!(config.wait_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_renaming_moves_default_binary() {
        let config = HarnessConfig::new().with_analyzer_name("flowbeat");
        assert_eq!(config.analyzer, Path::new("../flowbeat"));
        assert_eq!(config.default_output_path(), Path::new("output/flowbeat"));
    }

    #[test]
    fn test_renaming_keeps_explicit_binary() {
        let config = HarnessConfig::new()
            .with_analyzer("/opt/bin/analyzer")
            .with_analyzer_name("flowbeat");
        assert_eq!(config.analyzer, Path::new("/opt/bin/analyzer"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let config = HarnessConfig::new().with_base_dir("/srv/tests");
        assert_eq!(config.resolve(Path::new("pcaps")), Path::new("/srv/tests/pcaps"));
        assert_eq!(config.resolve(Path::new("/data/pcaps")), Path::new("/data/pcaps"));
    }
}
