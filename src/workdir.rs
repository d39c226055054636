//! Per-test working directories
//!
//! Each test gets `run/<identity>/` under the harness base directory. The
//! directory is wiped and recreated when the test starts and left in place
//! afterwards so its config, log and output can be inspected post-mortem.
//! `last_run` always points at the most recently created one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, HarnessResult};
use crate::identity::TestIdentity;

/// Directory under the base directory that holds all working directories.
pub const RUN_DIR: &str = "run";

/// Name of the convenience link to the latest working directory.
pub const LAST_RUN_LINK: &str = "last_run";

/// Isolated filesystem scope of one test.
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    base_dir: PathBuf,
    identity: TestIdentity,
    path: PathBuf,
}

impl WorkingDirectory {
    /// Create `run/<identity>` under `base_dir`, removing stale contents first.
    pub fn create(base_dir: impl AsRef<Path>, identity: &TestIdentity) -> HarnessResult<Self> {
        let base_dir = std::path::absolute(base_dir.as_ref())
            .map_err(|e| HarnessError::fs("resolve", base_dir.as_ref(), e))?;
        let path = base_dir.join(RUN_DIR).join(identity.as_str());

        if path.exists() {
            fs::remove_dir_all(&path).map_err(|e| HarnessError::fs("remove", &path, e))?;
        }
        fs::create_dir_all(&path).map_err(|e| HarnessError::fs("create", &path, e))?;
        tracing::info!(path = %path.display(), "created working directory");

        Ok(Self {
            base_dir,
            identity: identity.clone(),
            path,
        })
    }

    /// Repoint `last_run` at this working directory.
    ///
    /// The link is unlinked and recreated; a failed attempt is retried once.
    /// A second failure is an error on unix. Elsewhere symlinks may need
    /// privileges the test runner lacks, so it is only logged.
    pub fn point_last_run(&self) -> HarnessResult<()> {
        let link = self.base_dir.join(LAST_RUN_LINK);
        let target = Path::new(RUN_DIR).join(self.identity.as_str());

        if let Err(first) = replace_link(&link, &target) {
            tracing::warn!(link = %link.display(), error = %first, "relinking last_run failed, retrying");
            if let Err(second) = replace_link(&link, &target) {
                return settle_link_failure(&link, second, LINK_FAILURE_IS_FATAL);
            }
        }
        Ok(())
    }

    /// Copy fixture files from `source_dir` into the working directory.
    pub fn copy_files<P: AsRef<Path>>(&self, files: &[P], source_dir: &Path) -> HarnessResult<()> {
        for file in files {
            let src = source_dir.join(file.as_ref());
            let Some(name) = src.file_name() else {
                return Err(HarnessError::fs(
                    "copy",
                    &src,
                    io::Error::new(io::ErrorKind::InvalidInput, "not a file name"),
                ));
            };
            let dst = self.path.join(name);
            fs::copy(&src, &dst).map_err(|e| HarnessError::fs("copy", &src, e))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn identity(&self) -> &TestIdentity {
        &self.identity
    }

    /// Resolve a path relative to the working directory.
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }
}

const LINK_FAILURE_IS_FATAL: bool = cfg!(unix);

fn settle_link_failure(link: &Path, err: io::Error, fatal: bool) -> HarnessResult<()> {
    if fatal {
        return Err(HarnessError::fs("link", link, err));
    }
    tracing::warn!(link = %link.display(), error = %err, "cannot point last_run at the new working directory");
    Ok(())
}

fn replace_link(link: &Path, target: &Path) -> io::Result<()> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => remove_link(link)?,
        Ok(_) => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "exists and is not a symlink",
            ));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    make_link(target, link)
}

#[cfg(unix)]
fn remove_link(link: &Path) -> io::Result<()> {
    fs::remove_file(link)
}

#[cfg(windows)]
fn remove_link(link: &Path) -> io::Result<()> {
    // Directory symlinks are removed like directories on Windows.
    fs::remove_dir(link).or_else(|_| fs::remove_file(link))
}

#[cfg(unix)]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn identity(name: &str) -> TestIdentity {
        TestIdentity::new(name).unwrap()
    }

    #[test]
    fn test_create_makes_run_directory() {
        let base = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory::create(base.path(), &identity("suite.test_a")).unwrap();

        assert!(wd.path().is_dir());
        assert!(wd.path().ends_with("run/suite.test_a"));
        assert!(wd.path().is_absolute());
    }

    #[test]
    fn test_create_clears_previous_contents() {
        let base = tempfile::tempdir().unwrap();
        let id = identity("suite.test_residue");

        let first = WorkingDirectory::create(base.path(), &id).unwrap();
        fs::write(first.join("stale.conf"), "old").unwrap();
        fs::create_dir_all(first.join("output")).unwrap();
        fs::write(first.join("output/packetbeat"), "{}\n").unwrap();

        let second = WorkingDirectory::create(base.path(), &id).unwrap();
        assert_eq!(first.path(), second.path());
        assert_eq!(fs::read_dir(second.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_last_run_follows_newest_directory() {
        let base = tempfile::tempdir().unwrap();

        let a = WorkingDirectory::create(base.path(), &identity("suite.a")).unwrap();
        a.point_last_run().unwrap();
        let b = WorkingDirectory::create(base.path(), &identity("suite.b")).unwrap();
        b.point_last_run().unwrap();

        let link = base.path().join(LAST_RUN_LINK);
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("run/suite.b"));
        assert_eq!(fs::canonicalize(&link).unwrap(), fs::canonicalize(b.path()).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_last_run_replaces_dangling_link() {
        let base = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("run/gone", base.path().join(LAST_RUN_LINK)).unwrap();

        let wd = WorkingDirectory::create(base.path(), &identity("suite.c")).unwrap();
        wd.point_last_run().unwrap();

        assert_eq!(
            fs::read_link(base.path().join(LAST_RUN_LINK)).unwrap(),
            Path::new("run/suite.c")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_last_run_refuses_to_clobber_real_directory() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join(LAST_RUN_LINK)).unwrap();

        let wd = WorkingDirectory::create(base.path(), &identity("suite.d")).unwrap();
        let err = wd.point_last_run().unwrap_err();
        assert!(matches!(err, HarnessError::Filesystem { action: "link", .. }));
        assert!(base.path().join(LAST_RUN_LINK).is_dir());
    }

    #[cfg(not(unix))]
    #[test]
    fn test_last_run_failure_does_not_abort_setup() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join(LAST_RUN_LINK)).unwrap();

        let wd = WorkingDirectory::create(base.path(), &identity("suite.d")).unwrap();
        wd.point_last_run().unwrap();
        assert!(base.path().join(LAST_RUN_LINK).is_dir());
    }

    #[test]
    fn test_link_failure_policy() {
        let link = Path::new("/harness/last_run");
        let denied = || io::Error::new(io::ErrorKind::PermissionDenied, "symlink privilege not held");

        assert!(settle_link_failure(link, denied(), false).is_ok());
        assert!(matches!(
            settle_link_failure(link, denied(), true).unwrap_err(),
            HarnessError::Filesystem { action: "link", .. }
        ));
        assert_eq!(LINK_FAILURE_IS_FATAL, cfg!(unix));
    }

    #[test]
    fn test_copy_files_into_working_directory() {
        let base = tempfile::tempdir().unwrap();
        let files = base.path().join("files");
        fs::create_dir(&files).unwrap();
        fs::write(files.join("geoip.dat"), "data").unwrap();

        let wd = WorkingDirectory::create(base.path(), &identity("suite.e")).unwrap();
        wd.copy_files(&["geoip.dat"], &files).unwrap();
        assert_eq!(fs::read_to_string(wd.join("geoip.dat")).unwrap(), "data");

        let err = wd.copy_files(&["missing.dat"], &files).unwrap_err();
        assert!(matches!(err, HarnessError::Filesystem { action: "copy", .. }));
    }
}
