//! Captured log inspection

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{HarnessError, HarnessResult};

/// Whether a single line of `path` contains `needle` literally.
///
/// Matches never span a line break. Lines are decoded lossily since analyzer
/// logs can carry raw payload bytes.
pub fn log_contains(path: impl AsRef<Path>, needle: &str) -> HarnessResult<bool> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| HarnessError::fs("open", path, e))?;

    for line in BufReader::new(file).split(b'\n') {
        let line = line.map_err(|e| HarnessError::fs("read", path, e))?;
        if String::from_utf8_lossy(&line).contains(needle) {
            return Ok(true);
        }
    }
    Ok(false)
}
