//! Structured analyzer output
//!
//! The analyzer writes newline-delimited JSON. Records keep file order and
//! are not validated against any schema; protocol tests narrow the fields
//! they care about.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{HarnessError, HarnessResult};

/// One decoded output line.
pub type OutputRecord = serde_json::Value;

/// Decode every non-empty line of `path`, in file order.
pub fn read_output(path: impl AsRef<Path>) -> HarnessResult<Vec<OutputRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| HarnessError::fs("open", path, e))?;

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line.map_err(|e| HarnessError::fs("read", path, e))?;
        if line.trim_ascii().is_empty() {
            continue;
        }
        let record = serde_json::from_slice(&line).map_err(|source| HarnessError::Decode {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Count non-empty lines without decoding them. A missing file counts as 0.
///
/// Meant for polling a file a running analyzer is still appending to.
pub fn count_records(path: impl AsRef<Path>) -> usize {
    let Ok(file) = File::open(path.as_ref()) else {
        return 0;
    };
    BufReader::new(file)
        .split(b'\n')
        .map_while(Result::ok)
        .filter(|line| !line.trim_ascii().is_empty())
        .count()
}
