//! Polling synchronization
//!
//! Used when the interesting event is a side effect of a running process (a
//! log line, an output file growing) rather than its exit.

use std::time::{Duration, Instant};

use crate::error::{HarnessError, HarnessResult};

/// Evaluate `condition` every `poll_interval` until it returns true.
///
/// The first evaluation happens immediately. Fails with
/// [`HarnessError::Timeout`] once `max_timeout` has elapsed since the first
/// evaluation; the last sleep is shortened so the deadline is honored within
/// one poll interval.
pub fn wait_until<F>(mut condition: F, max_timeout: Duration, poll_interval: Duration) -> HarnessResult<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut polls: u64 = 0;
    loop {
        polls += 1;
        if condition() {
            tracing::debug!(polls, elapsed_ms = start.elapsed().as_millis() as u64, "condition satisfied");
            return Ok(());
        }
        let elapsed = start.elapsed();
        if elapsed >= max_timeout {
            tracing::debug!(polls, "condition timed out");
            return Err(HarnessError::Timeout {
                timeout: max_timeout,
                elapsed,
            });
        }
        std::thread::sleep(poll_interval.min(max_timeout - elapsed));
    }
}
