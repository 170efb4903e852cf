use std::time::{Duration, Instant};

const MIN_BACKOFF: Duration = Duration::from_micros(50);
const MAX_BACKOFF: Duration = Duration::from_millis(2);

/// Calls `attempt` until it yields a value or `timeout` elapses.
///
/// Sleeps between attempts with a doubling backoff so a stalled device does
/// not pin a core. Returns the time waited on expiry.
pub fn poll_until<T>(timeout: Duration, mut attempt: impl FnMut() -> Option<T>) -> Result<T, Duration> {
    let start = Instant::now();
    let mut backoff = MIN_BACKOFF;
    loop {
        if let Some(value) = attempt() {
            return Ok(value);
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(waited);
        }
        std::thread::sleep(backoff.min(timeout - waited));
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
