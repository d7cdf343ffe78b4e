//! Existence Polling
//!
//! Waits for an object to appear by polling `head_object` with capped
//! exponential backoff. This is the only place the crate sleeps between
//! calls; ordinary operations are never retried here.

use crate::context::IoContext;
use crate::traits::{ObjectStore, ObjectStoreError};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

/// Configuration for polling behavior.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the second probe (in milliseconds)
    pub initial_delay_ms: u64,
    /// Maximum delay between probes (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add jitter so concurrent waiters spread out
    pub jitter: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl PollConfig {
    /// Fixed-interval polling without jitter.
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Calculate delay for a given attempt number.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64);

        let final_delay = if self.jitter {
            // up to 25%
            capped_delay * (1.0 + jitter_fraction() * 0.25)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Pseudo-random fraction in [0, 1) taken from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Probe `key` until it exists, failing with `Timeout` once `timeout` elapses.
///
/// `NotFound` answers keep the loop going; any other error ends it.
pub fn poll_until_exists<S>(
    store: &S,
    key: &str,
    timeout: Duration,
    config: &PollConfig,
) -> Result<(), ObjectStoreError>
where
    S: ObjectStore + ?Sized,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        let left = timeout.saturating_sub(started.elapsed());
        let ctx = IoContext::new(left);
        match store.head_object(&ctx, key) {
            Ok(_) => return Ok(()),
            Err(ObjectStoreError::NotFound(_)) | Err(ObjectStoreError::Timeout(_)) => {}
            Err(e) => return Err(e),
        }

        let delay = config.calculate_delay(attempt);
        let elapsed = started.elapsed();
        if elapsed + delay >= timeout {
            return Err(ObjectStoreError::Timeout(format!(
                "{} did not appear within {:?}",
                key, timeout
            )));
        }

        debug!(key, attempt, ?delay, "object not visible yet");
        thread::sleep(delay);
        attempt += 1;
    }
}
