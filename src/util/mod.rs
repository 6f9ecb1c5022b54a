//! Utility module
//!
//! Scheduling helpers shared by the worker loops: the randomized delay-probe
//! interval, restart backoff, and a sleep that yields to shutdown.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::core::RetryPolicy;

mod worker;

pub use self::worker::{log_discarded, supervise, Worker};

/// Lower bound of the probe interval, in sync intervals
pub const PROBE_INTERVAL_MIN_FACTOR: u32 = 4;

/// Upper bound of the probe interval, in sync intervals
pub const PROBE_INTERVAL_MAX_FACTOR: u32 = 60;

/// Draws the wait before the next delay probe
///
/// Uniform over `[4 × sync_interval, 60 × sync_interval]`, inclusive, at
/// millisecond resolution.
pub fn probe_interval<R: Rng + ?Sized>(rng: &mut R, sync_interval: Duration) -> Duration {
    let base = sync_interval.as_millis().min(u128::from(u64::MAX / 64)) as u64;
    let low = base * u64::from(PROBE_INTERVAL_MIN_FACTOR);
    let high = base * u64::from(PROBE_INTERVAL_MAX_FACTOR);
    Duration::from_millis(rng.gen_range(low..=high))
}

/// Exponential backoff driven by a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
    next: Duration,
}

impl Backoff {
    /// Creates a backoff that has not been used yet
    pub fn new(policy: &RetryPolicy) -> Self {
        Backoff {
            policy: policy.clone(),
            attempts: 0,
            next: policy.initial_backoff,
        }
    }

    /// Returns the wait before the next restart, or `None` once retries are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_retries {
            return None;
        }

        self.attempts += 1;
        let delay = self.next.min(self.policy.max_backoff);
        self.next = self.next.saturating_mul(2).min(self.policy.max_backoff);
        Some(delay)
    }

    /// Number of restarts handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Returns whether shutdown has been requested on this channel
pub fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Resolves once shutdown is requested or the sending side is gone
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // wait_for returns an error when the sender is dropped; both end the wait.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleeps for `duration` unless shutdown is requested first
///
/// Returns `true` if the sleep was cut short by shutdown.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown_requested(shutdown) => true,
    }
}
