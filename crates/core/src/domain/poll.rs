//! Bounded poll-until-condition with timeout and cancellation
//!
//! Every wait in the crate goes through [`poll_until`] instead of a fixed
//! sleep. A [`CancelToken`] can be cloned into another thread (e.g. a Ctrl-C
//! handler) to abort a wait early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;

/// Reasons a poll ended without the condition holding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("Condition not met within {0:?}")]
    Timeout(Duration),

    #[error("Poll cancelled")]
    Cancelled,
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Timing of one poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollConfig {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            interval: Duration::from_millis(250),
        }
    }
}

/// Call `probe` until it yields `Some`, the timeout elapses, or `cancel` fires
///
/// The probe runs at least once, even with a zero timeout. A timeout too large
/// to fit an [`Instant`] waits until the condition holds or `cancel` fires.
/// Errors returned by the probe end the poll immediately and are passed
/// through unchanged.
pub fn poll_until<T, E, F>(
    config: PollConfig,
    cancel: &CancelToken,
    mut probe: F,
) -> Result<Result<T, PollError>, E>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    let deadline = Instant::now().checked_add(config.timeout);
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Ok(Err(PollError::Cancelled));
        }

        attempts = attempts.saturating_add(1);
        if let Some(value) = probe()? {
            trace!(attempts, "Poll condition met");
            return Ok(Ok(value));
        }

        let now = Instant::now();
        match deadline {
            Some(deadline) if now >= deadline => {
                trace!(attempts, "Poll timed out");
                return Ok(Err(PollError::Timeout(config.timeout)));
            }
            Some(deadline) => thread::sleep(config.interval.min(deadline - now)),
            None => thread::sleep(config.interval),
        }
    }
}

/// Sleep for `duration` unless cancelled first
pub fn settle(duration: Duration, cancel: &CancelToken) -> Result<(), PollError> {
    let step = Duration::from_millis(50);
    let deadline = Instant::now().checked_add(duration);
    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }
        let now = Instant::now();
        match deadline {
            Some(deadline) if now >= deadline => return Ok(()),
            Some(deadline) => thread::sleep(step.min(deadline - now)),
            None => thread::sleep(step),
        }
    }
}
