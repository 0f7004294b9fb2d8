//! Fixed-interval retry controller.
//!
//! # Design
//! `with_retry` re-runs a whole operation callback: every failure counts, with
//! no distinction between transient and permanent errors, and attempts are
//! strictly sequential with a constant pause between them. When the budget is
//! spent the last error is returned as-is.
//!
//! The pause is the only place the controller blocks. A `CancelToken` on the
//! policy turns it into an interruptible wait, and a cancelled token stops the
//! loop before another attempt is started.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// Marker error produced when a `CancelToken` stops a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled and wake every waiter.
    pub fn cancel(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.state.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` or until cancelled. Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .state
            .signal
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// How often and how far apart a failed operation is re-run.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero means a single attempt.
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub cancel: Option<CancelToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            cancel: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries,
            retry_interval,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Returns `true` if the pause was interrupted by cancellation.
    fn pause(&self) -> bool {
        match &self.cancel {
            Some(token) => token.sleep(self.retry_interval),
            None => {
                std::thread::sleep(self.retry_interval);
                false
            }
        }
    }
}

/// A successful result together with the zero-based attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Run `operation` until it succeeds or `policy.max_retries` retries are spent.
///
/// `operation` receives the attempt index, `0` on the first call.
pub fn with_retry<T, E, F>(policy: &RetryPolicy, mut operation: F) -> Result<Retried<T>, E>
where
    E: From<Cancelled> + fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        if policy.is_cancelled() {
            debug!(attempt, "retry loop cancelled before attempt");
            return Err(E::from(Cancelled));
        }
        match operation(attempt) {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    retries: attempt,
                })
            }
            Err(err) if attempt < policy.max_retries => {
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    interval_ms = policy.retry_interval.as_millis() as u64,
                    error = %err,
                    "operation failed, retrying"
                );
                if policy.pause() {
                    debug!(attempt, "retry pause interrupted by cancellation");
                    return Err(E::from(Cancelled));
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
