//! Bounded waiting for service callbacks
//!
//! Every handshake in the federation client has the same shape: pump
//! callbacks for at most one poll interval, then re-check a condition. A
//! [`Waiter`] owns the policy (poll interval, optional overall timeout,
//! cancellation) so no loop in the client can spin forever unobserved.

use crate::federation::FederationError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag that aborts any wait in progress
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

#[derive(Debug, Clone)]
pub struct Waiter {
    poll_interval: Duration,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

/// Progress of one wait started with [`Waiter::start`]
#[derive(Debug, Clone, Copy)]
pub struct WaitStarted {
    at: Instant,
}

impl WaitStarted {
    pub fn elapsed(&self) -> Duration {
        self.at.elapsed()
    }
}

impl Waiter {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval,
            timeout,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn start(&self) -> WaitStarted {
        WaitStarted { at: Instant::now() }
    }

    /// Fail if the wait for `what` was cancelled or ran out of time
    pub fn check(&self, started: WaitStarted, what: &str) -> Result<(), FederationError> {
        if self.cancel.is_cancelled() {
            return Err(FederationError::Cancelled {
                waiting_for: what.to_string(),
            });
        }
        match self.timeout {
            Some(limit) if started.elapsed() >= limit => Err(FederationError::Timeout {
                waiting_for: what.to_string(),
                elapsed: started.elapsed(),
            }),
            _ => Ok(()),
        }
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), None)
    }
}
