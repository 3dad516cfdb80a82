//! Injectable time source and cancellable waits.
//!
//! Both polling loops (element lookup and screen settle) measure deadlines
//! and sleep through a [`Poller`]. Production code uses [`SystemClock`];
//! tests use [`ManualClock`], whose sleeps advance virtual time instantly so
//! a 15 second lookup timeout runs in microseconds.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{OrchestraError, Result};

/// How often a real sleep wakes up to check for cancellation.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Time since an arbitrary, fixed origin.
    fn now(&self) -> Duration;

    /// Block for `duration`, returning early once `cancel` fires.
    fn sleep(&self, duration: Duration, cancel: &CancellationToken);
}

/// Wall-clock implementation backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancellationToken) {
        let wake_at = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let now = Instant::now();
            if now >= wake_at {
                return;
            }
            std::thread::sleep((wake_at - now).min(CANCEL_CHECK_INTERVAL));
        }
    }
}

/// Virtual clock that only moves when slept on or advanced explicitly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration, _cancel: &CancellationToken) {
        self.advance(duration);
    }
}

/// Deadline arithmetic and cancellable pauses for polling loops.
#[derive(Clone)]
pub struct Poller {
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(clock: Arc<dyn Clock>, cancel: CancellationToken) -> Self {
        Self { clock, cancel }
    }

    /// Poller on the wall clock with a fresh, never-cancelled token.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock::new()), CancellationToken::new())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self, timeout: Duration) -> Duration {
        self.clock.now() + timeout
    }

    pub fn remaining(&self, deadline: Duration) -> Duration {
        deadline.saturating_sub(self.clock.now())
    }

    #[must_use]
    pub fn expired(&self, deadline: Duration) -> bool {
        self.clock.now() >= deadline
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(OrchestraError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, surfacing cancellation as an error.
    pub fn pause(&self, duration: Duration) -> Result<()> {
        self.check_cancelled()?;
        if !duration.is_zero() {
            self.clock.sleep(duration, &self.cancel);
        }
        self.check_cancelled()
    }

    /// Sleep for `duration` but never past `deadline`.
    pub fn pause_until(&self, duration: Duration, deadline: Duration) -> Result<()> {
        self.pause(duration.min(self.remaining(deadline)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual() -> (Arc<ManualClock>, Poller) {
        let clock = Arc::new(ManualClock::new());
        let poller = Poller::new(clock.clone(), CancellationToken::new());
        (clock, poller)
    }

    #[test]
    fn manual_clock_advances_on_sleep() {
        let (clock, poller) = manual();
        poller.pause(Duration::from_millis(250)).unwrap();
        assert_eq!(clock.now(), Duration::from_millis(250));
    }

    #[test]
    fn pause_until_clamps_to_deadline() {
        let (clock, poller) = manual();
        let deadline = poller.deadline(Duration::from_millis(150));
        poller.pause_until(Duration::from_millis(100), deadline).unwrap();
        poller.pause_until(Duration::from_millis(100), deadline).unwrap();
        assert_eq!(clock.now(), Duration::from_millis(150));
        assert!(poller.expired(deadline));
        assert_eq!(poller.remaining(deadline), Duration::ZERO);
    }

    #[test]
    fn pause_reports_cancellation() {
        let (_, poller) = manual();
        poller.cancel_token().cancel();
        let err = poller.pause(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn system_clock_sleep_returns_early_when_cancelled() {
        let clock = SystemClock::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            trigger.cancel();
        });
        let started = Instant::now();
        clock.sleep(Duration::from_secs(10), &cancel);
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
