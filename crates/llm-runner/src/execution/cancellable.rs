//! Cooperative cancellation primitives shared by the supervisor and the protocol layer.
//!
//! Nothing here interrupts a blocking call. Long running loops check a [`CancellationToken`] at
//! well defined points (once per poll, once per received stream line) and unwind from there.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Cancellation token shared between a caller and the operation it started.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Every clone of the token observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// How a [`CancellablePoller::poll_until`] loop ended.
#[derive(Debug)]
pub enum CancellableResult<T> {
    Completed(T),
    Cancelled,
    TimedOut,
}

impl<T> CancellableResult<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CancellableResult::Cancelled)
    }
}

/// Repeats a check on a fixed cadence, bounded by a deadline and a [`CancellationToken`].
pub struct CancellablePoller {
    cancellation_token: CancellationToken,
    poll_interval: Duration,
}

impl CancellablePoller {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_interval(cancellation_token: CancellationToken, interval: Duration) -> Self {
        Self {
            cancellation_token,
            poll_interval: interval,
        }
    }

    /// Poll a closure until it returns `Some(value)`, cancellation is requested or `timeout`
    /// elapses.
    ///
    /// The closure runs at least once, even with a zero timeout.
    pub fn poll_until<T, F>(&self, timeout: Duration, mut check_fn: F) -> CancellableResult<T>
    where
        F: FnMut() -> Option<T>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancellation_token.is_cancelled() {
                return CancellableResult::Cancelled;
            }

            if let Some(result) = check_fn() {
                return CancellableResult::Completed(result);
            }

            let now = Instant::now();
            if now >= deadline {
                return CancellableResult::TimedOut;
            }

            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

/// Return early with [`RunnerError::Cancelled`](crate::RunnerError::Cancelled) once the token is
/// cancelled.
#[macro_export]
macro_rules! check_cancelled {
    ($token:expr) => {
        if $token.is_cancelled() {
            return Err($crate::RunnerError::Cancelled);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_cancelled_poll_never_runs_the_check() {
        let token = CancellationToken::new();
        token.cancel();

        let poller = CancellablePoller::new(token);
        let mut probes = 0;
        let outcome = poller.poll_until(Duration::from_secs(1), || {
            probes += 1;
            Some(())
        });

        assert!(outcome.is_cancelled());
        assert_eq!(probes, 0);
    }

    #[test]
    fn poll_returns_first_ready_value() {
        let token = CancellationToken::new();
        let poller = CancellablePoller::with_interval(token, Duration::from_millis(5));

        let mut attempts = 0;
        let outcome = poller.poll_until(Duration::from_secs(5), || {
            attempts += 1;
            (attempts == 3).then_some(attempts)
        });

        match outcome {
            CancellableResult::Completed(ready_after) => assert_eq!(ready_after, 3),
            other => panic!("expected a ready runner, got {other:?}"),
        }
    }

    #[test]
    fn poll_gives_up_at_the_deadline() {
        let poller =
            CancellablePoller::with_interval(CancellationToken::new(), Duration::from_millis(10));

        let start = Instant::now();
        let mut calls = 0;
        let result = poller.poll_until(Duration::from_millis(50), || -> Option<()> {
            calls += 1;
            None
        });

        assert!(matches!(result, CancellableResult::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(calls >= 2);
    }

    #[test]
    fn cancelling_from_another_thread_stops_polling() {
        let token = CancellationToken::new();
        let poller = CancellablePoller::with_interval(token.clone(), Duration::from_millis(10));

        let trigger = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = poller.poll_until(Duration::from_secs(10), || -> Option<u16> { None });

        assert!(outcome.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn check_cancelled_returns_early() {
        let token = CancellationToken::new();

        let run = |token: &CancellationToken| -> crate::Result<i32> {
            check_cancelled!(token);
            Ok(42)
        };
        assert_eq!(run(&token).unwrap(), 42);

        token.cancel();
        assert!(run(&token).unwrap_err().is_cancelled());
    }

    #[test]
    fn clones_share_cancellation() {
        let process_token = CancellationToken::default();
        let generation_token = process_token.clone();

        assert!(!generation_token.is_cancelled());
        process_token.cancel();
        assert!(generation_token.is_cancelled());
    }
}
