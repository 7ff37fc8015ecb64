//! Polling waits.
//!
//! Every element interaction and every "eventually" assertion goes through
//! [`Waiter`]: the action is retried every `poll_interval_ms` until it
//! succeeds or `timeout_ms` has elapsed. A failed attempt is either
//! [`Attempt::Recoverable`] (retry) or [`Attempt::Fatal`] (give up now).
//!
//! Waits are sequential `await`s inside the scenario's task; the only
//! cancellation is the timeout itself.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::driver::DriverError;
use crate::result::{PawlError, PawlResult};

/// Default timeout for polling waits (60 seconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 60_000;

/// Default polling interval (500ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Timeout and polling interval of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Timeout in milliseconds
    pub timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl WaitOptions {
    /// Options with an explicit timeout and interval
    #[must_use]
    pub const fn new(timeout_ms: u64, poll_interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            poll_interval_ms,
        }
    }

    /// Set timeout in milliseconds
    #[must_use]
    pub const fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Get timeout as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Outcome of one failed attempt
#[derive(Debug)]
pub enum Attempt {
    /// Try again after the poll interval
    Recoverable(String),
    /// Stop waiting and fail with this error
    Fatal(PawlError),
}

impl Attempt {
    /// Recoverable failure with a reason
    pub fn retry(reason: impl Into<String>) -> Self {
        Self::Recoverable(reason.into())
    }
}

impl From<PawlError> for Attempt {
    fn from(err: PawlError) -> Self {
        if err.is_stale() {
            Self::Recoverable(err.to_string())
        } else {
            Self::Fatal(err)
        }
    }
}

impl From<DriverError> for Attempt {
    fn from(err: DriverError) -> Self {
        PawlError::from(err).into()
    }
}

/// Book-keeping of a running wait, for loops that need mutable state
/// between attempts.
///
/// ```ignore
/// let mut poll = waiter.start("title");
/// loop {
///     match try_once().await {
///         Ok(v) => return Ok(v),
///         Err(attempt) => poll.failed(attempt).await?,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Poll {
    options: WaitOptions,
    waited_for: String,
    started: Instant,
    attempts: u32,
    last_error: Option<String>,
}

impl Poll {
    /// Attempts made so far
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the wait started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record a failed attempt.
    ///
    /// Returns `Ok(())` once the next attempt may run, or the error that
    /// ends the wait: the fatal error itself, or a timeout once the
    /// deadline has passed.
    pub async fn failed(&mut self, attempt: Attempt) -> PawlResult<()> {
        self.attempts += 1;
        match attempt {
            Attempt::Fatal(err) => return Err(err),
            Attempt::Recoverable(reason) => self.last_error = Some(reason),
        }
        let timeout = self.options.timeout();
        if self.started.elapsed() >= timeout {
            return Err(self.timeout_error());
        }
        tokio::time::sleep(self.options.poll_interval()).await;
        if self.started.elapsed() >= timeout {
            return Err(self.timeout_error());
        }
        Ok(())
    }

    fn timeout_error(&mut self) -> PawlError {
        tracing::debug!(
            waited_for = %self.waited_for,
            attempts = self.attempts,
            "wait timed out"
        );
        PawlError::Timeout {
            waited_for: std::mem::take(&mut self.waited_for),
            ms: self.options.timeout_ms,
            attempts: self.attempts,
            last_error: self.last_error.take(),
        }
    }
}

/// Retries actions until they succeed or time out
#[derive(Debug, Clone, Copy, Default)]
pub struct Waiter {
    options: WaitOptions,
}

impl Waiter {
    /// Create with custom options
    #[must_use]
    pub const fn new(options: WaitOptions) -> Self {
        Self { options }
    }

    /// The options in use
    #[must_use]
    pub const fn options(&self) -> &WaitOptions {
        &self.options
    }

    /// Start tracking a hand-written polling loop
    #[must_use]
    pub fn start(&self, waited_for: impl Into<String>) -> Poll {
        Poll {
            options: self.options,
            waited_for: waited_for.into(),
            started: Instant::now(),
            attempts: 0,
            last_error: None,
        }
    }

    /// Retry `action` until it returns `Ok`
    pub async fn until<T, F, Fut>(&self, waited_for: &str, mut action: F) -> PawlResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Attempt>>,
    {
        let mut poll = self.start(waited_for);
        loop {
            match action().await {
                Ok(value) => return Ok(value),
                Err(attempt) => poll.failed(attempt).await?,
            }
        }
    }

    /// Retry `predicate` until it returns `true`
    pub async fn until_true<F, Fut>(&self, waited_for: &str, mut predicate: F) -> PawlResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        self.until(waited_for, || {
            let check = predicate();
            async move {
                if check.await {
                    Ok(())
                } else {
                    Err(Attempt::retry("condition not met"))
                }
            }
        })
        .await
    }
}

/// Sleep for a fixed duration; zero does not yield
pub async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Sleep for a fractional number of seconds given as text (`"1.5"`).
///
/// Unparsable, non-positive or out-of-range values do not pause.
pub async fn pause_seconds(seconds: &str) {
    match seconds.trim().parse::<f64>() {
        Ok(s) => pause(seconds_to_duration(s)).await,
        Err(_) => tracing::warn!(value = %seconds, "not a number of seconds, not pausing"),
    }
}

/// Fractional seconds as a duration; zero when not positive or too large
#[must_use]
pub fn seconds_to_duration(seconds: f64) -> Duration {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or_else(|_| {
        tracing::warn!(seconds, "duration out of range, not pausing");
        Duration::ZERO
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    mod options_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let options = WaitOptions::default();
            assert_eq!(options.timeout_ms, 60_000);
            assert_eq!(options.poll_interval_ms, 500);
        }

        #[test]
        fn test_builders() {
            let options = WaitOptions::default()
                .with_timeout(100)
                .with_poll_interval(10);
            assert_eq!(options.timeout(), Duration::from_millis(100));
            assert_eq!(options.poll_interval(), Duration::from_millis(10));
        }
    }

    mod attempt_tests {
        use super::*;

        #[test]
        fn test_stale_driver_error_is_recoverable() {
            let attempt: Attempt = DriverError::Stale {
                message: "detached".to_string(),
            }
            .into();
            assert!(matches!(attempt, Attempt::Recoverable(_)));
        }

        #[test]
        fn test_other_driver_error_is_fatal() {
            let attempt: Attempt = DriverError::InvalidSelector {
                selector: "//[".to_string(),
                message: "bad".to_string(),
            }
            .into();
            assert!(matches!(attempt, Attempt::Fatal(_)));
        }
    }

    mod waiter_tests {
        use super::*;

        fn counting() -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<(), Attempt>>) {
            let calls = Arc::new(AtomicU32::new(0));
            let seen = calls.clone();
            let action = move || {
                let _ = seen.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err(Attempt::retry("not yet")))
            };
            (calls, action)
        }

        #[tokio::test]
        async fn test_succeeds_first_try() {
            let waiter = Waiter::new(WaitOptions::new(1000, 10));
            let value = waiter
                .until("value", || async { Ok::<_, Attempt>(7) })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        #[tokio::test]
        async fn test_succeeds_after_retries() {
            let waiter = Waiter::new(WaitOptions::new(2000, 10));
            let calls = Arc::new(AtomicU32::new(0));
            let seen = calls.clone();
            waiter
                .until("third call", || {
                    let n = seen.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n >= 2 {
                            Ok(())
                        } else {
                            Err(Attempt::retry("early"))
                        }
                    }
                })
                .await
                .unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 3);
        }

        #[tokio::test]
        async fn test_zero_timeout_is_one_attempt() {
            let waiter = Waiter::new(WaitOptions::new(0, 10));
            let (calls, action) = counting();
            let err = waiter.until("nothing", action).await.unwrap_err();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(matches!(err, PawlError::Timeout { attempts: 1, .. }));
        }

        #[tokio::test]
        async fn test_interval_longer_than_timeout_is_one_attempt() {
            let waiter = Waiter::new(WaitOptions::new(30, 200));
            let (calls, action) = counting();
            let err = waiter.until("nothing", action).await.unwrap_err();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(matches!(err, PawlError::Timeout { .. }));
        }

        #[tokio::test]
        async fn test_always_recoverable_fails_only_after_timeout() {
            let waiter = Waiter::new(WaitOptions::new(300, 50));
            let (calls, action) = counting();
            let started = Instant::now();
            let err = waiter.until("never", action).await.unwrap_err();
            assert!(started.elapsed() >= Duration::from_millis(300));
            let calls = calls.load(Ordering::SeqCst);
            // ~timeout / poll attempts; scheduling jitter only lowers it
            assert!((2..=7).contains(&calls), "attempts = {calls}");
            match err {
                PawlError::Timeout {
                    waited_for,
                    ms,
                    last_error,
                    ..
                } => {
                    assert_eq!(waited_for, "never");
                    assert_eq!(ms, 300);
                    assert_eq!(last_error.as_deref(), Some("not yet"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_fatal_aborts_immediately() {
            let waiter = Waiter::new(WaitOptions::new(5_000, 10));
            let calls = Arc::new(AtomicU32::new(0));
            let seen = calls.clone();
            let started = Instant::now();
            let err = waiter
                .until("fatal", || {
                    let _ = seen.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(Attempt::Fatal(PawlError::assertion("boom"))) }
                })
                .await
                .unwrap_err();
            assert!(started.elapsed() < Duration::from_secs(1));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(matches!(err, PawlError::AssertionFailed { .. }));
        }

        #[tokio::test]
        async fn test_until_true() {
            let waiter = Waiter::new(WaitOptions::new(1000, 10));
            let calls = Arc::new(AtomicU32::new(0));
            let seen = calls.clone();
            waiter
                .until_true("counter", || {
                    let n = seen.fetch_add(1, Ordering::SeqCst);
                    async move { n == 4 }
                })
                .await
                .unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 5);
        }

        #[tokio::test]
        async fn test_poll_tracks_attempts() {
            let waiter = Waiter::new(WaitOptions::new(1000, 1));
            let mut poll = waiter.start("manual");
            poll.failed(Attempt::retry("one")).await.unwrap();
            poll.failed(Attempt::retry("two")).await.unwrap();
            assert_eq!(poll.attempts(), 2);
        }
    }

    mod pause_tests {
        use super::*;

        #[tokio::test]
        async fn test_pause_seconds_fractional() {
            let started = Instant::now();
            pause_seconds("0.05").await;
            assert!(started.elapsed() >= Duration::from_millis(50));
        }

        #[tokio::test]
        async fn test_pause_seconds_ignores_garbage() {
            let started = Instant::now();
            pause_seconds("soon").await;
            pause_seconds("-1").await;
            pause_seconds("0").await;
            assert!(started.elapsed() < Duration::from_millis(50));
        }

        #[tokio::test]
        async fn test_pause_seconds_out_of_range_does_not_pause() {
            let started = Instant::now();
            pause_seconds("1e30").await;
            pause_seconds("inf").await;
            assert!(started.elapsed() < Duration::from_millis(50));
        }

        #[test]
        fn test_seconds_to_duration() {
            assert_eq!(seconds_to_duration(0.25), Duration::from_millis(250));
            assert_eq!(seconds_to_duration(1e30), Duration::ZERO);
            assert_eq!(seconds_to_duration(f64::NAN), Duration::ZERO);
            assert_eq!(seconds_to_duration(-3.0), Duration::ZERO);
        }
    }
}
