//! Waiter - Block until a remote asynchronous operation settles
//!
//! A [`StateChangeConf`] repeatedly calls a refresh function and classifies the
//! observed status against target, pending and invalid label sets until a
//! terminal state is reached, the deadline passes, or the caller cancels.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Statuses treated as hard failures unless the caller overrides them
pub const DEFAULT_INVALID_STATUSES: &[&str] = &["Error", "Shelved", "Unknow"];

/// What a single refresh observed
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T> {
    /// The object exists and reports a status
    Found {
        value: T,
        status: String,
        /// Failure detail reported alongside the status, if any
        reason: Option<String>,
    },
    /// The object no longer exists (HTTP 404)
    Gone,
}

impl<T> Observation<T> {
    pub fn found(value: T, status: impl Into<String>) -> Self {
        Observation::Found {
            value,
            status: status.into(),
            reason: None,
        }
    }

    /// Attach a failure reason; ignored for `Gone`
    pub fn with_reason(self, reason: impl Into<String>) -> Self {
        match self {
            Observation::Found { value, status, .. } => Observation::Found {
                value,
                status,
                reason: Some(reason.into()).filter(|r| !r.is_empty()),
            },
            Observation::Gone => Observation::Gone,
        }
    }
}

/// How a `Gone` observation is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFound {
    /// Deletion waits: disappearing is the goal
    Success,
    /// Creation and availability waits: disappearing is a failure
    Fail,
}

/// Terminal success of a wait
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    Reached { value: T, status: String },
    Gone,
}

impl<T> WaitOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            WaitOutcome::Reached { value, .. } => Some(value),
            WaitOutcome::Gone => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error(
        "timeout while waiting for state to become '{target}' (last state: '{}', timeout: {timeout:?}){}",
        .last_status.as_deref().unwrap_or(""),
        reason_suffix(.reason)
    )]
    Timeout {
        target: String,
        timeout: Duration,
        last_status: Option<String>,
        reason: Option<String>,
    },

    #[error("unexpected state '{status}', wanted target '{target}'{}", reason_suffix(.reason))]
    UnexpectedStatus {
        status: String,
        target: String,
        reason: Option<String>,
    },

    #[error("the object disappeared while waiting for state '{target}'")]
    NotFound { target: String },

    #[error("wait cancelled")]
    Cancelled,

    #[error("error refreshing state: {0}")]
    Refresh(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(". last error: {}", r))
        .unwrap_or_default()
}

impl WaitError {
    /// Status observed when the wait ended, if any
    pub fn last_status(&self) -> Option<&str> {
        match self {
            WaitError::Timeout { last_status, .. } => last_status.as_deref(),
            WaitError::UnexpectedStatus { status, .. } => Some(status),
            _ => None,
        }
    }
}

/// Configuration of a state-change wait
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    pending: Vec<String>,
    target: Vec<String>,
    invalid: Vec<String>,
    delay: Duration,
    poll_interval: Duration,
    timeout: Duration,
    not_found: NotFound,
}

impl StateChangeConf {
    pub fn new(target: &[&str]) -> Self {
        Self {
            pending: Vec::new(),
            target: to_strings(target),
            invalid: to_strings(DEFAULT_INVALID_STATUSES),
            delay: Duration::ZERO,
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(10 * 60),
            not_found: NotFound::Fail,
        }
    }

    /// Statuses expected while the operation is in progress
    pub fn pending(mut self, pending: &[&str]) -> Self {
        self.pending = to_strings(pending);
        self
    }

    /// Statuses that abort the wait (compared case-insensitively)
    pub fn invalid(mut self, invalid: &[&str]) -> Self {
        self.invalid = to_strings(invalid);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn not_found(mut self, policy: NotFound) -> Self {
        self.not_found = policy;
        self
    }

    fn target_label(&self) -> String {
        self.target.join(", ")
    }

    fn is_invalid(&self, status: &str) -> bool {
        self.invalid.iter().any(|s| s.eq_ignore_ascii_case(status))
    }

    /// Poll `refresh` until a terminal state
    ///
    /// The deadline covers the initial delay and every refresh call.
    pub async fn wait<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut refresh: F,
    ) -> Result<WaitOutcome<T>, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let deadline = instant_after(self.timeout);
        let mut last_status: Option<String> = None;
        let mut last_reason: Option<String> = None;

        let timeout_error = |last_status: Option<String>, reason: Option<String>| WaitError::Timeout {
            target: self.target_label(),
            timeout: self.timeout,
            last_status,
            reason,
        };

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep_until(deadline.min(instant_after(self.delay))) => {}
            }
        }

        loop {
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(timeout_error(last_status, last_reason));
            }

            let observation = tokio::select! {
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                result = tokio::time::timeout_at(deadline, refresh()) => match result {
                    Err(_) => return Err(timeout_error(last_status, last_reason)),
                    Ok(Err(e)) => return Err(WaitError::Refresh(Box::new(e))),
                    Ok(Ok(observation)) => observation,
                },
            };

            match observation {
                Observation::Gone => {
                    tracing::debug!(target_status = %self.target_label(), "object not found while waiting");
                    return match self.not_found {
                        NotFound::Success => Ok(WaitOutcome::Gone),
                        NotFound::Fail => Err(WaitError::NotFound {
                            target: self.target_label(),
                        }),
                    };
                }
                Observation::Found {
                    value,
                    status,
                    reason,
                } => {
                    tracing::debug!(status = %status, target_status = %self.target_label(), "refreshed state");

                    if self.is_invalid(&status) {
                        return Err(WaitError::UnexpectedStatus {
                            status,
                            target: self.target_label(),
                            reason,
                        });
                    }
                    if self.target.iter().any(|t| *t == status) {
                        return Ok(WaitOutcome::Reached { value, status });
                    }
                    if !self.pending.is_empty() && !self.pending.contains(&status) {
                        tracing::debug!(status = %status, "status outside the pending set, still waiting");
                    }
                    last_status = Some(status);
                    last_reason = reason;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep_until(deadline.min(instant_after(self.poll_interval))) => {}
            }
        }
    }
}

/// Roughly 30 years, the horizon used when a duration overflows `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn instant_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration).unwrap_or(now + FAR_FUTURE)
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Refresh function replaying a fixed sequence of statuses; the last one repeats
    fn sequence(
        statuses: &'static [&'static str],
        calls: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<Result<Observation<usize>, io::Error>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let status = statuses[n.min(statuses.len() - 1)];
            let observation = if status == "404" {
                Observation::Gone
            } else {
                Observation::found(n, status)
            };
            std::future::ready(Ok(observation))
        }
    }

    fn conf(target: &[&str]) -> StateChangeConf {
        StateChangeConf::new(target)
            .pending(&["Creating"])
            .poll_interval(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_target_after_pending() {
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = conf(&["Available"])
            .wait(
                &CancellationToken::new(),
                sequence(&["Creating", "Creating", "Available"], calls.clone()),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WaitOutcome::Reached {
                value: 2,
                status: "Available".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_still_waits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = StateChangeConf::new(&["Available"])
            .pending(&["Creating"])
            .delay(Duration::from_secs(5))
            .poll_interval(Duration::from_secs(1))
            .timeout(Duration::MAX)
            .wait(&CancellationToken::new(), sequence(&["Creating", "Available"], calls.clone()))
            .await
            .unwrap();

        assert!(matches!(outcome, WaitOutcome::Reached { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_status_fails_case_insensitively() {
        let calls = Arc::new(AtomicUsize::new(0));
        let err = conf(&["Available"])
            .wait(
                &CancellationToken::new(),
                sequence(&["Creating", "ERROR"], calls),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::UnexpectedStatus { ref status, .. } if status == "ERROR"));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_check_precedes_target() {
        let calls = Arc::new(AtomicUsize::new(0));
        let err = StateChangeConf::new(&["Error"])
            .wait(&CancellationToken::new(), sequence(&["Error"], calls))
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::UnexpectedStatus { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn target_match_is_exact() {
        let calls = Arc::new(AtomicUsize::new(0));
        let err = conf(&["Available"])
            .timeout(Duration::from_secs(30))
            .wait(&CancellationToken::new(), sequence(&["available"], calls))
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_policy_decides_gone() {
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = conf(&["Deleted"])
            .not_found(NotFound::Success)
            .wait(
                &CancellationToken::new(),
                sequence(&["Deleting", "404"], calls.clone()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Gone);

        calls.store(0, Ordering::SeqCst);
        let err = conf(&["Available"])
            .wait(&CancellationToken::new(), sequence(&["404"], calls))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_carries_last_status() {
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        let err = conf(&["Available"])
            .delay(Duration::from_secs(20))
            .timeout(Duration::from_secs(60))
            .wait(&CancellationToken::new(), sequence(&["Creating"], calls))
            .await
            .unwrap_err();

        assert_eq!(err.last_status(), Some("Creating"));
        assert!(err.to_string().contains("last state: 'Creating'"));
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_reason() {
        let mut calls = 0;
        let err = conf(&["Success"])
            .timeout(Duration::from_secs(15))
            .wait(&CancellationToken::new(), || {
                calls += 1;
                std::future::ready(Ok::<_, io::Error>(
                    Observation::found((), "Running").with_reason("quota exceeded"),
                ))
            })
            .await
            .unwrap_err();

        assert!(calls >= 2);
        assert!(err.to_string().ends_with("last error: quota exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_delay() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let waiter = conf(&["Available"]).delay(Duration::from_secs(120));

        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            child.cancel();
        });

        let err = waiter
            .wait(&cancel, sequence(&["Creating"], calls.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_error_is_terminal() {
        let err = conf(&["Available"])
            .wait(&CancellationToken::new(), || {
                std::future::ready(Err::<Observation<()>, _>(io::Error::other("connection reset")))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WaitError::Refresh(_)));
        assert!(err.to_string().contains("connection reset"));
    }
}
