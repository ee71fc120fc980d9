//! In-memory throttling for verification attempts.
//!
//! Attempts are ephemeral by design: they live in a per-key rolling window
//! and are never persisted. Five failures inside fifteen minutes lock the
//! key until the oldest relevant failure ages out; the caller learns only
//! the retry-after duration.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, TwoFactorError};

/// Outcome of a single verification attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptResult {
    Success,
    Failure,
}

/// One ephemeral verification attempt. Only failures influence throttling;
/// a success clears the key's history.
#[derive(Clone, Copy, Debug)]
pub struct VerificationAttempt {
    pub at: DateTime<Utc>,
    pub result: AttemptResult,
}

/// Throttle key for login-time code verification.
#[must_use]
pub fn login_key(user_id: Uuid) -> String {
    format!("login:{user_id}")
}

/// Throttle key for enrollment confirmation. Separate from login so a
/// botched enrollment cannot lock a user out of signing in.
#[must_use]
pub fn enroll_key(user_id: Uuid) -> String {
    format!("enroll:{user_id}")
}

/// Rolling-window failure tracker keyed by strings like `login:{user_id}`.
#[derive(Debug)]
pub struct AttemptTracker {
    limit: usize,
    window: ChronoDuration,
    failures: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl AttemptTracker {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        Self {
            limit: limit as usize,
            window: ChronoDuration::seconds(window_secs),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Rejects with [`TwoFactorError::RateLimited`] when the key has reached
    /// the failure limit inside the window.
    ///
    /// # Errors
    /// `RateLimited { retry_after }` while the key is locked.
    pub async fn check(&self, key: &str) -> Result<()> {
        self.check_at(key, Utc::now()).await
    }

    /// Timestamp-explicit variant of [`check`](Self::check) for tests.
    ///
    /// # Errors
    /// `RateLimited { retry_after }` while the key is locked.
    pub async fn check_at(&self, key: &str, now: DateTime<Utc>) -> Result<()> {
        let mut failures = self.failures.lock().await;
        let Some(entries) = failures.get_mut(key) else {
            return Ok(());
        };
        entries.retain(|at| *at + self.window > now);
        if entries.is_empty() {
            failures.remove(key);
            return Ok(());
        }

        if entries.len() < self.limit {
            return Ok(());
        }

        // Locked until the limit-th most recent failure leaves the window.
        let Some(gate) = entries.get(entries.len() - self.limit).copied() else {
            return Ok(());
        };
        let remaining = (gate + self.window) - now;
        let retry_after = remaining
            .to_std()
            .unwrap_or_else(|_| Duration::from_secs(0));
        Err(TwoFactorError::RateLimited { retry_after })
    }

    /// Records a failed attempt against `key`.
    pub async fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Utc::now()).await;
    }

    /// Timestamp-explicit variant of [`record_failure`](Self::record_failure).
    ///
    /// Also sweeps keys whose failures have all aged out of the window, so
    /// never-checked keys cannot accumulate in a long-lived process.
    pub async fn record_failure_at(&self, key: &str, now: DateTime<Utc>) {
        let mut failures = self.failures.lock().await;
        failures.retain(|_, entries| {
            entries.retain(|at| *at + self.window > now);
            !entries.is_empty()
        });
        failures.entry(key.to_string()).or_default().push(now);
    }

    /// Clears the key after a successful verification.
    pub async fn record_success(&self, key: &str) {
        self.failures.lock().await.remove(key);
    }

    /// Records an attempt outcome, clearing or extending the failure window.
    pub async fn record(&self, key: &str, attempt: VerificationAttempt) {
        match attempt.result {
            AttemptResult::Success => self.record_success(key).await,
            AttemptResult::Failure => self.record_failure_at(key, attempt.at).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{AttemptResult, AttemptTracker, VerificationAttempt, enroll_key, login_key};
    use crate::error::TwoFactorError;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use uuid::Uuid;

    const WINDOW: Duration = Duration::from_secs(15 * 60);

    #[tokio::test]
    async fn allows_attempts_below_the_limit() {
        let tracker = AttemptTracker::new(5, WINDOW);
        let now = Utc::now();
        for _ in 0..4 {
            tracker.record_failure_at("login:u1", now).await;
        }
        assert!(tracker.check_at("login:u1", now).await.is_ok());
    }

    #[tokio::test]
    async fn locks_after_five_failures_and_reports_retry_after() {
        let tracker = AttemptTracker::new(5, WINDOW);
        let now = Utc::now();
        for _ in 0..5 {
            tracker.record_failure_at("login:u1", now).await;
        }
        match tracker.check_at("login:u1", now).await {
            Err(TwoFactorError::RateLimited { retry_after }) => {
                assert!(retry_after > Duration::from_secs(0));
                assert!(retry_after <= WINDOW);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failures_age_out_of_the_window() {
        let tracker = AttemptTracker::new(5, WINDOW);
        let past = Utc::now();
        for _ in 0..5 {
            tracker.record_failure_at("login:u1", past).await;
        }
        let later = past + ChronoDuration::minutes(16);
        assert!(tracker.check_at("login:u1", later).await.is_ok());
    }

    #[tokio::test]
    async fn success_clears_the_key() {
        let tracker = AttemptTracker::new(5, WINDOW);
        let now = Utc::now();
        for _ in 0..5 {
            tracker.record_failure_at("login:u1", now).await;
        }
        tracker
            .record(
                "login:u1",
                VerificationAttempt {
                    at: now,
                    result: AttemptResult::Success,
                },
            )
            .await;
        assert!(tracker.check_at("login:u1", now).await.is_ok());
    }

    #[tokio::test]
    async fn aged_out_key_is_dropped_on_check() {
        let tracker = AttemptTracker::new(5, WINDOW);
        let past = Utc::now();
        for _ in 0..5 {
            tracker.record_failure_at("login:u1", past).await;
        }
        let later = past + ChronoDuration::minutes(16);
        assert!(tracker.check_at("login:u1", later).await.is_ok());
        assert!(!tracker.failures.lock().await.contains_key("login:u1"));
    }

    #[tokio::test]
    async fn recording_a_failure_sweeps_stale_keys() {
        let tracker = AttemptTracker::new(5, WINDOW);
        let past = Utc::now();
        for i in 0..100 {
            tracker
                .record_failure_at(&format!("login:ghost-{i}"), past)
                .await;
        }
        let later = past + ChronoDuration::minutes(16);
        tracker.record_failure_at("login:u1", later).await;

        let failures = tracker.failures.lock().await;
        assert_eq!(failures.len(), 1);
        assert!(failures.contains_key("login:u1"));
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let tracker = AttemptTracker::new(5, WINDOW);
        let now = Utc::now();
        let user = Uuid::new_v4();
        for _ in 0..5 {
            tracker.record_failure_at(&enroll_key(user), now).await;
        }
        assert!(tracker.check_at(&login_key(user), now).await.is_ok());
        assert!(tracker.check_at(&enroll_key(user), now).await.is_err());
    }
}
