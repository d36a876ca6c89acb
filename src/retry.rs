//! Retry-with-backoff wrapper around remote calls.
//!
//! Knows nothing about enrollment. Each call site passes its own
//! [`RetryPolicy`]; the delay schedule is deterministic
//! (`base_delay * backoff_multiplier^attempt_index`, no jitter).

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{CallError, EnrollmentError};

/// Statuses that are surfaced immediately without another attempt.
pub const DEFAULT_NON_RETRYABLE_STATUSES: [u16; 4] = [400, 401, 403, 404];

/// Immutable retry configuration for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total calls never exceed `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub non_retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            non_retryable_statuses: DEFAULT_NON_RETRYABLE_STATUSES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_multiplier,
            ..Default::default()
        }
    }

    pub fn with_non_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.non_retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Delay before the retry that follows attempt `attempt_index` (0-based).
    /// Saturates at `Duration::MAX`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent).max(0.0);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed { status: Option<u16>, reason: String },
}

/// One attempt within a single `execute_with_retry` invocation.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    /// 1-based.
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// Run `operation` until it succeeds, fails with a non-retryable status, or
/// `policy.max_retries` retries are spent. The last error is returned unchanged.
pub async fn execute_with_retry<T, F, Fut>(mut operation: F, policy: &RetryPolicy) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    execute_recorded(&mut operation, policy, &mut Vec::new()).await
}

/// Same as [`execute_with_retry`] but classifies the final failure into the
/// user-facing taxonomy.
pub async fn execute_classified<T, F, Fut>(operation: F, policy: &RetryPolicy) -> Result<T, EnrollmentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    execute_with_retry(operation, policy)
        .await
        .map_err(|e| e.classify(policy))
}

async fn execute_recorded<T, F, Fut>(
    operation: &mut F,
    policy: &RetryPolicy,
    attempts: &mut Vec<CallAttempt>,
) -> Result<T, CallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut attempt_index = 0u32;

    loop {
        let result = operation().await;
        let outcome = match &result {
            Ok(_) => AttemptOutcome::Succeeded,
            Err(e) => AttemptOutcome::Failed {
                status: e.status,
                reason: e.message.clone(),
            },
        };
        attempts.push(CallAttempt {
            attempt_number: attempt_index + 1,
            timestamp: Utc::now(),
            outcome,
        });

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable(policy) || attempt_index >= policy.max_retries {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt_index);
                warn!(
                    attempt = attempt_index + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    status = ?e.status,
                    reason = %e.message,
                    "Remote call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt_index += 1;
            }
        }
    }
}
