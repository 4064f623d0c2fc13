use crate::migration::audit::AuditTrail;
use crate::models::{AuditAction, DestinationItem, ResultRecord, ResultStatus, SourceItem};
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use std::{fmt::Display, future::Future, time::Instant};
use tokio::time::{Duration, sleep};
use tracing::debug;

/// Delay before retry number `attempt` (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    Linear { step_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
    /// Full jitter over the exponential ceiling.
    Jittered { base_ms: u64, max_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Linear { step_ms: 500 }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { step_ms } => {
                Duration::from_millis(step_ms.saturating_mul(u64::from(attempt)))
            }
            Backoff::Exponential { base_ms, max_ms } => {
                Duration::from_millis(exponential_ceiling(base_ms, max_ms, attempt))
            }
            Backoff::Jittered { base_ms, max_ms } => {
                let ceiling = exponential_ceiling(base_ms, max_ms, attempt);
                Duration::from_millis(rand::rng().random_range(0..=ceiling))
            }
        }
    }
}

fn exponential_ceiling(base_ms: u64, max_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeStatus {
    Success { created: DestinationItem },
    Failure { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutcome {
    pub status: OutcomeStatus,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl MigrationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success { .. })
    }

    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Failure { reason } => Some(reason),
            OutcomeStatus::Success { .. } => None,
        }
    }

    pub fn to_record(&self, item: &SourceItem) -> ResultRecord {
        ResultRecord {
            id: item.id.clone(),
            name: item.name.clone(),
            status: if self.is_success() {
                ResultStatus::Success
            } else {
                ResultStatus::Error
            },
            error: self.error().map(str::to_string),
            retry_count: self.retry_count(),
            duration_ms: self.duration_ms,
            timestamp: Utc::now(),
        }
    }
}

/// Runs `op` until it succeeds or `policy.max_retries` extra attempts are spent.
///
/// Audits `ITEM_START` once, `ITEM_RETRY` before every re-attempt and exactly one of
/// `ITEM_SUCCESS` / `ITEM_FAILED`.
pub async fn with_retries<F, Fut, E>(
    item: &SourceItem,
    policy: &RetryPolicy,
    audit: &AuditTrail,
    session_id: &str,
    mut op: F,
) -> MigrationOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<DestinationItem, E>>,
    E: Display,
{
    let started = Instant::now();
    audit
        .record(
            AuditAction::ItemStart,
            format!("{} ({})", item.name, item.id),
            session_id,
        )
        .await;

    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(created) => {
                let attempts = attempt + 1;
                audit
                    .record(
                        AuditAction::ItemSuccess,
                        format!(
                            "{} ({}) created as {} after {attempts} attempt(s)",
                            item.name, item.id, created.id
                        ),
                        session_id,
                    )
                    .await;
                return MigrationOutcome {
                    status: OutcomeStatus::Success { created },
                    attempts,
                    duration_ms: elapsed_ms(started),
                };
            }
            Err(err) => {
                let reason = err.to_string();
                if attempt >= policy.max_retries {
                    let attempts = attempt + 1;
                    audit
                        .record(
                            AuditAction::ItemFailed,
                            format!(
                                "{} ({}) failed after {attempts} attempt(s): {reason}",
                                item.name, item.id
                            ),
                            session_id,
                        )
                        .await;
                    return MigrationOutcome {
                        status: OutcomeStatus::Failure { reason },
                        attempts,
                        duration_ms: elapsed_ms(started),
                    };
                }
                attempt += 1;
                let delay = policy.backoff.delay(attempt);
                audit
                    .record(
                        AuditAction::ItemRetry,
                        format!(
                            "{} ({}) attempt {attempt} failed: {reason}",
                            item.name, item.id
                        ),
                        session_id,
                    )
                    .await;
                debug!(
                    target = "migrator.retry",
                    item_id = %item.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "retry_scheduled"
                );
                sleep(delay).await;
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
