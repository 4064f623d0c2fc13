use crate::migration::audit::AuditTrail;
use crate::migration::scheduler::{Scheduler, SchedulerError};
use crate::models::{AuditAction, SourceItem};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Duration, sleep},
};
use tracing::{info, warn};
use uuid::Uuid;

const BUSY_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule timestamp: {0}")]
    InvalidTimestamp(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBatch {
    pub schedule_id: String,
    pub run_at: DateTime<Utc>,
    pub item_count: usize,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleDecision {
    Deferred(ScheduledBatch),
    Immediate { session_id: String },
}

struct PendingSchedule {
    batch: ScheduledBatch,
    handle: JoinHandle<()>,
}

/// Defers a batch to a wall-clock time. At most one schedule is pending; a newer request
/// replaces it.
pub struct ScheduleGate {
    scheduler: Arc<Scheduler>,
    audit: AuditTrail,
    pending: Arc<Mutex<Option<PendingSchedule>>>,
}

impl ScheduleGate {
    pub fn new(scheduler: Arc<Scheduler>, audit: AuditTrail) -> Self {
        Self {
            scheduler,
            audit,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// `when` is an RFC 3339 timestamp. Times at or before now start the batch right away.
    pub async fn schedule_batch(
        &self,
        items: Vec<SourceItem>,
        when: &str,
    ) -> Result<ScheduleDecision, ScheduleError> {
        let run_at = parse_run_at(when)?;
        self.schedule_at(items, run_at).await
    }

    /// A newer request replaces the pending schedule, but only once it has been accepted;
    /// an immediate run rejected by the scheduler leaves the pending one in place.
    pub async fn schedule_at(
        &self,
        items: Vec<SourceItem>,
        run_at: DateTime<Utc>,
    ) -> Result<ScheduleDecision, ScheduleError> {
        let now = Utc::now();
        let mut pending = self.pending.lock().await;

        let delay = match (run_at - now).to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ => {
                let session_id = self.scheduler.spawn_batch(items, false)?;
                replace_pending(&mut pending, None);
                return Ok(ScheduleDecision::Immediate { session_id });
            }
        };

        let batch = ScheduledBatch {
            schedule_id: Uuid::new_v4().to_string(),
            run_at,
            item_count: items.len(),
            scheduled_at: now,
        };
        self.audit
            .record(
                AuditAction::ScheduleSet,
                format!(
                    "{} item(s) scheduled for {}",
                    batch.item_count,
                    run_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
                &batch.schedule_id,
            )
            .await;
        info!(
            target = "migrator.scheduler",
            schedule_id = %batch.schedule_id,
            run_at = %run_at,
            delay_ms = delay.as_millis() as u64,
            "schedule_set"
        );

        let handle = tokio::spawn(fire_when_due(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.pending),
            batch.schedule_id.clone(),
            items,
            delay,
        ));
        replace_pending(
            &mut pending,
            Some(PendingSchedule {
                batch: batch.clone(),
                handle,
            }),
        );
        Ok(ScheduleDecision::Deferred(batch))
    }

    pub async fn pending(&self) -> Option<ScheduledBatch> {
        self.pending.lock().await.as_ref().map(|p| p.batch.clone())
    }

    pub async fn cancel(&self) -> Option<ScheduledBatch> {
        let previous = self.pending.lock().await.take()?;
        previous.handle.abort();
        info!(
            target = "migrator.scheduler",
            schedule_id = %previous.batch.schedule_id,
            "schedule_cancelled"
        );
        Some(previous.batch)
    }
}

fn replace_pending(slot: &mut Option<PendingSchedule>, next: Option<PendingSchedule>) {
    if let Some(previous) = std::mem::replace(slot, next) {
        previous.handle.abort();
        info!(
            target = "migrator.scheduler",
            schedule_id = %previous.batch.schedule_id,
            "schedule_replaced"
        );
    }
}

/// Starts the batch once `delay` has passed, under the schedule id as its session id. If a
/// batch is still running the schedule stays pending until that batch completes.
async fn fire_when_due(
    scheduler: Arc<Scheduler>,
    slot: Arc<Mutex<Option<PendingSchedule>>>,
    schedule_id: String,
    items: Vec<SourceItem>,
    delay: Duration,
) {
    sleep(delay).await;
    let mut waiting = false;
    loop {
        let mut completions = scheduler.subscribe_completions();
        {
            let mut guard = slot.lock().await;
            if !guard
                .as_ref()
                .is_some_and(|p| p.batch.schedule_id == schedule_id)
            {
                return;
            }
            match scheduler.spawn_batch_with_session(schedule_id.clone(), items.clone(), false) {
                Ok(session_id) => {
                    guard.take();
                    info!(
                        target = "migrator.scheduler",
                        schedule_id = %schedule_id,
                        session_id = %session_id,
                        "scheduled_batch_started"
                    );
                    return;
                }
                Err(err) if !waiting => {
                    waiting = true;
                    warn!(
                        target = "migrator.scheduler",
                        schedule_id = %schedule_id,
                        error = %err,
                        "scheduled_batch_waiting"
                    );
                }
                Err(_) => {}
            }
        }
        // The completion is broadcast just before the running flag clears, so poll too.
        tokio::select! {
            _ = completions.recv() => {}
            _ = sleep(BUSY_POLL_INTERVAL) => {}
        }
    }
}

fn parse_run_at(when: &str) -> Result<DateTime<Utc>, ScheduleError> {
    DateTime::parse_from_rfc3339(when.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| ScheduleError::InvalidTimestamp(format!("{when}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::{CatalogGateway, DemoMarketplace};
    use crate::migration::ledger::{FailedItemQueue, ResultsLedger};
    use crate::migration::scheduler::SchedulerConfig;
    use crate::migration::store::{MemoryStore, PersistentStore};
    use chrono::Duration as ChronoDuration;

    fn gate() -> (ScheduleGate, Arc<Scheduler>, AuditTrail) {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let audit = AuditTrail::open(store.clone());
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(DemoMarketplace::seeded()),
            Arc::new(ResultsLedger::open(store.clone())),
            audit.clone(),
            Arc::new(FailedItemQueue::open(store)),
            SchedulerConfig::default(),
        ));
        (
            ScheduleGate::new(scheduler.clone(), audit.clone()),
            scheduler,
            audit,
        )
    }

    // Uncategorizable items that exhaust their retries, keeping a batch busy for a while.
    async fn slow_items() -> Vec<SourceItem> {
        DemoMarketplace::seeded()
            .list_source_items()
            .await
            .unwrap()
            .into_iter()
            .filter(|item| item.name.starts_with("Mystery Box"))
            .collect()
    }

    async fn count(audit: &AuditTrail, action: AuditAction) -> usize {
        audit
            .entries()
            .await
            .iter()
            .filter(|e| e.action == action)
            .count()
    }

    #[tokio::test]
    async fn rejects_malformed_timestamps() {
        let (gate, _, _) = gate();
        let err = gate.schedule_batch(vec![], "tomorrow at noon").await.unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidTimestamp(_)));
        assert!(gate.pending().await.is_none());
    }

    #[tokio::test]
    async fn past_timestamps_run_immediately() {
        let (gate, scheduler, audit) = gate();
        let mut completions = scheduler.subscribe_completions();
        let decision = gate
            .schedule_batch(vec![], "2020-01-01T00:00:00Z")
            .await
            .unwrap();
        let ScheduleDecision::Immediate { session_id } = decision else {
            panic!("expected immediate run");
        };
        assert_eq!(completions.recv().await.unwrap().session_id, session_id);
        assert_eq!(count(&audit, AuditAction::ScheduleSet).await, 0);
    }

    #[tokio::test]
    async fn future_timestamps_are_audited_then_fire() {
        let (gate, scheduler, audit) = gate();
        let mut completions = scheduler.subscribe_completions();
        let run_at = Utc::now() + ChronoDuration::milliseconds(60);
        let decision = gate.schedule_at(vec![], run_at).await.unwrap();
        assert!(matches!(decision, ScheduleDecision::Deferred(_)));
        assert_eq!(count(&audit, AuditAction::ScheduleSet).await, 1);
        assert_eq!(count(&audit, AuditAction::BatchStart).await, 0);
        assert_eq!(gate.pending().await.map(|p| p.run_at), Some(run_at));

        let ScheduleDecision::Deferred(batch) = decision else {
            unreachable!();
        };
        let summary = completions.recv().await.unwrap();
        assert_eq!(summary.session_id, batch.schedule_id);
        assert!(gate.pending().await.is_none());

        let entries = audit.entries().await;
        let started = entries
            .iter()
            .find(|e| e.action == AuditAction::BatchStart)
            .unwrap();
        let set = entries
            .iter()
            .find(|e| e.action == AuditAction::ScheduleSet)
            .unwrap();
        assert_eq!(started.session_id, set.session_id);
    }

    #[tokio::test]
    async fn rejected_immediate_run_keeps_pending_schedule() {
        let (gate, scheduler, _) = gate();
        let decision = gate
            .schedule_at(vec![], Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();
        let ScheduleDecision::Deferred(pending) = decision else {
            panic!("expected deferral");
        };
        scheduler.spawn_batch(slow_items().await, false).unwrap();

        let err = gate
            .schedule_batch(vec![], "2020-01-01T00:00:00Z")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ScheduleError::Scheduler(SchedulerError::BatchAlreadyRunning)
        );
        assert_eq!(gate.pending().await, Some(pending));
    }

    #[tokio::test]
    async fn due_schedule_waits_for_running_batch() {
        let (gate, scheduler, audit) = gate();
        let mut completions = scheduler.subscribe_completions();
        let decision = gate
            .schedule_at(vec![], Utc::now() + ChronoDuration::milliseconds(50))
            .await
            .unwrap();
        let ScheduleDecision::Deferred(batch) = decision else {
            panic!("expected deferral");
        };
        let manual = scheduler.spawn_batch(slow_items().await, false).unwrap();

        sleep(Duration::from_millis(200)).await;
        assert!(scheduler.is_running());
        assert_eq!(gate.pending().await, Some(batch.clone()));

        assert_eq!(completions.recv().await.unwrap().session_id, manual);
        assert_eq!(
            completions.recv().await.unwrap().session_id,
            batch.schedule_id
        );
        assert!(gate.pending().await.is_none());
        assert_eq!(count(&audit, AuditAction::BatchStart).await, 2);
    }

    #[tokio::test]
    async fn newer_schedule_replaces_pending_one() {
        let (gate, _, audit) = gate();
        gate.schedule_at(vec![], Utc::now() + ChronoDuration::milliseconds(40))
            .await
            .unwrap();
        let second = gate
            .schedule_at(vec![], Utc::now() + ChronoDuration::milliseconds(80))
            .await
            .unwrap();
        let ScheduleDecision::Deferred(second) = second else {
            panic!("expected deferral");
        };
        assert_eq!(gate.pending().await, Some(second));

        sleep(Duration::from_millis(250)).await;
        assert_eq!(count(&audit, AuditAction::ScheduleSet).await, 2);
        assert_eq!(count(&audit, AuditAction::BatchStart).await, 1);
    }

    #[tokio::test]
    async fn cancelled_schedule_never_fires() {
        let (gate, _, audit) = gate();
        gate.schedule_at(vec![], Utc::now() + ChronoDuration::milliseconds(30))
            .await
            .unwrap();
        assert!(gate.cancel().await.is_some());
        assert!(gate.cancel().await.is_none());
        sleep(Duration::from_millis(120)).await;
        assert_eq!(count(&audit, AuditAction::BatchStart).await, 0);
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let parsed = parse_run_at("2031-05-01T12:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2031-05-01T10:00:00+00:00");
    }
}
