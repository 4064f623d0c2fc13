use crate::marketplace::CatalogGateway;
use crate::metrics;
use crate::migration::audit::AuditTrail;
use crate::migration::ledger::{FailedItemQueue, ResultsLedger};
use crate::migration::operation::migrate_item;
use crate::migration::pause::PauseController;
use crate::migration::retry::{MigrationOutcome, RetryPolicy, with_retries};
use crate::models::{AuditAction, FailedItem, SourceItem};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Instant,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch},
    time::{Duration, sleep},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub concurrency_limit: usize,
    pub retry: RetryPolicy,
    pub pause_poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            retry: RetryPolicy::default(),
            pause_poll_interval: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("a migration batch is already running")]
    BatchAlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub id: String,
    pub name: String,
    pub error: String,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    Running,
    Paused,
    Completed,
}

/// Snapshot of the current (or last) batch, published on every admission and settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub session_id: Option<String>,
    pub phase: BatchPhase,
    pub resume: bool,
    pub total: usize,
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub concurrency_limit: usize,
    pub errors: Vec<ItemError>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchProgress {
    fn idle(concurrency_limit: usize) -> Self {
        Self {
            session_id: None,
            phase: BatchPhase::Idle,
            resume: false,
            total: 0,
            queued: 0,
            active: 0,
            completed: 0,
            succeeded: 0,
            failed: 0,
            concurrency_limit,
            errors: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub session_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub resume: bool,
    pub elapsed_ms: u64,
}

struct BatchState {
    session_id: String,
    resume: bool,
    queue: VecDeque<SourceItem>,
    total: usize,
    active_count: usize,
    completed_count: usize,
    success_count: usize,
    error_list: Vec<ItemError>,
    failures: Vec<FailedItem>,
    limit: usize,
    started_at: DateTime<Utc>,
}

impl BatchState {
    fn can_admit(&self, paused: bool) -> bool {
        !paused && self.active_count < self.limit && !self.queue.is_empty()
    }

    fn is_done(&self) -> bool {
        self.queue.is_empty() && self.active_count == 0
    }

    fn progress(&self, phase: BatchPhase) -> BatchProgress {
        BatchProgress {
            session_id: Some(self.session_id.clone()),
            phase,
            resume: self.resume,
            total: self.total,
            queued: self.queue.len(),
            active: self.active_count,
            completed: self.completed_count,
            succeeded: self.success_count,
            failed: self.error_list.len(),
            concurrency_limit: self.limit,
            errors: self.error_list.clone(),
            started_at: Some(self.started_at),
            finished_at: None,
        }
    }
}

struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Runs migration batches with a bounded number of items in flight.
///
/// Admission happens in a single loop that owns the batch counters; in-flight items are
/// polled from a `FuturesUnordered`, so `active < limit` is checked and incremented in one
/// place and no item is ever started twice.
pub struct Scheduler {
    gateway: Arc<dyn CatalogGateway>,
    ledger: Arc<ResultsLedger>,
    audit: AuditTrail,
    failed: Arc<FailedItemQueue>,
    pause: PauseController,
    retry: RetryPolicy,
    pause_poll_interval: Duration,
    concurrency_limit: AtomicUsize,
    running: Arc<AtomicBool>,
    progress: watch::Sender<BatchProgress>,
    completions: broadcast::Sender<BatchSummary>,
}

impl Scheduler {
    pub fn new(
        gateway: Arc<dyn CatalogGateway>,
        ledger: Arc<ResultsLedger>,
        audit: AuditTrail,
        failed: Arc<FailedItemQueue>,
        config: SchedulerConfig,
    ) -> Self {
        let limit = clamp_limit(config.concurrency_limit);
        let (progress, _) = watch::channel(BatchProgress::idle(limit));
        let (completions, _) = broadcast::channel(16);
        Self {
            gateway,
            ledger,
            audit,
            failed,
            pause: PauseController::new(),
            retry: config.retry,
            pause_poll_interval: config.pause_poll_interval,
            concurrency_limit: AtomicUsize::new(limit),
            running: Arc::new(AtomicBool::new(false)),
            progress,
            completions,
        }
    }

    pub fn pause(&self) -> &PauseController {
        &self.pause
    }

    /// Applies from the next admission on; items already in flight are not affected.
    pub fn set_concurrency_limit(&self, limit: usize) -> usize {
        let clamped = clamp_limit(limit);
        let previous = self.concurrency_limit.swap(clamped, Ordering::SeqCst);
        if previous != clamped {
            info!(
                target = "migrator.scheduler",
                requested = limit,
                limit = clamped,
                "concurrency_limit_set"
            );
        }
        self.progress.send_modify(|p| p.concurrency_limit = clamped);
        clamped
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> BatchProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe_completions(&self) -> broadcast::Receiver<BatchSummary> {
        self.completions.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs a batch to completion. With `resume` set the queue is the current failed-item
    /// queue and `items` is ignored.
    pub async fn run_batch(
        &self,
        items: Vec<SourceItem>,
        resume: bool,
    ) -> Result<BatchSummary, SchedulerError> {
        let guard = self.claim()?;
        Ok(self
            .drive(Uuid::new_v4().to_string(), items, resume, guard)
            .await)
    }

    /// Starts a batch in the background and returns its session id. The running check
    /// happens before returning, so a concurrent start is rejected right away.
    pub fn spawn_batch(
        self: &Arc<Self>,
        items: Vec<SourceItem>,
        resume: bool,
    ) -> Result<String, SchedulerError> {
        self.spawn_batch_with_session(Uuid::new_v4().to_string(), items, resume)
    }

    pub fn spawn_batch_with_session(
        self: &Arc<Self>,
        session_id: String,
        items: Vec<SourceItem>,
        resume: bool,
    ) -> Result<String, SchedulerError> {
        let guard = self.claim()?;
        let scheduler = Arc::clone(self);
        let session = session_id.clone();
        tokio::spawn(async move {
            scheduler.drive(session, items, resume, guard).await;
        });
        Ok(session_id)
    }

    fn claim(&self) -> Result<RunGuard, SchedulerError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SchedulerError::BatchAlreadyRunning)?;
        Ok(RunGuard {
            running: Arc::clone(&self.running),
        })
    }

    async fn drive(
        &self,
        session_id: String,
        items: Vec<SourceItem>,
        resume: bool,
        _guard: RunGuard,
    ) -> BatchSummary {
        let started = Instant::now();
        let queue: VecDeque<SourceItem> = if resume {
            self.failed
                .snapshot()
                .await
                .into_iter()
                .rev()
                .map(|failed| failed.item)
                .collect()
        } else {
            items.into_iter().collect()
        };

        self.pause.set_paused(false);
        let mut state = BatchState {
            session_id: session_id.clone(),
            resume,
            total: queue.len(),
            queue,
            active_count: 0,
            completed_count: 0,
            success_count: 0,
            error_list: Vec::new(),
            failures: Vec::new(),
            limit: self.concurrency_limit(),
            started_at: Utc::now(),
        };

        info!(
            target = "migrator.scheduler",
            session_id = %session_id,
            total = state.total,
            resume,
            limit = state.limit,
            "batch_started"
        );
        let mode = if resume { "resume" } else { "full" };
        self.audit
            .record(
                AuditAction::BatchStart,
                format!("{} item(s), {mode} run", state.total),
                &session_id,
            )
            .await;

        let mut in_flight = FuturesUnordered::new();
        loop {
            let paused = self.pause.is_paused();
            state.limit = self.concurrency_limit();
            while state.can_admit(paused) {
                let Some(item) = state.queue.pop_front() else {
                    break;
                };
                state.active_count += 1;
                debug!(
                    target = "migrator.scheduler",
                    session_id = %session_id,
                    item_id = %item.id,
                    active = state.active_count,
                    "item_admitted"
                );
                in_flight.push(self.attempt(&session_id, item));
            }

            if state.is_done() {
                break;
            }
            let phase = if paused {
                BatchPhase::Paused
            } else {
                BatchPhase::Running
            };
            self.progress.send_replace(state.progress(phase));

            if paused {
                if in_flight.is_empty() {
                    sleep(self.pause_poll_interval).await;
                    continue;
                }
                tokio::select! {
                    Some((item, outcome)) = in_flight.next() => {
                        self.settle(&mut state, item, outcome).await;
                    }
                    _ = sleep(self.pause_poll_interval) => {}
                }
            } else if let Some((item, outcome)) = in_flight.next().await {
                self.settle(&mut state, item, outcome).await;
            }
        }

        self.finalize(state, started).await
    }

    async fn attempt(&self, session_id: &str, item: SourceItem) -> (SourceItem, MigrationOutcome) {
        let outcome = with_retries(&item, &self.retry, &self.audit, session_id, || {
            migrate_item(self.gateway.as_ref(), &item)
        })
        .await;
        (item, outcome)
    }

    async fn settle(&self, state: &mut BatchState, item: SourceItem, outcome: MigrationOutcome) {
        state.active_count -= 1;
        state.completed_count += 1;

        let record = outcome.to_record(&item);
        metrics::item_settled(record.status.as_str(), record.retry_count, record.duration_ms);
        match outcome.error() {
            None => state.success_count += 1,
            Some(reason) => {
                state.error_list.push(ItemError {
                    id: item.id.clone(),
                    name: item.name.clone(),
                    error: reason.to_string(),
                    retry_count: outcome.retry_count(),
                });
                state.failures.push(FailedItem::new(item, reason));
            }
        }

        if let Err(err) = self.ledger.append(vec![record]).await {
            warn!(
                target = "migrator.store",
                session_id = %state.session_id,
                error = %err,
                "result_persist_failed"
            );
        }
    }

    async fn finalize(&self, mut state: BatchState, started: Instant) -> BatchSummary {
        let failures = std::mem::take(&mut state.failures);
        let persisted = if failures.is_empty() {
            self.failed.clear().await
        } else {
            self.failed.replace(failures.into_iter().rev().collect()).await
        };
        if let Err(err) = persisted {
            warn!(
                target = "migrator.store",
                session_id = %state.session_id,
                error = %err,
                "failed_items_persist_failed"
            );
        }

        let summary = BatchSummary {
            session_id: state.session_id.clone(),
            total: state.total,
            succeeded: state.success_count,
            failed: state.error_list.len(),
            resume: state.resume,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        self.audit
            .record(
                AuditAction::BatchComplete,
                format!(
                    "{} succeeded, {} failed of {}",
                    summary.succeeded, summary.failed, summary.total
                ),
                &summary.session_id,
            )
            .await;

        let mut progress = state.progress(BatchPhase::Completed);
        progress.finished_at = Some(Utc::now());
        self.progress.send_replace(progress);

        metrics::batch_completed(summary.succeeded, summary.failed, started.elapsed().as_millis());
        info!(
            target = "migrator.scheduler",
            session_id = %summary.session_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed_ms = summary.elapsed_ms,
            "batch_completed"
        );
        if self.completions.send(summary.clone()).is_err() {
            debug!(target = "migrator.scheduler", "no_completion_subscribers");
        }
        summary
    }
}

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::{GatewayFuture, MarketplaceError};
    use crate::migration::store::{MemoryStore, PersistentStore};
    use crate::migration::retry::Backoff;
    use crate::models::{DestinationItem, NewDestinationItem};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGateway {
        delay_ms: u64,
        uncategorized: Mutex<HashSet<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        created: Mutex<HashMap<String, usize>>,
        pause_on_first_create: Mutex<Option<PauseController>>,
    }

    impl FakeGateway {
        fn with_delay(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                ..Default::default()
            }
        }

        fn reject(&self, name: &str) {
            self.uncategorized.lock().unwrap().insert(name.to_string());
        }

        fn heal(&self) {
            self.uncategorized.lock().unwrap().clear();
        }

        fn creations(&self, source_id: &str) -> usize {
            self.created.lock().unwrap().get(source_id).copied().unwrap_or(0)
        }
    }

    impl CatalogGateway for FakeGateway {
        fn list_source_items(&self) -> GatewayFuture<'_, Vec<SourceItem>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn list_destination_items(&self) -> GatewayFuture<'_, Vec<DestinationItem>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn detect_category<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, Option<String>> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(self.delay_ms)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                if self.uncategorized.lock().unwrap().contains(name) {
                    Ok(None)
                } else {
                    Ok(Some("CAT-1".into()))
                }
            })
        }

        fn upload_image<'a>(&'a self, url: &'a str) -> GatewayFuture<'a, String> {
            Box::pin(async move { Ok(format!("pic:{url}")) })
        }

        fn create_destination_item<'a>(
            &'a self,
            payload: &'a NewDestinationItem,
        ) -> GatewayFuture<'a, DestinationItem> {
            Box::pin(async move {
                if let Some(pause) = self.pause_on_first_create.lock().unwrap().take() {
                    pause.set_paused(true);
                }
                if payload.price < 0.0 {
                    return Err(MarketplaceError::Status {
                        status: 400,
                        body: "negative price".into(),
                    });
                }
                *self
                    .created
                    .lock()
                    .unwrap()
                    .entry(payload.source_id.clone())
                    .or_default() += 1;
                Ok(DestinationItem {
                    id: format!("dst-{}", payload.source_id),
                    title: payload.title.clone(),
                    price: payload.price,
                    description: payload.description.clone(),
                })
            })
        }
    }

    fn items(count: usize) -> Vec<SourceItem> {
        (0..count)
            .map(|n| SourceItem {
                id: format!("src-{n}"),
                name: format!("Item {n}"),
                price: 10.0 + n as f64,
                description: String::new(),
                weight: None,
                dimensions: None,
                images: vec![format!("https://img.example.com/{n}.jpg")],
            })
            .collect()
    }

    struct Harness {
        gateway: Arc<FakeGateway>,
        scheduler: Arc<Scheduler>,
        ledger: Arc<ResultsLedger>,
        failed: Arc<FailedItemQueue>,
        audit: AuditTrail,
    }

    fn harness(gateway: FakeGateway, limit: usize) -> Harness {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let gateway = Arc::new(gateway);
        let ledger = Arc::new(ResultsLedger::open(store.clone()));
        let failed = Arc::new(FailedItemQueue::open(store.clone()));
        let audit = AuditTrail::open(store);
        let config = SchedulerConfig {
            concurrency_limit: limit,
            retry: RetryPolicy {
                max_retries: 2,
                backoff: Backoff::Linear { step_ms: 1 },
            },
            pause_poll_interval: Duration::from_millis(10),
        };
        let scheduler = Arc::new(Scheduler::new(
            gateway.clone(),
            ledger.clone(),
            audit.clone(),
            failed.clone(),
            config,
        ));
        Harness {
            gateway,
            scheduler,
            ledger,
            failed,
            audit,
        }
    }

    #[test]
    fn concurrency_limit_is_clamped() {
        let h = harness(FakeGateway::default(), 3);
        assert_eq!(h.scheduler.set_concurrency_limit(9), MAX_CONCURRENCY);
        assert_eq!(h.scheduler.set_concurrency_limit(0), MIN_CONCURRENCY);
        assert_eq!(h.scheduler.concurrency_limit(), 1);
        assert_eq!(h.scheduler.progress().concurrency_limit, 1);
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_limit() {
        let h = harness(FakeGateway::with_delay(10), 3);
        let summary = h.scheduler.run_batch(items(12), false).await.unwrap();
        assert_eq!(summary.succeeded, 12);
        assert_eq!(h.gateway.max_in_flight.load(Ordering::SeqCst), 3);
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn every_item_is_admitted_exactly_once() {
        let h = harness(FakeGateway::with_delay(2), 5);
        let batch = items(17);
        h.scheduler.run_batch(batch.clone(), false).await.unwrap();
        for item in &batch {
            assert_eq!(h.gateway.creations(&item.id), 1, "{}", item.id);
        }
        let entries = h.audit.entries().await;
        let starts = entries
            .iter()
            .filter(|e| e.action == AuditAction::ItemStart)
            .count();
        assert_eq!(starts, 17);
        assert_eq!(h.ledger.snapshot().await.len(), 17);
    }

    #[tokio::test]
    async fn pausing_stops_admissions_but_not_in_flight_items() {
        let gateway = FakeGateway::with_delay(20);
        let h = harness(gateway, 2);
        *h.gateway.pause_on_first_create.lock().unwrap() = Some(h.scheduler.pause().clone());
        let mut completions = h.scheduler.subscribe_completions();

        h.scheduler.spawn_batch(items(6), false).unwrap();
        sleep(Duration::from_millis(150)).await;

        let progress = h.scheduler.progress();
        assert_eq!(progress.phase, BatchPhase::Paused);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.active, 0);
        assert_eq!(progress.queued, 4);
        assert_eq!(h.ledger.snapshot().await.len(), 2);

        h.scheduler.pause().set_paused(false);
        let summary = completions.recv().await.unwrap();
        assert_eq!(summary.succeeded, 6);
        assert_eq!(h.scheduler.progress().phase, BatchPhase::Completed);
    }

    #[tokio::test]
    async fn failures_are_queued_and_resumed() {
        let h = harness(FakeGateway::default(), 2);
        h.gateway.reject("Item 1");
        h.gateway.reject("Item 3");

        let first = h.scheduler.run_batch(items(4), false).await.unwrap();
        assert_eq!((first.succeeded, first.failed), (2, 2));
        let queued = h.failed.snapshot().await;
        assert_eq!(queued.len(), 2);
        assert!(queued.iter().all(|f| f.error.contains("no category")));
        let progress = h.scheduler.progress();
        assert_eq!(progress.errors.len(), 2);
        assert!(progress.errors.iter().all(|e| e.retry_count == 2));

        h.gateway.heal();
        let resumed = h.scheduler.run_batch(Vec::new(), true).await.unwrap();
        assert!(resumed.resume);
        assert_eq!((resumed.total, resumed.succeeded), (2, 2));
        assert!(h.failed.is_empty().await);
        assert_eq!(h.gateway.creations("src-1"), 1);
        assert_eq!(h.gateway.creations("src-0"), 1);
    }

    #[tokio::test]
    async fn second_batch_is_rejected_while_running() {
        let h = harness(FakeGateway::with_delay(20), 1);
        let mut completions = h.scheduler.subscribe_completions();
        h.scheduler.spawn_batch(items(3), false).unwrap();
        assert!(h.scheduler.is_running());
        assert_eq!(
            h.scheduler.run_batch(items(1), false).await,
            Err(SchedulerError::BatchAlreadyRunning)
        );
        completions.recv().await.unwrap();
        sleep(Duration::from_millis(5)).await;
        assert!(!h.scheduler.is_running());
    }

    #[tokio::test]
    async fn empty_batch_completes_immediately() {
        let h = harness(FakeGateway::default(), 3);
        let summary = h.scheduler.run_batch(Vec::new(), false).await.unwrap();
        assert_eq!(summary.total, 0);
        let entries = h.audit.entries().await;
        assert_eq!(entries[0].action, AuditAction::BatchComplete);
        assert_eq!(entries[1].action, AuditAction::BatchStart);
    }

    #[tokio::test]
    async fn batch_starts_unpaused() {
        let h = harness(FakeGateway::default(), 3);
        h.scheduler.pause().set_paused(true);
        let summary = h.scheduler.run_batch(items(2), false).await.unwrap();
        assert_eq!(summary.succeeded, 2);
    }
}
