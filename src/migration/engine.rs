use crate::marketplace::{CatalogGateway, MarketplaceError};
use crate::migration::audit::AuditTrail;
use crate::migration::ledger::{FailedItemQueue, ResultsLedger};
use crate::migration::matcher::{MIN_ELIGIBLE_ITEMS, compute_missing, is_eligible};
use crate::migration::schedule::{ScheduleDecision, ScheduleError, ScheduleGate};
use crate::migration::scheduler::{Scheduler, SchedulerConfig, SchedulerError};
use crate::migration::store::PersistentStore;
use crate::models::{AuditLogEntry, FailedItem, ResultRecord, SourceItem};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast::error::RecvError};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source catalog has {found} item(s), bulk migration needs at least {required}")]
    NotEligible { found: usize, required: usize },
    #[error("every source item already exists at the destination")]
    NothingToMigrate,
    #[error("the failed-item queue is empty")]
    NoFailedItems,
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("catalog fetch failed: {0}")]
    Catalog(#[from] MarketplaceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    InvalidInput,
    Conflict,
    Upstream,
}

impl EngineError {
    pub fn kind(&self) -> EngineErrorKind {
        match self {
            EngineError::NotEligible { .. } => EngineErrorKind::InvalidInput,
            EngineError::Schedule(ScheduleError::InvalidTimestamp(_)) => {
                EngineErrorKind::InvalidInput
            }
            EngineError::NothingToMigrate
            | EngineError::NoFailedItems
            | EngineError::Scheduler(_)
            | EngineError::Schedule(ScheduleError::Scheduler(_)) => EngineErrorKind::Conflict,
            EngineError::Catalog(_) => EngineErrorKind::Upstream,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotEligible { .. } => "not_eligible",
            EngineError::NothingToMigrate => "nothing_to_migrate",
            EngineError::NoFailedItems => "no_failed_items",
            EngineError::Scheduler(SchedulerError::BatchAlreadyRunning)
            | EngineError::Schedule(ScheduleError::Scheduler(_)) => "batch_already_running",
            EngineError::Schedule(ScheduleError::InvalidTimestamp(_)) => "invalid_schedule",
            EngineError::Catalog(_) => "catalog_unavailable",
        }
    }
}

/// Result of comparing both catalogs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogOverview {
    pub source_count: usize,
    pub destination_count: usize,
    pub eligible: bool,
    pub min_eligible: usize,
    pub missing: Vec<SourceItem>,
    pub fetched_at: DateTime<Utc>,
}

/// Wires the gateway, persisted logs, scheduler and schedule gate together.
pub struct MigrationEngine {
    gateway: Arc<dyn CatalogGateway>,
    scheduler: Arc<Scheduler>,
    gate: ScheduleGate,
    ledger: Arc<ResultsLedger>,
    failed: Arc<FailedItemQueue>,
    audit: AuditTrail,
    overview: Arc<RwLock<Option<CatalogOverview>>>,
}

impl MigrationEngine {
    /// Restores the persisted logs and starts listening for batch completions. A log that
    /// fails to load starts empty.
    pub async fn init(
        gateway: Arc<dyn CatalogGateway>,
        store: Arc<dyn PersistentStore>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let ledger = Arc::new(ResultsLedger::open(store.clone()));
        let failed = Arc::new(FailedItemQueue::open(store.clone()));
        let audit = AuditTrail::open(store);

        if let Err(err) = ledger.load_all().await {
            warn!(target = "migrator.store", collection = "results", error = %err, "load_failed");
        }
        if let Err(err) = failed.load_all().await {
            warn!(target = "migrator.store", collection = "failedItems", error = %err, "load_failed");
        }
        if let Err(err) = audit.load_all().await {
            warn!(target = "migrator.store", collection = "auditLogs", error = %err, "load_failed");
        }

        let scheduler = Arc::new(Scheduler::new(
            gateway.clone(),
            ledger.clone(),
            audit.clone(),
            failed.clone(),
            config,
        ));
        let gate = ScheduleGate::new(scheduler.clone(), audit.clone());
        let overview = Arc::new(RwLock::new(None));

        let mut completions = scheduler.subscribe_completions();
        let cache = Arc::clone(&overview);
        tokio::spawn(async move {
            loop {
                match completions.recv().await {
                    Ok(summary) => {
                        debug!(
                            target = "migrator.scheduler",
                            session_id = %summary.session_id,
                            "catalog_cache_invalidated"
                        );
                        cache.write().await.take();
                    }
                    Err(RecvError::Lagged(_)) => {
                        cache.write().await.take();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Arc::new(Self {
            gateway,
            scheduler,
            gate,
            ledger,
            failed,
            audit,
            overview,
        })
    }

    /// Cached until the next batch completes unless `refresh` is set.
    pub async fn catalog_overview(&self, refresh: bool) -> Result<CatalogOverview, EngineError> {
        if !refresh {
            if let Some(cached) = self.overview.read().await.clone() {
                return Ok(cached);
            }
        }

        let (source, destination) = tokio::try_join!(
            self.gateway.list_source_items(),
            self.gateway.list_destination_items()
        )?;
        let missing = compute_missing(&source, &destination);
        let overview = CatalogOverview {
            source_count: source.len(),
            destination_count: destination.len(),
            eligible: is_eligible(source.len()),
            min_eligible: MIN_ELIGIBLE_ITEMS,
            missing,
            fetched_at: Utc::now(),
        };
        info!(
            target = "migrator.api",
            source = overview.source_count,
            destination = overview.destination_count,
            missing = overview.missing.len(),
            eligible = overview.eligible,
            "catalog_compared"
        );
        *self.overview.write().await = Some(overview.clone());
        Ok(overview)
    }

    /// Starts a background batch over every missing item. Returns the session id.
    pub async fn start_missing_batch(&self) -> Result<String, EngineError> {
        let missing = self.eligible_missing().await?;
        Ok(self.scheduler.spawn_batch(missing, false)?)
    }

    pub async fn start_resume_batch(&self) -> Result<String, EngineError> {
        if self.failed.is_empty().await {
            return Err(EngineError::NoFailedItems);
        }
        Ok(self.scheduler.spawn_batch(Vec::new(), true)?)
    }

    pub async fn schedule_missing_batch(&self, when: &str) -> Result<ScheduleDecision, EngineError> {
        let missing = self.eligible_missing().await?;
        Ok(self.gate.schedule_batch(missing, when).await?)
    }

    async fn eligible_missing(&self) -> Result<Vec<SourceItem>, EngineError> {
        let overview = self.catalog_overview(true).await?;
        if !overview.eligible {
            return Err(EngineError::NotEligible {
                found: overview.source_count,
                required: MIN_ELIGIBLE_ITEMS,
            });
        }
        if overview.missing.is_empty() {
            return Err(EngineError::NothingToMigrate);
        }
        Ok(overview.missing)
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn schedule_gate(&self) -> &ScheduleGate {
        &self.gate
    }

    pub async fn results(&self) -> Vec<ResultRecord> {
        self.ledger.snapshot().await
    }

    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit.entries().await
    }

    pub async fn failed_items(&self) -> Vec<FailedItem> {
        self.failed.snapshot().await
    }
}
