use crate::migration::ledger::PersistedLog;
use crate::migration::store::{PersistentStore, StoreError};
use crate::models::{AuditAction, AuditLogEntry};
use std::sync::Arc;
use tracing::{debug, warn};

pub const AUDIT_KEY: &str = "auditLogs";
pub const AUDIT_CAPACITY: usize = 100;

/// Lifecycle log of batches and items, persisted alongside the results ledger.
///
/// Recording never fails from the caller's point of view: storage errors are logged and
/// the in-memory trail stays authoritative for the rest of the process.
#[derive(Clone)]
pub struct AuditTrail {
    log: Arc<PersistedLog<AuditLogEntry>>,
}

impl AuditTrail {
    pub fn open(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            log: Arc::new(PersistedLog::new(AUDIT_KEY, AUDIT_CAPACITY, store)),
        }
    }

    pub async fn load_all(&self) -> Result<Vec<AuditLogEntry>, StoreError> {
        self.log.load_all().await
    }

    pub async fn record(&self, action: AuditAction, details: impl Into<String>, session_id: &str) {
        let entry = AuditLogEntry::new(action, details, session_id);
        debug!(
            target = "migrator.audit",
            action = %entry.action,
            session_id = %entry.session_id,
            details = %entry.details,
            "audit_entry"
        );
        if let Err(err) = self.log.append(vec![entry]).await {
            warn!(target = "migrator.audit", action = %action, error = %err, "audit_persist_failed");
        }
    }

    pub async fn entries(&self) -> Vec<AuditLogEntry> {
        self.log.snapshot().await
    }
}
