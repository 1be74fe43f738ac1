//! Typed facade over a [`StoreBackend`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use market_types::{
    AuditEvent, Delivery, Dispute, DisputeFilter, JobId, MarketError, OrderId, Result,
    RevocationJob, RevocationJobStatus, Settlement, StoreBackendKind, StoreConfig, UsageEntry,
    UsageFilter, UsageSummary,
};

use crate::backend::StoreBackend;
use crate::batch::WriteBatch;
use crate::document::DocumentBackend;
use crate::indexed::IndexedBackend;
use crate::locks::{KeyGuard, KeyedLocks};
use crate::migrate::migrate;
use crate::record::{Record, StoredRecord};

/// The ledger's persistence handle. Cheap to clone.
#[derive(Clone)]
pub struct LedgerStore {
    backend: Arc<dyn StoreBackend>,
    locks: KeyedLocks,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("backend", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

impl LedgerStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> StoreBackendKind {
        self.backend.kind()
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Exclusive access to `key` until the guard drops.
    pub async fn lock(&self, key: impl Into<String>) -> KeyGuard {
        self.locks.acquire(key).await
    }

    // -----------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------

    pub async fn get<T: Record>(&self, id: &T::Id) -> Result<Option<T>> {
        self.backend
            .get(T::COLLECTION, &id.to_string())
            .await?
            .map(StoredRecord::decode)
            .transpose()
    }

    /// Like [`Self::get`], but a missing record is `NotFound`.
    pub async fn require<T: Record>(&self, id: &T::Id) -> Result<T> {
        self.get(id)
            .await?
            .ok_or_else(|| MarketError::not_found(T::COLLECTION.entity(), id))
    }

    pub async fn list<T: Record>(&self) -> Result<Vec<T>> {
        decode_all(self.backend.list(T::COLLECTION).await?)
    }

    pub async fn list_by_order<T: Record>(&self, order_id: OrderId) -> Result<Vec<T>> {
        decode_all(
            self.backend
                .list_by_order(T::COLLECTION, &order_id.to_string())
                .await?,
        )
    }

    pub async fn save<T: Record>(&self, record: &T) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(record)?;
        self.backend.commit(batch).await
    }

    /// Stage writes with `stage` and commit them as one batch. Nothing is
    /// written if `stage` fails.
    pub async fn run_in_transaction<F>(&self, stage: F) -> Result<()>
    where
        F: FnOnce(&mut WriteBatch) -> Result<()>,
    {
        let mut batch = WriteBatch::new();
        stage(&mut batch)?;
        self.backend.commit(batch).await
    }

    /// The order's active settlement, or its most recent refunded one.
    pub async fn settlement_by_order(&self, order_id: OrderId) -> Result<Option<Settlement>> {
        let mut settlements: Vec<Settlement> = self.list_by_order(order_id).await?;
        if let Some(pos) = settlements.iter().position(Settlement::is_active) {
            return Ok(Some(settlements.swap_remove(pos)));
        }
        Ok(settlements.pop())
    }

    /// The order's open dispute, or its most recently opened one.
    pub async fn dispute_by_order(&self, order_id: OrderId) -> Result<Option<Dispute>> {
        let mut disputes: Vec<Dispute> = self.list_by_order(order_id).await?;
        if let Some(pos) = disputes.iter().position(Dispute::is_open) {
            return Ok(Some(disputes.swap_remove(pos)));
        }
        disputes.sort_by_key(|d| d.opened_at);
        Ok(disputes.pop())
    }

    pub async fn disputes(&self, filter: &DisputeFilter) -> Result<Vec<Dispute>> {
        let disputes: Vec<Dispute> = match filter.order_id {
            Some(order_id) => self.list_by_order(order_id).await?,
            None => self.list().await?,
        };
        Ok(disputes.into_iter().filter(|d| filter.matches(d)).collect())
    }

    pub async fn deliveries_for_order(&self, order_id: OrderId) -> Result<Vec<Delivery>> {
        self.list_by_order(order_id).await
    }

    // -----------------------------------------------------------------
    // Revocation jobs
    // -----------------------------------------------------------------

    pub async fn revocation_jobs(
        &self,
        status: Option<RevocationJobStatus>,
    ) -> Result<Vec<RevocationJob>> {
        match status {
            Some(status) => decode_all(
                self.backend
                    .list_by_status(RevocationJob::COLLECTION, &status.to_string())
                    .await?,
            ),
            None => self.list().await,
        }
    }

    /// Pending jobs whose next attempt is at or before `now`.
    pub async fn due_revocation_jobs(&self, now: DateTime<Utc>) -> Result<Vec<RevocationJob>> {
        let pending = self.revocation_jobs(Some(RevocationJobStatus::Pending)).await?;
        Ok(pending.into_iter().filter(|job| job.is_due(now)).collect())
    }

    pub async fn remove_revocation_job(&self, job_id: &JobId) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.remove::<RevocationJob>(job_id);
        self.backend.commit(batch).await
    }

    // -----------------------------------------------------------------
    // Audit log and usage ledger
    // -----------------------------------------------------------------

    pub async fn append_audit_event(&self, event: AuditEvent) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.append_audit(event);
        self.backend.commit(batch).await
    }

    pub async fn read_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        self.backend.read_audit_events(limit).await
    }

    pub async fn append_usage(&self, entry: UsageEntry) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.append_usage(entry);
        self.backend.commit(batch).await
    }

    pub async fn list_usage(&self, filter: &UsageFilter) -> Result<Vec<UsageEntry>> {
        self.backend.list_usage(filter).await
    }

    pub async fn summarize_usage(&self, filter: &UsageFilter) -> Result<UsageSummary> {
        let entries = self.list_usage(filter).await?;
        UsageSummary::from_entries(&entries)
    }

    pub async fn has_any_data(&self) -> Result<bool> {
        self.backend.has_any_data().await
    }
}

fn decode_all<T: Record>(bodies: Vec<serde_json::Value>) -> Result<Vec<T>> {
    bodies.into_iter().map(StoredRecord::decode).collect()
}

/// Open the backend selected by `config`.
///
/// For the indexed backend with `migrate_from_document` set, document data
/// in `data_dir` is copied into the database when the database is empty.
pub async fn open_store(config: &StoreConfig) -> Result<LedgerStore> {
    let backend: Arc<dyn StoreBackend> = match config.backend {
        StoreBackendKind::Document => Arc::new(DocumentBackend::open(&config.data_dir).await?),
        StoreBackendKind::Indexed => {
            let indexed = IndexedBackend::open(config.resolved_db_path()).await?;
            if config.migrate_from_document {
                let source = DocumentBackend::open(&config.data_dir).await?;
                let report = migrate(&source, &indexed).await?;
                if report.migrated {
                    info!(
                        records = report.total_records(),
                        "Document data migrated into indexed store"
                    );
                }
            }
            Arc::new(indexed)
        }
    };
    Ok(LedgerStore::new(backend))
}
