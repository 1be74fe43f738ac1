//! The storage backend seam.

use async_trait::async_trait;
use serde_json::Value;

use market_types::{AuditEvent, Result, StoreBackendKind, UsageEntry, UsageFilter};

use crate::batch::WriteBatch;
use crate::record::Collection;

/// Durable storage for entity collections, the audit log, and the usage
/// ledger. Reads return serialized bodies; typing is done by
/// [`crate::LedgerStore`].
///
/// Listings are ordered by id. Entity ids are UUIDv7, so this is creation
/// order on both backends.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    fn kind(&self) -> StoreBackendKind;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    async fn list(&self, collection: Collection) -> Result<Vec<Value>>;

    async fn list_by_order(&self, collection: Collection, order_id: &str) -> Result<Vec<Value>>;

    async fn list_by_status(&self, collection: Collection, status: &str) -> Result<Vec<Value>>;

    /// Apply every op in `batch`, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// The most recent `limit` audit events, oldest first.
    async fn read_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>>;

    /// Usage entries matching `filter`, chronological, `limit` applied.
    async fn list_usage(&self, filter: &UsageFilter) -> Result<Vec<UsageEntry>>;

    /// Whether any collection or log holds data.
    async fn has_any_data(&self) -> Result<bool>;
}
