//! One-time copy of document-store data into an empty indexed store.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use market_types::{MarketError, Result, UsageFilter};

use crate::backend::StoreBackend;
use crate::batch::WriteBatch;
use crate::record::{Collection, StoredRecord};

/// What a migration run copied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// `false` when the run was skipped.
    pub migrated: bool,
    pub records: BTreeMap<Collection, usize>,
    pub audit_events: usize,
    pub usage_entries: usize,
}

impl MigrationReport {
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.records.values().sum()
    }
}

/// Copy everything from `source` into `target` in one batch.
///
/// Skipped when `target` already holds data or `source` is empty, so running
/// it twice is a no-op. Audit and usage order is preserved.
pub async fn migrate(source: &dyn StoreBackend, target: &dyn StoreBackend) -> Result<MigrationReport> {
    if target.has_any_data().await? {
        info!(target = ?target.kind(), "Migration skipped: target already has data");
        return Ok(MigrationReport::default());
    }
    if !source.has_any_data().await? {
        info!(source = ?source.kind(), "Migration skipped: source is empty");
        return Ok(MigrationReport::default());
    }

    let mut batch = WriteBatch::new();
    let mut report = MigrationReport {
        migrated: true,
        ..MigrationReport::default()
    };

    for collection in Collection::ALL {
        let bodies = source.list(collection).await?;
        report.records.insert(collection, bodies.len());
        for body in bodies {
            let id = body_id(collection, &body)?;
            batch.put_row(StoredRecord::from_body(collection, id, body)?);
        }
    }

    let events = source.read_audit_events(usize::MAX).await?;
    report.audit_events = events.len();
    for event in events {
        batch.append_audit(event);
    }

    let entries = source.list_usage(&UsageFilter::default()).await?;
    report.usage_entries = entries.len();
    for entry in entries {
        batch.append_usage(entry);
    }

    target.commit(batch).await?;
    info!(
        records = report.total_records(),
        audit_events = report.audit_events,
        usage_entries = report.usage_entries,
        "Migrated document store"
    );
    Ok(report)
}

/// Primary id field of a serialized entity.
fn body_id(collection: Collection, body: &Value) -> Result<String> {
    let field = match collection {
        Collection::Offers => "offer_id",
        Collection::Orders => "order_id",
        Collection::Consents => "consent_id",
        Collection::Deliveries => "delivery_id",
        Collection::Settlements => "settlement_id",
        Collection::Disputes => "dispute_id",
        Collection::RevocationJobs => "job_id",
    };
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MarketError::Storage(format!("{collection} record without {field}")))
}
