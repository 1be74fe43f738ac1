//! Audit/anchor pipeline.
//!
//! Every lifecycle step appends one [`AuditEvent`] to the store. Anchored
//! steps additionally publish `(anchor_id, hash)` through the
//! [`AnchorAdapter`]; the receipt or the error lands in the event details
//! and never changes the outcome of the step itself.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use market_adapters::{AnchorAdapter, bounded};
use market_store::LedgerStore;
use market_types::{
    ActorId, AnchorConfig, AuditDetails, AuditEvent, AuditKind, ContentHash, EventId, Result,
};

/// An audit event before it is stamped with an id and a timestamp.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub ref_id: String,
    pub hash: Option<ContentHash>,
    pub actor: Option<ActorId>,
    pub details: AuditDetails,
}

impl AuditEntry {
    pub fn new(kind: AuditKind, ref_id: impl ToString) -> Self {
        Self {
            kind,
            ref_id: ref_id.to_string(),
            hash: None,
            actor: None,
            details: AuditDetails::new(),
        }
    }

    #[must_use]
    pub fn hash(mut self, hash: &ContentHash) -> Self {
        self.hash = Some(hash.clone());
        self
    }

    #[must_use]
    pub fn actor(mut self, actor: &ActorId) -> Self {
        self.actor = Some(actor.clone());
        self
    }

    #[must_use]
    pub fn details(mut self, details: AuditDetails) -> Self {
        self.details = details;
        self
    }
}

/// Appends audit events with strictly increasing timestamps.
#[derive(Clone)]
pub struct AuditTrail {
    store: LedgerStore,
    anchor: Option<Arc<dyn AnchorAdapter>>,
    config: AnchorConfig,
    last_timestamp: Arc<Mutex<DateTime<Utc>>>,
}

impl AuditTrail {
    pub fn new(
        store: LedgerStore,
        anchor: Option<Arc<dyn AnchorAdapter>>,
        config: AnchorConfig,
    ) -> Self {
        Self {
            store,
            anchor,
            config,
            last_timestamp: Arc::new(Mutex::new(DateTime::<Utc>::MIN_UTC)),
        }
    }

    /// Whether anchored entries are actually published.
    #[must_use]
    pub fn anchoring(&self) -> bool {
        self.config.enabled && self.anchor.is_some()
    }

    /// Next event timestamp: wall clock, bumped by 1µs when the clock has
    /// not moved past the previous event.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_timestamp.lock();
        let now = Utc::now();
        let stamp = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = stamp;
        stamp
    }

    /// Stamp `entry` without writing it, for callers that commit it inside
    /// their own write batch.
    pub fn event(&self, entry: AuditEntry) -> AuditEvent {
        AuditEvent {
            id: EventId::new(),
            kind: entry.kind,
            ref_id: entry.ref_id,
            hash: entry.hash,
            actor: entry.actor,
            timestamp: self.next_timestamp(),
            details: (!entry.details.is_empty()).then_some(entry.details),
        }
    }

    /// Append `entry` to the audit log.
    pub async fn record(&self, entry: AuditEntry) -> Result<AuditEvent> {
        let event = self.event(entry);
        self.store.append_audit_event(event.clone()).await?;
        debug!(kind = %event.kind, ref_id = %event.ref_id, "Audit event recorded");
        Ok(event)
    }

    /// Anchor `entry.hash` under `anchor_id`, then append `entry` with the
    /// anchor receipt (`anchor`) or failure (`anchor_error`) in its details.
    pub async fn record_anchored(&self, anchor_id: &str, mut entry: AuditEntry) -> Result<AuditEvent> {
        if let (Some(anchor), Some(hash), true) = (&self.anchor, &entry.hash, self.config.enabled) {
            let published = bounded(
                self.config.timeout(),
                "anchor.anchor_hash",
                anchor.anchor_hash(anchor_id, hash),
            )
            .await;
            match published {
                Ok(receipt) => entry.details.insert("anchor", receipt),
                Err(err) => {
                    warn!(anchor_id, error = %err, "Anchoring failed, recording audit event without anchor");
                    entry.details.insert("anchor_error", err.to_string());
                }
            }
        }
        self.record(entry).await
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail")
            .field("anchoring", &self.anchoring())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_adapters::testing::RecordingAnchor;
    use market_store::DocumentBackend;
    use market_types::hash_str;

    async fn trail(
        dir: &tempfile::TempDir,
        anchor: Option<Arc<RecordingAnchor>>,
        enabled: bool,
    ) -> (LedgerStore, AuditTrail) {
        let backend = DocumentBackend::open(dir.path()).await.unwrap();
        let store = LedgerStore::new(Arc::new(backend));
        let config = AnchorConfig {
            enabled,
            ..AnchorConfig::default()
        };
        let anchor = anchor.map(|a| a as Arc<dyn AnchorAdapter>);
        (store.clone(), AuditTrail::new(store, anchor, config))
    }

    #[tokio::test]
    async fn timestamps_strictly_increase() {
        let dir = tempfile::tempdir().unwrap();
        let (store, audit) = trail(&dir, None, false).await;
        for _ in 0..20 {
            audit
                .record(AuditEntry::new(AuditKind::OrderCreated, "o"))
                .await
                .unwrap();
        }
        let events = store.read_audit_events(100).await.unwrap();
        assert_eq!(events.len(), 20);
        assert!(events.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn anchor_receipt_is_merged_into_details() {
        let dir = tempfile::tempdir().unwrap();
        let anchor = Arc::new(RecordingAnchor::new());
        let (_, audit) = trail(&dir, Some(Arc::clone(&anchor)), true).await;
        let event = audit
            .record_anchored(
                "offer:1",
                AuditEntry::new(AuditKind::OfferCreated, "1").hash(&hash_str("offer")),
            )
            .await
            .unwrap();
        let details = event.details.expect("details should carry the receipt");
        assert_eq!(details.get("anchor").unwrap()["tx"], "0xanchor-1");
        assert_eq!(anchor.anchored().len(), 1);
    }

    #[tokio::test]
    async fn anchor_failure_still_records() {
        let dir = tempfile::tempdir().unwrap();
        let anchor = Arc::new(RecordingAnchor::new());
        anchor.set_failing(true);
        let (store, audit) = trail(&dir, Some(anchor), true).await;
        let event = audit
            .record_anchored(
                "offer:1",
                AuditEntry::new(AuditKind::OfferCreated, "1").hash(&hash_str("offer")),
            )
            .await
            .expect("anchor failure must not fail the audit write");
        let details = event.details.unwrap();
        assert!(details.get("anchor_error").is_some());
        assert_eq!(store.read_audit_events(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_anchoring_skips_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let anchor = Arc::new(RecordingAnchor::new());
        let (_, audit) = trail(&dir, Some(Arc::clone(&anchor)), false).await;
        let event = audit
            .record_anchored(
                "offer:1",
                AuditEntry::new(AuditKind::OfferCreated, "1").hash(&hash_str("offer")),
            )
            .await
            .unwrap();
        assert!(event.details.is_none());
        assert!(anchor.anchored().is_empty());
    }
}
