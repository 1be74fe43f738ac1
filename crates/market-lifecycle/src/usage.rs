//! Usage / cost ledger operations.

use tracing::debug;

use market_types::{
    ActorId, AuditDetails, AuditKind, Result, UsageDraft, UsageEntry, UsageFilter, UsageSummary,
};

use crate::audit::AuditEntry;
use crate::market::Market;

impl Market {
    /// Append a metered usage record. Entry and its `ledger_appended` audit
    /// event are committed together.
    pub async fn append_usage(&self, draft: UsageDraft, actor: Option<&ActorId>) -> Result<UsageEntry> {
        let actor = self.require_actor(actor)?;
        self.check_actor(actor, &draft.provider_actor_id, "providerActorId")?;
        let entry = UsageEntry::record(draft, Self::now())?;

        let event = self.audit.event(
            AuditEntry::new(AuditKind::LedgerAppended, entry.ledger_id)
                .hash(&entry.entry_hash)
                .actor(actor.unwrap_or(&entry.draft.provider_actor_id))
                .details(
                    AuditDetails::new()
                        .with("lease_id", &entry.draft.lease_id)
                        .with("resource_id", &entry.draft.resource_id)
                        .with("unit", entry.draft.unit)
                        .with("cost", entry.draft.cost),
                ),
        );
        self.store
            .run_in_transaction(|tx| {
                tx.append_usage(entry.clone());
                tx.append_audit(event);
                Ok(())
            })
            .await?;
        debug!(ledger_id = %entry.ledger_id, lease_id = %entry.draft.lease_id, "Usage appended");
        Ok(entry)
    }

    pub async fn list_usage(&self, filter: &UsageFilter) -> Result<Vec<UsageEntry>> {
        self.store.list_usage(filter).await
    }

    /// Per-unit quantity and cost totals over the filtered entries.
    pub async fn summarize_usage(&self, filter: &UsageFilter) -> Result<UsageSummary> {
        self.store.summarize_usage(filter).await
    }
}
