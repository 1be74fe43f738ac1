//! Read-side queries and the revocation sweep entry point.

use chrono::{DateTime, Utc};

use market_types::{AuditEvent, Result, RevocationJob, RevocationJobStatus, constants};

use crate::market::Market;
use crate::revocation::SweepReport;

impl Market {
    /// The most recent `limit` audit events (default 100), oldest first.
    pub async fn audit_log(&self, limit: Option<usize>) -> Result<Vec<AuditEvent>> {
        self.store
            .read_audit_events(limit.unwrap_or(constants::DEFAULT_AUDIT_LIMIT))
            .await
    }

    pub async fn revocation_jobs(&self, status: Option<RevocationJobStatus>) -> Result<Vec<RevocationJob>> {
        self.store.revocation_jobs(status).await
    }

    /// Retry every revocation job due at `now`. Meant to be driven by the
    /// caller on a timer.
    pub async fn sweep_revocations(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.revocations.sweep(now).await
    }
}
