//! Revocation queue: durable retries of failed "stop serving" calls.
//!
//! A job is created when the inline notifier call for a revoked delivery
//! fails, and is committed together with the revoked delivery.
//! [`RevocationQueue::sweep`] is invoked by the caller (on a timer or
//! on demand) and re-attempts every due job:
//! 1. success deletes the job (`revocation_succeeded`)
//! 2. failure below `max_attempts` reschedules it (`revocation_retry`)
//! 3. failure at `max_attempts`, or a vanished delivery, parks it as
//!    `failed` (`revocation_failed`); failed jobs are never retried again

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use market_adapters::{
    PayloadStore, RevocationContext, RevocationNotifier, RevocationOutcome, bounded,
};
use market_store::LedgerStore;
use market_types::{
    AuditDetails, AuditKind, Consent, Delivery, Offer, Order, Result, RevocationConfig,
    RevocationJob, RevocationTarget,
};

use crate::audit::{AuditEntry, AuditTrail};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rescheduled for a later sweep.
    pub pending: usize,
}

#[derive(Clone)]
pub struct RevocationQueue {
    store: LedgerStore,
    audit: AuditTrail,
    notifier: Arc<dyn RevocationNotifier>,
    payloads: Option<Arc<dyn PayloadStore>>,
    config: RevocationConfig,
}

impl RevocationQueue {
    pub fn new(
        store: LedgerStore,
        audit: AuditTrail,
        notifier: Arc<dyn RevocationNotifier>,
        payloads: Option<Arc<dyn PayloadStore>>,
        config: RevocationConfig,
    ) -> Self {
        Self {
            store,
            audit,
            notifier,
            payloads,
            config,
        }
    }

    /// `delivery` with its payload loaded from the payload store when the
    /// record only holds a reference. A payload that cannot be loaded is
    /// left out; the revocation still goes ahead.
    pub async fn resolve_payload(&self, mut delivery: Delivery) -> Delivery {
        if delivery.payload.is_some() {
            return delivery;
        }
        let (Some(reference), Some(payloads)) = (&delivery.payload_ref, &self.payloads) else {
            return delivery;
        };
        match payloads.get_delivery_payload(reference).await {
            Ok(payload) => delivery.payload = Some(payload),
            Err(err) => {
                warn!(delivery_id = %delivery.delivery_id, error = %err, "Payload unavailable for revocation");
            }
        }
        delivery
    }

    /// One bounded notifier call. Errors and timeouts become a failed outcome.
    pub async fn attempt(&self, context: &RevocationContext) -> RevocationOutcome {
        let called = bounded(
            self.config.timeout(),
            "notifier.execute_revocation",
            self.notifier.execute_revocation(context),
        )
        .await;
        match called {
            Ok(outcome) => outcome,
            Err(err) => RevocationOutcome::failure(None, err.to_string()),
        }
    }

    /// Retry job for a revocation whose inline attempt just failed. The
    /// caller commits it with the revoked delivery.
    pub fn prepare_job(
        &self,
        target: RevocationTarget,
        reason: &str,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RevocationJob> {
        RevocationJob::after_failed_attempt(target, reason, error, self.config.retry_delay(), now)
    }

    /// Log and audit a job once it is committed.
    pub async fn record_queued(&self, job: &RevocationJob) -> Result<()> {
        warn!(
            job_id = %job.job_id,
            delivery_id = %job.delivery_id,
            error = job.last_error.as_deref().unwrap_or_default(),
            "Revocation failed, job queued"
        );
        self.audit
            .record(
                AuditEntry::new(AuditKind::RevocationRetry, job.job_id)
                    .hash(&job.payload_hash)
                    .details(retry_details(job)),
            )
            .await?;
        Ok(())
    }

    /// Re-attempt every pending job due at `now`.
    ///
    /// Each job is processed under its own lock and re-read first, so
    /// overlapping sweeps never process the same job twice.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        for candidate in self.store.due_revocation_jobs(now).await? {
            let _guard = self.store.lock(format!("job:{}", candidate.job_id)).await;
            let Some(mut job) = self.store.get::<RevocationJob>(&candidate.job_id).await? else {
                continue;
            };
            if !job.is_due(now) {
                continue;
            }
            report.processed += 1;

            let Some(delivery) = self.store.get::<Delivery>(&job.delivery_id).await? else {
                job.fail("delivery not found".to_string(), now);
                self.store.save(&job).await?;
                self.record_outcome(AuditKind::RevocationFailed, &job).await?;
                report.failed += 1;
                continue;
            };

            let context = self.retry_context(&job, delivery).await?;
            let outcome = self.attempt(&context).await;
            if outcome.ok {
                self.store.remove_revocation_job(&job.job_id).await?;
                job.attempts = context.attempt;
                self.record_outcome(AuditKind::RevocationSucceeded, &job).await?;
                report.succeeded += 1;
                continue;
            }

            let exhausted = job.record_failure(
                outcome.error_message(),
                self.config.max_attempts,
                self.config.retry_delay(),
                now,
            );
            self.store.save(&job).await?;
            if exhausted {
                warn!(job_id = %job.job_id, attempts = job.attempts, "Revocation job out of attempts");
                self.record_outcome(AuditKind::RevocationFailed, &job).await?;
                report.failed += 1;
            } else {
                self.record_outcome(AuditKind::RevocationRetry, &job).await?;
                report.pending += 1;
            }
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                pending = report.pending,
                "Revocation sweep finished"
            );
        }
        Ok(report)
    }

    /// Context of the next attempt of `job`, with the delivery and its
    /// related records as they are stored now.
    async fn retry_context(&self, job: &RevocationJob, delivery: Delivery) -> Result<RevocationContext> {
        let order_id = job.order_id.unwrap_or(delivery.order_id);
        let order = self.store.get::<Order>(&order_id).await?;
        let offer = match job.offer_id.or(order.as_ref().map(|o| o.offer_id)) {
            Some(offer_id) => self.store.get::<Offer>(&offer_id).await?,
            None => None,
        };
        let consent = match job.consent_id {
            Some(consent_id) => self.store.get::<Consent>(&consent_id).await?,
            None => None,
        };
        let delivery = self.resolve_payload(delivery).await;
        Ok(RevocationContext::for_retry(job, delivery)
            .with_order(order)
            .with_offer(offer)
            .with_consent(consent))
    }

    async fn record_outcome(&self, kind: AuditKind, job: &RevocationJob) -> Result<()> {
        let details = match kind {
            AuditKind::RevocationRetry => retry_details(job),
            _ => AuditDetails::new()
                .with("delivery_id", job.delivery_id)
                .with("attempts", job.attempts)
                .with("last_error", &job.last_error),
        };
        self.audit
            .record(
                AuditEntry::new(kind, job.job_id)
                    .hash(&job.payload_hash)
                    .details(details),
            )
            .await?;
        Ok(())
    }
}

fn retry_details(job: &RevocationJob) -> AuditDetails {
    AuditDetails::new()
        .with("delivery_id", job.delivery_id)
        .with("attempts", job.attempts)
        .with("next_attempt_at", job.next_attempt_at)
        .with("last_error", &job.last_error)
}

impl std::fmt::Debug for RevocationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
