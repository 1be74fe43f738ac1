//! Revocation jobs: durable retry records for failed "stop serving this
//! delivery" calls.
//!
//! A job is created with `attempts = 1` (the failed inline attempt), retried
//! on a fixed delay, and either deleted on success or parked as `failed`
//! once `max_attempts` is reached. There is no persisted "succeeded" state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ConsentId, ContentHash, DeliveryId, JobId, OfferId, OrderId, Result, hash_canonical};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationJobStatus {
    /// Waiting for `next_attempt_at`.
    Pending,
    /// Out of attempts. Reported, never retried automatically.
    Failed,
}

impl std::fmt::Display for RevocationJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationJob {
    pub job_id: JobId,
    pub delivery_id: DeliveryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<OfferId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<ConsentId>,
    pub reason: String,
    /// Correlates the job with the revocation it retries.
    pub payload_hash: ContentHash,
    pub attempts: u32,
    pub status: RevocationJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a revocation job points at.
#[derive(Debug, Clone, Copy)]
pub struct RevocationTarget {
    pub delivery_id: DeliveryId,
    pub order_id: Option<OrderId>,
    pub offer_id: Option<OfferId>,
    pub consent_id: Option<ConsentId>,
}

impl RevocationJob {
    /// Job for a revocation whose first attempt just failed.
    pub fn after_failed_attempt(
        target: RevocationTarget,
        reason: &str,
        error: Option<String>,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let payload_hash = hash_canonical(&json!({
            "delivery_id": target.delivery_id,
            "order_id": target.order_id,
            "offer_id": target.offer_id,
            "consent_id": target.consent_id,
            "reason": reason,
        }))?;
        Ok(Self {
            job_id: JobId::new(),
            delivery_id: target.delivery_id,
            order_id: target.order_id,
            offer_id: target.offer_id,
            consent_id: target.consent_id,
            reason: reason.to_string(),
            payload_hash,
            attempts: 1,
            status: RevocationJobStatus::Pending,
            last_error: error,
            next_attempt_at: now + retry_delay,
            created_at: now,
            updated_at: now,
        })
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RevocationJobStatus::Pending && self.next_attempt_at <= now
    }

    /// Record another failed attempt. Returns `true` when the job just ran
    /// out of attempts and is now `failed`.
    pub fn record_failure(
        &mut self,
        error: String,
        max_attempts: u32,
        retry_delay: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error);
        self.updated_at = now;
        if self.attempts >= max_attempts {
            self.status = RevocationJobStatus::Failed;
            true
        } else {
            self.next_attempt_at = now + retry_delay;
            false
        }
    }

    /// Park the job as failed regardless of attempts (unfixable by retrying).
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = RevocationJobStatus::Failed;
        self.last_error = Some(error);
        self.updated_at = now;
    }
}
