//! Revocation notifier contract: tells a provider to stop serving a delivery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use market_types::{Consent, Delivery, Offer, Order, Result, RevocationJob, RevocationTarget};

/// What is being revoked and why.
///
/// `delivery` carries its access material with the payload resolved, also
/// when the record keeps it in a payload store, so the provider can tell
/// which credential to stop serving. The related records are attached when
/// they still exist.
#[derive(Debug, Clone)]
pub struct RevocationContext {
    pub target: RevocationTarget,
    pub reason: String,
    /// 1 for the inline attempt, incremented by each retry.
    pub attempt: u32,
    pub delivery: Delivery,
    pub order: Option<Order>,
    pub offer: Option<Offer>,
    pub consent: Option<Consent>,
}

impl RevocationContext {
    /// First attempt at revoking `delivery`.
    pub fn new(delivery: Delivery, reason: impl Into<String>) -> Self {
        Self {
            target: RevocationTarget {
                delivery_id: delivery.delivery_id,
                order_id: Some(delivery.order_id),
                offer_id: None,
                consent_id: None,
            },
            reason: reason.into(),
            attempt: 1,
            delivery,
            order: None,
            offer: None,
            consent: None,
        }
    }

    /// Context of the next retry of `job`.
    #[must_use]
    pub fn for_retry(job: &RevocationJob, delivery: Delivery) -> Self {
        Self {
            target: RevocationTarget {
                delivery_id: job.delivery_id,
                order_id: job.order_id,
                offer_id: job.offer_id,
                consent_id: job.consent_id,
            },
            reason: job.reason.clone(),
            attempt: job.attempts.saturating_add(1),
            delivery,
            order: None,
            offer: None,
            consent: None,
        }
    }

    #[must_use]
    pub fn with_order(mut self, order: Option<Order>) -> Self {
        if let Some(order) = &order {
            self.target.order_id = Some(order.order_id);
            self.target.offer_id = Some(order.offer_id);
        }
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_offer(mut self, offer: Option<Offer>) -> Self {
        if let Some(offer) = &offer {
            self.target.offer_id = Some(offer.offer_id);
        }
        self.offer = offer;
        self
    }

    #[must_use]
    pub fn with_consent(mut self, consent: Option<Consent>) -> Self {
        if let Some(consent) = &consent {
            self.target.consent_id = Some(consent.consent_id);
        }
        self.consent = consent;
        self
    }
}

/// Result of one notifier call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RevocationOutcome {
    #[must_use]
    pub fn success() -> Self {
        Self {
            ok: true,
            status: None,
            error: None,
        }
    }

    pub fn failure(status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            error: Some(error.into()),
        }
    }

    /// Error text for a failed outcome.
    #[must_use]
    pub fn error_message(&self) -> String {
        match (&self.error, self.status) {
            (Some(error), _) => error.clone(),
            (None, Some(status)) => format!("HTTP {status}"),
            (None, None) => "revocation failed".to_string(),
        }
    }
}

/// Side-effecting revoke call. A non-`ok` outcome or an `Err` both count
/// as a failed attempt and go to the revocation queue.
#[async_trait]
pub trait RevocationNotifier: Send + Sync {
    async fn execute_revocation(&self, context: &RevocationContext) -> Result<RevocationOutcome>;
}

/// Notifier for deployments with nothing to notify. Always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl RevocationNotifier for NoopNotifier {
    async fn execute_revocation(&self, _context: &RevocationContext) -> Result<RevocationOutcome> {
        Ok(RevocationOutcome::success())
    }
}
