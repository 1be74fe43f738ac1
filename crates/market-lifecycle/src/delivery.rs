//! Delivery operations: issue, complete, revoke, payload lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use market_adapters::{RevocationContext, RevocationOutcome};
use market_types::{
    ActorId, AuditDetails, AuditKind, Consent, ContentHash, CredentialsMode, Delivery, DeliveryId,
    DeliveryPayload, DeliveryStatus, EntityKind, JobId, MarketError, Offer, Order, OrderId,
    OrderStatus, Result, assert_transition, constants, hash_str,
};

use crate::audit::AuditEntry;
use crate::market::Market;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDelivery {
    pub order_id: OrderId,
    pub payload: DeliveryPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeDelivery {
    pub delivery_id: DeliveryId,
    /// Defaults to `manual_revoke`.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Outcome of revoking one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRevocation {
    pub delivery_id: DeliveryId,
    pub revoke_hash: ContentHash,
    /// Whether the provider confirmed the revocation inline.
    pub revoke_ok: bool,
    /// Retry job queued when the inline call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

/// A delivery a cascade could not revoke. It stays open and can be revoked
/// again on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub delivery_id: DeliveryId,
    pub error: String,
}

/// Records shared by the revocations of one revoke call.
pub(crate) struct RevokeScope<'a> {
    pub order: Option<&'a Order>,
    pub offer: Option<&'a Offer>,
    pub consent: Option<&'a Consent>,
    pub reason: &'a str,
    pub actor: Option<&'a ActorId>,
    pub now: DateTime<Utc>,
}

impl Market {
    /// Issue access for a consented order: `consent_granted -> delivery_ready`.
    ///
    /// Further deliveries may be issued while the order is `delivery_ready`.
    /// With external credentials the payload goes to the payload store and
    /// only its reference is kept on the delivery.
    pub async fn issue_delivery(&self, input: IssueDelivery, actor: Option<&ActorId>) -> Result<Delivery> {
        let actor = self.require_actor(actor)?;
        let _guard = self.lock_order(input.order_id).await;
        let mut order: Order = self.store.require(&input.order_id).await?;
        let offer: Offer = self.store.require(&order.offer_id).await?;
        self.check_actor(actor, &offer.seller_id, "offer.sellerId")?;
        if order.status != OrderStatus::DeliveryReady {
            assert_transition(order.status, OrderStatus::DeliveryReady)?;
        }
        input.payload.validate_for(offer.delivery_type)?;

        let now = Self::now();
        let mut delivery = Delivery {
            delivery_id: DeliveryId::new(),
            order_id: order.order_id,
            delivery_type: offer.delivery_type,
            status: DeliveryStatus::Ready,
            delivery_hash: hash_str(""),
            payload_digest: input.payload.digest()?,
            issued_at: now,
            completed_at: None,
            revoked_at: None,
            revoke_reason: None,
            revoke_hash: None,
            payload: None,
            payload_ref: None,
        };
        delivery.delivery_hash = delivery.compute_hash()?;

        match self.config.credentials.mode {
            CredentialsMode::Inline => delivery.payload = Some(input.payload),
            CredentialsMode::External => {
                let payloads = self.payloads.as_ref().ok_or_else(|| {
                    MarketError::Unavailable(
                        "credentials.mode is external but no payload store is configured".into(),
                    )
                })?;
                let reference = payloads
                    .put_delivery_payload(delivery.delivery_id, &input.payload)
                    .await?;
                delivery.payload_ref = Some(reference);
            }
        }

        order.status = OrderStatus::DeliveryReady;
        order.updated_at = now;
        let committed = self
            .store
            .run_in_transaction(|tx| {
                tx.put(&delivery)?;
                tx.put(&order)?;
                Ok(())
            })
            .await;
        if let Err(err) = committed {
            self.discard_payload(&delivery).await;
            return Err(err);
        }
        info!(delivery_id = %delivery.delivery_id, order_id = %order.order_id, "Delivery issued");

        self.audit
            .record_anchored(
                &delivery.anchor_id(),
                AuditEntry::new(AuditKind::DeliveryIssued, delivery.delivery_id)
                    .hash(&delivery.delivery_hash)
                    .actor(actor.unwrap_or(&offer.seller_id))
                    .details(
                        AuditDetails::new()
                            .with("order_id", order.order_id)
                            .with("delivery_type", delivery.delivery_type)
                            .with("payload_ref", delivery.payload_ref.as_ref().map(|r| &r.reference)),
                    ),
            )
            .await?;
        Ok(delivery)
    }

    /// Seller confirms the delivery: delivery and order move to
    /// `delivery_completed` together.
    pub async fn complete_delivery(
        &self,
        delivery_id: DeliveryId,
        actor: Option<&ActorId>,
    ) -> Result<Delivery> {
        let actor = self.require_actor(actor)?;
        let order_id = self.store.require::<Delivery>(&delivery_id).await?.order_id;
        let _guard = self.lock_order(order_id).await;
        let mut delivery: Delivery = self.store.require(&delivery_id).await?;
        let mut order: Order = self.store.require(&order_id).await?;
        let offer: Offer = self.store.require(&order.offer_id).await?;
        self.check_actor(actor, &offer.seller_id, "offer.sellerId")?;
        assert_transition(delivery.status, DeliveryStatus::Completed)?;
        if order.status != OrderStatus::DeliveryCompleted {
            assert_transition(order.status, OrderStatus::DeliveryCompleted)?;
        }

        let now = Self::now();
        delivery.status = DeliveryStatus::Completed;
        delivery.completed_at = Some(now);
        order.status = OrderStatus::DeliveryCompleted;
        order.updated_at = now;
        self.store
            .run_in_transaction(|tx| {
                tx.put(&delivery)?;
                tx.put(&order)?;
                Ok(())
            })
            .await?;
        info!(delivery_id = %delivery_id, order_id = %order_id, "Delivery completed");

        self.audit
            .record(
                AuditEntry::new(AuditKind::DeliveryCompleted, delivery_id)
                    .hash(&delivery.delivery_hash)
                    .actor(actor.unwrap_or(&offer.seller_id))
                    .details(AuditDetails::new().with("order_id", order_id)),
            )
            .await?;
        Ok(delivery)
    }

    /// Revoke one delivery directly. Same notifier / queue / audit path as
    /// the consent cascade.
    pub async fn revoke_delivery(
        &self,
        input: RevokeDelivery,
        actor: Option<&ActorId>,
    ) -> Result<DeliveryRevocation> {
        let actor = self.require_actor(actor)?;
        let order_id = self.store.require::<Delivery>(&input.delivery_id).await?.order_id;
        let _guard = self.lock_order(order_id).await;
        let delivery: Delivery = self.store.require(&input.delivery_id).await?;
        assert_transition(delivery.status, DeliveryStatus::Revoked)?;

        let order = self.store.get::<Order>(&order_id).await?;
        let offer = match &order {
            Some(order) => self.store.get::<Offer>(&order.offer_id).await?,
            None => None,
        };
        if let Some(offer) = &offer {
            self.check_actor(actor, &offer.seller_id, "offer.sellerId")?;
        }
        let consent = self.store.list_by_order::<Consent>(order_id).await?.pop();

        let reason = input
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| constants::MANUAL_REVOKE_REASON.to_string());
        let scope = RevokeScope {
            order: order.as_ref(),
            offer: offer.as_ref(),
            consent: consent.as_ref(),
            reason: &reason,
            actor,
            now: Self::now(),
        };
        self.revoke_open_delivery(delivery, &scope).await
    }

    /// The delivery's access material, inline or from the payload store.
    /// Revoked deliveries no longer hand out their payload.
    pub async fn delivery_payload(
        &self,
        delivery_id: DeliveryId,
        actor: Option<&ActorId>,
    ) -> Result<DeliveryPayload> {
        let actor = self.require_actor(actor)?;
        let delivery: Delivery = self.store.require(&delivery_id).await?;
        let order: Order = self.store.require(&delivery.order_id).await?;
        let offer: Offer = self.store.require(&order.offer_id).await?;
        self.check_any_actor(actor, &[&order.buyer_id, &offer.seller_id], "buyerId or sellerId")?;
        if delivery.status == DeliveryStatus::Revoked {
            return Err(MarketError::Closed {
                entity: EntityKind::Delivery,
                reason: "delivery is revoked".into(),
            });
        }

        if let Some(payload) = delivery.payload {
            return Ok(payload);
        }
        let reference = delivery
            .payload_ref
            .ok_or_else(|| MarketError::Storage(format!("delivery {delivery_id} has no payload")))?;
        let payloads = self
            .payloads
            .as_ref()
            .ok_or_else(|| MarketError::Unavailable("no payload store is configured".into()))?;
        payloads.get_delivery_payload(&reference).await
    }

    pub async fn get_delivery(&self, delivery_id: DeliveryId) -> Result<Delivery> {
        self.store.require(&delivery_id).await
    }

    pub async fn deliveries_for_order(&self, order_id: OrderId) -> Result<Vec<Delivery>> {
        self.store.deliveries_for_order(order_id).await
    }

    /// Revoke `delivery`: tell the provider, then commit the revoked
    /// delivery together with a retry job when the call failed, then audit.
    /// Nothing is written if the commit fails. Caller holds the order lock
    /// and has checked the transition.
    pub(crate) async fn revoke_open_delivery(
        &self,
        mut delivery: Delivery,
        scope: &RevokeScope<'_>,
    ) -> Result<DeliveryRevocation> {
        delivery.status = DeliveryStatus::Revoked;
        delivery.revoked_at = Some(scope.now);
        delivery.revoke_reason = Some(scope.reason.to_string());
        let revoke_hash = delivery.compute_revoke_hash()?;
        delivery.revoke_hash = Some(revoke_hash.clone());

        let resolved = self.revocations.resolve_payload(delivery.clone()).await;
        let context = RevocationContext::new(resolved, scope.reason)
            .with_order(scope.order.cloned())
            .with_offer(scope.offer.cloned())
            .with_consent(scope.consent.cloned());
        let outcome = self.revocations.attempt(&context).await;
        let job = if outcome.ok {
            None
        } else {
            warn!(delivery_id = %delivery.delivery_id, error = %outcome.error_message(), "Revocation call failed");
            Some(self.revocations.prepare_job(
                context.target,
                scope.reason,
                Some(outcome.error_message()),
                scope.now,
            )?)
        };

        self.store
            .run_in_transaction(|tx| {
                tx.put(&delivery)?;
                if let Some(job) = &job {
                    tx.put(job)?;
                }
                Ok(())
            })
            .await?;
        info!(delivery_id = %delivery.delivery_id, revoke_ok = outcome.ok, "Delivery revoked");
        if let Some(job) = &job {
            self.revocations.record_queued(job).await?;
        }

        let mut entry = AuditEntry::new(AuditKind::DeliveryRevoked, delivery.delivery_id)
            .hash(&revoke_hash)
            .details(revocation_details(&delivery, scope.reason, &outcome));
        if let Some(actor) = scope.actor.or(scope.order.map(|o| &o.buyer_id)) {
            entry = entry.actor(actor);
        }
        self.audit
            .record_anchored(&delivery.revoke_anchor_id(), entry)
            .await?;

        Ok(DeliveryRevocation {
            delivery_id: delivery.delivery_id,
            revoke_hash,
            revoke_ok: outcome.ok,
            job_id: job.map(|j| j.job_id),
        })
    }

    /// Best-effort removal of an external payload whose delivery was never
    /// committed.
    async fn discard_payload(&self, delivery: &Delivery) {
        let (Some(reference), Some(payloads)) = (&delivery.payload_ref, &self.payloads) else {
            return;
        };
        if let Err(err) = payloads.delete_delivery_payload(reference).await {
            warn!(delivery_id = %delivery.delivery_id, error = %err, "Orphaned delivery payload");
        }
    }
}

fn revocation_details(delivery: &Delivery, reason: &str, outcome: &RevocationOutcome) -> AuditDetails {
    AuditDetails::new()
        .with("delivery_hash", &delivery.delivery_hash)
        .with("revoke_reason", reason)
        .with("revoke_ok", outcome.ok)
        .with("revoke_status", outcome.status)
        .with("revoke_error", &outcome.error)
}
