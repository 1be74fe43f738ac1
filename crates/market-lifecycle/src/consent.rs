//! Consent operations: grant and the cascading revoke.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use market_types::{
    ActorId, AuditDetails, AuditKind, Consent, ConsentId, ConsentScope, ConsentStatus, Delivery,
    Lifecycle, MarketError, Offer, Order, OrderId, OrderStatus, Result, assert_transition,
    constants, hash_str,
};

use crate::audit::AuditEntry;
use crate::delivery::{DeliveryFailure, DeliveryRevocation, RevokeScope};
use crate::market::Market;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantConsent {
    pub order_id: OrderId,
    pub scope: ConsentScope,
    /// Buyer's signature over [`Consent::signing_message`].
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeConsent {
    pub consent_id: ConsentId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A revoked consent and what happened to each delivery it covered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRevocation {
    pub consent: Consent,
    pub deliveries: Vec<DeliveryRevocation>,
    /// Deliveries left open because their revocation could not be stored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<DeliveryFailure>,
}

impl Market {
    /// Record the buyer's signed consent: `payment_locked -> consent_granted`.
    pub async fn grant_consent(&self, input: GrantConsent, actor: Option<&ActorId>) -> Result<Consent> {
        let actor = self.require_actor(actor)?;
        let signature = input.signature.trim();
        if signature.is_empty() {
            return Err(MarketError::MissingField("signature"));
        }
        let _guard = self.lock_order(input.order_id).await;
        let mut order: Order = self.store.require(&input.order_id).await?;
        self.check_actor(actor, &order.buyer_id, "buyerId")?;
        assert_transition(order.status, OrderStatus::ConsentGranted)?;
        let offer: Offer = self.store.require(&order.offer_id).await?;
        input.scope.ensure_within(&offer.usage_scope)?;

        let message =
            Consent::signing_message(order.order_id, offer.offer_id, &order.buyer_id, &input.scope)?;
        self.verifier.verify(&order.buyer_id, &message, signature)?;

        let now = Self::now();
        let mut consent = Consent {
            consent_id: ConsentId::new(),
            order_id: order.order_id,
            offer_id: offer.offer_id,
            buyer_id: order.buyer_id.clone(),
            scope: input.scope,
            signature: signature.to_string(),
            status: ConsentStatus::Granted,
            consent_hash: hash_str(""),
            granted_at: now,
            revoked_at: None,
            revoke_reason: None,
            revoke_hash: None,
        };
        consent.consent_hash = consent.compute_hash()?;
        order.status = OrderStatus::ConsentGranted;
        order.updated_at = now;
        self.store
            .run_in_transaction(|tx| {
                tx.put(&consent)?;
                tx.put(&order)?;
                Ok(())
            })
            .await?;
        info!(consent_id = %consent.consent_id, order_id = %order.order_id, "Consent granted");

        self.audit
            .record_anchored(
                &consent.anchor_id(),
                AuditEntry::new(AuditKind::ConsentGranted, consent.consent_id)
                    .hash(&consent.consent_hash)
                    .actor(actor.unwrap_or(&consent.buyer_id))
                    .details(
                        AuditDetails::new()
                            .with("order_id", order.order_id)
                            .with("scope", &consent.scope),
                    ),
            )
            .await?;
        Ok(consent)
    }

    /// Revoke a consent and every open delivery of its order.
    ///
    /// Each delivery is revoked and reported on its own: a failed provider
    /// call queues a retry job for that delivery, and a delivery whose
    /// revocation cannot be stored is listed in `failures` and stays open
    /// for a later [`Market::revoke_delivery`]. Neither fails the revoke.
    /// The order moves to `consent_revoked` when its status allows.
    pub async fn revoke_consent(
        &self,
        input: RevokeConsent,
        actor: Option<&ActorId>,
    ) -> Result<ConsentRevocation> {
        let actor = self.require_actor(actor)?;
        let order_id = self.store.require::<Consent>(&input.consent_id).await?.order_id;
        let _guard = self.lock_order(order_id).await;
        let mut consent: Consent = self.store.require(&input.consent_id).await?;
        assert_transition(consent.status, ConsentStatus::Revoked)?;
        let mut order = self.store.get::<Order>(&order_id).await?;
        if let Some(order) = &order {
            self.check_actor(actor, &order.buyer_id, "buyerId")?;
        }

        let now = Self::now();
        let reason = input.reason.filter(|r| !r.trim().is_empty());
        consent.status = ConsentStatus::Revoked;
        consent.revoked_at = Some(now);
        consent.revoke_reason.clone_from(&reason);
        let revoke_hash = consent.compute_revoke_hash()?;
        consent.revoke_hash = Some(revoke_hash.clone());

        let order_moves = order
            .as_ref()
            .is_some_and(|o| o.status.can_transition_to(OrderStatus::ConsentRevoked));
        if let Some(order) = order.as_mut().filter(|_| order_moves) {
            order.status = OrderStatus::ConsentRevoked;
            order.updated_at = now;
        }
        self.store
            .run_in_transaction(|tx| {
                tx.put(&consent)?;
                if let Some(order) = order.as_ref().filter(|_| order_moves) {
                    tx.put(order)?;
                }
                Ok(())
            })
            .await?;

        let delivery_reason = reason
            .clone()
            .unwrap_or_else(|| constants::CONSENT_REVOKED_REASON.to_string());
        let open: Vec<Delivery> = self
            .store
            .deliveries_for_order(order_id)
            .await?
            .into_iter()
            .filter(Delivery::is_open)
            .collect();
        let offer = match &order {
            Some(order) => self.store.get::<Offer>(&order.offer_id).await?,
            None => None,
        };
        let scope = RevokeScope {
            order: order.as_ref(),
            offer: offer.as_ref(),
            consent: Some(&consent),
            reason: &delivery_reason,
            actor,
            now,
        };
        let mut deliveries = Vec::with_capacity(open.len());
        let mut failures = Vec::new();
        for delivery in open {
            let delivery_id = delivery.delivery_id;
            match self.revoke_open_delivery(delivery, &scope).await {
                Ok(revoked) => deliveries.push(revoked),
                Err(err) => {
                    warn!(delivery_id = %delivery_id, error = %err, "Delivery revocation not stored");
                    failures.push(DeliveryFailure {
                        delivery_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        let queued = deliveries.iter().filter(|d| d.job_id.is_some()).count();
        info!(
            consent_id = %consent.consent_id,
            deliveries = deliveries.len(),
            failed = failures.len(),
            queued,
            "Consent revoked"
        );

        let mut entry = AuditEntry::new(AuditKind::ConsentRevoked, consent.consent_id)
            .hash(&revoke_hash)
            .details(
                AuditDetails::new()
                    .with("reason", &reason)
                    .with("deliveries_revoked", deliveries.len())
                    .with("deliveries_failed", failures.len())
                    .with("revocations_queued", queued),
            );
        if let Some(actor) = actor.or(order.as_ref().map(|o| &o.buyer_id)) {
            entry = entry.actor(actor);
        }
        self.audit
            .record_anchored(&consent.revoke_anchor_id(), entry)
            .await?;

        Ok(ConsentRevocation {
            consent,
            deliveries,
            failures,
        })
    }

    pub async fn get_consent(&self, consent_id: ConsentId) -> Result<Consent> {
        self.store.require(&consent_id).await
    }
}
