//! Dispute operations: open, evidence, resolve, reject.
//!
//! Resolution settles the order: `refund` cancels it and refunds the
//! settlement, `release` / `partial` complete it and release the settlement
//! to the given payees. Order, settlement and dispute are written in one
//! transaction.

use serde::{Deserialize, Serialize};
use tracing::info;

use market_types::{
    ActorId, AuditDetails, AuditKind, Dispute, DisputeEvidence, DisputeFilter, DisputeId,
    DisputeResolution, DisputeStatus, EntityKind, MarketError, Offer, Order, OrderId, OrderStatus,
    Payee, Result, Settlement, SettlementStatus, assert_transition, hash_str,
};

use crate::audit::AuditEntry;
use crate::market::Market;

/// How a dispute is looked up. By order picks the open dispute, else the
/// latest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeRef {
    Id(DisputeId),
    Order(OrderId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDispute {
    pub order_id: OrderId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEvidence {
    pub summary: String,
    /// Content id of the evidence document, if stored elsewhere.
    #[serde(default)]
    pub cid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDispute {
    pub resolution: DisputeResolution,
    /// Required for `refund`.
    #[serde(default)]
    pub payer: Option<ActorId>,
    /// Required for `release` and `partial`.
    #[serde(default)]
    pub payees: Vec<Payee>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDispute {
    pub dispute: Dispute,
    pub settlement: Settlement,
}

impl Market {
    /// Open a dispute on an order. The actor must be its buyer or seller;
    /// the other party becomes the respondent.
    pub async fn open_dispute(&self, input: OpenDispute, actor: Option<&ActorId>) -> Result<Dispute> {
        let actor = self
            .require_actor(actor)?
            .ok_or(MarketError::MissingField("actorId"))?;
        let reason = input.reason.trim();
        if reason.is_empty() {
            return Err(MarketError::MissingField("reason"));
        }
        let _guard = self.lock_order(input.order_id).await;
        let order: Order = self.store.require(&input.order_id).await?;
        let offer: Offer = self.store.require(&order.offer_id).await?;
        let respondent = if *actor == order.buyer_id {
            offer.seller_id.clone()
        } else if *actor == offer.seller_id {
            order.buyer_id.clone()
        } else {
            return Err(MarketError::ActorMismatch("buyerId or sellerId"));
        };
        if let Some(existing) = self.store.dispute_by_order(order.order_id).await? {
            if existing.is_open() {
                return Err(MarketError::DisputeAlreadyOpen(order.order_id));
            }
        }

        let now = Self::now();
        let mut dispute = Dispute {
            dispute_id: DisputeId::new(),
            order_id: order.order_id,
            initiator_actor_id: actor.clone(),
            respondent_actor_id: respondent,
            reason: reason.to_string(),
            status: DisputeStatus::Opened,
            resolution: None,
            evidence: Vec::new(),
            dispute_hash: hash_str(""),
            opened_at: now,
            resolved_at: None,
            updated_at: now,
        };
        dispute.dispute_hash = dispute.compute_hash()?;
        self.store.save(&dispute).await?;
        info!(dispute_id = %dispute.dispute_id, order_id = %order.order_id, "Dispute opened");

        self.audit
            .record_anchored(
                &dispute.anchor_id(),
                AuditEntry::new(AuditKind::DisputeOpened, dispute.dispute_id)
                    .hash(&dispute.dispute_hash)
                    .actor(actor)
                    .details(
                        AuditDetails::new()
                            .with("order_id", order.order_id)
                            .with("reason", &dispute.reason)
                            .with("respondent_actor_id", &dispute.respondent_actor_id),
                    ),
            )
            .await?;
        Ok(dispute)
    }

    /// Attach evidence from either party. The first submission moves the
    /// dispute to `dispute_evidence_submitted`.
    pub async fn submit_evidence(
        &self,
        by: DisputeRef,
        input: SubmitEvidence,
        actor: Option<&ActorId>,
    ) -> Result<Dispute> {
        let actor = self
            .require_actor(actor)?
            .ok_or(MarketError::MissingField("actorId"))?;
        let found = self.find_dispute(by).await?;
        let _guard = self.lock_order(found.order_id).await;
        let mut dispute: Dispute = self.store.require(&found.dispute_id).await?;
        if !dispute.is_party(actor) {
            return Err(MarketError::ActorMismatch("dispute parties"));
        }
        ensure_open(&dispute)?;

        let cid = input.cid.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        let evidence = DisputeEvidence::new(dispute.dispute_id, actor.clone(), &input.summary, cid)?;
        if dispute.status == DisputeStatus::Opened {
            assert_transition(dispute.status, DisputeStatus::EvidenceSubmitted)?;
            dispute.status = DisputeStatus::EvidenceSubmitted;
        }
        dispute.updated_at = evidence.submitted_at;
        dispute.dispute_hash = dispute.compute_hash()?;
        let anchor_id = format!("{}:evidence:{}", dispute.anchor_id(), evidence.evidence_id);
        let entry = AuditEntry::new(AuditKind::DisputeEvidenceSubmitted, dispute.dispute_id)
            .hash(&evidence.hash)
            .actor(actor)
            .details(
                AuditDetails::new()
                    .with("evidence_id", evidence.evidence_id)
                    .with("summary", &evidence.summary)
                    .with("cid", &evidence.cid),
            );
        dispute.evidence.push(evidence);
        self.store.save(&dispute).await?;
        info!(dispute_id = %dispute.dispute_id, evidence = dispute.evidence.len(), "Dispute evidence submitted");

        self.audit.record_anchored(&anchor_id, entry).await?;
        Ok(dispute)
    }

    /// Settle the disputed order according to `resolution`.
    pub async fn resolve_dispute(
        &self,
        by: DisputeRef,
        input: ResolveDispute,
        actor: Option<&ActorId>,
    ) -> Result<ResolvedDispute> {
        let actor = self.require_actor(actor)?;
        let found = self.find_dispute(by).await?;
        let _guard = self.lock_order(found.order_id).await;
        let mut dispute: Dispute = self.store.require(&found.dispute_id).await?;
        ensure_open(&dispute)?;
        assert_transition(dispute.status, DisputeStatus::Resolved)?;
        let mut order: Order = self.store.require(&dispute.order_id).await?;
        let existing = self.store.settlement_by_order(order.order_id).await?;

        let settlement = match input.resolution {
            DisputeResolution::Refund => {
                let payer = input
                    .payer
                    .filter(|p| !p.as_str().is_empty())
                    .ok_or(MarketError::MissingField("payer"))?;
                assert_transition(order.status, OrderStatus::SettlementCancelled)?;
                if let Some(current) = existing.as_ref().filter(|s| s.is_active()) {
                    assert_transition(current.status, SettlementStatus::Refunded)?;
                }
                let tx_hash = self.escrow_refund(&order, &payer).await?;
                order.status = OrderStatus::SettlementCancelled;
                self.refunded_settlement(existing, &order, payer, Some(dispute.reason.clone()), tx_hash)?
            }
            DisputeResolution::Release | DisputeResolution::Partial => {
                Payee::total(&input.payees)?;
                assert_transition(order.status, OrderStatus::SettlementCompleted)?;
                if let Some(current) = existing.as_ref().filter(|s| s.is_active()) {
                    assert_transition(current.status, SettlementStatus::Released)?;
                }
                let tx_hash = self.escrow_release(&order, &input.payees).await?;
                order.status = OrderStatus::SettlementCompleted;
                self.released_settlement(existing, &order, input.payees, tx_hash)?
            }
        };

        let now = Self::now();
        order.updated_at = now;
        dispute.status = DisputeStatus::Resolved;
        dispute.resolution = Some(input.resolution);
        dispute.resolved_at = Some(now);
        dispute.updated_at = now;
        dispute.dispute_hash = dispute.compute_hash()?;
        self.store
            .run_in_transaction(|tx| {
                tx.put(&order)?;
                tx.put(&settlement)?;
                tx.put(&dispute)?;
                Ok(())
            })
            .await?;
        info!(
            dispute_id = %dispute.dispute_id,
            resolution = %input.resolution,
            order_status = %order.status,
            "Dispute resolved"
        );

        let tx_hash = match settlement.status {
            SettlementStatus::Refunded => &settlement.refund_tx_hash,
            _ => &settlement.release_tx_hash,
        };
        let mut entry = AuditEntry::new(AuditKind::DisputeResolved, dispute.dispute_id)
            .hash(&dispute.dispute_hash)
            .details(
                AuditDetails::new()
                    .with("resolution", input.resolution)
                    .with("settlement_id", settlement.settlement_id)
                    .with("tx_hash", tx_hash),
            );
        if let Some(actor) = actor {
            entry = entry.actor(actor);
        }
        self.audit
            .record_anchored(&dispute.anchor_id(), entry)
            .await?;
        Ok(ResolvedDispute {
            dispute,
            settlement,
        })
    }

    /// Close a dispute without touching the order or its settlement.
    pub async fn reject_dispute(
        &self,
        by: DisputeRef,
        reason: Option<String>,
        actor: Option<&ActorId>,
    ) -> Result<Dispute> {
        let actor = self.require_actor(actor)?;
        let found = self.find_dispute(by).await?;
        let _guard = self.lock_order(found.order_id).await;
        let mut dispute: Dispute = self.store.require(&found.dispute_id).await?;
        ensure_open(&dispute)?;
        assert_transition(dispute.status, DisputeStatus::Rejected)?;

        let now = Self::now();
        dispute.status = DisputeStatus::Rejected;
        dispute.resolved_at = Some(now);
        dispute.updated_at = now;
        dispute.dispute_hash = dispute.compute_hash()?;
        self.store.save(&dispute).await?;
        info!(dispute_id = %dispute.dispute_id, "Dispute rejected");

        let mut entry = AuditEntry::new(AuditKind::DisputeRejected, dispute.dispute_id)
            .hash(&dispute.dispute_hash)
            .details(AuditDetails::new().with("reason", reason.filter(|r| !r.trim().is_empty())));
        if let Some(actor) = actor {
            entry = entry.actor(actor);
        }
        self.audit
            .record_anchored(&dispute.anchor_id(), entry)
            .await?;
        Ok(dispute)
    }

    pub async fn get_dispute(&self, by: DisputeRef) -> Result<Dispute> {
        self.find_dispute(by).await
    }

    pub async fn list_disputes(&self, filter: &DisputeFilter) -> Result<Vec<Dispute>> {
        self.store.disputes(filter).await
    }

    async fn find_dispute(&self, by: DisputeRef) -> Result<Dispute> {
        match by {
            DisputeRef::Id(id) => self.store.require(&id).await,
            DisputeRef::Order(order_id) => self
                .store
                .dispute_by_order(order_id)
                .await?
                .ok_or_else(|| MarketError::not_found(EntityKind::Dispute, format!("order {order_id}"))),
        }
    }
}

fn ensure_open(dispute: &Dispute) -> Result<()> {
    if dispute.is_open() {
        return Ok(());
    }
    Err(MarketError::Closed {
        entity: EntityKind::Dispute,
        reason: format!("dispute already {}", dispute.status),
    })
}
