//! Settlement operations: lock payment, release, refund, status.
//!
//! An order has at most one non-refunded settlement. Locking again after a
//! refund reuses the refunded settlement's id.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use market_adapters::{TxHash, bounded};
use market_types::{
    ActorId, AuditDetails, AuditKind, ContentHash, EntityKind, MarketError, Offer, Order, OrderId,
    OrderStatus, Payee, Result, Settlement, SettlementId, SettlementStatus, assert_transition,
};

use crate::audit::AuditEntry;
use crate::market::Market;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockPayment {
    pub order_id: OrderId,
    pub payer: ActorId,
    /// Must equal the order total when given.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasePayment {
    pub order_id: OrderId,
    pub payees: Vec<Payee>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundPayment {
    pub order_id: OrderId,
    pub payer: ActorId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// How a settlement is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementRef {
    Id(SettlementId),
    Order(OrderId),
}

impl Market {
    /// Lock the order total in escrow: `order_created -> payment_locked`.
    pub async fn lock_payment(&self, input: LockPayment, actor: Option<&ActorId>) -> Result<Settlement> {
        let actor = self.require_actor(actor)?;
        if input.payer.as_str().is_empty() {
            return Err(MarketError::MissingField("payer"));
        }
        let _guard = self.lock_order(input.order_id).await;
        let mut order: Order = self.store.require(&input.order_id).await?;
        self.check_actor(actor, &input.payer, "payer")?;
        self.check_actor(actor, &order.buyer_id, "buyerId")?;

        let settlement_id = match self.store.settlement_by_order(order.order_id).await? {
            Some(existing) if existing.is_active() => {
                return Err(MarketError::SettlementExists(order.order_id));
            }
            Some(refunded) => {
                assert_transition(refunded.status, SettlementStatus::Locked)?;
                refunded.settlement_id
            }
            None => SettlementId::new(),
        };
        assert_transition(order.status, OrderStatus::PaymentLocked)?;

        let amount = order.total()?;
        if let Some(requested) = input.amount {
            if requested <= Decimal::ZERO {
                return Err(MarketError::NonPositive("amount"));
            }
            if requested != amount {
                return Err(MarketError::InvalidArgument(format!(
                    "amount {requested} does not match order total {amount}"
                )));
            }
        }

        let tx_hash = bounded(
            self.config.settlement.escrow_timeout(),
            "escrow.lock",
            self.escrow.lock(&order.order_hash, &input.payer, amount),
        )
        .await?;

        order.status = OrderStatus::PaymentLocked;
        order.payment_tx_hash.clone_from(&tx_hash);
        order.updated_at = Self::now();
        let settlement = Settlement::locked(
            settlement_id,
            order.order_id,
            input.payer.clone(),
            amount,
            self.config.settlement.token_address.clone(),
            tx_hash.clone(),
        )?;
        self.store
            .run_in_transaction(|tx| {
                tx.put(&order)?;
                tx.put(&settlement)?;
                Ok(())
            })
            .await?;
        info!(order_id = %order.order_id, settlement_id = %settlement_id, %amount, "Payment locked");

        self.audit
            .record(
                AuditEntry::new(AuditKind::PaymentLocked, order.order_id)
                    .hash(&order.order_hash)
                    .actor(actor.unwrap_or(&input.payer))
                    .details(
                        AuditDetails::new()
                            .with("amount", amount)
                            .with("settlement_id", settlement_id)
                            .with("tx_hash", &tx_hash),
                    ),
            )
            .await?;
        Ok(settlement)
    }

    /// Pay the seller side: `delivery_completed -> settlement_completed`.
    pub async fn release_payment(
        &self,
        input: ReleasePayment,
        actor: Option<&ActorId>,
    ) -> Result<Settlement> {
        let actor = self.require_actor(actor)?;
        Payee::total(&input.payees)?;
        let _guard = self.lock_order(input.order_id).await;
        let mut order: Order = self.store.require(&input.order_id).await?;
        let offer: Offer = self.store.require(&order.offer_id).await?;
        self.check_actor(actor, &offer.seller_id, "offer.sellerId")?;
        assert_transition(order.status, OrderStatus::SettlementCompleted)?;

        let existing = self.store.settlement_by_order(order.order_id).await?;
        if let Some(current) = existing.as_ref().filter(|s| s.is_active()) {
            assert_transition(current.status, SettlementStatus::Released)?;
        }
        let tx_hash = self.escrow_release(&order, &input.payees).await?;

        order.status = OrderStatus::SettlementCompleted;
        order.updated_at = Self::now();
        let settlement = self.released_settlement(existing, &order, input.payees, tx_hash)?;
        self.store
            .run_in_transaction(|tx| {
                tx.put(&order)?;
                tx.put(&settlement)?;
                Ok(())
            })
            .await?;
        info!(order_id = %order.order_id, amount = %settlement.amount, "Settlement released");

        self.audit
            .record_anchored(
                &settlement.anchor_id(),
                AuditEntry::new(AuditKind::SettlementReleased, settlement.settlement_id)
                    .hash(settlement_hash(&settlement)?)
                    .actor(actor.unwrap_or(&offer.seller_id))
                    .details(
                        AuditDetails::new()
                            .with("order_id", order.order_id)
                            .with("payees", &settlement.payees)
                            .with("tx_hash", &settlement.release_tx_hash),
                    ),
            )
            .await?;
        Ok(settlement)
    }

    /// Return the locked funds to the payer: `* -> settlement_cancelled`.
    pub async fn refund_payment(
        &self,
        input: RefundPayment,
        actor: Option<&ActorId>,
    ) -> Result<Settlement> {
        let actor = self.require_actor(actor)?;
        if input.payer.as_str().is_empty() {
            return Err(MarketError::MissingField("payer"));
        }
        let _guard = self.lock_order(input.order_id).await;
        let mut order: Order = self.store.require(&input.order_id).await?;
        self.check_actor(actor, &input.payer, "payer")?;
        self.check_actor(actor, &order.buyer_id, "buyerId")?;
        assert_transition(order.status, OrderStatus::SettlementCancelled)?;

        let existing = self.store.settlement_by_order(order.order_id).await?;
        if let Some(current) = existing.as_ref().filter(|s| s.is_active()) {
            assert_transition(current.status, SettlementStatus::Refunded)?;
        }
        let tx_hash = self.escrow_refund(&order, &input.payer).await?;

        order.status = OrderStatus::SettlementCancelled;
        order.updated_at = Self::now();
        let reason = input.reason.filter(|r| !r.trim().is_empty());
        let settlement =
            self.refunded_settlement(existing, &order, input.payer.clone(), reason.clone(), tx_hash)?;
        self.store
            .run_in_transaction(|tx| {
                tx.put(&order)?;
                tx.put(&settlement)?;
                Ok(())
            })
            .await?;
        info!(order_id = %order.order_id, "Settlement refunded");

        self.audit
            .record_anchored(
                &settlement.anchor_id(),
                AuditEntry::new(AuditKind::SettlementRefunded, settlement.settlement_id)
                    .hash(settlement_hash(&settlement)?)
                    .actor(actor.unwrap_or(&input.payer))
                    .details(
                        AuditDetails::new()
                            .with("order_id", order.order_id)
                            .with("payer", &input.payer)
                            .with("tx_hash", &settlement.refund_tx_hash)
                            .with("reason", &reason),
                    ),
            )
            .await?;
        Ok(settlement)
    }

    /// Settlement by id or by order. With actor matching on, only the
    /// order's buyer or seller may look.
    pub async fn settlement_status(
        &self,
        by: SettlementRef,
        actor: Option<&ActorId>,
    ) -> Result<Settlement> {
        let actor = self.require_actor(actor)?;
        let settlement = match by {
            SettlementRef::Id(id) => self.store.get::<Settlement>(&id).await?,
            SettlementRef::Order(order_id) => self.store.settlement_by_order(order_id).await?,
        };
        let settlement = settlement.ok_or_else(|| match by {
            SettlementRef::Id(id) => MarketError::not_found(EntityKind::Settlement, id),
            SettlementRef::Order(order_id) => {
                MarketError::not_found(EntityKind::Settlement, format!("order {order_id}"))
            }
        })?;

        if actor.is_some() && self.config.access.require_actor_match {
            let order: Order = self.store.require(&settlement.order_id).await?;
            let offer: Offer = self.store.require(&order.offer_id).await?;
            self.check_any_actor(actor, &[&order.buyer_id, &offer.seller_id], "buyerId or sellerId")?;
        }
        Ok(settlement)
    }

    // -----------------------------------------------------------------
    // Shared with dispute resolution
    // -----------------------------------------------------------------

    pub(crate) async fn escrow_release(&self, order: &Order, payees: &[Payee]) -> Result<Option<TxHash>> {
        bounded(
            self.config.settlement.escrow_timeout(),
            "escrow.release",
            self.escrow.release(&order.order_hash, payees),
        )
        .await
    }

    pub(crate) async fn escrow_refund(&self, order: &Order, payer: &ActorId) -> Result<Option<TxHash>> {
        bounded(
            self.config.settlement.escrow_timeout(),
            "escrow.refund",
            self.escrow.refund(&order.order_hash, payer),
        )
        .await
    }

    /// The active settlement of `order` moved to released, or a new one.
    pub(crate) fn released_settlement(
        &self,
        existing: Option<Settlement>,
        order: &Order,
        payees: Vec<Payee>,
        tx_hash: Option<TxHash>,
    ) -> Result<Settlement> {
        let mut settlement = self.settlement_base(existing, order);
        settlement.amount = Payee::total(&payees)?;
        settlement.status = SettlementStatus::Released;
        settlement.payees = payees;
        settlement.released_at = Some(Self::now());
        settlement.release_tx_hash = tx_hash;
        settlement.settlement_hash = Some(settlement.compute_hash()?);
        Ok(settlement)
    }

    /// The active settlement of `order` moved to refunded, or a new one.
    pub(crate) fn refunded_settlement(
        &self,
        existing: Option<Settlement>,
        order: &Order,
        payer: ActorId,
        reason: Option<String>,
        tx_hash: Option<TxHash>,
    ) -> Result<Settlement> {
        let mut settlement = self.settlement_base(existing, order);
        settlement.status = SettlementStatus::Refunded;
        settlement.payer = Some(payer);
        settlement.refunded_at = Some(Self::now());
        settlement.refund_reason = reason;
        settlement.refund_tx_hash = tx_hash;
        settlement.settlement_hash = Some(settlement.compute_hash()?);
        Ok(settlement)
    }

    /// Keeps an active settlement's id, lock data and amount. Anything else
    /// starts a fresh settlement with a zero amount.
    fn settlement_base(&self, existing: Option<Settlement>, order: &Order) -> Settlement {
        match existing.filter(Settlement::is_active) {
            Some(active) => active,
            None => Settlement {
                settlement_id: SettlementId::new(),
                order_id: order.order_id,
                status: SettlementStatus::Locked,
                amount: Decimal::ZERO,
                payer: None,
                payees: Vec::new(),
                token_address: self.config.settlement.token_address.clone(),
                locked_at: None,
                released_at: None,
                refunded_at: None,
                refund_reason: None,
                lock_tx_hash: None,
                release_tx_hash: None,
                refund_tx_hash: None,
                settlement_hash: None,
            },
        }
    }
}

pub(crate) fn settlement_hash(settlement: &Settlement) -> Result<&ContentHash> {
    settlement
        .settlement_hash
        .as_ref()
        .ok_or_else(|| MarketError::Storage(format!("settlement {} has no hash", settlement.settlement_id)))
}
