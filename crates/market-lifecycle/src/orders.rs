//! Order operations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use market_types::{
    ActorId, AuditDetails, AuditKind, MarketError, Offer, OfferId, OfferStatus, Order, OrderId,
    OrderStatus, Result, assert_transition, constants, hash_str,
};

use crate::audit::AuditEntry;
use crate::market::Market;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrder {
    pub offer_id: OfferId,
    pub buyer_id: ActorId,
    /// Defaults to 1.
    #[serde(default)]
    pub quantity: Option<u64>,
}

impl Market {
    /// Place an order against a published offer at the offer's current price.
    pub async fn create_order(&self, input: CreateOrder, actor: Option<&ActorId>) -> Result<Order> {
        let actor = self.require_actor(actor)?;
        if input.buyer_id.as_str().is_empty() {
            return Err(MarketError::MissingField("buyerId"));
        }
        self.check_actor(actor, &input.buyer_id, "buyerId")?;
        let quantity = input.quantity.unwrap_or(constants::DEFAULT_ORDER_QUANTITY);
        if quantity == 0 {
            return Err(MarketError::NonPositive("quantity"));
        }

        let offer: Offer = self.store.require(&input.offer_id).await?;
        if offer.status != OfferStatus::Published {
            return Err(MarketError::InvalidArgument(format!(
                "offer is not published (status {})",
                offer.status
            )));
        }
        if offer.price <= Decimal::ZERO {
            return Err(MarketError::NonPositive("price"));
        }

        let now = Self::now();
        let mut order = Order {
            order_id: OrderId::new(),
            offer_id: offer.offer_id,
            buyer_id: input.buyer_id,
            quantity,
            price: offer.price,
            currency: offer.currency.clone(),
            status: OrderStatus::Created,
            order_hash: hash_str(""),
            payment_tx_hash: None,
            created_at: now,
            updated_at: now,
        };
        order.order_hash = order.compute_hash()?;
        let total = order.total()?;
        self.store.save(&order).await?;
        info!(order_id = %order.order_id, offer_id = %offer.offer_id, quantity, "Order created");

        self.audit
            .record_anchored(
                &order.anchor_id(),
                AuditEntry::new(AuditKind::OrderCreated, order.order_id)
                    .hash(&order.order_hash)
                    .actor(actor.unwrap_or(&order.buyer_id))
                    .details(
                        AuditDetails::new()
                            .with("offer_id", offer.offer_id)
                            .with("quantity", quantity)
                            .with("total", total),
                    ),
            )
            .await?;
        Ok(order)
    }

    /// Cancel an order before payment is locked.
    pub async fn cancel_order(&self, order_id: OrderId, actor: Option<&ActorId>) -> Result<Order> {
        let actor = self.require_actor(actor)?;
        let _guard = self.lock_order(order_id).await;
        let mut order: Order = self.store.require(&order_id).await?;
        self.check_actor(actor, &order.buyer_id, "buyerId")?;
        assert_transition(order.status, OrderStatus::Cancelled)?;

        order.status = OrderStatus::Cancelled;
        order.updated_at = Self::now();
        self.store.save(&order).await?;
        info!(order_id = %order_id, "Order cancelled");

        self.audit
            .record(
                AuditEntry::new(AuditKind::OrderCancelled, order_id)
                    .hash(&order.order_hash)
                    .actor(actor.unwrap_or(&order.buyer_id)),
            )
            .await?;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store.require(&order_id).await
    }

    /// All orders, optionally only those placed against `offer_id`.
    pub async fn list_orders(&self, offer_id: Option<OfferId>) -> Result<Vec<Order>> {
        let orders: Vec<Order> = self.store.list().await?;
        Ok(orders
            .into_iter()
            .filter(|o| offer_id.is_none_or(|id| id == o.offer_id))
            .collect())
    }
}
