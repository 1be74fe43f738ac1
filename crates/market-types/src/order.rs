//! Order model: a buyer's commitment to an offer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ActorId, ContentHash, MarketError, OfferId, OrderId, Result, hash_canonical};

/// Lifecycle status of an order. See [`crate::transition`] for the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[serde(rename = "order_created")]
    Created,
    #[serde(rename = "order_cancelled")]
    Cancelled,
    PaymentLocked,
    ConsentGranted,
    ConsentRevoked,
    DeliveryReady,
    DeliveryCompleted,
    SettlementCompleted,
    SettlementCancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "order_created",
            Self::Cancelled => "order_cancelled",
            Self::PaymentLocked => "payment_locked",
            Self::ConsentGranted => "consent_granted",
            Self::ConsentRevoked => "consent_revoked",
            Self::DeliveryReady => "delivery_ready",
            Self::DeliveryCompleted => "delivery_completed",
            Self::SettlementCompleted => "settlement_completed",
            Self::SettlementCancelled => "settlement_cancelled",
        };
        f.write_str(s)
    }
}

/// A buyer's order against exactly one published offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub offer_id: OfferId,
    pub buyer_id: ActorId,
    /// Always > 0.
    pub quantity: u64,
    /// Offer price captured at order time.
    pub price: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub order_hash: ContentHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Hash over the commercial terms of the order.
    pub fn compute_hash(&self) -> Result<ContentHash> {
        hash_canonical(&json!({
            "order_id": self.order_id,
            "offer_id": self.offer_id,
            "buyer_id": self.buyer_id,
            "quantity": self.quantity,
            "price": self.price,
            "currency": self.currency,
        }))
    }

    /// Amount owed: `price * quantity`. Overflow is an invalid order.
    pub fn total(&self) -> Result<Decimal> {
        self.price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| MarketError::InvalidArgument("order total overflows".into()))
    }

    #[must_use]
    pub fn anchor_id(&self) -> String {
        format!("order:{}", self.order_id)
    }
}

/// Dummy order for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    pub fn dummy(offer_id: OfferId, buyer: &str, status: OrderStatus) -> Self {
        let now = Utc::now();
        let mut order = Self {
            order_id: OrderId::new(),
            offer_id,
            buyer_id: ActorId::from(buyer),
            quantity: 1,
            price: Decimal::new(10, 0),
            currency: "USDC".to_string(),
            status,
            order_hash: crate::hash_str(""),
            payment_tx_hash: None,
            created_at: now,
            updated_at: now,
        };
        if let Ok(hash) = order.compute_hash() {
            order.order_hash = hash;
        }
        order
    }
}
