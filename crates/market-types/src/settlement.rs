//! Settlement model: the escrow lock / release / refund record of an order.
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  release   ┌──────────┐
//!   │ LOCKED ├───────────▶│ RELEASED │
//!   └───┬────┘            └──────────┘
//!       │ refund  ▲
//!       ▼         │ re-lock (same settlement id)
//!   ┌──────────┐  │
//!   │ REFUNDED ├──┘
//!   └──────────┘
//! ```
//!
//! At most one non-refunded settlement exists per order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ActorId, ContentHash, MarketError, OrderId, Result, SettlementId, hash_canonical};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStatus {
    #[serde(rename = "settlement_locked")]
    Locked,
    #[serde(rename = "settlement_released")]
    Released,
    #[serde(rename = "settlement_refunded")]
    Refunded,
}

impl std::fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "settlement_locked"),
            Self::Released => write!(f, "settlement_released"),
            Self::Refunded => write!(f, "settlement_refunded"),
        }
    }
}

/// One recipient of released funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    pub address: ActorId,
    pub amount: Decimal,
}

impl Payee {
    pub fn new(address: impl Into<ActorId>, amount: Decimal) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }

    /// Validate a payee list and return its total.
    pub fn total(payees: &[Self]) -> Result<Decimal> {
        if payees.is_empty() {
            return Err(MarketError::MissingField("payees"));
        }
        let mut sum = Decimal::ZERO;
        for payee in payees {
            if payee.address.as_str().is_empty() {
                return Err(MarketError::MissingField("payees[].address"));
            }
            if payee.amount <= Decimal::ZERO {
                return Err(MarketError::NonPositive("payees[].amount"));
            }
            sum = sum
                .checked_add(payee.amount)
                .ok_or_else(|| MarketError::InvalidArgument("payee total overflows".into()))?;
        }
        Ok(sum)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub settlement_id: SettlementId,
    pub order_id: OrderId,
    pub status: SettlementStatus,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payees: Vec<Payee>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_hash: Option<ContentHash>,
}

impl Settlement {
    /// A fresh lock record (or a re-lock reusing `settlement_id`).
    pub fn locked(
        settlement_id: SettlementId,
        order_id: OrderId,
        payer: ActorId,
        amount: Decimal,
        token_address: Option<String>,
        lock_tx_hash: Option<String>,
    ) -> Result<Self> {
        let mut settlement = Self {
            settlement_id,
            order_id,
            status: SettlementStatus::Locked,
            amount,
            payer: Some(payer),
            payees: Vec::new(),
            token_address,
            locked_at: Some(Utc::now()),
            released_at: None,
            refunded_at: None,
            refund_reason: None,
            lock_tx_hash,
            release_tx_hash: None,
            refund_tx_hash: None,
            settlement_hash: None,
        };
        settlement.settlement_hash = Some(settlement.compute_hash()?);
        Ok(settlement)
    }

    /// Hash of the current stage: what was locked, who was paid, or who was
    /// refunded.
    pub fn compute_hash(&self) -> Result<ContentHash> {
        match self.status {
            SettlementStatus::Locked => hash_canonical(&json!({
                "settlement_id": self.settlement_id,
                "order_id": self.order_id,
                "payer": self.payer,
                "amount": self.amount,
                "tx_hash": self.lock_tx_hash,
            })),
            SettlementStatus::Released => hash_canonical(&json!({
                "order_id": self.order_id,
                "payees": self.payees,
                "tx_hash": self.release_tx_hash,
            })),
            SettlementStatus::Refunded => hash_canonical(&json!({
                "order_id": self.order_id,
                "payer": self.payer,
                "tx_hash": self.refund_tx_hash,
                "reason": self.refund_reason,
            })),
        }
    }

    /// Counts toward the one-active-settlement-per-order invariant.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status != SettlementStatus::Refunded
    }

    #[must_use]
    pub fn anchor_id(&self) -> String {
        format!("settlement:{}", self.settlement_id)
    }
}
