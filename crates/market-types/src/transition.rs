//! # Transition Guard
//!
//! Per-entity finite state machines. Pure validation, no I/O.
//!
//! ```text
//!  Offer       created ──▶ published ──▶ closed
//!                 └────────────────────▶ closed
//!
//!  Order       created ──▶ payment_locked ──▶ consent_granted ──▶ delivery_ready ──▶ delivery_completed
//!                 │              │                  │                  │                 │
//!                 ▼              ▼                  ▼                  ▼                 ├──▶ settlement_completed
//!             cancelled   settlement_cancelled  consent_revoked ◀──────┘                 └──▶ settlement_cancelled
//!                                                   │
//!                                                   └──▶ settlement_cancelled
//!
//!  Consent     granted ──▶ revoked
//!  Delivery    ready ──▶ completed | revoked
//!  Settlement  locked ──▶ released | refunded ; refunded ──▶ locked (re-lock after refund)
//!  Dispute     opened ──▶ evidence_submitted ──▶ resolved | rejected
//!                 └───────────────────────────▶ resolved | rejected
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    ConsentStatus, DeliveryStatus, DisputeStatus, MarketError, OfferStatus, OrderStatus, Result,
    SettlementStatus,
};

/// Entity families known to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Offer,
    Order,
    Consent,
    Delivery,
    Settlement,
    Dispute,
    RevocationJob,
    AuditEvent,
    UsageEntry,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offer => "offer",
            Self::Order => "order",
            Self::Consent => "consent",
            Self::Delivery => "delivery",
            Self::Settlement => "settlement",
            Self::Dispute => "dispute",
            Self::RevocationJob => "revocation job",
            Self::AuditEvent => "audit event",
            Self::UsageEntry => "usage entry",
        };
        f.write_str(s)
    }
}

/// A status enum governed by a transition table.
pub trait Lifecycle: Copy + Eq + fmt::Display + 'static {
    /// Entity family the status belongs to.
    const ENTITY: EntityKind;

    /// Every status of this entity, initial status first.
    fn all() -> &'static [Self];

    /// Allowed successor set of `self`.
    fn successors(self) -> &'static [Self];

    #[must_use]
    fn can_transition_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }

    #[must_use]
    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

/// Reject `current -> next` unless `next` is an allowed successor.
pub fn assert_transition<S: Lifecycle>(current: S, next: S) -> Result<()> {
    if current.can_transition_to(next) {
        return Ok(());
    }
    Err(MarketError::InvalidTransition {
        entity: S::ENTITY,
        from: current.to_string(),
        to: next.to_string(),
    })
}

impl Lifecycle for OfferStatus {
    const ENTITY: EntityKind = EntityKind::Offer;

    fn all() -> &'static [Self] {
        &[Self::Created, Self::Published, Self::Closed]
    }

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Published, Self::Closed],
            Self::Published => &[Self::Closed],
            Self::Closed => &[],
        }
    }
}

impl Lifecycle for OrderStatus {
    const ENTITY: EntityKind = EntityKind::Order;

    fn all() -> &'static [Self] {
        &[
            Self::Created,
            Self::Cancelled,
            Self::PaymentLocked,
            Self::ConsentGranted,
            Self::ConsentRevoked,
            Self::DeliveryReady,
            Self::DeliveryCompleted,
            Self::SettlementCompleted,
            Self::SettlementCancelled,
        ]
    }

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::PaymentLocked, Self::Cancelled],
            Self::PaymentLocked => &[Self::ConsentGranted, Self::SettlementCancelled],
            Self::ConsentGranted => &[Self::DeliveryReady, Self::ConsentRevoked],
            Self::DeliveryReady => &[Self::DeliveryCompleted, Self::ConsentRevoked],
            Self::DeliveryCompleted => &[Self::SettlementCompleted, Self::SettlementCancelled],
            Self::ConsentRevoked => &[Self::SettlementCancelled],
            Self::Cancelled | Self::SettlementCompleted | Self::SettlementCancelled => &[],
        }
    }
}

impl Lifecycle for ConsentStatus {
    const ENTITY: EntityKind = EntityKind::Consent;

    fn all() -> &'static [Self] {
        &[Self::Granted, Self::Revoked]
    }

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Granted => &[Self::Revoked],
            Self::Revoked => &[],
        }
    }
}

impl Lifecycle for DeliveryStatus {
    const ENTITY: EntityKind = EntityKind::Delivery;

    fn all() -> &'static [Self] {
        &[Self::Ready, Self::Completed, Self::Revoked]
    }

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Ready => &[Self::Completed, Self::Revoked],
            Self::Completed | Self::Revoked => &[],
        }
    }
}

impl Lifecycle for SettlementStatus {
    const ENTITY: EntityKind = EntityKind::Settlement;

    fn all() -> &'static [Self] {
        &[Self::Locked, Self::Released, Self::Refunded]
    }

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Locked => &[Self::Released, Self::Refunded],
            Self::Refunded => &[Self::Locked],
            Self::Released => &[],
        }
    }
}

impl Lifecycle for DisputeStatus {
    const ENTITY: EntityKind = EntityKind::Dispute;

    fn all() -> &'static [Self] {
        &[
            Self::Opened,
            Self::EvidenceSubmitted,
            Self::Resolved,
            Self::Rejected,
        ]
    }

    fn successors(self) -> &'static [Self] {
        match self {
            Self::Opened => &[Self::EvidenceSubmitted, Self::Resolved, Self::Rejected],
            Self::EvidenceSubmitted => &[Self::Resolved, Self::Rejected],
            Self::Resolved | Self::Rejected => &[],
        }
    }
}
