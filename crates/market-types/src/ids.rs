//! Identifiers used throughout the ledger.
//!
//! Entity IDs use UUIDv7 for time-ordered lexicographic sorting. Actor IDs are
//! opaque strings supplied by the caller (wallet address, account handle).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MarketError;

/// Declares a UUIDv7-backed entity identifier.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = MarketError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self).map_err(|_| {
                    MarketError::InvalidArgument(format!("{} is not a valid id: {s:?}", $label))
                })
            }
        }
    };
}

entity_id!(
    /// Identifier of a seller's [`Offer`](crate::Offer).
    OfferId,
    "offerId"
);
entity_id!(
    /// Identifier of a buyer's [`Order`](crate::Order).
    OrderId,
    "orderId"
);
entity_id!(
    /// Identifier of a [`Consent`](crate::Consent) grant.
    ConsentId,
    "consentId"
);
entity_id!(
    /// Identifier of an issued [`Delivery`](crate::Delivery).
    DeliveryId,
    "deliveryId"
);
entity_id!(
    /// Identifier of a [`Settlement`](crate::Settlement) record.
    SettlementId,
    "settlementId"
);
entity_id!(
    /// Identifier of a [`Dispute`](crate::Dispute).
    DisputeId,
    "disputeId"
);
entity_id!(
    /// Identifier of a dispute evidence entry.
    EvidenceId,
    "evidenceId"
);
entity_id!(
    /// Identifier of a [`RevocationJob`](crate::RevocationJob).
    JobId,
    "jobId"
);
entity_id!(
    /// Identifier of an [`AuditEvent`](crate::AuditEvent).
    EventId,
    "eventId"
);
entity_id!(
    /// Identifier of a usage [`UsageEntry`](crate::UsageEntry).
    LedgerId,
    "ledgerId"
);

// ---------------------------------------------------------------------------
// ActorId
// ---------------------------------------------------------------------------

/// Identity of a buyer, seller, provider or operator acting on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Build an actor id, rejecting blank input.
    pub fn parse(raw: &str, field: &'static str) -> crate::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MarketError::MissingField(field));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

impl From<String> for ActorId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}
