//! Append-only audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ActorId, ContentHash, EventId};

/// One kind per lifecycle transition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    OfferCreated,
    OfferPublished,
    OfferUpdated,
    OfferClosed,
    OrderCreated,
    OrderCancelled,
    PaymentLocked,
    ConsentGranted,
    ConsentRevoked,
    DeliveryIssued,
    DeliveryRevoked,
    DeliveryCompleted,
    SettlementReleased,
    SettlementRefunded,
    DisputeOpened,
    DisputeEvidenceSubmitted,
    DisputeResolved,
    DisputeRejected,
    RevocationRetry,
    RevocationSucceeded,
    RevocationFailed,
    LedgerAppended,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Serialized form is the canonical name.
        match serde_json::to_value(self) {
            Ok(Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// Free-form event metadata (amounts, tx hashes, anchor results).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditDetails(Map<String, Value>);

impl AuditDetails {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. `None`-like values are skipped.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Serialize) {
        match serde_json::to_value(value) {
            Ok(Value::Null) | Err(_) => {}
            Ok(v) => {
                self.0.insert(key.to_string(), v);
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub kind: AuditKind,
    /// Id of the entity the event concerns.
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<AuditDetails>,
}
