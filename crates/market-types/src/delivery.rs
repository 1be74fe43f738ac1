//! Delivery model: the issued, revocable artifact fulfilling an order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{ContentHash, DeliveryId, DeliveryType, MarketError, OrderId, Result, hash_canonical};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryStatus {
    #[serde(rename = "delivery_ready")]
    Ready,
    #[serde(rename = "delivery_completed")]
    Completed,
    #[serde(rename = "delivery_revoked")]
    Revoked,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "delivery_ready"),
            Self::Completed => write!(f, "delivery_completed"),
            Self::Revoked => write!(f, "delivery_revoked"),
        }
    }
}

/// Access material handed to the buyer. Sensitive: `Debug` redacts secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryPayload {
    Download {
        download_url: String,
    },
    Api {
        access_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quota: Option<u64>,
    },
    Service {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_quota: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket_id: Option<String>,
    },
}

impl DeliveryPayload {
    #[must_use]
    pub fn delivery_type(&self) -> DeliveryType {
        match self {
            Self::Download { .. } => DeliveryType::Download,
            Self::Api { .. } => DeliveryType::Api,
            Self::Service { .. } => DeliveryType::Service,
        }
    }

    /// The payload variant must match the offer's delivery type and carry
    /// its required secret.
    /// Digest of the payload, kept on the delivery wherever the payload
    /// itself is stored.
    pub fn digest(&self) -> Result<ContentHash> {
        hash_canonical(self)
    }

    pub fn validate_for(&self, expected: DeliveryType) -> Result<()> {
        if self.delivery_type() != expected {
            return Err(MarketError::InvalidArgument(format!(
                "payload type {} does not match delivery type {expected}",
                self.delivery_type()
            )));
        }
        match self {
            Self::Download { download_url } if download_url.trim().is_empty() => {
                Err(MarketError::MissingField("payload.downloadUrl"))
            }
            Self::Api { access_token, .. } if access_token.trim().is_empty() => {
                Err(MarketError::MissingField("payload.accessToken"))
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for DeliveryPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download { .. } => f
                .debug_struct("Download")
                .field("download_url", &"<redacted>")
                .finish(),
            Self::Api { quota, .. } => f
                .debug_struct("Api")
                .field("access_token", &"<redacted>")
                .field("quota", quota)
                .finish(),
            Self::Service {
                service_quota,
                ticket_id,
            } => f
                .debug_struct("Service")
                .field("service_quota", service_quota)
                .field("ticket_id", ticket_id)
                .finish(),
        }
    }
}

/// Reference to a payload kept out of the entity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    /// Name of the store holding the payload.
    pub store: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub delivery_id: DeliveryId,
    pub order_id: OrderId,
    pub delivery_type: DeliveryType,
    pub status: DeliveryStatus,
    pub delivery_hash: ContentHash,
    pub payload_digest: ContentHash,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_hash: Option<ContentHash>,
    /// Inline payload; `None` when stored out-of-band under `payload_ref`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<DeliveryPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<PayloadRef>,
}

impl Delivery {
    /// Hash over the issued delivery. Covers the payload through
    /// `payload_digest`, so inline and external deliveries hash alike.
    pub fn compute_hash(&self) -> Result<ContentHash> {
        hash_canonical(&json!({
            "delivery_id": self.delivery_id,
            "order_id": self.order_id,
            "delivery_type": self.delivery_type,
            "issued_at": self.issued_at,
            "payload_digest": self.payload_digest,
        }))
    }

    pub fn compute_revoke_hash(&self) -> Result<ContentHash> {
        hash_canonical(&json!({
            "delivery_id": self.delivery_id,
            "order_id": self.order_id,
            "revoked_at": self.revoked_at,
            "reason": self.revoke_reason,
        }))
    }

    /// Completed and revoked deliveries are skipped by revocation cascades.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == DeliveryStatus::Ready
    }

    #[must_use]
    pub fn anchor_id(&self) -> String {
        format!("delivery:{}", self.delivery_id)
    }

    #[must_use]
    pub fn revoke_anchor_id(&self) -> String {
        format!("revoke:{}", self.delivery_id)
    }
}

/// Dummy inline delivery for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Delivery {
    pub fn dummy(order_id: OrderId, payload: DeliveryPayload) -> Self {
        let mut delivery = Self {
            delivery_id: DeliveryId::new(),
            order_id,
            delivery_type: payload.delivery_type(),
            status: DeliveryStatus::Ready,
            delivery_hash: crate::hash_str(""),
            payload_digest: crate::hash_str(""),
            issued_at: Utc::now(),
            completed_at: None,
            revoked_at: None,
            revoke_reason: None,
            revoke_hash: None,
            payload: None,
            payload_ref: None,
        };
        if let Ok(digest) = payload.digest() {
            delivery.payload_digest = digest;
        }
        delivery.payload = Some(payload);
        if let Ok(hash) = delivery.compute_hash() {
            delivery.delivery_hash = hash;
        }
        delivery
    }
}
