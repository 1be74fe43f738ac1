//! Consent model: the buyer's signed authorization scoping how a delivered
//! asset may be used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    ActorId, ConsentId, ContentHash, MarketError, OfferId, OrderId, Result, UsageScope,
    canonicalize, hash_canonical, hash_str,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsentStatus {
    #[serde(rename = "consent_granted")]
    Granted,
    #[serde(rename = "consent_revoked")]
    Revoked,
}

impl std::fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Granted => write!(f, "consent_granted"),
            Self::Revoked => write!(f, "consent_revoked"),
        }
    }
}

/// Use the buyer agrees to. Must be contained in the offer's [`UsageScope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentScope {
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<u32>,
}

impl ConsentScope {
    /// Containment check: same purpose, and no longer than the offer when
    /// both specify a duration.
    pub fn ensure_within(&self, offer_scope: &UsageScope) -> Result<()> {
        if self.purpose.trim().is_empty() {
            return Err(MarketError::MissingField("scope.purpose"));
        }
        if self.purpose != offer_scope.purpose {
            return Err(MarketError::ScopeViolation(format!(
                "purpose {:?} does not match offer purpose {:?}",
                self.purpose, offer_scope.purpose
            )));
        }
        if let (Some(asked), Some(allowed)) = (self.duration_days, offer_scope.duration_days) {
            if asked > allowed {
                return Err(MarketError::ScopeViolation(format!(
                    "duration {asked} days exceeds offer duration {allowed} days"
                )));
            }
        }
        Ok(())
    }
}

/// A consent grant for one order. At most one is active per order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consent {
    pub consent_id: ConsentId,
    pub order_id: OrderId,
    pub offer_id: OfferId,
    pub buyer_id: ActorId,
    pub scope: ConsentScope,
    /// Buyer signature over [`Consent::signing_message`], verified externally.
    pub signature: String,
    pub status: ConsentStatus,
    pub consent_hash: ContentHash,
    pub granted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_hash: Option<ContentHash>,
}

impl Consent {
    /// Canonical message the buyer signs.
    pub fn signing_message(
        order_id: OrderId,
        offer_id: OfferId,
        buyer_id: &ActorId,
        scope: &ConsentScope,
    ) -> Result<String> {
        canonicalize(&json!({
            "order_id": order_id,
            "offer_id": offer_id,
            "buyer_id": buyer_id,
            "scope": scope,
        }))
    }

    /// Consent hash: digest of the signing message.
    pub fn compute_hash(&self) -> Result<ContentHash> {
        let message =
            Self::signing_message(self.order_id, self.offer_id, &self.buyer_id, &self.scope)?;
        Ok(hash_str(&message))
    }

    /// Hash recorded when the consent is revoked.
    pub fn compute_revoke_hash(&self) -> Result<ContentHash> {
        hash_canonical(&json!({
            "consent_id": self.consent_id,
            "revoked_at": self.revoked_at,
            "scope": self.scope,
            "reason": self.revoke_reason,
        }))
    }

    #[must_use]
    pub fn anchor_id(&self) -> String {
        format!("consent:{}", self.consent_id)
    }

    #[must_use]
    pub fn revoke_anchor_id(&self) -> String {
        format!("revoke:{}", self.consent_id)
    }
}
