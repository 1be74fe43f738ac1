//! Offer model: a seller's sale terms for an asset.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::constants::MAX_OPAQUE_BLOB_BYTES;
use crate::{ActorId, ContentHash, MarketError, OfferId, Result, canonicalize, hash_canonical};

/// Lifecycle status of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferStatus {
    #[serde(rename = "offer_created")]
    Created,
    #[serde(rename = "offer_published")]
    Published,
    #[serde(rename = "offer_closed")]
    Closed,
}

impl std::fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "offer_created"),
            Self::Published => write!(f, "offer_published"),
            Self::Closed => write!(f, "offer_closed"),
        }
    }
}

/// What is being sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Data,
    Api,
    Service,
}

/// How the asset reaches the buyer. Selects the [`DeliveryPayload`](crate::DeliveryPayload) variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    Download,
    Api,
    Service,
}

impl std::fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Api => write!(f, "api"),
            Self::Service => write!(f, "service"),
        }
    }
}

/// Permitted use of the asset. Consents must fit inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageScope {
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transferable: Option<bool>,
}

impl UsageScope {
    /// Scope limited to `purpose` with no other constraint.
    pub fn for_purpose(purpose: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            region: None,
            duration_days: None,
            transferable: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.purpose.trim().is_empty() {
            return Err(MarketError::MissingField("usageScope.purpose"));
        }
        if self.duration_days == Some(0) {
            return Err(MarketError::NonPositive("usageScope.durationDays"));
        }
        Ok(())
    }
}

/// Open-ended, size-capped metadata that still canonicalizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct OpaqueBlob(Value);

impl OpaqueBlob {
    pub fn new(value: Value) -> Result<Self> {
        let canonical = canonicalize(&value)?;
        if canonical.len() > MAX_OPAQUE_BLOB_BYTES {
            return Err(MarketError::InvalidArgument(format!(
                "metadata blob is {} bytes, limit is {MAX_OPAQUE_BLOB_BYTES}",
                canonical.len()
            )));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl TryFrom<Value> for OpaqueBlob {
    type Error = MarketError;

    fn try_from(value: Value) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OpaqueBlob> for Value {
    fn from(blob: OpaqueBlob) -> Self {
        blob.0
    }
}

/// Descriptive metadata of the asset on offer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<OpaqueBlob>,
}

/// A seller's published sale terms. Owned by `seller_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: OfferId,
    pub seller_id: ActorId,
    pub asset_id: String,
    pub asset_type: AssetType,
    pub asset_meta: AssetMeta,
    /// Unit price, always a decimal string on the wire.
    pub price: Decimal,
    pub currency: String,
    pub usage_scope: UsageScope,
    pub delivery_type: DeliveryType,
    pub status: OfferStatus,
    pub offer_hash: ContentHash,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Hash over the full set of sale terms. Status and timestamps are excluded.
    pub fn compute_hash(&self) -> Result<ContentHash> {
        hash_canonical(&json!({
            "offer_id": self.offer_id,
            "seller_id": self.seller_id,
            "asset_id": self.asset_id,
            "asset_type": self.asset_type,
            "asset_meta": self.asset_meta,
            "price": self.price,
            "currency": self.currency,
            "usage_scope": self.usage_scope,
            "delivery_type": self.delivery_type,
        }))
    }

    #[must_use]
    pub fn anchor_id(&self) -> String {
        format!("offer:{}", self.offer_id)
    }
}

/// Dummy offer for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Offer {
    pub fn dummy(seller: &str, price: Decimal, status: OfferStatus) -> Self {
        let now = Utc::now();
        let mut offer = Self {
            offer_id: OfferId::new(),
            seller_id: ActorId::from(seller),
            asset_id: "dataset-1".to_string(),
            asset_type: AssetType::Data,
            asset_meta: AssetMeta::default(),
            price,
            currency: "USDC".to_string(),
            usage_scope: UsageScope::for_purpose("research"),
            delivery_type: DeliveryType::Download,
            status,
            offer_hash: crate::hash_str(""),
            created_at: now,
            updated_at: now,
        };
        if let Ok(hash) = offer.compute_hash() {
            offer.offer_hash = hash;
        }
        offer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_entity_prefix() {
        let json = serde_json::to_string(&OfferStatus::Published).unwrap();
        assert_eq!(json, "\"offer_published\"");
        assert_eq!(OfferStatus::Closed.to_string(), "offer_closed");
    }

    #[test]
    fn hash_ignores_status_but_tracks_price() {
        let mut offer = Offer::dummy("seller", Decimal::new(10, 0), OfferStatus::Created);
        let original = offer.compute_hash().unwrap();
        offer.status = OfferStatus::Published;
        assert_eq!(offer.compute_hash().unwrap(), original);
        offer.price = Decimal::new(11, 0);
        assert_ne!(offer.compute_hash().unwrap(), original);
    }

    #[test]
    fn usage_scope_requires_purpose() {
        assert!(UsageScope::for_purpose("  ").validate().is_err());
        let mut scope = UsageScope::for_purpose("research");
        scope.duration_days = Some(0);
        assert!(scope.validate().is_err());
        scope.duration_days = Some(30);
        assert!(scope.validate().is_ok());
    }

    #[test]
    fn opaque_blob_is_size_capped() {
        let big = Value::String("x".repeat(MAX_OPAQUE_BLOB_BYTES + 1));
        assert!(OpaqueBlob::new(big).is_err());
        assert!(OpaqueBlob::new(json!({"license": "cc-by"})).is_ok());
    }

    #[test]
    fn opaque_blob_rejects_floats_on_deserialize() {
        let err = serde_json::from_str::<OpaqueBlob>(r#"{"score": 0.5}"#);
        assert!(err.is_err());
    }

    #[test]
    fn offer_serde_roundtrip_keeps_price_as_string() {
        let offer = Offer::dummy("seller", Decimal::new(1050, 2), OfferStatus::Published);
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json["price"], "10.50");
        let back: Offer = serde_json::from_value(json).unwrap();
        assert_eq!(back, offer);
    }
}
