//! Offer operations: create, publish, update, close.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use market_types::{
    ActorId, AssetMeta, AssetType, AuditDetails, AuditKind, DeliveryType, EntityKind, MarketError,
    Offer, OfferId, OfferStatus, Result, UsageScope, assert_transition, hash_str,
};

use crate::audit::AuditEntry;
use crate::market::Market;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOffer {
    pub seller_id: ActorId,
    pub asset_id: String,
    pub asset_type: AssetType,
    #[serde(default)]
    pub asset_meta: AssetMeta,
    pub price: Decimal,
    pub currency: String,
    pub usage_scope: UsageScope,
    pub delivery_type: DeliveryType,
}

/// Changed sale terms. `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOffer {
    pub price: Option<Decimal>,
    pub usage_scope: Option<UsageScope>,
    pub delivery_type: Option<DeliveryType>,
    pub asset_meta: Option<AssetMeta>,
}

impl UpdateOffer {
    fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.price.is_some() {
            fields.push("price");
        }
        if self.usage_scope.is_some() {
            fields.push("usage_scope");
        }
        if self.delivery_type.is_some() {
            fields.push("delivery_type");
        }
        if self.asset_meta.is_some() {
            fields.push("asset_meta");
        }
        fields
    }
}

fn ensure_price(price: Decimal) -> Result<()> {
    if price <= Decimal::ZERO {
        return Err(MarketError::NonPositive("price"));
    }
    Ok(())
}

impl Market {
    pub async fn create_offer(&self, input: CreateOffer, actor: Option<&ActorId>) -> Result<Offer> {
        let actor = self.require_actor(actor)?;
        if input.seller_id.as_str().is_empty() {
            return Err(MarketError::MissingField("sellerId"));
        }
        self.check_actor(actor, &input.seller_id, "sellerId")?;
        if input.asset_id.trim().is_empty() {
            return Err(MarketError::MissingField("assetId"));
        }
        if input.currency.trim().is_empty() {
            return Err(MarketError::MissingField("currency"));
        }
        ensure_price(input.price)?;
        input.usage_scope.validate()?;

        let now = Self::now();
        let mut offer = Offer {
            offer_id: OfferId::new(),
            seller_id: input.seller_id,
            asset_id: input.asset_id.trim().to_string(),
            asset_type: input.asset_type,
            asset_meta: input.asset_meta,
            price: input.price,
            currency: input.currency.trim().to_string(),
            usage_scope: input.usage_scope,
            delivery_type: input.delivery_type,
            status: OfferStatus::Created,
            offer_hash: hash_str(""),
            created_at: now,
            updated_at: now,
        };
        offer.offer_hash = offer.compute_hash()?;
        self.store.save(&offer).await?;
        info!(offer_id = %offer.offer_id, seller = %offer.seller_id, "Offer created");

        self.audit
            .record_anchored(
                &offer.anchor_id(),
                AuditEntry::new(AuditKind::OfferCreated, offer.offer_id)
                    .hash(&offer.offer_hash)
                    .actor(actor.unwrap_or(&offer.seller_id))
                    .details(
                        AuditDetails::new()
                            .with("asset_id", &offer.asset_id)
                            .with("price", offer.price)
                            .with("currency", &offer.currency),
                    ),
            )
            .await?;
        Ok(offer)
    }

    pub async fn publish_offer(&self, offer_id: OfferId, actor: Option<&ActorId>) -> Result<Offer> {
        let actor = self.require_actor(actor)?;
        let _guard = self.lock_offer(offer_id).await;
        let mut offer: Offer = self.store.require(&offer_id).await?;
        self.check_actor(actor, &offer.seller_id, "offer.sellerId")?;
        assert_transition(offer.status, OfferStatus::Published)?;

        offer.status = OfferStatus::Published;
        offer.updated_at = Self::now();
        self.store.save(&offer).await?;
        info!(offer_id = %offer_id, "Offer published");

        self.audit
            .record(
                AuditEntry::new(AuditKind::OfferPublished, offer_id)
                    .hash(&offer.offer_hash)
                    .actor(actor.unwrap_or(&offer.seller_id)),
            )
            .await?;
        Ok(offer)
    }

    /// Change the sale terms of an offer that is not closed.
    pub async fn update_offer(
        &self,
        offer_id: OfferId,
        update: UpdateOffer,
        actor: Option<&ActorId>,
    ) -> Result<Offer> {
        let actor = self.require_actor(actor)?;
        let _guard = self.lock_offer(offer_id).await;
        let mut offer: Offer = self.store.require(&offer_id).await?;
        self.check_actor(actor, &offer.seller_id, "offer.sellerId")?;
        if offer.status == OfferStatus::Closed {
            return Err(MarketError::Closed {
                entity: EntityKind::Offer,
                reason: "offer is closed".into(),
            });
        }

        let changed = update.changed_fields();
        if let Some(price) = update.price {
            ensure_price(price)?;
            offer.price = price;
        }
        if let Some(scope) = update.usage_scope {
            scope.validate()?;
            offer.usage_scope = scope;
        }
        if let Some(delivery_type) = update.delivery_type {
            offer.delivery_type = delivery_type;
        }
        if let Some(meta) = update.asset_meta {
            offer.asset_meta = meta;
        }
        offer.offer_hash = offer.compute_hash()?;
        offer.updated_at = Self::now();
        self.store.save(&offer).await?;
        info!(offer_id = %offer_id, ?changed, "Offer updated");

        self.audit
            .record_anchored(
                &offer.anchor_id(),
                AuditEntry::new(AuditKind::OfferUpdated, offer_id)
                    .hash(&offer.offer_hash)
                    .actor(actor.unwrap_or(&offer.seller_id))
                    .details(AuditDetails::new().with("changed", &changed)),
            )
            .await?;
        Ok(offer)
    }

    pub async fn close_offer(&self, offer_id: OfferId, actor: Option<&ActorId>) -> Result<Offer> {
        let actor = self.require_actor(actor)?;
        let _guard = self.lock_offer(offer_id).await;
        let mut offer: Offer = self.store.require(&offer_id).await?;
        self.check_actor(actor, &offer.seller_id, "offer.sellerId")?;
        assert_transition(offer.status, OfferStatus::Closed)?;

        offer.status = OfferStatus::Closed;
        offer.updated_at = Self::now();
        self.store.save(&offer).await?;
        info!(offer_id = %offer_id, "Offer closed");

        self.audit
            .record(
                AuditEntry::new(AuditKind::OfferClosed, offer_id)
                    .hash(&offer.offer_hash)
                    .actor(actor.unwrap_or(&offer.seller_id)),
            )
            .await?;
        Ok(offer)
    }

    pub async fn get_offer(&self, offer_id: OfferId) -> Result<Offer> {
        self.store.require(&offer_id).await
    }

    pub async fn list_offers(&self, status: Option<OfferStatus>) -> Result<Vec<Offer>> {
        let offers: Vec<Offer> = self.store.list().await?;
        Ok(offers
            .into_iter()
            .filter(|o| status.is_none_or(|s| s == o.status))
            .collect())
    }
}
