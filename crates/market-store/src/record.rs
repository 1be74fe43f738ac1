//! Collections and the mapping from entity types to stored rows.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use market_types::{
    Consent, Delivery, Dispute, EntityKind, MarketError, Offer, Order, Result, RevocationJob,
    Settlement,
};

/// Named collection of one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Offers,
    Orders,
    Consents,
    Deliveries,
    Settlements,
    Disputes,
    RevocationJobs,
}

impl Collection {
    pub const ALL: [Self; 7] = [
        Self::Offers,
        Self::Orders,
        Self::Consents,
        Self::Deliveries,
        Self::Settlements,
        Self::Disputes,
        Self::RevocationJobs,
    ];

    /// Table name in the indexed store and file stem in the document store.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Offers => "offers",
            Self::Orders => "orders",
            Self::Consents => "consents",
            Self::Deliveries => "deliveries",
            Self::Settlements => "settlements",
            Self::Disputes => "disputes",
            Self::RevocationJobs => "revocations",
        }
    }

    #[must_use]
    pub fn entity(self) -> EntityKind {
        match self {
            Self::Offers => EntityKind::Offer,
            Self::Orders => EntityKind::Order,
            Self::Consents => EntityKind::Consent,
            Self::Deliveries => EntityKind::Delivery,
            Self::Settlements => EntityKind::Settlement,
            Self::Disputes => EntityKind::Dispute,
            Self::RevocationJobs => EntityKind::RevocationJob,
        }
    }

    /// Collections where at most one row per `order_id` may have a status
    /// other than the returned one. Both backends enforce this on write.
    #[must_use]
    pub fn unique_per_order_except(self) -> Option<&'static str> {
        match self {
            Self::Settlements => Some("settlement_refunded"),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An entity that lives in a [`Collection`].
///
/// The secondary index columns (`order_id`, `status`) are read from the
/// serialized body, so every entity keeps those field names.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: fmt::Display + Send + Sync;

    const COLLECTION: Collection;

    fn record_id(&self) -> Self::Id;
}

/// One serialized row, backend-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub collection: Collection,
    pub id: String,
    pub order_id: Option<String>,
    pub status: String,
    pub body: Value,
}

impl StoredRecord {
    pub fn from_record<T: Record>(record: &T) -> Result<Self> {
        let body = serde_json::to_value(record)?;
        Self::from_body(T::COLLECTION, record.record_id().to_string(), body)
    }

    /// Build a row from an already-serialized body, extracting index columns.
    pub fn from_body(collection: Collection, id: String, body: Value) -> Result<Self> {
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                MarketError::Serialization(format!("{collection} record {id} has no status"))
            })?
            .to_string();
        let order_id = body
            .get("order_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            collection,
            id,
            order_id,
            status,
            body,
        })
    }

    pub fn decode<T: Record>(body: Value) -> Result<T> {
        Ok(serde_json::from_value(body)?)
    }
}

macro_rules! record {
    ($ty:ty, $id:ty, $collection:ident, $field:ident) => {
        impl Record for $ty {
            type Id = $id;

            const COLLECTION: Collection = Collection::$collection;

            fn record_id(&self) -> $id {
                self.$field
            }
        }
    };
}

record!(Offer, market_types::OfferId, Offers, offer_id);
record!(Order, market_types::OrderId, Orders, order_id);
record!(Consent, market_types::ConsentId, Consents, consent_id);
record!(Delivery, market_types::DeliveryId, Deliveries, delivery_id);
record!(Settlement, market_types::SettlementId, Settlements, settlement_id);
record!(Dispute, market_types::DisputeId, Disputes, dispute_id);
record!(RevocationJob, market_types::JobId, RevocationJobs, job_id);

#[cfg(test)]
mod tests {
    use super::*;
    use market_types::{OfferId, OfferStatus, OrderStatus};
    use rust_decimal::Decimal;

    #[test]
    fn order_row_carries_index_columns() {
        let order = Order::dummy(OfferId::new(), "buyer", OrderStatus::PaymentLocked);
        let row = StoredRecord::from_record(&order).unwrap();
        assert_eq!(row.collection, Collection::Orders);
        assert_eq!(row.id, order.order_id.to_string());
        assert_eq!(row.order_id.as_deref(), Some(row.id.as_str()));
        assert_eq!(row.status, "payment_locked");
    }

    #[test]
    fn offer_row_has_no_order_id() {
        let offer = Offer::dummy("seller", Decimal::ONE, OfferStatus::Created);
        let row = StoredRecord::from_record(&offer).unwrap();
        assert!(row.order_id.is_none());
        assert_eq!(row.status, "offer_created");
        let back: Offer = StoredRecord::decode(row.body).unwrap();
        assert_eq!(back, offer);
    }

    #[test]
    fn body_without_status_is_rejected() {
        let err = StoredRecord::from_body(
            Collection::Orders,
            "x".into(),
            serde_json::json!({"order_id": "x"}),
        );
        assert!(err.is_err());
    }

    #[test]
    fn only_settlements_are_unique_per_order() {
        for c in Collection::ALL {
            assert_eq!(
                c.unique_per_order_except().is_some(),
                c == Collection::Settlements
            );
        }
    }
}
