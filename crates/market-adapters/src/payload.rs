//! Out-of-band storage for delivery payloads.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use market_types::{DeliveryId, DeliveryPayload, EntityKind, MarketError, PayloadRef, Result};

/// Keeps sensitive payloads out of the delivery record.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn put_delivery_payload(
        &self,
        delivery_id: DeliveryId,
        payload: &DeliveryPayload,
    ) -> Result<PayloadRef>;

    async fn get_delivery_payload(&self, reference: &PayloadRef) -> Result<DeliveryPayload>;

    /// Drop a stored payload. Deleting a missing payload is not an error.
    async fn delete_delivery_payload(&self, reference: &PayloadRef) -> Result<()>;
}

/// Process-local payload store.
#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    payloads: RwLock<HashMap<String, DeliveryPayload>>,
}

impl MemoryPayloadStore {
    pub const NAME: &'static str = "memory";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.read().is_empty()
    }
}

#[async_trait]
impl PayloadStore for MemoryPayloadStore {
    async fn put_delivery_payload(
        &self,
        delivery_id: DeliveryId,
        payload: &DeliveryPayload,
    ) -> Result<PayloadRef> {
        let reference = format!("delivery/{delivery_id}");
        self.payloads
            .write()
            .insert(reference.clone(), payload.clone());
        Ok(PayloadRef {
            store: Self::NAME.to_string(),
            reference,
        })
    }

    async fn get_delivery_payload(&self, reference: &PayloadRef) -> Result<DeliveryPayload> {
        ensure_own(reference)?;
        self.payloads
            .read()
            .get(&reference.reference)
            .cloned()
            .ok_or_else(|| MarketError::not_found(EntityKind::Delivery, &reference.reference))
    }

    async fn delete_delivery_payload(&self, reference: &PayloadRef) -> Result<()> {
        ensure_own(reference)?;
        self.payloads.write().remove(&reference.reference);
        Ok(())
    }
}

fn ensure_own(reference: &PayloadRef) -> Result<()> {
    if reference.store == MemoryPayloadStore::NAME {
        return Ok(());
    }
    Err(MarketError::PayloadStoreFailed(format!(
        "reference belongs to store {:?}",
        reference.store
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryPayloadStore::new();
        let payload = DeliveryPayload::Api {
            access_token: "tok-123".into(),
            quota: Some(1000),
        };
        let id = DeliveryId::new();
        let reference = store.put_delivery_payload(id, &payload).await.unwrap();
        assert_eq!(reference.store, "memory");
        assert!(reference.reference.contains(&id.to_string()));
        assert_eq!(store.get_delivery_payload(&reference).await.unwrap(), payload);
        assert_eq!(store.len(), 1);

        store.delete_delivery_payload(&reference).await.unwrap();
        assert!(store.is_empty());
        store.delete_delivery_payload(&reference).await.unwrap();
    }

    #[tokio::test]
    async fn foreign_or_missing_reference_fails() {
        let store = MemoryPayloadStore::new();
        let foreign = PayloadRef {
            store: "vault".into(),
            reference: "x".into(),
        };
        assert!(matches!(
            store.get_delivery_payload(&foreign).await,
            Err(MarketError::PayloadStoreFailed(_))
        ));
        let missing = PayloadRef {
            store: "memory".into(),
            reference: "delivery/nope".into(),
        };
        assert!(matches!(
            store.get_delivery_payload(&missing).await,
            Err(MarketError::NotFound { .. })
        ));
    }
}
