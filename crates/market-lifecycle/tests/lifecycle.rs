//! Lifecycle integration tests.
//!
//! Every scenario runs a [`Market`] over a temporary document store with
//! recording collaborators: escrow in live mode, anchoring enabled, and a
//! notifier whose failures can be scripted per delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use market_adapters::testing::{EscrowCall, RecordingAnchor, RecordingEscrow, ScriptedNotifier};
use market_adapters::{Ed25519Verifier, MemoryPayloadStore};
use market_lifecycle::*;
use market_store::{Collection, DocumentBackend, LedgerStore, StoreBackend, WriteBatch};
use market_types::*;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;

struct Harness {
    market: Market,
    escrow: Arc<RecordingEscrow>,
    anchor: Arc<RecordingAnchor>,
    notifier: Arc<ScriptedNotifier>,
    seller: ActorId,
    buyer: ActorId,
    _dir: TempDir,
}

fn config(dir: &TempDir) -> MarketConfig {
    let mut config = MarketConfig::default();
    config.store.data_dir = dir.path().to_path_buf();
    config.settlement.mode = EscrowMode::Live;
    config.anchor.enabled = true;
    config.revocation.retry_delay_ms = 1_000;
    config
}

async fn harness_with(
    tweak: impl FnOnce(&mut MarketConfig),
    extend: impl FnOnce(MarketBuilder) -> MarketBuilder,
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let mut config = config(&dir);
    tweak(&mut config);
    let escrow = Arc::new(RecordingEscrow::new());
    let anchor = Arc::new(RecordingAnchor::new());
    let notifier = Arc::new(ScriptedNotifier::new());
    let builder = Market::builder(config)
        .escrow(escrow.clone())
        .anchor(anchor.clone())
        .notifier(notifier.clone());
    let market = extend(builder).build().await.expect("market should build");
    Harness {
        market,
        escrow,
        anchor,
        notifier,
        seller: ActorId::from("seller-1"),
        buyer: ActorId::from("buyer-1"),
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(|_| {}, |b| b).await
}

/// Document store whose commits fail while they touch a chosen collection.
struct FailingBackend {
    inner: DocumentBackend,
    fail_on: Mutex<Option<Collection>>,
    _dir: TempDir,
}

impl FailingBackend {
    async fn open() -> Arc<Self> {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let inner = DocumentBackend::open(dir.path())
            .await
            .expect("document store should open");
        Arc::new(Self {
            inner,
            fail_on: Mutex::new(None),
            _dir: dir,
        })
    }

    fn fail_on(&self, collection: Option<Collection>) {
        *self.fail_on.lock() = collection;
    }
}

#[async_trait]
impl StoreBackend for FailingBackend {
    fn kind(&self) -> StoreBackendKind {
        self.inner.kind()
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        self.inner.get(collection, id).await
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        self.inner.list(collection).await
    }

    async fn list_by_order(&self, collection: Collection, order_id: &str) -> Result<Vec<Value>> {
        self.inner.list_by_order(collection, order_id).await
    }

    async fn list_by_status(&self, collection: Collection, status: &str) -> Result<Vec<Value>> {
        self.inner.list_by_status(collection, status).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let failing = *self.fail_on.lock();
        if let Some(collection) = failing {
            if batch.touched_collections().contains(&collection) {
                return Err(MarketError::Storage("disk full".into()));
            }
        }
        self.inner.commit(batch).await
    }

    async fn read_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        self.inner.read_audit_events(limit).await
    }

    async fn list_usage(&self, filter: &UsageFilter) -> Result<Vec<UsageEntry>> {
        self.inner.list_usage(filter).await
    }

    async fn has_any_data(&self) -> Result<bool> {
        self.inner.has_any_data().await
    }
}

async fn failing_harness(
    tweak: impl FnOnce(&mut MarketConfig),
    extend: impl FnOnce(MarketBuilder) -> MarketBuilder,
) -> (Harness, Arc<FailingBackend>) {
    let backend = FailingBackend::open().await;
    let store = LedgerStore::new(backend.clone());
    let h = harness_with(tweak, move |b| extend(b.store(store))).await;
    (h, backend)
}

fn offer_input(seller: &ActorId, delivery_type: DeliveryType) -> CreateOffer {
    CreateOffer {
        seller_id: seller.clone(),
        asset_id: "dataset-42".into(),
        asset_type: AssetType::Data,
        asset_meta: AssetMeta::default(),
        price: Decimal::TEN,
        currency: "USDC".into(),
        usage_scope: UsageScope::for_purpose("analytics"),
        delivery_type,
    }
}

fn download() -> DeliveryPayload {
    DeliveryPayload::Download {
        download_url: "https://files.example/dataset-42".into(),
    }
}

fn analytics() -> ConsentScope {
    ConsentScope {
        purpose: "analytics".into(),
        duration_days: None,
    }
}

impl Harness {
    async fn published_offer(&self) -> Offer {
        let offer = self
            .market
            .create_offer(offer_input(&self.seller, DeliveryType::Download), Some(&self.seller))
            .await
            .expect("create_offer should succeed");
        self.market
            .publish_offer(offer.offer_id, Some(&self.seller))
            .await
            .expect("publish_offer should succeed")
    }

    async fn order(&self) -> (Offer, Order) {
        let offer = self.published_offer().await;
        let order = self
            .market
            .create_order(
                CreateOrder {
                    offer_id: offer.offer_id,
                    buyer_id: self.buyer.clone(),
                    quantity: None,
                },
                Some(&self.buyer),
            )
            .await
            .expect("create_order should succeed");
        (offer, order)
    }

    async fn locked_order(&self) -> (Offer, Order, Settlement) {
        let (offer, order) = self.order().await;
        let settlement = self
            .market
            .lock_payment(
                LockPayment {
                    order_id: order.order_id,
                    payer: self.buyer.clone(),
                    amount: Some(Decimal::TEN),
                },
                Some(&self.buyer),
            )
            .await
            .expect("lock_payment should succeed");
        (offer, order, settlement)
    }

    async fn consented_order(&self) -> (Order, Consent) {
        let (_, order, _) = self.locked_order().await;
        let consent = self
            .market
            .grant_consent(
                GrantConsent {
                    order_id: order.order_id,
                    scope: analytics(),
                    signature: "sig".into(),
                },
                Some(&self.buyer),
            )
            .await
            .expect("grant_consent should succeed");
        (order, consent)
    }

    async fn issue(&self, order_id: OrderId) -> Delivery {
        self.market
            .issue_delivery(
                IssueDelivery {
                    order_id,
                    payload: download(),
                },
                Some(&self.seller),
            )
            .await
            .expect("issue_delivery should succeed")
    }

    async fn events(&self, kind: AuditKind) -> Vec<AuditEvent> {
        self.market
            .audit_log(Some(1_000))
            .await
            .expect("audit_log should succeed")
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

// =========================================================================
// Happy path
// =========================================================================

#[tokio::test]
async fn full_sale_settles_with_verifiable_audit_trail() {
    let h = harness().await;
    let (order, consent) = h.consented_order().await;
    let delivery = h.issue(order.order_id).await;
    h.market
        .complete_delivery(delivery.delivery_id, Some(&h.seller))
        .await
        .expect("complete_delivery should succeed");
    let settlement = h
        .market
        .release_payment(
            ReleasePayment {
                order_id: order.order_id,
                payees: vec![Payee::new(h.seller.as_str(), Decimal::TEN)],
            },
            Some(&h.seller),
        )
        .await
        .expect("release_payment should succeed");

    let order = h.market.get_order(order.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::SettlementCompleted);
    assert_eq!(settlement.status, SettlementStatus::Released);
    assert_eq!(settlement.amount, Decimal::TEN);
    assert_eq!(settlement.lock_tx_hash.as_deref(), Some("0xlock-1"));
    assert_eq!(settlement.release_tx_hash.as_deref(), Some("0xrelease-2"));

    let events = h.market.audit_log(None).await.unwrap();
    assert!(events.len() >= 6, "Got {} events", events.len());
    for pair in events.windows(2) {
        assert!(pair[0].timestamp < pair[1].timestamp, "timestamps must strictly increase");
    }

    // Each recorded hash matches a fresh hash of the stored entity.
    let offer = h.market.get_offer(order.offer_id).await.unwrap();
    let delivery = h.market.get_delivery(delivery.delivery_id).await.unwrap();
    let settlement = h
        .market
        .settlement_status(SettlementRef::Order(order.order_id), Some(&h.buyer))
        .await
        .unwrap();
    for event in &events {
        let fresh = match event.kind {
            AuditKind::OfferCreated | AuditKind::OfferPublished => offer.compute_hash(),
            AuditKind::OrderCreated | AuditKind::PaymentLocked => order.compute_hash(),
            AuditKind::ConsentGranted => consent.compute_hash(),
            AuditKind::DeliveryIssued | AuditKind::DeliveryCompleted => delivery.compute_hash(),
            AuditKind::SettlementReleased => settlement.compute_hash(),
            other => panic!("unexpected event {other}"),
        }
        .expect("hash should compute");
        assert_eq!(event.hash.as_ref(), Some(&fresh), "hash mismatch for {}", event.kind);
    }

    let anchored: Vec<String> = h.anchor.anchored().into_iter().map(|(id, _)| id).collect();
    assert!(anchored.contains(&offer.anchor_id()));
    assert!(anchored.contains(&order.anchor_id()));
    assert!(anchored.contains(&settlement.anchor_id()));
}

#[tokio::test]
async fn closed_offer_rejects_update() {
    let h = harness().await;
    let offer = h.published_offer().await;
    let updated = h
        .market
        .update_offer(
            offer.offer_id,
            UpdateOffer {
                price: Some(Decimal::from(12)),
                ..UpdateOffer::default()
            },
            Some(&h.seller),
        )
        .await
        .expect("update_offer should succeed");
    assert_eq!(updated.price, Decimal::from(12));
    assert_ne!(updated.offer_hash, offer.offer_hash);

    h.market
        .close_offer(offer.offer_id, Some(&h.seller))
        .await
        .expect("close_offer should succeed");
    let err = h
        .market
        .update_offer(offer.offer_id, UpdateOffer::default(), Some(&h.seller))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Closed { .. }), "Got: {err}");
}

// =========================================================================
// Order and payment validation
// =========================================================================

#[tokio::test]
async fn order_against_unpublished_offer_fails() {
    let h = harness().await;
    let offer = h
        .market
        .create_offer(offer_input(&h.seller, DeliveryType::Download), None)
        .await
        .unwrap();
    let err = h
        .market
        .create_order(
            CreateOrder {
                offer_id: offer.offer_id,
                buyer_id: h.buyer.clone(),
                quantity: Some(1),
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(h.market.list_orders(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn zero_quantity_fails() {
    let h = harness().await;
    let offer = h.published_offer().await;
    let err = h
        .market
        .create_order(
            CreateOrder {
                offer_id: offer.offer_id,
                buyer_id: h.buyer.clone(),
                quantity: Some(0),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::NonPositive("quantity")));
}

#[tokio::test]
async fn overflowing_total_rejected_before_save() {
    let h = harness().await;
    let mut input = offer_input(&h.seller, DeliveryType::Download);
    input.price = Decimal::MAX;
    let offer = h.market.create_offer(input, None).await.unwrap();
    h.market.publish_offer(offer.offer_id, None).await.unwrap();

    let err = h
        .market
        .create_order(
            CreateOrder {
                offer_id: offer.offer_id,
                buyer_id: h.buyer.clone(),
                quantity: Some(2),
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(h.market.list_orders(None).await.unwrap().is_empty());
    assert!(h.events(AuditKind::OrderCreated).await.is_empty());
}

#[tokio::test]
async fn second_lock_conflicts() {
    let h = harness().await;
    let (_, order, _) = h.locked_order().await;
    let err = h
        .market
        .lock_payment(
            LockPayment {
                order_id: order.order_id,
                payer: h.buyer.clone(),
                amount: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::SettlementExists(_)), "Got: {err}");
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.escrow.calls().len(), 1);
}

#[tokio::test]
async fn active_settlement_blocks_lock() {
    let h = harness().await;
    let (_, order) = h.order().await;
    let existing = Settlement::locked(
        SettlementId::new(),
        order.order_id,
        h.buyer.clone(),
        order.total().expect("total should compute"),
        None,
        None,
    )
    .unwrap();
    h.market.store().save(&existing).await.unwrap();

    let err = h
        .market
        .lock_payment(
            LockPayment {
                order_id: order.order_id,
                payer: h.buyer.clone(),
                amount: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::SettlementExists(id) if id == order.order_id));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(h.escrow.calls().is_empty());
}

#[tokio::test]
async fn lock_after_refund_reuses_settlement_id() {
    let h = harness().await;
    let (_, order) = h.order().await;
    let mut refunded = Settlement::locked(
        SettlementId::new(),
        order.order_id,
        h.buyer.clone(),
        order.total().expect("total should compute"),
        None,
        None,
    )
    .unwrap();
    refunded.status = SettlementStatus::Refunded;
    h.market.store().save(&refunded).await.unwrap();

    let settlement = h
        .market
        .lock_payment(
            LockPayment {
                order_id: order.order_id,
                payer: h.buyer.clone(),
                amount: None,
            },
            None,
        )
        .await
        .expect("lock_payment should succeed");
    assert_eq!(settlement.settlement_id, refunded.settlement_id);
    assert_eq!(settlement.status, SettlementStatus::Locked);
}

#[tokio::test]
async fn lock_amount_must_match_total() {
    let h = harness().await;
    let (_, order) = h.order().await;
    let err = h
        .market
        .lock_payment(
            LockPayment {
                order_id: order.order_id,
                payer: h.buyer.clone(),
                amount: Some(Decimal::ONE),
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn refund_cancels_settlement() {
    let h = harness().await;
    let (_, order, locked) = h.locked_order().await;
    let refunded = h
        .market
        .refund_payment(
            RefundPayment {
                order_id: order.order_id,
                payer: h.buyer.clone(),
                reason: Some("changed my mind".into()),
            },
            Some(&h.buyer),
        )
        .await
        .expect("refund_payment should succeed");
    assert_eq!(refunded.settlement_id, locked.settlement_id);
    assert_eq!(refunded.status, SettlementStatus::Refunded);
    assert_eq!(refunded.refund_tx_hash.as_deref(), Some("0xrefund-2"));
    let order = h.market.get_order(order.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::SettlementCancelled);
}

// =========================================================================
// External collaborator failures
// =========================================================================

#[tokio::test]
async fn escrow_failure_aborts_without_writes() {
    let h = harness().await;
    let (_, order) = h.order().await;
    h.escrow.set_failure(Some("insufficient funds"));
    let err = h
        .market
        .lock_payment(
            LockPayment {
                order_id: order.order_id,
                payer: h.buyer.clone(),
                amount: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::EscrowFailed(_)));

    let order = h.market.get_order(order.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Created);
    assert!(h
        .market
        .settlement_status(SettlementRef::Order(order.order_id), None)
        .await
        .is_err());
    assert!(h.events(AuditKind::PaymentLocked).await.is_empty());
}

#[tokio::test]
async fn escrow_timeout_is_a_hard_failure() {
    let h = harness_with(|c| c.settlement.escrow_timeout_ms = 50, |b| b).await;
    let (_, order) = h.order().await;
    h.escrow.set_delay(Some(Duration::from_millis(500)));
    let err = h
        .market
        .lock_payment(
            LockPayment {
                order_id: order.order_id,
                payer: h.buyer.clone(),
                amount: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Timeout { timeout_ms: 50, .. }), "Got: {err}");
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);
    let order = h.market.get_order(order.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Created);
}

#[tokio::test]
async fn anchor_failure_is_recorded_not_raised() {
    let h = harness().await;
    h.anchor.set_failing(true);
    let offer = h
        .market
        .create_offer(offer_input(&h.seller, DeliveryType::Download), None)
        .await
        .expect("create_offer should succeed despite anchor failure");

    let events = h.events(AuditKind::OfferCreated).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ref_id, offer.offer_id.to_string());
    let details = events[0].details.as_ref().expect("details should be present");
    assert!(details.get("anchor").is_none());
    let error = details.get("anchor_error").expect("anchor_error should be recorded");
    assert!(error.as_str().unwrap().contains("unreachable"), "Got: {error}");
}

#[tokio::test]
async fn anchor_receipt_lands_in_details() {
    let h = harness().await;
    h.published_offer().await;
    let events = h.events(AuditKind::OfferCreated).await;
    let receipt = events[0]
        .details
        .as_ref()
        .and_then(|d| d.get("anchor"))
        .expect("anchor receipt should be recorded");
    assert_eq!(receipt["tx"], "0xanchor-1");
}

// =========================================================================
// Consent revocation cascade and retry sweep
// =========================================================================

#[tokio::test]
async fn cascade_reports_each_delivery_independently() {
    let h = harness().await;
    let (order, consent) = h.consented_order().await;
    let first = h.issue(order.order_id).await;
    let second = h.issue(order.order_id).await;
    h.notifier.fail_for(second.delivery_id);

    let revocation = h
        .market
        .revoke_consent(
            RevokeConsent {
                consent_id: consent.consent_id,
                reason: None,
            },
            Some(&h.buyer),
        )
        .await
        .expect("revoke_consent should succeed despite notifier failure");

    assert_eq!(revocation.consent.status, ConsentStatus::Revoked);
    assert_eq!(revocation.deliveries.len(), 2);
    let ok: Vec<_> = revocation.deliveries.iter().filter(|d| d.revoke_ok).collect();
    assert_eq!(ok.len(), 1);
    assert_eq!(ok[0].delivery_id, first.delivery_id);

    let jobs = h.market.revocation_jobs(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].delivery_id, second.delivery_id);
    assert_eq!(jobs[0].consent_id, Some(consent.consent_id));
    assert_eq!(jobs[0].reason, constants::CONSENT_REVOKED_REASON);

    let revoked = h.events(AuditKind::DeliveryRevoked).await;
    assert_eq!(revoked.len(), 2);
    for event in &revoked {
        let details = event.details.as_ref().unwrap();
        let expect_ok = event.ref_id == first.delivery_id.to_string();
        assert_eq!(details.get("revoke_ok"), Some(&serde_json::json!(expect_ok)));
    }

    let order = h.market.get_order(order.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::ConsentRevoked);
    for delivery in h.market.deliveries_for_order(order.order_id).await.unwrap() {
        assert_eq!(delivery.status, DeliveryStatus::Revoked);
    }
}

#[tokio::test]
async fn cascade_skips_completed_deliveries() {
    let h = harness().await;
    let (order, consent) = h.consented_order().await;
    let delivery = h.issue(order.order_id).await;
    h.market
        .complete_delivery(delivery.delivery_id, None)
        .await
        .unwrap();

    let revocation = h
        .market
        .revoke_consent(
            RevokeConsent {
                consent_id: consent.consent_id,
                reason: Some("policy".into()),
            },
            None,
        )
        .await
        .expect("revoke_consent should succeed");
    assert!(revocation.deliveries.is_empty());
    assert!(h.notifier.calls().is_empty());
    // delivery_completed -> consent_revoked is not an allowed move.
    let order = h.market.get_order(order.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::DeliveryCompleted);
}

#[tokio::test]
async fn cascade_hands_inline_payload_and_records_to_notifier() {
    let h = harness().await;
    let (order, consent) = h.consented_order().await;
    let delivery = h.issue(order.order_id).await;
    h.market
        .revoke_consent(
            RevokeConsent {
                consent_id: consent.consent_id,
                reason: None,
            },
            None,
        )
        .await
        .expect("revoke_consent should succeed");
    assert_eq!(h.notifier.payloads(), vec![(delivery.delivery_id, Some(download()))]);
}

#[tokio::test]
async fn cascade_continues_past_unstored_revocation() {
    let (h, backend) = failing_harness(|_| {}, |b| b).await;
    let (order, consent) = h.consented_order().await;
    let first = h.issue(order.order_id).await;
    let second = h.issue(order.order_id).await;
    h.notifier.fail_for(first.delivery_id);
    backend.fail_on(Some(Collection::RevocationJobs));

    let revocation = h
        .market
        .revoke_consent(
            RevokeConsent {
                consent_id: consent.consent_id,
                reason: None,
            },
            Some(&h.buyer),
        )
        .await
        .expect("revoke_consent should succeed when one delivery cannot be stored");
    assert_eq!(revocation.consent.status, ConsentStatus::Revoked);
    assert_eq!(revocation.deliveries.len(), 1);
    assert_eq!(revocation.deliveries[0].delivery_id, second.delivery_id);
    assert_eq!(revocation.failures.len(), 1);
    assert_eq!(revocation.failures[0].delivery_id, first.delivery_id);
    assert!(revocation.failures[0].error.contains("disk full"));

    // Delivery and job are written together or not at all.
    let stranded = h.market.get_delivery(first.delivery_id).await.unwrap();
    assert_eq!(stranded.status, DeliveryStatus::Ready);
    let revoked = h.market.get_delivery(second.delivery_id).await.unwrap();
    assert_eq!(revoked.status, DeliveryStatus::Revoked);
    assert!(h.market.revocation_jobs(None).await.unwrap().is_empty());
    assert_eq!(h.events(AuditKind::DeliveryRevoked).await.len(), 1);

    backend.fail_on(None);
    let retried = h
        .market
        .revoke_delivery(
            RevokeDelivery {
                delivery_id: first.delivery_id,
                reason: None,
            },
            Some(&h.seller),
        )
        .await
        .expect("revoke_delivery should succeed once storage recovers");
    assert!(!retried.revoke_ok);
    let jobs = h.market.revocation_jobs(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(Some(jobs[0].job_id), retried.job_id);
    assert_eq!(jobs[0].delivery_id, first.delivery_id);
    assert_eq!(jobs[0].consent_id, Some(consent.consent_id));
}

#[tokio::test]
async fn sweep_retries_until_success() {
    let h = harness().await;
    let (order, _) = h.consented_order().await;
    let delivery = h.issue(order.order_id).await;
    h.notifier.fail_for(delivery.delivery_id);
    let revoked = h
        .market
        .revoke_delivery(
            RevokeDelivery {
                delivery_id: delivery.delivery_id,
                reason: None,
            },
            Some(&h.seller),
        )
        .await
        .expect("revoke_delivery should succeed");
    assert!(!revoked.revoke_ok);
    assert!(revoked.job_id.is_some());

    // Not due yet.
    let report = h.market.sweep_revocations(Utc::now()).await.unwrap();
    assert_eq!(report.processed, 0);

    h.notifier.recover(delivery.delivery_id);
    let later = Utc::now() + chrono::Duration::hours(1);
    let report = h.market.sweep_revocations(later).await.unwrap();
    assert_eq!((report.processed, report.succeeded), (1, 1));
    assert!(h.market.revocation_jobs(None).await.unwrap().is_empty());
    assert_eq!(h.events(AuditKind::RevocationSucceeded).await.len(), 1);
    assert_eq!(h.notifier.calls().last(), Some(&(delivery.delivery_id, 2)));
}

#[tokio::test]
async fn sweep_fails_job_after_max_attempts() {
    let h = harness().await;
    let (order, _) = h.consented_order().await;
    let delivery = h.issue(order.order_id).await;
    h.notifier.set_fail_all(true);
    h.market
        .revoke_delivery(
            RevokeDelivery {
                delivery_id: delivery.delivery_id,
                reason: None,
            },
            None,
        )
        .await
        .unwrap();

    let mut now = Utc::now();
    let mut reports = Vec::new();
    for _ in 0..4 {
        now += chrono::Duration::hours(1);
        reports.push(h.market.sweep_revocations(now).await.unwrap());
    }
    // attempts: 1 inline, 2 retried, 3 exhausted with max_attempts = 3.
    assert_eq!(reports[0].pending, 1);
    assert_eq!(reports[1].failed, 1);
    assert_eq!(reports[2].processed, 0);
    assert_eq!(reports[3].processed, 0);

    let failed = h
        .market
        .revocation_jobs(Some(RevocationJobStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 3);
    assert_eq!(h.notifier.calls().len(), 3);
    assert_eq!(h.events(AuditKind::RevocationFailed).await.len(), 1);
}

#[tokio::test]
async fn sweep_fails_job_for_missing_delivery() {
    let h = harness().await;
    let (order, _) = h.consented_order().await;
    let delivery = h.issue(order.order_id).await;
    h.notifier.set_fail_all(true);
    h.market
        .revoke_delivery(
            RevokeDelivery {
                delivery_id: delivery.delivery_id,
                reason: None,
            },
            None,
        )
        .await
        .unwrap();
    h.market
        .store()
        .run_in_transaction(|tx| {
            tx.remove::<Delivery>(&delivery.delivery_id);
            Ok(())
        })
        .await
        .unwrap();

    let report = h
        .market
        .sweep_revocations(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!((report.processed, report.failed), (1, 1));
    let job = &h.market.revocation_jobs(None).await.unwrap()[0];
    assert_eq!(job.status, RevocationJobStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("delivery not found"));
    // Only the inline attempt reached the notifier.
    assert_eq!(h.notifier.calls().len(), 1);
}

// =========================================================================
// Disputes
// =========================================================================

#[tokio::test]
async fn dispute_refund_cancels_order() {
    let h = harness().await;
    let (_, order, _) = h.locked_order().await;
    let dispute = h
        .market
        .open_dispute(
            OpenDispute {
                order_id: order.order_id,
                reason: "asset never arrived".into(),
            },
            Some(&h.buyer),
        )
        .await
        .expect("open_dispute should succeed");
    assert_eq!(dispute.respondent_actor_id, h.seller);

    let err = h
        .market
        .open_dispute(
            OpenDispute {
                order_id: order.order_id,
                reason: "again".into(),
            },
            Some(&h.seller),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::DisputeAlreadyOpen(_)));

    let dispute = h
        .market
        .submit_evidence(
            DisputeRef::Order(order.order_id),
            SubmitEvidence {
                summary: "delivery log attached".into(),
                cid: Some("bafy-log".into()),
            },
            Some(&h.seller),
        )
        .await
        .expect("submit_evidence should succeed");
    assert_eq!(dispute.status, DisputeStatus::EvidenceSubmitted);
    assert_eq!(dispute.evidence.len(), 1);

    let resolved = h
        .market
        .resolve_dispute(
            DisputeRef::Id(dispute.dispute_id),
            ResolveDispute {
                resolution: DisputeResolution::Refund,
                payer: Some(h.buyer.clone()),
                payees: Vec::new(),
            },
            None,
        )
        .await
        .expect("resolve_dispute should succeed");
    assert_eq!(resolved.dispute.status, DisputeStatus::Resolved);
    assert_eq!(resolved.settlement.status, SettlementStatus::Refunded);
    let order = h.market.get_order(order.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::SettlementCancelled);
    assert!(matches!(h.escrow.calls().last(), Some(EscrowCall::Refund { .. })));

    let evidence_anchor = format!("{}:evidence:", dispute.anchor_id());
    assert!(h
        .anchor
        .anchored()
        .iter()
        .any(|(id, _)| id.starts_with(&evidence_anchor)));
}

#[tokio::test]
async fn dispute_release_completes_order() {
    let h = harness().await;
    let (order, _) = h.consented_order().await;
    let delivery = h.issue(order.order_id).await;
    h.market
        .complete_delivery(delivery.delivery_id, None)
        .await
        .unwrap();
    h.market
        .open_dispute(
            OpenDispute {
                order_id: order.order_id,
                reason: "partial data".into(),
            },
            Some(&h.seller),
        )
        .await
        .unwrap();

    let resolved = h
        .market
        .resolve_dispute(
            DisputeRef::Order(order.order_id),
            ResolveDispute {
                resolution: DisputeResolution::Partial,
                payer: None,
                payees: vec![
                    Payee::new(h.seller.as_str(), Decimal::from(7)),
                    Payee::new(h.buyer.as_str(), Decimal::from(3)),
                ],
            },
            None,
        )
        .await
        .expect("resolve_dispute should succeed");
    assert_eq!(resolved.settlement.status, SettlementStatus::Released);
    assert_eq!(resolved.settlement.amount, Decimal::TEN);
    assert_eq!(resolved.dispute.resolution, Some(DisputeResolution::Partial));
    let order = h.market.get_order(order.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::SettlementCompleted);

    let err = h
        .market
        .reject_dispute(DisputeRef::Order(order.order_id), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Closed { .. }));
}

#[tokio::test]
async fn outsider_cannot_open_dispute() {
    let h = harness().await;
    let (_, order) = h.order().await;
    let err = h
        .market
        .open_dispute(
            OpenDispute {
                order_id: order.order_id,
                reason: "curious".into(),
            },
            Some(&ActorId::from("mallory")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::ActorMismatch(_)));
    let filter = DisputeFilter {
        order_id: Some(order.order_id),
        status: None,
    };
    assert!(h.market.list_disputes(&filter).await.unwrap().is_empty());
}

// =========================================================================
// Access, credentials, signatures
// =========================================================================

#[tokio::test]
async fn actor_mismatch_rejected_when_enforced() {
    let h = harness_with(
        |c| {
            c.access.require_actor = true;
            c.access.require_actor_match = true;
        },
        |b| b,
    )
    .await;
    let err = h
        .market
        .create_offer(offer_input(&h.seller, DeliveryType::Download), Some(&h.buyer))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::ActorMismatch("sellerId")));

    let err = h
        .market
        .create_offer(offer_input(&h.seller, DeliveryType::Download), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::MissingField("actorId")));
    assert!(h.market.list_offers(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn external_credentials_go_to_payload_store() {
    let payloads = Arc::new(MemoryPayloadStore::new());
    let store = payloads.clone();
    let h = harness_with(
        |c| c.credentials.mode = CredentialsMode::External,
        move |b| b.payload_store(store),
    )
    .await;
    let (order, _) = h.consented_order().await;
    let delivery = h.issue(order.order_id).await;

    assert!(delivery.payload.is_none());
    assert!(delivery.payload_ref.is_some());
    assert_eq!(payloads.len(), 1);
    assert_eq!(delivery.payload_digest, download().digest().unwrap());

    // The stored record hashes the same as at issue, without its payload.
    let stored = h.market.get_delivery(delivery.delivery_id).await.unwrap();
    let fresh = stored.compute_hash().expect("hash should compute");
    assert_eq!(fresh, delivery.delivery_hash);
    let issued = h.events(AuditKind::DeliveryIssued).await;
    assert_eq!(issued[0].hash.as_ref(), Some(&fresh));

    let payload = h
        .market
        .delivery_payload(delivery.delivery_id, Some(&h.buyer))
        .await
        .expect("delivery_payload should succeed");
    assert_eq!(payload, download());
}

#[tokio::test]
async fn notifier_sees_external_payload_inline_and_on_retry() {
    let payloads = Arc::new(MemoryPayloadStore::new());
    let store = payloads.clone();
    let h = harness_with(
        |c| c.credentials.mode = CredentialsMode::External,
        move |b| b.payload_store(store),
    )
    .await;
    let (order, _) = h.consented_order().await;
    let delivery = h.issue(order.order_id).await;
    h.notifier.fail_for(delivery.delivery_id);
    h.market
        .revoke_delivery(
            RevokeDelivery {
                delivery_id: delivery.delivery_id,
                reason: None,
            },
            None,
        )
        .await
        .expect("revoke_delivery should succeed");

    h.notifier.recover(delivery.delivery_id);
    let report = h
        .market
        .sweep_revocations(Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let seen = h.notifier.payloads();
    assert_eq!(seen.len(), 2);
    for (delivery_id, payload) in seen {
        assert_eq!(delivery_id, delivery.delivery_id);
        assert_eq!(payload, Some(download()));
    }
    // The revoked record still keeps only the reference.
    let stored = h.market.get_delivery(delivery.delivery_id).await.unwrap();
    assert!(stored.payload.is_none());
}

#[tokio::test]
async fn failed_issue_discards_external_payload() {
    let payloads = Arc::new(MemoryPayloadStore::new());
    let store = payloads.clone();
    let (h, backend) = failing_harness(
        |c| c.credentials.mode = CredentialsMode::External,
        move |b| b.payload_store(store),
    )
    .await;
    let (order, _) = h.consented_order().await;
    backend.fail_on(Some(Collection::Deliveries));

    let err = h
        .market
        .issue_delivery(
            IssueDelivery {
                order_id: order.order_id,
                payload: download(),
            },
            Some(&h.seller),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Storage(_)), "Got: {err}");
    assert!(payloads.is_empty());
    assert!(h.market.deliveries_for_order(order.order_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn external_credentials_without_store_unavailable() {
    let h = harness_with(|c| c.credentials.mode = CredentialsMode::External, |b| b).await;
    let (order, _) = h.consented_order().await;
    let err = h
        .market
        .issue_delivery(
            IssueDelivery {
                order_id: order.order_id,
                payload: download(),
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    let order = h.market.get_order(order.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::ConsentGranted);
}

#[tokio::test]
async fn consent_requires_valid_ed25519_signature() {
    let mut h = harness_with(|_| {}, |b| b.verifier(Arc::new(Ed25519Verifier))).await;
    let key = SigningKey::generate(&mut OsRng);
    h.buyer = ActorId::from(hex::encode(key.verifying_key().as_bytes()));
    let (offer, order, _) = h.locked_order().await;

    let message =
        Consent::signing_message(order.order_id, offer.offer_id, &h.buyer, &analytics()).unwrap();
    let forged = hex::encode(key.sign(b"something else").to_bytes());
    let err = h
        .market
        .grant_consent(
            GrantConsent {
                order_id: order.order_id,
                scope: analytics(),
                signature: forged,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidSignature));

    let signature = hex::encode(key.sign(message.as_bytes()).to_bytes());
    let consent = h
        .market
        .grant_consent(
            GrantConsent {
                order_id: order.order_id,
                scope: analytics(),
                signature,
            },
            None,
        )
        .await
        .expect("grant_consent should succeed");
    assert_eq!(consent.consent_hash, hash_str(&message));
}

#[tokio::test]
async fn consent_scope_must_match_offer() {
    let h = harness().await;
    let (_, order, _) = h.locked_order().await;
    let err = h
        .market
        .grant_consent(
            GrantConsent {
                order_id: order.order_id,
                scope: ConsentScope {
                    purpose: "training".into(),
                    duration_days: None,
                },
                signature: "sig".into(),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::ScopeViolation(_)));
}
