//! Recording collaborators with scripted failures. **Never use in production.**

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use market_types::{ActorId, ContentHash, DeliveryId, DeliveryPayload, MarketError, Payee, Result};

use crate::anchor::{AnchorAdapter, AnchorReceipt};
use crate::escrow::{EscrowAdapter, TxHash};
use crate::notifier::{RevocationContext, RevocationNotifier, RevocationOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowCall {
    Lock {
        order_hash: ContentHash,
        payer: ActorId,
        amount: Decimal,
    },
    Release {
        order_hash: ContentHash,
        payees: Vec<Payee>,
    },
    Refund {
        order_hash: ContentHash,
        payer: ActorId,
    },
}

/// Escrow that records every call and returns `0x<op>-<n>` tx hashes.
#[derive(Debug, Default)]
pub struct RecordingEscrow {
    calls: Mutex<Vec<EscrowCall>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    seq: AtomicU64,
}

impl RecordingEscrow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every following call with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<&str>) {
        *self.failure.lock() = error.map(str::to_string);
    }

    /// Sleep before answering, to exercise timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    #[must_use]
    pub fn calls(&self) -> Vec<EscrowCall> {
        self.calls.lock().clone()
    }

    async fn answer(&self, op: &str, call: EscrowCall) -> Result<Option<TxHash>> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(call);
        if let Some(error) = self.failure.lock().clone() {
            return Err(MarketError::EscrowFailed(error));
        }
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("0x{op}-{n}")))
    }
}

#[async_trait]
impl EscrowAdapter for RecordingEscrow {
    async fn lock(
        &self,
        order_hash: &ContentHash,
        payer: &ActorId,
        amount: Decimal,
    ) -> Result<Option<TxHash>> {
        let call = EscrowCall::Lock {
            order_hash: order_hash.clone(),
            payer: payer.clone(),
            amount,
        };
        self.answer("lock", call).await
    }

    async fn release(&self, order_hash: &ContentHash, payees: &[Payee]) -> Result<Option<TxHash>> {
        let call = EscrowCall::Release {
            order_hash: order_hash.clone(),
            payees: payees.to_vec(),
        };
        self.answer("release", call).await
    }

    async fn refund(&self, order_hash: &ContentHash, payer: &ActorId) -> Result<Option<TxHash>> {
        let call = EscrowCall::Refund {
            order_hash: order_hash.clone(),
            payer: payer.clone(),
        };
        self.answer("refund", call).await
    }
}

/// Anchor that records `(anchor_id, hash)` pairs and can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingAnchor {
    anchored: Mutex<Vec<(String, ContentHash)>>,
    failing: AtomicBool,
}

impl RecordingAnchor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn anchored(&self) -> Vec<(String, ContentHash)> {
        self.anchored.lock().clone()
    }
}

#[async_trait]
impl AnchorAdapter for RecordingAnchor {
    async fn anchor_hash(&self, anchor_id: &str, hash: &ContentHash) -> Result<AnchorReceipt> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MarketError::AnchorFailed("anchor network unreachable".into()));
        }
        let mut anchored = self.anchored.lock();
        anchored.push((anchor_id.to_string(), hash.clone()));
        let block = anchored.len() as u64;
        Ok(AnchorReceipt {
            tx: format!("0xanchor-{block}"),
            network: "testnet".into(),
            block: Some(block),
        })
    }
}

/// Notifier failing for chosen deliveries (or all of them).
#[derive(Debug, Default)]
pub struct ScriptedNotifier {
    failing: Mutex<HashSet<DeliveryId>>,
    fail_all: AtomicBool,
    calls: Mutex<Vec<(DeliveryId, u32)>>,
    payloads: Mutex<Vec<(DeliveryId, Option<DeliveryPayload>)>>,
}

impl ScriptedNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, delivery_id: DeliveryId) {
        self.failing.lock().insert(delivery_id);
    }

    pub fn recover(&self, delivery_id: DeliveryId) {
        self.failing.lock().remove(&delivery_id);
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// `(delivery_id, attempt)` per call, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<(DeliveryId, u32)> {
        self.calls.lock().clone()
    }

    /// The delivery payload each call was given, in call order.
    #[must_use]
    pub fn payloads(&self) -> Vec<(DeliveryId, Option<DeliveryPayload>)> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl RevocationNotifier for ScriptedNotifier {
    async fn execute_revocation(&self, context: &RevocationContext) -> Result<RevocationOutcome> {
        let delivery_id = context.target.delivery_id;
        self.calls.lock().push((delivery_id, context.attempt));
        self.payloads
            .lock()
            .push((delivery_id, context.delivery.payload.clone()));
        let fail = self.fail_all.load(Ordering::SeqCst) || self.failing.lock().contains(&delivery_id);
        if fail {
            return Ok(RevocationOutcome::failure(Some(503), "provider unavailable"));
        }
        Ok(RevocationOutcome::success())
    }
}
