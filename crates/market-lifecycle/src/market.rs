//! The lifecycle orchestrator and its builder.
//!
//! Every operation follows the same shape:
//! 1. authorize the actor against the owning identity
//! 2. validate input
//! 3. check the transition with the guard
//! 4. recompute the content hash
//! 5. persist (one write batch when several entities change)
//! 6. append the audit event, anchored where the step is anchored
//!
//! Mutations of one order (and everything hanging off it) run under the
//! `order:<id>` lock; offers under `offer:<id>`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use market_adapters::{
    AcceptAllVerifier, AnchorAdapter, EscrowAdapter, NoopNotifier, PayloadStore,
    RevocationNotifier, SignatureVerifier, SimulatedEscrow,
};
use market_store::{KeyGuard, LedgerStore, open_store};
use market_types::{
    ActorId, EscrowMode, MarketConfig, MarketError, OfferId, OrderId, Result,
};

use crate::audit::AuditTrail;
use crate::revocation::RevocationQueue;

/// Settlement ledger for one marketplace deployment. Cheap to clone.
#[derive(Clone)]
pub struct Market {
    pub(crate) config: Arc<MarketConfig>,
    pub(crate) store: LedgerStore,
    pub(crate) audit: AuditTrail,
    pub(crate) revocations: RevocationQueue,
    pub(crate) escrow: Arc<dyn EscrowAdapter>,
    pub(crate) payloads: Option<Arc<dyn PayloadStore>>,
    pub(crate) verifier: Arc<dyn SignatureVerifier>,
}

impl Market {
    pub fn builder(config: MarketConfig) -> MarketBuilder {
        MarketBuilder::new(config)
    }

    /// Market with default collaborators and the configured store.
    pub async fn open(config: MarketConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    #[must_use]
    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    #[must_use]
    pub fn revocations(&self) -> &RevocationQueue {
        &self.revocations
    }

    // -----------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------

    /// The acting identity, or `MissingField` when one is required.
    pub(crate) fn require_actor<'a>(&self, actor: Option<&'a ActorId>) -> Result<Option<&'a ActorId>> {
        let actor = actor.filter(|a| !a.as_str().is_empty());
        if actor.is_none() && self.config.access.require_actor {
            return Err(MarketError::MissingField("actorId"));
        }
        Ok(actor)
    }

    /// With actor matching on, a present actor must equal `owner`.
    pub(crate) fn check_actor(
        &self,
        actor: Option<&ActorId>,
        owner: &ActorId,
        field: &'static str,
    ) -> Result<()> {
        self.check_any_actor(actor, &[owner], field)
    }

    /// With actor matching on, a present actor must equal one of `owners`.
    pub(crate) fn check_any_actor(
        &self,
        actor: Option<&ActorId>,
        owners: &[&ActorId],
        field: &'static str,
    ) -> Result<()> {
        match actor {
            Some(actor) if self.config.access.require_actor_match && !owners.contains(&actor) => {
                Err(MarketError::ActorMismatch(field))
            }
            _ => Ok(()),
        }
    }

    pub(crate) async fn lock_order(&self, order_id: OrderId) -> KeyGuard {
        self.store.lock(format!("order:{order_id}")).await
    }

    pub(crate) async fn lock_offer(&self, offer_id: OfferId) -> KeyGuard {
        self.store.lock(format!("offer:{offer_id}")).await
    }

    pub(crate) fn now() -> DateTime<Utc> {
        Utc::now()
    }
}

impl std::fmt::Debug for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Market")
            .field("store", &self.store)
            .field("escrow_mode", &self.config.settlement.mode)
            .field("credentials", &self.config.credentials.mode)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Market`] from configuration and collaborators.
///
/// Unset collaborators default to [`SimulatedEscrow`], [`NoopNotifier`] and
/// [`AcceptAllVerifier`]; no anchor and no payload store. The store is
/// opened from `config.store` unless one is supplied.
pub struct MarketBuilder {
    config: MarketConfig,
    store: Option<LedgerStore>,
    escrow: Option<Arc<dyn EscrowAdapter>>,
    anchor: Option<Arc<dyn AnchorAdapter>>,
    payloads: Option<Arc<dyn PayloadStore>>,
    notifier: Option<Arc<dyn RevocationNotifier>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl MarketBuilder {
    #[must_use]
    pub fn new(config: MarketConfig) -> Self {
        Self {
            config,
            store: None,
            escrow: None,
            anchor: None,
            payloads: None,
            notifier: None,
            verifier: None,
        }
    }

    #[must_use]
    pub fn store(mut self, store: LedgerStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Payment authority used when `settlement.mode` is `live`.
    #[must_use]
    pub fn escrow(mut self, escrow: Arc<dyn EscrowAdapter>) -> Self {
        self.escrow = Some(escrow);
        self
    }

    #[must_use]
    pub fn anchor(mut self, anchor: Arc<dyn AnchorAdapter>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    #[must_use]
    pub fn payload_store(mut self, payloads: Arc<dyn PayloadStore>) -> Self {
        self.payloads = Some(payloads);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn RevocationNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub async fn build(self) -> Result<Market> {
        self.config.validate()?;

        let escrow: Arc<dyn EscrowAdapter> = match (self.config.settlement.mode, self.escrow) {
            (EscrowMode::Live, Some(escrow)) => escrow,
            (EscrowMode::Live, None) => {
                return Err(MarketError::Configuration(
                    "settlement.mode is live but no escrow adapter was supplied".into(),
                ));
            }
            (EscrowMode::Simulated, supplied) => {
                if supplied.is_some() {
                    debug!("Escrow adapter ignored in simulated settlement mode");
                }
                Arc::new(SimulatedEscrow)
            }
        };

        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config.store).await?,
        };
        let audit = AuditTrail::new(store.clone(), self.anchor, self.config.anchor.clone());
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier));
        let revocations = RevocationQueue::new(
            store.clone(),
            audit.clone(),
            notifier,
            self.payloads.clone(),
            self.config.revocation.clone(),
        );

        info!(
            backend = ?store.kind(),
            escrow = ?self.config.settlement.mode,
            anchoring = audit.anchoring(),
            credentials = ?self.config.credentials.mode,
            "Market ready"
        );

        Ok(Market {
            config: Arc::new(self.config),
            store,
            audit,
            revocations,
            escrow,
            payloads: self.payloads,
            verifier: self.verifier.unwrap_or_else(|| Arc::new(AcceptAllVerifier)),
        })
    }
}
