//! # market-lifecycle
//!
//! **Lifecycle orchestrator** for the OpenMarket settlement ledger.
//!
//! [`Market`] drives a resource sale through its states:
//!
//! ```text
//! offer ─► order ─► payment_locked ─► consent_granted ─► delivery_ready
//!                                                          │
//!            settlement_completed ◄── delivery_completed ◄─┘
//! ```
//!
//! plus the repair paths around it: refunds, consent revocation with
//! per-delivery notifier calls, disputes, and the revocation retry queue.
//!
//! ## Architecture
//!
//! - [`AuditTrail`]: appends audit events with strictly increasing
//!   timestamps and anchors content hashes on a best-effort basis
//! - [`RevocationQueue`]: retry jobs for failed revocation notifications,
//!   processed by [`Market::sweep_revocations`]
//! - [`Market`]: one method per lifecycle operation, each running under a
//!   per-order lock and persisting through `market-store`
//!
//! Escrow failures abort the operation. Anchor failures are recorded in the
//! audit event. Notifier failures become retry jobs.

pub mod audit;
pub mod consent;
pub mod delivery;
pub mod dispute;
pub mod market;
pub mod offers;
pub mod orders;
pub mod queries;
pub mod revocation;
pub mod settlement;
pub mod telemetry;
pub mod usage;

pub use audit::{AuditEntry, AuditTrail};
pub use consent::{ConsentRevocation, GrantConsent, RevokeConsent};
pub use delivery::{DeliveryFailure, DeliveryRevocation, IssueDelivery, RevokeDelivery};
pub use dispute::{DisputeRef, OpenDispute, ResolveDispute, ResolvedDispute, SubmitEvidence};
pub use market::{Market, MarketBuilder};
pub use offers::{CreateOffer, UpdateOffer};
pub use orders::CreateOrder;
pub use revocation::{RevocationQueue, SweepReport};
pub use settlement::{LockPayment, RefundPayment, ReleasePayment, SettlementRef};
pub use telemetry::init_tracing;
