//! # market-adapters
//!
//! **Contracts of the external collaborators the ledger calls out to.**
//!
//! The ledger never talks to a payment rail, a public ledger, or a provider
//! directly. It goes through these traits, used as `Arc<dyn Trait>`:
//!
//! - [`EscrowAdapter`]: lock / release / refund funds against an order hash
//! - [`AnchorAdapter`]: best-effort publication of a content hash
//! - [`PayloadStore`]: out-of-band storage of sensitive delivery payloads
//! - [`RevocationNotifier`]: "stop serving this delivery" side effect
//! - [`SignatureVerifier`]: consent signature check
//!
//! Every async call is wrapped in [`bounded`] by the caller so no operation
//! blocks indefinitely.

pub mod anchor;
pub mod escrow;
pub mod notifier;
pub mod payload;
pub mod signature;
pub mod timeout;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use anchor::{AnchorAdapter, AnchorReceipt};
pub use escrow::{EscrowAdapter, SimulatedEscrow, TxHash};
pub use notifier::{NoopNotifier, RevocationContext, RevocationNotifier, RevocationOutcome};
pub use payload::{MemoryPayloadStore, PayloadStore};
pub use signature::{AcceptAllVerifier, Ed25519Verifier, SignatureVerifier};
pub use timeout::bounded;
