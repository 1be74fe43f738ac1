//! # market-types
//!
//! Shared types, errors, and configuration for the **OpenMarket** settlement
//! ledger.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`OfferId`], [`OrderId`], [`ConsentId`], [`DeliveryId`],
//!   [`SettlementId`], [`DisputeId`], [`JobId`], [`EventId`], [`LedgerId`], [`ActorId`]
//! - **Entities**: [`Offer`], [`Order`], [`Consent`], [`Delivery`], [`Settlement`],
//!   [`Dispute`], [`RevocationJob`], [`AuditEvent`], [`UsageEntry`]
//! - **Transition Guard**: the [`Lifecycle`] trait and [`assert_transition`]
//! - **Canonicalizer**: [`canonicalize`], [`hash_canonical`], [`ContentHash`]
//! - **Configuration**: [`MarketConfig`] and its sections
//! - **Errors**: [`MarketError`] with `MK_ERR_` prefix codes and [`ErrorKind`]
//! - **Constants**: defaults and limits

pub mod audit;
pub mod canonical;
pub mod config;
pub mod consent;
pub mod constants;
pub mod delivery;
pub mod dispute;
pub mod error;
pub mod ids;
pub mod offer;
pub mod order;
pub mod revocation;
pub mod settlement;
pub mod transition;
pub mod usage;

// Re-export all primary types at crate root for ergonomic imports:
//   use market_types::{Offer, Order, OrderStatus, MarketError, ...};

pub use audit::*;
pub use canonical::*;
pub use config::*;
pub use consent::*;
pub use delivery::*;
pub use dispute::*;
pub use error::*;
pub use ids::*;
pub use offer::*;
pub use order::*;
pub use revocation::*;
pub use settlement::*;
pub use transition::*;
pub use usage::*;

// Constants are accessed via `market_types::constants::FOO`
// (not re-exported to avoid name collisions).
