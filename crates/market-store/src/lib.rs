//! # market-store
//!
//! **Ledger Store for the OpenMarket settlement ledger.**
//!
//! Persists every entity collection, the append-only audit log, and the
//! usage ledger behind one [`StoreBackend`] trait with two implementations:
//!
//! - [`DocumentBackend`]: one JSON document per collection plus JSONL logs.
//!   Writes are whole-file replace; multi-record batches are best-effort
//!   (snapshot and restore on failure).
//! - [`IndexedBackend`]: SQLite via `sqlx`, with `order_id`/`status` indexes
//!   and real transactions. A partial unique index enforces at most one
//!   non-refunded settlement per order.
//!
//! [`LedgerStore`] is the typed facade the lifecycle layer talks to. It
//! stages multi-record writes into a [`WriteBatch`] and hands out per-key
//! async locks so read-modify-write sequences on one order are serialized.
//!
//! [`open_store`] opens the configured backend and, for the indexed backend,
//! runs the one-time [`migrate`] from document data.

pub mod backend;
pub mod batch;
pub mod document;
pub mod indexed;
pub mod locks;
pub mod migrate;
pub mod record;
pub mod store;

pub use backend::StoreBackend;
pub use batch::{WriteBatch, WriteOp};
pub use document::DocumentBackend;
pub use indexed::IndexedBackend;
pub use locks::{KeyGuard, KeyedLocks};
pub use migrate::{MigrationReport, migrate};
pub use record::{Collection, Record, StoredRecord};
pub use store::{LedgerStore, open_store};
