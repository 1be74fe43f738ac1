//! System-wide constants for the market settlement ledger.

/// Prefix of every [`ContentHash`](crate::ContentHash) string (scheme marker).
pub const HASH_PREFIX: &str = "0x";

/// Default number of delivery revocation attempts before a job is failed.
pub const DEFAULT_REVOCATION_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between revocation attempts, in milliseconds.
pub const DEFAULT_REVOCATION_RETRY_DELAY_MS: u64 = 60_000;

/// Default timeout for a single revocation notifier call, in milliseconds.
pub const DEFAULT_REVOCATION_TIMEOUT_MS: u64 = 8_000;

/// Default timeout for escrow lock/release/refund calls, in milliseconds.
pub const DEFAULT_ESCROW_TIMEOUT_MS: u64 = 15_000;

/// Default timeout for anchor submissions, in milliseconds.
pub const DEFAULT_ANCHOR_TIMEOUT_MS: u64 = 5_000;

/// Default number of audit events returned by `read_audit_events`.
pub const DEFAULT_AUDIT_LIMIT: usize = 100;

/// Default data directory for the document backend.
pub const DEFAULT_DATA_DIR: &str = "market-data";

/// File name of the indexed backend database inside the data directory.
pub const DEFAULT_DB_FILE: &str = "market.db";

/// Upper bound on the serialized size of an opaque metadata blob.
pub const MAX_OPAQUE_BLOB_BYTES: usize = 16 * 1024;

/// Reason recorded when a delivery is revoked without an explicit reason.
pub const MANUAL_REVOKE_REASON: &str = "manual_revoke";

/// Reason recorded on deliveries revoked by a consent revocation cascade.
pub const CONSENT_REVOKED_REASON: &str = "consent_revoked";

/// Default order quantity when none is supplied.
pub const DEFAULT_ORDER_QUANTITY: u64 = 1;
