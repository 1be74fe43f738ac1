//! Anchoring service contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use market_types::{ContentHash, Result};

/// Proof that a hash was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub tx: String,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
}

/// Publishes `(anchor_id, hash)` to an external, publicly verifiable ledger.
/// Best-effort: callers record failures, they never abort on them.
#[async_trait]
pub trait AnchorAdapter: Send + Sync {
    async fn anchor_hash(&self, anchor_id: &str, hash: &ContentHash) -> Result<AnchorReceipt>;
}
