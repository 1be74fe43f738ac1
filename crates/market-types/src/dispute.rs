//! Dispute model: adjudication that can override the normal settlement flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    ActorId, ContentHash, DisputeId, EvidenceId, MarketError, OrderId, Result, hash_canonical,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisputeStatus {
    #[serde(rename = "dispute_opened")]
    Opened,
    #[serde(rename = "dispute_evidence_submitted")]
    EvidenceSubmitted,
    #[serde(rename = "dispute_resolved")]
    Resolved,
    #[serde(rename = "dispute_rejected")]
    Rejected,
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "dispute_opened"),
            Self::EvidenceSubmitted => write!(f, "dispute_evidence_submitted"),
            Self::Resolved => write!(f, "dispute_resolved"),
            Self::Rejected => write!(f, "dispute_rejected"),
        }
    }
}

/// Outcome of a resolved dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeResolution {
    /// Pay the seller in full.
    Release,
    /// Return the escrowed funds to the buyer.
    Refund,
    /// Split the funds between the payees given at resolution time.
    Partial,
}

impl std::fmt::Display for DisputeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Release => write!(f, "release"),
            Self::Refund => write!(f, "refund"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeEvidence {
    pub evidence_id: EvidenceId,
    pub actor_id: ActorId,
    pub summary: String,
    /// Content identifier of off-ledger evidence material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub hash: ContentHash,
    pub submitted_at: DateTime<Utc>,
}

impl DisputeEvidence {
    pub fn new(
        dispute_id: DisputeId,
        actor_id: ActorId,
        summary: &str,
        cid: Option<String>,
    ) -> Result<Self> {
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(MarketError::MissingField("evidence.summary"));
        }
        let submitted_at = Utc::now();
        let hash = hash_canonical(&json!({
            "dispute_id": dispute_id,
            "actor_id": actor_id,
            "summary": summary,
            "cid": cid,
            "submitted_at": submitted_at,
        }))?;
        Ok(Self {
            evidence_id: EvidenceId::new(),
            actor_id,
            summary: summary.to_string(),
            cid,
            hash,
            submitted_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub dispute_id: DisputeId,
    pub order_id: OrderId,
    pub initiator_actor_id: ActorId,
    pub respondent_actor_id: ActorId,
    pub reason: String,
    pub status: DisputeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<DisputeResolution>,
    #[serde(default)]
    pub evidence: Vec<DisputeEvidence>,
    pub dispute_hash: ContentHash,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Dispute {
    pub fn compute_hash(&self) -> Result<ContentHash> {
        hash_canonical(&json!({
            "dispute_id": self.dispute_id,
            "order_id": self.order_id,
            "initiator_actor_id": self.initiator_actor_id,
            "respondent_actor_id": self.respondent_actor_id,
            "reason": self.reason,
            "status": self.status,
            "resolution": self.resolution,
            "opened_at": self.opened_at,
            "resolved_at": self.resolved_at,
        }))
    }

    /// Neither resolved nor rejected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self.status, DisputeStatus::Resolved | DisputeStatus::Rejected)
    }

    /// Buyer or seller of the disputed order.
    #[must_use]
    pub fn is_party(&self, actor: &ActorId) -> bool {
        &self.initiator_actor_id == actor || &self.respondent_actor_id == actor
    }

    #[must_use]
    pub fn anchor_id(&self) -> String {
        format!("dispute:{}", self.dispute_id)
    }
}

/// Filter for dispute listings.
#[derive(Debug, Clone, Default)]
pub struct DisputeFilter {
    pub order_id: Option<OrderId>,
    pub status: Option<DisputeStatus>,
}

impl DisputeFilter {
    #[must_use]
    pub fn matches(&self, dispute: &Dispute) -> bool {
        self.order_id.is_none_or(|id| id == dispute.order_id)
            && self.status.is_none_or(|s| s == dispute.status)
    }
}
