//! Error types for the market settlement ledger.
//!
//! All errors use the `MK_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by kind:
//! - 1xx: Invalid argument (malformed or missing input)
//! - 2xx: Invalid transition (guard rejection)
//! - 3xx: Not found
//! - 4xx: Conflict (duplicates, actor mismatch)
//! - 5xx: Unavailable (disabled by configuration)
//! - 6xx: External failure (escrow, anchor, notifier, payload store)
//! - 9xx: Internal (storage, serialization, I/O)

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EntityKind, OrderId};

/// Central error enum for all ledger operations.
#[derive(Debug, Error)]
pub enum MarketError {
    // =================================================================
    // Invalid Argument (1xx)
    // =================================================================
    /// Input failed validation.
    #[error("MK_ERR_100: Invalid argument: {0}")]
    InvalidArgument(String),

    /// A required field was missing or blank.
    #[error("MK_ERR_101: {0} is required")]
    MissingField(&'static str),

    /// An amount or quantity was zero or negative.
    #[error("MK_ERR_102: {0} must be greater than 0")]
    NonPositive(&'static str),

    /// A consent scope is not contained in the offer's usage scope.
    #[error("MK_ERR_103: Consent scope outside offer usage scope: {0}")]
    ScopeViolation(String),

    /// The value cannot be represented in canonical form.
    #[error("MK_ERR_104: Cannot canonicalize value: {0}")]
    Canonicalization(String),

    /// The consent signature did not verify.
    #[error("MK_ERR_105: Signature verification failed")]
    InvalidSignature,

    // =================================================================
    // Invalid Transition (2xx)
    // =================================================================
    /// The requested status change is not in the allowed successor set.
    #[error("MK_ERR_200: Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: EntityKind,
        from: String,
        to: String,
    },

    /// The entity is in a terminal state and accepts no further changes.
    #[error("MK_ERR_201: {entity} is closed: {reason}")]
    Closed { entity: EntityKind, reason: String },

    // =================================================================
    // Not Found (3xx)
    // =================================================================
    /// A referenced entity does not exist.
    #[error("MK_ERR_300: {entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    // =================================================================
    // Conflict (4xx)
    // =================================================================
    /// A non-refunded settlement already exists for the order.
    #[error("MK_ERR_400: Settlement already exists for order {0}")]
    SettlementExists(OrderId),

    /// The order already has a dispute that is not resolved or rejected.
    #[error("MK_ERR_401: Open dispute already exists for order {0}")]
    DisputeAlreadyOpen(OrderId),

    /// The acting identity does not own the entity.
    #[error("MK_ERR_402: actorId does not match {0}")]
    ActorMismatch(&'static str),

    /// A uniqueness constraint in storage was violated.
    #[error("MK_ERR_403: Conflict: {0}")]
    Conflict(String),

    // =================================================================
    // Unavailable (5xx)
    // =================================================================
    /// The feature is disabled or its collaborator is not configured.
    #[error("MK_ERR_500: Unavailable: {0}")]
    Unavailable(String),

    // =================================================================
    // External Failure (6xx)
    // =================================================================
    /// The escrow authority rejected or failed a lock/release/refund.
    #[error("MK_ERR_600: Escrow call failed: {0}")]
    EscrowFailed(String),

    /// The anchoring service failed. Never fatal to a lifecycle operation.
    #[error("MK_ERR_601: Anchor call failed: {0}")]
    AnchorFailed(String),

    /// The revocation notifier failed.
    #[error("MK_ERR_602: Revocation notifier failed: {0}")]
    NotifierFailed(String),

    /// The out-of-band payload store failed.
    #[error("MK_ERR_603: Payload store failed: {0}")]
    PayloadStoreFailed(String),

    /// An external call did not complete within its bound.
    #[error("MK_ERR_604: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // =================================================================
    // Internal (9xx)
    // =================================================================
    /// Storage backend failure.
    #[error("MK_ERR_900: Storage error: {0}")]
    Storage(String),

    /// Serialization / deserialization error.
    #[error("MK_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid values, missing collaborator).
    #[error("MK_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk).
    #[error("MK_ERR_903: I/O error: {0}")]
    Io(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, MarketError>;

/// Stable error kinds reported across the component boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    InvalidTransition,
    NotFound,
    Conflict,
    Unavailable,
    ExternalFailure,
    Internal,
}

/// Structured error body: stable kind, stable code, human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl MarketError {
    /// Taxonomy kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::MissingField(_)
            | Self::NonPositive(_)
            | Self::ScopeViolation(_)
            | Self::Canonicalization(_)
            | Self::InvalidSignature => ErrorKind::InvalidArgument,
            Self::InvalidTransition { .. } | Self::Closed { .. } => ErrorKind::InvalidTransition,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::SettlementExists(_)
            | Self::DisputeAlreadyOpen(_)
            | Self::ActorMismatch(_)
            | Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::EscrowFailed(_)
            | Self::AnchorFailed(_)
            | Self::NotifierFailed(_)
            | Self::PayloadStoreFailed(_)
            | Self::Timeout { .. } => ErrorKind::ExternalFailure,
            Self::Storage(_) | Self::Serialization(_) | Self::Configuration(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// The `MK_ERR_nnn` code at the head of the message.
    #[must_use]
    pub fn code(&self) -> String {
        let msg = self.to_string();
        msg.split(':').next().unwrap_or_default().to_string()
    }

    /// Shorthand for [`MarketError::NotFound`].
    pub fn not_found(entity: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Structured form for callers across the component boundary.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind(),
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl From<std::io::Error> for MarketError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = MarketError::not_found(EntityKind::Order, OrderId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("MK_ERR_300"), "Got: {msg}");
        assert!(msg.contains("order not found"));
    }

    #[test]
    fn invalid_transition_display() {
        let err = MarketError::InvalidTransition {
            entity: EntityKind::Offer,
            from: "offer_closed".into(),
            to: "offer_published".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("MK_ERR_200"));
        assert!(msg.contains("offer_closed -> offer_published"));
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(MarketError::MissingField("price").kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            MarketError::SettlementExists(OrderId::new()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(MarketError::ActorMismatch("buyerId").kind(), ErrorKind::Conflict);
        assert_eq!(
            MarketError::Timeout {
                operation: "escrow.lock".into(),
                timeout_ms: 10
            }
            .kind(),
            ErrorKind::ExternalFailure
        );
        assert_eq!(MarketError::Storage("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn response_is_structured() {
        let resp = MarketError::Unavailable("payload store".into()).to_response();
        assert_eq!(resp.kind, ErrorKind::Unavailable);
        assert_eq!(resp.code, "MK_ERR_500");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["kind"], "unavailable");
    }

    #[test]
    fn all_errors_have_mk_err_prefix() {
        let errors: Vec<MarketError> = vec![
            MarketError::InvalidSignature,
            MarketError::NonPositive("quantity"),
            MarketError::Conflict("dup".into()),
            MarketError::AnchorFailed("down".into()),
            MarketError::Io("disk".into()),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(msg.starts_with("MK_ERR_"), "Error missing MK_ERR_ prefix: {msg}");
            assert_eq!(err.code().len(), "MK_ERR_000".len());
        }
    }
}
