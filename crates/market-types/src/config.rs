//! Configuration types for the settlement ledger.
//!
//! Every section has a `Default`, so partial JSON documents are accepted:
//! missing sections and fields fall back to the values in [`crate::constants`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{MarketError, Result, constants};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub settlement: SettlementConfig,
    pub anchor: AnchorConfig,
    pub revocation: RevocationConfig,
    pub store: StoreConfig,
    pub access: AccessConfig,
    pub credentials: CredentialsConfig,
    pub logging: LoggingConfig,
}

impl MarketConfig {
    /// Parse from a JSON document and validate.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| MarketError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.revocation.max_attempts == 0 {
            return Err(MarketError::Configuration(
                "revocation.max_attempts must be at least 1".into(),
            ));
        }
        if self.settlement.escrow_timeout_ms == 0
            || self.anchor.timeout_ms == 0
            || self.revocation.timeout_ms == 0
        {
            return Err(MarketError::Configuration("timeouts must be non-zero".into()));
        }
        if self.store.data_dir.as_os_str().is_empty() {
            return Err(MarketError::Configuration("store.data_dir is empty".into()));
        }
        Ok(())
    }
}

/// Whether escrow calls reach a payment authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowMode {
    /// No external call; settlements carry no tx hash.
    #[default]
    Simulated,
    /// Calls the configured escrow adapter.
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub mode: EscrowMode,
    pub token_address: Option<String>,
    pub escrow_timeout_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            mode: EscrowMode::Simulated,
            token_address: None,
            escrow_timeout_ms: constants::DEFAULT_ESCROW_TIMEOUT_MS,
        }
    }
}

impl SettlementConfig {
    #[must_use]
    pub fn escrow_timeout(&self) -> Duration {
        Duration::from_millis(self.escrow_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: constants::DEFAULT_ANCHOR_TIMEOUT_MS,
        }
    }
}

impl AnchorConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry policy of the revocation queue. The delay is fixed, not exponential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_REVOCATION_MAX_ATTEMPTS,
            retry_delay_ms: constants::DEFAULT_REVOCATION_RETRY_DELAY_MS,
            timeout_ms: constants::DEFAULT_REVOCATION_TIMEOUT_MS,
        }
    }
}

impl RevocationConfig {
    #[must_use]
    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.retry_delay_ms).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which storage backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    /// One JSON document per collection plus JSONL logs.
    #[default]
    Document,
    /// SQLite with secondary indexes and real transactions.
    Indexed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/market.db`.
    pub db_path: Option<PathBuf>,
    /// Copy document-store data into an empty indexed store on open.
    pub migrate_from_document: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Document,
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
            db_path: None,
            migrate_from_document: true,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(constants::DEFAULT_DB_FILE))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Reject operations that carry no actor.
    pub require_actor: bool,
    /// Require the actor to equal the owning identity of the entity.
    pub require_actor_match: bool,
}

/// Where delivery payloads live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsMode {
    #[default]
    Inline,
    /// Kept in the payload store; the delivery record holds a reference.
    External,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub mode: CredentialsMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = MarketConfig::default();
        assert_eq!(cfg.revocation.max_attempts, 3);
        assert_eq!(cfg.revocation.retry_delay_ms, 60_000);
        assert_eq!(cfg.revocation.timeout_ms, 8_000);
        assert_eq!(cfg.settlement.mode, EscrowMode::Simulated);
        assert!(!cfg.anchor.enabled);
        assert!(!cfg.access.require_actor_match);
        assert!(cfg.store.migrate_from_document);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = MarketConfig::from_json_str(
            r#"{"store": {"backend": "indexed", "data_dir": "/tmp/m"}, "revocation": {"max_attempts": 5}}"#,
        )
        .unwrap();
        assert_eq!(cfg.store.backend, StoreBackendKind::Indexed);
        assert_eq!(cfg.store.resolved_db_path(), PathBuf::from("/tmp/m/market.db"));
        assert_eq!(cfg.revocation.max_attempts, 5);
        assert_eq!(cfg.revocation.retry_delay_ms, 60_000);
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = MarketConfig::from_json_str(r#"{"revocation": {"max_attempts": 0}}"#).unwrap_err();
        assert!(err.to_string().starts_with("MK_ERR_902"), "Got: {err}");
    }

    #[test]
    fn unknown_mode_rejected() {
        assert!(MarketConfig::from_json_str(r#"{"settlement": {"mode": "contract"}}"#).is_err());
    }

    #[test]
    fn retry_delay_converts() {
        let cfg = RevocationConfig::default();
        assert_eq!(cfg.retry_delay(), chrono::Duration::seconds(60));
    }
}
