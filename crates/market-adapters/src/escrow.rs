//! Escrow authority contract.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use market_types::{ActorId, ContentHash, Payee, Result};

/// Transaction reference returned by a payment authority.
pub type TxHash = String;

/// Lock, release and refund of funds held against an order.
///
/// Calls are keyed by the order hash. Implementations return `None` when
/// no on-chain transaction backs the call.
#[async_trait]
pub trait EscrowAdapter: Send + Sync {
    async fn lock(
        &self,
        order_hash: &ContentHash,
        payer: &ActorId,
        amount: Decimal,
    ) -> Result<Option<TxHash>>;

    async fn release(&self, order_hash: &ContentHash, payees: &[Payee]) -> Result<Option<TxHash>>;

    async fn refund(&self, order_hash: &ContentHash, payer: &ActorId) -> Result<Option<TxHash>>;
}

/// No external call. Every operation succeeds without a tx hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedEscrow;

#[async_trait]
impl EscrowAdapter for SimulatedEscrow {
    async fn lock(
        &self,
        order_hash: &ContentHash,
        payer: &ActorId,
        amount: Decimal,
    ) -> Result<Option<TxHash>> {
        debug!(order_hash = %order_hash, payer = %payer, amount = %amount, "Simulated escrow lock");
        Ok(None)
    }

    async fn release(&self, order_hash: &ContentHash, payees: &[Payee]) -> Result<Option<TxHash>> {
        debug!(order_hash = %order_hash, payees = payees.len(), "Simulated escrow release");
        Ok(None)
    }

    async fn refund(&self, order_hash: &ContentHash, payer: &ActorId) -> Result<Option<TxHash>> {
        debug!(order_hash = %order_hash, payer = %payer, "Simulated escrow refund");
        Ok(None)
    }
}
