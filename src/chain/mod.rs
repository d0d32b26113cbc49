//! Chain access.
//!
//! Two seams: `ChainState` for balance reads and `AnomalyRegistry` for the
//! on-chain registry. The agent only depends on these traits; `rpc` holds
//! the alloy JSON-RPC implementation.

pub mod rpc;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use crate::types::{AnomalyType, GuardError, WalletStatus};

/// Read access to native balances.
#[async_trait]
pub trait ChainState: Send + Sync {
    /// Current native balance of `address` in wei.
    async fn balance_of(&self, address: Address) -> Result<U256, GuardError>;
}

/// The external anomaly registry contract.
#[async_trait]
pub trait AnomalyRegistry: Send + Sync {
    /// Broadcast `reportAnomaly(wallet, anomalyType, riskScore)` signed by the
    /// agent. Returns once the node has accepted the transaction.
    async fn submit_report(
        &self,
        wallet: Address,
        anomaly_type: AnomalyType,
        risk_score: u8,
    ) -> Result<TxHash, GuardError>;

    /// Wait until `tx_hash` is included and successful. Bounded only by the
    /// transport's own timeout.
    async fn await_inclusion(&self, tx_hash: TxHash) -> Result<(), GuardError>;

    /// Read `getWalletStatus(wallet)`.
    async fn wallet_status(&self, wallet: Address) -> Result<WalletStatus, GuardError>;
}
