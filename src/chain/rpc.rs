//! Alloy JSON-RPC implementation of the chain seams.
//!
//! One HTTP provider carries the agent's signing key, so balance reads and
//! registry writes share a connection.

use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AnomalyRegistry, ChainState};
use crate::config::{ChainSettings, ENV_PRIVATE_KEY, ENV_RPC_URL};
use crate::types::{AnomalyType, GuardError, WalletStatus};

// Registry ABI. Only the agent's write path and the status read are bound.
sol! {
    #[sol(rpc)]
    contract GuardianRegistry {
        function reportAnomaly(address wallet, uint256 anomalyType, uint256 riskScore) external;
        function getWalletStatus(address wallet) external view returns (
            bool isFrozen,
            uint256 frozenAt,
            uint256 lastCheck,
            uint256 highestRisk,
            uint8 recoveryStatus,
            uint256 approvalCount,
            uint256 requiredCount
        );
    }
}

pub struct RpcChain {
    provider: DynProvider,
    registry: Address,
    agent: Address,
    settings: ChainSettings,
}

impl RpcChain {
    /// Build a signing HTTP provider. Fails with `Configuration` on a bad
    /// key or URL; no network traffic happens here.
    pub fn connect(
        rpc_url: &str,
        private_key: &SecretString,
        registry: Address,
        settings: ChainSettings,
    ) -> Result<Self, GuardError> {
        let signer: PrivateKeySigner = private_key
            .expose_secret()
            .parse()
            .map_err(|e| GuardError::Configuration(format!("invalid {ENV_PRIVATE_KEY}: {e}")))?;
        let agent = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url.parse().map_err(|e| {
                GuardError::Configuration(format!("invalid {ENV_RPC_URL} {rpc_url}: {e}"))
            })?)
            .erased();

        Ok(Self {
            provider,
            registry,
            agent,
            settings,
        })
    }

    /// Address derived from the agent's signing key.
    pub fn agent_address(&self) -> Address {
        self.agent
    }

    fn contract(&self) -> GuardianRegistry::GuardianRegistryInstance<DynProvider> {
        GuardianRegistry::new(self.registry, self.provider.clone())
    }

    /// Poll for a successful receipt `confirmations` blocks deep.
    async fn poll_receipt(&self, tx_hash: TxHash) -> Result<(), GuardError> {
        let poll = Duration::from_millis(self.settings.receipt_poll_ms);
        let confirmations = self.settings.confirmations.max(1);

        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if !receipt.status() {
                        return Err(GuardError::Provider(format!("transaction {tx_hash} reverted")));
                    }
                    let Some(included) = receipt.block_number() else {
                        tokio::time::sleep(poll).await;
                        continue;
                    };
                    if confirmations == 1 {
                        return Ok(());
                    }
                    match self.provider.get_block_number().await {
                        Ok(head) if head + 1 >= included + confirmations => return Ok(()),
                        Ok(head) => debug!(%tx_hash, head, included, "Waiting for confirmations"),
                        Err(e) => warn!(%tx_hash, error = %e, "Block number lookup failed"),
                    }
                }
                Ok(None) => debug!(%tx_hash, "Receipt not yet available"),
                Err(e) => warn!(%tx_hash, error = %e, "Receipt lookup failed, will retry"),
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[async_trait]
impl ChainState for RpcChain {
    async fn balance_of(&self, address: Address) -> Result<U256, GuardError> {
        let provider = &self.provider;
        retry_rpc(self.settings.read_retries, move || async move {
            provider.get_balance(address).await
        })
        .await
    }
}

#[async_trait]
impl AnomalyRegistry for RpcChain {
    async fn submit_report(
        &self,
        wallet: Address,
        anomaly_type: AnomalyType,
        risk_score: u8,
    ) -> Result<TxHash, GuardError> {
        let pending = self
            .contract()
            .reportAnomaly(
                wallet,
                U256::from(anomaly_type.code()),
                U256::from(risk_score),
            )
            .send()
            .await
            .map_err(|e| GuardError::Provider(format!("reportAnomaly broadcast failed: {e}")))?;
        Ok(*pending.tx_hash())
    }

    async fn await_inclusion(&self, tx_hash: TxHash) -> Result<(), GuardError> {
        let timeout = Duration::from_secs(self.settings.confirmation_timeout_secs);
        tokio::time::timeout(timeout, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| {
                GuardError::Provider(format!(
                    "transaction {tx_hash} not confirmed within {}s",
                    timeout.as_secs()
                ))
            })?
    }

    async fn wallet_status(&self, wallet: Address) -> Result<WalletStatus, GuardError> {
        let status = self
            .contract()
            .getWalletStatus(wallet)
            .call()
            .await
            .map_err(|e| GuardError::Provider(format!("getWalletStatus failed: {e}")))?;
        Ok(WalletStatus {
            is_frozen: status.isFrozen,
            frozen_at: status.frozenAt,
            last_check: status.lastCheck,
            highest_risk: status.highestRisk,
            recovery_status: status.recoveryStatus,
            approval_count: status.approvalCount,
            required_count: status.requiredCount,
        })
    }
}

/// Retry an RPC call with exponential backoff, `retries` extra attempts.
pub async fn retry_rpc<F, Fut, T, E>(retries: u32, mut f: F) -> Result<T, GuardError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = Duration::from_millis(500);

    for attempt in 0..retries {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                warn!(
                    attempt = attempt + 1,
                    retries,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "RPC call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }

    f().await
        .map_err(|e| GuardError::Provider(format!("RPC call failed after {retries} retries: {e}")))
}
