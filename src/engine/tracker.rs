//! Balance tracker.
//!
//! Owns nothing global: the wallet table is an explicit value handed to the
//! scheduler, and the tracker only reads the chain and updates the wallet
//! it is given.

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use tracing::debug;

use crate::chain::ChainState;
use crate::engine::clock::Clock;
use crate::types::{BalanceDelta, GuardError, MonitoredWallet};

// ---------------------------------------------------------------------------
// Wallet table
// ---------------------------------------------------------------------------

/// The configured wallets, in configuration order. Fixed for the process
/// lifetime: wallets are never added or removed during a run.
#[derive(Debug, Clone, Default)]
pub struct WalletTable {
    wallets: Vec<MonitoredWallet>,
}

impl WalletTable {
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            wallets: addresses.into_iter().map(MonitoredWallet::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn get(&self, address: &Address) -> Option<&MonitoredWallet> {
        self.wallets.iter().find(|w| &w.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MonitoredWallet> {
        self.wallets.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MonitoredWallet> {
        self.wallets.iter_mut()
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct BalanceTracker {
    chain: Arc<dyn ChainState>,
    clock: Arc<dyn Clock>,
    epsilon_wei: U256,
}

impl BalanceTracker {
    pub fn new(chain: Arc<dyn ChainState>, clock: Arc<dyn Clock>, epsilon_wei: U256) -> Self {
        Self {
            chain,
            clock,
            epsilon_wei,
        }
    }

    /// Read the wallet's balance and compute the change since the last read.
    ///
    /// The stored balance and check time are updated on every successful
    /// read, significant or not. The first read seeds the stored balance, so
    /// it always yields a zero delta. A failed read leaves the wallet
    /// untouched.
    pub async fn observe(&self, wallet: &mut MonitoredWallet) -> Result<BalanceDelta, GuardError> {
        let current = self.chain.balance_of(wallet.address).await?;
        let previous = wallet.last_balance.unwrap_or(current);

        wallet.last_balance = Some(current);
        wallet.last_checked_at = Some(self.clock.now());

        let delta = BalanceDelta {
            wallet: wallet.address,
            previous,
            current,
        };
        debug!(wallet = %wallet.address, balance = %current, delta = %delta, "Balance observed");
        Ok(delta)
    }

    pub fn is_significant(&self, delta: &BalanceDelta) -> bool {
        delta.is_significant(self.epsilon_wei)
    }

    pub fn epsilon_wei(&self) -> U256 {
        self.epsilon_wei
    }
}
