//! Anomaly reporter.
//!
//! Submits reports to the registry and waits for inclusion. A per-wallet
//! in-flight flag enforces at most one PENDING/SUBMITTED report per wallet;
//! it is held from reservation until the report settles as CONFIRMED or
//! FAILED, including across the confirmation wait.

use alloy::primitives::Address;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info};

use crate::chain::AnomalyRegistry;
use crate::types::{AnomalyReport, GuardError, RiskAssessment};

type InFlightSet = Arc<Mutex<HashSet<Address>>>;

fn lock(set: &InFlightSet) -> MutexGuard<'_, HashSet<Address>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Proof that a wallet's in-flight slot is reserved. Dropping it releases
/// the slot.
#[derive(Debug)]
pub struct InFlightGuard {
    wallet: Address,
    in_flight: InFlightSet,
}

impl InFlightGuard {
    pub fn wallet(&self) -> Address {
        self.wallet
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.wallet);
    }
}

#[derive(Clone)]
pub struct AnomalyReporter {
    registry: Arc<dyn AnomalyRegistry>,
    in_flight: InFlightSet,
}

impl AnomalyReporter {
    pub fn new(registry: Arc<dyn AnomalyRegistry>) -> Self {
        Self {
            registry,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Reserve the wallet's in-flight slot, or fail with `AlreadyReporting`.
    pub fn reserve(&self, wallet: Address) -> Result<InFlightGuard, GuardError> {
        if !lock(&self.in_flight).insert(wallet) {
            return Err(GuardError::AlreadyReporting { wallet });
        }
        Ok(InFlightGuard {
            wallet,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, wallet: &Address) -> bool {
        lock(&self.in_flight).contains(wallet)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Reserve, submit and wait for confirmation in one call.
    pub async fn report(
        &self,
        wallet: Address,
        assessment: &RiskAssessment,
    ) -> Result<AnomalyReport, GuardError> {
        let guard = self.reserve(wallet)?;
        self.submit(guard, assessment).await
    }

    /// Submit under an already-reserved slot and wait for inclusion.
    ///
    /// Broadcast or confirmation failures mark the report FAILED, release the
    /// slot and surface as `Submission`. Nothing is retried here.
    pub async fn submit(
        &self,
        guard: InFlightGuard,
        assessment: &RiskAssessment,
    ) -> Result<AnomalyReport, GuardError> {
        let wallet = guard.wallet();
        let mut report = AnomalyReport::pending(wallet, assessment);

        info!(
            report_id = %report.id,
            wallet = %wallet,
            anomaly = %report.anomaly_type,
            risk_score = report.risk_score,
            "Reporting anomaly to registry"
        );

        let tx_hash = match self
            .registry
            .submit_report(wallet, report.anomaly_type, report.risk_score)
            .await
        {
            Ok(hash) => hash,
            Err(e) => {
                report.mark_failed();
                error!(report_id = %report.id, wallet = %wallet, state = %report.state, error = %e, "Broadcast failed");
                return Err(GuardError::Submission {
                    wallet,
                    message: format!("broadcast: {e}"),
                });
            }
        };

        report.mark_submitted(tx_hash);
        info!(report_id = %report.id, wallet = %wallet, tx_hash = %tx_hash, state = %report.state, "Report broadcast");

        if let Err(e) = self.registry.await_inclusion(tx_hash).await {
            report.mark_failed();
            error!(report_id = %report.id, wallet = %wallet, tx_hash = %tx_hash, state = %report.state, error = %e, "Confirmation failed");
            return Err(GuardError::Submission {
                wallet,
                message: format!("confirmation of {tx_hash}: {e}"),
            });
        }

        report.mark_confirmed();
        info!(report_id = %report.id, wallet = %wallet, tx_hash = %tx_hash, state = %report.state, "Report confirmed");
        drop(guard);
        Ok(report)
    }
}
