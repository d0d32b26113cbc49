//! Canned balance deltas pushed through assessment and reporting.
//!
//! Exercises the engine and the registry end to end without polling: each
//! scenario is assessed once, and only scenarios that clear the threshold
//! are reported.

use alloy::primitives::{address, Address, U256};
use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::AnomalyRegistry;
use crate::engine::assessor::RiskEngine;
use crate::engine::reporter::AnomalyReporter;
use crate::types::{AnomalyReport, BalanceDelta, GuardError, MonitoredWallet, RiskAssessment, WalletStatus};

const ETHER: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub wallet: Address,
    pub previous: U256,
    pub current: U256,
}

impl Scenario {
    pub fn delta(&self) -> BalanceDelta {
        BalanceDelta {
            wallet: self.wallet,
            previous: self.previous,
            current: self.current,
        }
    }
}

/// Three outflows from a 10 ETH balance: 0.05, 1.5 and 8.2 ETH.
pub fn canned_scenarios() -> Vec<Scenario> {
    let start = U256::from(10 * ETHER);
    let outflow = |wei: u128| start - U256::from(wei);
    vec![
        Scenario {
            name: "Normal",
            wallet: address!("742d35Cc6634C0532925a3b844Bc9e7595f0bB12"),
            previous: start,
            current: outflow(5 * ETHER / 100),
        },
        Scenario {
            name: "Suspicious",
            wallet: address!("8ba1f109551bD432803012645Ac136ddd64DBA72"),
            previous: start,
            current: outflow(15 * ETHER / 10),
        },
        Scenario {
            name: "Critical drain",
            wallet: address!("9965507D1a55bcC2695C58ba16FB37d819B0A4dc"),
            previous: start,
            current: outflow(82 * ETHER / 10),
        },
    ]
}

/// What happened to one scenario.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub assessment: RiskAssessment,
    /// `None` when the assessment stayed below the threshold.
    pub report: Option<Result<AnomalyReport, GuardError>>,
    /// Registry status read after a confirmed report.
    pub status: Option<Result<WalletStatus, GuardError>>,
}

pub async fn run_scenarios(
    engine: &RiskEngine,
    registry: Arc<dyn AnomalyRegistry>,
    scenarios: Vec<Scenario>,
    threshold: u8,
) -> Vec<ScenarioOutcome> {
    let reporter = AnomalyReporter::new(registry.clone());
    let mut outcomes = Vec::with_capacity(scenarios.len());

    for scenario in scenarios {
        let wallet = MonitoredWallet::new(scenario.wallet);
        let assessment = engine.assess(&wallet, &scenario.delta()).await;

        if !assessment.warrants_report(threshold) {
            info!(scenario = scenario.name, risk_score = assessment.risk_score, "Below threshold, not reported");
            outcomes.push(ScenarioOutcome {
                scenario,
                assessment,
                report: None,
                status: None,
            });
            continue;
        }

        let report = reporter.report(scenario.wallet, &assessment).await;
        let status = match &report {
            Ok(_) => Some(registry.wallet_status(scenario.wallet).await),
            Err(e) => {
                warn!(scenario = scenario.name, kind = e.kind(), error = %e, "Scenario report failed");
                None
            }
        };
        outcomes.push(ScenarioOutcome {
            scenario,
            assessment,
            report: Some(report),
            status,
        });
    }

    outcomes
}
