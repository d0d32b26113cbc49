//! Poll scheduler.
//!
//! Drives the observe → assess → report pipeline over every monitored
//! wallet once per cycle, then sleeps a fixed interval. Errors are scoped to
//! the wallet that raised them. Escalations run as detached tasks so a
//! confirmation wait never holds up other wallets or the next cycle; the
//! reporter's in-flight guard keeps them from overlapping per wallet.

use alloy::primitives::Address;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::engine::assessor::RiskEngine;
use crate::engine::clock::Clock;
use crate::engine::reporter::AnomalyReporter;
use crate::engine::tracker::{BalanceTracker, WalletTable};
use crate::types::{AnomalyReport, CycleReport, GuardError, MonitoredWallet, RiskAssessment};

type EscalationResult = (Address, Result<AnomalyReport, GuardError>);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub interval: Duration,
    /// Minimum risk score (inclusive) that triggers a report.
    pub report_threshold: u8,
    /// Wallets processed in parallel within one cycle.
    pub concurrency: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            report_threshold: 50,
            concurrency: 4,
        }
    }
}

/// What one wallet's pass through the pipeline produced.
#[derive(Debug)]
enum WalletOutcome {
    /// Delta below the noise floor (or the seeding read).
    Quiet,
    /// Assessed, below the report threshold.
    Assessed(RiskAssessment),
    /// Assessed at or above the report threshold.
    Escalate(RiskAssessment),
    Failed(GuardError),
}

pub struct PollScheduler {
    wallets: WalletTable,
    tracker: BalanceTracker,
    engine: RiskEngine,
    reporter: AnomalyReporter,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
    escalations: JoinSet<EscalationResult>,
    cycles: u64,
}

impl PollScheduler {
    pub fn new(
        wallets: WalletTable,
        tracker: BalanceTracker,
        engine: RiskEngine,
        reporter: AnomalyReporter,
        clock: Arc<dyn Clock>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            wallets,
            tracker,
            engine,
            reporter,
            clock,
            options,
            escalations: JoinSet::new(),
            cycles: 0,
        }
    }

    pub fn wallets(&self) -> &WalletTable {
        &self.wallets
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles
    }

    /// Escalations broadcast or awaiting confirmation.
    pub fn pending_escalations(&self) -> usize {
        self.escalations.len()
    }

    /// Run cycles until `shutdown` resolves, then wait for in-flight
    /// escalations to settle. Returns what settled during that drain.
    pub async fn run<F>(&mut self, shutdown: F) -> CycleReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            wallets = self.wallets.len(),
            interval_ms = self.options.interval.as_millis() as u64,
            threshold = self.options.report_threshold,
            "Monitoring started"
        );

        loop {
            let report = self.run_cycle().await;
            info!(
                cycle = report.cycle_number,
                checked = report.wallets_checked,
                significant = report.significant_deltas,
                assessed = report.assessments,
                escalated = report.escalations_started,
                deduped = report.deduplicated,
                errors = report.errors,
                confirmed = report.reports_confirmed,
                failed = report.reports_failed,
                in_flight = self.escalations.len(),
                "Cycle complete"
            );

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
                _ = self.clock.sleep(self.options.interval) => {}
            }
        }

        let settled = self.drain().await;
        info!(
            cycles = self.cycles,
            confirmed = settled.reports_confirmed,
            failed = settled.reports_failed,
            "In-flight reports settled"
        );
        settled
    }

    /// One pass over every wallet.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport {
            cycle_number: self.cycles,
            wallets_checked: self.wallets.len(),
            ..CycleReport::default()
        };
        debug!(cycle = self.cycles, "Starting cycle");

        while let Some(joined) = self.escalations.try_join_next() {
            record_settled(&mut report, joined);
        }

        let tracker = &self.tracker;
        let engine = &self.engine;
        let threshold = self.options.report_threshold;
        let outcomes: Vec<(Address, WalletOutcome)> = stream::iter(self.wallets.iter_mut())
            .map(|wallet| process_wallet(tracker, engine, threshold, wallet))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        for (wallet, outcome) in outcomes {
            match outcome {
                WalletOutcome::Quiet => {}
                WalletOutcome::Assessed(assessment) => {
                    report.significant_deltas += 1;
                    report.assessments += 1;
                    debug!(wallet = %wallet, risk_score = assessment.risk_score, "Below report threshold");
                }
                WalletOutcome::Escalate(assessment) => {
                    report.significant_deltas += 1;
                    report.assessments += 1;
                    match self.escalate(wallet, assessment) {
                        Ok(()) => report.escalations_started += 1,
                        Err(e @ GuardError::AlreadyReporting { .. }) => {
                            report.deduplicated += 1;
                            info!(wallet = %wallet, kind = e.kind(), "Report already in flight, skipping");
                        }
                        Err(e) => {
                            report.errors += 1;
                            warn!(wallet = %wallet, kind = e.kind(), error = %e, "Escalation not started");
                        }
                    }
                }
                WalletOutcome::Failed(e) => {
                    report.errors += 1;
                    warn!(wallet = %wallet, kind = e.kind(), error = %e, "Wallet skipped this cycle");
                }
            }
        }

        report
    }

    /// Reserve the wallet's report slot now, then confirm in the background.
    fn escalate(&mut self, wallet: Address, assessment: RiskAssessment) -> Result<(), GuardError> {
        let guard = self.reporter.reserve(wallet)?;
        let reporter = self.reporter.clone();
        self.escalations.spawn(async move {
            let result = reporter.submit(guard, &assessment).await;
            (wallet, result)
        });
        Ok(())
    }

    /// Wait for every in-flight escalation to settle.
    pub async fn drain(&mut self) -> CycleReport {
        let mut settled = CycleReport::default();
        if !self.escalations.is_empty() {
            info!(in_flight = self.escalations.len(), "Waiting for in-flight reports to settle");
        }
        while let Some(joined) = self.escalations.join_next().await {
            record_settled(&mut settled, joined);
        }
        settled
    }
}

async fn process_wallet(
    tracker: &BalanceTracker,
    engine: &RiskEngine,
    threshold: u8,
    wallet: &mut MonitoredWallet,
) -> (Address, WalletOutcome) {
    let address = wallet.address;

    let delta = match tracker.observe(wallet).await {
        Ok(delta) => delta,
        Err(e) => return (address, WalletOutcome::Failed(e)),
    };

    if !tracker.is_significant(&delta) {
        debug!(wallet = %address, delta = %delta, "No significant activity");
        return (address, WalletOutcome::Quiet);
    }

    info!(wallet = %address, delta = %delta, "Activity detected");
    let assessment = engine.assess(wallet, &delta).await;

    if assessment.warrants_report(threshold) {
        (address, WalletOutcome::Escalate(assessment))
    } else {
        (address, WalletOutcome::Assessed(assessment))
    }
}

fn record_settled(report: &mut CycleReport, joined: Result<EscalationResult, JoinError>) {
    match joined {
        Ok((_, Ok(_))) => report.reports_confirmed += 1,
        Ok((wallet, Err(e))) => {
            report.reports_failed += 1;
            warn!(wallet = %wallet, kind = e.kind(), error = %e, "Report settled as FAILED");
        }
        Err(e) => {
            report.reports_failed += 1;
            error!(error = %e, "Report task aborted");
        }
    }
}
