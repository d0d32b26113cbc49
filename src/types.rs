//! Shared types for the GuardianForge agent.
//!
//! The data model flows one way per cycle: a `MonitoredWallet` yields a
//! `BalanceDelta`, a significant delta yields a `RiskAssessment`, and an
//! assessment above the report threshold yields an `AnomalyReport`.

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Monitored wallet
// ---------------------------------------------------------------------------

/// A configured address and its last observed native balance.
///
/// `last_balance` is `None` until the first successful observation; the
/// first read seeds it so the first cycle never raises an alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredWallet {
    pub address: Address,
    pub last_balance: Option<U256>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl MonitoredWallet {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            last_balance: None,
            last_checked_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Balance delta
// ---------------------------------------------------------------------------

/// Change in a wallet's balance between two consecutive observations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDelta {
    pub wallet: Address,
    pub previous: U256,
    pub current: U256,
}

impl BalanceDelta {
    /// Absolute size of the change in wei.
    pub fn magnitude(&self) -> U256 {
        self.current.abs_diff(self.previous)
    }

    pub fn is_outflow(&self) -> bool {
        self.current < self.previous
    }

    pub fn is_zero(&self) -> bool {
        self.current == self.previous
    }

    /// Whether the change clears the noise floor (`epsilon_wei`).
    /// A zero delta is never significant.
    pub fn is_significant(&self, epsilon_wei: U256) -> bool {
        !self.is_zero() && self.magnitude() >= epsilon_wei
    }

    /// Signed change in ether, trailing zeros trimmed (e.g. `-8.2`).
    pub fn signed_ether(&self) -> String {
        let unsigned = trim_decimal(&format_ether(self.magnitude()));
        if self.is_outflow() {
            format!("-{unsigned}")
        } else {
            unsigned
        }
    }
}

impl fmt::Display for BalanceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ETH", self.signed_ether())
    }
}

fn trim_decimal(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// Anomaly classification
// ---------------------------------------------------------------------------

/// Closed classification of a suspected cause. The discriminants are the
/// registry's on-chain `anomalyType` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum AnomalyType {
    None = 0,
    LargeTransaction = 1,
    FailedSignature = 2,
    SuspiciousContract = 3,
    RapidTransactions = 4,
    HighRiskInteraction = 5,
}

impl AnomalyType {
    pub const ALL: [AnomalyType; 6] = [
        AnomalyType::None,
        AnomalyType::LargeTransaction,
        AnomalyType::FailedSignature,
        AnomalyType::SuspiciousContract,
        AnomalyType::RapidTransactions,
        AnomalyType::HighRiskInteraction,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| u64::from(t.code()) == code)
    }

    /// Case-insensitive lookup by name (`HIGH_RISK_INTERACTION`).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::LargeTransaction => "LARGE_TRANSACTION",
            Self::FailedSignature => "FAILED_SIGNATURE",
            Self::SuspiciousContract => "SUSPICIOUS_CONTRACT",
            Self::RapidTransactions => "RAPID_TRANSACTIONS",
            Self::HighRiskInteraction => "HIGH_RISK_INTERACTION",
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Risk assessment
// ---------------------------------------------------------------------------

/// Sanitised output of the reasoning service for one delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    /// Always within 0..=100.
    pub risk_score: u8,
    pub anomaly_type: AnomalyType,
    pub reasoning: String,
}

impl RiskAssessment {
    pub const PARSE_FAILURE: &'static str = "parse failure";
    pub const SERVICE_ERROR: &'static str = "reasoning service error";

    /// The `{0, NONE}` assessment used whenever scoring cannot complete.
    pub fn fallback(reasoning: &str) -> Self {
        Self {
            risk_score: 0,
            anomaly_type: AnomalyType::None,
            reasoning: reasoning.to_string(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.risk_score == 0
            && self.anomaly_type == AnomalyType::None
            && (self.reasoning == Self::PARSE_FAILURE || self.reasoning == Self::SERVICE_ERROR)
    }

    pub fn warrants_report(&self, threshold: u8) -> bool {
        self.risk_score >= threshold
    }
}

impl fmt::Display for RiskAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/100 {} ({})", self.risk_score, self.anomaly_type, self.reasoning)
    }
}

// ---------------------------------------------------------------------------
// Anomaly report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Confirmed => "CONFIRMED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One escalation to the on-chain registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyReport {
    pub id: Uuid,
    pub wallet: Address,
    pub anomaly_type: AnomalyType,
    pub risk_score: u8,
    pub state: SubmissionState,
    pub tx_hash: Option<TxHash>,
}

impl AnomalyReport {
    pub fn pending(wallet: Address, assessment: &RiskAssessment) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet,
            anomaly_type: assessment.anomaly_type,
            risk_score: assessment.risk_score,
            state: SubmissionState::Pending,
            tx_hash: None,
        }
    }

    pub fn mark_submitted(&mut self, tx_hash: TxHash) {
        self.state = SubmissionState::Submitted;
        self.tx_hash = Some(tx_hash);
    }

    pub fn mark_confirmed(&mut self) {
        self.state = SubmissionState::Confirmed;
    }

    pub fn mark_failed(&mut self) {
        self.state = SubmissionState::Failed;
    }
}

// ---------------------------------------------------------------------------
// Registry read surface
// ---------------------------------------------------------------------------

/// Decoded `getWalletStatus` tuple. Display-only; never fed back into the
/// decision loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletStatus {
    pub is_frozen: bool,
    pub frozen_at: U256,
    pub last_check: U256,
    pub highest_risk: U256,
    pub recovery_status: u8,
    pub approval_count: U256,
    pub required_count: U256,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frozen={} frozen_at={} last_check={} highest_risk={} recovery={} approvals={}/{}",
            self.is_frozen,
            self.frozen_at,
            self.last_check,
            self.highest_risk,
            self.recovery_status,
            self.approval_count,
            self.required_count,
        )
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of a single poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub wallets_checked: usize,
    pub significant_deltas: usize,
    pub assessments: usize,
    pub escalations_started: usize,
    pub deduplicated: usize,
    pub errors: usize,
    /// Escalations from earlier cycles that settled before this one.
    pub reports_confirmed: usize,
    pub reports_failed: usize,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle #{}: checked={} significant={} assessed={} escalated={} deduped={} errors={} confirmed={} failed={}",
            self.cycle_number,
            self.wallets_checked,
            self.significant_deltas,
            self.assessments,
            self.escalations_started,
            self.deduplicated,
            self.errors,
            self.reports_confirmed,
            self.reports_failed,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Error taxonomy for the agent.
///
/// Only `Configuration` is fatal. Everything else is scoped to one wallet.
/// Reasoning-service failures never appear here: the engine absorbs them
/// into the fallback assessment.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Report already in flight for {wallet}")]
    AlreadyReporting { wallet: Address },

    #[error("Submission failed for {wallet}: {message}")]
    Submission { wallet: Address, message: String },
}

impl GuardError {
    /// Short category label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Provider(_) => "ProviderError",
            Self::AlreadyReporting { .. } => "AlreadyReporting",
            Self::Submission { .. } => "SubmissionFailure",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
