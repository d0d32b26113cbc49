//! Risk assessment engine.
//!
//! Turns a significant balance delta into a bounded `RiskAssessment` via one
//! reasoning-service call. Every failure of that service (transport error,
//! missing or malformed JSON) degrades to the `{0, NONE}` fallback so it can
//! never trigger an escalation on its own.

use alloy::primitives::Address;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::llm::extract::find_assessment_object;
use crate::llm::ReasoningService;
use crate::types::{AnomalyType, BalanceDelta, MonitoredWallet, RiskAssessment};

/// Longest reasoning string kept from a response, in characters.
const MAX_REASONING_CHARS: usize = 500;

/// Shape of the object the model is asked to return. Fields are loosely
/// typed so sanitisation, not deserialisation, decides what is usable.
#[derive(Debug, Deserialize)]
struct RawAssessment {
    #[serde(rename = "riskScore")]
    risk_score: Value,
    #[serde(rename = "anomalyType", default)]
    anomaly_type: Value,
    #[serde(default)]
    reasoning: Value,
}

pub struct RiskEngine {
    service: Arc<dyn ReasoningService>,
}

impl RiskEngine {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }

    /// Assess one delta. Never fails: service errors and unusable answers
    /// return the fallback assessment.
    pub async fn assess(&self, wallet: &MonitoredWallet, delta: &BalanceDelta) -> RiskAssessment {
        let prompt = Self::build_prompt(wallet.address, delta);

        let assessment = match self.service.complete(&prompt).await {
            Ok(text) => {
                let parsed = Self::parse_assessment(&text);
                if parsed.is_fallback() {
                    warn!(
                        wallet = %wallet.address,
                        response = %truncate(&text, 200),
                        "Unparseable risk assessment, using fallback"
                    );
                }
                parsed
            }
            Err(e) => {
                warn!(wallet = %wallet.address, error = %e, "Reasoning service call failed, using fallback");
                RiskAssessment::fallback(RiskAssessment::SERVICE_ERROR)
            }
        };

        info!(
            wallet = %wallet.address,
            delta = %delta,
            risk_score = assessment.risk_score,
            anomaly = %assessment.anomaly_type,
            reasoning = %assessment.reasoning,
            "Risk assessed"
        );
        assessment
    }

    /// Fixed-schema prompt for one wallet and delta.
    pub fn build_prompt(wallet: Address, delta: &BalanceDelta) -> String {
        let direction = if delta.is_outflow() { "outflow" } else { "inflow" };
        let legend = AnomalyType::ALL
            .iter()
            .map(|t| format!("{}={}", t.code(), t))
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = String::with_capacity(600);
        prompt.push_str("You are a blockchain security AI. Analyze this wallet activity:\n\n");
        prompt.push_str(&format!("Wallet: {wallet}\n"));
        prompt.push_str(&format!("Balance Change: {} ETH ({direction})\n\n", delta.signed_ether()));
        prompt.push_str("Respond ONLY with exactly one JSON object, no markdown fencing:\n");
        prompt.push_str("{\"riskScore\": <0-100>, \"anomalyType\": <0-5>, \"reasoning\": \"<brief>\"}\n\n");
        prompt.push_str("Risk: 0-30 low, 31-50 moderate, 51-70 high, 71-100 critical\n");
        prompt.push_str(&format!("AnomalyType: {legend}\n"));
        prompt
    }

    /// Extract and sanitise an assessment from raw completion text.
    pub fn parse_assessment(text: &str) -> RiskAssessment {
        let Some(raw) = find_assessment_object(text)
            .and_then(|obj| serde_json::from_str::<RawAssessment>(obj).ok())
        else {
            return RiskAssessment::fallback(RiskAssessment::PARSE_FAILURE);
        };

        let Some(risk_score) = sanitize_score(&raw.risk_score) else {
            return RiskAssessment::fallback(RiskAssessment::PARSE_FAILURE);
        };

        RiskAssessment {
            risk_score,
            anomaly_type: sanitize_anomaly(&raw.anomaly_type),
            reasoning: match &raw.reasoning {
                Value::String(s) => truncate(s.trim(), MAX_REASONING_CHARS),
                _ => String::new(),
            },
        }
    }
}

/// Numeric (or numeric-string) score, rounded and clamped into 0..=100.
fn sanitize_score(value: &Value) -> Option<u8> {
    let score = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !score.is_finite() {
        return None;
    }
    Some(score.round().clamp(0.0, 100.0) as u8)
}

/// Integer code or enum name; anything unknown is `NONE`.
fn sanitize_anomaly(value: &Value) -> AnomalyType {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| integral(n.as_f64()?))
            .and_then(AnomalyType::from_code),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(AnomalyType::from_code)
            .or_else(|| AnomalyType::from_name(s)),
        _ => None,
    }
    .unwrap_or(AnomalyType::None)
}

/// `5.0` reads as code 5; `5.5` or negative values are not codes.
fn integral(f: f64) -> Option<u64> {
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
