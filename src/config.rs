//! Configuration loading from the environment with optional TOML tuning.
//!
//! Required values (credentials, registry address, wallet list) come from
//! environment variables, optionally seeded from a `.env` file. Tuning knobs
//! live in `guardian.toml`; every key there has a default, so the file is
//! optional.

use alloy::primitives::{Address, U256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::types::GuardError;

pub const ENV_RPC_URL: &str = "RPC_URL";
pub const ENV_PRIVATE_KEY: &str = "AGENT_PRIVATE_KEY";
pub const ENV_CONTRACT_ADDRESS: &str = "CONTRACT_ADDRESS";
pub const ENV_MONITORED_WALLETS: &str = "MONITORED_WALLETS";
pub const ENV_GROQ_API_KEY: &str = "GROQ_API_KEY";
pub const ENV_POLL_INTERVAL: &str = "POLL_INTERVAL";
pub const ENV_CONFIG_PATH: &str = "GUARDIAN_CONFIG";

const DEFAULT_RPC_URL: &str = "https://rpc-amoy.polygon.technology/";
const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
const MIN_POLL_INTERVAL_MS: u64 = 1_000;

/// Upper bound on retry counts; backoff doubles per attempt.
pub const MAX_RETRIES: u32 = 10;
const MIN_RECEIPT_POLL_MS: u64 = 100;
const DEFAULT_CONFIG_PATH: &str = "guardian.toml";

// ---------------------------------------------------------------------------
// Tuning file
// ---------------------------------------------------------------------------

/// Contents of `guardian.toml`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub assessment: AssessmentSettings,
    #[serde(default)]
    pub chain: ChainSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitoringSettings {
    /// Noise floor in ether; smaller deltas are ignored.
    #[serde(default = "default_epsilon")]
    pub epsilon_ether: Decimal,
    #[serde(default = "default_report_threshold")]
    pub report_threshold: u8,
    /// Wallets observed/assessed in parallel within one cycle.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            epsilon_ether: default_epsilon(),
            report_threshold: default_report_threshold(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssessmentSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for AssessmentSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            receipt_poll_ms: default_receipt_poll_ms(),
            read_retries: default_read_retries(),
        }
    }
}

fn default_epsilon() -> Decimal {
    dec!(0.01)
}
fn default_report_threshold() -> u8 {
    50
}
fn default_concurrency() -> usize {
    4
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    200
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_confirmations() -> u64 {
    1
}
fn default_confirmation_timeout_secs() -> u64 {
    120
}
fn default_receipt_poll_ms() -> u64 {
    2000
}
fn default_read_retries() -> u32 {
    2
}

impl Settings {
    /// Load the tuning file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, GuardError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|e| {
            GuardError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
            .map_err(|e| GuardError::Configuration(format!("{}: {e}", path.display())))
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        let settings: Settings = toml::from_str(contents).map_err(|e| e.to_string())?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), String> {
        if self.monitoring.epsilon_ether.is_sign_negative() {
            return Err("monitoring.epsilon_ether must not be negative".into());
        }
        if self.monitoring.report_threshold > 100 {
            return Err("monitoring.report_threshold must be within 0..=100".into());
        }
        if self.monitoring.concurrency == 0 {
            return Err("monitoring.concurrency must be at least 1".into());
        }
        if self.assessment.max_retries > MAX_RETRIES {
            return Err(format!("assessment.max_retries must be at most {MAX_RETRIES}"));
        }
        if self.chain.read_retries > MAX_RETRIES {
            return Err(format!("chain.read_retries must be at most {MAX_RETRIES}"));
        }
        if self.chain.receipt_poll_ms < MIN_RECEIPT_POLL_MS {
            return Err(format!("chain.receipt_poll_ms must be at least {MIN_RECEIPT_POLL_MS}"));
        }
        if self.chain.confirmation_timeout_secs == 0 {
            return Err("chain.confirmation_timeout_secs must be at least 1".into());
        }
        Ok(())
    }
}

impl MonitoringSettings {
    /// Noise floor converted to wei.
    pub fn epsilon_wei(&self) -> U256 {
        let wei_per_ether = Decimal::from(1_000_000_000_000_000_000u64);
        (self.epsilon_ether * wei_per_ether)
            .trunc()
            .to_u128()
            .map(U256::from)
            .unwrap_or(U256::MAX)
    }
}

// ---------------------------------------------------------------------------
// Agent configuration
// ---------------------------------------------------------------------------

/// Connection to the registry: enough for read-only commands.
#[derive(Debug)]
pub struct RegistryConfig {
    pub rpc_url: String,
    pub private_key: SecretString,
    pub registry_address: Address,
    pub settings: Settings,
}

impl RegistryConfig {
    pub fn from_env() -> Result<Self, GuardError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, GuardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = require_all(&lookup, &[ENV_PRIVATE_KEY, ENV_CONTRACT_ADDRESS])?;
        Self::resolve(&lookup, &mut values)
    }

    fn resolve<F>(lookup: &F, values: &mut HashMap<&'static str, String>) -> Result<Self, GuardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let contract = values.remove(ENV_CONTRACT_ADDRESS).unwrap_or_default();
        let private_key = values.remove(ENV_PRIVATE_KEY).unwrap_or_default();
        let registry_address = parse_address(ENV_CONTRACT_ADDRESS, &contract)?;

        let config_path =
            trimmed(lookup, ENV_CONFIG_PATH).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let settings = Settings::load(Path::new(&config_path))?;

        Ok(Self {
            rpc_url: trimmed(lookup, ENV_RPC_URL).unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            private_key: SecretString::new(private_key),
            registry_address,
            settings,
        })
    }
}

/// Fully resolved configuration for the monitoring loop.
#[derive(Debug)]
pub struct AgentConfig {
    pub registry: RegistryConfig,
    pub monitored_wallets: Vec<Address>,
    pub groq_api_key: SecretString,
    pub poll_interval: Duration,
}

impl AgentConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self, GuardError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GuardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = require_all(
            &lookup,
            &[ENV_PRIVATE_KEY, ENV_CONTRACT_ADDRESS, ENV_GROQ_API_KEY],
        )?;
        let groq_api_key = values.remove(ENV_GROQ_API_KEY).unwrap_or_default();
        let registry = RegistryConfig::resolve(&lookup, &mut values)?;

        let monitored_wallets =
            parse_wallet_list(&trimmed(&lookup, ENV_MONITORED_WALLETS).unwrap_or_default())?;
        if monitored_wallets.is_empty() {
            return Err(GuardError::Configuration(format!(
                "no {ENV_MONITORED_WALLETS} configured"
            )));
        }

        let poll_interval_ms = match trimmed(&lookup, ENV_POLL_INTERVAL) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                GuardError::Configuration(format!("{ENV_POLL_INTERVAL} is not a number: {raw}"))
            })?,
            None => DEFAULT_POLL_INTERVAL_MS,
        };
        if poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(GuardError::Configuration(format!(
                "{ENV_POLL_INTERVAL} must be at least {MIN_POLL_INTERVAL_MS} ms, got {poll_interval_ms}"
            )));
        }

        Ok(Self {
            registry,
            monitored_wallets,
            groq_api_key: SecretString::new(groq_api_key),
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }
}

/// Reasoning-service key on its own, for commands that assess without
/// polling.
pub fn groq_api_key_from_lookup<F>(lookup: F) -> Result<SecretString, GuardError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut values = require_all(&lookup, &[ENV_GROQ_API_KEY])?;
    Ok(SecretString::new(values.remove(ENV_GROQ_API_KEY).unwrap_or_default()))
}

pub fn groq_api_key_from_env() -> Result<SecretString, GuardError> {
    groq_api_key_from_lookup(|key| std::env::var(key).ok())
}

fn trimmed<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Fetch every key in `keys`, naming all absent ones in a single error.
fn require_all<F>(
    lookup: &F,
    keys: &[&'static str],
) -> Result<HashMap<&'static str, String>, GuardError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut values = HashMap::new();
    let mut missing = Vec::new();
    for key in keys {
        match trimmed(lookup, key) {
            Some(value) => {
                values.insert(*key, value);
            }
            None => missing.push(*key),
        }
    }
    if !missing.is_empty() {
        return Err(GuardError::Configuration(format!(
            "missing required env vars: {}",
            missing.join(", ")
        )));
    }
    Ok(values)
}

fn parse_address(name: &str, raw: &str) -> Result<Address, GuardError> {
    raw.parse::<Address>()
        .map_err(|e| GuardError::Configuration(format!("{name} is not a valid address ({raw}): {e}")))
}

/// Parse a comma-separated address list, dropping blanks and duplicates.
pub fn parse_wallet_list(raw: &str) -> Result<Vec<Address>, GuardError> {
    let mut seen = HashSet::new();
    let mut wallets = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let address = parse_address(ENV_MONITORED_WALLETS, entry)?;
        if seen.insert(address) {
            wallets.push(address);
        }
    }
    Ok(wallets)
}
