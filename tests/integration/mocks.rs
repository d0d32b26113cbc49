//! In-memory collaborators for driving the scheduler deterministically.
//!
//! Every mock records what it was asked to do so tests can assert on the
//! exact registry writes and reasoning calls a cycle produced.

use alloy::primitives::{Address, TxHash, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use guardian::chain::{AnomalyRegistry, ChainState};
use guardian::engine::{
    AnomalyReporter, BalanceTracker, Clock, PollScheduler, RiskEngine, SchedulerOptions,
    WalletTable,
};
use guardian::llm::ReasoningService;
use guardian::types::{AnomalyType, GuardError, WalletStatus};

pub const MILLI_ETHER: u128 = 1_000_000_000_000_000;

/// Balance expressed in thousandths of an ether.
pub fn milli(n: u128) -> U256 {
    U256::from(n * MILLI_ETHER)
}

pub fn wallet(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

// ---------------------------------------------------------------------------
// Chain state
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockChain {
    balances: Mutex<HashMap<Address, U256>>,
    fail_next: Mutex<HashSet<Address>>,
    reads: Mutex<Vec<Address>>,
}

impl MockChain {
    pub fn set_balance(&self, wallet: Address, balance: U256) {
        self.balances.lock().unwrap().insert(wallet, balance);
    }

    /// Make the next read of `wallet` fail once.
    pub fn fail_next_read(&self, wallet: Address) {
        self.fail_next.lock().unwrap().insert(wallet);
    }

    pub fn reads_of(&self, wallet: Address) -> usize {
        self.reads.lock().unwrap().iter().filter(|w| **w == wallet).count()
    }
}

#[async_trait]
impl ChainState for MockChain {
    async fn balance_of(&self, address: Address) -> Result<U256, GuardError> {
        self.reads.lock().unwrap().push(address);
        if self.fail_next.lock().unwrap().remove(&address) {
            return Err(GuardError::Provider(format!("eth_getBalance timed out for {address}")));
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&address)
            .copied()
            .unwrap_or(U256::ZERO))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One `reportAnomaly` call as broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub wallet: Address,
    pub anomaly_type: u8,
    pub risk_score: u8,
}

#[derive(Default)]
pub struct MockRegistry {
    submissions: Mutex<Vec<Submission>>,
    hold: AtomicBool,
    release: Notify,
    fail_broadcast: Mutex<HashSet<Address>>,
}

impl MockRegistry {
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    /// Keep confirmations pending until `release_confirmations`.
    pub fn hold_confirmations(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release_confirmations(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    pub fn fail_broadcast_for(&self, wallet: Address) {
        self.fail_broadcast.lock().unwrap().insert(wallet);
    }

    pub fn clear_failures(&self) {
        self.fail_broadcast.lock().unwrap().clear();
    }
}

#[async_trait]
impl AnomalyRegistry for MockRegistry {
    async fn submit_report(
        &self,
        wallet: Address,
        anomaly_type: AnomalyType,
        risk_score: u8,
    ) -> Result<TxHash, GuardError> {
        if self.fail_broadcast.lock().unwrap().contains(&wallet) {
            return Err(GuardError::Provider("insufficient funds for gas".into()));
        }
        let mut subs = self.submissions.lock().unwrap();
        subs.push(Submission {
            wallet,
            anomaly_type: anomaly_type.code(),
            risk_score,
        });
        Ok(TxHash::with_last_byte(subs.len() as u8))
    }

    async fn await_inclusion(&self, _tx_hash: TxHash) -> Result<(), GuardError> {
        loop {
            let released = self.release.notified();
            if !self.hold.load(Ordering::SeqCst) {
                return Ok(());
            }
            released.await;
        }
    }

    async fn wallet_status(&self, wallet: Address) -> Result<WalletStatus, GuardError> {
        let highest = self
            .submissions()
            .iter()
            .filter(|s| s.wallet == wallet)
            .map(|s| s.risk_score)
            .max()
            .unwrap_or(0);
        Ok(WalletStatus {
            is_frozen: highest >= 70,
            frozen_at: U256::ZERO,
            last_check: U256::ZERO,
            highest_risk: U256::from(highest),
            recovery_status: 0,
            approval_count: U256::ZERO,
            required_count: U256::from(2u8),
        })
    }
}

// ---------------------------------------------------------------------------
// Reasoning service
// ---------------------------------------------------------------------------

/// Replies chosen by which wallet the prompt mentions.
pub struct ScriptedReasoner {
    replies: Mutex<HashMap<Address, Result<String, String>>>,
    default_reply: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            default_reply: r#"{"riskScore": 10, "anomalyType": 0, "reasoning": "routine"}"#.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_for(&self, wallet: Address, text: &str) {
        self.replies.lock().unwrap().insert(wallet, Ok(text.to_string()));
    }

    pub fn fail_for(&self, wallet: Address, message: &str) {
        self.replies.lock().unwrap().insert(wallet, Err(message.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn calls_for(&self, wallet: Address) -> usize {
        let needle = wallet.to_string();
        self.prompts.lock().unwrap().iter().filter(|p| p.contains(&needle)).count()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let replies = self.replies.lock().unwrap();
        let scripted = replies
            .iter()
            .find(|(wallet, _)| prompt.contains(&wallet.to_string()))
            .map(|(_, reply)| reply.clone());
        match scripted {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.default_reply.clone()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Records sleeps instead of waiting; signals `stop` after `stop_after`.
pub struct ManualClock {
    sleeps: Mutex<Vec<Duration>>,
    stop_after: usize,
    pub stop: Notify,
}

impl ManualClock {
    pub fn new(stop_after: usize) -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            stop_after,
            stop: Notify::new(),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        let count = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(duration);
            sleeps.len()
        };
        if count >= self.stop_after {
            self.stop.notify_one();
        }
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub registry: Arc<MockRegistry>,
    pub reasoner: Arc<ScriptedReasoner>,
    pub clock: Arc<ManualClock>,
    pub scheduler: PollScheduler,
}

pub const INTERVAL: Duration = Duration::from_millis(30_000);

/// Scheduler over `wallets`, each starting at 10 ETH, with default
/// thresholds (0.01 ETH noise floor, report at 50).
pub fn harness(wallets: &[Address]) -> Harness {
    harness_with_stop(wallets, usize::MAX)
}

pub fn harness_with_stop(wallets: &[Address], stop_after: usize) -> Harness {
    let chain = Arc::new(MockChain::default());
    let registry = Arc::new(MockRegistry::default());
    let reasoner = Arc::new(ScriptedReasoner::new());
    let clock = Arc::new(ManualClock::new(stop_after));

    for w in wallets {
        chain.set_balance(*w, milli(10_000));
    }

    let scheduler = PollScheduler::new(
        WalletTable::new(wallets.iter().copied()),
        BalanceTracker::new(chain.clone(), clock.clone(), milli(10)),
        RiskEngine::new(reasoner.clone()),
        AnomalyReporter::new(registry.clone()),
        clock.clone(),
        SchedulerOptions {
            interval: INTERVAL,
            report_threshold: 50,
            concurrency: 2,
        },
    );

    Harness {
        chain,
        registry,
        reasoner,
        clock,
        scheduler,
    }
}

/// Yield until `done` holds, so spawned escalation tasks get to run.
pub async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
