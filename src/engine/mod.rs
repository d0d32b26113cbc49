//! Core engine: the observe → assess → escalate loop.

pub mod assessor;
pub mod clock;
pub mod reporter;
pub mod scheduler;
pub mod simulate;
pub mod tracker;

pub use assessor::RiskEngine;
pub use clock::{Clock, TokioClock};
pub use reporter::{AnomalyReporter, InFlightGuard};
pub use scheduler::{PollScheduler, SchedulerOptions};
pub use simulate::{canned_scenarios, run_scenarios, Scenario, ScenarioOutcome};
pub use tracker::{BalanceTracker, WalletTable};
