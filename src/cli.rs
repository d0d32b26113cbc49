//! Command-line surface of the `guardian` binary.

use alloy::primitives::Address;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "guardian")]
#[command(about = "GuardianForge - wallet threat monitoring agent", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The selected subcommand; `run` when none is given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Run)
    }
}

/// Available commands
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Poll the monitored wallets and escalate anomalies until Ctrl+C.
    ///
    /// Requires AGENT_PRIVATE_KEY, CONTRACT_ADDRESS, MONITORED_WALLETS and
    /// GROQ_API_KEY.
    Run,

    /// Print the registry's status for one wallet.
    ///
    /// Requires AGENT_PRIVATE_KEY and CONTRACT_ADDRESS only.
    Status {
        /// Wallet address (0x-prefixed hex)
        address: Address,
    },

    /// Push canned balance deltas through assessment and reporting.
    ///
    /// Requires AGENT_PRIVATE_KEY, CONTRACT_ADDRESS and GROQ_API_KEY.
    Simulate,
}
