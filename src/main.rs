//! GuardianForge: autonomous wallet-threat monitoring agent.
//!
//! Entry point. Loads configuration, initialises structured logging, wires
//! the chain, reasoning service and engine together, and dispatches one of
//! the subcommands:
//!
//! - `run` (default): poll → assess → escalate until Ctrl+C.
//! - `status <address>`: print the registry's status for one wallet.
//! - `simulate`: push canned balance deltas through assessment and reporting.

use alloy::primitives::Address;
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use guardian::chain::rpc::RpcChain;
use guardian::chain::AnomalyRegistry;
use guardian::cli::{Cli, Commands};
use guardian::config::{groq_api_key_from_env, AgentConfig, RegistryConfig};
use guardian::engine::{
    canned_scenarios, run_scenarios, AnomalyReporter, BalanceTracker, Clock, PollScheduler,
    RiskEngine, SchedulerOptions, TokioClock, WalletTable,
};
use guardian::llm::groq::GroqClient;
use guardian::llm::ReasoningService;
use guardian::types::GuardError;

const BANNER: &str = r#"
   ____                     _ _             _____
  / ___|_   _  __ _ _ __ __| (_) __ _ _ __ |  ___|__  _ __ __ _  ___
 | |  _| | | |/ _` | '__/ _` | |/ _` | '_ \| |_ / _ \| '__/ _` |/ _ \
 | |_| | |_| | (_| | | | (_| | | (_| | | | |  _| (_) | | | (_| |  __/
  \____|\__,_|\__,_|_|  \__,_|_|\__,_|_| |_|_|  \___/|_|  \__, |\___|
                                                         |___/
  Wallet threat monitoring agent v0.1.0
"#;

/// Exit status for configuration failures.
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    init_logging();

    match cli.command() {
        Commands::Run => run().await,
        Commands::Status { address } => status(address).await,
        Commands::Simulate => simulate().await,
    }
}

async fn run() -> Result<()> {
    let cfg = AgentConfig::from_env().unwrap_or_else(|e| exit_on_config_error(e));
    println!("{BANNER}");
    let chain = connect(&cfg.registry);

    let llm: Arc<dyn ReasoningService> = Arc::new(GroqClient::new(
        cfg.groq_api_key,
        &cfg.registry.settings.assessment,
    )?);
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let monitoring = &cfg.registry.settings.monitoring;

    info!(
        model = %llm.model_name(),
        wallets = cfg.monitored_wallets.len(),
        epsilon_ether = %monitoring.epsilon_ether,
        threshold = monitoring.report_threshold,
        "Reasoning service configured"
    );

    let mut scheduler = PollScheduler::new(
        WalletTable::new(cfg.monitored_wallets.iter().copied()),
        BalanceTracker::new(chain.clone(), clock.clone(), monitoring.epsilon_wei()),
        RiskEngine::new(llm),
        AnomalyReporter::new(chain),
        clock,
        SchedulerOptions {
            interval: cfg.poll_interval,
            report_threshold: monitoring.report_threshold,
            concurrency: monitoring.concurrency,
        },
    );

    info!("Entering main loop. Press Ctrl+C to stop.");
    let settled = scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!(
        cycles = scheduler.cycles_completed(),
        confirmed = settled.reports_confirmed,
        failed = settled.reports_failed,
        "GuardianForge shut down cleanly."
    );
    Ok(())
}

async fn status(wallet: Address) -> Result<()> {
    let cfg = RegistryConfig::from_env().unwrap_or_else(|e| exit_on_config_error(e));
    let chain = connect(&cfg);

    let status = chain.wallet_status(wallet).await?;
    info!(wallet = %wallet, frozen = status.is_frozen, "Registry status");
    println!("{wallet}: {status}");
    if status.is_frozen {
        println!(
            "Wallet is FROZEN ({} of {} guardian approvals)",
            status.approval_count, status.required_count
        );
    }
    Ok(())
}

async fn simulate() -> Result<()> {
    let cfg = RegistryConfig::from_env().unwrap_or_else(|e| exit_on_config_error(e));
    let groq_api_key = groq_api_key_from_env().unwrap_or_else(|e| exit_on_config_error(e));
    println!("{BANNER}");
    let chain = connect(&cfg);

    let llm: Arc<dyn ReasoningService> =
        Arc::new(GroqClient::new(groq_api_key, &cfg.settings.assessment)?);
    let outcomes = run_scenarios(
        &RiskEngine::new(llm),
        chain,
        canned_scenarios(),
        cfg.settings.monitoring.report_threshold,
    )
    .await;

    for outcome in outcomes {
        let scenario = &outcome.scenario;
        println!("--- {} ---", scenario.name);
        println!("Wallet: {}", scenario.wallet);
        println!("Balance Change: {}", scenario.delta());
        println!(
            "Risk Score: {}/100 ({})",
            outcome.assessment.risk_score, outcome.assessment.anomaly_type
        );
        println!("Analysis: {}", outcome.assessment.reasoning);

        match (&outcome.report, &outcome.status) {
            (None, _) => println!("Below threshold, no report.\n"),
            (Some(Err(e)), _) => println!("Report failed ({}): {e}\n", e.kind()),
            (Some(Ok(report)), status) => {
                println!("Report {}: {:?}", report.state, report.tx_hash);
                match status {
                    Some(Ok(status)) if status.is_frozen => println!("Wallet FROZEN!\n"),
                    Some(Ok(status)) => println!("Status: {status}\n"),
                    Some(Err(e)) => println!("Status unavailable: {e}\n"),
                    None => println!(),
                }
            }
        }
    }
    Ok(())
}

/// Build the signing RPC client, or exit on a bad key or URL.
fn connect(cfg: &RegistryConfig) -> Arc<RpcChain> {
    let chain = RpcChain::connect(
        &cfg.rpc_url,
        &cfg.private_key,
        cfg.registry_address,
        cfg.settings.chain.clone(),
    )
    .unwrap_or_else(|e| exit_on_config_error(e));

    info!(
        rpc = %cfg.rpc_url,
        agent = %chain.agent_address(),
        registry = %cfg.registry_address,
        "Connected to registry"
    );
    Arc::new(chain)
}

/// Configuration failures end the process before any monitoring starts.
fn exit_on_config_error(e: GuardError) -> ! {
    error!(kind = e.kind(), error = %e, "Startup aborted");
    eprintln!("guardian: {e}");
    std::process::exit(EXIT_CONFIG);
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("guardian=info"));

    let json_logging = std::env::var("GUARDIAN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
