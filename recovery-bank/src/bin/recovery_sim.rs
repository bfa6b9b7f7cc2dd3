//! Recovery bank simulator binary
//!
//! Reads a JSON session (schedule, overrides, constraints, requests),
//! runs the allocator and prints the outcome with a utilization report.

use anyhow::Context;
use recovery_bank::{AllocationResult, Config, RecoveryBank, Session, UtilizationReport};
use serde::Serialize;

#[derive(Serialize)]
struct SimulationOutput {
    allocation: AllocationResult,
    report: UtilizationReport,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: recovery-sim <session.json>")?;

    // Load configuration
    let config = match std::env::var("RECOVERY_CONFIG") {
        Ok(config_path) => Config::from_file(&config_path)
            .with_context(|| format!("loading config from {}", config_path))?,
        Err(_) => Config::from_env()?,
    };
    tracing::info!(service = %config.service_name, "Starting recovery bank simulation");

    let input = Session::from_file(&path).with_context(|| format!("loading session {}", path))?;

    let mut bank = RecoveryBank::new(config)?;
    bank.initialize_bank_batched(&input.schedule, &input.stop_configs, input.constraints)
        .await;

    let allocation = bank.find_optimal_allocation_batched(input.requests).await?;
    let report = bank.generate_utilization_report()?;

    for (name, stats) in bank.cache_stats() {
        tracing::debug!(cache = name, hits = stats.hits, misses = stats.misses, hit_rate = stats.hit_rate(), "Cache stats");
    }

    let output = SimulationOutput { allocation, report };
    println!("{}", serde_json::to_string_pretty(&output)?);

    tracing::info!(
        transactions = bank.get_transaction_history().len(),
        "Simulation finished"
    );
    Ok(())
}
