// Reward Engine Simulator — seeded referral forests through activation and purchase flows
// Sandbox provider, injected faults, concurrent duplicates, full ledger audit per scenario
//
// Usage:
//   rewardsim                                  # All scenarios, default config
//   rewardsim --members 1000 --seed 42         # Larger forest, custom seed
//   rewardsim --config engine.toml PURCHASES   # Custom config, filter by name
//   rewardsim --snapshots                      # Also write each store as JSON

mod report;
mod scenarios;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use unilevel_engine::EngineConfig;

use report::{RunReport, ScenarioResult, Summary};
use scenarios::{run_scenario, scenarios, Scenario};

// ─── CLI ────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "rewardsim")]
#[command(about = "Drive the unilevel reward engine through seeded scenarios", long_about = None)]
struct Cli {
    /// Engine config TOML (UNILEVEL_* env overrides still apply)
    #[arg(short, long, env = "UNILEVEL_CONFIG")]
    config: Option<PathBuf>,

    /// Members in the generated referral forest
    #[arg(short, long, default_value = "200")]
    members: usize,

    /// Base PRNG seed
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Directory for the JSON run report
    #[arg(short, long, default_value = "rewardsim-results")]
    output_dir: PathBuf,

    /// Write each scenario's store snapshot next to the report
    #[arg(long)]
    snapshots: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    /// Only run scenarios whose name or label contains this
    filter: Option<String>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

// ─── Main ───────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %err, "rewardsim aborted");
            eprintln!("  error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool, Box<dyn Error + Send + Sync>> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };

    let all = scenarios();
    let to_run: Vec<&Scenario> = match &cli.filter {
        Some(f) => {
            let f = f.to_lowercase();
            all.iter()
                .filter(|s| s.name.to_lowercase().contains(&f) || s.label.to_lowercase().contains(&f))
                .collect()
        }
        None => all.iter().collect(),
    };
    if to_run.is_empty() {
        return Err(format!("no scenarios match filter {:?}", cli.filter).into());
    }

    std::fs::create_dir_all(&cli.output_dir)?;
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();

    println!("\n  Reward Engine Simulator");
    println!(
        "  PRNG: ChaCha8Rng | Members: {} | Seed: {} | Fee: {} {}",
        cli.members, cli.seed, config.activation.fee, config.activation.currency
    );
    println!("  Running {} scenario(s)...\n", to_run.len());
    println!(
        "  {:<36} {:>5} {:>6} {:>6} {:>7} {:>7} {:>14} {:>7}",
        "Scenario", "Pass", "Acts", "Fails", "Purch", "Grants", "Points", "Time"
    );
    println!("  {}", "-".repeat(98));

    let mut results: Vec<ScenarioResult> = Vec::with_capacity(to_run.len());
    for scenario in &to_run {
        let (result, world) = run_scenario(scenario, &config, cli.members, cli.seed).await?;

        println!(
            "  {:<36} {:>5} {:>6} {:>6} {:>7} {:>7} {:>14} {:>5}ms",
            result.label,
            if result.pass { "PASS" } else { "FAIL" },
            result.activations_ok,
            result.failures_total(),
            result.purchases_ok,
            result.grant_rows,
            result.total_points().round_dp(2),
            result.elapsed_ms,
        );
        if !result.audit.is_balanced() {
            for m in &result.audit.mismatches {
                println!("      mismatch {}: wallet {} ledger {}", m.member, m.balance, m.ledger_total);
            }
        }

        if cli.snapshots {
            let path = cli
                .output_dir
                .join(format!("{}-{}.snapshot.json", timestamp, result.name.to_lowercase()));
            std::fs::write(&path, world.store.to_json()?)?;
        }
        results.push(result);
    }

    // ─── Summary ────────────────────────────────────────────────────────

    let summary = Summary::from_results(&results);
    println!("  {}", "-".repeat(98));
    println!(
        "  Total: {}  Passed: {}  Failed: {}\n",
        summary.total, summary.passed, summary.failed
    );

    // ─── Write JSON Report ──────────────────────────────────────────────

    let all_pass = summary.failed == 0;
    let report = RunReport {
        timestamp: timestamp.clone(),
        version: env!("CARGO_PKG_VERSION"),
        prng: "ChaCha8Rng",
        seed: cli.seed,
        members: cli.members,
        summary,
        scenarios: results,
    };
    let path = cli.output_dir.join(format!("run-{timestamp}.json"));
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    println!("  Results saved to: {}\n", path.display());

    Ok(all_pass)
}
