//! ccwatch - local real-time usage-and-cost monitor for LLM coding
//! assistant CLIs.
//!
//! This binary is a thin driver around [`ccwatch_core::Pipeline`]: it
//! loads configuration, starts the backfill scan and live watcher, and
//! prints each snapshot. The TUI/console renderer, alert delivery
//! channels, and full config/env-mapping layer are external
//! collaborators this crate does not implement.

use anyhow::{Context, Result};
use ccwatch_core::config::Config;
use ccwatch_core::Pipeline;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "CCWATCH";

#[derive(Parser)]
#[command(
    name = "ccwatch",
    version,
    about = "Local real-time usage-and-cost monitor for LLM coding assistant CLIs",
    long_about = "Watches JSONL usage logs under one or more directories, detects 5-hour\n\
                  session windows, and prints real-time token/cost metrics and plan-limit\n\
                  warnings as they happen.\n\
                  \n\
                  Examples:\n\
                    ccwatch                              # watch ~/.claude with the pro plan\n\
                    ccwatch --path ~/.claude --plan max5\n\
                    ccwatch --config ccwatch.yaml --once"
)]
struct Cli {
    /// Directory tree(s) to watch for *.jsonl usage logs (repeatable).
    #[arg(long = "path")]
    paths: Vec<PathBuf>,

    /// Subscription plan: free, pro, max5, max20, or custom.
    #[arg(long)]
    plan: Option<String>,

    /// Cost limit in USD, required when --plan custom is set.
    #[arg(long)]
    custom_limit: Option<f64>,

    /// YAML config file; CLI flags and CCWATCH_* env vars override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the backfill scan once, print a final snapshot, and exit
    /// instead of watching for further changes.
    #[arg(long)]
    once: bool,

    /// Print each snapshot as JSON instead of a formatted summary.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if !cli.paths.is_empty() {
        config.data.paths = cli.paths.clone();
    }
    if config.data.paths.is_empty() {
        let home = dirs::home_dir().context("could not determine home directory for default watch path")?;
        config.data.paths = vec![home.join(".claude")];
    }
    if let Some(plan) = &cli.plan {
        config.subscription.plan = plan.clone();
    }
    if let Some(limit) = cli.custom_limit {
        config.subscription.custom_cost_limit = Some(limit);
    }

    let applied = config.apply_env_overrides(ENV_PREFIX);
    for name in &applied {
        tracing::debug!(var = %name, "applied environment override");
    }

    config.validate().context("invalid configuration")?;

    let pipeline = Pipeline::new(config).context("failed to construct pipeline")?;

    let json = cli.json;
    pipeline
        .subscribe(move |snapshot| {
            print_snapshot(snapshot, json);
        })
        .await;

    let report = pipeline.backfill().await;
    if report.has_critical_errors() {
        for error in &report.errors {
            tracing::error!(source = %error.source, message = %error.message, "backfill error");
        }
        anyhow::bail!("backfill scan failed with critical errors, see log for detail");
    }

    if cli.once {
        let snapshot = pipeline.current_snapshot().await;
        print_snapshot(&snapshot, cli.json);
        return Ok(());
    }

    pipeline.start_watching().await.context("failed to start file watcher")?;
    pipeline
        .wait_for_initial_data(Duration::from_secs(10))
        .await
        .context("timed out waiting for initial data")?;

    tracing::info!("ccwatch is running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    Ok(())
}

fn print_snapshot(snapshot: &ccwatch_core::Snapshot, json: bool) {
    if json {
        match serde_json::to_string(&SnapshotView::from(snapshot)) {
            Ok(s) => println!("{s}"),
            Err(e) => tracing::error!(error = %e, "failed to serialize snapshot"),
        }
        return;
    }

    let m = &snapshot.metrics;
    println!(
        "tokens: {}  cost: ${:.2}  progress: {:.0}%  burn: {:.1} tok/min  health: {:?}",
        m.current_tokens, m.current_cost, m.session_progress, m.tokens_per_minute, m.health_status
    );
    for warning in &snapshot.active_warnings {
        println!("  ! [{:?}] {}", warning.severity, warning.recommendation);
    }
}

/// Serializable projection of [`ccwatch_core::Snapshot`]; kept separate
/// from the core type since not every field in it is `Serialize`.
#[derive(serde::Serialize)]
struct SnapshotView {
    current_tokens: u64,
    current_cost: f64,
    session_progress: f64,
    tokens_per_minute: f64,
    cost_per_hour: f64,
    health_status: String,
    warnings: Vec<String>,
}

impl From<&ccwatch_core::Snapshot> for SnapshotView {
    fn from(snapshot: &ccwatch_core::Snapshot) -> Self {
        let m = &snapshot.metrics;
        Self {
            current_tokens: m.current_tokens,
            current_cost: m.current_cost,
            session_progress: m.session_progress,
            tokens_per_minute: m.tokens_per_minute,
            cost_per_hour: m.cost_per_hour,
            health_status: format!("{:?}", m.health_status),
            warnings: snapshot
                .active_warnings
                .iter()
                .map(|w| w.recommendation.clone())
                .collect(),
        }
    }
}
