//! # noderoute CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Check a cluster configuration
//! noderoute validate -c config/cluster.example.toml
//!
//! # Push 1000 simulated calls through a router built from it
//! noderoute simulate -c config/cluster.example.toml -r 1000 -o orders.get --failure-rate 0.05
//!
//! # Watch a dead node get cut off by its circuit breaker
//! noderoute simulate -c config/cluster.example.toml --down node-2 --concurrency 1
//! ```
//!
//! Logs go to stderr and honour `RUST_LOG`; reports go to stdout as JSON.

use anyhow::{Context, Result};
use argh::FromArgs;
use noderoute_cli::sim::{run_workload, SimulatedExecutor, SimulatedProbe, Workload};
use noderoute_common::ClusterConfig;
use noderoute_router::Router;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(FromArgs)]
/// noderoute - rule-based, circuit-broken request router
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Validate(ValidateArgs),
    Simulate(SimulateArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "validate")]
/// validate a cluster configuration file
struct ValidateArgs {
    /// path to the cluster TOML file
    #[argh(option, short = 'c')]
    config: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "simulate")]
/// route a simulated workload and print metrics
struct SimulateArgs {
    /// path to the cluster TOML file
    #[argh(option, short = 'c')]
    config: String,

    /// number of calls to route
    #[argh(option, short = 'r', default = "100")]
    requests: usize,

    /// operation name for every call
    #[argh(option, short = 'o', default = "String::from(\"default\")")]
    operation: String,

    /// probability in [0, 1] that any call fails
    #[argh(option, long = "failure-rate", default = "0.0")]
    failure_rate: f64,

    /// session id, required by the sticky strategy
    #[argh(option, long = "session")]
    session: Option<String>,

    /// calls in flight at once
    #[argh(option, long = "concurrency", default = "8")]
    concurrency: usize,

    /// seed for latency, failures and weighted selection
    #[argh(option, long = "seed")]
    seed: Option<u64>,

    /// node id that fails every call and health probe (repeatable)
    #[argh(option, long = "down")]
    down: Vec<String>,

    /// per-call timeout in milliseconds
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// health check rounds to run before the workload
    #[argh(option, long = "health-rounds", default = "0")]
    health_rounds: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Set default log level to INFO, but allow RUST_LOG env var to override
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate(args) => run_validate(args),
        Commands::Simulate(args) => run_simulate(args).await,
    }
}

fn load_config(path: &str) -> Result<ClusterConfig> {
    ClusterConfig::load(path).with_context(|| format!("Invalid cluster config {}", path))
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    println!("{}", summarize(&config));
    Ok(())
}

/// Human-readable overview of a validated config.
fn summarize(config: &ClusterConfig) -> String {
    let nodes = config.discovery.static_nodes();
    let mut lines = vec![
        format!("cluster:  {}", config.name),
        format!("strategy: {}", config.load_balancing),
        format!("nodes:    {}", nodes.len()),
    ];
    for node in nodes {
        lines.push(format!("  - {} {} (weight {})", node.id, node.url, node.weight));
    }
    lines.push(format!("rules:    {}", config.routing_rules.len()));
    for rule in &config.routing_rules {
        lines.push(format!("  - /{}/ -> {}", rule.pattern, rule.targets.join(", ")));
    }
    let cb = &config.circuit_breaker;
    lines.push(if cb.enabled {
        format!(
            "breaker:  open after {} failures, retry after {}ms",
            cb.failure_threshold, cb.reset_timeout_ms
        )
    } else {
        "breaker:  disabled".to_string()
    });
    lines.join("\n")
}

async fn run_simulate(args: SimulateArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.failure_rate) {
        anyhow::bail!("--failure-rate must be between 0 and 1, got {}", args.failure_rate);
    }
    let config = load_config(&args.config)?;

    let executor = SimulatedExecutor::new(args.failure_rate, args.seed)
        .with_down_nodes(args.down.iter().cloned());
    let probe = SimulatedProbe::new(executor.down_nodes().clone());

    let mut builder = Router::builder(config, Arc::new(executor)).health_probe(Arc::new(probe));
    if let Some(seed) = args.seed {
        builder = builder.rng_seed(seed);
    }
    let router = Arc::new(builder.build().await?);

    for _ in 0..args.health_rounds {
        router.check_health().await;
    }

    let workload = Workload {
        requests: args.requests,
        operation: args.operation,
        session_id: args.session,
        concurrency: args.concurrency,
        timeout: args.timeout_ms.map(Duration::from_millis),
    };
    tracing::info!(
        requests = workload.requests,
        operation = %workload.operation,
        concurrency = workload.concurrency,
        "Running simulated workload"
    );
    let summary = run_workload(Arc::clone(&router), &workload).await;

    let report = json!({
        "workload": summary,
        "metrics": router.publish_metrics(),
        "breakers": router.breakers(),
        "nodes": router.nodes(),
    });
    router.shutdown();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests;
