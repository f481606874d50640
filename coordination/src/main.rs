//! Swarm simulation driver
//!
//! Registers a pool of simulated workers, submits a batch of tasks, evolves
//! the swarm structure and prints the resulting metrics as JSON on stdout.
//!
//! # Usage
//!
//! ```bash
//! # Eight workers, twenty tasks, reproducible
//! swarm-sim --workers 8 --tasks 20 --seed 42
//!
//! # Settings from a file, verbose logs
//! RUST_LOG=swarm_coordination=debug swarm-sim --config swarm.toml
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use swarm_coordination::events::Mailbox;
use swarm_coordination::state::{ACCURACY_METRIC, COLLABORATION_METRIC};
use swarm_coordination::{
    Requirements, SwarmConfig, SwarmCoordinator, SwarmError, WorkerSnapshot,
};

/// Specializations cycled through when creating workers
const SPECIALIZATIONS: [&str; 4] = ["data", "analysis", "general", "validation"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of simulated workers
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Number of tasks to submit
    #[arg(long, default_value_t = 10)]
    tasks: usize,

    /// Task complexity in [0, 1]; cycles through all tiers when omitted
    #[arg(long)]
    complexity: Option<f64>,

    /// Seed for every heuristic (overrides SWARM_SEED)
    #[arg(long)]
    seed: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("swarm_coordination=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => SwarmConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SwarmConfig::from_env(),
    };
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        workers = args.workers,
        tasks = args.tasks,
        seed = ?config.seed,
        "Starting swarm simulation"
    );

    let swarm = SwarmCoordinator::new(config).shared();
    swarm.start().await?;

    let readers = CancellationToken::new();
    let mut inboxes = JoinSet::new();
    for i in 0..args.workers {
        let specialization = SPECIALIZATIONS[i % SPECIALIZATIONS.len()];
        // Spread starting metrics so roles and links differ across the pool
        let spread = (i % 5) as f64 * 0.1;
        let snapshot = WorkerSnapshot::new(format!("{}-{}", specialization, i), specialization)
            .with_metric(ACCURACY_METRIC, 0.5 + spread)
            .with_metric(COLLABORATION_METRIC, 0.45 + spread)
            .with_backlog(i % 3);
        let worker_id = snapshot.id.clone();
        let mailbox = swarm.open_mailbox(&worker_id);
        let role = swarm.add_worker(snapshot).await?;
        tracing::debug!(worker = i, role = %role, "Worker added");
        inboxes.spawn(read_mailbox(mailbox, readers.clone()));
    }

    let mut failed_tasks = 0usize;
    for i in 0..args.tasks {
        let complexity = args
            .complexity
            .unwrap_or_else(|| [0.2, 0.5, 0.8][i % 3]);
        match swarm
            .submit_task(format!("Task {}", i + 1), Requirements::new(), complexity, None)
            .await
        {
            Ok(result) => tracing::info!(
                task_id = %result.task_id,
                success = result.success,
                confidence = result.mean_confidence,
                "Task done"
            ),
            Err(SwarmError::NoSuccessfulSubtasks { task_id, .. }) => {
                failed_tasks += 1;
                tracing::warn!(task_id = %task_id, "Task produced no results");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let evolution = swarm.evolve_structure().await?;
    let metrics = swarm.metrics().await;
    let emergence = swarm.emergence_patterns().await;

    swarm.shutdown().await;
    readers.cancel();
    let mut received = 0u64;
    while let Some(count) = inboxes.join_next().await {
        received += count?;
    }
    let bus = swarm.bus().stats();

    let report = json!({
        "metrics": metrics,
        "failed_tasks": failed_tasks,
        "emergence_events": emergence.len(),
        "evolution": evolution,
        "bus": bus,
        "received": received,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Count deliveries until cancelled, then take whatever is left
async fn read_mailbox(mut mailbox: Mailbox, cancel: CancellationToken) -> u64 {
    let mut received = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = mailbox.recv() => match message {
                Some(message) => {
                    tracing::trace!(message_type = %message.message_type, "Delivery received");
                    received += 1;
                }
                None => return received,
            },
        }
    }
    while mailbox.try_recv().is_ok() {
        received += 1;
    }
    received
}
