//! Runs the jobs of a JSON scenario against simulated parties.
use std::{path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use clap::Parser;
use futures::future::try_join_all;
use mpc_engine::{
    Collaborators, InMemoryJobStore, InMemoryPartyDirectory, JobRequest, JobView, MpcConfig,
    MpcJobOrchestrator, OsEntropy, Party, PartyStatus, SimulatedPartyClient, Statistics,
    client::PartyDataset,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

/// Runs secure multi-party computation jobs over simulated parties.
///
/// Logging can be controlled with an EnvFilter via the `MPC_ENGINE_LOG` environment
/// variable. Logs are written to stderr, the job results as JSON to stdout.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// The JSON file describing the parties, their data and the jobs to run.
    scenario: PathBuf,
    /// Overrides the number of jobs executed at the same time.
    #[arg(long)]
    workers: Option<usize>,
    /// Overrides the Paillier modulus size of ephemeral keys.
    #[arg(long)]
    key_bits: Option<u32>,
    /// How often the state of running jobs is polled.
    #[arg(long, default_value_t = 50)]
    poll_interval_ms: u64,
    /// Also print job and party statistics.
    #[arg(long)]
    stats: bool,
}

/// The contents of a scenario file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Scenario {
    #[serde(default)]
    config: MpcConfig,
    parties: Vec<ScenarioParty>,
    jobs: Vec<JobRequest>,
}

/// A party together with the local data it answers queries from.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioParty {
    id: String,
    display_name: Option<String>,
    #[serde(default)]
    endpoint: String,
    #[serde(default = "online")]
    status: PartyStatus,
    #[serde(default)]
    data: PartyDataset,
}

fn online() -> PartyStatus {
    PartyStatus::Online
}

#[derive(Debug, Serialize)]
struct Report {
    jobs: Vec<JobView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    statistics: Option<Statistics>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing().context("tracing initialization")?;

    let cli = Cli::parse();
    let scenario = tokio::fs::read_to_string(&cli.scenario)
        .await
        .with_context(|| format!("could not read '{}'", cli.scenario.display()))?;
    let Scenario {
        mut config,
        parties,
        jobs,
    } = serde_json::from_str(&scenario)
        .with_context(|| format!("'{}' has an invalid format", cli.scenario.display()))?;
    if let Some(workers) = cli.workers {
        config.worker_concurrency = workers;
    }
    if let Some(key_bits) = cli.key_bits {
        config.paillier_key_bits = key_bits;
    }
    if jobs.len() > config.queue_capacity {
        bail!(
            "scenario has {} jobs, but the queue only holds {}",
            jobs.len(),
            config.queue_capacity
        );
    }

    let (parties, datasets): (Vec<_>, Vec<_>) = parties
        .into_iter()
        .map(|p| {
            let party = Party {
                display_name: p.display_name.unwrap_or_else(|| p.id.clone()),
                id: p.id.clone(),
                endpoint: p.endpoint,
                status: p.status,
            };
            (party, (p.id, p.data))
        })
        .unzip();
    info!(parties = parties.len(), jobs = jobs.len(), "loaded scenario");

    let orchestrator = MpcJobOrchestrator::spawn(
        Collaborators {
            directory: InMemoryPartyDirectory::new(parties),
            client: SimulatedPartyClient::new(datasets),
            store: InMemoryJobStore::new(),
            entropy: OsEntropy,
        },
        config,
    )
    .context("invalid engine configuration")?;

    let mut ids = Vec::with_capacity(jobs.len());
    for (i, job) in jobs.into_iter().enumerate() {
        let id = orchestrator
            .submit(job)
            .await
            .map_err(|err| anyhow::anyhow!(err.sanitized_message()))
            .with_context(|| format!("job #{i} was rejected"))?;
        ids.push(id);
    }

    let interval = Duration::from_millis(cli.poll_interval_ms);
    let views = try_join_all(ids.into_iter().map(|id| orchestrator.wait(id, interval))).await?;
    let statistics = if cli.stats {
        Some(orchestrator.statistics().await?)
    } else {
        None
    };

    let report = Report {
        jobs: views,
        statistics,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_env_var("MPC_ENGINE_LOG")
        .with_default_directive("mpc_engine=info".parse()?)
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
