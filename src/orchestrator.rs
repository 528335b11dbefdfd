//! The job lifecycle: validation, scheduling onto a bounded worker pool and
//! recording of the terminal state.
//!
//! [`MpcJobOrchestrator`] is a cheaply clonable handle. Submitted jobs are sent
//! to a [`JobRunner`] over a bounded channel; the runner executes at most
//! `worker_concurrency` jobs at the same time, each in its own task. The task
//! executing a job is the only writer of that job's status.

use std::{collections::HashSet, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use chrono::Utc;
use futures::FutureExt;
use rand::CryptoRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{
    Semaphore,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, error, info};

use crate::{
    aggregation::SecureAggregation,
    client::PartyClient,
    config::{ConfigError, MpcConfig},
    error::MpcError,
    job::{
        JobId, JobParams, JobQuery, JobResult, JobStatistics, JobStore, JobUpdate, JobView, MpcJob,
        Page,
    },
    joint_query::JointQuery,
    party::{Party, PartyDirectory, PartyId},
    psi::PrivateSetIntersection,
    rng::EntropySource,
    shamir::SharingError,
};

/// A request to run a protocol over a set of parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Participating parties, unique and in order.
    pub party_ids: Vec<PartyId>,
    /// The protocol and its parameters.
    pub params: JobParams,
}

/// The collaborators an orchestrator works with.
pub struct Collaborators<D, C, S, E> {
    /// Where parties are looked up.
    pub directory: D,
    /// How parties are reached.
    pub client: C,
    /// Where jobs are persisted.
    pub store: S,
    /// Where job randomness comes from.
    pub entropy: E,
}

/// Job and party counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Job counts per status and type.
    pub jobs: JobStatistics,
    /// Number of registered parties.
    pub total_parties: usize,
    /// Number of online parties.
    pub online_parties: usize,
}

#[derive(Debug)]
enum JobCmd {
    Run(QueuedJob),
}

struct QueuedJob {
    id: JobId,
    parties: Vec<Party>,
    params: JobParams,
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob")
            .field("id", &self.id)
            .field("job_type", &self.params.job_type())
            .field("parties", &self.parties.len())
            .finish()
    }
}

struct Shared<D, C, S, E> {
    directory: D,
    client: C,
    store: S,
    entropy: E,
    config: MpcConfig,
}

/// Executes submitted jobs on a bounded pool of tasks.
///
/// The runner stops once every [`MpcJobOrchestrator`] handle is dropped. Jobs
/// that are already executing run to completion.
pub struct JobRunner<D, C, S, E> {
    shared: Arc<Shared<D, C, S, E>>,
    workers: Arc<Semaphore>,
    cmd_rx: mpsc::Receiver<JobCmd>,
}

/// Submits jobs and reports their state.
pub struct MpcJobOrchestrator<D, C, S, E> {
    shared: Arc<Shared<D, C, S, E>>,
    cmd_tx: mpsc::Sender<JobCmd>,
}

impl<D, C, S, E> Clone for MpcJobOrchestrator<D, C, S, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cmd_tx: self.cmd_tx.clone(),
        }
    }
}

impl<D, C, S, E> JobRunner<D, C, S, E>
where
    D: PartyDirectory,
    C: PartyClient,
    S: JobStore,
    E: EntropySource,
{
    /// Creates the runner and a handle to submit jobs to it.
    ///
    /// Nothing is executed until [`JobRunner::start`] is awaited.
    pub fn new(
        collaborators: Collaborators<D, C, S, E>,
        config: MpcConfig,
    ) -> Result<(Self, MpcJobOrchestrator<D, C, S, E>), ConfigError> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = mpsc::channel(config.queue_capacity);
        let workers = Arc::new(Semaphore::new(config.worker_concurrency));
        let Collaborators {
            directory,
            client,
            store,
            entropy,
        } = collaborators;
        let shared = Arc::new(Shared {
            directory,
            client,
            store,
            entropy,
            config,
        });
        Ok((
            Self {
                shared: Arc::clone(&shared),
                workers,
                cmd_rx,
            },
            MpcJobOrchestrator { shared, cmd_tx },
        ))
    }

    /// Executes queued jobs until all handles are dropped.
    pub async fn start(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            debug!("handling {cmd:?}");
            match cmd {
                JobCmd::Run(job) => {
                    let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
                        error!("worker semaphore closed, stopping job runner");
                        return;
                    };
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        shared.execute(job).await;
                        drop(permit);
                    });
                }
            }
        }
        debug!("all handles dropped, stopping job runner");
    }
}

impl<D, C, S, E> MpcJobOrchestrator<D, C, S, E>
where
    D: PartyDirectory,
    C: PartyClient,
    S: JobStore,
    E: EntropySource,
{
    /// Creates an orchestrator whose [`JobRunner`] is spawned on the current tokio runtime.
    ///
    /// # Panics
    /// - If called outside of a tokio runtime.
    pub fn spawn(
        collaborators: Collaborators<D, C, S, E>,
        config: MpcConfig,
    ) -> Result<Self, ConfigError> {
        let (runner, handle) = JobRunner::new(collaborators, config)?;
        tokio::spawn(runner.start());
        Ok(handle)
    }

    /// Validates the request, stores a `Pending` job and queues it for execution.
    ///
    /// Unknown or offline parties and malformed parameters are rejected before
    /// a job is created and before any cryptographic work is done.
    #[tracing::instrument(
        skip_all,
        fields(job_type = ?request.params.job_type(), parties = request.party_ids.len())
    )]
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, MpcError> {
        let parties = self.shared.preflight(&request)?;
        let slot = self.cmd_tx.try_reserve().map_err(|err| match err {
            TrySendError::Full(_) => MpcError::QueueFull,
            TrySendError::Closed(_) => MpcError::RunnerStopped,
        })?;
        let job = MpcJob::new(request.party_ids, request.params.without_secrets());
        let id = job.id;
        self.shared.store.insert(job).await?;
        slot.send(JobCmd::Run(QueuedJob {
            id,
            parties,
            params: request.params,
        }));
        info!(%id, "job submitted");
        Ok(id)
    }

    /// The current state of a job.
    pub async fn status(&self, id: JobId) -> Result<JobView, MpcError> {
        self.shared
            .store
            .find_by_id(id)
            .await?
            .map(|job| job.view())
            .ok_or(MpcError::JobNotFound(id))
    }

    /// Polls the job every `interval` until it reached a terminal state.
    pub async fn wait(&self, id: JobId, interval: Duration) -> Result<JobView, MpcError> {
        loop {
            let view = self.status(id).await?;
            if view.status.is_terminal() {
                return Ok(view);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Lists jobs, newest first.
    pub async fn list(&self, query: JobQuery) -> Result<Page<JobView>, MpcError> {
        let page = self.shared.store.list(query).await?;
        Ok(page.map(|job| job.view()))
    }

    /// Job counts per status and type, and party counts.
    pub async fn statistics(&self) -> Result<Statistics, MpcError> {
        let jobs = self.shared.store.statistics().await?;
        let parties = self.shared.directory.all();
        Ok(Statistics {
            jobs,
            total_parties: parties.len(),
            online_parties: parties.iter().filter(|p| p.is_online()).count(),
        })
    }
}

impl<D, C, S, E> Shared<D, C, S, E>
where
    D: PartyDirectory,
    C: PartyClient,
    S: JobStore,
    E: EntropySource,
{
    fn preflight(&self, request: &JobRequest) -> Result<Vec<Party>, MpcError> {
        if request.party_ids.is_empty() {
            return Err(MpcError::InvalidRequest("a job needs at least one party"));
        }
        let mut seen = HashSet::with_capacity(request.party_ids.len());
        if !request.party_ids.iter().all(|id| seen.insert(id)) {
            return Err(MpcError::InvalidRequest("party ids must be unique"));
        }
        let parties = request
            .party_ids
            .iter()
            .map(|id| match self.directory.find(id) {
                None => Err(MpcError::PartyNotFound(id.clone())),
                Some(party) if !party.is_online() => Err(MpcError::PartyOffline(id.clone())),
                Some(party) => Ok(party),
            })
            .collect::<Result<Vec<_>, _>>()?;

        match &request.params {
            JobParams::Psi(params) if params.field.is_empty() => {
                Err(MpcError::InvalidRequest("field must not be empty"))
            }
            JobParams::SecureSum(params) if params.field.is_empty() => {
                Err(MpcError::InvalidRequest("field must not be empty"))
            }
            JobParams::JointQuery(params) if params.subject.is_empty() => {
                Err(MpcError::InvalidRequest("subject must not be empty"))
            }
            JobParams::JointQuery(params)
                if params.threshold < 1 || params.threshold as usize > parties.len() =>
            {
                Err(MpcError::Sharing(SharingError::InvalidThreshold {
                    threshold: params.threshold,
                    parties: parties.len().try_into().unwrap_or(u32::MAX),
                }))
            }
            _ => Ok(parties),
        }
    }

    #[tracing::instrument(skip_all, fields(job_id = %job.id, job_type = ?job.params.job_type()))]
    async fn execute(&self, job: QueuedJob) {
        if let Err(err) = self
            .store
            .update_status(job.id, JobUpdate::Running { at: Utc::now() })
            .await
        {
            error!(%err, "unable to start job");
            return;
        }
        info!("job running");

        // drawing entropy may panic as well, e.g. if the OS generator fails
        let outcome = AssertUnwindSafe(async {
            let mut rng = self.entropy.rng();
            self.run_protocol(&job, &mut rng).await
        })
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(MpcError::Internal));

        let update = match outcome {
            Ok(result) => {
                info!(result_hash = result.result_hash(), "job succeeded");
                JobUpdate::Succeeded {
                    result,
                    at: Utc::now(),
                }
            }
            Err(err) => {
                let message = err.sanitized_message();
                error!(error = %message, "job failed");
                JobUpdate::Failed {
                    error: message,
                    at: Utc::now(),
                }
            }
        };
        if let Err(err) = self.store.update_status(job.id, update).await {
            error!(%err, "unable to record job outcome");
        }
    }

    async fn run_protocol<R: CryptoRng + Send>(
        &self,
        job: &QueuedJob,
        rng: &mut R,
    ) -> Result<JobResult, MpcError> {
        let result = match &job.params {
            JobParams::Psi(params) => JobResult::Psi(
                PrivateSetIntersection::new(&self.client, &self.config)
                    .run(&job.parties, params, rng)
                    .await?,
            ),
            JobParams::SecureSum(params) => JobResult::SecureSum(
                SecureAggregation::new(&self.client, &self.config)
                    .run(&job.parties, params, rng)
                    .await?,
            ),
            JobParams::JointQuery(params) => JobResult::JointQuery(
                JointQuery::new(&self.client, &self.config)
                    .run(&job.parties, params, rng)
                    .await?,
            ),
        };
        Ok(result)
    }
}
