//! MPC jobs, their lifecycle and their storage.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    aggregation::{SecureSumParams, SecureSumResult},
    client::BoxError,
    joint_query::{JointQueryParams, JointQueryResult},
    party::PartyId,
    psi::{PsiParams, PsiResult},
};

/// Unique identifier of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The protocol a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Private set intersection.
    Psi,
    /// Secure aggregation of one scalar per party.
    SecureSum,
    /// Threshold joint query about a subject.
    JointQuery,
}

/// A static description of a protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolInfo {
    /// Display name of the protocol.
    pub name: &'static str,
    /// What the protocol computes.
    pub description: &'static str,
    /// The cryptographic building block.
    pub primitive: &'static str,
    /// The adversary model the protocol is secure against.
    pub security_model: &'static str,
}

impl JobType {
    /// All job types.
    pub const ALL: [JobType; 3] = [JobType::Psi, JobType::SecureSum, JobType::JointQuery];

    /// Describes the protocol behind this job type.
    pub fn protocol_info(self) -> ProtocolInfo {
        match self {
            JobType::Psi => ProtocolInfo {
                name: "Private Set Intersection",
                description: "size of the intersection of all parties' sets",
                primitive: "salted hash commitments",
                security_model: "semi-honest",
            },
            JobType::SecureSum => ProtocolInfo {
                name: "Secure Aggregation",
                description: "sum of one value per party",
                primitive: "Paillier additive homomorphic encryption",
                security_model: "semi-honest",
            },
            JobType::JointQuery => ProtocolInfo {
                name: "Joint Query",
                description: "threshold query about a single subject",
                primitive: "Shamir secret sharing",
                security_model: "semi-honest",
            },
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted and waiting for a worker.
    Pending,
    /// Executing.
    Running,
    /// Finished with a result. Terminal.
    Success,
    /// Finished with an error. Terminal.
    Failed,
}

impl JobStatus {
    /// Returns `true` for `Success` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// The only allowed edges are `Pending -> Running -> {Success, Failed}`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Success)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

/// Protocol specific parameters. The variant determines the [`JobType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobParams {
    /// Parameters of a PSI job.
    Psi(PsiParams),
    /// Parameters of a secure sum job.
    SecureSum(SecureSumParams),
    /// Parameters of a joint query job.
    JointQuery(JointQueryParams),
}

impl JobParams {
    /// The job type these parameters belong to.
    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::Psi(_) => JobType::Psi,
            JobParams::SecureSum(_) => JobType::SecureSum,
            JobParams::JointQuery(_) => JobType::JointQuery,
        }
    }

    /// The parameters as they are stored with a job, without private key material.
    pub fn without_secrets(&self) -> JobParams {
        match self {
            JobParams::SecureSum(params) => JobParams::SecureSum(SecureSumParams {
                field: params.field.clone(),
                key: params.key.without_secrets(),
            }),
            other => other.clone(),
        }
    }
}

/// The result of a successful job. Never contains shares, ciphertexts or raw party data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobResult {
    /// Result of a PSI job.
    Psi(PsiResult),
    /// Result of a secure sum job.
    SecureSum(SecureSumResult),
    /// Result of a joint query job.
    JointQuery(JointQueryResult),
}

impl JobResult {
    /// The tamper-evidence digest of the result.
    pub fn result_hash(&self) -> &str {
        match self {
            JobResult::Psi(r) => &r.result_hash,
            JobResult::SecureSum(r) => &r.result_hash,
            JobResult::JointQuery(r) => &r.result_hash,
        }
    }
}

/// A job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpcJob {
    /// Unique id.
    pub id: JobId,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Participating parties in request order.
    pub party_ids: Vec<PartyId>,
    /// Protocol parameters.
    pub params: JobParams,
    /// Set once the job succeeded.
    pub result: Option<JobResult>,
    /// Set once the job failed. Free of secret material.
    pub error_message: Option<String>,
    /// When the job was accepted.
    pub created_at: DateTime<Utc>,
    /// When the job started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
}

impl MpcJob {
    /// A new `Pending` job.
    pub fn new(party_ids: Vec<PartyId>, params: JobParams) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            party_ids,
            params,
            result: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// The protocol this job runs.
    pub fn job_type(&self) -> JobType {
        self.params.job_type()
    }

    /// The externally visible state of this job.
    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            job_type: self.job_type(),
            status: self.status,
            party_ids: self.party_ids.clone(),
            result: self.result.clone(),
            error: self.error_message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }

    fn apply(&mut self, update: JobUpdate) -> Result<(), StoreError> {
        let next = update.status();
        if !self.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        match update {
            JobUpdate::Running { at } => self.started_at = Some(at),
            JobUpdate::Succeeded { result, at } => {
                self.result = Some(result);
                self.ended_at = Some(at);
            }
            JobUpdate::Failed { error, at } => {
                self.error_message = Some(error);
                self.ended_at = Some(at);
            }
        }
        Ok(())
    }
}

/// What callers see of a job. Parameters are left out as they may be secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    /// Unique id.
    pub id: JobId,
    /// The protocol of the job.
    pub job_type: JobType,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Participating parties.
    pub party_ids: Vec<PartyId>,
    /// The result, once the job succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// The sanitized error, once the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job was accepted.
    pub created_at: DateTime<Utc>,
    /// When the job started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// A status transition together with the data it records.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// `Pending -> Running`.
    Running {
        /// Start time.
        at: DateTime<Utc>,
    },
    /// `Running -> Success`.
    Succeeded {
        /// The protocol result.
        result: JobResult,
        /// End time.
        at: DateTime<Utc>,
    },
    /// `Running -> Failed`.
    Failed {
        /// Sanitized error message.
        error: String,
        /// End time.
        at: DateTime<Utc>,
    },
}

impl JobUpdate {
    /// The status this update transitions to.
    pub fn status(&self) -> JobStatus {
        match self {
            JobUpdate::Running { .. } => JobStatus::Running,
            JobUpdate::Succeeded { .. } => JobStatus::Success,
            JobUpdate::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// A page request with optional filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobQuery {
    /// Zero-based page number.
    pub page: usize,
    /// Page size.
    pub size: usize,
    /// Only jobs of this type.
    pub job_type: Option<JobType>,
    /// Only jobs in this state.
    pub status: Option<JobStatus>,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            page: 0,
            size: 20,
            job_type: None,
            status: None,
        }
    }
}

impl JobQuery {
    fn matches(&self, job: &MpcJob) -> bool {
        self.job_type.is_none_or(|t| t == job.job_type())
            && self.status.is_none_or(|s| s == job.status)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// The items on this page.
    pub items: Vec<T>,
    /// Zero-based page number.
    pub page: usize,
    /// Requested page size.
    pub size: usize,
    /// Number of matching items over all pages.
    pub total: usize,
}

impl<T> Page<T> {
    /// Converts the items of the page.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }
}

/// Job counts per status and per type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatistics {
    /// Number of jobs.
    pub total: usize,
    /// Number of jobs per status.
    pub by_status: BTreeMap<JobStatus, usize>,
    /// Number of jobs per type.
    pub by_type: BTreeMap<JobType, usize>,
}

/// Errors of a [`JobStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No job with this id exists.
    #[error("job {0} not found")]
    NotFound(JobId),
    /// A job with this id already exists.
    #[error("job {0} already exists")]
    Duplicate(JobId),
    /// The update is not a legal lifecycle transition.
    #[error("job {id} cannot transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// The job.
        id: JobId,
        /// Its current state.
        from: JobStatus,
        /// The requested state.
        to: JobStatus,
    },
    /// The storage backend failed.
    #[error("job store backend error")]
    Backend(#[source] BoxError),
}

/// Persistence of job records.
///
/// Implementations must reject updates that are not a legal lifecycle
/// transition, which makes terminal jobs immutable. When several orchestrators
/// share one store, updates of the same job must be serialized.
pub trait JobStore: Send + Sync + 'static {
    /// Stores a new job.
    fn insert(&self, job: MpcJob) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Applies a status transition.
    fn update_status(
        &self,
        id: JobId,
        update: JobUpdate,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Looks up a job.
    fn find_by_id(&self, id: JobId)
    -> impl Future<Output = Result<Option<MpcJob>, StoreError>> + Send;

    /// Lists jobs matching `query`, newest first.
    fn list(
        &self,
        query: JobQuery,
    ) -> impl Future<Output = Result<Page<MpcJob>, StoreError>> + Send;

    /// Counts jobs per status and type.
    fn statistics(&self) -> impl Future<Output = Result<JobStatistics, StoreError>> + Send;
}

/// A [`JobStore`] held in memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<BTreeMap<JobId, MpcJob>>,
}

impl InMemoryJobStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: MpcJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn update_status(&self, id: JobId, update: JobUpdate) -> Result<(), StoreError> {
        self.jobs
            .write()
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?
            .apply(update)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<MpcJob>, StoreError> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn list(&self, query: JobQuery) -> Result<Page<MpcJob>, StoreError> {
        let jobs = self.jobs.read();
        let mut matching: Vec<&MpcJob> = jobs.values().filter(|job| query.matches(job)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(query.page.saturating_mul(query.size))
            .take(query.size)
            .cloned()
            .collect();
        Ok(Page {
            items,
            page: query.page,
            size: query.size,
            total,
        })
    }

    async fn statistics(&self) -> Result<JobStatistics, StoreError> {
        let jobs = self.jobs.read();
        let mut stats = JobStatistics {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs.values() {
            *stats.by_status.entry(job.status).or_default() += 1;
            *stats.by_type.entry(job.job_type()).or_default() += 1;
        }
        Ok(stats)
    }
}
