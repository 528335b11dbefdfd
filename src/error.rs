//! Errors surfaced by the orchestrator.

use crate::{
    aggregation::AggregationError,
    client::PartyDataUnavailable,
    job::{JobId, StoreError},
    paillier::PaillierError,
    party::PartyId,
    shamir::SharingError,
};

/// Every error an [`MpcJobOrchestrator`] reports, either directly to the caller
/// or as the error message of a failed job.
///
/// The `Display` output never contains keys, shares, plaintexts or party data.
///
/// [`MpcJobOrchestrator`]: crate::MpcJobOrchestrator
#[derive(Debug, thiserror::Error)]
pub enum MpcError {
    /// A requested party is not registered.
    #[error("party {0} not found")]
    PartyNotFound(PartyId),
    /// A requested party is registered but offline.
    #[error("party {0} is offline")]
    PartyOffline(PartyId),
    /// The job request is malformed.
    #[error("invalid job request: {0}")]
    InvalidRequest(&'static str),
    /// Sharing or reconstruction failed.
    #[error(transparent)]
    Sharing(#[from] SharingError),
    /// A Paillier operation failed.
    #[error(transparent)]
    Paillier(#[from] PaillierError),
    /// A party did not deliver its data.
    #[error(transparent)]
    PartyData(#[from] PartyDataUnavailable),
    /// Secure aggregation failed.
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    /// The job store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// No job with this id exists.
    #[error("job {0} not found")]
    JobNotFound(JobId),
    /// Too many jobs are waiting for a worker.
    #[error("job queue is full")]
    QueueFull,
    /// The job runner is no longer running.
    #[error("job runner is stopped")]
    RunnerStopped,
    /// Job execution panicked.
    #[error("internal error while executing the job")]
    Internal,
}

impl MpcError {
    /// A short name of the error kind, e.g. `PartyOfflineError`.
    pub fn kind(&self) -> &'static str {
        match self {
            MpcError::PartyNotFound(_) => "PartyNotFoundError",
            MpcError::PartyOffline(_) => "PartyOfflineError",
            MpcError::InvalidRequest(_) => "InvalidRequestError",
            MpcError::Sharing(SharingError::InvalidThreshold { .. }) => "InvalidThresholdError",
            MpcError::Sharing(SharingError::InsufficientShares { .. }) => {
                "InsufficientSharesError"
            }
            MpcError::Sharing(SharingError::DuplicateShare { .. }) => "DuplicateShareError",
            MpcError::Sharing(SharingError::InvalidCoordinate) => "InvalidCoordinateError",
            MpcError::Paillier(PaillierError::CryptoParameter(_)) => "CryptoParameterError",
            MpcError::Paillier(PaillierError::PlaintextRange) => "PlaintextRangeError",
            MpcError::Paillier(PaillierError::InvalidCiphertext) => "InvalidCiphertextError",
            MpcError::PartyData(_) => "PartyDataUnavailableError",
            MpcError::Aggregation(_) => "AggregationError",
            MpcError::Store(_) => "StoreError",
            MpcError::JobNotFound(_) => "JobNotFoundError",
            MpcError::QueueFull => "QueueFullError",
            MpcError::RunnerStopped => "RunnerStoppedError",
            MpcError::Internal => "InternalError",
        }
    }

    /// The message recorded for a failed job: the error kind and its `Display`
    /// output, without any `source` errors, which may come from party transports.
    pub fn sanitized_message(&self) -> String {
        format!("{}: {self}", self.kind())
    }
}
