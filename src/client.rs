//! The boundary to the parties' own systems.
//!
//! A [`PartyClient`] is the only way the engine reaches a party. Calls are
//! fanned out with bounded concurrency and a per-call timeout; a failed or
//! timed out call is reported as [`PartyDataUnavailable`].

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use futures::{FutureExt, StreamExt, TryStreamExt, future::BoxFuture, stream};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{debug, warn};

use crate::{
    config::MpcConfig,
    joint_query::{LocalQuery, QueryType},
    party::{Party, PartyId},
};

/// A boxed error from a party transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Transport to the parties' local data services.
///
/// Implementations should log failures with a [`tracing::Level::WARN`] event
/// but must never log the returned data.
pub trait PartyClient: Send + Sync + 'static {
    /// The error returned by a failed call.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the party's local set of values for `field`.
    fn query_local_set(
        &self,
        party: &Party,
        field: &str,
    ) -> impl Future<Output = Result<BTreeSet<String>, Self::Error>> + Send;

    /// Returns the party's single local scalar for `field`.
    fn query_local_value(
        &self,
        party: &Party,
        field: &str,
    ) -> impl Future<Output = Result<BigUint, Self::Error>> + Send;

    /// Answers a joint query about a subject from the party's local records.
    fn query_local_scalar(
        &self,
        party: &Party,
        query: &LocalQuery,
    ) -> impl Future<Output = Result<BigUint, Self::Error>> + Send;
}

/// A party call that failed or timed out.
#[derive(Debug, thiserror::Error)]
pub enum PartyDataUnavailable {
    /// The party did not answer in time.
    #[error("party {party} did not respond within {timeout_ms} ms")]
    Timeout {
        /// The unresponsive party.
        party: PartyId,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },
    /// The transport returned an error.
    #[error("party {party} failed to provide its data")]
    Transport {
        /// The failing party.
        party: PartyId,
        /// The transport error. Not part of the message as it may echo party data.
        source: BoxError,
    },
}

/// Bounded-concurrency fan-out of one call per party.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FanOut {
    concurrency: usize,
    timeout: Duration,
}

impl FanOut {
    pub(crate) fn new(config: &MpcConfig) -> Self {
        Self {
            concurrency: config.party_concurrency.max(1),
            timeout: config.party_timeout(),
        }
    }

    /// Calls every party and waits for all of them. Fails as soon as one call fails.
    ///
    /// Results are returned in completion order.
    pub(crate) async fn all<'p, T, E, F, Fut>(
        &self,
        parties: &'p [Party],
        call: F,
    ) -> Result<Vec<T>, PartyDataUnavailable>
    where
        F: Fn(&'p Party) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'p,
        T: Send + 'p,
        E: Into<BoxError> + Send + 'p,
    {
        debug!(parties = parties.len(), "fanning out to all parties");
        // the calls are created up front, so no closure is held across an await
        let calls = self.prepare(parties.iter().map(|party| (party, call(party))));
        drop(call);
        let responses: Vec<T> = stream::iter(calls)
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        debug!(responses = responses.len(), "all parties responded");
        Ok(responses)
    }

    /// Calls every target and returns as soon as `threshold` calls succeeded.
    ///
    /// Each target pairs a party with the request it receives. Failed calls are
    /// skipped. If `deadline` elapses first, the responses collected so far are
    /// returned, which may be fewer than `threshold`.
    pub(crate) async fn first<'p, A, I, T, E, F, Fut>(
        &self,
        targets: I,
        threshold: usize,
        deadline: Duration,
        call: F,
    ) -> Vec<T>
    where
        I: IntoIterator<Item = (&'p Party, A)>,
        F: Fn(&'p Party, A) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'p,
        T: Send + 'p,
        E: Into<BoxError> + Send + 'p,
    {
        debug!(threshold, "fanning out until threshold");
        let calls = self.prepare(
            targets
                .into_iter()
                .map(|(party, request)| (party, call(party, request))),
        );
        drop(call);
        let mut responses = stream::iter(calls).buffer_unordered(self.concurrency);
        let mut collected = Vec::with_capacity(threshold);
        let gather = async {
            while let Some(response) = responses.next().await {
                match response {
                    Ok(value) => {
                        collected.push(value);
                        if collected.len() >= threshold {
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "skipping party response"),
                }
            }
        };
        if time::timeout(deadline, gather).await.is_err() {
            warn!(
                deadline_ms = deadline.as_millis() as u64,
                "deadline elapsed before threshold was reached"
            );
        }
        debug!(responses = collected.len(), "threshold fan-out finished");
        collected
    }

    fn prepare<'p, T, E, Fut>(
        &self,
        calls: impl Iterator<Item = (&'p Party, Fut)>,
    ) -> Vec<BoxFuture<'p, Result<T, PartyDataUnavailable>>>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'p,
        T: Send + 'p,
        E: Into<BoxError> + Send + 'p,
    {
        let timeout = self.timeout;
        calls
            .map(|(party, call)| ask(party, timeout, call).boxed())
            .collect()
    }
}

async fn ask<T, E, Fut>(
    party: &Party,
    timeout: Duration,
    call: Fut,
) -> Result<T, PartyDataUnavailable>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    match time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(PartyDataUnavailable::Transport {
            party: party.id.clone(),
            source: err.into(),
        }),
        Err(_) => Err(PartyDataUnavailable::Timeout {
            party: party.id.clone(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// The local data of one simulated party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyDataset {
    /// Sets of values per field, used by private set intersection.
    pub sets: BTreeMap<String, BTreeSet<String>>,
    /// A single value per field, used by secure aggregation.
    pub values: BTreeMap<String, u64>,
    /// Query answers per subject, used by joint queries. Unknown subjects answer 0.
    pub records: BTreeMap<String, BTreeMap<QueryType, u64>>,
}

/// Misbehavior injected into a simulated party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every call is answered after the given delay.
    Delay(Duration),
    /// Every call fails.
    Unavailable,
}

/// Errors of the [`SimulatedPartyClient`].
#[derive(Debug, thiserror::Error)]
pub enum SimulatedError {
    /// The party has no dataset.
    #[error("party {0} is unknown to the simulation")]
    UnknownParty(PartyId),
    /// The party has no data for the requested field.
    #[error("party {party} has no field {field}")]
    UnknownField {
        /// The queried party.
        party: PartyId,
        /// The missing field.
        field: String,
    },
    /// The party was configured to fail.
    #[error("party {0} is unavailable")]
    Unavailable(PartyId),
}

/// An in-process [`PartyClient`] answering from in-memory datasets.
#[derive(Debug, Default)]
pub struct SimulatedPartyClient {
    datasets: BTreeMap<PartyId, PartyDataset>,
    faults: BTreeMap<PartyId, Fault>,
    calls: AtomicUsize,
}

impl SimulatedPartyClient {
    /// Creates a client for the given per-party datasets.
    pub fn new(datasets: impl IntoIterator<Item = (PartyId, PartyDataset)>) -> Self {
        Self {
            datasets: datasets.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Injects a fault into every call to `party`.
    pub fn with_fault(mut self, party: impl Into<PartyId>, fault: Fault) -> Self {
        self.faults.insert(party.into(), fault);
        self
    }

    /// The number of calls made so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn dataset(&self, party: &Party) -> Result<&PartyDataset, SimulatedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.faults.get(&party.id) {
            Some(Fault::Delay(delay)) => time::sleep(*delay).await,
            Some(Fault::Unavailable) => {
                warn!(party = %party.id, "simulated party is unavailable");
                return Err(SimulatedError::Unavailable(party.id.clone()));
            }
            None => {}
        }
        self.datasets
            .get(&party.id)
            .ok_or_else(|| SimulatedError::UnknownParty(party.id.clone()))
    }
}

impl PartyClient for SimulatedPartyClient {
    type Error = SimulatedError;

    async fn query_local_set(
        &self,
        party: &Party,
        field: &str,
    ) -> Result<BTreeSet<String>, Self::Error> {
        let dataset = self.dataset(party).await?;
        dataset
            .sets
            .get(field)
            .cloned()
            .ok_or_else(|| SimulatedError::UnknownField {
                party: party.id.clone(),
                field: field.to_string(),
            })
    }

    async fn query_local_value(&self, party: &Party, field: &str) -> Result<BigUint, Self::Error> {
        let dataset = self.dataset(party).await?;
        dataset
            .values
            .get(field)
            .map(|v| BigUint::from(*v))
            .ok_or_else(|| SimulatedError::UnknownField {
                party: party.id.clone(),
                field: field.to_string(),
            })
    }

    async fn query_local_scalar(
        &self,
        party: &Party,
        query: &LocalQuery,
    ) -> Result<BigUint, Self::Error> {
        let dataset = self.dataset(party).await?;
        let answer = dataset
            .records
            .get(query.subject())
            .and_then(|record| record.get(&query.query_type))
            .copied()
            .unwrap_or(0);
        Ok(BigUint::from(answer))
    }
}
