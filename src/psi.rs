//! Private set intersection over salted hash commitments.
//!
//! Every element a party returns is immediately replaced by a keyed blake3
//! commitment under a salt drawn fresh for each run, and the raw set is dropped.
//! The coordinator intersects the commitment sets of all parties and reports
//! only the cardinality of the intersection.
//!
//! # Limitations
//!
//! This is not an oblivious PSI protocol. The coordinator sees the raw sets
//! before committing and learns the size of every party's set as well as which
//! commitments repeat across parties. The salt only prevents correlating
//! commitments across runs.

use std::collections::BTreeSet;

use rand::CryptoRng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{Level, info};

use crate::{
    client::{FanOut, PartyClient, PartyDataUnavailable},
    config::MpcConfig,
    hash::{Commitment, Salt, result_hash},
    party::Party,
};

/// Parameters of a PSI job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsiParams {
    /// The field whose values are intersected, e.g. `customer_id`.
    pub field: String,
    /// Also return the intersecting commitments. Raw elements are never returned.
    #[serde(default)]
    pub reveal_intersection: bool,
}

/// The outcome of a PSI run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsiResult {
    /// Number of elements held by every party.
    pub intersection_size: usize,
    /// Number of parties that took part.
    pub party_count: usize,
    /// Wall time of the protocol run.
    pub duration_ms: u64,
    /// SHA-256 over the sorted hex commitments of the intersection.
    pub result_hash: String,
    /// The sorted hex commitments of the intersection, if revealing was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intersection: Option<Vec<String>>,
}

/// Intersects all commitment sets. No sets yield an empty intersection.
pub fn intersect(sets: impl IntoIterator<Item = BTreeSet<Commitment>>) -> BTreeSet<Commitment> {
    let mut sets = sets.into_iter();
    let Some(mut intersection) = sets.next() else {
        return BTreeSet::new();
    };
    for set in sets {
        intersection.retain(|c| set.contains(c));
        if intersection.is_empty() {
            break;
        }
    }
    intersection
}

/// The PSI protocol over a [`PartyClient`].
pub struct PrivateSetIntersection<'a, C> {
    client: &'a C,
    fan_out: FanOut,
}

impl<'a, C: PartyClient> PrivateSetIntersection<'a, C> {
    /// Creates the protocol with the fan-out settings of `config`.
    pub fn new(client: &'a C, config: &MpcConfig) -> Self {
        Self {
            client,
            fan_out: FanOut::new(config),
        }
    }

    /// Collects the commitment sets of all parties and intersects them.
    ///
    /// Fails if a single party does not deliver its set; no intersection over a
    /// subset of the parties is ever computed.
    #[tracing::instrument(
        level = Level::DEBUG,
        skip_all,
        fields(field = %params.field, parties = parties.len())
    )]
    pub async fn run<R: CryptoRng>(
        &self,
        parties: &[Party],
        params: &PsiParams,
        rng: &mut R,
    ) -> Result<PsiResult, PartyDataUnavailable> {
        let start = Instant::now();
        let salt = &Salt::random(rng);
        let field = params.field.as_str();
        let sets = self
            .fan_out
            .all(parties, |party| async move {
                let set = self.client.query_local_set(party, field).await?;
                Ok::<_, C::Error>(
                    set.iter()
                        .map(|element| Commitment::new(salt, element))
                        .collect::<BTreeSet<_>>(),
                )
            })
            .await?;

        let intersection: Vec<String> = intersect(sets).iter().map(Commitment::to_hex).collect();
        let result_hash = result_hash(&intersection);
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            intersection_size = intersection.len(),
            duration_ms, "private set intersection computed"
        );
        Ok(PsiResult {
            intersection_size: intersection.len(),
            party_count: parties.len(),
            duration_ms,
            result_hash,
            intersection: params.reveal_intersection.then_some(intersection),
        })
    }
}
