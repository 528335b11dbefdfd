//! Threshold joint queries about a single subject.
//!
//! The subject is encoded as a field element and split into Shamir shares,
//! one per party. Every party answers the query from its own records and the
//! answer is paired with the x-coordinate of that party's share. As soon as
//! `t` such result-shares arrived, the combined answer is reconstructed by
//! Lagrange interpolation. With fewer than `t` answers nothing is returned.

use std::{fmt, time::Duration};

use num_bigint::BigUint;
use rand::CryptoRng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{Level, debug, info};

use crate::{
    bigint::decimal,
    client::{FanOut, PartyClient},
    config::MpcConfig,
    hash::scalar_result_hash,
    party::Party,
    shamir::{SecretShare, SecretSharingEngine, SharingError, reconstruct},
};

/// The closed set of queries a party can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    /// Total outstanding debt of the subject.
    TotalDebt,
    /// Total assets of the subject.
    TotalAsset,
    /// The subject's credit score.
    CreditScore,
}

/// Parameters of a joint query job.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointQueryParams {
    /// The queried subject, e.g. a customer id.
    pub subject: String,
    /// What is asked about the subject.
    pub query_type: QueryType,
    /// The number of answers required for reconstruction.
    pub threshold: u32,
}

impl fmt::Debug for JointQueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JointQueryParams")
            .field("subject", &"<REDACTED>")
            .field("query_type", &self.query_type)
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// The request a single party receives for a joint query.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalQuery {
    subject: String,
    /// What is asked about the subject.
    pub query_type: QueryType,
    /// The x-coordinate of this party's share.
    pub share_x: BigUint,
}

impl LocalQuery {
    /// Creates a query for one party.
    pub fn new(subject: impl Into<String>, query_type: QueryType, share_x: BigUint) -> Self {
        Self {
            subject: subject.into(),
            query_type,
            share_x,
        }
    }

    /// The subject the party looks up in its records.
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl fmt::Debug for LocalQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalQuery")
            .field("subject", &"<REDACTED>")
            .field("query_type", &self.query_type)
            .field("share_x", &self.share_x)
            .finish()
    }
}

/// The reconstructed answer of a joint query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointQueryResult {
    /// What was asked.
    pub query_type: QueryType,
    /// The reconstructed answer.
    #[serde(with = "decimal")]
    pub value: BigUint,
    /// The number of parties the query was sent to.
    pub party_count: usize,
    /// Wall time of the protocol run.
    pub duration_ms: u64,
    /// SHA-256 of the decimal answer.
    pub result_hash: String,
}

/// Encodes a subject as the big-endian integer of its UTF-8 bytes.
pub fn encode_subject(subject: &str) -> BigUint {
    BigUint::from_bytes_be(subject.as_bytes())
}

/// The joint query protocol over a [`PartyClient`].
pub struct JointQuery<'a, C> {
    client: &'a C,
    fan_out: FanOut,
    deadline: Duration,
    security_margin_bits: u32,
    primality_rounds: u32,
}

impl<'a, C: PartyClient> JointQuery<'a, C> {
    /// Creates the protocol with the fan-out and field settings of `config`.
    pub fn new(client: &'a C, config: &MpcConfig) -> Self {
        Self {
            client,
            fan_out: FanOut::new(config),
            deadline: config.joint_query_deadline(),
            security_margin_bits: config.security_margin_bits,
            primality_rounds: config.miller_rabin_rounds,
        }
    }

    /// Runs the query against `parties` and reconstructs from the first `t` answers.
    #[tracing::instrument(
        level = Level::DEBUG,
        skip_all,
        fields(
            query_type = ?params.query_type,
            parties = parties.len(),
            threshold = params.threshold
        )
    )]
    pub async fn run<R: CryptoRng>(
        &self,
        parties: &[Party],
        params: &JointQueryParams,
        rng: &mut R,
    ) -> Result<JointQueryResult, SharingError> {
        let start = Instant::now();
        let n = u32::try_from(parties.len()).map_err(|_| SharingError::InvalidThreshold {
            threshold: params.threshold,
            parties: u32::MAX,
        })?;
        let sharing = SecretSharingEngine::with_params(
            &mut *rng,
            self.security_margin_bits,
            self.primality_rounds,
        )
        .share(&encode_subject(&params.subject), n, params.threshold)?;
        debug!(field_bits = sharing.params.modulus.bits(), "subject shared");

        // parties only learn their x-coordinate, the y-values stay with the coordinator
        let targets: Vec<(&Party, BigUint)> = parties
            .iter()
            .zip(sharing.shares.iter().map(|s| s.x.clone()))
            .collect();
        let threshold = params.threshold as usize;
        let result_shares = self
            .fan_out
            .first(targets, threshold, self.deadline, |party, x| {
                let query = LocalQuery::new(params.subject.clone(), params.query_type, x);
                async move {
                    let answer = self.client.query_local_scalar(party, &query).await?;
                    Ok::<_, C::Error>(SecretShare {
                        x: query.share_x,
                        y: answer,
                    })
                }
            })
            .await;

        let value = reconstruct(&sharing.params, &result_shares)?;
        let result_hash = scalar_result_hash(&value);
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            answers = result_shares.len(),
            duration_ms, "joint query reconstructed"
        );
        Ok(JointQueryResult {
            query_type: params.query_type,
            value,
            party_count: parties.len(),
            duration_ms,
            result_hash,
        })
    }
}
