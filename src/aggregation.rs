//! Secure sum of one scalar per party under Paillier encryption.
//!
//! Every party value is encrypted as soon as it arrives. The ciphertexts are
//! combined with the homomorphic addition and only the aggregate is decrypted,
//! so no individual value is ever decrypted or logged.

use std::fmt;

use num_bigint::BigUint;
use rand::CryptoRng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{Level, debug, info};

use crate::{
    bigint::decimal,
    client::{FanOut, PartyClient, PartyDataUnavailable},
    config::MpcConfig,
    hash::scalar_result_hash,
    paillier::{Ciphertext, PaillierCryptosystem, PaillierError, PaillierKeyPair},
    party::Party,
};

/// Where the Paillier key pair of a secure sum comes from.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeySource {
    /// A fresh key pair is generated for the job.
    #[default]
    Ephemeral,
    /// A key pair provisioned by the caller.
    Provisioned {
        /// The modulus `n`.
        #[serde(with = "decimal")]
        n: BigUint,
        /// The private exponent `lambda`.
        #[serde(with = "decimal")]
        lambda: BigUint,
    },
    /// A provisioned key pair whose private exponent was stripped before the
    /// job was stored. Cannot be used to run a sum.
    Withheld {
        /// The modulus `n`.
        #[serde(with = "decimal")]
        n: BigUint,
    },
}

impl KeySource {
    /// The key source as it may be persisted: provisioned keys lose `lambda`.
    pub fn without_secrets(&self) -> KeySource {
        match self {
            Self::Provisioned { n, .. } => Self::Withheld { n: n.clone() },
            other => other.clone(),
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ephemeral => f.write_str("Ephemeral"),
            Self::Provisioned { n, .. } => f
                .debug_struct("Provisioned")
                .field("n_bits", &n.bits())
                .field("lambda", &"<REDACTED>")
                .finish(),
            Self::Withheld { n } => f
                .debug_struct("Withheld")
                .field("n_bits", &n.bits())
                .finish(),
        }
    }
}

/// Parameters of a secure sum job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureSumParams {
    /// The field summed over all parties, e.g. `deposit`.
    pub field: String,
    /// The key pair to aggregate under.
    #[serde(default)]
    pub key: KeySource,
}

/// The outcome of a secure sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureSumResult {
    /// The sum of all party values modulo `n`.
    #[serde(with = "decimal")]
    pub sum: BigUint,
    /// Number of parties that took part.
    pub party_count: usize,
    /// Wall time of the protocol run.
    pub duration_ms: u64,
    /// SHA-256 of the decimal sum.
    pub result_hash: String,
}

/// A failed secure sum.
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    /// Key setup, encryption or decryption failed.
    #[error("secure aggregation failed: {0}")]
    Crypto(#[from] PaillierError),
    /// A party did not deliver its value.
    #[error("secure aggregation failed: {0}")]
    PartyData(#[from] PartyDataUnavailable),
    /// There was nothing to aggregate.
    #[error("secure aggregation needs at least one party")]
    NoParties,
}

/// The secure aggregation protocol over a [`PartyClient`].
pub struct SecureAggregation<'a, C> {
    client: &'a C,
    fan_out: FanOut,
    key_bits: u32,
    min_key_bits: u32,
    primality_rounds: u32,
}

impl<'a, C: PartyClient> SecureAggregation<'a, C> {
    /// Creates the protocol with the fan-out and key settings of `config`.
    pub fn new(client: &'a C, config: &MpcConfig) -> Self {
        Self {
            client,
            fan_out: FanOut::new(config),
            key_bits: config.paillier_key_bits,
            min_key_bits: config.min_paillier_key_bits,
            primality_rounds: config.miller_rabin_rounds,
        }
    }

    /// Sums the `params.field` value of every party.
    #[tracing::instrument(
        level = Level::DEBUG,
        skip_all,
        fields(field = %params.field, parties = parties.len())
    )]
    pub async fn run<R: CryptoRng>(
        &self,
        parties: &[Party],
        params: &SecureSumParams,
        rng: &mut R,
    ) -> Result<SecureSumResult, AggregationError> {
        let start = Instant::now();
        if parties.is_empty() {
            return Err(AggregationError::NoParties);
        }
        let mut paillier = PaillierCryptosystem::with_primality_rounds(
            rng,
            self.min_key_bits,
            self.primality_rounds,
        );
        let keys = match &params.key {
            KeySource::Ephemeral => paillier.generate_key_pair(self.key_bits)?,
            KeySource::Provisioned { n, lambda } => {
                paillier.import_key_pair(n.clone(), lambda.clone())?
            }
            KeySource::Withheld { .. } => {
                return Err(PaillierError::CryptoParameter(
                    "the private key of this key pair was withheld".into(),
                )
                .into());
            }
        };
        debug!(key_bits = keys.public.n().bits(), "paillier key pair ready");

        let field = params.field.as_str();
        let values = self
            .fan_out
            .all(parties, |party| self.client.query_local_value(party, field))
            .await?;
        let ciphertexts = values
            .iter()
            .map(|value| paillier.encrypt(&keys.public, value))
            .collect::<Result<Vec<_>, _>>()?;
        drop(values);

        let sum = aggregate(&keys, &ciphertexts)?;
        let result_hash = scalar_result_hash(&sum);
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(duration_ms, "secure sum decrypted");
        Ok(SecureSumResult {
            sum,
            party_count: parties.len(),
            duration_ms,
            result_hash,
        })
    }
}

/// Homomorphically adds all ciphertexts and decrypts the aggregate.
pub fn aggregate(
    keys: &PaillierKeyPair,
    ciphertexts: &[Ciphertext],
) -> Result<BigUint, AggregationError> {
    let (first, rest) = ciphertexts.split_first().ok_or(AggregationError::NoParties)?;
    let total = rest
        .iter()
        .fold(first.clone(), |acc, c| keys.public.add(&acc, c));
    Ok(keys.private.decrypt(&total)?)
}
