//! Runtime configuration of the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the job runner, the party fan-out and the cryptographic engines.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MpcConfig {
    /// Maximum number of jobs executing at the same time.
    pub worker_concurrency: usize,
    /// Maximum number of submitted jobs waiting for a worker.
    pub queue_capacity: usize,
    /// Maximum number of concurrent party calls within one job.
    pub party_concurrency: usize,
    /// Timeout of a single party call.
    pub party_timeout_ms: u64,
    /// Deadline for collecting the threshold of joint query answers.
    pub joint_query_deadline_ms: u64,
    /// Size of ephemeral Paillier keys.
    pub paillier_key_bits: u32,
    /// Smallest Paillier modulus that is accepted, generated or provisioned.
    pub min_paillier_key_bits: u32,
    /// The Shamir field prime is always larger than `2^security_margin_bits`.
    pub security_margin_bits: u32,
    /// Miller-Rabin rounds for every generated prime.
    pub miller_rabin_rounds: u32,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            queue_capacity: 64,
            party_concurrency: 8,
            party_timeout_ms: 30_000,
            joint_query_deadline_ms: 10_000,
            paillier_key_bits: 2048,
            min_paillier_key_bits: 1024,
            security_margin_bits: 128,
            miller_rabin_rounds: 40,
        }
    }
}

/// A rejected [`MpcConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The named field is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// The default key size is smaller than the accepted minimum.
    #[error("paillier_key_bits ({key_bits}) is below min_paillier_key_bits ({min_key_bits})")]
    KeyBelowMinimum {
        /// The configured default key size.
        key_bits: u32,
        /// The configured minimum.
        min_key_bits: u32,
    },
}

impl MpcConfig {
    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("worker_concurrency", self.worker_concurrency as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("party_concurrency", self.party_concurrency as u64),
            ("party_timeout_ms", self.party_timeout_ms),
            ("joint_query_deadline_ms", self.joint_query_deadline_ms),
            ("miller_rabin_rounds", u64::from(self.miller_rabin_rounds)),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(name));
        }
        if self.paillier_key_bits < self.min_paillier_key_bits {
            return Err(ConfigError::KeyBelowMinimum {
                key_bits: self.paillier_key_bits,
                min_key_bits: self.min_paillier_key_bits,
            });
        }
        Ok(())
    }

    pub(crate) fn party_timeout(&self) -> Duration {
        Duration::from_millis(self.party_timeout_ms)
    }

    pub(crate) fn joint_query_deadline(&self) -> Duration {
        Duration::from_millis(self.joint_query_deadline_ms)
    }
}
