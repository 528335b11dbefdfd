// The module is built separately for each integration test, so if some items
// are only used in one test but not the other, this will result in warnings
#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    env,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use mpc_engine::{
    EntropySource, MpcConfig, Party,
    client::{PartyDataset, SimulatedPartyClient},
    joint_query::QueryType,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

static TEST_SEED: LazyLock<u64> = LazyLock::new(|| {
    let seed: u64 = if let Ok(var) = env::var("MPC_ENGINE_TEST_SEED") {
        var.parse().expect("MPC_ENGINE_TEST_SEED is invalid u64")
    } else {
        rand::random()
    };
    info!(seed, "testing seed");
    seed
});

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn test_rng() -> ChaCha20Rng {
    static OFFSET: AtomicU64 = AtomicU64::new(0);
    ChaCha20Rng::seed_from_u64(TEST_SEED.wrapping_add(OFFSET.fetch_add(1, Ordering::SeqCst)))
}

/// An [`EntropySource`] counting how many job generators were handed out.
#[derive(Clone, Default)]
pub(crate) struct CountingEntropy {
    drawn: Arc<AtomicUsize>,
}

impl CountingEntropy {
    pub(crate) fn drawn(&self) -> usize {
        self.drawn.load(Ordering::SeqCst)
    }
}

impl EntropySource for CountingEntropy {
    type Rng = ChaCha20Rng;

    fn rng(&self) -> Self::Rng {
        self.drawn.fetch_add(1, Ordering::SeqCst);
        test_rng()
    }
}

/// Small keys so that tests stay fast.
pub(crate) fn test_config() -> MpcConfig {
    MpcConfig {
        paillier_key_bits: 512,
        min_paillier_key_bits: 256,
        miller_rabin_rounds: 20,
        party_timeout_ms: 1_000,
        joint_query_deadline_ms: 2_000,
        ..Default::default()
    }
}

pub(crate) fn bank(id: &str) -> Party {
    Party::online(id, format!("sim://{}", id.to_lowercase()))
}

/// A dataset builder for simulated banks.
#[derive(Default)]
pub(crate) struct Bank {
    dataset: PartyDataset,
}

impl Bank {
    pub(crate) fn set(mut self, field: &str, elements: impl IntoIterator<Item = String>) -> Self {
        self.dataset
            .sets
            .insert(field.into(), elements.into_iter().collect());
        self
    }

    pub(crate) fn value(mut self, field: &str, value: u64) -> Self {
        self.dataset.values.insert(field.into(), value);
        self
    }

    pub(crate) fn record(mut self, subject: &str, query_type: QueryType, answer: u64) -> Self {
        self.dataset
            .records
            .entry(subject.into())
            .or_insert_with(BTreeMap::new)
            .insert(query_type, answer);
        self
    }
}

pub(crate) fn simulated(
    banks: impl IntoIterator<Item = (&'static str, Bank)>,
) -> SimulatedPartyClient {
    SimulatedPartyClient::new(
        banks
            .into_iter()
            .map(|(id, bank)| (id.to_string(), bank.dataset)),
    )
}

pub(crate) fn numbers(range: std::ops::RangeInclusive<u32>) -> impl Iterator<Item = String> {
    range.map(|i| i.to_string())
}
