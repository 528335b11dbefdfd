//! The source of cryptographically secure randomness used by MPC jobs.

use rand::{CryptoRng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Produces a fresh CSPRNG for every job.
///
/// The orchestrator asks for exactly one RNG per job, at the moment the job
/// starts running, and passes it on to the cryptographic engines of that job.
/// Jobs therefore never share a generator.
pub trait EntropySource: Send + Sync + 'static {
    /// The generator handed to a single job.
    type Rng: CryptoRng + Send + 'static;

    /// Creates a new, independently seeded generator.
    fn rng(&self) -> Self::Rng;
}

/// An [`EntropySource`] seeding a [`ChaCha20Rng`] from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    type Rng = ChaCha20Rng;

    fn rng(&self) -> Self::Rng {
        ChaCha20Rng::from_os_rng()
    }
}
