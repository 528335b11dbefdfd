//! Hash-based commitments for PSI and audit digests for protocol results.

use std::fmt;

use num_bigint::BigUint;
use rand::CryptoRng;
use sha2::{Digest, Sha256};

/// A per-run nonce keying every commitment of one PSI execution.
#[derive(Clone, PartialEq, Eq)]
pub struct Salt([u8; 32]);

impl Salt {
    /// Draws a fresh salt.
    pub fn random<R: CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl From<[u8; 32]> for Salt {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Salt(<REDACTED>)")
    }
}

/// A keyed hash of a single set element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Commitment([u8; 32]);

impl Commitment {
    /// Commits to `element` under `salt` using blake3 in keyed mode.
    pub fn new(salt: &Salt, element: &str) -> Self {
        Self(*blake3::keyed_hash(&salt.0, element.as_bytes()).as_bytes())
    }

    /// Lowercase hex encoding of the commitment.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// SHA-256 over `parts` joined with `,`, hex encoded.
pub fn result_hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(part.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 over the decimal representation of `value`, hex encoded.
pub fn scalar_result_hash(value: &BigUint) -> String {
    result_hash([value.to_str_radix(10)])
}
