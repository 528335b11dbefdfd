//! Shamir (t, n)-threshold secret sharing over a prime field.
//!
//! A secret `s` is hidden as the constant term of a random polynomial
//! `f(x) = s + a_1 x + ... + a_{t-1} x^{t-1} mod p`. Party `i` receives the point
//! `(i, f(i))`; any `t` points determine `f` and therefore `f(0) = s` through
//! Lagrange interpolation, while fewer points reveal nothing about `s`.

use std::{collections::HashSet, fmt, sync::LazyLock};

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::CryptoRng;
use serde::{Deserialize, Serialize};

use crate::bigint::{FieldElement, mod_inverse, random_below, random_prime, sub_mod};

/// The default field modulus, `2^256 - 189`, the largest prime below `2^256`.
///
/// It is used whenever it exceeds the secret, the number of shares and
/// `2^security_margin_bits`; otherwise a larger prime is generated per sharing.
pub static DEFAULT_FIELD_PRIME: LazyLock<BigUint> =
    LazyLock::new(|| (BigUint::one() << 256u32) - 189u32);

/// A single point `(x, y)` on the sharing polynomial.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretShare {
    /// The public, non-zero evaluation point.
    pub x: FieldElement,
    /// The polynomial evaluated at `x`.
    pub y: FieldElement,
}

impl fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretShare")
            .field("x", &self.x)
            .field("y", &"<REDACTED>")
            .finish()
    }
}

/// The public parameters needed to reconstruct a secret from its shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingParams {
    /// The prime field modulus.
    pub modulus: BigUint,
    /// The number of shares required for reconstruction.
    pub threshold: u32,
}

/// The output of [`SecretSharingEngine::share`].
#[derive(Debug, Clone)]
pub struct Sharing {
    /// Modulus and threshold of this sharing instance.
    pub params: SharingParams,
    /// Exactly `n` shares with x-coordinates `1..=n`.
    pub shares: Vec<SecretShare>,
}

/// Errors raised while sharing or reconstructing a secret.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SharingError {
    /// The threshold is zero or larger than the number of shares.
    #[error("invalid threshold {threshold} for {parties} shares, must satisfy 1 <= t <= n")]
    InvalidThreshold {
        /// The requested threshold.
        threshold: u32,
        /// The requested number of shares.
        parties: u32,
    },
    /// Fewer shares than the threshold were provided.
    #[error("insufficient shares: {required} required but only {available} available")]
    InsufficientShares {
        /// The threshold of the sharing.
        required: u32,
        /// The number of shares that were provided.
        available: usize,
    },
    /// Two shares have the same x-coordinate.
    #[error("duplicate share for x-coordinate {x}")]
    DuplicateShare {
        /// The repeated x-coordinate.
        x: BigUint,
    },
    /// A share has x-coordinate zero or one that is not a field element.
    #[error("share x-coordinate must be a non-zero field element")]
    InvalidCoordinate,
}

/// Splits secrets into Shamir shares using an injected CSPRNG.
pub struct SecretSharingEngine<R> {
    rng: R,
    security_margin_bits: u32,
    primality_rounds: u32,
}

impl<R: CryptoRng> SecretSharingEngine<R> {
    /// Creates an engine with a 128 bit security margin.
    pub fn new(rng: R) -> Self {
        Self::with_params(rng, 128, 40)
    }

    /// Creates an engine with explicit parameters.
    ///
    /// The field prime is always larger than `2^security_margin_bits`;
    /// `primality_rounds` Miller-Rabin rounds are used if a fresh prime has to be
    /// generated.
    pub fn with_params(rng: R, security_margin_bits: u32, primality_rounds: u32) -> Self {
        Self {
            rng,
            security_margin_bits,
            primality_rounds,
        }
    }

    /// Splits `secret` into `n` shares such that any `t` of them reconstruct it.
    pub fn share(
        &mut self,
        secret: &FieldElement,
        n: u32,
        t: u32,
    ) -> Result<Sharing, SharingError> {
        if t < 1 || t > n {
            return Err(SharingError::InvalidThreshold {
                threshold: t,
                parties: n,
            });
        }
        let modulus = self.field_prime(secret, n);

        // coefficients[0] is the secret, the rest are uniformly random
        let mut coefficients = Vec::with_capacity(t as usize);
        coefficients.push(secret % &modulus);
        for _ in 1..t {
            coefficients.push(random_below(&modulus, &mut self.rng));
        }

        let shares = (1..=n)
            .map(|i| {
                let x = BigUint::from(i);
                let y = evaluate(&coefficients, &x, &modulus);
                SecretShare { x, y }
            })
            .collect();

        Ok(Sharing {
            params: SharingParams {
                modulus,
                threshold: t,
            },
            shares,
        })
    }

    fn field_prime(&mut self, secret: &FieldElement, n: u32) -> BigUint {
        let bound = (BigUint::one() << self.security_margin_bits)
            .max(secret.clone())
            .max(BigUint::from(n));
        if *DEFAULT_FIELD_PRIME > bound {
            DEFAULT_FIELD_PRIME.clone()
        } else {
            // the top bit is forced, so the prime is at least 2^bound.bits() > bound
            random_prime(bound.bits() + 1, self.primality_rounds, &mut self.rng)
        }
    }
}

impl SharingParams {
    /// Recovers `f(0)` from at least `threshold` shares with distinct x-coordinates.
    pub fn reconstruct(&self, shares: &[SecretShare]) -> Result<FieldElement, SharingError> {
        reconstruct(self, shares)
    }
}

/// Recovers the secret `f(0)` via Lagrange interpolation modulo `params.modulus`.
///
/// All provided shares take part in the interpolation, so more than `threshold`
/// consistent shares yield the same value as any `threshold` of them.
pub fn reconstruct(
    params: &SharingParams,
    shares: &[SecretShare],
) -> Result<FieldElement, SharingError> {
    let p = &params.modulus;
    if shares.len() < params.threshold as usize || shares.is_empty() {
        return Err(SharingError::InsufficientShares {
            required: params.threshold,
            available: shares.len(),
        });
    }
    let mut seen = HashSet::with_capacity(shares.len());
    for share in shares {
        if share.x.is_zero() || &share.x >= p {
            return Err(SharingError::InvalidCoordinate);
        }
        if !seen.insert(&share.x) {
            return Err(SharingError::DuplicateShare { x: share.x.clone() });
        }
    }

    let mut secret = BigUint::zero();
    for (j, share_j) in shares.iter().enumerate() {
        let mut numerator = BigUint::one();
        let mut denominator = BigUint::one();
        for (m, share_m) in shares.iter().enumerate() {
            if m == j {
                continue;
            }
            numerator = (numerator * &share_m.x) % p;
            denominator = (denominator * sub_mod(&share_m.x, &share_j.x, p)) % p;
        }
        // x-coordinates are distinct and non-zero mod a prime, so the inverse exists
        let inverse = mod_inverse(&denominator, p).ok_or(SharingError::InvalidCoordinate)?;
        let basis = (numerator * inverse) % p;
        secret = (secret + basis * (&share_j.y % p)) % p;
    }
    Ok(secret)
}

/// Horner evaluation of the polynomial with the given coefficients (lowest degree first).
fn evaluate(coefficients: &[BigUint], x: &BigUint, modulus: &BigUint) -> BigUint {
    coefficients
        .iter()
        .rev()
        .fold(BigUint::zero(), |acc, c| (acc * x + c) % modulus)
}
