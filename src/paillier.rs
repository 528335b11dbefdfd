//! The Paillier cryptosystem with the `g = n + 1` simplification.
//!
//! Paillier is additively homomorphic: multiplying two ciphertexts modulo `n^2`
//! yields an encryption of the sum of their plaintexts modulo `n`. This is all
//! the secure aggregation protocol needs.

use std::fmt;

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::CryptoRng;
use serde::{Deserialize, Serialize};

use crate::bigint::{lcm, mod_inverse, random_below, random_coprime, random_prime};

/// Errors raised by the [`PaillierCryptosystem`].
///
/// None of the messages contain key material or plaintexts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaillierError {
    /// Key generation or key import was given unusable parameters.
    #[error("invalid crypto parameters: {0}")]
    CryptoParameter(String),
    /// The plaintext is not in `[0, n)`.
    #[error("plaintext is out of range [0, n)")]
    PlaintextRange,
    /// The ciphertext is not an element of `Z*_(n^2)`.
    #[error("ciphertext is not an element of Z*_(n^2)")]
    InvalidCiphertext,
}

/// A Paillier public key `(n, g)`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PublicKeyRepr", into = "PublicKeyRepr")]
pub struct PaillierPublicKey {
    n: BigUint,
    g: BigUint,
    n_squared: BigUint,
}

#[derive(Serialize, Deserialize)]
struct PublicKeyRepr {
    n: BigUint,
}

impl From<PublicKeyRepr> for PaillierPublicKey {
    fn from(repr: PublicKeyRepr) -> Self {
        Self::new(repr.n)
    }
}

impl From<PaillierPublicKey> for PublicKeyRepr {
    fn from(key: PaillierPublicKey) -> Self {
        Self { n: key.n }
    }
}

/// A Paillier private key `(lambda, mu)` for modulus `n`.
#[derive(Clone, PartialEq, Eq)]
pub struct PaillierPrivateKey {
    lambda: BigUint,
    mu: BigUint,
    n: BigUint,
    n_squared: BigUint,
}

/// A matching pair of Paillier keys.
#[derive(Debug, Clone)]
pub struct PaillierKeyPair {
    /// Used for encryption and homomorphic operations.
    pub public: PaillierPublicKey,
    /// Used for decryption only.
    pub private: PaillierPrivateKey,
}

/// A Paillier ciphertext, an element of `Z*_(n^2)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(BigUint);

impl From<BigUint> for Ciphertext {
    fn from(c: BigUint) -> Self {
        Self(c)
    }
}

impl PaillierPublicKey {
    fn new(n: BigUint) -> Self {
        let g = &n + 1u32;
        let n_squared = &n * &n;
        Self { n, g, n_squared }
    }

    /// The modulus `n = p * q`.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// The generator, always `n + 1`.
    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// `n^2`, the ciphertext modulus.
    pub fn n_squared(&self) -> &BigUint {
        &self.n_squared
    }

    /// Homomorphic addition: `decrypt(add(enc(m1), enc(m2))) = (m1 + m2) mod n`.
    pub fn add(&self, c1: &Ciphertext, c2: &Ciphertext) -> Ciphertext {
        Ciphertext((&c1.0 * &c2.0) % &self.n_squared)
    }

    /// Homomorphic scaling: `decrypt(scalar_mul(enc(m), k)) = (k * m) mod n`.
    pub fn scalar_mul(&self, c: &Ciphertext, k: &BigUint) -> Ciphertext {
        Ciphertext(c.0.modpow(k, &self.n_squared))
    }

    /// Encrypts `m` with an explicitly chosen randomizer `r`, which must be in `Z*_n`.
    pub fn encrypt_with_randomizer(
        &self,
        m: &BigUint,
        r: &BigUint,
    ) -> Result<Ciphertext, PaillierError> {
        if m >= &self.n {
            return Err(PaillierError::PlaintextRange);
        }
        if r.is_zero() || r >= &self.n || !r.gcd(&self.n).is_one() {
            return Err(PaillierError::CryptoParameter(
                "randomizer is not an element of Z*_n".into(),
            ));
        }
        // g^m = (n + 1)^m = 1 + m * n  (mod n^2)
        let g_m = (BigUint::one() + m * &self.n) % &self.n_squared;
        let r_n = r.modpow(&self.n, &self.n_squared);
        Ok(Ciphertext((g_m * r_n) % &self.n_squared))
    }

    fn is_valid_ciphertext(&self, c: &Ciphertext) -> bool {
        !c.0.is_zero() && c.0 < self.n_squared && c.0.gcd(&self.n).is_one()
    }
}

impl fmt::Debug for PaillierPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaillierPublicKey")
            .field("n_bits", &self.n.bits())
            .finish()
    }
}

impl PaillierPrivateKey {
    /// Decrypts `c` as `L(c^lambda mod n^2) * mu mod n` where `L(x) = (x - 1) / n`.
    pub fn decrypt(&self, c: &Ciphertext) -> Result<BigUint, PaillierError> {
        if c.0.is_zero() || c.0 >= self.n_squared || !c.0.gcd(&self.n).is_one() {
            return Err(PaillierError::InvalidCiphertext);
        }
        let u = c.0.modpow(&self.lambda, &self.n_squared);
        Ok((l_function(&u, &self.n) * &self.mu) % &self.n)
    }

    /// The modulus `n` this key decrypts under.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// The private exponent, e.g. for exporting the key to a keystore.
    pub fn lambda(&self) -> &BigUint {
        &self.lambda
    }
}

impl fmt::Debug for PaillierPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaillierPrivateKey")
            .field("n_bits", &self.n.bits())
            .field("lambda", &"<REDACTED>")
            .field("mu", &"<REDACTED>")
            .finish()
    }
}

/// `L(x) = (x - 1) / n`.
fn l_function(x: &BigUint, n: &BigUint) -> BigUint {
    (x - 1u32) / n
}

/// Derives `mu = L(g^lambda mod n^2)^-1 mod n` for `g = n + 1`.
fn derive_mu(public: &PaillierPublicKey, lambda: &BigUint) -> Option<BigUint> {
    let u = public.g.modpow(lambda, &public.n_squared);
    mod_inverse(&l_function(&u, &public.n), &public.n)
}

/// Paillier key generation and encryption using an injected CSPRNG.
pub struct PaillierCryptosystem<R> {
    rng: R,
    min_key_bits: u32,
    primality_rounds: u32,
}

impl<R: CryptoRng> PaillierCryptosystem<R> {
    /// Creates a cryptosystem which refuses keys smaller than `min_key_bits`.
    pub fn new(rng: R, min_key_bits: u32) -> Self {
        Self::with_primality_rounds(rng, min_key_bits, 40)
    }

    /// Like [`PaillierCryptosystem::new`] with an explicit number of Miller-Rabin rounds.
    pub fn with_primality_rounds(rng: R, min_key_bits: u32, primality_rounds: u32) -> Self {
        Self {
            rng,
            min_key_bits,
            primality_rounds,
        }
    }

    /// Generates a key pair whose modulus `n` has exactly `bits` bits.
    pub fn generate_key_pair(&mut self, bits: u32) -> Result<PaillierKeyPair, PaillierError> {
        if bits < self.min_key_bits || bits < 16 {
            return Err(PaillierError::CryptoParameter(format!(
                "key size of {bits} bits is below the minimum of {} bits",
                self.min_key_bits.max(16)
            )));
        }
        let p_bits = u64::from(bits / 2);
        let q_bits = u64::from(bits) - p_bits;
        let p = random_prime(p_bits, self.primality_rounds, &mut self.rng);
        let q = random_prime(q_bits, self.primality_rounds, &mut self.rng);
        if p == q {
            return Err(PaillierError::CryptoParameter(
                "generated primes collide".into(),
            ));
        }

        let n = &p * &q;
        let phi = (&p - 1u32) * (&q - 1u32);
        if !n.gcd(&phi).is_one() {
            return Err(PaillierError::CryptoParameter(
                "gcd(n, phi(n)) is not 1".into(),
            ));
        }
        let lambda = lcm(&(&p - 1u32), &(&q - 1u32));
        let public = PaillierPublicKey::new(n);
        let mu = derive_mu(&public, &lambda).ok_or_else(|| {
            PaillierError::CryptoParameter("L(g^lambda) is not invertible mod n".into())
        })?;
        let private = PaillierPrivateKey {
            lambda,
            mu,
            n: public.n.clone(),
            n_squared: public.n_squared.clone(),
        };
        Ok(PaillierKeyPair { public, private })
    }

    /// Rebuilds a key pair from provisioned key material `(n, lambda)`.
    ///
    /// The pair is checked by encrypting and decrypting a random plaintext, which
    /// catches a `lambda` that does not belong to `n`.
    pub fn import_key_pair(
        &mut self,
        n: BigUint,
        lambda: BigUint,
    ) -> Result<PaillierKeyPair, PaillierError> {
        if n.bits() < u64::from(self.min_key_bits) || n.bits() < 16 {
            return Err(PaillierError::CryptoParameter(format!(
                "provisioned key of {} bits is below the minimum of {} bits",
                n.bits(),
                self.min_key_bits.max(16)
            )));
        }
        if lambda.is_zero() {
            return Err(PaillierError::CryptoParameter(
                "provisioned lambda is zero".into(),
            ));
        }
        let public = PaillierPublicKey::new(n);
        let mu = derive_mu(&public, &lambda).ok_or_else(|| {
            PaillierError::CryptoParameter("L(g^lambda) is not invertible mod n".into())
        })?;
        let private = PaillierPrivateKey {
            lambda,
            mu,
            n: public.n.clone(),
            n_squared: public.n_squared.clone(),
        };

        let probe = random_below(&public.n, &mut self.rng);
        let c = self.encrypt(&public, &probe)?;
        if private.decrypt(&c)? != probe {
            return Err(PaillierError::CryptoParameter(
                "provisioned key material is inconsistent".into(),
            ));
        }
        Ok(PaillierKeyPair { public, private })
    }

    /// Encrypts `m` in `[0, n)` with a fresh randomizer `r` from `Z*_n`.
    pub fn encrypt(
        &mut self,
        public: &PaillierPublicKey,
        m: &BigUint,
    ) -> Result<Ciphertext, PaillierError> {
        if m >= &public.n {
            return Err(PaillierError::PlaintextRange);
        }
        let r = random_coprime(&public.n, &mut self.rng);
        public.encrypt_with_randomizer(m, &r)
    }

    /// Checks that `c` is a well-formed ciphertext under `public`.
    pub fn validate(
        &self,
        public: &PaillierPublicKey,
        c: &Ciphertext,
    ) -> Result<(), PaillierError> {
        if public.is_valid_ciphertext(c) {
            Ok(())
        } else {
            Err(PaillierError::InvalidCiphertext)
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn keys(seed: u64) -> (PaillierCryptosystem<ChaCha20Rng>, PaillierKeyPair) {
        let mut paillier = PaillierCryptosystem::new(ChaCha20Rng::seed_from_u64(seed), 256);
        let keys = paillier.generate_key_pair(512).unwrap();
        (paillier, keys)
    }

    #[test]
    fn key_has_requested_size() {
        let (_, keys) = keys(1);
        assert_eq!(keys.public.n().bits(), 512);
        assert_eq!(keys.public.g(), &(keys.public.n() + 1u32));
    }

    #[test]
    fn small_keys_are_rejected() {
        let mut paillier = PaillierCryptosystem::new(ChaCha20Rng::seed_from_u64(2), 1024);
        assert!(matches!(
            paillier.generate_key_pair(512),
            Err(PaillierError::CryptoParameter(_))
        ));
    }

    #[test]
    fn homomorphic_addition_and_scaling() {
        let (mut paillier, keys) = keys(3);
        let m1 = BigUint::from(1234u32);
        let m2 = BigUint::from(4321u32);
        let c1 = paillier.encrypt(&keys.public, &m1).unwrap();
        let c2 = paillier.encrypt(&keys.public, &m2).unwrap();
        let sum = keys.public.add(&c1, &c2);
        assert_eq!(keys.private.decrypt(&sum).unwrap(), BigUint::from(5555u32));

        let scaled = keys.public.scalar_mul(&c1, &BigUint::from(3u32));
        assert_eq!(keys.private.decrypt(&scaled).unwrap(), BigUint::from(3702u32));
    }

    #[test]
    fn addition_wraps_modulo_n() {
        let (mut paillier, keys) = keys(4);
        let n = keys.public.n().clone();
        let m1 = &n - 1u32;
        let m2 = BigUint::from(5u32);
        let c = keys.public.add(
            &paillier.encrypt(&keys.public, &m1).unwrap(),
            &paillier.encrypt(&keys.public, &m2).unwrap(),
        );
        assert_eq!(keys.private.decrypt(&c).unwrap(), BigUint::from(4u32));
    }

    #[test]
    fn out_of_range_plaintext_is_rejected() {
        let (mut paillier, keys) = keys(5);
        let n = keys.public.n().clone();
        assert_eq!(
            paillier.encrypt(&keys.public, &n).unwrap_err(),
            PaillierError::PlaintextRange
        );
    }

    #[test]
    fn malformed_ciphertexts_are_rejected() {
        let (paillier, keys) = keys(6);
        let n = keys.public.n().clone();
        for bad in [
            BigUint::zero(),
            n.clone(),
            keys.public.n_squared().clone(),
            keys.public.n_squared() + 7u32,
        ] {
            let c = Ciphertext::from(bad);
            assert_eq!(
                keys.private.decrypt(&c).unwrap_err(),
                PaillierError::InvalidCiphertext
            );
            assert!(paillier.validate(&keys.public, &c).is_err());
        }
    }

    #[test]
    fn randomizer_must_be_coprime() {
        let (_, keys) = keys(7);
        let m = BigUint::from(1u32);
        assert!(
            keys.public
                .encrypt_with_randomizer(&m, &BigUint::zero())
                .is_err()
        );
        assert!(
            keys.public
                .encrypt_with_randomizer(&m, keys.public.n())
                .is_err()
        );
        let c = keys
            .public
            .encrypt_with_randomizer(&m, &BigUint::from(2u32))
            .unwrap();
        assert_eq!(keys.private.decrypt(&c).unwrap(), m);
    }

    #[test]
    fn provisioned_keys_round_trip() {
        let (mut paillier, keys) = keys(8);
        let imported = paillier
            .import_key_pair(keys.public.n().clone(), keys.private.lambda.clone())
            .unwrap();
        let c = paillier
            .encrypt(&imported.public, &BigUint::from(77u32))
            .unwrap();
        assert_eq!(keys.private.decrypt(&c).unwrap(), BigUint::from(77u32));

        let wrong_lambda = &keys.private.lambda + 2u32;
        assert!(matches!(
            paillier.import_key_pair(keys.public.n().clone(), wrong_lambda),
            Err(PaillierError::CryptoParameter(_))
        ));
    }

    #[test]
    fn debug_output_hides_private_key() {
        let (_, keys) = keys(9);
        let debug = format!("{:?}", keys.private);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&keys.private.lambda.to_string()));
    }
}
