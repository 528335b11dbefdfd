//! Arbitrary-precision helpers shared by the secret sharing and Paillier engines.
//!
//! All randomness is drawn from a caller-provided [`CryptoRng`]; nothing in this
//! module falls back to an ambient generator.

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::CryptoRng;

/// An element of a prime field, always kept reduced modulo the field prime.
pub type FieldElement = BigUint;

/// Odd primes below 256, used to cheaply discard most composite candidates
/// before running Miller-Rabin.
const SMALL_PRIMES: [u32; 53] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Returns a uniformly random integer in `[0, 2^bits)`.
pub fn random_bits<R: CryptoRng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    if bits == 0 {
        return BigUint::zero();
    }
    let len = bits.div_ceil(8) as usize;
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    let excess = (len as u64 * 8 - bits) as u32;
    if excess > 0 {
        bytes[0] &= 0xff >> excess;
    }
    BigUint::from_bytes_be(&bytes)
}

/// Returns a uniformly random integer in `[0, bound)` using rejection sampling.
///
/// # Panics
/// - If `bound` is zero.
pub fn random_below<R: CryptoRng + ?Sized>(bound: &BigUint, rng: &mut R) -> BigUint {
    assert!(!bound.is_zero(), "random_below called with an empty range");
    let bits = bound.bits();
    loop {
        let candidate = random_bits(bits, rng);
        if &candidate < bound {
            return candidate;
        }
    }
}

/// Returns a uniformly random element of `Z*_n`, i.e. `0 < r < n` with `gcd(r, n) = 1`.
///
/// # Panics
/// - If `n < 2`.
pub fn random_coprime<R: CryptoRng + ?Sized>(n: &BigUint, rng: &mut R) -> BigUint {
    assert!(n > &BigUint::one(), "Z*_n is empty for n < 2");
    loop {
        let r = random_below(n, rng);
        if !r.is_zero() && r.gcd(n).is_one() {
            return r;
        }
    }
}

/// Probabilistic primality test: trial division by small primes followed by
/// `rounds` Miller-Rabin rounds with bases drawn from `rng`.
pub fn is_probable_prime<R: CryptoRng + ?Sized>(n: &BigUint, rounds: u32, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    if n == &two {
        return true;
    }
    if n.is_even() {
        return false;
    }
    for p in SMALL_PRIMES {
        if n == &BigUint::from(p) {
            return true;
        }
        if (n % p).is_zero() {
            return false;
        }
    }

    // n - 1 = d * 2^s with d odd
    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    // bases are drawn from [2, n - 2]
    let base_range = n - 3u32;

    'witness: for _ in 0..rounds {
        let a = random_below(&base_range, rng) + 2u32;
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = (&x * &x) % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Samples a probable prime of exactly `bits` bits.
///
/// The two most significant bits are forced to one so that the product of two
/// such primes has exactly `2 * bits` bits.
///
/// # Panics
/// - If `bits < 2`.
pub fn random_prime<R: CryptoRng + ?Sized>(bits: u64, rounds: u32, rng: &mut R) -> BigUint {
    assert!(bits >= 2, "primes need at least 2 bits");
    loop {
        let mut candidate = random_bits(bits, rng);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(bits - 2, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, rounds, rng) {
            return candidate;
        }
    }
}

/// Modular inverse of `a` modulo `m`, if it exists.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    if m.is_zero() || m.is_one() {
        return None;
    }
    let a = a % m;
    if a.is_zero() {
        return None;
    }
    a.modinv(m)
}

/// Least common multiple.
pub fn lcm(a: &BigUint, b: &BigUint) -> BigUint {
    a.lcm(b)
}

/// `(a - b) mod m` for operands that are already reduced modulo `m`.
pub(crate) fn sub_mod(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    if a >= b { (a - b) % m } else { (m - ((b - a) % m)) % m }
}

/// (De-)serializes a [`BigUint`] as a decimal string, for use with `#[serde(with)]`.
pub mod decimal {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Serializes `value` as a decimal string.
    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    /// Parses a decimal string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| D::Error::custom("expected a non-negative decimal integer"))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[test]
    fn miller_rabin_classifies_known_numbers() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for p in [2u32, 3, 5, 251, 257, 65537, 2_147_483_647] {
            assert!(is_probable_prime(&BigUint::from(p), 20, &mut rng), "{p}");
        }
        // 561 and 41041 are Carmichael numbers, 65535 and 1 are plainly composite / units
        for c in [0u32, 1, 4, 561, 41041, 65535, 2_147_483_649] {
            assert!(!is_probable_prime(&BigUint::from(c), 20, &mut rng), "{c}");
        }
    }

    #[test]
    fn random_prime_has_requested_size() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let p = random_prime(128, 20, &mut rng);
        assert_eq!(p.bits(), 128);
        assert!(p.is_odd());
    }

    #[test]
    fn random_below_stays_in_range() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let bound = BigUint::from(1000u32);
        for _ in 0..500 {
            assert!(random_below(&bound, &mut rng) < bound);
        }
    }

    #[test]
    fn random_coprime_is_invertible() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let n = BigUint::from(3u32 * 5 * 7 * 11);
        for _ in 0..100 {
            let r = random_coprime(&n, &mut rng);
            assert!(mod_inverse(&r, &n).is_some());
        }
    }

    #[test]
    fn inverse_and_lcm() {
        let m = BigUint::from(97u32);
        let inv = mod_inverse(&BigUint::from(10u32), &m).expect("97 is prime");
        assert_eq!((inv * 10u32) % &m, BigUint::one());
        assert!(mod_inverse(&BigUint::from(6u32), &BigUint::from(9u32)).is_none());
        assert_eq!(
            lcm(&BigUint::from(4u32), &BigUint::from(6u32)),
            BigUint::from(12u32)
        );
    }

    #[test]
    fn subtraction_wraps_around() {
        let m = BigUint::from(11u32);
        assert_eq!(
            sub_mod(&BigUint::from(3u32), &BigUint::from(5u32), &m),
            BigUint::from(9u32)
        );
        assert_eq!(
            sub_mod(&BigUint::from(5u32), &BigUint::from(3u32), &m),
            BigUint::from(2u32)
        );
    }
}
