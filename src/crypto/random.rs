//! Random number generation
//!
//! This module provides utilities for generating random big integers and
//! probable primes for key provisioning.
//!
//! Every function takes the random source explicitly so that provisioning can
//! use the thread-local CSPRNG while tests use a seeded generator.
//!
//! # Example
//!
//! ```ignore
//! use sdb_proxy::crypto::RandomUtils;
//!
//! let mut rng = rand::rng();
//! let p = RandomUtils::generate_prime(&mut rng, 512);
//! let r = RandomUtils::random_below(&mut rng, &p);
//! ```

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::RngCore;

/// Primes used for trial division before Miller-Rabin
const SMALL_PRIMES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Miller-Rabin rounds used by [`RandomUtils::generate_prime`]
const MILLER_RABIN_ROUNDS: usize = 32;

/// Random number generation utilities
pub struct RandomUtils;

impl RandomUtils {
    /// Generate random bytes
    ///
    /// # Arguments
    /// * `rng` - Random source
    /// * `len` - Number of bytes to generate
    pub fn generate_bytes<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        rng.fill_bytes(&mut bytes);
        bytes
    }

    /// Generate a uniform integer in `[0, 2^bits)`
    pub fn random_bits<R: RngCore + ?Sized>(rng: &mut R, bits: u64) -> BigUint {
        if bits == 0 {
            return BigUint::zero();
        }
        let len = bits.div_ceil(8) as usize;
        let mut bytes = Self::generate_bytes(rng, len);
        let excess = (len as u64 * 8 - bits) as u32;
        bytes[0] &= 0xffu8 >> excess;
        BigUint::from_bytes_be(&bytes)
    }

    /// Generate a uniform integer in `[0, bound)` by rejection sampling
    ///
    /// Returns zero when `bound` is zero.
    pub fn random_below<R: RngCore + ?Sized>(rng: &mut R, bound: &BigUint) -> BigUint {
        if bound.is_zero() {
            return BigUint::zero();
        }
        let bits = bound.bits();
        loop {
            let candidate = Self::random_bits(rng, bits);
            if &candidate < bound {
                return candidate;
            }
        }
    }

    /// Generate a uniform integer in `[low, high)`
    ///
    /// Returns `low` when the range is empty.
    pub fn random_range<R: RngCore + ?Sized>(
        rng: &mut R,
        low: &BigUint,
        high: &BigUint,
    ) -> BigUint {
        if high <= low {
            return low.clone();
        }
        low + Self::random_below(rng, &(high - low))
    }

    /// Miller-Rabin probable prime test
    ///
    /// # Arguments
    /// * `candidate` - Number to test
    /// * `rounds` - Number of random witnesses
    /// * `rng` - Random source for witnesses
    pub fn is_probable_prime<R: RngCore + ?Sized>(
        candidate: &BigUint,
        rounds: usize,
        rng: &mut R,
    ) -> bool {
        let two = BigUint::from(2u32);
        if candidate < &two {
            return false;
        }
        for small in SMALL_PRIMES {
            let small = BigUint::from(small);
            if candidate == &small {
                return true;
            }
            if (candidate % &small).is_zero() {
                return false;
            }
        }

        let one = BigUint::one();
        let n_minus_one = candidate - &one;
        let s = n_minus_one.trailing_zeros().unwrap_or(0);
        let d = &n_minus_one >> s;

        'witness: for _ in 0..rounds {
            let a = Self::random_range(rng, &two, &n_minus_one);
            let mut x = a.modpow(&d, candidate);
            if x == one || x == n_minus_one {
                continue;
            }
            for _ in 1..s {
                x = x.modpow(&two, candidate);
                if x == n_minus_one {
                    continue 'witness;
                }
            }
            return false;
        }
        true
    }

    /// Generate a probable prime of exactly `bits` bits
    ///
    /// # Arguments
    /// * `rng` - Random source
    /// * `bits` - Bit length of the prime (at least 8)
    pub fn generate_prime<R: RngCore + ?Sized>(rng: &mut R, bits: u64) -> BigUint {
        let bits = bits.max(8);
        let top = BigUint::one() << (bits - 1) as usize;
        loop {
            let candidate = Self::random_bits(rng, bits) | &top | BigUint::one();
            if Self::is_probable_prime(&candidate, MILLER_RABIN_ROUNDS, rng) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generate_bytes() {
        let mut rng = StdRng::seed_from_u64(1);
        let bytes = RandomUtils::generate_bytes(&mut rng, 32);
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn test_random_bits_bounded() {
        let mut rng = StdRng::seed_from_u64(2);
        for bits in [1u64, 7, 8, 9, 63, 130] {
            let value = RandomUtils::random_bits(&mut rng, bits);
            assert!(value.bits() <= bits);
        }
    }

    #[test]
    fn test_random_below_and_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let bound = BigUint::from(1000u32);
        for _ in 0..100 {
            assert!(RandomUtils::random_below(&mut rng, &bound) < bound);
            let v = RandomUtils::random_range(&mut rng, &BigUint::from(10u32), &bound);
            assert!(v >= BigUint::from(10u32) && v < bound);
        }
        assert!(RandomUtils::random_below(&mut rng, &BigUint::zero()).is_zero());
    }

    #[test]
    fn test_is_probable_prime_known_values() {
        let mut rng = StdRng::seed_from_u64(4);
        for p in [2u64, 3, 37, 41, 7919, 1_000_000_007] {
            assert!(RandomUtils::is_probable_prime(&BigUint::from(p), 16, &mut rng), "{p}");
        }
        for c in [0u64, 1, 4, 91, 561, 1_000_000_008, 3233] {
            assert!(!RandomUtils::is_probable_prime(&BigUint::from(c), 16, &mut rng), "{c}");
        }
    }

    #[test]
    fn test_generate_prime_bit_length() {
        let mut rng = StdRng::seed_from_u64(5);
        let p = RandomUtils::generate_prime(&mut rng, 48);
        assert_eq!(p.bits(), 48);
        assert!(RandomUtils::is_probable_prime(&p, 16, &mut rng));
    }
}
