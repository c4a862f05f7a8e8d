//! Value encoding scheme
//!
//! The rewriting engine never encrypts data itself; it only maps query
//! constants into the ciphertext space of a column so that predicates keep
//! their meaning at the backend. That mapping is the [`CipherScheme`]
//! capability.
//!
//! The default [`OrderPreservingScheme`] encodes a 64-bit integer `v` under a
//! key `(lower, upper)` as
//!
//! ```text
//! E(v) = lower * (v + 2^63) + upper
//! ```
//!
//! which is deterministic and strictly increasing in `v` for a fixed key, so
//! equality and order comparisons survive encryption within one key domain.
//!
//! The encoding is affine, so sums of ciphertexts carry one surplus copy of
//! the zero point `Z = E(0)` per extra operand. The combining operations
//! remove it, which is why every backend ciphertext function receives `Z`
//! as its last argument:
//!
//! ```text
//! add(x, y)        = x + y - Z             = E(a + b)
//! sub(x, y)        = x - y + Z             = E(a - b)
//! scale(x, k)      = k * x - (k - 1) * Z   = E(k * a)
//! sum(x1 .. xm)    = Σ xi - (m - 1) * Z    = E(Σ ai)
//! ```

use crate::catalog::ColumnKey;
use crate::error::{Error, Result};
use num_bigint::{BigInt, BigUint};
use num_traits::{ToPrimitive, Zero};

/// Offset that maps `i64` onto `[0, 2^64)`
const SIGN_OFFSET: i128 = 1 << 63;

/// Capability that maps plaintext integers into a column's ciphertext space
pub trait CipherScheme: Send + Sync {
    /// Encrypt a plaintext value under a column key
    fn encrypt(&self, value: i64, key: &ColumnKey) -> Result<BigUint>;

    /// Recover the plaintext of a ciphertext produced by [`CipherScheme::encrypt`]
    fn decrypt(&self, cipher: &BigUint, key: &ColumnKey) -> Result<i64>;

    /// Correction term passed to the backend combining functions
    fn zero_point(&self, key: &ColumnKey) -> Result<BigUint> {
        self.encrypt(0, key)
    }

    /// Ciphertext of the sum of two plaintexts
    fn add(&self, left: &BigUint, right: &BigUint, key: &ColumnKey) -> Result<BigUint>;

    /// Ciphertext of the difference of two plaintexts
    fn sub(&self, left: &BigUint, right: &BigUint, key: &ColumnKey) -> Result<BigUint>;

    /// Ciphertext of a plaintext multiplied by a cleartext factor
    fn scale(&self, cipher: &BigUint, factor: i64, key: &ColumnKey) -> Result<BigUint>;

    /// Ciphertext of the sum of any number of plaintexts
    ///
    /// The sum of no values is the ciphertext of zero.
    fn sum(&self, ciphers: &[BigUint], key: &ColumnKey) -> Result<BigUint>;
}

/// Deterministic order-preserving affine encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderPreservingScheme;

impl OrderPreservingScheme {
    /// Create the scheme
    pub fn new() -> Self {
        Self
    }
}

/// Map a combined value back into ciphertext space
fn to_cipher(value: BigInt) -> Result<BigUint> {
    value
        .to_biguint()
        .ok_or_else(|| Error::Crypto("combined ciphertext below key range".to_string()))
}

impl CipherScheme for OrderPreservingScheme {
    fn encrypt(&self, value: i64, key: &ColumnKey) -> Result<BigUint> {
        if key.lower.is_zero() {
            return Err(Error::Crypto("key lower bound must be at least 1".to_string()));
        }
        let shifted = (value as i128 + SIGN_OFFSET) as u128;
        Ok(&key.lower * BigUint::from(shifted) + &key.upper)
    }

    fn decrypt(&self, cipher: &BigUint, key: &ColumnKey) -> Result<i64> {
        if key.lower.is_zero() {
            return Err(Error::Crypto("key lower bound must be at least 1".to_string()));
        }
        if cipher < &key.upper {
            return Err(Error::Crypto("ciphertext below key range".to_string()));
        }
        let delta = cipher - &key.upper;
        if !(&delta % &key.lower).is_zero() {
            return Err(Error::Crypto("ciphertext not in key domain".to_string()));
        }
        let shifted = (delta / &key.lower)
            .to_u64()
            .ok_or_else(|| Error::Crypto("ciphertext above key range".to_string()))?;
        Ok((shifted as i128 - SIGN_OFFSET) as i64)
    }

    fn add(&self, left: &BigUint, right: &BigUint, key: &ColumnKey) -> Result<BigUint> {
        let zero = self.zero_point(key)?;
        to_cipher(BigInt::from(left + right) - BigInt::from(zero))
    }

    fn sub(&self, left: &BigUint, right: &BigUint, key: &ColumnKey) -> Result<BigUint> {
        let zero = self.zero_point(key)?;
        to_cipher(BigInt::from(left + zero) - BigInt::from(right.clone()))
    }

    fn scale(&self, cipher: &BigUint, factor: i64, key: &ColumnKey) -> Result<BigUint> {
        let zero = BigInt::from(self.zero_point(key)?);
        let delta = BigInt::from(cipher.clone()) - &zero;
        to_cipher(delta * factor + zero)
    }

    fn sum(&self, ciphers: &[BigUint], key: &ColumnKey) -> Result<BigUint> {
        let zero = BigInt::from(self.zero_point(key)?);
        let total = ciphers
            .iter()
            .fold(BigInt::zero(), |acc, c| acc + BigInt::from(c.clone()) - &zero);
        to_cipher(total + zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(lower: u64, upper: u64) -> ColumnKey {
        ColumnKey::new(BigUint::from(lower), BigUint::from(upper))
    }

    #[test]
    fn test_encrypt_known_value() {
        let scheme = OrderPreservingScheme::new();
        let cipher = scheme.encrypt(1, &key(1, 3)).unwrap();
        assert_eq!(cipher.to_string(), "9223372036854775812");
    }

    #[test]
    fn test_extremes() {
        let scheme = OrderPreservingScheme::new();
        let k = key(7, 11);
        assert_eq!(scheme.encrypt(i64::MIN, &k).unwrap(), BigUint::from(11u32));
        assert_eq!(scheme.decrypt(&scheme.encrypt(i64::MAX, &k).unwrap(), &k).unwrap(), i64::MAX);
    }

    #[test]
    fn test_decrypt_rejects_foreign_ciphertext() {
        let scheme = OrderPreservingScheme::new();
        let cipher = scheme.encrypt(5, &key(3, 4)).unwrap();
        assert!(matches!(
            scheme.decrypt(&(cipher + 1u32), &key(3, 4)),
            Err(Error::Crypto(_))
        ));
        assert!(scheme.decrypt(&BigUint::from(1u32), &key(3, 4)).is_err());
    }

    #[test]
    fn test_zero_lower_rejected() {
        let scheme = OrderPreservingScheme::new();
        assert!(scheme.encrypt(1, &key(0, 3)).is_err());
    }

    #[test]
    fn test_affine_sum_needs_correction() {
        let scheme = OrderPreservingScheme::new();
        let k = key(1, 3);
        let (two, three) = (scheme.encrypt(2, &k).unwrap(), scheme.encrypt(3, &k).unwrap());

        assert!(scheme.decrypt(&(&two + &three), &k).is_err());
        let combined = scheme.add(&two, &three, &k).unwrap();
        assert_eq!(combined, scheme.encrypt(5, &k).unwrap());
        assert_eq!(scheme.zero_point(&k).unwrap().to_string(), "9223372036854775811");
    }

    #[test]
    fn test_combination_leaving_key_range() {
        let scheme = OrderPreservingScheme::new();
        let k = key(2, 1);
        let low = scheme.encrypt(i64::MIN, &k).unwrap();
        let high = scheme.encrypt(1, &k).unwrap();
        assert!(matches!(scheme.sub(&low, &high, &k), Err(Error::Crypto(_))));
        assert_eq!(scheme.sum(&[], &k).unwrap(), scheme.encrypt(0, &k).unwrap());
    }

    proptest! {
        #[test]
        fn test_combinations_decrypt_to_plaintext_result(
            a in any::<i32>(),
            b in any::<i32>(),
            factor in -1000i64..1000,
            rest in proptest::collection::vec(any::<i32>(), 0..8),
            lower in 1u64..=u64::MAX,
            upper in any::<u64>(),
        ) {
            let scheme = OrderPreservingScheme::new();
            let k = key(lower, upper);
            let (a, b) = (i64::from(a), i64::from(b));
            let ea = scheme.encrypt(a, &k).unwrap();
            let eb = scheme.encrypt(b, &k).unwrap();

            let added = scheme.add(&ea, &eb, &k).unwrap();
            prop_assert_eq!(scheme.decrypt(&added, &k).unwrap(), a + b);
            let subtracted = scheme.sub(&ea, &eb, &k).unwrap();
            prop_assert_eq!(scheme.decrypt(&subtracted, &k).unwrap(), a - b);
            let scaled = scheme.scale(&ea, factor, &k).unwrap();
            prop_assert_eq!(scheme.decrypt(&scaled, &k).unwrap(), a * factor);

            let values: Vec<i64> = rest.iter().map(|v| i64::from(*v)).collect();
            let ciphers: Vec<BigUint> = values
                .iter()
                .map(|v| scheme.encrypt(*v, &k).unwrap())
                .collect();
            let summed = scheme.sum(&ciphers, &k).unwrap();
            prop_assert_eq!(scheme.decrypt(&summed, &k).unwrap(), values.iter().sum::<i64>());
        }

        #[test]
        fn test_order_and_equality_preserved(a in any::<i64>(), b in any::<i64>(), lower in 1u64..=u64::MAX, upper in any::<u64>()) {
            let scheme = OrderPreservingScheme::new();
            let k = key(lower, upper);
            let ea = scheme.encrypt(a, &k).unwrap();
            let eb = scheme.encrypt(b, &k).unwrap();
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
            prop_assert_eq!(scheme.decrypt(&ea, &k).unwrap(), a);
        }
    }
}
