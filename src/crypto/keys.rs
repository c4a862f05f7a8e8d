//! Key and parameter generation
//!
//! Provisioning creates the database-wide parameters once:
//! - two distinct secret primes `p1`, `p2` and the public modulus `n = p1 * p2`
//! - a generator `g` in `[2, n)`
//! - a shared row secret in `[1, n)`
//! - the database domain key used by sensitive columns without explicit keys
//!
//! Per-table reserved columns (row id, R, S) share one key whose lower part is
//! derived from the row secret, so row identity correlates across tables, and
//! whose upper part lies in a range reserved for the table's slot.

use super::hash::HashUtils;
use super::random::RandomUtils;
use crate::catalog::{
    ColumnKey, CryptoParams, DatabaseMeta, DatabaseSecrets, ROW_ID_COLUMN, SLOT_BITS,
};
use crate::error::{Error, Result};
use log::{debug, info};
use num_bigint::BigUint;
use num_traits::One;
use rand::RngCore;

/// Generator of database parameters and column keys
pub struct KeyGenerator;

impl KeyGenerator {
    /// Provision a new, empty database
    ///
    /// # Arguments
    /// * `rng` - Random source
    /// * `name` - Database name
    /// * `prime_bits` - Bit length of each secret prime (at least 8)
    ///
    /// # Returns
    /// Database metadata with fresh parameters, secrets and domain key
    pub fn generate_database<R: RngCore + ?Sized>(
        rng: &mut R,
        name: &str,
        prime_bits: u64,
    ) -> Result<DatabaseMeta> {
        if prime_bits < 8 {
            return Err(Error::Crypto(format!(
                "prime size of {} bits is too small",
                prime_bits
            )));
        }

        let p1 = RandomUtils::generate_prime(rng, prime_bits);
        let mut p2 = RandomUtils::generate_prime(rng, prime_bits);
        while p2 == p1 {
            p2 = RandomUtils::generate_prime(rng, prime_bits);
        }
        let n = &p1 * &p2;
        let g = RandomUtils::random_range(rng, &BigUint::from(2u32), &n);
        let row_secret = RandomUtils::random_range(rng, &BigUint::one(), &n);

        let params = CryptoParams { n, g };
        let domain_key = Self::column_key(rng, &params);
        info!(
            "Generated parameters for database {} ({}-bit modulus)",
            name,
            params.n.bits()
        );

        Ok(DatabaseMeta {
            name: name.to_string(),
            params,
            secrets: Some(DatabaseSecrets { p1, p2, row_secret }),
            domain_key,
            tables: Vec::new(),
        })
    }

    /// Generate a fresh column key for the database parameters
    ///
    /// `lower` is drawn from `[1, n)` and `upper` from `[0, n)`.
    pub fn column_key<R: RngCore + ?Sized>(rng: &mut R, params: &CryptoParams) -> ColumnKey {
        let lower = RandomUtils::random_range(rng, &BigUint::one(), &params.n);
        let upper = RandomUtils::random_below(rng, &params.n);
        ColumnKey::new(lower, upper)
    }

    /// Generate the key shared by the reserved columns of a table
    ///
    /// # Arguments
    /// * `rng` - Random source
    /// * `database` - Database that will own the table
    /// * `slot` - Table slot; upper bounds of distinct slots never overlap
    pub fn reserved_key<R: RngCore + ?Sized>(
        rng: &mut R,
        database: &DatabaseMeta,
        slot: usize,
    ) -> ColumnKey {
        let lower = match &database.secrets {
            Some(secrets) => {
                HashUtils::derive_scalar(&secrets.row_secret, ROW_ID_COLUMN, &database.params.n)
            }
            None => {
                debug!(
                    "No secrets loaded for database {}, using a random row key",
                    database.name
                );
                RandomUtils::random_range(rng, &BigUint::one(), &database.params.n)
            }
        };
        let base = BigUint::from(slot) << SLOT_BITS as usize;
        let upper = base + RandomUtils::random_bits(rng, SLOT_BITS);
        ColumnKey::new(lower, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generate_database_parameters() {
        let mut rng = StdRng::seed_from_u64(11);
        let db = KeyGenerator::generate_database(&mut rng, "db", 32).unwrap();
        let secrets = db.secrets.as_ref().unwrap();

        assert_ne!(secrets.p1, secrets.p2);
        assert_eq!(&secrets.p1 * &secrets.p2, db.params.n);
        assert!(RandomUtils::is_probable_prime(&secrets.p1, 16, &mut rng));
        assert!(db.params.g >= BigUint::from(2u32) && db.params.g < db.params.n);
        assert!(db.domain_key.lower >= BigUint::one());
        assert!(db.validate().is_ok());
    }

    #[test]
    fn test_prime_bits_too_small() {
        let mut rng = StdRng::seed_from_u64(12);
        assert!(matches!(
            KeyGenerator::generate_database(&mut rng, "db", 4),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_reserved_keys_share_lower_and_split_slots() {
        let mut rng = StdRng::seed_from_u64(13);
        let db = KeyGenerator::generate_database(&mut rng, "db", 32).unwrap();

        let k0 = KeyGenerator::reserved_key(&mut rng, &db, 0);
        let k1 = KeyGenerator::reserved_key(&mut rng, &db, 1);
        assert_eq!(k0.lower, k1.lower);
        assert!(k0.upper < BigUint::one() << 64usize);
        assert!(k1.upper >= BigUint::one() << 64usize);
        assert!(k1.upper < BigUint::one() << 65usize);
    }
}
