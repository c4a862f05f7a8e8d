//! Core types for query rewriting
//!
//! This module defines the scalar building blocks shared by the catalog and
//! the statement model:
//! - SQL data types (plaintext logical types and the ciphertext storage type)
//! - Typed constant values carried by literal expressions

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL data types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 32-bit integer
    Int,

    /// 64-bit integer
    BigInt,

    /// Single precision float
    Float,

    /// Double precision float
    Double,

    /// Variable-length string with a maximum length
    Varchar(usize),

    /// Unbounded string
    String,

    /// Boolean value
    Boolean,

    /// Exact numeric with the given precision and no scale.
    ///
    /// This is the backend storage type of ciphertext columns.
    Decimal(u32),

    /// Type not yet resolved by analysis
    Unknown,
}

impl DataType {
    /// Whether values of this type are integers
    pub fn is_integral(&self) -> bool {
        matches!(self, DataType::Int | DataType::BigInt)
    }

    /// Whether values of this type are numbers
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int | DataType::BigInt | DataType::Float | DataType::Double | DataType::Decimal(_)
        )
    }

    /// Widest of two numeric types, used for arithmetic result types
    pub fn widen(&self, other: &DataType) -> DataType {
        match (self, other) {
            (DataType::Decimal(p), _) | (_, DataType::Decimal(p)) => DataType::Decimal(*p),
            (DataType::Double, _) | (_, DataType::Double) => DataType::Double,
            (DataType::Float, _) | (_, DataType::Float) => DataType::Float,
            (DataType::BigInt, _) | (_, DataType::BigInt) => DataType::BigInt,
            (DataType::Int, DataType::Int) => DataType::Int,
            _ => DataType::Unknown,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => write!(f, "INT"),
            DataType::BigInt => write!(f, "BIGINT"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Double => write!(f, "DOUBLE"),
            DataType::Varchar(len) => write!(f, "VARCHAR({})", len),
            DataType::String => write!(f, "STRING"),
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Decimal(precision) => write!(f, "DECIMAL({}, 0)", precision),
            DataType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// SQL constant values
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer constant
    Int(i64),

    /// Floating point constant
    Float(f64),

    /// String constant
    String(String),

    /// NULL
    Null,

    /// Ciphertext constant produced by rewriting (rendered as an exact number)
    Cipher(BigUint),
}

/// 2^63, the first float above the `i64` range
pub(crate) const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

impl Value {
    /// Data type of the constant
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(v) if i32::try_from(*v).is_ok() => DataType::Int,
            Value::Int(_) => DataType::BigInt,
            Value::Float(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Null => DataType::Unknown,
            Value::Cipher(c) => DataType::Decimal(c.to_str_radix(10).len() as u32),
        }
    }

    /// Integer view of the constant, accepting floats with no fractional part
    pub fn as_exact_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && (-I64_LIMIT..I64_LIMIT).contains(v) => {
                Some(*v as i64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Null => write!(f, "NULL"),
            Value::Cipher(c) => write!(f, "{}", c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_display() {
        assert_eq!(DataType::Int.to_string(), "INT");
        assert_eq!(DataType::Varchar(20).to_string(), "VARCHAR(20)");
        assert_eq!(DataType::Decimal(1000).to_string(), "DECIMAL(1000, 0)");
    }

    #[test]
    fn test_widen() {
        assert_eq!(DataType::Int.widen(&DataType::Int), DataType::Int);
        assert_eq!(DataType::Int.widen(&DataType::BigInt), DataType::BigInt);
        assert_eq!(DataType::Float.widen(&DataType::Int), DataType::Float);
        assert_eq!(DataType::String.widen(&DataType::Int), DataType::Unknown);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(-4).to_string(), "-4");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::String("it's".into()).to_string(), "'it''s'");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Cipher(BigUint::from(42u32)).to_string(), "42");
    }

    #[test]
    fn test_value_as_exact_int() {
        assert_eq!(Value::Int(7).as_exact_int(), Some(7));
        assert_eq!(Value::Float(3.0).as_exact_int(), Some(3));
        assert_eq!(Value::Float(3.5).as_exact_int(), None);
        assert_eq!(Value::Float(-9.223_372_036_854_775_808e18).as_exact_int(), Some(i64::MIN));
        assert_eq!(Value::Float(1e19).as_exact_int(), None);
        assert_eq!(Value::String("3".into()).as_exact_int(), None);
    }

    #[test]
    fn test_data_type_serde() {
        let json = serde_json::to_string(&DataType::Varchar(20)).unwrap();
        assert_eq!(json, r#"{"varchar":20}"#);
        let back: DataType = serde_json::from_str(r#""big_int""#).unwrap();
        assert_eq!(back, DataType::BigInt);
    }
}
