//! Dynamic SQL values.

use serde::{Deserialize, Serialize};

/// A dynamically-typed SQL value.
///
/// Used both for the parameters bound to an EXECUTE request and for the
/// cells of decoded result rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    /// Unsigned 64-bit integer that does not fit `BigInt`
    UBigInt(u64),
    Float(f32),
    Double(f64),
    /// Exact numeric kept in its textual form
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    /// Days since 1970-01-01
    Date(i32),
    /// Signed duration in microseconds
    Time(i64),
    /// Microseconds since 1970-01-01 00:00:00
    Timestamp(i64),
    Json(serde_json::Value),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL-flavoured name of the variant, used in type errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::UBigInt(_) => "BIGINT UNSIGNED",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Json(_) => "JSON",
        }
    }

    /// Unsigned decode: values above `i64::MAX` keep their full width in
    /// `UBigInt` instead of being narrowed.
    ///
    /// ```
    /// use sqlwire_core::Value;
    ///
    /// assert_eq!(Value::from_unsigned(42), Value::BigInt(42));
    /// assert_eq!(Value::from_unsigned(u64::MAX), Value::UBigInt(u64::MAX));
    /// ```
    #[must_use]
    pub fn from_unsigned(v: u64) -> Self {
        i64::try_from(v).map_or(Value::UBigInt(v), Value::BigInt)
    }

    /// Any integer variant widened to `i128`, so signed and unsigned
    /// columns convert through one range check.
    pub fn as_integer(&self) -> Option<i128> {
        Some(match *self {
            Value::Bool(v) => i128::from(v),
            Value::TinyInt(v) => i128::from(v),
            Value::SmallInt(v) => i128::from(v),
            Value::Int(v) => i128::from(v),
            Value::BigInt(v) => i128::from(v),
            Value::UBigInt(v) => i128::from(v),
            _ => return None,
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_integer().and_then(|v| i64::try_from(v).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_integer().map(|v| v != 0)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Decimal(s) => s.parse().ok(),
            other => other.as_integer().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.into())
            }
        }
    )*};
}

value_from!(
    bool => Bool,
    i8 => TinyInt,
    i16 => SmallInt,
    u8 => SmallInt,
    i32 => Int,
    u16 => Int,
    i64 => BigInt,
    u32 => BigInt,
    f32 => Float,
    f64 => Double,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    &[u8] => Bytes,
    serde_json::Value => Json,
);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::from_unsigned(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_pick_the_narrowest_signed_variant() {
        assert_eq!(Value::from(42i8), Value::TinyInt(42));
        assert_eq!(Value::from(42u8), Value::SmallInt(42));
        assert_eq!(Value::from(42u16), Value::Int(42));
        assert_eq!(Value::from(42u32), Value::BigInt(42));
        assert_eq!(Value::from(42u64), Value::BigInt(42));
        assert_eq!(Value::from(u64::MAX), Value::UBigInt(u64::MAX));
    }

    #[test]
    fn text_bytes_and_options() {
        assert_eq!(Value::from("hello"), Value::Text("hello".to_string()));
        assert_eq!(Value::from(&[1u8, 2][..]), Value::Bytes(vec![1, 2]));
        assert_eq!(Value::from(Some(7i32)), Value::Int(7));
        assert!(Value::from(Option::<i32>::None).is_null());
    }

    #[test]
    fn unsigned_values_are_not_narrowed() {
        let big = Value::from_unsigned(u64::MAX);
        assert_eq!(big.as_integer(), Some(i128::from(u64::MAX)));
        assert_eq!(big.as_i64(), None);
        assert_eq!(big.type_name(), "BIGINT UNSIGNED");
        assert_eq!(Value::from_unsigned(1 << 63), Value::UBigInt(1 << 63));
        assert_eq!(Value::from_unsigned((1 << 63) - 1), Value::BigInt(i64::MAX));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::TinyInt(1).as_bool(), Some(true));
        assert_eq!(Value::Int(-7).as_i64(), Some(-7));
        assert_eq!(Value::Decimal("1.5".into()).as_f64(), Some(1.5));
        assert_eq!(Value::SmallInt(3).as_f64(), Some(3.0));
        assert_eq!(Value::Text("abc".into()).as_bytes(), Some(&b"abc"[..]));
        assert_eq!(Value::Bytes(vec![1]).as_str(), None);
        assert_eq!(Value::Text("1".into()).as_integer(), None);
    }
}
