use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pid::Pid;
use crate::reference::PinRef;

/// Offset between the store epoch (1601-01-01T00:00:00Z) and the Unix epoch,
/// in microseconds. Timestamps travel on the wire as microseconds since the
/// store epoch.
pub const STORE_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

/// Convert a UTC timestamp to store-epoch microseconds.
pub fn to_store_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros() + STORE_EPOCH_OFFSET_MICROS
}

/// Convert store-epoch microseconds back to a UTC timestamp. Returns `None`
/// when the value does not fit chrono's representable range.
pub fn from_store_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros - STORE_EPOCH_OFFSET_MICROS)
}

/// Native value of a PIN property, or of one element of a collection
/// property.
///
/// This is a closed sum over exactly the kinds the wire format can carry;
/// the marshaler matches it exhaustively in both directions. `Url` and
/// `Bytes` are the marked string subtypes (distinct wire tags); a plain
/// `Str` always maps to the generic string tag. `UInt64` exists for
/// magnitudes above `i64::MAX` — integral values that fit `i64` normalize
/// to `Int` when read back.
///
/// Float equality follows IEEE-754 (`NaN != NaN`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Url(String),
    Bytes(Vec<u8>),
    Bool(bool),
    Int(i64),
    UInt64(u64),
    F32(f32),
    F64(f64),
    DateTime(DateTime<Utc>),
    Ref(PinRef),
}

impl Value {
    /// Construct the URL-marked string subtype.
    pub fn url(s: impl Into<String>) -> Self {
        Value::Url(s.into())
    }

    /// The kind name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "Str",
            Value::Url(_) => "Url",
            Value::Bytes(_) => "Bytes",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::UInt64(_) => "UInt64",
            Value::F32(_) => "F32",
            Value::F64(_) => "F64",
            Value::DateTime(_) => "DateTime",
            Value::Ref(_) => "Ref",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Url(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt64(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(f) => Some(f64::from(*f)),
            Value::F64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_pin_ref(&self) -> Option<&PinRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(u: u32) -> Self {
        Value::Int(i64::from(u))
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::UInt64(u),
        }
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::F32(f)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::F64(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::DateTime(ts)
    }
}

impl From<Pid> for Value {
    fn from(pid: Pid) -> Self {
        Value::Ref(PinRef::entity(pid))
    }
}

impl From<PinRef> for Value {
    fn from(r: PinRef) -> Self {
        Value::Ref(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn store_epoch_offset_matches_1601() {
        // The Unix epoch expressed in store time.
        let unix_epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_store_micros(&unix_epoch), STORE_EPOCH_OFFSET_MICROS);
    }

    #[test]
    fn store_micros_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2012, 6, 1, 12, 30, 45).unwrap()
            + chrono::Duration::microseconds(123_456);
        let micros = to_store_micros(&ts);
        assert_eq!(from_store_micros(micros), Some(ts));
    }

    #[test]
    fn store_micros_rejects_out_of_range() {
        assert!(from_store_micros(i64::MIN).is_none());
    }

    #[test]
    fn from_u64_normalizes_small_values() {
        assert_eq!(Value::from(5u64), Value::Int(5));
        assert_eq!(Value::from(u64::MAX), Value::UInt64(u64::MAX));
    }

    #[test]
    fn from_str_is_generic_string() {
        assert_eq!(Value::from("hello"), Value::Str("hello".into()));
        assert_ne!(Value::from("hello"), Value::url("hello"));
    }

    #[test]
    fn bytes_are_not_strings() {
        assert_ne!(Value::from("abc"), Value::from(b"abc".as_slice()));
    }

    #[test]
    fn nan_is_not_equal_to_itself() {
        assert_ne!(Value::F64(f64::NAN), Value::F64(f64::NAN));
    }

    #[test]
    fn as_accessors() {
        assert_eq!(Value::from(7).as_i64(), Some(7));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::url("u").as_str(), Some("u"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::F32(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::from(7).as_bool(), None);
        let r = PinRef::entity(Pid::local(3));
        assert_eq!(Value::from(r.clone()).as_pin_ref(), Some(&r));
    }

    #[test]
    fn serde_roundtrip() {
        let values = vec![
            Value::from("s"),
            Value::url("http://example.org"),
            Value::from(b"\x00\x01".as_slice()),
            Value::from(true),
            Value::from(-9),
            Value::UInt64(u64::MAX),
            Value::F32(2.5),
            Value::F64(-0.25),
            Value::from(Utc.with_ymd_and_hms(2001, 2, 3, 4, 5, 6).unwrap()),
            Value::from(PinRef::element(Pid::local(1), "p", 2)),
        ];
        for v in values {
            let json = serde_json::to_string(&v).unwrap();
            let parsed: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(v, parsed);
        }
    }
}
