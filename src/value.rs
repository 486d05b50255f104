//! Opaque data values and raw-offset capture.
//!
//! [`DataValue`] is the destination of last resort: when the caller has no
//! schema for a record, every wire type maps onto a canonical
//! representation. Unsigned integers of any width collapse to `Uint64`;
//! signed 32-bit and 128-bit values keep their own variants.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Serialize};

/// A decoded MMDB data value with no caller-imposed shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataValue {
    /// Boolean value.
    Boolean(bool),
    /// Raw byte payload.
    Bytes(Vec<u8>),
    /// IEEE 754 double precision float.
    Double(f64),
    /// IEEE 754 single precision float.
    Float(f32),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Key-value map; keys are always strings.
    Map(BTreeMap<String, DataValue>),
    /// UTF-8 string.
    String(String),
    /// Unsigned integer up to 64 bits wide on the wire.
    Uint64(u64),
    /// Unsigned 128-bit integer.
    Uint128(u128),
    /// Ordered sequence of values.
    Array(Vec<DataValue>),
}

impl DataValue {
    /// Map accessor; `None` for any other variant.
    pub fn as_map(&self) -> Option<&BTreeMap<String, DataValue>> {
        match self {
            DataValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// String accessor; `None` for any other variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Unsigned accessor covering the `Uint64` variant.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint64(v) => Some(*v),
            _ => None,
        }
    }
}

struct DataValueVisitor;

impl<'de> Visitor<'de> for DataValueVisitor {
    type Value = DataValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any MMDB data value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<DataValue, E> {
        Ok(DataValue::Boolean(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<DataValue, E> {
        i32::try_from(v)
            .map(DataValue::Int32)
            .map_err(|_| E::custom("signed value out of 32-bit range"))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<DataValue, E> {
        Ok(DataValue::Uint64(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<DataValue, E> {
        Ok(DataValue::Uint128(v))
    }

    fn visit_f32<E: de::Error>(self, v: f32) -> Result<DataValue, E> {
        Ok(DataValue::Float(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<DataValue, E> {
        Ok(DataValue::Double(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<DataValue, E> {
        Ok(DataValue::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<DataValue, E> {
        Ok(DataValue::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<DataValue, E> {
        Ok(DataValue::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<DataValue, E> {
        Ok(DataValue::Bytes(v))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<DataValue, A::Error> {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(value) = seq.next_element()? {
            values.push(value);
        }
        Ok(DataValue::Array(values))
    }

    fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<DataValue, A::Error> {
        let mut values = BTreeMap::new();
        // Duplicate keys resolve last-wins.
        while let Some((key, value)) = map.next_entry::<String, DataValue>()? {
            values.insert(key, value);
        }
        Ok(DataValue::Map(values))
    }
}

impl<'de> Deserialize<'de> for DataValue {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DataValueVisitor)
    }
}

/// Magic newtype name the decoder intercepts for raw-offset capture.
pub(crate) const OFFSET_NEWTYPE_NAME: &str = "$geotrie::private::Offset";

/// A raw offset into the data section, captured in place of a value.
///
/// A record field of this type is not decoded; the decoder stores the
/// position where the value starts and steps over it. The captured offset
/// feeds [`Reader::decode`](crate::Reader::decode) for deferred decoding
/// of large or rarely-needed subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset(pub usize);

struct OffsetVisitor;

impl<'de> Visitor<'de> for OffsetVisitor {
    type Value = Offset;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a data section offset")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Offset, E> {
        Ok(Offset(v as usize))
    }
}

impl<'de> Deserialize<'de> for Offset {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(OFFSET_NEWTYPE_NAME, OffsetVisitor)
    }
}
