// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The OPC UA Variant: a tagged union over the built-in type set.
//!
//! The wire form packs `TypeId` (low 6 bits), a dimensions flag (0x40) and an
//! array flag (0x80) into the leading byte. Scalars write their body directly;
//! arrays write an `i32` length then the element bodies without per-element
//! type bytes; multi-dimensional arrays append an `i32[]` of dimensions whose
//! product must equal the element count.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data_value::DataValue;
use crate::date_time::UaDateTime;
use crate::encoding::{
    read_i32, read_u8, write_i32, write_u8, BinaryEncodable, DecodingOptions, EncodingResult,
};
use crate::extension_object::ExtensionObject;
use crate::guid::Guid;
use crate::node_id::{ExpandedNodeId, NodeId};
use crate::qualified_name::{LocalizedText, QualifiedName};
use crate::status::StatusCode;
use crate::string::{ByteString, UaString};

const FLAG_DIMENSIONS: u8 = 0x40;
const FLAG_ARRAY: u8 = 0x80;
const TYPE_ID_MASK: u8 = 0x3F;

// =============================================================================
// VariantScalarTypeId
// =============================================================================

/// Built-in type ids as used in the Variant encoding byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum VariantScalarTypeId {
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    XmlElement = 16,
    NodeId = 17,
    ExpandedNodeId = 18,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
    ExtensionObject = 22,
    DataValue = 23,
    Variant = 24,
}

impl VariantScalarTypeId {
    /// Maps a raw encoding-byte type id.
    pub fn from_u8(value: u8) -> Option<Self> {
        use VariantScalarTypeId::*;
        Some(match value {
            1 => Boolean,
            2 => SByte,
            3 => Byte,
            4 => Int16,
            5 => UInt16,
            6 => Int32,
            7 => UInt32,
            8 => Int64,
            9 => UInt64,
            10 => Float,
            11 => Double,
            12 => String,
            13 => DateTime,
            14 => Guid,
            15 => ByteString,
            16 => XmlElement,
            17 => NodeId,
            18 => ExpandedNodeId,
            19 => StatusCode,
            20 => QualifiedName,
            21 => LocalizedText,
            22 => ExtensionObject,
            23 => DataValue,
            24 => Variant,
            _ => return None,
        })
    }
}

// =============================================================================
// Variant
// =============================================================================

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[allow(missing_docs)]
pub enum Variant {
    /// The null variant (type id 0, no body).
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(UaString),
    DateTime(UaDateTime),
    Guid(Guid),
    ByteString(ByteString),
    XmlElement(UaString),
    NodeId(Box<NodeId>),
    ExpandedNodeId(Box<ExpandedNodeId>),
    StatusCode(StatusCode),
    QualifiedName(Box<QualifiedName>),
    LocalizedText(Box<LocalizedText>),
    ExtensionObject(Box<ExtensionObject>),
    DataValue(Box<DataValue>),

    /// A 1-D or N-D array of a single scalar type.
    Array(Box<VariantArray>),
}

/// Array payload of a [`Variant`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantArray {
    /// Element type.
    pub type_id: VariantScalarTypeId,

    /// Elements; every value must match `type_id`.
    pub values: Vec<Variant>,

    /// Dimension lengths for N-D arrays; the product must equal `values.len()`.
    pub dimensions: Option<Vec<i32>>,
}

impl Variant {
    /// Returns `true` for the null variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    /// The scalar type id, or `None` for Empty / Array.
    pub fn scalar_type_id(&self) -> Option<VariantScalarTypeId> {
        use VariantScalarTypeId as T;
        Some(match self {
            Variant::Empty | Variant::Array(_) => return None,
            Variant::Boolean(_) => T::Boolean,
            Variant::SByte(_) => T::SByte,
            Variant::Byte(_) => T::Byte,
            Variant::Int16(_) => T::Int16,
            Variant::UInt16(_) => T::UInt16,
            Variant::Int32(_) => T::Int32,
            Variant::UInt32(_) => T::UInt32,
            Variant::Int64(_) => T::Int64,
            Variant::UInt64(_) => T::UInt64,
            Variant::Float(_) => T::Float,
            Variant::Double(_) => T::Double,
            Variant::String(_) => T::String,
            Variant::DateTime(_) => T::DateTime,
            Variant::Guid(_) => T::Guid,
            Variant::ByteString(_) => T::ByteString,
            Variant::XmlElement(_) => T::XmlElement,
            Variant::NodeId(_) => T::NodeId,
            Variant::ExpandedNodeId(_) => T::ExpandedNodeId,
            Variant::StatusCode(_) => T::StatusCode,
            Variant::QualifiedName(_) => T::QualifiedName,
            Variant::LocalizedText(_) => T::LocalizedText,
            Variant::ExtensionObject(_) => T::ExtensionObject,
            Variant::DataValue(_) => T::DataValue,
        })
    }

    /// Builds a 1-D array variant, checking element homogeneity.
    pub fn array(type_id: VariantScalarTypeId, values: Vec<Variant>) -> EncodingResult<Self> {
        if values
            .iter()
            .any(|v| v.scalar_type_id() != Some(type_id) && type_id != VariantScalarTypeId::Variant)
        {
            return Err(StatusCode::BAD_TYPE_MISMATCH);
        }
        Ok(Variant::Array(Box::new(VariantArray {
            type_id,
            values,
            dimensions: None,
        })))
    }

    // Convenience accessors in the style of the transport value type.

    /// Interprets the value as a boolean where sensible.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Boolean(v) => Some(*v),
            Variant::Byte(v) => Some(*v != 0),
            Variant::SByte(v) => Some(*v != 0),
            Variant::Int32(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Interprets the value as an i64 where a lossless conversion exists.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Variant::SByte(v) => Some(i64::from(*v)),
            Variant::Byte(v) => Some(i64::from(*v)),
            Variant::Int16(v) => Some(i64::from(*v)),
            Variant::UInt16(v) => Some(i64::from(*v)),
            Variant::Int32(v) => Some(i64::from(*v)),
            Variant::UInt32(v) => Some(i64::from(*v)),
            Variant::Int64(v) => Some(*v),
            Variant::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Interprets the value as an f64 where a numeric conversion exists.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Float(v) => Some(f64::from(*v)),
            Variant::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the string contents for string-valued variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(v) | Variant::XmlElement(v) => v.value(),
            _ => None,
        }
    }

    /// Returns the timestamp for DateTime variants.
    pub fn as_date_time(&self) -> Option<UaDateTime> {
        match self {
            Variant::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Scalar body codec (no leading type byte)
    // -------------------------------------------------------------------------

    fn scalar_body_len(&self) -> usize {
        match self {
            Variant::Empty | Variant::Array(_) => 0,
            Variant::Boolean(v) => v.byte_len(),
            Variant::SByte(v) => v.byte_len(),
            Variant::Byte(v) => v.byte_len(),
            Variant::Int16(v) => v.byte_len(),
            Variant::UInt16(v) => v.byte_len(),
            Variant::Int32(v) => v.byte_len(),
            Variant::UInt32(v) => v.byte_len(),
            Variant::Int64(v) => v.byte_len(),
            Variant::UInt64(v) => v.byte_len(),
            Variant::Float(v) => v.byte_len(),
            Variant::Double(v) => v.byte_len(),
            Variant::String(v) => v.byte_len(),
            Variant::DateTime(v) => v.byte_len(),
            Variant::Guid(v) => v.byte_len(),
            Variant::ByteString(v) => v.byte_len(),
            Variant::XmlElement(v) => v.byte_len(),
            Variant::NodeId(v) => v.byte_len(),
            Variant::ExpandedNodeId(v) => v.byte_len(),
            Variant::StatusCode(v) => v.byte_len(),
            Variant::QualifiedName(v) => v.byte_len(),
            Variant::LocalizedText(v) => v.byte_len(),
            Variant::ExtensionObject(v) => v.byte_len(),
            // A variant nested inside an array of variants carries its own
            // encoding byte.
            Variant::DataValue(v) => v.byte_len(),
        }
    }

    fn encode_scalar_body<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        match self {
            Variant::Empty | Variant::Array(_) => Ok(0),
            Variant::Boolean(v) => v.encode(stream),
            Variant::SByte(v) => v.encode(stream),
            Variant::Byte(v) => v.encode(stream),
            Variant::Int16(v) => v.encode(stream),
            Variant::UInt16(v) => v.encode(stream),
            Variant::Int32(v) => v.encode(stream),
            Variant::UInt32(v) => v.encode(stream),
            Variant::Int64(v) => v.encode(stream),
            Variant::UInt64(v) => v.encode(stream),
            Variant::Float(v) => v.encode(stream),
            Variant::Double(v) => v.encode(stream),
            Variant::String(v) => v.encode(stream),
            Variant::DateTime(v) => v.encode(stream),
            Variant::Guid(v) => v.encode(stream),
            Variant::ByteString(v) => v.encode(stream),
            Variant::XmlElement(v) => v.encode(stream),
            Variant::NodeId(v) => v.encode(stream),
            Variant::ExpandedNodeId(v) => v.encode(stream),
            Variant::StatusCode(v) => v.encode(stream),
            Variant::QualifiedName(v) => v.encode(stream),
            Variant::LocalizedText(v) => v.encode(stream),
            Variant::ExtensionObject(v) => v.encode(stream),
            Variant::DataValue(v) => v.encode(stream),
        }
    }

    fn decode_scalar_body<S: std::io::Read>(
        stream: &mut S,
        type_id: VariantScalarTypeId,
        options: &DecodingOptions,
    ) -> EncodingResult<Variant> {
        use VariantScalarTypeId as T;
        Ok(match type_id {
            T::Boolean => Variant::Boolean(bool::decode(stream, options)?),
            T::SByte => Variant::SByte(i8::decode(stream, options)?),
            T::Byte => Variant::Byte(u8::decode(stream, options)?),
            T::Int16 => Variant::Int16(i16::decode(stream, options)?),
            T::UInt16 => Variant::UInt16(u16::decode(stream, options)?),
            T::Int32 => Variant::Int32(i32::decode(stream, options)?),
            T::UInt32 => Variant::UInt32(u32::decode(stream, options)?),
            T::Int64 => Variant::Int64(i64::decode(stream, options)?),
            T::UInt64 => Variant::UInt64(u64::decode(stream, options)?),
            T::Float => Variant::Float(f32::decode(stream, options)?),
            T::Double => Variant::Double(f64::decode(stream, options)?),
            T::String => Variant::String(UaString::decode(stream, options)?),
            T::DateTime => Variant::DateTime(UaDateTime::decode(stream, options)?),
            T::Guid => Variant::Guid(Guid::decode(stream, options)?),
            T::ByteString => Variant::ByteString(ByteString::decode(stream, options)?),
            T::XmlElement => Variant::XmlElement(UaString::decode(stream, options)?),
            T::NodeId => Variant::NodeId(Box::new(NodeId::decode(stream, options)?)),
            T::ExpandedNodeId => {
                Variant::ExpandedNodeId(Box::new(ExpandedNodeId::decode(stream, options)?))
            }
            T::StatusCode => Variant::StatusCode(StatusCode::decode(stream, options)?),
            T::QualifiedName => {
                Variant::QualifiedName(Box::new(QualifiedName::decode(stream, options)?))
            }
            T::LocalizedText => {
                Variant::LocalizedText(Box::new(LocalizedText::decode(stream, options)?))
            }
            T::ExtensionObject => {
                Variant::ExtensionObject(Box::new(ExtensionObject::decode(stream, options)?))
            }
            T::DataValue => Variant::DataValue(Box::new(DataValue::decode(stream, options)?)),
            T::Variant => Variant::decode(stream, options)?,
        })
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "null"),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::SByte(v) => write!(f, "{}", v),
            Variant::Byte(v) => write!(f, "{}", v),
            Variant::Int16(v) => write!(f, "{}", v),
            Variant::UInt16(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{}", v),
            Variant::DateTime(v) => write!(f, "{}", v),
            Variant::Guid(v) => write!(f, "{}", v),
            Variant::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Variant::XmlElement(v) => write!(f, "{}", v),
            Variant::NodeId(v) => write!(f, "{}", v),
            Variant::ExpandedNodeId(v) => write!(f, "{}", v),
            Variant::StatusCode(v) => write!(f, "{}", v),
            Variant::QualifiedName(v) => write!(f, "{}", v),
            Variant::LocalizedText(v) => write!(f, "{}", v),
            Variant::ExtensionObject(v) => write!(f, "ExtensionObject({})", v.type_id),
            Variant::DataValue(_) => write!(f, "DataValue"),
            Variant::Array(a) => write!(f, "[{} items]", a.values.len()),
        }
    }
}

macro_rules! variant_from {
    ($($ty:ty => $arm:ident;)+) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Variant::$arm(value)
                }
            }
        )+
    };
}

variant_from! {
    bool => Boolean;
    i8 => SByte;
    u8 => Byte;
    i16 => Int16;
    u16 => UInt16;
    i32 => Int32;
    u32 => UInt32;
    i64 => Int64;
    u64 => UInt64;
    f32 => Float;
    f64 => Double;
    UaDateTime => DateTime;
    StatusCode => StatusCode;
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(UaString::from(value))
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(UaString::from(value))
    }
}

impl From<NodeId> for Variant {
    fn from(value: NodeId) -> Self {
        Variant::NodeId(Box::new(value))
    }
}

impl BinaryEncodable for Variant {
    fn byte_len(&self) -> usize {
        match self {
            Variant::Empty => 1,
            Variant::Array(array) => {
                let mut sz = 1 + 4;
                // Elements of a variant-typed array carry their own encoding
                // byte; all other element types are bare bodies.
                sz += array
                    .values
                    .iter()
                    .map(|value| {
                        if array.type_id == VariantScalarTypeId::Variant {
                            value.byte_len()
                        } else {
                            value.scalar_body_len()
                        }
                    })
                    .sum::<usize>();
                if let Some(dims) = &array.dimensions {
                    sz += 4 + dims.len() * 4;
                }
                sz
            }
            scalar => 1 + scalar.scalar_body_len(),
        }
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        match self {
            Variant::Empty => write_u8(stream, 0),
            Variant::Array(array) => {
                if array.values.len() > i32::MAX as usize {
                    return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
                }
                if let Some(dims) = &array.dimensions {
                    let product: i64 = dims.iter().map(|d| i64::from(*d)).product();
                    if product != array.values.len() as i64 {
                        return Err(StatusCode::BAD_ENCODING_ERROR);
                    }
                }
                let mut mask = array.type_id as u8 | FLAG_ARRAY;
                if array.dimensions.is_some() {
                    mask |= FLAG_DIMENSIONS;
                }
                let mut sz = write_u8(stream, mask)?;
                sz += write_i32(stream, array.values.len() as i32)?;
                for value in &array.values {
                    if value.scalar_type_id() != Some(array.type_id)
                        && array.type_id != VariantScalarTypeId::Variant
                    {
                        return Err(StatusCode::BAD_ENCODING_ERROR);
                    }
                    sz += if array.type_id == VariantScalarTypeId::Variant {
                        value.encode(stream)?
                    } else {
                        value.encode_scalar_body(stream)?
                    };
                }
                if let Some(dims) = &array.dimensions {
                    sz += write_i32(stream, dims.len() as i32)?;
                    for dim in dims {
                        sz += write_i32(stream, *dim)?;
                    }
                }
                Ok(sz)
            }
            scalar => {
                // Unwrap is safe: Empty and Array are handled above.
                let type_id = scalar.scalar_type_id().ok_or(StatusCode::BAD_ENCODING_ERROR)?;
                let mut sz = write_u8(stream, type_id as u8)?;
                sz += scalar.encode_scalar_body(stream)?;
                Ok(sz)
            }
        }
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let mask = read_u8(stream)?;
        if mask & TYPE_ID_MASK == 0 {
            return Ok(Variant::Empty);
        }
        let type_id = VariantScalarTypeId::from_u8(mask & TYPE_ID_MASK)
            .ok_or(StatusCode::BAD_DECODING_ERROR)?;

        if mask & FLAG_ARRAY == 0 {
            return Variant::decode_scalar_body(stream, type_id, options);
        }

        let len = read_i32(stream)?;
        if len < 0 {
            return Ok(Variant::Empty);
        }
        let len = len as usize;
        if len > options.max_array_length {
            return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
        }
        let mut values = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            values.push(if type_id == VariantScalarTypeId::Variant {
                Variant::decode(stream, options)?
            } else {
                Variant::decode_scalar_body(stream, type_id, options)?
            });
        }

        let dimensions = if mask & FLAG_DIMENSIONS != 0 {
            let dim_count = read_i32(stream)?;
            if dim_count < 0 {
                None
            } else {
                let dim_count = dim_count as usize;
                if dim_count > options.max_array_length {
                    return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
                }
                let mut dims = Vec::with_capacity(dim_count);
                for _ in 0..dim_count {
                    dims.push(read_i32(stream)?);
                }
                let product: i64 = dims.iter().map(|d| i64::from(*d)).product();
                if product != len as i64 {
                    return Err(StatusCode::BAD_DECODING_ERROR);
                }
                Some(dims)
            }
        } else {
            None
        };

        Ok(Variant::Array(Box::new(VariantArray {
            type_id,
            values,
            dimensions,
        })))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(variant: &Variant) -> Variant {
        let buf = variant.encode_to_vec().unwrap();
        Variant::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap()
    }

    #[test]
    fn test_empty_is_single_zero_byte() {
        assert_eq!(Variant::Empty.encode_to_vec().unwrap(), vec![0x00]);
        assert!(round_trip(&Variant::Empty).is_empty());
    }

    #[test]
    fn test_scalar_round_trips() {
        let samples: Vec<Variant> = vec![
            true.into(),
            Variant::SByte(-5),
            Variant::Byte(200),
            Variant::Int16(-1234),
            Variant::UInt16(40_000),
            42i32.into(),
            7u32.into(),
            Variant::Int64(-1),
            Variant::UInt64(u64::MAX),
            Variant::Float(1.5),
            Variant::Double(-2.25),
            "hello".into(),
            Variant::DateTime(UaDateTime::now()),
            Variant::Guid(Guid::new_random()),
            Variant::ByteString(ByteString::from(vec![9u8, 8, 7])),
            Variant::NodeId(Box::new(NodeId::string(2, "Tank.Level"))),
            Variant::StatusCode(StatusCode::BAD_NODE_ID_UNKNOWN),
            Variant::QualifiedName(Box::new(QualifiedName::new(1, "Speed"))),
            Variant::LocalizedText(Box::new(LocalizedText::new("Pump"))),
        ];
        for variant in samples {
            assert_eq!(round_trip(&variant), variant, "round trip of {variant}");
        }
    }

    #[test]
    fn test_one_dimensional_array() {
        let array = Variant::array(
            VariantScalarTypeId::Int32,
            vec![1i32.into(), 2i32.into(), 3i32.into()],
        )
        .unwrap();
        let buf = array.encode_to_vec().unwrap();
        assert_eq!(buf[0], VariantScalarTypeId::Int32 as u8 | 0x80);
        assert_eq!(round_trip(&array), array);
    }

    #[test]
    fn test_multi_dimensional_array() {
        let values: Vec<Variant> = (0..6).map(|v| Variant::Int32(v)).collect();
        let array = Variant::Array(Box::new(VariantArray {
            type_id: VariantScalarTypeId::Int32,
            values,
            dimensions: Some(vec![2, 3]),
        }));
        let buf = array.encode_to_vec().unwrap();
        assert_eq!(buf[0], VariantScalarTypeId::Int32 as u8 | 0x80 | 0x40);
        assert_eq!(round_trip(&array), array);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let array = Variant::Array(Box::new(VariantArray {
            type_id: VariantScalarTypeId::Int32,
            values: vec![Variant::Int32(1)],
            dimensions: Some(vec![2, 3]),
        }));
        assert!(array.encode_to_vec().is_err());
    }

    #[test]
    fn test_heterogeneous_array_rejected() {
        assert!(Variant::array(
            VariantScalarTypeId::Int32,
            vec![Variant::Int32(1), Variant::Boolean(true)],
        )
        .is_err());
    }

    #[test]
    fn test_invalid_type_id_rejected() {
        let buf = vec![0x3F];
        assert_eq!(
            Variant::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap_err(),
            StatusCode::BAD_DECODING_ERROR
        );
    }
}
