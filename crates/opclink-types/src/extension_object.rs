// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Extension objects: structured bodies carried with a type-identifying node id.
//!
//! Unknown type ids decode to an opaque body that re-encodes byte-identically,
//! which is what gives the protocol its forward compatibility.

use serde::{Deserialize, Serialize};

use crate::encoding::{
    read_u8, write_u8, BinaryEncodable, DecodingOptions, EncodingResult,
};
use crate::node_id::NodeId;
use crate::status::StatusCode;
use crate::string::{ByteString, UaString, XmlElement};

const ENCODING_NONE: u8 = 0x00;
const ENCODING_BINARY: u8 = 0x01;
const ENCODING_XML: u8 = 0x02;

/// The body of an [`ExtensionObject`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExtensionObjectBody {
    /// No body.
    #[default]
    None,

    /// Binary-encoded body, kept as raw bytes.
    Binary(ByteString),

    /// XML-encoded body.
    Xml(XmlElement),
}

/// A structured value carried with its encoding node id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExtensionObject {
    /// Node id of the type's binary (or XML) encoding.
    pub type_id: NodeId,

    /// The encoded body.
    pub body: ExtensionObjectBody,
}

impl ExtensionObject {
    /// An extension object with a null type id and no body.
    pub fn null() -> Self {
        Self::default()
    }

    /// Returns `true` when both the type id and body are null.
    pub fn is_null(&self) -> bool {
        self.type_id.is_null() && matches!(self.body, ExtensionObjectBody::None)
    }

    /// Wraps an encodable value under the given binary-encoding type id.
    pub fn from_encodable<T: BinaryEncodable>(
        type_id: NodeId,
        value: &T,
    ) -> EncodingResult<Self> {
        Ok(Self {
            type_id,
            body: ExtensionObjectBody::Binary(ByteString::from(value.encode_to_vec()?)),
        })
    }

    /// Decodes the binary body as `T`.
    ///
    /// Fails with `BadDecodingError` when the body is absent or XML.
    pub fn decode_inner<T: BinaryEncodable>(
        &self,
        options: &DecodingOptions,
    ) -> EncodingResult<T> {
        match &self.body {
            ExtensionObjectBody::Binary(bytes) => {
                let mut cursor = std::io::Cursor::new(bytes.as_ref());
                T::decode(&mut cursor, options)
            }
            _ => Err(StatusCode::BAD_DECODING_ERROR),
        }
    }
}

impl BinaryEncodable for ExtensionObject {
    fn byte_len(&self) -> usize {
        let body = match &self.body {
            ExtensionObjectBody::None => 0,
            ExtensionObjectBody::Binary(b) => b.byte_len(),
            ExtensionObjectBody::Xml(s) => s.byte_len(),
        };
        self.type_id.byte_len() + 1 + body
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut sz = self.type_id.encode(stream)?;
        match &self.body {
            ExtensionObjectBody::None => {
                sz += write_u8(stream, ENCODING_NONE)?;
            }
            ExtensionObjectBody::Binary(bytes) => {
                sz += write_u8(stream, ENCODING_BINARY)?;
                sz += bytes.encode(stream)?;
            }
            ExtensionObjectBody::Xml(xml) => {
                sz += write_u8(stream, ENCODING_XML)?;
                sz += xml.encode(stream)?;
            }
        }
        Ok(sz)
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let type_id = NodeId::decode(stream, options)?;
        let body = match read_u8(stream)? {
            ENCODING_NONE => ExtensionObjectBody::None,
            ENCODING_BINARY => ExtensionObjectBody::Binary(ByteString::decode(stream, options)?),
            ENCODING_XML => ExtensionObjectBody::Xml(UaString::decode(stream, options)?),
            _ => return Err(StatusCode::BAD_DECODING_ERROR),
        };
        Ok(Self { type_id, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_unknown_type_round_trips_byte_identical() {
        let object = ExtensionObject {
            type_id: NodeId::numeric(4, 99_999),
            body: ExtensionObjectBody::Binary(ByteString::from(vec![0xDE, 0xAD, 0xBE, 0xEF])),
        };
        let buf = object.encode_to_vec().unwrap();
        let decoded =
            ExtensionObject::decode(&mut Cursor::new(&buf), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded.encode_to_vec().unwrap(), buf);
    }

    #[test]
    fn test_null_object() {
        let object = ExtensionObject::null();
        let buf = object.encode_to_vec().unwrap();
        // Two-byte node id form plus the encoding byte.
        assert_eq!(buf, vec![0x00, 0x00, 0x00]);
        let decoded =
            ExtensionObject::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert!(decoded.is_null());
    }

    #[test]
    fn test_wrap_and_unwrap_encodable() {
        let inner: u32 = 123_456;
        let object = ExtensionObject::from_encodable(NodeId::numeric(0, 7), &inner).unwrap();
        let out: u32 = object.decode_inner(&DecodingOptions::default()).unwrap();
        assert_eq!(out, inner);
    }
}
