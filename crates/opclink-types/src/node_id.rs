// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA node identifiers.
//!
//! A [`NodeId`] pairs a 16-bit namespace index with one of four identifier
//! kinds. The binary encoding selects the most compact of six wire forms;
//! the textual form is `ns=<n>;{i|s|g|b}=<value>` with `ns=` omitted for
//! namespace 0 and opaque identifiers rendered as base64.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encoding::{
    read_u16, read_u32, read_u8, write_u16, write_u32, write_u8, BinaryEncodable, DecodingOptions,
    EncodingResult,
};
use crate::guid::Guid;
use crate::status::StatusCode;
use crate::string::{ByteString, UaString};

// Wire forms (Part 6, table 7).
const FORM_TWO_BYTE: u8 = 0x00;
const FORM_FOUR_BYTE: u8 = 0x01;
const FORM_NUMERIC: u8 = 0x02;
const FORM_STRING: u8 = 0x03;
const FORM_GUID: u8 = 0x04;
const FORM_BYTE_STRING: u8 = 0x05;

// ExpandedNodeId flag bits on the form byte.
const FLAG_NAMESPACE_URI: u8 = 0x80;
const FLAG_SERVER_INDEX: u8 = 0x40;

// =============================================================================
// Identifier
// =============================================================================

/// The identifier portion of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Identifier {
    /// Numeric identifier, the most compact and most common form.
    Numeric(u32),

    /// String identifier.
    String(UaString),

    /// GUID identifier.
    Guid(Guid),

    /// Opaque byte-string identifier, compared byte-wise.
    Opaque(ByteString),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v.as_ref()),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v.as_ref())),
        }
    }
}

// =============================================================================
// NodeId
// =============================================================================

/// The address of a node within a server's address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace: u16,

    /// The identifier.
    pub identifier: Identifier,
}

impl NodeId {
    /// Creates a numeric node id.
    #[inline]
    pub const fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(UaString::from(value.into())),
        }
    }

    /// Creates a GUID node id.
    #[inline]
    pub fn guid(namespace: u16, value: Uuid) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(Guid(value)),
        }
    }

    /// Creates an opaque node id.
    #[inline]
    pub fn opaque(namespace: u16, value: Vec<u8>) -> Self {
        Self {
            namespace,
            identifier: Identifier::Opaque(ByteString::from(value)),
        }
    }

    /// The null node id (ns=0, i=0), meaning "no node".
    #[inline]
    pub const fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// Returns `true` for the null node id.
    pub fn is_null(&self) -> bool {
        self.namespace == 0 && matches!(self.identifier, Identifier::Numeric(0))
    }

    /// Returns the numeric value if this is a numeric identifier.
    pub fn as_numeric(&self) -> Option<u32> {
        match self.identifier {
            Identifier::Numeric(v) => Some(v),
            _ => None,
        }
    }

    // Well-known nodes used by the client itself.

    /// Root folder (i=84).
    pub const ROOT_FOLDER: NodeId = NodeId::numeric(0, 84);
    /// Objects folder (i=85).
    pub const OBJECTS_FOLDER: NodeId = NodeId::numeric(0, 85);
    /// Types folder (i=86).
    pub const TYPES_FOLDER: NodeId = NodeId::numeric(0, 86);
    /// Views folder (i=87).
    pub const VIEWS_FOLDER: NodeId = NodeId::numeric(0, 87);
    /// Server object (i=2253).
    pub const SERVER: NodeId = NodeId::numeric(0, 2253);
    /// Server status state variable (i=2259).
    pub const SERVER_STATUS_STATE: NodeId = NodeId::numeric(0, 2259);
    /// Server current-time variable (i=2258).
    pub const SERVER_CURRENT_TIME: NodeId = NodeId::numeric(0, 2258);
    /// HierarchicalReferences reference type (i=33).
    pub const HIERARCHICAL_REFERENCES: NodeId = NodeId::numeric(0, 33);
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        write!(f, "{}", self.identifier)
    }
}

impl FromStr for NodeId {
    type Err = StatusCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail
                    .split_once(';')
                    .ok_or(StatusCode::BAD_NODE_ID_INVALID)?;
                let ns: u16 = ns.parse().map_err(|_| StatusCode::BAD_NODE_ID_INVALID)?;
                (ns, rest)
            }
            None => (0, s),
        };

        let identifier = if let Some(v) = rest.strip_prefix("i=") {
            Identifier::Numeric(v.parse().map_err(|_| StatusCode::BAD_NODE_ID_INVALID)?)
        } else if let Some(v) = rest.strip_prefix("s=") {
            Identifier::String(UaString::from(v))
        } else if let Some(v) = rest.strip_prefix("g=") {
            let uuid = Uuid::parse_str(v).map_err(|_| StatusCode::BAD_NODE_ID_INVALID)?;
            Identifier::Guid(Guid(uuid))
        } else if let Some(v) = rest.strip_prefix("b=") {
            let bytes = BASE64
                .decode(v)
                .map_err(|_| StatusCode::BAD_NODE_ID_INVALID)?;
            Identifier::Opaque(ByteString::from(bytes))
        } else {
            return Err(StatusCode::BAD_NODE_ID_INVALID);
        };

        Ok(NodeId {
            namespace,
            identifier,
        })
    }
}

impl BinaryEncodable for NodeId {
    fn byte_len(&self) -> usize {
        match &self.identifier {
            Identifier::Numeric(value) => {
                if *value <= 0xFF && self.namespace == 0 {
                    2
                } else if *value <= 0xFFFF && self.namespace <= 0xFF {
                    4
                } else {
                    7
                }
            }
            Identifier::String(s) => 3 + s.byte_len(),
            Identifier::Guid(_) => 3 + 16,
            Identifier::Opaque(b) => 3 + b.byte_len(),
        }
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        match &self.identifier {
            Identifier::Numeric(value) => {
                if *value <= 0xFF && self.namespace == 0 {
                    let mut sz = write_u8(stream, FORM_TWO_BYTE)?;
                    sz += write_u8(stream, *value as u8)?;
                    Ok(sz)
                } else if *value <= 0xFFFF && self.namespace <= 0xFF {
                    let mut sz = write_u8(stream, FORM_FOUR_BYTE)?;
                    sz += write_u8(stream, self.namespace as u8)?;
                    sz += write_u16(stream, *value as u16)?;
                    Ok(sz)
                } else {
                    let mut sz = write_u8(stream, FORM_NUMERIC)?;
                    sz += write_u16(stream, self.namespace)?;
                    sz += write_u32(stream, *value)?;
                    Ok(sz)
                }
            }
            Identifier::String(s) => {
                let mut sz = write_u8(stream, FORM_STRING)?;
                sz += write_u16(stream, self.namespace)?;
                sz += s.encode(stream)?;
                Ok(sz)
            }
            Identifier::Guid(g) => {
                let mut sz = write_u8(stream, FORM_GUID)?;
                sz += write_u16(stream, self.namespace)?;
                sz += g.encode(stream)?;
                Ok(sz)
            }
            Identifier::Opaque(b) => {
                let mut sz = write_u8(stream, FORM_BYTE_STRING)?;
                sz += write_u16(stream, self.namespace)?;
                sz += b.encode(stream)?;
                Ok(sz)
            }
        }
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let form = read_u8(stream)?;
        decode_node_id_body(stream, options, form & !(FLAG_NAMESPACE_URI | FLAG_SERVER_INDEX))
    }
}

/// Decodes the namespace/identifier body for a given (flag-stripped) form.
fn decode_node_id_body<S: std::io::Read>(
    stream: &mut S,
    options: &DecodingOptions,
    form: u8,
) -> EncodingResult<NodeId> {
    match form {
        FORM_TWO_BYTE => {
            let value = read_u8(stream)?;
            Ok(NodeId::numeric(0, u32::from(value)))
        }
        FORM_FOUR_BYTE => {
            let namespace = read_u8(stream)?;
            let value = read_u16(stream)?;
            Ok(NodeId::numeric(u16::from(namespace), u32::from(value)))
        }
        FORM_NUMERIC => {
            let namespace = read_u16(stream)?;
            let value = read_u32(stream)?;
            Ok(NodeId::numeric(namespace, value))
        }
        FORM_STRING => {
            let namespace = read_u16(stream)?;
            let value = UaString::decode(stream, options)?;
            Ok(NodeId {
                namespace,
                identifier: Identifier::String(value),
            })
        }
        FORM_GUID => {
            let namespace = read_u16(stream)?;
            let value = Guid::decode(stream, options)?;
            Ok(NodeId {
                namespace,
                identifier: Identifier::Guid(value),
            })
        }
        FORM_BYTE_STRING => {
            let namespace = read_u16(stream)?;
            let value = ByteString::decode(stream, options)?;
            Ok(NodeId {
                namespace,
                identifier: Identifier::Opaque(value),
            })
        }
        _ => Err(StatusCode::BAD_DECODING_ERROR),
    }
}

// =============================================================================
// ExpandedNodeId
// =============================================================================

/// A [`NodeId`] qualified with an optional namespace URI and server index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ExpandedNodeId {
    /// The inner node id.
    pub node_id: NodeId,

    /// Namespace URI; when present the inner namespace index is 0 on the wire.
    pub namespace_uri: UaString,

    /// Index into the server table; 0 means the local server.
    pub server_index: u32,
}

impl ExpandedNodeId {
    /// Wraps a plain node id for the local server.
    pub fn local(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: UaString::null(),
            server_index: 0,
        }
    }

    /// Returns `true` when this refers to a node on the local server with no URI.
    pub fn is_local(&self) -> bool {
        self.namespace_uri.is_null() && self.server_index == 0
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        Self::local(node_id)
    }
}

impl fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.server_index != 0 {
            write!(f, "svr={};", self.server_index)?;
        }
        if !self.namespace_uri.is_null() {
            write!(f, "nsu={};{}", self.namespace_uri.as_ref(), self.node_id.identifier)
        } else {
            write!(f, "{}", self.node_id)
        }
    }
}

impl BinaryEncodable for ExpandedNodeId {
    fn byte_len(&self) -> usize {
        let mut sz = self.node_id.byte_len();
        if !self.namespace_uri.is_null() {
            sz += self.namespace_uri.byte_len();
        }
        if self.server_index != 0 {
            sz += 4;
        }
        sz
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        // Re-encode the inner id with flag bits folded into its form byte.
        let body = self.node_id.encode_to_vec()?;
        let mut form = body[0];
        if !self.namespace_uri.is_null() {
            form |= FLAG_NAMESPACE_URI;
        }
        if self.server_index != 0 {
            form |= FLAG_SERVER_INDEX;
        }
        let mut sz = write_u8(stream, form)?;
        sz += crate::encoding::write_bytes(stream, &body[1..])?;
        if !self.namespace_uri.is_null() {
            sz += self.namespace_uri.encode(stream)?;
        }
        if self.server_index != 0 {
            sz += write_u32(stream, self.server_index)?;
        }
        Ok(sz)
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let form = read_u8(stream)?;
        let node_id = decode_node_id_body(
            stream,
            options,
            form & !(FLAG_NAMESPACE_URI | FLAG_SERVER_INDEX),
        )?;
        let namespace_uri = if form & FLAG_NAMESPACE_URI != 0 {
            UaString::decode(stream, options)?
        } else {
            UaString::null()
        };
        let server_index = if form & FLAG_SERVER_INDEX != 0 {
            read_u32(stream)?
        } else {
            0
        };
        Ok(ExpandedNodeId {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(node: &NodeId) -> NodeId {
        let buf = node.encode_to_vec().unwrap();
        NodeId::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap()
    }

    #[test]
    fn test_two_byte_form() {
        let node = NodeId::numeric(0, 84);
        assert_eq!(node.encode_to_vec().unwrap(), vec![0x00, 84]);
        assert_eq!(round_trip(&node), node);
    }

    #[test]
    fn test_four_byte_form() {
        let node = NodeId::numeric(2, 1001);
        let buf = node.encode_to_vec().unwrap();
        assert_eq!(buf[0], 0x01);
        assert_eq!(buf.len(), 4);
        assert_eq!(round_trip(&node), node);
    }

    #[test]
    fn test_full_numeric_form() {
        let node = NodeId::numeric(300, 70_000);
        let buf = node.encode_to_vec().unwrap();
        assert_eq!(buf[0], 0x02);
        assert_eq!(buf.len(), 7);
        assert_eq!(round_trip(&node), node);
    }

    #[test]
    fn test_string_guid_opaque_forms() {
        let string = NodeId::string(3, "Tag_01");
        let guid = NodeId::guid(1, Uuid::new_v4());
        let opaque = NodeId::opaque(2, b"hello".to_vec());
        assert_eq!(round_trip(&string), string);
        assert_eq!(round_trip(&guid), guid);
        assert_eq!(round_trip(&opaque), opaque);
    }

    #[test]
    fn test_parse_format_round_trip() {
        for text in ["i=2258", "ns=3;s=Tag_01", "ns=2;i=1001", "s=Plain"] {
            let node: NodeId = text.parse().unwrap();
            assert_eq!(node.to_string(), text);
        }
    }

    #[test]
    fn test_parse_opaque_base64() {
        let node: NodeId = "b=aGVsbG8=".parse().unwrap();
        match &node.identifier {
            Identifier::Opaque(bytes) => assert_eq!(bytes.as_ref(), b"hello"),
            other => panic!("expected opaque identifier, got {:?}", other),
        }
        assert_eq!(node.to_string(), "b=aGVsbG8=");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("x=1".parse::<NodeId>().is_err());
        assert!("ns=abc;i=1".parse::<NodeId>().is_err());
        assert!("ns=2".parse::<NodeId>().is_err());
        assert!("g=not-a-guid".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_null_node_id() {
        assert!(NodeId::null().is_null());
        assert!(!NodeId::numeric(0, 1).is_null());
        assert!(!NodeId::string(0, "").is_null());
    }

    #[test]
    fn test_expanded_round_trip() {
        let plain = ExpandedNodeId::local(NodeId::numeric(2, 42));
        let with_uri = ExpandedNodeId {
            node_id: NodeId::numeric(0, 42),
            namespace_uri: UaString::from("urn:factory:line1"),
            server_index: 3,
        };
        for node in [plain, with_uri] {
            let buf = node.encode_to_vec().unwrap();
            let decoded =
                ExpandedNodeId::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
            assert_eq!(node, decoded);
        }
    }
}
