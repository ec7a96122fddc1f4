// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Read / Write attribute service messages.

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeId;
use crate::data_value::DataValue;
use crate::diagnostic_info::DiagnosticInfo;
use crate::node_id::NodeId;
use crate::qualified_name::QualifiedName;
use crate::status::StatusCode;
use crate::string::UaString;

use super::{RequestHeader, ResponseHeader};

ua_enum! {
    /// Which timestamps the server should return with values.
    TimestampsToReturn {
        /// Source timestamp only.
        Source = 0,
        /// Server timestamp only.
        Server = 1,
        /// Both timestamps.
        Both = 2,
        /// No timestamps.
        Neither = 3,
    }
}

/// One attribute to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadValueId {
    /// The node.
    pub node_id: NodeId,

    /// The attribute, as a raw id ([`AttributeId`] values).
    pub attribute_id: u32,

    /// Sub-range for array values; null for the whole value.
    pub index_range: UaString,

    /// Requested data encoding; null for DefaultBinary.
    pub data_encoding: QualifiedName,
}

impl ReadValueId {
    /// Reads the Value attribute of a node.
    pub fn value_of(node_id: NodeId) -> Self {
        Self {
            node_id,
            attribute_id: AttributeId::Value as u32,
            index_range: UaString::null(),
            data_encoding: QualifiedName::null(),
        }
    }

    /// Reads an arbitrary attribute of a node.
    pub fn attribute_of(node_id: NodeId, attribute: AttributeId) -> Self {
        Self {
            node_id,
            attribute_id: attribute as u32,
            index_range: UaString::null(),
            data_encoding: QualifiedName::null(),
        }
    }
}

binary_encodable_impl!(ReadValueId: node_id, attribute_id, index_range, data_encoding);

/// Reads one or more attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// Oldest acceptable cached value age in milliseconds; 0 forces a device read.
    pub max_age: f64,

    /// Timestamps to return.
    pub timestamps_to_return: TimestampsToReturn,

    /// The attributes to read.
    pub nodes_to_read: Option<Vec<ReadValueId>>,
}

binary_encodable_impl!(ReadRequest:
    request_header,
    max_age,
    timestamps_to_return,
    nodes_to_read,
);

/// Values for a [`ReadRequest`], one per requested attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReadResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One result per `nodes_to_read` entry, in order.
    pub results: Option<Vec<DataValue>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(ReadResponse: response_header, results, diagnostic_infos);

/// One attribute to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteValue {
    /// The node.
    pub node_id: NodeId,

    /// The attribute, as a raw id.
    pub attribute_id: u32,

    /// Sub-range for array values; null for the whole value.
    pub index_range: UaString,

    /// The value to write.
    pub value: DataValue,
}

impl WriteValue {
    /// Writes the Value attribute of a node.
    pub fn value_of(node_id: NodeId, value: DataValue) -> Self {
        Self {
            node_id,
            attribute_id: AttributeId::Value as u32,
            index_range: UaString::null(),
            value,
        }
    }
}

binary_encodable_impl!(WriteValue: node_id, attribute_id, index_range, value);

/// Writes one or more attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The attributes to write.
    pub nodes_to_write: Option<Vec<WriteValue>>,
}

binary_encodable_impl!(WriteRequest: request_header, nodes_to_write);

/// Per-write results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WriteResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One status per `nodes_to_write` entry, in order.
    pub results: Option<Vec<StatusCode>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(WriteResponse: response_header, results, diagnostic_infos);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{BinaryEncodable, DecodingOptions};
    use crate::variant::Variant;
    use std::io::Cursor;

    #[test]
    fn test_read_request_round_trip() {
        let request = ReadRequest {
            request_header: RequestHeader::new(NodeId::numeric(1, 99), 5, 1000),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Some(vec![
                ReadValueId::value_of(NodeId::numeric(0, 2258)),
                ReadValueId::attribute_of(NodeId::string(2, "TestInt"), AttributeId::DisplayName),
            ]),
        };
        let buf = request.encode_to_vec().unwrap();
        let decoded =
            ReadRequest::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn test_write_request_round_trip() {
        let request = WriteRequest {
            request_header: RequestHeader::default(),
            nodes_to_write: Some(vec![WriteValue::value_of(
                NodeId::string(2, "TestInt"),
                DataValue::value_only(Variant::Int32(42)),
            )]),
        };
        let buf = request.encode_to_vec().unwrap();
        let decoded =
            WriteRequest::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(request, decoded);
    }
}
