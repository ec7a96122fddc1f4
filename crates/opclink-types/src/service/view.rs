// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Browse / BrowseNext view service messages.

use serde::{Deserialize, Serialize};

use crate::date_time::UaDateTime;
use crate::diagnostic_info::DiagnosticInfo;
use crate::node_id::{ExpandedNodeId, NodeId};
use crate::qualified_name::{LocalizedText, QualifiedName};
use crate::status::StatusCode;
use crate::string::ByteString;

use super::{RequestHeader, ResponseHeader};

ua_enum! {
    /// Direction in which references are followed.
    BrowseDirection {
        /// Follow references forward.
        Forward = 0,
        /// Follow references backward.
        Inverse = 1,
        /// Follow both directions.
        Both = 2,
    }
}

ua_enum! {
    /// The class of a node.
    NodeClass {
        /// Not specified.
        Unspecified = 0,
        /// An object.
        Object = 1,
        /// A variable.
        Variable = 2,
        /// A method.
        Method = 4,
        /// An object type.
        ObjectType = 8,
        /// A variable type.
        VariableType = 16,
        /// A reference type.
        ReferenceType = 32,
        /// A data type.
        DataType = 64,
        /// A view.
        View = 128,
    }
}

/// Bits of the browse result mask requesting all reference fields.
pub const BROWSE_RESULT_MASK_ALL: u32 = 0x3F;

/// The view to browse in; a null view id means the whole address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ViewDescription {
    /// View node id, or null.
    pub view_id: NodeId,

    /// Browse the view as of this time; min for current.
    pub timestamp: UaDateTime,

    /// Browse a specific view version; 0 for current.
    pub view_version: u32,
}

binary_encodable_impl!(ViewDescription: view_id, timestamp, view_version);

/// One node whose references are requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseDescription {
    /// The node to browse.
    pub node_id: NodeId,

    /// Direction to follow references.
    pub browse_direction: BrowseDirection,

    /// Reference type filter; null for all.
    pub reference_type_id: NodeId,

    /// Also follow subtypes of the reference type.
    pub include_subtypes: bool,

    /// Node class filter bit mask; 0 for all.
    pub node_class_mask: u32,

    /// Which reference fields to return.
    pub result_mask: u32,
}

impl BrowseDescription {
    /// Browses all forward hierarchical references of a node.
    pub fn hierarchical(node_id: NodeId) -> Self {
        Self {
            node_id,
            browse_direction: BrowseDirection::Forward,
            reference_type_id: NodeId::HIERARCHICAL_REFERENCES,
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BROWSE_RESULT_MASK_ALL,
        }
    }
}

binary_encodable_impl!(BrowseDescription:
    node_id,
    browse_direction,
    reference_type_id,
    include_subtypes,
    node_class_mask,
    result_mask,
);

/// A reference returned from a browse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDescription {
    /// Type of the reference.
    pub reference_type_id: NodeId,

    /// `true` when the reference is a forward reference.
    pub is_forward: bool,

    /// The target node.
    pub node_id: ExpandedNodeId,

    /// Browse name of the target.
    pub browse_name: QualifiedName,

    /// Display name of the target.
    pub display_name: LocalizedText,

    /// Class of the target node.
    pub node_class: NodeClass,

    /// Type definition of the target, for objects and variables.
    pub type_definition: ExpandedNodeId,
}

binary_encodable_impl!(ReferenceDescription:
    reference_type_id,
    is_forward,
    node_id,
    browse_name,
    display_name,
    node_class,
    type_definition,
);

/// References for one browsed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BrowseResult {
    /// Result for this node.
    pub status_code: StatusCode,

    /// Opaque resume token; null when the result is complete.
    pub continuation_point: ByteString,

    /// The references found.
    pub references: Option<Vec<ReferenceDescription>>,
}

binary_encodable_impl!(BrowseResult: status_code, continuation_point, references);

/// Browses the references of one or more nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The view to browse.
    pub view: ViewDescription,

    /// Per-node cap on returned references; 0 = no limit.
    pub requested_max_references_per_node: u32,

    /// The nodes to browse.
    pub nodes_to_browse: Option<Vec<BrowseDescription>>,
}

binary_encodable_impl!(BrowseRequest:
    request_header,
    view,
    requested_max_references_per_node,
    nodes_to_browse,
);

/// Results of a browse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BrowseResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One result per browsed node, in order.
    pub results: Option<Vec<BrowseResult>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(BrowseResponse: response_header, results, diagnostic_infos);

/// Continues or releases earlier browse results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseNextRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// Free the continuation points instead of resuming them.
    pub release_continuation_points: bool,

    /// Continuation points from previous results.
    pub continuation_points: Option<Vec<ByteString>>,
}

binary_encodable_impl!(BrowseNextRequest:
    request_header,
    release_continuation_points,
    continuation_points,
);

/// Results of a BrowseNext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BrowseNextResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One result per continuation point, in order.
    pub results: Option<Vec<BrowseResult>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(BrowseNextResponse: response_header, results, diagnostic_infos);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{BinaryEncodable, DecodingOptions};
    use crate::string::UaString;
    use std::io::Cursor;

    #[test]
    fn test_browse_request_round_trip() {
        let request = BrowseRequest {
            request_header: RequestHeader::default(),
            view: ViewDescription::default(),
            requested_max_references_per_node: 100,
            nodes_to_browse: Some(vec![BrowseDescription::hierarchical(NodeId::ROOT_FOLDER)]),
        };
        let buf = request.encode_to_vec().unwrap();
        let decoded =
            BrowseRequest::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn test_reference_description_round_trip() {
        let reference = ReferenceDescription {
            reference_type_id: NodeId::numeric(0, 35),
            is_forward: true,
            node_id: ExpandedNodeId::local(NodeId::OBJECTS_FOLDER),
            browse_name: QualifiedName::new(0, "Objects"),
            display_name: LocalizedText {
                locale: UaString::from("en"),
                text: UaString::from("Objects"),
            },
            node_class: NodeClass::Object,
            type_definition: ExpandedNodeId::local(NodeId::numeric(0, 61)),
        };
        let buf = reference.encode_to_vec().unwrap();
        let decoded =
            ReferenceDescription::decode(&mut Cursor::new(buf), &DecodingOptions::default())
                .unwrap();
        assert_eq!(reference, decoded);
    }
}
