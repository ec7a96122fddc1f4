// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opclink-types
//!
//! OPC UA data model types and the binary codec used by the OPCLINK client.
//!
//! This crate provides:
//!
//! - **Built-in types**: `NodeId`, `StatusCode`, `Variant`, `DataValue`,
//!   `UaString`, `ByteString`, `Guid`, `UaDateTime`, `QualifiedName`,
//!   `LocalizedText`, `ExtensionObject`
//! - **Binary codec**: the [`BinaryEncodable`] trait plus stream helpers
//!   implementing the OPC UA binary encoding (little-endian, length-prefixed
//!   strings, compact NodeId forms, masked composites)
//! - **Service messages**: request/response structs for the session,
//!   attribute, view, method, and subscription service sets
//!
//! Everything on the wire is `Result`-based; decode failures surface as
//! [`StatusCode`] values such as `BadDecodingError` rather than panics.
//!
//! # Example
//!
//! ```
//! use opclink_types::{BinaryEncodable, DecodingOptions, NodeId, Variant};
//! use std::io::Cursor;
//!
//! let node: NodeId = "ns=2;s=Pump.Speed".parse().unwrap();
//! let mut buf = Vec::new();
//! node.encode(&mut buf).unwrap();
//!
//! let decoded = NodeId::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
//! assert_eq!(node, decoded);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod attribute;
pub mod data_value;
pub mod date_time;
pub mod diagnostic_info;
pub mod encoding;
pub mod extension_object;
pub mod guid;
pub mod node_id;
pub mod qualified_name;
pub mod service;
pub mod status;
pub mod string;
pub mod variant;

pub use attribute::AttributeId;
pub use data_value::DataValue;
pub use date_time::UaDateTime;
pub use diagnostic_info::DiagnosticInfo;
pub use encoding::{
    byte_len_array, read_array, write_array, BinaryEncodable, DecodingOptions, EncodingResult,
};
pub use extension_object::{ExtensionObject, ExtensionObjectBody};
pub use guid::Guid;
pub use node_id::{ExpandedNodeId, Identifier, NodeId};
pub use qualified_name::{LocalizedText, QualifiedName};
pub use status::StatusCode;
pub use string::{ByteString, UaString, XmlElement};
pub use variant::{Variant, VariantScalarTypeId};
