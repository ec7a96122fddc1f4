// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service request and response messages.
//!
//! Every message body travels inside an envelope of its binary-encoding node
//! id (ns=0, numeric) followed by the fields in the order fixed by OPC UA
//! Part 4. [`RequestMessage`] and [`ResponseMessage`] are the typed unions the
//! transport layer works with.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::diagnostic_info::DiagnosticInfo;
use crate::date_time::UaDateTime;
use crate::encoding::{
    byte_len_array, read_array, write_array, BinaryEncodable, DecodingOptions, EncodingResult,
};
use crate::extension_object::ExtensionObject;
use crate::node_id::NodeId;
use crate::status::StatusCode;
use crate::string::UaString;

// =============================================================================
// Codec helper macros
// =============================================================================

/// Implements `BinaryEncodable` for a struct as the flat sequence of its
/// fields, in declaration order.
macro_rules! binary_encodable_impl {
    ($ty:ty: $($field:ident),+ $(,)?) => {
        impl crate::encoding::BinaryEncodable for $ty {
            fn byte_len(&self) -> usize {
                0 $(+ crate::encoding::BinaryEncodable::byte_len(&self.$field))+
            }

            fn encode<S: std::io::Write>(
                &self,
                stream: &mut S,
            ) -> crate::encoding::EncodingResult<usize> {
                let mut sz = 0;
                $(sz += crate::encoding::BinaryEncodable::encode(&self.$field, stream)?;)+
                Ok(sz)
            }

            fn decode<S: std::io::Read>(
                stream: &mut S,
                options: &crate::encoding::DecodingOptions,
            ) -> crate::encoding::EncodingResult<Self> {
                $(let $field = crate::encoding::BinaryEncodable::decode(stream, options)?;)+
                Ok(Self { $($field),+ })
            }
        }
    };
}
pub(crate) use binary_encodable_impl;

/// Declares a wire enum encoded as `i32`.
macro_rules! ua_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[repr(i32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $name {
            /// Maps a raw wire value.
            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl crate::encoding::BinaryEncodable for $name {
            fn byte_len(&self) -> usize {
                4
            }

            fn encode<S: std::io::Write>(
                &self,
                stream: &mut S,
            ) -> crate::encoding::EncodingResult<usize> {
                crate::encoding::write_i32(stream, *self as i32)
            }

            fn decode<S: std::io::Read>(
                stream: &mut S,
                _options: &crate::encoding::DecodingOptions,
            ) -> crate::encoding::EncodingResult<Self> {
                let value = crate::encoding::read_i32(stream)?;
                Self::from_i32(value).ok_or(crate::status::StatusCode::BAD_DECODING_ERROR)
            }
        }
    };
}
pub(crate) use ua_enum;

impl<T: BinaryEncodable> BinaryEncodable for Option<Vec<T>> {
    fn byte_len(&self) -> usize {
        byte_len_array(self)
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_array(stream, self)
    }

    fn decode<S: Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        read_array(stream, options)
    }
}

// =============================================================================
// Submodules
// =============================================================================

pub mod attributes;
pub mod endpoints;
pub mod method;
pub mod secure_channel;
pub mod session;
pub mod subscription;
pub mod view;

pub use attributes::*;
pub use endpoints::*;
pub use method::*;
pub use secure_channel::*;
pub use session::*;
pub use subscription::*;
pub use view::*;

// =============================================================================
// Headers
// =============================================================================

/// Common parameters at the front of every service request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// The session authentication token, or null before activation.
    pub authentication_token: NodeId,

    /// Time the request was sent.
    pub timestamp: UaDateTime,

    /// Client-assigned handle echoed in the response.
    pub request_handle: u32,

    /// Bit mask selecting the diagnostics to return.
    pub return_diagnostics: u32,

    /// Audit log correlation entry.
    pub audit_entry_id: UaString,

    /// Hint in milliseconds after which the client no longer cares.
    pub timeout_hint: u32,

    /// Reserved for future extensions.
    pub additional_header: ExtensionObject,
}

impl RequestHeader {
    /// A header stamped with the current time.
    pub fn new(authentication_token: NodeId, request_handle: u32, timeout_hint: u32) -> Self {
        Self {
            authentication_token,
            timestamp: UaDateTime::now(),
            request_handle,
            return_diagnostics: 0,
            audit_entry_id: UaString::null(),
            timeout_hint,
            additional_header: ExtensionObject::null(),
        }
    }
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self::new(NodeId::null(), 0, 0)
    }
}

binary_encodable_impl!(RequestHeader:
    authentication_token,
    timestamp,
    request_handle,
    return_diagnostics,
    audit_entry_id,
    timeout_hint,
    additional_header,
);

/// Common parameters at the front of every service response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResponseHeader {
    /// Time the response was sent.
    pub timestamp: UaDateTime,

    /// Echo of the request handle.
    pub request_handle: u32,

    /// Overall service result.
    pub service_result: StatusCode,

    /// Service-level diagnostics.
    pub service_diagnostics: DiagnosticInfo,

    /// Strings referenced by diagnostic indexes.
    pub string_table: Option<Vec<UaString>>,

    /// Reserved for future extensions.
    pub additional_header: ExtensionObject,
}

binary_encodable_impl!(ResponseHeader:
    timestamp,
    request_handle,
    service_result,
    service_diagnostics,
    string_table,
    additional_header,
);

/// Body of a service-level failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceFault {
    /// The failing result and request correlation.
    pub response_header: ResponseHeader,
}

binary_encodable_impl!(ServiceFault: response_header);

// =============================================================================
// Message envelope
// =============================================================================

/// Numeric ids of the DefaultBinary encodings (ns=0).
pub mod object_id {
    #![allow(missing_docs)]
    pub const SERVICE_FAULT: u32 = 397;
    pub const GET_ENDPOINTS_REQUEST: u32 = 428;
    pub const GET_ENDPOINTS_RESPONSE: u32 = 431;
    pub const OPEN_SECURE_CHANNEL_REQUEST: u32 = 446;
    pub const OPEN_SECURE_CHANNEL_RESPONSE: u32 = 449;
    pub const CLOSE_SECURE_CHANNEL_REQUEST: u32 = 452;
    pub const CLOSE_SECURE_CHANNEL_RESPONSE: u32 = 455;
    pub const CREATE_SESSION_REQUEST: u32 = 461;
    pub const CREATE_SESSION_RESPONSE: u32 = 464;
    pub const ACTIVATE_SESSION_REQUEST: u32 = 467;
    pub const ACTIVATE_SESSION_RESPONSE: u32 = 470;
    pub const CLOSE_SESSION_REQUEST: u32 = 473;
    pub const CLOSE_SESSION_RESPONSE: u32 = 476;
    pub const BROWSE_REQUEST: u32 = 527;
    pub const BROWSE_RESPONSE: u32 = 530;
    pub const BROWSE_NEXT_REQUEST: u32 = 533;
    pub const BROWSE_NEXT_RESPONSE: u32 = 536;
    pub const READ_REQUEST: u32 = 631;
    pub const READ_RESPONSE: u32 = 634;
    pub const WRITE_REQUEST: u32 = 673;
    pub const WRITE_RESPONSE: u32 = 676;
    pub const CALL_REQUEST: u32 = 712;
    pub const CALL_RESPONSE: u32 = 715;
    pub const CREATE_MONITORED_ITEMS_REQUEST: u32 = 751;
    pub const CREATE_MONITORED_ITEMS_RESPONSE: u32 = 754;
    pub const MODIFY_MONITORED_ITEMS_REQUEST: u32 = 763;
    pub const MODIFY_MONITORED_ITEMS_RESPONSE: u32 = 766;
    pub const DELETE_MONITORED_ITEMS_REQUEST: u32 = 781;
    pub const DELETE_MONITORED_ITEMS_RESPONSE: u32 = 784;
    pub const CREATE_SUBSCRIPTION_REQUEST: u32 = 787;
    pub const CREATE_SUBSCRIPTION_RESPONSE: u32 = 790;
    pub const MODIFY_SUBSCRIPTION_REQUEST: u32 = 793;
    pub const MODIFY_SUBSCRIPTION_RESPONSE: u32 = 796;
    pub const SET_PUBLISHING_MODE_REQUEST: u32 = 799;
    pub const SET_PUBLISHING_MODE_RESPONSE: u32 = 802;
    pub const PUBLISH_REQUEST: u32 = 826;
    pub const PUBLISH_RESPONSE: u32 = 829;
    pub const REPUBLISH_REQUEST: u32 = 832;
    pub const REPUBLISH_RESPONSE: u32 = 835;
    pub const DELETE_SUBSCRIPTIONS_REQUEST: u32 = 847;
    pub const DELETE_SUBSCRIPTIONS_RESPONSE: u32 = 850;

    // NotificationData subtypes carried inside Publish responses.
    pub const DATA_CHANGE_NOTIFICATION: u32 = 811;
    pub const STATUS_CHANGE_NOTIFICATION: u32 = 820;
    pub const EVENT_NOTIFICATION_LIST: u32 = 916;

    // User identity token encodings.
    pub const ANONYMOUS_IDENTITY_TOKEN: u32 = 321;
    pub const USER_NAME_IDENTITY_TOKEN: u32 = 324;
    pub const X509_IDENTITY_TOKEN: u32 = 327;
}

fn encode_enveloped<S: Write, T: BinaryEncodable>(
    stream: &mut S,
    type_id: u32,
    body: &T,
) -> EncodingResult<usize> {
    let node_id = NodeId::numeric(0, type_id);
    let mut sz = node_id.encode(stream)?;
    sz += body.encode(stream)?;
    Ok(sz)
}

macro_rules! message_union {
    (
        $(#[$meta:meta])* $name:ident, $header:ident: $header_ty:ty {
            $($variant:ident($body:ty) = $id:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $name {
            $(
                #[doc = stringify!($variant)]
                $variant($body),
            )+
        }

        impl $name {
            /// The DefaultBinary encoding id of the contained message.
            pub fn type_id(&self) -> u32 {
                match self {
                    $(Self::$variant(_) => $id,)+
                }
            }

            /// Borrows the common header.
            pub fn $header(&self) -> &$header_ty {
                match self {
                    $(Self::$variant(body) => &body.$header,)+
                }
            }

            /// Mutably borrows the common header.
            pub fn header_mut(&mut self) -> &mut $header_ty {
                match self {
                    $(Self::$variant(body) => &mut body.$header,)+
                }
            }
        }

        $(
            impl From<$body> for $name {
                fn from(body: $body) -> Self {
                    Self::$variant(body)
                }
            }
        )+

        impl BinaryEncodable for $name {
            fn byte_len(&self) -> usize {
                // Envelope id always fits the four-byte NodeId form.
                4 + match self {
                    $(Self::$variant(body) => body.byte_len(),)+
                }
            }

            fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
                match self {
                    $(Self::$variant(body) => encode_enveloped(stream, $id, body),)+
                }
            }

            fn decode<S: Read>(
                stream: &mut S,
                options: &DecodingOptions,
            ) -> EncodingResult<Self> {
                let type_id = NodeId::decode(stream, options)?;
                let id = type_id
                    .as_numeric()
                    .ok_or(StatusCode::BAD_UNKNOWN_RESPONSE)?;
                $(
                    if id == $id {
                        return Ok(Self::$variant(BinaryEncodable::decode(stream, options)?));
                    }
                )+
                Err(StatusCode::BAD_UNKNOWN_RESPONSE)
            }
        }
    };
}

message_union! {
    /// Union of every request this client can send.
    RequestMessage, request_header: RequestHeader {
        OpenSecureChannel(OpenSecureChannelRequest) = object_id::OPEN_SECURE_CHANNEL_REQUEST,
        CloseSecureChannel(CloseSecureChannelRequest) = object_id::CLOSE_SECURE_CHANNEL_REQUEST,
        GetEndpoints(GetEndpointsRequest) = object_id::GET_ENDPOINTS_REQUEST,
        CreateSession(CreateSessionRequest) = object_id::CREATE_SESSION_REQUEST,
        ActivateSession(ActivateSessionRequest) = object_id::ACTIVATE_SESSION_REQUEST,
        CloseSession(CloseSessionRequest) = object_id::CLOSE_SESSION_REQUEST,
        Browse(BrowseRequest) = object_id::BROWSE_REQUEST,
        BrowseNext(BrowseNextRequest) = object_id::BROWSE_NEXT_REQUEST,
        Read(ReadRequest) = object_id::READ_REQUEST,
        Write(WriteRequest) = object_id::WRITE_REQUEST,
        Call(CallRequest) = object_id::CALL_REQUEST,
        CreateSubscription(CreateSubscriptionRequest) = object_id::CREATE_SUBSCRIPTION_REQUEST,
        ModifySubscription(ModifySubscriptionRequest) = object_id::MODIFY_SUBSCRIPTION_REQUEST,
        SetPublishingMode(SetPublishingModeRequest) = object_id::SET_PUBLISHING_MODE_REQUEST,
        DeleteSubscriptions(DeleteSubscriptionsRequest) = object_id::DELETE_SUBSCRIPTIONS_REQUEST,
        CreateMonitoredItems(CreateMonitoredItemsRequest) = object_id::CREATE_MONITORED_ITEMS_REQUEST,
        ModifyMonitoredItems(ModifyMonitoredItemsRequest) = object_id::MODIFY_MONITORED_ITEMS_REQUEST,
        DeleteMonitoredItems(DeleteMonitoredItemsRequest) = object_id::DELETE_MONITORED_ITEMS_REQUEST,
        Publish(PublishRequest) = object_id::PUBLISH_REQUEST,
        Republish(RepublishRequest) = object_id::REPUBLISH_REQUEST,
    }
}

message_union! {
    /// Union of every response this client understands.
    ResponseMessage, response_header: ResponseHeader {
        ServiceFault(ServiceFault) = object_id::SERVICE_FAULT,
        OpenSecureChannel(OpenSecureChannelResponse) = object_id::OPEN_SECURE_CHANNEL_RESPONSE,
        GetEndpoints(GetEndpointsResponse) = object_id::GET_ENDPOINTS_RESPONSE,
        CreateSession(CreateSessionResponse) = object_id::CREATE_SESSION_RESPONSE,
        ActivateSession(ActivateSessionResponse) = object_id::ACTIVATE_SESSION_RESPONSE,
        CloseSession(CloseSessionResponse) = object_id::CLOSE_SESSION_RESPONSE,
        Browse(BrowseResponse) = object_id::BROWSE_RESPONSE,
        BrowseNext(BrowseNextResponse) = object_id::BROWSE_NEXT_RESPONSE,
        Read(ReadResponse) = object_id::READ_RESPONSE,
        Write(WriteResponse) = object_id::WRITE_RESPONSE,
        Call(CallResponse) = object_id::CALL_RESPONSE,
        CreateSubscription(CreateSubscriptionResponse) = object_id::CREATE_SUBSCRIPTION_RESPONSE,
        ModifySubscription(ModifySubscriptionResponse) = object_id::MODIFY_SUBSCRIPTION_RESPONSE,
        SetPublishingMode(SetPublishingModeResponse) = object_id::SET_PUBLISHING_MODE_RESPONSE,
        DeleteSubscriptions(DeleteSubscriptionsResponse) = object_id::DELETE_SUBSCRIPTIONS_RESPONSE,
        CreateMonitoredItems(CreateMonitoredItemsResponse) = object_id::CREATE_MONITORED_ITEMS_RESPONSE,
        ModifyMonitoredItems(ModifyMonitoredItemsResponse) = object_id::MODIFY_MONITORED_ITEMS_RESPONSE,
        DeleteMonitoredItems(DeleteMonitoredItemsResponse) = object_id::DELETE_MONITORED_ITEMS_RESPONSE,
        Publish(PublishResponse) = object_id::PUBLISH_RESPONSE,
        Republish(RepublishResponse) = object_id::REPUBLISH_RESPONSE,
    }
}

impl ResponseMessage {
    /// The request handle this response answers.
    pub fn request_handle(&self) -> u32 {
        self.response_header().request_handle
    }

    /// The overall service result.
    pub fn service_result(&self) -> StatusCode {
        self.response_header().service_result
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_request_envelope_round_trip() {
        let request = RequestMessage::Read(ReadRequest {
            request_header: RequestHeader::new(NodeId::null(), 9, 5000),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Some(vec![ReadValueId::value_of(NodeId::numeric(0, 2258))]),
        });
        let buf = request.encode_to_vec().unwrap();
        // Envelope: four-byte node id form for ns=0 i=631.
        assert_eq!(buf[0], 0x01);
        let decoded =
            RequestMessage::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(request, decoded);
        assert_eq!(decoded.request_header().request_handle, 9);
    }

    #[test]
    fn test_service_fault_round_trip() {
        let fault = ResponseMessage::ServiceFault(ServiceFault {
            response_header: ResponseHeader {
                request_handle: 3,
                service_result: StatusCode::BAD_NODE_ID_UNKNOWN,
                ..Default::default()
            },
        });
        let buf = fault.encode_to_vec().unwrap();
        let decoded =
            ResponseMessage::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(decoded.request_handle(), 3);
        assert_eq!(decoded.service_result(), StatusCode::BAD_NODE_ID_UNKNOWN);
    }

    #[test]
    fn test_unknown_type_id_rejected() {
        let mut buf = Vec::new();
        NodeId::numeric(0, 60_000).encode(&mut buf).unwrap();
        assert_eq!(
            ResponseMessage::decode(&mut Cursor::new(buf), &DecodingOptions::default())
                .unwrap_err(),
            StatusCode::BAD_UNKNOWN_RESPONSE
        );
    }
}
