// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OpenSecureChannel / CloseSecureChannel service messages.

use serde::{Deserialize, Serialize};

use crate::date_time::UaDateTime;
use crate::string::ByteString;

use super::{RequestHeader, ResponseHeader};

ua_enum! {
    /// Whether an OpenSecureChannel issues a fresh token or renews one.
    SecurityTokenRequestType {
        /// Open a new channel.
        Issue = 0,
        /// Renew the token on an existing channel.
        Renew = 1,
    }
}

ua_enum! {
    /// Level of security applied to messages on a channel.
    MessageSecurityMode {
        /// Sentinel for an unset mode.
        Invalid = 0,
        /// Neither signed nor encrypted.
        None = 1,
        /// Signed but not encrypted.
        Sign = 2,
        /// Signed and encrypted.
        SignAndEncrypt = 3,
    }
}

impl Default for MessageSecurityMode {
    fn default() -> Self {
        MessageSecurityMode::None
    }
}

/// The security token issued for a channel generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChannelSecurityToken {
    /// Server-assigned channel id.
    pub channel_id: u32,

    /// Token id, unique within the channel.
    pub token_id: u32,

    /// Server time when the token was created.
    pub created_at: UaDateTime,

    /// Token lifetime in milliseconds.
    pub revised_lifetime: u32,
}

binary_encodable_impl!(ChannelSecurityToken: channel_id, token_id, created_at, revised_lifetime);

/// Opens or renews a secure channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSecureChannelRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// Protocol version; 0 for this revision.
    pub client_protocol_version: u32,

    /// Issue or renew.
    pub request_type: SecurityTokenRequestType,

    /// Requested message security mode.
    pub security_mode: MessageSecurityMode,

    /// Client nonce for key derivation; empty when security is None.
    pub client_nonce: ByteString,

    /// Requested token lifetime in milliseconds.
    pub requested_lifetime: u32,
}

binary_encodable_impl!(OpenSecureChannelRequest:
    request_header,
    client_protocol_version,
    request_type,
    security_mode,
    client_nonce,
    requested_lifetime,
);

/// Result of opening or renewing a secure channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OpenSecureChannelResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// Protocol version the server speaks.
    pub server_protocol_version: u32,

    /// The issued token.
    pub security_token: ChannelSecurityToken,

    /// Server nonce for key derivation.
    pub server_nonce: ByteString,
}

binary_encodable_impl!(OpenSecureChannelResponse:
    response_header,
    server_protocol_version,
    security_token,
    server_nonce,
);

/// Closes a secure channel; the server does not respond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CloseSecureChannelRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,
}

binary_encodable_impl!(CloseSecureChannelRequest: request_header);

/// Acknowledgement of a channel close (rarely seen on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CloseSecureChannelResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,
}

binary_encodable_impl!(CloseSecureChannelResponse: response_header);
