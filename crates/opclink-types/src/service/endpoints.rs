// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! GetEndpoints and the endpoint/application description types.

use serde::{Deserialize, Serialize};

use crate::qualified_name::LocalizedText;
use crate::string::{ByteString, UaString};

use super::secure_channel::MessageSecurityMode;
use super::{RequestHeader, ResponseHeader};

ua_enum! {
    /// What kind of application an [`ApplicationDescription`] describes.
    ApplicationType {
        /// A server.
        Server = 0,
        /// A client.
        Client = 1,
        /// Both client and server.
        ClientAndServer = 2,
        /// A discovery server.
        DiscoveryServer = 3,
    }
}

ua_enum! {
    /// How a user proves identity to a server.
    UserTokenType {
        /// No credentials.
        Anonymous = 0,
        /// Username and password.
        UserName = 1,
        /// X.509 certificate.
        Certificate = 2,
        /// Token issued by an external authority.
        IssuedToken = 3,
    }
}

/// Identity of a client or server application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDescription {
    /// Globally unique application URI; must match the certificate SAN.
    pub application_uri: UaString,

    /// Product URI.
    pub product_uri: UaString,

    /// Display name.
    pub application_name: LocalizedText,

    /// Application kind.
    pub application_type: ApplicationType,

    /// URI of the gateway server, if routed.
    pub gateway_server_uri: UaString,

    /// Discovery profile URI.
    pub discovery_profile_uri: UaString,

    /// URLs where the application can be discovered.
    pub discovery_urls: Option<Vec<UaString>>,
}

impl ApplicationDescription {
    /// A client application description with the given URI and name.
    pub fn client(application_uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            application_uri: UaString::from(application_uri.into()),
            product_uri: UaString::null(),
            application_name: LocalizedText::new(name.into()),
            application_type: ApplicationType::Client,
            gateway_server_uri: UaString::null(),
            discovery_profile_uri: UaString::null(),
            discovery_urls: None,
        }
    }
}

binary_encodable_impl!(ApplicationDescription:
    application_uri,
    product_uri,
    application_name,
    application_type,
    gateway_server_uri,
    discovery_profile_uri,
    discovery_urls,
);

/// One way a user may authenticate against an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTokenPolicy {
    /// Server-assigned policy id, echoed in the identity token.
    pub policy_id: UaString,

    /// Kind of token this policy accepts.
    pub token_type: UserTokenType,

    /// Token type URI for issued tokens.
    pub issued_token_type: UaString,

    /// Issuer endpoint for issued tokens.
    pub issuer_endpoint_url: UaString,

    /// Security policy for encrypting the token; empty inherits the channel's.
    pub security_policy_uri: UaString,
}

binary_encodable_impl!(UserTokenPolicy:
    policy_id,
    token_type,
    issued_token_type,
    issuer_endpoint_url,
    security_policy_uri,
);

/// A server endpoint and the security it requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescription {
    /// The `opc.tcp://` URL of the endpoint.
    pub endpoint_url: UaString,

    /// The server behind the endpoint.
    pub server: ApplicationDescription,

    /// DER-encoded server certificate.
    pub server_certificate: ByteString,

    /// Required message security mode.
    pub security_mode: MessageSecurityMode,

    /// Required security policy URI.
    pub security_policy_uri: UaString,

    /// Accepted user token policies.
    pub user_identity_tokens: Option<Vec<UserTokenPolicy>>,

    /// Transport profile (binary TCP for this client).
    pub transport_profile_uri: UaString,

    /// Server-relative security ranking; higher is stronger.
    pub security_level: u8,
}

binary_encodable_impl!(EndpointDescription:
    endpoint_url,
    server,
    server_certificate,
    security_mode,
    security_policy_uri,
    user_identity_tokens,
    transport_profile_uri,
    security_level,
);

/// Asks a server which endpoints it offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetEndpointsRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The URL the client used to reach the server.
    pub endpoint_url: UaString,

    /// Preferred locales for localized strings.
    pub locale_ids: Option<Vec<UaString>>,

    /// Restrict results to these transport profiles.
    pub profile_uris: Option<Vec<UaString>>,
}

binary_encodable_impl!(GetEndpointsRequest:
    request_header,
    endpoint_url,
    locale_ids,
    profile_uris,
);

/// The server's endpoint list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GetEndpointsResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// Offered endpoints.
    pub endpoints: Option<Vec<EndpointDescription>>,
}

binary_encodable_impl!(GetEndpointsResponse: response_header, endpoints);
