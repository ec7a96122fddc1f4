// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CreateSession / ActivateSession / CloseSession service messages and the
//! user identity tokens they carry.

use serde::{Deserialize, Serialize};

use crate::diagnostic_info::DiagnosticInfo;
use crate::extension_object::ExtensionObject;
use crate::node_id::NodeId;
use crate::status::StatusCode;
use crate::string::{ByteString, UaString};

use super::endpoints::{ApplicationDescription, EndpointDescription};
use super::{RequestHeader, ResponseHeader};

/// A signature and the URI of the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SignatureData {
    /// Algorithm URI, e.g. `http://www.w3.org/2001/04/xmldsig-more#rsa-sha256`.
    pub algorithm: UaString,

    /// The raw signature bytes.
    pub signature: ByteString,
}

impl SignatureData {
    /// An absent signature (both fields null).
    pub fn null() -> Self {
        Self::default()
    }
}

binary_encodable_impl!(SignatureData: algorithm, signature);

/// Deprecated software certificate slot; always empty on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SignedSoftwareCertificate {
    /// The certificate data.
    pub certificate_data: ByteString,

    /// Signature over the certificate.
    pub signature: ByteString,
}

binary_encodable_impl!(SignedSoftwareCertificate: certificate_data, signature);

// =============================================================================
// Identity tokens
// =============================================================================

/// Anonymous user identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnonymousIdentityToken {
    /// Policy id from the matching [`super::UserTokenPolicy`].
    pub policy_id: UaString,
}

binary_encodable_impl!(AnonymousIdentityToken: policy_id);

/// Username/password identity; the password is encrypted with the server
/// certificate and nonce before it goes on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserNameIdentityToken {
    /// Policy id from the matching [`super::UserTokenPolicy`].
    pub policy_id: UaString,

    /// The user name, in plaintext.
    pub user_name: UaString,

    /// Encrypted password (length-prefixed secret + server nonce).
    pub password: ByteString,

    /// URI of the encryption algorithm; null when sent in the clear.
    pub encryption_algorithm: UaString,
}

binary_encodable_impl!(UserNameIdentityToken:
    policy_id,
    user_name,
    password,
    encryption_algorithm,
);

/// X.509 certificate identity; proven with `user_token_signature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct X509IdentityToken {
    /// Policy id from the matching [`super::UserTokenPolicy`].
    pub policy_id: UaString,

    /// DER-encoded user certificate.
    pub certificate_data: ByteString,
}

binary_encodable_impl!(X509IdentityToken: policy_id, certificate_data);

// =============================================================================
// CreateSession
// =============================================================================

/// Creates a (not yet activated) session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Common request parameters; the authentication token is null here.
    pub request_header: RequestHeader,

    /// Who the client is.
    pub client_description: ApplicationDescription,

    /// Server URI when connecting through a gateway.
    pub server_uri: UaString,

    /// The URL the client used to reach the endpoint.
    pub endpoint_url: UaString,

    /// Human-readable session name for server diagnostics.
    pub session_name: UaString,

    /// At least 32 bytes of fresh randomness.
    pub client_nonce: ByteString,

    /// DER-encoded client certificate; ignored for security None.
    pub client_certificate: ByteString,

    /// Requested idle timeout in milliseconds.
    pub requested_session_timeout: f64,

    /// Largest response body the client accepts; 0 = unlimited.
    pub max_response_message_size: u32,
}

binary_encodable_impl!(CreateSessionRequest:
    request_header,
    client_description,
    server_uri,
    endpoint_url,
    session_name,
    client_nonce,
    client_certificate,
    requested_session_timeout,
    max_response_message_size,
);

/// Result of creating a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CreateSessionResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// Server-assigned session node id.
    pub session_id: NodeId,

    /// Token to present in every subsequent request header.
    pub authentication_token: NodeId,

    /// Granted idle timeout in milliseconds.
    pub revised_session_timeout: f64,

    /// Server nonce to use in ActivateSession proofs.
    pub server_nonce: ByteString,

    /// DER-encoded server certificate.
    pub server_certificate: ByteString,

    /// Endpoints, for cross-checking against discovery.
    pub server_endpoints: Option<Vec<EndpointDescription>>,

    /// Deprecated; empty.
    pub server_software_certificates: Option<Vec<SignedSoftwareCertificate>>,

    /// Server proof of possession over clientNonce + clientCertificate.
    pub server_signature: SignatureData,

    /// Largest request body the server accepts; 0 = unlimited.
    pub max_request_message_size: u32,
}

binary_encodable_impl!(CreateSessionResponse:
    response_header,
    session_id,
    authentication_token,
    revised_session_timeout,
    server_nonce,
    server_certificate,
    server_endpoints,
    server_software_certificates,
    server_signature,
    max_request_message_size,
);

// =============================================================================
// ActivateSession
// =============================================================================

/// Activates a session, binding a user identity to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivateSessionRequest {
    /// Common request parameters carrying the authentication token.
    pub request_header: RequestHeader,

    /// Client proof over serverCertificate + serverNonce.
    pub client_signature: SignatureData,

    /// Deprecated; empty.
    pub client_software_certificates: Option<Vec<SignedSoftwareCertificate>>,

    /// Preferred locales in priority order.
    pub locale_ids: Option<Vec<UaString>>,

    /// The identity token, wrapped as an extension object.
    pub user_identity_token: ExtensionObject,

    /// Signature with the identity token's key, for X.509 identities.
    pub user_token_signature: SignatureData,
}

binary_encodable_impl!(ActivateSessionRequest:
    request_header,
    client_signature,
    client_software_certificates,
    locale_ids,
    user_identity_token,
    user_token_signature,
);

/// Result of activating a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ActivateSessionResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// Fresh server nonce for the next activation or token encryption.
    pub server_nonce: ByteString,

    /// Per-software-certificate results; deprecated and empty.
    pub results: Option<Vec<StatusCode>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(ActivateSessionResponse:
    response_header,
    server_nonce,
    results,
    diagnostic_infos,
);

// =============================================================================
// CloseSession
// =============================================================================

/// Closes a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// Also delete the session's subscriptions server-side.
    pub delete_subscriptions: bool,
}

binary_encodable_impl!(CloseSessionRequest: request_header, delete_subscriptions);

/// Acknowledgement of a session close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CloseSessionResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,
}

binary_encodable_impl!(CloseSessionResponse: response_header);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{BinaryEncodable, DecodingOptions};
    use crate::service::object_id;
    use std::io::Cursor;

    #[test]
    fn test_create_session_round_trip() {
        let request = CreateSessionRequest {
            request_header: RequestHeader::new(NodeId::null(), 2, 10_000),
            client_description: ApplicationDescription::client("urn:host:opclink", "opclink"),
            server_uri: UaString::null(),
            endpoint_url: UaString::from("opc.tcp://localhost:4840"),
            session_name: UaString::from("opclink-session-1"),
            client_nonce: ByteString::from(vec![7u8; 32]),
            client_certificate: ByteString::null(),
            requested_session_timeout: 120_000.0,
            max_response_message_size: 0,
        };
        let buf = request.encode_to_vec().unwrap();
        assert_eq!(buf.len(), request.byte_len());
        let decoded =
            CreateSessionRequest::decode(&mut Cursor::new(buf), &DecodingOptions::default())
                .unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn test_identity_token_in_extension_object() {
        let token = UserNameIdentityToken {
            policy_id: UaString::from("username"),
            user_name: UaString::from("operator"),
            password: ByteString::from(b"secret".as_slice()),
            encryption_algorithm: UaString::null(),
        };
        let wrapped = ExtensionObject::from_encodable(
            NodeId::numeric(0, object_id::USER_NAME_IDENTITY_TOKEN),
            &token,
        )
        .unwrap();
        let unwrapped: UserNameIdentityToken =
            wrapped.decode_inner(&DecodingOptions::default()).unwrap();
        assert_eq!(token, unwrapped);
    }
}
