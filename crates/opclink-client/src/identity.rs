// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! User identities and the token encryption ActivateSession requires.
//!
//! Passwords are never sent in the clear over a secured channel: the token
//! carries the "legacy secret" layout (length-prefixed secret plus server
//! nonce) encrypted with the server certificate under the negotiated policy.

use async_trait::async_trait;
use rsa::RsaPrivateKey;

use opclink_channel::{crypto, SecurityPolicy, X509Certificate};
use opclink_types::service::{
    object_id, AnonymousIdentityToken, EndpointDescription, SignatureData, UserNameIdentityToken,
    UserTokenPolicy, UserTokenType, X509IdentityToken,
};
use opclink_types::{ByteString, ExtensionObject, NodeId, StatusCode, UaString};

use crate::error::{ClientError, ClientResult};

// =============================================================================
// UserIdentity
// =============================================================================

/// How the session authenticates its user.
#[derive(Clone, Default)]
pub enum UserIdentity {
    /// No credentials.
    #[default]
    Anonymous,

    /// Username and password (plaintext inputs; encryption happens here).
    UserName {
        /// The user name.
        username: String,
        /// The password.
        password: String,
    },

    /// X.509 user certificate with its private key.
    X509 {
        /// DER-encoded user certificate.
        certificate_der: Vec<u8>,
        /// Matching private key.
        private_key: RsaPrivateKey,
    },
}

impl std::fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => write!(f, "UserName({})", username),
            Self::X509 { .. } => write!(f, "X509"),
        }
    }
}

impl UserIdentity {
    fn token_type(&self) -> UserTokenType {
        match self {
            Self::Anonymous => UserTokenType::Anonymous,
            Self::UserName { .. } => UserTokenType::UserName,
            Self::X509 { .. } => UserTokenType::Certificate,
        }
    }
}

/// Supplies the user identity when a session is (re)activated.
///
/// The provider is consulted on every activation, so rotated credentials are
/// picked up across reconnects.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The identity to use against the given endpoint.
    async fn identity(&self, endpoint: &EndpointDescription) -> ClientResult<UserIdentity>;
}

/// A provider returning a fixed identity.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub UserIdentity);

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn identity(&self, _endpoint: &EndpointDescription) -> ClientResult<UserIdentity> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Token construction
// =============================================================================

/// Selects the endpoint's token policy for the given identity.
fn select_policy<'a>(
    endpoint: &'a EndpointDescription,
    token_type: UserTokenType,
) -> ClientResult<&'a UserTokenPolicy> {
    endpoint
        .user_identity_tokens
        .as_ref()
        .and_then(|policies| {
            policies
                .iter()
                .find(|policy| policy.token_type == token_type)
        })
        .ok_or(ClientError::IdentityRejected {
            status: StatusCode::BAD_IDENTITY_TOKEN_REJECTED,
        })
}

/// The security policy protecting the identity token: the token policy's own
/// URI when set, otherwise the channel's.
fn token_policy_uri(policy: &UserTokenPolicy, channel_policy: SecurityPolicy) -> SecurityPolicy {
    policy
        .security_policy_uri
        .value()
        .and_then(SecurityPolicy::from_uri)
        .unwrap_or(channel_policy)
}

/// Encrypts a secret in the OPC UA "legacy secret" layout: `i32` length of
/// (secret + nonce), then both, RSA-encrypted with the server certificate.
fn encrypt_secret(
    secret: &[u8],
    server_nonce: &[u8],
    server_certificate: &X509Certificate,
    policy: SecurityPolicy,
) -> ClientResult<Vec<u8>> {
    let scheme = policy.asymmetric_scheme().ok_or(ClientError::IdentityRejected {
        status: StatusCode::BAD_SECURITY_CHECKS_FAILED,
    })?;
    let public_key = server_certificate
        .public_key()
        .map_err(ClientError::Channel)?;

    let length = (secret.len() + server_nonce.len()) as u32;
    let mut plain = Vec::with_capacity(4 + length as usize);
    plain.extend_from_slice(&length.to_le_bytes());
    plain.extend_from_slice(secret);
    plain.extend_from_slice(server_nonce);

    crypto::rsa_encrypt(&public_key, scheme, &plain).map_err(ClientError::Channel)
}

/// The identity token and its signature for an ActivateSession request.
pub struct ActivationTokens {
    /// The identity token wrapped as an extension object.
    pub user_identity_token: ExtensionObject,

    /// Signature made with the identity's key (X.509 identities only).
    pub user_token_signature: SignatureData,
}

/// Builds the wire token for an identity against a specific endpoint.
pub fn build_activation_tokens(
    identity: &UserIdentity,
    endpoint: &EndpointDescription,
    server_certificate: Option<&X509Certificate>,
    server_nonce: &[u8],
    channel_policy: SecurityPolicy,
) -> ClientResult<ActivationTokens> {
    let policy = select_policy(endpoint, identity.token_type())?;

    match identity {
        UserIdentity::Anonymous => {
            let token = AnonymousIdentityToken {
                policy_id: policy.policy_id.clone(),
            };
            Ok(ActivationTokens {
                user_identity_token: wrap_token(object_id::ANONYMOUS_IDENTITY_TOKEN, &token)?,
                user_token_signature: SignatureData::null(),
            })
        }
        UserIdentity::UserName { username, password } => {
            let token_policy = token_policy_uri(policy, channel_policy);
            let (password, algorithm) = if token_policy == SecurityPolicy::None {
                // Only acceptable when the operator explicitly chose an
                // unsecured stack end to end.
                (
                    ByteString::from(password.as_bytes()),
                    UaString::null(),
                )
            } else {
                let certificate =
                    server_certificate.ok_or(ClientError::IdentityRejected {
                        status: StatusCode::BAD_CERTIFICATE_INVALID,
                    })?;
                let encrypted =
                    encrypt_secret(password.as_bytes(), server_nonce, certificate, token_policy)?;
                (
                    ByteString::from(encrypted),
                    UaString::from(token_policy.asymmetric_encryption_algorithm()),
                )
            };
            let token = UserNameIdentityToken {
                policy_id: policy.policy_id.clone(),
                user_name: UaString::from(username.as_str()),
                password,
                encryption_algorithm: algorithm,
            };
            Ok(ActivationTokens {
                user_identity_token: wrap_token(object_id::USER_NAME_IDENTITY_TOKEN, &token)?,
                user_token_signature: SignatureData::null(),
            })
        }
        UserIdentity::X509 {
            certificate_der,
            private_key,
        } => {
            let token = X509IdentityToken {
                policy_id: policy.policy_id.clone(),
                certificate_data: ByteString::from(certificate_der.as_slice()),
            };
            let token_policy = token_policy_uri(policy, channel_policy);
            let user_token_signature = match (server_certificate, token_policy) {
                (_, SecurityPolicy::None) | (None, _) => SignatureData::null(),
                (Some(certificate), policy) => {
                    let hash = policy.asymmetric_hash().ok_or(ClientError::IdentityRejected {
                        status: StatusCode::BAD_SECURITY_CHECKS_FAILED,
                    })?;
                    let mut signed = certificate.as_der().to_vec();
                    signed.extend_from_slice(server_nonce);
                    let signature = crypto::rsa_sign(private_key, hash, &signed)
                        .map_err(ClientError::Channel)?;
                    SignatureData {
                        algorithm: UaString::from(policy.asymmetric_signature_algorithm()),
                        signature: ByteString::from(signature),
                    }
                }
            };
            Ok(ActivationTokens {
                user_identity_token: wrap_token(object_id::X509_IDENTITY_TOKEN, &token)?,
                user_token_signature,
            })
        }
    }
}

fn wrap_token<T: opclink_types::BinaryEncodable>(
    type_id: u32,
    token: &T,
) -> ClientResult<ExtensionObject> {
    ExtensionObject::from_encodable(NodeId::numeric(0, type_id), token)
        .map_err(|status| ClientError::from(status))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use opclink_types::service::{ApplicationDescription, MessageSecurityMode};
    use opclink_types::DecodingOptions;

    fn endpoint_with_policies() -> EndpointDescription {
        EndpointDescription {
            endpoint_url: UaString::from("opc.tcp://localhost:4840"),
            server: ApplicationDescription::client("urn:test:server", "test"),
            server_certificate: ByteString::null(),
            security_mode: MessageSecurityMode::None,
            security_policy_uri: UaString::from(SecurityPolicy::None.uri()),
            user_identity_tokens: Some(vec![
                UserTokenPolicy {
                    policy_id: UaString::from("anonymous"),
                    token_type: UserTokenType::Anonymous,
                    issued_token_type: UaString::null(),
                    issuer_endpoint_url: UaString::null(),
                    security_policy_uri: UaString::null(),
                },
                UserTokenPolicy {
                    policy_id: UaString::from("username"),
                    token_type: UserTokenType::UserName,
                    issued_token_type: UaString::null(),
                    issuer_endpoint_url: UaString::null(),
                    security_policy_uri: UaString::null(),
                },
            ]),
            transport_profile_uri: UaString::null(),
            security_level: 0,
        }
    }

    #[test]
    fn test_anonymous_token_uses_policy_id() {
        let tokens = build_activation_tokens(
            &UserIdentity::Anonymous,
            &endpoint_with_policies(),
            None,
            &[],
            SecurityPolicy::None,
        )
        .unwrap();
        let token: AnonymousIdentityToken = tokens
            .user_identity_token
            .decode_inner(&DecodingOptions::default())
            .unwrap();
        assert_eq!(token.policy_id.as_ref(), "anonymous");
    }

    #[test]
    fn test_username_plaintext_on_none_policy() {
        let tokens = build_activation_tokens(
            &UserIdentity::UserName {
                username: "operator".into(),
                password: "secret".into(),
            },
            &endpoint_with_policies(),
            None,
            &[],
            SecurityPolicy::None,
        )
        .unwrap();
        let token: UserNameIdentityToken = tokens
            .user_identity_token
            .decode_inner(&DecodingOptions::default())
            .unwrap();
        assert_eq!(token.user_name.as_ref(), "operator");
        assert_eq!(token.password.as_ref(), b"secret");
        assert!(token.encryption_algorithm.is_null());
    }

    #[test]
    fn test_missing_policy_is_rejected() {
        let mut endpoint = endpoint_with_policies();
        endpoint.user_identity_tokens = Some(Vec::new());
        let result = build_activation_tokens(
            &UserIdentity::Anonymous,
            &endpoint,
            None,
            &[],
            SecurityPolicy::None,
        );
        assert!(matches!(result, Err(ClientError::IdentityRejected { .. })));
    }

    #[test]
    fn test_username_encrypted_under_secured_policy() {
        let identity = opclink_channel::SelfSignedGenerator::new("srv", "test")
            .generate()
            .unwrap();
        let mut endpoint = endpoint_with_policies();
        endpoint.security_policy_uri = UaString::from(SecurityPolicy::Basic256Sha256.uri());

        let tokens = build_activation_tokens(
            &UserIdentity::UserName {
                username: "operator".into(),
                password: "secret".into(),
            },
            &endpoint,
            Some(&identity.certificate),
            &[9u8; 32],
            SecurityPolicy::Basic256Sha256,
        )
        .unwrap();
        let token: UserNameIdentityToken = tokens
            .user_identity_token
            .decode_inner(&DecodingOptions::default())
            .unwrap();
        assert_eq!(
            token.encryption_algorithm.as_ref(),
            "http://www.w3.org/2001/04/xmlenc#rsa-oaep"
        );
        // 2048-bit key: one RSA block.
        assert_eq!(token.password.len(), 256);

        // The server can recover the secret with its private key.
        let decrypted = crypto::rsa_decrypt(
            &identity.private_key,
            crypto::RsaScheme::OaepSha1,
            token.password.as_ref(),
        )
        .unwrap();
        let length = u32::from_le_bytes(decrypted[..4].try_into().unwrap()) as usize;
        assert_eq!(length, "secret".len() + 32);
        assert_eq!(&decrypted[4..10], b"secret");
    }
}
