// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Security policies and symmetric key derivation.
//!
//! A [`SecurityPolicy`] names the algorithm suite a channel runs under and
//! knows every size the securing pipeline needs: nonce lengths, derived key
//! lengths, signature sizes, and the asymmetric schemes for the
//! OpenSecureChannel exchange.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use opclink_types::StatusCode;

use crate::crypto::{self, RsaHash, RsaScheme};
use crate::error::{ChannelError, ChannelResult};

// =============================================================================
// SecurityPolicy
// =============================================================================

/// The cryptographic algorithm suite of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    /// No security; messages travel in the clear.
    #[default]
    None,

    /// RSA-1_5 key transport, AES-128-CBC, SHA-1 (legacy systems).
    Basic128Rsa15,

    /// RSA-OAEP key transport, AES-256-CBC, SHA-1 (legacy systems).
    Basic256,

    /// RSA-OAEP key transport, AES-256-CBC, SHA-256 (recommended minimum).
    Basic256Sha256,
}

impl SecurityPolicy {
    /// The policy URI used on the wire.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic128Rsa15 => "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15",
            Self::Basic256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
        }
    }

    /// The short name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
        }
    }

    /// Maps a policy URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            s if s.ends_with("#None") => Some(Self::None),
            s if s.ends_with("#Basic128Rsa15") => Some(Self::Basic128Rsa15),
            s if s.ends_with("#Basic256") => Some(Self::Basic256),
            s if s.ends_with("#Basic256Sha256") => Some(Self::Basic256Sha256),
            _ => None,
        }
    }

    /// Returns `true` when certificates and key material are required.
    #[inline]
    pub const fn requires_certificates(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Channel nonce length in bytes.
    pub const fn nonce_length(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 => 16,
            Self::Basic256 | Self::Basic256Sha256 => 32,
        }
    }

    /// Derived symmetric signing key length in bytes.
    pub const fn signing_key_length(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 => 16,
            Self::Basic256 => 24,
            Self::Basic256Sha256 => 32,
        }
    }

    /// Derived symmetric encryption key length in bytes.
    pub const fn encryption_key_length(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 => 16,
            Self::Basic256 | Self::Basic256Sha256 => 32,
        }
    }

    /// Symmetric signature length in bytes.
    pub const fn symmetric_signature_length(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic128Rsa15 | Self::Basic256 => 20,
            Self::Basic256Sha256 => 32,
        }
    }

    /// AES-CBC initialization vector length.
    pub const fn iv_length(&self) -> usize {
        match self {
            Self::None => 0,
            _ => crypto::AES_BLOCK_SIZE,
        }
    }

    /// RSA scheme for channel/body encryption.
    pub fn asymmetric_scheme(&self) -> Option<RsaScheme> {
        match self {
            Self::None => None,
            Self::Basic128Rsa15 => Some(RsaScheme::Pkcs1v15),
            Self::Basic256 | Self::Basic256Sha256 => Some(RsaScheme::OaepSha1),
        }
    }

    /// Digest for asymmetric signatures.
    pub fn asymmetric_hash(&self) -> Option<RsaHash> {
        match self {
            Self::None => None,
            Self::Basic128Rsa15 | Self::Basic256 => Some(RsaHash::Sha1),
            Self::Basic256Sha256 => Some(RsaHash::Sha256),
        }
    }

    /// URI of the asymmetric signature algorithm, for `SignatureData`.
    pub const fn asymmetric_signature_algorithm(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Basic128Rsa15 | Self::Basic256 => {
                "http://www.w3.org/2000/09/xmldsig#rsa-sha1"
            }
            Self::Basic256Sha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        }
    }

    /// URI of the token/password encryption algorithm.
    pub const fn asymmetric_encryption_algorithm(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Basic128Rsa15 => "http://www.w3.org/2001/04/xmlenc#rsa-1_5",
            Self::Basic256 | Self::Basic256Sha256 => "http://www.w3.org/2001/04/xmlenc#rsa-oaep",
        }
    }

    /// Symmetric signature over `data`.
    pub fn symmetric_sign(&self, key: &[u8], data: &[u8]) -> ChannelResult<Vec<u8>> {
        match self {
            Self::None => Ok(Vec::new()),
            Self::Basic128Rsa15 | Self::Basic256 => crypto::hmac_sha1(key, data),
            Self::Basic256Sha256 => crypto::hmac_sha256(key, data),
        }
    }

    /// Verifies a symmetric signature over `data`.
    pub fn symmetric_verify(&self, key: &[u8], data: &[u8], signature: &[u8]) -> ChannelResult<()> {
        match self {
            Self::None => Ok(()),
            Self::Basic128Rsa15 | Self::Basic256 => {
                crypto::verify_hmac_sha1(key, data, signature)
            }
            Self::Basic256Sha256 => crypto::verify_hmac_sha256(key, data, signature),
        }
    }

    /// The PRF of this policy.
    fn prf(&self, secret: &[u8], seed: &[u8], length: usize) -> ChannelResult<Vec<u8>> {
        match self {
            Self::None => Ok(Vec::new()),
            Self::Basic128Rsa15 | Self::Basic256 => crypto::p_sha1(secret, seed, length),
            Self::Basic256Sha256 => crypto::p_sha256(secret, seed, length),
        }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SecurityPolicy {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(policy) = Self::from_uri(s) {
            return Ok(policy);
        }
        match s.to_lowercase().replace(['-', '_'], "").as_str() {
            "none" => Ok(Self::None),
            "basic128rsa15" | "basic128" => Ok(Self::Basic128Rsa15),
            "basic256" => Ok(Self::Basic256),
            "basic256sha256" => Ok(Self::Basic256Sha256),
            _ => Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED)),
        }
    }
}

// =============================================================================
// Derived keys
// =============================================================================

/// The symmetric key material for one direction of a channel generation.
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    /// HMAC signing key.
    pub signing_key: Vec<u8>,

    /// AES encryption key.
    pub encryption_key: Vec<u8>,

    /// AES-CBC initialization vector.
    pub iv: Vec<u8>,
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("signing_key", &"[redacted]")
            .field("encryption_key", &"[redacted]")
            .field("iv", &"[redacted]")
            .finish()
    }
}

impl DerivedKeys {
    /// Empty key set for policy None.
    pub fn none() -> Self {
        Self {
            signing_key: Vec::new(),
            encryption_key: Vec::new(),
            iv: Vec::new(),
        }
    }

    /// Derives one direction's keys per OPC UA Part 6: the PRF output is
    /// split into signing key, encryption key, and IV.
    ///
    /// Client-side keys use `(secret = server nonce, seed = client nonce)`;
    /// server-side keys swap the two.
    pub fn derive(
        policy: SecurityPolicy,
        secret: &[u8],
        seed: &[u8],
    ) -> ChannelResult<Self> {
        if policy == SecurityPolicy::None {
            return Ok(Self::none());
        }
        let sig_len = policy.signing_key_length();
        let enc_len = policy.encryption_key_length();
        let iv_len = policy.iv_length();
        let raw = policy.prf(secret, seed, sig_len + enc_len + iv_len)?;
        Ok(Self {
            signing_key: raw[..sig_len].to_vec(),
            encryption_key: raw[sig_len..sig_len + enc_len].to_vec(),
            iv: raw[sig_len + enc_len..].to_vec(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_round_trip() {
        for policy in [
            SecurityPolicy::None,
            SecurityPolicy::Basic128Rsa15,
            SecurityPolicy::Basic256,
            SecurityPolicy::Basic256Sha256,
        ] {
            assert_eq!(SecurityPolicy::from_uri(policy.uri()), Some(policy));
            assert_eq!(policy.name().parse::<SecurityPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_key_lengths() {
        let policy = SecurityPolicy::Basic256Sha256;
        let keys = DerivedKeys::derive(policy, &[1u8; 32], &[2u8; 32]).unwrap();
        assert_eq!(keys.signing_key.len(), 32);
        assert_eq!(keys.encryption_key.len(), 32);
        assert_eq!(keys.iv.len(), 16);
    }

    #[test]
    fn test_directional_keys_differ() {
        let policy = SecurityPolicy::Basic256Sha256;
        let client = DerivedKeys::derive(policy, &[1u8; 32], &[2u8; 32]).unwrap();
        let server = DerivedKeys::derive(policy, &[2u8; 32], &[1u8; 32]).unwrap();
        assert_ne!(client.signing_key, server.signing_key);
        assert_ne!(client.encryption_key, server.encryption_key);
    }

    #[test]
    fn test_none_policy_has_no_keys() {
        let keys = DerivedKeys::derive(SecurityPolicy::None, &[], &[]).unwrap();
        assert!(keys.signing_key.is_empty());
        assert_eq!(SecurityPolicy::None.symmetric_signature_length(), 0);
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let policy = SecurityPolicy::Basic256Sha256;
        let key = [5u8; 32];
        let signature = policy.symmetric_sign(&key, b"frame").unwrap();
        assert_eq!(signature.len(), policy.symmetric_signature_length());
        policy.symmetric_verify(&key, b"frame", &signature).unwrap();
        assert!(policy.symmetric_verify(&key, b"tamper", &signature).is_err());
    }
}
