// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Cryptographic primitives for channel security.
//!
//! Thin free functions over the RustCrypto crates: the P_SHA pseudo-random
//! function for key derivation, HMAC signatures, AES-CBC for symmetric
//! message protection, and RSA for the asymmetric OpenSecureChannel path.
//! All failures map to `BadSecurityChecksFailed` so callers cannot leak
//! which check failed.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockModeDecrypt, BlockModeEncrypt, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use opclink_types::StatusCode;

use crate::error::{ChannelError, ChannelResult};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-CBC block size; also the IV length.
pub const AES_BLOCK_SIZE: usize = 16;

fn security_failed<E>(_: E) -> ChannelError {
    ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED)
}

// =============================================================================
// Randomness
// =============================================================================

/// Fresh random bytes from the OS generator.
pub fn random_nonce(length: usize) -> Vec<u8> {
    let mut nonce = vec![0u8; length];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// =============================================================================
// P_SHA key derivation (OPC UA Part 6, 6.7.5)
// =============================================================================

macro_rules! p_hash {
    ($fn_name:ident, $digest:ty, $hash_len:expr) => {
        /// The TLS-style P_HASH expansion over the given digest.
        pub fn $fn_name(secret: &[u8], seed: &[u8], length: usize) -> ChannelResult<Vec<u8>> {
            let mut output = Vec::with_capacity(length + $hash_len);
            // A(0) = seed; A(i) = HMAC(secret, A(i-1))
            let mut a: Vec<u8> = seed.to_vec();
            while output.len() < length {
                let mut mac =
                    Hmac::<$digest>::new_from_slice(secret).map_err(security_failed)?;
                mac.update(&a);
                a = mac.finalize().into_bytes().to_vec();

                let mut mac =
                    Hmac::<$digest>::new_from_slice(secret).map_err(security_failed)?;
                mac.update(&a);
                mac.update(seed);
                output.extend_from_slice(&mac.finalize().into_bytes());
            }
            output.truncate(length);
            Ok(output)
        }
    };
}

p_hash!(p_sha1, Sha1, 20);
p_hash!(p_sha256, Sha256, 32);

// =============================================================================
// Symmetric signatures
// =============================================================================

/// HMAC-SHA1 over `data`.
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> ChannelResult<Vec<u8>> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(security_failed)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC-SHA256 over `data`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> ChannelResult<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(security_failed)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time HMAC-SHA1 verification.
pub fn verify_hmac_sha1(key: &[u8], data: &[u8], signature: &[u8]) -> ChannelResult<()> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(security_failed)?;
    mac.update(data);
    mac.verify_slice(signature).map_err(security_failed)
}

/// Constant-time HMAC-SHA256 verification.
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], signature: &[u8]) -> ChannelResult<()> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(security_failed)?;
    mac.update(data);
    mac.verify_slice(signature).map_err(security_failed)
}

// =============================================================================
// Symmetric encryption
// =============================================================================

/// AES-CBC encrypts `buffer` in place; length must be block-aligned.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], buffer: &mut [u8]) -> ChannelResult<()> {
    if buffer.len() % AES_BLOCK_SIZE != 0 {
        return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
    }
    let len = buffer.len();
    match key.len() {
        16 => {
            let cipher = Aes128CbcEnc::new_from_slices(key, iv).map_err(security_failed)?;
            cipher
                .encrypt_padded::<NoPadding>(buffer, len)
                .map_err(security_failed)?;
        }
        32 => {
            let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(security_failed)?;
            cipher
                .encrypt_padded::<NoPadding>(buffer, len)
                .map_err(security_failed)?;
        }
        _ => return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED)),
    }
    Ok(())
}

/// AES-CBC decrypts `buffer` in place; length must be block-aligned.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], buffer: &mut [u8]) -> ChannelResult<()> {
    if buffer.len() % AES_BLOCK_SIZE != 0 {
        return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
    }
    match key.len() {
        16 => {
            let cipher = Aes128CbcDec::new_from_slices(key, iv).map_err(security_failed)?;
            cipher
                .decrypt_padded::<NoPadding>(buffer)
                .map_err(security_failed)?;
        }
        32 => {
            let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(security_failed)?;
            cipher
                .decrypt_padded::<NoPadding>(buffer)
                .map_err(security_failed)?;
        }
        _ => return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED)),
    }
    Ok(())
}

// =============================================================================
// RSA
// =============================================================================

/// RSA padding scheme for channel encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaScheme {
    /// PKCS#1 v1.5.
    Pkcs1v15,
    /// OAEP with SHA-1 (the scheme the classic policies use).
    OaepSha1,
}

impl RsaScheme {
    /// Plaintext bytes that fit one block for a key of `key_size` bytes.
    pub const fn plain_block_size(&self, key_size: usize) -> usize {
        match self {
            Self::Pkcs1v15 => key_size - 11,
            Self::OaepSha1 => key_size - 42,
        }
    }
}

/// Encrypts `data` block-wise with the receiver's public key.
pub fn rsa_encrypt(
    public: &RsaPublicKey,
    scheme: RsaScheme,
    data: &[u8],
) -> ChannelResult<Vec<u8>> {
    let key_size = public.size();
    let plain_block = scheme.plain_block_size(key_size);
    let mut rng = rand::rngs::OsRng;
    let mut out = Vec::with_capacity(data.len().div_ceil(plain_block) * key_size);
    for block in data.chunks(plain_block) {
        let encrypted = match scheme {
            RsaScheme::Pkcs1v15 => public.encrypt(&mut rng, Pkcs1v15Encrypt, block),
            RsaScheme::OaepSha1 => public.encrypt(&mut rng, Oaep::new::<Sha1>(), block),
        }
        .map_err(security_failed)?;
        out.extend_from_slice(&encrypted);
    }
    Ok(out)
}

/// Decrypts block-wise with our private key.
pub fn rsa_decrypt(
    private: &RsaPrivateKey,
    scheme: RsaScheme,
    data: &[u8],
) -> ChannelResult<Vec<u8>> {
    let key_size = private.size();
    if data.is_empty() || data.len() % key_size != 0 {
        return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
    }
    let mut out = Vec::with_capacity(data.len());
    for block in data.chunks(key_size) {
        let decrypted = match scheme {
            RsaScheme::Pkcs1v15 => private.decrypt(Pkcs1v15Encrypt, block),
            RsaScheme::OaepSha1 => private.decrypt(Oaep::new::<Sha1>(), block),
        }
        .map_err(security_failed)?;
        out.extend_from_slice(&decrypted);
    }
    Ok(out)
}

/// RSA digest used for asymmetric signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaHash {
    /// PKCS#1 v1.5 with SHA-1.
    Sha1,
    /// PKCS#1 v1.5 with SHA-256.
    Sha256,
}

/// Signs `data` with our private key.
pub fn rsa_sign(private: &RsaPrivateKey, hash: RsaHash, data: &[u8]) -> ChannelResult<Vec<u8>> {
    use rsa::signature::{SignatureEncoding, Signer};
    let signature = match hash {
        RsaHash::Sha1 => {
            let key = rsa::pkcs1v15::SigningKey::<Sha1>::new(private.clone());
            key.try_sign(data).map_err(security_failed)?.to_vec()
        }
        RsaHash::Sha256 => {
            let key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private.clone());
            key.try_sign(data).map_err(security_failed)?.to_vec()
        }
    };
    Ok(signature)
}

/// Verifies a signature against the peer's public key.
pub fn rsa_verify(
    public: &RsaPublicKey,
    hash: RsaHash,
    data: &[u8],
    signature: &[u8],
) -> ChannelResult<()> {
    use rsa::signature::Verifier;
    let signature =
        rsa::pkcs1v15::Signature::try_from(signature).map_err(security_failed)?;
    match hash {
        RsaHash::Sha1 => {
            let key = rsa::pkcs1v15::VerifyingKey::<Sha1>::new(public.clone());
            key.verify(data, &signature).map_err(security_failed)
        }
        RsaHash::Sha256 => {
            let key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public.clone());
            key.verify(data, &signature).map_err(security_failed)
        }
    }
}

/// SHA-1 digest, used for certificate thumbprints.
pub fn sha1_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p_sha_is_deterministic_and_sized() {
        let a = p_sha256(b"secret", b"seed", 80).unwrap();
        let b = p_sha256(b"secret", b"seed", 80).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 80);

        let c = p_sha1(b"secret", b"seed", 52).unwrap();
        assert_eq!(c.len(), 52);
        // Different PRFs must disagree.
        assert_ne!(&a[..20], &c[..20]);
    }

    #[test]
    fn test_p_sha_sensitivity() {
        let a = p_sha256(b"secret", b"seed", 32).unwrap();
        let b = p_sha256(b"secret", b"feed", 32).unwrap();
        let c = p_sha256(b"secret!", b"seed", 32).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hmac_round_trip() {
        let key = b"0123456789abcdef";
        let signature = hmac_sha256(key, b"payload").unwrap();
        assert_eq!(signature.len(), 32);
        verify_hmac_sha256(key, b"payload", &signature).unwrap();
        assert!(verify_hmac_sha256(key, b"tampered", &signature).is_err());
    }

    #[test]
    fn test_aes_cbc_round_trip() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let plain = [0x42u8; 64];
        let mut buffer = plain;
        aes_cbc_encrypt(&key, &iv, &mut buffer).unwrap();
        assert_ne!(buffer, plain);
        aes_cbc_decrypt(&key, &iv, &mut buffer).unwrap();
        assert_eq!(buffer, plain);
    }

    #[test]
    fn test_aes_rejects_unaligned() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let mut buffer = [0u8; 30];
        assert!(aes_cbc_encrypt(&key, &iv, &mut buffer).is_err());
    }

    #[test]
    fn test_rsa_encrypt_sign_round_trip() {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);

        // Multi-block encryption.
        let secret = random_nonce(400);
        let encrypted = rsa_encrypt(&public, RsaScheme::OaepSha1, &secret).unwrap();
        assert_eq!(encrypted.len() % public.size(), 0);
        let decrypted = rsa_decrypt(&private, RsaScheme::OaepSha1, &encrypted).unwrap();
        assert_eq!(decrypted, secret);

        // Signature.
        let signature = rsa_sign(&private, RsaHash::Sha256, b"chunk bytes").unwrap();
        rsa_verify(&public, RsaHash::Sha256, b"chunk bytes", &signature).unwrap();
        assert!(rsa_verify(&public, RsaHash::Sha256, b"other bytes", &signature).is_err());
    }
}
