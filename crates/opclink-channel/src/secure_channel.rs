// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The secure channel securing engine.
//!
//! [`SecureChannel`] owns the security state of one channel generation:
//! nonces, derived keys, token ids, and the sequence/request counters. It
//! turns message bodies into protected chunk frames and protected frames back
//! into chunk payloads. It performs no I/O; the transport drives it from its
//! reader and writer tasks.

use std::io::Cursor;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use opclink_types::service::{
    ChannelSecurityToken, MessageSecurityMode, OpenSecureChannelResponse,
};
use opclink_types::{ByteString, DecodingOptions, StatusCode, UaString};

use crate::certificate::{OwnIdentity, X509Certificate};
use crate::crypto;
use crate::error::{ChannelError, ChannelResult};
use crate::framing::{
    AsymmetricSecurityHeader, ChunkType, Chunker, MessageChunkHeader, MessageType, SequenceHeader,
    TransportLimits, MESSAGE_HEADER_SIZE, SECURED_HEADER_SIZE, SEQUENCE_HEADER_SIZE,
    SEQUENCE_WRAP_LIMIT,
};
use crate::security::{DerivedKeys, SecurityPolicy};

/// Renew the token after this fraction of its lifetime.
const TOKEN_RENEWAL_FRACTION: f64 = 0.75;

// =============================================================================
// ChannelState
// =============================================================================

/// Lifecycle state of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No connection.
    #[default]
    Closed,

    /// TCP connected, `HEL`/`ACK` in progress.
    Hello,

    /// OpenSecureChannel in flight.
    Opening,

    /// Channel open and usable.
    Open,

    /// Token renewal in flight; traffic continues.
    Renewing,

    /// Channel faulted; awaiting supervisor teardown.
    Faulted,
}

impl ChannelState {
    /// Returns `true` when service traffic may flow.
    #[inline]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Open | Self::Renewing)
    }
}

// =============================================================================
// Decoded chunk
// =============================================================================

/// One verified, decrypted inbound chunk.
#[derive(Debug)]
pub struct DecodedChunk {
    /// The frame's message type.
    pub message_type: MessageType,

    /// Position within its message.
    pub chunk_type: ChunkType,

    /// Request correlation id.
    pub request_id: u32,

    /// The chunk's share of the message body.
    pub payload: Vec<u8>,
}

// =============================================================================
// SecureChannel
// =============================================================================

/// Security and sequencing state for one channel.
pub struct SecureChannel {
    policy: SecurityPolicy,
    mode: MessageSecurityMode,
    state: ChannelState,
    limits: TransportLimits,

    own_identity: Option<OwnIdentity>,
    remote_certificate: Option<X509Certificate>,

    channel_id: u32,
    token_id: u32,
    token_created: Instant,
    token_lifetime: Duration,

    local_nonce: Vec<u8>,
    remote_nonce: Vec<u8>,

    /// Keys for protecting what we send.
    local_keys: DerivedKeys,
    /// Keys for checking what we receive.
    remote_keys: DerivedKeys,
    /// Old-token inbound keys kept until the first message under the new one.
    previous_token: Option<(u32, DerivedKeys)>,

    send_sequence: u32,
    receive_sequence: Option<u32>,
    next_request_id: u32,

    decoding_options: DecodingOptions,
}

impl SecureChannel {
    /// Creates a closed channel for the given suite.
    pub fn new(policy: SecurityPolicy, mode: MessageSecurityMode) -> Self {
        Self {
            policy,
            mode,
            state: ChannelState::Closed,
            limits: TransportLimits::default(),
            own_identity: None,
            remote_certificate: None,
            channel_id: 0,
            token_id: 0,
            token_created: Instant::now(),
            token_lifetime: Duration::from_secs(60),
            local_nonce: Vec::new(),
            remote_nonce: Vec::new(),
            local_keys: DerivedKeys::none(),
            remote_keys: DerivedKeys::none(),
            previous_token: None,
            send_sequence: 0,
            receive_sequence: None,
            next_request_id: 0,
            decoding_options: DecodingOptions::default(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Transitions the lifecycle state.
    pub fn set_state(&mut self, state: ChannelState) {
        trace!(from = ?self.state, to = ?state, "secure channel state change");
        self.state = state;
    }

    /// The security policy in force.
    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    /// The message security mode in force.
    pub fn mode(&self) -> MessageSecurityMode {
        self.mode
    }

    /// Server-assigned channel id; 0 before the first open.
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// The negotiated size budget.
    pub fn limits(&self) -> TransportLimits {
        self.limits
    }

    /// Installs the negotiated size budget after `HEL`/`ACK`.
    pub fn set_limits(&mut self, limits: TransportLimits) {
        self.limits = limits;
        self.decoding_options.max_message_size = limits.max_message_size;
        self.decoding_options.max_chunk_count = limits.max_chunk_count;
    }

    /// The decoding limits for message bodies.
    pub fn decoding_options(&self) -> &DecodingOptions {
        &self.decoding_options
    }

    /// Installs our identity (certificate + key).
    pub fn set_own_identity(&mut self, identity: Option<OwnIdentity>) {
        self.own_identity = identity;
    }

    /// Installs the peer certificate (from endpoint discovery or OPN).
    pub fn set_remote_certificate(&mut self, certificate: Option<X509Certificate>) {
        self.remote_certificate = certificate;
    }

    /// The peer certificate, if known.
    pub fn remote_certificate(&self) -> Option<&X509Certificate> {
        self.remote_certificate.as_ref()
    }

    /// The server nonce of the current generation.
    pub fn remote_nonce(&self) -> &[u8] {
        &self.remote_nonce
    }

    // -------------------------------------------------------------------------
    // Ids and sequences
    // -------------------------------------------------------------------------

    /// Allocates the next request id (unique per connection).
    pub fn next_request_id(&mut self) -> u32 {
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        self.next_request_id
    }

    fn next_sequence_number(&mut self) -> u32 {
        self.send_sequence = if self.send_sequence >= SEQUENCE_WRAP_LIMIT {
            1
        } else {
            self.send_sequence + 1
        };
        self.send_sequence
    }

    fn verify_receive_sequence(&mut self, sequence_number: u32) -> ChannelResult<()> {
        if let Some(last) = self.receive_sequence {
            let wrapped = last >= SEQUENCE_WRAP_LIMIT && sequence_number < 1024;
            if sequence_number <= last && !wrapped {
                return Err(ChannelError::Protocol(StatusCode::BAD_SEQUENCE_NUMBER_INVALID));
            }
        }
        self.receive_sequence = Some(sequence_number);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Token lifecycle
    // -------------------------------------------------------------------------

    /// A fresh client nonce for the next OpenSecureChannel.
    pub fn create_local_nonce(&mut self) -> ByteString {
        if self.policy == SecurityPolicy::None {
            self.local_nonce.clear();
            return ByteString::null();
        }
        self.local_nonce = crypto::random_nonce(self.policy.nonce_length());
        ByteString::from(self.local_nonce.as_slice())
    }

    /// Applies an OpenSecureChannel response: adopts the token, derives the
    /// new key sets, and keeps the previous inbound keys alive until the
    /// first message arrives under the new token.
    pub fn apply_open_response(
        &mut self,
        response: &OpenSecureChannelResponse,
    ) -> ChannelResult<()> {
        let token: &ChannelSecurityToken = &response.security_token;
        if self.channel_id != 0 && token.channel_id != self.channel_id {
            return Err(ChannelError::Protocol(StatusCode::BAD_SECURE_CHANNEL_ID_INVALID));
        }

        let server_nonce = response.server_nonce.as_ref();
        if self.policy != SecurityPolicy::None
            && server_nonce.len() < self.policy.nonce_length()
        {
            return Err(ChannelError::Security(StatusCode::BAD_NONCE_INVALID));
        }

        if self.token_id != 0 {
            self.previous_token = Some((self.token_id, self.remote_keys.clone()));
        }

        self.channel_id = token.channel_id;
        self.token_id = token.token_id;
        self.token_created = Instant::now();
        self.token_lifetime = Duration::from_millis(u64::from(token.revised_lifetime));
        self.remote_nonce = server_nonce.to_vec();

        // Client keys: secret = server nonce, seed = client nonce.
        self.local_keys =
            DerivedKeys::derive(self.policy, &self.remote_nonce, &self.local_nonce)?;
        // Server keys: the reverse.
        self.remote_keys =
            DerivedKeys::derive(self.policy, &self.local_nonce, &self.remote_nonce)?;

        debug!(
            channel_id = self.channel_id,
            token_id = self.token_id,
            lifetime_ms = token.revised_lifetime,
            policy = %self.policy,
            "secure channel token installed"
        );
        Ok(())
    }

    /// Returns `true` once 75% of the token lifetime has elapsed.
    pub fn token_renewal_due(&self) -> bool {
        if self.state != ChannelState::Open {
            return false;
        }
        let due_after = self.token_lifetime.mul_f64(TOKEN_RENEWAL_FRACTION);
        self.token_created.elapsed() >= due_after
    }

    /// Time until renewal is due (zero when overdue).
    pub fn renewal_deadline(&self) -> Duration {
        self.token_lifetime
            .mul_f64(TOKEN_RENEWAL_FRACTION)
            .saturating_sub(self.token_created.elapsed())
    }

    // -------------------------------------------------------------------------
    // Outbound securing
    // -------------------------------------------------------------------------

    /// Largest message body sendable under the current budget.
    pub fn max_sendable_body(&self) -> usize {
        self.limits.max_sendable_body(self.max_chunk_body())
    }

    fn max_chunk_body(&self) -> usize {
        let overhead = SECURED_HEADER_SIZE + 4 + SEQUENCE_HEADER_SIZE;
        let security = match self.mode {
            MessageSecurityMode::SignAndEncrypt => {
                // Signature, padding-length byte, and worst-case padding.
                self.policy.symmetric_signature_length() + 1 + crypto::AES_BLOCK_SIZE
            }
            MessageSecurityMode::Sign => self.policy.symmetric_signature_length(),
            _ => 0,
        };
        self.limits.send_buffer_size.saturating_sub(overhead + security)
    }

    /// Secures a message body into ready-to-write chunk frames.
    ///
    /// `OPN` bodies take the asymmetric path and must fit one chunk; `MSG`
    /// and `CLO` bodies are chunked and symmetrically protected.
    pub fn secure_message(
        &mut self,
        message_type: MessageType,
        request_id: u32,
        body: &[u8],
    ) -> ChannelResult<Vec<Vec<u8>>> {
        match message_type {
            MessageType::OpenSecureChannel => {
                Ok(vec![self.secure_open_chunk(request_id, body)?])
            }
            MessageType::Message | MessageType::CloseSecureChannel => {
                let max_chunk_body = self.max_chunk_body();
                let pieces = Chunker::split(body, max_chunk_body, &self.limits)?;
                let final_index = pieces.len() - 1;
                let mut frames = Vec::with_capacity(pieces.len());
                for (index, piece) in pieces.iter().enumerate() {
                    let chunk_type = if index == final_index {
                        ChunkType::Final
                    } else {
                        ChunkType::Intermediate
                    };
                    frames.push(self.secure_symmetric_chunk(
                        message_type,
                        chunk_type,
                        request_id,
                        piece,
                    )?);
                }
                Ok(frames)
            }
            _ => Err(ChannelError::Protocol(StatusCode::BAD_INTERNAL_ERROR)),
        }
    }

    fn secure_symmetric_chunk(
        &mut self,
        message_type: MessageType,
        chunk_type: ChunkType,
        request_id: u32,
        body: &[u8],
    ) -> ChannelResult<Vec<u8>> {
        let sequence_number = self.next_sequence_number();
        let signature_len = match self.mode {
            MessageSecurityMode::Sign | MessageSecurityMode::SignAndEncrypt => {
                self.policy.symmetric_signature_length()
            }
            _ => 0,
        };

        // Padding so the encrypted region is block-aligned.
        let padding_total = if self.mode == MessageSecurityMode::SignAndEncrypt {
            let plain = SEQUENCE_HEADER_SIZE + body.len() + 1 + signature_len;
            let padding_size = (crypto::AES_BLOCK_SIZE - plain % crypto::AES_BLOCK_SIZE)
                % crypto::AES_BLOCK_SIZE;
            padding_size + 1
        } else {
            0
        };

        let total_size = SECURED_HEADER_SIZE
            + 4
            + SEQUENCE_HEADER_SIZE
            + body.len()
            + padding_total
            + signature_len;

        let mut frame = Vec::with_capacity(total_size);
        MessageChunkHeader {
            message_type,
            chunk_type,
            size: total_size as u32,
        }
        .write(&mut frame)?;
        opclink_types::encoding::write_u32(&mut frame, self.channel_id)?;
        opclink_types::encoding::write_u32(&mut frame, self.token_id)?;
        SequenceHeader {
            sequence_number,
            request_id,
        }
        .write(&mut frame)?;
        frame.extend_from_slice(body);
        if padding_total > 0 {
            let padding_size = (padding_total - 1) as u8;
            frame.resize(frame.len() + padding_total, padding_size);
        }

        match self.mode {
            MessageSecurityMode::Sign => {
                let signature = self
                    .policy
                    .symmetric_sign(&self.local_keys.signing_key, &frame)?;
                frame.extend_from_slice(&signature);
            }
            MessageSecurityMode::SignAndEncrypt => {
                let signature = self
                    .policy
                    .symmetric_sign(&self.local_keys.signing_key, &frame)?;
                frame.extend_from_slice(&signature);
                let encrypt_from = SECURED_HEADER_SIZE + 4;
                crypto::aes_cbc_encrypt(
                    &self.local_keys.encryption_key,
                    &self.local_keys.iv,
                    &mut frame[encrypt_from..],
                )?;
            }
            _ => {}
        }

        debug_assert_eq!(frame.len(), total_size);
        Ok(frame)
    }

    fn secure_open_chunk(&mut self, request_id: u32, body: &[u8]) -> ChannelResult<Vec<u8>> {
        let sequence_number = self.next_sequence_number();

        if self.policy == SecurityPolicy::None {
            let security_header = AsymmetricSecurityHeader {
                security_policy_uri: UaString::from(self.policy.uri()),
                sender_certificate: ByteString::null(),
                receiver_certificate_thumbprint: ByteString::null(),
            };
            let total_size = SECURED_HEADER_SIZE
                + security_header.byte_len()
                + SEQUENCE_HEADER_SIZE
                + body.len();
            let mut frame = Vec::with_capacity(total_size);
            MessageChunkHeader {
                message_type: MessageType::OpenSecureChannel,
                chunk_type: ChunkType::Final,
                size: total_size as u32,
            }
            .write(&mut frame)?;
            opclink_types::encoding::write_u32(&mut frame, self.channel_id)?;
            security_header.write(&mut frame)?;
            SequenceHeader {
                sequence_number,
                request_id,
            }
            .write(&mut frame)?;
            frame.extend_from_slice(body);
            return Ok(frame);
        }

        // OPN under a real policy is always signed with our key and encrypted
        // with the server's, independent of the message security mode.
        let identity = self
            .own_identity
            .as_ref()
            .ok_or(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED))?
            .clone();
        let remote = self
            .remote_certificate
            .as_ref()
            .ok_or(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
        let remote_key = remote.public_key()?;
        let scheme = self
            .policy
            .asymmetric_scheme()
            .ok_or(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
        let hash = self
            .policy
            .asymmetric_hash()
            .ok_or(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;

        use rsa::traits::PublicKeyParts;
        let own_key_size = identity.private_key.size();
        let remote_key_size = remote_key.size();
        let plain_block = scheme.plain_block_size(remote_key_size);
        if plain_block >= 256 {
            // Two-byte padding sizes (keys above 2048 bits) are not supported.
            return Err(ChannelError::Security(StatusCode::BAD_NOT_SUPPORTED));
        }

        let security_header = AsymmetricSecurityHeader {
            security_policy_uri: UaString::from(self.policy.uri()),
            sender_certificate: identity.certificate.as_byte_string(),
            receiver_certificate_thumbprint: ByteString::from(remote.thumbprint().as_slice()),
        };

        let signature_len = own_key_size;
        let plain_len_unpadded = SEQUENCE_HEADER_SIZE + body.len() + 1 + signature_len;
        let padding_size = (plain_block - plain_len_unpadded % plain_block) % plain_block;
        let padding_total = padding_size + 1;
        let plain_region = SEQUENCE_HEADER_SIZE + body.len() + padding_total + signature_len;
        let encrypted_region = plain_region / plain_block * remote_key_size;
        let total_size =
            SECURED_HEADER_SIZE + security_header.byte_len() + encrypted_region;

        let mut frame = Vec::with_capacity(total_size);
        MessageChunkHeader {
            message_type: MessageType::OpenSecureChannel,
            chunk_type: ChunkType::Final,
            size: total_size as u32,
        }
        .write(&mut frame)?;
        opclink_types::encoding::write_u32(&mut frame, self.channel_id)?;
        security_header.write(&mut frame)?;
        let plain_start = frame.len();
        SequenceHeader {
            sequence_number,
            request_id,
        }
        .write(&mut frame)?;
        frame.extend_from_slice(body);
        frame.resize(frame.len() + padding_total, padding_size as u8);

        let signature = crypto::rsa_sign(&identity.private_key, hash, &frame)?;
        frame.extend_from_slice(&signature);

        let encrypted = crypto::rsa_encrypt(&remote_key, scheme, &frame[plain_start..])?;
        frame.truncate(plain_start);
        frame.extend_from_slice(&encrypted);

        debug_assert_eq!(frame.len(), total_size);
        Ok(frame)
    }

    // -------------------------------------------------------------------------
    // Inbound verification
    // -------------------------------------------------------------------------

    /// Verifies and decrypts one inbound frame (complete, header included).
    pub fn decode_frame(&mut self, frame: &[u8]) -> ChannelResult<DecodedChunk> {
        if frame.len() < SECURED_HEADER_SIZE {
            return Err(ChannelError::Protocol(StatusCode::BAD_DECODING_ERROR));
        }
        let mut header_bytes = [0u8; MESSAGE_HEADER_SIZE];
        header_bytes.copy_from_slice(&frame[..MESSAGE_HEADER_SIZE]);
        let header = MessageChunkHeader::parse(&header_bytes)?;
        let channel_id = u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);

        if self.channel_id != 0 && channel_id != self.channel_id {
            return Err(ChannelError::Protocol(StatusCode::BAD_SECURE_CHANNEL_ID_INVALID));
        }

        match header.message_type {
            MessageType::OpenSecureChannel => self.decode_open_frame(header, frame),
            MessageType::Message | MessageType::CloseSecureChannel => {
                self.decode_symmetric_frame(header, frame)
            }
            _ => Err(ChannelError::Protocol(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID)),
        }
    }

    fn decode_symmetric_frame(
        &mut self,
        header: MessageChunkHeader,
        frame: &[u8],
    ) -> ChannelResult<DecodedChunk> {
        if frame.len() < SECURED_HEADER_SIZE + 4 + SEQUENCE_HEADER_SIZE {
            return Err(ChannelError::Protocol(StatusCode::BAD_DECODING_ERROR));
        }
        let token_id = u32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]]);

        let keys = if token_id == self.token_id {
            // First traffic under the new token retires the old one.
            if self.previous_token.take().is_some() {
                debug!(token_id, "previous channel token retired");
            }
            self.remote_keys.clone()
        } else {
            match &self.previous_token {
                Some((previous_id, keys)) if *previous_id == token_id => keys.clone(),
                _ => {
                    return Err(ChannelError::Security(
                        StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN,
                    ))
                }
            }
        };

        let mut buffer = frame.to_vec();
        let body_start = SECURED_HEADER_SIZE + 4;

        if self.mode == MessageSecurityMode::SignAndEncrypt {
            crypto::aes_cbc_decrypt(&keys.encryption_key, &keys.iv, &mut buffer[body_start..])?;
        }

        let signature_len = match self.mode {
            MessageSecurityMode::Sign | MessageSecurityMode::SignAndEncrypt => {
                self.policy.symmetric_signature_length()
            }
            _ => 0,
        };
        let mut end = buffer.len();
        if signature_len > 0 {
            if end < body_start + signature_len {
                return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
            }
            let (signed, signature) = buffer.split_at(end - signature_len);
            self.policy
                .symmetric_verify(&keys.signing_key, signed, signature)?;
            end -= signature_len;
        }

        if self.mode == MessageSecurityMode::SignAndEncrypt {
            // Strip padding: every padding byte equals the padding size.
            if end == body_start {
                return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
            }
            let padding_size = buffer[end - 1] as usize;
            let padding_total = padding_size + 1;
            if end < body_start + padding_total {
                return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
            }
            end -= padding_total;
        }

        let mut cursor = Cursor::new(&buffer[body_start..end]);
        let sequence = SequenceHeader::read(&mut cursor)
            .map_err(|status| ChannelError::Protocol(status))?;
        self.verify_receive_sequence(sequence.sequence_number)?;

        let payload_start = body_start + SEQUENCE_HEADER_SIZE;
        Ok(DecodedChunk {
            message_type: header.message_type,
            chunk_type: header.chunk_type,
            request_id: sequence.request_id,
            payload: buffer[payload_start..end].to_vec(),
        })
    }

    fn decode_open_frame(
        &mut self,
        header: MessageChunkHeader,
        frame: &[u8],
    ) -> ChannelResult<DecodedChunk> {
        let mut cursor = Cursor::new(&frame[SECURED_HEADER_SIZE..]);
        let security_header =
            AsymmetricSecurityHeader::read(&mut cursor, &self.decoding_options)
                .map_err(ChannelError::Protocol)?;
        let body_start = SECURED_HEADER_SIZE + cursor.position() as usize;

        let policy_uri = security_header.security_policy_uri.as_ref();
        if SecurityPolicy::from_uri(policy_uri) != Some(self.policy) {
            return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
        }

        if self.policy == SecurityPolicy::None {
            let mut cursor = Cursor::new(&frame[body_start..]);
            let sequence = SequenceHeader::read(&mut cursor)
                .map_err(ChannelError::Protocol)?;
            self.verify_receive_sequence(sequence.sequence_number)?;
            return Ok(DecodedChunk {
                message_type: header.message_type,
                chunk_type: header.chunk_type,
                request_id: sequence.request_id,
                payload: frame[body_start + SEQUENCE_HEADER_SIZE..].to_vec(),
            });
        }

        // Decrypt with our key, verify with the sender certificate from the
        // security header.
        let identity = self
            .own_identity
            .as_ref()
            .ok_or(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
        let scheme = self
            .policy
            .asymmetric_scheme()
            .ok_or(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;
        let hash = self
            .policy
            .asymmetric_hash()
            .ok_or(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED))?;

        let sender_der = security_header.sender_certificate.as_ref();
        if sender_der.is_empty() {
            return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
        }
        let sender_certificate = X509Certificate::from_der(sender_der.to_vec())?;
        let sender_key = sender_certificate.public_key()?;

        let decrypted =
            crypto::rsa_decrypt(&identity.private_key, scheme, &frame[body_start..])?;

        use rsa::traits::PublicKeyParts;
        let signature_len = sender_key.size();
        if decrypted.len() < SEQUENCE_HEADER_SIZE + 1 + signature_len {
            return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
        }

        // The signature covers the plaintext headers plus the decrypted region.
        let signed_len = decrypted.len() - signature_len;
        let mut signed = Vec::with_capacity(body_start + signed_len);
        signed.extend_from_slice(&frame[..body_start]);
        signed.extend_from_slice(&decrypted[..signed_len]);
        crypto::rsa_verify(&sender_key, hash, &signed, &decrypted[signed_len..])?;

        let padding_size = decrypted[signed_len - 1] as usize;
        let padding_total = padding_size + 1;
        if signed_len < SEQUENCE_HEADER_SIZE + padding_total {
            return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
        }
        let payload_end = signed_len - padding_total;

        let mut cursor = Cursor::new(&decrypted[..SEQUENCE_HEADER_SIZE]);
        let sequence = SequenceHeader::read(&mut cursor)
            .map_err(ChannelError::Protocol)?;
        self.verify_receive_sequence(sequence.sequence_number)?;

        // Remember the sender certificate when discovery did not supply one.
        if self.remote_certificate.is_none() {
            self.remote_certificate = Some(sender_certificate);
        }

        Ok(DecodedChunk {
            message_type: header.message_type,
            chunk_type: header.chunk_type,
            request_id: sequence.request_id,
            payload: decrypted[SEQUENCE_HEADER_SIZE..payload_end].to_vec(),
        })
    }

    /// Faults the channel and clears key material.
    pub fn fault(&mut self) {
        self.state = ChannelState::Faulted;
        self.previous_token = None;
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("mode", &self.mode)
            .field("channel_id", &self.channel_id)
            .field("token_id", &self.token_id)
            .field("send_sequence", &self.send_sequence)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use opclink_types::service::SecurityTokenRequestType;

    fn open_response(channel_id: u32, token_id: u32, nonce_len: usize) -> OpenSecureChannelResponse {
        OpenSecureChannelResponse {
            security_token: ChannelSecurityToken {
                channel_id,
                token_id,
                created_at: opclink_types::UaDateTime::now(),
                revised_lifetime: 60_000,
            },
            server_nonce: if nonce_len == 0 {
                ByteString::null()
            } else {
                ByteString::from(vec![3u8; nonce_len])
            },
            ..Default::default()
        }
    }

    fn open_none_channel() -> SecureChannel {
        let mut channel = SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None);
        channel.create_local_nonce();
        channel.apply_open_response(&open_response(5, 1, 0)).unwrap();
        channel.set_state(ChannelState::Open);
        channel
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let mut channel = open_none_channel();
        let mut last = 0;
        for _ in 0..10 {
            let frames = channel
                .secure_message(MessageType::Message, 1, b"body")
                .unwrap();
            let decoded_sequence =
                u32::from_le_bytes([frames[0][16], frames[0][17], frames[0][18], frames[0][19]]);
            assert!(decoded_sequence > last);
            last = decoded_sequence;
        }
    }

    #[test]
    fn test_sequence_wrap_resets_to_one() {
        let mut channel = open_none_channel();
        channel.send_sequence = SEQUENCE_WRAP_LIMIT;
        assert_eq!(channel.next_sequence_number(), 1);
    }

    #[test]
    fn test_none_message_round_trip() {
        let mut sender = open_none_channel();
        // The receiving side mirrors the channel state.
        let mut receiver = open_none_channel();

        let frames = sender
            .secure_message(MessageType::Message, 42, b"service body")
            .unwrap();
        assert_eq!(frames.len(), 1);
        let decoded = receiver.decode_frame(&frames[0]).unwrap();
        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.payload, b"service body");
        assert!(matches!(decoded.chunk_type, ChunkType::Final));
    }

    #[test]
    fn test_large_body_is_chunked() {
        let mut channel = open_none_channel();
        let mut limits = TransportLimits::default();
        limits.send_buffer_size = 256;
        channel.set_limits(limits);

        let body = vec![0x5A; 600];
        let frames = channel
            .secure_message(MessageType::Message, 7, &body)
            .unwrap();
        assert!(frames.len() >= 2);

        let mut receiver = open_none_channel();
        let mut reassembled = Vec::new();
        for frame in &frames {
            let decoded = receiver.decode_frame(frame).unwrap();
            reassembled.extend_from_slice(&decoded.payload);
        }
        assert_eq!(reassembled, body);
    }

    #[test]
    fn test_out_of_order_sequence_is_fatal() {
        let mut sender = open_none_channel();
        let mut receiver = open_none_channel();

        let first = sender.secure_message(MessageType::Message, 1, b"a").unwrap();
        let second = sender.secure_message(MessageType::Message, 2, b"b").unwrap();
        receiver.decode_frame(&second[0]).unwrap();
        match receiver.decode_frame(&first[0]) {
            Err(ChannelError::Protocol(status)) => {
                assert_eq!(status, StatusCode::BAD_SEQUENCE_NUMBER_INVALID)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_channel_id_mismatch_rejected() {
        let mut sender = open_none_channel();
        let mut receiver = SecureChannel::new(SecurityPolicy::None, MessageSecurityMode::None);
        receiver.create_local_nonce();
        receiver.apply_open_response(&open_response(9, 1, 0)).unwrap();

        let frames = sender.secure_message(MessageType::Message, 1, b"x").unwrap();
        match receiver.decode_frame(&frames[0]) {
            Err(ChannelError::Protocol(status)) => {
                assert_eq!(status, StatusCode::BAD_SECURE_CHANNEL_ID_INVALID)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_renewal_due_after_75_percent() {
        let mut channel = open_none_channel();
        assert!(!channel.token_renewal_due());
        channel.token_created = Instant::now() - Duration::from_secs(46);
        assert!(channel.token_renewal_due());
    }

    #[test]
    fn test_token_rotation_keeps_old_keys_until_new_traffic() {
        let policy = SecurityPolicy::Basic256Sha256;
        let mode = MessageSecurityMode::SignAndEncrypt;

        // Build a connected pair sharing nonces out of band, the way the OPN
        // handshake would.
        let mut client = SecureChannel::new(policy, mode);
        let client_nonce = client.create_local_nonce();
        let server_nonce = vec![9u8; 32];

        let mut server = SecureChannel::new(policy, mode);
        server.local_nonce = server_nonce.clone();
        server.remote_nonce = client_nonce.as_ref().to_vec();
        server.channel_id = 7;
        server.token_id = 1;
        // Server's outbound keys equal the client's inbound keys.
        server.local_keys =
            DerivedKeys::derive(policy, &client_nonce.as_ref().to_vec(), &server_nonce).unwrap();
        server.remote_keys =
            DerivedKeys::derive(policy, &server_nonce, &client_nonce.as_ref().to_vec()).unwrap();

        let mut response = open_response(7, 1, 0);
        response.server_nonce = ByteString::from(server_nonce.clone());
        client.apply_open_response(&response).unwrap();
        client.set_state(ChannelState::Open);

        // Server sends under token 1; client accepts.
        let frames = server
            .secure_message(MessageType::Message, 11, b"under token one")
            .unwrap();
        let decoded = client.decode_frame(&frames[0]).unwrap();
        assert_eq!(decoded.payload, b"under token one");

        // Renew: client derives new keys, old token stays valid inbound.
        let client_nonce2 = client.create_local_nonce();
        let server_nonce2 = vec![13u8; 32];
        let mut renewal = open_response(7, 2, 0);
        renewal.server_nonce = ByteString::from(server_nonce2.clone());
        client.apply_open_response(&renewal).unwrap();

        // Old-token traffic still decodes.
        let frames = server
            .secure_message(MessageType::Message, 12, b"still old token")
            .unwrap();
        let decoded = client.decode_frame(&frames[0]).unwrap();
        assert_eq!(decoded.payload, b"still old token");

        // Switch the server to the new token.
        server.token_id = 2;
        server.local_keys = DerivedKeys::derive(
            policy,
            &client_nonce2.as_ref().to_vec(),
            &server_nonce2,
        )
        .unwrap();
        let frames = server
            .secure_message(MessageType::Message, 13, b"new token")
            .unwrap();
        let decoded = client.decode_frame(&frames[0]).unwrap();
        assert_eq!(decoded.payload, b"new token");

        // The old token is now retired.
        server.token_id = 1;
        server.local_keys =
            DerivedKeys::derive(policy, &client_nonce.as_ref().to_vec(), &server_nonce).unwrap();
        let frames = server
            .secure_message(MessageType::Message, 14, b"too late")
            .unwrap();
        assert!(client.decode_frame(&frames[0]).is_err());
    }

    #[test]
    fn test_request_type_enum_values() {
        assert_eq!(SecurityTokenRequestType::Issue as i32, 0);
        assert_eq!(SecurityTokenRequestType::Renew as i32, 1);
    }
}
