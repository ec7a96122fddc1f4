// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport framing: message headers, handshake messages, chunk reassembly.
//!
//! Every frame starts with `MessageType (3 ascii bytes) | ChunkType (1 byte) |
//! Size (u32)`. Secured frames (`OPN`/`CLO`/`MSG`) follow with the secure
//! channel id; the handshake frames (`HEL`/`ACK`/`ERR`) do not.

use std::collections::HashMap;
use std::io::{Read, Write};

use opclink_types::encoding::{
    read_u32, write_bytes, write_u32, write_u8, BinaryEncodable, DecodingOptions, EncodingResult,
};
use opclink_types::{ByteString, StatusCode, UaString};

use crate::error::{ChannelError, ChannelResult};

/// Size of the common message header (type + chunk flag + size).
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Size of the header of a secured frame (common header + channel id).
pub const SECURED_HEADER_SIZE: usize = 12;

/// Size of the sequence header (sequence number + request id).
pub const SEQUENCE_HEADER_SIZE: usize = 8;

/// Sequence numbers wrap after this value, restarting below 1024.
pub const SEQUENCE_WRAP_LIMIT: u32 = u32::MAX - 1024;

// =============================================================================
// Message / chunk types
// =============================================================================

/// The transport-level message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client hello.
    Hello,
    /// Server acknowledge.
    Acknowledge,
    /// Fatal transport error notification.
    Error,
    /// OpenSecureChannel, asymmetrically secured.
    OpenSecureChannel,
    /// CloseSecureChannel.
    CloseSecureChannel,
    /// An ordinary service message, symmetrically secured.
    Message,
}

impl MessageType {
    /// The three-byte wire tag.
    pub const fn tag(&self) -> &'static [u8; 3] {
        match self {
            Self::Hello => b"HEL",
            Self::Acknowledge => b"ACK",
            Self::Error => b"ERR",
            Self::OpenSecureChannel => b"OPN",
            Self::CloseSecureChannel => b"CLO",
            Self::Message => b"MSG",
        }
    }

    /// Maps a wire tag.
    pub fn from_tag(tag: &[u8; 3]) -> Option<Self> {
        Some(match tag {
            b"HEL" => Self::Hello,
            b"ACK" => Self::Acknowledge,
            b"ERR" => Self::Error,
            b"OPN" => Self::OpenSecureChannel,
            b"CLO" => Self::CloseSecureChannel,
            b"MSG" => Self::Message,
            _ => return None,
        })
    }

    /// Returns `true` for frames that carry a secure channel id.
    pub const fn is_secured(&self) -> bool {
        matches!(
            self,
            Self::OpenSecureChannel | Self::CloseSecureChannel | Self::Message
        )
    }
}

/// Position of a chunk within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    /// An intermediate chunk (`C`).
    Intermediate,
    /// The final chunk of a message (`F`).
    Final,
    /// Abort: discard the partial message (`A`).
    Abort,
}

impl ChunkType {
    /// The single-byte wire tag.
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Intermediate => b'C',
            Self::Final => b'F',
            Self::Abort => b'A',
        }
    }

    /// Maps a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            b'C' => Self::Intermediate,
            b'F' => Self::Final,
            b'A' => Self::Abort,
            _ => return None,
        })
    }
}

// =============================================================================
// Headers
// =============================================================================

/// The 8-byte header present on every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageChunkHeader {
    /// The message kind.
    pub message_type: MessageType,

    /// The chunk position flag.
    pub chunk_type: ChunkType,

    /// Total frame size in bytes, header included.
    pub size: u32,
}

impl MessageChunkHeader {
    /// Writes the header.
    pub fn write<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_bytes(stream, self.message_type.tag())?;
        write_u8(stream, self.chunk_type.tag())?;
        write_u32(stream, self.size)?;
        Ok(MESSAGE_HEADER_SIZE)
    }

    /// Parses a header from the fixed 8 leading bytes of a frame.
    pub fn parse(bytes: &[u8; MESSAGE_HEADER_SIZE]) -> ChannelResult<Self> {
        let tag: [u8; 3] = [bytes[0], bytes[1], bytes[2]];
        let message_type = MessageType::from_tag(&tag)
            .ok_or(ChannelError::Protocol(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID))?;
        let chunk_type = ChunkType::from_tag(bytes[3])
            .ok_or(ChannelError::Protocol(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID))?;
        let size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if (size as usize) < MESSAGE_HEADER_SIZE {
            return Err(ChannelError::Protocol(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID));
        }
        Ok(Self {
            message_type,
            chunk_type,
            size,
        })
    }
}

/// Sequence header: chunk ordering and request correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    /// Monotonically increasing per channel.
    pub sequence_number: u32,

    /// Shared by every chunk of one message; echoed by the response.
    pub request_id: u32,
}

impl SequenceHeader {
    /// Writes the sequence header.
    pub fn write<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u32(stream, self.sequence_number)?;
        write_u32(stream, self.request_id)?;
        Ok(SEQUENCE_HEADER_SIZE)
    }

    /// Reads a sequence header.
    pub fn read<S: Read>(stream: &mut S) -> EncodingResult<Self> {
        Ok(Self {
            sequence_number: read_u32(stream)?,
            request_id: read_u32(stream)?,
        })
    }
}

/// Security header of an `OPN` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AsymmetricSecurityHeader {
    /// URI of the security policy in force.
    pub security_policy_uri: UaString,

    /// DER certificate of the sender; null for policy None.
    pub sender_certificate: ByteString,

    /// SHA-1 thumbprint of the receiver certificate; null for policy None.
    pub receiver_certificate_thumbprint: ByteString,
}

impl AsymmetricSecurityHeader {
    /// Header bytes when encoded.
    pub fn byte_len(&self) -> usize {
        self.security_policy_uri.byte_len()
            + self.sender_certificate.byte_len()
            + self.receiver_certificate_thumbprint.byte_len()
    }

    /// Writes the header.
    pub fn write<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut sz = self.security_policy_uri.encode(stream)?;
        sz += self.sender_certificate.encode(stream)?;
        sz += self.receiver_certificate_thumbprint.encode(stream)?;
        Ok(sz)
    }

    /// Reads the header.
    pub fn read<S: Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        Ok(Self {
            security_policy_uri: UaString::decode(stream, options)?,
            sender_certificate: ByteString::decode(stream, options)?,
            receiver_certificate_thumbprint: ByteString::decode(stream, options)?,
        })
    }
}

// =============================================================================
// Handshake messages
// =============================================================================

/// Client hello (`HEL`): proposes buffer sizes.
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    /// Protocol version; 0.
    pub protocol_version: u32,

    /// Largest chunk the client can receive.
    pub receive_buffer_size: u32,

    /// Largest chunk the client will send.
    pub send_buffer_size: u32,

    /// Largest reassembled message the client accepts; 0 = no limit.
    pub max_message_size: u32,

    /// Most chunks per message the client accepts; 0 = no limit.
    pub max_chunk_count: u32,

    /// The endpoint being connected to.
    pub endpoint_url: UaString,
}

impl Hello {
    /// Writes the body (without the frame header).
    pub fn write<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut sz = write_u32(stream, self.protocol_version)?;
        sz += write_u32(stream, self.receive_buffer_size)?;
        sz += write_u32(stream, self.send_buffer_size)?;
        sz += write_u32(stream, self.max_message_size)?;
        sz += write_u32(stream, self.max_chunk_count)?;
        sz += self.endpoint_url.encode(stream)?;
        Ok(sz)
    }

    /// Body size in bytes.
    pub fn byte_len(&self) -> usize {
        20 + self.endpoint_url.byte_len()
    }
}

/// Server acknowledge (`ACK`): the sizes the server grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledge {
    /// Protocol version; 0.
    pub protocol_version: u32,

    /// Largest chunk the server can receive.
    pub receive_buffer_size: u32,

    /// Largest chunk the server will send.
    pub send_buffer_size: u32,

    /// Largest reassembled message the server accepts; 0 = no limit.
    pub max_message_size: u32,

    /// Most chunks per message the server accepts; 0 = no limit.
    pub max_chunk_count: u32,
}

impl Acknowledge {
    /// Reads the body (after the frame header).
    pub fn read<S: Read>(stream: &mut S) -> EncodingResult<Self> {
        Ok(Self {
            protocol_version: read_u32(stream)?,
            receive_buffer_size: read_u32(stream)?,
            send_buffer_size: read_u32(stream)?,
            max_message_size: read_u32(stream)?,
            max_chunk_count: read_u32(stream)?,
        })
    }
}

/// Server error notification (`ERR`).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    /// The failure.
    pub error: StatusCode,

    /// Human-readable reason.
    pub reason: UaString,
}

impl ErrorMessage {
    /// Reads the body (after the frame header).
    pub fn read<S: Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        Ok(Self {
            error: StatusCode::decode(stream, options)?,
            reason: UaString::decode(stream, options)?,
        })
    }
}

// =============================================================================
// Negotiated limits
// =============================================================================

/// The size budget in force after the `HEL`/`ACK` exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    /// Largest chunk we may send.
    pub send_buffer_size: usize,

    /// Largest chunk we accept.
    pub receive_buffer_size: usize,

    /// Largest reassembled message either side accepts.
    pub max_message_size: usize,

    /// Most chunks per message.
    pub max_chunk_count: usize,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            send_buffer_size: 64 * 1024,
            receive_buffer_size: 64 * 1024,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 4096,
        }
    }
}

impl TransportLimits {
    fn min_nonzero(ours: usize, theirs: u32) -> usize {
        if theirs == 0 {
            ours
        } else {
            ours.min(theirs as usize)
        }
    }

    /// Element-wise minimum of what we proposed and what the server granted.
    ///
    /// Note the crossover: our send buffer is bounded by the server's receive
    /// buffer and vice versa.
    pub fn negotiate(&self, ack: &Acknowledge) -> Self {
        Self {
            send_buffer_size: Self::min_nonzero(self.send_buffer_size, ack.receive_buffer_size),
            receive_buffer_size: Self::min_nonzero(self.receive_buffer_size, ack.send_buffer_size),
            max_message_size: Self::min_nonzero(self.max_message_size, ack.max_message_size),
            max_chunk_count: Self::min_nonzero(self.max_chunk_count, ack.max_chunk_count),
        }
    }

    /// The largest message body that may be chunked under this budget.
    pub fn max_sendable_body(&self, max_chunk_body: usize) -> usize {
        self.max_message_size
            .min(self.max_chunk_count.saturating_mul(max_chunk_body))
    }
}

// =============================================================================
// Chunker
// =============================================================================

/// Splits message bodies into chunk-sized pieces.
#[derive(Debug, Clone, Copy)]
pub struct Chunker;

impl Chunker {
    /// Splits `body` into pieces of at most `max_chunk_body` bytes.
    ///
    /// Fails locally with `BadRequestTooLarge` when the message cannot fit the
    /// negotiated budget at all.
    pub fn split<'a>(
        body: &'a [u8],
        max_chunk_body: usize,
        limits: &TransportLimits,
    ) -> ChannelResult<Vec<&'a [u8]>> {
        if max_chunk_body == 0 {
            return Err(ChannelError::Protocol(StatusCode::BAD_INTERNAL_ERROR));
        }
        if body.len() > limits.max_sendable_body(max_chunk_body) {
            return Err(ChannelError::Protocol(StatusCode::BAD_REQUEST_TOO_LARGE));
        }
        if body.is_empty() {
            return Ok(vec![&[]]);
        }
        Ok(body.chunks(max_chunk_body).collect())
    }
}

// =============================================================================
// Reassembler
// =============================================================================

/// Reassembles inbound chunk payloads into full message bodies, keyed by
/// request id.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: HashMap<u32, PartialMessage>,
}

#[derive(Debug, Default)]
struct PartialMessage {
    body: Vec<u8>,
    chunk_count: usize,
}

/// Outcome of feeding one chunk to the [`Reassembler`].
#[derive(Debug)]
pub enum ReassemblyResult {
    /// More chunks are needed.
    Incomplete,

    /// A full message body is ready.
    Complete {
        /// The request id the body belongs to.
        request_id: u32,
        /// The reassembled body.
        body: Vec<u8>,
    },

    /// The sender aborted the message; the embedded status resolves the
    /// waiting request.
    Aborted {
        /// The request id that was aborted.
        request_id: u32,
        /// Status carried in the abort body.
        status: StatusCode,
    },
}

impl Reassembler {
    /// Creates an empty reassembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one decrypted chunk payload.
    pub fn accept(
        &mut self,
        chunk_type: ChunkType,
        request_id: u32,
        payload: &[u8],
        limits: &TransportLimits,
    ) -> ChannelResult<ReassemblyResult> {
        match chunk_type {
            ChunkType::Abort => {
                self.partial.remove(&request_id);
                let mut cursor = std::io::Cursor::new(payload);
                let status = read_u32(&mut cursor)
                    .map(StatusCode)
                    .unwrap_or(StatusCode::BAD_COMMUNICATION_ERROR);
                // Reason string follows the status; nothing to do with it.
                Ok(ReassemblyResult::Aborted { request_id, status })
            }
            ChunkType::Intermediate => {
                let partial = self.partial.entry(request_id).or_default();
                partial.chunk_count += 1;
                if partial.chunk_count > limits.max_chunk_count {
                    self.partial.remove(&request_id);
                    return Err(ChannelError::Protocol(StatusCode::BAD_RESPONSE_TOO_LARGE));
                }
                partial.body.extend_from_slice(payload);
                if partial.body.len() > limits.max_message_size {
                    self.partial.remove(&request_id);
                    return Err(ChannelError::Protocol(StatusCode::BAD_RESPONSE_TOO_LARGE));
                }
                Ok(ReassemblyResult::Incomplete)
            }
            ChunkType::Final => {
                let mut partial = self.partial.remove(&request_id).unwrap_or_default();
                partial.chunk_count += 1;
                if partial.chunk_count > limits.max_chunk_count {
                    return Err(ChannelError::Protocol(StatusCode::BAD_RESPONSE_TOO_LARGE));
                }
                partial.body.extend_from_slice(payload);
                if partial.body.len() > limits.max_message_size {
                    return Err(ChannelError::Protocol(StatusCode::BAD_RESPONSE_TOO_LARGE));
                }
                Ok(ReassemblyResult::Complete {
                    request_id,
                    body: partial.body,
                })
            }
        }
    }

    /// Drops all partial state (on channel fault).
    pub fn clear(&mut self) {
        self.partial.clear();
    }

    /// Request ids with partially reassembled messages.
    pub fn pending_requests(&self) -> Vec<u32> {
        self.partial.keys().copied().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = MessageChunkHeader {
            message_type: MessageType::Message,
            chunk_type: ChunkType::Final,
            size: 512,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(&buf[..4], b"MSGF");
        let bytes: [u8; MESSAGE_HEADER_SIZE] = buf.try_into().unwrap();
        let parsed = MessageChunkHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_invalid_message_type_is_fatal_code() {
        let bytes = *b"XXXF\x10\x00\x00\x00";
        match MessageChunkHeader::parse(&bytes) {
            Err(ChannelError::Protocol(status)) => {
                assert_eq!(status, StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_negotiation_takes_minimum_with_crossover() {
        let proposed = TransportLimits::default();
        let ack = Acknowledge {
            protocol_version: 0,
            receive_buffer_size: 8192,
            send_buffer_size: 16384,
            max_message_size: 1 << 20,
            max_chunk_count: 64,
        };
        let negotiated = proposed.negotiate(&ack);
        assert_eq!(negotiated.send_buffer_size, 8192);
        assert_eq!(negotiated.receive_buffer_size, 16384);
        assert_eq!(negotiated.max_message_size, 1 << 20);
        assert_eq!(negotiated.max_chunk_count, 64);
    }

    #[test]
    fn test_negotiation_zero_means_unlimited() {
        let proposed = TransportLimits::default();
        let ack = Acknowledge {
            protocol_version: 0,
            receive_buffer_size: 0,
            send_buffer_size: 65536,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        let negotiated = proposed.negotiate(&ack);
        assert_eq!(negotiated.send_buffer_size, proposed.send_buffer_size);
        assert_eq!(negotiated.max_message_size, proposed.max_message_size);
    }

    #[test]
    fn test_chunker_splits_oversized_body() {
        let limits = TransportLimits::default();
        let body = vec![0xAB; 100];
        let chunks = Chunker::split(&body, 40, &limits).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 40);
        assert_eq!(chunks[2].len(), 20);
    }

    #[test]
    fn test_chunker_rejects_over_budget_before_send() {
        let limits = TransportLimits {
            max_message_size: 64,
            max_chunk_count: 2,
            ..Default::default()
        };
        let body = vec![0u8; 100];
        match Chunker::split(&body, 32, &limits) {
            Err(ChannelError::Protocol(status)) => {
                assert_eq!(status, StatusCode::BAD_REQUEST_TOO_LARGE)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_reassembly_in_order() {
        let limits = TransportLimits::default();
        let mut reassembler = Reassembler::new();
        assert!(matches!(
            reassembler
                .accept(ChunkType::Intermediate, 7, b"hello ", &limits)
                .unwrap(),
            ReassemblyResult::Incomplete
        ));
        match reassembler
            .accept(ChunkType::Final, 7, b"world", &limits)
            .unwrap()
        {
            ReassemblyResult::Complete { request_id, body } => {
                assert_eq!(request_id, 7);
                assert_eq!(body, b"hello world");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_abort_discards_partial_and_reports_status() {
        let limits = TransportLimits::default();
        let mut reassembler = Reassembler::new();
        reassembler
            .accept(ChunkType::Intermediate, 9, b"partial", &limits)
            .unwrap();
        let abort_body = StatusCode::BAD_REQUEST_TOO_LARGE.bits().to_le_bytes();
        match reassembler
            .accept(ChunkType::Abort, 9, &abort_body, &limits)
            .unwrap()
        {
            ReassemblyResult::Aborted { request_id, status } => {
                assert_eq!(request_id, 9);
                assert_eq!(status, StatusCode::BAD_REQUEST_TOO_LARGE);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(reassembler.pending_requests().is_empty());
    }

    #[test]
    fn test_chunk_count_limit() {
        let limits = TransportLimits {
            max_chunk_count: 2,
            ..Default::default()
        };
        let mut reassembler = Reassembler::new();
        reassembler
            .accept(ChunkType::Intermediate, 1, b"a", &limits)
            .unwrap();
        reassembler
            .accept(ChunkType::Intermediate, 1, b"b", &limits)
            .unwrap();
        match reassembler.accept(ChunkType::Intermediate, 1, b"c", &limits) {
            Err(ChannelError::Protocol(status)) => {
                assert_eq!(status, StatusCode::BAD_RESPONSE_TOO_LARGE)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
