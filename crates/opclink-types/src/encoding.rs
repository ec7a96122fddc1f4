// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Binary encoding primitives.
//!
//! OPC UA binary encoding is little-endian throughout. Every codec type
//! implements [`BinaryEncodable`]; free helpers cover the fixed-width
//! primitives and length-prefixed arrays so that composite `encode`/`decode`
//! bodies read as a flat sequence of field operations.
//!
//! Errors are [`StatusCode`] values: I/O failures and truncation map to
//! `BadDecodingError` / `BadEncodingError`, limit violations to
//! `BadEncodingLimitsExceeded`.

use std::io::{Read, Write};

use crate::status::StatusCode;

/// Result alias used by every encode/decode operation.
pub type EncodingResult<T> = std::result::Result<T, StatusCode>;

// =============================================================================
// DecodingOptions
// =============================================================================

/// Limits applied while decoding untrusted wire data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodingOptions {
    /// Maximum length in bytes of a decoded string.
    pub max_string_length: usize,

    /// Maximum length in bytes of a decoded byte string.
    pub max_byte_string_length: usize,

    /// Maximum number of elements in a decoded array.
    pub max_array_length: usize,

    /// Maximum size of a reassembled message body.
    pub max_message_size: usize,

    /// Maximum number of chunks a message may span.
    pub max_chunk_count: usize,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        Self {
            max_string_length: 65_536,
            max_byte_string_length: 1 << 20,
            max_array_length: 65_536,
            max_message_size: 16 << 20,
            max_chunk_count: 4096,
        }
    }
}

impl DecodingOptions {
    /// Options with effectively no limits, for trusted internal buffers.
    pub fn unlimited() -> Self {
        Self {
            max_string_length: usize::MAX,
            max_byte_string_length: usize::MAX,
            max_array_length: usize::MAX,
            max_message_size: usize::MAX,
            max_chunk_count: usize::MAX,
        }
    }
}

// =============================================================================
// BinaryEncodable
// =============================================================================

/// A type with an OPC UA binary wire representation.
pub trait BinaryEncodable: Sized {
    /// Exact number of bytes `encode` will write.
    fn byte_len(&self) -> usize;

    /// Writes the value to `stream`, returning the number of bytes written.
    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize>;

    /// Reads a value from `stream` under the given limits.
    fn decode<S: Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self>;

    /// Encodes into a fresh buffer.
    fn encode_to_vec(&self) -> EncodingResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.byte_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

// =============================================================================
// Stream helpers
// =============================================================================

fn encode_io<T>(result: std::io::Result<T>) -> EncodingResult<T> {
    result.map_err(|_| StatusCode::BAD_ENCODING_ERROR)
}

fn decode_io<T>(result: std::io::Result<T>) -> EncodingResult<T> {
    result.map_err(|_| StatusCode::BAD_DECODING_ERROR)
}

macro_rules! rw_fixed {
    ($write_fn:ident, $read_fn:ident, $ty:ty, $len:expr) => {
        /// Writes a little-endian value.
        pub fn $write_fn<S: Write>(stream: &mut S, value: $ty) -> EncodingResult<usize> {
            encode_io(stream.write_all(&value.to_le_bytes()))?;
            Ok($len)
        }

        /// Reads a little-endian value.
        pub fn $read_fn<S: Read>(stream: &mut S) -> EncodingResult<$ty> {
            let mut buf = [0u8; $len];
            decode_io(stream.read_exact(&mut buf))?;
            Ok(<$ty>::from_le_bytes(buf))
        }
    };
}

rw_fixed!(write_u8, read_u8, u8, 1);
rw_fixed!(write_i8, read_i8, i8, 1);
rw_fixed!(write_u16, read_u16, u16, 2);
rw_fixed!(write_i16, read_i16, i16, 2);
rw_fixed!(write_u32, read_u32, u32, 4);
rw_fixed!(write_i32, read_i32, i32, 4);
rw_fixed!(write_u64, read_u64, u64, 8);
rw_fixed!(write_i64, read_i64, i64, 8);
rw_fixed!(write_f32, read_f32, f32, 4);
rw_fixed!(write_f64, read_f64, f64, 8);

/// Writes raw bytes.
pub fn write_bytes<S: Write>(stream: &mut S, bytes: &[u8]) -> EncodingResult<usize> {
    encode_io(stream.write_all(bytes))?;
    Ok(bytes.len())
}

/// Reads exactly `len` bytes.
pub fn read_bytes<S: Read>(stream: &mut S, len: usize) -> EncodingResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    decode_io(stream.read_exact(&mut buf))?;
    Ok(buf)
}

// =============================================================================
// Primitive impls
// =============================================================================

macro_rules! impl_fixed {
    ($ty:ty, $len:expr, $write_fn:ident, $read_fn:ident) => {
        impl BinaryEncodable for $ty {
            fn byte_len(&self) -> usize {
                $len
            }

            fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
                $write_fn(stream, *self)
            }

            fn decode<S: Read>(stream: &mut S, _options: &DecodingOptions) -> EncodingResult<Self> {
                $read_fn(stream)
            }
        }
    };
}

impl_fixed!(u8, 1, write_u8, read_u8);
impl_fixed!(i8, 1, write_i8, read_i8);
impl_fixed!(u16, 2, write_u16, read_u16);
impl_fixed!(i16, 2, write_i16, read_i16);
impl_fixed!(u32, 4, write_u32, read_u32);
impl_fixed!(i32, 4, write_i32, read_i32);
impl_fixed!(u64, 8, write_u64, read_u64);
impl_fixed!(i64, 8, write_i64, read_i64);
impl_fixed!(f32, 4, write_f32, read_f32);
impl_fixed!(f64, 8, write_f64, read_f64);

impl BinaryEncodable for bool {
    fn byte_len(&self) -> usize {
        1
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u8(stream, u8::from(*self))
    }

    fn decode<S: Read>(stream: &mut S, _options: &DecodingOptions) -> EncodingResult<Self> {
        Ok(read_u8(stream)? != 0)
    }
}

// =============================================================================
// Arrays
// =============================================================================

/// Byte length of an optional array: 4 for the length prefix plus elements.
pub fn byte_len_array<T: BinaryEncodable>(values: &Option<Vec<T>>) -> usize {
    4 + values
        .as_ref()
        .map(|v| v.iter().map(BinaryEncodable::byte_len).sum())
        .unwrap_or(0)
}

/// Writes an optional array as an `i32` length (−1 for null) then elements.
pub fn write_array<S: Write, T: BinaryEncodable>(
    stream: &mut S,
    values: &Option<Vec<T>>,
) -> EncodingResult<usize> {
    match values {
        None => write_i32(stream, -1),
        Some(values) => {
            if values.len() > i32::MAX as usize {
                return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
            }
            let mut sz = write_i32(stream, values.len() as i32)?;
            for value in values {
                sz += value.encode(stream)?;
            }
            Ok(sz)
        }
    }
}

/// Reads an optional array written by [`write_array`].
pub fn read_array<S: Read, T: BinaryEncodable>(
    stream: &mut S,
    options: &DecodingOptions,
) -> EncodingResult<Option<Vec<T>>> {
    let len = read_i32(stream)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if len > options.max_array_length {
        return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
    }
    let mut values = Vec::with_capacity(len.min(4096));
    for _ in 0..len {
        values.push(T::decode(stream, options)?);
    }
    Ok(Some(values))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_primitive_round_trip() {
        let mut buf = Vec::new();
        write_u16(&mut buf, 0xBEEF).unwrap();
        write_i32(&mut buf, -7).unwrap();
        write_f64(&mut buf, 2.5).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_u16(&mut cursor).unwrap(), 0xBEEF);
        assert_eq!(read_i32(&mut cursor).unwrap(), -7);
        assert_eq!(read_f64(&mut cursor).unwrap(), 2.5);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0x0102_0304).unwrap();
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_truncated_read_is_decoding_error() {
        let mut cursor = Cursor::new(vec![0x01, 0x02]);
        assert_eq!(
            read_u32(&mut cursor).unwrap_err(),
            StatusCode::BAD_DECODING_ERROR
        );
    }

    #[test]
    fn test_null_array_round_trip() {
        let mut buf = Vec::new();
        write_array::<_, u32>(&mut buf, &None).unwrap();
        let decoded: Option<Vec<u32>> =
            read_array(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn test_array_length_limit() {
        let mut buf = Vec::new();
        write_i32(&mut buf, 10_000).unwrap();
        let options = DecodingOptions {
            max_array_length: 16,
            ..Default::default()
        };
        let result: EncodingResult<Option<Vec<u8>>> = read_array(&mut Cursor::new(buf), &options);
        assert_eq!(result.unwrap_err(), StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
    }
}
