// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Length-prefixed string and byte-string types.
//!
//! OPC UA distinguishes a *null* string (wire length −1) from an *empty*
//! string (wire length 0). Both [`UaString`] and [`ByteString`] preserve the
//! distinction through a round trip.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding::{
    read_bytes, read_i32, write_bytes, write_i32, BinaryEncodable, DecodingOptions, EncodingResult,
};
use crate::status::StatusCode;

// =============================================================================
// UaString
// =============================================================================

/// A nullable UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct UaString(pub Option<String>);

/// An XML fragment; wire-identical to [`UaString`].
pub type XmlElement = UaString;

impl UaString {
    /// The null string.
    pub const fn null() -> Self {
        UaString(None)
    }

    /// Returns `true` if this is the null string.
    pub const fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the string contents; null yields an empty slice.
    pub fn as_ref(&self) -> &str {
        self.0.as_deref().unwrap_or("")
    }

    /// Returns the inner value.
    pub fn value(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<&str> for UaString {
    fn from(value: &str) -> Self {
        UaString(Some(value.to_string()))
    }
}

impl From<String> for UaString {
    fn from(value: String) -> Self {
        UaString(Some(value))
    }
}

impl From<Option<String>> for UaString {
    fn from(value: Option<String>) -> Self {
        UaString(value)
    }
}

impl fmt::Display for UaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "(null)"),
        }
    }
}

impl BinaryEncodable for UaString {
    fn byte_len(&self) -> usize {
        4 + self.0.as_ref().map(String::len).unwrap_or(0)
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        match &self.0 {
            None => write_i32(stream, -1),
            Some(s) => {
                if s.len() > i32::MAX as usize {
                    return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
                }
                let mut sz = write_i32(stream, s.len() as i32)?;
                sz += write_bytes(stream, s.as_bytes())?;
                Ok(sz)
            }
        }
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let len = read_i32(stream)?;
        if len < 0 {
            return Ok(UaString::null());
        }
        let len = len as usize;
        if len > options.max_string_length {
            return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
        }
        let bytes = read_bytes(stream, len)?;
        let s = String::from_utf8(bytes).map_err(|_| StatusCode::BAD_DECODING_ERROR)?;
        Ok(UaString(Some(s)))
    }
}

// =============================================================================
// ByteString
// =============================================================================

/// A nullable byte sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ByteString(pub Option<Vec<u8>>);

impl ByteString {
    /// The null byte string.
    pub const fn null() -> Self {
        ByteString(None)
    }

    /// Returns `true` if this is the null byte string.
    pub const fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Returns `true` if null or zero-length.
    pub fn is_null_or_empty(&self) -> bool {
        self.0.as_ref().map(Vec::is_empty).unwrap_or(true)
    }

    /// Returns the bytes; null yields an empty slice.
    pub fn as_ref(&self) -> &[u8] {
        self.0.as_deref().unwrap_or(&[])
    }

    /// Byte length of the contents (0 for null).
    pub fn len(&self) -> usize {
        self.0.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Returns `true` if the contents are empty (null counts as empty).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        ByteString(Some(value))
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        ByteString(Some(value.to_vec()))
    }
}

impl BinaryEncodable for ByteString {
    fn byte_len(&self) -> usize {
        4 + self.len()
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        match &self.0 {
            None => write_i32(stream, -1),
            Some(bytes) => {
                if bytes.len() > i32::MAX as usize {
                    return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
                }
                let mut sz = write_i32(stream, bytes.len() as i32)?;
                sz += write_bytes(stream, bytes)?;
                Ok(sz)
            }
        }
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let len = read_i32(stream)?;
        if len < 0 {
            return Ok(ByteString::null());
        }
        let len = len as usize;
        if len > options.max_byte_string_length {
            return Err(StatusCode::BAD_ENCODING_LIMITS_EXCEEDED);
        }
        Ok(ByteString(Some(read_bytes(stream, len)?)))
    }
}
