// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Diagnostic information attached to service results.
//!
//! Clients rarely act on these fields but must parse them to stay aligned
//! with the stream; the inner diagnostic recurses one level per mask bit.

use serde::{Deserialize, Serialize};

use crate::encoding::{
    read_i32, read_u8, write_i32, write_u8, BinaryEncodable, DecodingOptions, EncodingResult,
};
use crate::status::StatusCode;
use crate::string::UaString;

const MASK_SYMBOLIC_ID: u8 = 0x01;
const MASK_NAMESPACE: u8 = 0x02;
const MASK_LOCALIZED_TEXT: u8 = 0x04;
const MASK_LOCALE: u8 = 0x08;
const MASK_ADDITIONAL_INFO: u8 = 0x10;
const MASK_INNER_STATUS_CODE: u8 = 0x20;
const MASK_INNER_DIAGNOSTIC_INFO: u8 = 0x40;

/// Vendor-specific diagnostics for an operation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiagnosticInfo {
    /// Index into the string table for the symbolic id.
    pub symbolic_id: Option<i32>,

    /// Index into the string table for the namespace URI.
    pub namespace_uri: Option<i32>,

    /// Index into the string table for the localized text.
    pub localized_text: Option<i32>,

    /// Index into the string table for the locale.
    pub locale: Option<i32>,

    /// Vendor-specific diagnostic text.
    pub additional_info: Option<UaString>,

    /// Status code of the inner operation.
    pub inner_status_code: Option<StatusCode>,

    /// Diagnostics of the inner operation.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl DiagnosticInfo {
    /// An empty diagnostic (single zero mask byte on the wire).
    pub fn null() -> Self {
        Self::default()
    }

    fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.symbolic_id.is_some() {
            mask |= MASK_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            mask |= MASK_NAMESPACE;
        }
        if self.localized_text.is_some() {
            mask |= MASK_LOCALIZED_TEXT;
        }
        if self.locale.is_some() {
            mask |= MASK_LOCALE;
        }
        if self.additional_info.is_some() {
            mask |= MASK_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            mask |= MASK_INNER_STATUS_CODE;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= MASK_INNER_DIAGNOSTIC_INFO;
        }
        mask
    }
}

impl BinaryEncodable for DiagnosticInfo {
    fn byte_len(&self) -> usize {
        let mut sz = 1;
        sz += self.symbolic_id.map_or(0, |_| 4);
        sz += self.namespace_uri.map_or(0, |_| 4);
        sz += self.localized_text.map_or(0, |_| 4);
        sz += self.locale.map_or(0, |_| 4);
        sz += self.additional_info.as_ref().map_or(0, UaString::byte_len);
        sz += self.inner_status_code.map_or(0, |_| 4);
        sz += self
            .inner_diagnostic_info
            .as_ref()
            .map_or(0, |d| d.byte_len());
        sz
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut sz = write_u8(stream, self.mask())?;
        if let Some(v) = self.symbolic_id {
            sz += write_i32(stream, v)?;
        }
        if let Some(v) = self.namespace_uri {
            sz += write_i32(stream, v)?;
        }
        if let Some(v) = self.localized_text {
            sz += write_i32(stream, v)?;
        }
        if let Some(v) = self.locale {
            sz += write_i32(stream, v)?;
        }
        if let Some(v) = &self.additional_info {
            sz += v.encode(stream)?;
        }
        if let Some(v) = self.inner_status_code {
            sz += v.encode(stream)?;
        }
        if let Some(v) = &self.inner_diagnostic_info {
            sz += v.encode(stream)?;
        }
        Ok(sz)
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let mask = read_u8(stream)?;
        let mut info = DiagnosticInfo::default();
        if mask & MASK_SYMBOLIC_ID != 0 {
            info.symbolic_id = Some(read_i32(stream)?);
        }
        if mask & MASK_NAMESPACE != 0 {
            info.namespace_uri = Some(read_i32(stream)?);
        }
        if mask & MASK_LOCALIZED_TEXT != 0 {
            info.localized_text = Some(read_i32(stream)?);
        }
        if mask & MASK_LOCALE != 0 {
            info.locale = Some(read_i32(stream)?);
        }
        if mask & MASK_ADDITIONAL_INFO != 0 {
            info.additional_info = Some(UaString::decode(stream, options)?);
        }
        if mask & MASK_INNER_STATUS_CODE != 0 {
            info.inner_status_code = Some(StatusCode::decode(stream, options)?);
        }
        if mask & MASK_INNER_DIAGNOSTIC_INFO != 0 {
            info.inner_diagnostic_info = Some(Box::new(DiagnosticInfo::decode(stream, options)?));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_null_is_one_byte() {
        assert_eq!(DiagnosticInfo::null().encode_to_vec().unwrap(), vec![0x00]);
    }

    #[test]
    fn test_nested_round_trip() {
        let info = DiagnosticInfo {
            symbolic_id: Some(4),
            additional_info: Some(UaString::from("device busy")),
            inner_status_code: Some(StatusCode::BAD_INTERNAL_ERROR),
            inner_diagnostic_info: Some(Box::new(DiagnosticInfo {
                locale: Some(1),
                ..Default::default()
            })),
            ..Default::default()
        };
        let buf = info.encode_to_vec().unwrap();
        let decoded =
            DiagnosticInfo::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(info, decoded);
    }
}
