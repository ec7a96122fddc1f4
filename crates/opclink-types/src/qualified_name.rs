// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Qualified names and localized text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding::{
    read_u16, read_u8, write_u16, write_u8, BinaryEncodable, DecodingOptions, EncodingResult,
};
use crate::string::UaString;

// =============================================================================
// QualifiedName
// =============================================================================

/// A name qualified by a namespace index (browse names).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct QualifiedName {
    /// Namespace index of the name.
    pub namespace_index: u16,

    /// The unqualified name.
    pub name: UaString,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: UaString::from(name.into()),
        }
    }

    /// The null qualified name.
    pub const fn null() -> Self {
        Self {
            namespace_index: 0,
            name: UaString::null(),
        }
    }

    /// Returns `true` for the null qualified name.
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && self.name.is_null()
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index != 0 {
            write!(f, "{}:{}", self.namespace_index, self.name.as_ref())
        } else {
            write!(f, "{}", self.name.as_ref())
        }
    }
}

impl BinaryEncodable for QualifiedName {
    fn byte_len(&self) -> usize {
        2 + self.name.byte_len()
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut sz = write_u16(stream, self.namespace_index)?;
        sz += self.name.encode(stream)?;
        Ok(sz)
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let namespace_index = read_u16(stream)?;
        let name = UaString::decode(stream, options)?;
        Ok(Self {
            namespace_index,
            name,
        })
    }
}

// =============================================================================
// LocalizedText
// =============================================================================

const MASK_LOCALE: u8 = 0x01;
const MASK_TEXT: u8 = 0x02;

/// Human-readable text with an optional locale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct LocalizedText {
    /// RFC 3066 locale id, e.g. `en-US`.
    pub locale: UaString,

    /// The text in the given locale.
    pub text: UaString,
}

impl LocalizedText {
    /// Creates text without a locale.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: UaString::null(),
            text: UaString::from(text.into()),
        }
    }

    /// The null localized text.
    pub const fn null() -> Self {
        Self {
            locale: UaString::null(),
            text: UaString::null(),
        }
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text.as_ref())
    }
}

impl BinaryEncodable for LocalizedText {
    fn byte_len(&self) -> usize {
        let mut sz = 1;
        if !self.locale.is_null() {
            sz += self.locale.byte_len();
        }
        if !self.text.is_null() {
            sz += self.text.byte_len();
        }
        sz
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut mask = 0u8;
        if !self.locale.is_null() {
            mask |= MASK_LOCALE;
        }
        if !self.text.is_null() {
            mask |= MASK_TEXT;
        }
        let mut sz = write_u8(stream, mask)?;
        if !self.locale.is_null() {
            sz += self.locale.encode(stream)?;
        }
        if !self.text.is_null() {
            sz += self.text.encode(stream)?;
        }
        Ok(sz)
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let mask = read_u8(stream)?;
        let locale = if mask & MASK_LOCALE != 0 {
            UaString::decode(stream, options)?
        } else {
            UaString::null()
        };
        let text = if mask & MASK_TEXT != 0 {
            UaString::decode(stream, options)?
        } else {
            UaString::null()
        };
        Ok(Self { locale, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_qualified_name_round_trip() {
        let name = QualifiedName::new(2, "Pump.Speed");
        let buf = name.encode_to_vec().unwrap();
        let decoded =
            QualifiedName::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(name, decoded);
    }

    #[test]
    fn test_localized_text_mask() {
        let full = LocalizedText {
            locale: UaString::from("en-US"),
            text: UaString::from("Objects"),
        };
        let buf = full.encode_to_vec().unwrap();
        assert_eq!(buf[0], MASK_LOCALE | MASK_TEXT);
        let decoded =
            LocalizedText::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(full, decoded);

        let empty = LocalizedText::null();
        assert_eq!(empty.encode_to_vec().unwrap(), vec![0x00]);
    }
}
