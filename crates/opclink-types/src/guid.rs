// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA Guid: 16 bytes with the first three fields little-endian.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encoding::{
    read_bytes, read_u16, read_u32, write_bytes, write_u16, write_u32, BinaryEncodable,
    DecodingOptions, EncodingResult,
};
use crate::status::StatusCode;

/// A globally unique identifier with the OPC UA wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Guid(pub Uuid);

impl Guid {
    /// The all-zero GUID.
    pub const fn nil() -> Self {
        Guid(Uuid::nil())
    }

    /// A fresh random GUID.
    pub fn new_random() -> Self {
        Guid(Uuid::new_v4())
    }

    /// Returns `true` for the all-zero GUID.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        Guid(uuid)
    }
}

impl From<Guid> for Uuid {
    fn from(guid: Guid) -> Self {
        guid.0
    }
}

impl FromStr for Guid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Guid)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl BinaryEncodable for Guid {
    fn byte_len(&self) -> usize {
        16
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let (d1, d2, d3, d4) = self.0.as_fields();
        let mut sz = write_u32(stream, d1)?;
        sz += write_u16(stream, d2)?;
        sz += write_u16(stream, d3)?;
        sz += write_bytes(stream, d4)?;
        Ok(sz)
    }

    fn decode<S: std::io::Read>(
        stream: &mut S,
        _options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let d1 = read_u32(stream)?;
        let d2 = read_u16(stream)?;
        let d3 = read_u16(stream)?;
        let d4 = read_bytes(stream, 8)?;
        let d4: [u8; 8] = d4.try_into().map_err(|_| StatusCode::BAD_DECODING_ERROR)?;
        Ok(Guid(Uuid::from_fields(d1, d2, d3, &d4)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_round_trip() {
        let guid = Guid::new_random();
        let buf = guid.encode_to_vec().unwrap();
        assert_eq!(buf.len(), 16);
        let decoded = Guid::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(guid, decoded);
    }

    #[test]
    fn test_first_fields_little_endian() {
        let guid: Guid = "01020304-0506-0708-090a-0b0c0d0e0f10".parse().unwrap();
        let buf = guid.encode_to_vec().unwrap();
        // Data1..Data3 are byte-swapped on the wire; Data4 is not.
        assert_eq!(&buf[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[4..6], &[0x06, 0x05]);
        assert_eq!(&buf[6..8], &[0x08, 0x07]);
        assert_eq!(&buf[8..], &[0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10]);
    }
}
