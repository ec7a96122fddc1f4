// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! DataValue: a variant with quality and timestamps.

use serde::{Deserialize, Serialize};

use crate::date_time::UaDateTime;
use crate::encoding::{
    read_u16, read_u8, write_u16, write_u8, BinaryEncodable, DecodingOptions, EncodingResult,
};
use crate::status::StatusCode;
use crate::variant::Variant;

const MASK_VALUE: u8 = 0x01;
const MASK_STATUS: u8 = 0x02;
const MASK_SOURCE_TIMESTAMP: u8 = 0x04;
const MASK_SERVER_TIMESTAMP: u8 = 0x08;
const MASK_SOURCE_PICOSECONDS: u8 = 0x10;
const MASK_SERVER_PICOSECONDS: u8 = 0x20;

/// A value together with its status and sampling timestamps.
///
/// Absent fields are omitted from the wire via the leading encoding mask.
/// An absent status means `Good`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DataValue {
    /// The value; `None` when only quality/timestamps are reported.
    pub value: Option<Variant>,

    /// Quality of the value; `None` encodes as Good.
    pub status: Option<StatusCode>,

    /// Timestamp assigned by the data source.
    pub source_timestamp: Option<UaDateTime>,

    /// Sub-tick picoseconds for the source timestamp.
    pub source_picoseconds: Option<u16>,

    /// Timestamp assigned by the server.
    pub server_timestamp: Option<UaDateTime>,

    /// Sub-tick picoseconds for the server timestamp.
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    /// A good-quality value stamped with the current time as source time.
    pub fn new_now(value: impl Into<Variant>) -> Self {
        Self {
            value: Some(value.into()),
            status: Some(StatusCode::GOOD),
            source_timestamp: Some(UaDateTime::now()),
            ..Default::default()
        }
    }

    /// A value-only DataValue without status or timestamps.
    pub fn value_only(value: impl Into<Variant>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// The effective status (absent means Good).
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::GOOD)
    }

    /// Returns `true` when the effective status severity is good.
    pub fn is_good(&self) -> bool {
        self.status().is_good()
    }

    fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.value.is_some() {
            mask |= MASK_VALUE;
        }
        if self.status.is_some() {
            mask |= MASK_STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= MASK_SOURCE_TIMESTAMP;
        }
        if self.server_timestamp.is_some() {
            mask |= MASK_SERVER_TIMESTAMP;
        }
        if self.source_picoseconds.is_some() {
            mask |= MASK_SOURCE_PICOSECONDS;
        }
        if self.server_picoseconds.is_some() {
            mask |= MASK_SERVER_PICOSECONDS;
        }
        mask
    }
}

impl From<Variant> for DataValue {
    fn from(value: Variant) -> Self {
        DataValue::value_only(value)
    }
}

impl BinaryEncodable for DataValue {
    fn byte_len(&self) -> usize {
        let mut sz = 1;
        sz += self.value.as_ref().map_or(0, Variant::byte_len);
        sz += self.status.map_or(0, |_| 4);
        sz += self.source_timestamp.map_or(0, |_| 8);
        sz += self.source_picoseconds.map_or(0, |_| 2);
        sz += self.server_timestamp.map_or(0, |_| 8);
        sz += self.server_picoseconds.map_or(0, |_| 2);
        sz
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut sz = write_u8(stream, self.mask())?;
        if let Some(value) = &self.value {
            sz += value.encode(stream)?;
        }
        if let Some(status) = self.status {
            sz += status.encode(stream)?;
        }
        if let Some(ts) = self.source_timestamp {
            sz += ts.encode(stream)?;
        }
        if let Some(picos) = self.source_picoseconds {
            sz += write_u16(stream, picos)?;
        }
        if let Some(ts) = self.server_timestamp {
            sz += ts.encode(stream)?;
        }
        if let Some(picos) = self.server_picoseconds {
            sz += write_u16(stream, picos)?;
        }
        Ok(sz)
    }

    fn decode<S: std::io::Read>(stream: &mut S, options: &DecodingOptions) -> EncodingResult<Self> {
        let mask = read_u8(stream)?;
        let mut value = DataValue::default();
        if mask & MASK_VALUE != 0 {
            value.value = Some(Variant::decode(stream, options)?);
        }
        if mask & MASK_STATUS != 0 {
            value.status = Some(StatusCode::decode(stream, options)?);
        }
        if mask & MASK_SOURCE_TIMESTAMP != 0 {
            value.source_timestamp = Some(UaDateTime::decode(stream, options)?);
        }
        if mask & MASK_SOURCE_PICOSECONDS != 0 {
            value.source_picoseconds = Some(read_u16(stream)?);
        }
        if mask & MASK_SERVER_TIMESTAMP != 0 {
            value.server_timestamp = Some(UaDateTime::decode(stream, options)?);
        }
        if mask & MASK_SERVER_PICOSECONDS != 0 {
            value.server_picoseconds = Some(read_u16(stream)?);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_full_round_trip() {
        let value = DataValue {
            value: Some(Variant::Double(99.5)),
            status: Some(StatusCode::GOOD),
            source_timestamp: Some(UaDateTime::now()),
            source_picoseconds: Some(120),
            server_timestamp: Some(UaDateTime::now()),
            server_picoseconds: Some(0),
        };
        let buf = value.encode_to_vec().unwrap();
        let decoded =
            DataValue::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn test_empty_is_single_byte() {
        assert_eq!(DataValue::default().encode_to_vec().unwrap(), vec![0x00]);
    }

    #[test]
    fn test_absent_status_is_good() {
        let value = DataValue::value_only(Variant::Int32(1));
        assert!(value.is_good());
        assert_eq!(value.status(), StatusCode::GOOD);
    }
}
