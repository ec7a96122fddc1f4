// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA DateTime: 100-nanosecond ticks since 1601-01-01 UTC.
//!
//! Tick value 0 denotes the minimum ("no time"); `i64::MAX` denotes an
//! infinite / unexpired time. Conversions to and from `chrono` saturate at
//! those sentinels.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::{read_i64, write_i64, BinaryEncodable, DecodingOptions, EncodingResult};

/// Seconds between 1601-01-01 and the Unix epoch.
const EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// Ticks per second (100 ns resolution).
const TICKS_PER_SEC: i64 = 10_000_000;

/// An OPC UA timestamp.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct UaDateTime(pub i64);

impl UaDateTime {
    /// The minimum timestamp ("no time").
    pub const MIN: UaDateTime = UaDateTime(0);

    /// The infinite timestamp (never expires).
    pub const MAX: UaDateTime = UaDateTime(i64::MAX);

    /// The current time.
    pub fn now() -> Self {
        Self::from_chrono(&Utc::now())
    }

    /// Creates a timestamp from raw ticks.
    pub const fn from_ticks(ticks: i64) -> Self {
        UaDateTime(ticks)
    }

    /// Raw tick count.
    pub const fn ticks(&self) -> i64 {
        self.0
    }

    /// Returns `true` for the minimum sentinel.
    pub const fn is_min(&self) -> bool {
        self.0 == 0
    }

    /// Returns `true` for the infinite sentinel.
    pub const fn is_infinite(&self) -> bool {
        self.0 == i64::MAX
    }

    /// Converts from a `chrono` UTC timestamp, clamping below 1601 to MIN.
    pub fn from_chrono(dt: &DateTime<Utc>) -> Self {
        let secs = dt.timestamp().saturating_add(EPOCH_OFFSET_SECS);
        if secs < 0 {
            return Self::MIN;
        }
        let subsec_ticks = i64::from(dt.timestamp_subsec_nanos() / 100);
        match secs.checked_mul(TICKS_PER_SEC) {
            Some(base) => UaDateTime(base.saturating_add(subsec_ticks)),
            None => Self::MAX,
        }
    }

    /// Converts to a `chrono` UTC timestamp; sentinels yield `None`.
    pub fn to_chrono(&self) -> Option<DateTime<Utc>> {
        if self.is_min() || self.is_infinite() {
            return None;
        }
        let secs = self.0 / TICKS_PER_SEC - EPOCH_OFFSET_SECS;
        let nanos = ((self.0 % TICKS_PER_SEC) * 100) as u32;
        Utc.timestamp_opt(secs, nanos).single()
    }
}

impl From<DateTime<Utc>> for UaDateTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_chrono(&dt)
    }
}

impl fmt::Display for UaDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_chrono() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None if self.is_infinite() => write!(f, "infinite"),
            None => write!(f, "min"),
        }
    }
}

impl BinaryEncodable for UaDateTime {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_i64(stream, self.0)
    }

    fn decode<S: std::io::Read>(
        stream: &mut S,
        _options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        Ok(UaDateTime(read_i64(stream)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_chrono_round_trip() {
        let now = Utc::now();
        let ticks = UaDateTime::from_chrono(&now);
        let back = ticks.to_chrono().unwrap();
        // 100 ns resolution loses sub-tick nanoseconds.
        assert!((back - now).num_milliseconds().abs() < 1);
    }

    #[test]
    fn test_sentinels() {
        assert!(UaDateTime::MIN.is_min());
        assert!(UaDateTime::MAX.is_infinite());
        assert!(UaDateTime::MIN.to_chrono().is_none());
        assert!(UaDateTime::MAX.to_chrono().is_none());
    }

    #[test]
    fn test_infinite_survives_encoding() {
        let buf = UaDateTime::MAX.encode_to_vec().unwrap();
        let decoded =
            UaDateTime::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert!(decoded.is_infinite());
    }

    #[test]
    fn test_known_epoch_value() {
        // Unix epoch in OPC UA ticks.
        let epoch = Utc.timestamp_opt(0, 0).single().unwrap();
        assert_eq!(
            UaDateTime::from_chrono(&epoch).ticks(),
            EPOCH_OFFSET_SECS * TICKS_PER_SEC
        );
    }
}
