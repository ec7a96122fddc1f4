// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA status codes.
//!
//! A [`StatusCode`] is a 32-bit value whose top two bits carry the severity
//! (`00` good, `01` uncertain, `10` bad). The named constants below cover the
//! codes this client produces or dispatches on; unknown codes from a server
//! are preserved bit-for-bit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding::{read_u32, write_u32, BinaryEncodable, DecodingOptions, EncodingResult};

/// A 32-bit severity-tagged OPC UA result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StatusCode(pub u32);

macro_rules! status_codes {
    ($(($konst:ident, $value:expr, $name:expr);)+) => {
        impl StatusCode {
            $(
                #[doc = $name]
                pub const $konst: StatusCode = StatusCode($value);
            )+

            /// Returns the symbolic name, or `None` for codes without one.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some($name),)+
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    (GOOD, 0x0000_0000, "Good");
    (GOOD_SUBSCRIPTION_TRANSFERRED, 0x002D_0000, "GoodSubscriptionTransferred");
    (UNCERTAIN, 0x4000_0000, "Uncertain");
    (BAD, 0x8000_0000, "Bad");
    (BAD_UNEXPECTED_ERROR, 0x8001_0000, "BadUnexpectedError");
    (BAD_INTERNAL_ERROR, 0x8002_0000, "BadInternalError");
    (BAD_OUT_OF_MEMORY, 0x8003_0000, "BadOutOfMemory");
    (BAD_RESOURCE_UNAVAILABLE, 0x8004_0000, "BadResourceUnavailable");
    (BAD_COMMUNICATION_ERROR, 0x8005_0000, "BadCommunicationError");
    (BAD_ENCODING_ERROR, 0x8006_0000, "BadEncodingError");
    (BAD_DECODING_ERROR, 0x8007_0000, "BadDecodingError");
    (BAD_ENCODING_LIMITS_EXCEEDED, 0x8008_0000, "BadEncodingLimitsExceeded");
    (BAD_REQUEST_TOO_LARGE, 0x8009_0000, "BadRequestTooLarge");
    (BAD_RESPONSE_TOO_LARGE, 0x800A_0000, "BadResponseTooLarge");
    (BAD_UNKNOWN_RESPONSE, 0x800B_0000, "BadUnknownResponse");
    (BAD_TIMEOUT, 0x800C_0000, "BadTimeout");
    (BAD_SERVICE_UNSUPPORTED, 0x800D_0000, "BadServiceUnsupported");
    (BAD_SHUTDOWN, 0x800E_0000, "BadShutdown");
    (BAD_SERVER_NOT_CONNECTED, 0x800F_0000, "BadServerNotConnected");
    (BAD_SERVER_HALTED, 0x8010_0000, "BadServerHalted");
    (BAD_NOTHING_TO_DO, 0x8011_0000, "BadNothingToDo");
    (BAD_TOO_MANY_OPERATIONS, 0x8012_0000, "BadTooManyOperations");
    (BAD_CERTIFICATE_INVALID, 0x8015_0000, "BadCertificateInvalid");
    (BAD_SECURITY_CHECKS_FAILED, 0x8016_0000, "BadSecurityChecksFailed");
    (BAD_CERTIFICATE_TIME_INVALID, 0x8017_0000, "BadCertificateTimeInvalid");
    (BAD_CERTIFICATE_HOST_NAME_INVALID, 0x8019_0000, "BadCertificateHostNameInvalid");
    (BAD_CERTIFICATE_URI_INVALID, 0x801A_0000, "BadCertificateUriInvalid");
    (BAD_CERTIFICATE_UNTRUSTED, 0x801D_0000, "BadCertificateUntrusted");
    (BAD_USER_ACCESS_DENIED, 0x8023_0000, "BadUserAccessDenied");
    (BAD_IDENTITY_TOKEN_INVALID, 0x8024_0000, "BadIdentityTokenInvalid");
    (BAD_IDENTITY_TOKEN_REJECTED, 0x8025_0000, "BadIdentityTokenRejected");
    (BAD_SECURE_CHANNEL_ID_INVALID, 0x8026_0000, "BadSecureChannelIdInvalid");
    (BAD_NONCE_INVALID, 0x8028_0000, "BadNonceInvalid");
    (BAD_SESSION_ID_INVALID, 0x8029_0000, "BadSessionIdInvalid");
    (BAD_SESSION_CLOSED, 0x802A_0000, "BadSessionClosed");
    (BAD_SESSION_NOT_ACTIVATED, 0x802B_0000, "BadSessionNotActivated");
    (BAD_SUBSCRIPTION_ID_INVALID, 0x802C_0000, "BadSubscriptionIdInvalid");
    (BAD_REQUEST_CANCELLED_BY_CLIENT, 0x802F_0000, "BadRequestCancelledByClient");
    (BAD_NO_COMMUNICATION, 0x8031_0000, "BadNoCommunication");
    (BAD_NODE_ID_INVALID, 0x8033_0000, "BadNodeIdInvalid");
    (BAD_NODE_ID_UNKNOWN, 0x8034_0000, "BadNodeIdUnknown");
    (BAD_ATTRIBUTE_ID_INVALID, 0x8035_0000, "BadAttributeIdInvalid");
    (BAD_INDEX_RANGE_INVALID, 0x8036_0000, "BadIndexRangeInvalid");
    (BAD_DATA_ENCODING_INVALID, 0x8038_0000, "BadDataEncodingInvalid");
    (BAD_NOT_READABLE, 0x803A_0000, "BadNotReadable");
    (BAD_NOT_WRITABLE, 0x803B_0000, "BadNotWritable");
    (BAD_OUT_OF_RANGE, 0x803C_0000, "BadOutOfRange");
    (BAD_NOT_SUPPORTED, 0x803D_0000, "BadNotSupported");
    (BAD_NOT_FOUND, 0x803E_0000, "BadNotFound");
    (BAD_MONITORED_ITEM_ID_INVALID, 0x8042_0000, "BadMonitoredItemIdInvalid");
    (BAD_MONITORED_ITEM_FILTER_INVALID, 0x8043_0000, "BadMonitoredItemFilterInvalid");
    (BAD_FILTER_NOT_ALLOWED, 0x8045_0000, "BadFilterNotAllowed");
    (BAD_CONTINUATION_POINT_INVALID, 0x804A_0000, "BadContinuationPointInvalid");
    (BAD_NO_CONTINUATION_POINTS, 0x804B_0000, "BadNoContinuationPoints");
    (BAD_NO_SUBSCRIPTION, 0x8079_0000, "BadNoSubscription");
    (BAD_SEQUENCE_NUMBER_UNKNOWN, 0x807A_0000, "BadSequenceNumberUnknown");
    (BAD_MESSAGE_NOT_AVAILABLE, 0x807B_0000, "BadMessageNotAvailable");
    (BAD_TCP_SERVER_TOO_BUSY, 0x807D_0000, "BadTcpServerTooBusy");
    (BAD_TCP_MESSAGE_TYPE_INVALID, 0x807E_0000, "BadTcpMessageTypeInvalid");
    (BAD_TCP_SECURE_CHANNEL_UNKNOWN, 0x807F_0000, "BadTcpSecureChannelUnknown");
    (BAD_TCP_MESSAGE_TOO_LARGE, 0x8080_0000, "BadTcpMessageTooLarge");
    (BAD_TCP_NOT_ENOUGH_RESOURCES, 0x8081_0000, "BadTcpNotEnoughResources");
    (BAD_TCP_INTERNAL_ERROR, 0x8082_0000, "BadTcpInternalError");
    (BAD_TCP_ENDPOINT_URL_INVALID, 0x8083_0000, "BadTcpEndpointUrlInvalid");
    (BAD_REQUEST_INTERRUPTED, 0x8084_0000, "BadRequestInterrupted");
    (BAD_REQUEST_TIMEOUT, 0x8085_0000, "BadRequestTimeout");
    (BAD_SECURE_CHANNEL_CLOSED, 0x8086_0000, "BadSecureChannelClosed");
    (BAD_SECURE_CHANNEL_TOKEN_UNKNOWN, 0x8087_0000, "BadSecureChannelTokenUnknown");
    (BAD_SEQUENCE_NUMBER_INVALID, 0x8088_0000, "BadSequenceNumberInvalid");
    (BAD_CONNECTION_CLOSED, 0x80AE_0000, "BadConnectionClosed");
    (BAD_INVALID_STATE, 0x80AF_0000, "BadInvalidState");
    (BAD_END_OF_STREAM, 0x80B0_0000, "BadEndOfStream");
    (BAD_TOO_MANY_SUBSCRIPTIONS, 0x8077_0000, "BadTooManySubscriptions");
    (BAD_TOO_MANY_PUBLISH_REQUESTS, 0x8078_0000, "BadTooManyPublishRequests");
    (BAD_METHOD_INVALID, 0x8075_0000, "BadMethodInvalid");
    (BAD_ARGUMENTS_MISSING, 0x8076_0000, "BadArgumentsMissing");
    (BAD_WRITE_NOT_SUPPORTED, 0x8073_0000, "BadWriteNotSupported");
    (BAD_TYPE_MISMATCH, 0x8074_0000, "BadTypeMismatch");
    (BAD_MAX_CONNECTIONS_REACHED, 0x80B7_0000, "BadMaxConnectionsReached");
}

impl StatusCode {
    const SEVERITY_MASK: u32 = 0xC000_0000;
    const SEVERITY_BAD: u32 = 0x8000_0000;
    const SEVERITY_UNCERTAIN: u32 = 0x4000_0000;

    /// Returns `true` if the severity is good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 & Self::SEVERITY_MASK == 0
    }

    /// Returns `true` if the severity is bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.0 & Self::SEVERITY_BAD != 0
    }

    /// Returns `true` if the severity is uncertain.
    #[inline]
    pub const fn is_uncertain(&self) -> bool {
        self.0 & Self::SEVERITY_MASK == Self::SEVERITY_UNCERTAIN
    }

    /// Returns the raw 32-bit value.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Strips the info bits, leaving only the code and severity.
    #[inline]
    pub const fn code(&self) -> StatusCode {
        StatusCode(self.0 & 0xFFFF_0000)
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        StatusCode(value)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code().name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "StatusCode({:#010X})", self.0),
        }
    }
}

impl std::error::Error for StatusCode {}

impl BinaryEncodable for StatusCode {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: std::io::Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u32(stream, self.0)
    }

    fn decode<S: std::io::Read>(
        stream: &mut S,
        _options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        Ok(StatusCode(read_u32(stream)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bits() {
        assert!(StatusCode::GOOD.is_good());
        assert!(!StatusCode::GOOD.is_bad());
        assert!(StatusCode::BAD_TIMEOUT.is_bad());
        assert!(!StatusCode::BAD_TIMEOUT.is_good());
        assert!(StatusCode(0x4000_0000).is_uncertain());
        assert!(!StatusCode(0x4000_0000).is_bad());
    }

    #[test]
    fn test_display_known_and_unknown() {
        assert_eq!(StatusCode::BAD_NODE_ID_UNKNOWN.to_string(), "BadNodeIdUnknown");
        assert_eq!(StatusCode(0x8FFF_0000).to_string(), "StatusCode(0x8FFF0000)");
    }

    #[test]
    fn test_info_bits_ignored_for_name() {
        // Low 16 bits are info bits and do not change the code identity.
        let with_info = StatusCode(StatusCode::BAD_TIMEOUT.bits() | 0x0042);
        assert_eq!(with_info.to_string(), "BadTimeout");
    }
}
