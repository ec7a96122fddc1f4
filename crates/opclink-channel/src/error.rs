// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Channel-level error types.
//!
//! Every failure carries or maps to an OPC UA [`StatusCode`], and classifies
//! into one of the dispositions the supervisor dispatches on: fatal to the
//! channel, transient, or local misuse. Each error also reports a
//! [`severity`](ChannelError::severity) and a
//! [`category`](ChannelError::category) for logging and metrics.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use opclink_types::StatusCode;

/// Result alias for channel operations.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

// =============================================================================
// ErrorSeverity
// =============================================================================

/// How serious an error is, for logging and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Expected during normal operation (shutdown, cancellation).
    Info,

    /// Transient degradation; the operation or connection can be retried.
    Warning,

    /// An operation or the channel failed.
    Error,

    /// Misconfiguration or a security violation; retries will not help.
    Critical,
}

impl ErrorSeverity {
    /// The tracing level this severity logs at.
    pub const fn to_tracing_level(&self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }
}

/// Errors produced by the secure channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// TCP connect failed.
    #[error("Connection failed to '{endpoint}': {source}")]
    ConnectFailed {
        /// Target endpoint URL.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Connect attempt exceeded the configured timeout.
    #[error("Connection to '{endpoint}' timed out after {timeout:?}")]
    ConnectTimeout {
        /// Target endpoint URL.
        endpoint: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The endpoint URL was not a valid `opc.tcp://` URL.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpointUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The socket closed underneath the channel.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O failure on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server rejected the handshake with an `ERR` message.
    #[error("Server rejected connection: {status} ({reason})")]
    ServerError {
        /// Status carried in the ERR message.
        status: StatusCode,
        /// Server-supplied reason text.
        reason: String,
    },

    /// Encoding, decoding, framing, or sequencing failed.
    #[error("Protocol failure: {0}")]
    Protocol(StatusCode),

    /// Signature verification, decryption, or certificate validation failed.
    #[error("Security failure: {0}")]
    Security(StatusCode),

    /// A request outlived its deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The request was cancelled by the caller.
    #[error("Request cancelled")]
    Cancelled,

    /// The channel faulted; pending and new requests fail with this status.
    #[error("Channel faulted: {0}")]
    Faulted(StatusCode),

    /// The channel was closed locally.
    #[error("Channel closed")]
    Closed,
}

impl ChannelError {
    /// The StatusCode equivalent used on the wire and in service results.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ConnectFailed { .. } | Self::Io(_) => StatusCode::BAD_COMMUNICATION_ERROR,
            Self::ConnectTimeout { .. } => StatusCode::BAD_TIMEOUT,
            Self::InvalidEndpointUrl { .. } => StatusCode::BAD_TCP_ENDPOINT_URL_INVALID,
            Self::ConnectionClosed => StatusCode::BAD_CONNECTION_CLOSED,
            Self::ServerError { status, .. } => *status,
            Self::Protocol(status) | Self::Security(status) | Self::Faulted(status) => *status,
            Self::Timeout(_) => StatusCode::BAD_TIMEOUT,
            Self::Cancelled => StatusCode::BAD_REQUEST_CANCELLED_BY_CLIENT,
            Self::Closed => StatusCode::BAD_SECURE_CHANNEL_CLOSED,
        }
    }

    /// Returns `true` when the whole channel must be torn down and rebuilt.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ConnectFailed { .. }
            | Self::ConnectTimeout { .. }
            | Self::ConnectionClosed
            | Self::Io(_)
            | Self::ServerError { .. }
            | Self::Faulted(_)
            | Self::Closed => true,
            Self::Protocol(status) | Self::Security(status) => matches!(
                *status,
                StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID
                    | StatusCode::BAD_SECURITY_CHECKS_FAILED
                    | StatusCode::BAD_SEQUENCE_NUMBER_INVALID
                    | StatusCode::BAD_SECURE_CHANNEL_ID_INVALID
                    | StatusCode::BAD_RESPONSE_TOO_LARGE
            ),
            Self::InvalidEndpointUrl { .. } | Self::Timeout(_) | Self::Cancelled => false,
        }
    }

    /// The severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ConnectFailed { .. }
            | Self::ConnectTimeout { .. }
            | Self::ConnectionClosed
            | Self::Io(_)
            | Self::Timeout(_) => ErrorSeverity::Warning,
            Self::ServerError { .. } | Self::Protocol(_) | Self::Faulted(_) => {
                ErrorSeverity::Error
            }
            Self::InvalidEndpointUrl { .. } | Self::Security(_) => ErrorSeverity::Critical,
            Self::Cancelled | Self::Closed => ErrorSeverity::Info,
        }
    }

    /// The error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConnectFailed { .. }
            | Self::ConnectTimeout { .. }
            | Self::ConnectionClosed
            | Self::Io(_) => "connection",
            Self::InvalidEndpointUrl { .. } => "configuration",
            Self::ServerError { .. } => "server",
            Self::Protocol(_) => "protocol",
            Self::Security(_) => "security",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Faulted(_) | Self::Closed => "channel",
        }
    }

    /// The tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Returns `true` when a retry at the supervisor level makes sense.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectFailed { .. }
            | Self::ConnectTimeout { .. }
            | Self::ConnectionClosed
            | Self::Io(_)
            | Self::Timeout(_)
            | Self::Faulted(_) => true,
            Self::ServerError { status, .. } => {
                *status == StatusCode::BAD_TCP_SERVER_TOO_BUSY
                    || *status == StatusCode::BAD_SERVER_HALTED
            }
            Self::InvalidEndpointUrl { .. }
            | Self::Protocol(_)
            | Self::Security(_)
            | Self::Cancelled
            | Self::Closed => false,
        }
    }
}

impl From<StatusCode> for ChannelError {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::BAD_SECURITY_CHECKS_FAILED
            | StatusCode::BAD_CERTIFICATE_INVALID
            | StatusCode::BAD_CERTIFICATE_UNTRUSTED
            | StatusCode::BAD_NONCE_INVALID => ChannelError::Security(status),
            StatusCode::BAD_TIMEOUT | StatusCode::BAD_REQUEST_TIMEOUT => {
                ChannelError::Timeout(Duration::ZERO)
            }
            StatusCode::BAD_REQUEST_CANCELLED_BY_CLIENT => ChannelError::Cancelled,
            other => ChannelError::Protocol(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ChannelError::ConnectionClosed.is_fatal());
        assert!(ChannelError::Protocol(StatusCode::BAD_SEQUENCE_NUMBER_INVALID).is_fatal());
        assert!(!ChannelError::Protocol(StatusCode::BAD_DECODING_ERROR).is_fatal());
        assert!(!ChannelError::Timeout(Duration::from_secs(5)).is_fatal());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ChannelError::Cancelled.status(),
            StatusCode::BAD_REQUEST_CANCELLED_BY_CLIENT
        );
        assert_eq!(
            ChannelError::Timeout(Duration::from_secs(1)).status(),
            StatusCode::BAD_TIMEOUT
        );
    }

    #[test]
    fn test_severity_and_category() {
        let timeout = ChannelError::Timeout(Duration::from_secs(1));
        assert_eq!(timeout.severity(), ErrorSeverity::Warning);
        assert_eq!(timeout.category(), "timeout");
        assert_eq!(timeout.tracing_level(), Level::WARN);

        let security = ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED);
        assert_eq!(security.severity(), ErrorSeverity::Critical);
        assert_eq!(security.category(), "security");
        assert_eq!(security.tracing_level(), Level::ERROR);

        assert_eq!(ChannelError::Cancelled.severity(), ErrorSeverity::Info);
        assert_eq!(ChannelError::ConnectionClosed.category(), "connection");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
    }
}
