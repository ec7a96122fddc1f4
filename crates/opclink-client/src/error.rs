// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client-level error types.
//!
//! Transport failures arrive as [`opclink_channel::ChannelError`]; everything
//! the server reports comes back as an OPC UA status. The supervisor
//! dispatches on [`ClientError::is_retryable`] and the subscription layer on
//! the specific subscription statuses. Like the channel errors, every value
//! reports a [`severity`](ClientError::severity) and a
//! [`category`](ClientError::category) for logging and metrics.

use thiserror::Error;
use tracing::Level;

use opclink_channel::{ChannelError, ErrorSeverity};
use opclink_types::StatusCode;

/// Result alias for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors produced by the session and subscription layers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure.
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// The server answered a service with a bad status.
    #[error("{operation} failed: {status}")]
    Service {
        /// The service that failed.
        operation: &'static str,
        /// The status the server returned.
        status: StatusCode,
    },

    /// No usable session (not connected, or the supervisor is rebuilding).
    #[error("Not connected to the server")]
    NotConnected,

    /// Session create/activate failed.
    #[error("Session establishment failed: {status}")]
    SessionRejected {
        /// The rejecting status.
        status: StatusCode,
    },

    /// The user identity was rejected by the server.
    #[error("User identity rejected: {status}")]
    IdentityRejected {
        /// The rejecting status.
        status: StatusCode,
    },

    /// No endpoint matched the configured security policy and mode.
    #[error("No endpoint matches policy '{policy}' mode '{mode}'")]
    NoMatchingEndpoint {
        /// Requested policy name.
        policy: String,
        /// Requested mode name.
        mode: String,
    },

    /// A subscription or monitored item id is no longer known locally.
    #[error("Unknown subscription handle {0}")]
    UnknownSubscription(u32),

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong.
        message: String,
    },

    /// The client is shutting down.
    #[error("Client closed")]
    Closed,
}

impl ClientError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a service failure for an operation.
    pub fn service(operation: &'static str, status: StatusCode) -> Self {
        Self::Service { operation, status }
    }

    /// The status code equivalent.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Channel(error) => error.status(),
            Self::Service { status, .. }
            | Self::SessionRejected { status }
            | Self::IdentityRejected { status } => *status,
            Self::NotConnected => StatusCode::BAD_SERVER_NOT_CONNECTED,
            Self::NoMatchingEndpoint { .. } => StatusCode::BAD_SECURITY_CHECKS_FAILED,
            Self::UnknownSubscription(_) => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            Self::Configuration { .. } => StatusCode::BAD_INVALID_STATE,
            Self::Closed => StatusCode::BAD_SHUTDOWN,
        }
    }

    /// The severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Channel(error) => error.severity(),
            Self::Service { status, .. } => {
                if matches!(
                    *status,
                    StatusCode::BAD_TIMEOUT
                        | StatusCode::BAD_REQUEST_TIMEOUT
                        | StatusCode::BAD_COMMUNICATION_ERROR
                ) {
                    ErrorSeverity::Warning
                } else {
                    ErrorSeverity::Error
                }
            }
            Self::NotConnected | Self::UnknownSubscription(_) => ErrorSeverity::Warning,
            Self::SessionRejected { .. } => ErrorSeverity::Error,
            Self::IdentityRejected { .. }
            | Self::NoMatchingEndpoint { .. }
            | Self::Configuration { .. } => ErrorSeverity::Critical,
            Self::Closed => ErrorSeverity::Info,
        }
    }

    /// The error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Channel(error) => error.category(),
            Self::Service { .. } => "service",
            Self::NotConnected => "connection",
            Self::SessionRejected { .. } => "session",
            Self::IdentityRejected { .. } | Self::NoMatchingEndpoint { .. } => "security",
            Self::UnknownSubscription(_) => "subscription",
            Self::Configuration { .. } => "configuration",
            Self::Closed => "client",
        }
    }

    /// The tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Returns `true` when a reconnect may clear the failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Channel(error) => error.is_retryable(),
            Self::Service { status, .. } => matches!(
                *status,
                StatusCode::BAD_TIMEOUT
                    | StatusCode::BAD_REQUEST_TIMEOUT
                    | StatusCode::BAD_COMMUNICATION_ERROR
                    | StatusCode::BAD_SERVER_HALTED
                    | StatusCode::BAD_SESSION_ID_INVALID
                    | StatusCode::BAD_SESSION_CLOSED
                    | StatusCode::BAD_SECURE_CHANNEL_CLOSED
            ),
            Self::NotConnected | Self::SessionRejected { .. } => true,
            Self::IdentityRejected { .. }
            | Self::NoMatchingEndpoint { .. }
            | Self::UnknownSubscription(_)
            | Self::Configuration { .. }
            | Self::Closed => false,
        }
    }

    /// Returns `true` for failures that require tearing down the session.
    pub fn needs_reconnect(&self) -> bool {
        match self {
            Self::Channel(error) => error.is_fatal(),
            Self::Service { status, .. } => matches!(
                *status,
                StatusCode::BAD_SESSION_ID_INVALID
                    | StatusCode::BAD_SESSION_CLOSED
                    | StatusCode::BAD_SESSION_NOT_ACTIVATED
                    | StatusCode::BAD_SECURE_CHANNEL_CLOSED
                    | StatusCode::BAD_SECURE_CHANNEL_ID_INVALID
            ),
            _ => false,
        }
    }
}

impl From<StatusCode> for ClientError {
    fn from(status: StatusCode) -> Self {
        ClientError::Service {
            operation: "service",
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ClientError::NotConnected.is_retryable());
        assert!(ClientError::service("Read", StatusCode::BAD_TIMEOUT).is_retryable());
        assert!(!ClientError::service("Read", StatusCode::BAD_NODE_ID_UNKNOWN).is_retryable());
        assert!(!ClientError::Configuration {
            message: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_reconnect_classification() {
        assert!(ClientError::service("Read", StatusCode::BAD_SESSION_ID_INVALID).needs_reconnect());
        assert!(!ClientError::service("Read", StatusCode::BAD_NODE_ID_UNKNOWN).needs_reconnect());
    }

    #[test]
    fn test_severity_and_category() {
        assert_eq!(ClientError::NotConnected.severity(), ErrorSeverity::Warning);
        assert_eq!(ClientError::NotConnected.category(), "connection");

        let timeout = ClientError::service("Read", StatusCode::BAD_TIMEOUT);
        assert_eq!(timeout.severity(), ErrorSeverity::Warning);
        assert_eq!(timeout.category(), "service");

        let unknown_node = ClientError::service("Read", StatusCode::BAD_NODE_ID_UNKNOWN);
        assert_eq!(unknown_node.severity(), ErrorSeverity::Error);
        assert_eq!(unknown_node.tracing_level(), Level::ERROR);

        let rejected = ClientError::IdentityRejected {
            status: StatusCode::BAD_USER_ACCESS_DENIED,
        };
        assert_eq!(rejected.severity(), ErrorSeverity::Critical);
        assert_eq!(rejected.category(), "security");
    }

    #[test]
    fn test_channel_errors_pass_severity_through() {
        let error = ClientError::Channel(ChannelError::ConnectionClosed);
        assert_eq!(error.severity(), ErrorSeverity::Warning);
        assert_eq!(error.category(), "connection");
    }
}
