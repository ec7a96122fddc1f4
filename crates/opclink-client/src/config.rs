// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration with builder and validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use opclink_channel::{ChannelConfig, SecurityPolicy, TransportLimits};
use opclink_types::service::{MessageSecurityMode, MonitoringMode};

use crate::error::{ClientError, ClientResult};

// =============================================================================
// ClientConfig
// =============================================================================

/// Configuration for one OPC UA client connection.
///
/// # Examples
///
/// ```
/// use opclink_client::config::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .endpoint("opc.tcp://localhost:4840")
///     .application_name("opclink demo")
///     .build()
///     .unwrap();
/// assert_eq!(config.endpoint, "opc.tcp://localhost:4840");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint URL (`opc.tcp://host:port/path`).
    pub endpoint: String,

    /// Security policy for the channel.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// Message security mode for the channel.
    #[serde(default)]
    pub security_mode: MessageSecurityMode,

    /// Application name, used in the session and certificate subject.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI; derived from the host name when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_uri: Option<String>,

    /// Session name visible in server diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,

    /// Requested session idle timeout.
    #[serde(default = "default_session_timeout")]
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Interval between keep-alive reads on an idle session.
    #[serde(default = "default_keep_alive_interval")]
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,

    /// Per-request deadline.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout")]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Requested secure channel token lifetime.
    #[serde(default = "default_channel_lifetime")]
    #[serde(with = "humantime_serde")]
    pub channel_lifetime: Duration,

    /// Largest chunk we send.
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: usize,

    /// Largest chunk we accept.
    #[serde(default = "default_buffer_size")]
    pub receive_buffer_size: usize,

    /// Largest reassembled message.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Most chunks per message.
    #[serde(default = "default_max_chunk_count")]
    pub max_chunk_count: usize,

    /// Publish requests kept outstanding while subscriptions exist.
    #[serde(default = "default_publish_requests")]
    pub publish_requests: usize,

    /// Reconnect backoff settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Defaults for new subscriptions.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Defaults for new monitored items.
    #[serde(default)]
    pub monitored_item: MonitoredItemSettings,
}

fn default_application_name() -> String {
    "opclink".to_string()
}

fn default_session_timeout() -> Duration {
    Duration::from_millis(120_000)
}

fn default_keep_alive_interval() -> Duration {
    Duration::from_millis(10_000)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_channel_lifetime() -> Duration {
    Duration::from_millis(60_000)
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024
}

fn default_max_chunk_count() -> usize {
    4096
}

fn default_publish_requests() -> usize {
    2
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            security_policy: SecurityPolicy::default(),
            security_mode: MessageSecurityMode::default(),
            application_name: default_application_name(),
            application_uri: None,
            session_name: None,
            session_timeout: default_session_timeout(),
            keep_alive_interval: default_keep_alive_interval(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            channel_lifetime: default_channel_lifetime(),
            send_buffer_size: default_buffer_size(),
            receive_buffer_size: default_buffer_size(),
            max_message_size: default_max_message_size(),
            max_chunk_count: default_max_chunk_count(),
            publish_requests: default_publish_requests(),
            reconnect: ReconnectConfig::default(),
            subscription: SubscriptionSettings::default(),
            monitored_item: MonitoredItemSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// A config for the given endpoint with everything else at defaults.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Validates endpoint and security consistency.
    pub fn validate(&self) -> ClientResult<()> {
        if self.endpoint.is_empty() {
            return Err(ClientError::configuration("endpoint is required"));
        }
        if !self.endpoint.starts_with("opc.tcp://") {
            return Err(ClientError::configuration(
                "endpoint must start with opc.tcp://",
            ));
        }
        let policy_none = self.security_policy == SecurityPolicy::None;
        let mode_none = matches!(
            self.security_mode,
            MessageSecurityMode::None | MessageSecurityMode::Invalid
        );
        if policy_none != mode_none {
            return Err(ClientError::configuration(
                "security policy and mode must both be None or both be secured",
            ));
        }
        if self.session_timeout.is_zero() {
            return Err(ClientError::configuration(
                "session timeout must be greater than 0",
            ));
        }
        if self.publish_requests == 0 {
            return Err(ClientError::configuration(
                "at least one outstanding publish request is required",
            ));
        }
        Ok(())
    }

    /// The effective application URI.
    pub fn effective_application_uri(&self) -> String {
        self.application_uri.clone().unwrap_or_else(|| {
            let host = hostname();
            format!("urn:{}:{}", host, self.application_name.replace(' ', ""))
        })
    }

    /// The effective session name.
    pub fn effective_session_name(&self) -> String {
        self.session_name
            .clone()
            .unwrap_or_else(|| format!("{}-session", self.application_name))
    }

    /// The transport configuration this client config implies.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            endpoint_url: self.endpoint.clone(),
            security_policy: self.security_policy,
            security_mode: self.security_mode,
            channel_lifetime: self.channel_lifetime,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            limits: TransportLimits {
                send_buffer_size: self.send_buffer_size,
                receive_buffer_size: self.receive_buffer_size,
                max_message_size: self.max_message_size,
                max_chunk_count: self.max_chunk_count,
            },
            write_queue_depth: 32,
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Sets the security policy.
    pub fn security_policy(mut self, policy: SecurityPolicy) -> Self {
        self.config.security_policy = policy;
        self
    }

    /// Sets the message security mode.
    pub fn security_mode(mut self, mode: MessageSecurityMode) -> Self {
        self.config.security_mode = mode;
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    /// Sets the application URI.
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.application_uri = Some(uri.into());
        self
    }

    /// Sets the session name.
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = Some(name.into());
        self
    }

    /// Sets the session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Sets the keep-alive interval.
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.config.keep_alive_interval = interval;
        self
    }

    /// Sets the per-request deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the secure channel token lifetime.
    pub fn channel_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.channel_lifetime = lifetime;
        self
    }

    /// Sets the number of outstanding publish requests.
    pub fn publish_requests(mut self, count: usize) -> Self {
        self.config.publish_requests = count;
        self
    }

    /// Sets the reconnect backoff settings.
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// Sets the default subscription settings.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.config.subscription = settings;
        self
    }

    /// Sets the default monitored item settings.
    pub fn monitored_item(mut self, settings: MonitoredItemSettings) -> Self {
        self.config.monitored_item = settings;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> ClientResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// ReconnectConfig
// =============================================================================

/// Exponential backoff with jitter for the supervisor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    #[serde(default = "default_initial_delay")]
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Multiplier applied after each failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) randomizing each delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectConfig {
    /// The delay for a (0-based) attempt number, with jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter > 0.0 {
            use rand::Rng;
            let spread = capped * self.jitter.clamp(0.0, 1.0);
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped + jitter).max(0.05))
    }
}

// =============================================================================
// Subscription settings
// =============================================================================

/// Per-subscription parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing cycle.
    #[serde(default = "default_publishing_interval")]
    #[serde(with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Publishing cycles without a Publish before the server drops the
    /// subscription.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Cycles without notifications before a keep-alive is sent.
    #[serde(default = "default_keep_alive_count")]
    pub max_keep_alive_count: u32,

    /// Cap on notifications per Publish response; 0 = no limit.
    #[serde(default = "default_max_notifications")]
    pub max_notifications_per_publish: u32,

    /// Relative priority among the session's subscriptions.
    #[serde(default)]
    pub priority: u8,

    /// Whether publishing starts enabled.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_lifetime_count() -> u32 {
    60
}

fn default_keep_alive_count() -> u32 {
    10
}

fn default_max_notifications() -> u32 {
    65_535
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: default_lifetime_count(),
            max_keep_alive_count: default_keep_alive_count(),
            max_notifications_per_publish: default_max_notifications(),
            priority: 0,
            publishing_enabled: true,
        }
    }
}

impl SubscriptionSettings {
    /// Settings with a custom publishing interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            publishing_interval: interval,
            ..Default::default()
        }
    }

    /// Time without any notification or keep-alive after which the
    /// subscription counts as dead.
    pub fn dead_after(&self) -> Duration {
        self.publishing_interval * self.lifetime_count.max(1)
    }

    /// Time after which the server owes us a keep-alive.
    pub fn keep_alive_after(&self) -> Duration {
        self.publishing_interval * self.max_keep_alive_count.max(1)
    }
}

/// Per-monitored-item parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredItemSettings {
    /// Sampling cycle requested from the server.
    #[serde(default = "default_sampling_interval")]
    #[serde(with = "humantime_serde")]
    pub sampling_interval: Duration,

    /// Server-side queue depth.
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    /// Drop the oldest (true) or newest (false) entry on overflow.
    #[serde(default = "default_true")]
    pub discard_oldest: bool,

    /// Sampling/reporting mode.
    #[serde(default)]
    pub monitoring_mode: MonitoringMode,

    /// Data change or event filter sent with item creation; `None` for the
    /// server default.
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<opclink_types::ExtensionObject>,
}

fn default_sampling_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_queue_size() -> u32 {
    10
}

impl Default for MonitoredItemSettings {
    fn default() -> Self {
        Self {
            sampling_interval: default_sampling_interval(),
            queue_size: default_queue_size(),
            discard_oldest: true,
            monitoring_mode: MonitoringMode::Reporting,
            filter: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .build()
            .unwrap();
        assert_eq!(config.session_timeout, Duration::from_millis(120_000));
        assert_eq!(config.keep_alive_interval, Duration::from_millis(10_000));
        assert_eq!(config.publish_requests, 2);
        assert_eq!(config.max_chunk_count, 4096);
    }

    #[test]
    fn test_validation_rejects_mismatched_security() {
        let result = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .security_mode(MessageSecurityMode::SignAndEncrypt)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_rejects_bad_scheme() {
        assert!(ClientConfig::builder()
            .endpoint("http://localhost")
            .build()
            .is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let reconnect = ReconnectConfig {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(reconnect.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(reconnect.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(reconnect.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_jitter_stays_near_cap() {
        let reconnect = ReconnectConfig::default();
        for _ in 0..50 {
            let delay = reconnect.delay_for_attempt(20);
            assert!(delay <= Duration::from_secs(36));
            assert!(delay >= Duration::from_secs(24));
        }
    }

    #[test]
    fn test_subscription_deadlines() {
        let settings = SubscriptionSettings {
            publishing_interval: Duration::from_millis(500),
            lifetime_count: 60,
            max_keep_alive_count: 10,
            ..Default::default()
        };
        assert_eq!(settings.keep_alive_after(), Duration::from_secs(5));
        assert_eq!(settings.dead_after(), Duration::from_secs(30));
    }

}
