// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opclink-client
//!
//! An OPC UA client for industrial automation servers: sessions, attribute
//! and view services, method calls, and long-lived subscriptions with
//! automatic reconnection.
//!
//! The entry point is [`OpcClient`]. A supervisor task owns the connection:
//! when the channel breaks it backs off, reconnects, re-establishes the
//! session, and recreates every subscription and monitored item; observers
//! keep receiving notifications from the same handles throughout.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use opclink_client::{ClientConfig, OpcClient, SubscriptionSettings};
//! use opclink_types::NodeId;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpcClient::connect(ClientConfig::new("opc.tcp://plc01:4840")).await?;
//!
//!     // One-shot read of the server time.
//!     let now = client.read_value(NodeId::SERVER_CURRENT_TIME).await?;
//!     println!("server time: {:?}", now.value);
//!
//!     // Subscribe to a sensor value.
//!     let subscription = client
//!         .subscribe_with(SubscriptionSettings::with_interval(Duration::from_millis(500)))
//!         .await?;
//!     let mut speed = subscription
//!         .monitor_latest("ns=2;s=Pump.Speed".parse()?)
//!         .await?;
//!     while speed.changed().await.is_ok() {
//!         println!("speed: {:?}", speed.borrow().value);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;
pub mod publish;
pub mod session;
pub mod subscription;
pub mod supervisor;

pub use config::{
    ClientConfig, ClientConfigBuilder, MonitoredItemSettings, ReconnectConfig,
    SubscriptionSettings,
};
pub use error::{ClientError, ClientResult};
pub use opclink_channel::ErrorSeverity;
pub use identity::{IdentityProvider, StaticIdentity, UserIdentity};
pub use session::{get_endpoints, select_endpoint, Session};
pub use subscription::{BoundedQueue, EventQueue, Observer, ValueQueue};
pub use supervisor::{
    BackWriteError, ConnectionState, OpcClient, OpcClientBuilder, SubscriptionHandle,
};

// Re-export the crates applications interact with directly.
pub use opclink_channel as channel;
pub use opclink_types as types;
