// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opclink-channel
//!
//! The `opc.tcp` secure channel transport for the OPCLINK client.
//!
//! This crate owns everything between a [`tokio::net::TcpStream`] and typed
//! service messages:
//!
//! - **Framing**: `HEL`/`ACK` handshake, `MessageChunk` headers, chunking and
//!   reassembly under the negotiated size budget
//! - **Security**: security policies, P_SHA key derivation, symmetric
//!   sign/encrypt, asymmetric OpenSecureChannel protection
//! - **Certificates**: the contracts the channel consumes from a host-supplied
//!   provider, plus in-memory/directory trust stores and a self-signed
//!   generator
//! - **Transport**: one reader task and one writer task per connection, a
//!   bounded writer queue, and a pending-request correlation map with
//!   deadlines
//!
//! Applications normally use `opclink-client` instead of this crate directly.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod certificate;
pub mod crypto;
pub mod error;
pub mod framing;
pub mod secure_channel;
pub mod security;
pub mod transport;

pub use certificate::{
    AcceptAllValidator, CertificateProvider, CertificateValidator, DirectoryTrustStore,
    MemoryTrustStore, OwnIdentity, SelfSignedGenerator, StaticCertificateProvider,
    StoreValidator, TrustStore, X509Certificate,
};
pub use error::{ChannelError, ChannelResult, ErrorSeverity};
pub use framing::{
    Acknowledge, Chunker, ErrorMessage, Hello, MessageChunkHeader, MessageType, Reassembler,
    SequenceHeader, TransportLimits,
};
pub use secure_channel::{ChannelState, SecureChannel};
pub use security::{DerivedKeys, SecurityPolicy};
pub use transport::{parse_endpoint_url, ChannelConfig, ChannelEvent, Transport};
