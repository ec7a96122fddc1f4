// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The async `opc.tcp` transport.
//!
//! One [`Transport`] owns one TCP connection. A single writer task consumes a
//! bounded queue of encoded requests (backpressure for callers), a single
//! reader task demultiplexes response chunks into a pending-request map, and
//! a renewal task re-opens the security token at 75% of its lifetime. Service
//! calls suspend at most twice: once for writer capacity, once for the
//! response or deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use opclink_types::encoding::BinaryEncodable;
use opclink_types::service::{
    MessageSecurityMode, OpenSecureChannelRequest, RequestHeader, RequestMessage, ResponseMessage,
    SecurityTokenRequestType,
};
use opclink_types::{NodeId, StatusCode, UaString};

use crate::certificate::{CertificateValidator, OwnIdentity, X509Certificate};
use crate::error::{ChannelError, ChannelResult};
use crate::framing::{
    Acknowledge, ChunkType, ErrorMessage, Hello, MessageChunkHeader, MessageType, Reassembler,
    ReassemblyResult, TransportLimits, MESSAGE_HEADER_SIZE,
};
use crate::secure_channel::{ChannelState, SecureChannel};
use crate::security::SecurityPolicy;

/// How often the reader sweeps for expired pending requests.
const PENDING_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

// =============================================================================
// Configuration
// =============================================================================

/// Settings for one transport connection.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// The `opc.tcp://host:port/path` endpoint URL.
    pub endpoint_url: String,

    /// The security policy to run under.
    pub security_policy: SecurityPolicy,

    /// The message security mode to run under.
    pub security_mode: MessageSecurityMode,

    /// Requested security token lifetime.
    pub channel_lifetime: Duration,

    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Default per-request deadline.
    pub request_timeout: Duration,

    /// Proposed buffer sizes and message limits for the handshake.
    pub limits: TransportLimits,

    /// Depth of the bounded writer queue.
    pub write_queue_depth: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            channel_lifetime: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            limits: TransportLimits::default(),
            write_queue_depth: 32,
        }
    }
}

impl ChannelConfig {
    /// Config for the given endpoint with everything else at defaults.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Default::default()
        }
    }
}

/// Parses an `opc.tcp://host:port/path` URL into host, port, and path.
pub fn parse_endpoint_url(url: &str) -> ChannelResult<(String, u16, String)> {
    let rest = url
        .strip_prefix("opc.tcp://")
        .ok_or_else(|| ChannelError::InvalidEndpointUrl {
            url: url.to_string(),
            reason: "scheme must be opc.tcp://".to_string(),
        })?;
    let (authority, path) = match rest.find('/') {
        Some(index) => (&rest[..index], rest[index..].to_string()),
        None => (rest, String::new()),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ChannelError::InvalidEndpointUrl {
                    url: url.to_string(),
                    reason: format!("invalid port '{}'", port),
                })?;
            (host.to_string(), port)
        }
        None => (authority.to_string(), 4840),
    };
    if host.is_empty() {
        return Err(ChannelError::InvalidEndpointUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok((host, port, path))
}

// =============================================================================
// Events & internals
// =============================================================================

/// Connection-level events surfaced to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel is open and serving requests.
    Open,

    /// The channel faulted with the given terminal status.
    Faulted(StatusCode),

    /// The channel was closed locally.
    Closed,
}

struct WriteCommand {
    message_type: MessageType,
    request_id: u32,
    body: Vec<u8>,
}

struct PendingEntry {
    sender: oneshot::Sender<ChannelResult<ResponseMessage>>,
    deadline: Instant,
}

type PendingMap = Arc<DashMap<u32, PendingEntry>>;

/// Removes the pending entry when the caller's future is dropped before the
/// response arrives; a late response is then discarded on arrival.
struct PendingGuard {
    pending: PendingMap,
    request_id: u32,
    armed: bool,
}

impl PendingGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pending.remove(&self.request_id);
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// An open `opc.tcp` connection with request/response correlation.
pub struct Transport {
    config: ChannelConfig,
    channel: Arc<Mutex<SecureChannel>>,
    pending: PendingMap,
    write_tx: mpsc::Sender<WriteCommand>,
    events: watch::Receiver<ChannelEvent>,
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Connects, performs `HEL`/`ACK`, opens the secure channel, and spawns
    /// the reader/writer/renewal tasks.
    ///
    /// `server_certificate` is required (and validated) for any policy other
    /// than None; `own_identity` supplies our certificate and key.
    pub async fn connect(
        config: ChannelConfig,
        own_identity: Option<OwnIdentity>,
        server_certificate: Option<X509Certificate>,
        validator: &dyn CertificateValidator,
    ) -> ChannelResult<Self> {
        let (host, port, _path) = parse_endpoint_url(&config.endpoint_url)?;

        if config.security_policy.requires_certificates() {
            let certificate = server_certificate
                .as_ref()
                .ok_or(ChannelError::Security(StatusCode::BAD_CERTIFICATE_INVALID))?;
            validator
                .validate(certificate)
                .map_err(ChannelError::Security)?;
            if own_identity.is_none() {
                return Err(ChannelError::Security(StatusCode::BAD_SECURITY_CHECKS_FAILED));
            }
        }

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((host.as_str(), port)),
        )
        .await
        .map_err(|_| ChannelError::ConnectTimeout {
            endpoint: config.endpoint_url.clone(),
            timeout: config.connect_timeout,
        })?
        .map_err(|source| ChannelError::ConnectFailed {
            endpoint: config.endpoint_url.clone(),
            source,
        })?;
        stream.set_nodelay(true).ok();

        let mut channel = SecureChannel::new(config.security_policy, config.security_mode);
        channel.set_own_identity(own_identity);
        channel.set_remote_certificate(server_certificate);
        channel.set_limits(config.limits);
        channel.set_state(ChannelState::Hello);

        let mut stream = stream;
        Self::handshake(&mut stream, &config, &mut channel).await?;

        let mut reassembler = Reassembler::new();
        Self::open_channel(
            &mut stream,
            &config,
            &mut channel,
            &mut reassembler,
            SecurityTokenRequestType::Issue,
        )
        .await?;
        channel.set_state(ChannelState::Open);
        info!(
            endpoint = %config.endpoint_url,
            channel_id = channel.channel_id(),
            policy = %config.security_policy,
            "secure channel open"
        );

        let channel = Arc::new(Mutex::new(channel));
        let pending: PendingMap = Arc::new(DashMap::new());
        let (write_tx, write_rx) = mpsc::channel(config.write_queue_depth);
        let (event_tx, events) = watch::channel(ChannelEvent::Open);
        let closed = Arc::new(AtomicBool::new(false));

        let (read_half, write_half) = stream.into_split();
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(reader_loop(
            read_half,
            Arc::clone(&channel),
            Arc::clone(&pending),
            reassembler,
            event_tx.clone(),
            Arc::clone(&closed),
        )));
        tasks.push(tokio::spawn(writer_loop(
            write_half,
            write_rx,
            Arc::clone(&channel),
            Arc::clone(&pending),
            event_tx.clone(),
        )));
        tasks.push(tokio::spawn(renewal_loop(
            Arc::clone(&channel),
            Arc::clone(&pending),
            write_tx.clone(),
            config.clone(),
            Arc::clone(&closed),
        )));
        tasks.push(tokio::spawn(sweeper_loop(
            Arc::clone(&pending),
            Arc::clone(&closed),
        )));

        Ok(Self {
            config,
            channel,
            pending,
            write_tx,
            events,
            closed,
            tasks,
        })
    }

    /// The `HEL`/`ACK` exchange; adopts the negotiated limits.
    async fn handshake(
        stream: &mut TcpStream,
        config: &ChannelConfig,
        channel: &mut SecureChannel,
    ) -> ChannelResult<()> {
        let limits = channel.limits();
        let hello = Hello {
            protocol_version: 0,
            receive_buffer_size: limits.receive_buffer_size as u32,
            send_buffer_size: limits.send_buffer_size as u32,
            max_message_size: limits.max_message_size as u32,
            max_chunk_count: limits.max_chunk_count as u32,
            endpoint_url: UaString::from(config.endpoint_url.as_str()),
        };
        let mut frame = Vec::with_capacity(MESSAGE_HEADER_SIZE + hello.byte_len());
        MessageChunkHeader {
            message_type: MessageType::Hello,
            chunk_type: ChunkType::Final,
            size: (MESSAGE_HEADER_SIZE + hello.byte_len()) as u32,
        }
        .write(&mut frame)
        .map_err(ChannelError::Protocol)?;
        hello.write(&mut frame).map_err(ChannelError::Protocol)?;
        stream.write_all(&frame).await?;

        let frame = read_frame(stream, limits.receive_buffer_size).await?;
        let mut header_bytes = [0u8; MESSAGE_HEADER_SIZE];
        header_bytes.copy_from_slice(&frame[..MESSAGE_HEADER_SIZE]);
        let header = MessageChunkHeader::parse(&header_bytes)?;
        let mut cursor = std::io::Cursor::new(&frame[MESSAGE_HEADER_SIZE..]);
        match header.message_type {
            MessageType::Acknowledge => {
                let ack = Acknowledge::read(&mut cursor).map_err(ChannelError::Protocol)?;
                let negotiated = limits.negotiate(&ack);
                debug!(?negotiated, "transport limits negotiated");
                channel.set_limits(negotiated);
                Ok(())
            }
            MessageType::Error => {
                let error = ErrorMessage::read(&mut cursor, channel.decoding_options())
                    .map_err(ChannelError::Protocol)?;
                Err(ChannelError::ServerError {
                    status: error.error,
                    reason: error.reason.as_ref().to_string(),
                })
            }
            _ => Err(ChannelError::Protocol(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID)),
        }
    }

    /// Issues (or renews) the channel token, inline on the stream.
    async fn open_channel(
        stream: &mut TcpStream,
        config: &ChannelConfig,
        channel: &mut SecureChannel,
        reassembler: &mut Reassembler,
        request_type: SecurityTokenRequestType,
    ) -> ChannelResult<()> {
        channel.set_state(ChannelState::Opening);
        let client_nonce = channel.create_local_nonce();
        let request = RequestMessage::OpenSecureChannel(OpenSecureChannelRequest {
            request_header: RequestHeader::new(NodeId::null(), 0, 0),
            client_protocol_version: 0,
            request_type,
            security_mode: config.security_mode,
            client_nonce,
            requested_lifetime: config.channel_lifetime.as_millis() as u32,
        });
        let body = request.encode_to_vec().map_err(ChannelError::Protocol)?;
        let request_id = channel.next_request_id();
        let frames = channel.secure_message(MessageType::OpenSecureChannel, request_id, &body)?;
        for frame in frames {
            stream.write_all(&frame).await?;
        }

        // Read until the OPN response completes.
        loop {
            let limits = channel.limits();
            let frame = read_frame(stream, limits.receive_buffer_size).await?;
            if frame[..3] == *b"ERR" {
                let mut cursor = std::io::Cursor::new(&frame[MESSAGE_HEADER_SIZE..]);
                let error = ErrorMessage::read(&mut cursor, channel.decoding_options())
                    .map_err(ChannelError::Protocol)?;
                return Err(ChannelError::ServerError {
                    status: error.error,
                    reason: error.reason.as_ref().to_string(),
                });
            }
            let decoded = channel.decode_frame(&frame)?;
            match reassembler.accept(
                decoded.chunk_type,
                decoded.request_id,
                &decoded.payload,
                &limits,
            )? {
                ReassemblyResult::Incomplete => continue,
                ReassemblyResult::Aborted { status, .. } => {
                    return Err(ChannelError::Protocol(status));
                }
                ReassemblyResult::Complete { body, .. } => {
                    let mut cursor = std::io::Cursor::new(body);
                    let response =
                        ResponseMessage::decode(&mut cursor, channel.decoding_options())
                            .map_err(ChannelError::Protocol)?;
                    match response {
                        ResponseMessage::OpenSecureChannel(response) => {
                            let result = response.response_header.service_result;
                            if result.is_bad() {
                                return Err(ChannelError::ServerError {
                                    status: result,
                                    reason: "OpenSecureChannel rejected".to_string(),
                                });
                            }
                            channel.apply_open_response(&response)?;
                            return Ok(());
                        }
                        ResponseMessage::ServiceFault(fault) => {
                            return Err(ChannelError::ServerError {
                                status: fault.response_header.service_result,
                                reason: "OpenSecureChannel fault".to_string(),
                            });
                        }
                        _ => {
                            return Err(ChannelError::Protocol(StatusCode::BAD_UNKNOWN_RESPONSE))
                        }
                    }
                }
            }
        }
    }

    /// Sends a service request and awaits its response or deadline.
    ///
    /// The wire request is not retracted on timeout or caller drop; its late
    /// response is discarded when it arrives.
    pub async fn send_request(
        &self,
        request: RequestMessage,
        timeout: Option<Duration>,
    ) -> ChannelResult<ResponseMessage> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        if let ChannelEvent::Faulted(status) = *self.events.borrow() {
            return Err(ChannelError::Faulted(status));
        }

        let timeout = timeout.unwrap_or(self.config.request_timeout);
        let body = request.encode_to_vec().map_err(ChannelError::Protocol)?;

        let request_id = {
            let mut channel = self.channel.lock();
            if !channel.state().is_usable() {
                return Err(ChannelError::Faulted(StatusCode::BAD_SECURE_CHANNEL_CLOSED));
            }
            if body.len() > channel.max_sendable_body() {
                return Err(ChannelError::Protocol(StatusCode::BAD_REQUEST_TOO_LARGE));
            }
            channel.next_request_id()
        };

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingEntry {
                sender: response_tx,
                deadline: Instant::now() + timeout,
            },
        );
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            request_id,
            armed: true,
        };

        // First suspension point: writer queue capacity.
        self.write_tx
            .send(WriteCommand {
                message_type: MessageType::Message,
                request_id,
                body,
            })
            .await
            .map_err(|_| ChannelError::Closed)?;

        // Second suspension point: response, fault, or deadline.
        let result = match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(ChannelError::Timeout(timeout))
            }
        };
        guard.disarm();
        result
    }

    /// Watches connection-level events (open, faulted, closed).
    pub fn events(&self) -> watch::Receiver<ChannelEvent> {
        self.events.clone()
    }

    /// Returns `true` while the channel can carry requests.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && matches!(*self.events.borrow(), ChannelEvent::Open)
    }

    /// The negotiated transport limits.
    pub fn limits(&self) -> TransportLimits {
        self.channel.lock().limits()
    }

    /// The server nonce of the current channel generation.
    pub fn server_nonce(&self) -> Vec<u8> {
        self.channel.lock().remote_nonce().to_vec()
    }

    /// The server certificate, when one was presented.
    pub fn server_certificate(&self) -> Option<X509Certificate> {
        self.channel.lock().remote_certificate().cloned()
    }

    /// The configuration this transport was built with.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Closes the channel: best-effort `CLO`, then tears down the tasks.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let request = RequestMessage::CloseSecureChannel(
            opclink_types::service::CloseSecureChannelRequest {
                request_header: RequestHeader::new(NodeId::null(), 0, 0),
            },
        );
        if let Ok(body) = request.encode_to_vec() {
            let request_id = self.channel.lock().next_request_id();
            let _ = self
                .write_tx
                .send(WriteCommand {
                    message_type: MessageType::CloseSecureChannel,
                    request_id,
                    body,
                })
                .await;
        }
        // Give the writer a moment to flush the CLO frame.
        tokio::time::sleep(Duration::from_millis(20)).await;
        for task in &self.tasks {
            task.abort();
        }
        self.channel.lock().set_state(ChannelState::Closed);
        fail_all_pending(&self.pending, StatusCode::BAD_SECURE_CHANNEL_CLOSED);
        debug!(endpoint = %self.config.endpoint_url, "transport closed");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// =============================================================================
// Task bodies
// =============================================================================

/// Reads one full frame (header + body) from the stream.
async fn read_frame<S: AsyncReadExt + Unpin>(
    stream: &mut S,
    receive_buffer_size: usize,
) -> ChannelResult<Vec<u8>> {
    let mut header = [0u8; MESSAGE_HEADER_SIZE];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|_| ChannelError::ConnectionClosed)?;
    let parsed = MessageChunkHeader::parse(&header)?;
    let size = parsed.size as usize;
    if size > receive_buffer_size.max(MESSAGE_HEADER_SIZE) {
        return Err(ChannelError::Protocol(StatusCode::BAD_TCP_MESSAGE_TOO_LARGE));
    }
    let mut frame = vec![0u8; size];
    frame[..MESSAGE_HEADER_SIZE].copy_from_slice(&header);
    stream
        .read_exact(&mut frame[MESSAGE_HEADER_SIZE..])
        .await
        .map_err(|_| ChannelError::ConnectionClosed)?;
    Ok(frame)
}

fn fail_all_pending(pending: &PendingMap, status: StatusCode) {
    let request_ids: Vec<u32> = pending.iter().map(|entry| *entry.key()).collect();
    for request_id in request_ids {
        if let Some((_, entry)) = pending.remove(&request_id) {
            let _ = entry.sender.send(Err(ChannelError::Faulted(status)));
        }
    }
}

fn fault_channel(
    channel: &Arc<Mutex<SecureChannel>>,
    pending: &PendingMap,
    events: &watch::Sender<ChannelEvent>,
    status: StatusCode,
) {
    warn!(%status, "secure channel faulted");
    channel.lock().fault();
    fail_all_pending(pending, status);
    let _ = events.send(ChannelEvent::Faulted(status));
}

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    channel: Arc<Mutex<SecureChannel>>,
    pending: PendingMap,
    mut reassembler: Reassembler,
    events: watch::Sender<ChannelEvent>,
    closed: Arc<AtomicBool>,
) {
    loop {
        let receive_buffer_size = channel.lock().limits().receive_buffer_size;
        // read_exact is not cancellation-safe, so the reader never selects
        // over it; deadline sweeping lives in its own task.
        let frame = read_frame(&mut read_half, receive_buffer_size).await;

        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                if !closed.load(Ordering::Acquire) {
                    fault_channel(&channel, &pending, &events, error.status());
                }
                return;
            }
        };

        // ERR frames are unsecured; handle before the securing engine.
        if &frame[..3] == b"ERR" {
            let mut cursor = std::io::Cursor::new(&frame[MESSAGE_HEADER_SIZE..]);
            let status = ErrorMessage::read(&mut cursor, &Default::default())
                .map(|error| error.error)
                .unwrap_or(StatusCode::BAD_COMMUNICATION_ERROR);
            fault_channel(&channel, &pending, &events, status);
            return;
        }

        let (decoded, limits, options) = {
            let mut channel = channel.lock();
            let limits = channel.limits();
            let options = channel.decoding_options().clone();
            (channel.decode_frame(&frame), limits, options)
        };
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(error) => {
                if error.is_fatal() {
                    fault_channel(&channel, &pending, &events, error.status());
                    return;
                }
                warn!(error = %error, "discarding undecodable chunk");
                continue;
            }
        };
        trace!(
            request_id = decoded.request_id,
            chunk = ?decoded.chunk_type,
            len = decoded.payload.len(),
            "chunk received"
        );

        match reassembler.accept(
            decoded.chunk_type,
            decoded.request_id,
            &decoded.payload,
            &limits,
        ) {
            Ok(ReassemblyResult::Incomplete) => {}
            Ok(ReassemblyResult::Aborted { request_id, status }) => {
                if let Some((_, entry)) = pending.remove(&request_id) {
                    let _ = entry.sender.send(Err(ChannelError::Protocol(status)));
                }
            }
            Ok(ReassemblyResult::Complete { request_id, body }) => {
                let mut cursor = std::io::Cursor::new(body);
                match ResponseMessage::decode(&mut cursor, &options) {
                    Ok(response) => {
                        // Renewal responses update the securing state before
                        // the waiting request resolves.
                        if let ResponseMessage::OpenSecureChannel(open) = &response {
                            let apply_result = {
                                let mut guard = channel.lock();
                                let result = guard.apply_open_response(open);
                                if result.is_ok() {
                                    guard.set_state(ChannelState::Open);
                                }
                                result
                            };
                            if let Err(error) = apply_result {
                                fault_channel(&channel, &pending, &events, error.status());
                                return;
                            }
                        }
                        match pending.remove(&request_id) {
                            Some((_, entry)) => {
                                let _ = entry.sender.send(Ok(response));
                            }
                            None => {
                                // Cancelled or timed out; the spec says the
                                // late response is discarded.
                                trace!(request_id, "response for unknown request discarded");
                            }
                        }
                    }
                    Err(status) => {
                        if let Some((_, entry)) = pending.remove(&request_id) {
                            let _ = entry.sender.send(Err(ChannelError::Protocol(status)));
                        }
                    }
                }
            }
            Err(error) => {
                fault_channel(&channel, &pending, &events, error.status());
                return;
            }
        }
    }
}

async fn sweeper_loop(pending: PendingMap, closed: Arc<AtomicBool>) {
    let mut sweep = tokio::time::interval(PENDING_SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        sweep.tick().await;
        if closed.load(Ordering::Acquire) {
            return;
        }
        sweep_expired(&pending);
    }
}

fn sweep_expired(pending: &PendingMap) {
    let now = Instant::now();
    let expired: Vec<u32> = pending
        .iter()
        .filter(|entry| entry.value().deadline <= now)
        .map(|entry| *entry.key())
        .collect();
    for request_id in expired {
        if let Some((_, entry)) = pending.remove(&request_id) {
            let _ = entry
                .sender
                .send(Err(ChannelError::Timeout(Duration::ZERO)));
        }
    }
}

async fn writer_loop(
    mut write_half: OwnedWriteHalf,
    mut write_rx: mpsc::Receiver<WriteCommand>,
    channel: Arc<Mutex<SecureChannel>>,
    pending: PendingMap,
    events: watch::Sender<ChannelEvent>,
) {
    while let Some(command) = write_rx.recv().await {
        let frames = {
            let mut channel = channel.lock();
            channel.secure_message(command.message_type, command.request_id, &command.body)
        };
        let frames = match frames {
            Ok(frames) => frames,
            Err(error) => {
                // Local securing failure resolves only this request.
                if let Some((_, entry)) = pending.remove(&command.request_id) {
                    let _ = entry.sender.send(Err(error));
                }
                continue;
            }
        };
        for frame in frames {
            if let Err(error) = write_half.write_all(&frame).await {
                fault_channel(
                    &channel,
                    &pending,
                    &events,
                    ChannelError::Io(error).status(),
                );
                return;
            }
        }
    }
}

async fn renewal_loop(
    channel: Arc<Mutex<SecureChannel>>,
    pending: PendingMap,
    write_tx: mpsc::Sender<WriteCommand>,
    config: ChannelConfig,
    closed: Arc<AtomicBool>,
) {
    loop {
        let wait = channel.lock().renewal_deadline().max(Duration::from_secs(1));
        tokio::time::sleep(wait).await;
        if closed.load(Ordering::Acquire) {
            return;
        }
        let due = {
            let channel = channel.lock();
            channel.state() == ChannelState::Open && channel.token_renewal_due()
        };
        if !due {
            continue;
        }

        let (request_id, body) = {
            let mut channel = channel.lock();
            channel.set_state(ChannelState::Renewing);
            let client_nonce = channel.create_local_nonce();
            let request = RequestMessage::OpenSecureChannel(OpenSecureChannelRequest {
                request_header: RequestHeader::new(NodeId::null(), 0, 0),
                client_protocol_version: 0,
                request_type: SecurityTokenRequestType::Renew,
                security_mode: config.security_mode,
                client_nonce,
                requested_lifetime: config.channel_lifetime.as_millis() as u32,
            });
            let Ok(body) = request.encode_to_vec() else {
                channel.set_state(ChannelState::Open);
                continue;
            };
            (channel.next_request_id(), body)
        };

        debug!(request_id, "renewing secure channel token");
        let (response_tx, response_rx) = oneshot::channel();
        pending.insert(
            request_id,
            PendingEntry {
                sender: response_tx,
                deadline: Instant::now() + config.request_timeout,
            },
        );
        if write_tx
            .send(WriteCommand {
                message_type: MessageType::OpenSecureChannel,
                request_id,
                body,
            })
            .await
            .is_err()
        {
            return;
        }
        // The reader applies the new token; here we only await completion.
        match tokio::time::timeout(config.request_timeout, response_rx).await {
            Ok(Ok(Ok(_response))) => {
                debug!("secure channel token renewed");
            }
            Ok(Ok(Err(error))) => {
                warn!(error = %error, "token renewal failed");
            }
            Ok(Err(_)) | Err(_) => {
                pending.remove(&request_id);
                warn!("token renewal timed out");
            }
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
    fn test_parse_endpoint_url() {
        let (host, port, path) = parse_endpoint_url("opc.tcp://plc01:4840/ua/server").unwrap();
        assert_eq!(host, "plc01");
        assert_eq!(port, 4840);
        assert_eq!(path, "/ua/server");

        let (host, port, path) = parse_endpoint_url("opc.tcp://10.0.0.5").unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 4840);
        assert_eq!(path, "");
    }

    #[test]
    fn test_parse_endpoint_url_rejects_bad_input() {
        assert!(parse_endpoint_url("http://host:4840").is_err());
        assert!(parse_endpoint_url("opc.tcp://host:notaport").is_err());
        assert!(parse_endpoint_url("opc.tcp://").is_err());
    }

    #[test]
    fn test_default_config_matches_conventions() {
        let config = ChannelConfig::default();
        assert_eq!(config.channel_lifetime, Duration::from_secs(60));
        assert_eq!(config.limits.send_buffer_size, 64 * 1024);
        assert_eq!(config.limits.max_message_size, 16 * 1024 * 1024);
        assert_eq!(config.limits.max_chunk_count, 4096);
    }
}
