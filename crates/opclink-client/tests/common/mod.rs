// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process mock `opc.tcp` server for integration tests.
//!
//! Speaks the real wire protocol (security None) using the same framing and
//! type crates as the client: `HEL`/`ACK`, OpenSecureChannel, sessions,
//! read/write against a shared node store, browse of the root folder, and
//! subscriptions with a periodic publisher.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use opclink_channel::framing::{
    AsymmetricSecurityHeader, ChunkType, MessageChunkHeader, MessageType, SequenceHeader,
    MESSAGE_HEADER_SIZE,
};
use opclink_channel::SecurityPolicy;
use opclink_types::encoding::{read_u32, write_u32, BinaryEncodable};
use opclink_types::service::*;
use opclink_types::{
    ByteString, DataValue, DecodingOptions, ExtensionObject, LocalizedText, NodeId, QualifiedName,
    StatusCode, UaDateTime, UaString, Variant,
};

// =============================================================================
// Shared server state
// =============================================================================

/// Node store and subscription bookkeeping shared across restarts.
#[derive(Default)]
pub struct ServerState {
    values: Mutex<HashMap<NodeId, Variant>>,
    next_subscription_id: AtomicU32,
    next_item_id: AtomicU32,
}

impl ServerState {
    pub fn new() -> Arc<Self> {
        let state = Self::default();
        state.values.lock().insert(
            NodeId::string(2, "TestInt"),
            Variant::Int32(0),
        );
        state.next_subscription_id.store(100, Ordering::Relaxed);
        state.next_item_id.store(1000, Ordering::Relaxed);
        Arc::new(state)
    }

    fn read_value(&self, node_id: &NodeId) -> Option<Variant> {
        if *node_id == NodeId::SERVER_CURRENT_TIME {
            return Some(Variant::DateTime(UaDateTime::now()));
        }
        if *node_id == NodeId::SERVER_STATUS_STATE {
            return Some(Variant::Int32(0));
        }
        self.values.lock().get(node_id).cloned()
    }

    fn write_value(&self, node_id: &NodeId, value: Variant) -> StatusCode {
        // Namespace 2 is the writable test namespace.
        if node_id.namespace == 2 {
            self.values.lock().insert(node_id.clone(), value);
            StatusCode::GOOD
        } else {
            StatusCode::BAD_NOT_WRITABLE
        }
    }
}

// =============================================================================
// Mock server
// =============================================================================

pub struct MockServer {
    pub endpoint_url: String,
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl MockServer {
    /// Binds an ephemeral port and starts accepting connections.
    pub async fn spawn() -> Self {
        let state = ServerState::new();
        Self::spawn_on("127.0.0.1:0".parse().unwrap(), state).await
    }

    /// Starts (or restarts) a server on a specific address.
    pub async fn spawn_on(addr: SocketAddr, state: Arc<ServerState>) -> Self {
        let listener = TcpListener::bind(addr).await.expect("bind mock server");
        let addr = listener.local_addr().unwrap();
        let endpoint_url = format!("opc.tcp://{}", addr);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_state = Arc::clone(&state);
        let accept_url = endpoint_url.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let connection = Connection::new(Arc::clone(&accept_state), accept_url.clone());
                tokio::spawn(connection.run(stream, shutdown_rx.clone()));
            }
        });
        Self {
            endpoint_url,
            addr,
            state,
            accept_task,
            shutdown,
        }
    }

    /// Stops accepting and closes every live connection.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
        self.accept_task.abort();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Per-connection handling
// =============================================================================

struct MockSubscription {
    publishing_interval: Duration,
    /// `(client_handle, node_id)` pairs.
    items: Vec<(u32, NodeId)>,
    sequence: u32,
}

#[derive(Default)]
struct PublishQueue {
    /// Parked notification messages ready for the next Publish.
    ready: VecDeque<(u32, NotificationMessage)>,
}

type SharedWriter = Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>;

struct Connection {
    state: Arc<ServerState>,
    endpoint_url: String,
    send_sequence: AtomicU32,
    subscriptions: Mutex<HashMap<u32, MockSubscription>>,
    publish_queue: Mutex<PublishQueue>,
    publish_ready: Notify,
    closing: AtomicBool,
}

impl Connection {
    fn new(state: Arc<ServerState>, endpoint_url: String) -> Arc<Self> {
        Arc::new(Self {
            state,
            endpoint_url,
            send_sequence: AtomicU32::new(0),
            subscriptions: Mutex::new(HashMap::new()),
            publish_queue: Mutex::new(PublishQueue::default()),
            publish_ready: Notify::new(),
            closing: AtomicBool::new(false),
        })
    }
}

async fn read_frame(stream: &mut (impl AsyncReadExt + Unpin)) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; MESSAGE_HEADER_SIZE];
    stream.read_exact(&mut header).await?;
    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut frame = vec![0u8; size];
    frame[..MESSAGE_HEADER_SIZE].copy_from_slice(&header);
    stream.read_exact(&mut frame[MESSAGE_HEADER_SIZE..]).await?;
    Ok(frame)
}

impl Connection {
    async fn run(self: Arc<Self>, mut stream: TcpStream, mut shutdown: watch::Receiver<bool>) {
        // HEL / ACK.
        let Ok(hello_frame) = read_frame(&mut stream).await else {
            return;
        };
        if &hello_frame[..3] != b"HEL" {
            return;
        }
        let mut ack = Vec::new();
        MessageChunkHeader {
            message_type: MessageType::Acknowledge,
            chunk_type: ChunkType::Final,
            size: (MESSAGE_HEADER_SIZE + 20) as u32,
        }
        .write(&mut ack)
        .unwrap();
        for value in [0u32, 65536, 65536, 16 << 20, 4096] {
            write_u32(&mut ack, value).unwrap();
        }
        if stream.write_all(&ack).await.is_err() {
            return;
        }

        let (mut read_half, write_half) = stream.into_split();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Some(write_half)));

        // Publisher tick: samples every subscription at its interval.
        let ticker = tokio::spawn(Arc::clone(&self).publisher());

        loop {
            tokio::select! {
                frame = read_frame(&mut read_half) => {
                    let Ok(frame) = frame else {
                        break;
                    };
                    let connection = Arc::clone(&self);
                    let writer = Arc::clone(&writer);
                    tokio::spawn(async move {
                        connection.handle_frame(frame, writer).await;
                    });
                }
                _ = shutdown.changed() => break,
            }
        }

        // Drop the write half so the client observes a closed socket, and
        // release any parked Publish handlers.
        ticker.abort();
        self.closing.store(true, Ordering::SeqCst);
        *writer.lock().await = None;
        self.publish_ready.notify_waiters();
    }

    /// Generates notifications for all subscriptions on their intervals.
    async fn publisher(self: Arc<Self>) {
        loop {
            let shortest = {
                let subscriptions = self.subscriptions.lock();
                subscriptions
                    .values()
                    .map(|s| s.publishing_interval)
                    .min()
                    .unwrap_or(Duration::from_millis(100))
            };
            tokio::time::sleep(shortest).await;

            let mut batches = Vec::new();
            {
                let mut subscriptions = self.subscriptions.lock();
                for (id, subscription) in subscriptions.iter_mut() {
                    if subscription.items.is_empty() {
                        continue;
                    }
                    let items: Vec<MonitoredItemNotification> = subscription
                        .items
                        .iter()
                        .filter_map(|(client_handle, node_id)| {
                            self.state.read_value(node_id).map(|value| {
                                MonitoredItemNotification {
                                    client_handle: *client_handle,
                                    value: DataValue {
                                        value: Some(value),
                                        status: Some(StatusCode::GOOD),
                                        source_timestamp: Some(UaDateTime::now()),
                                        ..Default::default()
                                    },
                                }
                            })
                        })
                        .collect();
                    subscription.sequence += 1;
                    let change = DataChangeNotification {
                        monitored_items: Some(items),
                        diagnostic_infos: None,
                    };
                    let message = NotificationMessage {
                        sequence_number: subscription.sequence,
                        publish_time: UaDateTime::now(),
                        notification_data: Some(vec![ExtensionObject::from_encodable(
                            NodeId::numeric(0, object_id::DATA_CHANGE_NOTIFICATION),
                            &change,
                        )
                        .unwrap()]),
                    };
                    batches.push((*id, message));
                }
            }
            if !batches.is_empty() {
                let mut queue = self.publish_queue.lock();
                for batch in batches {
                    queue.ready.push_back(batch);
                }
                drop(queue);
                self.publish_ready.notify_waiters();
            }
        }
    }

    async fn handle_frame(self: Arc<Self>, frame: Vec<u8>, writer: SharedWriter) {
        let options = DecodingOptions::default();
        match &frame[..3] {
            b"OPN" => {
                let mut cursor = std::io::Cursor::new(&frame[12..]);
                let Ok(_header) = AsymmetricSecurityHeader::read(&mut cursor, &options) else {
                    return;
                };
                let Ok(sequence) = SequenceHeader::read(&mut cursor) else {
                    return;
                };
                let body_start = 12 + cursor.position() as usize;
                let mut body = std::io::Cursor::new(&frame[body_start..]);
                let Ok(RequestMessage::OpenSecureChannel(request)) =
                    RequestMessage::decode(&mut body, &options)
                else {
                    return;
                };
                let response = ResponseMessage::OpenSecureChannel(OpenSecureChannelResponse {
                    response_header: response_header(&request.request_header),
                    server_protocol_version: 0,
                    security_token: ChannelSecurityToken {
                        channel_id: 1,
                        token_id: 1,
                        created_at: UaDateTime::now(),
                        revised_lifetime: 3_600_000,
                    },
                    server_nonce: ByteString::null(),
                });
                self.send_response(
                    &writer,
                    MessageType::OpenSecureChannel,
                    sequence.request_id,
                    &response,
                )
                .await;
            }
            b"MSG" => {
                let mut cursor = std::io::Cursor::new(&frame[12..]);
                let Ok(_token_id) = read_u32(&mut cursor) else {
                    return;
                };
                let Ok(sequence) = SequenceHeader::read(&mut cursor) else {
                    return;
                };
                let body_start = 12 + cursor.position() as usize;
                let mut body = std::io::Cursor::new(&frame[body_start..]);
                let Ok(request) = RequestMessage::decode(&mut body, &options) else {
                    return;
                };
                if let Some(response) = self.dispatch(request).await {
                    self.send_response(&writer, MessageType::Message, sequence.request_id, &response)
                        .await;
                }
            }
            b"CLO" => {}
            _ => {}
        }
    }

    async fn send_response(
        &self,
        writer: &SharedWriter,
        message_type: MessageType,
        request_id: u32,
        response: &ResponseMessage,
    ) {
        let body = response.encode_to_vec().unwrap();
        let mut guard = writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return;
        };
        let sequence_number = self.send_sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let mut frame = Vec::with_capacity(64 + body.len());
        match message_type {
            MessageType::OpenSecureChannel => {
                let security = AsymmetricSecurityHeader {
                    security_policy_uri: UaString::from(SecurityPolicy::None.uri()),
                    sender_certificate: ByteString::null(),
                    receiver_certificate_thumbprint: ByteString::null(),
                };
                let total = 12 + security.byte_len() + 8 + body.len();
                MessageChunkHeader {
                    message_type,
                    chunk_type: ChunkType::Final,
                    size: total as u32,
                }
                .write(&mut frame)
                .unwrap();
                write_u32(&mut frame, 1).unwrap();
                security.write(&mut frame).unwrap();
            }
            _ => {
                let total = 12 + 4 + 8 + body.len();
                MessageChunkHeader {
                    message_type: MessageType::Message,
                    chunk_type: ChunkType::Final,
                    size: total as u32,
                }
                .write(&mut frame)
                .unwrap();
                write_u32(&mut frame, 1).unwrap();
                write_u32(&mut frame, 1).unwrap();
            }
        }
        SequenceHeader {
            sequence_number,
            request_id,
        }
        .write(&mut frame)
        .unwrap();
        frame.extend_from_slice(&body);
        let _ = writer.write_all(&frame).await;
    }

    async fn dispatch(&self, request: RequestMessage) -> Option<ResponseMessage> {
        Some(match request {
            RequestMessage::GetEndpoints(request) => {
                ResponseMessage::GetEndpoints(GetEndpointsResponse {
                    response_header: response_header(&request.request_header),
                    endpoints: Some(vec![EndpointDescription {
                        endpoint_url: UaString::from(self.endpoint_url.as_str()),
                        server: ApplicationDescription::client("urn:mock:server", "mock"),
                        server_certificate: ByteString::null(),
                        security_mode: MessageSecurityMode::None,
                        security_policy_uri: UaString::from(SecurityPolicy::None.uri()),
                        user_identity_tokens: Some(vec![
                            UserTokenPolicy {
                                policy_id: UaString::from("anonymous"),
                                token_type: UserTokenType::Anonymous,
                                issued_token_type: UaString::null(),
                                issuer_endpoint_url: UaString::null(),
                                security_policy_uri: UaString::null(),
                            },
                            UserTokenPolicy {
                                policy_id: UaString::from("username"),
                                token_type: UserTokenType::UserName,
                                issued_token_type: UaString::null(),
                                issuer_endpoint_url: UaString::null(),
                                security_policy_uri: UaString::null(),
                            },
                        ]),
                        transport_profile_uri: UaString::null(),
                        security_level: 0,
                    }]),
                })
            }
            RequestMessage::CreateSession(request) => {
                ResponseMessage::CreateSession(CreateSessionResponse {
                    response_header: response_header(&request.request_header),
                    session_id: NodeId::numeric(1, 4242),
                    authentication_token: NodeId::opaque(0, vec![7u8; 16]),
                    revised_session_timeout: request.requested_session_timeout,
                    server_nonce: ByteString::from(vec![1u8; 32]),
                    server_certificate: ByteString::null(),
                    server_endpoints: None,
                    server_software_certificates: None,
                    server_signature: SignatureData::null(),
                    max_request_message_size: 0,
                })
            }
            RequestMessage::ActivateSession(request) => {
                ResponseMessage::ActivateSession(ActivateSessionResponse {
                    response_header: response_header(&request.request_header),
                    server_nonce: ByteString::from(vec![2u8; 32]),
                    results: None,
                    diagnostic_infos: None,
                })
            }
            RequestMessage::CloseSession(request) => {
                ResponseMessage::CloseSession(CloseSessionResponse {
                    response_header: response_header(&request.request_header),
                })
            }
            RequestMessage::Read(request) => {
                let results = request
                    .nodes_to_read
                    .unwrap_or_default()
                    .iter()
                    .map(|read_id| match self.state.read_value(&read_id.node_id) {
                        Some(value) => DataValue {
                            value: Some(value),
                            status: Some(StatusCode::GOOD),
                            source_timestamp: Some(UaDateTime::now()),
                            server_timestamp: Some(UaDateTime::now()),
                            ..Default::default()
                        },
                        None => DataValue {
                            status: Some(StatusCode::BAD_NODE_ID_UNKNOWN),
                            ..Default::default()
                        },
                    })
                    .collect();
                ResponseMessage::Read(ReadResponse {
                    response_header: response_header(&request.request_header),
                    results: Some(results),
                    diagnostic_infos: None,
                })
            }
            RequestMessage::Write(request) => {
                let results = request
                    .nodes_to_write
                    .unwrap_or_default()
                    .iter()
                    .map(|write| {
                        let value = write.value.value.clone().unwrap_or_default();
                        self.state.write_value(&write.node_id, value)
                    })
                    .collect();
                ResponseMessage::Write(WriteResponse {
                    response_header: response_header(&request.request_header),
                    results: Some(results),
                    diagnostic_infos: None,
                })
            }
            RequestMessage::Browse(request) => {
                let results = request
                    .nodes_to_browse
                    .unwrap_or_default()
                    .iter()
                    .map(|description| {
                        if description.node_id == NodeId::ROOT_FOLDER {
                            BrowseResult {
                                status_code: StatusCode::GOOD,
                                continuation_point: ByteString::null(),
                                references: Some(root_references()),
                            }
                        } else {
                            BrowseResult {
                                status_code: StatusCode::GOOD,
                                continuation_point: ByteString::null(),
                                references: Some(Vec::new()),
                            }
                        }
                    })
                    .collect();
                ResponseMessage::Browse(BrowseResponse {
                    response_header: response_header(&request.request_header),
                    results: Some(results),
                    diagnostic_infos: None,
                })
            }
            RequestMessage::CreateSubscription(request) => {
                let subscription_id = self
                    .state
                    .next_subscription_id
                    .fetch_add(1, Ordering::SeqCst);
                self.subscriptions.lock().insert(
                    subscription_id,
                    MockSubscription {
                        publishing_interval: Duration::from_secs_f64(
                            (request.requested_publishing_interval / 1000.0).max(0.01),
                        ),
                        items: Vec::new(),
                        sequence: 0,
                    },
                );
                ResponseMessage::CreateSubscription(CreateSubscriptionResponse {
                    response_header: response_header(&request.request_header),
                    subscription_id,
                    revised_publishing_interval: request.requested_publishing_interval,
                    revised_lifetime_count: request.requested_lifetime_count,
                    revised_max_keep_alive_count: request.requested_max_keep_alive_count,
                })
            }
            RequestMessage::CreateMonitoredItems(request) => {
                let mut subscriptions = self.subscriptions.lock();
                let results = match subscriptions.get_mut(&request.subscription_id) {
                    Some(subscription) => request
                        .items_to_create
                        .unwrap_or_default()
                        .iter()
                        .map(|item| {
                            let monitored_item_id =
                                self.state.next_item_id.fetch_add(1, Ordering::SeqCst);
                            subscription.items.push((
                                item.requested_parameters.client_handle,
                                item.item_to_monitor.node_id.clone(),
                            ));
                            MonitoredItemCreateResult {
                                status_code: StatusCode::GOOD,
                                monitored_item_id,
                                revised_sampling_interval: item
                                    .requested_parameters
                                    .sampling_interval,
                                revised_queue_size: item.requested_parameters.queue_size,
                                filter_result: ExtensionObject::null(),
                            }
                        })
                        .collect(),
                    None => vec![MonitoredItemCreateResult {
                        status_code: StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                        ..Default::default()
                    }],
                };
                ResponseMessage::CreateMonitoredItems(CreateMonitoredItemsResponse {
                    response_header: response_header(&request.request_header),
                    results: Some(results),
                    diagnostic_infos: None,
                })
            }
            RequestMessage::DeleteMonitoredItems(request) => {
                ResponseMessage::DeleteMonitoredItems(DeleteMonitoredItemsResponse {
                    response_header: response_header(&request.request_header),
                    results: Some(
                        request
                            .monitored_item_ids
                            .unwrap_or_default()
                            .iter()
                            .map(|_| StatusCode::GOOD)
                            .collect(),
                    ),
                    diagnostic_infos: None,
                })
            }
            RequestMessage::DeleteSubscriptions(request) => {
                let ids = request.subscription_ids.unwrap_or_default();
                let mut subscriptions = self.subscriptions.lock();
                let results = ids
                    .iter()
                    .map(|id| {
                        if subscriptions.remove(id).is_some() {
                            StatusCode::GOOD
                        } else {
                            StatusCode::BAD_SUBSCRIPTION_ID_INVALID
                        }
                    })
                    .collect();
                ResponseMessage::DeleteSubscriptions(DeleteSubscriptionsResponse {
                    response_header: response_header(&request.request_header),
                    results: Some(results),
                    diagnostic_infos: None,
                })
            }
            RequestMessage::Publish(request) => {
                // Park until the publisher has a notification ready.
                let (subscription_id, message) = loop {
                    if self.closing.load(Ordering::SeqCst) {
                        return None;
                    }
                    if self.subscriptions.lock().is_empty() {
                        return Some(ResponseMessage::ServiceFault(ServiceFault {
                            response_header: ResponseHeader {
                                timestamp: UaDateTime::now(),
                                request_handle: request.request_header.request_handle,
                                service_result: StatusCode::BAD_NO_SUBSCRIPTION,
                                ..Default::default()
                            },
                        }));
                    }
                    if let Some(batch) = self.publish_queue.lock().ready.pop_front() {
                        break batch;
                    }
                    self.publish_ready.notified().await;
                };
                ResponseMessage::Publish(PublishResponse {
                    response_header: response_header(&request.request_header),
                    subscription_id,
                    available_sequence_numbers: Some(vec![message.sequence_number]),
                    more_notifications: false,
                    notification_message: message,
                    results: None,
                    diagnostic_infos: None,
                })
            }
            RequestMessage::Republish(request) => {
                ResponseMessage::ServiceFault(ServiceFault {
                    response_header: ResponseHeader {
                        timestamp: UaDateTime::now(),
                        request_handle: request.request_header.request_handle,
                        service_result: StatusCode::BAD_MESSAGE_NOT_AVAILABLE,
                        ..Default::default()
                    },
                })
            }
            RequestMessage::CloseSecureChannel(_) => return None,
            other => ResponseMessage::ServiceFault(ServiceFault {
                response_header: ResponseHeader {
                    timestamp: UaDateTime::now(),
                    request_handle: other.request_header().request_handle,
                    service_result: StatusCode::BAD_SERVICE_UNSUPPORTED,
                    ..Default::default()
                },
            }),
        })
    }
}

fn response_header(request: &RequestHeader) -> ResponseHeader {
    ResponseHeader {
        timestamp: UaDateTime::now(),
        request_handle: request.request_handle,
        service_result: StatusCode::GOOD,
        ..Default::default()
    }
}

fn root_references() -> Vec<ReferenceDescription> {
    let organizes = NodeId::numeric(0, 35);
    let folder_type = NodeId::numeric(0, 61);
    [
        (NodeId::OBJECTS_FOLDER, "Objects"),
        (NodeId::TYPES_FOLDER, "Types"),
        (NodeId::VIEWS_FOLDER, "Views"),
    ]
    .into_iter()
    .map(|(node_id, name)| ReferenceDescription {
        reference_type_id: organizes.clone(),
        is_forward: true,
        node_id: node_id.clone().into(),
        browse_name: QualifiedName::new(0, name),
        display_name: LocalizedText::new(name),
        node_class: NodeClass::Object,
        type_definition: folder_type.clone().into(),
    })
    .collect()
}
