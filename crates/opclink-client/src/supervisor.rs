// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The connection supervisor and the public client facade.
//!
//! The supervisor task owns the connection state machine
//! `Idle → Connecting → Connected → Faulted → (backoff) → Connecting` and is
//! the only writer of the subscription registry's server bindings. On every
//! (re)connect it discovers endpoints, opens the secure channel, establishes
//! the session, and recreates every registered subscription and monitored
//! item with their original client handles, so observers keep routing across
//! server restarts without noticing the churn.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use opclink_channel::{
    AcceptAllValidator, CertificateValidator, ChannelConfig, ChannelEvent, OwnIdentity,
    SecurityPolicy, SelfSignedGenerator, Transport, X509Certificate,
};
use opclink_types::service::{
    BrowseDescription, BrowseResult, CallMethodRequest, CallMethodResult,
    MessageSecurityMode, MonitoredItemCreateRequest, MonitoringParameters, ReadValueId,
    WriteValue,
};
use opclink_types::{AttributeId, DataValue, ExtensionObject, NodeId, StatusCode, Variant};

use crate::config::{ClientConfig, MonitoredItemSettings, SubscriptionSettings};
use crate::error::{ClientError, ClientResult};
use crate::identity::{IdentityProvider, StaticIdentity, UserIdentity};
use crate::publish::{publish_pump, subscription_monitor, PumpEvent};
use crate::session::{get_endpoints, select_endpoint, Session};
use crate::subscription::{
    EventQueue, Observer, Registry, ValueQueue,
};

/// Capacity of the supervisor command queue.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Capacity of the back-write error sink.
const BACK_WRITE_ERROR_DEPTH: usize = 64;

// =============================================================================
// Connection state
// =============================================================================

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not yet started.
    #[default]
    Idle,

    /// A connection attempt is in progress.
    Connecting,

    /// Channel, session, and subscriptions are live.
    Connected,

    /// The last connection broke; a reconnect is pending.
    Faulted,

    /// The client was closed.
    Closed,
}

/// A failed back-write: the node and the status the server returned.
#[derive(Debug, Clone)]
pub struct BackWriteError {
    /// The node the write targeted.
    pub node_id: NodeId,

    /// The failure.
    pub status: StatusCode,
}

// =============================================================================
// Commands
// =============================================================================

enum Command {
    CreateSubscription {
        settings: SubscriptionSettings,
        reply: oneshot::Sender<ClientResult<u32>>,
    },
    DeleteSubscription {
        local_id: u32,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    AddItem {
        local_id: u32,
        node_id: NodeId,
        attribute_id: u32,
        settings: MonitoredItemSettings,
        observer: Observer,
        reply: oneshot::Sender<ClientResult<u32>>,
    },
    WriteBack {
        node_id: NodeId,
        value: DataValue,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

// =============================================================================
// Builder
// =============================================================================

/// Builds an [`OpcClient`] with its host-supplied collaborators.
pub struct OpcClientBuilder {
    config: ClientConfig,
    identity_provider: Arc<dyn IdentityProvider>,
    own_identity: Option<OwnIdentity>,
    validator: Arc<dyn CertificateValidator>,
}

impl OpcClientBuilder {
    /// Starts from a validated configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            identity_provider: Arc::new(StaticIdentity(UserIdentity::Anonymous)),
            own_identity: None,
            validator: Arc::new(AcceptAllValidator),
        }
    }

    /// Uses a fixed user identity.
    pub fn user_identity(mut self, identity: UserIdentity) -> Self {
        self.identity_provider = Arc::new(StaticIdentity(identity));
        self
    }

    /// Uses an identity provider callback.
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = provider;
        self
    }

    /// Supplies our application instance certificate and key.
    pub fn own_identity(mut self, identity: OwnIdentity) -> Self {
        self.own_identity = Some(identity);
        self
    }

    /// Supplies the peer certificate validator.
    pub fn certificate_validator(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Connects and starts the supervisor.
    pub async fn connect(mut self) -> ClientResult<OpcClient> {
        self.config.validate()?;

        // First-run convenience: secured channels need an identity.
        if self.config.security_policy.requires_certificates() && self.own_identity.is_none() {
            let host = parse_host(&self.config.endpoint);
            info!(host = %host, "generating self-signed application instance certificate");
            let generator =
                SelfSignedGenerator::new(host, self.config.application_name.clone());
            self.own_identity = Some(generator.generate()?);
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (back_write_tx, back_write_rx) = mpsc::channel(BACK_WRITE_ERROR_DEPTH);
        let context = Arc::new(SupervisorContext {
            config: self.config,
            registry: Arc::new(RwLock::new(Registry::default())),
            identity_provider: self.identity_provider,
            own_identity: self.own_identity,
            validator: self.validator,
            session_slot: watch::channel(None).0,
            state: watch::channel(ConnectionState::Idle).0,
            back_write_errors: back_write_tx,
        });

        // The first connection happens inline so the caller sees a hard
        // failure instead of a silent retry loop.
        context.state.send_replace(ConnectionState::Connecting);
        let connection = establish_connection(&context).await.map_err(|error| {
            context.state.send_replace(ConnectionState::Faulted);
            error
        })?;

        let supervisor = tokio::spawn(supervisor_loop(
            Arc::clone(&context),
            command_rx,
            connection,
        ));

        Ok(OpcClient {
            context,
            commands: command_tx,
            back_write_errors: parking_lot::Mutex::new(Some(back_write_rx)),
            supervisor,
        })
    }
}

fn parse_host(endpoint: &str) -> String {
    opclink_channel::parse_endpoint_url(endpoint)
        .map(|(host, _, _)| host)
        .unwrap_or_else(|_| "localhost".to_string())
}

// =============================================================================
// OpcClient
// =============================================================================

struct SupervisorContext {
    config: ClientConfig,
    registry: Arc<RwLock<Registry>>,
    identity_provider: Arc<dyn IdentityProvider>,
    own_identity: Option<OwnIdentity>,
    validator: Arc<dyn CertificateValidator>,
    session_slot: watch::Sender<Option<Arc<Session>>>,
    state: watch::Sender<ConnectionState>,
    back_write_errors: mpsc::Sender<BackWriteError>,
}

/// A supervised OPC UA client connection.
///
/// # Examples
///
/// ```rust,ignore
/// use opclink_client::{ClientConfig, OpcClient};
/// use opclink_types::NodeId;
///
/// let client = OpcClient::builder(ClientConfig::new("opc.tcp://plc01:4840"))
///     .connect()
///     .await?;
///
/// let value = client.read_value(NodeId::SERVER_CURRENT_TIME).await?;
/// println!("server time: {:?}", value.value);
/// ```
pub struct OpcClient {
    context: Arc<SupervisorContext>,
    commands: mpsc::Sender<Command>,
    back_write_errors: parking_lot::Mutex<Option<mpsc::Receiver<BackWriteError>>>,
    supervisor: JoinHandle<()>,
}

impl OpcClient {
    /// Starts a builder.
    pub fn builder(config: ClientConfig) -> OpcClientBuilder {
        OpcClientBuilder::new(config)
    }

    /// Connects with defaults (anonymous identity, accept-all validator).
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        Self::builder(config).connect().await
    }

    /// Watches the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.context.state.subscribe()
    }

    /// Takes the back-write error sink (first caller only).
    pub fn back_write_errors(&self) -> Option<mpsc::Receiver<BackWriteError>> {
        self.back_write_errors.lock().take()
    }

    fn current_session(&self) -> ClientResult<Arc<Session>> {
        self.context
            .session_slot
            .subscribe()
            .borrow()
            .clone()
            .ok_or(ClientError::NotConnected)
    }

    /// Waits until the client is connected (bounded by `deadline`).
    pub async fn wait_connected(&self, deadline: Duration) -> ClientResult<()> {
        let mut state = self.context.state.subscribe();
        tokio::time::timeout(deadline, async {
            loop {
                if *state.borrow() == ConnectionState::Connected {
                    return Ok(());
                }
                if *state.borrow() == ConnectionState::Closed {
                    return Err(ClientError::Closed);
                }
                if state.changed().await.is_err() {
                    return Err(ClientError::Closed);
                }
            }
        })
        .await
        .map_err(|_| ClientError::NotConnected)?
    }

    // -------------------------------------------------------------------------
    // Attribute and view services
    // -------------------------------------------------------------------------

    /// Reads the Value attribute of one node.
    pub async fn read_value(&self, node_id: NodeId) -> ClientResult<DataValue> {
        self.current_session()?.read_value(node_id).await
    }

    /// Reads several attributes at once.
    pub async fn read(&self, nodes: Vec<ReadValueId>) -> ClientResult<Vec<DataValue>> {
        self.current_session()?.read(nodes).await
    }

    /// Writes the Value attribute of one node.
    pub async fn write_value(
        &self,
        node_id: NodeId,
        value: impl Into<Variant>,
    ) -> ClientResult<()> {
        self.current_session()?
            .write_value(node_id, DataValue::new_now(value.into()))
            .await
    }

    /// Writes several attributes at once.
    pub async fn write(&self, nodes: Vec<WriteValue>) -> ClientResult<Vec<StatusCode>> {
        self.current_session()?.write(nodes).await
    }

    /// Browses the forward hierarchical references of a node.
    pub async fn browse(&self, node_id: NodeId) -> ClientResult<BrowseResult> {
        let mut results = self
            .current_session()?
            .browse(vec![BrowseDescription::hierarchical(node_id)])
            .await?;
        results
            .pop()
            .ok_or_else(|| ClientError::service("Browse", StatusCode::BAD_UNKNOWN_RESPONSE))
    }

    /// Browses several nodes with full control of the descriptions.
    pub async fn browse_many(
        &self,
        nodes: Vec<BrowseDescription>,
    ) -> ClientResult<Vec<BrowseResult>> {
        self.current_session()?.browse(nodes).await
    }

    /// Invokes a single method.
    pub async fn call_method(
        &self,
        object_id: NodeId,
        method_id: NodeId,
        arguments: Vec<Variant>,
    ) -> ClientResult<CallMethodResult> {
        let mut results = self
            .current_session()?
            .call(vec![CallMethodRequest {
                object_id,
                method_id,
                input_arguments: Some(arguments),
            }])
            .await?;
        results
            .pop()
            .ok_or_else(|| ClientError::service("Call", StatusCode::BAD_UNKNOWN_RESPONSE))
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Creates a subscription with the client's default settings.
    pub async fn subscribe(&self) -> ClientResult<SubscriptionHandle> {
        self.subscribe_with(self.context.config.subscription.clone()).await
    }

    /// Creates a subscription with explicit settings.
    pub async fn subscribe_with(
        &self,
        settings: SubscriptionSettings,
    ) -> ClientResult<SubscriptionHandle> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::CreateSubscription { settings, reply })
            .await
            .map_err(|_| ClientError::Closed)?;
        let local_id = response.await.map_err(|_| ClientError::Closed)??;
        Ok(SubscriptionHandle {
            local_id,
            commands: self.commands.clone(),
            default_item_settings: self.context.config.monitored_item.clone(),
        })
    }

    /// Closes the client: session, channel, and supervisor.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).await.is_ok() {
            let _ = done.await;
        }
        self.supervisor.abort();
    }
}

impl std::fmt::Debug for OpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcClient")
            .field("endpoint", &self.context.config.endpoint)
            .field("state", &*self.context.state.subscribe().borrow())
            .finish()
    }
}

// =============================================================================
// SubscriptionHandle
// =============================================================================

/// The application's handle to one logical subscription.
///
/// The handle stays valid across reconnects: the supervisor recreates the
/// server-side subscription under the same local id and client handles.
#[derive(Clone)]
pub struct SubscriptionHandle {
    local_id: u32,
    commands: mpsc::Sender<Command>,
    default_item_settings: MonitoredItemSettings,
}

impl SubscriptionHandle {
    /// The stable local id of this subscription.
    pub fn id(&self) -> u32 {
        self.local_id
    }

    async fn add_item(
        &self,
        node_id: NodeId,
        attribute_id: u32,
        settings: MonitoredItemSettings,
        observer: Observer,
    ) -> ClientResult<u32> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::AddItem {
                local_id: self.local_id,
                node_id,
                attribute_id,
                settings,
                observer,
                reply,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }

    /// Monitors a node's Value, overwriting a slot with the latest
    /// [`DataValue`].
    pub async fn monitor_latest(
        &self,
        node_id: NodeId,
    ) -> ClientResult<watch::Receiver<DataValue>> {
        let (slot, receiver) = watch::channel(DataValue::default());
        self.add_item(
            node_id,
            AttributeId::Value as u32,
            self.default_item_settings.clone(),
            Observer::Latest(slot),
        )
        .await?;
        Ok(receiver)
    }

    /// Monitors a node's Value, overwriting a slot with only the inner value.
    pub async fn monitor_unwrapped(
        &self,
        node_id: NodeId,
    ) -> ClientResult<watch::Receiver<Variant>> {
        let (slot, receiver) = watch::channel(Variant::Empty);
        self.add_item(
            node_id,
            AttributeId::Value as u32,
            self.default_item_settings.clone(),
            Observer::Unwrapped(slot),
        )
        .await?;
        Ok(receiver)
    }

    /// Monitors a node's Value into a bounded queue of [`DataValue`]s.
    pub async fn monitor_queue(
        &self,
        node_id: NodeId,
        capacity: usize,
    ) -> ClientResult<ValueQueue> {
        let settings = self.default_item_settings.clone();
        let queue = ValueQueue::new(capacity, settings.discard_oldest);
        self.add_item(
            node_id,
            AttributeId::Value as u32,
            settings,
            Observer::Queue(queue.clone()),
        )
        .await?;
        Ok(queue)
    }

    /// Monitors a node's events into a bounded queue of field lists.
    pub async fn monitor_events(
        &self,
        node_id: NodeId,
        capacity: usize,
    ) -> ClientResult<EventQueue> {
        let settings = self.default_item_settings.clone();
        let queue = EventQueue::new(capacity, settings.discard_oldest);
        self.add_item(
            node_id,
            AttributeId::EventNotifier as u32,
            settings,
            Observer::EventQueue(queue.clone()),
        )
        .await?;
        Ok(queue)
    }

    /// Pushes a locally changed value back to the server.
    ///
    /// Failures are reported on the client's back-write error sink and
    /// logged; they never fault the subscription.
    pub async fn write_back(&self, node_id: NodeId, value: impl Into<Variant>) {
        let _ = self
            .commands
            .send(Command::WriteBack {
                node_id,
                value: DataValue::new_now(value.into()),
            })
            .await;
    }

    /// Deletes the subscription locally and server-side.
    pub async fn delete(self) -> ClientResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::DeleteSubscription {
                local_id: self.local_id,
                reply,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }
}

// =============================================================================
// Supervisor task
// =============================================================================

struct Connection {
    transport: Arc<Transport>,
    session: Arc<Session>,
}

enum ConnectedOutcome {
    Faulted,
    Closed,
}

async fn supervisor_loop(
    context: Arc<SupervisorContext>,
    mut command_rx: mpsc::Receiver<Command>,
    first: Connection,
) {
    let mut connection = Some(first);
    let mut attempt: u32 = 0;

    loop {
        match connection.take() {
            Some(live) => {
                context.state.send_replace(ConnectionState::Connected);
                let outcome = run_connected(&context, &mut command_rx, live).await;
                context.session_slot.send_replace(None);
                context.registry.write().reset_all_server_state();
                match outcome {
                    ConnectedOutcome::Closed => {
                        context.state.send_replace(ConnectionState::Closed);
                        return;
                    }
                    ConnectedOutcome::Faulted => {
                        context.state.send_replace(ConnectionState::Faulted);
                    }
                }
            }
            None => {
                let delay = context.config.reconnect.delay_for_attempt(attempt);
                attempt = attempt.saturating_add(1);
                debug!(attempt, ?delay, "reconnect backoff");
                if !sleep_handling_commands(&context, &mut command_rx, delay).await {
                    context.state.send_replace(ConnectionState::Closed);
                    return;
                }

                context.state.send_replace(ConnectionState::Connecting);
                match establish_connection(&context).await {
                    Ok(live) => {
                        attempt = 0;
                        connection = Some(live);
                    }
                    Err(error) => {
                        warn!(error = %error, "reconnect attempt failed");
                        context.state.send_replace(ConnectionState::Faulted);
                    }
                }
            }
        }
    }
}

/// Sleeps through a backoff period while still serving registry-only
/// commands. Returns `false` when the client closed.
async fn sleep_handling_commands(
    context: &Arc<SupervisorContext>,
    command_rx: &mut mpsc::Receiver<Command>,
    delay: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            command = command_rx.recv() => match command {
                None => return false,
                Some(Command::Close { reply }) => {
                    let _ = reply.send(());
                    return false;
                }
                Some(command) => handle_command_offline(context, command),
            }
        }
    }
}

/// Handles a command while disconnected: mutate desired state only; the next
/// reconnect applies it server-side.
fn handle_command_offline(context: &Arc<SupervisorContext>, command: Command) {
    match command {
        Command::CreateSubscription { settings, reply } => {
            let local_id = context.registry.write().create_subscription(settings);
            let _ = reply.send(Ok(local_id));
        }
        Command::AddItem {
            local_id,
            node_id,
            attribute_id,
            settings,
            observer,
            reply,
        } => {
            let result = context
                .registry
                .write()
                .add_item(local_id, node_id, attribute_id, settings, observer)
                .ok_or(ClientError::UnknownSubscription(local_id));
            let _ = reply.send(result);
        }
        Command::DeleteSubscription { local_id, reply } => {
            let removed = context.registry.write().subscriptions.remove(&local_id);
            let _ = reply.send(
                removed
                    .map(|_| ())
                    .ok_or(ClientError::UnknownSubscription(local_id)),
            );
        }
        Command::WriteBack { node_id, .. } => {
            warn!(node = %node_id, "back-write dropped while disconnected");
            let _ = context.back_write_errors.try_send(BackWriteError {
                node_id,
                status: StatusCode::BAD_SERVER_NOT_CONNECTED,
            });
        }
        Command::Close { reply } => {
            let _ = reply.send(());
        }
    }
}

/// Runs one live connection until it faults or the client closes.
async fn run_connected(
    context: &Arc<SupervisorContext>,
    command_rx: &mut mpsc::Receiver<Command>,
    live: Connection,
) -> ConnectedOutcome {
    let Connection { transport, session } = live;
    context.session_slot.send_replace(Some(Arc::clone(&session)));

    let (pump_tx, mut pump_rx) = mpsc::channel::<PumpEvent>(16);
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    for slot in 0..context.config.publish_requests {
        workers.push(tokio::spawn(publish_pump(
            slot,
            Arc::clone(&session),
            Arc::clone(&context.registry),
            pump_tx.clone(),
        )));
    }
    workers.push(tokio::spawn(subscription_monitor(
        Arc::clone(&session),
        Arc::clone(&context.registry),
        pump_tx.clone(),
    )));
    workers.push(tokio::spawn(keep_alive_loop(
        Arc::clone(&session),
        context.config.keep_alive_interval,
        pump_tx.clone(),
    )));

    let mut channel_events = transport.events();
    let outcome = loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                None => break ConnectedOutcome::Closed,
                Some(Command::Close { reply }) => {
                    let _ = session.close().await;
                    transport.close().await;
                    let _ = reply.send(());
                    break ConnectedOutcome::Closed;
                }
                Some(command) => {
                    handle_command_online(context, &session, command).await;
                }
            },
            event = pump_rx.recv() => match event {
                Some(PumpEvent::SessionBroken) | None => {
                    break ConnectedOutcome::Faulted;
                }
                Some(PumpEvent::RecreateAll) => {
                    if let Err(error) = recreate_subscriptions(context, &session).await {
                        warn!(error = %error, "subscription recreation failed");
                        break ConnectedOutcome::Faulted;
                    }
                }
                Some(PumpEvent::RecreateSubscription(local_id)) => {
                    if let Err(error) = recreate_one(context, &session, local_id).await {
                        warn!(local_id, error = %error, "subscription recreation failed");
                        if error.needs_reconnect() {
                            break ConnectedOutcome::Faulted;
                        }
                    }
                }
            },
            changed = channel_events.changed() => {
                if changed.is_err() {
                    break ConnectedOutcome::Faulted;
                }
                if let ChannelEvent::Faulted(status) = *channel_events.borrow() {
                    warn!(%status, "channel faulted");
                    break ConnectedOutcome::Faulted;
                }
            }
        }
    };

    for worker in &workers {
        worker.abort();
    }
    if matches!(outcome, ConnectedOutcome::Faulted) {
        transport.close().await;
    }
    outcome
}

/// Handles a command against the live session.
async fn handle_command_online(
    context: &Arc<SupervisorContext>,
    session: &Arc<Session>,
    command: Command,
) {
    match command {
        Command::CreateSubscription { settings, reply } => {
            let local_id = context.registry.write().create_subscription(settings);
            let result = apply_subscription(context, session, local_id).await;
            match result {
                Ok(()) => {
                    let _ = reply.send(Ok(local_id));
                }
                Err(error) => {
                    context.registry.write().subscriptions.remove(&local_id);
                    let _ = reply.send(Err(error));
                }
            }
        }
        Command::AddItem {
            local_id,
            node_id,
            attribute_id,
            settings,
            observer,
            reply,
        } => {
            let client_handle = match context.registry.write().add_item(
                local_id,
                node_id.clone(),
                attribute_id,
                settings.clone(),
                observer,
            ) {
                Some(handle) => handle,
                None => {
                    let _ = reply.send(Err(ClientError::UnknownSubscription(local_id)));
                    return;
                }
            };

            let server_id = context
                .registry
                .read()
                .subscriptions
                .get(&local_id)
                .and_then(|subscription| subscription.server_id);
            let result = match server_id {
                Some(server_id) => {
                    create_items_on_server(
                        context,
                        session,
                        local_id,
                        server_id,
                        vec![client_handle],
                    )
                    .await
                }
                // Applied when the connection (re)establishes.
                None => Ok(()),
            };
            match result {
                Ok(()) => {
                    let _ = reply.send(Ok(client_handle));
                }
                Err(error) => {
                    if let Some(subscription) =
                        context.registry.write().subscriptions.get_mut(&local_id)
                    {
                        subscription.items.remove(&client_handle);
                    }
                    let _ = reply.send(Err(error));
                }
            }
        }
        Command::DeleteSubscription { local_id, reply } => {
            let removed = context.registry.write().subscriptions.remove(&local_id);
            match removed {
                Some(subscription) => {
                    if let Some(server_id) = subscription.server_id {
                        if let Err(error) = session.delete_subscriptions(vec![server_id]).await {
                            warn!(error = %error, "server-side subscription delete failed");
                        }
                    }
                    let _ = reply.send(Ok(()));
                }
                None => {
                    let _ = reply.send(Err(ClientError::UnknownSubscription(local_id)));
                }
            }
        }
        Command::WriteBack { node_id, value } => {
            if let Err(error) = session.write_value(node_id.clone(), value).await {
                // Write failures are surfaced, never fatal to the
                // subscription.
                warn!(node = %node_id, error = %error, "back-write failed");
                let _ = context.back_write_errors.try_send(BackWriteError {
                    node_id,
                    status: error.status(),
                });
            }
        }
        Command::Close { reply } => {
            let _ = reply.send(());
        }
    }
}

async fn keep_alive_loop(
    session: Arc<Session>,
    interval: Duration,
    events: mpsc::Sender<PumpEvent>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(error) = session.keep_alive().await {
            warn!(error = %error, "session keep-alive failed");
            if error.needs_reconnect() || matches!(error, ClientError::Channel(_)) {
                let _ = events.send(PumpEvent::SessionBroken).await;
                return;
            }
        }
    }
}

// =============================================================================
// Connection establishment & subscription recreation
// =============================================================================

async fn establish_connection(context: &Arc<SupervisorContext>) -> ClientResult<Connection> {
    let config = &context.config;
    info!(endpoint = %config.endpoint, "connecting");

    // Discovery runs on an unsecured channel.
    let discovery_config = ChannelConfig {
        security_policy: SecurityPolicy::None,
        security_mode: MessageSecurityMode::None,
        ..config.channel_config()
    };
    let discovery =
        Transport::connect(discovery_config, None, None, &AcceptAllValidator).await?;
    let endpoints = get_endpoints(&discovery, &config.endpoint).await?;
    let endpoint = select_endpoint(&endpoints, config.security_policy, config.security_mode)?;

    let transport = if config.security_policy == SecurityPolicy::None {
        discovery
    } else {
        discovery.close().await;
        let server_certificate = endpoint
            .server_certificate
            .0
            .clone()
            .map(X509Certificate::from_der)
            .transpose()?
            .ok_or(ClientError::SessionRejected {
                status: StatusCode::BAD_CERTIFICATE_INVALID,
            })?;
        Transport::connect(
            config.channel_config(),
            context.own_identity.clone(),
            Some(server_certificate),
            context.validator.as_ref(),
        )
        .await?
    };

    let transport = Arc::new(transport);
    let session = Arc::new(
        Session::establish(
            Arc::clone(&transport),
            config.clone(),
            endpoint,
            context.identity_provider.as_ref(),
            context.own_identity.clone(),
        )
        .await?,
    );

    recreate_subscriptions(context, &session).await?;
    info!(endpoint = %config.endpoint, session_id = %session.session_id(), "connected");
    Ok(Connection { transport, session })
}

/// Recreates every registered subscription on the live session, preserving
/// local ids and client handles.
async fn recreate_subscriptions(
    context: &Arc<SupervisorContext>,
    session: &Arc<Session>,
) -> ClientResult<()> {
    let local_ids: Vec<u32> = context.registry.read().subscriptions.keys().copied().collect();
    for local_id in local_ids {
        recreate_one(context, session, local_id).await?;
    }
    Ok(())
}

/// Recreates one subscription (and all its items) server-side.
async fn recreate_one(
    context: &Arc<SupervisorContext>,
    session: &Arc<Session>,
    local_id: u32,
) -> ClientResult<()> {
    {
        let mut registry = context.registry.write();
        let Some(subscription) = registry.subscriptions.get_mut(&local_id) else {
            return Ok(());
        };
        subscription.reset_server_state();
    }
    apply_subscription(context, session, local_id).await
}

/// Creates the server-side subscription and items for a registry entry.
async fn apply_subscription(
    context: &Arc<SupervisorContext>,
    session: &Arc<Session>,
    local_id: u32,
) -> ClientResult<()> {
    let settings = match context.registry.read().subscriptions.get(&local_id) {
        Some(subscription) => subscription.settings.clone(),
        None => return Ok(()),
    };

    let created = session.create_subscription(&settings).await?;
    let mut orphan_server_id: Option<u32> = None;
    let client_handles: Vec<u32> = {
        let mut registry = context.registry.write();
        match registry.subscriptions.get_mut(&local_id) {
            Some(subscription) => {
                subscription.server_id = Some(created.subscription_id);
                subscription.last_activity = std::time::Instant::now();
                subscription.settings.publishing_interval = Duration::from_secs_f64(
                    created.revised_publishing_interval.max(0.0) / 1000.0,
                );
                subscription.settings.lifetime_count = created.revised_lifetime_count;
                subscription.settings.max_keep_alive_count =
                    created.revised_max_keep_alive_count;
                subscription.items.keys().copied().collect()
            }
            None => {
                // Deleted concurrently; drop the server-side orphan.
                orphan_server_id = Some(created.subscription_id);
                Vec::new()
            }
        }
    };
    if let Some(server_id) = orphan_server_id {
        let _ = session.delete_subscriptions(vec![server_id]).await;
        return Ok(());
    }

    debug!(
        local_id,
        server_id = created.subscription_id,
        items = client_handles.len(),
        "subscription created"
    );
    if client_handles.is_empty() {
        return Ok(());
    }
    create_items_on_server(
        context,
        session,
        local_id,
        created.subscription_id,
        client_handles,
    )
    .await
}

/// Creates monitored items for the given client handles.
async fn create_items_on_server(
    context: &Arc<SupervisorContext>,
    session: &Arc<Session>,
    local_id: u32,
    server_id: u32,
    client_handles: Vec<u32>,
) -> ClientResult<()> {
    let requests: Vec<MonitoredItemCreateRequest> = {
        let registry = context.registry.read();
        let Some(subscription) = registry.subscriptions.get(&local_id) else {
            return Ok(());
        };
        client_handles
            .iter()
            .filter_map(|client_handle| subscription.items.get(client_handle))
            .map(|item| MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId {
                    node_id: item.node_id.clone(),
                    attribute_id: item.attribute_id,
                    index_range: Default::default(),
                    data_encoding: Default::default(),
                },
                monitoring_mode: item.settings.monitoring_mode,
                requested_parameters: MonitoringParameters {
                    client_handle: item.client_handle,
                    sampling_interval: item.settings.sampling_interval.as_secs_f64() * 1000.0,
                    filter: item
                        .settings
                        .filter
                        .clone()
                        .unwrap_or_else(ExtensionObject::null),
                    queue_size: item.settings.queue_size,
                    discard_oldest: item.settings.discard_oldest,
                },
            })
            .collect()
    };
    if requests.is_empty() {
        return Ok(());
    }

    let results = session.create_monitored_items(server_id, requests).await?;

    let mut registry = context.registry.write();
    let Some(subscription) = registry.subscriptions.get_mut(&local_id) else {
        return Ok(());
    };
    let mut first_failure = None;
    for (client_handle, result) in client_handles.iter().zip(results.iter()) {
        if result.status_code.is_bad() {
            warn!(
                client_handle,
                status = %result.status_code,
                "monitored item creation rejected"
            );
            first_failure.get_or_insert(result.status_code);
            continue;
        }
        if let Some(item) = subscription.items.get_mut(client_handle) {
            item.server_id = Some(result.monitored_item_id);
        }
    }
    match first_failure {
        Some(status) => Err(ClientError::service("CreateMonitoredItems", status)),
        None => Ok(()),
    }
}
