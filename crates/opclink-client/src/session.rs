// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session establishment and the service call surface.
//!
//! A [`Session`] wraps one [`Transport`] with an activated OPC UA session:
//! it stamps request headers with the authentication token and a fresh
//! request handle, sends the request, and maps the response (or service
//! fault) back to a typed result.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use opclink_channel::{crypto, OwnIdentity, SecurityPolicy, Transport};
use opclink_types::service::{
    ActivateSessionRequest, ApplicationDescription, BrowseDescription, BrowseNextRequest,
    BrowseRequest, BrowseResult, CallMethodRequest, CallMethodResult, CallRequest,
    CloseSessionRequest, CreateMonitoredItemsRequest, CreateSessionRequest,
    CreateSubscriptionRequest, CreateSubscriptionResponse, DeleteMonitoredItemsRequest,
    DeleteSubscriptionsRequest, EndpointDescription, GetEndpointsRequest, MessageSecurityMode,
    ModifyMonitoredItemsRequest, ModifySubscriptionRequest, ModifySubscriptionResponse,
    MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemModifyRequest,
    MonitoredItemModifyResult, PublishRequest, PublishResponse, ReadRequest, ReadValueId,
    RepublishRequest, RepublishResponse, RequestHeader, RequestMessage, ResponseMessage,
    SetPublishingModeRequest, SignatureData, SubscriptionAcknowledgement, TimestampsToReturn,
    WriteRequest, WriteValue,
};
use opclink_types::{ByteString, DataValue, NodeId, StatusCode, UaString};

use crate::config::{ClientConfig, SubscriptionSettings};
use crate::error::{ClientError, ClientResult};
use crate::identity::{build_activation_tokens, IdentityProvider};

/// Extracts the expected response arm or converts faults into errors.
macro_rules! expect_response {
    ($operation:literal, $response:expr, $arm:ident) => {
        match $response {
            ResponseMessage::$arm(body) => {
                let status = body.response_header.service_result;
                if status.is_bad() {
                    Err(ClientError::service($operation, status))
                } else {
                    Ok(body)
                }
            }
            ResponseMessage::ServiceFault(fault) => Err(ClientError::service(
                $operation,
                fault.response_header.service_result,
            )),
            _ => Err(ClientError::service(
                $operation,
                StatusCode::BAD_UNKNOWN_RESPONSE,
            )),
        }
    };
}

// =============================================================================
// Endpoint discovery
// =============================================================================

/// Issues `GetEndpoints` on an open transport (no session required).
pub async fn get_endpoints(
    transport: &Transport,
    endpoint_url: &str,
) -> ClientResult<Vec<EndpointDescription>> {
    let request = RequestMessage::GetEndpoints(GetEndpointsRequest {
        request_header: RequestHeader::new(NodeId::null(), 1, 0),
        endpoint_url: UaString::from(endpoint_url),
        locale_ids: None,
        profile_uris: None,
    });
    let response = transport.send_request(request, None).await?;
    let response = expect_response!("GetEndpoints", response, GetEndpoints)?;
    Ok(response.endpoints.unwrap_or_default())
}

/// Picks the endpoint matching the configured policy and mode, preferring the
/// server's highest security level among the matches.
pub fn select_endpoint(
    endpoints: &[EndpointDescription],
    policy: SecurityPolicy,
    mode: MessageSecurityMode,
) -> ClientResult<EndpointDescription> {
    endpoints
        .iter()
        .filter(|endpoint| {
            endpoint.security_mode == mode
                && SecurityPolicy::from_uri(endpoint.security_policy_uri.as_ref()) == Some(policy)
        })
        .max_by_key(|endpoint| endpoint.security_level)
        .cloned()
        .ok_or_else(|| ClientError::NoMatchingEndpoint {
            policy: policy.name().to_string(),
            mode: format!("{:?}", mode),
        })
}

// =============================================================================
// Session
// =============================================================================

/// An activated OPC UA session over one transport.
pub struct Session {
    transport: Arc<Transport>,
    config: ClientConfig,
    endpoint: EndpointDescription,

    session_id: NodeId,
    authentication_token: NodeId,
    revised_session_timeout: f64,
    server_nonce: Mutex<Vec<u8>>,
    request_handle: AtomicU32,
    own_identity: Option<OwnIdentity>,
}

impl Session {
    /// Creates and activates a session on the transport.
    pub async fn establish(
        transport: Arc<Transport>,
        config: ClientConfig,
        endpoint: EndpointDescription,
        identity_provider: &dyn IdentityProvider,
        own_identity: Option<OwnIdentity>,
    ) -> ClientResult<Self> {
        let client_nonce = crypto::random_nonce(32);
        let client_certificate = own_identity
            .as_ref()
            .map(|identity| identity.certificate.as_byte_string())
            .unwrap_or_else(ByteString::null);

        let request = RequestMessage::CreateSession(CreateSessionRequest {
            request_header: RequestHeader::new(NodeId::null(), 1, 0),
            client_description: ApplicationDescription::client(
                config.effective_application_uri(),
                config.application_name.clone(),
            ),
            server_uri: UaString::null(),
            endpoint_url: UaString::from(config.endpoint.as_str()),
            session_name: UaString::from(config.effective_session_name()),
            client_nonce: ByteString::from(client_nonce),
            client_certificate,
            requested_session_timeout: config.session_timeout.as_millis() as f64,
            max_response_message_size: 0,
        });
        let response = transport.send_request(request, None).await?;
        let created = match expect_response!("CreateSession", response, CreateSession) {
            Ok(body) => body,
            Err(ClientError::Service { status, .. }) => {
                return Err(ClientError::SessionRejected { status })
            }
            Err(error) => return Err(error),
        };

        let session = Self {
            transport,
            config,
            endpoint,
            session_id: created.session_id.clone(),
            authentication_token: created.authentication_token.clone(),
            revised_session_timeout: created.revised_session_timeout,
            server_nonce: Mutex::new(created.server_nonce.as_ref().to_vec()),
            request_handle: AtomicU32::new(1),
            own_identity,
        };
        debug!(
            session_id = %session.session_id,
            revised_timeout_ms = session.revised_session_timeout,
            "session created"
        );

        session.activate(identity_provider).await?;
        info!(session_id = %session.session_id, "session activated");
        Ok(session)
    }

    /// Activates (or re-activates) the session with a fresh identity token.
    pub async fn activate(&self, identity_provider: &dyn IdentityProvider) -> ClientResult<()> {
        let identity = identity_provider.identity(&self.endpoint).await?;
        let server_nonce = self.server_nonce.lock().clone();
        let channel_policy = self.transport.config().security_policy;
        let server_certificate = self.transport.server_certificate();

        let tokens = build_activation_tokens(
            &identity,
            &self.endpoint,
            server_certificate.as_ref(),
            &server_nonce,
            channel_policy,
        )?;

        // Channel-level proof of possession over serverCertificate + nonce.
        let client_signature = match (
            &self.own_identity,
            &server_certificate,
            channel_policy.asymmetric_hash(),
        ) {
            (Some(identity), Some(certificate), Some(hash))
                if channel_policy != SecurityPolicy::None =>
            {
                let mut signed = certificate.as_der().to_vec();
                signed.extend_from_slice(&server_nonce);
                let signature = crypto::rsa_sign(&identity.private_key, hash, &signed)
                    .map_err(ClientError::Channel)?;
                SignatureData {
                    algorithm: UaString::from(channel_policy.asymmetric_signature_algorithm()),
                    signature: ByteString::from(signature),
                }
            }
            _ => SignatureData::null(),
        };

        let request = RequestMessage::ActivateSession(ActivateSessionRequest {
            request_header: self.request_header(),
            client_signature,
            client_software_certificates: None,
            locale_ids: None,
            user_identity_token: tokens.user_identity_token,
            user_token_signature: tokens.user_token_signature,
        });
        let response = self.transport.send_request(request, None).await?;
        let activated = match expect_response!("ActivateSession", response, ActivateSession) {
            Ok(body) => body,
            Err(ClientError::Service { status, .. })
                if matches!(
                    status,
                    StatusCode::BAD_IDENTITY_TOKEN_INVALID
                        | StatusCode::BAD_IDENTITY_TOKEN_REJECTED
                        | StatusCode::BAD_USER_ACCESS_DENIED
                ) =>
            {
                return Err(ClientError::IdentityRejected { status })
            }
            Err(error) => return Err(error),
        };
        *self.server_nonce.lock() = activated.server_nonce.as_ref().to_vec();
        Ok(())
    }

    /// The server-assigned session id.
    pub fn session_id(&self) -> &NodeId {
        &self.session_id
    }

    /// The revised session timeout in milliseconds.
    pub fn revised_session_timeout(&self) -> f64 {
        self.revised_session_timeout
    }

    /// The transport this session runs on.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    fn request_header(&self) -> RequestHeader {
        let handle = self.request_handle.fetch_add(1, Ordering::Relaxed);
        RequestHeader::new(
            self.authentication_token.clone(),
            handle,
            self.config.request_timeout.as_millis() as u32,
        )
    }

    // -------------------------------------------------------------------------
    // Attribute services
    // -------------------------------------------------------------------------

    /// Reads one or more attributes.
    pub async fn read(&self, nodes_to_read: Vec<ReadValueId>) -> ClientResult<Vec<DataValue>> {
        let request = RequestMessage::Read(ReadRequest {
            request_header: self.request_header(),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Some(nodes_to_read),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("Read", response, Read)?;
        Ok(response.results.unwrap_or_default())
    }

    /// Reads the Value attribute of a single node.
    pub async fn read_value(&self, node_id: NodeId) -> ClientResult<DataValue> {
        let mut results = self.read(vec![ReadValueId::value_of(node_id)]).await?;
        results
            .pop()
            .ok_or_else(|| ClientError::service("Read", StatusCode::BAD_UNKNOWN_RESPONSE))
    }

    /// Writes one or more attributes, returning per-item statuses.
    pub async fn write(&self, nodes_to_write: Vec<WriteValue>) -> ClientResult<Vec<StatusCode>> {
        let request = RequestMessage::Write(WriteRequest {
            request_header: self.request_header(),
            nodes_to_write: Some(nodes_to_write),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("Write", response, Write)?;
        Ok(response.results.unwrap_or_default())
    }

    /// Writes the Value attribute of a single node.
    pub async fn write_value(&self, node_id: NodeId, value: DataValue) -> ClientResult<()> {
        let results = self.write(vec![WriteValue::value_of(node_id, value)]).await?;
        match results.first() {
            Some(status) if status.is_good() => Ok(()),
            Some(status) => Err(ClientError::service("Write", *status)),
            None => Err(ClientError::service("Write", StatusCode::BAD_UNKNOWN_RESPONSE)),
        }
    }

    // -------------------------------------------------------------------------
    // View services
    // -------------------------------------------------------------------------

    /// Browses references of the given nodes.
    pub async fn browse(
        &self,
        nodes_to_browse: Vec<BrowseDescription>,
    ) -> ClientResult<Vec<BrowseResult>> {
        let request = RequestMessage::Browse(BrowseRequest {
            request_header: self.request_header(),
            view: Default::default(),
            requested_max_references_per_node: 0,
            nodes_to_browse: Some(nodes_to_browse),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("Browse", response, Browse)?;
        Ok(response.results.unwrap_or_default())
    }

    /// Continues browses from continuation points.
    pub async fn browse_next(
        &self,
        continuation_points: Vec<ByteString>,
        release: bool,
    ) -> ClientResult<Vec<BrowseResult>> {
        let request = RequestMessage::BrowseNext(BrowseNextRequest {
            request_header: self.request_header(),
            release_continuation_points: release,
            continuation_points: Some(continuation_points),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("BrowseNext", response, BrowseNext)?;
        Ok(response.results.unwrap_or_default())
    }

    // -------------------------------------------------------------------------
    // Method services
    // -------------------------------------------------------------------------

    /// Invokes methods.
    pub async fn call(
        &self,
        methods_to_call: Vec<CallMethodRequest>,
    ) -> ClientResult<Vec<CallMethodResult>> {
        let request = RequestMessage::Call(CallRequest {
            request_header: self.request_header(),
            methods_to_call: Some(methods_to_call),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("Call", response, Call)?;
        Ok(response.results.unwrap_or_default())
    }

    // -------------------------------------------------------------------------
    // Subscription services
    // -------------------------------------------------------------------------

    /// Creates a server-side subscription.
    pub async fn create_subscription(
        &self,
        settings: &SubscriptionSettings,
    ) -> ClientResult<CreateSubscriptionResponse> {
        let request = RequestMessage::CreateSubscription(CreateSubscriptionRequest {
            request_header: self.request_header(),
            requested_publishing_interval: settings.publishing_interval.as_secs_f64() * 1000.0,
            requested_lifetime_count: settings.lifetime_count,
            requested_max_keep_alive_count: settings.max_keep_alive_count,
            max_notifications_per_publish: settings.max_notifications_per_publish,
            publishing_enabled: settings.publishing_enabled,
            priority: settings.priority,
        });
        let response = self.transport.send_request(request, None).await?;
        expect_response!("CreateSubscription", response, CreateSubscription)
    }

    /// Modifies a subscription's parameters.
    pub async fn modify_subscription(
        &self,
        subscription_id: u32,
        settings: &SubscriptionSettings,
    ) -> ClientResult<ModifySubscriptionResponse> {
        let request = RequestMessage::ModifySubscription(ModifySubscriptionRequest {
            request_header: self.request_header(),
            subscription_id,
            requested_publishing_interval: settings.publishing_interval.as_secs_f64() * 1000.0,
            requested_lifetime_count: settings.lifetime_count,
            requested_max_keep_alive_count: settings.max_keep_alive_count,
            max_notifications_per_publish: settings.max_notifications_per_publish,
            priority: settings.priority,
        });
        let response = self.transport.send_request(request, None).await?;
        expect_response!("ModifySubscription", response, ModifySubscription)
    }

    /// Enables or disables publishing on subscriptions.
    pub async fn set_publishing_mode(
        &self,
        subscription_ids: Vec<u32>,
        enabled: bool,
    ) -> ClientResult<Vec<StatusCode>> {
        let request = RequestMessage::SetPublishingMode(SetPublishingModeRequest {
            request_header: self.request_header(),
            publishing_enabled: enabled,
            subscription_ids: Some(subscription_ids),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("SetPublishingMode", response, SetPublishingMode)?;
        Ok(response.results.unwrap_or_default())
    }

    /// Deletes subscriptions (best-effort results per id).
    pub async fn delete_subscriptions(
        &self,
        subscription_ids: Vec<u32>,
    ) -> ClientResult<Vec<StatusCode>> {
        let request = RequestMessage::DeleteSubscriptions(DeleteSubscriptionsRequest {
            request_header: self.request_header(),
            subscription_ids: Some(subscription_ids),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("DeleteSubscriptions", response, DeleteSubscriptions)?;
        Ok(response.results.unwrap_or_default())
    }

    /// Adds monitored items to a subscription.
    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemCreateRequest>,
    ) -> ClientResult<Vec<MonitoredItemCreateResult>> {
        let request = RequestMessage::CreateMonitoredItems(CreateMonitoredItemsRequest {
            request_header: self.request_header(),
            subscription_id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_create: Some(items),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("CreateMonitoredItems", response, CreateMonitoredItems)?;
        Ok(response.results.unwrap_or_default())
    }

    /// Modifies monitored items of a subscription.
    pub async fn modify_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemModifyRequest>,
    ) -> ClientResult<Vec<MonitoredItemModifyResult>> {
        let request = RequestMessage::ModifyMonitoredItems(ModifyMonitoredItemsRequest {
            request_header: self.request_header(),
            subscription_id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_modify: Some(items),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("ModifyMonitoredItems", response, ModifyMonitoredItems)?;
        Ok(response.results.unwrap_or_default())
    }

    /// Removes monitored items from a subscription.
    pub async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: Vec<u32>,
    ) -> ClientResult<Vec<StatusCode>> {
        let request = RequestMessage::DeleteMonitoredItems(DeleteMonitoredItemsRequest {
            request_header: self.request_header(),
            subscription_id,
            monitored_item_ids: Some(monitored_item_ids),
        });
        let response = self.transport.send_request(request, None).await?;
        let response = expect_response!("DeleteMonitoredItems", response, DeleteMonitoredItems)?;
        Ok(response.results.unwrap_or_default())
    }

    /// Issues a Publish carrying the given acknowledgements.
    ///
    /// Uses a deadline long enough for a keep-alive cycle rather than the
    /// ordinary request timeout.
    pub async fn publish(
        &self,
        acknowledgements: Vec<SubscriptionAcknowledgement>,
        timeout: std::time::Duration,
    ) -> ClientResult<PublishResponse> {
        let request = RequestMessage::Publish(PublishRequest {
            request_header: self.request_header(),
            subscription_acknowledgements: if acknowledgements.is_empty() {
                None
            } else {
                Some(acknowledgements)
            },
        });
        let response = self.transport.send_request(request, Some(timeout)).await?;
        expect_response!("Publish", response, Publish)
    }

    /// Requests retransmission of a missed notification message.
    pub async fn republish(
        &self,
        subscription_id: u32,
        retransmit_sequence_number: u32,
    ) -> ClientResult<RepublishResponse> {
        let request = RequestMessage::Republish(RepublishRequest {
            request_header: self.request_header(),
            subscription_id,
            retransmit_sequence_number,
        });
        let response = self.transport.send_request(request, None).await?;
        expect_response!("Republish", response, Republish)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// A keep-alive touch: reads the server status state variable.
    pub async fn keep_alive(&self) -> ClientResult<()> {
        let result = self
            .read_value(NodeId::SERVER_STATUS_STATE)
            .await?;
        if result.status().is_bad() {
            warn!(status = %result.status(), "keep-alive read returned bad status");
        }
        Ok(())
    }

    /// Closes the session, deleting its subscriptions server-side.
    pub async fn close(&self) -> ClientResult<()> {
        let request = RequestMessage::CloseSession(CloseSessionRequest {
            request_header: self.request_header(),
            delete_subscriptions: true,
        });
        let response = self.transport.send_request(request, None).await?;
        expect_response!("CloseSession", response, CloseSession)?;
        debug!(session_id = %self.session_id, "session closed");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("endpoint", &self.endpoint.endpoint_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opclink_types::service::ApplicationDescription;

    fn endpoint(policy: SecurityPolicy, mode: MessageSecurityMode, level: u8) -> EndpointDescription {
        EndpointDescription {
            endpoint_url: UaString::from("opc.tcp://localhost:4840"),
            server: ApplicationDescription::client("urn:test", "test"),
            server_certificate: ByteString::null(),
            security_mode: mode,
            security_policy_uri: UaString::from(policy.uri()),
            user_identity_tokens: None,
            transport_profile_uri: UaString::null(),
            security_level: level,
        }
    }

    #[test]
    fn test_select_endpoint_by_policy_and_mode() {
        let endpoints = vec![
            endpoint(SecurityPolicy::None, MessageSecurityMode::None, 0),
            endpoint(
                SecurityPolicy::Basic256Sha256,
                MessageSecurityMode::SignAndEncrypt,
                3,
            ),
        ];
        let selected = select_endpoint(
            &endpoints,
            SecurityPolicy::Basic256Sha256,
            MessageSecurityMode::SignAndEncrypt,
        )
        .unwrap();
        assert_eq!(selected.security_level, 3);

        assert!(select_endpoint(
            &endpoints,
            SecurityPolicy::Basic128Rsa15,
            MessageSecurityMode::Sign
        )
        .is_err());
    }

    #[test]
    fn test_select_endpoint_prefers_higher_level() {
        let endpoints = vec![
            endpoint(SecurityPolicy::None, MessageSecurityMode::None, 1),
            endpoint(SecurityPolicy::None, MessageSecurityMode::None, 5),
        ];
        let selected =
            select_endpoint(&endpoints, SecurityPolicy::None, MessageSecurityMode::None).unwrap();
        assert_eq!(selected.security_level, 5);
    }
}
