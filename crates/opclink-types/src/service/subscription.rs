// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription, monitored item, and publish service messages.

use serde::{Deserialize, Serialize};

use crate::date_time::UaDateTime;
use crate::diagnostic_info::DiagnosticInfo;
use crate::encoding::DecodingOptions;
use crate::extension_object::ExtensionObject;
use crate::status::StatusCode;
use crate::variant::Variant;

use super::attributes::{ReadValueId, TimestampsToReturn};
use super::{object_id, RequestHeader, ResponseHeader};

ua_enum! {
    /// Sampling/reporting state of a monitored item.
    MonitoringMode {
        /// Neither sampling nor reporting.
        Disabled = 0,
        /// Sampling without reporting.
        Sampling = 1,
        /// Sampling and reporting.
        Reporting = 2,
    }
}

impl Default for MonitoringMode {
    fn default() -> Self {
        MonitoringMode::Reporting
    }
}

// =============================================================================
// Subscription management
// =============================================================================

/// Creates a server-side subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// Requested publishing cycle in milliseconds.
    pub requested_publishing_interval: f64,

    /// Cycles without a Publish before the server drops the subscription.
    pub requested_lifetime_count: u32,

    /// Cycles without notifications before an empty keep-alive is sent.
    pub requested_max_keep_alive_count: u32,

    /// Cap on notifications per Publish response; 0 = no limit.
    pub max_notifications_per_publish: u32,

    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,

    /// Relative priority among this session's subscriptions.
    pub priority: u8,
}

binary_encodable_impl!(CreateSubscriptionRequest:
    request_header,
    requested_publishing_interval,
    requested_lifetime_count,
    requested_max_keep_alive_count,
    max_notifications_per_publish,
    publishing_enabled,
    priority,
);

/// Result of creating a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CreateSubscriptionResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// Server-assigned subscription id.
    pub subscription_id: u32,

    /// Granted publishing cycle in milliseconds.
    pub revised_publishing_interval: f64,

    /// Granted lifetime count.
    pub revised_lifetime_count: u32,

    /// Granted keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

binary_encodable_impl!(CreateSubscriptionResponse:
    response_header,
    subscription_id,
    revised_publishing_interval,
    revised_lifetime_count,
    revised_max_keep_alive_count,
);

/// Changes the parameters of an existing subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifySubscriptionRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The subscription to modify.
    pub subscription_id: u32,

    /// Requested publishing cycle in milliseconds.
    pub requested_publishing_interval: f64,

    /// Requested lifetime count.
    pub requested_lifetime_count: u32,

    /// Requested keep-alive count.
    pub requested_max_keep_alive_count: u32,

    /// Cap on notifications per Publish response; 0 = no limit.
    pub max_notifications_per_publish: u32,

    /// Relative priority among this session's subscriptions.
    pub priority: u8,
}

binary_encodable_impl!(ModifySubscriptionRequest:
    request_header,
    subscription_id,
    requested_publishing_interval,
    requested_lifetime_count,
    requested_max_keep_alive_count,
    max_notifications_per_publish,
    priority,
);

/// Result of modifying a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModifySubscriptionResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// Granted publishing cycle in milliseconds.
    pub revised_publishing_interval: f64,

    /// Granted lifetime count.
    pub revised_lifetime_count: u32,

    /// Granted keep-alive count.
    pub revised_max_keep_alive_count: u32,
}

binary_encodable_impl!(ModifySubscriptionResponse:
    response_header,
    revised_publishing_interval,
    revised_lifetime_count,
    revised_max_keep_alive_count,
);

/// Enables or disables publishing for a set of subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetPublishingModeRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The publishing state to apply.
    pub publishing_enabled: bool,

    /// The subscriptions to change.
    pub subscription_ids: Option<Vec<u32>>,
}

binary_encodable_impl!(SetPublishingModeRequest:
    request_header,
    publishing_enabled,
    subscription_ids,
);

/// Per-subscription results for SetPublishingMode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SetPublishingModeResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One status per subscription id, in order.
    pub results: Option<Vec<StatusCode>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(SetPublishingModeResponse:
    response_header,
    results,
    diagnostic_infos,
);

/// Deletes subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteSubscriptionsRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The subscriptions to delete.
    pub subscription_ids: Option<Vec<u32>>,
}

binary_encodable_impl!(DeleteSubscriptionsRequest: request_header, subscription_ids);

/// Per-subscription results for DeleteSubscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeleteSubscriptionsResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One status per subscription id, in order.
    pub results: Option<Vec<StatusCode>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(DeleteSubscriptionsResponse:
    response_header,
    results,
    diagnostic_infos,
);

// =============================================================================
// Monitored items
// =============================================================================

/// Requested sampling parameters for a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringParameters {
    /// Client-chosen handle used to route notifications.
    pub client_handle: u32,

    /// Sampling cycle in milliseconds; −1 inherits the publishing interval.
    pub sampling_interval: f64,

    /// Data change / event filter; null for none.
    pub filter: ExtensionObject,

    /// Server-side queue depth for this item.
    pub queue_size: u32,

    /// On overflow, drop the oldest (true) or newest (false) entry.
    pub discard_oldest: bool,
}

binary_encodable_impl!(MonitoringParameters:
    client_handle,
    sampling_interval,
    filter,
    queue_size,
    discard_oldest,
);

/// One monitored item to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemCreateRequest {
    /// The node/attribute pair to sample.
    pub item_to_monitor: ReadValueId,

    /// Initial monitoring mode.
    pub monitoring_mode: MonitoringMode,

    /// Requested sampling parameters.
    pub requested_parameters: MonitoringParameters,
}

binary_encodable_impl!(MonitoredItemCreateRequest:
    item_to_monitor,
    monitoring_mode,
    requested_parameters,
);

/// Result of creating one monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MonitoredItemCreateResult {
    /// Result for this item.
    pub status_code: StatusCode,

    /// Server-assigned monitored item id.
    pub monitored_item_id: u32,

    /// Granted sampling interval.
    pub revised_sampling_interval: f64,

    /// Granted queue size.
    pub revised_queue_size: u32,

    /// Result of filter negotiation.
    pub filter_result: ExtensionObject,
}

binary_encodable_impl!(MonitoredItemCreateResult:
    status_code,
    monitored_item_id,
    revised_sampling_interval,
    revised_queue_size,
    filter_result,
);

/// One monitored item to modify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemModifyRequest {
    /// The item to modify.
    pub monitored_item_id: u32,

    /// New sampling parameters.
    pub requested_parameters: MonitoringParameters,
}

binary_encodable_impl!(MonitoredItemModifyRequest:
    monitored_item_id,
    requested_parameters,
);

/// Result of modifying one monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MonitoredItemModifyResult {
    /// Result for this item.
    pub status_code: StatusCode,

    /// Granted sampling interval.
    pub revised_sampling_interval: f64,

    /// Granted queue size.
    pub revised_queue_size: u32,

    /// Result of filter negotiation.
    pub filter_result: ExtensionObject,
}

binary_encodable_impl!(MonitoredItemModifyResult:
    status_code,
    revised_sampling_interval,
    revised_queue_size,
    filter_result,
);

/// Adds monitored items to a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMonitoredItemsRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The owning subscription.
    pub subscription_id: u32,

    /// Timestamps to attach to sampled values.
    pub timestamps_to_return: TimestampsToReturn,

    /// The items to create.
    pub items_to_create: Option<Vec<MonitoredItemCreateRequest>>,
}

binary_encodable_impl!(CreateMonitoredItemsRequest:
    request_header,
    subscription_id,
    timestamps_to_return,
    items_to_create,
);

/// Per-item results for CreateMonitoredItems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CreateMonitoredItemsResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One result per requested item, in order.
    pub results: Option<Vec<MonitoredItemCreateResult>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(CreateMonitoredItemsResponse:
    response_header,
    results,
    diagnostic_infos,
);

/// Modifies monitored items of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyMonitoredItemsRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The owning subscription.
    pub subscription_id: u32,

    /// Timestamps to attach to sampled values.
    pub timestamps_to_return: TimestampsToReturn,

    /// The modifications to apply.
    pub items_to_modify: Option<Vec<MonitoredItemModifyRequest>>,
}

binary_encodable_impl!(ModifyMonitoredItemsRequest:
    request_header,
    subscription_id,
    timestamps_to_return,
    items_to_modify,
);

/// Per-item results for ModifyMonitoredItems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModifyMonitoredItemsResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One result per modification, in order.
    pub results: Option<Vec<MonitoredItemModifyResult>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(ModifyMonitoredItemsResponse:
    response_header,
    results,
    diagnostic_infos,
);

/// Removes monitored items from a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteMonitoredItemsRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The owning subscription.
    pub subscription_id: u32,

    /// Server-assigned ids of the items to delete.
    pub monitored_item_ids: Option<Vec<u32>>,
}

binary_encodable_impl!(DeleteMonitoredItemsRequest:
    request_header,
    subscription_id,
    monitored_item_ids,
);

/// Per-item results for DeleteMonitoredItems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeleteMonitoredItemsResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// One status per deleted item, in order.
    pub results: Option<Vec<StatusCode>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(DeleteMonitoredItemsResponse:
    response_header,
    results,
    diagnostic_infos,
);

// =============================================================================
// Publish / Republish
// =============================================================================

/// Acknowledges receipt of a notification message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionAcknowledgement {
    /// The subscription the message belonged to.
    pub subscription_id: u32,

    /// Sequence number being acknowledged.
    pub sequence_number: u32,
}

binary_encodable_impl!(SubscriptionAcknowledgement: subscription_id, sequence_number);

/// A batch of notifications for one publishing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NotificationMessage {
    /// Sequence number of this message within its subscription.
    pub sequence_number: u32,

    /// When the message was queued for publishing.
    pub publish_time: UaDateTime,

    /// The notifications, each a DataChange / Event / StatusChange
    /// extension object. Empty for a keep-alive.
    pub notification_data: Option<Vec<ExtensionObject>>,
}

impl NotificationMessage {
    /// Returns `true` when this message carries no notifications.
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data
            .as_ref()
            .map(Vec::is_empty)
            .unwrap_or(true)
    }

    /// Decodes the typed notifications, skipping unknown kinds.
    pub fn decoded(&self, options: &DecodingOptions) -> Vec<NotificationData> {
        let Some(entries) = &self.notification_data else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| match entry.type_id.as_numeric() {
                Some(object_id::DATA_CHANGE_NOTIFICATION) => entry
                    .decode_inner::<DataChangeNotification>(options)
                    .ok()
                    .map(NotificationData::DataChange),
                Some(object_id::EVENT_NOTIFICATION_LIST) => entry
                    .decode_inner::<EventNotificationList>(options)
                    .ok()
                    .map(NotificationData::Events),
                Some(object_id::STATUS_CHANGE_NOTIFICATION) => entry
                    .decode_inner::<StatusChangeNotification>(options)
                    .ok()
                    .map(NotificationData::StatusChange),
                _ => None,
            })
            .collect()
    }
}

binary_encodable_impl!(NotificationMessage: sequence_number, publish_time, notification_data);

/// A typed view over one notification entry.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationData {
    /// Data change notifications.
    DataChange(DataChangeNotification),
    /// Event notifications.
    Events(EventNotificationList),
    /// A subscription status change.
    StatusChange(StatusChangeNotification),
}

/// A sampled value for one monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemNotification {
    /// The client handle given at item creation.
    pub client_handle: u32,

    /// The delivered value.
    pub value: crate::data_value::DataValue,
}

binary_encodable_impl!(MonitoredItemNotification: client_handle, value);

/// Data change notifications for one publishing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DataChangeNotification {
    /// The changed items.
    pub monitored_items: Option<Vec<MonitoredItemNotification>>,

    /// Diagnostics for the items.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(DataChangeNotification: monitored_items, diagnostic_infos);

/// Event fields for one monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFieldList {
    /// The client handle given at item creation.
    pub client_handle: u32,

    /// Selected event fields, in select-clause order.
    pub event_fields: Option<Vec<Variant>>,
}

binary_encodable_impl!(EventFieldList: client_handle, event_fields);

/// Event notifications for one publishing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EventNotificationList {
    /// The events.
    pub events: Option<Vec<EventFieldList>>,
}

binary_encodable_impl!(EventNotificationList: events);

/// Announces a change in the subscription's own status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusChangeNotification {
    /// The new subscription status.
    pub status: StatusCode,

    /// Diagnostics for the change.
    pub diagnostic_info: DiagnosticInfo,
}

binary_encodable_impl!(StatusChangeNotification: status, diagnostic_info);

/// Requests the next notification message for any subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// Acknowledgements for previously received messages.
    pub subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
}

binary_encodable_impl!(PublishRequest: request_header, subscription_acknowledgements);

/// A notification message, or keep-alive, for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PublishResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// The subscription this message belongs to.
    pub subscription_id: u32,

    /// Sequence numbers still available for Republish.
    pub available_sequence_numbers: Option<Vec<u32>>,

    /// More notifications are queued beyond this message.
    pub more_notifications: bool,

    /// The notification payload.
    pub notification_message: NotificationMessage,

    /// Results for the acknowledgements sent in the request.
    pub results: Option<Vec<StatusCode>>,

    /// Diagnostics for `results`.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

binary_encodable_impl!(PublishResponse:
    response_header,
    subscription_id,
    available_sequence_numbers,
    more_notifications,
    notification_message,
    results,
    diagnostic_infos,
);

/// Requests retransmission of a missed notification message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepublishRequest {
    /// Common request parameters.
    pub request_header: RequestHeader,

    /// The subscription to replay from.
    pub subscription_id: u32,

    /// Sequence number of the message to retransmit.
    pub retransmit_sequence_number: u32,
}

binary_encodable_impl!(RepublishRequest:
    request_header,
    subscription_id,
    retransmit_sequence_number,
);

/// The retransmitted notification message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RepublishResponse {
    /// Common response parameters.
    pub response_header: ResponseHeader,

    /// The replayed message.
    pub notification_message: NotificationMessage,
}

binary_encodable_impl!(RepublishResponse: response_header, notification_message);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_value::DataValue;
    use crate::encoding::BinaryEncodable;
    use crate::node_id::NodeId;
    use std::io::Cursor;

    #[test]
    fn test_publish_response_round_trip() {
        let notification = DataChangeNotification {
            monitored_items: Some(vec![MonitoredItemNotification {
                client_handle: 17,
                value: DataValue::value_only(Variant::Double(21.5)),
            }]),
            diagnostic_infos: None,
        };
        let response = PublishResponse {
            subscription_id: 4,
            available_sequence_numbers: Some(vec![8, 9]),
            more_notifications: false,
            notification_message: NotificationMessage {
                sequence_number: 9,
                publish_time: UaDateTime::now(),
                notification_data: Some(vec![ExtensionObject::from_encodable(
                    NodeId::numeric(0, object_id::DATA_CHANGE_NOTIFICATION),
                    &notification,
                )
                .unwrap()]),
            },
            ..Default::default()
        };

        let buf = response.encode_to_vec().unwrap();
        let decoded =
            PublishResponse::decode(&mut Cursor::new(buf), &DecodingOptions::default()).unwrap();
        assert_eq!(response, decoded);

        let typed = decoded
            .notification_message
            .decoded(&DecodingOptions::default());
        match &typed[..] {
            [NotificationData::DataChange(change)] => {
                let items = change.monitored_items.as_ref().unwrap();
                assert_eq!(items[0].client_handle, 17);
            }
            other => panic!("unexpected notifications: {:?}", other),
        }
    }

    #[test]
    fn test_keep_alive_detection() {
        let keep_alive = NotificationMessage {
            sequence_number: 3,
            publish_time: UaDateTime::now(),
            notification_data: None,
        };
        assert!(keep_alive.is_keep_alive());
    }
}
