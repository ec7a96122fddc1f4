// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The publish pump and subscription health monitor.
//!
//! While any subscription exists the client keeps a small fixed number of
//! Publish requests outstanding (one pump task per slot). Each response is
//! routed to observers by client handle, its sequence number queued for
//! acknowledgement, and gaps repaired with Republish. Dead subscriptions and
//! abandoned monitored items are reported to the supervisor for recreation
//! and cleanup.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use opclink_types::service::{
    NotificationData, PublishResponse, SubscriptionAcknowledgement,
};
use opclink_types::{DecodingOptions, StatusCode};

use crate::error::ClientError;
use crate::session::Session;
use crate::subscription::Registry;

/// Idle poll interval while no subscription is active.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Extra grace on top of the keep-alive deadline for the publish deadline.
const PUBLISH_GRACE: Duration = Duration::from_secs(10);

/// How often the monitor checks health and abandoned observers.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Events the pumps raise toward the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpEvent {
    /// One subscription must be recreated (dead or status-changed).
    RecreateSubscription(u32),

    /// Every server-side subscription is gone (`BadNoSubscription`).
    RecreateAll,

    /// The session or channel broke; the supervisor must reconnect.
    SessionBroken,
}

/// The deadline for one Publish: the longest keep-alive cycle plus grace.
fn publish_deadline(registry: &RwLock<Registry>) -> Duration {
    let registry = registry.read();
    registry
        .subscriptions
        .values()
        .filter(|subscription| subscription.server_id.is_some())
        .map(|subscription| subscription.settings.keep_alive_after())
        .max()
        .unwrap_or(IDLE_POLL)
        + PUBLISH_GRACE
}

/// One publish pump slot: issues Publish requests back to back.
pub(crate) async fn publish_pump(
    slot: usize,
    session: Arc<Session>,
    registry: Arc<RwLock<Registry>>,
    events: mpsc::Sender<PumpEvent>,
) {
    trace!(slot, "publish pump started");
    loop {
        if !registry.read().any_active() {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        }

        let acknowledgements: Vec<SubscriptionAcknowledgement> = registry
            .write()
            .drain_acks()
            .into_iter()
            .map(|(subscription_id, sequence_number)| SubscriptionAcknowledgement {
                subscription_id,
                sequence_number,
            })
            .collect();

        let deadline = publish_deadline(&registry);
        match session.publish(acknowledgements, deadline).await {
            Ok(response) => {
                handle_publish_response(&session, &registry, &events, response).await;
            }
            Err(error) => {
                if !handle_publish_error(&registry, &events, error).await {
                    trace!(slot, "publish pump stopping");
                    return;
                }
            }
        }
    }
}

/// Routes a publish response; repairs sequence gaps with Republish.
async fn handle_publish_response(
    session: &Session,
    registry: &RwLock<Registry>,
    events: &mpsc::Sender<PumpEvent>,
    response: PublishResponse,
) {
    let server_id = response.subscription_id;
    let message = &response.notification_message;

    // Sequence bookkeeping under the lock; Republish happens after.
    let (missing, local_id) = {
        let mut registry = registry.write();
        let Some(subscription) = registry.by_server_id(server_id) else {
            trace!(server_id, "publish response for unknown subscription");
            return;
        };
        subscription.last_activity = std::time::Instant::now();

        let mut missing = Vec::new();
        if !message.is_keep_alive() {
            if let Some(last) = subscription.last_sequence {
                let next = last.wrapping_add(1);
                if message.sequence_number > next {
                    missing.extend(next..message.sequence_number);
                }
            }
            subscription.last_sequence = Some(message.sequence_number);
            subscription.pending_acks.push(message.sequence_number);
        }
        (missing, subscription.local_id)
    };

    for sequence_number in missing {
        debug!(
            server_id,
            sequence_number, "republishing missed notification"
        );
        match session.republish(server_id, sequence_number).await {
            Ok(replayed) => {
                route_notifications(registry, server_id, &replayed.notification_message);
                if let Some(subscription) = registry.write().by_server_id(server_id) {
                    subscription.pending_acks.push(sequence_number);
                }
            }
            Err(error) if error.status() == StatusCode::BAD_MESSAGE_NOT_AVAILABLE => {
                warn!(
                    server_id,
                    sequence_number, "missed notification no longer available"
                );
            }
            Err(error) => {
                warn!(server_id, sequence_number, error = %error, "republish failed");
                break;
            }
        }
    }

    route_notifications(registry, server_id, message);

    // A bad status change (e.g. the subscription timed out server-side)
    // triggers recreation without touching the channel.
    for notification in message.decoded(&DecodingOptions::default()) {
        if let NotificationData::StatusChange(change) = notification {
            if change.status.is_bad() {
                debug!(server_id, status = %change.status, "subscription status change");
                let _ = events.send(PumpEvent::RecreateSubscription(local_id)).await;
            }
        }
    }
}

/// Delivers a notification message's contents to the registered observers.
fn route_notifications(
    registry: &RwLock<Registry>,
    server_id: u32,
    message: &opclink_types::service::NotificationMessage,
) {
    let notifications = message.decoded(&DecodingOptions::default());
    if notifications.is_empty() {
        return;
    }
    let mut registry = registry.write();
    for notification in notifications {
        match notification {
            NotificationData::DataChange(change) => {
                for item in change.monitored_items.unwrap_or_default() {
                    registry.route_value(server_id, item.client_handle, item.value);
                }
            }
            NotificationData::Events(events) => {
                for event in events.events.unwrap_or_default() {
                    registry.route_event(
                        server_id,
                        event.client_handle,
                        event.event_fields.unwrap_or_default(),
                    );
                }
            }
            NotificationData::StatusChange(_) => {}
        }
    }
}

/// Classifies a publish failure; returns `false` when the pump must stop.
async fn handle_publish_error(
    registry: &RwLock<Registry>,
    events: &mpsc::Sender<PumpEvent>,
    error: ClientError,
) -> bool {
    let status = error.status();
    match status {
        StatusCode::BAD_NO_SUBSCRIPTION => {
            debug!("server reports no subscriptions; requesting recreation");
            registry.write().reset_all_server_state();
            let _ = events.send(PumpEvent::RecreateAll).await;
            true
        }
        StatusCode::BAD_SUBSCRIPTION_ID_INVALID => {
            // One of ours is gone; the monitor will find it via its deadline.
            true
        }
        StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS => {
            tokio::time::sleep(Duration::from_millis(500)).await;
            true
        }
        StatusCode::BAD_TIMEOUT | StatusCode::BAD_REQUEST_TIMEOUT => {
            // The keep-alive deadline is generous; a timeout here usually
            // means the server stalled. Let the health monitor decide.
            warn!("publish timed out");
            true
        }
        _ if error.needs_reconnect() || matches!(error, ClientError::Channel(_)) => {
            let _ = events.send(PumpEvent::SessionBroken).await;
            false
        }
        _ => {
            warn!(error = %error, "publish failed");
            tokio::time::sleep(Duration::from_millis(500)).await;
            true
        }
    }
}

/// Health monitor: keep-alive deadlines and abandoned observers.
pub(crate) async fn subscription_monitor(
    session: Arc<Session>,
    registry: Arc<RwLock<Registry>>,
    events: mpsc::Sender<PumpEvent>,
) {
    let mut interval = tokio::time::interval(MONITOR_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;

        let dead_subscriptions = registry.read().dead_subscriptions();
        for local_id in dead_subscriptions {
            warn!(local_id, "subscription missed its lifetime deadline");
            let _ = events.send(PumpEvent::RecreateSubscription(local_id)).await;
        }

        // Items whose last observer dropped are deleted server-side.
        let abandoned = registry.read().abandoned_items();
        for (local_id, server_sub_id, client_handle, server_item_id) in abandoned {
            debug!(
                local_id,
                client_handle, "observer dropped; deleting monitored item"
            );
            match session
                .delete_monitored_items(server_sub_id, vec![server_item_id])
                .await
            {
                Ok(_) => {
                    let mut registry = registry.write();
                    if let Some(subscription) = registry.subscriptions.get_mut(&local_id) {
                        subscription.items.remove(&client_handle);
                    }
                }
                Err(error) => {
                    warn!(error = %error, "failed to delete abandoned monitored item");
                    if error.needs_reconnect() {
                        let _ = events.send(PumpEvent::SessionBroken).await;
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubscriptionSettings;

    #[test]
    fn test_publish_deadline_covers_keep_alive() {
        let registry = RwLock::new(Registry::default());
        // No active subscriptions: just the idle poll plus grace.
        assert_eq!(publish_deadline(&registry), IDLE_POLL + PUBLISH_GRACE);

        let local_id = registry.write().create_subscription(SubscriptionSettings {
            publishing_interval: Duration::from_millis(500),
            max_keep_alive_count: 10,
            ..Default::default()
        });
        registry
            .write()
            .subscriptions
            .get_mut(&local_id)
            .unwrap()
            .server_id = Some(1);
        assert_eq!(
            publish_deadline(&registry),
            Duration::from_secs(5) + PUBLISH_GRACE
        );
    }
}
