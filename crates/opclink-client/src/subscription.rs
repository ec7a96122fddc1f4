// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client-side subscription state and observer delivery.
//!
//! The registry is the *desired* state: subscriptions and monitored items
//! keyed by stable local ids and client handles. Server-assigned ids are
//! attached while a connection lives and replaced wholesale after a
//! reconnect, so observers keep routing across server restarts.
//!
//! Observers are a tagged variant with a single dispatch site, with no callback
//! object hierarchy:
//!
//! - [`Observer::Latest`]: overwrite a slot with the newest [`DataValue`]
//! - [`Observer::Unwrapped`]: overwrite a slot with the inner [`Variant`]
//! - [`Observer::Queue`]: append into a bounded queue of values
//! - [`Observer::EventQueue`]: append decoded event field lists

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{trace, warn};

use opclink_types::{DataValue, NodeId, Variant};

use crate::config::{MonitoredItemSettings, SubscriptionSettings};

// =============================================================================
// Bounded queue
// =============================================================================

/// A bounded observable queue with a `discard_oldest` overflow policy.
///
/// Evictions never happen silently: the eviction counter is readable and
/// every eviction is traced.
pub struct BoundedQueue<T> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    capacity: usize,
    discard_oldest: bool,
}

struct QueueState<T> {
    items: VecDeque<T>,
    evicted: u64,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BoundedQueue<T> {
    /// A queue holding at most `capacity` entries.
    pub fn new(capacity: usize, discard_oldest: bool) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity.min(1024)),
                    evicted: 0,
                }),
                notify: Notify::new(),
                capacity: capacity.max(1),
                discard_oldest,
            }),
        }
    }

    /// Appends an entry, evicting per the overflow policy when full.
    pub fn push(&self, item: T) {
        let mut state = self.inner.state.lock();
        if state.items.len() >= self.inner.capacity {
            if self.inner.discard_oldest {
                state.items.pop_front();
            } else {
                state.evicted += 1;
                trace!(evicted = state.evicted, "queue full, newest entry dropped");
                return;
            }
            state.evicted += 1;
            trace!(evicted = state.evicted, "queue full, oldest entry evicted");
        }
        state.items.push_back(item);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Removes the oldest entry without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.state.lock().items.pop_front()
    }

    /// Waits for and removes the oldest entry.
    pub async fn pop(&self) -> T {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Entries currently queued.
    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Returns `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries evicted by overflow since creation.
    pub fn evicted(&self) -> u64 {
        self.inner.state.lock().evicted
    }

    fn consumer_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

/// Queue of delivered data values.
pub type ValueQueue = BoundedQueue<DataValue>;

/// Queue of decoded event field lists.
pub type EventQueue = BoundedQueue<Vec<Variant>>;

// =============================================================================
// Observers
// =============================================================================

/// The delivery shape of one monitored item.
pub enum Observer {
    /// Overwrite a slot with the most recent value.
    Latest(watch::Sender<DataValue>),

    /// Overwrite a slot with only the inner value.
    Unwrapped(watch::Sender<Variant>),

    /// Append every value into a bounded queue.
    Queue(ValueQueue),

    /// Append every decoded event into a bounded queue.
    EventQueue(EventQueue),
}

impl Observer {
    /// Delivers a data change.
    pub(crate) fn deliver_value(&self, value: DataValue) {
        match self {
            Observer::Latest(slot) => {
                let _ = slot.send(value);
            }
            Observer::Unwrapped(slot) => {
                let _ = slot.send(value.value.unwrap_or_default());
            }
            Observer::Queue(queue) => queue.push(value),
            Observer::EventQueue(_) => {
                warn!("data change delivered to an event observer; dropped");
            }
        }
    }

    /// Delivers an event's field list.
    pub(crate) fn deliver_event(&self, fields: Vec<Variant>) {
        match self {
            Observer::EventQueue(queue) => queue.push(fields),
            _ => {
                warn!("event delivered to a data-change observer; dropped");
            }
        }
    }

    /// Returns `true` once every consumer-side handle has been dropped.
    ///
    /// Abandoned items are deleted server-side on the next management cycle.
    pub(crate) fn is_abandoned(&self) -> bool {
        match self {
            Observer::Latest(slot) => slot.is_closed(),
            Observer::Unwrapped(slot) => slot.is_closed(),
            // One strong count is the registry's own.
            Observer::Queue(queue) => queue.consumer_count() <= 1,
            Observer::EventQueue(queue) => queue.consumer_count() <= 1,
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = match self {
            Observer::Latest(_) => "Latest",
            Observer::Unwrapped(_) => "Unwrapped",
            Observer::Queue(_) => "Queue",
            Observer::EventQueue(_) => "EventQueue",
        };
        write!(f, "Observer::{}", shape)
    }
}

// =============================================================================
// Registry records
// =============================================================================

/// One monitored item: desired state plus current server binding.
#[derive(Debug)]
pub(crate) struct ItemSpec {
    /// Stable client handle; never changes across reconnects.
    pub client_handle: u32,

    /// The monitored node.
    pub node_id: NodeId,

    /// The monitored attribute.
    pub attribute_id: u32,

    /// Sampling parameters.
    pub settings: MonitoredItemSettings,

    /// Where deliveries go.
    pub observer: Observer,

    /// Server-assigned monitored item id for the current connection.
    pub server_id: Option<u32>,
}

/// One subscription: desired state plus current server binding.
#[derive(Debug)]
pub(crate) struct SubscriptionSpec {
    /// Stable local id handed to the application.
    pub local_id: u32,

    /// Requested parameters.
    pub settings: SubscriptionSettings,

    /// Server-assigned subscription id for the current connection.
    pub server_id: Option<u32>,

    /// Items keyed by client handle.
    pub items: HashMap<u32, ItemSpec>,

    /// Sequence numbers awaiting acknowledgement.
    pub pending_acks: Vec<u32>,

    /// Highest notification sequence seen this connection.
    pub last_sequence: Option<u32>,

    /// Last notification or keep-alive.
    pub last_activity: Instant,
}

impl SubscriptionSpec {
    fn new(local_id: u32, settings: SubscriptionSettings) -> Self {
        Self {
            local_id,
            settings,
            server_id: None,
            items: HashMap::new(),
            pending_acks: Vec::new(),
            last_sequence: None,
            last_activity: Instant::now(),
        }
    }

    /// Forgets the server binding (on disconnect or recreation).
    pub fn reset_server_state(&mut self) {
        self.server_id = None;
        self.pending_acks.clear();
        self.last_sequence = None;
        self.last_activity = Instant::now();
        for item in self.items.values_mut() {
            item.server_id = None;
        }
    }

    /// Returns `true` when the keep-alive deadline has lapsed.
    pub fn is_dead(&self) -> bool {
        self.server_id.is_some() && self.last_activity.elapsed() > self.settings.dead_after()
    }
}

/// The desired-state registry for one client.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub subscriptions: HashMap<u32, SubscriptionSpec>,
    next_local_id: u32,
    next_client_handle: u32,
}

impl Registry {
    /// Registers a subscription and returns its stable local id.
    pub fn create_subscription(&mut self, settings: SubscriptionSettings) -> u32 {
        self.next_local_id += 1;
        let local_id = self.next_local_id;
        self.subscriptions
            .insert(local_id, SubscriptionSpec::new(local_id, settings));
        local_id
    }

    /// Registers a monitored item and returns its stable client handle.
    pub fn add_item(
        &mut self,
        local_id: u32,
        node_id: NodeId,
        attribute_id: u32,
        settings: MonitoredItemSettings,
        observer: Observer,
    ) -> Option<u32> {
        let subscription = self.subscriptions.get_mut(&local_id)?;
        self.next_client_handle += 1;
        let client_handle = self.next_client_handle;
        subscription.items.insert(
            client_handle,
            ItemSpec {
                client_handle,
                node_id,
                attribute_id,
                settings,
                observer,
                server_id: None,
            },
        );
        Some(client_handle)
    }

    /// Finds a subscription by its current server id.
    pub fn by_server_id(&mut self, server_id: u32) -> Option<&mut SubscriptionSpec> {
        self.subscriptions
            .values_mut()
            .find(|subscription| subscription.server_id == Some(server_id))
    }

    /// Routes a data change by client handle within a server subscription.
    pub fn route_value(&mut self, server_id: u32, client_handle: u32, value: DataValue) {
        let Some(subscription) = self.by_server_id(server_id) else {
            trace!(server_id, "notification for unknown subscription");
            return;
        };
        match subscription.items.get(&client_handle) {
            Some(item) => item.observer.deliver_value(value),
            None => trace!(client_handle, "notification for unknown client handle"),
        }
    }

    /// Routes an event field list by client handle.
    pub fn route_event(&mut self, server_id: u32, client_handle: u32, fields: Vec<Variant>) {
        let Some(subscription) = self.by_server_id(server_id) else {
            trace!(server_id, "event for unknown subscription");
            return;
        };
        match subscription.items.get(&client_handle) {
            Some(item) => item.observer.deliver_event(fields),
            None => trace!(client_handle, "event for unknown client handle"),
        }
    }

    /// Drains pending acknowledgements across all subscriptions.
    pub fn drain_acks(&mut self) -> Vec<(u32, u32)> {
        let mut acks = Vec::new();
        for subscription in self.subscriptions.values_mut() {
            if let Some(server_id) = subscription.server_id {
                for sequence in subscription.pending_acks.drain(..) {
                    acks.push((server_id, sequence));
                }
            }
        }
        acks
    }

    /// Returns `true` while any subscription has a live server binding.
    pub fn any_active(&self) -> bool {
        self.subscriptions
            .values()
            .any(|subscription| subscription.server_id.is_some())
    }

    /// Clears every server binding (channel went down).
    pub fn reset_all_server_state(&mut self) {
        for subscription in self.subscriptions.values_mut() {
            subscription.reset_server_state();
        }
    }

    /// Local ids of subscriptions that missed their keep-alive deadline.
    pub fn dead_subscriptions(&self) -> Vec<u32> {
        self.subscriptions
            .values()
            .filter(|subscription| subscription.is_dead())
            .map(|subscription| subscription.local_id)
            .collect()
    }

    /// Abandoned items per subscription: `(local_id, server_sub_id,
    /// client_handle, server_item_id)`.
    pub fn abandoned_items(&self) -> Vec<(u32, u32, u32, u32)> {
        let mut abandoned = Vec::new();
        for subscription in self.subscriptions.values() {
            let Some(server_id) = subscription.server_id else {
                continue;
            };
            for item in subscription.items.values() {
                if let Some(item_server_id) = item.server_id {
                    if item.observer.is_abandoned() {
                        abandoned.push((
                            subscription.local_id,
                            server_id,
                            item.client_handle,
                            item_server_id,
                        ));
                    }
                }
            }
        }
        abandoned
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use opclink_types::AttributeId;

    #[test]
    fn test_queue_discard_oldest() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(3, true);
        for value in 1..=5 {
            queue.push(value);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted(), 2);
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), Some(4));
        assert_eq!(queue.try_pop(), Some(5));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_queue_discard_newest() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(2, false);
        for value in 1..=4 {
            queue.push(value);
        }
        assert_eq!(queue.evicted(), 2);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[tokio::test]
    async fn test_queue_async_pop() {
        let queue: BoundedQueue<i32> = BoundedQueue::new(4, true);
        let consumer = queue.clone();
        let task = tokio::spawn(async move { consumer.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.push(42);
        assert_eq!(task.await.unwrap(), 42);
    }

    #[test]
    fn test_registry_routing_by_client_handle() {
        let mut registry = Registry::default();
        let local_id = registry.create_subscription(SubscriptionSettings::default());

        let (slot, receiver) = watch::channel(DataValue::default());
        let client_handle = registry
            .add_item(
                local_id,
                NodeId::string(2, "Pump.Speed"),
                AttributeId::Value as u32,
                MonitoredItemSettings::default(),
                Observer::Latest(slot),
            )
            .unwrap();

        registry
            .subscriptions
            .get_mut(&local_id)
            .unwrap()
            .server_id = Some(99);

        registry.route_value(
            99,
            client_handle,
            DataValue::value_only(Variant::Double(7.5)),
        );
        assert_eq!(
            receiver.borrow().value,
            Some(Variant::Double(7.5)),
        );
    }

    #[test]
    fn test_reset_preserves_client_handles() {
        let mut registry = Registry::default();
        let local_id = registry.create_subscription(SubscriptionSettings::default());
        let (slot, _receiver) = watch::channel(DataValue::default());
        let client_handle = registry
            .add_item(
                local_id,
                NodeId::numeric(0, 2258),
                AttributeId::Value as u32,
                MonitoredItemSettings::default(),
                Observer::Latest(slot),
            )
            .unwrap();

        {
            let subscription = registry.subscriptions.get_mut(&local_id).unwrap();
            subscription.server_id = Some(10);
            subscription.items.get_mut(&client_handle).unwrap().server_id = Some(20);
        }
        registry.reset_all_server_state();

        let subscription = &registry.subscriptions[&local_id];
        assert!(subscription.server_id.is_none());
        let item = &subscription.items[&client_handle];
        assert!(item.server_id.is_none());
        assert_eq!(item.client_handle, client_handle);
    }

    #[test]
    fn test_abandoned_observer_detection() {
        let mut registry = Registry::default();
        let local_id = registry.create_subscription(SubscriptionSettings::default());
        let (slot, receiver) = watch::channel(DataValue::default());
        let client_handle = registry
            .add_item(
                local_id,
                NodeId::numeric(0, 2258),
                AttributeId::Value as u32,
                MonitoredItemSettings::default(),
                Observer::Latest(slot),
            )
            .unwrap();
        {
            let subscription = registry.subscriptions.get_mut(&local_id).unwrap();
            subscription.server_id = Some(1);
            subscription.items.get_mut(&client_handle).unwrap().server_id = Some(2);
        }

        assert!(registry.abandoned_items().is_empty());
        drop(receiver);
        assert_eq!(registry.abandoned_items().len(), 1);
    }
}
