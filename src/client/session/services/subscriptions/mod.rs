// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

mod cache;
pub(crate) mod event_loop;
mod sequence;
mod service;
pub(crate) mod state;

use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, Instant},
};

use crate::{
    client::Error,
    types::{
        DataValue, DecodingOptions, ExtensionObject, MonitoringFilter, MonitoringMode, NodeId,
        NotificationMessage, ReadValueId, StatusChangeNotification, StatusCode, Variant,
    },
};

use self::{cache::ItemCache, sequence::SequenceTracker};

pub use event_loop::SubscriptionActivity;
pub use service::MonitoredItemModification;
pub use state::SubscriptionState;

/// A set of callbacks for notifications on a subscription.
/// You may implement this on your own struct, or simply use [SubscriptionCallbacks]
/// for a simple collection of closures.
pub trait OnSubscriptionNotification: Send + Sync {
    /// Called when a subscription changes state on the server.
    fn on_subscription_status_change(&mut self, _notification: StatusChangeNotification) {}

    /// Called for each data value change.
    fn on_data_value(&mut self, _notification: DataValue, _item: &MonitoredItem) {}

    /// Called for each received event.
    fn on_event(&mut self, _event_fields: Option<Vec<Variant>>, _item: &MonitoredItem) {}

    /// Called for each keep-alive of the subscription. The sequence number is the one the
    /// next notification will carry.
    fn on_keep_alive(&mut self, _subscription_id: u32, _sequence_number: u32) {}

    /// Called when a missing notification could not be recovered from the server.
    fn on_data_loss(&mut self, _subscription_id: u32, _sequence_number: u32, _status: StatusCode) {}
}

type StatusChangeFn = Box<dyn FnMut(StatusChangeNotification) + Send + Sync>;
type DataValueFn = Box<dyn FnMut(DataValue, &MonitoredItem) + Send + Sync>;
type EventFn = Box<dyn FnMut(Option<Vec<Variant>>, &MonitoredItem) + Send + Sync>;

/// A convenient wrapper around a set of callback functions that implements [OnSubscriptionNotification]
pub struct SubscriptionCallbacks {
    status_change: StatusChangeFn,
    data_value: DataValueFn,
    event: EventFn,
}

impl SubscriptionCallbacks {
    /// Create a new subscription callback wrapper.
    ///
    /// # Arguments
    ///
    /// * `status_change` - Called when a subscription changes state on the server.
    /// * `data_value` - Called for each received data value.
    /// * `event` - Called for each received event.
    pub fn new(
        status_change: impl FnMut(StatusChangeNotification) + Send + Sync + 'static,
        data_value: impl FnMut(DataValue, &MonitoredItem) + Send + Sync + 'static,
        event: impl FnMut(Option<Vec<Variant>>, &MonitoredItem) + Send + Sync + 'static,
    ) -> Self {
        Self {
            status_change: Box::new(status_change),
            data_value: Box::new(data_value),
            event: Box::new(event),
        }
    }
}

impl OnSubscriptionNotification for SubscriptionCallbacks {
    fn on_subscription_status_change(&mut self, notification: StatusChangeNotification) {
        (self.status_change)(notification);
    }

    fn on_data_value(&mut self, notification: DataValue, item: &MonitoredItem) {
        (self.data_value)(notification, item);
    }

    fn on_event(&mut self, event_fields: Option<Vec<Variant>>, item: &MonitoredItem) {
        (self.event)(event_fields, item);
    }
}

/// A wrapper around a data change callback that implements [OnSubscriptionNotification]
pub struct DataChangeCallback {
    data_value: DataValueFn,
}

impl DataChangeCallback {
    /// Create a new data change callback wrapper.
    ///
    /// # Arguments
    ///
    /// * `data_value` - Called for each received data value.
    pub fn new(data_value: impl FnMut(DataValue, &MonitoredItem) + Send + Sync + 'static) -> Self {
        Self {
            data_value: Box::new(data_value),
        }
    }
}

impl OnSubscriptionNotification for DataChangeCallback {
    fn on_data_value(&mut self, notification: DataValue, item: &MonitoredItem) {
        (self.data_value)(notification, item);
    }
}

/// A wrapper around an event callback that implements [OnSubscriptionNotification]
pub struct EventCallback {
    event: EventFn,
}

impl EventCallback {
    /// Create a new event callback wrapper.
    pub fn new(
        event: impl FnMut(Option<Vec<Variant>>, &MonitoredItem) + Send + Sync + 'static,
    ) -> Self {
        Self {
            event: Box::new(event),
        }
    }
}

impl OnSubscriptionNotification for EventCallback {
    fn on_event(&mut self, event_fields: Option<Vec<Variant>>, item: &MonitoredItem) {
        (self.event)(event_fields, item);
    }
}

/// The queue size asked of the server for a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSize {
    /// Exactly this many values
    Fixed(u32),
    /// Enough values to cover one publishing interval at the sampling rate
    Auto,
}

impl Default for QueueSize {
    fn default() -> Self {
        QueueSize::Fixed(1)
    }
}

impl QueueSize {
    pub(crate) fn resolve(&self, publishing_interval: Duration, sampling_interval: f64) -> u32 {
        match self {
            QueueSize::Fixed(n) => *n,
            QueueSize::Auto => {
                auto_queue_size(publishing_interval.as_secs_f64() * 1000.0, sampling_interval)
            }
        }
    }
}

/// Queue size that holds every sample taken in one publishing interval plus one, never less
/// than 2. A sampling interval of zero or less samples at the publishing interval.
pub fn auto_queue_size(publishing_interval_ms: f64, sampling_interval_ms: f64) -> u32 {
    let ratio = if sampling_interval_ms <= 0.0 || !sampling_interval_ms.is_finite() {
        1.0
    } else {
        (publishing_interval_ms / sampling_interval_ms).ceil()
    };
    let size = if ratio.is_finite() && ratio > 0.0 {
        (ratio.min(u32::MAX as f64 - 1.0) as u32).saturating_add(1)
    } else {
        1
    };
    size.max(2)
}

/// Lifecycle of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoredItemState {
    /// Not yet confirmed by the server
    Pending,
    /// Created on the server
    Created,
    /// Modified since creation
    Modified,
    /// The server rejected the item. Its client handle stays reserved.
    Failed(StatusCode),
    /// Deleted, nothing may happen to the item any more
    Deleted,
}

impl MonitoredItemState {
    fn can_move_to(&self, next: MonitoredItemState) -> bool {
        use MonitoredItemState::*;
        matches!(
            (self, next),
            (Pending, Created)
                | (Pending, Failed(_))
                | (Pending, Deleted)
                | (Created, Modified)
                | (Modified, Modified)
                | (Created, Pending)
                | (Modified, Pending)
                | (Created, Deleted)
                | (Modified, Deleted)
                | (Failed(_), Deleted)
        )
    }
}

/// What to monitor and how, the input to creating a monitored item.
#[derive(Debug, Clone)]
pub struct MonitoredItemRequest {
    pub item_to_monitor: ReadValueId,
    pub monitoring_mode: MonitoringMode,
    /// Sampling interval in milliseconds, 0 for as fast as possible, negative for the
    /// publishing interval
    pub sampling_interval: f64,
    pub queue_size: QueueSize,
    pub discard_oldest: bool,
    pub filter: MonitoringFilter,
}

impl MonitoredItemRequest {
    /// Reports changes of the value attribute of a node.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self::from(ReadValueId::from(node_id.into()))
    }

    pub fn sampling_interval(mut self, sampling_interval: f64) -> Self {
        self.sampling_interval = sampling_interval;
        self
    }

    pub fn queue_size(mut self, queue_size: QueueSize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn discard_oldest(mut self, discard_oldest: bool) -> Self {
        self.discard_oldest = discard_oldest;
        self
    }

    pub fn monitoring_mode(mut self, monitoring_mode: MonitoringMode) -> Self {
        self.monitoring_mode = monitoring_mode;
        self
    }

    pub fn filter(mut self, filter: MonitoringFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl From<ReadValueId> for MonitoredItemRequest {
    fn from(item_to_monitor: ReadValueId) -> Self {
        Self {
            item_to_monitor,
            monitoring_mode: MonitoringMode::Reporting,
            sampling_interval: -1.0,
            queue_size: QueueSize::default(),
            discard_oldest: true,
            filter: MonitoringFilter::None,
        }
    }
}

pub struct MonitoredItem {
    /// Server assigned id, 0 until created
    id: u32,
    /// Client assigned handle, unique within the session
    client_handle: u32,
    item_to_monitor: ReadValueId,
    monitoring_mode: MonitoringMode,
    /// Revised sampling interval
    sampling_interval: f64,
    /// What was asked for, kept to recreate the item
    requested_sampling_interval: f64,
    requested_queue_size: QueueSize,
    /// Revised queue size
    queue_size: u32,
    discard_oldest: bool,
    filter: ExtensionObject,
    /// Client handles of the items this item triggers
    triggered_items: BTreeSet<u32>,
    state: MonitoredItemState,
    cache: ItemCache,
}

impl MonitoredItem {
    pub(crate) fn new(client_handle: u32, request: &MonitoredItemRequest, queue_size: u32) -> Self {
        Self {
            id: 0,
            client_handle,
            item_to_monitor: request.item_to_monitor.clone(),
            monitoring_mode: request.monitoring_mode,
            sampling_interval: request.sampling_interval,
            requested_sampling_interval: request.sampling_interval,
            requested_queue_size: request.queue_size,
            queue_size,
            discard_oldest: request.discard_oldest,
            filter: request.filter.to_extension_object(),
            triggered_items: BTreeSet::new(),
            state: MonitoredItemState::Pending,
            cache: ItemCache::new(queue_size as usize, request.discard_oldest),
        }
    }

    /// Server assigned ID of the monitored item.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Client assigned handle for the monitored item.
    pub fn client_handle(&self) -> u32 {
        self.client_handle
    }

    /// Attribute and node ID for the item the monitored item receives notifications for.
    pub fn item_to_monitor(&self) -> &ReadValueId {
        &self.item_to_monitor
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    /// Queue size on the server.
    pub fn queue_size(&self) -> u32 {
        self.queue_size
    }

    pub fn discard_oldest(&self) -> bool {
        self.discard_oldest
    }

    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.monitoring_mode
    }

    pub fn state(&self) -> MonitoredItemState {
        self.state
    }

    pub fn triggered_items(&self) -> &BTreeSet<u32> {
        &self.triggered_items
    }

    /// The most recent value received, kept after the queue is drained.
    pub fn last_value(&self) -> Option<&DataValue> {
        self.cache.last_value()
    }

    pub(crate) fn filter(&self) -> &ExtensionObject {
        &self.filter
    }

    pub(crate) fn requested_sampling_interval(&self) -> f64 {
        self.requested_sampling_interval
    }

    pub(crate) fn requested_queue_size(&self) -> QueueSize {
        self.requested_queue_size
    }

    pub(crate) fn is_live(&self) -> bool {
        matches!(
            self.state,
            MonitoredItemState::Created | MonitoredItemState::Modified
        )
    }

    /// Moves the item to another state. Leaving `Deleted` is a bug in the caller.
    pub(crate) fn transition(&mut self, next: MonitoredItemState) -> Result<(), Error> {
        if self.state == MonitoredItemState::Deleted {
            debug_assert!(
                false,
                "monitored item {} is deleted and cannot become {:?}",
                self.client_handle, next
            );
            return Err(Error::State(format!(
                "monitored item {} is deleted",
                self.client_handle
            )));
        }
        if !self.state.can_move_to(next) {
            return Err(Error::State(format!(
                "monitored item {} cannot move from {:?} to {:?}",
                self.client_handle, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn set_created(
        &mut self,
        id: u32,
        revised_sampling_interval: f64,
        revised_queue_size: u32,
    ) -> Result<(), Error> {
        self.transition(MonitoredItemState::Created)?;
        self.id = id;
        self.apply_revised(revised_sampling_interval, revised_queue_size);
        Ok(())
    }

    pub(crate) fn set_modified(
        &mut self,
        revised_sampling_interval: f64,
        revised_queue_size: u32,
        request: Option<(f64, QueueSize)>,
    ) -> Result<(), Error> {
        self.transition(MonitoredItemState::Modified)?;
        if let Some((sampling_interval, queue_size)) = request {
            self.requested_sampling_interval = sampling_interval;
            self.requested_queue_size = queue_size;
        }
        self.apply_revised(revised_sampling_interval, revised_queue_size);
        Ok(())
    }

    /// Back to pending ahead of being created again for a new subscription. The server id is gone.
    pub(crate) fn set_recreating(&mut self) -> Result<(), Error> {
        self.transition(MonitoredItemState::Pending)?;
        self.id = 0;
        Ok(())
    }

    fn apply_revised(&mut self, sampling_interval: f64, queue_size: u32) {
        self.sampling_interval = sampling_interval;
        // Servers return 0 for items they do not queue
        self.queue_size = queue_size.max(1);
        self.cache
            .reconfigure(self.queue_size as usize, self.discard_oldest);
    }

    pub(crate) fn set_discard_oldest(&mut self, discard_oldest: bool) {
        self.discard_oldest = discard_oldest;
    }

    pub(crate) fn set_monitoring_mode(&mut self, monitoring_mode: MonitoringMode) {
        self.monitoring_mode = monitoring_mode;
    }

    pub(crate) fn set_triggering(&mut self, links_to_add: &[u32], links_to_remove: &[u32]) {
        links_to_remove.iter().for_each(|i| {
            self.triggered_items.remove(i);
        });
        links_to_add.iter().for_each(|i| {
            self.triggered_items.insert(*i);
        });
    }

    pub(crate) fn drain_values(&mut self) -> Vec<DataValue> {
        self.cache.drain()
    }

    pub fn snapshot(&self) -> MonitoredItemSnapshot {
        MonitoredItemSnapshot {
            client_handle: self.client_handle,
            monitored_item_id: self.id,
            item_to_monitor: self.item_to_monitor.clone(),
            state: self.state,
            monitoring_mode: self.monitoring_mode,
            sampling_interval: self.sampling_interval,
            queue_size: self.queue_size,
            discard_oldest: self.discard_oldest,
            queued_values: self.cache.len(),
            last_value: self.cache.last_value().cloned(),
        }
    }
}

/// A copy of a monitored item at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemSnapshot {
    pub client_handle: u32,
    pub monitored_item_id: u32,
    pub item_to_monitor: ReadValueId,
    pub state: MonitoredItemState,
    pub monitoring_mode: MonitoringMode,
    pub sampling_interval: f64,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub queued_values: usize,
    pub last_value: Option<DataValue>,
}

/// A copy of a subscription and its items at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    /// The id handed out when the subscription was created
    pub subscription_id: u32,
    /// The id the server currently knows it by, 0 while it is being created again
    pub server_subscription_id: u32,
    pub publishing_interval: Duration,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub priority: u8,
    pub publishing_enabled: bool,
    pub keep_alive_stopped: bool,
    pub last_sequence_number: Option<u32>,
    /// Ordered by client handle
    pub monitored_items: Vec<MonitoredItemSnapshot>,
}

pub struct Subscription {
    /// Local subscription id, stays the same when the server assigns a new one
    subscription_id: u32,
    /// Subscription id, supplied by server
    server_id: u32,
    publishing_interval: Duration,
    /// Lifetime count, revised by server
    lifetime_count: u32,
    /// Max keep alive count, revised by server
    max_keep_alive_count: u32,
    /// Max notifications per publish, revised by server
    max_notifications_per_publish: u32,
    publishing_enabled: bool,
    priority: u8,

    /// Monitored items by client handle
    monitored_items: HashMap<u32, MonitoredItem>,
    /// Server assigned monitored item id to client handle
    server_ids: HashMap<u32, u32>,

    callback: Box<dyn OnSubscriptionNotification>,
    sequence: SequenceTracker,
    /// Time of the last publish response for this subscription
    last_message: Instant,
    keep_alive_stopped: bool,
}

impl Subscription {
    /// Creates a new subscription using the supplied parameters and callback.
    pub fn new(
        subscription_id: u32,
        publishing_interval: Duration,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        priority: u8,
        publishing_enabled: bool,
        callback: Box<dyn OnSubscriptionNotification>,
    ) -> Subscription {
        Subscription {
            subscription_id,
            server_id: subscription_id,
            publishing_interval,
            lifetime_count,
            max_keep_alive_count,
            max_notifications_per_publish,
            publishing_enabled,
            priority,
            monitored_items: HashMap::new(),
            server_ids: HashMap::new(),
            callback,
            sequence: SequenceTracker::default(),
            last_message: Instant::now(),
            keep_alive_stopped: false,
        }
    }

    /// Monitored items by client handle.
    pub fn monitored_items(&self) -> &HashMap<u32, MonitoredItem> {
        &self.monitored_items
    }

    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    pub fn server_subscription_id(&self) -> u32 {
        self.server_id
    }

    pub fn publishing_interval(&self) -> Duration {
        self.publishing_interval
    }

    pub fn lifetime_count(&self) -> u32 {
        self.lifetime_count
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn max_keep_alive_count(&self) -> u32 {
        self.max_keep_alive_count
    }

    pub fn max_notifications_per_publish(&self) -> u32 {
        self.max_notifications_per_publish
    }

    pub fn publishing_enabled(&self) -> bool {
        self.publishing_enabled
    }

    pub fn keep_alive_stopped(&self) -> bool {
        self.keep_alive_stopped
    }

    pub(crate) fn set_subscription_id(&mut self, subscription_id: u32) {
        self.subscription_id = subscription_id;
    }

    pub(crate) fn set_server_subscription_id(&mut self, server_id: u32) {
        self.server_id = server_id;
    }

    pub(crate) fn set_revised(
        &mut self,
        publishing_interval: Duration,
        lifetime_count: u32,
        max_keep_alive_count: u32,
    ) {
        self.publishing_interval = publishing_interval;
        self.lifetime_count = lifetime_count;
        self.max_keep_alive_count = max_keep_alive_count;
    }

    pub(crate) fn set_max_notifications_per_publish(&mut self, max_notifications_per_publish: u32) {
        self.max_notifications_per_publish = max_notifications_per_publish;
    }

    pub(crate) fn set_publishing_enabled(&mut self, publishing_enabled: bool) {
        self.publishing_enabled = publishing_enabled;
    }

    pub(crate) fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    pub(crate) fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    pub(crate) fn sequence_mut(&mut self) -> &mut SequenceTracker {
        &mut self.sequence
    }

    pub(crate) fn item(&self, client_handle: u32) -> Option<&MonitoredItem> {
        self.monitored_items.get(&client_handle)
    }

    pub(crate) fn item_mut(&mut self, client_handle: u32) -> Option<&mut MonitoredItem> {
        self.monitored_items.get_mut(&client_handle)
    }

    /// Server id of a live item
    pub(crate) fn server_id(&self, client_handle: u32) -> Option<u32> {
        self.monitored_items
            .get(&client_handle)
            .filter(|i| i.is_live())
            .map(|i| i.id)
    }

    pub(crate) fn client_handle_for(&self, server_id: u32) -> Option<u32> {
        self.server_ids.get(&server_id).copied()
    }

    pub(crate) fn insert_item(&mut self, item: MonitoredItem) {
        if item.is_live() {
            self.server_ids.insert(item.id, item.client_handle);
        }
        self.monitored_items.insert(item.client_handle, item);
    }

    /// Marks the item deleted and removes it. Unknown handles are ignored.
    pub(crate) fn remove_item(&mut self, client_handle: u32) -> Option<MonitoredItem> {
        let mut item = self.monitored_items.remove(&client_handle)?;
        if item.id != 0 {
            self.server_ids.remove(&item.id);
        }
        if let Err(e) = item.transition(MonitoredItemState::Deleted) {
            warn!("Removing monitored item {}, {}", client_handle, e);
        }
        Some(item)
    }

    /// Moves the items that were live on the server back to pending, ahead of creating them
    /// again, and returns their handles in order. Failed items are left as they are.
    pub(crate) fn mark_live_items_pending(&mut self) -> Vec<u32> {
        self.server_ids.clear();
        let mut handles = Vec::new();
        for item in self.monitored_items.values_mut().filter(|i| i.is_live()) {
            match item.set_recreating() {
                Ok(()) => handles.push(item.client_handle),
                Err(e) => error!("Cannot recreate monitored item, {}", e),
            }
        }
        handles.sort_unstable();
        handles
    }

    /// Indexes the server id of an item that has just been created.
    pub(crate) fn index_item(&mut self, client_handle: u32) {
        if let Some(item) = self.monitored_items.get(&client_handle).filter(|i| i.is_live()) {
            self.server_ids.insert(item.id, client_handle);
        }
    }

    /// Deadline after which the subscription is considered to have stopped sending keep-alives
    pub(crate) fn keep_alive_deadline(&self) -> Instant {
        let window = (self.publishing_interval * (self.max_keep_alive_count.saturating_add(1)))
            .max(Duration::from_secs(1));
        self.last_message + window + Duration::from_secs(1)
    }

    /// Records a message for the watchdog, true if keep-alives were stopped until now.
    pub(crate) fn touch(&mut self, now: Instant) -> bool {
        self.last_message = now;
        std::mem::replace(&mut self.keep_alive_stopped, false)
    }

    pub(crate) fn set_keep_alive_stopped(&mut self) {
        self.keep_alive_stopped = true;
    }

    pub(crate) fn on_keep_alive(&mut self, sequence_number: u32) {
        let subscription_id = self.subscription_id;
        self.callback.on_keep_alive(subscription_id, sequence_number);
    }

    pub(crate) fn on_data_loss(&mut self, sequence_number: u32, status: StatusCode) {
        let subscription_id = self.subscription_id;
        self.sequence.advance(sequence_number);
        self.callback
            .on_data_loss(subscription_id, sequence_number, status);
    }

    /// Hands the notifications of a message to the callback, queueing values in the item caches.
    pub(crate) fn on_notification(
        &mut self,
        notification: NotificationMessage,
        decoding_options: &DecodingOptions,
    ) {
        self.sequence.advance(notification.sequence_number);
        let notifications = notification.notifications(decoding_options);

        for data_change in notifications.data_changes {
            for notif in data_change.monitored_items.into_iter().flatten() {
                match self.monitored_items.get_mut(&notif.client_handle) {
                    Some(item) => {
                        item.cache.push(notif.value.clone());
                        self.callback.on_data_value(notif.value, item);
                    }
                    None => debug!(
                        "Data change for unknown client handle {} on subscription {}",
                        notif.client_handle, self.subscription_id
                    ),
                }
            }
        }

        for event_list in notifications.events {
            for notif in event_list.events.into_iter().flatten() {
                if let Some(item) = self.monitored_items.get(&notif.client_handle) {
                    self.callback.on_event(notif.event_fields, item);
                }
            }
        }

        for status_change in notifications.status_changes {
            self.callback.on_subscription_status_change(status_change);
        }
    }

    pub fn snapshot(&self) -> SubscriptionSnapshot {
        let mut monitored_items: Vec<MonitoredItemSnapshot> =
            self.monitored_items.values().map(|i| i.snapshot()).collect();
        monitored_items.sort_by_key(|i| i.client_handle);
        SubscriptionSnapshot {
            subscription_id: self.subscription_id,
            server_subscription_id: self.server_id,
            publishing_interval: self.publishing_interval,
            lifetime_count: self.lifetime_count,
            max_keep_alive_count: self.max_keep_alive_count,
            max_notifications_per_publish: self.max_notifications_per_publish,
            priority: self.priority,
            publishing_enabled: self.publishing_enabled,
            keep_alive_stopped: self.keep_alive_stopped,
            last_sequence_number: self.sequence.last_delivered(),
            monitored_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::types::{DateTime, MonitoredItemNotification};

    #[test]
    fn auto_queue_size_from_intervals() {
        assert_eq!(auto_queue_size(1000.0, 100.0), 11);
        assert_eq!(auto_queue_size(1000.0, 1000.0), 2);
        assert_eq!(auto_queue_size(1000.0, 0.0), 2);
        assert_eq!(auto_queue_size(1000.0, -1.0), 2);
        assert_eq!(auto_queue_size(100.0, 1000.0), 2);
        assert_eq!(auto_queue_size(1000.0, 300.0), 5);
        assert_eq!(
            QueueSize::Auto.resolve(Duration::from_millis(500), 100.0),
            6
        );
        assert_eq!(QueueSize::Fixed(7).resolve(Duration::from_millis(500), 100.0), 7);
    }

    fn item(handle: u32) -> MonitoredItem {
        MonitoredItem::new(handle, &MonitoredItemRequest::new(NodeId::new(2, handle)), 2)
    }

    #[test]
    fn item_lifecycle() {
        let mut item = item(1);
        assert_eq!(item.state(), MonitoredItemState::Pending);
        item.set_created(10, 100.0, 5).unwrap();
        assert_eq!(item.state(), MonitoredItemState::Created);
        assert_eq!(item.queue_size(), 5);
        item.set_modified(250.0, 3, None).unwrap();
        item.set_modified(500.0, 3, None).unwrap();
        assert_eq!(item.state(), MonitoredItemState::Modified);
        assert_eq!(item.sampling_interval(), 500.0);
        item.set_recreating().unwrap();
        assert_eq!(item.state(), MonitoredItemState::Pending);
        assert_eq!(item.id(), 0);
        item.transition(MonitoredItemState::Deleted).unwrap();
    }

    #[test]
    fn failed_item_cannot_be_created() {
        let mut item = item(1);
        item.transition(MonitoredItemState::Failed(StatusCode::BadNodeIdUnknown))
            .unwrap();
        assert!(matches!(
            item.set_created(10, 100.0, 1),
            Err(Error::State(_))
        ));
        assert!(!item.is_live());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn leaving_deleted_asserts() {
        let mut item = item(1);
        item.transition(MonitoredItemState::Deleted).unwrap();
        let _ = item.transition(MonitoredItemState::Created);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn leaving_deleted_is_state_error() {
        let mut item = item(1);
        item.transition(MonitoredItemState::Deleted).unwrap();
        assert!(matches!(
            item.transition(MonitoredItemState::Created),
            Err(Error::State(_))
        ));
    }

    #[derive(Default)]
    struct Recorder {
        values: Arc<Mutex<Vec<(u32, i32)>>>,
        keep_alives: Arc<Mutex<Vec<u32>>>,
    }

    impl OnSubscriptionNotification for Recorder {
        fn on_data_value(&mut self, notification: DataValue, item: &MonitoredItem) {
            let v = notification.value.and_then(|v| v.as_i32()).unwrap_or_default();
            self.values.lock().unwrap().push((item.client_handle(), v));
        }

        fn on_keep_alive(&mut self, _subscription_id: u32, sequence_number: u32) {
            self.keep_alives.lock().unwrap().push(sequence_number);
        }
    }

    #[test]
    fn notifications_reach_callback_and_cache() {
        let recorder = Recorder::default();
        let values = recorder.values.clone();
        let mut sub = Subscription::new(
            1,
            Duration::from_millis(100),
            30,
            10,
            0,
            0,
            true,
            Box::new(recorder),
        );
        let mut created = item(5);
        created.set_created(50, 100.0, 2).unwrap();
        sub.insert_item(created);
        assert_eq!(sub.client_handle_for(50), Some(5));
        assert_eq!(sub.server_id(5), Some(50));

        let message = NotificationMessage::data_change(
            1,
            DateTime::now(),
            (1..=3)
                .map(|i| MonitoredItemNotification {
                    client_handle: 5,
                    value: DataValue::value_only(Variant::Int32(i)),
                })
                .chain(std::iter::once(MonitoredItemNotification {
                    client_handle: 99,
                    value: DataValue::value_only(Variant::Int32(0)),
                }))
                .collect(),
        );
        sub.on_notification(message, &DecodingOptions::default());

        assert_eq!(*values.lock().unwrap(), vec![(5, 1), (5, 2), (5, 3)]);
        assert_eq!(sub.sequence().last_delivered(), Some(1));
        let snapshot = sub.snapshot();
        assert_eq!(snapshot.monitored_items[0].queued_values, 2);
        let drained = sub.item_mut(5).unwrap().drain_values();
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn live_items_go_back_to_pending() {
        let mut sub = Subscription::new(
            1,
            Duration::from_millis(100),
            30,
            10,
            0,
            0,
            true,
            Box::new(Recorder::default()),
        );
        let mut a = item(1);
        a.set_created(11, 100.0, 1).unwrap();
        let mut b = item(2);
        b.transition(MonitoredItemState::Failed(StatusCode::BadNodeIdUnknown))
            .unwrap();
        let mut c = item(3);
        c.set_created(13, 100.0, 1).unwrap();
        sub.insert_item(a);
        sub.insert_item(b);
        sub.insert_item(c);

        let pending = sub.mark_live_items_pending();
        assert_eq!(pending, vec![1, 3]);
        assert_eq!(sub.monitored_items().len(), 3);
        assert_eq!(sub.item(1).unwrap().state(), MonitoredItemState::Pending);
        assert_eq!(sub.item(1).unwrap().id(), 0);
        assert!(matches!(
            sub.item(2).unwrap().state(),
            MonitoredItemState::Failed(_)
        ));
        assert!(sub.client_handle_for(11).is_none());
        assert!(sub.server_id(1).is_none());

        sub.item_mut(3).unwrap().set_created(23, 100.0, 1).unwrap();
        sub.index_item(3);
        assert_eq!(sub.client_handle_for(23), Some(3));
    }

    #[test]
    fn keep_alive_deadline_has_floor_and_margin() {
        let mut sub = Subscription::new(
            1,
            Duration::from_millis(100),
            30,
            2,
            0,
            0,
            true,
            Box::new(Recorder::default()),
        );
        let now = Instant::now();
        sub.touch(now);
        // 100ms * 3 is below the one second floor
        assert_eq!(sub.keep_alive_deadline(), now + Duration::from_secs(2));
        sub.set_revised(Duration::from_millis(1000), 30, 4);
        assert_eq!(sub.keep_alive_deadline(), now + Duration::from_secs(6));
        sub.set_keep_alive_stopped();
        assert!(sub.touch(now));
        assert!(!sub.touch(now));
    }
}
