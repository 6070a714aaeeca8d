// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::types::{MonitoringMode, SubscriptionAcknowledgement};

use super::{Subscription, SubscriptionSnapshot};

/// State containing all known subscriptions in the session.
///
/// Subscriptions are kept under the id handed to the caller. A subscription created again
/// after a reconnect gets a new id from the server, which [`SubscriptionState::resolve`]
/// returns, while the caller's id stays the same. Two subscriptions never share a local id,
/// whatever ids the server hands out.
pub struct SubscriptionState {
    subscriptions: HashMap<u32, Subscription>,
    /// Current server id to local id
    by_server_id: HashMap<u32, u32>,
    acknowledgements: Vec<SubscriptionAcknowledgement>,
    min_publish_interval: Duration,
    /// How far below the natural target the server forced the outstanding publish count
    publish_target_reduction: usize,
    /// Set after `BadNoSubscription`, no publish is sent before this time
    publish_backoff_until: Option<Instant>,
}

impl SubscriptionState {
    /// Create a new subscription state.
    ///
    /// # Arguments
    ///
    /// * `min_publish_interval` - The minimum accepted publishing interval, any lower values
    ///   will be set to this.
    pub(crate) fn new(min_publish_interval: Duration) -> Self {
        Self {
            subscriptions: HashMap::new(),
            by_server_id: HashMap::new(),
            acknowledgements: Vec::new(),
            min_publish_interval,
            publish_target_reduction: 0,
            publish_backoff_until: None,
        }
    }

    pub(crate) fn min_publish_interval(&self) -> Duration {
        self.min_publish_interval
    }

    pub(crate) fn take_acknowledgements(&mut self) -> Vec<SubscriptionAcknowledgement> {
        std::mem::take(&mut self.acknowledgements)
    }

    /// Queues an acknowledgement, `server_id` being the id the server published under.
    pub(crate) fn add_acknowledgement(&mut self, server_id: u32, sequence_number: u32) {
        let ack = SubscriptionAcknowledgement {
            subscription_id: server_id,
            sequence_number,
        };
        if !self.acknowledgements.contains(&ack) {
            self.acknowledgements.push(ack);
        }
    }

    pub(crate) fn re_queue_acknowledgements(&mut self, acks: Vec<SubscriptionAcknowledgement>) {
        for ack in acks {
            // Acks for subscriptions that have gone since are dropped
            if self.by_server_id.contains_key(&ack.subscription_id) {
                self.add_acknowledgement(ack.subscription_id, ack.sequence_number);
            }
        }
    }

    /// The current server id of a subscription. Unknown ids come back unchanged, and 0 means
    /// the subscription is not on the server at the moment.
    pub fn resolve(&self, subscription_id: u32) -> u32 {
        self.subscriptions
            .get(&subscription_id)
            .map(|s| s.server_subscription_id())
            .unwrap_or(subscription_id)
    }

    /// The local id of the subscription the server knows as `server_id`.
    pub fn local_id(&self, server_id: u32) -> Option<u32> {
        self.by_server_id.get(&server_id).copied()
    }

    /// List of subscription IDs.
    pub fn subscription_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.subscriptions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Local and current server id of each subscription, ordered by local id.
    pub(crate) fn id_pairs(&self) -> Vec<(u32, u32)> {
        let mut ids: Vec<(u32, u32)> = self
            .subscriptions
            .iter()
            .map(|(id, s)| (*id, s.server_subscription_id()))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Check if the subscription ID is known.
    pub fn subscription_exists(&self, subscription_id: u32) -> bool {
        self.subscriptions.contains_key(&subscription_id)
    }

    /// Get a reference to a subscription by ID.
    pub fn get(&self, subscription_id: u32) -> Option<&Subscription> {
        self.subscriptions.get(&subscription_id)
    }

    pub(crate) fn get_mut(&mut self, subscription_id: u32) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(&subscription_id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Subscription> {
        self.subscriptions.values_mut()
    }

    /// Get the number of subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Get the number of subscriptions that have publishing enabled.
    pub fn len_active(&self) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.publishing_enabled())
            .count()
    }

    /// Files a subscription the server just created and returns its local id. That is the
    /// server's id unless another subscription already holds it locally.
    pub(crate) fn add_subscription(&mut self, mut subscription: Subscription) -> u32 {
        let server_id = subscription.server_subscription_id();
        let local_id = if self.subscriptions.contains_key(&server_id) {
            self.subscriptions.keys().max().copied().unwrap_or(0) + 1
        } else {
            server_id
        };
        subscription.set_subscription_id(local_id);
        self.by_server_id.insert(server_id, local_id);
        self.subscriptions.insert(local_id, subscription);
        local_id
    }

    pub(crate) fn delete_subscription(&mut self, subscription_id: u32) -> Option<Subscription> {
        let subscription = self.subscriptions.remove(&subscription_id)?;
        self.unlink_server_id(subscription_id, subscription.server_subscription_id());
        Some(subscription)
    }

    fn unlink_server_id(&mut self, subscription_id: u32, server_id: u32) {
        if self.by_server_id.get(&server_id) == Some(&subscription_id) {
            self.by_server_id.remove(&server_id);
        }
        self.acknowledgements.retain(|a| a.subscription_id != server_id);
    }

    /// Forgets the server id of a subscription the server no longer has. Publish responses
    /// under the old id are dropped from now on.
    pub(crate) fn detach_server_id(&mut self, subscription_id: u32) {
        let Some(server_id) = self
            .subscriptions
            .get(&subscription_id)
            .map(|s| s.server_subscription_id())
        else {
            return;
        };
        self.unlink_server_id(subscription_id, server_id);
        if let Some(subscription) = self.subscriptions.get_mut(&subscription_id) {
            subscription.set_server_subscription_id(0);
        }
    }

    /// Gives a subscription the id the server created it again under. Numbering starts over.
    /// False if the subscription was deleted meanwhile.
    pub(crate) fn set_server_id(&mut self, subscription_id: u32, server_id: u32) -> bool {
        self.detach_server_id(subscription_id);
        let Some(subscription) = self.subscriptions.get_mut(&subscription_id) else {
            return false;
        };
        subscription.set_server_subscription_id(server_id);
        subscription.sequence_mut().reset();
        self.by_server_id.insert(server_id, subscription_id);
        true
    }

    pub(crate) fn set_publishing_mode(
        &mut self,
        subscription_ids: &[u32],
        publishing_enabled: bool,
    ) {
        for subscription_id in subscription_ids {
            if let Some(subscription) = self.get_mut(*subscription_id) {
                subscription.set_publishing_enabled(publishing_enabled);
            }
        }
    }

    pub(crate) fn set_monitoring_mode(
        &mut self,
        subscription_id: u32,
        client_handles: &[u32],
        monitoring_mode: MonitoringMode,
    ) {
        if let Some(subscription) = self.get_mut(subscription_id) {
            for handle in client_handles {
                if let Some(item) = subscription.item_mut(*handle) {
                    item.set_monitoring_mode(monitoring_mode);
                }
            }
        }
    }

    /// Smallest publishing interval of the subscriptions, at least the configured minimum.
    pub(crate) fn min_publishing_interval(&self) -> Option<Duration> {
        self.subscriptions
            .values()
            .map(|s| s.publishing_interval().max(self.min_publish_interval))
            .min()
    }

    /// The time the longest living subscription survives without publish requests.
    pub(crate) fn longest_lifetime(&self) -> Option<Duration> {
        self.subscriptions
            .values()
            .map(|s| s.publishing_interval() * s.lifetime_count())
            .max()
    }

    /// Number of publish requests to keep outstanding, 0 without subscriptions.
    pub(crate) fn publish_target(&self, max_inflight_publish: usize) -> usize {
        if self.subscriptions.is_empty() {
            return 0;
        }
        let natural = (self.subscriptions.len() + 1)
            .max(2)
            .min(max_inflight_publish.max(1));
        natural
            .saturating_sub(self.publish_target_reduction)
            .max(1)
    }

    /// The server has too many publish requests, keep one fewer outstanding.
    pub(crate) fn reduce_publish_target(&mut self, max_inflight_publish: usize) -> usize {
        let before = self.publish_target(max_inflight_publish);
        if before > 1 {
            self.publish_target_reduction += 1;
        }
        self.publish_target(max_inflight_publish)
    }

    pub(crate) fn reset_publish_target(&mut self) {
        self.publish_target_reduction = 0;
        self.publish_backoff_until = None;
    }

    pub(crate) fn publish_backoff_until(&self) -> Option<Instant> {
        self.publish_backoff_until
    }

    pub(crate) fn set_publish_backoff(&mut self, until: Option<Instant>) {
        self.publish_backoff_until = until;
    }

    /// Earliest keep-alive deadline over the subscriptions still receiving keep-alives.
    pub(crate) fn next_keep_alive_deadline(&self) -> Option<Instant> {
        self.subscriptions
            .values()
            .filter(|s| !s.keep_alive_stopped())
            .map(|s| s.keep_alive_deadline())
            .min()
    }

    /// Restarts every watchdog, used when publishing (re)starts.
    pub(crate) fn reset_watchdogs(&mut self, now: Instant) {
        for subscription in self.subscriptions.values_mut() {
            subscription.touch(now);
        }
    }

    /// Marks the subscriptions whose deadline passed, returning their ids.
    pub(crate) fn expire_keep_alives(&mut self, now: Instant) -> Vec<u32> {
        let mut expired: Vec<u32> = self
            .subscriptions
            .values_mut()
            .filter(|s| !s.keep_alive_stopped() && s.keep_alive_deadline() <= now)
            .map(|s| {
                s.set_keep_alive_stopped();
                s.subscription_id()
            })
            .collect();
        expired.sort_unstable();
        expired
    }

    /// A consistent copy of every subscription, ordered by subscription id.
    pub fn snapshot(&self) -> Vec<SubscriptionSnapshot> {
        let mut snapshots: Vec<SubscriptionSnapshot> =
            self.subscriptions.values().map(|s| s.snapshot()).collect();
        snapshots.sort_by_key(|s| s.subscription_id);
        snapshots
    }
}
