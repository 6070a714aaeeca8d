// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::time::{Duration, Instant};

use crate::{
    client::{
        process_service_result, process_unexpected_response,
        session::{session_debug, session_error, session_trace, session_warn, unpack_response},
        Error, Session, SubscriptionRetention,
    },
    core::supported_message::SupportedMessage,
    types::{
        CreateMonitoredItemsRequest, CreateSubscriptionRequest, CreateSubscriptionResponse,
        DataValue, DeleteMonitoredItemsRequest, DeleteSubscriptionsRequest,
        ModifyMonitoredItemsRequest, ModifySubscriptionRequest, MonitoredItemCreateRequest,
        MonitoredItemCreateResult, MonitoredItemModifyRequest, MonitoringMode,
        MonitoringParameters, NotificationMessage, PublishRequest, PublishResponse,
        RepublishRequest, SetMonitoringModeRequest, SetPublishingModeRequest,
        SetTriggeringRequest, StatusCode, TimestampsToReturn, TransferResult,
        TransferSubscriptionsRequest,
    },
};

use super::super::one_per_operation;
use super::{
    event_loop::SubscriptionActivity, sequence::Arrival, MonitoredItem, MonitoredItemRequest,
    MonitoredItemSnapshot, MonitoredItemState, OnSubscriptionNotification, QueueSize,
    Subscription,
};

/// New parameters for an existing monitored item, identified by its client handle.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemModification {
    pub client_handle: u32,
    pub sampling_interval: f64,
    pub queue_size: QueueSize,
    pub discard_oldest: bool,
}

fn revised_interval(revised_publishing_interval: f64) -> Duration {
    Duration::from_millis(revised_publishing_interval.max(0.0).floor() as u64)
}

fn ensure_lifetime(lifetime_count: u32, max_keep_alive_count: u32) -> Result<(), Error> {
    if lifetime_count <= max_keep_alive_count {
        Err(Error::InvalidArgument(format!(
            "lifetime count {} must be greater than the keep-alive count {}",
            lifetime_count, max_keep_alive_count
        )))
    } else {
        Ok(())
    }
}

/// The create request for an item from what was originally asked for.
fn create_request(item: &MonitoredItem, publishing_interval: Duration) -> MonitoredItemCreateRequest {
    let sampling_interval = item.requested_sampling_interval();
    MonitoredItemCreateRequest {
        item_to_monitor: item.item_to_monitor().clone(),
        monitoring_mode: item.monitoring_mode(),
        requested_parameters: MonitoringParameters {
            client_handle: item.client_handle(),
            sampling_interval,
            filter: item.filter().clone(),
            queue_size: item
                .requested_queue_size()
                .resolve(publishing_interval, sampling_interval),
            discard_oldest: item.discard_oldest(),
        },
    }
}

/// Applies the server's verdict on a create. Rejected items become `Failed` and keep their handle.
fn apply_create_result(item: &mut MonitoredItem, result: &MonitoredItemCreateResult) {
    let applied = if result.status_code.is_good() {
        item.set_created(
            result.monitored_item_id,
            result.revised_sampling_interval,
            result.revised_queue_size,
        )
    } else {
        item.transition(MonitoredItemState::Failed(result.status_code))
    };
    if let Err(e) = applied {
        error!("Cannot apply create result to monitored item {}, {}", item.client_handle(), e);
    }
}

fn optional(v: &[u32]) -> Option<Vec<u32>> {
    (!v.is_empty()).then(|| v.to_vec())
}

impl Session {
    async fn send_create_subscription(
        &self,
        publishing_interval: Duration,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        publishing_enabled: bool,
        priority: u8,
    ) -> Result<CreateSubscriptionResponse, StatusCode> {
        let request = CreateSubscriptionRequest {
            request_header: self.make_request_header(),
            requested_publishing_interval: publishing_interval.as_millis() as f64,
            requested_lifetime_count: lifetime_count,
            requested_max_keep_alive_count: max_keep_alive_count,
            max_notifications_per_publish,
            publishing_enabled,
            priority,
        };
        Ok(unpack_response!(
            self,
            self.send(request).await?,
            CreateSubscriptionResponse,
            "create_subscription"
        ))
    }

    /// Creates a subscription on the server (CreateSubscription, Part 4 5.13.2) and registers
    /// `callback` for its notifications.
    ///
    /// A zero `publishing_interval` asks for the fastest rate the server offers. The
    /// `lifetime_count` has to exceed `max_keep_alive_count`, or nothing is sent and
    /// `Error::InvalidArgument` comes back. A `max_notifications_per_publish` of zero means no
    /// limit, and a `priority` of zero means no preference.
    ///
    /// The returned id stays valid across reconnects, even when the server assigns a new one.
    pub async fn create_subscription(
        &self,
        publishing_interval: Duration,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        priority: u8,
        publishing_enabled: bool,
        callback: impl OnSubscriptionNotification + 'static,
    ) -> Result<u32, Error> {
        ensure_lifetime(lifetime_count, max_keep_alive_count)?;
        let response = self
            .send_create_subscription(
                publishing_interval,
                lifetime_count,
                max_keep_alive_count,
                max_notifications_per_publish,
                publishing_enabled,
                priority,
            )
            .await?;

        let subscription = Subscription::new(
            response.subscription_id,
            revised_interval(response.revised_publishing_interval),
            response.revised_lifetime_count,
            response.revised_max_keep_alive_count,
            max_notifications_per_publish,
            priority,
            publishing_enabled,
            Box::new(callback),
        );
        let subscription_id = {
            let mut state = self.subscriptions();
            state.add_subscription(subscription)
        };

        // Publish requests go out for the new subscription straight away
        let _ = self.trigger_publish_tx.send(Instant::now());

        session_debug!(
            self,
            "create_subscription, created a subscription with id {}, {} on the server",
            subscription_id,
            response.subscription_id
        );
        Ok(subscription_id)
    }

    /// The current server id of a subscription, an error if it does not exist or is not on
    /// the server right now
    fn current_subscription_id(&self, subscription_id: u32) -> Result<u32, Error> {
        let state = self.subscriptions();
        if !state.subscription_exists(subscription_id) {
            return Err(Error::State(format!(
                "subscription {} does not exist",
                subscription_id
            )));
        }
        match state.resolve(subscription_id) {
            0 => Err(Error::State(format!(
                "subscription {} is being created again",
                subscription_id
            ))),
            server_id => Ok(server_id),
        }
    }

    /// ModifySubscription, Part 4 5.13.3. Takes the arguments of [`Session::create_subscription`]
    /// under the same rule for the counts. The revised values replace the local ones.
    pub async fn modify_subscription(
        &self,
        subscription_id: u32,
        publishing_interval: Duration,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        priority: u8,
    ) -> Result<(), Error> {
        ensure_lifetime(lifetime_count, max_keep_alive_count)?;
        let server_id = self.current_subscription_id(subscription_id)?;
        let request = ModifySubscriptionRequest {
            request_header: self.make_request_header(),
            subscription_id: server_id,
            requested_publishing_interval: publishing_interval.as_millis() as f64,
            requested_lifetime_count: lifetime_count,
            requested_max_keep_alive_count: max_keep_alive_count,
            max_notifications_per_publish,
            priority,
        };
        let revised = unpack_response!(
            self,
            self.send(request).await?,
            ModifySubscriptionResponse,
            "modify_subscription"
        );
        if let Some(subscription) = self.subscriptions().get_mut(subscription_id) {
            subscription.set_revised(
                revised_interval(revised.revised_publishing_interval),
                revised.revised_lifetime_count,
                revised.revised_max_keep_alive_count,
            );
            subscription.set_max_notifications_per_publish(max_notifications_per_publish);
            subscription.set_priority(priority);
        }
        session_debug!(self, "Subscription {} modified", subscription_id);
        Ok(())
    }

    /// Turns publishing on or off for subscriptions (SetPublishingMode, Part 4 5.13.4). There is
    /// one status per id, `BadSubscriptionIdInvalid` for those the server does not know.
    pub async fn set_publishing_mode(
        &self,
        subscription_ids: &[u32],
        publishing_enabled: bool,
    ) -> Result<Vec<StatusCode>, Error> {
        session_debug!(
            self,
            "set_publishing_mode, for subscriptions {:?}, publishing enabled {}",
            subscription_ids,
            publishing_enabled
        );
        if subscription_ids.is_empty() {
            session_error!(self, "set_publishing_mode, no subscription ids were provided");
            return Err(StatusCode::BadNothingToDo.into());
        }
        let server_ids: Vec<u32> = {
            let state = self.subscriptions();
            subscription_ids
                .iter()
                .map(|id| state.resolve(*id))
                .collect()
        };
        let request = SetPublishingModeRequest {
            request_header: self.make_request_header(),
            publishing_enabled,
            subscription_ids: Some(server_ids.clone()),
        };
        let results = unpack_response!(
            self,
            self.send(request).await?,
            SetPublishingModeResponse,
            "set_publishing_mode"
        )
        .results
        .unwrap_or_default();
        let accepted: Vec<u32> = subscription_ids
            .iter()
            .zip(&results)
            .filter_map(|(id, r)| r.is_good().then_some(*id))
            .collect();
        self.subscriptions().set_publishing_mode(&accepted, publishing_enabled);
        if publishing_enabled {
            let _ = self.trigger_publish_tx.send(Instant::now());
        }
        Ok(results)
    }

    async fn send_transfer_subscriptions(
        &self,
        subscription_ids: &[u32],
        send_initial_values: bool,
    ) -> Result<Vec<TransferResult>, StatusCode> {
        let request = TransferSubscriptionsRequest {
            request_header: self.make_request_header(),
            subscription_ids: Some(subscription_ids.to_vec()),
            send_initial_values,
        };
        let response = unpack_response!(
            self,
            self.send(request).await?,
            TransferSubscriptionsResponse,
            "transfer_subscriptions"
        );
        one_per_operation(response.results, subscription_ids.len())
    }

    /// Moves subscriptions of an earlier session over to this one (TransferSubscriptions,
    /// Part 4 5.13.7). With `send_initial_values` the server follows up with the current value
    /// of every monitored item. The session already does this after each reconnect.
    pub async fn transfer_subscriptions(
        &self,
        subscription_ids: &[u32],
        send_initial_values: bool,
    ) -> Result<Vec<TransferResult>, Error> {
        if subscription_ids.is_empty() {
            session_error!(self, "transfer_subscriptions, no subscription ids were provided");
            return Err(StatusCode::BadNothingToDo.into());
        }
        let server_ids: Vec<u32> = {
            let state = self.subscriptions();
            subscription_ids
                .iter()
                .map(|id| state.resolve(*id))
                .collect()
        };
        Ok(self
            .send_transfer_subscriptions(&server_ids, send_initial_values)
            .await?)
    }

    /// Deletes one subscription. An id that is not known locally succeeds without a request.
    pub async fn delete_subscription(&self, subscription_id: u32) -> Result<StatusCode, Error> {
        let results = self.delete_subscriptions(&[subscription_id]).await?;
        Ok(results.first().copied().unwrap_or(StatusCode::Good))
    }

    /// DeleteSubscriptions, Part 4 5.13.8. Local state goes first, so publish responses still
    /// on the way for these ids are dropped. The statuses follow the order of the ids, with
    /// `Good` for ids that were not known. A failed round trip is not an error, its status is
    /// reported for every id that was sent. Only an empty list fails outright.
    pub async fn delete_subscriptions(
        &self,
        subscription_ids: &[u32],
    ) -> Result<Vec<StatusCode>, Error> {
        if subscription_ids.is_empty() {
            session_trace!(self, "delete_subscriptions with no subscriptions");
            return Err(StatusCode::BadNothingToDo.into());
        }

        // Position in the input of each subscription sent to the server
        let mut to_delete: Vec<(usize, u32)> = Vec::new();
        {
            let mut state = self.subscriptions();
            for (i, id) in subscription_ids.iter().enumerate() {
                let server_id = state.resolve(*id);
                if state.delete_subscription(*id).is_some() {
                    to_delete.push((i, server_id));
                }
            }
        }

        let mut results = vec![StatusCode::Good; subscription_ids.len()];
        if to_delete.is_empty() {
            return Ok(results);
        }

        let request = DeleteSubscriptionsRequest {
            request_header: self.make_request_header(),
            subscription_ids: Some(to_delete.iter().map(|(_, id)| *id).collect()),
        };
        let outcome = self.send(request).await.and_then(|response| match response {
            SupportedMessage::DeleteSubscriptionsResponse(response) => {
                process_service_result(&response.response_header)?;
                Ok(response.results.unwrap_or_default())
            }
            response => Err(process_unexpected_response(response)),
        });
        let statuses = match outcome {
            Ok(statuses) => statuses,
            Err(e) => {
                session_warn!(self, "Subscriptions removed locally only, the server said {}", e);
                vec![e; to_delete.len()]
            }
        };
        for ((i, _), status) in to_delete.iter().zip(statuses) {
            results[*i] = status;
        }
        Ok(results)
    }

    async fn send_create_monitored_items(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_create: Vec<MonitoredItemCreateRequest>,
    ) -> Result<Vec<MonitoredItemCreateResult>, StatusCode> {
        let count = items_to_create.len();
        let request = CreateMonitoredItemsRequest {
            request_header: self.make_request_header(),
            subscription_id,
            timestamps_to_return,
            items_to_create: Some(items_to_create),
        };
        let response = unpack_response!(
            self,
            self.send(request).await?,
            CreateMonitoredItemsResponse,
            "create_monitored_items"
        );
        one_per_operation(response.results, count)
    }

    /// Adds monitored items to a subscription (CreateMonitoredItems, Part 4 5.12.2).
    ///
    /// Client handles are assigned from a session wide counter before anything is sent. An item
    /// the server turns down is kept as `Failed` with the server's status so that its handle is
    /// never reused. It is not tried again.
    ///
    /// The snapshots line up with `items_to_create`. When the request itself fails no item is
    /// added at all.
    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_create: Vec<MonitoredItemRequest>,
    ) -> Result<Vec<MonitoredItemSnapshot>, Error> {
        session_debug!(
            self,
            "create_monitored_items, for subscription {}, {} items",
            subscription_id,
            items_to_create.len()
        );
        if items_to_create.is_empty() {
            session_error!(self, "create_monitored_items, called with no items to create");
            return Err(StatusCode::BadNothingToDo.into());
        }
        let server_id = self.current_subscription_id(subscription_id)?;
        let publishing_interval = {
            let state = self.subscriptions();
            state
                .get(subscription_id)
                .map(|s| s.publishing_interval())
                .unwrap_or_default()
        };

        let mut items: Vec<MonitoredItem> = items_to_create
            .iter()
            .map(|req| {
                let queue_size = req
                    .queue_size
                    .resolve(publishing_interval, req.sampling_interval);
                MonitoredItem::new(self.monitored_item_handle.next(), req, queue_size)
            })
            .collect();
        let requests = items
            .iter()
            .map(|i| create_request(i, publishing_interval))
            .collect();

        let results = self
            .send_create_monitored_items(server_id, timestamps_to_return, requests)
            .await?;

        for (item, result) in items.iter_mut().zip(results.iter()) {
            apply_create_result(item, result);
        }
        let snapshots: Vec<MonitoredItemSnapshot> = items.iter().map(|i| i.snapshot()).collect();

        {
            let mut state = self.subscriptions();
            let Some(subscription) = state.get_mut(subscription_id) else {
                session_warn!(
                    self,
                    "Subscription {} was deleted while its monitored items were created",
                    subscription_id
                );
                return Err(Error::State(format!(
                    "subscription {} was deleted",
                    subscription_id
                )));
            };
            for item in items {
                subscription.insert_item(item);
            }
        }
        session_debug!(
            self,
            "create_monitored_items, {} of {} items created",
            snapshots.iter().filter(|s| s.state == MonitoredItemState::Created).count(),
            snapshots.len()
        );
        Ok(snapshots)
    }

    /// ModifyMonitoredItems, Part 4 5.12.3. Handles that are unknown, or belong to failed items,
    /// stay off the wire and get `BadMonitoredItemIdInvalid`.
    pub async fn modify_monitored_items(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_modify: &[MonitoredItemModification],
    ) -> Result<Vec<StatusCode>, Error> {
        session_debug!(
            self,
            "modify_monitored_items, for subscription {}, {} items",
            subscription_id,
            items_to_modify.len()
        );
        if items_to_modify.is_empty() {
            session_error!(self, "modify_monitored_items, called with no items to modify");
            return Err(StatusCode::BadNothingToDo.into());
        }
        let server_id = self.current_subscription_id(subscription_id)?;

        let mut results = vec![StatusCode::BadMonitoredItemIdInvalid; items_to_modify.len()];
        let mut sent: Vec<(usize, MonitoredItemModifyRequest)> = Vec::new();
        {
            let state = self.subscriptions();
            if let Some(subscription) = state.get(subscription_id) {
                let publishing_interval = subscription.publishing_interval();
                for (i, m) in items_to_modify.iter().enumerate() {
                    let Some(item) = subscription.item(m.client_handle).filter(|i| i.is_live())
                    else {
                        continue;
                    };
                    sent.push((
                        i,
                        MonitoredItemModifyRequest {
                            monitored_item_id: item.id(),
                            requested_parameters: MonitoringParameters {
                                client_handle: item.client_handle(),
                                sampling_interval: m.sampling_interval,
                                filter: item.filter().clone(),
                                queue_size: m
                                    .queue_size
                                    .resolve(publishing_interval, m.sampling_interval),
                                discard_oldest: m.discard_oldest,
                            },
                        },
                    ));
                }
            }
        }
        if sent.is_empty() {
            return Ok(results);
        }

        let request = ModifyMonitoredItemsRequest {
            request_header: self.make_request_header(),
            subscription_id: server_id,
            timestamps_to_return,
            items_to_modify: Some(sent.iter().map(|(_, r)| r.clone()).collect()),
        };
        let response = unpack_response!(
            self,
            self.send(request).await?,
            ModifyMonitoredItemsResponse,
            "modify_monitored_items"
        );
        let server_results = one_per_operation(response.results, sent.len())?;

        let mut state = self.subscriptions();
        let mut subscription = state.get_mut(subscription_id);
        for ((i, _), r) in sent.iter().zip(server_results.iter()) {
            results[*i] = r.status_code;
            if r.status_code.is_bad() {
                continue;
            }
            let m = &items_to_modify[*i];
            if let Some(item) = subscription
                .as_mut()
                .and_then(|s| s.item_mut(m.client_handle))
            {
                item.set_discard_oldest(m.discard_oldest);
                if let Err(e) = item.set_modified(
                    r.revised_sampling_interval,
                    r.revised_queue_size,
                    Some((m.sampling_interval, m.queue_size)),
                ) {
                    session_warn!(self, "modify_monitored_items, {}", e);
                }
            }
        }
        Ok(results)
    }

    /// SetMonitoringMode, Part 4 5.12.4, for items given by client handle. The statuses follow
    /// the handles, with `BadMonitoredItemIdInvalid` for items that are not live.
    pub async fn set_monitoring_mode(
        &self,
        subscription_id: u32,
        monitoring_mode: MonitoringMode,
        client_handles: &[u32],
    ) -> Result<Vec<StatusCode>, Error> {
        if client_handles.is_empty() {
            session_error!(self, "set_monitoring_mode, called with nothing to do");
            return Err(StatusCode::BadNothingToDo.into());
        }
        let server_id = self.current_subscription_id(subscription_id)?;
        let mut results = vec![StatusCode::BadMonitoredItemIdInvalid; client_handles.len()];
        let sent: Vec<(usize, u32)> = {
            let state = self.subscriptions();
            let subscription = state.get(subscription_id);
            client_handles
                .iter()
                .enumerate()
                .filter_map(|(i, h)| subscription.and_then(|s| s.server_id(*h)).map(|id| (i, id)))
                .collect()
        };
        if sent.is_empty() {
            return Ok(results);
        }

        let request = SetMonitoringModeRequest {
            request_header: self.make_request_header(),
            subscription_id: server_id,
            monitoring_mode,
            monitored_item_ids: Some(sent.iter().map(|(_, id)| *id).collect()),
        };
        let statuses = unpack_response!(
            self,
            self.send(request).await?,
            SetMonitoringModeResponse,
            "set_monitoring_mode"
        )
        .results
        .unwrap_or_default();

        let mut changed = Vec::new();
        for ((i, _), status) in sent.iter().zip(statuses) {
            results[*i] = status;
            if status.is_good() {
                changed.push(client_handles[*i]);
            }
        }
        self.subscriptions().set_monitoring_mode(subscription_id, &changed, monitoring_mode);
        Ok(results)
    }

    fn map_server_ids(&self, subscription_id: u32, client_handles: &[u32]) -> Result<Vec<u32>, Error> {
        let state = self.subscriptions();
        let Some(subscription) = state.get(subscription_id) else {
            return Err(Error::State(format!("subscription {} does not exist", subscription_id)));
        };
        client_handles
            .iter()
            .map(|h| {
                subscription.server_id(*h).ok_or_else(|| {
                    Error::InvalidArgument(format!("monitored item {} is not on the server", h))
                })
            })
            .collect()
    }

    /// Links and unlinks the items that `triggering_item` triggers (SetTriggering, Part 4
    /// 5.12.5). Every handle has to be live on the server. Returns the statuses of the added
    /// links and of the removed ones.
    pub async fn set_triggering(
        &self,
        subscription_id: u32,
        triggering_item: u32,
        links_to_add: &[u32],
        links_to_remove: &[u32],
    ) -> Result<(Vec<StatusCode>, Vec<StatusCode>), Error> {
        if links_to_add.is_empty() && links_to_remove.is_empty() {
            session_error!(self, "set_triggering, called with nothing to add or remove");
            return Err(StatusCode::BadNothingToDo.into());
        }
        let server_id = self.current_subscription_id(subscription_id)?;
        let triggering_item_id = self.map_server_ids(subscription_id, &[triggering_item])?[0];
        let add_ids = self.map_server_ids(subscription_id, links_to_add)?;
        let remove_ids = self.map_server_ids(subscription_id, links_to_remove)?;

        let request = SetTriggeringRequest {
            request_header: self.make_request_header(),
            subscription_id: server_id,
            triggering_item_id,
            links_to_add: optional(&add_ids),
            links_to_remove: optional(&remove_ids),
        };
        let response = unpack_response!(
            self,
            self.send(request).await?,
            SetTriggeringResponse,
            "set_triggering"
        );
        let add_results = response.add_results.unwrap_or_default();
        let remove_results = response.remove_results.unwrap_or_default();

        let accepted = |handles: &[u32], statuses: &[StatusCode]| -> Vec<u32> {
            handles
                .iter()
                .zip(statuses)
                .filter_map(|(h, status)| status.is_good().then_some(*h))
                .collect()
        };
        let added = accepted(links_to_add, &add_results[..]);
        let removed = accepted(links_to_remove, &remove_results[..]);
        if let Some(item) = self
            .subscriptions()
            .get_mut(subscription_id)
            .and_then(|s| s.item_mut(triggering_item))
        {
            item.set_triggering(&added, &removed);
        }
        Ok((add_results, remove_results))
    }

    /// DeleteMonitoredItems, Part 4 5.12.6, by client handle. Local removal happens regardless of
    /// what the server answers, and handles that are already gone are fine.
    pub async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        client_handles: &[u32],
    ) -> Result<(), Error> {
        session_debug!(
            self,
            "delete_monitored_items, subscription {} for {} items",
            subscription_id,
            client_handles.len()
        );
        let (server_id, monitored_item_ids) = {
            let mut state = self.subscriptions();
            let server_id = state.resolve(subscription_id);
            let Some(subscription) = state.get_mut(subscription_id) else {
                return Ok(());
            };
            let ids: Vec<u32> = client_handles
                .iter()
                .filter_map(|h| subscription.remove_item(*h))
                .filter(|i| i.id() != 0)
                .map(|i| i.id())
                .collect();
            (server_id, ids)
        };
        if monitored_item_ids.is_empty() {
            return Ok(());
        }

        let request = DeleteMonitoredItemsRequest {
            request_header: self.make_request_header(),
            subscription_id: server_id,
            monitored_item_ids: Some(monitored_item_ids),
        };
        let outcome = self.send(request).await.and_then(|response| match response {
            SupportedMessage::DeleteMonitoredItemsResponse(response) => {
                process_service_result(&response.response_header)
            }
            response => Err(process_unexpected_response(response)),
        });
        if let Err(e) = outcome {
            session_warn!(self, "Monitored items removed locally only, the server said {}", e);
        }
        Ok(())
    }

    /// Takes the values queued for a monitored item since the last call, oldest first.
    pub fn drain_cached_values(&self, subscription_id: u32, client_handle: u32) -> Vec<DataValue> {
        let mut state = self.subscriptions();
        state
            .get_mut(subscription_id)
            .and_then(|s| s.item_mut(client_handle))
            .map(|i| i.drain_values())
            .unwrap_or_default()
    }

    /// Timeout of a publish request, long enough for the longest living subscription.
    pub(crate) fn publish_request_timeout(&self) -> Duration {
        let longest = {
            let state = self.subscriptions();
            state.longest_lifetime()
        };
        longest
            .map(|l| l.max(self.publish_timeout))
            .unwrap_or(self.publish_timeout)
    }

    /// Sends a publish request with the queued acknowledgements. They are queued again if the
    /// request fails.
    pub(crate) async fn publish(&self) -> Result<PublishResponse, StatusCode> {
        let acks = {
            let mut state = self.subscriptions();
            state.take_acknowledgements()
        };

        if log_enabled!(log::Level::Debug) && !acks.is_empty() {
            let sequence_nrs: Vec<u32> = acks.iter().map(|ack| ack.sequence_number).collect();
            session_debug!(
                self,
                "publish is acknowledging sequence nrs {:?}",
                sequence_nrs
            );
        }

        let timeout = self.publish_request_timeout();
        let request = PublishRequest {
            request_header: self.channel.make_request_header(timeout),
            subscription_acknowledgements: (!acks.is_empty()).then(|| acks.clone()),
        };

        let err_status = match self.send_with_timeout(request, timeout).await {
            Ok(SupportedMessage::PublishResponse(r)) => {
                match process_service_result(&r.response_header) {
                    Ok(()) => return Ok(*r),
                    Err(e) => e,
                }
            }
            Ok(r) => process_unexpected_response(r),
            Err(e) => e,
        };

        {
            let mut state = self.subscriptions();
            state.re_queue_acknowledgements(acks);
        }
        Err(err_status)
    }

    /// Asks the server for a notification again (Republish, Part 4 5.13.6). A notification that
    /// comes back is acknowledged with the next publish.
    pub async fn republish(
        &self,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Result<NotificationMessage, StatusCode> {
        let server_id = self.subscriptions().resolve(subscription_id);
        let request = RepublishRequest {
            request_header: self.make_request_header(),
            subscription_id: server_id,
            retransmit_sequence_number: sequence_number,
        };

        let response = unpack_response!(
            self,
            self.send(request).await?,
            RepublishResponse,
            "republish"
        );
        self.subscriptions().add_acknowledgement(server_id, sequence_number);
        Ok(response.notification_message)
    }

    /// Delivers the notification of a publish response in sequence, republishing whatever is
    /// missing before it.
    pub(crate) async fn process_publish_response(
        &self,
        response: PublishResponse,
    ) -> Vec<SubscriptionActivity> {
        let server_id = response.subscription_id;
        let message = response.notification_message;
        let sequence_number = message.sequence_number;
        let mut activity = Vec::new();

        let decoding_options = {
            let secure_channel = trace_read_lock!(self.channel.secure_channel);
            secure_channel.decoding_options()
        };

        let (subscription_id, arrival) = {
            let mut state = self.subscriptions();
            let local_id = state.local_id(server_id);
            let Some(subscription) = local_id.and_then(|id| state.get_mut(id)) else {
                session_debug!(
                    self,
                    "Publish response for subscription {} that no longer exists",
                    server_id
                );
                if !message.is_keep_alive() {
                    state.add_acknowledgement(server_id, sequence_number);
                }
                activity.push(SubscriptionActivity::Discarded {
                    subscription_id: server_id,
                    sequence_number,
                });
                return activity;
            };
            let subscription_id = subscription.subscription_id();

            if subscription.touch(Instant::now()) {
                activity.push(SubscriptionActivity::KeepAliveResumed { subscription_id });
            }

            // Numbers the server still holds that were already delivered
            let delivered: Vec<u32> = response
                .available_sequence_numbers
                .iter()
                .flatten()
                .copied()
                .filter(|n| subscription.sequence().is_delivered(*n))
                .collect();

            let arrival = if message.is_keep_alive() {
                // The number of a keep-alive is that of the next notification
                subscription.on_keep_alive(sequence_number);
                None
            } else {
                Some(subscription.sequence().classify(sequence_number))
            };

            for n in delivered {
                state.add_acknowledgement(server_id, n);
            }

            let Some(arrival) = arrival else {
                activity.push(SubscriptionActivity::KeepAlive { subscription_id });
                return activity;
            };
            if arrival == Arrival::Stale {
                session_debug!(
                    self,
                    "Dropping notification {} of subscription {}, already delivered",
                    sequence_number,
                    subscription_id
                );
                state.add_acknowledgement(server_id, sequence_number);
                activity.push(SubscriptionActivity::Discarded {
                    subscription_id,
                    sequence_number,
                });
                return activity;
            }
            (subscription_id, arrival)
        };

        match arrival {
            Arrival::Gap(missing) => {
                session_debug!(
                    self,
                    "Subscription {} is missing notifications {:?}",
                    subscription_id,
                    missing
                );
                for n in missing {
                    match self.republish(subscription_id, n).await {
                        Ok(republished) => {
                            let mut state = self.subscriptions();
                            if let Some(subscription) = state.get_mut(subscription_id) {
                                if !subscription.sequence().is_delivered(n) {
                                    let mut republished = republished;
                                    republished.sequence_number = n;
                                    subscription.on_notification(republished, &decoding_options);
                                    activity.push(SubscriptionActivity::Republished {
                                        subscription_id,
                                        sequence_number: n,
                                    });
                                }
                            }
                        }
                        Err(status) => {
                            session_warn!(
                                self,
                                "Notification {} of subscription {} is lost, {}",
                                n,
                                subscription_id,
                                status
                            );
                            let mut state = self.subscriptions();
                            if let Some(subscription) = state.get_mut(subscription_id) {
                                subscription.on_data_loss(n, status);
                            }
                            activity.push(SubscriptionActivity::DataLossDetected {
                                subscription_id,
                                sequence_number: n,
                                status,
                            });
                        }
                    }
                }
            }
            Arrival::Lost {
                first_missing,
                count,
            } => {
                session_warn!(
                    self,
                    "Subscription {} lost {} notifications starting at {}, too many to republish",
                    subscription_id,
                    count,
                    first_missing
                );
                let status = StatusCode::BadMessageNotAvailable;
                let mut state = self.subscriptions();
                if let Some(subscription) = state.get_mut(subscription_id) {
                    subscription.on_data_loss(first_missing, status);
                }
                activity.push(SubscriptionActivity::DataLossDetected {
                    subscription_id,
                    sequence_number: first_missing,
                    status,
                });
            }
            Arrival::Next | Arrival::Stale => {}
        }

        {
            let mut state = self.subscriptions();
            state.add_acknowledgement(server_id, sequence_number);
            match state.get_mut(subscription_id) {
                Some(subscription) if !subscription.sequence().is_delivered(sequence_number) => {
                    subscription.on_notification(message, &decoding_options);
                    activity.push(SubscriptionActivity::Publish {
                        subscription_id,
                        sequence_number,
                    });
                }
                _ => activity.push(SubscriptionActivity::Discarded {
                    subscription_id,
                    sequence_number,
                }),
            }
        }
        activity
    }

    /// This code attempts to take the existing subscriptions created by a previous session and
    /// either transfer them to this session, or construct them from scratch.
    pub(crate) async fn transfer_subscriptions_from_old_session(&self) {
        let ids = {
            let mut state = self.subscriptions();
            state.reset_publish_target();
            state.id_pairs()
        };
        if ids.is_empty() {
            return;
        }

        // Subscriptions that lost their server id last time cannot be transferred
        let (detached, attached): (Vec<(u32, u32)>, Vec<(u32, u32)>) =
            ids.iter().copied().partition(|(_, server_id)| *server_id == 0);
        let server_ids: Vec<u32> = attached.iter().map(|(_, server_id)| *server_id).collect();

        let retained: Vec<bool> = if server_ids.is_empty() {
            Vec::new()
        } else {
            match self.send_transfer_subscriptions(&server_ids, true).await {
                Ok(results) => {
                    session_debug!(self, "transfer_results = {:?}", results);
                    results
                        .iter()
                        .map(|r| {
                            r.status_code.is_good() || r.status_code == StatusCode::BadNothingToDo
                        })
                        .collect()
                }
                Err(e) => {
                    session_warn!(self, "Subscriptions could not be transferred, {}", e);
                    vec![false; server_ids.len()]
                }
            }
        };

        let mut to_recreate: Vec<u32> = attached
            .iter()
            .zip(retained.iter())
            .filter(|(_, r)| !**r)
            .map(|((id, _), _)| *id)
            .collect();
        to_recreate.extend(detached.iter().map(|(id, _)| *id));
        to_recreate.sort_unstable();

        let retention = if to_recreate.is_empty() {
            SubscriptionRetention::Retained
        } else {
            SubscriptionRetention::NotRetained
        };

        if !to_recreate.is_empty() {
            session_warn!(
                self,
                "{} of {} subscriptions were not retained by the server and are created again",
                to_recreate.len(),
                ids.len()
            );
            // Every stale id goes before the first create, the server may hand them out again
            let mut state = self.subscriptions();
            for subscription_id in &to_recreate {
                state.detach_server_id(*subscription_id);
                if let Some(subscription) = state.get_mut(*subscription_id) {
                    subscription.mark_live_items_pending();
                }
            }
        }

        for subscription_id in to_recreate {
            self.recreate_subscription(subscription_id).await;
        }
        *trace_lock!(self.retention) = retention;

        {
            let mut state = self.subscriptions();
            state.reset_watchdogs(Instant::now());
        }
        let _ = self.trigger_publish_tx.send(Instant::now());
    }

    /// Creates a subscription and its pending monitored items again on the server. The
    /// subscription stays in place under its local id throughout. Client handles are kept,
    /// server ids change. Items deleted while this runs are not brought back.
    async fn recreate_subscription(&self, subscription_id: u32) {
        session_debug!(self, "Recreating subscription {}", subscription_id);

        let parameters = {
            let state = self.subscriptions();
            state.get(subscription_id).map(|s| {
                (
                    s.publishing_interval(),
                    s.lifetime_count(),
                    s.max_keep_alive_count(),
                    s.max_notifications_per_publish(),
                    s.publishing_enabled(),
                    s.priority(),
                )
            })
        };
        let Some((
            publishing_interval,
            lifetime_count,
            max_keep_alive_count,
            max_notifications_per_publish,
            publishing_enabled,
            priority,
        )) = parameters
        else {
            session_warn!(
                self,
                "Subscription removed from session while transfer in progress"
            );
            return;
        };

        let response = match self
            .send_create_subscription(
                publishing_interval,
                lifetime_count,
                max_keep_alive_count,
                max_notifications_per_publish,
                publishing_enabled,
                priority,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Left detached, the next reconnect tries again
                session_warn!(
                    self,
                    "Could not create a subscription from the existing subscription {}, {}",
                    subscription_id,
                    e
                );
                return;
            }
        };

        let new_id = response.subscription_id;
        let publishing_interval = revised_interval(response.revised_publishing_interval);
        let recreated = {
            let mut state = self.subscriptions();
            state.set_server_id(subscription_id, new_id);
            state.get_mut(subscription_id).map(|subscription| {
                subscription.set_revised(
                    publishing_interval,
                    response.revised_lifetime_count,
                    response.revised_max_keep_alive_count,
                );
                let mut handles: Vec<u32> = subscription
                    .monitored_items()
                    .values()
                    .filter(|i| i.state() == MonitoredItemState::Pending)
                    .map(|i| i.client_handle())
                    .collect();
                handles.sort_unstable();
                let triggers: Vec<(u32, Vec<u32>)> = subscription
                    .monitored_items()
                    .values()
                    .filter(|i| !i.triggered_items().is_empty())
                    .map(|i| (i.client_handle(), i.triggered_items().iter().copied().collect()))
                    .collect();
                (handles, triggers)
            })
        };
        let Some((handles, triggers)) = recreated else {
            session_warn!(
                self,
                "Subscription {} was deleted while it was created again",
                subscription_id
            );
            if let Err(e) = self.delete_orphaned_subscription(new_id).await {
                session_warn!(self, "Could not delete subscription {}, {}", new_id, e);
            }
            return;
        };

        for chunk in handles.chunks(self.recreate_monitored_items_chunk.max(1)) {
            // Requests for the items still there, built from what was originally asked for
            let (sent, requests): (Vec<u32>, Vec<MonitoredItemCreateRequest>) = {
                let state = self.subscriptions();
                let Some(subscription) = state.get(subscription_id) else {
                    return;
                };
                chunk
                    .iter()
                    .filter_map(|h| subscription.item(*h))
                    .map(|i| (i.client_handle(), create_request(i, publishing_interval)))
                    .unzip()
            };
            if sent.is_empty() {
                continue;
            }
            let outcome = self
                .send_create_monitored_items(new_id, TimestampsToReturn::Both, requests)
                .await;

            let mut orphans = Vec::new();
            {
                let mut state = self.subscriptions();
                let Some(subscription) = state.get_mut(subscription_id) else {
                    return;
                };
                match outcome {
                    Ok(results) => {
                        for (handle, result) in sent.iter().zip(results.iter()) {
                            match subscription.item_mut(*handle) {
                                Some(item) => {
                                    apply_create_result(item, result);
                                    subscription.index_item(*handle);
                                }
                                None if result.status_code.is_good() => {
                                    orphans.push(result.monitored_item_id)
                                }
                                None => {}
                            }
                        }
                    }
                    Err(e) => {
                        session_warn!(
                            self,
                            "Could not create {} monitored items on subscription {}, {}",
                            sent.len(),
                            new_id,
                            e
                        );
                        for handle in &sent {
                            if let Some(item) = subscription.item_mut(*handle) {
                                let _ = item.transition(MonitoredItemState::Failed(e));
                            }
                        }
                    }
                }
            }
            if !orphans.is_empty() {
                session_debug!(
                    self,
                    "Deleting {} monitored items that were removed while being created",
                    orphans.len()
                );
                let request = DeleteMonitoredItemsRequest {
                    request_header: self.make_request_header(),
                    subscription_id: new_id,
                    monitored_item_ids: Some(orphans),
                };
                if let Err(e) = self.send(request).await {
                    session_warn!(self, "Could not delete orphaned monitored items, {}", e);
                }
            }
        }

        for (triggering_item, links) in triggers {
            if let Err(e) = self
                .set_triggering(subscription_id, triggering_item, &links, &[])
                .await
            {
                session_warn!(
                    self,
                    "Could not restore triggering of monitored item {}, {}",
                    triggering_item,
                    e
                );
            }
        }
        session_debug!(
            self,
            "Subscription {} was created again as {}",
            subscription_id,
            new_id
        );
    }

    /// Removes a subscription from the server that nothing refers to locally.
    async fn delete_orphaned_subscription(&self, server_id: u32) -> Result<(), StatusCode> {
        let request = DeleteSubscriptionsRequest {
            request_header: self.make_request_header(),
            subscription_ids: Some(vec![server_id]),
        };
        let response = self.send(request).await?;
        match response {
            SupportedMessage::DeleteSubscriptionsResponse(response) => {
                process_service_result(&response.response_header)
            }
            response => Err(process_unexpected_response(response)),
        }
    }

    /// Number of publish requests that should be outstanding.
    pub(crate) fn publish_target(&self) -> usize {
        let state = self.subscriptions();
        state.publish_target(self.max_inflight_publish)
    }

    pub(crate) fn reduce_publish_target(&self) -> usize {
        let mut state = self.subscriptions();
        state.reduce_publish_target(self.max_inflight_publish)
    }

    /// No publish is sent until the minimum publish interval has passed.
    pub(crate) fn back_off_publish(&self) {
        let mut state = self.subscriptions();
        let until = Instant::now() + state.min_publish_interval();
        state.set_publish_backoff(Some(until));
    }

    /// The end of a publish back-off, `None` once it has passed.
    pub(crate) fn publish_backoff(&self) -> Option<Instant> {
        let mut state = self.subscriptions();
        match state.publish_backoff_until() {
            Some(until) if until > Instant::now() => Some(until),
            Some(_) => {
                state.set_publish_backoff(None);
                None
            }
            None => None,
        }
    }

    pub(crate) fn next_keep_alive_deadline(&self) -> Option<Instant> {
        let state = self.subscriptions();
        state.next_keep_alive_deadline()
    }

    pub(crate) fn expire_keep_alives(&self) -> Vec<u32> {
        let mut state = self.subscriptions();
        state.expire_keep_alives(Instant::now())
    }

    pub(crate) fn reset_keep_alive_watchdogs(&self) {
        let mut state = self.subscriptions();
        state.reset_watchdogs(Instant::now());
    }

    /// Smallest publishing interval of the subscriptions, used to pace session keep-alives.
    pub(crate) fn min_publishing_interval(&self) -> Option<Duration> {
        let state = self.subscriptions();
        state.min_publishing_interval()
    }
}
