// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use super::*;
use crate::client::{Error, MonitoredItemRequest, MonitoredItemState, SubscriptionRetention};

async fn subscription(session: &Session, callback: DataChangeCallback) -> u32 {
    session
        .create_subscription(Duration::from_millis(100), 60, 10, 0, 0, true, callback)
        .await
        .unwrap()
}

fn item(name: &str) -> MonitoredItemRequest {
    MonitoredItemRequest::new(NodeId::new(2, name)).sampling_interval(50.0)
}

/// Answers the next publish request once the subscription loop has sent one.
async fn publish(server: &MockServer, subscription_id: u32, message: NotificationMessage) {
    server
        .wait_until("an outstanding publish request", |s| !s.publish_queue.is_empty())
        .await;
    assert!(server.publish(subscription_id, message));
}

fn acknowledges(request: &SupportedMessage, subscription_id: u32, sequence_number: u32) -> bool {
    let SupportedMessage::PublishRequest(r) = request else {
        return false;
    };
    r.subscription_acknowledgements.iter().flatten().any(|a| {
        a.subscription_id == subscription_id && a.sequence_number == sequence_number
    })
}

fn is_publish(r: &SupportedMessage) -> bool {
    matches!(r, SupportedMessage::PublishRequest(_))
}

#[tokio::test]
async fn gap_is_filled_by_republish() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let (callback, mut rx) = forwarding_callback();
    let subscription_id = subscription(&session, callback).await;
    let items = session
        .create_monitored_items(subscription_id, TimestampsToReturn::Both, vec![item("Level")])
        .await
        .unwrap();
    let handle = items[0].client_handle;

    publish(&server, subscription_id, data_change(5, handle, 5)).await;
    assert_eq!(next_value(&mut rx).await.1.value, Some(Variant::Int32(5)));

    server.lose(subscription_id, data_change(6, handle, 6));
    publish(&server, subscription_id, data_change(7, handle, 7)).await;

    let (h, six) = next_value(&mut rx).await;
    assert_eq!(h, handle);
    assert_eq!(six.value, Some(Variant::Int32(6)));
    let (_, seven) = next_value(&mut rx).await;
    assert_eq!(seven.value, Some(Variant::Int32(7)));

    let republished: Vec<u32> = server
        .requests()
        .iter()
        .filter_map(|r| match r {
            SupportedMessage::RepublishRequest(r) => Some(r.retransmit_sequence_number),
            _ => None,
        })
        .collect();
    assert_eq!(republished, vec![6]);

    // The next publish request carries the acknowledgement of 7
    publish(&server, subscription_id, NotificationMessage::keep_alive(8, DateTime::now())).await;
    server
        .wait_until("the acknowledgement of 7", |s| {
            s.requests.iter().any(|r| acknowledges(r, subscription_id, 7))
        })
        .await;
    assert!(rx.try_recv().is_err());

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn every_publish_response_is_replaced() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let (callback, _rx) = forwarding_callback();
    let subscription_id = subscription(&session, callback).await;

    // One subscription keeps two publish requests outstanding
    server
        .wait_until("two publish requests", |s| s.publish_queue.len() == 2)
        .await;

    const RESPONSES: usize = 5;
    for _ in 0..RESPONSES {
        publish(&server, subscription_id, NotificationMessage::keep_alive(1, DateTime::now())).await;
    }
    server
        .wait_until("the publish requests to be replaced", |s| {
            s.requests.iter().filter(|r| is_publish(r)).count() == RESPONSES + 2
        })
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.count(is_publish), RESPONSES + 2);
    assert_eq!(server.with_state(|s| s.publish_queue.len()), 2);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn too_many_publish_requests_lowers_the_target() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let (callback, _rx) = forwarding_callback();
    let _ = subscription(&session, callback).await;
    server
        .wait_until("two publish requests", |s| s.publish_queue.len() == 2)
        .await;

    assert!(server.fail_publish(StatusCode::BadTooManyPublishRequests));
    eventually("the target to drop", || session.publish_target() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.with_state(|s| s.publish_queue.len()), 1);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn lifetime_must_exceed_keep_alive() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let (callback, _rx) = forwarding_callback();
    let result = session
        .create_subscription(Duration::from_millis(100), 10, 10, 0, 0, true, callback)
        .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(
        server.count(|r| matches!(r, SupportedMessage::CreateSubscriptionRequest(_))),
        0
    );

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn deletes_are_idempotent() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let (callback, _rx) = forwarding_callback();
    let subscription_id = subscription(&session, callback).await;
    let items = session
        .create_monitored_items(
            subscription_id,
            TimestampsToReturn::Both,
            vec![item("Level"), item("Flow")],
        )
        .await
        .unwrap();
    let handles: Vec<u32> = items.iter().map(|i| i.client_handle).collect();

    session
        .delete_monitored_items(subscription_id, &handles)
        .await
        .unwrap();
    session
        .delete_monitored_items(subscription_id, &handles)
        .await
        .unwrap();
    assert_eq!(
        server.count(|r| matches!(r, SupportedMessage::DeleteMonitoredItemsRequest(_))),
        1
    );

    assert_eq!(
        session.delete_subscription(subscription_id).await.unwrap(),
        StatusCode::Good
    );
    assert_eq!(
        session.delete_subscription(subscription_id).await.unwrap(),
        StatusCode::Good
    );
    assert_eq!(
        server.count(|r| matches!(r, SupportedMessage::DeleteSubscriptionsRequest(_))),
        1
    );
    assert!(session.subscription_snapshot().is_empty());

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn rejected_items_keep_their_handles() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    server.with_state(|s| {
        s.reject_nodes.insert(NodeId::new(2, "Missing"));
    });
    let (session, _event_loop) = connected_session(&client).await;

    let (callback, _rx) = forwarding_callback();
    let subscription_id = subscription(&session, callback).await;
    let items = session
        .create_monitored_items(
            subscription_id,
            TimestampsToReturn::Both,
            vec![item("Level"), item("Missing")],
        )
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].state, MonitoredItemState::Created);
    assert_eq!(
        items[1].state,
        MonitoredItemState::Failed(StatusCode::BadNodeIdUnknown)
    );
    assert!(items[0].client_handle < items[1].client_handle);

    let more = session
        .create_monitored_items(subscription_id, TimestampsToReturn::Both, vec![item("Flow")])
        .await
        .unwrap();
    assert!(more[0].client_handle > items[1].client_handle);

    let snapshot = session.subscription_snapshot();
    assert_eq!(snapshot[0].monitored_items.len(), 3);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn subscriptions_are_recreated_with_the_same_handles() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let (callback, mut rx) = forwarding_callback();
    let subscription_id = subscription(&session, callback).await;
    let items = session
        .create_monitored_items(
            subscription_id,
            TimestampsToReturn::Both,
            vec![item("Level"), item("Flow")],
        )
        .await
        .unwrap();
    let handles: Vec<u32> = items.iter().map(|i| i.client_handle).collect();

    server.disconnect();
    server
        .wait_until("the items to be created again", |s| {
            s.connections == 2
                && s.requests
                    .iter()
                    .filter(|r| matches!(r, SupportedMessage::CreateMonitoredItemsRequest(_)))
                    .count()
                    == 2
        })
        .await;
    eventually("the session to reconnect", || session.is_connected()).await;
    eventually("the recreation to finish", || {
        session.subscription_retention() == SubscriptionRetention::NotRetained
    })
    .await;

    let recreated = server
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            SupportedMessage::CreateMonitoredItemsRequest(r) => Some(r),
            _ => None,
        })
        .last()
        .unwrap();
    let recreated_handles: Vec<u32> = recreated
        .items_to_create
        .iter()
        .flatten()
        .map(|i| i.requested_parameters.client_handle)
        .collect();
    assert_eq!(recreated_handles, handles);
    assert_ne!(recreated.subscription_id, subscription_id);

    let snapshot = session.subscription_snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].subscription_id, subscription_id);
    assert_eq!(snapshot[0].server_subscription_id, recreated.subscription_id);
    let snapshot_handles: Vec<u32> = snapshot[0]
        .monitored_items
        .iter()
        .map(|i| i.client_handle)
        .collect();
    assert_eq!(snapshot_handles, handles);

    // Notifications of the new subscription reach the same callback and handle
    publish(&server, recreated.subscription_id, data_change(1, handles[1], 42)).await;
    let (h, value) = next_value(&mut rx).await;
    assert_eq!(h, handles[1]);
    assert_eq!(value.value, Some(Variant::Int32(42)));

    // The id handed out at creation still refers to the subscription
    assert_eq!(
        session.delete_subscription(subscription_id).await.unwrap(),
        StatusCode::Good
    );
    assert!(session.subscription_snapshot().is_empty());

    session.disconnect().await.unwrap();
}

fn created_on(server: &MockServer) -> Vec<(u32, Vec<u32>)> {
    server
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            SupportedMessage::CreateMonitoredItemsRequest(r) => Some((
                r.subscription_id,
                r.items_to_create
                    .iter()
                    .flatten()
                    .map(|i| i.requested_parameters.client_handle)
                    .collect(),
            )),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn server_ids_handed_out_again_after_a_restart() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let (first_callback, mut first_rx) = forwarding_callback();
    let first = subscription(&session, first_callback).await;
    let first_items = session
        .create_monitored_items(first, TimestampsToReturn::Both, vec![item("Level")])
        .await
        .unwrap();
    let (second_callback, mut second_rx) = forwarding_callback();
    let second = subscription(&session, second_callback).await;
    let second_items = session
        .create_monitored_items(
            second,
            TimestampsToReturn::Both,
            vec![item("Flow"), item("Pressure")],
        )
        .await
        .unwrap();
    assert_eq!((first, second), (1, 2));

    // The first subscription comes back as 2, the id the second one had
    server.restart(1);
    server
        .wait_until("both subscriptions to be created again", |s| {
            s.connections == 2
                && s.requests
                    .iter()
                    .filter(|r| matches!(r, SupportedMessage::CreateMonitoredItemsRequest(_)))
                    .count()
                    == 4
        })
        .await;
    eventually("the recreation to finish", || {
        session.subscription_retention() == SubscriptionRetention::NotRetained
            && session
                .subscription_snapshot()
                .iter()
                .flat_map(|s| s.monitored_items.iter())
                .all(|i| i.state == MonitoredItemState::Created)
    })
    .await;

    let created = created_on(&server);
    assert_eq!(created[2], (2, vec![first_items[0].client_handle]));
    assert_eq!(
        created[3],
        (
            3,
            second_items.iter().map(|i| i.client_handle).collect::<Vec<_>>()
        )
    );

    let snapshot = session.subscription_snapshot();
    let ids: Vec<(u32, u32)> = snapshot
        .iter()
        .map(|s| (s.subscription_id, s.server_subscription_id))
        .collect();
    assert_eq!(ids, vec![(1, 2), (2, 3)]);
    assert_eq!(snapshot[0].monitored_items.len(), 1);
    assert_eq!(snapshot[1].monitored_items.len(), 2);

    // Each server id reaches the callback of its own subscription
    publish(&server, 3, data_change(1, second_items[1].client_handle, 7)).await;
    let (h, value) = next_value(&mut second_rx).await;
    assert_eq!(h, second_items[1].client_handle);
    assert_eq!(value.value, Some(Variant::Int32(7)));
    publish(&server, 2, data_change(1, first_items[0].client_handle, 8)).await;
    let (h, _) = next_value(&mut first_rx).await;
    assert_eq!(h, first_items[0].client_handle);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn items_deleted_while_being_created_again_are_removed_from_the_server() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let (callback, _rx) = forwarding_callback();
    let subscription_id = subscription(&session, callback).await;
    let items = session
        .create_monitored_items(
            subscription_id,
            TimestampsToReturn::Both,
            vec![item("Level"), item("Flow")],
        )
        .await
        .unwrap();
    let handles: Vec<u32> = items.iter().map(|i| i.client_handle).collect();

    server.with_state(|s| s.hold_monitored_items = true);
    server.disconnect();
    server
        .wait_until("the items to be created again", |s| s.held_responses.len() == 1)
        .await;

    // The items stay in the subscription while the server has not answered
    let snapshot = session.subscription_snapshot();
    let states: Vec<(u32, MonitoredItemState)> = snapshot[0]
        .monitored_items
        .iter()
        .map(|i| (i.client_handle, i.state))
        .collect();
    assert_eq!(
        states,
        vec![
            (handles[0], MonitoredItemState::Pending),
            (handles[1], MonitoredItemState::Pending)
        ]
    );
    let orphan = server.with_state(|s| match &s.held_responses[0].1 {
        SupportedMessage::CreateMonitoredItemsResponse(r) => r.results.as_ref().unwrap()[0].monitored_item_id,
        _ => panic!("unexpected held response"),
    });

    session
        .delete_monitored_items(subscription_id, &[handles[0]])
        .await
        .unwrap();
    server.release_held_responses();

    server
        .wait_until("the orphaned item to be deleted", |s| {
            s.requests.iter().any(|r| match r {
                SupportedMessage::DeleteMonitoredItemsRequest(r) => {
                    r.monitored_item_ids.as_deref() == Some(&[orphan][..])
                }
                _ => false,
            })
        })
        .await;
    eventually("the remaining item to be created", || {
        session.subscription_snapshot()[0]
            .monitored_items
            .iter()
            .all(|i| i.state == MonitoredItemState::Created)
    })
    .await;
    let snapshot = session.subscription_snapshot();
    let remaining: Vec<u32> = snapshot[0]
        .monitored_items
        .iter()
        .map(|i| i.client_handle)
        .collect();
    assert_eq!(remaining, vec![handles[1]]);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn retained_subscriptions_are_not_recreated() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    server.with_state(|s| s.retain_subscriptions = true);
    let (session, _event_loop) = connected_session(&client).await;

    let (callback, mut rx) = forwarding_callback();
    let subscription_id = subscription(&session, callback).await;
    let items = session
        .create_monitored_items(subscription_id, TimestampsToReturn::Both, vec![item("Level")])
        .await
        .unwrap();

    server.disconnect();
    server
        .wait_until("the transfer", |s| {
            s.requests
                .iter()
                .any(|r| matches!(r, SupportedMessage::TransferSubscriptionsRequest(_)))
        })
        .await;
    eventually("the transfer to finish", || {
        session.subscription_retention() == SubscriptionRetention::Retained
    })
    .await;
    assert_eq!(
        server.count(|r| matches!(r, SupportedMessage::CreateSubscriptionRequest(_))),
        1
    );
    assert_eq!(
        server.count(|r| matches!(r, SupportedMessage::CreateMonitoredItemsRequest(_))),
        1
    );

    publish(&server, subscription_id, data_change(1, items[0].client_handle, 3)).await;
    let (h, _) = next_value(&mut rx).await;
    assert_eq!(h, items[0].client_handle);

    session.disconnect().await.unwrap();
}
