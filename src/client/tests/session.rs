// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use super::*;
use crate::{
    client::{ChannelState, Error},
    crypto::SecurityPolicy,
};

fn is_create_session(r: &SupportedMessage) -> bool {
    matches!(r, SupportedMessage::CreateSessionRequest(_))
}

fn is_activate_session(r: &SupportedMessage) -> bool {
    matches!(r, SupportedMessage::ActivateSessionRequest(_))
}

#[tokio::test]
async fn connect_opens_channel_then_creates_and_activates() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, event_loop) = connected_session(&client).await;

    let requests = server.requests();
    assert!(matches!(
        requests[0],
        SupportedMessage::OpenSecureChannelRequest(_)
    ));
    assert!(is_create_session(&requests[1]));
    assert!(is_activate_session(&requests[2]));
    assert_eq!(session.server_session_id(), NodeId::new(1, 1u32));
    // The server revised nothing
    assert_eq!(session.session_timeout(), Duration::from_millis(60_000));

    session.disconnect().await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), event_loop)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, StatusCode::Good);
    assert_eq!(
        server.count(|r| matches!(r, SupportedMessage::CloseSessionRequest(_))),
        1
    );
    assert_eq!(
        server.count(|r| matches!(r, SupportedMessage::CloseSecureChannelRequest(_))),
        1
    );
}

#[tokio::test]
async fn reconnect_reactivates_the_session() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    server.disconnect();
    server
        .wait_until("the session to be activated again", |s| {
            s.requests.iter().filter(|r| is_activate_session(r)).count() == 2
        })
        .await;
    eventually("the session to reconnect", || session.is_connected()).await;

    assert_eq!(server.with_state(|s| s.connections), 2);
    assert_eq!(server.count(is_create_session), 1);
    assert_eq!(session.server_session_id(), NodeId::new(1, 1u32));

    // Nothing to transfer without subscriptions
    assert_eq!(
        server.count(|r| matches!(r, SupportedMessage::TransferSubscriptionsRequest(_))),
        0
    );

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn forgotten_session_is_created_again() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;
    assert_eq!(session.server_session_id(), NodeId::new(1, 1u32));

    server.with_state(|s| s.reject_activations = 1);
    server.disconnect();
    server
        .wait_until("a second session", |s| {
            s.requests.iter().filter(|r| is_create_session(r)).count() == 2
        })
        .await;
    eventually("the session to reconnect", || {
        session.is_connected() && session.server_session_id() == NodeId::new(1, 2u32)
    })
    .await;
    // The rejected reactivation, then the activation of the new session
    assert_eq!(server.count(is_activate_session), 3);
    assert_eq!(server.with_state(|s| s.connections), 2);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn failed_token_renewal_reopens_the_channel() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    server.with_state(|s| {
        s.token_lifetime = Some(400);
        s.fail_renewals = 1;
        s.values.insert(NodeId::new(2, "Speed"), Variant::from(12i32));
    });
    let (session, _event_loop) = connected_session(&client).await;
    assert_eq!(session.channel_state(), ChannelState::Open);

    // Past 75% of the lifetime the read renews first, which the server refuses
    tokio::time::sleep(Duration::from_millis(350)).await;
    let speed = [ReadValueId::from(NodeId::new(2, "Speed"))];
    let _ = session.read(&speed, TimestampsToReturn::Neither, 0.0).await;

    server
        .wait_until("the session to be activated again", |s| {
            s.requests.iter().filter(|r| is_activate_session(r)).count() == 2
        })
        .await;
    eventually("the session to reconnect", || session.is_connected()).await;
    assert_eq!(server.with_state(|s| s.connections), 2);
    assert!(server.with_state(|s| s.renewals) >= 1);
    assert_eq!(session.channel_state(), ChannelState::Open);
    // The session survives on the new channel
    assert_eq!(server.count(is_create_session), 1);

    let values = session
        .read(&speed, TimestampsToReturn::Neither, 0.0)
        .await
        .unwrap();
    assert_eq!(values[0].value, Some(Variant::from(12i32)));

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn refused_connections_exhaust_retries() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);
    server.with_state(|s| s.refuse_connections = Some(StatusCode::BadCommunicationError));

    let (session, event_loop) = client
        .new_session_from_info(EndpointDescription::from(ENDPOINT_URL))
        .unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), event_loop.run())
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BadCommunicationError);
    assert!(!session.is_connected());
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn untrusted_server_certificate_is_not_retried() {
    let (config, _pki) = test_config();
    let (client, server) = mock_client(config);

    let mut endpoint = EndpointDescription::from(ENDPOINT_URL);
    endpoint.security_mode = MessageSecurityMode::SignAndEncrypt;
    endpoint.security_policy_uri = UAString::from(SecurityPolicy::Basic256Sha256.to_uri());
    endpoint.server_certificate = ByteString::from(vec![0xde_u8, 0xad, 0xbe, 0xef]);

    let (_session, event_loop) = client.new_session_from_info(endpoint).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), event_loop.run())
        .await
        .unwrap();
    assert!(matches!(Error::from(status), Error::Security(_)));
    assert_eq!(status, StatusCode::BadCertificateInvalid);
    // No transport was ever opened
    assert_eq!(server.with_state(|s| s.connections), 0);
}

#[tokio::test]
async fn keep_alive_reads_server_state() {
    let (mut config, _pki) = test_config();
    config.keep_alive_interval_ms = 50;
    let (client, server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let state: NodeId = VariableId::Server_ServerStatus_State.into();
    server
        .wait_until("two keep-alive reads", |s| {
            s.requests
                .iter()
                .filter(|r| match r {
                    SupportedMessage::ReadRequest(r) => r
                        .nodes_to_read
                        .iter()
                        .flatten()
                        .any(|n| n.node_id == state),
                    _ => false,
                })
                .count()
                >= 2
        })
        .await;
    assert!(session.is_connected());
    assert_eq!(server.with_state(|s| s.connections), 1);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn sessions_are_registered_until_removed() {
    let (config, _pki) = test_config();
    let (client, _server) = mock_client(config);
    let (session, _event_loop) = connected_session(&client).await;

    let registry = client.registry();
    let found = registry.get(session.session_id()).unwrap();
    assert!(Arc::ptr_eq(&found, &session));

    session.disconnect().await.unwrap();
    assert!(registry.remove(session.session_id()));
    assert!(registry.get(session.session_id()).is_none());
}
