// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! An in-process server behind a mock transport. Requests are answered as decoded messages,
//! no bytes are encoded. Publish requests are held until a test answers them.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tempdir::TempDir;

use crate::{
    core::{comms::secure_channel::SecureChannel, supported_message::SupportedMessage},
    sync::{Mutex, RwLock},
    types::*,
};

use super::{
    transport::{Connector, OutgoingMessage, ResponseCallback, Transport, TransportConfiguration, TransportPollResult},
    Client, ClientConfig, DataChangeCallback, MonitoredItem, Session,
};

mod session;
mod subscriptions;

pub(crate) const ENDPOINT_URL: &str = "opc.tcp://127.0.0.1:4855/";

/// What the mock server has seen and how it behaves.
#[derive(Default)]
pub(crate) struct ServerState {
    /// Every request received, in order
    pub requests: Vec<SupportedMessage>,
    /// Publish requests waiting for a notification
    pub publish_queue: VecDeque<(RequestHeader, ResponseCallback)>,
    /// Transports opened
    pub connections: usize,
    /// Fails `connect` with this status when set
    pub refuse_connections: Option<StatusCode>,
    /// Whether TransferSubscriptions succeeds for known subscriptions
    pub retain_subscriptions: bool,
    /// Nodes CreateMonitoredItems rejects with `BadNodeIdUnknown`
    pub reject_nodes: HashSet<NodeId>,
    /// Values returned by Read, other nodes are unknown
    pub values: HashMap<NodeId, Variant>,
    /// Notifications sent or stored per subscription, for Republish
    pub messages: HashMap<u32, Vec<NotificationMessage>>,
    pub subscriptions: HashSet<u32>,
    /// Lifetime of issued security tokens in milliseconds, an hour when unset
    pub token_lifetime: Option<u32>,
    /// How many of the next token renewals are answered with a service fault
    pub fail_renewals: usize,
    /// Renew requests received
    pub renewals: usize,
    /// How many of the next ActivateSession requests fail with `BadSessionIdInvalid`
    pub reject_activations: usize,
    /// Holds CreateMonitoredItems responses in `held_responses` while set
    pub hold_monitored_items: bool,
    pub held_responses: Vec<(ResponseCallback, SupportedMessage)>,
    next_subscription_id: u32,
    next_monitored_item_id: u32,
    next_session: u32,
    next_token: u32,
}

impl ServerState {
    fn respond(&mut self, request: &SupportedMessage) -> Option<SupportedMessage> {
        let header = request.request_header()?.clone();
        let good = ResponseHeader::new_good(&header);
        let response: SupportedMessage = match request {
            SupportedMessage::OpenSecureChannelRequest(r) => {
                if r.request_type == SecurityTokenRequestType::Renew {
                    self.renewals += 1;
                    if self.fail_renewals > 0 {
                        self.fail_renewals -= 1;
                        return Some(ServiceFault::new(&header, StatusCode::BadInternalError).into());
                    }
                }
                self.next_token += 1;
                OpenSecureChannelResponse {
                    response_header: good,
                    server_protocol_version: 0,
                    security_token: ChannelSecurityToken {
                        channel_id: 1,
                        token_id: self.next_token,
                        created_at: DateTime::now(),
                        revised_lifetime: self.token_lifetime.unwrap_or(3_600_000),
                    },
                    server_nonce: ByteString::null(),
                }
                .into()
            }
            SupportedMessage::CreateSessionRequest(r) => {
                self.next_session += 1;
                CreateSessionResponse {
                    response_header: good,
                    session_id: NodeId::new(1, self.next_session),
                    authentication_token: NodeId::new(1, format!("token-{}", self.next_session)),
                    revised_session_timeout: r.requested_session_timeout,
                    server_nonce: ByteString::null(),
                    server_certificate: ByteString::null(),
                    server_endpoints: None,
                    server_software_certificates: None,
                    server_signature: SignatureData::null(),
                    max_request_message_size: 0,
                }
                .into()
            }
            SupportedMessage::ActivateSessionRequest(_) if self.reject_activations > 0 => {
                self.reject_activations -= 1;
                ServiceFault::new(&header, StatusCode::BadSessionIdInvalid).into()
            }
            SupportedMessage::ActivateSessionRequest(_) => ActivateSessionResponse {
                response_header: good,
                server_nonce: ByteString::null(),
                results: None,
                diagnostic_infos: None,
            }
            .into(),
            SupportedMessage::CloseSessionRequest(_) => {
                // Outstanding publish requests end with the session
                self.publish_queue.clear();
                CloseSessionResponse {
                    response_header: good,
                }
                .into()
            }
            SupportedMessage::ReadRequest(r) => {
                let results = r
                    .nodes_to_read
                    .iter()
                    .flatten()
                    .map(|n| self.read_value(&n.node_id))
                    .collect();
                ReadResponse {
                    response_header: good,
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::WriteRequest(r) => {
                let mut results = Vec::new();
                for w in r.nodes_to_write.iter().flatten() {
                    match (self.values.contains_key(&w.node_id), &w.value.value) {
                        (true, Some(v)) => {
                            self.values.insert(w.node_id.clone(), v.clone());
                            results.push(StatusCode::Good);
                        }
                        _ => results.push(StatusCode::BadNodeIdUnknown),
                    }
                }
                WriteResponse {
                    response_header: good,
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::BrowseRequest(r) => {
                let results = r
                    .nodes_to_browse
                    .iter()
                    .flatten()
                    .map(|d| BrowseResult {
                        status_code: StatusCode::Good,
                        continuation_point: ByteString::null(),
                        references: Some(vec![ReferenceDescription {
                            reference_type_id: ReferenceTypeId::Organizes.into(),
                            is_forward: true,
                            node_id: NodeId::new(2, "Pump").into(),
                            browse_name: QualifiedName::new(2, "Pump"),
                            display_name: LocalizedText::new("", "Pump"),
                            node_class: NodeClass::Object,
                            type_definition: ExpandedNodeId::from(&d.node_id),
                        }]),
                    })
                    .collect();
                BrowseResponse {
                    response_header: good,
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::CallRequest(r) => {
                // Echoes the input arguments
                let results = r
                    .methods_to_call
                    .iter()
                    .flatten()
                    .map(|m| CallMethodResult {
                        status_code: StatusCode::Good,
                        input_argument_results: m
                            .input_arguments
                            .as_ref()
                            .map(|a| vec![StatusCode::Good; a.len()]),
                        input_argument_diagnostic_infos: None,
                        output_arguments: m.input_arguments.clone(),
                    })
                    .collect();
                CallResponse {
                    response_header: good,
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::CreateSubscriptionRequest(r) => {
                self.next_subscription_id += 1;
                let subscription_id = self.next_subscription_id;
                self.subscriptions.insert(subscription_id);
                CreateSubscriptionResponse {
                    response_header: good,
                    subscription_id,
                    revised_publishing_interval: r.requested_publishing_interval,
                    revised_lifetime_count: r.requested_lifetime_count,
                    revised_max_keep_alive_count: r.requested_max_keep_alive_count,
                }
                .into()
            }
            SupportedMessage::CreateMonitoredItemsRequest(r) => {
                if !self.subscriptions.contains(&r.subscription_id) {
                    return Some(ServiceFault::new(&header, StatusCode::BadSubscriptionIdInvalid).into());
                }
                let mut results = Vec::new();
                for item in r.items_to_create.iter().flatten() {
                    let params = &item.requested_parameters;
                    if self.reject_nodes.contains(&item.item_to_monitor.node_id) {
                        results.push(MonitoredItemCreateResult {
                            status_code: StatusCode::BadNodeIdUnknown,
                            monitored_item_id: 0,
                            revised_sampling_interval: 0.0,
                            revised_queue_size: 0,
                            filter_result: ExtensionObject::null(),
                        });
                    } else {
                        self.next_monitored_item_id += 1;
                        results.push(MonitoredItemCreateResult {
                            status_code: StatusCode::Good,
                            monitored_item_id: self.next_monitored_item_id,
                            revised_sampling_interval: params.sampling_interval,
                            revised_queue_size: params.queue_size,
                            filter_result: ExtensionObject::null(),
                        });
                    }
                }
                CreateMonitoredItemsResponse {
                    response_header: good,
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::DeleteMonitoredItemsRequest(r) => DeleteMonitoredItemsResponse {
                response_header: good,
                results: r
                    .monitored_item_ids
                    .as_ref()
                    .map(|ids| vec![StatusCode::Good; ids.len()]),
                diagnostic_infos: None,
            }
            .into(),
            SupportedMessage::DeleteSubscriptionsRequest(r) => {
                let results = r
                    .subscription_ids
                    .iter()
                    .flatten()
                    .map(|id| {
                        if self.subscriptions.remove(id) {
                            StatusCode::Good
                        } else {
                            StatusCode::BadSubscriptionIdInvalid
                        }
                    })
                    .collect();
                DeleteSubscriptionsResponse {
                    response_header: good,
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::TransferSubscriptionsRequest(r) => {
                let results = r
                    .subscription_ids
                    .iter()
                    .flatten()
                    .map(|id| TransferResult {
                        status_code: if self.retain_subscriptions && self.subscriptions.contains(id) {
                            StatusCode::Good
                        } else {
                            StatusCode::BadSubscriptionIdInvalid
                        },
                        available_sequence_numbers: None,
                    })
                    .collect();
                TransferSubscriptionsResponse {
                    response_header: good,
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::RepublishRequest(r) => {
                let message = self
                    .messages
                    .get(&r.subscription_id)
                    .and_then(|m| m.iter().find(|m| m.sequence_number == r.retransmit_sequence_number));
                match message {
                    Some(message) => RepublishResponse {
                        response_header: good,
                        notification_message: message.clone(),
                    }
                    .into(),
                    None => ServiceFault::new(&header, StatusCode::BadMessageNotAvailable).into(),
                }
            }
            _ => ServiceFault::new(&header, StatusCode::BadServiceUnsupported).into(),
        };
        Some(response)
    }

    fn read_value(&self, node_id: &NodeId) -> DataValue {
        if *node_id == VariableId::Server_ServerStatus_State.into() {
            // ServerState::Running
            return DataValue::value_only(0i32);
        }
        match self.values.get(node_id) {
            Some(v) => DataValue::value_only(v.clone()),
            None => DataValue {
                status: Some(StatusCode::BadNodeIdUnknown),
                ..Default::default()
            },
        }
    }
}

/// The server side of every transport a [`MockConnector`] opens.
pub(crate) struct MockServer {
    state: Mutex<ServerState>,
    disconnect_tx: tokio::sync::watch::Sender<u64>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        let (disconnect_tx, _) = tokio::sync::watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            disconnect_tx,
        })
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        let mut state = trace_lock!(self.state);
        f(&mut state)
    }

    fn handle(&self, message: OutgoingMessage) {
        let OutgoingMessage {
            request, callback, ..
        } = message;
        let mut state = trace_lock!(self.state);
        state.requests.push(request.clone());
        if let SupportedMessage::PublishRequest(r) = &request {
            if let Some(callback) = callback {
                state.publish_queue.push_back((r.request_header.clone(), callback));
            }
            return;
        }
        let response = state.respond(&request);
        if state.hold_monitored_items
            && matches!(request, SupportedMessage::CreateMonitoredItemsRequest(_))
        {
            if let (Some(callback), Some(response)) = (callback, response) {
                state.held_responses.push((callback, response));
            }
            return;
        }
        drop(state);
        if let (Some(callback), Some(response)) = (callback, response) {
            let _ = callback.send(Ok(response));
        }
    }

    /// Answers the oldest outstanding publish request. The message is kept for Republish.
    pub fn publish(&self, subscription_id: u32, message: NotificationMessage) -> bool {
        let mut state = trace_lock!(self.state);
        let Some((header, callback)) = state.publish_queue.pop_front() else {
            return false;
        };
        if !message.is_keep_alive() {
            state
                .messages
                .entry(subscription_id)
                .or_default()
                .push(message.clone());
        }
        let response = PublishResponse {
            response_header: ResponseHeader::new_good(&header),
            subscription_id,
            available_sequence_numbers: None,
            more_notifications: false,
            notification_message: message,
            results: None,
            diagnostic_infos: None,
        };
        drop(state);
        callback.send(Ok(response.into())).is_ok()
    }

    /// Sends the responses held back since `hold_monitored_items` was set, and stops holding.
    pub fn release_held_responses(&self) {
        let held = self.with_state(|s| {
            s.hold_monitored_items = false;
            std::mem::take(&mut s.held_responses)
        });
        for (callback, response) in held {
            let _ = callback.send(Ok(response));
        }
    }

    /// Forgets every subscription, as a restarted server would. New subscription ids follow
    /// `last_subscription_id`.
    pub fn restart(&self, last_subscription_id: u32) {
        self.with_state(|s| {
            s.subscriptions.clear();
            s.messages.clear();
            s.next_subscription_id = last_subscription_id;
        });
        self.disconnect();
    }

    /// Keeps a message for Republish without ever publishing it, as if it was lost on the way.
    pub fn lose(&self, subscription_id: u32, message: NotificationMessage) {
        self.with_state(|s| s.messages.entry(subscription_id).or_default().push(message));
    }

    /// Fails the oldest outstanding publish request with a service fault.
    pub fn fail_publish(&self, status: StatusCode) -> bool {
        let Some((header, callback)) = self.with_state(|s| s.publish_queue.pop_front()) else {
            return false;
        };
        callback
            .send(Ok(ServiceFault::new(&header, status).into()))
            .is_ok()
    }

    /// Drops every open transport as if the network went away.
    pub fn disconnect(&self) {
        self.with_state(|s| s.publish_queue.clear());
        self.disconnect_tx.send_modify(|g| *g += 1);
    }

    pub fn count(&self, f: impl Fn(&SupportedMessage) -> bool) -> usize {
        self.with_state(|s| s.requests.iter().filter(|r| f(r)).count())
    }

    pub fn requests(&self) -> Vec<SupportedMessage> {
        self.with_state(|s| s.requests.clone())
    }

    /// Resolves once `f` holds, panics after a few seconds.
    pub async fn wait_until(&self, what: &str, f: impl Fn(&ServerState) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.with_state(|s| f(s)) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("Timed out waiting for {}", what);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub(crate) struct MockConnector {
    server: Arc<MockServer>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: tokio::sync::mpsc::Receiver<OutgoingMessage>,
        _config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<Box<dyn Transport>, StatusCode> {
        if let Some(status) = self.server.with_state(|s| s.refuse_connections) {
            return Err(status);
        }
        debug!("Mock transport connecting to {}", endpoint_url);
        self.server.with_state(|s| s.connections += 1);
        let disconnect_rx = self.server.disconnect_tx.subscribe();
        let generation = *disconnect_rx.borrow();
        Ok(Box::new(MockTransport {
            server: self.server.clone(),
            outgoing_recv,
            disconnect_rx,
            generation,
            should_close: false,
            closed: None,
        }))
    }
}

struct MockTransport {
    server: Arc<MockServer>,
    outgoing_recv: tokio::sync::mpsc::Receiver<OutgoingMessage>,
    disconnect_rx: tokio::sync::watch::Receiver<u64>,
    generation: u64,
    should_close: bool,
    closed: Option<StatusCode>,
}

async fn disconnected(rx: &mut tokio::sync::watch::Receiver<u64>, generation: u64) {
    if rx.wait_for(|g| *g > generation).await.is_err() {
        futures::future::pending::<()>().await;
    }
}

impl MockTransport {
    fn close(&mut self, status: StatusCode) -> TransportPollResult {
        // Callbacks of requests still queued are dropped, failing them
        self.outgoing_recv.close();
        while self.outgoing_recv.try_recv().is_ok() {}
        self.closed = Some(status);
        TransportPollResult::Closed(status)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn poll(&mut self) -> TransportPollResult {
        if let Some(status) = self.closed {
            return TransportPollResult::Closed(status);
        }
        if self.should_close {
            return self.close(StatusCode::Good);
        }
        let generation = self.generation;
        tokio::select! {
            _ = disconnected(&mut self.disconnect_rx, generation) => {
                self.close(StatusCode::BadConnectionClosed)
            }
            outgoing = self.outgoing_recv.recv() => {
                let Some(outgoing) = outgoing else {
                    return self.close(StatusCode::Good);
                };
                if matches!(outgoing.request, SupportedMessage::CloseSecureChannelRequest(_)) {
                    self.should_close = true;
                }
                self.server.handle(outgoing);
                TransportPollResult::OutgoingMessage
            }
        }
    }
}

/// A configuration with fast retries and a pki folder that is removed with the guard.
pub(crate) fn test_config() -> (ClientConfig, TempDir) {
    let pki = TempDir::new("opcua-edge-client").expect("temp dir");
    let mut config = ClientConfig::new("EdgeClientTest", "urn:EdgeClientTest");
    config.pki_dir = pki.path().to_path_buf();
    config.session_retry_limit = 3;
    config.session_retry_initial_ms = 10;
    config.session_retry_max_ms = 50;
    config.request_timeout_ms = 2_000;
    config.min_publish_interval_ms = 10;
    config.max_inflight_publish = 3;
    (config, pki)
}

pub(crate) fn mock_client(config: ClientConfig) -> (Client, Arc<MockServer>) {
    let server = MockServer::new();
    let connector = Arc::new(MockConnector {
        server: server.clone(),
    });
    (Client::with_connector(config, connector), server)
}

/// A session on the mock server with its event loop running, once it is connected.
pub(crate) async fn connected_session(
    client: &Client,
) -> (Arc<Session>, tokio::task::JoinHandle<StatusCode>) {
    let (session, event_loop) = client
        .new_session_from_info(EndpointDescription::from(ENDPOINT_URL))
        .unwrap();
    let event_loop = event_loop.spawn();
    let connected = tokio::time::timeout(Duration::from_secs(5), session.wait_for_connection())
        .await
        .expect("timed out connecting");
    assert!(connected);
    (session, event_loop)
}

/// Resolves once `f` holds, panics after a few seconds.
pub(crate) async fn eventually(what: &str, f: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !f() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A callback forwarding every data change to a channel as (client handle, value).
pub(crate) fn forwarding_callback() -> (
    DataChangeCallback,
    tokio::sync::mpsc::UnboundedReceiver<(u32, DataValue)>,
) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let callback = DataChangeCallback::new(move |value: DataValue, item: &MonitoredItem| {
        let _ = tx.send((item.client_handle(), value));
    });
    (callback, rx)
}

pub(crate) fn data_change(sequence_number: u32, client_handle: u32, value: i32) -> NotificationMessage {
    NotificationMessage::data_change(
        sequence_number,
        DateTime::now(),
        vec![MonitoredItemNotification {
            client_handle,
            value: DataValue::value_only(value),
        }],
    )
}

pub(crate) async fn next_value(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<(u32, DataValue)>,
) -> (u32, DataValue) {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a data change")
        .expect("callback dropped")
}
