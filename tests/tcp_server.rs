//! Runs the client against a small OPC UA server on a local socket. The server only speaks the
//! `None` security policy and answers just enough services for a session with one
//! subscription.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use opcua_edge_client::{
    client::{
        Client, ClientConfig, DataChangeCallback, EndpointDescriptor, MonitoredItem,
        MonitoredItemRequest, MonitoredItemState, OpcUaClient,
    },
    core::{
        comms::{
            chunker::Chunker,
            message_chunk::{MessageChunk, MessageIsFinalType},
            secure_channel::SecureChannel,
            tcp_codec::{Message, TcpCodec},
            tcp_types::AcknowledgeMessage,
        },
        supported_message::SupportedMessage,
    },
    types::*,
};

const SECURE_CHANNEL_ID: u32 = 7;
const TOKEN_ID: u32 = 1;
const SUBSCRIPTION_ID: u32 = 42;

fn temperature() -> NodeId {
    NodeId::new(2, "Boiler.Temperature")
}

/// What the server saw, shared with the test.
#[derive(Default)]
struct Seen {
    requests: Vec<SupportedMessage>,
    hello_url: Option<String>,
}

impl Seen {
    fn count(&self, f: impl Fn(&SupportedMessage) -> bool) -> usize {
        self.requests.iter().filter(|r| f(r)).count()
    }
}

/// One client connection. Publish requests get a single data change once an item exists and
/// are held after that.
struct Connection {
    framed: Framed<TcpStream, TcpCodec>,
    channel: SecureChannel,
    next_sequence_number: u32,
    received: Vec<MessageChunk>,
    client_handles: Vec<u32>,
    published: bool,
    seen: Arc<Mutex<Seen>>,
}

impl Connection {
    fn new(socket: TcpStream, seen: Arc<Mutex<Seen>>) -> Self {
        Connection {
            framed: Framed::new(socket, TcpCodec::new(DecodingOptions::default())),
            channel: SecureChannel::new_no_certificate_store(),
            next_sequence_number: 1,
            received: Vec::new(),
            client_handles: Vec::new(),
            published: false,
            seen,
        }
    }

    async fn run(mut self) {
        while let Some(Ok(message)) = self.framed.next().await {
            match message {
                Message::Hello(hello) => {
                    self.seen.lock().hello_url = Some(hello.endpoint_url.as_ref().to_string());
                    let ack = AcknowledgeMessage::new(65535, 65535, 0, 0);
                    if self.framed.send(Message::Acknowledge(ack)).await.is_err() {
                        return;
                    }
                }
                Message::Chunk(chunk) => {
                    if !self.chunk_received(chunk).await {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// False once the connection should close.
    async fn chunk_received(&mut self, chunk: MessageChunk) -> bool {
        let chunk = self.channel.verify_and_remove_security(&chunk.data).unwrap();
        let info = chunk.chunk_info(&self.channel).unwrap();
        self.received.push(chunk);
        if info.message_header.is_final != MessageIsFinalType::Final {
            return true;
        }
        let chunks = std::mem::take(&mut self.received);
        let request = Chunker::decode(&chunks, &self.channel, None).unwrap();
        self.seen.lock().requests.push(request.clone());

        if matches!(request, SupportedMessage::CloseSecureChannelRequest(_)) {
            return false;
        }
        match self.respond(&request) {
            Some(response) => self.send(info.sequence_header.request_id, response).await,
            None => true,
        }
    }

    async fn send(&mut self, request_id: u32, response: SupportedMessage) -> bool {
        let chunks = Chunker::encode(
            self.next_sequence_number,
            request_id,
            0,
            0,
            &self.channel,
            &response,
        )
        .unwrap();
        self.next_sequence_number += chunks.len() as u32;
        for chunk in chunks {
            if self.framed.send(Message::Chunk(chunk)).await.is_err() {
                return false;
            }
        }
        true
    }

    fn respond(&mut self, request: &SupportedMessage) -> Option<SupportedMessage> {
        let header = request.request_header()?.clone();
        let good = ResponseHeader::new_good(&header);
        Some(match request {
            SupportedMessage::OpenSecureChannelRequest(_) => {
                let security_token = ChannelSecurityToken {
                    channel_id: SECURE_CHANNEL_ID,
                    token_id: TOKEN_ID,
                    created_at: DateTime::now(),
                    revised_lifetime: 3_600_000,
                };
                self.channel.set_security_token(security_token.clone());
                OpenSecureChannelResponse {
                    response_header: good,
                    server_protocol_version: 0,
                    security_token,
                    server_nonce: ByteString::null(),
                }
                .into()
            }
            SupportedMessage::CreateSessionRequest(r) => CreateSessionResponse {
                response_header: good,
                session_id: NodeId::new(1, 9001),
                authentication_token: NodeId::new(1, "boiler-room"),
                revised_session_timeout: r.requested_session_timeout,
                server_nonce: ByteString::null(),
                server_certificate: ByteString::null(),
                server_endpoints: None,
                server_software_certificates: None,
                server_signature: SignatureData::null(),
                max_request_message_size: 0,
            }
            .into(),
            SupportedMessage::ActivateSessionRequest(_) => ActivateSessionResponse {
                response_header: good,
                server_nonce: ByteString::null(),
                results: None,
                diagnostic_infos: None,
            }
            .into(),
            SupportedMessage::ReadRequest(r) => {
                let results = r
                    .nodes_to_read
                    .iter()
                    .flatten()
                    .map(|read| {
                        if read.node_id == temperature() {
                            DataValue::value_only(81.5f64)
                        } else if read.node_id == NodeId::from(VariableId::Server_ServerStatus_State) {
                            DataValue::value_only(0i32)
                        } else {
                            DataValue {
                                status: Some(StatusCode::BadNodeIdUnknown),
                                ..Default::default()
                            }
                        }
                    })
                    .collect();
                ReadResponse {
                    response_header: good,
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::CreateSubscriptionRequest(r) => CreateSubscriptionResponse {
                response_header: good,
                subscription_id: SUBSCRIPTION_ID,
                revised_publishing_interval: r.requested_publishing_interval,
                revised_lifetime_count: r.requested_lifetime_count,
                revised_max_keep_alive_count: r.requested_max_keep_alive_count,
            }
            .into(),
            SupportedMessage::CreateMonitoredItemsRequest(r) => {
                let results = r
                    .items_to_create
                    .iter()
                    .flatten()
                    .enumerate()
                    .map(|(i, item)| {
                        self.client_handles.push(item.requested_parameters.client_handle);
                        MonitoredItemCreateResult {
                            status_code: StatusCode::Good,
                            monitored_item_id: 500 + i as u32,
                            revised_sampling_interval: item.requested_parameters.sampling_interval,
                            revised_queue_size: 1,
                            filter_result: ExtensionObject::null(),
                        }
                    })
                    .collect();
                CreateMonitoredItemsResponse {
                    response_header: good,
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::PublishRequest(_) => {
                if self.published || self.client_handles.is_empty() {
                    return None;
                }
                self.published = true;
                let notifications = self
                    .client_handles
                    .iter()
                    .map(|client_handle| MonitoredItemNotification {
                        client_handle: *client_handle,
                        value: DataValue::value_only(82.0f64),
                    })
                    .collect();
                PublishResponse {
                    response_header: good,
                    subscription_id: SUBSCRIPTION_ID,
                    available_sequence_numbers: Some(vec![1]),
                    more_notifications: false,
                    notification_message: NotificationMessage::data_change(
                        1,
                        DateTime::now(),
                        notifications,
                    ),
                    results: None,
                    diagnostic_infos: None,
                }
                .into()
            }
            SupportedMessage::CloseSessionRequest(_) => CloseSessionResponse {
                response_header: good,
            }
            .into(),
            _ => ServiceFault::new(&header, StatusCode::BadServiceUnsupported).into(),
        })
    }
}

/// Accepts connections until the test ends. Returns the endpoint url.
async fn start_server(seen: Arc<Mutex<Seen>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(Connection::new(socket, seen.clone()).run());
        }
    });
    format!("opc.tcp://127.0.0.1:{}/boiler", port)
}

fn client_config(pki: &tempdir::TempDir) -> ClientConfig {
    let mut config = ClientConfig::new("TcpServerTest", "urn:TcpServerTest");
    config.pki_dir = pki.path().to_path_buf();
    config.create_sample_keypair = false;
    config.session_retry_limit = 1;
    config.session_retry_initial_ms = 10;
    config.request_timeout_ms = 5_000;
    config
}

#[tokio::test]
async fn session_over_a_real_socket() {
    opcua_edge_client::console_logging::init();

    let seen = Arc::new(Mutex::new(Seen::default()));
    let url = start_server(seen.clone()).await;
    let pki = tempdir::TempDir::new("opcua-edge-client-tcp").unwrap();

    let mut client = OpcUaClient::new(Client::new(client_config(&pki)));
    tokio::time::timeout(Duration::from_secs(10), client.connect(&EndpointDescriptor::new(url.clone())))
        .await
        .expect("timed out connecting")
        .unwrap();
    assert_eq!(seen.lock().hello_url.as_deref(), Some(url.as_str()));

    let values = client
        .read(&[temperature(), NodeId::new(2, "Boiler.Pressure")])
        .await
        .unwrap();
    assert_eq!(values[0].value, Some(Variant::Double(81.5)));
    assert_eq!(values[1].status, Some(StatusCode::BadNodeIdUnknown));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let callback = DataChangeCallback::new(move |value: DataValue, item: &MonitoredItem| {
        let _ = tx.send((item.client_handle(), value));
    });
    let subscribed = client
        .subscribe(
            Duration::from_millis(200),
            vec![MonitoredItemRequest::new(temperature())],
            callback,
        )
        .await
        .unwrap();
    assert_eq!(subscribed.subscription_id, SUBSCRIPTION_ID);
    assert_eq!(subscribed.items[0].state, MonitoredItemState::Created);

    let (client_handle, value) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a data change")
        .unwrap();
    assert_eq!(client_handle, subscribed.items[0].client_handle);
    assert_eq!(value.value, Some(Variant::Double(82.0)));

    client.close().await.unwrap();

    // The channel is closed after the session, the server may still be reading it
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !matches!(
        seen.lock().requests.last(),
        Some(SupportedMessage::CloseSecureChannelRequest(_))
    ) {
        assert!(tokio::time::Instant::now() < deadline, "CloseSecureChannel never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let seen = seen.lock();
    assert_eq!(
        seen.count(|r| matches!(r, SupportedMessage::OpenSecureChannelRequest(_))),
        1
    );
    assert_eq!(
        seen.count(|r| matches!(r, SupportedMessage::CreateSessionRequest(_))),
        1
    );
    // The publish after the data change acknowledges it
    assert!(seen.requests.iter().any(|r| match r {
        SupportedMessage::PublishRequest(p) => p
            .subscription_acknowledgements
            .iter()
            .flatten()
            .any(|a| a.subscription_id == SUBSCRIPTION_ID && a.sequence_number == 1),
        _ => false,
    }));
    assert!(seen.requests.iter().any(|r| matches!(
        r,
        SupportedMessage::CloseSessionRequest(close) if close.delete_subscriptions
    )));
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    // Bind then drop, so nothing listens on the port
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let pki = tempdir::TempDir::new("opcua-edge-client-tcp").unwrap();
    let mut client = OpcUaClient::new(Client::new(client_config(&pki)));

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        client.connect(&EndpointDescriptor::new(format!("opc.tcp://127.0.0.1:{}/", port))),
    )
    .await
    .expect("timed out connecting");
    match result {
        Err(e) => assert!(
            matches!(e, opcua_edge_client::client::Error::Transport(_)),
            "{:?}",
            e
        ),
        Ok(()) => panic!("Connected to a closed port"),
    }
    assert!(client.session().is_none());
}
