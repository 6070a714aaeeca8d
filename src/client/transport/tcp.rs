// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

use super::core::{OutgoingMessage, TransportPollResult, TransportState};
use super::{Connector, Transport};
use crate::core::comms::{
    buffer::SendBuffer,
    secure_channel::SecureChannel,
    tcp_codec::{Message, TcpCodec},
    tcp_types::{AcknowledgeMessage, HelloMessage, MIN_CHUNK_SIZE},
    url::hostname_port_from_url,
};
use crate::core::{constants::DEFAULT_OPC_UA_SERVER_PORT, supported_message::SupportedMessage};
use crate::sync::RwLock;
use crate::types::{encoding::BinaryEncoder, StatusCode};

#[derive(Debug, Clone, Copy)]
enum TransportCloseState {
    Open,
    Closing(StatusCode),
    Closed(StatusCode),
}

pub(crate) struct TcpTransport {
    state: TransportState,
    read: FramedRead<ReadHalf<TcpStream>, TcpCodec>,
    write: WriteHalf<TcpStream>,
    send_buffer: SendBuffer,
    should_close: bool,
    closed: TransportCloseState,
}

/// What the client offers in HEL, narrowed by the server's ACK.
#[derive(Debug, Clone)]
pub struct TransportConfiguration {
    pub max_pending_incoming: usize,
    pub max_inflight: usize,
    pub send_buffer_size: usize,
    pub recv_buffer_size: usize,
    pub max_message_size: usize,
    pub max_chunk_count: usize,
}

/// A buffer size offered in the ACK replaces ours when it is smaller and still legal.
fn revise_buffer(ours: &mut usize, offered: u32) {
    let offered = offered as usize;
    if (MIN_CHUNK_SIZE..*ours).contains(&offered) {
        *ours = offered;
    }
}

/// For message size and chunk count 0 is no limit, on either side.
fn revise_limit(ours: &mut usize, offered: u32) {
    let offered = offered as usize;
    if offered != 0 && (*ours == 0 || offered < *ours) {
        *ours = offered;
    }
}

impl TransportConfiguration {
    /// Narrows the limits to what the server acknowledged. They never grow.
    pub fn revise(&mut self, ack: &AcknowledgeMessage) {
        // The server's receive buffer bounds what we send and vice versa
        revise_buffer(&mut self.send_buffer_size, ack.receive_buffer_size);
        revise_buffer(&mut self.recv_buffer_size, ack.send_buffer_size);
        revise_limit(&mut self.max_message_size, ack.max_message_size);
        revise_limit(&mut self.max_chunk_count, ack.max_chunk_count);
    }
}

/// Opens plain TCP connections
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: tokio::sync::mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<Box<dyn Transport>, StatusCode> {
        let transport =
            TcpTransport::connect(secure_channel, outgoing_recv, config, endpoint_url).await?;
        Ok(Box::new(transport))
    }
}

type Handshaken = (
    FramedRead<ReadHalf<TcpStream>, TcpCodec>,
    WriteHalf<TcpStream>,
    AcknowledgeMessage,
);

fn communication_error(what: &str) -> impl FnOnce(std::io::Error) -> StatusCode + '_ {
    move |err| {
        error!("{} failed, {}", what, err);
        StatusCode::BadCommunicationError
    }
}

impl TcpTransport {
    /// Connects to the server at `endpoint_url` and exchanges HEL and ACK. Nothing else is sent
    /// or received until the transport is polled.
    pub async fn connect(
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: tokio::sync::mpsc::Receiver<OutgoingMessage>,
        mut config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<Self, StatusCode> {
        let (read, write, ack) = Self::handshake(&secure_channel, &config, endpoint_url).await?;
        config.revise(&ack);
        debug!("Transport limits after ACK {:?}", config);

        Ok(Self {
            state: TransportState::new(
                secure_channel,
                outgoing_recv,
                config.max_pending_incoming,
                config.max_inflight,
            ),
            read,
            write,
            send_buffer: SendBuffer::new(
                config.send_buffer_size,
                config.max_message_size,
                config.max_chunk_count,
            ),
            should_close: false,
            closed: TransportCloseState::Open,
        })
    }

    async fn resolve(endpoint_url: &str) -> Result<SocketAddr, StatusCode> {
        let (host, port) = hostname_port_from_url(endpoint_url, DEFAULT_OPC_UA_SERVER_PORT)?;
        let mut addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|err| {
                error!("Cannot resolve {}, {}", endpoint_url, err);
                StatusCode::BadTcpEndpointUrlInvalid
            })?;
        addrs.next().ok_or_else(|| {
            error!("{} resolves to no address", endpoint_url);
            StatusCode::BadTcpEndpointUrlInvalid
        })
    }

    async fn handshake(
        secure_channel: &RwLock<SecureChannel>,
        config: &TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<Handshaken, StatusCode> {
        let addr = Self::resolve(endpoint_url).await?;
        debug!("Connecting to {} for {}", addr, endpoint_url);
        let socket = TcpStream::connect(addr)
            .await
            .map_err(communication_error("Connect"))?;
        let (reader, mut writer) = tokio::io::split(socket);

        let decoding_options = trace_read_lock!(secure_channel).decoding_options();
        let mut read = FramedRead::new(reader, TcpCodec::new(decoding_options));

        let hello = HelloMessage::new(
            endpoint_url,
            config.send_buffer_size,
            config.recv_buffer_size,
            config.max_message_size,
            config.max_chunk_count,
        );
        writer
            .write_all(&hello.encode_to_vec())
            .await
            .map_err(communication_error("Sending HEL"))?;

        match read.next().await {
            Some(Ok(Message::Acknowledge(ack))) => {
                trace!("ACK {:?}", ack);
                Ok((read, writer, ack))
            }
            Some(Ok(Message::Error(err))) => {
                let status = err.status_code();
                error!("Server refused HEL with {}, {}", status, err.reason);
                Err(status)
            }
            other => {
                error!("Expected ACK, got {:?}", other);
                Err(StatusCode::BadConnectionClosed)
            }
        }
    }

    fn handle_incoming_message(
        &mut self,
        incoming: Option<Result<Message, std::io::Error>>,
    ) -> TransportPollResult {
        let result = match incoming {
            None => Err(StatusCode::BadCommunicationError),
            Some(Err(err)) => {
                error!("Reading from the socket failed, {}", err);
                Err(StatusCode::BadConnectionClosed)
            }
            Some(Ok(message)) => self.state.handle_incoming_message(message),
        };
        match result {
            Ok(()) => TransportPollResult::IncomingMessage,
            Err(status) => TransportPollResult::Closed(status),
        }
    }

    /// Puts a request into the send buffer. Only a request too large to send fails on its
    /// own, anything else closes the connection.
    fn handle_outgoing_message(
        &mut self,
        outgoing: Option<(SupportedMessage, u32)>,
    ) -> TransportPollResult {
        let Some((request, request_id)) = outgoing else {
            return TransportPollResult::Closed(StatusCode::Good);
        };
        if matches!(request, SupportedMessage::CloseSecureChannelRequest(_)) {
            debug!("CloseSecureChannel queued, the connection closes once it is sent");
            self.should_close = true;
        }
        let written = {
            let secure_channel = trace_read_lock!(self.state.secure_channel);
            self.send_buffer.write(request_id, request, &secure_channel)
        };
        match written {
            Ok(_) => TransportPollResult::OutgoingMessage,
            Err(StatusCode::BadRequestTooLarge) => {
                self.state
                    .fail_request(request_id, StatusCode::BadRequestTooLarge);
                TransportPollResult::OutgoingMessage
            }
            Err(status) => TransportPollResult::Closed(status),
        }
    }

    /// New requests are only taken once the send buffer is drained, so it holds at most one
    /// secured chunk.
    async fn poll_inner(&mut self) -> TransportPollResult {
        if self.send_buffer.should_encode_chunks() {
            let secure_channel = trace_read_lock!(self.state.secure_channel);
            if let Err(status) = self.send_buffer.encode_next_chunk(&secure_channel) {
                return TransportPollResult::Closed(status);
            }
        }

        if self.send_buffer.can_read() {
            tokio::select! {
                written = self.send_buffer.read_into_async(&mut self.write) => match written {
                    Ok(()) => TransportPollResult::OutgoingMessageSent,
                    Err(err) => {
                        error!("Writing to the socket failed, {}", err);
                        TransportPollResult::Closed(StatusCode::BadCommunicationError)
                    }
                },
                incoming = self.read.next() => self.handle_incoming_message(incoming),
            }
        } else if self.should_close {
            debug!("CloseSecureChannel sent, closing the connection");
            TransportPollResult::Closed(StatusCode::Good)
        } else {
            tokio::select! {
                outgoing = self.state.wait_for_outgoing_message(&mut self.send_buffer) => {
                    self.handle_outgoing_message(outgoing)
                }
                incoming = self.read.next() => self.handle_incoming_message(incoming),
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    /// Cancel safe. Closing can be interrupted and picks up again on the next poll, and only
    /// counts as closed once it has run to the end.
    async fn poll(&mut self) -> TransportPollResult {
        let status = match self.closed {
            TransportCloseState::Closed(status) => return TransportPollResult::Closed(status),
            TransportCloseState::Closing(status) => status,
            TransportCloseState::Open => match self.poll_inner().await {
                TransportPollResult::Closed(status) => {
                    self.closed = TransportCloseState::Closing(status);
                    status
                }
                progress => return progress,
            },
        };
        let status = self.state.close(status).await;
        self.closed = TransportCloseState::Closed(status);
        TransportPollResult::Closed(status)
    }
}
