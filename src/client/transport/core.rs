// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::Either;
use tokio::sync::{mpsc, oneshot};

use crate::core::comms::{
    buffer::SendBuffer,
    chunker::Chunker,
    message_chunk::{MessageChunk, MessageIsFinalType},
    secure_channel::SecureChannel,
    tcp_codec::Message,
};
use crate::core::supported_message::SupportedMessage;
use crate::sync::RwLock;
use crate::types::StatusCode;

pub(crate) type ResponseCallback = oneshot::Sender<Result<SupportedMessage, StatusCode>>;

/// A request written to the wire whose response has not fully arrived.
struct PendingResponse {
    callback: ResponseCallback,
    /// Decrypted chunks received so far, with their sequence numbers
    chunks: Vec<(u32, MessageChunk)>,
    deadline: Instant,
}

impl PendingResponse {
    fn complete(self, result: Result<SupportedMessage, StatusCode>) {
        // The caller may have stopped waiting
        let _ = self.callback.send(result);
    }
}

#[derive(Debug)]
pub enum TransportPollResult {
    OutgoingMessage,
    OutgoingMessageSent,
    IncomingMessage,
    Closed(StatusCode),
}

pub(crate) struct OutgoingMessage {
    pub request: SupportedMessage,
    /// None when no response is expected
    pub callback: Option<ResponseCallback>,
    pub deadline: Instant,
}

/// What every connection tracks regardless of the socket underneath: the queue of requests to
/// send, the responses being waited for and the sequence numbers received.
pub(crate) struct TransportState {
    outgoing_recv: mpsc::Receiver<OutgoingMessage>,
    pending: HashMap<u32, PendingResponse>,
    /// No more requests are taken off the queue while this many are pending
    max_inflight: usize,
    pub(crate) secure_channel: Arc<RwLock<SecureChannel>>,
    /// Most chunks one response may arrive in, 0 for no limit
    max_pending_incoming: usize,
    last_received_sequence_number: u32,
}

impl TransportState {
    pub fn new(
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: mpsc::Receiver<OutgoingMessage>,
        max_pending_incoming: usize,
        max_inflight: usize,
    ) -> Self {
        Self {
            secure_channel,
            outgoing_recv,
            pending: HashMap::new(),
            max_inflight,
            max_pending_incoming,
            last_received_sequence_number: 0,
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Waits for the next request to send and assigns it a request id. Requests whose deadline
    /// passes meanwhile fail with `BadTimeout`. Returns `None` once every sender is gone.
    pub async fn wait_for_outgoing_message(
        &mut self,
        send_buffer: &mut SendBuffer,
    ) -> Option<(SupportedMessage, u32)> {
        loop {
            let expiry = match self.expire_pending() {
                Some(deadline) => Either::Left(tokio::time::sleep_until(deadline.into())),
                None => Either::Right(futures::future::pending::<()>()),
            };
            if self.pending.len() >= self.max_inflight {
                expiry.await;
                continue;
            }
            tokio::select! {
                _ = expiry => {}
                outgoing = self.outgoing_recv.recv() => {
                    let OutgoingMessage { request, callback, deadline } = outgoing?;
                    let request_id = send_buffer.next_request_id();
                    if let Some(callback) = callback {
                        self.pending.insert(request_id, PendingResponse {
                            callback,
                            chunks: Vec::new(),
                            deadline,
                        });
                    }
                    return Some((request, request_id));
                }
            }
        }
    }

    /// Fails requests past their deadline and returns the earliest deadline left.
    fn expire_pending(&mut self) -> Option<Instant> {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for request_id in expired {
            debug!("Request {} timed out", request_id);
            self.fail_request(request_id, StatusCode::BadTimeout);
        }
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn fail_request(&mut self, request_id: u32, status: StatusCode) {
        if let Some(pending) = self.pending.remove(&request_id) {
            pending.complete(Err(status));
        }
    }

    /// Returns an error when the connection can no longer be used.
    pub fn handle_incoming_message(&mut self, message: Message) -> Result<(), StatusCode> {
        match message {
            Message::Chunk(chunk) => self.process_chunk(chunk),
            Message::Error(error) => {
                let status = error.status_code();
                error!("Server sent error {}, {}", status, error.reason);
                Err(if status.is_bad() {
                    status
                } else {
                    StatusCode::BadUnexpectedError
                })
            }
            other => {
                error!("Unexpected message on an open connection {:?}", other);
                Err(StatusCode::BadUnexpectedError)
            }
        }
    }

    fn process_chunk(&mut self, chunk: MessageChunk) -> Result<(), StatusCode> {
        let (chunk, info) = {
            let mut secure_channel = trace_write_lock!(self.secure_channel);
            let chunk = secure_channel.verify_and_remove_security(&chunk.data)?;
            let info = chunk.chunk_info(&secure_channel)?;
            (chunk, info)
        };
        let request_id = info.sequence_header.request_id;
        let sequence_number = info.sequence_header.sequence_number;

        // The request may already have timed out
        let Some(pending) = self.pending.get_mut(&request_id) else {
            trace!("Dropping chunk {} of request {} nobody waits for", sequence_number, request_id);
            return Ok(());
        };

        match info.message_header.is_final {
            MessageIsFinalType::Intermediate => {
                pending.chunks.push((sequence_number, chunk));
                let count = pending.chunks.len();
                if self.max_pending_incoming > 0 && count > self.max_pending_incoming {
                    error!(
                        "Response to request {} is over {} chunks",
                        request_id, self.max_pending_incoming
                    );
                    self.fail_request(request_id, StatusCode::BadEncodingLimitsExceeded);
                }
                Ok(())
            }
            MessageIsFinalType::FinalError => {
                info!("Server aborted the response to request {}", request_id);
                self.fail_request(request_id, StatusCode::BadCommunicationError);
                Ok(())
            }
            MessageIsFinalType::Final => {
                pending.chunks.push((sequence_number, chunk));
                let Some(mut pending) = self.pending.remove(&request_id) else {
                    return Ok(());
                };
                let chunks = Self::in_sequence(std::mem::take(&mut pending.chunks));
                let message = self.decode_message(&chunks)?;
                pending.complete(Ok(message));
                Ok(())
            }
        }
    }

    /// Orders chunks by sequence number and drops repeats.
    fn in_sequence(mut chunks: Vec<(u32, MessageChunk)>) -> Vec<MessageChunk> {
        chunks.sort_by_key(|(sequence_number, _)| *sequence_number);
        chunks.dedup_by(|(a, _), (b, _)| {
            let repeat = a == b;
            if repeat {
                warn!("Chunk with sequence number {} received twice", a);
            }
            repeat
        });
        chunks.into_iter().map(|(_, chunk)| chunk).collect()
    }

    fn decode_message(&mut self, chunks: &[MessageChunk]) -> Result<SupportedMessage, StatusCode> {
        let secure_channel = trace_read_lock!(self.secure_channel);
        self.last_received_sequence_number = Chunker::validate_chunks(
            self.last_received_sequence_number.wrapping_add(1),
            &secure_channel,
            chunks,
        )?;
        Chunker::decode(chunks, &secure_channel, None)
    }

    /// Fails everything pending or still queued. A good `status` means an orderly close, and
    /// the requests fail with `BadConnectionClosed`.
    pub async fn close(&mut self, status: StatusCode) -> StatusCode {
        let request_status = if status.is_good() {
            StatusCode::BadConnectionClosed
        } else {
            status
        };
        for (_, pending) in self.pending.drain() {
            pending.complete(Err(request_status));
        }

        self.outgoing_recv.close();
        // A closed receiver still yields what was queued, then None
        while let Some(queued) = self.outgoing_recv.recv().await {
            if let Some(callback) = queued.callback {
                let _ = callback.send(Err(request_status));
            }
        }
        status
    }
}
