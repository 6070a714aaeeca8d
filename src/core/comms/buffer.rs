// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Outgoing side of a connection. A message is split into chunks when it is written. Chunks are
//! secured one at a time into a staging area that is drained into the socket before the next
//! chunk is secured, so at most one secured chunk is ever held.

use std::collections::VecDeque;

use tokio::io::AsyncWriteExt;

use crate::{
    core::{
        comms::{chunker::Chunker, message_chunk::MessageChunk, secure_channel::SecureChannel},
        supported_message::SupportedMessage,
    },
    types::StatusCode,
};

/// Room for padding and signature on top of the chunk size
const SECURITY_OVERHEAD: usize = 1024;

/// First request id handed out, after the ids used during the connect handshake
const FIRST_REQUEST_ID: u32 = 1001;

pub struct SendBuffer {
    /// Chunks waiting to be secured
    queued: VecDeque<MessageChunk>,
    /// The secured chunk being written out, `staged` bytes long
    staging: Vec<u8>,
    staged: usize,
    /// Bytes of the staged chunk already written
    written: usize,
    next_request_id: u32,
    last_sent_sequence_number: u32,
    /// Maximum size of a message, 0 for no limit
    max_message_size: usize,
    /// Maximum number of chunks in a message, 0 for no limit
    max_chunk_count: usize,
    chunk_size: usize,
}

impl SendBuffer {
    pub fn new(chunk_size: usize, max_message_size: usize, max_chunk_count: usize) -> Self {
        Self {
            queued: VecDeque::with_capacity(max_chunk_count.max(1)),
            staging: vec![0u8; chunk_size + SECURITY_OVERHEAD],
            staged: 0,
            written: 0,
            next_request_id: FIRST_REQUEST_ID,
            last_sent_sequence_number: 0,
            max_message_size,
            max_chunk_count,
            chunk_size,
        }
    }

    pub fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }

    pub fn last_sent_sequence_number(&self) -> u32 {
        self.last_sent_sequence_number
    }

    /// Splits a message into chunks and queues them. Sequence numbers are claimed at once, one
    /// per chunk. A message that breaks a limit fails without anything being queued.
    pub fn write(
        &mut self,
        request_id: u32,
        message: SupportedMessage,
        secure_channel: &SecureChannel,
    ) -> Result<u32, StatusCode> {
        let chunks = Chunker::encode(
            self.last_sent_sequence_number.wrapping_add(1),
            request_id,
            self.max_message_size,
            self.chunk_size,
            secure_channel,
            &message,
        )?;
        if self.max_chunk_count > 0 && chunks.len() > self.max_chunk_count {
            error!(
                "Request {} needs {} chunks, the limit is {}",
                request_id,
                chunks.len(),
                self.max_chunk_count
            );
            return Err(StatusCode::BadCommunicationError);
        }
        trace!("Request {} queued as {} chunks", request_id, chunks.len());
        self.last_sent_sequence_number = self
            .last_sent_sequence_number
            .wrapping_add(chunks.len() as u32);
        self.queued.extend(chunks);
        Ok(request_id)
    }

    /// True when a chunk is waiting and nothing is staged.
    pub fn should_encode_chunks(&self) -> bool {
        !self.queued.is_empty() && !self.can_read()
    }

    /// True while staged bytes remain to be written.
    pub fn can_read(&self) -> bool {
        self.written < self.staged
    }

    /// Secures the next queued chunk into the staging area.
    pub fn encode_next_chunk(&mut self, secure_channel: &SecureChannel) -> Result<(), StatusCode> {
        if self.can_read() {
            return Err(StatusCode::BadInvalidState);
        }
        let Some(chunk) = self.queued.pop_front() else {
            return Ok(());
        };
        self.staged = secure_channel.apply_security(&chunk, &mut self.staging)?;
        self.written = 0;
        Ok(())
    }

    /// Writes as much of the staged chunk as the writer takes. Progress is only recorded after
    /// a completed write, so the future can be dropped at any point.
    pub async fn read_into_async(
        &mut self,
        write: &mut (impl tokio::io::AsyncWrite + Unpin),
    ) -> Result<(), tokio::io::Error> {
        if !self.can_read() {
            return Ok(());
        }
        let n = write.write(&self.staging[self.written..self.staged]).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::WriteZero.into());
        }
        self.written += n;
        if self.written == self.staged {
            self.written = 0;
            self.staged = 0;
        }
        Ok(())
    }

    #[cfg(test)]
    fn queued_chunks(&self) -> usize {
        self.queued.len()
    }
}
