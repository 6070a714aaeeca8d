// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Splits messages into chunks and joins chunks back into messages.

use std::io::Cursor;

use crate::{
    core::{
        comms::{
            message_chunk::{MessageChunk, MessageChunkType, MessageIsFinalType},
            secure_channel::SecureChannel,
        },
        supported_message::SupportedMessage,
    },
    crypto::SecurityPolicy,
    types::{
        encoding::BinaryEncoder, node_id::NodeId, node_ids::ObjectId, status_code::StatusCode,
    },
};

pub struct Chunker;

fn chunk_type_of(message: &SupportedMessage) -> MessageChunkType {
    match message {
        SupportedMessage::OpenSecureChannelRequest(_)
        | SupportedMessage::OpenSecureChannelResponse(_) => MessageChunkType::OpenSecureChannel,
        SupportedMessage::CloseSecureChannelRequest(_)
        | SupportedMessage::CloseSecureChannelResponse(_) => MessageChunkType::CloseSecureChannel,
        _ => MessageChunkType::Message,
    }
}

fn final_flag(index: usize, count: usize) -> MessageIsFinalType {
    if index + 1 == count {
        MessageIsFinalType::Final
    } else {
        MessageIsFinalType::Intermediate
    }
}

impl Chunker {
    /// Checks that a run of received chunks belongs to one message on this channel: the channel
    /// id matches, sequence numbers are consecutive from at least `starting_sequence_number`,
    /// and every chunk carries the request id of the first.
    ///
    /// Returns the sequence number of the last chunk.
    pub fn validate_chunks(
        starting_sequence_number: u32,
        secure_channel: &SecureChannel,
        chunks: &[MessageChunk],
    ) -> Result<u32, StatusCode> {
        let channel_id = secure_channel.secure_channel_id();
        let mut first: Option<(u32, u32)> = None;

        for (i, chunk) in chunks.iter().enumerate() {
            let info = chunk.chunk_info(secure_channel)?;
            let sequence_number = info.sequence_header.sequence_number;
            let request_id = info.sequence_header.request_id;

            if channel_id != 0 && info.message_header.secure_channel_id != channel_id {
                error!(
                    "Chunk is for secure channel {}, this channel is {}",
                    info.message_header.secure_channel_id, channel_id
                );
                return Err(StatusCode::BadSecureChannelIdInvalid);
            }

            let (first_sequence_number, first_request_id) = match first {
                Some(f) => f,
                None => {
                    if sequence_number < starting_sequence_number {
                        error!(
                            "Sequence number {} is behind the last received {}",
                            sequence_number, starting_sequence_number
                        );
                        return Err(StatusCode::BadSequenceNumberInvalid);
                    }
                    *first.insert((sequence_number, request_id))
                }
            };

            let expected = first_sequence_number.wrapping_add(i as u32);
            if sequence_number != expected {
                error!(
                    "Chunk {} has sequence number {}, expected {}",
                    i, sequence_number, expected
                );
                return Err(StatusCode::BadSecurityChecksFailed);
            }
            if request_id != first_request_id {
                error!(
                    "Chunk {} is for request {}, the message is for request {}",
                    i, request_id, first_request_id
                );
                return Err(StatusCode::BadSecurityChecksFailed);
            }
        }

        match first {
            Some((first_sequence_number, _)) => {
                Ok(first_sequence_number.wrapping_add(chunks.len() as u32 - 1))
            }
            None => {
                error!("No chunks to validate");
                Err(StatusCode::BadUnexpectedError)
            }
        }
    }

    /// Encodes a message into chunks numbered from `sequence_number`.
    ///
    /// `max_chunk_size` is the size no chunk may exceed, `max_message_size` the limit of the
    /// encoded message. Either may be 0 for no limit.
    pub fn encode(
        sequence_number: u32,
        request_id: u32,
        max_message_size: usize,
        max_chunk_size: usize,
        secure_channel: &SecureChannel,
        supported_message: &SupportedMessage,
    ) -> Result<Vec<MessageChunk>, StatusCode> {
        if secure_channel.security_policy() == SecurityPolicy::Unknown {
            error!("Cannot encode a message with an unknown security policy");
            return Err(StatusCode::BadSecurityPolicyRejected);
        }

        let body_len = supported_message.byte_len();
        if max_message_size > 0 && body_len > max_message_size {
            error!(
                "Message of {} bytes exceeds the limit of {} bytes",
                body_len, max_message_size
            );
            return Err(if secure_channel.is_client_role() {
                StatusCode::BadRequestTooLarge
            } else {
                StatusCode::BadResponseTooLarge
            });
        }

        // The body is preceded by the node id of its binary encoding
        let encoding_id = supported_message.node_id();
        let mut data = Vec::with_capacity(body_len + encoding_id.byte_len());
        {
            let mut stream = Cursor::new(&mut data);
            encoding_id.encode(&mut stream)?;
            supported_message.encode(&mut stream)?;
        }

        let chunk_type = chunk_type_of(supported_message);
        let body_per_chunk = if max_chunk_size > 0 {
            MessageChunk::body_size_from_message_size(chunk_type, secure_channel, max_chunk_size)
                .map_err(|_| {
                    error!("A chunk size of {} leaves no room for a body", max_chunk_size);
                    StatusCode::BadTcpInternalError
                })?
        } else {
            data.len().max(1)
        };

        let count = data.len().div_ceil(body_per_chunk).max(1);
        if count == 1 {
            return Ok(vec![MessageChunk::new(
                sequence_number,
                request_id,
                chunk_type,
                MessageIsFinalType::Final,
                secure_channel,
                &data,
            )?]);
        }
        data.chunks(body_per_chunk)
            .enumerate()
            .map(|(i, body)| {
                MessageChunk::new(
                    sequence_number.wrapping_add(i as u32),
                    request_id,
                    chunk_type,
                    final_flag(i, count),
                    secure_channel,
                    body,
                )
            })
            .collect()
    }

    /// Joins the bodies of chunks that were already decrypted and verified, and decodes the
    /// message they hold. When `expected_node_id` is given, the message must be of that type.
    pub fn decode(
        chunks: &[MessageChunk],
        secure_channel: &SecureChannel,
        expected_node_id: Option<NodeId>,
    ) -> Result<SupportedMessage, StatusCode> {
        let mut data = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let info = chunk.chunk_info(secure_channel)?;
            let expected = final_flag(i, chunks.len());
            if info.message_header.is_final != expected {
                error!(
                    "Chunk {} of {} is {:?}, expected {:?}",
                    i,
                    chunks.len(),
                    info.message_header.is_final,
                    expected
                );
                return Err(StatusCode::BadDecodingError);
            }
            let body = info.body_offset..info.body_offset + info.body_length;
            data.extend_from_slice(&chunk.data[body]);
        }

        let decoding_options = secure_channel.decoding_options();
        let mut stream = Cursor::new(data);
        let node_id = NodeId::decode(&mut stream, &decoding_options)?;
        let object_id = Self::encoding_object_id(node_id, expected_node_id.as_ref())?;

        match SupportedMessage::decode_by_object_id(&mut stream, object_id, &decoding_options) {
            Ok(SupportedMessage::Invalid(_)) => {
                debug!("Message {:?} is not supported", object_id);
                Err(StatusCode::BadServiceUnsupported)
            }
            Ok(message) => Ok(message),
            Err(err) => {
                debug!("Cannot decode message {:?}, {}", object_id, err);
                Err(StatusCode::BadServiceUnsupported)
            }
        }
    }

    /// The encoding id of a message must be a numeric id in namespace 0.
    fn encoding_object_id(
        node_id: NodeId,
        expected: Option<&NodeId>,
    ) -> Result<ObjectId, StatusCode> {
        if node_id.namespace != 0 || !node_id.is_numeric() {
            error!("{} is not the encoding id of a request or response", node_id);
            return Err(StatusCode::BadUnexpectedError);
        }
        if let Some(expected) = expected.filter(|e| **e != node_id) {
            error!("Received message {}, expected {}", node_id, expected);
            return Err(StatusCode::BadUnexpectedError);
        }
        node_id.as_object_id().map_err(|_| {
            error!("{} is not a known object id", node_id);
            StatusCode::BadUnexpectedError
        })
    }
}
