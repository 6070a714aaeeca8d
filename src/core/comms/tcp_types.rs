// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The connection protocol messages of OPC UA TCP, Part 6 section 7.1.2. Every message starts
//! with a three letter type, a reserved byte and its total size.

use std::io::{Read, Write};

use crate::types::{encoding::*, status_code::StatusCode, string::UAString};

pub const CHUNK_MESSAGE: &[u8] = b"MSG";
pub const OPEN_SECURE_CHANNEL_MESSAGE: &[u8] = b"OPN";
pub const CLOSE_SECURE_CHANNEL_MESSAGE: &[u8] = b"CLO";

const HELLO_MESSAGE: &[u8] = b"HEL";
const ACKNOWLEDGE_MESSAGE: &[u8] = b"ACK";
const ERROR_MESSAGE: &[u8] = b"ERR";

pub const CHUNK_FINAL: u8 = b'F';
pub const CHUNK_INTERMEDIATE: u8 = b'C';
pub const CHUNK_FINAL_ERROR: u8 = b'A';

/// Neither side may offer buffers smaller than this
pub const MIN_CHUNK_SIZE: usize = 8192;

/// Type, reserved byte and size
pub const MESSAGE_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageType {
    Invalid,
    Hello,
    Acknowledge,
    Chunk,
    Error,
}

impl MessageType {
    /// The type code a connection message is written with. Chunks have a code per chunk kind
    /// so they have none here.
    fn code(self) -> Option<&'static [u8]> {
        match self {
            MessageType::Hello => Some(HELLO_MESSAGE),
            MessageType::Acknowledge => Some(ACKNOWLEDGE_MESSAGE),
            MessageType::Error => Some(ERROR_MESSAGE),
            MessageType::Chunk | MessageType::Invalid => None,
        }
    }

    fn from_code(code: &[u8]) -> MessageType {
        match code {
            HELLO_MESSAGE => MessageType::Hello,
            ACKNOWLEDGE_MESSAGE => MessageType::Acknowledge,
            ERROR_MESSAGE => MessageType::Error,
            CHUNK_MESSAGE | OPEN_SECURE_CHANNEL_MESSAGE | CLOSE_SECURE_CHANNEL_MESSAGE => {
                MessageType::Chunk
            }
            _ => MessageType::Invalid,
        }
    }
}

fn write_u32s<S: Write>(stream: &mut S, values: &[u32]) -> EncodingResult<usize> {
    values
        .iter()
        .try_fold(0, |size, value| Ok(size + write_u32(stream, *value)?))
}

fn read_u32s<S: Read, const N: usize>(stream: &mut S) -> EncodingResult<[u32; N]> {
    let mut values = [0u32; N];
    for value in values.iter_mut() {
        *value = read_u32(stream)?;
    }
    Ok(values)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub message_size: u32,
}

impl BinaryEncoder<MessageHeader> for MessageHeader {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let Some(code) = self.message_type.code() else {
            error!(
                "A {:?} header is not written as a connection message",
                self.message_type
            );
            return Err(StatusCode::BadEncodingError);
        };
        Ok(write_all(stream, code)?
            + write_u8(stream, CHUNK_FINAL)?
            + write_u32(stream, self.message_size)?)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let mut message_type = [0u8; 4];
        read_bytes(stream, &mut message_type)?;
        let message_size = read_u32(stream)?;
        Ok(MessageHeader {
            message_type: MessageHeader::message_type(&message_type),
            message_size,
        })
    }
}

impl MessageHeader {
    pub fn new(message_type: MessageType) -> MessageHeader {
        MessageHeader {
            message_type,
            message_size: 0,
        }
    }

    /// Classifies the first four bytes of a message. Only chunks may be intermediate or
    /// aborted, every other message is final.
    pub fn message_type(t: &[u8]) -> MessageType {
        let [a, b, c, kind] = t else {
            return MessageType::Invalid;
        };
        let message_type = MessageType::from_code(&[*a, *b, *c]);
        match (message_type, *kind) {
            (MessageType::Invalid, _) => {
                debug!("Unrecognised message type {:?}", &t[..3]);
                MessageType::Invalid
            }
            (_, CHUNK_FINAL) => message_type,
            (MessageType::Chunk, CHUNK_INTERMEDIATE | CHUNK_FINAL_ERROR) => message_type,
            _ => MessageType::Invalid,
        }
    }

    fn sized(message_type: MessageType, body_len: usize) -> MessageHeader {
        MessageHeader {
            message_type,
            message_size: (MESSAGE_HEADER_LEN + body_len) as u32,
        }
    }
}

/// HEL, the first thing a client sends on a new connection.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    pub message_header: MessageHeader,
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
    pub endpoint_url: UAString,
}

impl BinaryEncoder<HelloMessage> for HelloMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN + 20 + self.endpoint_url.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(self.message_header.encode(stream)?
            + write_u32s(
                stream,
                &[
                    self.protocol_version,
                    self.receive_buffer_size,
                    self.send_buffer_size,
                    self.max_message_size,
                    self.max_chunk_count,
                ],
            )?
            + self.endpoint_url.encode(stream)?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let message_header = MessageHeader::decode(stream, decoding_options)?;
        let [protocol_version, receive_buffer_size, send_buffer_size, max_message_size, max_chunk_count] =
            read_u32s(stream)?;
        let endpoint_url = UAString::decode(stream, decoding_options)?;
        Ok(HelloMessage {
            message_header,
            protocol_version,
            receive_buffer_size,
            send_buffer_size,
            max_message_size,
            max_chunk_count,
            endpoint_url,
        })
    }
}

impl HelloMessage {
    const MAX_URL_LEN: usize = 4096;

    /// A HEL for protocol version 0. Zero for `max_message_size` or `max_chunk_count` means
    /// the client sets no limit.
    pub fn new(
        endpoint_url: &str,
        send_buffer_size: usize,
        receive_buffer_size: usize,
        max_message_size: usize,
        max_chunk_count: usize,
    ) -> HelloMessage {
        let endpoint_url = UAString::from(endpoint_url);
        HelloMessage {
            message_header: MessageHeader::sized(MessageType::Hello, 20 + endpoint_url.byte_len()),
            protocol_version: 0,
            send_buffer_size: send_buffer_size as u32,
            receive_buffer_size: receive_buffer_size as u32,
            max_message_size: max_message_size as u32,
            max_chunk_count: max_chunk_count as u32,
            endpoint_url,
        }
    }

    pub fn is_endpoint_valid_length(&self) -> bool {
        self.endpoint_url
            .value()
            .as_ref()
            .is_some_and(|url| url.len() <= HelloMessage::MAX_URL_LEN)
    }

    pub fn is_valid_buffer_sizes(&self) -> bool {
        [self.receive_buffer_size, self.send_buffer_size]
            .iter()
            .all(|size| *size as usize >= MIN_CHUNK_SIZE)
    }
}

/// ACK, the server's answer to HEL with the limits it agrees to.
#[derive(Debug, Clone, PartialEq)]
pub struct AcknowledgeMessage {
    pub message_header: MessageHeader,
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl BinaryEncoder<AcknowledgeMessage> for AcknowledgeMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN + 20
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(self.message_header.encode(stream)?
            + write_u32s(
                stream,
                &[
                    self.protocol_version,
                    self.receive_buffer_size,
                    self.send_buffer_size,
                    self.max_message_size,
                    self.max_chunk_count,
                ],
            )?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let message_header = MessageHeader::decode(stream, decoding_options)?;
        let [protocol_version, receive_buffer_size, send_buffer_size, max_message_size, max_chunk_count] =
            read_u32s(stream)?;
        Ok(AcknowledgeMessage {
            message_header,
            protocol_version,
            receive_buffer_size,
            send_buffer_size,
            max_message_size,
            max_chunk_count,
        })
    }
}

impl AcknowledgeMessage {
    /// Only a server acknowledges, so this is for tests standing in for one.
    pub fn new(
        receive_buffer_size: u32,
        send_buffer_size: u32,
        max_message_size: u32,
        max_chunk_count: u32,
    ) -> AcknowledgeMessage {
        AcknowledgeMessage {
            message_header: MessageHeader::sized(MessageType::Acknowledge, 20),
            protocol_version: 0,
            receive_buffer_size,
            send_buffer_size,
            max_message_size,
            max_chunk_count,
        }
    }
}

/// ERR, sent by the server before it closes the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub message_header: MessageHeader,
    pub error: u32,
    pub reason: UAString,
}

impl BinaryEncoder<ErrorMessage> for ErrorMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_LEN + 4 + self.reason.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(self.message_header.encode(stream)?
            + write_u32(stream, self.error)?
            + self.reason.encode(stream)?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let message_header = MessageHeader::decode(stream, decoding_options)?;
        let error = read_u32(stream)?;
        let reason = UAString::decode(stream, decoding_options)?;
        Ok(ErrorMessage {
            message_header,
            error,
            reason,
        })
    }
}

impl ErrorMessage {
    pub fn from_status_code(status_code: StatusCode) -> ErrorMessage {
        let reason = UAString::from(status_code.name());
        ErrorMessage {
            message_header: MessageHeader::sized(MessageType::Error, 4 + reason.byte_len()),
            error: status_code.bits(),
            reason,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u32(self.error)
    }
}
