// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Frames the byte stream of a connection. Each frame starts with an 8 byte header giving its
//! type and total size, so a frame is only decoded once all of it has arrived.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::types::{
    encoding::{BinaryEncoder, DecodingOptions},
    status_code::StatusCode,
};

use super::{
    message_chunk::MessageChunk,
    tcp_types::{
        AcknowledgeMessage, ErrorMessage, HelloMessage, MessageHeader, MessageType,
        MESSAGE_HEADER_LEN,
    },
};

#[derive(Debug)]
pub enum Message {
    Hello(HelloMessage),
    Acknowledge(AcknowledgeMessage),
    Error(ErrorMessage),
    /// MSG, OPN and CLO frames
    Chunk(MessageChunk),
}

pub struct TcpCodec {
    decoding_options: DecodingOptions,
}

impl TcpCodec {
    pub fn new(decoding_options: DecodingOptions) -> TcpCodec {
        TcpCodec { decoding_options }
    }

    /// The total size of the frame at the front of `buf`, once its header is there.
    fn frame_size(&self, buf: &[u8]) -> Result<Option<(MessageHeader, usize)>, StatusCode> {
        let Some(header) = buf.get(..MESSAGE_HEADER_LEN) else {
            return Ok(None);
        };
        let header = MessageHeader::decode(&mut io::Cursor::new(header), &self.decoding_options)?;
        let size = header.message_size as usize;
        let limit = self.decoding_options.max_message_size;
        if limit > 0 && size > limit {
            error!("Frame of {} bytes is over the limit of {}", size, limit);
            return Err(StatusCode::BadTcpMessageTooLarge);
        }
        if size < MESSAGE_HEADER_LEN {
            error!("Frame of {} bytes cannot hold its own header", size);
            return Err(StatusCode::BadCommunicationError);
        }
        Ok(Some((header, size)))
    }

    fn decode_frame(&self, header: MessageHeader, frame: &[u8]) -> Result<Message, StatusCode> {
        let stream = &mut io::Cursor::new(frame);
        let options = &self.decoding_options;
        Ok(match header.message_type {
            MessageType::Hello => Message::Hello(HelloMessage::decode(stream, options)?),
            MessageType::Acknowledge => {
                Message::Acknowledge(AcknowledgeMessage::decode(stream, options)?)
            }
            MessageType::Error => Message::Error(ErrorMessage::decode(stream, options)?),
            MessageType::Chunk => Message::Chunk(MessageChunk::decode(stream, options)?),
            MessageType::Invalid => {
                error!("Frame has an unknown message type");
                return Err(StatusCode::BadCommunicationError);
            }
        })
    }

    fn write<T>(message: &T, buf: &mut BytesMut) -> Result<(), io::Error>
    where
        T: BinaryEncoder<T>,
    {
        buf.reserve(message.byte_len());
        message.encode(&mut buf.writer()).map(|_| ()).map_err(|status| {
            error!("Cannot encode a frame, {}", status);
            io::Error::from(status)
        })
    }
}

impl Decoder for TcpCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, io::Error> {
        let Some((header, size)) = self.frame_size(&buf[..])? else {
            return Ok(None);
        };
        if buf.len() < size {
            buf.reserve(size - buf.len());
            return Ok(None);
        }
        let frame = buf.split_to(size);
        Ok(Some(self.decode_frame(header, &frame)?))
    }
}

impl Encoder<Message> for TcpCodec {
    type Error = io::Error;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), io::Error> {
        match &message {
            Message::Hello(m) => Self::write(m, buf),
            Message::Acknowledge(m) => Self::write(m, buf),
            Message::Error(m) => Self::write(m, buf),
            Message::Chunk(m) => Self::write(m, buf),
        }
    }
}
