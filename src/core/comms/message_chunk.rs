// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Secure conversation chunks. A message too large for the negotiated buffer is split over
//! several chunks, each secured on its own.

use std::io::{Cursor, Read, Write};

use crate::types::{status_code::StatusCode, *};

use super::{
    message_chunk_info::ChunkInfo,
    secure_channel::SecureChannel,
    security_header::SequenceHeader,
    tcp_types::{
        CHUNK_FINAL, CHUNK_FINAL_ERROR, CHUNK_INTERMEDIATE, CHUNK_MESSAGE,
        CLOSE_SECURE_CHANNEL_MESSAGE, MIN_CHUNK_SIZE, OPEN_SECURE_CHANNEL_MESSAGE,
    },
};

/// Message type, chunk kind, size and secure channel id
pub const MESSAGE_CHUNK_HEADER_SIZE: usize = 12;

const SEQUENCE_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageChunkType {
    Message,
    OpenSecureChannel,
    CloseSecureChannel,
}

impl MessageChunkType {
    pub fn is_open_secure_channel(&self) -> bool {
        *self == MessageChunkType::OpenSecureChannel
    }

    fn code(self) -> &'static [u8] {
        match self {
            MessageChunkType::Message => CHUNK_MESSAGE,
            MessageChunkType::OpenSecureChannel => OPEN_SECURE_CHANNEL_MESSAGE,
            MessageChunkType::CloseSecureChannel => CLOSE_SECURE_CHANNEL_MESSAGE,
        }
    }

    fn from_code(code: &[u8]) -> Option<Self> {
        [
            MessageChunkType::Message,
            MessageChunkType::OpenSecureChannel,
            MessageChunkType::CloseSecureChannel,
        ]
        .into_iter()
        .find(|t| t.code() == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageIsFinalType {
    /// More chunks of the message follow
    Intermediate,
    Final,
    /// The sender gave up on the message, the chunk body holds the reason
    FinalError,
}

impl MessageIsFinalType {
    fn code(self) -> u8 {
        match self {
            MessageIsFinalType::Intermediate => CHUNK_INTERMEDIATE,
            MessageIsFinalType::Final => CHUNK_FINAL,
            MessageIsFinalType::FinalError => CHUNK_FINAL_ERROR,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            CHUNK_INTERMEDIATE => Some(MessageIsFinalType::Intermediate),
            CHUNK_FINAL => Some(MessageIsFinalType::Final),
            CHUNK_FINAL_ERROR => Some(MessageIsFinalType::FinalError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunkHeader {
    pub message_type: MessageChunkType,
    pub is_final: MessageIsFinalType,
    /// Of the whole chunk, this header included
    pub message_size: u32,
    pub secure_channel_id: u32,
}

impl BinaryEncoder<MessageChunkHeader> for MessageChunkHeader {
    fn byte_len(&self) -> usize {
        MESSAGE_CHUNK_HEADER_SIZE
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(write_all(stream, self.message_type.code())?
            + write_u8(stream, self.is_final.code())?
            + write_u32(stream, self.message_size)?
            + write_u32(stream, self.secure_channel_id)?)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let mut code = [0u8; 3];
        read_bytes(stream, &mut code)?;
        let Some(message_type) = MessageChunkType::from_code(&code) else {
            error!("{:?} is not a chunk message type", code);
            return Err(StatusCode::BadDecodingError);
        };
        let kind = read_u8(stream)?;
        let Some(is_final) = MessageIsFinalType::from_code(kind) else {
            error!("{:#04x} is not a chunk kind", kind);
            return Err(StatusCode::BadDecodingError);
        };
        Ok(MessageChunkHeader {
            message_type,
            is_final,
            message_size: read_u32(stream)?,
            secure_channel_id: read_u32(stream)?,
        })
    }
}

/// The raw bytes of one chunk, headers through signature. Whether those bytes are currently
/// encrypted depends on which side of the secure channel the chunk is on.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunk {
    pub data: Vec<u8>,
}

impl BinaryEncoder<MessageChunk> for MessageChunk {
    fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_all(stream, &self.data)
    }

    fn decode<S: Read>(
        in_stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let header = MessageChunkHeader::decode(in_stream, decoding_options).map_err(|err| {
            error!("Chunk header cannot be decoded, {}", err);
            StatusCode::BadCommunicationError
        })?;

        let message_size = header.message_size as usize;
        let limit = decoding_options.max_message_size;
        if limit > 0 && message_size > limit {
            error!(
                "Chunk of {} bytes is over the message size limit of {}",
                message_size, limit
            );
            return Err(StatusCode::BadTcpMessageTooLarge);
        }
        if message_size < MESSAGE_CHUNK_HEADER_SIZE {
            error!("Chunk claims {} bytes, less than its own header", message_size);
            return Err(StatusCode::BadCommunicationError);
        }

        let mut data = Vec::with_capacity(message_size);
        header.encode(&mut data)?;
        data.resize(message_size, 0);
        read_bytes(in_stream, &mut data[MESSAGE_CHUNK_HEADER_SIZE..])?;
        Ok(MessageChunk { data })
    }
}

impl MessageChunk {
    /// An unsecured chunk holding `data`. Securing it later appends padding and signature and
    /// fixes up the size.
    pub fn new(
        sequence_number: u32,
        request_id: u32,
        message_type: MessageChunkType,
        is_final: MessageIsFinalType,
        secure_channel: &SecureChannel,
        data: &[u8],
    ) -> Result<MessageChunk, StatusCode> {
        let security_header = secure_channel.make_security_header(message_type)?;
        let sequence_header = SequenceHeader {
            sequence_number,
            request_id,
        };
        let message_size = MESSAGE_CHUNK_HEADER_SIZE
            + security_header.byte_len()
            + SEQUENCE_HEADER_SIZE
            + data.len();
        let header = MessageChunkHeader {
            message_type,
            is_final,
            message_size: message_size as u32,
            secure_channel_id: secure_channel.secure_channel_id(),
        };
        trace!("Chunk of {:?} with {} bytes before security", message_type, message_size);

        let mut stream = Cursor::new(Vec::with_capacity(message_size));
        header.encode(&mut stream)?;
        security_header.encode(&mut stream)?;
        sequence_header.encode(&mut stream)?;
        write_all(&mut stream, data)?;
        Ok(MessageChunk {
            data: stream.into_inner(),
        })
    }

    /// How much message body fits a chunk of `message_size` bytes once the headers, the worst
    /// case padding and the signature are taken out.
    pub fn body_size_from_message_size(
        message_type: MessageChunkType,
        secure_channel: &SecureChannel,
        message_size: usize,
    ) -> Result<usize, StatusCode> {
        if message_size < MIN_CHUNK_SIZE {
            error!(
                "Chunk size {} is under the minimum of {}",
                message_size, MIN_CHUNK_SIZE
            );
            return Err(StatusCode::BadTcpInternalError);
        }
        let security_header = secure_channel.make_security_header(message_type)?;
        let block_size = secure_channel.plain_text_block_size(&security_header)?;
        // Up to a block of padding plus two size bytes for keys over 2048 bits
        let padding = if block_size > 0 { block_size + 2 } else { 0 };
        let overhead = MESSAGE_CHUNK_HEADER_SIZE
            + security_header.byte_len()
            + SEQUENCE_HEADER_SIZE
            + padding
            + secure_channel.signature_size(&security_header)?;

        message_size.checked_sub(overhead).filter(|body| *body > 0).ok_or_else(|| {
            error!(
                "{} bytes of chunk overhead leave no room for a body in {} bytes",
                overhead, message_size
            );
            StatusCode::BadTcpInternalError
        })
    }

    pub fn message_header(
        &self,
        decoding_options: &DecodingOptions,
    ) -> Result<MessageChunkHeader, StatusCode> {
        MessageChunkHeader::decode(&mut Cursor::new(&self.data), decoding_options)
    }

    pub fn is_open_secure_channel(&self, decoding_options: &DecodingOptions) -> bool {
        self.message_header(decoding_options)
            .is_ok_and(|header| header.message_type.is_open_secure_channel())
    }

    pub fn chunk_info(&self, secure_channel: &SecureChannel) -> Result<ChunkInfo, StatusCode> {
        ChunkInfo::new(self, secure_channel)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn header_codes() {
        let header = MessageChunkHeader {
            message_type: MessageChunkType::CloseSecureChannel,
            is_final: MessageIsFinalType::FinalError,
            message_size: 12,
            secure_channel_id: 3,
        };
        let bytes = header.encode_to_vec();
        assert_eq!(&bytes[..4], b"CLOA");
        assert_eq!(
            MessageChunkHeader::decode(&mut Cursor::new(&bytes), &DecodingOptions::test()).unwrap(),
            header
        );

        let mut bad = bytes.clone();
        bad[3] = b'X';
        assert_eq!(
            MessageChunkHeader::decode(&mut Cursor::new(&bad), &DecodingOptions::test()),
            Err(StatusCode::BadDecodingError)
        );
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let header = MessageChunkHeader {
            message_type: MessageChunkType::Message,
            is_final: MessageIsFinalType::Final,
            message_size: 100_000,
            secure_channel_id: 1,
        };
        let options = DecodingOptions {
            max_message_size: 65536,
            ..DecodingOptions::test()
        };
        assert_eq!(
            MessageChunk::decode(&mut Cursor::new(header.encode_to_vec()), &options),
            Err(StatusCode::BadTcpMessageTooLarge)
        );
    }

    #[test]
    fn chunk_is_read_whole() {
        let header = MessageChunkHeader {
            message_type: MessageChunkType::Message,
            is_final: MessageIsFinalType::Final,
            message_size: 16,
            secure_channel_id: 1,
        };
        let mut bytes = header.encode_to_vec();
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        let mut stream = Cursor::new(bytes);
        let chunk = MessageChunk::decode(&mut stream, &DecodingOptions::test()).unwrap();
        assert_eq!(chunk.data.len(), 16);
        assert_eq!(&chunk.data[12..], &[1, 2, 3, 4]);
        assert_eq!(stream.position(), 16);
    }
}
