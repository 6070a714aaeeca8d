// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::io::Cursor;

use crate::{
    crypto::SecurityPolicy,
    types::{status_code::StatusCode, BinaryEncoder},
};

use super::{
    message_chunk::{MessageChunk, MessageChunkHeader},
    secure_channel::SecureChannel,
    security_header::{SecurityHeader, SequenceHeader},
};

/// The headers of a chunk and where its parts start. Only meaningful for a chunk that is
/// already decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInfo {
    pub message_header: MessageChunkHeader,
    /// Asymmetric for OpenSecureChannel, symmetric otherwise
    pub security_header: SecurityHeader,
    pub sequence_header: SequenceHeader,
    pub sequence_header_offset: usize,
    pub body_offset: usize,
    pub body_length: usize,
}

impl ChunkInfo {
    pub fn new(chunk: &MessageChunk, secure_channel: &SecureChannel) -> Result<ChunkInfo, StatusCode> {
        let decoding_options = secure_channel.decoding_options();
        let mut stream = Cursor::new(&chunk.data);
        let malformed = |what: &str, err: StatusCode| {
            error!("Chunk has a malformed {}, {}", what, err);
            StatusCode::BadCommunicationError
        };

        let message_header = MessageChunkHeader::decode(&mut stream, &decoding_options)?;
        let is_open = message_header.message_type.is_open_secure_channel();
        let security_header = SecurityHeader::decode_for(&mut stream, is_open, &decoding_options)
            .map_err(|e| malformed("security header", e))?;

        if let SecurityHeader::Asymmetric(header) = &security_header {
            let policy_uri = header.security_policy_uri.as_ref();
            if !header.security_policy_uri.is_null()
                && SecurityPolicy::from_uri(policy_uri) == SecurityPolicy::Unknown
            {
                error!("Chunk uses the unsupported security policy {}", policy_uri);
                return Err(StatusCode::BadSecurityPolicyRejected);
            }
        }

        let sequence_header_offset = stream.position() as usize;
        let sequence_header = SequenceHeader::decode(&mut stream, &decoding_options)
            .map_err(|e| malformed("sequence header", e))?;

        let body_offset = stream.position() as usize;
        Ok(ChunkInfo {
            message_header,
            security_header,
            sequence_header,
            sequence_header_offset,
            body_offset,
            body_length: chunk.data.len().saturating_sub(body_offset),
        })
    }
}
