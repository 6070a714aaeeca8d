// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::io::Cursor;

use crate::{
    core::{
        comms::{
            chunker::Chunker,
            message_chunk::{MessageChunk, MessageIsFinalType},
            secure_channel::SecureChannel,
            security_header::SequenceHeader,
            tcp_types::MIN_CHUNK_SIZE,
        },
        supported_message::SupportedMessage,
    },
    crypto::SecurityPolicy,
    types::*,
};

use super::keyed_channel_pair;

const FIRST_SEQUENCE_NUMBER: u32 = 1000;
const REQUEST_ID: u32 = 100;

/// Room for the ten thousand values of [`bulk_read_response`].
fn bulk_decoding_options() -> DecodingOptions {
    DecodingOptions {
        max_chunk_count: 0,
        max_array_length: 20000,
        ..Default::default()
    }
}

/// A response far larger than one chunk.
fn bulk_read_response() -> SupportedMessage {
    ReadResponse {
        response_header: ResponseHeader::null(),
        results: Some((0u32..10000).map(DataValue::new_now).collect()),
        diagnostic_infos: None,
    }
    .into()
}

/// The bulk response split into chunks of the minimum size.
fn bulk_chunks(secure_channel: &SecureChannel) -> (SupportedMessage, Vec<MessageChunk>) {
    let response = bulk_read_response();
    let chunks = Chunker::encode(
        FIRST_SEQUENCE_NUMBER,
        REQUEST_ID,
        0,
        MIN_CHUNK_SIZE,
        secure_channel,
        &response,
    )
    .unwrap();
    assert!(chunks.len() > 6, "only {} chunks", chunks.len());
    (response, chunks)
}

/// Rewrites the sequence header of a chunk in place.
fn edit_sequence_header(
    chunk: &mut MessageChunk,
    secure_channel: &SecureChannel,
    edit: impl FnOnce(&mut SequenceHeader),
) {
    let mut info = chunk.chunk_info(secure_channel).unwrap();
    edit(&mut info.sequence_header);
    let mut stream = Cursor::new(&mut chunk.data[..]);
    stream.set_position(info.sequence_header_offset as u64);
    info.sequence_header.encode(&mut stream).unwrap();
}

fn validation_error(secure_channel: &SecureChannel, chunks: &[MessageChunk]) -> StatusCode {
    Chunker::validate_chunks(FIRST_SEQUENCE_NUMBER, secure_channel, chunks).unwrap_err()
}

#[test]
fn large_message_spans_numbered_chunks() {
    crate::console_logging::init();

    let mut secure_channel = SecureChannel::new_no_certificate_store();
    secure_channel.set_decoding_options(bulk_decoding_options());
    let (response, chunks) = bulk_chunks(&secure_channel);

    assert_eq!(chunks[0].byte_len(), MIN_CHUNK_SIZE);
    let last = chunks.len() - 1;
    for (i, chunk) in chunks.iter().enumerate() {
        let info = chunk.chunk_info(&secure_channel).unwrap();
        assert_eq!(
            info.sequence_header,
            SequenceHeader {
                sequence_number: FIRST_SEQUENCE_NUMBER + i as u32,
                request_id: REQUEST_ID,
            }
        );
        let is_final = if i == last {
            MessageIsFinalType::Final
        } else {
            MessageIsFinalType::Intermediate
        };
        assert_eq!(info.message_header.is_final, is_final);
    }

    assert_eq!(Chunker::decode(&chunks, &secure_channel, None).unwrap(), response);
}

#[test]
fn secured_chunks_survive_the_wire() {
    crate::console_logging::init();

    let (mut client, mut server) = keyed_channel_pair(
        SecurityPolicy::Aes256Sha256RsaPss,
        MessageSecurityMode::SignAndEncrypt,
    );
    client.set_decoding_options(bulk_decoding_options());
    server.set_decoding_options(bulk_decoding_options());

    let response = bulk_read_response();
    let chunks = Chunker::encode(1, 5, 0, MIN_CHUNK_SIZE, &server, &response).unwrap();
    assert!(chunks.len() > 1);

    // Padding and signature must still fit the negotiated chunk size
    let received: Vec<MessageChunk> = chunks
        .iter()
        .map(|chunk| {
            let mut wire = vec![0u8; MIN_CHUNK_SIZE + 1024];
            let size = server.apply_security(chunk, &mut wire).unwrap();
            assert!(size <= MIN_CHUNK_SIZE);
            client.verify_and_remove_security(&wire[..size]).unwrap()
        })
        .collect();
    assert_eq!(received, chunks);

    assert_eq!(
        Chunker::validate_chunks(1, &client, &received).unwrap(),
        chunks.len() as u32
    );
    assert_eq!(Chunker::decode(&received, &client, None).unwrap(), response);
}

#[test]
fn message_size_limit_is_inclusive() {
    crate::console_logging::init();

    let secure_channel = SecureChannel::new_no_certificate_store();
    let response = bulk_read_response();
    let limit = response.byte_len();

    let encode = |max_message_size| {
        Chunker::encode(1, 1, max_message_size, 0, &secure_channel, &response)
    };
    assert_eq!(encode(limit).unwrap().len(), 1);
    // A channel without a role reports the limit the way a server would
    assert_eq!(encode(limit - 1).unwrap_err(), StatusCode::BadResponseTooLarge);
}

#[test]
fn chunks_of_another_channel_are_rejected() {
    crate::console_logging::init();

    let mut secure_channel = SecureChannel::new_no_certificate_store();
    let (_, chunks) = bulk_chunks(&secure_channel);
    assert!(Chunker::validate_chunks(FIRST_SEQUENCE_NUMBER, &secure_channel, &chunks).is_ok());

    let channel_id = secure_channel.secure_channel_id();
    secure_channel.set_secure_channel_id(channel_id + 1);
    assert_eq!(
        validation_error(&secure_channel, &chunks),
        StatusCode::BadSecureChannelIdInvalid
    );
}

#[test]
fn sequence_numbers_must_be_contiguous() {
    crate::console_logging::init();

    let secure_channel = SecureChannel::new_no_certificate_store();
    let (_, mut chunks) = bulk_chunks(&secure_channel);

    assert_eq!(
        Chunker::validate_chunks(FIRST_SEQUENCE_NUMBER, &secure_channel, &chunks).unwrap(),
        FIRST_SEQUENCE_NUMBER + chunks.len() as u32 - 1
    );
    // Numbers below the expected start
    assert_eq!(
        Chunker::validate_chunks(FIRST_SEQUENCE_NUMBER + 5000, &secure_channel, &chunks)
            .unwrap_err(),
        StatusCode::BadSequenceNumberInvalid
    );

    // Duplicate of the second chunk's number
    edit_sequence_header(&mut chunks[0], &secure_channel, |h| h.sequence_number += 1);
    assert_eq!(
        validation_error(&secure_channel, &chunks),
        StatusCode::BadSecurityChecksFailed
    );

    // Gap in the middle
    edit_sequence_header(&mut chunks[0], &secure_channel, |h| h.sequence_number -= 1);
    edit_sequence_header(&mut chunks[5], &secure_channel, |h| h.sequence_number += 3);
    assert_eq!(
        validation_error(&secure_channel, &chunks),
        StatusCode::BadSecurityChecksFailed
    );
}

#[test]
fn request_id_must_not_change_between_chunks() {
    crate::console_logging::init();

    let secure_channel = SecureChannel::new_no_certificate_store();
    let (_, mut chunks) = bulk_chunks(&secure_channel);

    edit_sequence_header(&mut chunks[0], &secure_channel, |h| h.request_id = REQUEST_ID + 1);
    assert_eq!(
        validation_error(&secure_channel, &chunks),
        StatusCode::BadSecurityChecksFailed
    );
}

#[test]
fn decode_checks_the_expected_type() {
    crate::console_logging::init();

    let secure_channel = SecureChannel::new_no_certificate_store();
    let request: SupportedMessage = CloseSessionRequest {
        request_header: RequestHeader::dummy(),
        delete_subscriptions: true,
    }
    .into();
    let chunks = Chunker::encode(1, 1, 0, 0, &secure_channel, &request).unwrap();

    assert_eq!(Chunker::decode(&chunks, &secure_channel, None).unwrap(), request);
    let read_request = NodeId::from(ObjectId::ReadRequest_Encoding_DefaultBinary);
    assert_eq!(
        Chunker::decode(&chunks, &secure_channel, Some(read_request)).unwrap_err(),
        StatusCode::BadUnexpectedError
    );
}
