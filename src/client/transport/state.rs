// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use tokio::sync::{mpsc::error::SendTimeoutError, oneshot};

use crate::{
    client::{process_service_result, process_unexpected_response, transport::OutgoingMessage},
    core::{
        comms::secure_channel::SecureChannel, handle::AtomicHandle,
        supported_message::SupportedMessage,
    },
    crypto::SecurityPolicy,
    sync::RwLock,
    types::{
        DateTime, ExtensionObject, MessageSecurityMode, NodeId, OpenSecureChannelRequest,
        RequestHeader, SecurityTokenRequestType, StatusCode, UAString,
    },
};

use super::core::ResponseCallback;

pub(crate) type RequestSend = tokio::sync::mpsc::Sender<OutgoingMessage>;

/// Token lifetime the client asks for, in milliseconds. The server may revise it.
pub(crate) const REQUESTED_LIFETIME: u32 = 60000;

/// A request on its way to the transport queue.
pub(crate) struct Request {
    payload: SupportedMessage,
    sender: RequestSend,
    timeout: Duration,
}

impl Request {
    pub fn new(
        payload: impl Into<SupportedMessage>,
        sender: RequestSend,
        timeout: Duration,
    ) -> Self {
        Self {
            payload: payload.into(),
            sender,
            timeout,
        }
    }

    /// Queues the request. A full queue counts against the request's timeout.
    async fn enqueue(self, callback: Option<ResponseCallback>) -> Result<(), StatusCode> {
        let message = OutgoingMessage {
            request: self.payload,
            callback,
            deadline: Instant::now() + self.timeout,
        };
        self.sender
            .send_timeout(message, self.timeout)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Closed(_) => StatusCode::BadConnectionClosed,
                SendTimeoutError::Timeout(_) => StatusCode::BadTimeout,
            })
    }

    pub async fn send_no_response(self) -> Result<(), StatusCode> {
        self.enqueue(None).await
    }

    pub async fn send(self) -> Result<SupportedMessage, StatusCode> {
        let (callback, response) = oneshot::channel();
        self.enqueue(Some(callback)).await?;
        // A dropped callback means the transport closed without answering
        response
            .await
            .unwrap_or(Err(StatusCode::BadConnectionClosed))
    }
}

/// What requests on one secure channel have in common: the session's authentication token,
/// the request handle sequence and the correction for the server's clock.
pub struct SecureChannelState {
    client_offset: ArcSwap<chrono::Duration>,
    ignore_clock_skew: bool,
    secure_channel: Arc<RwLock<SecureChannel>>,
    /// Null until a session is created
    authentication_token: Arc<ArcSwap<NodeId>>,
    request_handle: AtomicHandle,
}

impl SecureChannelState {
    pub fn new(
        ignore_clock_skew: bool,
        secure_channel: Arc<RwLock<SecureChannel>>,
        authentication_token: Arc<ArcSwap<NodeId>>,
    ) -> Self {
        SecureChannelState {
            client_offset: ArcSwap::from_pointee(chrono::Duration::zero()),
            ignore_clock_skew,
            secure_channel,
            authentication_token,
            request_handle: AtomicHandle::new(1),
        }
    }

    fn client_offset(&self) -> chrono::Duration {
        **self.client_offset.load()
    }

    /// An OpenSecureChannel request with a fresh client nonce.
    pub(crate) fn begin_issue_or_renew_secure_channel(
        &self,
        request_type: SecurityTokenRequestType,
        timeout: Duration,
        sender: RequestSend,
    ) -> Request {
        let (security_mode, client_nonce) = {
            let mut secure_channel = trace_write_lock!(self.secure_channel);
            let nonce = secure_channel.security_policy().random_nonce();
            secure_channel.set_local_nonce(nonce.as_ref());
            debug!(
                "{:?} security token, {:?} with {}",
                request_type,
                secure_channel.security_mode(),
                secure_channel.security_policy()
            );
            (secure_channel.security_mode(), nonce)
        };

        let request = OpenSecureChannelRequest {
            request_header: self.make_request_header(timeout),
            client_protocol_version: 0,
            request_type,
            security_mode,
            client_nonce,
            requested_lifetime: REQUESTED_LIFETIME,
        };
        Request::new(request, sender, timeout)
    }

    /// Only the task opening or renewing the channel calls this.
    pub fn set_client_offset(&self, offset: chrono::Duration) {
        let offset = self.client_offset() + offset;
        self.client_offset.store(Arc::new(offset));
        debug!("Client offset is now {}", offset);
    }

    /// Installs the token from the OpenSecureChannel response and derives its keys.
    pub(crate) fn end_issue_or_renew_secure_channel(
        &self,
        response: SupportedMessage,
    ) -> Result<(), StatusCode> {
        let SupportedMessage::OpenSecureChannelResponse(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;

        let mut security_token = response.security_token.clone();
        let server_time = response.response_header.timestamp;
        if self.ignore_clock_skew && !server_time.is_null() {
            // Timestamps from then on are in the server's time
            let offset = server_time - DateTime::now();
            security_token.created_at = security_token.created_at - offset;
            self.set_client_offset(offset);
        }

        debug!(
            "Security token {} on channel {}, lifetime {}ms",
            security_token.token_id, security_token.channel_id, security_token.revised_lifetime
        );
        let mut secure_channel = trace_write_lock!(self.secure_channel);
        secure_channel.set_client_offset(self.client_offset());
        secure_channel.set_security_token(security_token);

        let secured = matches!(
            secure_channel.security_mode(),
            MessageSecurityMode::Sign | MessageSecurityMode::SignAndEncrypt
        );
        if secured && secure_channel.security_policy() != SecurityPolicy::None {
            secure_channel.set_remote_nonce_from_byte_string(&response.server_nonce)?;
            secure_channel.derive_keys()?;
        }
        Ok(())
    }

    /// Every request carries the authentication token, which is null before the session
    /// exists.
    pub fn make_request_header(&self, timeout: Duration) -> RequestHeader {
        RequestHeader {
            authentication_token: NodeId::clone(&self.authentication_token.load()),
            timestamp: DateTime::now_with_offset(self.client_offset()),
            request_handle: self.request_handle.next(),
            return_diagnostics: 0,
            audit_entry_id: UAString::null(),
            timeout_hint: u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX),
            additional_header: ExtensionObject::null(),
        }
    }
}
