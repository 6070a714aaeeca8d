// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{sync::Arc, time::Duration};

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::{
    client::session::SessionInfo,
    core::{
        comms::{
            secure_channel::{Role, SecureChannel},
            url::hostname_from_url,
        },
        supported_message::SupportedMessage,
    },
    crypto::{CertificateStore, SecurityPolicy, X509},
    sync::RwLock,
    types::{
        ByteString, CloseSecureChannelRequest, DecodingOptions, NodeId, RequestHeader,
        SecurityTokenRequestType, StatusCode,
    },
};

use super::{
    core::TransportPollResult,
    state::{Request, RequestSend, SecureChannelState},
    tcp::TransportConfiguration,
    Connector, Transport,
};

const OPEN_SECURE_CHANNEL_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_SECURE_CHANNEL_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle of the secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    /// A transport is being opened and the first token issued
    Opening,
    Open,
    /// A new token has been asked for, requests in flight continue under the old one
    Renewing,
    /// Renewal failed. The transport is abandoned and the channel has to be opened again.
    Faulted(StatusCode),
}

/// The client end of a secure channel to one endpoint. It outlives connections: each
/// [`connect`](Self::connect) opens a new transport and issues a new token on it.
pub struct AsyncSecureChannel {
    session_info: SessionInfo,
    pub(crate) secure_channel: Arc<RwLock<SecureChannel>>,
    certificate_store: Arc<RwLock<CertificateStore>>,
    transport_config: TransportConfiguration,
    state: SecureChannelState,
    connector: Arc<dyn Connector>,
    /// Serializes token renewal between concurrent senders
    renew_lock: tokio::sync::Mutex<()>,
    /// Queue into the current transport, None while disconnected
    request_send: ArcSwapOption<RequestSend>,
    channel_state: tokio::sync::watch::Sender<ChannelState>,
}

/// Owns the transport of a connected channel. Nothing moves on the wire unless this is polled.
pub struct SecureChannelEventLoop {
    transport: Box<dyn Transport>,
    channel_state: tokio::sync::watch::Receiver<ChannelState>,
}

/// Resolves with the status once the channel is faulted.
async fn faulted(channel_state: &mut tokio::sync::watch::Receiver<ChannelState>) -> StatusCode {
    let state = channel_state
        .wait_for(|s| matches!(s, ChannelState::Faulted(_)))
        .await
        .map(|s| *s);
    match state {
        Ok(ChannelState::Faulted(status)) => status,
        // The channel is gone, the transport reports the close
        _ => futures::future::pending().await,
    }
}

impl SecureChannelEventLoop {
    /// Polls the transport. A faulted channel ends it with `Closed` and the fault's status,
    /// dropping the event loop then drops the connection.
    pub async fn poll(&mut self) -> TransportPollResult {
        if let ChannelState::Faulted(status) = *self.channel_state.borrow() {
            return TransportPollResult::Closed(status);
        }
        tokio::select! {
            polled = self.transport.poll() => polled,
            status = faulted(&mut self.channel_state) => {
                warn!("Secure channel faulted, {}", status);
                TransportPollResult::Closed(status)
            }
        }
    }
}

impl AsyncSecureChannel {
    pub(crate) fn new(
        certificate_store: Arc<RwLock<CertificateStore>>,
        session_info: SessionInfo,
        decoding_options: DecodingOptions,
        ignore_clock_skew: bool,
        auth_token: Arc<ArcSwap<NodeId>>,
        transport_config: TransportConfiguration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let secure_channel = Arc::new(RwLock::new(SecureChannel::new(
            &*trace_read_lock!(certificate_store),
            Role::Client,
            decoding_options,
        )));
        Self {
            state: SecureChannelState::new(ignore_clock_skew, secure_channel.clone(), auth_token),
            secure_channel,
            session_info,
            certificate_store,
            transport_config,
            connector,
            renew_lock: tokio::sync::Mutex::new(()),
            request_send: ArcSwapOption::empty(),
            channel_state: tokio::sync::watch::channel(ChannelState::Closed).0,
        }
    }

    pub fn channel_state(&self) -> ChannelState {
        *self.channel_state.borrow()
    }

    fn set_channel_state(&self, state: ChannelState) {
        self.channel_state.send_replace(state);
    }

    fn sender(&self) -> Result<RequestSend, StatusCode> {
        self.request_send
            .load()
            .as_deref()
            .cloned()
            .ok_or(StatusCode::BadNotConnected)
    }

    /// Sends a request and waits for the response. Past 75% of the token lifetime the token is
    /// renewed first. Requests already in flight are answered under the old token.
    pub async fn send(
        &self,
        request: impl Into<SupportedMessage>,
        timeout: Duration,
    ) -> Result<SupportedMessage, StatusCode> {
        let send = self.sender()?;
        if self.should_renew_security_token() {
            self.renew_security_token(send.clone()).await?;
        }
        Request::new(request, send, timeout).send().await
    }

    async fn renew_security_token(&self, send: RequestSend) -> Result<(), StatusCode> {
        let _renewing = self.renew_lock.lock().await;
        // Someone else may have renewed while this waited for the lock
        if !self.should_renew_security_token() {
            return Ok(());
        }
        debug!("Renewing the security token");
        self.set_channel_state(ChannelState::Renewing);
        let renewed = match self
            .state
            .begin_issue_or_renew_secure_channel(
                SecurityTokenRequestType::Renew,
                OPEN_SECURE_CHANNEL_TIMEOUT,
                send,
            )
            .send()
            .await
        {
            Ok(response) => self.state.end_issue_or_renew_secure_channel(response),
            Err(status) => Err(status),
        };
        match renewed {
            Ok(()) => {
                self.set_channel_state(ChannelState::Open);
                Ok(())
            }
            Err(status) => {
                error!("Renewing the security token failed, {}", status);
                // No more requests go out on this transport
                self.request_send.store(None);
                self.set_channel_state(ChannelState::Faulted(status));
                Err(status)
            }
        }
    }

    fn should_renew_security_token(&self) -> bool {
        trace_read_lock!(self.secure_channel).should_renew_security_token()
    }

    pub(crate) fn make_request_header(&self, timeout: Duration) -> RequestHeader {
        self.state.make_request_header(timeout)
    }

    pub(crate) fn client_nonce(&self) -> ByteString {
        trace_read_lock!(self.secure_channel).local_nonce_as_byte_string()
    }

    /// Takes the server nonce and certificate from CreateSession, the session signature is
    /// made over them.
    pub(crate) fn update_from_created_session(
        &self,
        nonce: &ByteString,
        certificate: &ByteString,
    ) -> Result<(), StatusCode> {
        let mut secure_channel = trace_write_lock!(self.secure_channel);
        secure_channel.set_remote_nonce_from_byte_string(nonce)?;
        secure_channel.set_remote_cert_from_byte_string(certificate)
    }

    pub(crate) fn security_policy(&self) -> SecurityPolicy {
        trace_read_lock!(self.secure_channel).security_policy()
    }

    /// Opens a transport and issues a security token on it. The transport is polled while the
    /// token is requested, afterwards polling is up to the returned event loop.
    pub async fn connect(&self) -> Result<SecureChannelEventLoop, StatusCode> {
        self.request_send.store(None);
        trace_write_lock!(self.secure_channel).clear_security_token();
        self.set_channel_state(ChannelState::Opening);

        let connected = self.open().await;
        match connected {
            Ok(_) => self.set_channel_state(ChannelState::Open),
            Err(_) => self.set_channel_state(ChannelState::Closed),
        }
        connected
    }

    async fn open(&self) -> Result<SecureChannelEventLoop, StatusCode> {
        let (mut transport, send) = self.create_transport().await?;
        let issue = self
            .state
            .begin_issue_or_renew_secure_channel(
                SecurityTokenRequestType::Issue,
                OPEN_SECURE_CHANNEL_TIMEOUT,
                send.clone(),
            )
            .send();
        tokio::pin!(issue);

        let response = loop {
            tokio::select! {
                response = &mut issue => break response?,
                polled = transport.poll() => {
                    if let TransportPollResult::Closed(status) = polled {
                        return Err(if status.is_good() {
                            StatusCode::BadConnectionClosed
                        } else {
                            status
                        });
                    }
                }
            }
        };
        self.state.end_issue_or_renew_secure_channel(response)?;
        self.request_send.store(Some(Arc::new(send)));
        Ok(SecureChannelEventLoop {
            transport,
            channel_state: self.channel_state.subscribe(),
        })
    }

    /// Untrusted certificates land in the rejected folder of the store.
    fn validate_server_certificate(&self, security_policy: SecurityPolicy) -> Result<(), StatusCode> {
        let endpoint = &self.session_info.endpoint;
        if security_policy == SecurityPolicy::None || endpoint.server_certificate.is_empty() {
            return Ok(());
        }
        let cert = X509::from_byte_string(&endpoint.server_certificate)?;
        let hostname = hostname_from_url(endpoint.endpoint_url.as_ref()).ok();
        let application_uri = Some(endpoint.server.application_uri.as_ref()).filter(|u| !u.is_empty());
        let status = trace_read_lock!(self.certificate_store)
            .validate_or_reject_application_instance_cert(
                &cert,
                security_policy,
                hostname.as_deref(),
                application_uri,
            );
        if status.is_bad() {
            error!("Server certificate is not trusted, {}", status);
            return Err(status);
        }
        Ok(())
    }

    /// Checks the endpoint's policy, our own certificate and the server's, then sets up the
    /// channel for the endpoint.
    fn prepare_secure_channel(&self) -> Result<(), StatusCode> {
        let endpoint = &self.session_info.endpoint;
        let policy_uri = endpoint.security_policy_uri.as_ref();
        let security_policy = SecurityPolicy::from_uri(policy_uri);
        if !security_policy.is_supported() {
            error!("Security policy \"{}\" is not supported", policy_uri);
            return Err(StatusCode::BadSecurityPolicyRejected);
        }

        // No socket is opened to a server that will not be trusted anyway
        self.validate_server_certificate(security_policy)?;

        let (cert, key) = trace_read_lock!(self.certificate_store).read_own_cert_and_pkey_optional();
        if security_policy != SecurityPolicy::None && (cert.is_none() || key.is_none()) {
            error!(
                "{} needs an application certificate and private key",
                security_policy
            );
            return Err(StatusCode::BadConfigurationError);
        }

        let mut secure_channel = trace_write_lock!(self.secure_channel);
        secure_channel.set_private_key(key);
        secure_channel.set_cert(cert);
        secure_channel.set_security_policy(security_policy);
        secure_channel.set_security_mode(endpoint.security_mode);
        if !endpoint.server_certificate.is_empty() {
            secure_channel.set_remote_cert_from_byte_string(&endpoint.server_certificate)?;
        }
        debug!("Channel uses {} in {:?} mode", security_policy, endpoint.security_mode);
        Ok(())
    }

    async fn create_transport(&self) -> Result<(Box<dyn Transport>, RequestSend), StatusCode> {
        self.prepare_secure_channel()?;
        let (send, recv) = tokio::sync::mpsc::channel(self.transport_config.max_inflight);
        let transport = self
            .connector
            .connect(
                self.secure_channel.clone(),
                recv,
                self.transport_config.clone(),
                self.session_info.endpoint.endpoint_url.as_ref(),
            )
            .await?;
        Ok((transport, send))
    }

    /// Queues a CloseSecureChannel, after which the transport shuts down. Nothing happens when
    /// not connected.
    pub async fn close_channel(&self) {
        let Some(sender) = self.request_send.swap(None) else {
            return;
        };
        self.set_channel_state(ChannelState::Closed);
        let request = CloseSecureChannelRequest {
            request_header: self.state.make_request_header(CLOSE_SECURE_CHANNEL_TIMEOUT),
        };
        let queued = Request::new(request, RequestSend::clone(&sender), CLOSE_SECURE_CHANNEL_TIMEOUT)
            .send_no_response()
            .await;
        if let Err(status) = queued {
            error!("CloseSecureChannel could not be queued, {}", status);
        }
    }
}
