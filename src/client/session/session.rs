// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;

use crate::{
    client::{
        config::SessionTimeoutBounds,
        retry::SessionRetryPolicy,
        transport::{AsyncSecureChannel, ChannelState, Connector},
        ClientConfig,
    },
    core::{handle::AtomicHandle, supported_message::SupportedMessage},
    crypto::CertificateStore,
    sync::{Mutex, RwLock},
    types::{ApplicationDescription, DecodingOptions, EndpointDescription, NodeId, RequestHeader, StatusCode, UAString},
};

use super::{
    services::subscriptions::{SubscriptionSnapshot, SubscriptionState},
    session_warn, SessionEventLoop, SessionInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Disconnected,
    Connected,
    Connecting,
}

/// Whether the server keeps subscriptions when a session is reactivated or transferred. It is
/// learnt from the results of `TransferSubscriptions` after a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionRetention {
    /// No reconnect with subscriptions has happened yet
    #[default]
    Unknown,
    /// The server transferred the subscriptions, they were kept as they were
    Retained,
    /// The server did not keep them, they were recreated from the local model
    NotRetained,
}

lazy_static! {
    static ref NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);
}

/// An OPC UA session. It provides methods for the services that require an open session.
///
/// The session does nothing on its own, the [`SessionEventLoop`] returned alongside it must be
/// polled to connect, keep the session alive and deliver subscription notifications.
pub struct Session {
    pub(super) channel: AsyncSecureChannel,
    pub(super) state_watch_rx: tokio::sync::watch::Receiver<SessionState>,
    pub(super) state_watch_tx: tokio::sync::watch::Sender<SessionState>,
    pub(super) certificate_store: Arc<RwLock<CertificateStore>>,
    pub(super) session_id: Arc<ArcSwap<NodeId>>,
    pub(super) auth_token: Arc<ArcSwap<NodeId>>,
    pub(super) internal_session_id: AtomicU32,
    pub(super) session_info: SessionInfo,
    pub(super) session_name: UAString,
    pub(super) application_description: ApplicationDescription,
    pub(super) request_timeout: Duration,
    pub(super) publish_timeout: Duration,
    pub(super) recreate_monitored_items_chunk: usize,
    pub(super) session_timeout_bounds: SessionTimeoutBounds,
    /// Negotiated session timeout, after clamping
    pub(super) session_timeout: Mutex<Duration>,
    pub(super) max_inflight_publish: usize,
    pub(super) subscription_state: Mutex<SubscriptionState>,
    pub(super) monitored_item_handle: AtomicHandle,
    pub(super) trigger_publish_tx: tokio::sync::watch::Sender<Instant>,
    /// Time of the last response of any kind, publish responses included
    pub(super) last_activity: Mutex<Instant>,
    /// Set once the session is being closed deliberately
    pub(super) closing: AtomicBool,
    pub(super) retention: Mutex<SubscriptionRetention>,
}

impl Session {
    pub(crate) fn new(
        certificate_store: Arc<RwLock<CertificateStore>>,
        session_info: SessionInfo,
        session_name: UAString,
        application_description: ApplicationDescription,
        session_retry_policy: SessionRetryPolicy,
        decoding_options: DecodingOptions,
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> (Arc<Self>, SessionEventLoop) {
        let auth_token: Arc<ArcSwap<NodeId>> = Default::default();
        let (state_watch_tx, state_watch_rx) =
            tokio::sync::watch::channel(SessionState::Disconnected);
        let (trigger_publish_tx, trigger_publish_rx) = tokio::sync::watch::channel(Instant::now());
        let session_timeout_bounds = config.session_timeout_bounds.clone();

        let session = Arc::new(Session {
            channel: AsyncSecureChannel::new(
                certificate_store.clone(),
                session_info.clone(),
                decoding_options,
                config.performance.ignore_clock_skew,
                auth_token.clone(),
                config.transport_configuration(),
                connector,
            ),
            internal_session_id: AtomicU32::new(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)),
            state_watch_rx,
            state_watch_tx,
            session_id: Default::default(),
            session_info,
            auth_token,
            session_name,
            application_description,
            certificate_store,
            request_timeout: config.request_timeout(),
            publish_timeout: config.publish_timeout(),
            recreate_monitored_items_chunk: config.performance.recreate_monitored_items_chunk.max(1),
            session_timeout: Mutex::new(session_timeout_bounds.clamp(session_timeout_bounds.requested_ms)),
            session_timeout_bounds,
            max_inflight_publish: config.max_inflight_publish.max(1),
            subscription_state: Mutex::new(SubscriptionState::new(config.min_publish_interval())),
            monitored_item_handle: AtomicHandle::new(1000),
            trigger_publish_tx,
            last_activity: Mutex::new(Instant::now()),
            closing: AtomicBool::new(false),
            retention: Mutex::new(SubscriptionRetention::Unknown),
        });

        (
            session.clone(),
            SessionEventLoop::new(
                session,
                session_retry_policy,
                trigger_publish_rx,
                config.keep_alive_interval(),
                config.max_missed_keep_alives,
            ),
        )
    }

    /// Send a message and wait for response, using the default configured timeout.
    pub(crate) async fn send(
        &self,
        request: impl Into<SupportedMessage>,
    ) -> Result<SupportedMessage, StatusCode> {
        self.send_with_timeout(request, self.request_timeout).await
    }

    /// Send a message and wait for its response, any response counts as session activity.
    pub(crate) async fn send_with_timeout(
        &self,
        request: impl Into<SupportedMessage>,
        timeout: Duration,
    ) -> Result<SupportedMessage, StatusCode> {
        let response = self.channel.send(request, timeout).await;
        if response.is_ok() {
            self.record_activity();
        }
        response
    }

    pub(super) fn record_activity(&self) {
        *trace_lock!(self.last_activity) = Instant::now();
    }

    pub(super) fn last_activity(&self) -> Instant {
        *trace_lock!(self.last_activity)
    }

    /// Create a request header with the default timeout.
    pub(crate) fn make_request_header(&self) -> RequestHeader {
        self.channel.make_request_header(self.request_timeout)
    }

    /// Reset the session after a hard disconnect, clearing the session ID and incrementing the
    /// internal session counter.
    pub(crate) fn reset(&self) {
        self.session_id.store(Arc::new(NodeId::null()));
        self.internal_session_id.store(
            NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            Ordering::Relaxed,
        );
    }

    /// Wait for the session to be in either a connected or disconnected state.
    async fn wait_for_state(&self, connected: bool) -> bool {
        let mut rx = self.state_watch_rx.clone();

        let reached = rx
            .wait_for(|s| {
                connected && matches!(*s, SessionState::Connected)
                    || !connected && matches!(*s, SessionState::Disconnected)
            })
            .await
            .is_ok();
        reached
    }

    /// The internal ID of the session, used to keep track of multiple sessions in the same program.
    pub fn session_id(&self) -> u32 {
        self.internal_session_id.load(Ordering::Relaxed)
    }

    /// The session id the server assigned, null until the session is created.
    pub fn server_session_id(&self) -> NodeId {
        (**self.session_id.load()).clone()
    }

    /// The endpoint the session connects to.
    pub fn endpoint(&self) -> &EndpointDescription {
        &self.session_info.endpoint
    }

    /// The session timeout negotiated with the server.
    pub fn session_timeout(&self) -> Duration {
        *trace_lock!(self.session_timeout)
    }

    /// What was learnt about the server keeping subscriptions across reconnects.
    /// Where the secure channel under the session is in its lifecycle.
    pub fn channel_state(&self) -> ChannelState {
        self.channel.channel_state()
    }

    pub fn subscription_retention(&self) -> SubscriptionRetention {

        *trace_lock!(self.retention)
    }

    /// A consistent copy of every subscription and its monitored items.
    pub fn subscription_snapshot(&self) -> Vec<SubscriptionSnapshot> {
        trace_lock!(self.subscription_state).snapshot()
    }

    pub(super) fn subscriptions(&self) -> parking_lot::MutexGuard<'_, SubscriptionState> {
        trace_lock!(self.subscription_state)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    pub(crate) fn is_connected(&self) -> bool {
        matches!(*self.state_watch_rx.borrow(), SessionState::Connected)
    }

    /// Convenience method to wait for a connection to the server.
    ///
    /// You should also monitor the session event loop. If it ends, this method will never return.
    pub async fn wait_for_connection(&self) -> bool {
        self.wait_for_state(true).await
    }

    /// Close the session, deleting its subscriptions on the server, then close the channel and
    /// wait until disconnected. Outstanding publish requests end silently.
    pub async fn disconnect(&self) -> Result<(), StatusCode> {
        self.closing.store(true, Ordering::Relaxed);
        if self.is_connected() {
            if let Err(e) = self.close_session().await {
                session_warn!(self, "CloseSession failed while disconnecting, {}", e);
            }
            self.channel.close_channel().await;
            self.wait_for_state(false).await;
        } else {
            let _ = self.state_watch_tx.send(SessionState::Disconnected);
        }
        Ok(())
    }
}
