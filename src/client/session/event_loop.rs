// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::{stream::BoxStream, Stream, StreamExt, TryStreamExt};

use crate::{
    client::{
        retry::{ExponentialBackoff, SessionRetryPolicy},
        session::{session_debug, session_error, session_warn},
        transport::{SecureChannelEventLoop, TransportPollResult},
        Error,
    },
    types::{AttributeId, QualifiedName, ReadValueId, StatusCode, TimestampsToReturn, VariableId},
};

use super::{
    connect::{SessionConnectMode, SessionConnector},
    services::subscriptions::event_loop::{SubscriptionActivity, SubscriptionEventLoop},
    session::SessionState,
    Session,
};

/// What polling the session event loop produced. Useful for watching reconnects and
/// keep-alive failures.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionPollResult {
    /// The transport sent or received something.
    Transport(TransportPollResult),
    /// The connection was lost, the loop reconnects.
    ConnectionLost(StatusCode),
    /// One reconnect attempt failed, another follows after a backoff.
    ReconnectFailed(StatusCode),
    /// Connected, either with the old session or a new one.
    Reconnected(SessionConnectMode),
    SessionActivity(SessionActivity),
    Subscription(SubscriptionActivity),
    /// A connect attempt begins.
    BeginConnect,
}

/// The transport plus the keep-alive and publish loops that only run while connected.
struct Connected {
    channel: SecureChannelEventLoop,
    activity: BoxStream<'static, SessionActivity>,
    subscriptions: BoxStream<'static, SubscriptionActivity>,
}

enum SessionEventLoopState {
    Connected(Connected),
    Connecting(SessionConnector, ExponentialBackoff, Instant),
    Disconnected,
}

type Step = Result<Option<(SessionPollResult, SessionEventLoopState)>, StatusCode>;

/// Drives the session: connects, reconnects, keeps the session alive and publishes.
/// Nothing happens unless it is polled.
#[must_use = "The session event loop must be started for the session to work"]
pub struct SessionEventLoop {
    inner: Arc<Session>,
    trigger_publish_recv: tokio::sync::watch::Receiver<Instant>,
    retry: SessionRetryPolicy,
    keep_alive_interval: Duration,
    max_missed_keep_alives: u32,
}

impl SessionEventLoop {
    pub(crate) fn new(
        inner: Arc<Session>,
        retry: SessionRetryPolicy,
        trigger_publish_recv: tokio::sync::watch::Receiver<Instant>,
        keep_alive_interval: Duration,
        max_missed_keep_alives: u32,
    ) -> Self {
        Self {
            inner,
            retry,
            trigger_publish_recv,
            keep_alive_interval,
            max_missed_keep_alives: max_missed_keep_alives.max(1),
        }
    }

    /// Runs until the session is closed, which gives `Good`, or until reconnecting is given
    /// up, which gives the last error.
    pub async fn run(self) -> StatusCode {
        let stream = self.enter();
        tokio::pin!(stream);
        loop {
            match stream.try_next().await {
                Ok(Some(_)) => {}
                Ok(None) => break StatusCode::Good,
                Err(status) => break status,
            }
        }
    }

    /// [`run`](Self::run) on a new tokio task.
    pub fn spawn(self) -> tokio::task::JoinHandle<StatusCode> {
        tokio::task::spawn(self.run())
    }

    /// The event loop as a stream of what it does. It ends with `None` when the session is
    /// closed and with an error when reconnecting is given up or the server rejects the
    /// client's security.
    pub fn enter(self) -> impl Stream<Item = Result<SessionPollResult, StatusCode>> {
        futures::stream::try_unfold(
            (self, SessionEventLoopState::Disconnected),
            |(slf, state)| async move {
                let step = match state {
                    SessionEventLoopState::Connected(connected) => {
                        slf.poll_connected(connected).await
                    }
                    SessionEventLoopState::Disconnected => slf.begin_connect(),
                    SessionEventLoopState::Connecting(connector, backoff, next_try) => {
                        slf.try_connect(connector, backoff, next_try).await
                    }
                }?;
                Ok(step.map(|(result, state)| (result, (slf, state))))
            },
        )
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.inner.state_watch_tx.send(state);
    }

    /// The connection is gone. Ends the loop if the session is being closed.
    fn lost(&self, status: StatusCode) -> Step {
        self.set_state(SessionState::Disconnected);
        if status.is_good() || self.inner.is_closing() {
            session_debug!(self.inner, "Connection closed, {status}");
            return Ok(None);
        }
        session_warn!(self.inner, "Connection lost, {status}");
        Ok(Some((
            SessionPollResult::ConnectionLost(status),
            SessionEventLoopState::Disconnected,
        )))
    }

    async fn poll_connected(&self, mut connected: Connected) -> Step {
        let result = tokio::select! {
            polled = connected.channel.poll() => match polled {
                TransportPollResult::Closed(status) => return self.lost(status),
                polled => SessionPollResult::Transport(polled),
            },
            activity = connected.activity.next() => match activity {
                Some(SessionActivity::SessionDead(status)) => {
                    // Dropping the transport closes the socket
                    drop(connected);
                    return self.lost(status);
                }
                Some(activity) => SessionPollResult::SessionActivity(activity),
                None => {
                    session_error!(self.inner, "Keep-alive loop ended");
                    return Err(StatusCode::BadUnexpectedError);
                }
            },
            activity = connected.subscriptions.next() => match activity {
                Some(activity) => SessionPollResult::Subscription(activity),
                None => {
                    session_error!(self.inner, "Publish loop ended");
                    return Err(StatusCode::BadUnexpectedError);
                }
            },
        };
        Ok(Some((result, SessionEventLoopState::Connected(connected))))
    }

    fn begin_connect(&self) -> Step {
        if self.inner.is_closing() {
            return Ok(None);
        }
        self.set_state(SessionState::Connecting);
        Ok(Some((
            SessionPollResult::BeginConnect,
            SessionEventLoopState::Connecting(
                SessionConnector::new(self.inner.clone()),
                self.retry.new_backoff(),
                Instant::now(),
            ),
        )))
    }

    fn connected(&self, channel: SecureChannelEventLoop) -> Connected {
        Connected {
            channel,
            activity: SessionActivityLoop::new(
                self.inner.clone(),
                self.keep_alive_interval,
                self.max_missed_keep_alives,
            )
            .run()
            .boxed(),
            subscriptions: SubscriptionEventLoop::new(
                self.inner.clone(),
                self.trigger_publish_recv.clone(),
            )
            .run()
            .boxed(),
        }
    }

    async fn try_connect(
        &self,
        connector: SessionConnector,
        mut backoff: ExponentialBackoff,
        next_try: Instant,
    ) -> Step {
        tokio::time::sleep_until(next_try.into()).await;
        if self.inner.is_closing() {
            self.set_state(SessionState::Disconnected);
            return Ok(None);
        }

        let status = match connector.try_connect().await {
            Ok((channel, mode)) => {
                self.inner.record_activity();
                self.set_state(SessionState::Connected);
                return Ok(Some((
                    SessionPollResult::Reconnected(mode),
                    SessionEventLoopState::Connected(self.connected(channel)),
                )));
            }
            Err(status) => status,
        };

        // An untrusted server or rejected credentials stay that way
        if matches!(Error::from(status), Error::Security(_)) {
            session_error!(self.inner, "Connecting was refused, {status}");
            self.set_state(SessionState::Disconnected);
            return Err(status);
        }
        session_warn!(self.inner, "Connecting failed, {status}");
        let Some(delay) = backoff.next() else {
            self.set_state(SessionState::Disconnected);
            return Err(status);
        };
        Ok(Some((
            SessionPollResult::ReconnectFailed(status),
            SessionEventLoopState::Connecting(connector, backoff, Instant::now() + delay),
        )))
    }
}

/// Periodic activity performed by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionActivity {
    /// A keep alive request was sent to the server and a response was received with a successful state.
    KeepAliveSucceeded,
    /// A keep alive request was sent to the server, but it failed or the server was in an invalid state.
    KeepAliveFailed(StatusCode),
    /// Too many keep-alives failed in a row, or nothing was heard within the session timeout.
    /// The session event loop reconnects.
    SessionDead(StatusCode),
}

/// The keep-alive period, recomputed every tick as subscriptions and the negotiated timeout change.
struct KeepAliveTimer {
    configured: Duration,
    period: Duration,
    interval: tokio::time::Interval,
}

impl KeepAliveTimer {
    fn new(configured: Duration) -> Self {
        let period = configured.max(Duration::from_millis(1));
        Self {
            configured: period,
            period,
            interval: Self::make_interval(period),
        }
    }

    fn make_interval(period: Duration) -> tokio::time::Interval {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval
    }

    /// Shortest of the configured interval, a third of the session timeout and the fastest
    /// publishing interval.
    fn period_for(&self, session: &Session) -> Duration {
        let mut period = self.configured.min(session.session_timeout() / 3);
        if let Some(publishing_interval) = session.min_publishing_interval() {
            period = period.min(publishing_interval);
        }
        period.max(Duration::from_millis(1))
    }

    async fn tick(&mut self, session: &Session) {
        let period = self.period_for(session);
        if period != self.period {
            self.period = period;
            self.interval = Self::make_interval(period);
        }
        self.interval.tick().await;
    }
}

struct SessionActivityLoop {
    inner: Arc<Session>,
    timer: KeepAliveTimer,
    max_missed_keep_alives: u32,
    missed: u32,
}

impl SessionActivityLoop {
    pub fn new(inner: Arc<Session>, keep_alive_interval: Duration, max_missed_keep_alives: u32) -> Self {
        Self {
            inner,
            timer: KeepAliveTimer::new(keep_alive_interval),
            max_missed_keep_alives,
            missed: 0,
        }
    }

    /// Reads the server state, a non-running server counts as a failure.
    async fn read_server_state(&self) -> Result<(), StatusCode> {
        let res = self
            .inner
            .read(
                &[ReadValueId {
                    node_id: VariableId::Server_ServerStatus_State.into(),
                    attribute_id: AttributeId::Value as u32,
                    index_range: Default::default(),
                    data_encoding: QualifiedName::null(),
                }],
                TimestampsToReturn::Server,
                1f64,
            )
            .await;

        let value = match res.map(|r| r.into_iter().next()) {
            Ok(Some(dv)) => dv,
            // A server bug, count it as a failure
            Ok(None) => return Err(StatusCode::BadUnknownResponse),
            Err(e) => return Err(e.status_code()),
        };

        let Some(status) = value.value.and_then(|v| v.as_i32()) else {
            return Err(StatusCode::BadUnknownResponse);
        };

        match status {
            // ServerState::Running
            0 => Ok(()),
            s => {
                session_warn!(self.inner, "Keep alive failed, non-running server state {s}");
                Err(StatusCode::BadServerHalted)
            }
        }
    }

    pub fn run(self) -> impl Stream<Item = SessionActivity> {
        futures::stream::unfold(self, |mut slf| async move {
            slf.timer.tick(&slf.inner).await;

            let activity = match slf.read_server_state().await {
                Ok(()) => {
                    slf.missed = 0;
                    SessionActivity::KeepAliveSucceeded
                }
                Err(e) => {
                    slf.missed += 1;
                    session_debug!(
                        slf.inner,
                        "Keep alive failed with {}, {} of {} missed",
                        e,
                        slf.missed,
                        slf.max_missed_keep_alives
                    );
                    if slf.missed >= slf.max_missed_keep_alives {
                        SessionActivity::SessionDead(e)
                    } else {
                        SessionActivity::KeepAliveFailed(e)
                    }
                }
            };

            // Nothing at all, publish responses included, for longer than the session timeout
            let activity = match activity {
                SessionActivity::SessionDead(_) => activity,
                _ if slf.inner.last_activity().elapsed() > slf.inner.session_timeout() => {
                    SessionActivity::SessionDead(StatusCode::BadTimeout)
                }
                _ => activity,
            };

            Some((activity, slf))
        })
    }
}

