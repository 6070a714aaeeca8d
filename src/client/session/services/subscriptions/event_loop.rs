// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{collections::VecDeque, sync::Arc, time::Instant};

use futures::{
    future::{BoxFuture, Either},
    stream::FuturesUnordered,
    FutureExt, Stream, StreamExt,
};

use crate::{
    client::{
        session::{session_debug, session_error, session_warn},
        Error, Session,
    },
    types::{PublishResponse, StatusCode},
};

/// An event on the subscription event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionActivity {
    /// A notification was delivered in sequence.
    Publish {
        subscription_id: u32,
        sequence_number: u32,
    },
    /// The subscription sent a keep-alive.
    KeepAlive { subscription_id: u32 },
    /// A missing notification was fetched again and delivered.
    Republished {
        subscription_id: u32,
        sequence_number: u32,
    },
    /// A missing notification could not be recovered.
    DataLossDetected {
        subscription_id: u32,
        sequence_number: u32,
        status: StatusCode,
    },
    /// A duplicate or stale notification, or one for a subscription that was deleted, was
    /// acknowledged and dropped.
    Discarded {
        subscription_id: u32,
        sequence_number: u32,
    },
    /// Nothing was heard from the subscription for longer than its keep-alive period.
    KeepAliveStopped { subscription_id: u32 },
    /// A subscription that had stopped sent something again.
    KeepAliveResumed { subscription_id: u32 },
    /// A publish request failed, either due to a timeout or an error.
    /// The publish request is typically replaced.
    PublishFailed(StatusCode),
    /// The server has no subscription for this session. Publishing pauses briefly.
    NoSubscription,
    /// The transport failed while publish requests were outstanding.
    ChannelFaulted(StatusCode),
}

type PublishFuture = BoxFuture<'static, Result<PublishResponse, StatusCode>>;

/// An event loop that keeps publish requests outstanding for the subscriptions of a session.
///
/// Every completed request is replaced by one new request so the number in flight stays at
/// the target of the subscription state. Responses are processed one at a time, in the order
/// they complete, so notifications of a subscription are delivered in sequence.
pub struct SubscriptionEventLoop {
    session: Arc<Session>,
    trigger_publish_recv: tokio::sync::watch::Receiver<Instant>,
    last_external_trigger: Instant,
}

impl SubscriptionEventLoop {
    /// Create a new subscription event loop for `session`
    ///
    /// # Arguments
    ///
    ///  * `session` - A shared reference to a [Session].
    ///  * `trigger_publish_recv` - A channel used to wake the loop outside of its own
    ///    schedule, for example when a new subscription is created.
    pub fn new(
        session: Arc<Session>,
        trigger_publish_recv: tokio::sync::watch::Receiver<Instant>,
    ) -> Self {
        let last_external_trigger = *trigger_publish_recv.borrow();
        session.reset_keep_alive_watchdogs();
        Self {
            last_external_trigger,
            trigger_publish_recv,
            session,
        }
    }

    /// Run the subscription event loop, returning a stream that produces
    /// [SubscriptionActivity] enums, reporting activity to the session event loop.
    pub fn run(self) -> impl Stream<Item = SubscriptionActivity> {
        futures::stream::unfold(
            (
                self,
                FuturesUnordered::<PublishFuture>::new(),
                VecDeque::<SubscriptionActivity>::new(),
            ),
            |(mut slf, mut futures, mut pending)| async move {
                loop {
                    if let Some(activity) = pending.pop_front() {
                        return Some((activity, (slf, futures, pending)));
                    }

                    let backoff = slf.session.publish_backoff();
                    if backoff.is_none() && !slf.session.is_closing() {
                        let target = slf.session.publish_target();
                        while futures.len() < target {
                            futures.push(slf.static_publish());
                        }
                    }

                    let watchdog_fut = match slf.session.next_keep_alive_deadline() {
                        Some(deadline) => Either::Left(tokio::time::sleep_until(deadline.into())),
                        None => Either::Right(futures::future::pending::<()>()),
                    };
                    let backoff_fut = match backoff {
                        Some(until) => Either::Left(tokio::time::sleep_until(until.into())),
                        None => Either::Right(futures::future::pending::<()>()),
                    };
                    // An empty FuturesUnordered yields `None` at once
                    let next_publish_fut = if futures.is_empty() {
                        Either::Left(futures::future::pending())
                    } else {
                        Either::Right(futures.next())
                    };
                    let mut recv = slf.trigger_publish_recv.clone();
                    let last_trigger = slf.last_external_trigger;
                    let trigger_fut = async move {
                        recv.wait_for(|i| *i > last_trigger).await.map(|v| *v)
                    };

                    tokio::select! {
                        v = trigger_fut => {
                            if let Ok(v) = v {
                                slf.last_external_trigger = v;
                            }
                        }
                        _ = watchdog_fut => {
                            for subscription_id in slf.session.expire_keep_alives() {
                                session_warn!(
                                    slf.session,
                                    "Subscription {} stopped sending keep-alives",
                                    subscription_id
                                );
                                pending.push_back(SubscriptionActivity::KeepAliveStopped { subscription_id });
                            }
                        }
                        _ = backoff_fut => {}
                        res = next_publish_fut => {
                            match res {
                                Some(Ok(response)) => {
                                    let activity = slf.session.process_publish_response(response).await;
                                    pending.extend(activity);
                                }
                                Some(Err(e)) => {
                                    if let Some(activity) = slf.on_publish_error(e) {
                                        pending.push_back(activity);
                                    }
                                }
                                None => {}
                            }
                        }
                    }
                }
            },
        )
    }

    fn on_publish_error(&self, e: StatusCode) -> Option<SubscriptionActivity> {
        match e {
            StatusCode::BadTimeout => {
                session_debug!(self.session, "Publish request timed out, sending another");
                Some(SubscriptionActivity::PublishFailed(e))
            }
            StatusCode::BadTooManyPublishRequests => {
                let target = self.session.reduce_publish_target();
                session_debug!(
                    self.session,
                    "Server returned BadTooManyPublishRequests, keeping {} outstanding",
                    target
                );
                Some(SubscriptionActivity::PublishFailed(e))
            }
            StatusCode::BadNoSubscription => {
                session_debug!(
                    self.session,
                    "Server has no subscription for this session, backing off"
                );
                self.session.back_off_publish();
                Some(SubscriptionActivity::NoSubscription)
            }
            StatusCode::BadSessionClosed | StatusCode::BadSessionIdInvalid => {
                session_error!(self.session, "Publish response indicates session is dead");
                Some(SubscriptionActivity::PublishFailed(e))
            }
            _ if matches!(Error::from(e), Error::Transport(_)) => {
                if self.session.is_closing() {
                    None
                } else {
                    session_warn!(self.session, "Publish failed on the transport, {}", e);
                    self.session.back_off_publish();
                    Some(SubscriptionActivity::ChannelFaulted(e))
                }
            }
            _ => Some(SubscriptionActivity::PublishFailed(e)),
        }
    }

    fn static_publish(&self) -> PublishFuture {
        let inner_session = self.session.clone();
        async move { inner_session.publish().await }.boxed()
    }
}
