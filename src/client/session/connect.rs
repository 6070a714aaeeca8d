// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! A single connection attempt: a secure channel, then a session on it. Retrying and backing
//! off is up to the session event loop.

use std::{future::Future, sync::Arc};

use crate::{
    client::transport::{SecureChannelEventLoop, TransportPollResult},
    types::{NodeId, StatusCode},
};

use super::{session_debug, session_warn, Session};

/// How a successful attempt left the session on the server.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionConnectMode {
    /// The server knew nothing of us, a session with this id was created
    NewSession(NodeId),
    /// The session from before the connection was lost was activated again
    ReactivatedSession(NodeId),
}

/// Result of running session services while the channel is polled.
enum Driven<T> {
    Finished(Result<T, StatusCode>),
    /// The transport went away first, with this status
    ChannelClosed(StatusCode),
}

/// Runs `work` to completion while polling the channel it talks over. Requests only get their
/// responses while the transport is polled.
async fn drive<T>(
    channel: &mut SecureChannelEventLoop,
    work: impl Future<Output = Result<T, StatusCode>>,
) -> Driven<T> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            result = &mut work => return Driven::Finished(result),
            polled = channel.poll() => {
                if let TransportPollResult::Closed(status) = polled {
                    let status = if status.is_good() { StatusCode::BadConnectionClosed } else { status };
                    return Driven::ChannelClosed(status);
                }
            }
        }
    }
}

pub(super) struct SessionConnector {
    session: Arc<Session>,
}

impl SessionConnector {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Opens a channel and sets the session up on it. Subscriptions of an earlier session are
    /// transferred or created again before the channel is handed back.
    pub async fn try_connect(
        &self,
    ) -> Result<(SecureChannelEventLoop, SessionConnectMode), StatusCode> {
        let mut channel = self.session.channel.connect().await?;
        match drive(&mut channel, self.establish()).await {
            Driven::Finished(Ok(mode)) => Ok((channel, mode)),
            Driven::Finished(Err(status)) => {
                self.abandon(channel).await;
                Err(status)
            }
            Driven::ChannelClosed(status) => Err(status),
        }
    }

    async fn establish(&self) -> Result<SessionConnectMode, StatusCode> {
        let mode = if self.session.session_id.load().is_null() {
            self.new_session().await?
        } else {
            self.resume_session().await?
        };
        session_debug!(self.session, "Session connected, {:?}", mode);

        // Publishing starts only after this, with the final subscription ids
        self.session.transfer_subscriptions_from_old_session().await;
        Ok(mode)
    }

    async fn new_session(&self) -> Result<SessionConnectMode, StatusCode> {
        let session_id = self.session.create_session().await?;
        self.session.activate_session().await?;
        Ok(SessionConnectMode::NewSession(session_id))
    }

    /// A server that dropped the session while we were away gets a new one instead.
    async fn resume_session(&self) -> Result<SessionConnectMode, StatusCode> {
        match self.session.activate_session().await {
            Ok(()) => Ok(SessionConnectMode::ReactivatedSession(
                self.session.server_session_id(),
            )),
            Err(status) => {
                session_warn!(
                    self.session,
                    "Session could not be activated again, {}, creating a new one",
                    status
                );
                self.session.reset();
                self.new_session().await
            }
        }
    }

    /// Closes a channel the session could not be set up on, and waits for its transport to end.
    async fn abandon(&self, mut channel: SecureChannelEventLoop) {
        self.session.channel.close_channel().await;
        while !matches!(channel.poll().await, TransportPollResult::Closed(_)) {}
    }
}
