// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The transport moves requests and responses between the session and a server: it frames,
//! chunks and secures outgoing messages and reassembles incoming ones.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{core::comms::secure_channel::SecureChannel, sync::RwLock, types::StatusCode};

mod channel;
mod core;
mod state;
pub mod tcp;

pub use channel::{AsyncSecureChannel, ChannelState, SecureChannelEventLoop};
pub(crate) use self::core::{OutgoingMessage, ResponseCallback};
pub use self::core::TransportPollResult;
pub(crate) use state::REQUESTED_LIFETIME;
pub use tcp::{TcpConnector, TransportConfiguration};

/// A connection that exchanges messages with a server while it is polled.
#[async_trait]
pub trait Transport: Send {
    /// Makes progress sending or receiving. Must be cancel safe.
    async fn poll(&mut self) -> TransportPollResult;
}

/// Opens transports to an endpoint.
#[async_trait]
pub(crate) trait Connector: Send + Sync {
    async fn connect(
        &self,
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: tokio::sync::mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<Box<dyn Transport>, StatusCode>;
}
