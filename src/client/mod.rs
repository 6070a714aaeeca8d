// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The OPC UA client.
//!
//! A [`Client`] is created from a [`ClientConfig`], usually through the [`ClientBuilder`]. It
//! creates a [`Session`] plus a [`SessionEventLoop`] for an endpoint. Nothing happens until the
//! event loop is polled, it connects, keeps the session alive, reconnects with a bounded backoff
//! and drives the publish requests of the subscriptions.
//!
//! Most callers use the [`OpcUaClient`] façade which wraps all of this behind
//! `connect`/`read`/`write`/`browse`/`call`/`subscribe`/`close`.

use std::path::PathBuf;

use crate::{
    core::supported_message::SupportedMessage,
    types::{ByteString, ResponseHeader, StatusCode},
};

mod builder;
mod config;
mod error;
mod facade;
mod published_nodes;
mod retry;
mod router;
mod session;
mod transport;

#[cfg(test)]
mod tests;

pub use builder::ClientBuilder;
pub use config::{
    ClientConfig, ClientEndpoint, ClientUserToken, DecodingLimits, Performance,
    SessionTimeoutBounds, ANONYMOUS_USER_TOKEN_ID, CONFIG_VERSION,
};
pub use error::{Error, OperationUnsupported};
pub use facade::{EndpointDescriptor, OpcUaClient, Subscribed};
pub use published_nodes::{
    OpcAuthenticationMode, OpcNode, PublishedNode, PublishedNodes, PUBLISHED_NODES_VERSION,
};
pub use retry::SessionRetryPolicy;
pub use router::{MethodRoute, MethodRouteResult, MethodRouter};
pub use session::{
    auto_queue_size, Client, DataChangeCallback, EventCallback, MonitoredItem,
    MonitoredItemModification, MonitoredItemRequest,
    MonitoredItemSnapshot, MonitoredItemState, OnSubscriptionNotification, QueueSize, Session,
    SessionActivity, SessionConnectMode, SessionEventLoop, SessionInfo, SessionPollResult,
    SessionRegistry, Subscription, SubscriptionActivity, SubscriptionCallbacks,
    SubscriptionRetention, SubscriptionSnapshot, SubscriptionState,
};
pub use transport::{
    AsyncSecureChannel, ChannelState, TcpConnector, TransportConfiguration, TransportPollResult,
};

/// The identity the session is activated with.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityToken {
    /// Anonymous identity token
    Anonymous,
    /// User name and a password
    UserName(String, String),
    /// X509 cert, a path to the cert.der and to the private.pem
    X509(PathBuf, PathBuf),
    /// A token issued by an external authority. Recognised but not supported.
    IssuedToken(ByteString),
}

impl IdentityToken {
    /// Fails for identities this client cannot activate a session with.
    pub fn ensure_supported(&self) -> Result<(), OperationUnsupported> {
        match self {
            IdentityToken::IssuedToken(_) => Err(OperationUnsupported::new(
                "issued token user identities",
            )),
            _ => Ok(()),
        }
    }
}

/// A service result that is bad fails the whole request.
pub(crate) fn process_service_result(response_header: &ResponseHeader) -> Result<(), StatusCode> {
    if response_header.service_result.is_bad() {
        info!(
            "Received a bad service result {} from the request",
            response_header.service_result
        );
        Err(response_header.service_result)
    } else {
        Ok(())
    }
}

/// The status code for a response of the wrong type. A service fault carries its own.
pub(crate) fn process_unexpected_response(response: SupportedMessage) -> StatusCode {
    match response {
        SupportedMessage::ServiceFault(service_fault) => {
            error!(
                "Received a service fault of {} for the request",
                service_fault.response_header.service_result
            );
            service_fault.response_header.service_result
        }
        _ => {
            error!("Received an unexpected response to the request");
            StatusCode::BadUnknownResponse
        }
    }
}
