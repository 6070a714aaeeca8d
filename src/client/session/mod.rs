// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

mod client;
mod connect;
mod event_loop;
mod registry;
mod services;
#[allow(clippy::module_inception)]
mod session;

macro_rules! session_warn {
    ($session: expr, $($arg:tt)*) =>  {
        warn!("{} {}", $session.session_id(), format!($($arg)*));
    }
}
pub(crate) use session_warn;

macro_rules! session_error {
    ($session: expr, $($arg:tt)*) =>  {
        error!("{} {}", $session.session_id(), format!($($arg)*));
    }
}
pub(crate) use session_error;

macro_rules! session_debug {
    ($session: expr, $($arg:tt)*) =>  {
        debug!("{} {}", $session.session_id(), format!($($arg)*));
    }
}
pub(crate) use session_debug;

macro_rules! session_trace {
    ($session: expr, $($arg:tt)*) =>  {
        trace!("{} {}", $session.session_id(), format!($($arg)*));
    }
}
pub(crate) use session_trace;

/// Evaluates to the `$variant` response once its service result is good. Any other outcome
/// returns an error from the enclosing function.
macro_rules! unpack_response {
    ($session:expr, $response:expr, $variant:ident, $service:literal) => {
        match $response {
            $crate::core::supported_message::SupportedMessage::$variant(response) => {
                $crate::client::process_service_result(&response.response_header)?;
                *response
            }
            response => {
                $crate::client::session::session_error!(
                    $session,
                    "{} got an unexpected response {:?}",
                    $service,
                    response
                );
                return Err($crate::client::process_unexpected_response(response).into());
            }
        }
    };
}
pub(crate) use unpack_response;

pub use client::Client;
pub use connect::SessionConnectMode;
pub use event_loop::{SessionActivity, SessionEventLoop, SessionPollResult};
pub use registry::SessionRegistry;
pub use services::subscriptions::{
    auto_queue_size, DataChangeCallback, EventCallback, MonitoredItem, MonitoredItemModification,
    MonitoredItemRequest, MonitoredItemSnapshot, MonitoredItemState, OnSubscriptionNotification, QueueSize,
    Subscription, SubscriptionActivity, SubscriptionCallbacks, SubscriptionSnapshot,
    SubscriptionState,
};
pub use session::{Session, SubscriptionRetention};

use crate::types::EndpointDescription;

use super::IdentityToken;

/// Everything needed to open a session with an endpoint.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// The endpoint
    pub endpoint: EndpointDescription,
    /// User identity token
    pub user_identity_token: IdentityToken,
    /// Preferred language locales
    pub preferred_locales: Vec<String>,
}

impl From<EndpointDescription> for SessionInfo {
    fn from(value: EndpointDescription) -> Self {
        Self {
            endpoint: value,
            user_identity_token: IdentityToken::Anonymous,
            preferred_locales: Vec::new(),
        }
    }
}
