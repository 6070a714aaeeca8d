// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! A connection oriented façade over [`Client`] and [`Session`].
//!
//! [`OpcUaClient`] connects to one endpoint at a time and drives the session event loop on a
//! task of its own. Its operations return `Ok` with a status code per item whenever the server
//! answered, so a node that cannot be read is a bad status in the result and not an error.

use std::{sync::Arc, time::Duration};

use tokio::task::{AbortHandle, JoinHandle};

use crate::{
    core::comms::url::{hostname_from_url, url_matches_except_host},
    crypto::SecurityPolicy,
    types::{
        AttributeId, BrowseDescription, BrowseDirection, BrowseResult, ByteString,
        CallMethodResult, DataValue, EndpointDescription, MessageSecurityMode, NodeId,
        ReadValueId, ReferenceTypeId, StatusCode, TimestampsToReturn, UAString, VariableId,
        Variant, WriteValue,
    },
};

use super::{
    Client, Error, IdentityToken, MethodRouter, MonitoredItemRequest, MonitoredItemSnapshot,
    OnSubscriptionNotification, OperationUnsupported, PublishedNodes, Session,
    SessionEventLoop, SessionInfo, SessionRegistry,
};

/// Every attribute of a reference in a browse result
const BROWSE_RESULT_MASK_ALL: u32 = 0x3f;

/// Describes the endpoint to connect to and the identity to activate the session with.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDescriptor {
    pub url: String,
    pub security_mode: MessageSecurityMode,
    pub security_policy: SecurityPolicy,
    pub identity: IdentityToken,
    /// The certificate of the server. When it is null and the policy is not `None`, the
    /// endpoint is discovered with `GetEndpoints` on connect.
    pub server_certificate: ByteString,
}

impl EndpointDescriptor {
    /// An endpoint without security and an anonymous identity.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            security_mode: MessageSecurityMode::None,
            security_policy: SecurityPolicy::None,
            identity: IdentityToken::Anonymous,
            server_certificate: ByteString::null(),
        }
    }

    pub fn security(
        mut self,
        security_mode: MessageSecurityMode,
        security_policy: SecurityPolicy,
    ) -> Self {
        self.security_mode = security_mode;
        self.security_policy = security_policy;
        self
    }

    pub fn identity(mut self, identity: IdentityToken) -> Self {
        self.identity = identity;
        self
    }

    pub fn server_certificate(mut self, server_certificate: ByteString) -> Self {
        self.server_certificate = server_certificate;
        self
    }

    /// Fails for descriptors that can never connect, before anything goes on the wire.
    fn validate(&self) -> Result<(), Error> {
        if self.security_policy.is_deprecated() {
            return Err(OperationUnsupported::new(format!(
                "the deprecated security policy {}",
                self.security_policy
            ))
            .into());
        }
        if self.security_policy == SecurityPolicy::Unknown {
            return Err(Error::InvalidArgument("Unknown security policy".into()));
        }
        self.identity.ensure_supported()?;
        match (self.security_mode, self.security_policy) {
            (MessageSecurityMode::Invalid, _) => {
                Err(Error::InvalidArgument("Invalid security mode".into()))
            }
            (MessageSecurityMode::None, SecurityPolicy::None) => Ok(()),
            (MessageSecurityMode::None, _) | (_, SecurityPolicy::None) => {
                Err(Error::InvalidArgument(format!(
                    "Security mode {:?} cannot be used with policy {}",
                    self.security_mode, self.security_policy
                )))
            }
            _ => Ok(()),
        }
    }

    fn needs_discovery(&self) -> bool {
        self.security_policy != SecurityPolicy::None && self.server_certificate.is_null()
    }

    fn to_endpoint_description(&self) -> EndpointDescription {
        let mut endpoint = EndpointDescription::from(self.url.as_str());
        endpoint.security_mode = self.security_mode;
        endpoint.security_policy_uri = UAString::from(self.security_policy.to_uri());
        endpoint.server_certificate = self.server_certificate.clone();
        endpoint
    }

    fn same_endpoint(&self, url: &str) -> bool {
        let host = |u: &str| hostname_from_url(u).map(|h| h.to_lowercase());
        url_matches_except_host(&self.url, url) && host(&self.url) == host(url)
    }
}

/// A subscription created by [`OpcUaClient::subscribe`] and the items in it. Items the server
/// rejected are in the [`MonitoredItemState::Failed`](super::MonitoredItemState::Failed) state.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscribed {
    pub subscription_id: u32,
    pub publishing_interval: Duration,
    pub items: Vec<MonitoredItemSnapshot>,
}

/// Stops the event loop of a session that never got connected, and forgets the session. A
/// `connect` future dropped mid-way leaves nothing running.
struct StartGuard {
    event_loop: AbortHandle,
    registry: Arc<SessionRegistry>,
    session_id: u32,
    armed: bool,
}

impl StartGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Abandoning session {} before it connected", self.session_id);
            self.event_loop.abort();
            self.registry.remove(self.session_id);
        }
    }
}

struct Connection {
    session: Arc<Session>,
    event_loop: JoinHandle<StatusCode>,
    router: Arc<MethodRouter>,
}

pub struct OpcUaClient {
    client: Client,
    connection: Option<Connection>,
    /// Counts used for subscriptions created by the façade
    lifetime_count: u32,
    max_keep_alive_count: u32,
}

impl OpcUaClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            connection: None,
            lifetime_count: 60,
            max_keep_alive_count: 10,
        }
    }

    /// Sets the keep-alive and lifetime counts of subscriptions created from here on. The
    /// lifetime count must exceed the keep-alive count.
    pub fn subscription_counts(&mut self, max_keep_alive_count: u32, lifetime_count: u32) -> &mut Self {
        self.max_keep_alive_count = max_keep_alive_count;
        self.lifetime_count = lifetime_count;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The session, while connected.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.connection.as_ref().map(|c| c.session.clone())
    }

    /// The method router of the current session.
    pub fn router(&self) -> Option<Arc<MethodRouter>> {
        self.connection.as_ref().map(|c| c.router.clone())
    }

    fn connected(&self) -> Result<&Arc<Session>, Error> {
        self.connection
            .as_ref()
            .map(|c| &c.session)
            .ok_or_else(|| Error::State("Not connected".into()))
    }

    /// Connects and activates a session on the endpoint, returning once the session is usable.
    /// A failure that the retry policy gives up on, or any security failure, is returned.
    pub async fn connect(&mut self, descriptor: &EndpointDescriptor) -> Result<(), Error> {
        if self.connection.is_some() {
            return Err(Error::State("Already connected, close first".into()));
        }
        descriptor.validate()?;

        let endpoint = if descriptor.needs_discovery() {
            debug!("Discovering the certificate of {}", descriptor.url);
            let endpoints = self
                .client
                .get_server_endpoints_from_url(descriptor.url.as_str())
                .await?;
            Client::find_matching_endpoint(
                &endpoints,
                &descriptor.url,
                descriptor.security_policy,
                descriptor.security_mode,
            )
            .ok_or_else(|| {
                error!(
                    "Server at {} has no endpoint for {:?} / {}",
                    descriptor.url, descriptor.security_mode, descriptor.security_policy
                );
                Error::Security(StatusCode::BadSecurityPolicyRejected)
            })?
        } else {
            descriptor.to_endpoint_description()
        };

        let (session, event_loop) = self.client.new_session_from_info(SessionInfo {
            endpoint,
            user_identity_token: descriptor.identity.clone(),
            preferred_locales: self.client.config().preferred_locales.clone(),
        })?;
        let connection = Self::start(session, event_loop, &self.client).await?;
        self.connection = Some(connection);
        Ok(())
    }

    async fn start(
        session: Arc<Session>,
        event_loop: SessionEventLoop,
        client: &Client,
    ) -> Result<Connection, Error> {
        let mut event_loop = event_loop.spawn();
        let session_id = session.session_id();
        let guard = StartGuard {
            event_loop: event_loop.abort_handle(),
            registry: client.registry(),
            session_id,
            armed: true,
        };

        tokio::select! {
            connected = session.wait_for_connection() => {
                if !connected {
                    return Err(Error::State("Session closed while connecting".into()));
                }
            }
            r = &mut event_loop => {
                let status = r.unwrap_or(StatusCode::BadInternalError);
                error!("Session {} could not connect, {}", session_id, status);
                return Err(if status.is_good() {
                    Error::Transport(StatusCode::BadConnectionClosed)
                } else {
                    Error::from(status)
                });
            }
        }
        guard.disarm();

        info!("Session {} connected to {}", session_id, session.endpoint().endpoint_url);
        let router = Arc::new(MethodRouter::new(client.registry(), session_id));
        Ok(Connection {
            session,
            event_loop,
            router,
        })
    }

    /// Reads the value attribute of each node.
    pub async fn read(&self, node_ids: &[NodeId]) -> Result<Vec<DataValue>, Error> {
        let nodes_to_read: Vec<ReadValueId> = node_ids.iter().map(ReadValueId::from).collect();
        self.connected()?
            .read(&nodes_to_read, TimestampsToReturn::Both, 0.0)
            .await
    }

    /// Writes the value attribute of a node, returning the status of the write.
    pub async fn write(&self, node_id: &NodeId, value: impl Into<Variant>) -> Result<StatusCode, Error> {
        let write = WriteValue {
            node_id: node_id.clone(),
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            value: DataValue::value_only(value),
        };
        let mut results = self.connected()?.write(&[write]).await?;
        results
            .pop()
            .ok_or(Error::Protocol(StatusCode::BadUnknownResponse))
    }

    /// Browses the forward hierarchical references of a node, following continuation points
    /// to the end.
    pub async fn browse(&self, node_id: &NodeId) -> Result<BrowseResult, Error> {
        let description = BrowseDescription {
            node_id: node_id.clone(),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BROWSE_RESULT_MASK_ALL,
        };
        let mut results = self.connected()?.browse_all(&[description]).await?;
        results
            .pop()
            .ok_or(Error::Protocol(StatusCode::BadUnknownResponse))
    }

    /// Calls a method. A bad status in the result is the server rejecting the call.
    pub async fn call(
        &self,
        object_id: &NodeId,
        method_id: &NodeId,
        args: Vec<Variant>,
    ) -> Result<CallMethodResult, Error> {
        let input_arguments = if args.is_empty() { None } else { Some(args) };
        self.connected()?
            .call_one(object_id.clone(), method_id.clone(), input_arguments)
            .await
    }

    /// Creates a subscription holding `items`. The result lists every item with its client
    /// handle, including the ones the server rejected.
    pub async fn subscribe(
        &self,
        publishing_interval: Duration,
        items: Vec<MonitoredItemRequest>,
        callback: impl OnSubscriptionNotification + 'static,
    ) -> Result<Subscribed, Error> {
        let session = self.connected()?;
        if items.is_empty() {
            return Err(Error::InvalidArgument("No items to subscribe to".into()));
        }
        let subscription_id = session
            .create_subscription(
                publishing_interval,
                self.lifetime_count,
                self.max_keep_alive_count,
                0,
                0,
                true,
                callback,
            )
            .await?;
        let items = match session
            .create_monitored_items(subscription_id, TimestampsToReturn::Both, items)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                // The subscription has nothing in it, do not leave it behind
                let _ = session.delete_subscription(subscription_id).await;
                return Err(e);
            }
        };
        let publishing_interval = session
            .subscription_snapshot()
            .into_iter()
            .find(|s| s.subscription_id == subscription_id)
            .map(|s| s.publishing_interval)
            .unwrap_or(publishing_interval);
        Ok(Subscribed {
            subscription_id,
            publishing_interval,
            items,
        })
    }

    /// Subscribes to the nodes that a published nodes document lists for the connected
    /// endpoint. The nodes of each publishing interval go into a subscription of their own,
    /// with the callback `make_callback` returns for that interval.
    pub async fn subscribe_published_nodes<C>(
        &self,
        document: &PublishedNodes,
        mut make_callback: impl FnMut(Duration) -> C,
    ) -> Result<Vec<Subscribed>, Error>
    where
        C: OnSubscriptionNotification + 'static,
    {
        let session = self.connected()?;
        let endpoint_url = session.endpoint().endpoint_url.as_ref().to_string();
        let descriptor = EndpointDescriptor::new(endpoint_url.clone());

        let entries: Vec<_> = document
            .by_endpoint()
            .into_iter()
            .filter(|entry| {
                let ours = descriptor.same_endpoint(&entry.endpoint_url);
                if !ours {
                    debug!("Skipping published nodes for {}", entry.endpoint_url);
                }
                ours
            })
            .collect();

        let needs_namespaces = entries.iter().flat_map(|e| e.opc_nodes.iter()).any(|n| {
            n.expanded_node_id.is_some() || n.id.as_deref().is_some_and(|id| id.starts_with("nsu="))
        });
        let namespaces = if needs_namespaces {
            self.namespace_array().await?
        } else {
            Vec::new()
        };

        let mut subscribed = Vec::new();
        for entry in &entries {
            for (publishing_interval, nodes) in entry.groups() {
                let items = nodes
                    .iter()
                    .map(|node| node.monitored_item_request(&namespaces))
                    .collect::<Result<Vec<_>, _>>()?;
                subscribed.push(
                    self.subscribe(publishing_interval, items, make_callback(publishing_interval))
                        .await?,
                );
            }
        }
        Ok(subscribed)
    }

    /// The namespace array of the server, index 0 being the OPC UA namespace.
    pub async fn namespace_array(&self) -> Result<Vec<String>, Error> {
        let node_id: NodeId = VariableId::Server_NamespaceArray.into();
        let mut values = self.read(&[node_id]).await?;
        let value = values
            .pop()
            .ok_or(Error::Protocol(StatusCode::BadUnknownResponse))?;
        if let Some(status) = value.status.filter(|s| s.is_bad()) {
            return Err(Error::ServiceFault(status));
        }
        match value.value {
            Some(Variant::Array(array)) => Ok(array
                .values
                .unwrap_or_default()
                .into_iter()
                .map(|v| match v {
                    Variant::String(s) => s.as_ref().to_string(),
                    other => other.to_string(),
                })
                .collect()),
            _ => Err(Error::Protocol(StatusCode::BadTypeMismatch)),
        }
    }

    /// Closes the session, deleting its subscriptions, and stops the event loop. Closing when
    /// not connected does nothing.
    pub async fn close(&mut self) -> Result<(), Error> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        let session_id = connection.session.session_id();
        let result = connection.session.disconnect().await;
        match connection.event_loop.await {
            Ok(status) if status.is_bad() => {
                debug!("Session {} event loop ended with {}", session_id, status)
            }
            Ok(_) => {}
            Err(e) => warn!("Session {} event loop failed, {}", session_id, e),
        }
        self.client.registry().remove(session_id);
        result.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_validation() {
        let d = EndpointDescriptor::new("opc.tcp://localhost:4840/");
        assert!(d.validate().is_ok());
        assert!(!d.needs_discovery());

        let d = d.security(MessageSecurityMode::SignAndEncrypt, SecurityPolicy::Basic256);
        assert!(matches!(d.validate(), Err(Error::Unsupported(_))));

        let d = d.security(MessageSecurityMode::None, SecurityPolicy::Basic256Sha256);
        assert!(matches!(d.validate(), Err(Error::InvalidArgument(_))));

        let d = d.security(MessageSecurityMode::Sign, SecurityPolicy::Basic256Sha256);
        assert!(d.validate().is_ok());
        assert!(d.needs_discovery());
        assert!(!d
            .clone()
            .server_certificate(ByteString::from(vec![1u8, 2, 3]))
            .needs_discovery());

        let d = d.identity(IdentityToken::IssuedToken(ByteString::from(vec![0u8])));
        assert!(matches!(d.validate(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn same_endpoint_compares_host() {
        let d = EndpointDescriptor::new("opc.tcp://plc-1:4840/");
        assert!(d.same_endpoint("opc.tcp://PLC-1:4840/"));
        assert!(!d.same_endpoint("opc.tcp://plc-2:4840/"));
        assert!(!d.same_endpoint("opc.tcp://plc-1:4841/"));
    }
}
