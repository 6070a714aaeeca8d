// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{str::FromStr, sync::Arc};

use tokio::{pin, select};

use crate::{
    client::{
        retry::SessionRetryPolicy,
        transport::{Connector, TcpConnector, TransportPollResult},
        AsyncSecureChannel, ClientConfig, ClientEndpoint, Error, IdentityToken,
        OperationUnsupported,
    },
    core::{
        comms::url::{
            hostname_from_url, is_opc_ua_binary_url, server_url_from_endpoint_url,
            url_matches_except_host, url_with_replaced_hostname,
        },
        config::Config,
        supported_message::SupportedMessage,
    },
    crypto::{CertificateStore, SecurityPolicy},
    sync::RwLock,
    types::{EndpointDescription, GetEndpointsRequest, MessageSecurityMode, StatusCode, UAString},
};

use crate::client::{process_service_result, process_unexpected_response};

use super::{Session, SessionEventLoop, SessionInfo, SessionRegistry};

/// Creates sessions from a [`ClientConfig`]. Every session shares the client's certificate
/// store and is entered in its registry.
pub struct Client {
    config: ClientConfig,
    certificate_store: Arc<RwLock<CertificateStore>>,
    session_retry_policy: SessionRetryPolicy,
    connector: Arc<dyn Connector>,
    registry: Arc<SessionRegistry>,
}

fn log_endpoints(endpoints: &[EndpointDescription]) {
    for e in endpoints {
        debug!(
            "Server endpoint {} {} {:?}",
            e.endpoint_url,
            SecurityPolicy::from_uri(e.security_policy_uri.as_ref()),
            e.security_mode
        );
    }
}

impl Client {
    /// Opens the certificate store and loads the application certificate, creating one if
    /// configured to. No connection is made.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    pub(crate) fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let x509_data = config
            .create_sample_keypair
            .then(|| config.application_description());
        let (mut certificate_store, cert, pkey) = CertificateStore::new_with_x509_data(
            &config.pki_dir,
            false,
            config.certificate_path.as_deref(),
            config.private_key_path.as_deref(),
            x509_data,
        );
        if cert.is_none() || pkey.is_none() {
            error!("No application certificate and private key, only endpoints without security will work");
        }
        certificate_store.set_skip_verify_certs(!config.verify_server_certs);
        certificate_store.set_trust_unknown_certs(config.auto_accept_untrusted);

        Self {
            session_retry_policy: config.session_retry_policy(),
            config,
            certificate_store: Arc::new(RwLock::new(certificate_store)),
            connector,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Every session this client created, by session id.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub(crate) fn certificate_store(&self) -> &Arc<RwLock<CertificateStore>> {
        &self.certificate_store
    }

    /// Asks the default endpoint's server for its endpoints, then creates a session for the
    /// configured endpoint `endpoint_id`, or the default endpoint when `None`.
    pub async fn connect_to_endpoint_id(
        &self,
        endpoint_id: Option<&str>,
    ) -> Result<(Arc<Session>, SessionEventLoop), Error> {
        let endpoints = self.get_server_endpoints().await.map_err(|status| {
            error!("GetEndpoints failed, {}", status);
            Error::from(status)
        })?;
        log_endpoints(&endpoints);
        match endpoint_id {
            Some(endpoint_id) => self.new_session_from_id(endpoint_id, &endpoints),
            None => self.new_session(&endpoints),
        }
    }

    /// Creates a session for an endpoint that is not in the configuration. The server is asked
    /// for its endpoints and the one with the same policy and mode is used, so that the session
    /// has the server's certificate.
    ///
    /// The session is only created on the server once the event loop runs.
    pub async fn new_session_from_endpoint(
        &self,
        endpoint: impl Into<EndpointDescription>,
        user_identity_token: IdentityToken,
    ) -> Result<(Arc<Session>, SessionEventLoop), Error> {
        let endpoint = endpoint.into();
        let endpoint_url = endpoint.endpoint_url.as_ref();
        let security_policy = SecurityPolicy::from_uri(endpoint.security_policy_uri.as_ref());
        let server_endpoints = self
            .get_server_endpoints_from_url(endpoint_url)
            .await
            .map_err(|status| {
                error!("GetEndpoints failed, {}", status);
                Error::from(status)
            })?;
        Self::ensure_policy_supported(security_policy)?;

        let Some(server_endpoint) = Self::find_matching_endpoint(
            &server_endpoints,
            endpoint_url,
            security_policy,
            endpoint.security_mode,
        ) else {
            error!("Server has no endpoint matching {}", endpoint_url);
            return Err(Error::ServiceFault(StatusCode::BadTcpEndpointUrlInvalid));
        };
        self.new_session_from_info(SessionInfo {
            endpoint: server_endpoint,
            user_identity_token,
            preferred_locales: self.config.preferred_locales.clone(),
        })
    }

    /// Creates a session for exactly the endpoint in `session_info`, without discovery. The
    /// returned event loop has to run for the session to connect.
    pub fn new_session_from_info(
        &self,
        session_info: impl Into<SessionInfo>,
    ) -> Result<(Arc<Session>, SessionEventLoop), Error> {
        let session_info = session_info.into();
        let endpoint = &session_info.endpoint;
        if !is_opc_ua_binary_url(endpoint.endpoint_url.as_ref()) {
            return Err(Error::InvalidArgument(format!(
                "{} is not an opc.tcp url",
                endpoint.endpoint_url
            )));
        }
        Self::ensure_policy_supported(SecurityPolicy::from_uri(
            endpoint.security_policy_uri.as_ref(),
        ))?;
        session_info.user_identity_token.ensure_supported()?;

        let (session, event_loop) = Session::new(
            self.certificate_store.clone(),
            session_info,
            self.config.session_name.clone().into(),
            self.config.application_description(),
            self.session_retry_policy.clone(),
            self.config.decoding_options(),
            &self.config,
            self.connector.clone(),
        );
        self.registry.register(&session);
        Ok((session, event_loop))
    }

    /// A session for the configured default endpoint, matched against `endpoints`.
    pub fn new_session(
        &self,
        endpoints: &[EndpointDescription],
    ) -> Result<(Arc<Session>, SessionEventLoop), Error> {
        let client_endpoint = self.config.default_endpoint()?;
        let session_info = self.session_info_for_endpoint(client_endpoint, endpoints)?;
        self.new_session_from_info(session_info)
    }

    /// A session for the configured endpoint `endpoint_id`, matched against `endpoints`.
    pub fn new_session_from_id(
        &self,
        endpoint_id: impl Into<String>,
        endpoints: &[EndpointDescription],
    ) -> Result<(Arc<Session>, SessionEventLoop), Error> {
        let endpoint_id = endpoint_id.into();
        let client_endpoint = self
            .config
            .endpoints
            .get(&endpoint_id)
            .ok_or_else(|| Error::Config(format!("No endpoint with id {}", endpoint_id)))?;
        let session_info = self.session_info_for_endpoint(client_endpoint, endpoints)?;
        self.new_session_from_info(session_info)
    }

    fn session_info_for_endpoint(
        &self,
        client_endpoint: &ClientEndpoint,
        endpoints: &[EndpointDescription],
    ) -> Result<SessionInfo, Error> {
        let url = &client_endpoint.url;
        let security_policy = client_endpoint.security_policy();
        if security_policy == SecurityPolicy::Unknown {
            return Err(Error::Config(format!(
                "Endpoint {} has the invalid security policy {}",
                url, client_endpoint.security_policy
            )));
        }
        Self::ensure_policy_supported(security_policy)?;
        let security_mode = client_endpoint.security_mode();
        if security_mode == MessageSecurityMode::Invalid {
            return Err(Error::Config(format!(
                "Endpoint {} has the invalid security mode {}",
                url, client_endpoint.security_mode
            )));
        }

        let endpoint = Self::find_matching_endpoint(endpoints, url, security_policy, security_mode)
            .ok_or_else(|| {
                Error::Config(format!(
                    "The server has no endpoint {} with {} / {:?}",
                    url, security_policy, security_mode
                ))
            })?;
        let user_identity_token = self
            .config
            .client_identity_token(&client_endpoint.user_token_id)
            .ok_or_else(|| {
                Error::Config(format!("No user token {}", client_endpoint.user_token_id))
            })?;

        info!("Session for {} with {} / {:?}", url, security_policy, security_mode);
        Ok(SessionInfo {
            endpoint,
            user_identity_token,
            preferred_locales: self.config.preferred_locales.clone(),
        })
    }

    /// Deprecated policies are refused as unsupported rather than invalid.
    fn ensure_policy_supported(security_policy: SecurityPolicy) -> Result<(), Error> {
        if security_policy.is_deprecated() {
            return Err(OperationUnsupported::new(format!(
                "the deprecated security policy {}",
                security_policy
            ))
            .into());
        }
        if !security_policy.is_supported() {
            return Err(Error::InvalidArgument(format!(
                "Security policy {} is not recognised",
                security_policy
            )));
        }
        Ok(())
    }

    /// A channel with no session behind it, for discovery.
    fn channel_from_session_info(&self, session_info: SessionInfo) -> AsyncSecureChannel {
        AsyncSecureChannel::new(
            self.certificate_store.clone(),
            session_info,
            self.config.decoding_options(),
            self.config.performance.ignore_clock_skew,
            Arc::default(),
            self.config.transport_configuration(),
            self.connector.clone(),
        )
    }

    /// The endpoints of the server behind the configured default endpoint.
    pub async fn get_server_endpoints(&self) -> Result<Vec<EndpointDescription>, StatusCode> {
        let default_endpoint = self.config.default_endpoint().map_err(|_| {
            error!("No default endpoint to ask for endpoints");
            StatusCode::BadConfigurationError
        })?;
        let server_url = server_url_from_endpoint_url(&default_endpoint.url).map_err(|_| {
            error!("No server url in {}", default_endpoint.url);
            StatusCode::BadTcpEndpointUrlInvalid
        })?;
        self.get_server_endpoints_from_url(server_url).await
    }

    async fn request_endpoints(
        &self,
        endpoint_url: &UAString,
        channel: &AsyncSecureChannel,
    ) -> Result<Vec<EndpointDescription>, StatusCode> {
        let timeout = self.config.request_timeout();
        let request = GetEndpointsRequest {
            request_header: channel.make_request_header(timeout),
            endpoint_url: endpoint_url.clone(),
            locale_ids: None,
            profile_uris: None,
        };
        match channel.send(request, timeout).await? {
            SupportedMessage::GetEndpointsResponse(response) => {
                process_service_result(&response.response_header)?;
                Ok(response.endpoints.unwrap_or_default())
            }
            response => Err(process_unexpected_response(response)),
        }
    }

    /// The endpoints of the server at `server_url`, over a channel without security that is
    /// closed again afterwards.
    pub async fn get_server_endpoints_from_url(
        &self,
        server_url: impl Into<String>,
    ) -> Result<Vec<EndpointDescription>, StatusCode> {
        let server_url = server_url.into();
        if !is_opc_ua_binary_url(&server_url) {
            return Err(StatusCode::BadTcpEndpointUrlInvalid);
        }
        let endpoint = EndpointDescription::from(server_url.as_ref());
        let endpoint_url = endpoint.endpoint_url.clone();
        let channel = self.channel_from_session_info(SessionInfo {
            endpoint,
            user_identity_token: IdentityToken::Anonymous,
            preferred_locales: Vec::new(),
        });
        let mut event_loop = channel.connect().await?;

        let request = self.request_endpoints(&endpoint_url, &channel);
        pin!(request);
        let endpoints = loop {
            select! {
                endpoints = &mut request => break endpoints,
                polled = event_loop.poll() => {
                    if let TransportPollResult::Closed(status) = polled {
                        return Err(if status.is_good() { StatusCode::BadConnectionClosed } else { status });
                    }
                }
            }
        };

        channel.close_channel().await;
        while !matches!(event_loop.poll().await, TransportPollResult::Closed(_)) {}
        endpoints
    }

    /// The endpoint of `endpoints` with the given policy and mode whose url matches
    /// `endpoint_url` apart from the host. Servers often advertise a host name the client
    /// cannot resolve, so the result carries the host of `endpoint_url`.
    pub fn find_matching_endpoint(
        endpoints: &[EndpointDescription],
        endpoint_url: &str,
        security_policy: SecurityPolicy,
        security_mode: MessageSecurityMode,
    ) -> Option<EndpointDescription> {
        if security_policy == SecurityPolicy::Unknown {
            error!("An unknown security policy matches no endpoint");
            return None;
        }
        let mut endpoint = endpoints
            .iter()
            .find(|e| {
                e.security_mode == security_mode
                    && SecurityPolicy::from_uri(e.security_policy_uri.as_ref()) == security_policy
                    && url_matches_except_host(endpoint_url, e.endpoint_url.as_ref())
            })?
            .clone();
        let hostname = hostname_from_url(endpoint_url).ok()?;
        endpoint.endpoint_url =
            url_with_replaced_hostname(endpoint.endpoint_url.as_ref(), &hostname)
                .ok()?
                .into();
        Some(endpoint)
    }

    /// The most secure endpoint this client can use.
    pub fn best_endpoint(endpoints: &[EndpointDescription]) -> Option<&EndpointDescription> {
        endpoints
            .iter()
            .filter(|e| Self::is_supported_endpoint(e))
            .max_by_key(|e| e.security_level)
    }

    pub fn is_supported_endpoint(endpoint: &EndpointDescription) -> bool {
        endpoint.security_mode != MessageSecurityMode::Invalid
            && SecurityPolicy::from_str(endpoint.security_policy_uri.as_ref())
                .is_ok_and(|policy| policy.is_supported())
    }
}

#[cfg(test)]
mod tests {
    use crate::types::ByteString;

    use super::*;

    fn endpoint(url: &str, policy: SecurityPolicy, mode: MessageSecurityMode, level: u8) -> EndpointDescription {
        let mut e = EndpointDescription::from(url);
        e.security_policy_uri = UAString::from(policy.to_uri());
        e.security_mode = mode;
        e.security_level = level;
        e.server_certificate = ByteString::null();
        e
    }

    #[test]
    fn matching_endpoint_replaces_hostname() {
        let endpoints = vec![
            endpoint("opc.tcp://server-internal:4840/", SecurityPolicy::None, MessageSecurityMode::None, 0),
            endpoint(
                "opc.tcp://server-internal:4840/",
                SecurityPolicy::Basic256Sha256,
                MessageSecurityMode::SignAndEncrypt,
                10,
            ),
        ];
        let found = Client::find_matching_endpoint(
            &endpoints,
            "opc.tcp://10.0.0.5:4840/",
            SecurityPolicy::Basic256Sha256,
            MessageSecurityMode::SignAndEncrypt,
        )
        .unwrap();
        assert_eq!(found.endpoint_url.as_ref(), "opc.tcp://10.0.0.5:4840/");
        assert_eq!(found.security_level, 10);
    }

    #[test]
    fn unknown_policy_matches_nothing() {
        let endpoints = vec![endpoint(
            "opc.tcp://localhost:4840/",
            SecurityPolicy::None,
            MessageSecurityMode::None,
            0,
        )];
        assert!(Client::find_matching_endpoint(
            &endpoints,
            "opc.tcp://localhost:4840/",
            SecurityPolicy::Unknown,
            MessageSecurityMode::None,
        )
        .is_none());
    }

    #[test]
    fn best_endpoint_skips_deprecated_policies() {
        let endpoints = vec![
            endpoint("opc.tcp://localhost:4840/", SecurityPolicy::None, MessageSecurityMode::None, 0),
            endpoint(
                "opc.tcp://localhost:4840/",
                SecurityPolicy::Basic256,
                MessageSecurityMode::SignAndEncrypt,
                50,
            ),
            endpoint(
                "opc.tcp://localhost:4840/",
                SecurityPolicy::Aes256Sha256RsaPss,
                MessageSecurityMode::Sign,
                20,
            ),
        ];
        let best = Client::best_endpoint(&endpoints).unwrap();
        assert_eq!(
            SecurityPolicy::from_uri(best.security_policy_uri.as_ref()),
            SecurityPolicy::Aes256Sha256RsaPss
        );
    }

    #[test]
    fn deprecated_policy_is_unsupported() {
        assert!(matches!(
            Client::ensure_policy_supported(SecurityPolicy::Basic128Rsa15),
            Err(Error::Unsupported(_))
        ));
        assert!(Client::ensure_policy_supported(SecurityPolicy::None).is_ok());
    }
}
