// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{path::PathBuf, time::Duration};

use crate::core::config::Config;

use super::{
    config::SessionTimeoutBounds, Client, ClientConfig, ClientEndpoint, ClientUserToken, Error,
    OpcUaClient,
};

/// Generates a builder method that sets one config field, converting the argument first when
/// a converter is named.
macro_rules! setter {
    ($(#[$doc:meta])* $name:ident: $ty:ty => $($field:ident).+) => {
        $(#[$doc])*
        pub fn $name(mut self, value: $ty) -> Self {
            self.config.$($field).+ = value;
            self
        }
    };
    ($(#[$doc:meta])* $name:ident: $ty:ty => $($field:ident).+, $convert:ident) => {
        $(#[$doc])*
        pub fn $name(mut self, value: $ty) -> Self {
            self.config.$($field).+ = $convert(value);
            self
        }
    };
}

fn text(value: impl Into<String>) -> String {
    value.into()
}

fn path(value: impl Into<PathBuf>) -> PathBuf {
    value.into()
}

fn some_path(value: impl Into<PathBuf>) -> Option<PathBuf> {
    Some(value.into())
}

fn millis(value: Duration) -> u64 {
    value.as_millis() as u64
}

/// A fluent builder of a [`ClientConfig`], and of the [`Client`] or [`OpcUaClient`] made from it.
///
/// ```no_run
/// use opcua_edge_client::client::{ClientBuilder, ClientEndpoint};
///
/// let client = ClientBuilder::new()
///     .application_name("Edge gateway")
///     .application_uri("urn:edge-gateway")
///     .pki_dir("./pki")
///     .endpoint("plc", ClientEndpoint::new("opc.tcp://plc-1:4840/"))
///     .default_endpoint("plc")
///     .client()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Creates a `ClientBuilder`
    pub fn new() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Creates a `ClientBuilder` using a configuration file as the initial state. Older
    /// documents are migrated as they are loaded.
    pub fn from_config(path: impl Into<PathBuf>) -> Result<ClientBuilder, Error> {
        Ok(ClientBuilder {
            config: ClientConfig::load(&path.into())?,
        })
    }

    /// Yields a [`Client`] from the values set by the builder, failing with every validation
    /// problem of the configuration.
    pub fn client(self) -> Result<Client, Error> {
        self.validate()?;
        Ok(Client::new(self.config))
    }

    /// Yields the façade over a [`Client`] made from the builder.
    pub fn opcua_client(self) -> Result<OpcUaClient, Error> {
        Ok(OpcUaClient::new(self.client()?))
    }

    /// Yields a [`ClientConfig`] from the values set by the builder.
    pub fn config(self) -> ClientConfig {
        self.config
    }

    /// Tests if the builder is in a valid state to be able to yield a `Client`.
    pub fn is_valid(&self) -> bool {
        self.config.is_valid()
    }

    fn validate(&self) -> Result<(), Error> {
        self.config
            .validate()
            .map_err(|errors| Error::Config(errors.join(", ")))
    }

    setter!(
        /// Name the client presents in CreateSession and in its certificate.
        application_name: impl Into<String> => application_name, text
    );
    setter!(
        /// Must match the uri in the client certificate.
        application_uri: impl Into<String> => application_uri, text
    );
    setter!(product_uri: impl Into<String> => product_uri, text);
    setter!(
        /// Generate a self-signed key pair when the pki directory holds none.
        create_sample_keypair: bool => create_sample_keypair
    );
    setter!(
        /// Own certificate, relative to the pki directory.
        certificate_path: impl Into<PathBuf> => certificate_path, some_path
    );
    setter!(
        /// Own private key, relative to the pki directory.
        private_key_path: impl Into<PathBuf> => private_key_path, some_path
    );
    setter!(
        /// Trust server certificates nobody has vetted. Otherwise the first connect to a new
        /// server fails until its certificate is moved from `rejected/` to `trusted/`.
        auto_accept_untrusted: bool => auto_accept_untrusted
    );
    setter!(
        /// Checks hostname, application uri and validity period of server certificates on top of
        /// the trust and key length checks that always happen.
        verify_server_certs: bool => verify_server_certs
    );
    setter!(
        /// Root of the own key pair and of the `trusted/` and `rejected/` folders.
        pki_dir: impl Into<PathBuf> => pki_dir, path
    );
    setter!(preferred_locales: Vec<String> => preferred_locales);
    setter!(
        /// Id of the endpoint connected to when none is named.
        default_endpoint: impl Into<String> => default_endpoint, text
    );

    /// Adds a named endpoint, replacing one of the same id.
    pub fn endpoint(mut self, endpoint_id: impl Into<String>, endpoint: ClientEndpoint) -> Self {
        self.config.endpoints.insert(endpoint_id.into(), endpoint);
        self
    }

    pub fn endpoints(self, endpoints: Vec<(impl Into<String>, ClientEndpoint)>) -> Self {
        endpoints
            .into_iter()
            .fold(self, |builder, (id, endpoint)| builder.endpoint(id, endpoint))
    }

    /// Adds a named user token. Using the reserved anonymous id fails validation.
    pub fn user_token(mut self, user_token_id: impl Into<String>, user_token: ClientUserToken) -> Self {
        self.config.user_tokens.insert(user_token_id.into(), user_token);
        self
    }

    setter!(
        /// Largest message in bytes, 0 for no limit.
        max_message_size: usize => decoding_options.max_message_size
    );
    setter!(
        /// Most chunks in a message, 0 for no limit.
        max_chunk_count: usize => decoding_options.max_chunk_count
    );
    setter!(max_chunk_size: usize => decoding_options.max_chunk_size);
    setter!(max_incoming_chunk_size: usize => decoding_options.max_incoming_chunk_size);
    setter!(
        /// Longest string in bytes. Unlike the message limits, 0 allows only empty strings.
        max_string_length: usize => decoding_options.max_string_length
    );
    setter!(
        /// Longest byte string, 0 allows only empty ones.
        max_byte_string_length: usize => decoding_options.max_byte_string_length
    );
    setter!(
        /// Most elements in an array, 0 allows only empty ones.
        max_array_length: usize => decoding_options.max_array_length
    );
    setter!(
        /// Connect attempts before giving up, -1 to never give up.
        session_retry_limit: i32 => session_retry_limit
    );
    setter!(
        /// First delay of the reconnect back-off.
        session_retry_initial: Duration => session_retry_initial_ms, millis
    );
    setter!(
        /// Longest delay of the reconnect back-off.
        session_retry_max: Duration => session_retry_max_ms, millis
    );
    setter!(
        /// Longest time between keep-alive reads. A third of the session timeout, or the fastest
        /// publishing interval, wins when it is shorter.
        keep_alive_interval: Duration => keep_alive_interval_ms, millis
    );
    setter!(
        /// Keep-alive failures in a row that make the session count as dead.
        max_missed_keep_alives: u32 => max_missed_keep_alives
    );
    setter!(request_timeout: Duration => request_timeout_ms, millis);
    setter!(
        /// Floor of the publish request timeout, which grows with the longest subscription lifetime.
        publish_timeout: Duration => publish_timeout_ms, millis
    );
    setter!(
        /// Publishing intervals below this are raised to it. Servers may have a floor of their own.
        min_publish_interval: Duration => min_publish_interval_ms, millis
    );
    setter!(
        /// Most publish requests left outstanding at the server.
        max_inflight_publish: usize => max_inflight_publish
    );

    /// The session timeout to ask for, and the range the server's answer is clamped to, all in
    /// milliseconds.
    pub fn session_timeout(mut self, requested_ms: f64, min_ms: f64, max_ms: f64) -> Self {
        self.config.session_timeout_bounds = SessionTimeoutBounds {
            requested_ms,
            min_ms,
            max_ms,
        };
        self
    }

    /// Accept server timestamps however far they are from the local clock.
    pub fn ignore_clock_skew(mut self) -> Self {
        self.config.performance.ignore_clock_skew = true;
        self
    }

    setter!(
        /// Monitored items per CreateMonitoredItems request when subscriptions are rebuilt on a
        /// new session.
        recreate_monitored_items_chunk: usize => performance.recreate_monitored_items_chunk
    );
    setter!(max_inflight_messages: usize => performance.max_inflight_messages);
    setter!(
        /// Name given to new sessions.
        session_name: impl Into<String> => session_name, text
    );
}
