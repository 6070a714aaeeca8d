// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Client configuration data.
//!
//! The configuration is a YAML document carrying a `config_version`. Documents written by older
//! versions are migrated when they are loaded, see [`ClientConfig::migrate`].

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde_yaml::{Mapping, Value};

use crate::{
    core::config::Config,
    crypto::SecurityPolicy,
    types::{ApplicationType, DecodingOptions, MessageSecurityMode, UAString},
};

use super::{retry::SessionRetryPolicy, transport::TransportConfiguration, Error, IdentityToken};

pub const ANONYMOUS_USER_TOKEN_ID: &str = "ANONYMOUS";

/// The version of the configuration document written by this crate
pub const CONFIG_VERSION: u32 = 2;

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ClientUserToken {
    /// Username
    pub user: String,
    /// Password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
}

impl ClientUserToken {
    /// Constructs a client token which holds a username and password.
    pub fn user_pass<S, T>(user: S, password: T) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        ClientUserToken {
            user: user.into(),
            password: Some(password.into()),
            cert_path: None,
            private_key_path: None,
        }
    }

    /// Constructs a client token which holds a username and paths to X509 certificate and private key.
    pub fn x509<S>(user: S, cert_path: &Path, private_key_path: &Path) -> Self
    where
        S: Into<String>,
    {
        ClientUserToken {
            user: user.into(),
            password: None,
            cert_path: Some(cert_path.to_string_lossy().to_string()),
            private_key_path: Some(private_key_path.to_string_lossy().to_string()),
        }
    }

    /// A token has a name, and either a password or a cert path and key path. The paths are not
    /// checked.
    fn validate(&self, errors: &mut Vec<String>) {
        if self.user.is_empty() {
            errors.push("User token has an empty name".to_string());
        }
        if self.password.is_some() {
            if self.cert_path.is_some() || self.private_key_path.is_some() {
                errors.push(format!(
                    "User token {} holds a password and certificate info, it cannot be both",
                    self.user
                ));
            }
        } else if self.cert_path.is_none() && self.private_key_path.is_none() {
            errors.push(format!(
                "User token {} fails to provide a password or certificate info",
                self.user
            ));
        } else if self.cert_path.is_none() || self.private_key_path.is_none() {
            errors.push(format!(
                "User token {} fails to provide both a certificate path and a private key path",
                self.user
            ));
        }
    }

    fn identity_token(&self) -> Option<IdentityToken> {
        if let Some(ref password) = self.password {
            Some(IdentityToken::UserName(self.user.clone(), password.clone()))
        } else {
            match (&self.cert_path, &self.private_key_path) {
                (Some(cert_path), Some(private_key_path)) => Some(IdentityToken::X509(
                    PathBuf::from(cert_path),
                    PathBuf::from(private_key_path),
                )),
                _ => None,
            }
        }
    }
}

/// Describes an endpoint, its url, security policy, mode and user token
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ClientEndpoint {
    /// Endpoint path
    pub url: String,
    /// Security policy
    pub security_policy: String,
    /// Security mode
    pub security_mode: String,
    /// User id to use with the endpoint
    #[serde(default = "ClientEndpoint::anonymous_id")]
    pub user_token_id: String,
}

impl ClientEndpoint {
    /// Makes a client endpoint
    pub fn new<T>(url: T) -> Self
    where
        T: Into<String>,
    {
        ClientEndpoint {
            url: url.into(),
            security_policy: SecurityPolicy::None.to_str().into(),
            security_mode: MessageSecurityMode::None.as_str().into(),
            user_token_id: Self::anonymous_id(),
        }
    }

    fn anonymous_id() -> String {
        ANONYMOUS_USER_TOKEN_ID.to_string()
    }

    /// The security policy, `Unknown` when the name is not recognised
    pub fn security_policy(&self) -> SecurityPolicy {
        SecurityPolicy::from_str(&self.security_policy).unwrap_or(SecurityPolicy::Unknown)
    }

    pub fn security_mode(&self) -> MessageSecurityMode {
        MessageSecurityMode::from(self.security_mode.as_ref())
    }
}

/// Limits applied when encoding and decoding messages
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DecodingLimits {
    /// Maximum size of a message in bytes. 0 means no limit
    pub max_message_size: usize,
    /// Maximum number of chunks in a message. 0 means no limit
    pub max_chunk_count: usize,
    /// Size of the chunks sent to the server
    pub max_chunk_size: usize,
    /// Size of the chunks the server may send
    pub max_incoming_chunk_size: usize,
    /// Maximum length in bytes (not chars!) of a string. 0 actually means 0, i.e. no string permitted
    pub max_string_length: usize,
    /// Maximum length in bytes of a byte string. 0 actually means 0, i.e. no byte string permitted
    pub max_byte_string_length: usize,
    /// Maximum number of array elements. 0 actually means 0, i.e. no array permitted
    pub max_array_length: usize,
}

impl Default for DecodingLimits {
    fn default() -> Self {
        let decoding_options = DecodingOptions::default();
        DecodingLimits {
            max_message_size: decoding_options.max_message_size,
            max_chunk_count: decoding_options.max_chunk_count,
            max_chunk_size: 65535,
            max_incoming_chunk_size: 65535,
            max_string_length: decoding_options.max_string_length,
            max_byte_string_length: decoding_options.max_byte_string_length,
            max_array_length: decoding_options.max_array_length,
        }
    }
}

/// The session timeout asked for, and the range the server's revised timeout is clamped to.
/// Values are in milliseconds.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SessionTimeoutBounds {
    pub requested_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl Default for SessionTimeoutBounds {
    fn default() -> Self {
        SessionTimeoutBounds {
            requested_ms: 60_000.0,
            min_ms: 10_000.0,
            max_ms: 3_600_000.0,
        }
    }
}

impl SessionTimeoutBounds {
    /// Every bound is finite and positive, and the minimum does not exceed the maximum.
    pub fn is_valid(&self) -> bool {
        [self.requested_ms, self.min_ms, self.max_ms]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
            && self.min_ms <= self.max_ms
    }

    /// Clamps a revised timeout from the server into the bounds. Invalid bounds fall back to
    /// the defaults.
    pub fn clamp(&self, revised_ms: f64) -> Duration {
        let bounds = if self.is_valid() {
            *self
        } else {
            SessionTimeoutBounds::default()
        };
        let revised_ms = if revised_ms.is_finite() {
            revised_ms
        } else {
            bounds.requested_ms
        };
        Duration::from_millis(revised_ms.clamp(bounds.min_ms, bounds.max_ms) as u64)
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Performance {
    /// Ignore clock skew allows the client to make a successful connection to the server, even
    /// when the client and server clocks are out of sync.
    pub ignore_clock_skew: bool,
    /// Maximum number of requests waiting to be sent on the channel
    pub max_inflight_messages: usize,
    /// Number of monitored items recreated per request after a reconnect
    pub recreate_monitored_items_chunk: usize,
}

impl Default for Performance {
    fn default() -> Self {
        Performance {
            ignore_clock_skew: false,
            max_inflight_messages: 20,
            recreate_monitored_items_chunk: 1000,
        }
    }
}

/// Client OPC UA configuration
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// Version of the document, older versions are migrated on load
    pub config_version: u32,
    /// Name of the application that the client presents itself as to the server
    pub application_name: String,
    /// The application uri
    pub application_uri: String,
    /// Product uri
    pub product_uri: String,
    /// Autocreates public / private keypair if they don't exist. For testing/samples only
    /// since you do not have control of the values
    pub create_sample_keypair: bool,
    /// Custom certificate path, to be used instead of the default .der certificate path
    pub certificate_path: Option<PathBuf>,
    /// Custom private key path, to be used instead of the default private key path
    pub private_key_path: Option<PathBuf>,
    /// Accept server certificates that are not in the trusted store
    pub auto_accept_untrusted: bool,
    /// Verify server certificates. For testing/samples only unless you're sure what you're
    /// doing.
    pub verify_server_certs: bool,
    /// PKI folder, either absolute or relative to executable
    pub pki_dir: PathBuf,
    /// Preferred locales
    pub preferred_locales: Vec<String>,
    /// Identifier of the default endpoint
    pub default_endpoint: String,
    /// User tokens
    pub user_tokens: BTreeMap<String, ClientUserToken>,
    /// List of end points
    pub endpoints: BTreeMap<String, ClientEndpoint>,
    /// Decoding options used for serialization / deserialization
    pub decoding_options: DecodingLimits,
    /// Max retry limit -1, 0 or number
    pub session_retry_limit: i32,
    /// Sleep before the first reconnect attempt in milliseconds
    pub session_retry_initial_ms: u64,
    /// Longest sleep between reconnect attempts in milliseconds
    pub session_retry_max_ms: u64,
    /// Session timeout requested and accepted, in milliseconds
    pub session_timeout_bounds: SessionTimeoutBounds,
    /// Upper bound of the keep-alive interval in milliseconds
    pub keep_alive_interval_ms: u64,
    /// Consecutive failed keep-alives before the session is considered dead
    pub max_missed_keep_alives: u32,
    /// Timeout of service requests in milliseconds
    pub request_timeout_ms: u64,
    /// Shortest publish timeout in milliseconds
    pub publish_timeout_ms: u64,
    /// Smallest publishing interval accepted, in milliseconds
    pub min_publish_interval_ms: u64,
    /// Maximum number of outstanding publish requests
    pub max_inflight_publish: usize,
    /// Client performance settings
    pub performance: Performance,
    /// Session name
    pub session_name: String,
}

impl Config for ClientConfig {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.config_version != CONFIG_VERSION {
            errors.push(format!(
                "Config version {} is not the current version {}",
                self.config_version, CONFIG_VERSION
            ));
        }
        if self.application_name.is_empty() {
            errors.push("Application name is empty".to_string());
        }
        if self.application_uri.is_empty() {
            errors.push("Application uri is empty".to_string());
        }
        if self.user_tokens.contains_key(ANONYMOUS_USER_TOKEN_ID) {
            errors.push(format!(
                "User tokens contains the reserved \"{}\" id",
                ANONYMOUS_USER_TOKEN_ID
            ));
        }
        if self.user_tokens.contains_key("") {
            errors.push("User tokens contains an endpoint with an empty id".to_string());
        }
        self.user_tokens
            .values()
            .for_each(|token| token.validate(&mut errors));
        if self.endpoints.is_empty() {
            warn!("Endpoint config contains no endpoints");
        } else {
            if self.endpoints.contains_key("") {
                errors.push("Endpoints contains an endpoint with an empty id".to_string());
            }
            if !self.default_endpoint.is_empty()
                && !self.endpoints.contains_key(&self.default_endpoint)
            {
                errors.push(format!(
                    "Default endpoint id {} does not exist in list of endpoints",
                    self.default_endpoint
                ));
            }
            self.endpoints.iter().for_each(|(id, e)| {
                if e.security_policy() == SecurityPolicy::Unknown {
                    errors.push(format!(
                        "Endpoint {} security policy {} is invalid",
                        id, e.security_policy
                    ));
                } else if e.security_mode() == MessageSecurityMode::Invalid {
                    errors.push(format!(
                        "Endpoint {} security mode {} is invalid",
                        id, e.security_mode
                    ));
                }
                if e.user_token_id != ANONYMOUS_USER_TOKEN_ID
                    && !self.user_tokens.contains_key(&e.user_token_id)
                {
                    errors.push(format!(
                        "Endpoint {} refers to an unknown user token {}",
                        id, e.user_token_id
                    ));
                }
            });
        }
        if self.session_retry_limit < -1 {
            errors.push(format!("Session retry limit of {} is invalid, must be -1 (infinite), 0 (never) or a positive value", self.session_retry_limit));
        }
        let bounds = &self.session_timeout_bounds;
        if !bounds.is_valid() {
            errors.push(format!(
                "Session timeout bounds {} - {} requesting {} are invalid",
                bounds.min_ms, bounds.max_ms, bounds.requested_ms
            ));
        }
        if self.keep_alive_interval_ms == 0 {
            errors.push("Keep alive interval must be positive".to_string());
        }
        if self.max_missed_keep_alives == 0 {
            errors.push("At least one keep alive must be allowed to fail".to_string());
        }
        if self.max_inflight_publish == 0 {
            errors.push("Max inflight publish must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn application_name(&self) -> UAString {
        UAString::from(&self.application_name)
    }

    fn application_uri(&self) -> UAString {
        UAString::from(&self.application_uri)
    }

    fn product_uri(&self) -> UAString {
        UAString::from(&self.product_uri)
    }

    fn application_type(&self) -> ApplicationType {
        ApplicationType::Client
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl ClientConfig {
    /// The default PKI directory
    pub const PKI_DIR: &'static str = "pki";

    pub fn new<T>(application_name: T, application_uri: T) -> Self
    where
        T: Into<String>,
    {
        ClientConfig {
            config_version: CONFIG_VERSION,
            application_name: application_name.into(),
            application_uri: application_uri.into(),
            create_sample_keypair: false,
            certificate_path: None,
            private_key_path: None,
            auto_accept_untrusted: false,
            verify_server_certs: true,
            product_uri: String::new(),
            pki_dir: PathBuf::from(Self::PKI_DIR),
            preferred_locales: Vec::new(),
            default_endpoint: String::new(),
            user_tokens: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            decoding_options: DecodingLimits::default(),
            session_retry_limit: SessionRetryPolicy::DEFAULT_RETRY_LIMIT as i32,
            session_retry_initial_ms: SessionRetryPolicy::DEFAULT_INITIAL_SLEEP_MS,
            session_retry_max_ms: SessionRetryPolicy::DEFAULT_MAX_SLEEP_MS,
            session_timeout_bounds: SessionTimeoutBounds::default(),
            keep_alive_interval_ms: 10_000,
            max_missed_keep_alives: 2,
            request_timeout_ms: 60_000,
            publish_timeout_ms: 60_000,
            min_publish_interval_ms: 100,
            max_inflight_publish: 2,
            performance: Performance::default(),
            session_name: "Rust OPC UA Client".into(),
        }
    }

    /// Loads a configuration document, migrating it from an older version if needed, and
    /// validates the result.
    pub fn load(path: &Path) -> Result<ClientConfig, Error> {
        let s = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("Cannot read {}, {}", path.to_string_lossy(), err))
        })?;
        Self::from_yaml(&s)
    }

    /// Parses, migrates and validates a configuration document
    pub fn from_yaml(s: &str) -> Result<ClientConfig, Error> {
        let doc: Value = serde_yaml::from_str(s)
            .map_err(|err| Error::Config(format!("Cannot parse configuration, {}", err)))?;
        let doc = Self::migrate(doc)?;
        let config: ClientConfig = serde_yaml::from_value(doc)
            .map_err(|err| Error::Config(format!("Cannot read configuration, {}", err)))?;
        config.validate().map_err(|errors| {
            let errors = errors.join(", ");
            error!("Configuration is invalid, {}", errors);
            Error::Config(errors)
        })?;
        Ok(config)
    }

    /// Brings a configuration document up to the current version. A document without a
    /// version is version 1.
    pub fn migrate(mut doc: Value) -> Result<Value, Error> {
        let Some(mapping) = doc.as_mapping_mut() else {
            return Err(Error::Config("Configuration is not a mapping".into()));
        };
        let version = match mapping.get("config_version") {
            None => 1,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| Error::Config(format!("Config version {:?} is invalid", v)))?,
        };
        if version > CONFIG_VERSION as u64 {
            return Err(Error::Config(format!(
                "Config version {} is newer than this client supports",
                version
            )));
        }
        if version < 2 {
            debug!("Migrating client configuration from version {} to 2", version);
            Self::migrate_v1_to_v2(mapping);
        }
        Ok(doc)
    }

    fn migrate_v1_to_v2(mapping: &mut Mapping) {
        if let Some(trust) = mapping.remove("trust_server_certs") {
            mapping.insert("auto_accept_untrusted".into(), trust);
        }
        if let Some(timeout) = mapping.remove("session_timeout") {
            let mut bounds = SessionTimeoutBounds::default();
            // 0 asked for the server default
            if let Some(timeout) = timeout.as_f64().filter(|t| *t > 0.0) {
                bounds.requested_ms = timeout;
                bounds.min_ms = bounds.min_ms.min(timeout);
                bounds.max_ms = bounds.max_ms.max(timeout);
            }
            if let Ok(bounds) = serde_yaml::to_value(bounds) {
                mapping.insert("session_timeout_bounds".into(), bounds);
            }
        }
        if let Some(interval) = mapping.remove("session_retry_interval") {
            mapping.insert("session_retry_initial_ms".into(), interval);
        }
        // Settings that no longer exist
        if let Some(Value::Mapping(performance)) = mapping.get_mut("performance") {
            performance.remove("single_threaded_executor");
        }
        mapping.insert("config_version".into(), Value::from(2u32));
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub(crate) fn transport_configuration(&self) -> TransportConfiguration {
        TransportConfiguration {
            max_pending_incoming: 5,
            max_inflight: self.performance.max_inflight_messages,
            send_buffer_size: self.decoding_options.max_chunk_size,
            recv_buffer_size: self.decoding_options.max_incoming_chunk_size,
            max_message_size: self.decoding_options.max_message_size,
            max_chunk_count: self.decoding_options.max_chunk_count,
        }
    }

    pub fn min_publish_interval(&self) -> Duration {
        Duration::from_millis(self.min_publish_interval_ms)
    }

    pub fn session_retry_policy(&self) -> SessionRetryPolicy {
        SessionRetryPolicy::new(
            Duration::from_millis(self.session_retry_max_ms),
            if self.session_retry_limit < 0 {
                None
            } else {
                Some(self.session_retry_limit as u32)
            },
            Duration::from_millis(self.session_retry_initial_ms),
        )
    }

    pub fn decoding_options(&self) -> DecodingOptions {
        let decoding_options = &self.decoding_options;
        DecodingOptions {
            max_chunk_count: decoding_options.max_chunk_count,
            max_message_size: decoding_options.max_message_size,
            max_string_length: decoding_options.max_string_length,
            max_byte_string_length: decoding_options.max_byte_string_length,
            max_array_length: decoding_options.max_array_length,
            client_offset: chrono::Duration::zero(),
            ..Default::default()
        }
    }

    /// The identity configured under `user_token_id`
    pub fn client_identity_token(&self, user_token_id: &str) -> Option<IdentityToken> {
        if user_token_id == ANONYMOUS_USER_TOKEN_ID {
            Some(IdentityToken::Anonymous)
        } else {
            self.user_tokens.get(user_token_id)?.identity_token()
        }
    }

    /// The default endpoint. It is an error for there to be none.
    pub fn default_endpoint(&self) -> Result<&ClientEndpoint, Error> {
        if self.default_endpoint.is_empty() {
            Err(Error::Config("No default endpoint has been specified".into()))
        } else {
            self.endpoints.get(&self.default_endpoint).ok_or_else(|| {
                Error::Config(format!(
                    "Cannot find default endpoint with id {}",
                    self.default_endpoint
                ))
            })
        }
    }
}
