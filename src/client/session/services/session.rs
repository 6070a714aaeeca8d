// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::sync::Arc;

use crate::{
    client::{
        process_service_result, process_unexpected_response,
        session::{session_debug, session_error, session_warn},
        Error, IdentityToken, Session,
    },
    core::{
        comms::{secure_channel::SecureChannel, url::hostname_from_url},
        supported_message::SupportedMessage,
    },
    crypto::{self, user_identity, CertificateStore, PrivateKey, SecurityPolicy, X509},
    types::{
        ActivateSessionRequest, AnonymousIdentityToken, ByteString, CancelRequest,
        CloseSessionRequest, CreateSessionRequest, ExtensionObject, IntegerId, NodeId, ObjectId,
        SignatureData, StatusCode, UAString, UserTokenPolicy, UserTokenType,
    },
};

impl UserTokenType {
    fn of(token: &IdentityToken) -> UserTokenType {
        match token {
            IdentityToken::Anonymous => UserTokenType::Anonymous,
            IdentityToken::UserName(..) => UserTokenType::UserName,
            IdentityToken::X509(..) => UserTokenType::Certificate,
            IdentityToken::IssuedToken(_) => UserTokenType::IssuedToken,
        }
    }
}

impl Session {
    fn own_cert_and_pkey(&self) -> (Option<X509>, Option<PrivateKey>) {
        trace_read_lock!(self.certificate_store).read_own_cert_and_pkey_optional()
    }

    /// The certificate in CreateSession has to be trusted and issued for the endpoint's host
    /// and application.
    fn verify_server_certificate(&self, certificate: &ByteString) -> Result<(), StatusCode> {
        let security_policy = self.channel.security_policy();
        if security_policy == SecurityPolicy::None {
            return Ok(());
        }
        let endpoint = &self.session_info.endpoint;
        let certificate =
            X509::from_byte_string(certificate).map_err(|_| StatusCode::BadCertificateInvalid)?;
        let hostname = hostname_from_url(endpoint.endpoint_url.as_ref())
            .map_err(|_| StatusCode::BadTcpEndpointUrlInvalid)?;
        let application_uri =
            Some(endpoint.server.application_uri.as_ref()).filter(|uri| !uri.is_empty());
        let status = trace_read_lock!(self.certificate_store)
            .validate_or_reject_application_instance_cert(
                &certificate,
                security_policy,
                Some(&hostname),
                application_uri,
            );
        if status.is_bad() {
            session_error!(self, "CreateSession returned an untrusted certificate, {}", status);
            return Err(status);
        }
        Ok(())
    }

    /// CreateSession. Stores the session id and authentication token and clamps the revised
    /// timeout to the configured bounds. Part 4, 5.6.2.
    pub(crate) async fn create_session(&self) -> Result<NodeId, StatusCode> {
        let client_certificate = match self.own_cert_and_pkey().0 {
            Some(cert) => cert.as_byte_string()?,
            None => ByteString::null(),
        };
        let request = CreateSessionRequest {
            request_header: self.make_request_header(),
            client_description: self.application_description.clone(),
            server_uri: UAString::null(),
            endpoint_url: self.session_info.endpoint.endpoint_url.clone(),
            session_name: self.session_name.clone(),
            client_nonce: self.channel.client_nonce(),
            client_certificate,
            requested_session_timeout: self.session_timeout_bounds.requested_ms,
            max_response_message_size: 0,
        };

        let response = match self.send(request).await? {
            SupportedMessage::CreateSessionResponse(response) => response,
            response => return Err(process_unexpected_response(response)),
        };
        process_service_result(&response.response_header)?;
        self.verify_server_certificate(&response.server_certificate)?;

        let session_timeout = self
            .session_timeout_bounds
            .clamp(response.revised_session_timeout);
        session_debug!(
            self,
            "Session timeout revised to {}ms, {}ms used",
            response.revised_session_timeout,
            session_timeout.as_millis()
        );
        *trace_lock!(self.session_timeout) = session_timeout;
        self.session_id.store(Arc::new(response.session_id.clone()));
        self.auth_token
            .store(Arc::new(response.authentication_token));
        self.channel
            .update_from_created_session(&response.server_nonce, &response.server_certificate)?;
        Ok(response.session_id)
    }

    /// Proof that the client holds the key of its certificate: a signature over the server's
    /// certificate and nonce. Empty when the channel has no security.
    fn client_signature(
        &self,
        server_cert: Option<X509>,
        server_nonce: &ByteString,
    ) -> Result<SignatureData, StatusCode> {
        let security_policy = self.channel.security_policy();
        if security_policy == SecurityPolicy::None {
            return Ok(SignatureData::null());
        }
        let Some(client_pkey) = self.own_cert_and_pkey().1 else {
            session_error!(self, "No private key to sign the session with");
            return Err(StatusCode::BadConfigurationError);
        };
        let Some(server_cert) = server_cert else {
            session_error!(self, "No server certificate to sign");
            return Err(StatusCode::BadCertificateInvalid);
        };
        if server_nonce.is_empty() {
            session_error!(self, "No server nonce to sign");
            return Err(StatusCode::BadNonceInvalid);
        }
        crypto::create_signature_data(
            &client_pkey,
            security_policy,
            &server_cert.as_byte_string()?,
            server_nonce,
        )
    }

    /// ActivateSession with the configured user identity. Part 4, 5.6.3.
    pub(crate) async fn activate_session(&self) -> Result<(), StatusCode> {
        if let Err(e) = self.session_info.user_identity_token.ensure_supported() {
            session_error!(self, "Cannot activate the session, {}", e);
            return Err(StatusCode::BadIdentityTokenInvalid);
        }

        let (user_identity_token, user_token_signature, server_cert, server_nonce) = {
            let secure_channel = trace_read_lock!(self.channel.secure_channel);
            let (token, signature) = self.user_identity_token(&secure_channel)?;
            (
                token,
                signature,
                secure_channel.remote_cert(),
                secure_channel.remote_nonce_as_byte_string(),
            )
        };
        let locales = &self.session_info.preferred_locales;
        let locale_ids =
            (!locales.is_empty()).then(|| locales.iter().map(UAString::from).collect());

        let request = ActivateSessionRequest {
            request_header: self.make_request_header(),
            client_signature: self.client_signature(server_cert, &server_nonce)?,
            client_software_certificates: None,
            locale_ids,
            user_identity_token,
            user_token_signature,
        };

        let response = match self.send(request).await? {
            SupportedMessage::ActivateSessionResponse(response) => response,
            response => return Err(process_unexpected_response(response)),
        };
        process_service_result(&response.response_header)?;
        // Signed on the next activation
        if !response.server_nonce.is_null() {
            trace_write_lock!(self.channel.secure_channel)
                .set_remote_nonce_from_byte_string(&response.server_nonce)?;
        }
        Ok(())
    }

    /// The endpoint's token policy for the configured identity. An endpoint that lists no
    /// policies at all is taken to accept anonymous users.
    fn user_token_policy(&self, token_type: UserTokenType) -> Result<UserTokenPolicy, StatusCode> {
        let endpoint = &self.session_info.endpoint;
        let policy = match endpoint.find_policy(token_type) {
            Some(policy) => policy.clone(),
            None if token_type == UserTokenType::Anonymous
                && endpoint.user_identity_tokens.is_none() =>
            {
                UserTokenPolicy::anonymous()
            }
            None => {
                session_error!(self, "The endpoint accepts no {:?} user token", token_type);
                return Err(StatusCode::BadSecurityPolicyRejected);
            }
        };
        let policy_uri = &policy.security_policy_uri;
        if !policy_uri.is_null()
            && SecurityPolicy::from_uri(policy_uri.as_ref()) == SecurityPolicy::Unknown
        {
            session_error!(self, "User token policy has the unknown security policy {}", policy_uri);
            return Err(StatusCode::BadSecurityPolicyRejected);
        }
        Ok(policy)
    }

    /// The identity token for ActivateSession and, for certificates, its signature.
    fn user_identity_token(
        &self,
        channel: &SecureChannel,
    ) -> Result<(ExtensionObject, SignatureData), StatusCode> {
        let token = &self.session_info.user_identity_token;
        let policy = self.user_token_policy(UserTokenType::of(token))?;

        match token {
            IdentityToken::Anonymous => Ok((
                ExtensionObject::from_encodable(
                    ObjectId::AnonymousIdentityToken_Encoding_DefaultBinary,
                    &AnonymousIdentityToken {
                        policy_id: policy.policy_id.clone(),
                    },
                ),
                SignatureData::null(),
            )),
            IdentityToken::UserName(user, pass) => {
                let token = user_identity::make_user_name_identity_token(
                    channel.security_policy(),
                    &policy,
                    channel.remote_nonce(),
                    &channel.remote_cert(),
                    user,
                    pass,
                )?;
                Ok((
                    ExtensionObject::from_encodable(
                        ObjectId::UserNameIdentityToken_Encoding_DefaultBinary,
                        &token,
                    ),
                    SignatureData::null(),
                ))
            }
            IdentityToken::X509(cert_path, private_key_path) => {
                let Some(server_cert) = channel.remote_cert() else {
                    session_error!(self, "A certificate identity is signed over the server certificate, and there is none");
                    return Err(StatusCode::BadCertificateInvalid);
                };
                let unreadable = |what: &str, path: &std::path::Path, e: String| {
                    session_error!(self, "Cannot read the user {} {}, {}", what, path.display(), e);
                    StatusCode::BadSecurityPolicyRejected
                };
                let user_cert = CertificateStore::read_cert(cert_path)
                    .map_err(|e| unreadable("certificate", cert_path.as_path(), e))?;
                let user_key = CertificateStore::read_pkey(private_key_path)
                    .map_err(|e| unreadable("private key", private_key_path.as_path(), e))?;
                let (token, signature) = user_identity::make_x509_identity_token(
                    channel.security_policy(),
                    &policy,
                    &user_cert,
                    &user_key,
                    &server_cert.as_byte_string()?,
                    &channel.remote_nonce_as_byte_string(),
                )?;
                Ok((
                    ExtensionObject::from_encodable(
                        ObjectId::X509IdentityToken_Encoding_DefaultBinary,
                        &token,
                    ),
                    signature,
                ))
            }
            IdentityToken::IssuedToken(_) => Err(StatusCode::BadIdentityTokenInvalid),
        }
    }

    /// CloseSession, deleting the session's subscriptions on the server. Only reached through
    /// `disconnect`.
    pub(crate) async fn close_session(&self) -> Result<(), StatusCode> {
        let request = CloseSessionRequest {
            delete_subscriptions: true,
            request_header: self.make_request_header(),
        };
        match self.send(request).await? {
            SupportedMessage::CloseSessionResponse(response) => {
                if let Err(e) = process_service_result(&response.response_header) {
                    session_warn!(self, "CloseSession returned {}", e);
                }
                Ok(())
            }
            response => Err(process_unexpected_response(response)),
        }
    }

    /// Asks the server to cancel the outstanding request with `request_handle` and returns how
    /// many requests it cancelled. Part 4, 5.6.5.
    pub async fn cancel(&self, request_handle: IntegerId) -> Result<u32, Error> {
        let request = CancelRequest {
            request_header: self.make_request_header(),
            request_handle,
        };
        match self.send(request).await? {
            SupportedMessage::CancelResponse(response) => {
                process_service_result(&response.response_header)?;
                Ok(response.cancel_count)
            }
            response => Err(process_unexpected_response(response).into()),
        }
    }
}
