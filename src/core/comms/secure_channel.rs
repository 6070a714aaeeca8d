// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Security state of a channel and the signing and encryption of its chunks, Part 6 section 6.7.
//!
//! A secured chunk is laid out as:
//!
//! ```text
//! message header | security header | sequence header | body | padding | signature
//! <---------------------------- signed ------------------------------->
//!                                   <----------------- encrypted -------------->
//! ```

use std::io::Cursor;

use chrono::Duration;

use crate::crypto::{
    aeskey::AesKey,
    pkey::{KeySize, PrivateKey},
    random,
    x509::X509,
    CertificateStore, SecurityPolicy,
};
use crate::types::{
    service_types::ChannelSecurityToken, status_code::StatusCode, BinaryEncoder, ByteString,
    DateTime, DecodingOptions, MessageSecurityMode,
};

use super::{
    message_chunk::{MessageChunk, MessageChunkHeader, MessageChunkType},
    message_chunk_info::ChunkInfo,
    security_header::{AsymmetricSecurityHeader, SecurityHeader, SymmetricSecurityHeader},
};

/// Offset of the message size in the message header
const MESSAGE_SIZE_OFFSET: usize = 4;
const SEQUENCE_HEADER_SIZE: usize = 8;
/// An AES cipher writes up to a block more than it is given
const CIPHER_SLACK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Role {
    Unknown,
    Client,
    Server,
}

/// Keys protecting the chunks sent in one direction
#[derive(Debug, Clone)]
struct DirectionKeys {
    signing: Vec<u8>,
    encrypting: AesKey,
    iv: Vec<u8>,
}

impl DirectionKeys {
    fn derive(policy: SecurityPolicy, secret: &[u8], seed: &[u8]) -> Result<Self, StatusCode> {
        let (signing, encrypting, iv) = policy.make_secure_channel_keys(secret, seed)?;
        Ok(Self {
            signing,
            encrypting,
            iv,
        })
    }
}

/// Padding that brings an encrypted body to a whole number of cipher blocks. Every padding
/// byte holds the padding length. Keys over 2048 bits need a second byte for the high half.
#[derive(Debug, Clone, Copy)]
struct Padding {
    block_size: usize,
    size_bytes: usize,
}

impl Padding {
    fn new(block_size: usize, key_size: usize) -> Self {
        Self {
            block_size,
            size_bytes: Self::size_bytes(key_size),
        }
    }

    fn size_bytes(key_size: usize) -> usize {
        if key_size > 256 {
            2
        } else {
            1
        }
    }

    /// Padding for a body, size bytes included.
    fn total(&self, body_size: usize, signature_size: usize) -> usize {
        let unpadded = SEQUENCE_HEADER_SIZE + body_size + signature_size + self.size_bytes;
        self.size_bytes + (self.block_size - unpadded % self.block_size) % self.block_size
    }

    fn append(&self, data: &mut Vec<u8>, total: usize) {
        let length = total - self.size_bytes;
        let low = (length & 0xff) as u8;
        data.resize(data.len() + total - self.size_bytes + 1, low);
        if self.size_bytes == 2 {
            data.push((length >> 8) as u8);
        }
    }

    /// Checks the padding that ends at `end` and returns where it starts.
    fn strip(data: &[u8], end: usize, key_size: usize) -> Result<usize, StatusCode> {
        let size_bytes = Self::size_bytes(key_size);
        let invalid = || {
            error!("Chunk padding ending at {} is invalid", end);
            StatusCode::BadSecurityChecksFailed
        };
        if end < size_bytes || end > data.len() {
            return Err(invalid());
        }
        let low = data[end - size_bytes];
        let length = if size_bytes == 2 {
            usize::from(low) | usize::from(data[end - 1]) << 8
        } else {
            usize::from(low)
        };
        let start = end.checked_sub(length + size_bytes).ok_or_else(invalid)?;
        if data[start..=end - size_bytes].iter().any(|b| *b != low) {
            return Err(invalid());
        }
        Ok(start)
    }
}

/// Writes the size of a chunk into its message header.
fn set_message_size(data: &mut [u8], size: usize) -> Result<(), StatusCode> {
    let size = u32::try_from(size).map_err(|_| StatusCode::BadEncodingLimitsExceeded)?;
    let field = data
        .get_mut(MESSAGE_SIZE_OFFSET..MESSAGE_SIZE_OFFSET + 4)
        .ok_or(StatusCode::BadUnexpectedError)?;
    field.copy_from_slice(&size.to_le_bytes());
    Ok(())
}

fn copy_into(src: &[u8], dst: &mut [u8]) -> Result<usize, StatusCode> {
    if src.len() > dst.len() {
        error!(
            "A chunk of {} bytes does not fit a {} byte buffer",
            src.len(),
            dst.len()
        );
        return Err(StatusCode::BadEncodingLimitsExceeded);
    }
    dst[..src.len()].copy_from_slice(src);
    Ok(src.len())
}

/// Everything needed to secure what this end sends and to check what the other end sends.
#[derive(Debug)]
pub struct SecureChannel {
    role: Role,
    security_policy: SecurityPolicy,
    security_mode: MessageSecurityMode,
    secure_channel_id: u32,
    token_id: u32,
    token_created_at: DateTime,
    /// Milliseconds
    token_lifetime: u32,
    cert: Option<X509>,
    private_key: Option<PrivateKey>,
    remote_cert: Option<X509>,
    local_nonce: Vec<u8>,
    remote_nonce: Vec<u8>,
    local_keys: Option<DirectionKeys>,
    remote_keys: Option<DirectionKeys>,
    /// Remote keys of a renewed token with its id, held until the other end sends under the
    /// new token
    previous_remote_keys: Option<(u32, DirectionKeys)>,
    decoding_options: DecodingOptions,
}

impl SecureChannel {
    /// A channel with no certificate or key, usable only for the `None` policy
    pub fn new_no_certificate_store() -> SecureChannel {
        SecureChannel::new_with_keys(Role::Unknown, None, None, DecodingOptions::default())
    }

    pub fn new(
        certificate_store: &CertificateStore,
        role: Role,
        decoding_options: DecodingOptions,
    ) -> SecureChannel {
        let (cert, private_key) = certificate_store
            .read_own_cert_and_pkey()
            .map(|(cert, key)| (Some(cert), Some(key)))
            .unwrap_or_else(|err| {
                warn!(
                    "No application certificate and key ({}), only the None policy is available",
                    err
                );
                (None, None)
            });
        SecureChannel::new_with_keys(role, cert, private_key, decoding_options)
    }

    pub fn new_with_keys(
        role: Role,
        cert: Option<X509>,
        private_key: Option<PrivateKey>,
        decoding_options: DecodingOptions,
    ) -> SecureChannel {
        SecureChannel {
            role,
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            secure_channel_id: 0,
            token_id: 0,
            token_created_at: DateTime::now(),
            token_lifetime: 0,
            cert,
            private_key,
            remote_cert: None,
            local_nonce: Vec::new(),
            remote_nonce: Vec::new(),
            local_keys: None,
            remote_keys: None,
            previous_remote_keys: None,
            decoding_options,
        }
    }

    pub fn is_client_role(&self) -> bool {
        self.role == Role::Client
    }

    pub fn set_cert(&mut self, cert: Option<X509>) {
        self.cert = cert;
    }

    pub fn set_private_key(&mut self, private_key: Option<PrivateKey>) {
        self.private_key = private_key;
    }

    pub fn remote_cert(&self) -> Option<X509> {
        self.remote_cert.clone()
    }

    pub fn set_remote_cert_from_byte_string(
        &mut self,
        remote_cert: &ByteString,
    ) -> Result<(), StatusCode> {
        self.remote_cert = match remote_cert.is_null() {
            true => None,
            false => Some(X509::from_byte_string(remote_cert)?),
        };
        Ok(())
    }

    pub fn security_mode(&self) -> MessageSecurityMode {
        self.security_mode
    }

    pub fn set_security_mode(&mut self, security_mode: MessageSecurityMode) {
        self.security_mode = security_mode;
    }

    pub fn security_policy(&self) -> SecurityPolicy {
        self.security_policy
    }

    pub fn set_security_policy(&mut self, security_policy: SecurityPolicy) {
        self.security_policy = security_policy;
    }

    fn signs_messages(&self) -> bool {
        self.security_policy != SecurityPolicy::None
            && matches!(
                self.security_mode,
                MessageSecurityMode::Sign | MessageSecurityMode::SignAndEncrypt
            )
    }

    pub fn secure_channel_id(&self) -> u32 {
        self.secure_channel_id
    }

    pub fn set_secure_channel_id(&mut self, secure_channel_id: u32) {
        self.secure_channel_id = secure_channel_id;
    }

    pub fn token_created_at(&self) -> DateTime {
        self.token_created_at
    }

    /// Takes the token issued or renewed by the server. The remote keys of a replaced token
    /// stay usable until a message arrives under the new one.
    pub fn set_security_token(&mut self, token: ChannelSecurityToken) {
        let renewed = self.token_id != 0 && token.token_id != self.token_id;
        if renewed {
            if let Some(keys) = self.remote_keys.take() {
                debug!(
                    "Token {} replaced by {}, its keys are kept for chunks in flight",
                    self.token_id, token.token_id
                );
                self.previous_remote_keys = Some((self.token_id, keys));
            }
        }
        self.secure_channel_id = token.channel_id;
        self.token_id = token.token_id;
        self.token_created_at = DateTime::now();
        self.token_lifetime = token.revised_lifetime;
    }

    pub fn clear_security_token(&mut self) {
        self.secure_channel_id = 0;
        self.token_id = 0;
        self.token_created_at = DateTime::now();
        self.token_lifetime = 0;
        self.local_keys = None;
        self.remote_keys = None;
        self.previous_remote_keys = None;
    }

    /// True while the keys of a renewed token are still held
    pub fn has_previous_token(&self) -> bool {
        self.previous_remote_keys.is_some()
    }

    /// A token is renewed once 75% of its lifetime has passed.
    pub fn should_renew_security_token(&self) -> bool {
        self.should_renew_security_token_at(DateTime::now())
    }

    pub fn should_renew_security_token_at(&self, now: DateTime) -> bool {
        if self.token_id == 0 {
            return false;
        }
        let renew_after = Duration::milliseconds(i64::from(self.token_lifetime) * 3 / 4);
        now - self.token_created_at > renew_after
    }

    pub fn set_client_offset(&mut self, client_offset: Duration) {
        self.decoding_options.client_offset = client_offset;
    }

    /// Replaces the limits, keeping the clock offset already learned.
    pub fn set_decoding_options(&mut self, decoding_options: DecodingOptions) {
        let client_offset = self.decoding_options.client_offset;
        self.decoding_options = DecodingOptions {
            client_offset,
            ..decoding_options
        };
    }

    pub fn decoding_options(&self) -> DecodingOptions {
        self.decoding_options.clone()
    }

    pub fn make_security_header(
        &self,
        message_type: MessageChunkType,
    ) -> Result<SecurityHeader, StatusCode> {
        if message_type != MessageChunkType::OpenSecureChannel {
            return Ok(SecurityHeader::Symmetric(SymmetricSecurityHeader {
                token_id: self.token_id,
            }));
        }
        if self.security_policy == SecurityPolicy::None {
            return Ok(SecurityHeader::Asymmetric(AsymmetricSecurityHeader::none()));
        }
        let Some(cert) = self.cert.as_ref() else {
            error!(
                "Opening a {} channel needs an application certificate",
                self.security_policy
            );
            return Err(StatusCode::BadSecurityChecksFailed);
        };
        let receiver_thumbprint = match &self.remote_cert {
            Some(remote_cert) => remote_cert.thumbprint()?.as_byte_string(),
            None => ByteString::null(),
        };
        AsymmetricSecurityHeader::new(self.security_policy, cert, receiver_thumbprint)
            .map(SecurityHeader::Asymmetric)
    }

    /// Makes a new local nonce of the length the policy uses, or clears it for `None`.
    pub fn create_random_nonce(&mut self) {
        self.local_nonce = match self.security_policy {
            SecurityPolicy::None => Vec::new(),
            policy => {
                let mut nonce = vec![0u8; policy.secure_channel_nonce_length()];
                random::bytes(&mut nonce);
                nonce
            }
        };
    }

    pub fn local_nonce(&self) -> &[u8] {
        &self.local_nonce
    }

    pub fn set_local_nonce(&mut self, local_nonce: &[u8]) {
        self.local_nonce = local_nonce.to_vec();
    }

    pub fn local_nonce_as_byte_string(&self) -> ByteString {
        Self::nonce_as_byte_string(&self.local_nonce)
    }

    pub fn remote_nonce(&self) -> &[u8] {
        &self.remote_nonce
    }

    pub fn set_remote_nonce(&mut self, remote_nonce: &[u8]) {
        self.remote_nonce = remote_nonce.to_vec();
    }

    pub fn remote_nonce_as_byte_string(&self) -> ByteString {
        Self::nonce_as_byte_string(&self.remote_nonce)
    }

    fn nonce_as_byte_string(nonce: &[u8]) -> ByteString {
        if nonce.is_empty() {
            ByteString::null()
        } else {
            ByteString::from(nonce)
        }
    }

    /// Takes the server nonce, which must have the policy's nonce length unless the policy is
    /// `None`.
    pub fn set_remote_nonce_from_byte_string(
        &mut self,
        remote_nonce: &ByteString,
    ) -> Result<(), StatusCode> {
        if self.security_policy == SecurityPolicy::None {
            if let Some(nonce) = &remote_nonce.value {
                self.remote_nonce = nonce.clone();
            }
            return Ok(());
        }
        let expected = self.security_policy.secure_channel_nonce_length();
        match remote_nonce.value.as_deref() {
            Some(nonce) if nonce.len() == expected => {
                self.remote_nonce = nonce.to_vec();
                Ok(())
            }
            nonce => {
                error!(
                    "Server nonce of {} bytes is invalid, {} needs {}",
                    nonce.map_or(0, <[u8]>::len),
                    self.security_policy,
                    expected
                );
                Err(StatusCode::BadNonceInvalid)
            }
        }
    }

    /// Derives the keys of both directions from the exchanged nonces. What this end sends is
    /// keyed with the remote nonce as secret, what it receives with its own.
    pub fn derive_keys(&mut self) -> Result<(), StatusCode> {
        if self.security_policy == SecurityPolicy::None {
            return Ok(());
        }
        let policy = self.security_policy;
        self.remote_keys = Some(DirectionKeys::derive(
            policy,
            &self.local_nonce,
            &self.remote_nonce,
        )?);
        self.local_keys = Some(DirectionKeys::derive(
            policy,
            &self.remote_nonce,
            &self.local_nonce,
        )?);
        trace!("Keys derived for token {}", self.token_id);
        Ok(())
    }

    fn local_keys(&self) -> Result<&DirectionKeys, StatusCode> {
        self.local_keys.as_ref().ok_or_else(|| {
            error!("Keys for token {} have not been derived", self.token_id);
            StatusCode::BadSecureChannelTokenUnknown
        })
    }

    /// The keys a received chunk was secured with. The first chunk under the current token
    /// retires the keys of the previous one.
    fn remote_keys_for_token(&mut self, token_id: u32) -> Result<DirectionKeys, StatusCode> {
        if token_id != self.token_id {
            return match &self.previous_remote_keys {
                Some((previous, keys)) if *previous == token_id => {
                    trace!("Chunk secured with the previous token {}", token_id);
                    Ok(keys.clone())
                }
                _ => {
                    error!(
                        "Chunk secured with token {}, the channel token is {}",
                        token_id, self.token_id
                    );
                    Err(StatusCode::BadSecureChannelTokenUnknown)
                }
            };
        }
        if let Some((previous, _)) = self.previous_remote_keys.take() {
            debug!("Token {} is in use, keys of token {} dropped", token_id, previous);
        }
        self.remote_keys.clone().ok_or_else(|| {
            error!("Keys for token {} have not been derived", token_id);
            StatusCode::BadSecureChannelTokenUnknown
        })
    }

    /// Size of the signature a chunk with this header carries.
    pub fn signature_size(&self, security_header: &SecurityHeader) -> Result<usize, StatusCode> {
        match security_header {
            SecurityHeader::Asymmetric(header) if header.sender_certificate.is_null() => Ok(0),
            SecurityHeader::Asymmetric(header) => {
                Ok(X509::from_byte_string(&header.sender_certificate)?
                    .public_key()?
                    .size())
            }
            SecurityHeader::Symmetric(_) if self.signs_messages() => {
                Ok(self.security_policy.symmetric_signature_size())
            }
            SecurityHeader::Symmetric(_) => Ok(0),
        }
    }

    /// `None` when chunks with this header are not encrypted.
    fn padding_for(&self, security_header: &SecurityHeader) -> Result<Option<Padding>, StatusCode> {
        if self.security_policy == SecurityPolicy::None {
            return Ok(None);
        }
        match security_header {
            SecurityHeader::Asymmetric(_) => {
                // Encrypted with the receiver's key, so its size sets the block
                let Some(remote_cert) = &self.remote_cert else {
                    error!("No server certificate to encrypt the chunk with");
                    return Err(StatusCode::BadCertificateInvalid);
                };
                let key = remote_cert.public_key()?;
                let rsa_padding = self.security_policy.asymmetric_encryption_padding()?;
                Ok(Some(Padding::new(
                    key.plain_text_block_size(rsa_padding),
                    key.size(),
                )))
            }
            SecurityHeader::Symmetric(_)
                if self.security_mode == MessageSecurityMode::SignAndEncrypt =>
            {
                Ok(Some(Padding::new(
                    self.security_policy.plain_block_size(),
                    self.security_policy.symmetric_signature_size(),
                )))
            }
            SecurityHeader::Symmetric(_) => Ok(None),
        }
    }

    /// Block size an encrypted body is padded to, 0 when unencrypted
    pub fn plain_text_block_size(
        &self,
        security_header: &SecurityHeader,
    ) -> Result<usize, StatusCode> {
        Ok(self
            .padding_for(security_header)?
            .map_or(0, |padding| padding.block_size))
    }

    /// Returns the padding for a body, including the size bytes, and the number of size bytes.
    pub fn padding_size(
        &self,
        security_header: &SecurityHeader,
        body_size: usize,
        signature_size: usize,
    ) -> Result<(usize, usize), StatusCode> {
        Ok(self
            .padding_for(security_header)?
            .map_or((0, 0), |padding| {
                (padding.total(body_size, signature_size), padding.size_bytes)
            }))
    }

    /// The chunk with padding appended and zeroes where the signature goes.
    fn pad_and_reserve_signature(
        &self,
        chunk: &MessageChunk,
        info: &ChunkInfo,
    ) -> Result<Vec<u8>, StatusCode> {
        let signature_size = self.signature_size(&info.security_header)?;
        let mut data = Vec::with_capacity(chunk.data.len() + 1024);
        data.extend_from_slice(&chunk.data);
        if let Some(padding) = self.padding_for(&info.security_header)? {
            let total = padding.total(info.body_length, signature_size);
            padding.append(&mut data, total);
        }
        data.resize(data.len() + signature_size, 0);
        let message_size = data.len();
        set_message_size(&mut data, message_size)?;
        Ok(data)
    }

    /// Signs and encrypts a chunk into `dst` as the policy and mode require, returning the
    /// size written.
    pub fn apply_security(&self, chunk: &MessageChunk, dst: &mut [u8]) -> Result<usize, StatusCode> {
        let is_open = chunk.is_open_secure_channel(&self.decoding_options);
        let secured = self.security_policy != SecurityPolicy::None
            && (is_open || self.signs_messages());
        if !secured {
            return copy_into(&chunk.data, dst);
        }

        let info = chunk.chunk_info(self)?;
        let data = self.pad_and_reserve_signature(chunk, &info)?;
        crate::core::debug::log_buffer("Chunk before securing", &data);
        let size = if is_open {
            self.asymmetric_sign_and_encrypt(data, info.sequence_header_offset, dst)?
        } else {
            self.symmetric_sign_and_encrypt(data, info.sequence_header_offset, dst)?
        };
        crate::core::debug::log_buffer("Chunk after securing", &dst[..size]);
        Ok(size)
    }

    /// Signs with our private key and encrypts with the server's public key. The header has to
    /// carry the encrypted size before it is signed.
    fn asymmetric_sign_and_encrypt(
        &self,
        mut data: Vec<u8>,
        encrypted_start: usize,
        dst: &mut [u8],
    ) -> Result<usize, StatusCode> {
        let policy = self.security_policy;
        let Some(signing_key) = &self.private_key else {
            error!("No private key to sign the open secure channel request with");
            return Err(StatusCode::BadSecurityChecksFailed);
        };
        let Some(remote_cert) = &self.remote_cert else {
            error!("No server certificate to encrypt the open secure channel request with");
            return Err(StatusCode::BadCertificateInvalid);
        };
        let encryption_key = remote_cert.public_key()?;

        let cipher_text_size = encryption_key.calculate_cipher_text_size(
            data.len() - encrypted_start,
            policy.asymmetric_encryption_padding()?,
        );
        let secured_size = encrypted_start + cipher_text_size;
        if secured_size > dst.len() {
            error!(
                "Encrypted chunk of {} bytes does not fit a {} byte buffer",
                secured_size,
                dst.len()
            );
            return Err(StatusCode::BadEncodingLimitsExceeded);
        }
        set_message_size(&mut data, secured_size)?;

        let signature_start = data.len() - signing_key.size();
        let (signed, signature) = data.split_at_mut(signature_start);
        policy.asymmetric_sign(signing_key, signed, signature)?;

        dst[..encrypted_start].copy_from_slice(&data[..encrypted_start]);
        let encrypted = policy.asymmetric_encrypt(
            &encryption_key,
            &data[encrypted_start..],
            &mut dst[encrypted_start..],
        )?;
        if encrypted != cipher_text_size {
            error!(
                "Encrypted {} bytes, expected {}",
                encrypted, cipher_text_size
            );
            return Err(StatusCode::BadUnexpectedError);
        }
        Ok(secured_size)
    }

    fn symmetric_sign_and_encrypt(
        &self,
        mut data: Vec<u8>,
        encrypted_start: usize,
        dst: &mut [u8],
    ) -> Result<usize, StatusCode> {
        let policy = self.security_policy;
        let keys = self.local_keys()?;
        let signature_start = data.len() - policy.symmetric_signature_size();
        let (signed, signature) = data.split_at_mut(signature_start);
        policy.symmetric_sign(&keys.signing, signed, signature)?;

        match self.security_mode {
            MessageSecurityMode::Sign => copy_into(&data, dst),
            MessageSecurityMode::SignAndEncrypt => {
                if dst.len() < data.len() + CIPHER_SLACK {
                    error!("Buffer is too small for an encrypted chunk of {} bytes", data.len());
                    return Err(StatusCode::BadEncodingLimitsExceeded);
                }
                dst[..encrypted_start].copy_from_slice(&data[..encrypted_start]);
                let encrypted = policy.symmetric_encrypt(
                    &keys.encrypting,
                    &keys.iv,
                    &data[encrypted_start..],
                    &mut dst[encrypted_start..data.len() + CIPHER_SLACK],
                )?;
                Ok(encrypted_start + encrypted)
            }
            mode => {
                error!("Cannot secure a chunk in mode {:?}", mode);
                Err(StatusCode::BadSecurityModeRejected)
            }
        }
    }

    /// Decrypts and verifies a received chunk as the policy and mode require, stripping its
    /// padding and signature.
    pub fn verify_and_remove_security(&mut self, src: &[u8]) -> Result<MessageChunk, StatusCode> {
        let (message_size, security_header, encrypted_start) = {
            let mut stream = Cursor::new(src);
            let header = MessageChunkHeader::decode(&mut stream, &self.decoding_options)?;
            let security_header = SecurityHeader::decode_for(
                &mut stream,
                header.message_type.is_open_secure_channel(),
                &self.decoding_options,
            )?;
            (
                header.message_size as usize,
                security_header,
                stream.position() as usize,
            )
        };
        if message_size != src.len() {
            error!(
                "Chunk header says {} bytes but {} were received",
                message_size,
                src.len()
            );
            return Err(StatusCode::BadUnexpectedError);
        }

        let data = match security_header {
            SecurityHeader::Asymmetric(header) => self.open_asymmetric(src, &header, encrypted_start)?,
            SecurityHeader::Symmetric(header) if self.signs_messages() => {
                self.open_symmetric(src, header.token_id, encrypted_start)?
            }
            SecurityHeader::Symmetric(_) => src.to_vec(),
        };
        Ok(MessageChunk { data })
    }

    fn open_asymmetric(
        &self,
        src: &[u8],
        header: &AsymmetricSecurityHeader,
        encrypted_start: usize,
    ) -> Result<Vec<u8>, StatusCode> {
        let policy_uri = header.security_policy_uri.as_ref();
        let policy = SecurityPolicy::from_uri(policy_uri);
        if policy == SecurityPolicy::Unknown || policy != self.security_policy {
            error!(
                "Chunk security policy \"{}\" does not match the channel's {}",
                policy_uri, self.security_policy
            );
            return Err(StatusCode::BadSecurityPolicyRejected);
        }
        if policy == SecurityPolicy::None {
            return Ok(src.to_vec());
        }
        if !policy.is_supported() {
            error!("Security policy {} is not supported", policy);
            return Err(StatusCode::BadSecurityPolicyRejected);
        }
        if header.sender_certificate.is_null() {
            error!("Asymmetric security header has no sender certificate");
            return Err(StatusCode::BadCertificateInvalid);
        }
        let verification_key = X509::from_byte_string(&header.sender_certificate)?.public_key()?;

        // The thumbprint names the certificate the sender encrypted for
        let (Some(cert), Some(private_key)) = (&self.cert, &self.private_key) else {
            error!("No application certificate and key to decrypt with");
            return Err(StatusCode::BadNoValidCertificates);
        };
        if cert.thumbprint()?.value() != header.receiver_certificate_thumbprint.as_ref() {
            error!("Chunk was encrypted for a different certificate");
            return Err(StatusCode::BadNoValidCertificates);
        }

        let mut plain = vec![0u8; src.len() - encrypted_start];
        let decrypted = policy.asymmetric_decrypt(private_key, &src[encrypted_start..], &mut plain)?;
        plain.truncate(decrypted);
        if decrypted < verification_key.size() {
            error!("Decrypted chunk is too small to hold a signature");
            return Err(StatusCode::BadSecurityChecksFailed);
        }

        let mut data = Vec::with_capacity(encrypted_start + decrypted);
        data.extend_from_slice(&src[..encrypted_start]);
        data.extend_from_slice(&plain);
        let signature_start = data.len() - verification_key.size();
        policy.asymmetric_verify_signature(
            &verification_key,
            &data[..signature_start],
            &data[signature_start..],
        )?;

        // Padded for our key
        let padding_start = Padding::strip(&data, signature_start, cert.public_key()?.size())?;
        data.truncate(padding_start);
        set_message_size(&mut data, padding_start)?;
        Ok(data)
    }

    fn open_symmetric(
        &mut self,
        src: &[u8],
        token_id: u32,
        encrypted_start: usize,
    ) -> Result<Vec<u8>, StatusCode> {
        let keys = self.remote_keys_for_token(token_id)?;
        let policy = self.security_policy;
        let signature_size = policy.symmetric_signature_size();
        if src.len() < encrypted_start + signature_size {
            error!("Chunk of {} bytes is too small to hold a signature", src.len());
            return Err(StatusCode::BadSecurityChecksFailed);
        }

        let encrypted = self.security_mode == MessageSecurityMode::SignAndEncrypt;
        let mut data = if encrypted {
            let mut plain = vec![0u8; src.len() - encrypted_start + CIPHER_SLACK];
            let decrypted = policy.symmetric_decrypt(
                &keys.encrypting,
                &keys.iv,
                &src[encrypted_start..],
                &mut plain,
            )?;
            let mut data = Vec::with_capacity(encrypted_start + decrypted);
            data.extend_from_slice(&src[..encrypted_start]);
            data.extend_from_slice(&plain[..decrypted]);
            data
        } else {
            src.to_vec()
        };

        let signature_start = data
            .len()
            .checked_sub(signature_size)
            .ok_or(StatusCode::BadSecurityChecksFailed)?;
        policy.symmetric_verify_signature(
            &keys.signing,
            &data[..signature_start],
            &data[signature_start..],
        )?;

        let end = if encrypted {
            Padding::strip(&data, signature_start, signature_size)?
        } else {
            signature_start
        };
        data.truncate(end);
        set_message_size(&mut data, end)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::comms::message_chunk::MessageIsFinalType;

    fn token(token_id: u32, revised_lifetime: u32) -> ChannelSecurityToken {
        ChannelSecurityToken {
            channel_id: 1,
            token_id,
            created_at: DateTime::now(),
            revised_lifetime,
        }
    }

    fn exchange_nonces(client: &mut SecureChannel, server: &mut SecureChannel) {
        client.create_random_nonce();
        server.create_random_nonce();
        let client_nonce = client.local_nonce().to_vec();
        let server_nonce = server.local_nonce().to_vec();
        client.set_remote_nonce(&server_nonce);
        server.set_remote_nonce(&client_nonce);
        client.derive_keys().unwrap();
        server.derive_keys().unwrap();
    }

    /// Two ends of one channel, each able to read what the other writes
    fn channel_pair(
        security_policy: SecurityPolicy,
        security_mode: MessageSecurityMode,
    ) -> (SecureChannel, SecureChannel) {
        let mut client = SecureChannel::new_no_certificate_store();
        let mut server = SecureChannel::new_no_certificate_store();
        for channel in [&mut client, &mut server] {
            channel.set_security_policy(security_policy);
            channel.set_security_mode(security_mode);
            channel.set_security_token(token(1, 60000));
        }
        exchange_nonces(&mut client, &mut server);
        (client, server)
    }

    fn secure(channel: &SecureChannel, body: &[u8]) -> Vec<u8> {
        let chunk = MessageChunk::new(
            1,
            1,
            MessageChunkType::Message,
            MessageIsFinalType::Final,
            channel,
            body,
        )
        .unwrap();
        let mut dst = vec![0u8; chunk.data.len() + 1024];
        let size = channel.apply_security(&chunk, &mut dst).unwrap();
        dst.truncate(size);
        dst
    }

    fn body_of(channel: &SecureChannel, chunk: &MessageChunk) -> Vec<u8> {
        let info = chunk.chunk_info(channel).unwrap();
        chunk.data[info.body_offset..info.body_offset + info.body_length].to_vec()
    }

    #[test]
    fn renew_at_75_percent_of_lifetime() {
        let mut channel = SecureChannel::new_no_certificate_store();
        assert!(!channel.should_renew_security_token());
        channel.set_security_token(token(1, 10000));
        let created_at = channel.token_created_at();
        assert!(!channel.should_renew_security_token_at(created_at + Duration::milliseconds(7000)));
        assert!(!channel.should_renew_security_token_at(created_at + Duration::milliseconds(7500)));
        assert!(channel.should_renew_security_token_at(created_at + Duration::milliseconds(7501)));
    }

    #[test]
    fn symmetric_round_trip_each_policy() {
        let body = (0..200u8).collect::<Vec<u8>>();
        for security_policy in [
            SecurityPolicy::Basic256Sha256,
            SecurityPolicy::Aes128Sha256RsaOaep,
            SecurityPolicy::Aes256Sha256RsaPss,
        ] {
            for security_mode in [MessageSecurityMode::Sign, MessageSecurityMode::SignAndEncrypt] {
                let (client, mut server) = channel_pair(security_policy, security_mode);
                let secured = secure(&client, &body);
                if security_mode == MessageSecurityMode::SignAndEncrypt {
                    assert!(!secured.windows(body.len()).any(|w| w == &body[..]));
                }
                let chunk = server.verify_and_remove_security(&secured).unwrap();
                assert_eq!(
                    body_of(&server, &chunk),
                    body,
                    "{} {:?}",
                    security_policy,
                    security_mode
                );
            }
        }
    }

    #[test]
    fn tampered_chunk_is_rejected() {
        let (client, mut server) =
            channel_pair(SecurityPolicy::Basic256Sha256, MessageSecurityMode::Sign);
        let mut secured = secure(&client, b"hello world");
        let last_body_byte = secured.len() - 33;
        secured[last_body_byte] ^= 0xff;
        assert_eq!(
            server.verify_and_remove_security(&secured).unwrap_err(),
            StatusCode::BadSecurityChecksFailed
        );
    }

    #[test]
    fn previous_token_keys_are_retained_until_new_token_is_used() {
        let (mut client, mut server) =
            channel_pair(SecurityPolicy::Basic256Sha256, MessageSecurityMode::SignAndEncrypt);

        // Sent under token 1 before the renewal completes
        let in_flight = secure(&server, b"old token");

        client.set_security_token(token(2, 60000));
        server.set_security_token(token(2, 60000));
        exchange_nonces(&mut client, &mut server);
        assert!(client.has_previous_token());

        let chunk = client.verify_and_remove_security(&in_flight).unwrap();
        assert_eq!(body_of(&client, &chunk), b"old token");
        assert!(client.has_previous_token());

        let fresh = secure(&server, b"new token");
        let chunk = client.verify_and_remove_security(&fresh).unwrap();
        assert_eq!(body_of(&client, &chunk), b"new token");
        assert!(!client.has_previous_token());

        assert_eq!(
            client.verify_and_remove_security(&in_flight).unwrap_err(),
            StatusCode::BadSecureChannelTokenUnknown
        );
    }

    #[test]
    fn padding_is_a_block_multiple() {
        let (client, _) =
            channel_pair(SecurityPolicy::Aes128Sha256RsaOaep, MessageSecurityMode::SignAndEncrypt);
        let header = client.make_security_header(MessageChunkType::Message).unwrap();
        for body_size in [0usize, 1, 15, 16, 17, 100] {
            let (padding_size, size_bytes) = client.padding_size(&header, body_size, 32).unwrap();
            assert_eq!(size_bytes, 1);
            assert_eq!((8 + body_size + 32 + padding_size) % 16, 0);
        }
        let (sign_only, _) =
            channel_pair(SecurityPolicy::Aes128Sha256RsaOaep, MessageSecurityMode::Sign);
        assert_eq!(sign_only.padding_size(&header, 17, 32).unwrap(), (0, 0));
    }

    #[test]
    fn two_byte_padding_is_checked() {
        // A 4096 bit key pads with a second size byte
        let padding = Padding::new(446, 512);
        let mut data = vec![7u8; 20];
        let total = padding.total(300, 512);
        padding.append(&mut data, total);
        assert_eq!(Padding::strip(&data, data.len(), 512).unwrap(), 20);

        data[20] ^= 1;
        assert_eq!(
            Padding::strip(&data, data.len(), 512),
            Err(StatusCode::BadSecurityChecksFailed)
        );
    }
}
