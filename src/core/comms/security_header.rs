// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::io::{Read, Write};

use crate::types::{constants, status_code::StatusCode, *};

use crate::crypto::{SecurityPolicy, Thumbprint, X509};

/// The header after the chunk header. OpenSecureChannel chunks are secured with the
/// certificates and carry an asymmetric header, every other chunk names the token whose keys
/// secure it.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityHeader {
    Asymmetric(AsymmetricSecurityHeader),
    Symmetric(SymmetricSecurityHeader),
}

impl SecurityHeader {
    pub fn byte_len(&self) -> usize {
        match self {
            SecurityHeader::Asymmetric(header) => header.byte_len(),
            SecurityHeader::Symmetric(header) => header.byte_len(),
        }
    }

    pub fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        match self {
            SecurityHeader::Asymmetric(header) => header.encode(stream),
            SecurityHeader::Symmetric(header) => header.encode(stream),
        }
    }

    /// Nothing in the header says which kind it is, that comes from the chunk's message type.
    pub fn decode_for<S: Read>(
        stream: &mut S,
        is_open_secure_channel: bool,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        Ok(if is_open_secure_channel {
            SecurityHeader::Asymmetric(AsymmetricSecurityHeader::decode(stream, decoding_options)?)
        } else {
            SecurityHeader::Symmetric(SymmetricSecurityHeader::decode(stream, decoding_options)?)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricSecurityHeader {
    pub token_id: u32,
}

impl BinaryEncoder<SymmetricSecurityHeader> for SymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u32(stream, self.token_id)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(SymmetricSecurityHeader {
            token_id: read_u32(stream)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsymmetricSecurityHeader {
    pub security_policy_uri: UAString,
    /// DER, null when the policy is None
    pub sender_certificate: ByteString,
    /// SHA-1 of the receiver's certificate, null when the policy is None
    pub receiver_certificate_thumbprint: ByteString,
}

impl BinaryEncoder<AsymmetricSecurityHeader> for AsymmetricSecurityHeader {
    fn byte_len(&self) -> usize {
        self.security_policy_uri.byte_len()
            + self.sender_certificate.byte_len()
            + self.receiver_certificate_thumbprint.byte_len()
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(self.security_policy_uri.encode(stream)?
            + self.sender_certificate.encode(stream)?
            + self.receiver_certificate_thumbprint.encode(stream)?)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let header = AsymmetricSecurityHeader {
            security_policy_uri: UAString::decode(stream, decoding_options)?,
            sender_certificate: ByteString::decode(stream, decoding_options)?,
            receiver_certificate_thumbprint: ByteString::decode(stream, decoding_options)?,
        };
        header.check_lengths()?;
        Ok(header)
    }
}

impl AsymmetricSecurityHeader {
    pub fn none() -> AsymmetricSecurityHeader {
        AsymmetricSecurityHeader {
            security_policy_uri: UAString::from(SecurityPolicy::None.to_uri()),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        }
    }

    pub fn new(
        security_policy: SecurityPolicy,
        sender_certificate: &X509,
        receiver_certificate_thumbprint: ByteString,
    ) -> Result<AsymmetricSecurityHeader, StatusCode> {
        Ok(AsymmetricSecurityHeader {
            security_policy_uri: UAString::from(security_policy.to_uri()),
            sender_certificate: sender_certificate.as_byte_string()?,
            receiver_certificate_thumbprint,
        })
    }

    fn check_lengths(&self) -> EncodingResult<()> {
        let certificate_len = self.sender_certificate.len();
        if certificate_len >= constants::MAX_CERTIFICATE_LENGTH {
            error!(
                "Sender certificate of {} bytes is over the limit of {}",
                certificate_len,
                constants::MAX_CERTIFICATE_LENGTH
            );
            return Err(StatusCode::BadDecodingError);
        }
        let thumbprint_len = self.receiver_certificate_thumbprint.len();
        if thumbprint_len != 0 && thumbprint_len != Thumbprint::THUMBPRINT_SIZE {
            error!(
                "Receiver thumbprint is {} bytes, a SHA-1 is {}",
                thumbprint_len,
                Thumbprint::THUMBPRINT_SIZE
            );
            return Err(StatusCode::BadDecodingError);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceHeader {
    pub sequence_number: u32,
    pub request_id: u32,
}

impl BinaryEncoder<SequenceHeader> for SequenceHeader {
    fn byte_len(&self) -> usize {
        8
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        Ok(write_u32(stream, self.sequence_number)? + write_u32(stream, self.request_id)?)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(SequenceHeader {
            sequence_number: read_u32(stream)?,
            request_id: read_u32(stream)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn header_kind_follows_message_type() {
        let bytes = SymmetricSecurityHeader { token_id: 7 }.encode_to_vec();
        let options = DecodingOptions::test();
        let header = SecurityHeader::decode_for(&mut Cursor::new(&bytes), false, &options).unwrap();
        assert_eq!(
            header,
            SecurityHeader::Symmetric(SymmetricSecurityHeader { token_id: 7 })
        );

        let none = AsymmetricSecurityHeader::none();
        let bytes = none.encode_to_vec();
        let header = SecurityHeader::decode_for(&mut Cursor::new(&bytes), true, &options).unwrap();
        assert_eq!(header.byte_len(), bytes.len());
        assert_eq!(header, SecurityHeader::Asymmetric(none));
    }

    #[test]
    fn short_thumbprint_is_rejected() {
        let header = AsymmetricSecurityHeader {
            receiver_certificate_thumbprint: ByteString::from(vec![1u8; 8]),
            ..AsymmetricSecurityHeader::none()
        };
        let bytes = header.encode_to_vec();
        assert_eq!(
            AsymmetricSecurityHeader::decode(&mut Cursor::new(bytes), &DecodingOptions::test()),
            Err(StatusCode::BadDecodingError)
        );
    }
}
