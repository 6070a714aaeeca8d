// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Errors returned across the client API.

use crate::types::{DynamicError, StatusCode};

/// An operation that is recognised but deliberately not implemented.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operation unsupported: {0}")]
pub struct OperationUnsupported(pub String);

impl OperationUnsupported {
    pub fn new(what: impl Into<String>) -> Self {
        Self(what.into())
    }
}

/// Errors returned by the client. Per-item failures such as an unknown node are not errors,
/// they come back as status codes inside the successful result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Socket or TCP level failure
    #[error("transport error: {0}")]
    Transport(StatusCode),
    /// Certificate rejected, signature or MAC check failed
    #[error("security error: {0}")]
    Security(StatusCode),
    /// Malformed message, decoding failure or a sequence violation
    #[error("protocol error: {0}")]
    Protocol(StatusCode),
    /// The server failed the request as a whole
    #[error("service fault: {0}")]
    ServiceFault(StatusCode),
    /// Operation on a closed or deleted entity
    #[error("invalid state: {0}")]
    State(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Unsupported(#[from] OperationUnsupported),
    #[error("operation cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The status code that best describes the error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Transport(s) | Error::Security(s) | Error::Protocol(s) | Error::ServiceFault(s) => *s,
            Error::State(_) => StatusCode::BadInvalidState,
            Error::InvalidArgument(_) => StatusCode::BadInvalidArgument,
            Error::Unsupported(_) => StatusCode::BadNotSupported,
            Error::Cancelled => StatusCode::BadRequestCancelledByClient,
            Error::Config(_) => StatusCode::BadConfigurationError,
        }
    }

    /// Transport and protocol failures are recovered by reconnecting. Security failures,
    /// including rejected credentials, never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Protocol(_))
    }

    fn is_transport(status: StatusCode) -> bool {
        status.name().starts_with("BadTcp")
            || matches!(
                status,
                StatusCode::BadCommunicationError
                    | StatusCode::BadConnectionRejected
                    | StatusCode::BadConnectionClosed
                    | StatusCode::BadDisconnect
                    | StatusCode::BadNotConnected
                    | StatusCode::BadServerHalted
                    | StatusCode::BadSecureChannelClosed
                    | StatusCode::BadEndOfStream
                    | StatusCode::BadRequestInterrupted
            )
    }

    fn is_security(status: StatusCode) -> bool {
        status.name().starts_with("BadCertificate")
            || matches!(
                status,
                StatusCode::BadSecurityChecksFailed
                    | StatusCode::BadSecurityModeRejected
                    | StatusCode::BadSecurityPolicyRejected
                    | StatusCode::BadSecureChannelIdInvalid
                    | StatusCode::BadSecureChannelTokenUnknown
                    | StatusCode::BadNonceInvalid
                    | StatusCode::BadUserAccessDenied
                    | StatusCode::BadUserSignatureInvalid
                    | StatusCode::BadIdentityTokenInvalid
                    | StatusCode::BadIdentityTokenRejected
            )
    }

    fn is_protocol(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::BadEncodingError
                | StatusCode::BadDecodingError
                | StatusCode::BadEncodingLimitsExceeded
                | StatusCode::BadRequestTooLarge
                | StatusCode::BadResponseTooLarge
                | StatusCode::BadUnknownResponse
                | StatusCode::BadSequenceNumberInvalid
                | StatusCode::BadProtocolVersionUnsupported
        )
    }
}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        if Self::is_transport(status) {
            Error::Transport(status)
        } else if Self::is_security(status) {
            Error::Security(status)
        } else if Self::is_protocol(status) {
            Error::Protocol(status)
        } else {
            Error::ServiceFault(status)
        }
    }
}

impl From<DynamicError> for Error {
    fn from(err: DynamicError) -> Self {
        match err {
            DynamicError::Unsupported(what) => Error::Unsupported(OperationUnsupported(what)),
            DynamicError::Invalid(what) => Error::InvalidArgument(what),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_codes() {
        assert_eq!(
            Error::from(StatusCode::BadTcpEndpointUrlInvalid),
            Error::Transport(StatusCode::BadTcpEndpointUrlInvalid)
        );
        assert_eq!(
            Error::from(StatusCode::BadConnectionClosed),
            Error::Transport(StatusCode::BadConnectionClosed)
        );
        assert_eq!(
            Error::from(StatusCode::BadCertificateUntrusted),
            Error::Security(StatusCode::BadCertificateUntrusted)
        );
        assert_eq!(
            Error::from(StatusCode::BadUserAccessDenied),
            Error::Security(StatusCode::BadUserAccessDenied)
        );
        assert_eq!(
            Error::from(StatusCode::BadDecodingError),
            Error::Protocol(StatusCode::BadDecodingError)
        );
        assert_eq!(
            Error::from(StatusCode::BadSequenceNumberInvalid),
            Error::Protocol(StatusCode::BadSequenceNumberInvalid)
        );
        assert_eq!(
            Error::from(StatusCode::BadTimeout),
            Error::ServiceFault(StatusCode::BadTimeout)
        );
        assert_eq!(
            Error::from(StatusCode::BadNodeIdUnknown),
            Error::ServiceFault(StatusCode::BadNodeIdUnknown)
        );
    }

    #[test]
    fn status_code_recovered() {
        for status in [
            StatusCode::BadCommunicationError,
            StatusCode::BadCertificateInvalid,
            StatusCode::BadEncodingError,
            StatusCode::BadSessionIdInvalid,
        ] {
            assert_eq!(Error::from(status).status_code(), status);
        }
        assert_eq!(
            Error::InvalidArgument("x".into()).status_code(),
            StatusCode::BadInvalidArgument
        );
    }

    #[test]
    fn retryable() {
        assert!(Error::from(StatusCode::BadCommunicationError).is_retryable());
        assert!(Error::from(StatusCode::BadDecodingError).is_retryable());
        assert!(!Error::from(StatusCode::BadUserAccessDenied).is_retryable());
        assert!(!Error::from(StatusCode::BadCertificateUntrusted).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }
}
