// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the `StatusCode` type and the subset of standard codes the client deals with.

use std::{
    error::Error,
    fmt,
    io::{self, Read, Write},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::encoding::*;

/// A 32-bit status code. The top two bits carry the severity, the next 14 the code and the
/// low 16 bits carry info flags.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(u32);

macro_rules! status_codes {
    ( $( $name:ident = $value:literal ),* $(,)? ) => {
        #[allow(non_upper_case_globals)]
        impl StatusCode {
            $( pub const $name: StatusCode = StatusCode($value); )*

            /// Returns the symbolic name of the status, ignoring info bits.
            pub fn name(&self) -> &'static str {
                match self.status().0 {
                    $( $value => stringify!($name), )*
                    _ => "Unknown",
                }
            }

            /// Looks up a status code by its symbolic name.
            pub fn from_name(name: &str) -> Option<StatusCode> {
                match name {
                    $( stringify!($name) => Some(StatusCode($value)), )*
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    Good = 0x0000_0000,
    GoodSubscriptionTransferred = 0x002D_0000,
    GoodCompletesAsynchronously = 0x002E_0000,
    GoodOverload = 0x002F_0000,
    GoodClamped = 0x0030_0000,
    GoodNoData = 0x00A5_0000,
    GoodMoreData = 0x00A6_0000,
    UncertainLastUsableValue = 0x4090_0000,
    UncertainInitialValue = 0x4092_0000,
    BadUnexpectedError = 0x8001_0000,
    BadInternalError = 0x8002_0000,
    BadOutOfMemory = 0x8003_0000,
    BadResourceUnavailable = 0x8004_0000,
    BadCommunicationError = 0x8005_0000,
    BadEncodingError = 0x8006_0000,
    BadDecodingError = 0x8007_0000,
    BadEncodingLimitsExceeded = 0x8008_0000,
    BadUnknownResponse = 0x8009_0000,
    BadTimeout = 0x800A_0000,
    BadServiceUnsupported = 0x800B_0000,
    BadShutdown = 0x800C_0000,
    BadServerNotConnected = 0x800D_0000,
    BadServerHalted = 0x800E_0000,
    BadNothingToDo = 0x800F_0000,
    BadTooManyOperations = 0x8010_0000,
    BadDataTypeIdUnknown = 0x8011_0000,
    BadCertificateInvalid = 0x8012_0000,
    BadSecurityChecksFailed = 0x8013_0000,
    BadCertificateTimeInvalid = 0x8014_0000,
    BadCertificateIssuerTimeInvalid = 0x8015_0000,
    BadCertificateHostNameInvalid = 0x8016_0000,
    BadCertificateUriInvalid = 0x8017_0000,
    BadCertificateUseNotAllowed = 0x8018_0000,
    BadCertificateIssuerUseNotAllowed = 0x8019_0000,
    BadCertificateUntrusted = 0x801A_0000,
    BadCertificateRevocationUnknown = 0x801B_0000,
    BadCertificateIssuerRevocationUnknown = 0x801C_0000,
    BadCertificateRevoked = 0x801D_0000,
    BadCertificateIssuerRevoked = 0x801E_0000,
    BadUserAccessDenied = 0x801F_0000,
    BadIdentityTokenInvalid = 0x8020_0000,
    BadIdentityTokenRejected = 0x8021_0000,
    BadSecureChannelIdInvalid = 0x8022_0000,
    BadInvalidTimestamp = 0x8023_0000,
    BadNonceInvalid = 0x8024_0000,
    BadSessionIdInvalid = 0x8025_0000,
    BadSessionClosed = 0x8026_0000,
    BadSessionNotActivated = 0x8027_0000,
    BadSubscriptionIdInvalid = 0x8028_0000,
    BadRequestHeaderInvalid = 0x802A_0000,
    BadTimestampsToReturnInvalid = 0x802B_0000,
    BadRequestCancelledByClient = 0x802C_0000,
    BadNoCommunication = 0x8031_0000,
    BadWaitingForInitialData = 0x8032_0000,
    BadNodeIdInvalid = 0x8033_0000,
    BadNodeIdUnknown = 0x8034_0000,
    BadAttributeIdInvalid = 0x8035_0000,
    BadIndexRangeInvalid = 0x8036_0000,
    BadIndexRangeNoData = 0x8037_0000,
    BadDataEncodingInvalid = 0x8038_0000,
    BadDataEncodingUnsupported = 0x8039_0000,
    BadNotReadable = 0x803A_0000,
    BadNotWritable = 0x803B_0000,
    BadOutOfRange = 0x803C_0000,
    BadNotSupported = 0x803D_0000,
    BadNotFound = 0x803E_0000,
    BadObjectDeleted = 0x803F_0000,
    BadNotImplemented = 0x8040_0000,
    BadMonitoringModeInvalid = 0x8041_0000,
    BadMonitoredItemIdInvalid = 0x8042_0000,
    BadMonitoredItemFilterInvalid = 0x8043_0000,
    BadMonitoredItemFilterUnsupported = 0x8044_0000,
    BadFilterNotAllowed = 0x8045_0000,
    BadContinuationPointInvalid = 0x804A_0000,
    BadNoContinuationPoints = 0x804B_0000,
    BadReferenceTypeIdInvalid = 0x804C_0000,
    BadBrowseDirectionInvalid = 0x804D_0000,
    BadNodeNotInView = 0x804E_0000,
    BadServerUriInvalid = 0x804F_0000,
    BadSecurityModeRejected = 0x8054_0000,
    BadSecurityPolicyRejected = 0x8055_0000,
    BadTooManySessions = 0x8056_0000,
    BadUserSignatureInvalid = 0x8057_0000,
    BadApplicationSignatureInvalid = 0x8058_0000,
    BadNoValidCertificates = 0x8059_0000,
    BadRequestCancelledByRequest = 0x805A_0000,
    BadTypeMismatch = 0x8074_0000,
    BadMethodInvalid = 0x8075_0000,
    BadArgumentsMissing = 0x8076_0000,
    BadTooManySubscriptions = 0x8077_0000,
    BadTooManyPublishRequests = 0x8078_0000,
    BadNoSubscription = 0x8079_0000,
    BadSequenceNumberUnknown = 0x807A_0000,
    BadMessageNotAvailable = 0x807B_0000,
    BadInsufficientClientProfile = 0x807C_0000,
    BadTcpServerTooBusy = 0x807D_0000,
    BadTcpMessageTypeInvalid = 0x807E_0000,
    BadTcpSecureChannelUnknown = 0x807F_0000,
    BadTcpMessageTooLarge = 0x8080_0000,
    BadTcpNotEnoughResources = 0x8081_0000,
    BadTcpInternalError = 0x8082_0000,
    BadTcpEndpointUrlInvalid = 0x8083_0000,
    BadRequestInterrupted = 0x8084_0000,
    BadRequestTimeout = 0x8085_0000,
    BadSecureChannelClosed = 0x8086_0000,
    BadSecureChannelTokenUnknown = 0x8087_0000,
    BadSequenceNumberInvalid = 0x8088_0000,
    BadConfigurationError = 0x8089_0000,
    BadNotConnected = 0x808A_0000,
    BadDeviceFailure = 0x808B_0000,
    BadSensorFailure = 0x808C_0000,
    BadOutOfService = 0x808D_0000,
    BadDeadbandFilterInvalid = 0x808E_0000,
    BadInvalidArgument = 0x80AB_0000,
    BadConnectionRejected = 0x80AC_0000,
    BadDisconnect = 0x80AD_0000,
    BadConnectionClosed = 0x80AE_0000,
    BadInvalidState = 0x80AF_0000,
    BadEndOfStream = 0x80B0_0000,
    BadRequestTooLarge = 0x80B8_0000,
    BadResponseTooLarge = 0x80B9_0000,
    BadProtocolVersionUnsupported = 0x80BE_0000,
    BadMaxConnectionsReached = 0x80E7_0000,
    BadCertificateChainIncomplete = 0x810D_0000,
}

impl StatusCode {
    /// Mask of the severity and code, i.e. everything except the info bits.
    pub const STATUS_MASK: u32 = 0xFFFF_0000;
    /// Mask of the info bits.
    pub const BIT_MASK: u32 = 0x0000_FFFF;

    const SEVERITY_BAD: u32 = 0x8000_0000;
    const SEVERITY_UNCERTAIN: u32 = 0x4000_0000;

    pub const fn from_u32(value: u32) -> StatusCode {
        StatusCode(value)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns the info bits of the status code, i.e. it masks out the actual status code value
    pub fn bitflags(&self) -> u32 {
        self.0 & Self::BIT_MASK
    }

    /// Returns the status only, i.e. it masks out any info bits that come with the status code
    pub fn status(&self) -> StatusCode {
        StatusCode(self.0 & Self::STATUS_MASK)
    }

    /// Tests if the status code is bad
    pub fn is_bad(&self) -> bool {
        self.0 & Self::SEVERITY_BAD != 0
    }

    /// Tests if the status code is uncertain
    pub fn is_uncertain(&self) -> bool {
        !self.is_bad() && self.0 & Self::SEVERITY_UNCERTAIN != 0
    }

    /// Tests if the status code is good (i.e. not bad or uncertain)
    pub fn is_good(&self) -> bool {
        !self.is_bad() && !self.is_uncertain()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let bits = self.bitflags();
        if bits == 0 {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}+{:#06x}", self.name(), bits)
        }
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({:#010x})", self, self.0)
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        StatusCode(value)
    }
}

impl From<StatusCode> for u32 {
    fn from(value: StatusCode) -> Self {
        value.0
    }
}

impl BinaryEncoder<StatusCode> for StatusCode {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u32(stream, self.0)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(StatusCode(read_u32(stream)?))
    }
}

impl Error for StatusCode {}

impl From<StatusCode> for io::Error {
    fn from(e: StatusCode) -> io::Error {
        io::Error::new(io::ErrorKind::Other, format!("StatusCode {}", e))
    }
}

impl Serialize for StatusCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(StatusCode(u32::deserialize(deserializer)?))
    }
}

#[test]
fn status_code() {
    assert!(StatusCode::Good.is_good());
    assert!(!StatusCode::Good.is_bad());
    assert!(!StatusCode::Good.is_uncertain());

    assert!(StatusCode::UncertainLastUsableValue.is_uncertain());
    assert!(!StatusCode::UncertainLastUsableValue.is_bad());
    assert!(!StatusCode::UncertainLastUsableValue.is_good());

    assert!(StatusCode::BadDecodingError.is_bad());
    assert!(!StatusCode::BadDecodingError.is_uncertain());
    assert!(!StatusCode::BadDecodingError.is_good());

    let with_bits = StatusCode::from_u32(StatusCode::BadDecodingError.bits() | 0x0400);
    assert_eq!(with_bits.status(), StatusCode::BadDecodingError);
    assert_eq!(with_bits.bitflags(), 0x0400);
    assert_eq!(with_bits.name(), "BadDecodingError");
}

#[test]
fn status_code_names() {
    assert_eq!(StatusCode::BadTimeout.to_string(), "BadTimeout");
    assert_eq!(
        StatusCode::from_name("BadNodeIdUnknown"),
        Some(StatusCode::BadNodeIdUnknown)
    );
    assert_eq!(StatusCode::from_u32(0x8FFF_0000).name(), "Unknown");
}
