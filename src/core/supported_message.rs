// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Defines all messages, request or response that are supported by the
//! implementation. The SupportedMessage enumeration contains a value for
//! each of those messages enabling them to be passed around in an agnostic
//! fashion.

use std::io::{Read, Write};

use crate::types::{
    encoding::*,
    node_id::NodeId,
    node_ids::ObjectId,
    service_types::*,
    status_code::StatusCode,
};

/// This macro helps avoid tedious repetition as new messages are added. Requests carry a
/// request header and responses carry a response header.
macro_rules! supported_messages {
    (
        requests: [ $( $req:ident = $req_id:ident ),* $(,)? ],
        responses: [ $( $resp:ident = $resp_id:ident ),* $(,)? ] $(,)?
    ) => {
        #[derive(Debug, PartialEq, Clone)]
        pub enum SupportedMessage {
            /// An invalid request / response of some form
            Invalid(ObjectId),
            $( $req(Box<$req>), )*
            $( $resp(Box<$resp>), )*
        }

        impl BinaryEncoder<SupportedMessage> for SupportedMessage {
            fn byte_len(&self) -> usize {
                match self {
                    SupportedMessage::Invalid(_) => 0,
                    $( SupportedMessage::$req(value) => value.byte_len(), )*
                    $( SupportedMessage::$resp(value) => value.byte_len(), )*
                }
            }

            fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
                match self {
                    SupportedMessage::Invalid(object_id) => {
                        error!("Unsupported message {:?}", object_id);
                        Err(StatusCode::BadServiceUnsupported)
                    }
                    $( SupportedMessage::$req(value) => value.encode(stream), )*
                    $( SupportedMessage::$resp(value) => value.encode(stream), )*
                }
            }

            fn decode<S: Read>(_: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
                // Messages are preceded by their node id, use decode_by_object_id
                error!("Cannot decode a stream to a supported message type without an object id");
                Err(StatusCode::BadDecodingError)
            }
        }

        impl SupportedMessage {
            pub fn decode_by_object_id<S: Read>(
                stream: &mut S,
                object_id: ObjectId,
                decoding_options: &DecodingOptions,
            ) -> EncodingResult<Self> {
                trace!("decoding object_id {:?}", object_id);
                let decoded_message = match object_id {
                    $(
                        ObjectId::$req_id => {
                            SupportedMessage::$req(Box::new($req::decode(stream, decoding_options)?))
                        }
                    )*
                    $(
                        ObjectId::$resp_id => {
                            SupportedMessage::$resp(Box::new($resp::decode(stream, decoding_options)?))
                        }
                    )*
                    _ => {
                        debug!("decoding unsupported for object id {:?}", object_id);
                        SupportedMessage::Invalid(object_id)
                    }
                };
                Ok(decoded_message)
            }

            /// The node id of the message's binary encoding, sent ahead of the message body
            pub fn node_id(&self) -> NodeId {
                match self {
                    SupportedMessage::Invalid(object_id) => NodeId::from(*object_id),
                    $( SupportedMessage::$req(_) => NodeId::from(ObjectId::$req_id), )*
                    $( SupportedMessage::$resp(_) => NodeId::from(ObjectId::$resp_id), )*
                }
            }

            pub fn request_header(&self) -> Option<&RequestHeader> {
                match self {
                    $( SupportedMessage::$req(value) => Some(&value.request_header), )*
                    _ => None,
                }
            }

            pub fn response_header(&self) -> Option<&ResponseHeader> {
                match self {
                    $( SupportedMessage::$resp(value) => Some(&value.response_header), )*
                    _ => None,
                }
            }

            pub fn is_request(&self) -> bool {
                self.request_header().is_some()
            }
        }

        $(
            impl From<$req> for SupportedMessage {
                fn from(value: $req) -> Self {
                    SupportedMessage::$req(Box::new(value))
                }
            }
        )*
        $(
            impl From<$resp> for SupportedMessage {
                fn from(value: $resp) -> Self {
                    SupportedMessage::$resp(Box::new(value))
                }
            }
        )*
    };
}

impl SupportedMessage {
    /// The handle of the request, or the handle echoed in the response
    pub fn request_handle(&self) -> u32 {
        if let Some(header) = self.request_header() {
            header.request_handle
        } else if let Some(header) = self.response_header() {
            header.request_handle
        } else {
            0
        }
    }
}

supported_messages! {
    requests: [
        OpenSecureChannelRequest = OpenSecureChannelRequest_Encoding_DefaultBinary,
        CloseSecureChannelRequest = CloseSecureChannelRequest_Encoding_DefaultBinary,
        GetEndpointsRequest = GetEndpointsRequest_Encoding_DefaultBinary,
        CreateSessionRequest = CreateSessionRequest_Encoding_DefaultBinary,
        ActivateSessionRequest = ActivateSessionRequest_Encoding_DefaultBinary,
        CloseSessionRequest = CloseSessionRequest_Encoding_DefaultBinary,
        CancelRequest = CancelRequest_Encoding_DefaultBinary,
        ReadRequest = ReadRequest_Encoding_DefaultBinary,
        WriteRequest = WriteRequest_Encoding_DefaultBinary,
        BrowseRequest = BrowseRequest_Encoding_DefaultBinary,
        BrowseNextRequest = BrowseNextRequest_Encoding_DefaultBinary,
        CallRequest = CallRequest_Encoding_DefaultBinary,
        CreateSubscriptionRequest = CreateSubscriptionRequest_Encoding_DefaultBinary,
        ModifySubscriptionRequest = ModifySubscriptionRequest_Encoding_DefaultBinary,
        SetPublishingModeRequest = SetPublishingModeRequest_Encoding_DefaultBinary,
        TransferSubscriptionsRequest = TransferSubscriptionsRequest_Encoding_DefaultBinary,
        DeleteSubscriptionsRequest = DeleteSubscriptionsRequest_Encoding_DefaultBinary,
        PublishRequest = PublishRequest_Encoding_DefaultBinary,
        RepublishRequest = RepublishRequest_Encoding_DefaultBinary,
        CreateMonitoredItemsRequest = CreateMonitoredItemsRequest_Encoding_DefaultBinary,
        ModifyMonitoredItemsRequest = ModifyMonitoredItemsRequest_Encoding_DefaultBinary,
        SetMonitoringModeRequest = SetMonitoringModeRequest_Encoding_DefaultBinary,
        SetTriggeringRequest = SetTriggeringRequest_Encoding_DefaultBinary,
        DeleteMonitoredItemsRequest = DeleteMonitoredItemsRequest_Encoding_DefaultBinary,
    ],
    responses: [
        ServiceFault = ServiceFault_Encoding_DefaultBinary,
        OpenSecureChannelResponse = OpenSecureChannelResponse_Encoding_DefaultBinary,
        CloseSecureChannelResponse = CloseSecureChannelResponse_Encoding_DefaultBinary,
        GetEndpointsResponse = GetEndpointsResponse_Encoding_DefaultBinary,
        CreateSessionResponse = CreateSessionResponse_Encoding_DefaultBinary,
        ActivateSessionResponse = ActivateSessionResponse_Encoding_DefaultBinary,
        CloseSessionResponse = CloseSessionResponse_Encoding_DefaultBinary,
        CancelResponse = CancelResponse_Encoding_DefaultBinary,
        ReadResponse = ReadResponse_Encoding_DefaultBinary,
        WriteResponse = WriteResponse_Encoding_DefaultBinary,
        BrowseResponse = BrowseResponse_Encoding_DefaultBinary,
        BrowseNextResponse = BrowseNextResponse_Encoding_DefaultBinary,
        CallResponse = CallResponse_Encoding_DefaultBinary,
        CreateSubscriptionResponse = CreateSubscriptionResponse_Encoding_DefaultBinary,
        ModifySubscriptionResponse = ModifySubscriptionResponse_Encoding_DefaultBinary,
        SetPublishingModeResponse = SetPublishingModeResponse_Encoding_DefaultBinary,
        TransferSubscriptionsResponse = TransferSubscriptionsResponse_Encoding_DefaultBinary,
        DeleteSubscriptionsResponse = DeleteSubscriptionsResponse_Encoding_DefaultBinary,
        PublishResponse = PublishResponse_Encoding_DefaultBinary,
        RepublishResponse = RepublishResponse_Encoding_DefaultBinary,
        CreateMonitoredItemsResponse = CreateMonitoredItemsResponse_Encoding_DefaultBinary,
        ModifyMonitoredItemsResponse = ModifyMonitoredItemsResponse_Encoding_DefaultBinary,
        SetMonitoringModeResponse = SetMonitoringModeResponse_Encoding_DefaultBinary,
        SetTriggeringResponse = SetTriggeringResponse_Encoding_DefaultBinary,
        DeleteMonitoredItemsResponse = DeleteMonitoredItemsResponse_Encoding_DefaultBinary,
    ],
}
