// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::{
    date_time::DateTime, diagnostic_info::DiagnosticInfo, extension_object::ExtensionObject,
    node_id::NodeId, status_code::StatusCode, string::UAString,
};

ua_struct! {
    /// The `RequestHeader` contains information common to every request from a client to the server.
    pub struct RequestHeader {
        /// The secret session identifier used to verify that the request is associated with
        /// the session.
        pub authentication_token: NodeId,
        pub timestamp: DateTime,
        /// A client defined handle which the server returns in the response header.
        pub request_handle: u32,
        /// A bit mask identifying the types of vendor-specific diagnostics to be returned.
        pub return_diagnostics: u32,
        pub audit_entry_id: UAString,
        /// How long the client is willing to wait for a response, in milliseconds. 0 is no timeout.
        pub timeout_hint: u32,
        pub additional_header: ExtensionObject,
    }
}

impl RequestHeader {
    pub fn new(authentication_token: &NodeId, timestamp: &DateTime, request_handle: u32) -> RequestHeader {
        RequestHeader {
            authentication_token: authentication_token.clone(),
            timestamp: *timestamp,
            request_handle,
            return_diagnostics: 0,
            audit_entry_id: UAString::null(),
            timeout_hint: 0,
            additional_header: ExtensionObject::null(),
        }
    }

    pub fn dummy() -> RequestHeader {
        RequestHeader::new(&NodeId::null(), &DateTime::now(), 1)
    }
}

ua_struct! {
    /// The `ResponseHeader` contains information common to every response from server to client.
    pub struct ResponseHeader {
        pub timestamp: DateTime,
        pub request_handle: u32,
        pub service_result: StatusCode,
        pub service_diagnostics: DiagnosticInfo,
        pub string_table: Option<Vec<UAString>>,
        pub additional_header: ExtensionObject,
    }
}

impl ResponseHeader {
    pub fn new_good(request_header: &RequestHeader) -> ResponseHeader {
        ResponseHeader::new_service_result(request_header, StatusCode::Good)
    }

    pub fn new_service_result(
        request_header: &RequestHeader,
        service_result: StatusCode,
    ) -> ResponseHeader {
        ResponseHeader {
            timestamp: DateTime::now(),
            request_handle: request_header.request_handle,
            service_result,
            service_diagnostics: DiagnosticInfo::default(),
            string_table: None,
            additional_header: ExtensionObject::null(),
        }
    }

    /// For testing, nothing else
    pub fn null() -> ResponseHeader {
        ResponseHeader::new_service_result(&RequestHeader::dummy(), StatusCode::Good)
    }
}

ua_struct! {
    /// Returned by the server in place of the expected response when a service fails as a whole.
    pub struct ServiceFault = ServiceFault_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
    }
}

impl ServiceFault {
    pub fn new(request_header: &RequestHeader, service_result: StatusCode) -> ServiceFault {
        ServiceFault {
            response_header: ResponseHeader::new_service_result(request_header, service_result),
        }
    }
}
