// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::{
    diagnostic_info::DiagnosticInfo, node_id::NodeId, status_code::StatusCode, variant::Variant,
};

use super::headers::{RequestHeader, ResponseHeader};

ua_struct! {
    pub struct CallMethodRequest {
        pub object_id: NodeId,
        pub method_id: NodeId,
        pub input_arguments: Option<Vec<Variant>>,
    }
}

ua_struct! {
    pub struct CallMethodResult {
        pub status_code: StatusCode,
        pub input_argument_results: Option<Vec<StatusCode>>,
        pub input_argument_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
        pub output_arguments: Option<Vec<Variant>>,
    }
}

ua_struct! {
    pub struct CallRequest = CallRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub methods_to_call: Option<Vec<CallMethodRequest>>,
    }
}

ua_struct! {
    pub struct CallResponse = CallResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<CallMethodResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}
