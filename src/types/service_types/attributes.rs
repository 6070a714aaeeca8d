// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::{
    attribute::AttributeId, data_value::DataValue, diagnostic_info::DiagnosticInfo,
    node_id::NodeId, qualified_name::QualifiedName, status_code::StatusCode, string::UAString,
};

use super::{
    enums::TimestampsToReturn,
    headers::{RequestHeader, ResponseHeader},
};

ua_struct! {
    pub struct ReadValueId {
        pub node_id: NodeId,
        pub attribute_id: u32,
        pub index_range: UAString,
        pub data_encoding: QualifiedName,
    }
}

impl From<NodeId> for ReadValueId {
    fn from(node_id: NodeId) -> Self {
        ReadValueId {
            node_id,
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            data_encoding: QualifiedName::null(),
        }
    }
}

impl<'a> From<&'a NodeId> for ReadValueId {
    fn from(node_id: &'a NodeId) -> Self {
        Self::from(node_id.clone())
    }
}

ua_struct! {
    pub struct ReadRequest = ReadRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub max_age: f64,
        pub timestamps_to_return: TimestampsToReturn,
        pub nodes_to_read: Option<Vec<ReadValueId>>,
    }
}

ua_struct! {
    pub struct ReadResponse = ReadResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<DataValue>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    pub struct WriteValue {
        pub node_id: NodeId,
        pub attribute_id: u32,
        pub index_range: UAString,
        pub value: DataValue,
    }
}

ua_struct! {
    pub struct WriteRequest = WriteRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub nodes_to_write: Option<Vec<WriteValue>>,
    }
}

ua_struct! {
    pub struct WriteResponse = WriteResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}
