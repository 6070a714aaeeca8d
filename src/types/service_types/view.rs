// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::{
    byte_string::ByteString,
    date_time::DateTime,
    diagnostic_info::DiagnosticInfo,
    localized_text::LocalizedText,
    node_id::{ExpandedNodeId, NodeId},
    node_ids::ReferenceTypeId,
    qualified_name::QualifiedName,
    status_code::StatusCode,
};

use super::{
    enums::{BrowseDirection, NodeClass},
    headers::{RequestHeader, ResponseHeader},
};

/// Mask of all the fields of a `ReferenceDescription`
pub const BROWSE_RESULT_MASK_ALL: u32 = 0x3f;

ua_struct! {
    pub struct ViewDescription {
        pub view_id: NodeId,
        pub timestamp: DateTime,
        pub view_version: u32,
    }
}

impl Default for ViewDescription {
    fn default() -> Self {
        ViewDescription {
            view_id: NodeId::null(),
            timestamp: DateTime::null(),
            view_version: 0,
        }
    }
}

ua_struct! {
    pub struct BrowseDescription {
        pub node_id: NodeId,
        pub browse_direction: BrowseDirection,
        pub reference_type_id: NodeId,
        pub include_subtypes: bool,
        pub node_class_mask: u32,
        pub result_mask: u32,
    }
}

impl From<NodeId> for BrowseDescription {
    /// Browses the hierarchical references in the forward direction, returning all fields
    fn from(node_id: NodeId) -> Self {
        BrowseDescription {
            node_id,
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BROWSE_RESULT_MASK_ALL,
        }
    }
}

ua_struct! {
    pub struct ReferenceDescription {
        pub reference_type_id: NodeId,
        pub is_forward: bool,
        pub node_id: ExpandedNodeId,
        pub browse_name: QualifiedName,
        pub display_name: LocalizedText,
        pub node_class: NodeClass,
        pub type_definition: ExpandedNodeId,
    }
}

ua_struct! {
    pub struct BrowseResult {
        pub status_code: StatusCode,
        pub continuation_point: ByteString,
        pub references: Option<Vec<ReferenceDescription>>,
    }
}

ua_struct! {
    pub struct BrowseRequest = BrowseRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub view: ViewDescription,
        pub requested_max_references_per_node: u32,
        pub nodes_to_browse: Option<Vec<BrowseDescription>>,
    }
}

ua_struct! {
    pub struct BrowseResponse = BrowseResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<BrowseResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    pub struct BrowseNextRequest = BrowseNextRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub release_continuation_points: bool,
        pub continuation_points: Option<Vec<ByteString>>,
    }
}

ua_struct! {
    pub struct BrowseNextResponse = BrowseNextResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<BrowseResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}
