// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::{
    diagnostic_info::DiagnosticInfo, extension_object::ExtensionObject, node_id::NodeId,
    node_ids::ObjectId, qualified_name::QualifiedName, status_code::StatusCode, string::UAString,
};

use super::{
    attributes::ReadValueId,
    enums::{DataChangeTrigger, DeadbandType, FilterOperator, MonitoringMode, TimestampsToReturn},
    headers::{RequestHeader, ResponseHeader},
};

ua_struct! {
    pub struct DataChangeFilter = DataChangeFilter_Encoding_DefaultBinary {
        pub trigger: DataChangeTrigger,
        pub deadband_type: u32,
        pub deadband_value: f64,
    }
}

impl DataChangeFilter {
    pub fn new(trigger: DataChangeTrigger, deadband_type: DeadbandType, deadband_value: f64) -> Self {
        DataChangeFilter {
            trigger,
            deadband_type: deadband_type as u32,
            deadband_value,
        }
    }
}

ua_struct! {
    pub struct SimpleAttributeOperand {
        pub type_definition_id: NodeId,
        pub browse_path: Option<Vec<QualifiedName>>,
        pub attribute_id: u32,
        pub index_range: UAString,
    }
}

ua_struct! {
    pub struct ContentFilterElement {
        pub filter_operator: FilterOperator,
        pub filter_operands: Option<Vec<ExtensionObject>>,
    }
}

ua_struct! {
    pub struct ContentFilter {
        pub elements: Option<Vec<ContentFilterElement>>,
    }
}

ua_struct! {
    pub struct EventFilter = EventFilter_Encoding_DefaultBinary {
        pub select_clauses: Option<Vec<SimpleAttributeOperand>>,
        pub where_clause: ContentFilter,
    }
}

ua_struct! {
    pub struct MonitoringParameters {
        pub client_handle: u32,
        pub sampling_interval: f64,
        pub filter: ExtensionObject,
        pub queue_size: u32,
        pub discard_oldest: bool,
    }
}

ua_struct! {
    pub struct MonitoredItemCreateRequest {
        pub item_to_monitor: ReadValueId,
        pub monitoring_mode: MonitoringMode,
        pub requested_parameters: MonitoringParameters,
    }
}

ua_struct! {
    pub struct MonitoredItemCreateResult {
        pub status_code: StatusCode,
        pub monitored_item_id: u32,
        pub revised_sampling_interval: f64,
        pub revised_queue_size: u32,
        pub filter_result: ExtensionObject,
    }
}

ua_struct! {
    pub struct CreateMonitoredItemsRequest = CreateMonitoredItemsRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub timestamps_to_return: TimestampsToReturn,
        pub items_to_create: Option<Vec<MonitoredItemCreateRequest>>,
    }
}

ua_struct! {
    pub struct CreateMonitoredItemsResponse = CreateMonitoredItemsResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<MonitoredItemCreateResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    pub struct MonitoredItemModifyRequest {
        pub monitored_item_id: u32,
        pub requested_parameters: MonitoringParameters,
    }
}

ua_struct! {
    pub struct MonitoredItemModifyResult {
        pub status_code: StatusCode,
        pub revised_sampling_interval: f64,
        pub revised_queue_size: u32,
        pub filter_result: ExtensionObject,
    }
}

ua_struct! {
    pub struct ModifyMonitoredItemsRequest = ModifyMonitoredItemsRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub timestamps_to_return: TimestampsToReturn,
        pub items_to_modify: Option<Vec<MonitoredItemModifyRequest>>,
    }
}

ua_struct! {
    pub struct ModifyMonitoredItemsResponse = ModifyMonitoredItemsResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<MonitoredItemModifyResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    pub struct SetMonitoringModeRequest = SetMonitoringModeRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub monitoring_mode: MonitoringMode,
        pub monitored_item_ids: Option<Vec<u32>>,
    }
}

ua_struct! {
    pub struct SetMonitoringModeResponse = SetMonitoringModeResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    pub struct SetTriggeringRequest = SetTriggeringRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub triggering_item_id: u32,
        pub links_to_add: Option<Vec<u32>>,
        pub links_to_remove: Option<Vec<u32>>,
    }
}

ua_struct! {
    pub struct SetTriggeringResponse = SetTriggeringResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub add_results: Option<Vec<StatusCode>>,
        pub add_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
        pub remove_results: Option<Vec<StatusCode>>,
        pub remove_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    pub struct DeleteMonitoredItemsRequest = DeleteMonitoredItemsRequest_Encoding_DefaultBinary {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub monitored_item_ids: Option<Vec<u32>>,
    }
}

ua_struct! {
    pub struct DeleteMonitoredItemsResponse = DeleteMonitoredItemsResponse_Encoding_DefaultBinary {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

/// Filters that can be attached to a monitored item
#[derive(Debug, Clone, PartialEq)]
pub enum MonitoringFilter {
    None,
    DataChange(DataChangeFilter),
    Event(EventFilter),
}

impl MonitoringFilter {
    pub fn to_extension_object(&self) -> ExtensionObject {
        match self {
            MonitoringFilter::None => ExtensionObject::null(),
            MonitoringFilter::DataChange(filter) => {
                ExtensionObject::from_encodable(ObjectId::DataChangeFilter_Encoding_DefaultBinary, filter)
            }
            MonitoringFilter::Event(filter) => {
                ExtensionObject::from_encodable(ObjectId::EventFilter_Encoding_DefaultBinary, filter)
            }
        }
    }
}
