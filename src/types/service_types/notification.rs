// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::types::{
    data_value::DataValue, date_time::DateTime, diagnostic_info::DiagnosticInfo,
    encoding::DecodingOptions, extension_object::ExtensionObject, node_ids::ObjectId,
    status_code::StatusCode, variant::Variant,
};

ua_struct! {
    pub struct NotificationMessage {
        pub sequence_number: u32,
        pub publish_time: DateTime,
        pub notification_data: Option<Vec<ExtensionObject>>,
    }
}

ua_struct! {
    pub struct MonitoredItemNotification {
        pub client_handle: u32,
        pub value: DataValue,
    }
}

ua_struct! {
    pub struct DataChangeNotification = DataChangeNotification_Encoding_DefaultBinary {
        pub monitored_items: Option<Vec<MonitoredItemNotification>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    pub struct EventFieldList {
        pub client_handle: u32,
        pub event_fields: Option<Vec<Variant>>,
    }
}

ua_struct! {
    pub struct EventNotificationList = EventNotificationList_Encoding_DefaultBinary {
        pub events: Option<Vec<EventFieldList>>,
    }
}

ua_struct! {
    pub struct StatusChangeNotification = StatusChangeNotification_Encoding_DefaultBinary {
        pub status: StatusCode,
        pub diagnostic_info: DiagnosticInfo,
    }
}

/// The decoded payloads of a notification message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notifications {
    pub data_changes: Vec<DataChangeNotification>,
    pub events: Vec<EventNotificationList>,
    pub status_changes: Vec<StatusChangeNotification>,
}

impl NotificationMessage {
    /// Create a notification message which contains no notifications
    pub fn keep_alive(sequence_number: u32, publish_time: DateTime) -> NotificationMessage {
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: None,
        }
    }

    /// Create a notification message carrying data change notifications
    pub fn data_change(
        sequence_number: u32,
        publish_time: DateTime,
        monitored_items: Vec<MonitoredItemNotification>,
    ) -> NotificationMessage {
        let notification = DataChangeNotification {
            monitored_items: Some(monitored_items),
            diagnostic_infos: None,
        };
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: Some(vec![ExtensionObject::from_encodable(
                ObjectId::DataChangeNotification_Encoding_DefaultBinary,
                &notification,
            )]),
        }
    }

    /// A keep-alive carries no payload
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data
            .as_ref()
            .map(|data| data.is_empty())
            .unwrap_or(true)
    }

    /// Decodes the extension objects of the message into their notification types. Unknown
    /// payloads are logged and skipped.
    pub fn notifications(&self, decoding_options: &DecodingOptions) -> Notifications {
        let mut result = Notifications::default();
        let Some(ref data) = self.notification_data else {
            return result;
        };
        for obj in data {
            match obj.object_id() {
                Ok(ObjectId::DataChangeNotification_Encoding_DefaultBinary) => {
                    match obj.decode_inner::<DataChangeNotification>(decoding_options) {
                        Ok(v) => result.data_changes.push(v),
                        Err(err) => error!("Cannot decode data change notification, {}", err),
                    }
                }
                Ok(ObjectId::EventNotificationList_Encoding_DefaultBinary) => {
                    match obj.decode_inner::<EventNotificationList>(decoding_options) {
                        Ok(v) => result.events.push(v),
                        Err(err) => error!("Cannot decode event notification list, {}", err),
                    }
                }
                Ok(ObjectId::StatusChangeNotification_Encoding_DefaultBinary) => {
                    match obj.decode_inner::<StatusChangeNotification>(decoding_options) {
                        Ok(v) => result.status_changes.push(v),
                        Err(err) => error!("Cannot decode status change notification, {}", err),
                    }
                }
                _ => {
                    warn!("Ignoring notification with type id {}", obj.node_id);
                }
            }
        }
        result
    }
}
