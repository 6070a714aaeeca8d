use std::io::Cursor;

use crate::types::{tests::*, *};

#[test]
fn request_header() {
    let header = RequestHeader::new(&NodeId::new(1, 99u32), &DateTime::now(), 1234);
    serialize_test(header);
}

#[test]
fn create_subscription_request() {
    serialize_test(CreateSubscriptionRequest {
        request_header: RequestHeader::dummy(),
        requested_publishing_interval: 500f64,
        requested_lifetime_count: 300,
        requested_max_keep_alive_count: 10,
        max_notifications_per_publish: 0,
        publishing_enabled: true,
        priority: 0,
    });
}

#[test]
fn create_monitored_items_request() {
    let item = MonitoredItemCreateRequest {
        item_to_monitor: ReadValueId::from(NodeId::new(2, "Line1.Temperature")),
        monitoring_mode: MonitoringMode::Reporting,
        requested_parameters: MonitoringParameters {
            client_handle: 7,
            sampling_interval: 100f64,
            filter: MonitoringFilter::DataChange(DataChangeFilter::new(
                DataChangeTrigger::StatusValue,
                DeadbandType::Absolute,
                0.5,
            ))
            .to_extension_object(),
            queue_size: 2,
            discard_oldest: true,
        },
    };
    serialize_test(CreateMonitoredItemsRequest {
        request_header: RequestHeader::dummy(),
        subscription_id: 1,
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_create: Some(vec![item]),
    });
}

#[test]
fn publish_response() {
    let message = NotificationMessage::data_change(
        5,
        DateTime::now(),
        vec![MonitoredItemNotification {
            client_handle: 7,
            value: DataValue::new_now(20.5f64),
        }],
    );
    let response = PublishResponse {
        response_header: ResponseHeader::null(),
        subscription_id: 1,
        available_sequence_numbers: Some(vec![5]),
        more_notifications: false,
        notification_message: message,
        results: None,
        diagnostic_infos: None,
    };
    let response = serialize_test_and_return(response);

    let notifications = response
        .notification_message
        .notifications(&DecodingOptions::test());
    assert_eq!(notifications.data_changes.len(), 1);
    assert!(notifications.events.is_empty());
    let items = notifications.data_changes[0].monitored_items.as_ref().unwrap();
    assert_eq!(items[0].client_handle, 7);
    assert_eq!(items[0].value.value, Some(Variant::Double(20.5)));
}

#[test]
fn keep_alive_message() {
    let message = NotificationMessage::keep_alive(3, DateTime::now());
    assert!(message.is_keep_alive());
    assert_eq!(message.notifications(&DecodingOptions::test()), Notifications::default());
    serialize_test(message);
}

#[test]
fn enum_out_of_range() {
    let mut stream = Cursor::new(vec![9u8, 0, 0, 0]);
    assert_eq!(
        MessageSecurityMode::decode(&mut stream, &DecodingOptions::test()).unwrap_err(),
        StatusCode::BadDecodingError
    );
    assert_eq!(MessageSecurityMode::try_from(3i32), Ok(MessageSecurityMode::SignAndEncrypt));
}

#[test]
fn message_object_ids() {
    let request = ReadRequest {
        request_header: RequestHeader::dummy(),
        max_age: 0f64,
        timestamps_to_return: TimestampsToReturn::Neither,
        nodes_to_read: None,
    };
    assert_eq!(request.object_id(), ObjectId::ReadRequest_Encoding_DefaultBinary);
    assert_eq!(
        ServiceFault::new(&RequestHeader::dummy(), StatusCode::BadTimeout).object_id(),
        ObjectId::ServiceFault_Encoding_DefaultBinary
    );
}
