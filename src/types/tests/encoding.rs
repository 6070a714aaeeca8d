use std::{io::Cursor, str::FromStr, sync::Arc};

use crate::{
    sync::Mutex,
    types::{constants, tests::*, *},
};

#[test]
fn any_non_zero_byte_is_true() {
    for byte in [0x01u8, 0x7f, 0xff] {
        let mut stream = Cursor::new(vec![byte]);
        assert!(bool::decode(&mut stream, &DecodingOptions::test()).unwrap());
    }
    serialize_and_compare(true, &[0x01]);
}

#[test]
fn numbers_are_little_endian() {
    serialize_and_compare(-2i16, &[0xfe, 0xff]);
    serialize_and_compare(0x0102_0304u32, &[0x04, 0x03, 0x02, 0x01]);
    serialize_and_compare(-1i64, &[0xff; 8]);
    serialize_and_compare(1.0f32, &[0x00, 0x00, 0x80, 0x3f]);
    serialize_test(-384747424424244i64);
    serialize_test(99.123f64);
}

#[test]
fn encoding_nan_is_bit_exact() {
    let nan = f64::from_bits(0x7ff8_0000_0000_1234);
    let mut stream = serialize_as_stream(nan);
    let decoded = f64::decode(&mut stream, &DecodingOptions::test()).unwrap();
    assert_eq!(decoded.to_bits(), nan.to_bits());

    let mut stream = serialize_as_stream(f32::NEG_INFINITY);
    let decoded = f32::decode(&mut stream, &DecodingOptions::test()).unwrap();
    assert_eq!(decoded, f32::NEG_INFINITY);
}

#[test]
fn null_string_is_not_empty_string() {
    serialize_and_compare(UAString::null(), &[0xff, 0xff, 0xff, 0xff]);
    serialize_and_compare(UAString::from(""), &[0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn encode_string_part_6_5224() {
    // Sample from OPCUA Part 6 - 5.2.2.4
    let expected = [0x06, 0x00, 0x00, 0x00, 0xE6, 0xB0, 0xB4, 0x42, 0x6F, 0x79];
    let input = UAString::from("水Boy");
    serialize_and_compare(input, &expected);
}

#[test]
fn decode_string_malformed_utf8() {
    // Bytes below are a mangled 水Boy, missing a byte
    let bytes = [0x06, 0x00, 0x00, 0x00, 0xE6, 0xB0, 0x42, 0x6F, 0x79, 0x20];
    let mut stream = Cursor::new(bytes);
    let decoding_options = DecodingOptions::test();
    assert_eq!(
        UAString::decode(&mut stream, &decoding_options).unwrap_err(),
        StatusCode::BadDecodingError
    );
}

#[test]
fn decode_string_too_long() {
    let mut stream = serialize_as_stream(UAString::from("0123456789"));
    let decoding_options = DecodingOptions {
        max_string_length: 5,
        ..DecodingOptions::test()
    };
    assert_eq!(
        UAString::decode(&mut stream, &decoding_options).unwrap_err(),
        StatusCode::BadDecodingError
    );
}

#[test]
fn encoding_byte_string() {
    serialize_test(ByteString::null());
    serialize_test(ByteString::from(Vec::new()));
    // Byte strings are raw bytes and never validated as UTF-8
    serialize_test(ByteString::from(vec![0xffu8, 0xfe, 0x00, 0x80]));
}

#[test]
fn date_times_outside_the_range_are_clamped() {
    serialize_test(DateTime::now());
    serialize_and_compare(DateTime::epoch(), &[0u8; 8]);
    serialize_test(DateTime::endtimes());
    serialize_test_expected(DateTime::ymd_hms(1599, 1, 1, 0, 0, 0), DateTime::epoch());
}

#[test]
fn guid_mixes_endianness() {
    // Part 6 5.2.2.6, the first three fields are little endian and the rest is as written
    let guid = Guid::from_str("72962B91-FA75-4AE6-8D28-B404DC7DAF63").unwrap();
    assert_eq!(format!("{:?}", guid), "72962b91-fa75-4ae6-8d28-b404dc7daf63");
    serialize_and_compare(
        guid,
        &[
            0x91, 0x2b, 0x96, 0x72, 0x75, 0xfa, 0xe6, 0x4a, 0x8d, 0x28, 0xb4, 0x04, 0xdc, 0x7d,
            0xaf, 0x63,
        ],
    );
}

#[test]
fn node_id_2byte_numeric() {
    // Sample from OPCUA Part 6 - 5.2.2.9
    let node_id = NodeId::new(0, 0x72u32);
    let expected_bytes = [0x0, 0x72];
    serialize_and_compare(node_id.clone(), &expected_bytes);
    serialize_test(node_id);
}

#[test]
fn node_id_4byte_numeric() {
    let node_id = NodeId::new(5, 1025u32);
    assert!(node_id.is_numeric());
    let expected_bytes = [0x1, 0x5, 0x1, 0x4];
    serialize_and_compare(node_id.clone(), &expected_bytes);
    serialize_test(node_id);
}

#[test]
fn node_id_large_namespace() {
    let node_id = NodeId::new(0x100, 1u32);
    let expected_bytes = [0x2, 0x0, 0x1, 0x1, 0x0, 0x0, 0x0];
    serialize_and_compare(node_id.clone(), &expected_bytes);
    serialize_test(node_id);
}

#[test]
fn node_id_large_id() {
    let node_id = NodeId::new(1, 0xdeadbeefu32);
    let expected_bytes = [0x2, 0x1, 0x0, 0xef, 0xbe, 0xad, 0xde];
    serialize_and_compare(node_id.clone(), &expected_bytes);
    serialize_test(node_id);
}

#[test]
fn node_id_string_part_6_5229() {
    let node_id = NodeId::new(1, "Hot水");
    assert!(node_id.is_string());
    let expected_bytes = [
        0x03, 0x1, 0x0, 0x6, 0x0, 0x0, 0x0, 0x48, 0x6F, 0x74, 0xE6, 0xB0, 0xB4,
    ];
    serialize_and_compare(node_id.clone(), &expected_bytes);
    serialize_test(node_id);
}

#[test]
fn node_id_guid_and_byte_string() {
    let guid = Guid::from_str("72962b91-fa75-4ae6-8d28-b404dc7daf63").unwrap();
    let node_id = NodeId::new(1, guid);
    assert!(node_id.is_guid());
    serialize_test(node_id);

    let node_id = NodeId::new(30, ByteString::from(b"this is a byte string"));
    assert!(node_id.is_byte_string());
    serialize_test(node_id);
}

#[test]
fn node_id_text_form() {
    let node_id = NodeId::from_str("ns=2;s=Line1/Temperature").unwrap();
    assert_eq!(node_id, NodeId::new(2, "Line1/Temperature"));
    assert_eq!(node_id.to_string(), "ns=2;s=Line1/Temperature");

    let node_id = NodeId::from_str("i=2259").unwrap();
    assert_eq!(node_id, VariableId::Server_ServerStatus_State.into());
    assert_eq!(node_id.to_string(), "i=2259");

    assert_eq!(
        NodeId::from_str("ns=x;i=1").unwrap_err(),
        StatusCode::BadNodeIdInvalid
    );
    assert!(NodeId::from_str("").is_err());
}

#[test]
fn expanded_node_id() {
    let node_id = ExpandedNodeId::new(NodeId::new(200, "test_expanded"));
    serialize_test(node_id);

    let mut node_id = ExpandedNodeId::new(NodeId::new(0, 5u32));
    node_id.namespace_uri = UAString::from("urn:test");
    node_id.server_index = 3;
    serialize_test(node_id);
}

#[test]
fn extension_object() {
    serialize_test(ExtensionObject::null());

    let token = AnonymousIdentityToken {
        policy_id: UAString::from("anonymous"),
    };
    let eo = ExtensionObject::from_encodable(token.object_id(), &token);
    serialize_test(eo.clone());
    let decoded: AnonymousIdentityToken = eo.decode_inner(&DecodingOptions::test()).unwrap();
    assert_eq!(decoded, token);
}

#[test]
fn localized_text() {
    serialize_test(LocalizedText::null());
    // Empty fields are left out of the encoding and decode as null
    serialize_test_expected(
        LocalizedText::new("en", ""),
        LocalizedText {
            locale: UAString::from("en"),
            text: UAString::null(),
        },
    );
    serialize_test_expected(
        LocalizedText::new("", "Text only"),
        LocalizedText {
            locale: UAString::null(),
            text: UAString::from("Text only"),
        },
    );
    serialize_test(LocalizedText::new("de", "Hallo Welt"));
    // A null locale and text is just the mask
    serialize_and_compare(LocalizedText::null(), &[0x0]);
}

#[test]
fn qualified_name() {
    serialize_test(QualifiedName::new(100, "this is a qualified name"));
    serialize_test(QualifiedName::null());
}

#[test]
fn status_code() {
    serialize_and_compare(StatusCode::BadTimeout, &[0x00, 0x00, 0x0a, 0x80]);
    serialize_test(StatusCode::GoodSubscriptionTransferred);
}

#[test]
fn diagnostic_info() {
    serialize_test(DiagnosticInfo::null());

    let inner = DiagnosticInfo {
        symbolic_id: Some(99),
        additional_info: Some(UAString::from("Nested diagnostic")),
        inner_status_code: Some(StatusCode::BadNodeIdUnknown),
        ..Default::default()
    };
    let outer = DiagnosticInfo {
        namespace_uri: Some(437437),
        locale: Some(333),
        localized_text: Some(233),
        inner_diagnostic_info: Some(Box::new(inner)),
        ..Default::default()
    };
    serialize_test(outer);
}

#[test]
fn data_value() {
    serialize_test(DataValue::null());
    serialize_test(DataValue::status_only(StatusCode::BadNodeIdUnknown));
    serialize_test(DataValue {
        value: Some(Variant::Double(1000f64)),
        status: Some(StatusCode::GoodClamped),
        source_timestamp: Some(DateTime::now()),
        source_picoseconds: Some(333),
        server_timestamp: Some(DateTime::now()),
        server_picoseconds: Some(666),
    });
}

#[test]
fn data_value_picoseconds_without_timestamp() {
    let value = DataValue {
        value: Some(Variant::from(1i32)),
        source_picoseconds: Some(10),
        ..Default::default()
    };
    let expected = DataValue {
        value: Some(Variant::from(1i32)),
        ..Default::default()
    };
    serialize_test_expected(value, expected);
}

#[test]
fn data_value_ignores_client_offset() {
    let source_timestamp = DateTime::ymd_hms(2024, 3, 1, 12, 0, 0);
    let value = DataValue {
        value: Some(Variant::from(1i32)),
        source_timestamp: Some(source_timestamp),
        ..Default::default()
    };
    let mut stream = serialize_as_stream(value);
    let decoding_options = DecodingOptions {
        client_offset: chrono::Duration::seconds(30),
        ..DecodingOptions::test()
    };
    let decoded = DataValue::decode(&mut stream, &decoding_options).unwrap();
    assert_eq!(decoded.source_timestamp, Some(source_timestamp));
}

#[test]
fn array_length_limit() {
    let values: Option<Vec<u32>> = Some(vec![1, 2, 3, 4, 5]);
    let mut stream = serialize_as_stream(values);
    let decoding_options = DecodingOptions {
        max_array_length: 4,
        ..DecodingOptions::test()
    };
    let result: EncodingResult<Option<Vec<u32>>> = read_array(&mut stream, &decoding_options);
    assert_eq!(result.unwrap_err(), StatusCode::BadEncodingLimitsExceeded);
}

#[test]
fn null_and_empty_arrays() {
    let null: Option<Vec<i32>> = None;
    serialize_and_compare(null.clone(), &[0xff, 0xff, 0xff, 0xff]);
    serialize_test(null);

    let empty: Option<Vec<i32>> = Some(Vec::new());
    serialize_and_compare(empty.clone(), &[0x00, 0x00, 0x00, 0x00]);
    serialize_test(empty);
}

#[test]
fn nesting_beyond_the_depth_limit_fails() {
    let decoding_options = DecodingOptions {
        decoding_depth_gauge: Arc::new(Mutex::new(DepthGauge {
            max_depth: 2,
            current_depth: 0,
        })),
        ..Default::default()
    };

    let nest = |v: Variant| Variant::Variant(Box::new(v));
    let two_deep = nest(nest(Variant::from(1i32)));

    let mut stream = serialize_as_stream(two_deep.clone());
    assert_eq!(Variant::decode(&mut stream, &decoding_options).unwrap(), two_deep);

    let mut stream = serialize_as_stream(nest(two_deep));
    assert_eq!(
        Variant::decode(&mut stream, &decoding_options).unwrap_err(),
        StatusCode::BadDecodingError
    );
}

#[test]
fn depth_locks_are_released_on_drop() {
    let gauge = Arc::new(Mutex::new(DepthGauge::default()));
    let max_depth = trace_lock!(gauge).max_depth();
    assert_eq!(max_depth, constants::MAX_DECODING_DEPTH);

    let held: Vec<DepthLock> = (0..max_depth)
        .map(|_| DepthLock::obtain(gauge.clone()).unwrap())
        .collect();
    assert_eq!(trace_lock!(gauge).current_depth(), max_depth);
    assert_eq!(
        DepthLock::obtain(gauge.clone()).unwrap_err(),
        StatusCode::BadDecodingError
    );

    drop(held);
    assert_eq!(trace_lock!(gauge).current_depth(), 0);
}
