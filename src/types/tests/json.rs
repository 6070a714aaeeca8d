use serde_json::json;

use crate::types::*;

fn round_trip(v: Variant) -> Variant {
    let dynamic = v.to_dynamic().unwrap();
    println!("{} -> {}", v, dynamic);
    Variant::from_dynamic(&dynamic).unwrap()
}

#[test]
fn primitives_are_plain_json() {
    assert_eq!(Variant::from(true).to_dynamic().unwrap(), json!(true));
    assert_eq!(Variant::from(-5i64).to_dynamic().unwrap(), json!(-5));
    assert_eq!(Variant::from(2.5f64).to_dynamic().unwrap(), json!(2.5));
    assert_eq!(Variant::from("text").to_dynamic().unwrap(), json!("text"));
    assert_eq!(Variant::Empty.to_dynamic().unwrap(), json!(null));
    assert_eq!(
        Variant::from(vec![1i64, 2, 3]).to_dynamic().unwrap(),
        json!([1, 2, 3])
    );
}

#[test]
fn narrow_numbers_keep_their_type() {
    assert_eq!(
        Variant::from(-5i16).to_dynamic().unwrap(),
        json!({"Type": "Int16", "Body": -5})
    );
    assert_eq!(
        Variant::from(2.5f32).to_dynamic().unwrap(),
        json!({"Type": "Float", "Body": 2.5})
    );
    assert_eq!(
        Variant::from(vec![1u32, 2, 3]).to_dynamic().unwrap(),
        json!({"Type": "Array", "ElementType": "UInt32", "Body": [1, 2, 3]})
    );

    let values = vec![
        Variant::SByte(-8),
        Variant::Byte(7),
        Variant::Int16(-300),
        Variant::UInt16(60000),
        Variant::Int32(7),
        Variant::UInt32(4_000_000_000),
        Variant::UInt64(u64::MAX),
        Variant::Float(0.25),
        Variant::from(vec![1u32, 2, 3]),
        Variant::from(vec![0.5f32, 1.5]),
    ];
    for v in values {
        assert_eq!(round_trip(v.clone()), v);
    }
}

#[test]
fn variant_arrays_keep_element_tags() {
    let array = Variant::from(
        Array::new_single(
            VariantTypeId::Variant,
            vec![Variant::Byte(1), Variant::from("two"), Variant::Int32(3)],
        )
        .unwrap(),
    );
    assert_eq!(round_trip(array.clone()), array);
}

#[test]
fn plain_json_infers_types() {
    assert_eq!(Variant::from_dynamic(&json!(5)).unwrap(), Variant::Int64(5));
    assert_eq!(
        Variant::from_dynamic(&json!(u64::MAX)).unwrap(),
        Variant::UInt64(u64::MAX)
    );
    assert_eq!(Variant::from_dynamic(&json!(1.5)).unwrap(), Variant::Double(1.5));
    assert_eq!(Variant::from_dynamic(&json!("x")).unwrap(), Variant::from("x"));
    assert_eq!(
        Variant::from_dynamic(&json!([true, false])).unwrap(),
        Variant::from(vec![true, false])
    );
}

#[test]
fn complex_types_are_tagged() {
    let dynamic = Variant::from(NodeId::new(2, "Pump/Speed")).to_dynamic().unwrap();
    assert_eq!(dynamic, json!({"Type": "NodeId", "Body": "ns=2;s=Pump/Speed"}));

    let dynamic = Variant::from(StatusCode::BadNodeIdUnknown).to_dynamic().unwrap();
    assert_eq!(dynamic["Type"], json!("StatusCode"));
    assert_eq!(dynamic["Body"]["Symbol"], json!("BadNodeIdUnknown"));

    let dynamic = Variant::from(LocalizedText::new("en", "Pump")).to_dynamic().unwrap();
    assert_eq!(
        dynamic,
        json!({"Type": "LocalizedText", "Body": {"Locale": "en", "Text": "Pump"}})
    );
}

#[test]
fn complex_types_round_trip() {
    let values = vec![
        Variant::from(NodeId::new(2, 1234u32)),
        Variant::from(ExpandedNodeId::new(NodeId::new(1, "x"))),
        Variant::from(QualifiedName::new(3, "Name")),
        Variant::from(LocalizedText::new("de", "Hallo")),
        Variant::from(Guid::new()),
        Variant::from(DateTime::ymd_hms(2024, 5, 6, 7, 8, 9)),
        Variant::from(StatusCode::GoodClamped),
        Variant::from(ByteString::from(vec![0u8, 1, 2, 255])),
        Variant::from(ByteString::null()),
        Variant::XmlElement(UAString::from("<a/>")),
        Variant::from(DataValue {
            value: Some(Variant::from(7i32)),
            status: Some(StatusCode::Good),
            source_timestamp: Some(DateTime::ymd_hms(2024, 1, 1, 0, 0, 0)),
            ..Default::default()
        }),
        Variant::from(ExtensionObject::from_encodable(
            ObjectId::AnonymousIdentityToken_Encoding_DefaultBinary,
            &AnonymousIdentityToken {
                policy_id: UAString::from("anonymous"),
            },
        )),
        Variant::Int64(-7),
        Variant::Double(1.5),
    ];
    for v in values {
        assert_eq!(round_trip(v.clone()), v);
    }
}

#[test]
fn non_finite_numbers_are_tagged() {
    assert_eq!(
        Variant::Double(f64::NAN).to_dynamic().unwrap(),
        json!({"Type": "Double", "Body": "NaN"})
    );
    assert_eq!(
        Variant::Float(f32::NEG_INFINITY).to_dynamic().unwrap(),
        json!({"Type": "Float", "Body": "-Infinity"})
    );
    assert_eq!(round_trip(Variant::Double(f64::INFINITY)), Variant::Double(f64::INFINITY));
    match round_trip(Variant::Double(f64::NAN)) {
        Variant::Double(v) => assert!(v.is_nan()),
        v => panic!("unexpected {:?}", v),
    }
}

#[test]
fn null_and_empty_arrays_differ() {
    let null = Variant::from(Array::null(VariantTypeId::Int32));
    let dynamic = null.to_dynamic().unwrap();
    assert_eq!(
        dynamic,
        json!({"Type": "Array", "ElementType": "Int32", "Body": null})
    );
    assert_eq!(Variant::from_dynamic(&dynamic).unwrap(), null);

    let empty = Variant::from(Vec::<i32>::new());
    let dynamic = empty.to_dynamic().unwrap();
    assert_eq!(
        dynamic,
        json!({"Type": "Array", "ElementType": "Int32", "Body": []})
    );
    assert_eq!(Variant::from_dynamic(&dynamic).unwrap(), empty);
}

#[test]
fn typed_arrays_and_matrices_round_trip() {
    let array = Variant::from(
        Array::new_single(VariantTypeId::Int32, vec![Variant::Int32(1), Variant::Int32(2)]).unwrap(),
    );
    let tagged = json!({"Type": "Array", "ElementType": "Int32", "Body": [1, 2]});
    assert_eq!(Variant::from_dynamic(&tagged).unwrap(), array);

    let matrix = Variant::from(
        Array::new_multi(
            VariantTypeId::Int16,
            vec![
                Variant::Int16(1),
                Variant::Int16(2),
                Variant::Int16(3),
                Variant::Int16(4),
            ],
            vec![2u32, 2u32],
        )
        .unwrap(),
    );
    assert_eq!(round_trip(matrix.clone()), matrix);
}

#[test]
fn mixed_arrays_become_variant_arrays() {
    let v = Variant::from_dynamic(&json!([1, "two"])).unwrap();
    match v {
        Variant::Array(array) => assert_eq!(array.value_type, VariantTypeId::Variant),
        v => panic!("unexpected {:?}", v),
    }
}

#[test]
fn diagnostic_info_is_unsupported() {
    assert_eq!(
        Variant::from(DiagnosticInfo::null()).to_dynamic().unwrap_err(),
        DynamicError::Unsupported("DiagnosticInfo".into())
    );
    assert!(Variant::from_dynamic(&json!({"Type": "Whatever", "Body": 1})).is_err());
}

#[test]
fn coerce_to_declared_type() {
    assert_eq!(
        coerce(Variant::Int64(12), VariantTypeId::UInt16).unwrap(),
        Variant::UInt16(12)
    );
    assert!(coerce(Variant::Int64(-1), VariantTypeId::UInt16).is_err());
    assert_eq!(
        coerce(Variant::Int64(2), VariantTypeId::Double).unwrap(),
        Variant::Double(2.0)
    );
    assert_eq!(
        coerce(Variant::from("i=85"), VariantTypeId::NodeId).unwrap(),
        Variant::from(NodeId::objects_folder_id())
    );
    assert!(coerce(Variant::from(true), VariantTypeId::Int32).is_err());
}
