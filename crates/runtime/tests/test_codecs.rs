//! Cross-codec round-trip and sharing tests. Scenario labels (`s1`, `s2`,
//! ...) match the concrete walkthroughs a reader of this test file can use
//! to verify a given codec end to end.

use std::rc::Rc;
use vellum_runtime::codec::{compact, framed, json, textual};
use vellum_runtime::types::TypeDescriptor;
use vellum_runtime::value::Value;

fn array_of_int_ty() -> TypeDescriptor {
    TypeDescriptor::array(TypeDescriptor::Integer)
}

#[test]
fn s1_compact_round_trips_a_flat_array() {
    let ty = array_of_int_ty();
    let value = Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    let bytes = compact::encode(&value, &ty).unwrap();
    let (decoded, consumed) = compact::decode(&bytes, &ty).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(decoded, value);
}

#[test]
fn s2_compact_shares_a_repeated_ref_by_backreference() {
    let cell = Value::reference(Value::Integer(42));
    let ty = TypeDescriptor::array(TypeDescriptor::reference(TypeDescriptor::Integer));
    let value = Value::array(vec![cell.clone(), cell]);
    let bytes = compact::encode(&value, &ty).unwrap();
    let (decoded, _) = compact::decode(&bytes, &ty).unwrap();
    if let Value::Array(items) = decoded {
        let items = items.borrow();
        match (&items[0], &items[1]) {
            (Value::Ref(a), Value::Ref(b)) => assert!(Rc::ptr_eq(a, b)),
            _ => panic!("expected two Ref cells"),
        }
    } else {
        panic!("expected an array");
    }
}

#[test]
fn modern_frame_round_trips_and_carries_its_own_descriptor() {
    let ty = array_of_int_ty();
    let value = Value::array(vec![Value::Integer(7)]);
    let bytes = framed::encode(&value, &ty).unwrap();
    assert_eq!(&bytes[0..8], &framed::MODERN_MAGIC);
    let (decoded, decoded_ty) = framed::decode(&bytes).unwrap();
    assert_eq!(decoded, value);
    assert!(decoded_ty.structural_eq(&ty));
}

#[test]
fn s3_textual_struct_round_trips_through_print_and_parse() {
    let ty = TypeDescriptor::struct_of(vec![
        ("x".to_string(), TypeDescriptor::Integer),
        ("y".to_string(), TypeDescriptor::Integer),
    ]);
    let value = Value::struct_of(vec![Value::Integer(1), Value::Integer(2)]);
    let text = textual::print(&value, &ty).unwrap();
    let parsed = textual::parse(&text, &ty).unwrap();
    assert_eq!(parsed, value);
}

#[test]
fn s4_textual_and_json_agree_on_a_shared_ref_pair() {
    let cell = Value::reference(Value::string("shared"));
    let ty = TypeDescriptor::array(TypeDescriptor::reference(TypeDescriptor::String));
    let value = Value::array(vec![cell.clone(), cell]);

    let text = textual::print(&value, &ty).unwrap();
    let parsed_text = textual::parse(&text, &ty).unwrap();
    assert_eq!(parsed_text, value);

    let json_text = json::to_json(&value, &ty).unwrap();
    assert!(json_text.contains("$ref"));
    let parsed_json = json::from_json(&json_text, &ty).unwrap();
    assert_eq!(parsed_json, value);
}

#[test]
fn s5_json_encodes_integers_and_dicts_in_their_deviating_shapes() {
    let ty = TypeDescriptor::dict(TypeDescriptor::String, TypeDescriptor::Integer);
    let value = Value::dict(vec![(Value::string("a"), Value::Integer(9_007_199_254_740_993))]);
    let text = json::to_json(&value, &ty).unwrap();
    assert!(text.contains("\"9007199254740993\""));
    assert!(text.contains("\"key\""));
    assert!(text.contains("\"value\""));
    let parsed = json::from_json(&text, &ty).unwrap();
    assert_eq!(parsed, value);
}

#[test]
fn compact_and_framed_agree_on_a_nested_variant() {
    let ty = TypeDescriptor::variant_of(vec![
        ("None".to_string(), TypeDescriptor::Null),
        ("Some".to_string(), TypeDescriptor::Integer),
    ]);
    let value = Value::variant("Some", Value::Integer(5));
    let compact_bytes = compact::encode(&value, &ty).unwrap();
    let (from_compact, _) = compact::decode(&compact_bytes, &ty).unwrap();
    let framed_bytes = framed::encode(&value, &ty).unwrap();
    let (from_framed, _) = framed::decode(&framed_bytes).unwrap();
    assert_eq!(from_compact, value);
    assert_eq!(from_framed, value);
}
