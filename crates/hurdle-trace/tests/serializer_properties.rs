use std::rc::Rc;

use hurdle_trace::interpreter::value::{Dict, HashKey, ObjectIds, SetItems, Value};
use hurdle_trace::trace::serialize;
use proptest::prelude::*;

/// Value trees that can be built outside the interpreter.
#[derive(Debug, Clone)]
enum Shape {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Set(Vec<i64>),
    List(Vec<Shape>),
    Tuple(Vec<Shape>),
    /// Distinct keys, so every pair survives into the built dict.
    Dict(Vec<(String, Shape)>),
}

impl Shape {
    fn build(&self) -> Value {
        match self {
            Shape::None => Value::None,
            Shape::Bool(b) => Value::Bool(*b),
            Shape::Int(i) => Value::Int(*i),
            Shape::Float(f) => Value::Float(*f),
            Shape::Str(s) => Value::str(s),
            Shape::Set(items) => {
                let mut set = SetItems::default();
                for item in items {
                    set.insert(HashKey::Int(*item), Value::Int(*item));
                }
                Value::set(set)
            }
            Shape::List(items) => Value::list(items.iter().map(Shape::build).collect()),
            Shape::Tuple(items) => Value::tuple(items.iter().map(Shape::build).collect()),
            Shape::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    dict.insert(HashKey::Str(Rc::from(key.as_str())), Value::str(key), value.build());
                }
                Value::dict(dict)
            }
        }
    }

    /// Whether the tree holds something without a structural encoding.
    fn needs_fallback(&self) -> bool {
        match self {
            Shape::Set(_) => true,
            Shape::Float(f) => !f.is_finite(),
            Shape::List(items) | Shape::Tuple(items) => items.iter().any(Shape::needs_fallback),
            Shape::Dict(pairs) => pairs.iter().any(|(_, value)| value.needs_fallback()),
            _ => false,
        }
    }
}

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![
        Just(Shape::None),
        any::<bool>().prop_map(Shape::Bool),
        any::<i64>().prop_map(Shape::Int),
        prop_oneof![
            4 => (-1.0e6f64..1.0e6).prop_map(Shape::Float),
            1 => prop::sample::select(vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY])
                .prop_map(Shape::Float),
        ],
        "[a-z]{0,6}".prop_map(Shape::Str),
        prop::collection::vec(-5i64..5, 0..4).prop_map(Shape::Set),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Shape::List),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Shape::Tuple),
            prop::collection::btree_map("[a-c]{1,2}", inner, 0..6)
                .prop_map(|pairs| Shape::Dict(pairs.into_iter().collect())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        rng_seed: proptest::test_runner::RngSeed::Fixed(0),
        max_shrink_iters: 0,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn serialization_is_total_and_deterministic(shape in shape()) {
        let value = shape.build();
        let ids = ObjectIds::new();
        let first = serialize(&value, &ids);
        let second = serialize(&value, &ids);
        prop_assert_eq!(&first, &second);
        prop_assert!(serde_json::to_string(&first).is_ok());
    }

    #[test]
    fn unencodable_parts_fall_back_for_the_whole_value(shape in shape()) {
        let json = serialize(&shape.build(), &ObjectIds::new());
        if shape.needs_fallback() {
            prop_assert!(json.is_string(), "{shape:?} encoded as {json}");
        } else {
            match &shape {
                Shape::List(items) | Shape::Tuple(items) => {
                    prop_assert_eq!(json.as_array().map(Vec::len), Some(items.len()));
                }
                Shape::Dict(_) => prop_assert!(json.is_object()),
                Shape::Str(s) => prop_assert_eq!(json.as_str(), Some(s.as_str())),
                Shape::Int(i) => prop_assert_eq!(json.as_i64(), Some(*i)),
                Shape::None => prop_assert!(json.is_null()),
                _ => {}
            }
        }
    }

    #[test]
    fn snapshots_do_not_track_later_mutation(items in prop::collection::vec(any::<i64>(), 0..8)) {
        let value = Value::list(items.iter().copied().map(Value::Int).collect());
        let ids = ObjectIds::new();
        let before = serialize(&value, &ids);
        if let Value::List(list) = &value {
            list.borrow_mut().push(Value::str("later"));
        }
        prop_assert_eq!(before.as_array().map(Vec::len), Some(items.len()));
        prop_assert_eq!(
            serialize(&value, &ids).as_array().map(Vec::len),
            Some(items.len() + 1)
        );
    }
}

#[test]
fn cyclic_lists_fall_back_to_text() {
    let value = Value::list(vec![Value::Int(1)]);
    if let Value::List(list) = &value {
        list.borrow_mut().push(value.clone());
    }
    let json = serialize(&value, &ObjectIds::new());
    assert_eq!(json, serde_json::json!("[1, [...]]"));
    if let Value::List(list) = &value {
        list.borrow_mut().clear();
    }
}

#[test]
fn overwritten_dict_values_do_not_force_a_fallback() {
    let mut dict = Dict::new();
    dict.insert(HashKey::Str(Rc::from("a")), Value::str("a"), Value::set(SetItems::default()));
    dict.insert(HashKey::Str(Rc::from("a")), Value::str("a"), Value::Int(1));
    let json = serialize(&Value::dict(dict), &ObjectIds::new());
    assert_eq!(json, serde_json::json!({ "a": 1 }));
}
