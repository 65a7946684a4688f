//! Snapshot serializer: runtime values to JSON.
//!
//! Values with a natural JSON shape are encoded structurally; anything else
//! (sets, non-finite floats, objects, cyclic or overly deep containers, dicts
//! with non-scalar keys) falls back to the value's `str()` text as a JSON
//! string. The whole value falls back, not just the offending element, so a
//! list holding a set renders as the list's text.
//!
//! Every call builds a fresh tree, so a recorded step never aliases live
//! program state. [`serialize_within`] stops building as soon as the
//! encoding would outgrow its allowance.

use serde_json::{Map, Number};

use crate::interpreter::value::{float_repr, plain_str, ObjectIds, Value, MAX_NESTING};

/// One encoded binding and what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub json: serde_json::Value,
    /// Serialized values: one per JSON node plus one per 8 bytes of text.
    pub cost: usize,
}

/// Cost of a string node holding `text`.
pub fn text_cost(text: &str) -> usize {
    1 + text.len() / 8
}

/// Serializes one binding. Never fails.
pub fn serialize(value: &Value, ids: &ObjectIds) -> serde_json::Value {
    serialize_within(value, ids, usize::MAX).map_or(serde_json::Value::Null, |encoded| encoded.json)
}

/// Serializes one binding unless its encoding costs more than `allowance`.
pub fn serialize_within(value: &Value, ids: &ObjectIds, allowance: usize) -> Option<Encoded> {
    let mut encoder = Encoder::new(allowance);
    if let Some(json) = encoder.structural(value) {
        return Some(Encoded {
            json,
            cost: encoder.spent,
        });
    }
    if encoder.exhausted {
        return None;
    }
    let text = plain_str(value, ids);
    let cost = text_cost(&text);
    (cost <= allowance).then(|| Encoded {
        json: serde_json::Value::String(text),
        cost,
    })
}

struct Encoder {
    /// Containers currently being encoded, for cycle detection.
    seen: Vec<usize>,
    spent: usize,
    allowance: usize,
    exhausted: bool,
}

impl Encoder {
    fn new(allowance: usize) -> Self {
        Encoder {
            seen: Vec::new(),
            spent: 0,
            allowance,
            exhausted: false,
        }
    }

    fn charge(&mut self, cost: usize) -> Option<()> {
        match self.spent.checked_add(cost) {
            Some(total) if total <= self.allowance => {
                self.spent = total;
                Some(())
            }
            _ => {
                self.exhausted = true;
                None
            }
        }
    }

    fn structural(&mut self, value: &Value) -> Option<serde_json::Value> {
        if self.seen.len() >= MAX_NESTING {
            return None;
        }
        let json = match value {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Value::Number(Number::from_f64(*f)?),
            Value::Str(s) => {
                self.charge(text_cost(s))?;
                serde_json::Value::String(s.to_string())
            }
            Value::List(items) => {
                let items = items.borrow();
                self.nested(value, |encoder| encoder.array(items.iter()))?
            }
            Value::Tuple(items) => self.nested(value, |encoder| encoder.array(items.iter()))?,
            Value::Deque(items) => {
                let items = items.borrow();
                self.nested(value, |encoder| encoder.array(items.iter()))?
            }
            Value::Dict(dict) => {
                let items = dict.borrow().items();
                self.nested(value, |encoder| {
                    let mut map = Map::new();
                    for (key, val) in &items {
                        let key = json_key(key)?;
                        encoder.charge(text_cost(&key))?;
                        map.insert(key, encoder.structural(val)?);
                    }
                    Some(serde_json::Value::Object(map))
                })?
            }
            _ => return None,
        };
        self.charge(1)?;
        Some(json)
    }

    /// Runs `encode` with `value` on the cycle stack; a value already on the
    /// stack is a cycle and cannot be encoded.
    fn nested(
        &mut self,
        value: &Value,
        encode: impl FnOnce(&mut Self) -> Option<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        let ptr = value.ptr()?;
        if self.seen.contains(&ptr) {
            return None;
        }
        self.seen.push(ptr);
        let json = encode(self);
        self.seen.pop();
        json
    }

    fn array<'v>(
        &mut self,
        items: impl ExactSizeIterator<Item = &'v Value>,
    ) -> Option<serde_json::Value> {
        let mut out = Vec::with_capacity(items.len().min(self.allowance - self.spent));
        for item in items {
            out.push(self.structural(item)?);
        }
        Some(serde_json::Value::Array(out))
    }
}

/// Object keys follow JSON's scalar-key coercions.
fn json_key(key: &Value) -> Option<String> {
    let text = match key {
        Value::Str(s) => s.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::None => "null".to_string(),
        Value::Float(f) if f.is_finite() => float_repr(*f),
        _ => return None,
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::value::{Dict, HashKey, SetItems};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ser(value: &Value) -> serde_json::Value {
        serialize(value, &ObjectIds::new())
    }

    #[test]
    fn scalars_and_sequences_are_structural() {
        assert_eq!(ser(&Value::None), json!(null));
        assert_eq!(ser(&Value::Int(3)), json!(3));
        assert_eq!(ser(&Value::Float(1.5)), json!(1.5));
        assert_eq!(
            ser(&Value::tuple(vec![Value::Bool(true), Value::str("a")])),
            json!([true, "a"])
        );
    }

    #[test]
    fn dict_keys_are_stringified() {
        let mut dict = Dict::new();
        dict.insert(HashKey::Int(1), Value::Int(1), Value::str("one"));
        dict.insert(HashKey::None, Value::None, Value::Int(0));
        assert_eq!(ser(&Value::dict(dict)), json!({"1": "one", "null": 0}));
    }

    #[test]
    fn unsupported_values_fall_back_to_text() {
        let mut set = SetItems::new();
        set.insert(HashKey::Int(1), Value::Int(1));
        assert_eq!(ser(&Value::set(set)), json!("{1}"));
        assert_eq!(ser(&Value::Float(f64::INFINITY)), json!("inf"));

        let mut dict = Dict::new();
        let key = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        dict.insert(HashKey::from_value(&key).unwrap(), key, Value::Int(3));
        assert_eq!(ser(&Value::dict(dict)), json!("{(1, 2): 3}"));
    }

    #[test]
    fn nested_fallback_applies_to_the_whole_value() {
        let list = Value::list(vec![Value::Int(1), Value::set(SetItems::new())]);
        assert_eq!(ser(&list), json!("[1, set()]"));
    }

    #[test]
    fn cycles_fall_back_to_text() {
        let inner = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let list = Value::List(inner.clone());
        inner.borrow_mut().push(list.clone());
        assert_eq!(ser(&list), json!("[1, [...]]"));
        inner.borrow_mut().clear();
    }

    #[test]
    fn allowance_bounds_the_encoding() {
        let ids = ObjectIds::new();
        let list = Value::list(vec![Value::Int(0); 10]);
        let encoded = serialize_within(&list, &ids, 11).unwrap();
        assert_eq!(encoded.cost, 11);
        assert_eq!(encoded.json, json!([0, 0, 0, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(serialize_within(&list, &ids, 10), None);
    }

    #[test]
    fn text_is_charged_by_length() {
        let ids = ObjectIds::new();
        let text = Value::str(&"x".repeat(80));
        assert_eq!(serialize_within(&text, &ids, 100).unwrap().cost, 11);
        assert_eq!(serialize_within(&text, &ids, 10), None);

        let mut set = SetItems::new();
        set.insert(HashKey::Int(1), Value::Int(1));
        let fallback = serialize_within(&Value::set(set), &ids, 5).unwrap();
        assert_eq!(fallback.json, json!("{1}"));
        assert_eq!(fallback.cost, 1);
    }

    #[test]
    fn snapshots_do_not_alias_live_values() {
        let inner = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let list = Value::List(inner.clone());
        let snapshot = ser(&list);
        inner.borrow_mut().push(Value::Int(2));
        assert_eq!(snapshot, json!([1]));
        assert_eq!(ser(&list), json!([1, 2]));
    }
}
