//! Iteration protocol.
//!
//! `make_iter` turns an iterable into shared iterator state; `iter_next`
//! advances it. No `RefCell` borrow is held while user code runs, so a
//! mapped function may freely touch the iterator or its source.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::smallvec;

use super::error::{Exc, ExcType, Flow};
use super::state::Interpreter;
use super::value::{IterState, Value, ViewKind};

/// What to do after inspecting an iterator's state.
enum Advance {
    Done(Option<Value>),
    Enumerate(Rc<RefCell<IterState>>),
    Zip(Vec<Rc<RefCell<IterState>>>),
    Map(Value, Vec<Rc<RefCell<IterState>>>),
    Filter(Value, Rc<RefCell<IterState>>),
    User(Value),
}

impl<'h> Interpreter<'h> {
    /// `iter(value)`.
    pub(crate) fn make_iter(&mut self, value: &Value) -> Result<Rc<RefCell<IterState>>, Flow> {
        let state = match value {
            Value::Iterator(it) => return Ok(it.clone()),
            Value::List(_) | Value::Tuple(_) => IterState::Seq {
                source: value.clone(),
                index: 0,
            },
            Value::Str(s) => IterState::Chars {
                chars: s.chars().collect(),
                index: 0,
            },
            Value::Range(r) => IterState::Range {
                next: r.start,
                remaining: r.len(),
                step: r.step,
            },
            Value::Dict(dict) => IterState::Items {
                name: "dict_keyiterator",
                items: dict.borrow().keys(),
                index: 0,
            },
            Value::Set(items) => IterState::Items {
                name: "set_iterator",
                items: items.borrow().values().cloned().collect(),
                index: 0,
            },
            Value::Deque(items) => IterState::Items {
                name: "_collections._deque_iterator",
                items: items.borrow().iter().cloned().collect(),
                index: 0,
            },
            Value::DictView(view) => IterState::Items {
                name: match view.kind {
                    ViewKind::Keys => "dict_keyiterator",
                    ViewKind::Values => "dict_valueiterator",
                    ViewKind::Items => "dict_itemiterator",
                },
                items: view.snapshot(),
                index: 0,
            },
            Value::Instance(inst) => {
                if inst.class.lookup("__iter__").is_some() {
                    let iterator = self.call_method(value, "__iter__", smallvec![])?;
                    if matches!(iterator, Value::Instance(_)) {
                        return Ok(Rc::new(RefCell::new(IterState::User { target: iterator })));
                    }
                    return self.make_iter(&iterator);
                }
                if inst.class.lookup("__next__").is_some() {
                    IterState::User {
                        target: value.clone(),
                    }
                } else {
                    return Err(not_iterable(value).into());
                }
            }
            _ => return Err(not_iterable(value).into()),
        };
        Ok(Rc::new(RefCell::new(state)))
    }

    /// Advances `it`, returning `None` once it is exhausted.
    pub(crate) fn iter_next(&mut self, it: &Rc<RefCell<IterState>>) -> Result<Option<Value>, Flow> {
        let advance = {
            let mut state = it.borrow_mut();
            match &mut *state {
                IterState::Seq { source, index } => {
                    let item = match source {
                        Value::List(items) => items.borrow().get(*index).cloned(),
                        Value::Tuple(items) => items.get(*index).cloned(),
                        _ => None,
                    };
                    if item.is_some() {
                        *index += 1;
                    }
                    Advance::Done(item)
                }
                IterState::Chars { chars, index } => {
                    let item = chars.get(*index).map(|c| Value::str(c.encode_utf8(&mut [0; 4])));
                    if item.is_some() {
                        *index += 1;
                    }
                    Advance::Done(item)
                }
                IterState::Range {
                    next,
                    remaining,
                    step,
                } => {
                    if *remaining == 0 {
                        Advance::Done(None)
                    } else {
                        let item = *next;
                        *remaining -= 1;
                        *next = next.wrapping_add(*step);
                        Advance::Done(Some(Value::Int(item)))
                    }
                }
                IterState::Items { items, index, .. } => {
                    let item = items.get(*index).cloned();
                    if item.is_some() {
                        *index += 1;
                    }
                    Advance::Done(item)
                }
                IterState::Enumerate { inner, .. } => Advance::Enumerate(inner.clone()),
                IterState::Zip { inners } => Advance::Zip(inners.clone()),
                IterState::Map { func, inners } => Advance::Map(func.clone(), inners.clone()),
                IterState::Filter { func, inner } => Advance::Filter(func.clone(), inner.clone()),
                IterState::User { target } => Advance::User(target.clone()),
            }
        };

        match advance {
            Advance::Done(item) => Ok(item),
            Advance::Enumerate(inner) => {
                let Some(item) = self.iter_next(&inner)? else {
                    return Ok(None);
                };
                let mut state = it.borrow_mut();
                let position = match &mut *state {
                    IterState::Enumerate { count, .. } => {
                        let position = *count;
                        *count += 1;
                        position
                    }
                    _ => 0,
                };
                Ok(Some(Value::tuple(vec![Value::Int(position), item])))
            }
            Advance::Zip(inners) => {
                if inners.is_empty() {
                    return Ok(None);
                }
                let mut row = Vec::with_capacity(inners.len());
                for inner in &inners {
                    match self.iter_next(inner)? {
                        Some(item) => row.push(item),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::tuple(row)))
            }
            Advance::Map(func, inners) => {
                let mut args = smallvec![];
                for inner in &inners {
                    match self.iter_next(inner)? {
                        Some(item) => args.push(item),
                        None => return Ok(None),
                    }
                }
                self.call_value(&func, args, Vec::new()).map(Some)
            }
            Advance::Filter(func, inner) => loop {
                self.tick()?;
                let Some(item) = self.iter_next(&inner)? else {
                    return Ok(None);
                };
                let keep = if func.is_none() {
                    self.truthy(&item)?
                } else {
                    let verdict = self.call_value(&func, smallvec![item.clone()], Vec::new())?;
                    self.truthy(&verdict)?
                };
                if keep {
                    return Ok(Some(item));
                }
            },
            Advance::User(target) => match self.call_method(&target, "__next__", smallvec![]) {
                Ok(item) => Ok(Some(item)),
                Err(Flow::Raise(raised))
                    if raised.exception.exc_type == ExcType::StopIteration =>
                {
                    Ok(None)
                }
                Err(flow) => Err(flow),
            },
        }
    }

    /// Drains an iterable into a vector, honouring the collection budget.
    pub(crate) fn collect(&mut self, value: &Value) -> Result<Vec<Value>, Flow> {
        match value {
            Value::List(items) => return Ok(items.borrow().clone()),
            Value::Tuple(items) => return Ok((**items).clone()),
            _ => {}
        }
        let it = self.make_iter(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.iter_next(&it)? {
            self.check_len(items.len() + 1)?;
            self.tick()?;
            items.push(item);
        }
        Ok(items)
    }
}

pub(crate) fn not_iterable(value: &Value) -> Exc {
    Exc::type_error(format!("'{}' object is not iterable", value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::value::RangeValue;
    use crate::interpreter::InterpreterConfig;

    #[test]
    fn range_and_enumerate() {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        let range = Value::Range(RangeValue {
            start: 0,
            stop: 6,
            step: 2,
        });
        let items = interp.collect(&range).unwrap();
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], Value::Int(4)));

        let inner = interp.make_iter(&Value::str("ab")).unwrap();
        let enumerate = Rc::new(RefCell::new(IterState::Enumerate { inner, count: 1 }));
        let first = interp.iter_next(&enumerate).unwrap().unwrap();
        assert_eq!(format!("{first:?}"), "<tuple len=2>");
        assert!(interp.iter_next(&enumerate).unwrap().is_some());
        assert!(interp.iter_next(&enumerate).unwrap().is_none());
    }

    #[test]
    fn list_iteration_sees_appends() {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        let list = Value::list(vec![Value::Int(1)]);
        let it = interp.make_iter(&list).unwrap();
        assert!(interp.iter_next(&it).unwrap().is_some());
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(2));
        }
        assert!(matches!(interp.iter_next(&it).unwrap(), Some(Value::Int(2))));
    }

    #[test]
    fn integers_are_not_iterable() {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        assert!(interp.make_iter(&Value::Int(3)).is_err());
    }
}
