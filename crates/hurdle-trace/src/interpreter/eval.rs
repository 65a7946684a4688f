//! Expression evaluation and subscripting.
//!
//! Comprehensions run inline in the current frame: their loop variables are
//! bound in the frame's namespace while the comprehension runs and the
//! previous bindings are restored afterwards, so no separate frame (and no
//! `call` event) is produced.

use hurdle_lang::ast::{
    Arg, BoolOp, Comprehension, ComprehensionKind, Constant, Expr, FStringPart, FunctionDef,
};
use smallvec::smallvec;

use super::error::{Exc, ExcType, Flow};
use super::state::Interpreter;
use super::value::{
    Args, Dict, HashKey, IterState, Kwargs, Missing, RangeValue, SetItems, TypeKind, Value,
};

/// A subscript index: a single item or a slice.
pub(crate) enum Index {
    Item(Value),
    Slice {
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    },
}

/// Accumulator for a comprehension's result.
enum Collector {
    List(Vec<Value>),
    Set(SetItems),
    Dict(Dict),
}

impl Collector {
    fn len(&self) -> usize {
        match self {
            Collector::List(items) => items.len(),
            Collector::Set(items) => items.len(),
            Collector::Dict(dict) => dict.len(),
        }
    }
}

impl<'h> Interpreter<'h> {
    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, Flow> {
        match expr {
            Expr::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::str(s),
            }),
            Expr::FString(parts) => self.eval_fstring(parts),
            Expr::Name(name) => self.load_name(name),
            Expr::List(items) => {
                let items = self.eval_all(items)?;
                Ok(Value::list(items))
            }
            Expr::Tuple(items) => {
                let items = self.eval_all(items)?;
                Ok(Value::tuple(items))
            }
            Expr::Set(items) => {
                let items = self.eval_all(items)?;
                Ok(Value::set(self.hash_all(&items)?))
            }
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(HashKey::from_value(&key)?, key, value);
                }
                Ok(Value::dict(dict))
            }
            Expr::BinOp { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary_op(*op, &left, &right)
            }
            Expr::UnaryOp { op, operand } => {
                let operand = self.eval(operand)?;
                self.unary_op(*op, &operand)
            }
            Expr::BoolOp { op, values } => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(value)?;
                    let truth = self.truthy(&last)?;
                    match op {
                        BoolOp::And if !truth => return Ok(last),
                        BoolOp::Or if truth => return Ok(last),
                        _ => {}
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut current = self.eval(left)?;
                for (op, comparator) in ops.iter().zip(comparators) {
                    let next = self.eval(comparator)?;
                    if !self.compare(*op, &current, &next)? {
                        return Ok(Value::Bool(false));
                    }
                    current = next;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                let test = self.eval(test)?;
                if self.truthy(&test)? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda(def) => {
                let defaults = self.eval_defaults(def)?;
                Ok(Value::Function(self.make_function(def, defaults)))
            }
            Expr::Call { func, args } => {
                let callee = self.eval(func)?;
                let (args, kwargs) = self.eval_args(args)?;
                self.call_value(&callee, args, kwargs)
            }
            Expr::Attribute { value, attr } => {
                let value = self.eval(value)?;
                self.get_attr(&value, attr)
            }
            Expr::Subscript { value, index } => {
                let value = self.eval(value)?;
                let index = self.eval_index(index)?;
                self.get_item(&value, index)
            }
            Expr::Slice { .. } => Err(Exc::type_error("slice is only valid as a subscript").into()),
            Expr::Comprehension {
                kind,
                element,
                value,
                generators,
            } => self.eval_comprehension(*kind, element, value.as_deref(), generators),
            Expr::Named { name, value } => {
                let value = self.eval(value)?;
                self.store_name(name, value.clone());
                Ok(value)
            }
            Expr::Starred(_) => {
                Err(Exc::type_error("can't use starred expression here").into())
            }
        }
    }

    /// Evaluates display items, splicing in the elements of `*` items.
    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, Flow> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            if let Expr::Starred(inner) = expr {
                let iterable = self.eval(inner)?;
                values.extend(self.collect(&iterable)?);
                self.check_len(values.len())?;
            } else {
                values.push(self.eval(expr)?);
            }
        }
        Ok(values)
    }

    pub(crate) fn eval_defaults(
        &mut self,
        def: &FunctionDef,
    ) -> Result<Vec<Option<Value>>, Flow> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            });
        }
        Ok(defaults)
    }

    fn eval_args(&mut self, args: &[Arg]) -> Result<(Args, Kwargs), Flow> {
        let mut positional = Args::new();
        let mut keywords = Kwargs::new();
        for arg in args {
            match arg {
                Arg::Positional(expr) => positional.push(self.eval(expr)?),
                Arg::Starred(expr) => {
                    let value = self.eval(expr)?;
                    let items = match self.collect(&value) {
                        Ok(items) => items,
                        Err(Flow::Raise(raised)) if raised.exception.exc_type == ExcType::TypeError => {
                            return Err(Exc::type_error(format!(
                                "argument after * must be an iterable, not {}",
                                value.type_name()
                            ))
                            .into())
                        }
                        Err(flow) => return Err(flow),
                    };
                    positional.extend(items);
                }
                Arg::Keyword(name, expr) => {
                    let value = self.eval(expr)?;
                    keywords.push((name.clone(), value));
                }
            }
        }
        Ok((positional, keywords))
    }

    fn eval_fstring(&mut self, parts: &[FStringPart]) -> Result<Value, Flow> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let value = match conversion {
                        Some('r') => Value::str(&self.repr_of(&value)?),
                        Some('a') => Value::str(&ascii_escape(&self.repr_of(&value)?)),
                        Some(_) => Value::str(&self.str_of(&value)?),
                        None => value,
                    };
                    let spec = spec.as_deref().unwrap_or("");
                    let text = self.format_value(&value, spec)?;
                    out.push_str(&text);
                }
            }
            self.check_len(out.len())?;
        }
        Ok(Value::str(&out))
    }

    // -----------------------------------------------------------------------
    // Comprehensions
    // -----------------------------------------------------------------------

    fn eval_comprehension(
        &mut self,
        kind: ComprehensionKind,
        element: &Expr,
        value: Option<&Expr>,
        generators: &[Comprehension],
    ) -> Result<Value, Flow> {
        let mut names = Vec::new();
        for generator in generators {
            generator.target.target_names(&mut names);
        }
        let scope = self.frame().locals.clone();
        let saved: Vec<(String, Option<Value>)> = {
            let scope = scope.borrow();
            names
                .iter()
                .map(|name| (name.clone(), scope.get(name).cloned()))
                .collect()
        };

        let mut collector = match kind {
            ComprehensionKind::Set => Collector::Set(SetItems::new()),
            ComprehensionKind::Dict => Collector::Dict(Dict::new()),
            ComprehensionKind::List | ComprehensionKind::Generator => Collector::List(Vec::new()),
        };
        let result = self.comprehension_level(generators, element, value, &mut collector);

        {
            let mut scope = scope.borrow_mut();
            for (name, previous) in saved {
                match previous {
                    Some(value) => {
                        scope.insert(name, value);
                    }
                    None => {
                        scope.shift_remove(&name);
                    }
                }
            }
        }
        result?;

        Ok(match (kind, collector) {
            (ComprehensionKind::Generator, Collector::List(items)) => Value::iterator(IterState::Items {
                name: "generator",
                items,
                index: 0,
            }),
            (_, Collector::List(items)) => Value::list(items),
            (_, Collector::Set(items)) => Value::set(items),
            (_, Collector::Dict(dict)) => Value::dict(dict),
        })
    }

    fn comprehension_level(
        &mut self,
        generators: &[Comprehension],
        element: &Expr,
        value: Option<&Expr>,
        collector: &mut Collector,
    ) -> Result<(), Flow> {
        let Some((generator, rest)) = generators.split_first() else {
            let item = self.eval(element)?;
            self.check_len(collector.len() + 1)?;
            match collector {
                Collector::List(items) => items.push(item),
                Collector::Set(items) => {
                    items.entry(HashKey::from_value(&item)?).or_insert(item);
                }
                Collector::Dict(dict) => {
                    let mapped = match value {
                        Some(expr) => self.eval(expr)?,
                        None => Value::None,
                    };
                    dict.insert(HashKey::from_value(&item)?, item, mapped);
                }
            }
            return Ok(());
        };
        let iterable = self.eval(&generator.iter)?;
        let it = self.make_iter(&iterable)?;
        'items: while let Some(item) = self.iter_next(&it)? {
            self.tick()?;
            self.assign(&generator.target, item)?;
            for cond in &generator.ifs {
                let test = self.eval(cond)?;
                if !self.truthy(&test)? {
                    continue 'items;
                }
            }
            self.comprehension_level(rest, element, value, collector)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Subscripts
    // -----------------------------------------------------------------------

    pub(crate) fn eval_index(&mut self, index: &Expr) -> Result<Index, Flow> {
        let Expr::Slice { lower, upper, step } = index else {
            return Ok(Index::Item(self.eval(index)?));
        };
        let mut bound = |part: &Option<Box<Expr>>| -> Result<Option<i64>, Flow> {
            let Some(expr) = part else {
                return Ok(None);
            };
            match self.eval(expr)? {
                Value::None => Ok(None),
                value => value.as_int().map(Some).ok_or_else(|| {
                    Exc::type_error(
                        "slice indices must be integers or None or have an __index__ method",
                    )
                    .into()
                }),
            }
        };
        let lower = bound(lower)?;
        let upper = bound(upper)?;
        let step = bound(step)?;
        Ok(Index::Slice { lower, upper, step })
    }

    pub(crate) fn get_item(&mut self, container: &Value, index: Index) -> Result<Value, Flow> {
        let key = match index {
            Index::Slice { lower, upper, step } => return self.get_slice(container, lower, upper, step),
            Index::Item(key) => key,
        };
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let i = seq_index(container, &key, items.len())?;
                items.get(i).cloned().ok_or_else(|| out_of_range(container).into())
            }
            Value::Tuple(items) => {
                let i = seq_index(container, &key, items.len())?;
                items.get(i).cloned().ok_or_else(|| out_of_range(container).into())
            }
            Value::Str(s) => {
                let count = s.chars().count();
                let i = seq_index(container, &key, count)?;
                s.chars()
                    .nth(i)
                    .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                    .ok_or_else(|| out_of_range(container).into())
            }
            Value::Range(range) => {
                let i = seq_index(container, &key, range.len())?;
                range
                    .get(i)
                    .map(Value::Int)
                    .ok_or_else(|| out_of_range(container).into())
            }
            Value::Deque(items) => {
                let items = items.borrow();
                let i = seq_index(container, &key, items.len())?;
                items.get(i).cloned().ok_or_else(|| out_of_range(container).into())
            }
            Value::Dict(dict) => {
                let hash = HashKey::from_value(&key)?;
                let (found, missing) = {
                    let dict = dict.borrow();
                    (dict.get(&hash), dict.missing.clone())
                };
                if let Some(found) = found {
                    return Ok(found);
                }
                match missing {
                    Missing::Raise => Err(Exc::key_error(key).into()),
                    Missing::Factory(factory) if factory.is_none() => Err(Exc::key_error(key).into()),
                    Missing::Counter => Ok(Value::Int(0)),
                    Missing::Factory(factory) => {
                        let made = self.call_value(&factory, smallvec![], Vec::new())?;
                        dict.borrow_mut().insert(hash, key, made.clone());
                        Ok(made)
                    }
                }
            }
            Value::Instance(_) => match self.user_dunder(container, "__getitem__") {
                Some(func) => self.call_function(&func, smallvec![container.clone(), key], Vec::new()),
                None => Err(not_subscriptable(container).into()),
            },
            // Generic aliases such as `list[int]` in annotations.
            Value::Type(_) => Ok(container.clone()),
            other => Err(not_subscriptable(other).into()),
        }
    }

    fn get_slice(
        &mut self,
        container: &Value,
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    ) -> Result<Value, Flow> {
        let len = match container {
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            Value::Str(s) => s.chars().count(),
            Value::Range(range) => range.len(),
            Value::Instance(_) => {
                return Err(Exc::type_error(format!(
                    "'{}' object is not subscriptable",
                    container.type_name()
                ))
                .into())
            }
            other => {
                return Err(Exc::type_error(format!(
                    "sequence index must be integer, not 'slice' for '{}'",
                    other.type_name()
                ))
                .into())
            }
        };
        let indices = slice_indices(len, lower, upper, step)?;
        let value = match container {
            Value::List(items) => {
                let items = items.borrow();
                Value::list(indices.iter().map(|&i| items[i].clone()).collect())
            }
            Value::Tuple(items) => Value::tuple(indices.iter().map(|&i| items[i].clone()).collect()),
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                Value::str(&indices.iter().map(|&i| chars[i]).collect::<String>())
            }
            Value::Range(range) => {
                let (start, stop, step) = adjusted(len, lower, upper, step)?;
                Value::Range(RangeValue {
                    start: range.start + start * range.step,
                    stop: range.start + stop * range.step,
                    step: range.step * step,
                })
            }
            _ => Value::None,
        };
        Ok(value)
    }

    pub(crate) fn set_item(&mut self, container: &Value, index: Index, value: Value) -> Result<(), Flow> {
        let key = match index {
            Index::Slice { lower, upper, step } => {
                return self.set_slice(container, lower, upper, step, value)
            }
            Index::Item(key) => key,
        };
        match container {
            Value::List(items) => {
                let len = items.borrow().len();
                let i = seq_index(container, &key, len)?;
                match items.borrow_mut().get_mut(i) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(Exc::index_error("list assignment index out of range").into()),
                }
            }
            Value::Deque(items) => {
                let len = items.borrow().len();
                let i = seq_index(container, &key, len)?;
                match items.borrow_mut().get_mut(i) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(Exc::index_error("deque index out of range").into()),
                }
            }
            Value::Dict(dict) => {
                let hash = HashKey::from_value(&key)?;
                dict.borrow_mut().insert(hash, key, value);
                let len = dict.borrow().len();
                self.check_len(len)
            }
            Value::Instance(_) => match self.user_dunder(container, "__setitem__") {
                Some(func) => {
                    self.call_function(&func, smallvec![container.clone(), key, value], Vec::new())?;
                    Ok(())
                }
                None => Err(no_item_assignment(container).into()),
            },
            other => Err(no_item_assignment(other).into()),
        }
    }

    fn set_slice(
        &mut self,
        container: &Value,
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
        value: Value,
    ) -> Result<(), Flow> {
        let Value::List(items) = container else {
            return Err(no_item_assignment(container).into());
        };
        let replacement = self.collect(&value)?;
        let len = items.borrow().len();
        if step.unwrap_or(1) == 1 {
            let (start, stop, _) = adjusted(len, lower, upper, Some(1))?;
            let (start, stop) = (start as usize, (stop.max(start)) as usize);
            self.check_len(len - (stop - start) + replacement.len())?;
            items.borrow_mut().splice(start..stop, replacement);
            return Ok(());
        }
        let indices = slice_indices(len, lower, upper, step)?;
        if indices.len() != replacement.len() {
            return Err(Exc::value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                indices.len()
            ))
            .into());
        }
        let mut items = items.borrow_mut();
        for (i, item) in indices.into_iter().zip(replacement) {
            items[i] = item;
        }
        Ok(())
    }

    pub(crate) fn del_item(&mut self, container: &Value, index: Index) -> Result<(), Flow> {
        let key = match index {
            Index::Slice { lower, upper, step } => {
                let Value::List(items) = container else {
                    return Err(no_item_deletion(container).into());
                };
                let len = items.borrow().len();
                let mut indices = slice_indices(len, lower, upper, step)?;
                indices.sort_unstable();
                let mut items = items.borrow_mut();
                for i in indices.into_iter().rev() {
                    items.remove(i);
                }
                return Ok(());
            }
            Index::Item(key) => key,
        };
        match container {
            Value::List(items) => {
                let len = items.borrow().len();
                let i = seq_index(container, &key, len)?;
                if i >= len {
                    return Err(Exc::index_error("list assignment index out of range").into());
                }
                items.borrow_mut().remove(i);
                Ok(())
            }
            Value::Deque(items) => {
                let len = items.borrow().len();
                let i = seq_index(container, &key, len)?;
                if items.borrow_mut().remove(i).is_none() {
                    return Err(Exc::index_error("deque index out of range").into());
                }
                Ok(())
            }
            Value::Dict(dict) => {
                let hash = HashKey::from_value(&key)?;
                let removed = dict.borrow_mut().remove(&hash);
                match removed {
                    Some(_) => Ok(()),
                    None => Err(Exc::key_error(key).into()),
                }
            }
            Value::Instance(_) => match self.user_dunder(container, "__delitem__") {
                Some(func) => {
                    self.call_function(&func, smallvec![container.clone(), key], Vec::new())?;
                    Ok(())
                }
                None => Err(no_item_deletion(container).into()),
            },
            other => Err(no_item_deletion(other).into()),
        }
    }
}

/// Resolves an integer index against a sequence of `len` items. Negative
/// indices count from the end; the result may still be out of range.
fn seq_index(container: &Value, key: &Value, len: usize) -> Result<usize, Exc> {
    let Some(i) = key.as_int() else {
        let kind = match container {
            Value::Str(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::Range(_) => "range",
            Value::Deque(_) => "sequence",
            _ => "list",
        };
        return Err(Exc::type_error(format!(
            "{kind} indices must be integers or slices, not {}",
            key.type_name()
        )));
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 {
        return Err(out_of_range(container));
    }
    Ok(resolved as usize)
}

fn out_of_range(container: &Value) -> Exc {
    let message = match container {
        Value::Str(_) => "string index out of range",
        Value::Tuple(_) => "tuple index out of range",
        Value::Range(_) => "range object index out of range",
        Value::Deque(_) => "deque index out of range",
        _ => "list index out of range",
    };
    Exc::index_error(message)
}

fn not_subscriptable(value: &Value) -> Exc {
    Exc::type_error(format!("'{}' object is not subscriptable", value.type_name()))
}

fn no_item_assignment(value: &Value) -> Exc {
    Exc::type_error(format!(
        "'{}' object does not support item assignment",
        value.type_name()
    ))
}

fn no_item_deletion(value: &Value) -> Exc {
    Exc::type_error(format!(
        "'{}' object doesn't support item deletion",
        value.type_name()
    ))
}

/// Clamps slice bounds against a sequence of `len` items.
fn adjusted(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<(i64, i64, i64), Exc> {
    let len = len as i64;
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Exc::value_error("slice step cannot be zero"));
    }
    let (default_start, default_stop) = if step < 0 { (len - 1, -1) } else { (0, len) };
    let clamp = |bound: Option<i64>, default: i64| match bound {
        None => default,
        Some(mut i) => {
            if i < 0 {
                i += len;
                if i < 0 {
                    i = if step < 0 { -1 } else { 0 };
                }
            } else if i >= len {
                i = if step < 0 { len - 1 } else { len };
            }
            i
        }
    };
    Ok((clamp(lower, default_start), clamp(upper, default_stop), step))
}

/// The positions a slice selects, in selection order.
pub(crate) fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, Exc> {
    let (start, stop, step) = adjusted(len, lower, upper, step)?;
    let mut indices = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        indices.push(i as usize);
        i += step;
    }
    Ok(indices)
}

/// `ascii()`: escapes every non-ASCII character of a repr.
pub(crate) fn ascii_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c as u32 {
            0..=0x7f => out.push(c),
            code @ 0x80..=0xff => out.push_str(&format!("\\x{code:02x}")),
            code @ 0x100..=0xffff => out.push_str(&format!("\\u{code:04x}")),
            code => out.push_str(&format!("\\U{code:08x}")),
        }
    }
    out
}

/// Dict constructed from a list of `(key, value)` pairs.
pub(crate) fn dict_from_pairs(pairs: Vec<(Value, Value)>) -> Result<Dict, Exc> {
    let mut dict = Dict::new();
    for (key, value) in pairs {
        dict.insert(HashKey::from_value(&key)?, key, value);
    }
    Ok(dict)
}

/// Kind of a value used by `type()` for built-in scalars.
pub(crate) fn scalar_kind(value: &Value) -> Option<TypeKind> {
    Some(match value {
        Value::None => TypeKind::NoneType,
        Value::Bool(_) => TypeKind::Bool,
        Value::Int(_) => TypeKind::Int,
        Value::Float(_) => TypeKind::Float,
        Value::Str(_) => TypeKind::Str,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_clamp_like_the_reference_language() {
        assert_eq!(slice_indices(5, Some(1), Some(3), None).unwrap(), vec![1, 2]);
        assert_eq!(slice_indices(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, Some(10), Some(20), None).unwrap(), Vec::<usize>::new());
        assert_eq!(slice_indices(6, None, None, Some(2)).unwrap(), vec![0, 2, 4]);
        assert!(slice_indices(3, None, None, Some(0)).is_err());
    }

    #[test]
    fn negative_indices_resolve_from_the_end() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(seq_index(&list, &Value::Int(-1), 2).unwrap(), 1);
        assert!(seq_index(&list, &Value::Int(-3), 2).is_err());
        assert!(seq_index(&list, &Value::str("a"), 2).is_err());
    }

    #[test]
    fn ascii_escapes_non_ascii() {
        assert_eq!(ascii_escape("'é'"), "'\\xe9'");
        assert_eq!(ascii_escape("ok"), "ok");
    }
}
