//! Operators: arithmetic, bitwise, comparison, membership and truthiness.
//!
//! Integer arithmetic is checked; results outside the 64-bit range raise
//! `OverflowError`. Operators on instances dispatch to the class's dunder
//! methods, trying the reflected method on the right operand second.

use std::cmp::Ordering;
use std::rc::Rc;

use hurdle_lang::ast::{BinOp, CmpOp, UnaryOp};
use smallvec::smallvec;

use super::error::{Exc, ExcType, Flow};
use super::state::Interpreter;
use super::value::{Dict, Function, HashKey, Missing, SetItems, TypeKind, Value, ViewKind};

fn dunder(op: BinOp) -> (&'static str, &'static str) {
    match op {
        BinOp::Add => ("__add__", "__radd__"),
        BinOp::Sub => ("__sub__", "__rsub__"),
        BinOp::Mul => ("__mul__", "__rmul__"),
        BinOp::Div => ("__truediv__", "__rtruediv__"),
        BinOp::FloorDiv => ("__floordiv__", "__rfloordiv__"),
        BinOp::Mod => ("__mod__", "__rmod__"),
        BinOp::Pow => ("__pow__", "__rpow__"),
        BinOp::MatMul => ("__matmul__", "__rmatmul__"),
        BinOp::LShift => ("__lshift__", "__rlshift__"),
        BinOp::RShift => ("__rshift__", "__rrshift__"),
        BinOp::BitAnd => ("__and__", "__rand__"),
        BinOp::BitOr => ("__or__", "__ror__"),
        BinOp::BitXor => ("__xor__", "__rxor__"),
    }
}

impl<'h> Interpreter<'h> {
    /// User-defined method `name` on the class of `value`, if any.
    pub(crate) fn user_dunder(&self, value: &Value, name: &str) -> Option<Rc<Function>> {
        let class = match value {
            Value::Instance(inst) => inst.class.clone(),
            Value::Exception(exc) => exc.class.clone()?,
            _ => return None,
        };
        match class.lookup(name) {
            Some(Value::Function(func)) => Some(func),
            _ => None,
        }
    }

    pub(crate) fn truthy(&mut self, value: &Value) -> Result<bool, Flow> {
        if let Some(truth) = value.builtin_truthy() {
            return Ok(truth);
        }
        if let Some(func) = self.user_dunder(value, "__bool__") {
            return match self.call_function(&func, smallvec![value.clone()], Vec::new())? {
                Value::Bool(b) => Ok(b),
                other => Err(Exc::type_error(format!(
                    "__bool__ should return bool, returned {}",
                    other.type_name()
                ))
                .into()),
            };
        }
        if let Some(func) = self.user_dunder(value, "__len__") {
            let len = self.call_function(&func, smallvec![value.clone()], Vec::new())?;
            return Ok(len.as_int().unwrap_or(1) != 0);
        }
        Ok(true)
    }

    pub(crate) fn binary_op(&mut self, op: BinOp, left: &Value, right: &Value) -> Result<Value, Flow> {
        if let Some(value) = self.builtin_binary(op, left, right)? {
            return Ok(value);
        }
        let (forward, reflected) = dunder(op);
        if let Some(func) = self.user_dunder(left, forward) {
            return self.call_function(&func, smallvec![left.clone(), right.clone()], Vec::new());
        }
        if let Some(func) = self.user_dunder(right, reflected) {
            return self.call_function(&func, smallvec![right.clone(), left.clone()], Vec::new());
        }
        Err(unsupported_operands(op, left, right).into())
    }

    /// `left op= right`: lists, sets and dicts update in place.
    pub(crate) fn inplace_op(&mut self, op: BinOp, left: &Value, right: &Value) -> Result<Value, Flow> {
        match (op, left) {
            (BinOp::Add, Value::List(items)) => {
                let extra = self.collect(right)?;
                self.check_len(items.borrow().len() + extra.len())?;
                items.borrow_mut().extend(extra);
                return Ok(left.clone());
            }
            (BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor, Value::Set(_))
            | (BinOp::BitOr, Value::Dict(_)) => {
                let result = self.binary_op(op, left, right)?;
                match (left, &result) {
                    (Value::Set(target), Value::Set(source)) => {
                        let items = source.borrow().clone();
                        *target.borrow_mut() = items;
                    }
                    (Value::Dict(target), Value::Dict(source)) => {
                        let entries = source.borrow().entries.clone();
                        target.borrow_mut().entries = entries;
                    }
                    _ => return Ok(result),
                }
                return Ok(left.clone());
            }
            _ => {}
        }
        let inplace = format!("__i{}", &dunder(op).0[2..]);
        if let Some(func) = self.user_dunder(left, &inplace) {
            return self.call_function(&func, smallvec![left.clone(), right.clone()], Vec::new());
        }
        self.binary_op(op, left, right)
    }

    fn builtin_binary(&mut self, op: BinOp, left: &Value, right: &Value) -> Result<Option<Value>, Flow> {
        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            if let (Value::Bool(x), Value::Bool(y)) = (left, right) {
                match op {
                    BinOp::BitAnd => return Ok(Some(Value::Bool(*x & *y))),
                    BinOp::BitOr => return Ok(Some(Value::Bool(*x | *y))),
                    BinOp::BitXor => return Ok(Some(Value::Bool(*x ^ *y))),
                    _ => {}
                }
            }
            return int_binary(op, a, b).map_err(Flow::from);
        }
        if left.is_number() && right.is_number() {
            let (Some(a), Some(b)) = (left.as_float(), right.as_float()) else {
                return Ok(None);
            };
            return float_binary(op, a, b).map_err(Flow::from);
        }

        let value = match (op, left, right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                self.check_len(a.len() + b.len())?;
                Value::str(&format!("{a}{b}"))
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
                let count = n.as_int().unwrap_or(0).max(0) as usize;
                self.check_len(s.len().saturating_mul(count))?;
                Value::str(&s.repeat(count))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                self.check_len(items.len())?;
                Value::list(items)
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                let mut items = (**a).clone();
                items.extend(b.iter().cloned());
                self.check_len(items.len())?;
                Value::tuple(items)
            }
            (BinOp::Mul, Value::List(_) | Value::Tuple(_), n)
            | (BinOp::Mul, n, Value::List(_) | Value::Tuple(_))
                if n.as_int().is_some() =>
            {
                let count = n.as_int().unwrap_or(0).max(0) as usize;
                let seq = if n.is_same(right) { left } else { right };
                let items = match seq {
                    Value::List(items) => items.borrow().clone(),
                    Value::Tuple(items) => (**items).clone(),
                    _ => Vec::new(),
                };
                self.check_len(items.len().saturating_mul(count))?;
                let mut repeated = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    repeated.extend(items.iter().cloned());
                }
                match seq {
                    Value::List(_) => Value::list(repeated),
                    _ => Value::tuple(repeated),
                }
            }
            (BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor, Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                Value::set(set_binary(op, a, &b))
            }
            (BinOp::Sub | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Value::DictView(view), other)
                if view.kind == ViewKind::Keys =>
            {
                let keys = Value::set(self.hash_all(&view.snapshot())?);
                let other = self.collect(other)?;
                let other = Value::set(self.hash_all(&other)?);
                return self.builtin_binary(op, &keys, &other);
            }
            (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
                let mut merged = a.borrow().clone();
                for (key, (k, v)) in b.borrow().entries.iter() {
                    merged.insert(key.clone(), k.clone(), v.clone());
                }
                Value::dict(merged)
            }
            (BinOp::Add | BinOp::Sub, Value::Dict(a), Value::Dict(b))
                if a.borrow().kind() == TypeKind::Counter && b.borrow().kind() == TypeKind::Counter =>
            {
                let mut result = Dict::with_missing(Missing::Counter);
                let (a, b) = (a.borrow(), b.borrow());
                let count = |v: Option<Value>| v.and_then(|v| v.as_int()).unwrap_or(0);
                let mut keys: Vec<(HashKey, Value)> =
                    a.entries.iter().map(|(h, (k, _))| (h.clone(), k.clone())).collect();
                for (hash, (key, _)) in b.entries.iter() {
                    if !a.entries.contains_key(hash) {
                        keys.push((hash.clone(), key.clone()));
                    }
                }
                for (hash, key) in keys {
                    let (x, y) = (count(a.get(&hash)), count(b.get(&hash)));
                    let total = if op == BinOp::Add { x + y } else { x - y };
                    if total > 0 {
                        result.insert(hash, key, Value::Int(total));
                    }
                }
                Value::dict(result)
            }
            (BinOp::Mod, Value::Str(template), args) => {
                let text = self.percent_format(template, args)?;
                Value::str(&text)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    pub(crate) fn hash_all(&self, items: &[Value]) -> Result<SetItems, Flow> {
        let mut set = SetItems::with_capacity(items.len());
        for item in items {
            set.entry(HashKey::from_value(item)?).or_insert_with(|| item.clone());
        }
        Ok(set)
    }

    pub(crate) fn unary_op(&mut self, op: UnaryOp, operand: &Value) -> Result<Value, Flow> {
        let value = match (op, operand) {
            (UnaryOp::Not, v) => Value::Bool(!self.truthy(v)?),
            (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
            (UnaryOp::Neg, v) if v.as_int().is_some() => {
                let i = v.as_int().unwrap_or(0);
                Value::Int(i.checked_neg().ok_or_else(Exc::overflow)?)
            }
            (UnaryOp::Pos, Value::Float(f)) => Value::Float(*f),
            (UnaryOp::Pos, v) if v.as_int().is_some() => Value::Int(v.as_int().unwrap_or(0)),
            (UnaryOp::Invert, v) if v.as_int().is_some() => Value::Int(!v.as_int().unwrap_or(0)),
            (op, v) => {
                let name = match op {
                    UnaryOp::Neg => "__neg__",
                    UnaryOp::Pos => "__pos__",
                    _ => "__invert__",
                };
                if let Some(func) = self.user_dunder(v, name) {
                    return self.call_function(&func, smallvec![v.clone()], Vec::new());
                }
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Pos => "+",
                    _ => "~",
                };
                return Err(Exc::type_error(format!(
                    "bad operand type for unary {symbol}: '{}'",
                    v.type_name()
                ))
                .into());
            }
        };
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Comparison
    // -----------------------------------------------------------------------

    pub(crate) fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Result<bool, Flow> {
        match op {
            CmpOp::Eq => self.eq_values(left, right),
            CmpOp::NotEq => {
                if let Some(func) = self.user_dunder(left, "__ne__") {
                    let result =
                        self.call_function(&func, smallvec![left.clone(), right.clone()], Vec::new())?;
                    return self.truthy(&result);
                }
                Ok(!self.eq_values(left, right)?)
            }
            CmpOp::Is => Ok(left.is_same(right)),
            CmpOp::IsNot => Ok(!left.is_same(right)),
            CmpOp::In => self.contains(right, left),
            CmpOp::NotIn => Ok(!self.contains(right, left)?),
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => self.order(op, left, right, 0),
        }
    }

    pub(crate) fn lt(&mut self, left: &Value, right: &Value) -> Result<bool, Flow> {
        self.order(CmpOp::Lt, left, right, 0)
    }

    pub(crate) fn eq_values(&mut self, left: &Value, right: &Value) -> Result<bool, Flow> {
        self.eq_depth(left, right, 0)
    }

    fn eq_depth(&mut self, left: &Value, right: &Value, depth: usize) -> Result<bool, Flow> {
        if depth > self.config.budget.max_recursion_depth {
            return Err(Exc::new(
                ExcType::RecursionError,
                "maximum recursion depth exceeded in comparison",
            )
            .into());
        }
        if let Some(func) = self
            .user_dunder(left, "__eq__")
            .or_else(|| self.user_dunder(right, "__eq__"))
        {
            let (receiver, other) = if self.user_dunder(left, "__eq__").is_some() {
                (left, right)
            } else {
                (right, left)
            };
            let result =
                self.call_function(&func, smallvec![receiver.clone(), other.clone()], Vec::new())?;
            return self.truthy(&result);
        }
        let equal = match (left, right) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                self.seq_eq(&a, &b, depth)?
            }
            (Value::Tuple(a), Value::Tuple(b)) => self.seq_eq(a, b, depth)?,
            (Value::Deque(a), Value::Deque(b)) => {
                let a: Vec<Value> = a.borrow().iter().cloned().collect();
                let b: Vec<Value> = b.borrow().iter().cloned().collect();
                self.seq_eq(&a, &b, depth)?
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (hash, (_, value)) in a.entries.iter() {
                    let Some(other) = b.get(hash) else {
                        return Ok(false);
                    };
                    if !self.eq_depth(value, &other, depth + 1)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.keys().all(|k| b.contains_key(k))
            }
            (Value::Range(a), Value::Range(b)) => {
                a.len() == b.len() && (a.is_empty() || (a.start == b.start && (a.len() == 1 || a.step == b.step)))
            }
            (Value::DictView(a), Value::DictView(b)) if a.kind == ViewKind::Keys && b.kind == ViewKind::Keys => {
                let (a, b) = (a.dict.borrow(), b.dict.borrow());
                a.len() == b.len() && a.entries.keys().all(|k| b.entries.contains_key(k))
            }
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::ExcType(a), Value::ExcType(b)) => a == b,
            _ => left.is_same(right),
        };
        Ok(equal)
    }

    fn seq_eq(&mut self, a: &[Value], b: &[Value], depth: usize) -> Result<bool, Flow> {
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b) {
            if !self.eq_depth(x, y, depth + 1)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn order(&mut self, op: CmpOp, left: &Value, right: &Value, depth: usize) -> Result<bool, Flow> {
        if depth > self.config.budget.max_recursion_depth {
            return Err(Exc::new(
                ExcType::RecursionError,
                "maximum recursion depth exceeded in comparison",
            )
            .into());
        }
        let (forward, reflected) = match op {
            CmpOp::Lt => ("__lt__", "__gt__"),
            CmpOp::LtE => ("__le__", "__ge__"),
            CmpOp::Gt => ("__gt__", "__lt__"),
            _ => ("__ge__", "__le__"),
        };
        if let Some(func) = self.user_dunder(left, forward) {
            let result = self.call_function(&func, smallvec![left.clone(), right.clone()], Vec::new())?;
            return self.truthy(&result);
        }
        if let Some(func) = self.user_dunder(right, reflected) {
            let result = self.call_function(&func, smallvec![right.clone(), left.clone()], Vec::new())?;
            return self.truthy(&result);
        }

        let ordering = match (left, right) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => {
                    let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
                    match x.partial_cmp(&y) {
                        Some(ordering) => Some(ordering),
                        // Any ordering involving NaN is false.
                        None => return Ok(false),
                    }
                }
            },
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow().clone(), b.borrow().clone());
                return self.seq_order(op, &a, &b, depth);
            }
            (Value::Tuple(a), Value::Tuple(b)) => return self.seq_order(op, a, b, depth),
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                let subset = a.keys().all(|k| b.contains_key(k));
                let superset = b.keys().all(|k| a.contains_key(k));
                return Ok(match op {
                    CmpOp::Lt => subset && a.len() < b.len(),
                    CmpOp::LtE => subset,
                    CmpOp::Gt => superset && a.len() > b.len(),
                    _ => superset,
                });
            }
            _ => None,
        };
        match ordering {
            Some(ordering) => Ok(match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::LtE => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }),
            None => Err(Exc::type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ))
            .into()),
        }
    }

    fn seq_order(&mut self, op: CmpOp, a: &[Value], b: &[Value], depth: usize) -> Result<bool, Flow> {
        for (x, y) in a.iter().zip(b) {
            if !self.eq_depth(x, y, depth + 1)? {
                return self.order(op, x, y, depth + 1);
            }
        }
        let ordering = a.len().cmp(&b.len());
        Ok(match op {
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::LtE => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        })
    }

    /// `item in container`.
    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> Result<bool, Flow> {
        let found = match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => haystack.contains(needle.as_ref()),
                other => {
                    return Err(Exc::type_error(format!(
                        "'in <string>' requires string as left operand, not {}",
                        other.type_name()
                    ))
                    .into())
                }
            },
            Value::Dict(dict) => {
                let key = HashKey::from_value(item)?;
                dict.borrow().entries.contains_key(&key)
            }
            Value::Set(set) => {
                let key = HashKey::from_value(item)?;
                set.borrow().contains_key(&key)
            }
            Value::Range(range) => match item {
                Value::Int(i) => range.contains(*i),
                Value::Bool(b) => range.contains(*b as i64),
                Value::Float(f) if f.fract() == 0.0 => range.contains(*f as i64),
                _ => false,
            },
            Value::DictView(view) if view.kind == ViewKind::Keys => {
                let key = HashKey::from_value(item)?;
                view.dict.borrow().entries.contains_key(&key)
            }
            Value::Instance(_) if self.user_dunder(container, "__contains__").is_some() => {
                let Some(func) = self.user_dunder(container, "__contains__") else {
                    return Ok(false);
                };
                let result =
                    self.call_function(&func, smallvec![container.clone(), item.clone()], Vec::new())?;
                self.truthy(&result)?
            }
            Value::List(_)
            | Value::Tuple(_)
            | Value::Deque(_)
            | Value::DictView(_)
            | Value::Iterator(_)
            | Value::Instance(_) => {
                let it = match self.make_iter(container) {
                    Ok(it) => it,
                    Err(_) => return Err(not_container(container).into()),
                };
                while let Some(candidate) = self.iter_next(&it)? {
                    if candidate.is_same(item) || self.eq_values(&candidate, item)? {
                        return Ok(true);
                    }
                }
                false
            }
            _ => return Err(not_container(container).into()),
        };
        Ok(found)
    }
}

fn not_container(value: &Value) -> Exc {
    Exc::type_error(format!(
        "argument of type '{}' is not iterable",
        value.type_name()
    ))
}

fn unsupported_operands(op: BinOp, left: &Value, right: &Value) -> Exc {
    match (op, left) {
        (BinOp::Add, Value::Str(_)) => {
            return Exc::type_error(format!(
                "can only concatenate str (not \"{}\") to str",
                right.type_name()
            ))
        }
        (BinOp::Add, Value::List(_)) => {
            return Exc::type_error(format!(
                "can only concatenate list (not \"{}\") to list",
                right.type_name()
            ))
        }
        (BinOp::Add, Value::Tuple(_)) => {
            return Exc::type_error(format!(
                "can only concatenate tuple (not \"{}\") to tuple",
                right.type_name()
            ))
        }
        _ => {}
    }
    Exc::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn set_binary(op: BinOp, mut a: SetItems, b: &SetItems) -> SetItems {
    match op {
        BinOp::BitOr => {
            for (key, value) in b {
                a.entry(key.clone()).or_insert_with(|| value.clone());
            }
            a
        }
        BinOp::BitAnd => {
            a.retain(|key, _| b.contains_key(key));
            a
        }
        BinOp::Sub => {
            a.retain(|key, _| !b.contains_key(key));
            a
        }
        _ => {
            let mut result: SetItems = a
                .iter()
                .filter(|(key, _)| !b.contains_key(*key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, value) in b {
                if !a.contains_key(key) {
                    result.insert(key.clone(), value.clone());
                }
            }
            result
        }
    }
}

/// Floor division and modulo with the sign rules of the reference language.
pub(crate) fn floor_divmod(a: i64, b: i64) -> Result<(i64, i64), Exc> {
    if b == 0 {
        return Err(Exc::zero_division("integer division or modulo by zero"));
    }
    let quotient = a.checked_div(b).ok_or_else(Exc::overflow)?;
    let remainder = a.wrapping_rem(b);
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        Ok((quotient - 1, remainder + b))
    } else {
        Ok((quotient, remainder))
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Option<Value>, Exc> {
    let value = match op {
        BinOp::Add => Value::Int(a.checked_add(b).ok_or_else(Exc::overflow)?),
        BinOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(Exc::overflow)?),
        BinOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(Exc::overflow)?),
        BinOp::Div => {
            if b == 0 {
                return Err(Exc::zero_division("division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinOp::FloorDiv => Value::Int(floor_divmod(a, b)?.0),
        BinOp::Mod => {
            if b == 0 {
                return Err(Exc::zero_division("integer modulo by zero"));
            }
            Value::Int(floor_divmod(a, b)?.1)
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(Exc::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                Value::Float((a as f64).powf(b as f64))
            } else {
                let exp = u32::try_from(b).map_err(|_| Exc::overflow())?;
                Value::Int(a.checked_pow(exp).ok_or_else(Exc::overflow)?)
            }
        }
        BinOp::LShift => {
            if b < 0 {
                return Err(Exc::value_error("negative shift count"));
            }
            if a == 0 {
                Value::Int(0)
            } else if b >= 64 {
                return Err(Exc::overflow());
            } else {
                let shifted = (a as i128) << b;
                Value::Int(i64::try_from(shifted).map_err(|_| Exc::overflow())?)
            }
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(Exc::value_error("negative shift count"));
            }
            Value::Int(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }
        BinOp::BitAnd => Value::Int(a & b),
        BinOp::BitOr => Value::Int(a | b),
        BinOp::BitXor => Value::Int(a ^ b),
        BinOp::MatMul => return Ok(None),
    };
    Ok(Some(value))
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<Option<Value>, Exc> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Exc::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(Exc::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(Exc::zero_division("float modulo by zero"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(Exc::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(Exc::new(
                    ExcType::OverflowError,
                    "(34, 'Numerical result out of range')",
                ));
            }
            result
        }
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_follows_sign_of_divisor() {
        assert_eq!(floor_divmod(7, 2).unwrap(), (3, 1));
        assert_eq!(floor_divmod(-7, 2).unwrap(), (-4, 1));
        assert_eq!(floor_divmod(7, -2).unwrap(), (-4, -1));
        assert!(floor_divmod(1, 0).is_err());
    }

    #[test]
    fn integer_overflow_is_reported() {
        let err = int_binary(BinOp::Mul, i64::MAX, 2).unwrap_err();
        assert_eq!(err.ty, ExcType::OverflowError);
        assert!(int_binary(BinOp::Pow, 2, 70).is_err());
        assert!(matches!(
            int_binary(BinOp::Pow, 2, 10).unwrap(),
            Some(Value::Int(1024))
        ));
    }

    #[test]
    fn float_modulo_is_non_negative_for_positive_divisor() {
        match float_binary(BinOp::Mod, -1.0, 3.0).unwrap() {
            Some(Value::Float(f)) => assert_eq!(f, 2.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn set_operators() {
        let items = |xs: &[i64]| -> SetItems {
            xs.iter().map(|x| (HashKey::Int(*x), Value::Int(*x))).collect()
        };
        let diff = set_binary(BinOp::Sub, items(&[1, 2, 3]), &items(&[2]));
        assert_eq!(diff.len(), 2);
        let sym = set_binary(BinOp::BitXor, items(&[1, 2]), &items(&[2, 3]));
        assert!(sym.contains_key(&HashKey::Int(1)) && sym.contains_key(&HashKey::Int(3)));
        assert_eq!(sym.len(), 2);
    }
}
