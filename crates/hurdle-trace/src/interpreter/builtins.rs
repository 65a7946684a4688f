//! Built-in functions and constructors of the built-in types.

use std::collections::VecDeque;
use std::rc::Rc;

use smallvec::smallvec;

use super::error::{Exc, ExcType, Flow};
use super::eval::{dict_from_pairs, scalar_kind};
use super::modules;
use super::ops::floor_divmod;
use super::state::Interpreter;
use super::value::{
    new_scope, Args, Builtin, Class, Dict, HashKey, Instance, IterState, Kwargs, Missing, RangeValue,
    StreamKind, TypeKind, Value,
};
use hurdle_lang::ast::BinOp;

/// Functions available without an import.
static BUILTIN_FUNCTIONS: &[&str] = &[
    "print", "input", "len", "enumerate", "zip", "abs", "min", "max", "sum", "sorted",
    "reversed", "repr", "ascii", "isinstance", "issubclass", "ord", "chr", "round", "divmod",
    "pow", "any", "all", "map", "filter", "hash", "id", "iter", "next", "hex", "bin", "oct",
    "callable", "getattr", "setattr", "hasattr", "delattr", "super", "exit", "quit", "format",
];

/// Built-in types bound as global names.
static BUILTIN_TYPES: &[TypeKind] = &[
    TypeKind::Object,
    TypeKind::Type,
    TypeKind::Bool,
    TypeKind::Int,
    TypeKind::Float,
    TypeKind::Str,
    TypeKind::List,
    TypeKind::Tuple,
    TypeKind::Dict,
    TypeKind::Set,
    TypeKind::Range,
];

/// Resolves a name in the builtin namespace.
pub fn lookup(name: &str) -> Option<Value> {
    if let Some(kind) = BUILTIN_TYPES.iter().find(|kind| kind.name() == name) {
        return Some(Value::Type(*kind));
    }
    if let Some(ty) = ExcType::from_name(name) {
        return Some(Value::ExcType(ty));
    }
    BUILTIN_FUNCTIONS
        .iter()
        .find(|f| **f == name)
        .map(|f| Value::Builtin(Builtin { module: None, name: f }))
}

/// `type(value)`.
pub fn type_of(value: &Value) -> Value {
    if let Some(kind) = scalar_kind(value) {
        return Value::Type(kind);
    }
    let kind = match value {
        Value::List(_) => TypeKind::List,
        Value::Tuple(_) => TypeKind::Tuple,
        Value::Dict(dict) => dict.borrow().kind(),
        Value::Set(_) => TypeKind::Set,
        Value::Deque(_) => TypeKind::Deque,
        Value::Range(_) => TypeKind::Range,
        Value::Function(_) => TypeKind::Function,
        Value::Module(_) => TypeKind::Module,
        Value::Type(_) | Value::Class(_) | Value::ExcType(_) => TypeKind::Type,
        Value::Instance(inst) => return Value::Class(inst.class.clone()),
        Value::Exception(exc) => {
            return match &exc.class {
                Some(class) => Value::Class(class.clone()),
                None => Value::ExcType(exc.exc_type),
            }
        }
        _ => TypeKind::Object,
    };
    Value::Type(kind)
}

/// Checks a positional argument count, using the reference messages.
pub(crate) fn arity(name: &str, args: &Args, min: usize, max: usize) -> Result<(), Exc> {
    let n = args.len();
    if n >= min && n <= max {
        return Ok(());
    }
    let message = if min == max && min == 1 {
        format!("{name}() takes exactly one argument ({n} given)")
    } else if min == max {
        format!("{name} expected {min} arguments, got {n}")
    } else if n < min {
        format!("{name} expected at least {min} argument{}, got {n}", plural(min))
    } else {
        format!("{name} expected at most {max} argument{}, got {n}", plural(max))
    };
    Err(Exc::type_error(message))
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Splits keyword arguments into the slots named by `allowed`.
pub(crate) fn keywords<const N: usize>(
    name: &str,
    kwargs: Kwargs,
    allowed: [&str; N],
) -> Result<[Option<Value>; N], Exc> {
    let mut slots: [Option<Value>; N] = std::array::from_fn(|_| None);
    for (key, value) in kwargs {
        match allowed.iter().position(|a| *a == key) {
            Some(i) => slots[i] = Some(value),
            None if N == 0 => {
                return Err(Exc::type_error(format!("{name}() takes no keyword arguments")))
            }
            None => {
                return Err(Exc::type_error(format!(
                    "'{key}' is an invalid keyword argument for {name}()"
                )))
            }
        }
    }
    Ok(slots)
}

/// Integer argument, with the reference message for anything else.
pub(crate) fn int_arg(value: &Value) -> Result<i64, Exc> {
    value.as_int().ok_or_else(|| {
        Exc::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn attr_name(value: &Value) -> Result<&Rc<str>, Exc> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(Exc::type_error(format!(
            "attribute name must be string, not '{}'",
            other.type_name()
        ))),
    }
}

impl<'h> Interpreter<'h> {
    /// Calls a builtin function, a module function or an unbound method of a
    /// built-in type (`str.lower`, `dict.fromkeys`).
    pub(crate) fn call_builtin(&mut self, builtin: Builtin, args: Args, kwargs: Kwargs) -> Result<Value, Flow> {
        match builtin.module {
            None => self.call_global(builtin.name, args, kwargs),
            Some(module) if modules::is_module(module) => {
                self.call_module_function(module, builtin.name, args, kwargs)
            }
            Some(type_name) => {
                if builtin.name == "fromkeys" {
                    return self.call_native_method(&Value::dict(Dict::new()), "fromkeys", args, kwargs);
                }
                let mut args = args.into_iter();
                let Some(receiver) = args.next() else {
                    return Err(Exc::type_error(format!(
                        "unbound method {type_name}.{}() needs an argument",
                        builtin.name
                    ))
                    .into());
                };
                self.call_native_method(&receiver, builtin.name, args.collect(), kwargs)
            }
        }
    }

    pub(crate) fn call_global(&mut self, name: &str, args: Args, kwargs: Kwargs) -> Result<Value, Flow> {
        match name {
            "print" => return self.builtin_print(args, kwargs),
            "min" | "max" => return self.builtin_min_max(name, args, kwargs),
            "sorted" => {
                arity(name, &args, 1, 1)?;
                let [key, reverse] = keywords(name, kwargs, ["key", "reverse"])?;
                let items = self.collect(&args[0])?;
                let reverse = match reverse {
                    Some(flag) => self.truthy(&flag)?,
                    None => false,
                };
                let sorted = self.sort_values(items, key.as_ref(), reverse)?;
                return Ok(Value::list(sorted));
            }
            "sum" => {
                arity(name, &args, 1, 2)?;
                let [start] = keywords(name, kwargs, ["start"])?;
                let mut total = args.get(1).cloned().or(start).unwrap_or(Value::Int(0));
                if matches!(total, Value::Str(_)) {
                    return Err(Exc::type_error("sum() can't sum strings [use ''.join(seq) instead]").into());
                }
                let it = self.make_iter(&args[0])?;
                while let Some(item) = self.iter_next(&it)? {
                    self.tick()?;
                    total = self.binary_op(BinOp::Add, &total, &item)?;
                }
                return Ok(total);
            }
            "enumerate" => {
                arity(name, &args, 1, 2)?;
                let [start] = keywords(name, kwargs, ["start"])?;
                let start = match args.get(1).cloned().or(start) {
                    Some(start) => int_arg(&start)?,
                    None => 0,
                };
                let inner = self.make_iter(&args[0])?;
                return Ok(Value::iterator(IterState::Enumerate { inner, count: start }));
            }
            "next" => {
                arity(name, &args, 1, 2)?;
                keywords(name, kwargs, [])?;
                let it = match &args[0] {
                    Value::Iterator(it) => it.clone(),
                    Value::Instance(_) if self.user_dunder(&args[0], "__next__").is_some() => {
                        return match self.call_method(&args[0], "__next__", smallvec![]) {
                            Err(Flow::Raise(raised))
                                if raised.exception.exc_type == ExcType::StopIteration
                                    && args.len() == 2 =>
                            {
                                Ok(args[1].clone())
                            }
                            other => other,
                        };
                    }
                    other => {
                        return Err(Exc::type_error(format!(
                            "'{}' object is not an iterator",
                            other.type_name()
                        ))
                        .into())
                    }
                };
                return match self.iter_next(&it)? {
                    Some(item) => Ok(item),
                    None => match args.get(1) {
                        Some(default) => Ok(default.clone()),
                        None => Err(Exc::with_args(ExcType::StopIteration, Vec::new()).into()),
                    },
                };
            }
            "getattr" => {
                arity(name, &args, 2, 3)?;
                keywords(name, kwargs, [])?;
                let attr = attr_name(&args[1])?.clone();
                return match self.get_attr(&args[0], &attr) {
                    Err(Flow::Raise(raised))
                        if args.len() == 3
                            && raised.exception.exc_type.is_subclass_of(ExcType::AttributeError) =>
                    {
                        Ok(args[2].clone())
                    }
                    other => other,
                };
            }
            "format" => {
                arity(name, &args, 1, 2)?;
                keywords(name, kwargs, [])?;
                let spec = match args.get(1) {
                    None => String::new(),
                    Some(Value::Str(spec)) => spec.to_string(),
                    Some(other) => {
                        return Err(Exc::type_error(format!(
                            "format() argument 2 must be str, not {}",
                            other.type_name()
                        ))
                        .into())
                    }
                };
                let text = self.format_value(&args[0], &spec)?;
                return Ok(Value::str(&text));
            }
            "input" => {
                arity(name, &args, 0, 1)?;
                keywords(name, kwargs, [])?;
                if let Some(prompt) = args.first() {
                    let prompt = self.str_of(prompt)?;
                    self.write_stdout(&prompt)?;
                }
                return match self.streams.read_line() {
                    Some(mut line) => {
                        if line.ends_with('\n') {
                            line.pop();
                            if line.ends_with('\r') {
                                line.pop();
                            }
                        }
                        Ok(Value::str(&line))
                    }
                    None => Err(Exc::new(ExcType::EOFError, "EOF when reading a line").into()),
                };
            }
            "super" => {
                keywords(name, kwargs, [])?;
                return self.make_super(args);
            }
            "exit" | "quit" => {
                arity(name, &args, 0, 1)?;
                keywords(name, kwargs, [])?;
                return Err(Exc::with_args(ExcType::SystemExit, args.into_vec()).into());
            }
            _ => {}
        }

        keywords(name, kwargs, [])?;
        match name {
            "len" => {
                arity(name, &args, 1, 1)?;
                Ok(Value::Int(self.len_of(&args[0])? as i64))
            }
            "zip" => {
                let inners = args
                    .iter()
                    .map(|arg| self.make_iter(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::iterator(IterState::Zip { inners }))
            }
            "map" => {
                if args.len() < 2 {
                    return Err(Exc::type_error("map() must have at least two arguments.").into());
                }
                let inners = args[1..]
                    .iter()
                    .map(|arg| self.make_iter(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::iterator(IterState::Map {
                    func: args[0].clone(),
                    inners,
                }))
            }
            "filter" => {
                arity(name, &args, 2, 2)?;
                let inner = self.make_iter(&args[1])?;
                Ok(Value::iterator(IterState::Filter {
                    func: args[0].clone(),
                    inner,
                }))
            }
            "iter" => {
                arity(name, &args, 1, 1)?;
                Ok(Value::Iterator(self.make_iter(&args[0])?))
            }
            "reversed" => {
                arity(name, &args, 1, 1)?;
                self.builtin_reversed(&args[0])
            }
            "abs" => {
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Int(i) => Ok(Value::Int(i.checked_abs().ok_or_else(Exc::overflow)?)),
                    Value::Bool(b) => Ok(Value::Int(*b as i64)),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => match self.user_dunder(other, "__abs__") {
                        Some(func) => self.call_function(&func, smallvec![other.clone()], Vec::new()),
                        None => Err(Exc::type_error(format!(
                            "bad operand type for abs(): '{}'",
                            other.type_name()
                        ))
                        .into()),
                    },
                }
            }
            "repr" => {
                arity(name, &args, 1, 1)?;
                Ok(Value::str(&self.repr_of(&args[0])?))
            }
            "ascii" => {
                arity(name, &args, 1, 1)?;
                let text = self.repr_of(&args[0])?;
                Ok(Value::str(&super::eval::ascii_escape(&text)))
            }
            "isinstance" => {
                arity(name, &args, 2, 2)?;
                Ok(Value::Bool(is_instance(&args[0], &args[1])?))
            }
            "issubclass" => {
                arity(name, &args, 2, 2)?;
                Ok(Value::Bool(is_subclass(&args[0], &args[1])?))
            }
            "ord" => {
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Str(s) => {
                        let mut chars = s.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => Ok(Value::Int(c as i64)),
                            _ => Err(Exc::type_error(format!(
                                "ord() expected a character, but string of length {} found",
                                s.chars().count()
                            ))
                            .into()),
                        }
                    }
                    other => Err(Exc::type_error(format!(
                        "ord() expected string of length 1, but {} found",
                        other.type_name()
                    ))
                    .into()),
                }
            }
            "chr" => {
                arity(name, &args, 1, 1)?;
                let code = int_arg(&args[0])?;
                u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                    .ok_or_else(|| Exc::value_error("chr() arg not in range(0x110000)").into())
            }
            "round" => {
                arity(name, &args, 1, 2)?;
                let digits = match args.get(1) {
                    None | Some(Value::None) => None,
                    Some(n) => Some(int_arg(n)?),
                };
                Ok(round_value(&args[0], digits)?)
            }
            "divmod" => {
                arity(name, &args, 2, 2)?;
                let quotient = self.binary_op(BinOp::FloorDiv, &args[0], &args[1])?;
                let remainder = self.binary_op(BinOp::Mod, &args[0], &args[1])?;
                Ok(Value::tuple(vec![quotient, remainder]))
            }
            "pow" => {
                arity(name, &args, 2, 3)?;
                match args.get(2) {
                    None | Some(Value::None) => self.binary_op(BinOp::Pow, &args[0], &args[1]),
                    Some(modulus) => Ok(Value::Int(modular_pow(&args[0], &args[1], modulus)?)),
                }
            }
            "any" | "all" => {
                arity(name, &args, 1, 1)?;
                let want = name == "any";
                let it = self.make_iter(&args[0])?;
                while let Some(item) = self.iter_next(&it)? {
                    self.tick()?;
                    if self.truthy(&item)? == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            "hash" => {
                arity(name, &args, 1, 1)?;
                let key = HashKey::from_value(&args[0])?;
                Ok(Value::Int(self.hash_of(&args[0], &key)))
            }
            "id" => {
                arity(name, &args, 1, 1)?;
                Ok(Value::Int(self.id_of(&args[0])))
            }
            "hex" | "bin" | "oct" => {
                arity(name, &args, 1, 1)?;
                let n = int_arg(&args[0])?;
                let magnitude = n.unsigned_abs();
                let digits = match name {
                    "hex" => format!("0x{magnitude:x}"),
                    "bin" => format!("0b{magnitude:b}"),
                    _ => format!("0o{magnitude:o}"),
                };
                let sign = if n < 0 { "-" } else { "" };
                Ok(Value::str(&format!("{sign}{digits}")))
            }
            "callable" => {
                arity(name, &args, 1, 1)?;
                let callable = match &args[0] {
                    Value::Function(_)
                    | Value::BoundMethod(_)
                    | Value::Builtin(_)
                    | Value::Type(_)
                    | Value::Class(_)
                    | Value::ExcType(_) => true,
                    Value::Instance(_) => self.user_dunder(&args[0], "__call__").is_some(),
                    _ => false,
                };
                Ok(Value::Bool(callable))
            }
            "setattr" => {
                arity(name, &args, 3, 3)?;
                let attr = attr_name(&args[1])?.clone();
                self.set_attr(&args[0], &attr, args[2].clone())?;
                Ok(Value::None)
            }
            "hasattr" => {
                arity(name, &args, 2, 2)?;
                let attr = attr_name(&args[1])?.clone();
                match self.get_attr(&args[0], &attr) {
                    Ok(_) => Ok(Value::Bool(true)),
                    Err(Flow::Raise(raised))
                        if raised.exception.exc_type.is_subclass_of(ExcType::AttributeError) =>
                    {
                        Ok(Value::Bool(false))
                    }
                    Err(flow) => Err(flow),
                }
            }
            "delattr" => {
                arity(name, &args, 2, 2)?;
                let attr = attr_name(&args[1])?.clone();
                self.del_attr(&args[0], &attr)?;
                Ok(Value::None)
            }
            other => Err(Exc::new(
                ExcType::NameError,
                format!("name '{other}' is not defined"),
            )
            .into()),
        }
    }

    fn builtin_print(&mut self, args: Args, kwargs: Kwargs) -> Result<Value, Flow> {
        let [sep, end, file, _flush] = keywords("print", kwargs, ["sep", "end", "file", "flush"])?;
        let sep = self.optional_str("sep", sep)?.unwrap_or_else(|| " ".to_string());
        let end = self.optional_str("end", end)?.unwrap_or_else(|| "\n".to_string());
        let mut line = String::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                line.push_str(&sep);
            }
            line.push_str(&self.str_of(arg)?);
            self.check_len(line.len())?;
        }
        line.push_str(&end);
        match file {
            None | Some(Value::None) | Some(Value::Stream(StreamKind::Stdout)) => {
                self.write_stdout(&line)?
            }
            Some(Value::Stream(StreamKind::Stderr)) => {}
            Some(other) => {
                self.call_method(&other, "write", smallvec![Value::str(&line)])?;
            }
        }
        Ok(Value::None)
    }

    fn optional_str(&mut self, what: &str, value: Option<Value>) -> Result<Option<String>, Flow> {
        match value {
            None | Some(Value::None) => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.to_string())),
            Some(other) => Err(Exc::type_error(format!(
                "{what} must be None or a string, not {}",
                other.type_name()
            ))
            .into()),
        }
    }

    fn builtin_min_max(&mut self, name: &str, args: Args, kwargs: Kwargs) -> Result<Value, Flow> {
        let [key, default] = keywords(name, kwargs, ["key", "default"])?;
        if args.is_empty() {
            return Err(Exc::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            ))
            .into());
        }
        let items = if args.len() == 1 {
            self.collect(&args[0])?
        } else {
            if default.is_some() {
                return Err(Exc::type_error(format!(
                    "Cannot specify a default for {name}() with multiple positional arguments"
                ))
                .into());
            }
            args.into_vec()
        };
        let mut items = items.into_iter();
        let Some(mut best) = items.next() else {
            return default.ok_or_else(|| {
                Exc::value_error(format!("{name}() iterable argument is empty")).into()
            });
        };
        let mut best_key = self.sort_key(key.as_ref(), &best)?;
        for item in items {
            let item_key = self.sort_key(key.as_ref(), &item)?;
            let better = if name == "min" {
                self.lt(&item_key, &best_key)?
            } else {
                self.lt(&best_key, &item_key)?
            };
            if better {
                best = item;
                best_key = item_key;
            }
        }
        Ok(best)
    }

    fn sort_key(&mut self, key: Option<&Value>, item: &Value) -> Result<Value, Flow> {
        match key {
            None | Some(Value::None) => Ok(item.clone()),
            Some(func) => self.call_value(func, smallvec![item.clone()], Vec::new()),
        }
    }

    /// Stable sort by `<`, optionally through a key function.
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> Result<Vec<Value>, Flow> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            keyed.push((self.sort_key(key, &item)?, item));
        }
        let sorted = self.merge_sort(keyed, reverse)?;
        Ok(sorted.into_iter().map(|(_, item)| item).collect())
    }

    fn merge_sort(&mut self, mut items: Vec<(Value, Value)>, reverse: bool) -> Result<Vec<(Value, Value)>, Flow> {
        if items.len() <= 1 {
            return Ok(items);
        }
        let right = items.split_off(items.len() / 2);
        let left = self.merge_sort(items, reverse)?;
        let right = self.merge_sort(right, reverse)?;

        let mut out = Vec::with_capacity(left.len() + right.len());
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        loop {
            let take_right = match (left.peek(), right.peek()) {
                (Some(a), Some(b)) => {
                    self.tick()?;
                    if reverse {
                        self.lt(&a.0, &b.0)?
                    } else {
                        self.lt(&b.0, &a.0)?
                    }
                }
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (None, None) => break,
            };
            let next = if take_right { right.next() } else { left.next() };
            out.extend(next);
        }
        Ok(out)
    }

    fn builtin_reversed(&mut self, value: &Value) -> Result<Value, Flow> {
        let (name, mut items) = match value {
            Value::List(items) => ("list_reverseiterator", items.borrow().clone()),
            Value::Tuple(items) => ("reversed", (**items).clone()),
            Value::Str(s) => ("reversed", s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect()),
            Value::Range(range) => (
                "range_iterator",
                (0..range.len()).filter_map(|i| range.get(i)).map(Value::Int).collect(),
            ),
            Value::Deque(items) => ("_collections._deque_reverse_iterator", items.borrow().iter().cloned().collect()),
            Value::Dict(dict) => ("dict_reversekeyiterator", dict.borrow().keys()),
            Value::Instance(_) if self.user_dunder(value, "__reversed__").is_some() => {
                return self.call_method(value, "__reversed__", smallvec![]);
            }
            other => {
                return Err(Exc::type_error(format!(
                    "'{}' object is not reversible",
                    other.type_name()
                ))
                .into())
            }
        };
        items.reverse();
        Ok(Value::iterator(IterState::Items {
            name,
            items,
            index: 0,
        }))
    }

    /// `len(value)`.
    pub(crate) fn len_of(&mut self, value: &Value) -> Result<usize, Flow> {
        let len = match value {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            Value::Dict(dict) => dict.borrow().len(),
            Value::Set(items) => items.borrow().len(),
            Value::Deque(items) => items.borrow().len(),
            Value::Range(range) => range.len(),
            Value::DictView(view) => view.dict.borrow().len(),
            Value::Instance(_) if self.user_dunder(value, "__len__").is_some() => {
                let result = self.call_method(value, "__len__", smallvec![])?;
                return match result.as_int() {
                    Some(n) if n >= 0 => Ok(n as usize),
                    Some(_) => Err(Exc::value_error("__len__() should return >= 0").into()),
                    None => Err(Exc::type_error(format!(
                        "'{}' object cannot be interpreted as an integer",
                        result.type_name()
                    ))
                    .into()),
                };
            }
            other => {
                return Err(Exc::type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))
                .into())
            }
        };
        Ok(len)
    }

    /// `id(value)`: a stable per-run address.
    pub(crate) fn id_of(&self, value: &Value) -> i64 {
        let id = self.ids.id_of(value);
        if value.ptr().is_some() {
            (0x7f00_0000_0000u64 + id * 0x30) as i64
        } else {
            id as i64
        }
    }

    fn hash_of(&self, value: &Value, key: &HashKey) -> i64 {
        const MODULUS: i64 = (1 << 61) - 1;
        let hash = match key {
            HashKey::None => 0x5f3759df,
            HashKey::Int(i) => {
                let reduced = i.unsigned_abs() % MODULUS as u64;
                if *i < 0 {
                    -(reduced as i64)
                } else {
                    reduced as i64
                }
            }
            HashKey::Identity(_) => self.id_of(value) >> 4,
            other => {
                let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
                for byte in format!("{other:?}").bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(0x0100_0000_01b3);
                }
                (hash >> 2) as i64
            }
        };
        if hash == -1 {
            -2
        } else {
            hash
        }
    }

    /// Calls a built-in type: `int("3")`, `list(range(3))`, ...
    pub(crate) fn construct(&mut self, kind: TypeKind, args: Args, kwargs: Kwargs) -> Result<Value, Flow> {
        let name = kind.name();
        match kind {
            TypeKind::Int => {
                arity(name, &args, 0, 2)?;
                let [base] = keywords(name, kwargs, ["base"])?;
                let base = match args.get(1).cloned().or(base) {
                    Some(base) => Some(int_arg(&base)?),
                    None => None,
                };
                match (args.first(), base) {
                    (None, _) => Ok(Value::Int(0)),
                    (Some(Value::Str(text)), base) => Ok(Value::Int(parse_int(text, base.unwrap_or(10))?)),
                    (Some(_), Some(_)) => {
                        Err(Exc::type_error("int() can't convert non-string with explicit base").into())
                    }
                    (Some(value), None) => self.to_int(value),
                }
            }
            TypeKind::Float => {
                arity(name, &args, 0, 1)?;
                keywords(name, kwargs, [])?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(Value::Str(text)) => Ok(Value::Float(parse_float(text)?)),
                    Some(value) => match value.as_float() {
                        Some(f) => Ok(Value::Float(f)),
                        None => match self.user_dunder(value, "__float__") {
                            Some(func) => self.call_function(&func, smallvec![value.clone()], Vec::new()),
                            None => Err(Exc::type_error(format!(
                                "float() argument must be a string or a real number, not '{}'",
                                value.type_name()
                            ))
                            .into()),
                        },
                    },
                }
            }
            TypeKind::Str => {
                arity(name, &args, 0, 1)?;
                keywords(name, kwargs, [])?;
                match args.first() {
                    None => Ok(Value::str("")),
                    Some(value @ Value::Str(_)) => Ok(value.clone()),
                    Some(value) => Ok(Value::str(&self.str_of(value)?)),
                }
            }
            TypeKind::Bool => {
                arity(name, &args, 0, 1)?;
                keywords(name, kwargs, [])?;
                match args.first() {
                    None => Ok(Value::Bool(false)),
                    Some(value) => Ok(Value::Bool(self.truthy(value)?)),
                }
            }
            TypeKind::List | TypeKind::Tuple | TypeKind::Set | TypeKind::Deque => {
                arity(name, &args, 0, 1)?;
                keywords(name, kwargs, [])?;
                let items = match args.first() {
                    None => Vec::new(),
                    Some(value) => self.collect(value)?,
                };
                Ok(match kind {
                    TypeKind::List => Value::list(items),
                    TypeKind::Tuple => Value::tuple(items),
                    TypeKind::Set => Value::set(self.hash_all(&items)?),
                    _ => Value::deque(VecDeque::from(items)),
                })
            }
            TypeKind::Dict => {
                arity(name, &args, 0, 1)?;
                let mut dict = match args.first() {
                    None => Dict::new(),
                    Some(source) => self.dict_source(source)?,
                };
                dict.missing = Missing::Raise;
                for (key, value) in kwargs {
                    let key = Value::str(&key);
                    dict.insert(HashKey::from_value(&key)?, key, value);
                }
                Ok(Value::dict(dict))
            }
            TypeKind::DefaultDict => {
                let factory = args.first().cloned().unwrap_or(Value::None);
                if !factory.is_none() && !self.is_callable(&factory) {
                    return Err(Exc::type_error("first argument must be callable or None").into());
                }
                let mut dict = match args.get(1) {
                    None => Dict::new(),
                    Some(source) => self.dict_source(source)?,
                };
                dict.missing = Missing::Factory(factory);
                for (key, value) in kwargs {
                    let key = Value::str(&key);
                    dict.insert(HashKey::from_value(&key)?, key, value);
                }
                Ok(Value::dict(dict))
            }
            TypeKind::Counter => {
                arity(name, &args, 0, 1)?;
                let counter = Value::dict(Dict::with_missing(Missing::Counter));
                let mut update = Args::new();
                update.extend(args);
                self.call_native_method(&counter, "update", update, kwargs)?;
                Ok(counter)
            }
            TypeKind::Range => {
                arity(name, &args, 1, 3)?;
                keywords(name, kwargs, [])?;
                let bounds = args.iter().map(int_arg).collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => (0, 0, 1),
                };
                if step == 0 {
                    return Err(Exc::value_error("range() arg 3 must not be zero").into());
                }
                Ok(Value::Range(RangeValue { start, stop, step }))
            }
            TypeKind::Type => {
                keywords(name, kwargs, [])?;
                match args.len() {
                    1 => Ok(type_of(&args[0])),
                    3 => Err(Exc::type_error("type() with three arguments is not supported").into()),
                    _ => Err(Exc::type_error("type() takes 1 or 3 arguments").into()),
                }
            }
            TypeKind::Object => {
                if !args.is_empty() || !kwargs.is_empty() {
                    return Err(Exc::type_error("object() takes no arguments").into());
                }
                let class = Rc::new(Class {
                    name: Rc::from("object"),
                    bases: Vec::new(),
                    exc_base: None,
                    attrs: new_scope(),
                });
                Ok(Value::Instance(Rc::new(Instance {
                    class,
                    attrs: Default::default(),
                })))
            }
            TypeKind::NoneType => {
                arity(name, &args, 0, 0)?;
                Ok(Value::None)
            }
            TypeKind::Function | TypeKind::Module => {
                Err(Exc::type_error(format!("cannot create '{name}' instances")).into())
            }
        }
    }

    fn is_callable(&self, value: &Value) -> bool {
        match value {
            Value::Function(_)
            | Value::BoundMethod(_)
            | Value::Builtin(_)
            | Value::Type(_)
            | Value::Class(_)
            | Value::ExcType(_) => true,
            Value::Instance(_) => self.user_dunder(value, "__call__").is_some(),
            _ => false,
        }
    }

    /// Entries for `dict(source)`: a mapping or an iterable of pairs.
    pub(crate) fn dict_source(&mut self, source: &Value) -> Result<Dict, Flow> {
        if let Value::Dict(dict) = source {
            return Ok(dict.borrow().clone());
        }
        let items = self.collect(source)?;
        let mut pairs = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let pair = match self.collect(item) {
                Ok(pair) => pair,
                Err(Flow::Raise(raised)) if raised.exception.exc_type == ExcType::TypeError => {
                    return Err(Exc::type_error(format!(
                        "cannot convert dictionary update sequence element #{i} to a sequence"
                    ))
                    .into())
                }
                Err(flow) => return Err(flow),
            };
            match <[Value; 2]>::try_from(pair) {
                Ok([key, value]) => pairs.push((key, value)),
                Err(pair) => {
                    return Err(Exc::value_error(format!(
                        "dictionary update sequence element #{i} has length {}; 2 is required",
                        pair.len()
                    ))
                    .into())
                }
            }
        }
        Ok(dict_from_pairs(pairs)?)
    }

    fn to_int(&mut self, value: &Value) -> Result<Value, Flow> {
        match value {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            Value::Float(f) => Ok(Value::Int(float_to_int(f.trunc())?)),
            other => match self.user_dunder(other, "__int__") {
                Some(func) => self.call_function(&func, smallvec![other.clone()], Vec::new()),
                None => Err(Exc::type_error(format!(
                    "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                    other.type_name()
                ))
                .into()),
            },
        }
    }
}

/// `isinstance(value, classinfo)`.
pub(crate) fn is_instance(value: &Value, classinfo: &Value) -> Result<bool, Exc> {
    let matched = match classinfo {
        Value::Tuple(options) => {
            for option in options.iter() {
                if is_instance(value, option)? {
                    return Ok(true);
                }
            }
            false
        }
        Value::Type(kind) => type_matches(value, *kind),
        Value::Class(class) => match value {
            Value::Instance(inst) => inst.class.is_subclass_of(class),
            Value::Exception(exc) => exc.is_instance_of_class(class),
            _ => false,
        },
        Value::ExcType(ty) => match value {
            Value::Exception(exc) => exc.exc_type.is_subclass_of(*ty),
            _ => false,
        },
        _ => {
            return Err(Exc::type_error(
                "isinstance() arg 2 must be a type, a tuple of types, or a union",
            ))
        }
    };
    Ok(matched)
}

fn type_matches(value: &Value, kind: TypeKind) -> bool {
    match kind {
        TypeKind::Object => true,
        TypeKind::Int => matches!(value, Value::Int(_) | Value::Bool(_)),
        TypeKind::Dict => matches!(value, Value::Dict(_)),
        TypeKind::Type => matches!(value, Value::Type(_) | Value::Class(_) | Value::ExcType(_)),
        _ => matches!(type_of(value), Value::Type(k) if k == kind),
    }
}

/// `issubclass(class, classinfo)`.
pub(crate) fn is_subclass(class: &Value, classinfo: &Value) -> Result<bool, Exc> {
    if let Value::Tuple(options) = classinfo {
        for option in options.iter() {
            if is_subclass(class, option)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    let matched = match (class, classinfo) {
        (_, Value::Type(TypeKind::Object)) => {
            matches!(class, Value::Type(_) | Value::Class(_) | Value::ExcType(_))
        }
        (Value::Class(a), Value::Class(b)) => a.is_subclass_of(b),
        (Value::Class(a), Value::ExcType(b)) => a.exc_base.is_some_and(|t| t.is_subclass_of(*b)),
        (Value::ExcType(a), Value::ExcType(b)) => a.is_subclass_of(*b),
        (Value::Type(a), Value::Type(b)) => {
            a == b
                || (*a == TypeKind::Bool && *b == TypeKind::Int)
                || (matches!(a, TypeKind::DefaultDict | TypeKind::Counter) && *b == TypeKind::Dict)
        }
        (Value::Type(_) | Value::Class(_) | Value::ExcType(_), _) => false,
        _ => return Err(Exc::type_error("issubclass() arg 1 must be a class")),
    };
    Ok(matched)
}

pub(crate) fn float_to_int(f: f64) -> Result<i64, Exc> {
    if f.is_nan() {
        return Err(Exc::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Exc::new(
            ExcType::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    if f < -9.223_372_036_854_776e18 || f >= 9.223_372_036_854_776e18 {
        return Err(Exc::overflow());
    }
    Ok(f as i64)
}

/// `round(value, digits)`, rounding half to even.
fn round_value(value: &Value, digits: Option<i64>) -> Result<Value, Exc> {
    match (value, digits) {
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (Value::Int(_) | Value::Bool(_), Some(d)) if d >= 0 => Ok(Value::Int(value.as_int().unwrap_or(0))),
        (Value::Int(_) | Value::Bool(_), Some(d)) => {
            let n = value.as_int().unwrap_or(0);
            if d < -18 {
                return Ok(Value::Int(0));
            }
            let unit = 10i64.pow((-d) as u32);
            let (quotient, remainder) = floor_divmod(n, unit)?;
            let twice = remainder * 2;
            let up = twice > unit || (twice == unit && quotient % 2 != 0);
            let quotient = if up { quotient + 1 } else { quotient };
            Ok(Value::Int(quotient.checked_mul(unit).ok_or_else(Exc::overflow)?))
        }
        (Value::Float(f), None) => Ok(Value::Int(float_to_int(f.round_ties_even())?)),
        (Value::Float(f), Some(d)) => {
            if !f.is_finite() {
                return Ok(Value::Float(*f));
            }
            if d >= 0 {
                let text = format!("{:.*}", d.min(320) as usize, f);
                Ok(Value::Float(text.parse().unwrap_or(*f)))
            } else {
                let unit = 10f64.powi((-d).min(308) as i32);
                Ok(Value::Float((f / unit).round_ties_even() * unit))
            }
        }
        (other, _) => Err(Exc::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

/// Three-argument `pow`, including negative exponents via the modular
/// inverse.
fn modular_pow(base: &Value, exp: &Value, modulus: &Value) -> Result<i64, Exc> {
    let (Some(base), Some(exp), Some(modulus)) = (base.as_int(), exp.as_int(), modulus.as_int()) else {
        return Err(Exc::type_error(
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    if modulus == 0 {
        return Err(Exc::value_error("pow() 3rd argument cannot be 0"));
    }
    let m = (modulus as i128).abs();
    let mut b = (base as i128).rem_euclid(m);
    if exp < 0 {
        b = mod_inverse(b, m)
            .ok_or_else(|| Exc::value_error("base is not invertible for the given modulus"))?;
    }
    let mut e = exp.unsigned_abs();
    let mut result: i128 = 1 % m;
    while e > 0 {
        if e & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        e >>= 1;
    }
    if modulus < 0 && result != 0 {
        result -= m;
    }
    Ok(result as i64)
}

fn mod_inverse(a: i128, m: i128) -> Option<i128> {
    let (mut old_r, mut r) = (a, m);
    let (mut old_s, mut s) = (1i128, 0i128);
    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
    }
    (old_r == 1).then(|| old_s.rem_euclid(m))
}

/// `int(text, base)`.
pub(crate) fn parse_int(text: &str, base: i64) -> Result<i64, Exc> {
    let invalid = || {
        Exc::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            super::value::str_repr(text)
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(Exc::value_error("int() base must be >= 2 and <= 36, or 0"));
    }
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lower = body.to_ascii_lowercase();
    let (radix, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (base, _) => (base as u32, lower.as_str()),
    };
    // An underscore may follow a radix prefix directly.
    let digits = if digits.len() < lower.len() {
        digits.strip_prefix('_').unwrap_or(digits)
    } else {
        digits
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if base == 0 && radix == 10 && cleaned.len() > 1 && cleaned.starts_with('0') && cleaned.chars().any(|c| c != '0') {
        return Err(invalid());
    }
    let magnitude = u64::from_str_radix(&cleaned, radix).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow => Exc::overflow(),
        _ => invalid(),
    })?;
    if negative {
        0i64.checked_sub_unsigned(magnitude).ok_or_else(Exc::overflow)
    } else {
        i64::try_from(magnitude).map_err(|_| Exc::overflow())
    }
}

/// `float(text)`.
pub(crate) fn parse_float(text: &str) -> Result<f64, Exc> {
    let invalid = || {
        Exc::value_error(format!(
            "could not convert string to float: {}",
            super::value::str_repr(text)
        ))
    };
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let unsigned = lower.trim_start_matches(['+', '-']);
    if matches!(unsigned, "inf" | "infinity" | "nan") {
        let negative = lower.starts_with('-');
        let value = if unsigned == "nan" { f64::NAN } else { f64::INFINITY };
        return Ok(if negative { -value } else { value });
    }
    if trimmed.is_empty()
        || lower.contains("__")
        || lower.starts_with('_')
        || lower.ends_with('_')
        || lower.contains("inf")
        || lower.contains("nan")
    {
        return Err(invalid());
    }
    let bytes = lower.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'_' {
            let digit_before = i > 0 && bytes[i - 1].is_ascii_digit();
            let digit_after = bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit());
            if !digit_before || !digit_after {
                return Err(invalid());
            }
        }
    }
    let cleaned: String = lower.chars().filter(|c| *c != '_').collect();
    cleaned.parse::<f64>().map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_parsing_follows_reference_rules() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-1_000", 10).unwrap(), -1000);
        assert_eq!(parse_int("ff", 16).unwrap(), 255);
        assert_eq!(parse_int("0x1F", 0).unwrap(), 31);
        assert_eq!(parse_int("0b101", 2).unwrap(), 5);
        assert!(parse_int("4.5", 10).is_err());
        assert!(parse_int("", 10).is_err());
        assert!(parse_int("1__0", 10).is_err());
        assert!(parse_int("99999999999999999999", 10).is_err());
    }

    #[test]
    fn float_parsing_accepts_special_values() {
        assert_eq!(parse_float("2.5").unwrap(), 2.5);
        assert_eq!(parse_float(" -1e3 ").unwrap(), -1000.0);
        assert!(parse_float("inf").unwrap().is_infinite());
        assert!(parse_float("-Infinity").unwrap() < 0.0);
        assert!(parse_float("nan").unwrap().is_nan());
        assert_eq!(parse_float("1_000.5").unwrap(), 1000.5);
        assert!(parse_float("abc").is_err());
        assert!(parse_float("1._5").is_err());
    }

    #[test]
    fn rounding_is_half_to_even() {
        assert!(matches!(round_value(&Value::Float(2.5), None).unwrap(), Value::Int(2)));
        assert!(matches!(round_value(&Value::Float(3.5), None).unwrap(), Value::Int(4)));
        assert!(matches!(round_value(&Value::Int(1250), Some(-2)).unwrap(), Value::Int(1200)));
        assert!(matches!(round_value(&Value::Int(1350), Some(-2)).unwrap(), Value::Int(1400)));
        match round_value(&Value::Float(2.675), Some(2)).unwrap() {
            Value::Float(f) => assert_eq!(f, 2.67),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn modular_pow_supports_inverse() {
        assert_eq!(modular_pow(&Value::Int(3), &Value::Int(4), &Value::Int(5)).unwrap(), 1);
        assert_eq!(modular_pow(&Value::Int(3), &Value::Int(-1), &Value::Int(7)).unwrap(), 5);
        assert_eq!(modular_pow(&Value::Int(2), &Value::Int(3), &Value::Int(-5)).unwrap(), -2);
        assert!(modular_pow(&Value::Int(2), &Value::Int(-1), &Value::Int(4)).is_err());
    }

    #[test]
    fn builtin_names_resolve() {
        assert!(matches!(lookup("len"), Some(Value::Builtin(_))));
        assert!(matches!(lookup("int"), Some(Value::Type(TypeKind::Int))));
        assert!(matches!(lookup("KeyError"), Some(Value::ExcType(ExcType::KeyError))));
        assert!(lookup("deque").is_none());
        assert!(lookup("undefined_name").is_none());
    }

    #[test]
    fn isinstance_respects_numeric_tower() {
        assert!(is_instance(&Value::Bool(true), &Value::Type(TypeKind::Int)).unwrap());
        assert!(!is_instance(&Value::Int(1), &Value::Type(TypeKind::Bool)).unwrap());
        let either = Value::tuple(vec![Value::Type(TypeKind::Str), Value::Type(TypeKind::Float)]);
        assert!(is_instance(&Value::Float(1.0), &either).unwrap());
        assert!(is_instance(&Value::Int(1), &Value::Int(2)).is_err());
    }
}
