//! Methods of the built-in types.
//!
//! Native methods are looked up by name ([`method_name`]) and bound to their
//! receiver as `Method::Native`; [`Interpreter::call_native_method`]
//! dispatches on the receiver's type when the bound method is called.

use std::cmp::Reverse;
use std::collections::VecDeque;
use std::rc::Rc;

use super::builtins::{arity, int_arg, keywords};
use super::error::{Exc, ExcType, Flow};
use super::state::Interpreter;
use super::value::{
    plain_repr, plain_str, Args, Dict, DictView, HashKey, IterState, Kwargs, Missing, SetItems,
    StreamKind, TypeKind, Value, ViewKind,
};

const OBJECT_METHODS: &[&str] = &["__init__", "__str__", "__repr__"];

const STR_METHODS: &[&str] = &[
    "capitalize", "casefold", "center", "count", "endswith", "find", "format", "index",
    "isalnum", "isalpha", "isdecimal", "isdigit", "islower", "isnumeric", "isspace", "isupper",
    "join", "ljust", "lower", "lstrip", "partition", "removeprefix", "removesuffix", "replace",
    "rfind", "rindex", "rjust", "rpartition", "rsplit", "rstrip", "split", "splitlines",
    "startswith", "strip", "swapcase", "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "fromkeys", "get", "items", "keys", "pop", "popitem", "setdefault", "update",
    "values",
];

const COUNTER_METHODS: &[&str] = &["elements", "most_common", "subtract", "total"];

const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "difference_update", "discard", "intersection",
    "intersection_update", "isdisjoint", "issubset", "issuperset", "pop", "remove",
    "symmetric_difference", "union", "update",
];

const DEQUE_METHODS: &[&str] = &[
    "append", "appendleft", "clear", "copy", "count", "extend", "extendleft", "index", "insert",
    "pop", "popleft", "remove", "reverse", "rotate",
];

const STDIN_METHODS: &[&str] = &["read", "readline", "readlines"];
const STDOUT_METHODS: &[&str] = &["flush", "write"];

fn find(table: &'static [&'static str], name: &str) -> Option<&'static str> {
    table.iter().copied().find(|m| *m == name)
}

/// Methods every object has.
pub fn object_method(name: &str) -> Option<&'static str> {
    find(OBJECT_METHODS, name)
}

/// The native method `name` of a built-in value, if it has one.
pub fn method_name(value: &Value, name: &str) -> Option<&'static str> {
    match value {
        Value::Str(_) => find(STR_METHODS, name),
        Value::List(_) => find(LIST_METHODS, name),
        Value::Tuple(_) => find(TUPLE_METHODS, name),
        Value::Dict(dict) => {
            let kind = dict.borrow().kind();
            find(DICT_METHODS, name).or_else(|| match kind {
                TypeKind::Counter => find(COUNTER_METHODS, name),
                _ => None,
            })
        }
        Value::Set(_) => find(SET_METHODS, name),
        Value::Deque(_) => find(DEQUE_METHODS, name),
        Value::Stream(StreamKind::Stdin) => find(STDIN_METHODS, name),
        Value::Stream(_) => find(STDOUT_METHODS, name),
        Value::Int(_) | Value::Bool(_) => find(&["bit_length"], name),
        Value::Float(_) => find(&["is_integer"], name),
        _ => None,
    }
    .or_else(|| object_method(name))
}

/// `kind.name` looked up on the type itself (`str.upper`, `dict.fromkeys`).
pub fn type_method(kind: TypeKind, name: &str) -> Option<&'static str> {
    let table: &'static [&'static str] = match kind {
        TypeKind::Str => STR_METHODS,
        TypeKind::List => LIST_METHODS,
        TypeKind::Tuple => TUPLE_METHODS,
        TypeKind::Dict | TypeKind::DefaultDict => DICT_METHODS,
        TypeKind::Counter => return find(DICT_METHODS, name).or_else(|| find(COUNTER_METHODS, name)),
        TypeKind::Set => SET_METHODS,
        TypeKind::Deque => DEQUE_METHODS,
        _ => return None,
    };
    find(table, name)
}

/// Resolves a possibly negative position against `len`, clamping like
/// slicing does.
fn clamp_position(len: usize, position: Option<i64>, default: usize) -> usize {
    match position {
        None => default,
        Some(p) if p < 0 => (len as i64 + p).max(0) as usize,
        Some(p) => (p as usize).min(len),
    }
}

fn optional_int(args: &Args, index: usize) -> Result<Option<i64>, Exc> {
    match args.get(index) {
        None | Some(Value::None) => Ok(None),
        Some(value) => int_arg(value).map(Some),
    }
}

fn str_argument<'a>(method: &str, value: &'a Value) -> Result<&'a str, Exc> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(Exc::type_error(format!(
            "{method}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

/// The chars of `text` between char positions `start` and `end`.
fn char_window(text: &str, start: usize, end: usize) -> (usize, &str) {
    let mut indices = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len()));
    let begin = indices.clone().nth(start).unwrap_or(text.len());
    let finish = indices.nth(end).unwrap_or(text.len());
    (begin, &text[begin..finish.max(begin)])
}

fn char_offset(text: &str, byte: usize) -> i64 {
    text[..byte].chars().count() as i64
}

fn pad(text: &str, width: i64, fill: char, align: char) -> String {
    let len = text.chars().count() as i64;
    if width <= len {
        return text.to_string();
    }
    let margin = (width - len) as usize;
    let (left, right) = match align {
        '<' => (0, margin),
        '>' => (margin, 0),
        _ => {
            let left = margin / 2 + (margin & width as usize & 1);
            (left, margin - left)
        }
    };
    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    format!("{}{text}{}", fill_str(left), fill_str(right))
}

fn fill_char(args: &Args, index: usize) -> Result<char, Exc> {
    match args.get(index) {
        None => Ok(' '),
        Some(Value::Str(s)) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(Exc::type_error(
                    "The fill character must be exactly one character long",
                )),
            }
        }
        Some(other) => Err(Exc::type_error(format!(
            "The fill character must be a unicode character, not {}",
            other.type_name()
        ))),
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_cased = false;
    for c in text.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn whitespace_split(text: &str, maxsplit: i64, from_right: bool) -> Vec<Value> {
    let mut parts = Vec::new();
    if from_right {
        let mut rest = text.trim_end();
        while !rest.is_empty() {
            if maxsplit >= 0 && parts.len() as i64 == maxsplit {
                parts.push(Value::str(rest));
                break;
            }
            match rest.rfind(char::is_whitespace) {
                Some(i) => {
                    let ws_len = rest[i..].chars().next().map_or(1, char::len_utf8);
                    parts.push(Value::str(&rest[i + ws_len..]));
                    rest = rest[..i].trim_end();
                }
                None => {
                    parts.push(Value::str(rest));
                    break;
                }
            }
        }
        parts.reverse();
    } else {
        let mut rest = text.trim_start();
        while !rest.is_empty() {
            if maxsplit >= 0 && parts.len() as i64 == maxsplit {
                parts.push(Value::str(rest));
                break;
            }
            match rest.find(char::is_whitespace) {
                Some(i) => {
                    parts.push(Value::str(&rest[..i]));
                    rest = rest[i..].trim_start();
                }
                None => {
                    parts.push(Value::str(rest));
                    break;
                }
            }
        }
    }
    parts
}

fn is_cased_with(text: &str, upper: bool) -> bool {
    let mut cased = false;
    for c in text.chars() {
        if c.is_uppercase() {
            if !upper {
                return false;
            }
            cased = true;
        } else if c.is_lowercase() {
            if upper {
                return false;
            }
            cased = true;
        }
    }
    cased
}

impl<'h> Interpreter<'h> {
    /// Calls the native method `name` on `receiver`.
    pub(crate) fn call_native_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Args,
        kwargs: Kwargs,
    ) -> Result<Value, Flow> {
        if let Some(method) = object_method(name) {
            return self.object_dunder(receiver, method, args);
        }
        let type_name = receiver.type_name();
        let qualified = format!("{type_name}.{name}");
        match receiver {
            Value::Str(s) => {
                if name == "format" {
                    let text = self.str_format(s, &args, &kwargs)?;
                    self.check_len(text.len())?;
                    return Ok(Value::str(&text));
                }
                let [sep, maxsplit] = match name {
                    "split" | "rsplit" => keywords(&qualified, kwargs, ["sep", "maxsplit"])?,
                    _ => {
                        keywords(&qualified, kwargs, [])?;
                        [None, None]
                    }
                };
                self.str_method(s, name, args, sep, maxsplit)
            }
            Value::List(items) => {
                if name == "sort" {
                    arity(&qualified, &args, 0, 0)?;
                    let [key, reverse] = keywords(&qualified, kwargs, ["key", "reverse"])?;
                    let reverse = match reverse {
                        Some(flag) => self.truthy(&flag)?,
                        None => false,
                    };
                    let original = std::mem::take(&mut *items.borrow_mut());
                    match self.sort_values(original.clone(), key.as_ref(), reverse) {
                        Ok(sorted) => {
                            *items.borrow_mut() = sorted;
                            return Ok(Value::None);
                        }
                        Err(flow) => {
                            *items.borrow_mut() = original;
                            return Err(flow);
                        }
                    }
                }
                keywords(&qualified, kwargs, [])?;
                self.list_method(receiver, items, name, args)
            }
            Value::Tuple(items) => {
                keywords(&qualified, kwargs, [])?;
                self.sequence_search(&qualified, items, name, &args, "tuple")
            }
            Value::Dict(dict) => {
                if matches!(name, "update" | "subtract") {
                    arity(&qualified, &args, 0, 1)?;
                    return self.dict_update(dict, name, args.first(), kwargs);
                }
                keywords(&qualified, kwargs, [])?;
                self.dict_method(receiver, dict, name, args)
            }
            Value::Set(items) => {
                keywords(&qualified, kwargs, [])?;
                self.set_method(items, name, args)
            }
            Value::Deque(items) => {
                keywords(&qualified, kwargs, [])?;
                self.deque_method(items, name, args)
            }
            Value::Stream(kind) => {
                keywords(&qualified, kwargs, [])?;
                self.stream_method(*kind, name, args)
            }
            Value::Int(_) | Value::Bool(_) if name == "bit_length" => {
                arity(&qualified, &args, 0, 0)?;
                let n = receiver.as_int().unwrap_or(0);
                Ok(Value::Int(64 - n.unsigned_abs().leading_zeros() as i64))
            }
            Value::Float(f) if name == "is_integer" => {
                arity(&qualified, &args, 0, 0)?;
                Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
            }
            other => Err(super::call::no_attribute(other, name).into()),
        }
    }

    /// `object.__init__`, `object.__str__` and `object.__repr__`.
    fn object_dunder(&mut self, receiver: &Value, name: &str, args: Args) -> Result<Value, Flow> {
        match name {
            "__init__" => {
                match receiver {
                    Value::Exception(exc) => *exc.args.borrow_mut() = args.into_vec(),
                    Value::Instance(inst) if !args.is_empty() => {
                        return Err(Exc::type_error(format!(
                            "{}.__init__() takes exactly one argument (the instance to initialize)",
                            inst.class.name
                        ))
                        .into())
                    }
                    _ => {}
                }
                Ok(Value::None)
            }
            "__str__" => Ok(Value::str(&plain_str(receiver, &self.ids))),
            _ => Ok(Value::str(&plain_repr(receiver, &self.ids))),
        }
    }

    fn str_method(
        &mut self,
        s: &Rc<str>,
        name: &str,
        args: Args,
        sep: Option<Value>,
        maxsplit: Option<Value>,
    ) -> Result<Value, Flow> {
        let qualified = format!("str.{name}");
        let text: &str = s;
        let value = match name {
            "lower" | "casefold" => Value::str(&text.to_lowercase()),
            "upper" => Value::str(&text.to_uppercase()),
            "swapcase" => Value::str(
                &text
                    .chars()
                    .flat_map(|c| -> Box<dyn Iterator<Item = char>> {
                        if c.is_uppercase() {
                            Box::new(c.to_lowercase())
                        } else {
                            Box::new(c.to_uppercase())
                        }
                    })
                    .collect::<String>(),
            ),
            "capitalize" => {
                let mut chars = text.chars();
                let out = match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                    None => String::new(),
                };
                Value::str(&out)
            }
            "title" => Value::str(&title_case(text)),
            "isdigit" | "isdecimal" => {
                Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))
            }
            "isnumeric" => Value::Bool(!text.is_empty() && text.chars().all(char::is_numeric)),
            "isalpha" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic)),
            "isalnum" => Value::Bool(!text.is_empty() && text.chars().all(char::is_alphanumeric)),
            "isspace" => Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace)),
            "islower" => Value::Bool(is_cased_with(text, false)),
            "isupper" => Value::Bool(is_cased_with(text, true)),
            "strip" | "lstrip" | "rstrip" => {
                arity(&qualified, &args, 0, 1)?;
                let chars: Option<Vec<char>> = match args.first() {
                    None | Some(Value::None) => None,
                    Some(value) => Some(str_argument(&qualified, value)?.chars().collect()),
                };
                let matches = |c: char| match &chars {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace(),
                };
                let out = match name {
                    "strip" => text.trim_matches(matches),
                    "lstrip" => text.trim_start_matches(matches),
                    _ => text.trim_end_matches(matches),
                };
                Value::str(out)
            }
            "split" | "rsplit" => {
                let sep = args.first().cloned().or(sep).unwrap_or(Value::None);
                let maxsplit = match args.get(1).cloned().or(maxsplit) {
                    Some(n) => int_arg(&n)?,
                    None => -1,
                };
                let parts = match &sep {
                    Value::None => whitespace_split(text, maxsplit, name == "rsplit"),
                    other => {
                        let sep = str_argument(&qualified, other)?;
                        if sep.is_empty() {
                            return Err(Exc::value_error("empty separator").into());
                        }
                        let mut parts: Vec<Value> = match (maxsplit < 0, name == "rsplit") {
                            (true, _) => text.split(sep).map(Value::str).collect(),
                            (false, false) => text.splitn(maxsplit as usize + 1, sep).map(Value::str).collect(),
                            (false, true) => text.rsplitn(maxsplit as usize + 1, sep).map(Value::str).collect(),
                        };
                        if maxsplit >= 0 && name == "rsplit" {
                            parts.reverse();
                        }
                        parts
                    }
                };
                self.check_len(parts.len())?;
                Value::list(parts)
            }
            "splitlines" => {
                arity(&qualified, &args, 0, 1)?;
                let keep = match args.first() {
                    Some(flag) => self.truthy(flag)?,
                    None => false,
                };
                let mut lines = Vec::new();
                let mut rest = text;
                while !rest.is_empty() {
                    let (line, ending) = match rest.find(['\n', '\r']) {
                        Some(i) if rest[i..].starts_with("\r\n") => (&rest[..i], 2),
                        Some(i) => (&rest[..i], 1),
                        None => (rest, 0),
                    };
                    let consumed = line.len() + ending;
                    lines.push(Value::str(if keep { &rest[..consumed] } else { line }));
                    rest = &rest[consumed..];
                }
                Value::list(lines)
            }
            "join" => {
                arity(&qualified, &args, 1, 1)?;
                let items = self.collect(&args[0])?;
                let mut out = String::new();
                for (i, item) in items.iter().enumerate() {
                    let Value::Str(part) = item else {
                        return Err(Exc::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            item.type_name()
                        ))
                        .into());
                    };
                    if i > 0 {
                        out.push_str(text);
                    }
                    out.push_str(part);
                    self.check_len(out.len())?;
                }
                Value::str(&out)
            }
            "replace" => {
                arity(&qualified, &args, 2, 3)?;
                let old = str_argument(&qualified, &args[0])?;
                let new = str_argument(&qualified, &args[1])?;
                let count = optional_int(&args, 2)?.unwrap_or(-1);
                let out = if count < 0 {
                    text.replace(old, new)
                } else {
                    text.replacen(old, new, count as usize)
                };
                self.check_len(out.len())?;
                Value::str(&out)
            }
            "find" | "rfind" | "index" | "rindex" | "count" => {
                arity(&qualified, &args, 1, 3)?;
                let needle = str_argument(&qualified, &args[0])?;
                let len = text.chars().count();
                let start = clamp_position(len, optional_int(&args, 1)?, 0);
                let end = clamp_position(len, optional_int(&args, 2)?, len);
                if start > end {
                    return match name {
                        "count" => Ok(Value::Int(0)),
                        "find" | "rfind" => Ok(Value::Int(-1)),
                        _ => Err(Exc::value_error("substring not found").into()),
                    };
                }
                let (offset, window) = char_window(text, start, end);
                if name == "count" {
                    let count = if needle.is_empty() {
                        window.chars().count() + 1
                    } else {
                        window.matches(needle).count()
                    };
                    return Ok(Value::Int(count as i64));
                }
                let found = if name.starts_with('r') {
                    window.rfind(needle)
                } else {
                    window.find(needle)
                };
                match found {
                    Some(byte) => Value::Int(char_offset(text, offset + byte)),
                    None if name.ends_with("find") => Value::Int(-1),
                    None => return Err(Exc::value_error("substring not found").into()),
                }
            }
            "startswith" | "endswith" => {
                arity(&qualified, &args, 1, 3)?;
                let len = text.chars().count();
                let start = clamp_position(len, optional_int(&args, 1)?, 0);
                let end = clamp_position(len, optional_int(&args, 2)?, len);
                let (_, window) = char_window(text, start, end.max(start));
                let candidates = match &args[0] {
                    Value::Tuple(items) => items.iter().cloned().collect(),
                    other => vec![other.clone()],
                };
                let mut hit = false;
                for candidate in &candidates {
                    let Value::Str(affix) = candidate else {
                        return Err(Exc::type_error(format!(
                            "{name} first arg must be str or a tuple of str, not {}",
                            candidate.type_name()
                        ))
                        .into());
                    };
                    hit |= if name == "startswith" {
                        window.starts_with(&**affix)
                    } else {
                        window.ends_with(&**affix)
                    };
                }
                Value::Bool(hit)
            }
            "center" | "ljust" | "rjust" => {
                arity(&qualified, &args, 1, 2)?;
                let width = int_arg(&args[0])?;
                let fill = fill_char(&args, 1)?;
                let align = match name {
                    "ljust" => '<',
                    "rjust" => '>',
                    _ => '^',
                };
                self.check_len(width.max(0) as usize)?;
                Value::str(&pad(text, width, fill, align))
            }
            "zfill" => {
                arity(&qualified, &args, 1, 1)?;
                let width = int_arg(&args[0])?;
                self.check_len(width.max(0) as usize)?;
                let len = text.chars().count() as i64;
                if width <= len {
                    Value::Str(s.clone())
                } else {
                    let zeros = "0".repeat((width - len) as usize);
                    let out = match text.chars().next() {
                        Some(sign @ ('+' | '-')) => format!("{sign}{zeros}{}", &text[1..]),
                        _ => format!("{zeros}{text}"),
                    };
                    Value::str(&out)
                }
            }
            "partition" | "rpartition" => {
                arity(&qualified, &args, 1, 1)?;
                let sep = str_argument(&qualified, &args[0])?;
                if sep.is_empty() {
                    return Err(Exc::value_error("empty separator").into());
                }
                let found = if name == "partition" {
                    text.find(sep)
                } else {
                    text.rfind(sep)
                };
                let parts = match found {
                    Some(i) => [&text[..i], sep, &text[i + sep.len()..]],
                    None if name == "partition" => [text, "", ""],
                    None => ["", "", text],
                };
                Value::tuple(parts.iter().map(|p| Value::str(p)).collect())
            }
            "removeprefix" | "removesuffix" => {
                arity(&qualified, &args, 1, 1)?;
                let affix = str_argument(&qualified, &args[0])?;
                let out = if name == "removeprefix" {
                    text.strip_prefix(affix)
                } else {
                    text.strip_suffix(affix)
                };
                Value::str(out.unwrap_or(text))
            }
            other => return Err(super::call::no_attribute(&Value::Str(s.clone()), other).into()),
        };
        Ok(value)
    }

    fn list_method(
        &mut self,
        receiver: &Value,
        items: &Rc<std::cell::RefCell<Vec<Value>>>,
        name: &str,
        args: Args,
    ) -> Result<Value, Flow> {
        let qualified = format!("list.{name}");
        match name {
            "append" => {
                arity(&qualified, &args, 1, 1)?;
                let len = items.borrow().len();
                self.check_len(len + 1)?;
                items.borrow_mut().push(args[0].clone());
                Ok(Value::None)
            }
            "extend" => {
                arity(&qualified, &args, 1, 1)?;
                let extra = self.collect(&args[0])?;
                let len = items.borrow().len();
                self.check_len(len + extra.len())?;
                items.borrow_mut().extend(extra);
                Ok(Value::None)
            }
            "insert" => {
                arity(&qualified, &args, 2, 2)?;
                let len = items.borrow().len();
                self.check_len(len + 1)?;
                let at = clamp_position(len, Some(int_arg(&args[0])?), len);
                items.borrow_mut().insert(at, args[1].clone());
                Ok(Value::None)
            }
            "pop" => {
                arity(&qualified, &args, 0, 1)?;
                let len = items.borrow().len();
                if len == 0 {
                    return Err(Exc::index_error("pop from empty list").into());
                }
                let at = optional_int(&args, 0)?.unwrap_or(-1);
                let at = if at < 0 { at + len as i64 } else { at };
                if at < 0 || at >= len as i64 {
                    return Err(Exc::index_error("pop index out of range").into());
                }
                Ok(items.borrow_mut().remove(at as usize))
            }
            "remove" => {
                arity(&qualified, &args, 1, 1)?;
                match self.position_in(items, &args[0])? {
                    Some(at) => {
                        items.borrow_mut().remove(at);
                        Ok(Value::None)
                    }
                    None => Err(Exc::value_error("list.remove(x): x not in list").into()),
                }
            }
            "index" | "count" => {
                let snapshot = Rc::new(items.borrow().clone());
                self.sequence_search(&qualified, &snapshot, name, &args, "list")
            }
            "clear" => {
                arity(&qualified, &args, 0, 0)?;
                items.borrow_mut().clear();
                Ok(Value::None)
            }
            "copy" => {
                arity(&qualified, &args, 0, 0)?;
                Ok(Value::list(items.borrow().clone()))
            }
            "reverse" => {
                arity(&qualified, &args, 0, 0)?;
                items.borrow_mut().reverse();
                Ok(Value::None)
            }
            other => Err(super::call::no_attribute(receiver, other).into()),
        }
    }

    /// Index of the first element equal to `needle`, comparing against a
    /// fresh snapshot so user `__eq__` may mutate the list.
    fn position_in(&mut self, items: &Rc<std::cell::RefCell<Vec<Value>>>, needle: &Value) -> Result<Option<usize>, Flow> {
        let snapshot = items.borrow().clone();
        for (i, item) in snapshot.iter().enumerate() {
            if item.is_same(needle) || self.eq_values(item, needle)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// `index`/`count` shared by lists and tuples.
    fn sequence_search(
        &mut self,
        qualified: &str,
        items: &Rc<Vec<Value>>,
        name: &str,
        args: &Args,
        kind: &str,
    ) -> Result<Value, Flow> {
        match name {
            "count" => {
                arity(qualified, args, 1, 1)?;
                let mut count = 0;
                for item in items.iter() {
                    if item.is_same(&args[0]) || self.eq_values(item, &args[0])? {
                        count += 1;
                    }
                }
                Ok(Value::Int(count))
            }
            "index" => {
                arity(qualified, args, 1, 3)?;
                let len = items.len();
                let start = clamp_position(len, optional_int(args, 1)?, 0);
                let end = clamp_position(len, optional_int(args, 2)?, len);
                for i in start..end.max(start) {
                    if items[i].is_same(&args[0]) || self.eq_values(&items[i], &args[0])? {
                        return Ok(Value::Int(i as i64));
                    }
                }
                let message = if kind == "list" {
                    format!("{} is not in list", self.repr_of(&args[0])?)
                } else {
                    "tuple.index(x): x not in tuple".to_string()
                };
                Err(Exc::value_error(message).into())
            }
            other => Err(Exc::new(
                ExcType::AttributeError,
                format!("'{kind}' object has no attribute '{other}'"),
            )
            .into()),
        }
    }

    fn dict_method(
        &mut self,
        receiver: &Value,
        dict: &Rc<std::cell::RefCell<Dict>>,
        name: &str,
        args: Args,
    ) -> Result<Value, Flow> {
        let qualified = format!("dict.{name}");
        match name {
            "get" => {
                arity(&qualified, &args, 1, 2)?;
                let hash = HashKey::from_value(&args[0])?;
                let found = dict.borrow().get(&hash);
                Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
            }
            "keys" | "values" | "items" => {
                arity(&qualified, &args, 0, 0)?;
                let kind = match name {
                    "keys" => ViewKind::Keys,
                    "values" => ViewKind::Values,
                    _ => ViewKind::Items,
                };
                Ok(Value::DictView(Rc::new(DictView {
                    dict: dict.clone(),
                    kind,
                })))
            }
            "pop" => {
                arity(&qualified, &args, 1, 2)?;
                let hash = HashKey::from_value(&args[0])?;
                let removed = dict.borrow_mut().remove(&hash);
                match (removed, args.get(1)) {
                    (Some((_, value)), _) => Ok(value),
                    (None, Some(default)) => Ok(default.clone()),
                    (None, None) => Err(Exc::key_error(args[0].clone()).into()),
                }
            }
            "popitem" => {
                arity(&qualified, &args, 0, 0)?;
                let last = dict.borrow_mut().entries.pop();
                match last {
                    Some((_, (key, value))) => Ok(Value::tuple(vec![key, value])),
                    None => Err(Exc::new(ExcType::KeyError, "popitem(): dictionary is empty").into()),
                }
            }
            "setdefault" => {
                arity(&qualified, &args, 1, 2)?;
                let hash = HashKey::from_value(&args[0])?;
                let existing = dict.borrow().get(&hash);
                if let Some(existing) = existing {
                    return Ok(existing);
                }
                let default = args.get(1).cloned().unwrap_or(Value::None);
                let len = dict.borrow().len();
                self.check_len(len + 1)?;
                dict.borrow_mut().insert(hash, args[0].clone(), default.clone());
                Ok(default)
            }
            "clear" => {
                arity(&qualified, &args, 0, 0)?;
                dict.borrow_mut().entries.clear();
                Ok(Value::None)
            }
            "copy" => {
                arity(&qualified, &args, 0, 0)?;
                Ok(Value::dict(dict.borrow().clone()))
            }
            "fromkeys" => {
                arity(&qualified, &args, 1, 2)?;
                let keys = self.collect(&args[0])?;
                let value = args.get(1).cloned().unwrap_or(Value::None);
                let mut result = Dict::new();
                for key in keys {
                    result.insert(HashKey::from_value(&key)?, key, value.clone());
                }
                Ok(Value::dict(result))
            }
            "most_common" => {
                arity("Counter.most_common", &args, 0, 1)?;
                let mut pairs = dict.borrow().items();
                pairs.sort_by_key(|(_, count)| Reverse(count.as_int().unwrap_or(0)));
                if let Some(n) = optional_int(&args, 0)? {
                    pairs.truncate(n.max(0) as usize);
                }
                Ok(Value::list(
                    pairs.into_iter().map(|(k, v)| Value::tuple(vec![k, v])).collect(),
                ))
            }
            "total" => {
                arity("Counter.total", &args, 0, 0)?;
                let counts = dict.borrow().values();
                let mut total = Value::Int(0);
                for count in counts {
                    total = self.binary_op(hurdle_lang::ast::BinOp::Add, &total, &count)?;
                }
                Ok(total)
            }
            "elements" => {
                arity("Counter.elements", &args, 0, 0)?;
                let mut items = Vec::new();
                for (key, count) in dict.borrow().items() {
                    let count = count.as_int().unwrap_or(0).max(0) as usize;
                    self.check_len(items.len() + count)?;
                    items.extend(std::iter::repeat(key).take(count));
                }
                Ok(Value::iterator(IterState::Items {
                    name: "itertools.chain",
                    items,
                    index: 0,
                }))
            }
            other => Err(super::call::no_attribute(receiver, other).into()),
        }
    }

    /// `dict.update`, `Counter.update` and `Counter.subtract`.
    fn dict_update(
        &mut self,
        dict: &Rc<std::cell::RefCell<Dict>>,
        name: &str,
        source: Option<&Value>,
        kwargs: Kwargs,
    ) -> Result<Value, Flow> {
        let counting = matches!(dict.borrow().missing, Missing::Counter);
        if name == "subtract" && !counting {
            return Err(super::call::no_attribute(&Value::Dict(dict.clone()), name).into());
        }
        let mut pairs: Vec<(Value, Value)> = Vec::new();
        match source {
            None => {}
            Some(Value::Dict(other)) => pairs.extend(other.borrow().items()),
            Some(iterable) if counting => {
                for item in self.collect(iterable)? {
                    pairs.push((item, Value::Int(1)));
                }
            }
            Some(iterable) => pairs.extend(self.dict_source(iterable)?.items()),
        }
        pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::str(&k), v)));

        for (key, value) in pairs {
            let hash = HashKey::from_value(&key)?;
            let value = if counting {
                let current = dict.borrow().get(&hash).unwrap_or(Value::Int(0));
                let op = if name == "subtract" {
                    hurdle_lang::ast::BinOp::Sub
                } else {
                    hurdle_lang::ast::BinOp::Add
                };
                self.binary_op(op, &current, &value)?
            } else {
                value
            };
            let len = dict.borrow().len();
            self.check_len(len + 1)?;
            dict.borrow_mut().insert(hash, key, value);
        }
        Ok(Value::None)
    }

    fn set_method(
        &mut self,
        items: &Rc<std::cell::RefCell<SetItems>>,
        name: &str,
        args: Args,
    ) -> Result<Value, Flow> {
        let qualified = format!("set.{name}");
        match name {
            "add" => {
                arity(&qualified, &args, 1, 1)?;
                let hash = HashKey::from_value(&args[0])?;
                let len = items.borrow().len();
                self.check_len(len + 1)?;
                items.borrow_mut().entry(hash).or_insert_with(|| args[0].clone());
                Ok(Value::None)
            }
            "remove" | "discard" => {
                arity(&qualified, &args, 1, 1)?;
                let hash = HashKey::from_value(&args[0])?;
                let removed = items.borrow_mut().shift_remove(&hash);
                if removed.is_none() && name == "remove" {
                    return Err(Exc::key_error(args[0].clone()).into());
                }
                Ok(Value::None)
            }
            "pop" => {
                arity(&qualified, &args, 0, 0)?;
                let first = items.borrow_mut().shift_remove_index(0);
                first
                    .map(|(_, value)| value)
                    .ok_or_else(|| Exc::new(ExcType::KeyError, "pop from an empty set").into())
            }
            "clear" => {
                arity(&qualified, &args, 0, 0)?;
                items.borrow_mut().clear();
                Ok(Value::None)
            }
            "copy" => {
                arity(&qualified, &args, 0, 0)?;
                Ok(Value::set(items.borrow().clone()))
            }
            "union" | "intersection" | "difference" | "symmetric_difference" | "update"
            | "intersection_update" | "difference_update" => {
                if name == "symmetric_difference" {
                    arity(&qualified, &args, 1, 1)?;
                }
                let mut result = items.borrow().clone();
                for other in args.iter() {
                    let other = self.collect(other)?;
                    let other = self.hash_all(&other)?;
                    result = match name {
                        "union" | "update" => {
                            for (hash, value) in other {
                                result.entry(hash).or_insert(value);
                            }
                            result
                        }
                        "intersection" | "intersection_update" => {
                            result.retain(|hash, _| other.contains_key(hash));
                            result
                        }
                        "difference" | "difference_update" => {
                            result.retain(|hash, _| !other.contains_key(hash));
                            result
                        }
                        _ => {
                            let mut merged: SetItems = result
                                .iter()
                                .filter(|(hash, _)| !other.contains_key(*hash))
                                .map(|(h, v)| (h.clone(), v.clone()))
                                .collect();
                            for (hash, value) in other {
                                if !result.contains_key(&hash) {
                                    merged.insert(hash, value);
                                }
                            }
                            merged
                        }
                    };
                }
                self.check_len(result.len())?;
                if name.ends_with("update") {
                    *items.borrow_mut() = result;
                    Ok(Value::None)
                } else {
                    Ok(Value::set(result))
                }
            }
            "issubset" | "issuperset" | "isdisjoint" => {
                arity(&qualified, &args, 1, 1)?;
                let other = self.collect(&args[0])?;
                let other = self.hash_all(&other)?;
                let own = items.borrow();
                let verdict = match name {
                    "issubset" => own.keys().all(|hash| other.contains_key(hash)),
                    "issuperset" => other.keys().all(|hash| own.contains_key(hash)),
                    _ => own.keys().all(|hash| !other.contains_key(hash)),
                };
                Ok(Value::Bool(verdict))
            }
            other => Err(super::call::no_attribute(&Value::Set(items.clone()), other).into()),
        }
    }

    fn deque_method(
        &mut self,
        items: &Rc<std::cell::RefCell<VecDeque<Value>>>,
        name: &str,
        args: Args,
    ) -> Result<Value, Flow> {
        let qualified = format!("deque.{name}");
        match name {
            "append" | "appendleft" => {
                arity(&qualified, &args, 1, 1)?;
                let len = items.borrow().len();
                self.check_len(len + 1)?;
                let mut items = items.borrow_mut();
                if name == "append" {
                    items.push_back(args[0].clone());
                } else {
                    items.push_front(args[0].clone());
                }
                Ok(Value::None)
            }
            "extend" | "extendleft" => {
                arity(&qualified, &args, 1, 1)?;
                let extra = self.collect(&args[0])?;
                let len = items.borrow().len();
                self.check_len(len + extra.len())?;
                let mut items = items.borrow_mut();
                for item in extra {
                    if name == "extend" {
                        items.push_back(item);
                    } else {
                        items.push_front(item);
                    }
                }
                Ok(Value::None)
            }
            "pop" | "popleft" => {
                arity(&qualified, &args, 0, 0)?;
                let popped = if name == "pop" {
                    items.borrow_mut().pop_back()
                } else {
                    items.borrow_mut().pop_front()
                };
                popped.ok_or_else(|| Exc::index_error("pop from an empty deque").into())
            }
            "insert" => {
                arity(&qualified, &args, 2, 2)?;
                let len = items.borrow().len();
                self.check_len(len + 1)?;
                let at = clamp_position(len, Some(int_arg(&args[0])?), len);
                items.borrow_mut().insert(at, args[1].clone());
                Ok(Value::None)
            }
            "remove" => {
                arity(&qualified, &args, 1, 1)?;
                let snapshot: Vec<Value> = items.borrow().iter().cloned().collect();
                for (i, item) in snapshot.iter().enumerate() {
                    if item.is_same(&args[0]) || self.eq_values(item, &args[0])? {
                        items.borrow_mut().remove(i);
                        return Ok(Value::None);
                    }
                }
                Err(Exc::value_error(format!(
                    "{} is not in deque",
                    self.repr_of(&args[0])?
                ))
                .into())
            }
            "index" | "count" => {
                let snapshot = Rc::new(items.borrow().iter().cloned().collect::<Vec<_>>());
                match self.sequence_search(&qualified, &snapshot, name, &args, "deque") {
                    Err(Flow::Raise(raised)) if raised.exception.exc_type == ExcType::ValueError => {
                        Err(Exc::value_error(format!(
                            "{} is not in deque",
                            self.repr_of(&args[0])?
                        ))
                        .into())
                    }
                    other => other,
                }
            }
            "rotate" => {
                arity(&qualified, &args, 0, 1)?;
                let steps = optional_int(&args, 0)?.unwrap_or(1);
                let mut items = items.borrow_mut();
                let len = items.len();
                if len > 0 {
                    let steps = steps.rem_euclid(len as i64) as usize;
                    items.rotate_right(steps);
                }
                Ok(Value::None)
            }
            "reverse" => {
                arity(&qualified, &args, 0, 0)?;
                items.borrow_mut().make_contiguous().reverse();
                Ok(Value::None)
            }
            "clear" => {
                arity(&qualified, &args, 0, 0)?;
                items.borrow_mut().clear();
                Ok(Value::None)
            }
            "copy" => {
                arity(&qualified, &args, 0, 0)?;
                Ok(Value::deque(items.borrow().clone()))
            }
            other => Err(super::call::no_attribute(&Value::Deque(items.clone()), other).into()),
        }
    }

    fn stream_method(&mut self, kind: StreamKind, name: &str, args: Args) -> Result<Value, Flow> {
        match (kind, name) {
            (StreamKind::Stdin, "readline") => {
                arity("readline", &args, 0, 1)?;
                Ok(Value::str(&self.streams.read_line().unwrap_or_default()))
            }
            (StreamKind::Stdin, "read") => {
                arity("read", &args, 0, 1)?;
                Ok(Value::str(&self.streams.read_rest()))
            }
            (StreamKind::Stdin, "readlines") => {
                arity("readlines", &args, 0, 0)?;
                let mut lines = Vec::new();
                while let Some(line) = self.streams.read_line() {
                    lines.push(Value::str(&line));
                }
                Ok(Value::list(lines))
            }
            (_, "write") => {
                arity("write", &args, 1, 1)?;
                let Value::Str(text) = &args[0] else {
                    return Err(Exc::type_error(format!(
                        "write() argument must be str, not {}",
                        args[0].type_name()
                    ))
                    .into());
                };
                if kind == StreamKind::Stdout {
                    self.write_stdout(text)?;
                }
                Ok(Value::Int(text.chars().count() as i64))
            }
            (_, "flush") => Ok(Value::None),
            (_, other) => Err(super::call::no_attribute(&Value::Stream(kind), other).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_matches_reference_centering() {
        assert_eq!(pad("ab", 5, '*', '^'), "**ab*");
        assert_eq!(pad("abc", 6, '*', '^'), "*abc**");
        assert_eq!(pad("a", 4, '-', '^'), "-a--");
        assert_eq!(pad("abc", 2, ' ', '>'), "abc");
    }

    #[test]
    fn whitespace_split_honours_maxsplit() {
        let words = |parts: Vec<Value>| -> Vec<String> {
            parts
                .iter()
                .map(|v| match v {
                    Value::Str(s) => s.to_string(),
                    _ => String::new(),
                })
                .collect()
        };
        assert_eq!(words(whitespace_split("  a b  c ", -1, false)), ["a", "b", "c"]);
        assert_eq!(words(whitespace_split("a b c", 1, false)), ["a", "b c"]);
        assert_eq!(words(whitespace_split("a b c", 1, true)), ["a b", "c"]);
        assert!(whitespace_split("   ", -1, false).is_empty());
    }

    #[test]
    fn title_case_restarts_after_non_letters() {
        assert_eq!(title_case("hello world"), "Hello World");
        assert_eq!(title_case("they're bill's"), "They'Re Bill'S");
    }

    #[test]
    fn method_tables() {
        assert_eq!(method_name(&Value::str("x"), "upper"), Some("upper"));
        assert_eq!(method_name(&Value::list(vec![]), "upper"), None);
        assert_eq!(method_name(&Value::Int(3), "bit_length"), Some("bit_length"));
        assert_eq!(type_method(TypeKind::Dict, "fromkeys"), Some("fromkeys"));
        let counter = Value::dict(Dict::with_missing(Missing::Counter));
        assert_eq!(method_name(&counter, "most_common"), Some("most_common"));
        assert_eq!(method_name(&Value::dict(Dict::new()), "most_common"), None);
    }

    #[test]
    fn char_windows_use_char_positions() {
        assert_eq!(char_window("héllo", 1, 3), (1, "él"));
        assert_eq!(char_window("abc", 3, 3), (3, ""));
    }
}
