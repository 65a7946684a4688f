//! Runtime value representation.
//!
//! [`Value`] is a cheap-to-clone handle: scalars are stored inline, mutable
//! containers are shared through `Rc<RefCell<_>>` so aliasing behaves like
//! the reference language (two names bound to one list see each other's
//! mutations). The interpreter is single-threaded per run, so `Rc` is
//! sufficient.
//!
//! Text conversion (`repr`/`str`) lives here as well, parameterised by a
//! [`TextHook`] so the interpreter can route user-defined `__repr__` and
//! `__str__` through itself while the snapshot serializer uses the plain
//! [`PlainText`] hook and never runs user code.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use hurdle_lang::ast::FunctionDef;
use indexmap::IndexMap;
use smallvec::SmallVec;

use super::error::{Exc, ExcType, ExceptionValue, Flow};

/// Positional call arguments.
pub type Args = SmallVec<[Value; 4]>;

/// Keyword call arguments, in call-site order.
pub type Kwargs = Vec<(String, Value)>;

/// A namespace: function locals, module globals or a class body.
pub type Scope = Rc<RefCell<IndexMap<String, Value>>>;

pub fn new_scope() -> Scope {
    Rc::new(RefCell::new(IndexMap::new()))
}

/// Maximum nesting followed when rendering or comparing nested values.
pub const MAX_NESTING: usize = 64;

/// Built-in classes that are also constructors (`int`, `list`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Object,
    Type,
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Deque,
    DefaultDict,
    Counter,
    Function,
    Module,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Object => "object",
            TypeKind::Type => "type",
            TypeKind::NoneType => "NoneType",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::Range => "range",
            TypeKind::Deque => "deque",
            TypeKind::DefaultDict => "defaultdict",
            TypeKind::Counter => "Counter",
            TypeKind::Function => "function",
            TypeKind::Module => "module",
        }
    }

    fn qualified_name(self) -> String {
        match self {
            TypeKind::Deque | TypeKind::DefaultDict | TypeKind::Counter => {
                format!("collections.{}", self.name())
            }
            _ => self.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let span = if step > 0 {
            stop - start
        } else {
            start - stop
        };
        if span <= 0 {
            0
        } else {
            let step = step.abs();
            ((span + step - 1) / step) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index < self.len() {
            Some(self.start + self.step * index as i64)
        } else {
            None
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value as i128 - self.start as i128) % self.step as i128 == 0
    }
}

/// Hashable identity of a dict key or set member.
///
/// Numbers normalise so that `1`, `1.0` and `True` share one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Identity(usize),
    Static(&'static str, &'static str),
}

impl HashKey {
    pub fn from_value(value: &Value) -> Result<HashKey, Exc> {
        let key = match value {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => float_key(*f),
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(HashKey::from_value)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Type(kind) => HashKey::Static("type", kind.name()),
            Value::ExcType(ty) => HashKey::Static("exception", ty.name()),
            Value::Builtin(b) => HashKey::Static(b.module.unwrap_or("builtins"), b.name),
            Value::Stream(kind) => HashKey::Static("stream", kind.name()),
            Value::List(_)
            | Value::Dict(_)
            | Value::Set(_)
            | Value::Deque(_)
            | Value::Range(_)
            | Value::DictView(_) => {
                return Err(Exc::type_error(format!(
                    "unhashable type: '{}'",
                    value.type_name()
                )))
            }
            other => match other.ptr() {
                Some(ptr) => HashKey::Identity(ptr),
                None => {
                    return Err(Exc::type_error(format!(
                        "unhashable type: '{}'",
                        other.type_name()
                    )))
                }
            },
        };
        Ok(key)
    }
}

fn float_key(f: f64) -> HashKey {
    if f.fract() == 0.0 && f.abs() < 9.0e18 {
        HashKey::Int(f as i64)
    } else {
        HashKey::Float(f.to_bits())
    }
}

/// What a dict does on a missing-key lookup.
#[derive(Debug, Clone)]
pub enum Missing {
    /// Plain dict: `KeyError`.
    Raise,
    /// `defaultdict`: insert `factory()`.
    Factory(Value),
    /// `Counter`: return 0 without inserting.
    Counter,
}

/// Insertion-ordered mapping; the original key object is kept next to its
/// value.
#[derive(Debug, Clone)]
pub struct Dict {
    pub entries: IndexMap<HashKey, (Value, Value)>,
    pub missing: Missing,
}

impl Dict {
    pub fn new() -> Self {
        Dict {
            entries: IndexMap::new(),
            missing: Missing::Raise,
        }
    }

    pub fn with_missing(missing: Missing) -> Self {
        Dict {
            entries: IndexMap::new(),
            missing,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<Value> {
        self.entries.get(key).map(|(_, v)| v.clone())
    }

    /// Inserts or updates; an existing entry keeps its original key object.
    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) {
        match self.entries.get_mut(&hash) {
            Some(slot) => slot.1 = value,
            None => {
                self.entries.insert(hash, (key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<(Value, Value)> {
        self.entries.shift_remove(key)
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.values().cloned().collect()
    }

    pub fn kind(&self) -> TypeKind {
        match self.missing {
            Missing::Raise => TypeKind::Dict,
            Missing::Factory(_) => TypeKind::DefaultDict,
            Missing::Counter => TypeKind::Counter,
        }
    }
}

impl Default for Dict {
    fn default() -> Self {
        Dict::new()
    }
}

pub type SetItems = IndexMap<HashKey, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Keys,
    Values,
    Items,
}

/// Live `dict.keys()` / `values()` / `items()` view.
#[derive(Debug)]
pub struct DictView {
    pub dict: Rc<RefCell<Dict>>,
    pub kind: ViewKind,
}

impl DictView {
    pub fn snapshot(&self) -> Vec<Value> {
        let dict = self.dict.borrow();
        match self.kind {
            ViewKind::Keys => dict.keys(),
            ViewKind::Values => dict.values(),
            ViewKind::Items => dict
                .items()
                .into_iter()
                .map(|(k, v)| Value::tuple(vec![k, v]))
                .collect(),
        }
    }

    fn name(&self) -> &'static str {
        match self.kind {
            ViewKind::Keys => "dict_keys",
            ViewKind::Values => "dict_values",
            ViewKind::Items => "dict_items",
        }
    }
}

/// A user-defined function or lambda, with the scopes it closes over.
pub struct Function {
    pub def: Arc<FunctionDef>,
    pub qualname: Rc<str>,
    /// One slot per parameter; `None` for parameters without a default.
    pub defaults: Vec<Option<Value>>,
    pub globals: Scope,
    /// Enclosing function scopes, outermost first.
    pub enclosing: Vec<Scope>,
    /// Class whose body defined this function, for zero-argument `super()`.
    pub owner: RefCell<Option<Weak<Class>>>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// A user-defined class.
pub struct Class {
    pub name: Rc<str>,
    pub bases: Vec<Rc<Class>>,
    /// Nearest built-in exception ancestor, for exception subclasses.
    pub exc_base: Option<ExcType>,
    pub attrs: Scope,
}

impl Class {
    /// Method resolution order: the class itself, then its bases depth-first.
    pub fn mro(self: &Rc<Self>) -> Vec<Rc<Class>> {
        let mut order: Vec<Rc<Class>> = Vec::new();
        fn visit(class: &Rc<Class>, order: &mut Vec<Rc<Class>>) {
            if order.iter().any(|c| Rc::ptr_eq(c, class)) {
                return;
            }
            order.push(Rc::clone(class));
            for base in &class.bases {
                visit(base, order);
            }
        }
        visit(self, &mut order);
        order
    }

    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        self.mro()
            .iter()
            .find_map(|class| class.attrs.borrow().get(name).cloned())
    }

    /// Looks `name` up in the classes after `after` in this class's MRO.
    pub fn lookup_after(self: &Rc<Self>, after: &Rc<Class>, name: &str) -> Option<Value> {
        self.mro()
            .iter()
            .skip_while(|class| !Rc::ptr_eq(class, after))
            .skip(1)
            .find_map(|class| class.attrs.borrow().get(name).cloned())
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        self.mro().iter().any(|class| Rc::ptr_eq(class, other))
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

/// What a bound method calls.
#[derive(Clone)]
pub enum Method {
    User(Rc<Function>),
    /// A method of a built-in type, dispatched by name.
    Native(Rc<str>),
}

pub struct BoundMethod {
    pub receiver: Value,
    pub method: Method,
}

/// A built-in function, optionally living in a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub module: Option<&'static str>,
    pub name: &'static str,
}

pub struct Module {
    pub name: &'static str,
    pub attrs: IndexMap<&'static str, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    /// Accepted as a write target; what is written there is discarded.
    Stderr,
}

impl StreamKind {
    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Stdin => "<stdin>",
            StreamKind::Stdout => "<stdout>",
            StreamKind::Stderr => "<stderr>",
        }
    }
}

/// Result of zero-argument `super()` inside a method.
pub struct SuperProxy {
    pub class: Rc<Class>,
    pub receiver: Value,
}

/// State of a built-in iterator.
pub enum IterState {
    /// Live index into a list or tuple; sees appends made during iteration.
    Seq { source: Value, index: usize },
    Chars { chars: Vec<char>, index: usize },
    Range { next: i64, remaining: usize, step: i64 },
    /// A snapshot taken when iteration started.
    Items {
        name: &'static str,
        items: Vec<Value>,
        index: usize,
    },
    Enumerate {
        inner: Rc<RefCell<IterState>>,
        count: i64,
    },
    Zip {
        inners: Vec<Rc<RefCell<IterState>>>,
    },
    Map {
        func: Value,
        inners: Vec<Rc<RefCell<IterState>>>,
    },
    Filter {
        func: Value,
        inner: Rc<RefCell<IterState>>,
    },
    /// An instance implementing `__next__`.
    User { target: Value },
}

impl IterState {
    pub fn name(&self) -> &'static str {
        match self {
            IterState::Seq { source, .. } => match source {
                Value::Tuple(_) => "tuple_iterator",
                _ => "list_iterator",
            },
            IterState::Chars { .. } => "str_ascii_iterator",
            IterState::Range { .. } => "range_iterator",
            IterState::Items { name, .. } => name,
            IterState::Enumerate { .. } => "enumerate",
            IterState::Zip { .. } => "zip",
            IterState::Map { .. } => "map",
            IterState::Filter { .. } => "filter",
            IterState::User { .. } => "iterator",
        }
    }
}

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<SetItems>>),
    Deque(Rc<RefCell<VecDeque<Value>>>),
    Range(RangeValue),
    DictView(Rc<DictView>),
    Iterator(Rc<RefCell<IterState>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Type(TypeKind),
    BoundMethod(Rc<BoundMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Super(Rc<SuperProxy>),
    ExcType(ExcType),
    Exception(Rc<ExceptionValue>),
    Module(Rc<Module>),
    Stream(StreamKind),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(items: SetItems) -> Value {
        Value::Set(Rc::new(RefCell::new(items)))
    }

    pub fn deque(items: VecDeque<Value>) -> Value {
        Value::Deque(Rc::new(RefCell::new(items)))
    }

    pub fn iterator(state: IterState) -> Value {
        Value::Iterator(Rc::new(RefCell::new(state)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Float view of any number.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Address of the shared allocation, for heap values.
    pub fn ptr(&self) -> Option<usize> {
        let ptr = match self {
            Value::Str(s) => Rc::as_ptr(s) as *const u8 as usize,
            Value::List(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Tuple(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Dict(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Set(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Deque(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::DictView(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Iterator(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Function(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::BoundMethod(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Class(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Instance(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Super(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Exception(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            Value::Module(rc) => Rc::as_ptr(rc) as *const u8 as usize,
            _ => return None,
        };
        Some(ptr)
    }

    /// `a is b`.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::ExcType(a), Value::ExcType(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Stream(a), Value::Stream(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            _ => match (self.ptr(), other.ptr()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// The `type(x).__name__` of this value.
    pub fn type_name(&self) -> String {
        let name = match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(d) => d.borrow().kind().name(),
            Value::Set(_) => "set",
            Value::Deque(_) => "deque",
            Value::Range(_) => "range",
            Value::DictView(view) => view.name(),
            Value::Iterator(it) => it.borrow().name(),
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Type(_) | Value::Class(_) | Value::ExcType(_) => "type",
            Value::BoundMethod(m) => match m.method {
                Method::User(_) => "method",
                Method::Native(_) => "builtin_function_or_method",
            },
            Value::Instance(inst) => return inst.class.name.to_string(),
            Value::Super(_) => "super",
            Value::Exception(exc) => return exc.type_name(),
            Value::Module(_) => "module",
            Value::Stream(_) => "TextIOWrapper",
        };
        name.to_string()
    }

    /// Truthiness for values whose truth does not depend on user code.
    /// Returns `None` for instances, whose `__bool__`/`__len__` must run.
    pub fn builtin_truthy(&self) -> Option<bool> {
        let truth = match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::Deque(d) => !d.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            Value::DictView(view) => !view.dict.borrow().is_empty(),
            Value::Instance(_) => return None,
            _ => true,
        };
        Some(truth)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => f.write_str(if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&float_repr(*x)),
            Value::Str(s) => f.write_str(&str_repr(s)),
            Value::List(items) => match items.try_borrow() {
                Ok(items) => write!(f, "<list len={}>", items.len()),
                Err(_) => f.write_str("<list>"),
            },
            Value::Tuple(items) => write!(f, "<tuple len={}>", items.len()),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

/// Deterministic per-run object identities.
///
/// Heap values get sequential ids in the order their identity is first
/// observed, so `id()` results and the addresses shown in default reprs are
/// identical across runs of the same program. Observed values are pinned so
/// a freed address can never be handed to a different object.
#[derive(Default)]
pub struct ObjectIds {
    table: RefCell<HashMap<usize, (u64, Value)>>,
    next: Cell<u64>,
}

impl ObjectIds {
    pub fn new() -> Self {
        ObjectIds::default()
    }

    pub fn id_of(&self, value: &Value) -> u64 {
        let Some(ptr) = value.ptr() else {
            return scalar_id(value);
        };
        let mut table = self.table.borrow_mut();
        if let Some((id, _)) = table.get(&ptr) {
            return *id;
        }
        let id = self.next.get() + 1;
        self.next.set(id);
        table.insert(ptr, (id, value.clone()));
        id
    }

    /// A fake but stable memory address, e.g. `0x7f0000000030`.
    pub fn address(&self, value: &Value) -> String {
        format!("0x{:x}", 0x7f00_0000_0000u64 + self.id_of(value) * 0x30)
    }
}

fn scalar_id(value: &Value) -> u64 {
    const BASE: u64 = 0x10_0000;
    match value {
        Value::None => BASE + 1,
        Value::Bool(false) => BASE + 2,
        Value::Bool(true) => BASE + 3,
        Value::Int(i) => BASE * 2 + (*i as u64).wrapping_mul(0x20),
        Value::Float(f) => f.to_bits() >> 4,
        Value::Range(r) => fnv(&format!("{}:{}:{}", r.start, r.stop, r.step)),
        Value::Type(kind) => fnv(kind.name()),
        Value::ExcType(ty) => fnv(ty.name()),
        Value::Builtin(b) => fnv(b.name),
        Value::Stream(kind) => fnv(kind.name()),
        _ => BASE,
    }
}

fn fnv(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash >> 16
}

// ---------------------------------------------------------------------------
// Text conversion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Repr,
    Str,
}

/// Hook used while rendering values to text.
pub trait TextHook {
    fn ids(&self) -> &ObjectIds;

    /// Text produced by a user-defined `__str__`/`__repr__`, if the value's
    /// class defines one.
    fn user_text(&mut self, value: &Value, kind: TextKind) -> Result<Option<String>, Flow>;
}

/// Renders values without running any user code.
pub struct PlainText<'a>(pub &'a ObjectIds);

impl TextHook for PlainText<'_> {
    fn ids(&self) -> &ObjectIds {
        self.0
    }

    fn user_text(&mut self, _value: &Value, _kind: TextKind) -> Result<Option<String>, Flow> {
        Ok(None)
    }
}

/// `str(value)` without user code.
pub fn plain_str(value: &Value, ids: &ObjectIds) -> String {
    to_text(&mut PlainText(ids), value, TextKind::Str).unwrap_or_default()
}

/// `repr(value)` without user code.
pub fn plain_repr(value: &Value, ids: &ObjectIds) -> String {
    to_text(&mut PlainText(ids), value, TextKind::Repr).unwrap_or_default()
}

pub fn to_text<H: TextHook + ?Sized>(
    hook: &mut H,
    value: &Value,
    kind: TextKind,
) -> Result<String, Flow> {
    let mut out = String::new();
    let mut seen = Vec::new();
    write_value(hook, value, kind, &mut out, &mut seen)?;
    Ok(out)
}

fn write_seq<H: TextHook + ?Sized>(
    hook: &mut H,
    items: &[Value],
    out: &mut String,
    seen: &mut Vec<usize>,
) -> Result<(), Flow> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_value(hook, item, TextKind::Repr, out, seen)?;
    }
    Ok(())
}

fn write_dict<H: TextHook + ?Sized>(
    hook: &mut H,
    mut items: Vec<(Value, Value)>,
    missing: &Missing,
    out: &mut String,
    seen: &mut Vec<usize>,
) -> Result<(), Flow> {
    match missing {
        Missing::Raise => {}
        Missing::Factory(factory) => {
            out.push_str("defaultdict(");
            write_value(hook, factory, TextKind::Repr, out, seen)?;
            out.push_str(", ");
        }
        Missing::Counter => {
            if items.is_empty() {
                out.push_str("Counter()");
                return Ok(());
            }
            out.push_str("Counter(");
            // Most common first, ties in insertion order.
            let count = |v: &Value| v.as_float().unwrap_or(0.0);
            items.sort_by(|a, b| {
                count(&b.1)
                    .partial_cmp(&count(&a.1))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }
    out.push('{');
    for (i, (key, val)) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_value(hook, key, TextKind::Repr, out, seen)?;
        out.push_str(": ");
        write_value(hook, val, TextKind::Repr, out, seen)?;
    }
    out.push('}');
    if !matches!(missing, Missing::Raise) {
        out.push(')');
    }
    Ok(())
}

fn write_value<H: TextHook + ?Sized>(
    hook: &mut H,
    value: &Value,
    kind: TextKind,
    out: &mut String,
    seen: &mut Vec<usize>,
) -> Result<(), Flow> {
    if seen.len() >= MAX_NESTING {
        out.push_str("...");
        return Ok(());
    }
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(b) => out.push_str(if *b { "True" } else { "False" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&float_repr(*f)),
        Value::Str(s) => match kind {
            TextKind::Str => out.push_str(s),
            TextKind::Repr => out.push_str(&str_repr(s)),
        },
        Value::List(items) => {
            let ptr = Rc::as_ptr(items) as *const u8 as usize;
            if seen.contains(&ptr) {
                out.push_str("[...]");
                return Ok(());
            }
            let snapshot = items.borrow().clone();
            seen.push(ptr);
            out.push('[');
            let result = write_seq(hook, &snapshot, out, seen);
            seen.pop();
            result?;
            out.push(']');
        }
        Value::Tuple(items) => {
            let ptr = Rc::as_ptr(items) as *const u8 as usize;
            seen.push(ptr);
            out.push('(');
            let result = write_seq(hook, items, out, seen);
            seen.pop();
            result?;
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Dict(dict) => {
            let ptr = Rc::as_ptr(dict) as *const u8 as usize;
            if seen.contains(&ptr) {
                out.push_str("{...}");
                return Ok(());
            }
            let (items, missing) = {
                let dict = dict.borrow();
                (dict.items(), dict.missing.clone())
            };
            seen.push(ptr);
            let result = write_dict(hook, items, &missing, out, seen);
            seen.pop();
            result?;
        }
        Value::Set(items) => {
            let snapshot: Vec<Value> = items.borrow().values().cloned().collect();
            if snapshot.is_empty() {
                out.push_str("set()");
            } else {
                out.push('{');
                seen.push(Rc::as_ptr(items) as *const u8 as usize);
                let result = write_seq(hook, &snapshot, out, seen);
                seen.pop();
                result?;
                out.push('}');
            }
        }
        Value::Deque(items) => {
            let ptr = Rc::as_ptr(items) as *const u8 as usize;
            if seen.contains(&ptr) {
                out.push_str("[...]");
                return Ok(());
            }
            let snapshot: Vec<Value> = items.borrow().iter().cloned().collect();
            seen.push(ptr);
            out.push_str("deque([");
            let result = write_seq(hook, &snapshot, out, seen);
            seen.pop();
            result?;
            out.push_str("])");
        }
        Value::Range(r) => {
            if r.step == 1 {
                out.push_str(&format!("range({}, {})", r.start, r.stop));
            } else {
                out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
            }
        }
        Value::DictView(view) => {
            let ptr = Rc::as_ptr(&view.dict) as *const u8 as usize;
            if seen.contains(&ptr) {
                out.push_str("...");
                return Ok(());
            }
            let snapshot = view.snapshot();
            seen.push(ptr);
            out.push_str(view.name());
            out.push_str("([");
            let result = write_seq(hook, &snapshot, out, seen);
            seen.pop();
            result?;
            out.push_str("])");
        }
        Value::Iterator(it) => {
            let name = it.borrow().name();
            out.push_str(&format!("<{name} object at {}>", hook.ids().address(value)));
        }
        Value::Function(func) => {
            out.push_str(&format!(
                "<function {} at {}>",
                func.qualname,
                hook.ids().address(value)
            ));
        }
        Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name)),
        Value::Type(kind) => out.push_str(&format!("<class '{}'>", kind.qualified_name())),
        Value::BoundMethod(bound) => match &bound.method {
            Method::User(func) => {
                out.push_str(&format!("<bound method {} of ", func.qualname));
                write_value(hook, &bound.receiver, TextKind::Repr, out, seen)?;
                out.push('>');
            }
            Method::Native(name) => out.push_str(&format!(
                "<built-in method {name} of {} object at {}>",
                bound.receiver.type_name(),
                hook.ids().address(&bound.receiver)
            )),
        },
        Value::Class(class) => out.push_str(&format!("<class '__main__.{}'>", class.name)),
        Value::Instance(inst) => match hook.user_text(value, kind)? {
            Some(text) => out.push_str(&text),
            None => out.push_str(&format!(
                "<__main__.{} object at {}>",
                inst.class.name,
                hook.ids().address(value)
            )),
        },
        Value::Super(proxy) => {
            out.push_str(&format!(
                "<super: <class '{}'>, <{} object>>",
                proxy.class.name,
                proxy.receiver.type_name()
            ));
        }
        Value::ExcType(ty) => out.push_str(&format!("<class '{}'>", ty.name())),
        Value::Exception(exc) => {
            if let Some(text) = hook.user_text(value, kind)? {
                out.push_str(&text);
                return Ok(());
            }
            let args = exc.args.borrow().clone();
            match kind {
                TextKind::Str => match args.as_slice() {
                    [] => {}
                    [single] => {
                        let inner = if exc.exc_type == ExcType::KeyError && exc.class.is_none()
                        {
                            TextKind::Repr
                        } else {
                            TextKind::Str
                        };
                        write_value(hook, single, inner, out, seen)?;
                    }
                    _ => write_value(hook, &Value::tuple(args), TextKind::Repr, out, seen)?,
                },
                TextKind::Repr => {
                    out.push_str(&exc.type_name());
                    out.push('(');
                    write_seq(hook, &args, out, seen)?;
                    out.push(')');
                }
            }
        }
        Value::Module(module) => out.push_str(&format!("<module '{}' (built-in)>", module.name)),
        Value::Stream(kind) => {
            let mode = match kind {
                StreamKind::Stdin => 'r',
                StreamKind::Stdout | StreamKind::Stderr => 'w',
            };
            out.push_str(&format!(
                "<_io.TextIOWrapper name='{}' mode='{mode}' encoding='utf-8'>",
                kind.name()
            ));
        }
    }
    Ok(())
}

/// Shortest round-trip float text, laid out like the reference runtime:
/// positional between 1e-4 and 1e16, scientific (`1e+16`, `1.5e-07`)
/// outside that range.
pub fn float_repr(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let sci = format!("{x:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if mantissa.starts_with('-') { "-" } else { "" };
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();

    if (-4..16).contains(&exp) {
        let point = exp + 1;
        let body = if point <= 0 {
            format!("0.{}{}", "0".repeat((-point) as usize), digits)
        } else if point as usize >= digits.len() {
            format!("{}{}.0", digits, "0".repeat(point as usize - digits.len()))
        } else {
            let (int_part, frac_part) = digits.split_at(point as usize);
            format!("{int_part}.{frac_part}")
        };
        format!("{sign}{body}")
    } else {
        let (first, rest) = digits.split_at(1);
        let mantissa = if rest.is_empty() {
            first.to_string()
        } else {
            format!("{first}.{rest}")
        };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        format!("{sign}{mantissa}e{exp_sign}{:02}", exp.abs())
    }
}

/// Quoted string literal, preferring single quotes.
pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_repr_matches_reference_layout() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(123.456), "123.456");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-7), "1.5e-07");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(1e15), "1000000000000000.0");
        assert_eq!(float_repr(f64::INFINITY), "inf");
        assert_eq!(float_repr(-0.0), "-0.0");
    }

    #[test]
    fn str_repr_quoting() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
        assert_eq!(str_repr("'\""), "'\\'\"'");
    }

    #[test]
    fn containers_render_like_the_reference_runtime() {
        let ids = ObjectIds::new();
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(plain_repr(&list, &ids), "[1, 'a', None]");
        assert_eq!(plain_repr(&Value::tuple(vec![Value::Int(1)]), &ids), "(1,)");
        assert_eq!(plain_repr(&Value::set(SetItems::new()), &ids), "set()");

        let mut dict = Dict::new();
        dict.insert(HashKey::Str(Rc::from("k")), Value::str("k"), Value::Bool(true));
        assert_eq!(plain_repr(&Value::dict(dict), &ids), "{'k': True}");
        assert_eq!(plain_str(&Value::str("plain"), &ids), "plain");
    }

    #[test]
    fn cyclic_list_renders_with_ellipsis() {
        let ids = ObjectIds::new();
        let inner = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let list = Value::List(inner.clone());
        inner.borrow_mut().push(list.clone());
        assert_eq!(plain_repr(&list, &ids), "[1, [...]]");
        // Break the cycle so the test does not leak.
        inner.borrow_mut().clear();
    }

    #[test]
    fn counter_renders_most_common_first() {
        let ids = ObjectIds::new();
        let mut counter = Dict::with_missing(Missing::Counter);
        counter.insert(HashKey::Str(Rc::from("a")), Value::str("a"), Value::Int(1));
        counter.insert(HashKey::Str(Rc::from("b")), Value::str("b"), Value::Int(3));
        assert_eq!(
            plain_repr(&Value::dict(counter), &ids),
            "Counter({'b': 3, 'a': 1})"
        );
    }

    #[test]
    fn numeric_keys_normalise() {
        let one = HashKey::from_value(&Value::Int(1)).unwrap();
        assert_eq!(HashKey::from_value(&Value::Float(1.0)).unwrap(), one);
        assert_eq!(HashKey::from_value(&Value::Bool(true)).unwrap(), one);
        assert!(HashKey::from_value(&Value::list(vec![])).is_err());
    }

    #[test]
    fn object_ids_are_stable_and_sequential() {
        let ids = ObjectIds::new();
        let a = Value::list(vec![]);
        let b = Value::list(vec![]);
        assert_eq!(ids.id_of(&a), 1);
        assert_eq!(ids.id_of(&b), 2);
        assert_eq!(ids.id_of(&a), 1);
        assert_eq!(ids.address(&a), "0x7f0000000030");
    }

    #[test]
    fn range_len_and_membership() {
        let r = RangeValue {
            start: 10,
            stop: 0,
            step: -3,
        };
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), Some(1));
        assert!(r.contains(4));
        assert!(!r.contains(5));
    }
}
