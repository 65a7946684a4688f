//! Exceptions and non-local control flow for the interpreter.
//!
//! Every statement and expression evaluates to `Result<_, Flow>`. A
//! [`Flow`] is either a language-level exception ([`Raised`]), one of the
//! structured jumps (`return`, `break`, `continue`), or a [`Halt`]: a forced
//! stop imposed by the run's budget that user code cannot intercept.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::fault::FaultKind;

use super::value::{Class, Value};

/// Built-in exception classes, arranged in the usual hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcType {
    BaseException,
    SystemExit,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    KeyError,
    IndexError,
    ValueError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    StopIteration,
    AssertionError,
    EOFError,
    ImportError,
    ModuleNotFoundError,
    MemoryError,
}

impl ExcType {
    pub const ALL: &'static [ExcType] = &[
        ExcType::BaseException,
        ExcType::SystemExit,
        ExcType::Exception,
        ExcType::ArithmeticError,
        ExcType::ZeroDivisionError,
        ExcType::OverflowError,
        ExcType::LookupError,
        ExcType::KeyError,
        ExcType::IndexError,
        ExcType::ValueError,
        ExcType::TypeError,
        ExcType::NameError,
        ExcType::UnboundLocalError,
        ExcType::AttributeError,
        ExcType::RuntimeError,
        ExcType::RecursionError,
        ExcType::NotImplementedError,
        ExcType::StopIteration,
        ExcType::AssertionError,
        ExcType::EOFError,
        ExcType::ImportError,
        ExcType::ModuleNotFoundError,
        ExcType::MemoryError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcType::BaseException => "BaseException",
            ExcType::SystemExit => "SystemExit",
            ExcType::Exception => "Exception",
            ExcType::ArithmeticError => "ArithmeticError",
            ExcType::ZeroDivisionError => "ZeroDivisionError",
            ExcType::OverflowError => "OverflowError",
            ExcType::LookupError => "LookupError",
            ExcType::KeyError => "KeyError",
            ExcType::IndexError => "IndexError",
            ExcType::ValueError => "ValueError",
            ExcType::TypeError => "TypeError",
            ExcType::NameError => "NameError",
            ExcType::UnboundLocalError => "UnboundLocalError",
            ExcType::AttributeError => "AttributeError",
            ExcType::RuntimeError => "RuntimeError",
            ExcType::RecursionError => "RecursionError",
            ExcType::NotImplementedError => "NotImplementedError",
            ExcType::StopIteration => "StopIteration",
            ExcType::AssertionError => "AssertionError",
            ExcType::EOFError => "EOFError",
            ExcType::ImportError => "ImportError",
            ExcType::ModuleNotFoundError => "ModuleNotFoundError",
            ExcType::MemoryError => "MemoryError",
        }
    }

    pub fn from_name(name: &str) -> Option<ExcType> {
        ExcType::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn parent(self) -> Option<ExcType> {
        let parent = match self {
            ExcType::BaseException => return None,
            ExcType::SystemExit | ExcType::Exception => ExcType::BaseException,
            ExcType::ZeroDivisionError | ExcType::OverflowError => ExcType::ArithmeticError,
            ExcType::KeyError | ExcType::IndexError => ExcType::LookupError,
            ExcType::UnboundLocalError => ExcType::NameError,
            ExcType::RecursionError | ExcType::NotImplementedError => ExcType::RuntimeError,
            ExcType::ModuleNotFoundError => ExcType::ImportError,
            _ => ExcType::Exception,
        };
        Some(parent)
    }

    /// Whether `self` is `other` or derives from it.
    pub fn is_subclass_of(self, other: ExcType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == other {
                return true;
            }
            current = ty.parent();
        }
        false
    }
}

/// A raised (or raisable) exception object.
///
/// Exceptions of user-defined subclasses keep their class in `class`;
/// `exc_type` is then the nearest built-in ancestor, which is what `except`
/// clauses naming built-in classes match against.
pub struct ExceptionValue {
    pub exc_type: ExcType,
    pub class: Option<Rc<Class>>,
    pub args: RefCell<Vec<Value>>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl ExceptionValue {
    pub fn new(exc_type: ExcType, args: Vec<Value>) -> Self {
        ExceptionValue {
            exc_type,
            class: None,
            args: RefCell::new(args),
            attrs: RefCell::new(IndexMap::new()),
        }
    }

    pub fn of_class(class: Rc<Class>, exc_type: ExcType, args: Vec<Value>) -> Self {
        ExceptionValue {
            exc_type,
            class: Some(class),
            args: RefCell::new(args),
            attrs: RefCell::new(IndexMap::new()),
        }
    }

    pub fn type_name(&self) -> String {
        match &self.class {
            Some(class) => class.name.to_string(),
            None => self.exc_type.name().to_string(),
        }
    }

    /// Whether an `except` clause naming `class` catches this exception.
    pub fn is_instance_of_class(&self, class: &Rc<Class>) -> bool {
        self.class
            .as_ref()
            .is_some_and(|own| own.is_subclass_of(class))
    }
}

impl fmt::Debug for ExceptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionValue")
            .field("type", &self.type_name())
            .field("args", &self.args.borrow())
            .finish()
    }
}

/// An exception raised by native code, before it is attached to a stack.
#[derive(Debug)]
pub struct Exc {
    pub ty: ExcType,
    pub args: Vec<Value>,
}

impl Exc {
    pub fn new(ty: ExcType, message: impl Into<String>) -> Self {
        let message = message.into();
        let args = if message.is_empty() {
            Vec::new()
        } else {
            vec![Value::str(&message)]
        };
        Exc { ty, args }
    }

    pub fn with_args(ty: ExcType, args: Vec<Value>) -> Self {
        Exc { ty, args }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Exc::new(ExcType::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Exc::new(ExcType::ValueError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Exc::new(ExcType::IndexError, message)
    }

    pub fn key_error(key: Value) -> Self {
        Exc::with_args(ExcType::KeyError, vec![key])
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Exc::new(ExcType::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Exc::new(
            ExcType::OverflowError,
            "integer result exceeds the 64-bit range",
        )
    }
}

/// One line of a formatted traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub name: Rc<str>,
    pub line: u32,
}

/// An exception in flight, with the stack captured where it was raised.
#[derive(Debug)]
pub struct Raised {
    pub exception: Rc<ExceptionValue>,
    /// Outermost frame first. Empty until the raising statement attaches the
    /// current stack.
    pub traceback: Vec<StackEntry>,
}

/// A forced stop. Skips `except` and `finally` blocks and emits no further
/// events.
#[derive(Debug)]
pub struct Halt {
    pub kind: FaultKind,
    /// Name shown on the last traceback line, e.g. `TimeoutError`.
    pub label: &'static str,
    pub message: String,
    pub traceback: Vec<StackEntry>,
}

impl Halt {
    pub fn new(kind: FaultKind, label: &'static str, message: impl Into<String>) -> Self {
        Halt {
            kind,
            label,
            message: message.into(),
            traceback: Vec::new(),
        }
    }
}

/// Non-local control flow out of a statement or expression.
#[derive(Debug)]
pub enum Flow {
    Raise(Box<Raised>),
    Return(Value),
    Break,
    Continue,
    Halt(Box<Halt>),
}

impl Flow {
    pub fn raise(exception: Rc<ExceptionValue>) -> Flow {
        Flow::Raise(Box::new(Raised {
            exception,
            traceback: Vec::new(),
        }))
    }

    pub fn halt(halt: Halt) -> Flow {
        Flow::Halt(Box::new(halt))
    }
}

impl From<Exc> for Flow {
    fn from(exc: Exc) -> Flow {
        Flow::raise(Rc::new(ExceptionValue::new(exc.ty, exc.args)))
    }
}

impl From<Halt> for Flow {
    fn from(halt: Halt) -> Flow {
        Flow::halt(halt)
    }
}

/// Formats a traceback the way the reference runtime prints uncaught
/// exceptions.
pub fn format_traceback(entries: &[StackEntry], last_line: &str) -> String {
    let mut text = String::from("Traceback (most recent call last):\n");
    for entry in entries {
        text.push_str(&format!(
            "  File \"<string>\", line {}, in {}\n",
            entry.line, entry.name
        ));
    }
    text.push_str(last_line);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy() {
        assert!(ExcType::KeyError.is_subclass_of(ExcType::LookupError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(ExcType::RecursionError.is_subclass_of(ExcType::RuntimeError));
        assert!(!ExcType::SystemExit.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::ValueError.is_subclass_of(ExcType::TypeError));
    }

    #[test]
    fn names_round_trip() {
        for ty in ExcType::ALL {
            assert_eq!(ExcType::from_name(ty.name()), Some(*ty));
        }
    }

    #[test]
    fn traceback_layout() {
        let entries = vec![
            StackEntry {
                name: Rc::from("<module>"),
                line: 4,
            },
            StackEntry {
                name: Rc::from("f"),
                line: 2,
            },
        ];
        assert_eq!(
            format_traceback(&entries, "ValueError: bad"),
            "Traceback (most recent call last):\n  File \"<string>\", line 4, in <module>\n  File \"<string>\", line 2, in f\nValueError: bad"
        );
    }
}
