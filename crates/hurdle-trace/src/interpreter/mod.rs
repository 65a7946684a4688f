//! Tree-walking interpreter for the scripting language.
//!
//! Executes a parsed [`Program`](hurdle_lang::ast::Program) and reports
//! call, line and return events to an installed [`TraceHook`].
//!
//! # Architecture
//!
//! - [`Interpreter`] owns one run: its global namespace, frame stack, stream
//!   slot and hook slot.
//! - [`Value`] is the runtime representation of every object. Containers are
//!   shared (`Rc<RefCell<..>>`) so aliasing behaves like the source language.
//! - [`Flow`] carries non-local control flow (exceptions, `return`,
//!   `break`, `continue`) and forced [`Halt`]s out of statements.
//! - [`TraceHook`] receives [`Event`]s with a read-only [`FrameView`] and
//!   answers with a [`HookControl`].
//!
//! # Usage
//!
//! ```ignore
//! let program = hurdle_lang::parse_program(source)?;
//! let mut interp = Interpreter::new(InterpreterConfig::default());
//! let mut recorder = Recorder::new(TraceBudget::default());
//! let mut guard = interp.install_hook(&mut recorder);
//! let outcome = guard.run_module(&program);
//! ```

pub mod builtins;
pub mod call;
pub mod error;
pub mod eval;
pub mod exec;
pub mod format;
pub mod hook;
pub mod iter;
pub mod methods;
pub mod modules;
pub mod ops;
pub mod state;
pub mod value;

pub use error::{format_traceback, Exc, ExcType, ExceptionValue, Flow, Halt, Raised, StackEntry};
pub use hook::{Event, EventArg, FrameView, HookControl, HookGuard, LineSnapshot, TraceHook};
pub use state::{FrameKind, Interpreter, InterpreterConfig};
pub use value::Value;
