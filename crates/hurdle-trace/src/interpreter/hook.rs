//! Interception hook fired by the interpreter at call, line and return
//! boundaries.
//!
//! The hook is per-interpreter state, installed with
//! [`Interpreter::install_hook`], which hands back a [`HookGuard`]; dropping
//! the guard uninstalls the hook, on every exit path including unwinding.

use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::error::{ExceptionValue, Halt};
use super::state::Interpreter;
use super::value::{ObjectIds, Value};

/// Runtime event kinds delivered to the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A function (or class body, or the module) is entered.
    Call,
    /// A line executes. Timing relative to the line's statement follows
    /// [`LineSnapshot`].
    Line,
    /// A frame is left, normally or because a fault unwinds it.
    Return,
    /// A fault propagates out of a statement in this frame.
    Exception,
}

/// Payload accompanying an event.
#[derive(Debug, Clone, Copy)]
pub enum EventArg<'a> {
    None,
    /// The value being returned; `None` when the frame exits by fault.
    Return(&'a Value),
    Exception(&'a ExceptionValue),
}

/// When `line` events fire relative to the statement on that line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineSnapshot {
    /// After the statement (or compound header) has executed, so locals show
    /// its effect.
    #[default]
    After,
    /// As the line is about to execute.
    Before,
}

impl LineSnapshot {
    pub fn parse(text: &str) -> Option<LineSnapshot> {
        match text {
            "after" => Some(LineSnapshot::After),
            "before" => Some(LineSnapshot::Before),
            _ => None,
        }
    }
}

/// Read-only view of the frame an event belongs to.
pub struct FrameView<'a> {
    pub func_name: &'a str,
    pub line: u32,
    /// Bindings in first-assignment order.
    pub locals: &'a IndexMap<String, Value>,
    /// Identity table for rendering objects that have no structural form.
    pub ids: &'a ObjectIds,
}

/// What the interpreter should do after an event.
#[derive(Debug)]
pub enum HookControl {
    Continue,
    /// Stop the run immediately; no further events are delivered.
    Halt(Halt),
}

/// Receives runtime events from an [`Interpreter`].
pub trait TraceHook {
    fn on_event(&mut self, frame: &FrameView<'_>, event: Event, arg: EventArg<'_>)
        -> HookControl;
}

/// Keeps a hook installed on an interpreter for the guard's lifetime.
pub struct HookGuard<'a, 'h> {
    interp: &'a mut Interpreter<'h>,
}

impl<'h> Interpreter<'h> {
    /// Installs `hook`, replacing any previous one, until the guard drops.
    pub fn install_hook(&mut self, hook: &'h mut dyn TraceHook) -> HookGuard<'_, 'h> {
        self.hook = Some(hook);
        HookGuard { interp: self }
    }

    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }
}

impl<'h> Deref for HookGuard<'_, 'h> {
    type Target = Interpreter<'h>;

    fn deref(&self) -> &Self::Target {
        self.interp
    }
}

impl<'h> DerefMut for HookGuard<'_, 'h> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.interp
    }
}

impl Drop for HookGuard<'_, '_> {
    fn drop(&mut self) {
        self.interp.hook = None;
    }
}
