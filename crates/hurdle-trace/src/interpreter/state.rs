//! Interpreter state: the frame stack, namespaces and event emission.
//!
//! One [`Interpreter`] executes one program run. It owns the run's global
//! namespace, its stream slot and its hook slot, so nothing is shared
//! between runs and nothing leaks into the host process.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use hurdle_lang::ast::{ExceptHandler, Expr, FStringPart, FunctionDef, Program, Stmt, StmtKind};

use crate::io::Streams;
use crate::trace::budget::{self, TraceBudget};

use super::builtins;
use super::error::{Exc, ExcType, ExceptionValue, Flow, Halt, StackEntry};
use super::hook::{Event, EventArg, FrameView, HookControl, LineSnapshot, TraceHook};
use super::value::{new_scope, Function, ObjectIds, Scope, Value};

/// Configuration for one interpreter run.
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    pub budget: TraceBudget,
    pub line_snapshot: LineSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Module,
    Function,
    Class,
}

/// Names a function body binds, decided before it runs.
#[derive(Debug, Default)]
pub struct ScopeInfo {
    pub locals: HashSet<String>,
    pub globals: HashSet<String>,
    pub nonlocals: HashSet<String>,
}

impl ScopeInfo {
    pub fn analyze(def: &FunctionDef) -> ScopeInfo {
        let mut info = ScopeInfo::default();
        for param in &def.params {
            info.locals.insert(param.name.clone());
        }
        if let Some(vararg) = &def.vararg {
            info.locals.insert(vararg.clone());
        }
        collect_block(&def.body, &mut info);
        for name in info.globals.iter().chain(info.nonlocals.iter()) {
            info.locals.remove(name);
        }
        info
    }
}

fn collect_block(body: &[Stmt], info: &mut ScopeInfo) {
    for stmt in body {
        collect_stmt(stmt, info);
    }
}

fn collect_target(target: &Expr, info: &mut ScopeInfo) {
    let mut names = Vec::new();
    target.target_names(&mut names);
    info.locals.extend(names);
    collect_walrus(target, info);
}

fn collect_stmt(stmt: &Stmt, info: &mut ScopeInfo) {
    match &stmt.kind {
        StmtKind::Expr(expr) => collect_walrus(expr, info),
        StmtKind::Assign { targets, value } => {
            for target in targets {
                collect_target(target, info);
            }
            collect_walrus(value, info);
        }
        StmtKind::AugAssign { target, value, .. } => {
            collect_target(target, info);
            collect_walrus(value, info);
        }
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            collect_walrus(test, info);
            collect_block(body, info);
            collect_block(orelse, info);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            collect_target(target, info);
            collect_walrus(iter, info);
            collect_block(body, info);
            collect_block(orelse, info);
        }
        StmtKind::FunctionDef(def) => {
            info.locals.insert(def.name.clone());
        }
        StmtKind::ClassDef(def) => {
            info.locals.insert(def.name.clone());
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            collect_block(body, info);
            for ExceptHandler { name, body, .. } in handlers {
                if let Some(name) = name {
                    info.locals.insert(name.clone());
                }
                collect_block(body, info);
            }
            collect_block(orelse, info);
            collect_block(finalbody, info);
        }
        StmtKind::Global(names) => info.globals.extend(names.iter().cloned()),
        StmtKind::Nonlocal(names) => info.nonlocals.extend(names.iter().cloned()),
        StmtKind::Import(aliases) | StmtKind::ImportFrom { names: aliases, .. } => {
            for alias in aliases {
                info.locals.insert(alias.bound_name().to_string());
            }
        }
        StmtKind::Delete(targets) => {
            for target in targets {
                collect_target(target, info);
            }
        }
        StmtKind::Return(Some(expr)) | StmtKind::Raise(Some(expr)) => collect_walrus(expr, info),
        StmtKind::Assert { test, msg } => {
            collect_walrus(test, info);
            if let Some(msg) = msg {
                collect_walrus(msg, info);
            }
        }
        StmtKind::Return(None)
        | StmtKind::Raise(None)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Pass => {}
    }
}

/// Walrus targets bind in the enclosing function, even inside
/// comprehensions.
fn collect_walrus(expr: &Expr, info: &mut ScopeInfo) {
    match expr {
        Expr::Named { name, value } => {
            info.locals.insert(name.clone());
            collect_walrus(value, info);
        }
        Expr::Constant(_) | Expr::Name(_) | Expr::Lambda(_) => {}
        Expr::FString(parts) => {
            for part in parts {
                if let FStringPart::Field { expr, .. } = part {
                    collect_walrus(expr, info);
                }
            }
        }
        Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
            for item in items {
                collect_walrus(item, info);
            }
        }
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                collect_walrus(k, info);
                collect_walrus(v, info);
            }
        }
        Expr::BinOp { left, right, .. } => {
            collect_walrus(left, info);
            collect_walrus(right, info);
        }
        Expr::UnaryOp { operand, .. } | Expr::Starred(operand) => collect_walrus(operand, info),
        Expr::BoolOp { values, .. } => {
            for value in values {
                collect_walrus(value, info);
            }
        }
        Expr::Compare {
            left, comparators, ..
        } => {
            collect_walrus(left, info);
            for c in comparators {
                collect_walrus(c, info);
            }
        }
        Expr::IfExp { test, body, orelse } => {
            collect_walrus(test, info);
            collect_walrus(body, info);
            collect_walrus(orelse, info);
        }
        Expr::Call { func, args } => {
            collect_walrus(func, info);
            for arg in args {
                match arg {
                    hurdle_lang::ast::Arg::Positional(e)
                    | hurdle_lang::ast::Arg::Starred(e)
                    | hurdle_lang::ast::Arg::Keyword(_, e) => collect_walrus(e, info),
                }
            }
        }
        Expr::Attribute { value, .. } => collect_walrus(value, info),
        Expr::Subscript { value, index } => {
            collect_walrus(value, info);
            collect_walrus(index, info);
        }
        Expr::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                collect_walrus(part, info);
            }
        }
        Expr::Comprehension {
            element,
            value,
            generators,
            ..
        } => {
            collect_walrus(element, info);
            if let Some(value) = value {
                collect_walrus(value, info);
            }
            for generator in generators {
                collect_walrus(&generator.iter, info);
                for cond in &generator.ifs {
                    collect_walrus(cond, info);
                }
            }
        }
    }
}

/// One activation on the interpreter's call stack.
pub struct Frame {
    pub name: Rc<str>,
    /// Dotted path used to name functions defined in this frame.
    pub qualname: Rc<str>,
    pub line: u32,
    pub kind: FrameKind,
    pub locals: Scope,
    /// Enclosing function scopes, outermost first.
    pub enclosing: Vec<Scope>,
    pub info: Option<Rc<ScopeInfo>>,
    pub function: Option<Rc<Function>>,
}

/// Tree-walking interpreter for one program run.
pub struct Interpreter<'h> {
    pub(crate) config: InterpreterConfig,
    pub(crate) globals: Scope,
    pub(crate) frames: Vec<Frame>,
    pub(crate) hook: Option<&'h mut dyn TraceHook>,
    pub(crate) streams: Streams,
    pub(crate) ids: Rc<ObjectIds>,
    pub(crate) modules: HashMap<&'static str, Value>,
    /// Exceptions being handled by enclosing `except` blocks, innermost
    /// last; the target of a bare `raise`.
    pub(crate) handling: Vec<Rc<ExceptionValue>>,
    scope_info: HashMap<usize, Rc<ScopeInfo>>,
    deadline: Option<Instant>,
    ticks: u64,
}

impl<'h> Interpreter<'h> {
    /// Creates an interpreter with a fresh global namespace. The run's
    /// deadline starts counting now.
    pub fn new(config: InterpreterConfig) -> Self {
        let deadline = config.budget.deadline_from(Instant::now());
        Interpreter {
            config,
            globals: new_scope(),
            frames: Vec::new(),
            hook: None,
            streams: Streams::default(),
            ids: Rc::new(ObjectIds::new()),
            modules: HashMap::new(),
            handling: Vec::new(),
            scope_info: HashMap::new(),
            deadline,
            ticks: 0,
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    /// Runs a parsed program as the `<module>` frame.
    ///
    /// A program without statements runs no frame and produces no events.
    pub fn run_module(&mut self, program: &Program) -> Result<(), Flow> {
        let Some(first_line) = program.first_line() else {
            return Ok(());
        };
        self.globals
            .borrow_mut()
            .insert("__name__".to_string(), Value::str("__main__"));
        let frame = Frame {
            name: Rc::from("<module>"),
            qualname: Rc::from(""),
            line: first_line,
            kind: FrameKind::Module,
            locals: self.globals.clone(),
            enclosing: Vec::new(),
            info: None,
            function: None,
        };
        self.run_frame(frame, &program.body).map(|_| ())
    }

    /// Pushes `frame`, fires `call`, executes `body` and fires the exit
    /// events. The frame is popped on every path.
    pub(crate) fn run_frame(&mut self, frame: Frame, body: &[Stmt]) -> Result<Value, Flow> {
        self.frames.push(frame);
        let result = match self.emit(Event::Call, EventArg::None) {
            Ok(()) => self.exec_block(body),
            Err(flow) => Err(flow),
        };
        let outcome = self.finish_frame(result);
        self.frames.pop();
        outcome
    }

    fn finish_frame(&mut self, result: Result<(), Flow>) -> Result<Value, Flow> {
        match result {
            Ok(()) | Err(Flow::Break) | Err(Flow::Continue) => {
                self.emit(Event::Return, EventArg::Return(&Value::None))?;
                Ok(Value::None)
            }
            Err(Flow::Return(value)) => {
                self.emit(Event::Return, EventArg::Return(&value))?;
                Ok(value)
            }
            Err(Flow::Raise(raised)) => {
                self.emit(Event::Exception, EventArg::Exception(&raised.exception))?;
                self.emit(Event::Return, EventArg::Return(&Value::None))?;
                Err(Flow::Raise(raised))
            }
            Err(halt @ Flow::Halt(_)) => Err(halt),
        }
    }

    pub(crate) fn frame(&self) -> &Frame {
        // run_module pushes the module frame before any code runs.
        &self.frames[self.frames.len() - 1]
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Current stack, outermost first.
    pub(crate) fn stack_entries(&self) -> Vec<StackEntry> {
        self.frames
            .iter()
            .map(|frame| StackEntry {
                name: frame.name.clone(),
                line: frame.line,
            })
            .collect()
    }

    pub(crate) fn scope_info(&mut self, def: &Arc<FunctionDef>) -> Rc<ScopeInfo> {
        let key = Arc::as_ptr(def) as usize;
        self.scope_info
            .entry(key)
            .or_insert_with(|| Rc::new(ScopeInfo::analyze(def)))
            .clone()
    }

    // -----------------------------------------------------------------------
    // Events and budget
    // -----------------------------------------------------------------------

    /// Delivers an event for the current frame to the installed hook.
    pub(crate) fn emit(&mut self, event: Event, arg: EventArg<'_>) -> Result<(), Flow> {
        let Some(hook) = self.hook.as_mut() else {
            return Ok(());
        };
        let Some(frame) = self.frames.last() else {
            return Ok(());
        };
        let locals = frame.locals.borrow();
        let view = FrameView {
            func_name: &frame.name,
            line: frame.line,
            locals: &locals,
            ids: &self.ids,
        };
        let control = hook.on_event(&view, event, arg);
        drop(locals);
        match control {
            HookControl::Continue => Ok(()),
            HookControl::Halt(halt) => Err(self.halt_here(halt)),
        }
    }

    /// Attaches the current stack to a forced stop.
    pub(crate) fn halt_here(&self, mut halt: Halt) -> Flow {
        if halt.traceback.is_empty() {
            halt.traceback = self.stack_entries();
        }
        Flow::halt(halt)
    }

    /// Marks the start of a statement on `line`.
    pub(crate) fn line_before(&mut self, line: u32) -> Result<(), Flow> {
        self.frame_mut().line = line;
        self.tick()?;
        if self.config.line_snapshot == LineSnapshot::Before {
            self.emit(Event::Line, EventArg::None)?;
        }
        Ok(())
    }

    /// Marks the completion of the statement (or header) on `line`.
    pub(crate) fn line_after(&mut self, line: u32) -> Result<(), Flow> {
        if self.config.line_snapshot == LineSnapshot::After {
            self.frame_mut().line = line;
            self.emit(Event::Line, EventArg::None)?;
        }
        Ok(())
    }

    /// Counts one unit of work and checks the deadline every 256 units.
    pub(crate) fn tick(&mut self) -> Result<(), Flow> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks & 0xFF == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    let halt = budget::timeout_halt(&self.config.budget);
                    return Err(self.halt_here(halt));
                }
            }
        }
        Ok(())
    }

    /// Rejects containers and strings larger than the budget allows.
    pub(crate) fn check_len(&self, len: usize) -> Result<(), Flow> {
        if len > self.config.budget.max_collection_len {
            return Err(self.halt_here(budget::collection_halt(&self.config.budget)));
        }
        Ok(())
    }

    pub(crate) fn write_stdout(&mut self, text: &str) -> Result<(), Flow> {
        self.streams.write(text);
        if self.streams.output_len() > self.config.budget.max_output_bytes {
            return Err(self.halt_here(budget::output_halt(&self.config.budget)));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    pub(crate) fn load_name(&mut self, name: &str) -> Result<Value, Flow> {
        let frame = self.frame();
        match frame.kind {
            FrameKind::Module => {}
            FrameKind::Class => {
                if let Some(value) = frame.locals.borrow().get(name) {
                    return Ok(value.clone());
                }
                if let Some(value) = lookup_enclosing(&frame.enclosing, name) {
                    return Ok(value);
                }
            }
            FrameKind::Function => {
                let info = frame.info.clone().unwrap_or_default();
                if !info.globals.contains(name) {
                    if let Some(value) = frame.locals.borrow().get(name) {
                        return Ok(value.clone());
                    }
                    if info.locals.contains(name) {
                        return Err(Exc::new(
                            ExcType::UnboundLocalError,
                            format!(
                                "cannot access local variable '{name}' where it is not associated with a value"
                            ),
                        )
                        .into());
                    }
                    if let Some(value) = lookup_enclosing(&frame.enclosing, name) {
                        return Ok(value);
                    }
                }
            }
        }
        if let Some(value) = self.globals.borrow().get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name).ok_or_else(|| {
            Exc::new(ExcType::NameError, format!("name '{name}' is not defined")).into()
        })
    }

    /// The scope an assignment to `name` writes into.
    pub(crate) fn target_scope(&self, name: &str) -> Scope {
        let frame = self.frame();
        if let (FrameKind::Function, Some(info)) = (frame.kind, &frame.info) {
            if info.globals.contains(name) {
                return self.globals.clone();
            }
            if info.nonlocals.contains(name) {
                if let Some(scope) = frame
                    .enclosing
                    .iter()
                    .rev()
                    .find(|scope| scope.borrow().contains_key(name))
                {
                    return scope.clone();
                }
            }
        }
        frame.locals.clone()
    }

    pub(crate) fn store_name(&mut self, name: &str, value: Value) {
        let scope = self.target_scope(name);
        scope.borrow_mut().insert(name.to_string(), value);
    }

    pub(crate) fn delete_name(&mut self, name: &str) -> Result<(), Flow> {
        let scope = self.target_scope(name);
        let removed = scope.borrow_mut().shift_remove(name);
        match removed {
            Some(_) => Ok(()),
            None => Err(Exc::new(ExcType::NameError, format!("name '{name}' is not defined")).into()),
        }
    }
}

fn lookup_enclosing(enclosing: &[Scope], name: &str) -> Option<Value> {
    enclosing
        .iter()
        .rev()
        .find_map(|scope| scope.borrow().get(name).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hurdle_lang::parse_program;

    fn info_for(src: &str) -> ScopeInfo {
        let program = parse_program(src).unwrap();
        match &program.body[0].kind {
            StmtKind::FunctionDef(def) => ScopeInfo::analyze(def),
            _ => panic!("expected a function"),
        }
    }

    #[test]
    fn scope_analysis_finds_locals() {
        let info = info_for(
            "def f(a, *rest):\n    b = 1\n    for i, j in x:\n        pass\n    if (n := 3):\n        pass\n    import math\n",
        );
        for name in ["a", "rest", "b", "i", "j", "n", "math"] {
            assert!(info.locals.contains(name), "missing {name}");
        }
        assert!(!info.locals.contains("x"));
    }

    #[test]
    fn global_and_nonlocal_are_not_locals() {
        let info = info_for("def f():\n    global g\n    nonlocal_free = 1\n    g = 2\n");
        assert!(info.globals.contains("g"));
        assert!(!info.locals.contains("g"));
        assert!(info.locals.contains("nonlocal_free"));
    }

    #[test]
    fn nested_function_bodies_are_not_scanned() {
        let info = info_for("def f():\n    def g():\n        inner = 1\n    return g\n");
        assert!(info.locals.contains("g"));
        assert!(!info.locals.contains("inner"));
    }
}
