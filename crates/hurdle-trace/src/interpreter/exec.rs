//! Statement execution.
//!
//! Every statement reports its line through [`Interpreter::line_before`] and
//! [`Interpreter::line_after`]; which of the two emits the `line` event
//! depends on the configured [`LineSnapshot`](super::hook::LineSnapshot).
//! A statement that faults never reaches `line_after`.

use std::rc::Rc;

use hurdle_lang::ast::{BinOp, ClassDef, ExceptHandler, Expr, Stmt, StmtKind};

use super::error::{Exc, ExcType, ExceptionValue, Flow, Raised};
use super::modules;
use super::state::{Frame, FrameKind, Interpreter};
use super::eval::Index;
use super::value::{new_scope, plain_repr, Class, TypeKind, Value};

impl<'h> Interpreter<'h> {
    pub(crate) fn exec_block(&mut self, body: &[Stmt]) -> Result<(), Flow> {
        for stmt in body {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    /// Executes one statement, attaching the current stack to any exception
    /// raised directly by it.
    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<(), Flow> {
        match self.exec_stmt_kind(stmt) {
            Err(Flow::Raise(mut raised)) => {
                if raised.traceback.is_empty() {
                    raised.traceback = self.stack_entries();
                }
                Err(Flow::Raise(raised))
            }
            other => other,
        }
    }

    fn exec_stmt_kind(&mut self, stmt: &Stmt) -> Result<(), Flow> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.line_before(line)?;
                self.eval(expr)?;
                self.line_after(line)
            }
            StmtKind::Assign { targets, value } => {
                self.line_before(line)?;
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
                self.line_after(line)
            }
            StmtKind::AugAssign { target, op, value } => {
                self.line_before(line)?;
                self.aug_assign(target, *op, value)?;
                self.line_after(line)
            }
            StmtKind::If { test, body, orelse } => {
                self.line_before(line)?;
                let test = self.eval(test)?;
                let truth = self.truthy(&test)?;
                self.line_after(line)?;
                if truth {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                }
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    self.line_before(line)?;
                    let test = self.eval(test)?;
                    let truth = self.truthy(&test)?;
                    self.line_after(line)?;
                    if !truth {
                        break;
                    }
                    match self.exec_block(body) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => return Ok(()),
                        Err(flow) => return Err(flow),
                    }
                }
                self.exec_block(orelse)
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.line_before(line)?;
                let iterable = self.eval(iter)?;
                let it = self.make_iter(&iterable)?;
                let mut first = true;
                loop {
                    if !first {
                        self.line_before(line)?;
                    }
                    first = false;
                    let Some(item) = self.iter_next(&it)? else {
                        self.line_after(line)?;
                        break;
                    };
                    self.assign(target, item)?;
                    self.line_after(line)?;
                    match self.exec_block(body) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => return Ok(()),
                        Err(flow) => return Err(flow),
                    }
                }
                self.exec_block(orelse)
            }
            StmtKind::Break => {
                self.line_before(line)?;
                self.line_after(line)?;
                Err(Flow::Break)
            }
            StmtKind::Continue => {
                self.line_before(line)?;
                self.line_after(line)?;
                Err(Flow::Continue)
            }
            StmtKind::Pass => {
                self.line_before(line)?;
                self.line_after(line)
            }
            StmtKind::Return(value) => {
                self.line_before(line)?;
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                self.line_after(line)?;
                Err(Flow::Return(value))
            }
            StmtKind::FunctionDef(def) => {
                self.line_before(line)?;
                let defaults = self.eval_defaults(def)?;
                let func = self.make_function(def, defaults);
                self.store_name(&def.name, Value::Function(func));
                self.line_after(line)
            }
            StmtKind::ClassDef(def) => {
                self.line_before(line)?;
                let class = self.define_class(def)?;
                self.store_name(&def.name, Value::Class(class));
                self.line_after(line)
            }
            StmtKind::Raise(exc) => {
                self.line_before(line)?;
                let exception = match exc {
                    Some(expr) => {
                        let value = self.eval(expr)?;
                        self.to_exception(value)?
                    }
                    None => self.handling.last().cloned().ok_or_else(|| {
                        Exc::new(ExcType::RuntimeError, "No active exception to reraise")
                    })?,
                };
                Err(Flow::raise(exception))
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.line_before(line)?;
                self.line_after(line)?;
                let mut outcome = self.exec_block(body);
                outcome = match outcome {
                    Err(Flow::Raise(raised)) if !handlers.is_empty() => {
                        self.handle_exception(raised, handlers)
                    }
                    Ok(()) => self.exec_block(orelse),
                    other => other,
                };
                if finalbody.is_empty() || matches!(outcome, Err(Flow::Halt(_))) {
                    return outcome;
                }
                self.exec_block(finalbody)?;
                outcome
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) => Ok(()),
            StmtKind::Import(aliases) => {
                self.line_before(line)?;
                for alias in aliases {
                    let module = self.import_module(&alias.name)?;
                    self.store_name(alias.bound_name(), module);
                }
                self.line_after(line)
            }
            StmtKind::ImportFrom { module, names } => {
                self.line_before(line)?;
                let source = self.import_module(module)?;
                for alias in names {
                    let value = match &source {
                        Value::Module(m) => m.attrs.get(alias.name.as_str()).cloned(),
                        _ => None,
                    };
                    let value = value.ok_or_else(|| {
                        Exc::new(
                            ExcType::ImportError,
                            format!(
                                "cannot import name '{}' from '{module}' (unknown location)",
                                alias.name
                            ),
                        )
                    })?;
                    let bound = alias.asname.as_deref().unwrap_or(&alias.name);
                    self.store_name(bound, value);
                }
                self.line_after(line)
            }
            StmtKind::Assert { test, msg } => {
                self.line_before(line)?;
                let value = self.eval(test)?;
                if !self.truthy(&value)? {
                    let args = match msg {
                        Some(msg) => vec![self.eval(msg)?],
                        None => Vec::new(),
                    };
                    return Err(Exc::with_args(ExcType::AssertionError, args).into());
                }
                self.line_after(line)
            }
            StmtKind::Delete(targets) => {
                self.line_before(line)?;
                for target in targets {
                    self.delete(target)?;
                }
                self.line_after(line)
            }
        }
    }

    /// Runs the handler matching `raised`, or re-raises it.
    fn handle_exception(
        &mut self,
        raised: Box<Raised>,
        handlers: &[ExceptHandler],
    ) -> Result<(), Flow> {
        for handler in handlers {
            self.line_before(handler.line)?;
            let matches = match &handler.kind {
                None => true,
                Some(expr) => {
                    let class = self.eval(expr)?;
                    exception_matches(&raised.exception, &class)?
                }
            };
            self.line_after(handler.line)?;
            if !matches {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store_name(name, Value::Exception(raised.exception.clone()));
            }
            self.handling.push(raised.exception.clone());
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                self.target_scope(name).borrow_mut().shift_remove(name);
            }
            return result;
        }
        Err(Flow::Raise(raised))
    }

    /// Converts the operand of `raise` into an exception object.
    fn to_exception(&mut self, value: Value) -> Result<Rc<ExceptionValue>, Flow> {
        match value {
            Value::Exception(exc) => Ok(exc),
            Value::ExcType(ty) => Ok(Rc::new(ExceptionValue::new(ty, Vec::new()))),
            Value::Class(class) if class.exc_base.is_some() => {
                match self.instantiate(&class, Default::default(), Vec::new())? {
                    Value::Exception(exc) => Ok(exc),
                    _ => Err(Exc::type_error("exceptions must derive from BaseException").into()),
                }
            }
            _ => Err(Exc::type_error("exceptions must derive from BaseException").into()),
        }
    }

    fn define_class(&mut self, def: &ClassDef) -> Result<Rc<Class>, Flow> {
        let mut bases = Vec::new();
        let mut exc_base = None;
        for base in &def.bases {
            match self.eval(base)? {
                Value::Class(class) => {
                    exc_base = exc_base.or(class.exc_base);
                    bases.push(class);
                }
                Value::ExcType(ty) => exc_base = exc_base.or(Some(ty)),
                Value::Type(TypeKind::Object) => {}
                other => {
                    return Err(Exc::type_error(format!(
                        "cannot subclass '{}'",
                        plain_repr(&other, &self.ids)
                    ))
                    .into())
                }
            }
        }

        let attrs = new_scope();
        let (qualname, enclosing) = {
            let frame = self.frame();
            let enclosing = match frame.kind {
                FrameKind::Function => {
                    let mut chain = frame.enclosing.clone();
                    chain.push(frame.locals.clone());
                    chain
                }
                _ => frame.enclosing.clone(),
            };
            (format!("{}{}", frame.qualname, def.name), enclosing)
        };
        let frame = Frame {
            name: Rc::from(def.name.as_str()),
            qualname: Rc::from(format!("{qualname}.")),
            line: def.line,
            kind: FrameKind::Class,
            locals: attrs.clone(),
            enclosing,
            info: None,
            function: None,
        };
        self.run_frame(frame, &def.body)?;

        let class = Rc::new(Class {
            name: Rc::from(def.name.as_str()),
            bases,
            exc_base,
            attrs,
        });
        for value in class.attrs.borrow().values() {
            if let Value::Function(func) = value {
                *func.owner.borrow_mut() = Some(Rc::downgrade(&class));
            }
        }
        Ok(class)
    }

    fn import_module(&mut self, name: &str) -> Result<Value, Flow> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        let (key, module) = modules::load(name).ok_or_else(|| {
            Exc::new(
                ExcType::ModuleNotFoundError,
                format!("No module named '{name}'"),
            )
        })?;
        let value = Value::Module(Rc::new(module));
        self.modules.insert(key, value.clone());
        Ok(value)
    }

    /// Binds `value` to an assignment target.
    pub(crate) fn assign(&mut self, target: &Expr, value: Value) -> Result<(), Flow> {
        match target {
            Expr::Name(name) => {
                self.store_name(name, value);
                Ok(())
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let values = match self.collect(&value) {
                    Ok(values) => values,
                    Err(Flow::Raise(raised)) if raised.exception.exc_type == ExcType::TypeError => {
                        return Err(Exc::type_error(format!(
                            "cannot unpack non-iterable {} object",
                            value.type_name()
                        ))
                        .into())
                    }
                    Err(flow) => return Err(flow),
                };
                if let Some(star) = targets.iter().position(|t| matches!(t, Expr::Starred(_))) {
                    return self.assign_starred(targets, star, values);
                }
                if values.len() > targets.len() {
                    return Err(Exc::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    ))
                    .into());
                }
                if values.len() < targets.len() {
                    return Err(Exc::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        values.len()
                    ))
                    .into());
                }
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value)?;
                }
                Ok(())
            }
            Expr::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                self.set_attr(&object, attr, value)
            }
            Expr::Subscript { value: object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                self.set_item(&object, index, value)
            }
            other => Err(Exc::type_error(format!("cannot assign to {}", other.describe())).into()),
        }
    }

    /// Unpacks into `targets` where `targets[star]` is `*name`: the starred
    /// target takes a list of whatever the others leave over.
    fn assign_starred(
        &mut self,
        targets: &[Expr],
        star: usize,
        mut values: Vec<Value>,
    ) -> Result<(), Flow> {
        let fixed = targets.len() - 1;
        if values.len() < fixed {
            return Err(Exc::value_error(format!(
                "not enough values to unpack (expected at least {}, got {})",
                fixed,
                values.len()
            ))
            .into());
        }
        let after = values.split_off(values.len() - (fixed - star));
        let rest = values.split_off(star);
        for (target, value) in targets[..star].iter().zip(values) {
            self.assign(target, value)?;
        }
        if let Expr::Starred(inner) = &targets[star] {
            self.assign(inner, Value::list(rest))?;
        }
        for (target, value) in targets[star + 1..].iter().zip(after) {
            self.assign(target, value)?;
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> Result<(), Flow> {
        match target {
            Expr::Name(name) => {
                let current = self.load_name(name)?;
                let rhs = self.eval(value)?;
                let result = self.inplace_op(op, &current, &rhs)?;
                self.store_name(name, result);
                Ok(())
            }
            Expr::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                let current = self.get_attr(&object, attr)?;
                let rhs = self.eval(value)?;
                let result = self.inplace_op(op, &current, &rhs)?;
                self.set_attr(&object, attr, result)
            }
            Expr::Subscript { value: object, index } => {
                let object = self.eval(object)?;
                let key = match self.eval_index(index)? {
                    Index::Item(key) => key,
                    Index::Slice { .. } => {
                        return Err(Exc::type_error("augmented assignment to a slice is not supported").into())
                    }
                };
                let current = self.get_item(&object, Index::Item(key.clone()))?;
                let rhs = self.eval(value)?;
                let result = self.inplace_op(op, &current, &rhs)?;
                self.set_item(&object, Index::Item(key), result)
            }
            other => Err(Exc::type_error(format!(
                "'{}' is an illegal expression for augmented assignment",
                other.describe()
            ))
            .into()),
        }
    }

    fn delete(&mut self, target: &Expr) -> Result<(), Flow> {
        match target {
            Expr::Name(name) => self.delete_name(name),
            Expr::Tuple(targets) | Expr::List(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
            Expr::Attribute { value, attr } => {
                let object = self.eval(value)?;
                self.del_attr(&object, attr)
            }
            Expr::Subscript { value, index } => {
                let object = self.eval(value)?;
                let index = self.eval_index(index)?;
                self.del_item(&object, index)
            }
            other => Err(Exc::type_error(format!("cannot delete {}", other.describe())).into()),
        }
    }
}

/// Whether an `except` clause naming `class` catches `exception`.
fn exception_matches(exception: &ExceptionValue, class: &Value) -> Result<bool, Flow> {
    match class {
        Value::ExcType(ty) => Ok(exception.exc_type.is_subclass_of(*ty)),
        Value::Class(class) => Ok(exception.is_instance_of_class(class)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(exception, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(Exc::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::value::plain_str;
    use crate::interpreter::InterpreterConfig;
    use hurdle_lang::parse_program;

    /// Runs `source` on a thread with a roomy stack and returns the repr of
    /// each requested global.
    fn run(source: &str, names: &[&str]) -> Result<Vec<String>, String> {
        let source = source.to_string();
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(move || {
                let program = parse_program(&source).map_err(|e| e.to_string())?;
                let mut interp = Interpreter::new(InterpreterConfig::default());
                match interp.run_module(&program) {
                    Ok(()) => {}
                    Err(Flow::Raise(raised)) => {
                        return Err(format!(
                            "{}: {}",
                            raised.exception.type_name(),
                            plain_str(&Value::Exception(raised.exception.clone()), &interp.ids)
                        ))
                    }
                    Err(other) => return Err(format!("{other:?}")),
                }
                let globals = interp.globals().borrow();
                let values: Vec<String> = names
                    .iter()
                    .map(|name| {
                        globals
                            .get(name)
                            .map(|v| plain_repr(v, &interp.ids))
                            .unwrap_or_else(|| "<unbound>".to_string())
                    })
                    .collect();
                Ok(values)
            })
            .map_err(|e| e.to_string())?
            .join()
            .map_err(|_| "interpreter thread panicked".to_string())?
    }

    #[test]
    fn loops_and_else_clauses() {
        let out = run(
            "total = 0\nfor i in range(5):\n    if i == 3:\n        continue\n    total += i\nelse:\n    done = True\nn = 0\nwhile True:\n    n += 1\n    if n > 4:\n        break\n",
            &["total", "done", "n"],
        )
        .unwrap();
        assert_eq!(out, ["7", "True", "5"]);
    }

    #[test]
    fn try_except_finally_order() {
        let out = run(
            "log = []\ntry:\n    log.append('body')\n    {}['missing']\nexcept KeyError as e:\n    log.append('handler')\n    caught = str(e)\nelse:\n    log.append('else')\nfinally:\n    log.append('finally')\n",
            &["log", "caught", "e"],
        )
        .unwrap();
        assert_eq!(out, ["['body', 'handler', 'finally']", "\"'missing'\"", "<unbound>"]);
    }

    #[test]
    fn closures_and_nonlocal() {
        let out = run(
            "def counter():\n    count = 0\n    def bump():\n        nonlocal count\n        count += 1\n        return count\n    return bump\nb = counter()\nb()\nlast = b()\n",
            &["last"],
        )
        .unwrap();
        assert_eq!(out, ["2"]);
    }

    #[test]
    fn unbound_local_is_reported() {
        let err = run("x = 1\ndef f():\n    print(x)\n    x = 2\nf()\n", &[]).unwrap_err();
        assert_eq!(
            err,
            "UnboundLocalError: cannot access local variable 'x' where it is not associated with a value"
        );
    }

    #[test]
    fn classes_inheritance_and_super() {
        let out = run(
            "class Animal:\n    def __init__(self, name):\n        self.name = name\n    def speak(self):\n        return self.name + ' makes a sound'\nclass Dog(Animal):\n    def speak(self):\n        return super().speak() + ' (woof)'\nmsg = Dog('Rex').speak()\n",
            &["msg"],
        )
        .unwrap();
        assert_eq!(out, ["'Rex makes a sound (woof)'"]);
    }

    #[test]
    fn custom_exceptions_are_caught_by_base() {
        let out = run(
            "class AppError(Exception):\n    pass\nclass NotFound(AppError):\n    pass\ntry:\n    raise NotFound('gone')\nexcept AppError as err:\n    text = str(err)\n    kind = type(err).__name__\n",
            &["text", "kind"],
        )
        .unwrap();
        assert_eq!(out, ["'gone'", "'NotFound'"]);
    }

    #[test]
    fn unpacking_errors() {
        let err = run("a, b = [1, 2, 3]\n", &[]).unwrap_err();
        assert_eq!(err, "ValueError: too many values to unpack (expected 2)");
        let err = run("a, b, c = (1, 2)\n", &[]).unwrap_err();
        assert_eq!(err, "ValueError: not enough values to unpack (expected 3, got 2)");
    }

    #[test]
    fn starred_targets_collect_the_rest() {
        let out = run(
            "first, *rest = [1, 2, 3, 4]\n*init, last = (5, 6, 7)\na, *mid, z = 'xy'\npairs = []\nfor k, *vs in [(1, 2, 3), (4,)]:\n    pairs.append((k, vs))\n",
            &["first", "rest", "init", "last", "mid", "pairs"],
        )
        .unwrap();
        assert_eq!(
            out,
            ["1", "[2, 3, 4]", "[5, 6]", "7", "[]", "[(1, [2, 3]), (4, [])]"]
        );
        let err = run("a, *b, c = [1]\n", &[]).unwrap_err();
        assert_eq!(
            err,
            "ValueError: not enough values to unpack (expected at least 2, got 1)"
        );
    }

    #[test]
    fn starred_items_splice_into_displays() {
        let out = run(
            "xs = [1, 2]\nys = [0, *xs, *range(3, 5)]\nt = *xs, 9\nlow = -9223372036854775808\n",
            &["ys", "t", "low"],
        )
        .unwrap();
        assert_eq!(out, ["[0, 1, 2, 3, 4]", "(1, 2, 9)", "-9223372036854775808"]);
    }

    #[test]
    fn comprehension_variables_do_not_leak() {
        let out = run(
            "x = 'outer'\nsquares = [x * x for x in range(4)]\nevens = {x for x in range(6) if x % 2 == 0}\n",
            &["x", "squares", "evens"],
        )
        .unwrap();
        assert_eq!(out, ["'outer'", "[0, 1, 4, 9]", "{0, 2, 4}"]);
    }

    #[test]
    fn recursion_limit_raises_recursion_error() {
        let err = run("def f(n):\n    return f(n + 1)\nf(0)\n", &[]).unwrap_err();
        assert_eq!(err, "RecursionError: maximum recursion depth exceeded");
    }
}
