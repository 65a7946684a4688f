//! Calls, argument binding, instantiation and attribute access.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use hurdle_lang::ast::FunctionDef;
use indexmap::IndexMap;
use smallvec::smallvec;

use super::builtins;
use super::error::{Exc, ExcType, ExceptionValue, Flow};
use super::methods;
use super::state::{Frame, FrameKind, Interpreter};
use super::value::{
    to_text, Args, BoundMethod, Builtin, Class, Function, Instance, Kwargs, Method, ObjectIds,
    Scope, SuperProxy, TextHook, TextKind, Value,
};

impl<'h> Interpreter<'h> {
    /// Calls any callable value.
    pub(crate) fn call_value(&mut self, callee: &Value, args: Args, kwargs: Kwargs) -> Result<Value, Flow> {
        match callee {
            Value::Function(func) => self.call_function(func, args, kwargs),
            Value::BoundMethod(bound) => match &bound.method {
                Method::User(func) => {
                    let mut full = Args::with_capacity(args.len() + 1);
                    full.push(bound.receiver.clone());
                    full.extend(args);
                    self.call_function(func, full, kwargs)
                }
                Method::Native(name) => {
                    let name = name.clone();
                    self.call_native_method(&bound.receiver, &name, args, kwargs)
                }
            },
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, kwargs),
            Value::Type(kind) => self.construct(*kind, args, kwargs),
            Value::Class(class) => self.instantiate(class, args, kwargs),
            Value::ExcType(ty) => {
                if !kwargs.is_empty() {
                    return Err(Exc::type_error(format!(
                        "{}() takes no keyword arguments",
                        ty.name()
                    ))
                    .into());
                }
                Ok(Value::Exception(Rc::new(ExceptionValue::new(*ty, args.into_vec()))))
            }
            Value::Instance(_) => match self.user_dunder(callee, "__call__") {
                Some(func) => {
                    let mut full = Args::with_capacity(args.len() + 1);
                    full.push(callee.clone());
                    full.extend(args);
                    self.call_function(&func, full, kwargs)
                }
                None => Err(not_callable(callee).into()),
            },
            other => Err(not_callable(other).into()),
        }
    }

    /// Runs a user function in a new frame.
    pub(crate) fn call_function(&mut self, func: &Rc<Function>, args: Args, kwargs: Kwargs) -> Result<Value, Flow> {
        if self.frames.len() >= self.config.budget.max_recursion_depth {
            return Err(Exc::new(ExcType::RecursionError, "maximum recursion depth exceeded").into());
        }
        let locals = bind_arguments(func, args, kwargs)?;
        let info = self.scope_info(&func.def);
        let def = func.def.clone();
        let frame = Frame {
            name: Rc::from(def.name.as_str()),
            qualname: Rc::from(format!("{}.<locals>.", func.qualname)),
            line: def.line,
            kind: FrameKind::Function,
            locals,
            enclosing: func.enclosing.clone(),
            info: Some(info),
            function: Some(func.clone()),
        };
        self.run_frame(frame, &def.body)
    }

    /// Looks up `name` on `receiver` and calls it.
    pub(crate) fn call_method(&mut self, receiver: &Value, name: &str, args: Args) -> Result<Value, Flow> {
        let method = self.get_attr(receiver, name)?;
        self.call_value(&method, args, Vec::new())
    }

    /// `Class(args)`.
    pub(crate) fn instantiate(&mut self, class: &Rc<Class>, args: Args, kwargs: Kwargs) -> Result<Value, Flow> {
        if let Some(exc_type) = class.exc_base {
            let exc = ExceptionValue::of_class(class.clone(), exc_type, args.to_vec());
            let value = Value::Exception(Rc::new(exc));
            match class.lookup("__init__") {
                Some(Value::Function(init)) => {
                    let mut full = Args::with_capacity(args.len() + 1);
                    full.push(value.clone());
                    full.extend(args);
                    self.call_function(&init, full, kwargs)?;
                }
                _ if !kwargs.is_empty() => {
                    return Err(Exc::type_error(format!(
                        "{}() takes no keyword arguments",
                        class.name
                    ))
                    .into());
                }
                _ => {}
            }
            return Ok(value);
        }

        let instance = Value::Instance(Rc::new(Instance {
            class: class.clone(),
            attrs: RefCell::new(IndexMap::new()),
        }));
        match class.lookup("__init__") {
            Some(init) => {
                let mut full = Args::with_capacity(args.len() + 1);
                full.push(instance.clone());
                full.extend(args);
                let result = match &init {
                    Value::Function(func) => self.call_function(func, full, kwargs)?,
                    other => self.call_value(other, full, kwargs)?,
                };
                if !result.is_none() {
                    return Err(Exc::type_error(format!(
                        "__init__() should return None, not '{}'",
                        result.type_name()
                    ))
                    .into());
                }
            }
            None => {
                if !args.is_empty() || !kwargs.is_empty() {
                    return Err(Exc::type_error(format!("{}() takes no arguments", class.name)).into());
                }
            }
        }
        Ok(instance)
    }

    /// Creates a function object closing over the current frame.
    pub(crate) fn make_function(
        &mut self,
        def: &Arc<FunctionDef>,
        defaults: Vec<Option<Value>>,
    ) -> Rc<Function> {
        let frame = self.frame();
        let enclosing = match frame.kind {
            FrameKind::Function => {
                let mut chain = frame.enclosing.clone();
                chain.push(frame.locals.clone());
                chain
            }
            FrameKind::Class => frame.enclosing.clone(),
            FrameKind::Module => Vec::new(),
        };
        Rc::new(Function {
            def: def.clone(),
            qualname: Rc::from(format!("{}{}", frame.qualname, def.name)),
            defaults,
            globals: self.globals.clone(),
            enclosing,
            owner: RefCell::new(None),
        })
    }

    /// Zero- or two-argument `super()`.
    pub(crate) fn make_super(&mut self, args: Args) -> Result<Value, Flow> {
        let (class, receiver) = match args.as_slice() {
            [Value::Class(class), receiver] => (class.clone(), receiver.clone()),
            [] => {
                let frame = self.frame();
                let no_args = || Exc::new(ExcType::RuntimeError, "super(): no arguments");
                let func = frame.function.clone().ok_or_else(no_args)?;
                let owner = func
                    .owner
                    .borrow()
                    .as_ref()
                    .and_then(Weak::upgrade)
                    .ok_or_else(|| Exc::new(ExcType::RuntimeError, "super(): __class__ cell not found"))?;
                let first = func.def.params.first().ok_or_else(no_args)?;
                let receiver = frame
                    .locals
                    .borrow()
                    .get(&first.name)
                    .cloned()
                    .ok_or_else(no_args)?;
                (owner, receiver)
            }
            _ => {
                return Err(Exc::type_error("super() argument 1 must be a type").into());
            }
        };
        Ok(Value::Super(Rc::new(SuperProxy { class, receiver })))
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    pub(crate) fn get_attr(&mut self, value: &Value, name: &str) -> Result<Value, Flow> {
        if name == "__class__" {
            return Ok(builtins::type_of(value));
        }
        match value {
            Value::Instance(inst) => {
                if let Some(found) = inst.attrs.borrow().get(name) {
                    return Ok(found.clone());
                }
                if let Some(found) = inst.class.lookup(name) {
                    return Ok(bind(value, found));
                }
                if let Some(func) = self.user_dunder(value, "__getattr__") {
                    return self.call_function(&func, smallvec![value.clone(), Value::str(name)], Vec::new());
                }
                if let Some(method) = methods::object_method(name) {
                    return Ok(native(value, method));
                }
            }
            Value::Class(class) => {
                match name {
                    "__name__" | "__qualname__" => return Ok(Value::Str(class.name.clone())),
                    _ => {}
                }
                if let Some(found) = class.lookup(name) {
                    return Ok(found);
                }
                return Err(Exc::new(
                    ExcType::AttributeError,
                    format!("type object '{}' has no attribute '{name}'", class.name),
                )
                .into());
            }
            Value::Exception(exc) => {
                if name == "args" {
                    return Ok(Value::tuple(exc.args.borrow().clone()));
                }
                if let Some(found) = exc.attrs.borrow().get(name) {
                    return Ok(found.clone());
                }
                if let Some(found) = exc.class.as_ref().and_then(|class| class.lookup(name)) {
                    return Ok(bind(value, found));
                }
                if let Some(method) = methods::object_method(name) {
                    return Ok(native(value, method));
                }
            }
            Value::Module(module) => {
                return module.attrs.get(name).cloned().ok_or_else(|| {
                    Exc::new(
                        ExcType::AttributeError,
                        format!("module '{}' has no attribute '{name}'", module.name),
                    )
                    .into()
                });
            }
            Value::Function(func) => match name {
                "__name__" => return Ok(Value::str(func.name())),
                "__qualname__" => return Ok(Value::Str(func.qualname.clone())),
                _ => {}
            },
            Value::Super(proxy) => {
                let class = match &proxy.receiver {
                    Value::Instance(inst) => Some(inst.class.clone()),
                    Value::Exception(exc) => exc.class.clone(),
                    Value::Class(class) => Some(class.clone()),
                    _ => None,
                };
                if let Some(found) = class.and_then(|class| class.lookup_after(&proxy.class, name)) {
                    return Ok(bind(&proxy.receiver, found));
                }
                if let Some(method) = methods::object_method(name) {
                    return Ok(native(&proxy.receiver, method));
                }
                return Err(Exc::new(
                    ExcType::AttributeError,
                    format!("'super' object has no attribute '{name}'"),
                )
                .into());
            }
            Value::Type(kind) => {
                if name == "__name__" {
                    return Ok(Value::str(kind.name()));
                }
                if let Some(method) = methods::type_method(*kind, name) {
                    return Ok(Value::Builtin(Builtin {
                        module: Some(kind.name()),
                        name: method,
                    }));
                }
                return Err(Exc::new(
                    ExcType::AttributeError,
                    format!("type object '{}' has no attribute '{name}'", kind.name()),
                )
                .into());
            }
            Value::ExcType(ty) if name == "__name__" => return Ok(Value::str(ty.name())),
            Value::Builtin(builtin) if name == "__name__" => return Ok(Value::str(builtin.name)),
            _ => {}
        }
        if let Some(method) = methods::method_name(value, name) {
            return Ok(native(value, method));
        }
        Err(no_attribute(value, name).into())
    }

    pub(crate) fn set_attr(&mut self, target: &Value, name: &str, value: Value) -> Result<(), Flow> {
        match target {
            Value::Instance(inst) => {
                inst.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Exception(exc) if name == "args" => {
                let args = self.collect(&value)?;
                *exc.args.borrow_mut() = args;
                Ok(())
            }
            Value::Exception(exc) => {
                exc.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(no_attribute(other, name).into()),
        }
    }

    pub(crate) fn del_attr(&mut self, target: &Value, name: &str) -> Result<(), Flow> {
        let removed = match target {
            Value::Instance(inst) => inst.attrs.borrow_mut().shift_remove(name),
            Value::Class(class) => class.attrs.borrow_mut().shift_remove(name),
            Value::Exception(exc) => exc.attrs.borrow_mut().shift_remove(name),
            _ => None,
        };
        match removed {
            Some(_) => Ok(()),
            None => Err(no_attribute(target, name).into()),
        }
    }

    // -----------------------------------------------------------------------
    // Text
    // -----------------------------------------------------------------------

    /// `repr(value)`, running user `__repr__` methods.
    pub(crate) fn repr_of(&mut self, value: &Value) -> Result<String, Flow> {
        to_text(self, value, TextKind::Repr)
    }

    /// `str(value)`, running user `__str__` methods.
    pub(crate) fn str_of(&mut self, value: &Value) -> Result<String, Flow> {
        to_text(self, value, TextKind::Str)
    }
}

impl TextHook for Interpreter<'_> {
    fn ids(&self) -> &ObjectIds {
        &self.ids
    }

    fn user_text(&mut self, value: &Value, kind: TextKind) -> Result<Option<String>, Flow> {
        let candidates: &[&str] = match (value, kind) {
            (Value::Exception(_), TextKind::Str) => &["__str__"],
            (_, TextKind::Str) => &["__str__", "__repr__"],
            (_, TextKind::Repr) => &["__repr__"],
        };
        for name in candidates {
            let Some(func) = self.user_dunder(value, name) else {
                continue;
            };
            return match self.call_function(&func, smallvec![value.clone()], Vec::new())? {
                Value::Str(text) => Ok(Some(text.to_string())),
                other => Err(Exc::type_error(format!(
                    "{name} returned non-string (type {})",
                    other.type_name()
                ))
                .into()),
            };
        }
        Ok(None)
    }
}

fn bind(receiver: &Value, found: Value) -> Value {
    match found {
        Value::Function(func) => Value::BoundMethod(Rc::new(BoundMethod {
            receiver: receiver.clone(),
            method: Method::User(func),
        })),
        other => other,
    }
}

fn native(receiver: &Value, name: &str) -> Value {
    Value::BoundMethod(Rc::new(BoundMethod {
        receiver: receiver.clone(),
        method: Method::Native(Rc::from(name)),
    }))
}

fn not_callable(value: &Value) -> Exc {
    Exc::type_error(format!("'{}' object is not callable", value.type_name()))
}

pub(crate) fn no_attribute(value: &Value, name: &str) -> Exc {
    Exc::new(
        ExcType::AttributeError,
        format!("'{}' object has no attribute '{name}'", value.type_name()),
    )
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Quoted, human-joined names: `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`.
fn join_names(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{first} and {second}"),
        [rest @ .., last] => format!("{}, and {last}", rest.join(", ")),
    }
}

/// Matches call arguments to parameters, producing the new frame's locals.
fn bind_arguments(func: &Function, args: Args, kwargs: Kwargs) -> Result<Scope, Exc> {
    let params = &func.def.params;
    let name = &func.qualname;
    let given = args.len();
    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    let mut surplus = Vec::new();
    for (i, value) in args.into_iter().enumerate() {
        match slots.get_mut(i) {
            Some(slot) => *slot = Some(value),
            None => surplus.push(value),
        }
    }
    if !surplus.is_empty() && func.def.vararg.is_none() {
        let required = func.defaults.iter().filter(|d| d.is_none()).count();
        let takes = if required == params.len() {
            format!("{} positional argument{}", params.len(), plural(params.len()))
        } else {
            format!("from {required} to {} positional arguments", params.len())
        };
        let verb = if given == 1 { "was" } else { "were" };
        return Err(Exc::type_error(format!(
            "{name}() takes {takes} but {given} {verb} given"
        )));
    }
    for (key, value) in kwargs {
        match params.iter().position(|p| p.name == key) {
            Some(i) if slots[i].is_some() => {
                return Err(Exc::type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                )))
            }
            Some(i) => slots[i] = Some(value),
            None => {
                return Err(Exc::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )))
            }
        }
    }
    let mut missing = Vec::new();
    for (i, slot) in slots.iter_mut().enumerate() {
        if slot.is_none() {
            match func.defaults.get(i).cloned().flatten() {
                Some(default) => *slot = Some(default),
                None => missing.push(params[i].name.clone()),
            }
        }
    }
    if !missing.is_empty() {
        return Err(Exc::type_error(format!(
            "{name}() missing {} required positional argument{}: {}",
            missing.len(),
            plural(missing.len()),
            join_names(&missing)
        )));
    }

    let mut locals = IndexMap::with_capacity(params.len() + 1);
    for (param, slot) in params.iter().zip(slots) {
        if let Some(value) = slot {
            locals.insert(param.name.clone(), value);
        }
    }
    if let Some(vararg) = &func.def.vararg {
        locals.insert(vararg.clone(), Value::tuple(surplus));
    }
    Ok(Rc::new(RefCell::new(locals)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_join_like_the_reference_messages() {
        let names = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(join_names(&names(&["a"])), "'a'");
        assert_eq!(join_names(&names(&["a", "b"])), "'a' and 'b'");
        assert_eq!(join_names(&names(&["a", "b", "c"])), "'a', 'b', and 'c'");
    }
}
