use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io;
use std::rc::Rc;

use crate::ast::Stmt;
use crate::interpreter::{exec_stmt, Flow, RuntimeError};

pub const STR_METHOD: &str = "__str__";
pub const EQ_METHOD: &str = "__eq__";
pub const LESS_METHOD: &str = "__lt__";

/// A name-to-value mapping. The same shape serves the globals of a program,
/// the locals of a method invocation, and the fields of an instance; the
/// three never alias.
pub type Closure = HashMap<String, ObjectHolder>;

/// Where `print` and `__str__`-driven printing send their bytes.
pub trait Context {
    fn output(&mut self) -> &mut dyn io::Write;
}

/// Wraps an externally supplied stream.
pub struct SimpleContext<'a> {
    output: &'a mut dyn io::Write,
}

impl<'a> SimpleContext<'a> {
    pub fn new(output: &'a mut dyn io::Write) -> Self {
        SimpleContext { output }
    }
}

impl Context for SimpleContext<'_> {
    fn output(&mut self) -> &mut dyn io::Write {
        self.output
    }
}

/// Context buffering all output for later inspection. Used by tests.
#[derive(Default)]
pub struct TestContext {
    output: Vec<u8>,
}

impl TestContext {
    pub fn new() -> Self {
        TestContext::default()
    }

    pub fn output_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

impl Context for TestContext {
    fn output(&mut self) -> &mut dyn io::Write {
        &mut self.output
    }
}

/// A method owned by a class. The body is always wrapped in
/// `Stmt::MethodBody` so a `return` anywhere inside is observed exactly at
/// the method boundary.
#[derive(Debug)]
pub struct Method {
    pub name: String,
    pub formal_params: Vec<String>,
    pub body: Stmt,
}

impl Method {
    pub fn new(name: impl Into<String>, formal_params: Vec<String>, body: Stmt) -> Self {
        Method {
            name: name.into(),
            formal_params,
            body: Stmt::MethodBody(Box::new(body)),
        }
    }
}

/// A class descriptor: name, methods, optional base class, and an index over
/// the class's own methods. Methods are never added after construction.
#[derive(Debug)]
pub struct Class {
    name: String,
    methods: Vec<Method>,
    parent: Option<Rc<Class>>,
    index: HashMap<String, usize>,
}

impl Class {
    pub fn new(name: impl Into<String>, methods: Vec<Method>, parent: Option<Rc<Class>>) -> Rc<Self> {
        let mut index = HashMap::with_capacity(methods.len());
        for (i, method) in methods.iter().enumerate() {
            index.insert(method.name.clone(), i);
        }
        Rc::new(Class { name: name.into(), methods, parent, index })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First match wins along the parent chain, starting from this class.
    pub fn get_method(&self, name: &str) -> Option<&Method> {
        if let Some(&i) = self.index.get(name) {
            return Some(&self.methods[i]);
        }
        self.parent.as_deref().and_then(|p| p.get_method(name))
    }

    pub fn has_method(&self, name: &str, argument_count: usize) -> bool {
        self.get_method(name)
            .is_some_and(|m| m.formal_params.len() == argument_count)
    }
}

/// An instance pairs a reference to its class with an owned closure of
/// fields. The fields are behind a `RefCell` so every holder sharing the
/// instance observes mutation.
#[derive(Debug)]
pub struct ClassInstance {
    class: Rc<Class>,
    fields: RefCell<Closure>,
}

impl ClassInstance {
    pub fn new(class: Rc<Class>) -> Self {
        ClassInstance { class, fields: RefCell::new(Closure::new()) }
    }

    pub fn class(&self) -> &Class {
        &self.class
    }

    pub fn fields(&self) -> Ref<'_, Closure> {
        self.fields.borrow()
    }

    pub fn fields_mut(&self) -> RefMut<'_, Closure> {
        self.fields.borrow_mut()
    }
}

#[derive(Debug)]
pub enum Object {
    Number(i64),
    String(String),
    Bool(bool),
    Class(Rc<Class>),
    Instance(ClassInstance),
}

/// The universal handle to a runtime value. The empty holder is the one and
/// only representation of `None`. Cloning a holder shares the value.
#[derive(Debug, Clone, Default)]
pub struct ObjectHolder(Option<Rc<Object>>);

impl ObjectHolder {
    pub fn own(object: Object) -> Self {
        ObjectHolder(Some(Rc::new(object)))
    }

    pub fn none() -> Self {
        ObjectHolder(None)
    }

    pub fn number(value: i64) -> Self {
        Self::own(Object::Number(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::own(Object::String(value.into()))
    }

    pub fn boolean(value: bool) -> Self {
        Self::own(Object::Bool(value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn get(&self) -> Option<&Object> {
        self.0.as_deref()
    }

    pub fn as_number(&self) -> Option<i64> {
        match self.get() {
            Some(Object::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self.get() {
            Some(Object::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.get() {
            Some(Object::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Rc<Class>> {
        match self.get() {
            Some(Object::Class(c)) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ClassInstance> {
        match self.get() {
            Some(Object::Instance(i)) => Some(i),
            _ => None,
        }
    }

    pub fn has_method(&self, method: &str, argument_count: usize) -> bool {
        self.as_instance()
            .is_some_and(|i| i.class.has_method(method, argument_count))
    }

    /// Invokes `method` on the held instance. The locals of the call are a
    /// fresh closure holding `self` and the formal parameters; the caller's
    /// scope is never visible inside the body.
    pub fn call_method(
        &self,
        method: &str,
        actual_args: Vec<ObjectHolder>,
        context: &mut dyn Context,
    ) -> Result<ObjectHolder, RuntimeError> {
        let instance = self.as_instance().ok_or_else(|| {
            RuntimeError::new(
                "MY-R002",
                format!("{method} called on a value that is not a class instance"),
            )
        })?;
        let found = instance.class.get_method(method);
        let m = match found {
            Some(m) if m.formal_params.len() == actual_args.len() => m,
            _ => {
                return Err(RuntimeError::new(
                    "MY-R004",
                    format!(
                        "class {} has no method {method} taking {} arguments",
                        instance.class.name(),
                        actual_args.len()
                    ),
                ))
            }
        };

        let mut locals = Closure::new();
        locals.insert("self".to_string(), self.clone());
        for (param, arg) in m.formal_params.iter().zip(actual_args) {
            locals.insert(param.clone(), arg);
        }
        match exec_stmt(&m.body, &mut locals, context) {
            Ok(result) => Ok(result),
            Err(Flow::Return(_)) => {
                Err(RuntimeError::new("MY-R009", "return escaped a method body"))
            }
            Err(Flow::Error(e)) => Err(e),
        }
    }

    /// Renders the value into `buf` the way `print` shows it. The empty
    /// holder renders as the literal `None`.
    pub fn print_into(
        &self,
        buf: &mut String,
        context: &mut dyn Context,
    ) -> Result<(), RuntimeError> {
        match self.get() {
            None => buf.push_str("None"),
            Some(Object::Number(n)) => {
                let _ = write!(buf, "{n}");
            }
            Some(Object::String(s)) => buf.push_str(s),
            Some(Object::Bool(b)) => buf.push_str(if *b { "True" } else { "False" }),
            Some(Object::Class(c)) => {
                let _ = write!(buf, "Class {}", c.name());
            }
            Some(Object::Instance(instance)) => {
                if instance.class.has_method(STR_METHOD, 0) {
                    let shown = self.call_method(STR_METHOD, Vec::new(), context)?;
                    shown.print_into(buf, context)?;
                } else {
                    let _ = write!(
                        buf,
                        "<{} at {:p}>",
                        instance.class.name(),
                        instance as *const ClassInstance
                    );
                }
            }
        }
        Ok(())
    }
}

/// Truthiness. Total over every holder; never fails.
pub fn is_true(object: &ObjectHolder) -> bool {
    match object.get() {
        Some(Object::Bool(b)) => *b,
        Some(Object::Number(n)) => *n != 0,
        Some(Object::String(s)) => !s.is_empty(),
        _ => false,
    }
}

/// Equality. An instance on the left with `__eq__/1` decides the answer
/// itself; otherwise like-typed numbers, strings and bools compare natively,
/// and two empty holders are equal. Everything else cannot be compared.
pub fn equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    if lhs.has_method(EQ_METHOD, 1) {
        let verdict = lhs.call_method(EQ_METHOD, vec![rhs.clone()], context)?;
        return Ok(is_true(&verdict));
    }
    match (lhs.get(), rhs.get()) {
        (Some(Object::Number(a)), Some(Object::Number(b))) => Ok(a == b),
        (Some(Object::String(a)), Some(Object::String(b))) => Ok(a == b),
        (Some(Object::Bool(a)), Some(Object::Bool(b))) => Ok(a == b),
        (None, None) => Ok(true),
        _ => Err(RuntimeError::new(
            "MY-R007",
            "cannot compare these values for equality",
        )),
    }
}

/// Ordering. An instance on the left with `__lt__/1` decides; otherwise
/// like-typed numbers, strings and bools compare with `<`.
pub fn less(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    if lhs.has_method(LESS_METHOD, 1) {
        let verdict = lhs.call_method(LESS_METHOD, vec![rhs.clone()], context)?;
        return Ok(is_true(&verdict));
    }
    match (lhs.get(), rhs.get()) {
        (Some(Object::Number(a)), Some(Object::Number(b))) => Ok(a < b),
        (Some(Object::String(a)), Some(Object::String(b))) => Ok(a < b),
        (Some(Object::Bool(a)), Some(Object::Bool(b))) => Ok(a < b),
        _ => Err(RuntimeError::new(
            "MY-R007",
            "cannot compare these values for ordering",
        )),
    }
}

pub fn not_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!equal(lhs, rhs, context)?)
}

pub fn greater(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!(less(lhs, rhs, context)? || equal(lhs, rhs, context)?))
}

pub fn less_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!greater(lhs, rhs, context)?)
}

pub fn greater_or_equal(
    lhs: &ObjectHolder,
    rhs: &ObjectHolder,
    context: &mut dyn Context,
) -> Result<bool, RuntimeError> {
    Ok(!less(lhs, rhs, context)?)
}
