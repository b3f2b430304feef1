//! Tree-walking evaluator.
//!
//! The global scope holds the built-ins installed by
//! [`intrinsics::install`] and one binding, `args`. Nothing else from the
//! host is reachable. Every statement and expression consumes one step
//! of the budget, and built-ins pay for the bytes and elements they touch
//! (see [`Interpreter::charge`]); user function calls are bounded by the
//! call depth.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use indexmap::IndexMap;

use super::ast::*;
use super::intrinsics::{self, error_object, Native};
use super::value::{array_index, Function, Value};
use crate::compiler::{Callable, Shape};
use crate::config::SandboxConfig;
use crate::procedure::Args;

/// Longest string a script may build, in bytes.
pub(super) const MAX_STRING_LEN: usize = 1 << 24;
/// Longest array a script may build.
pub(super) const MAX_ARRAY_LEN: usize = 1 << 20;
/// Bytes or elements native code may touch per step of the budget.
const WORK_PER_STEP: usize = 256;

/// Abrupt termination of evaluation.
pub enum Fault {
    /// A thrown value; `try/catch` can intercept it.
    Throw(Value),
    /// A limit was hit. Never catchable by the script.
    Halt(String),
}

pub type Eval<T> = Result<T, Fault>;

pub(super) fn type_error(message: impl Into<String>) -> Fault {
    Fault::Throw(error_object("TypeError", message))
}

pub(super) fn range_error(message: impl Into<String>) -> Fault {
    Fault::Throw(error_object("RangeError", message))
}

fn reference_error(name: &str) -> Fault {
    Fault::Throw(error_object("ReferenceError", format!("{name} is not defined")))
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Binding {
    value: Value,
    mutable: bool,
}

pub struct ScopeData {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Scope>,
}

/// Lexical environment; cheap to clone.
#[derive(Clone)]
pub struct Scope(Rc<ScopeData>);

enum AssignError {
    Undeclared,
    Constant,
}

impl Scope {
    pub fn root() -> Self {
        Scope(Rc::new(ScopeData {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        }))
    }

    pub fn child(&self) -> Self {
        Scope(Rc::new(ScopeData {
            vars: RefCell::new(HashMap::new()),
            parent: Some(self.clone()),
        }))
    }

    /// Declares (or re-declares) `name` in this scope.
    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.0
            .vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = self;
        loop {
            if let Some(binding) = current.0.vars.borrow().get(name) {
                return Some(binding.value.clone());
            }
            current = current.0.parent.as_ref()?;
        }
    }

    fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        let mut current = self;
        loop {
            if let Some(binding) = current.0.vars.borrow_mut().get_mut(name) {
                if !binding.mutable {
                    return Err(AssignError::Constant);
                }
                binding.value = value;
                return Ok(());
            }
            current = current.0.parent.as_ref().ok_or(AssignError::Undeclared)?;
        }
    }
}

pub struct Interpreter<'a> {
    config: &'a SandboxConfig,
    steps: u64,
    depth: usize,
    /// Scopes captured by closures. Cleared on drop to break the
    /// scope -> closure -> scope reference cycles.
    captured: Vec<Weak<ScopeData>>,
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        for weak in self.captured.drain(..) {
            let mut next = weak.upgrade();
            while let Some(data) = next {
                let vars = std::mem::take(&mut *data.vars.borrow_mut());
                drop(vars);
                next = data.parent.as_ref().map(|p| p.0.clone());
            }
        }
    }
}

impl<'a> Interpreter<'a> {
    pub fn new(config: &'a SandboxConfig) -> Self {
        Self {
            config,
            steps: 0,
            depth: 0,
            captured: Vec::new(),
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Runs a compiled callable. `args` is deep-copied into the sandbox.
    pub fn run(&mut self, callable: &Callable, args: &Args) -> Eval<Value> {
        let globals = Scope::root();
        intrinsics::install(&globals);
        let args = Value::object(
            args.iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
        );
        globals.declare("args", args.clone(), true);

        match callable.shape() {
            Shape::Function(def) => {
                let function = self.closure(def, &globals);
                self.call(&function, vec![args])
            }
            Shape::Block(stmts) => match self.exec_block(stmts, &globals.child())? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Undefined),
            },
            Shape::Expression(expr) => self.eval(expr, &globals),
        }
    }

    pub(super) fn tick(&mut self) -> Eval<()> {
        self.steps += 1;
        self.check_budget()
    }

    /// Charges native work over `units` bytes or elements. Work below
    /// `WORK_PER_STEP` units is free.
    pub(super) fn charge(&mut self, units: usize) -> Eval<()> {
        let steps = (units / WORK_PER_STEP) as u64;
        if steps == 0 {
            return Ok(());
        }
        self.steps = self.steps.saturating_add(steps);
        self.check_budget()
    }

    fn check_budget(&self) -> Eval<()> {
        if self.steps > self.config.max_steps {
            return Err(Fault::Halt(format!(
                "step budget of {} exceeded",
                self.config.max_steps
            )));
        }
        Ok(())
    }

    // ── Statements ───────────────────────────────────────

    fn exec_block(&mut self, stmts: &[Stmt], scope: &Scope) -> Eval<Flow> {
        // function declarations are visible to the whole block
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let function = self.closure(def, scope);
                    scope.declare(name, function, true);
                }
            }
        }
        for stmt in stmts {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Scope) -> Eval<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Decl { kind, bindings } => {
                for (name, init) in bindings {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    scope.declare(name, value, *kind != DeclKind::Const);
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec(consequent, scope)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { test, body } => {
                while self.eval(test, scope)?.truthy() {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let scope = scope.child();
                if let Some(init) = init {
                    self.exec(init, &scope)?;
                }
                loop {
                    if let Some(test) = test {
                        if !self.eval(test, &scope)?.truthy() {
                            break;
                        }
                    }
                    match self.exec(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
            } => {
                let subject = self.eval(iterable, scope)?;
                let items = self.iterate(&subject)?;
                self.exec_each(*kind, name, items, body, scope)
            }
            Stmt::ForIn {
                kind,
                name,
                object,
                body,
            } => {
                let subject = self.eval(object, scope)?;
                let keys = self
                    .own_keys(&subject)?
                    .into_iter()
                    .map(Value::from)
                    .collect();
                self.exec_each(*kind, name, keys, body, scope)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Block(stmts) => self.exec_block(stmts, &scope.child()),
            Stmt::Throw(expr) => Err(Fault::Throw(self.eval(expr, scope)?)),
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let mut result = self.exec_block(block, &scope.child());
                if let Some(handler) = handler {
                    if let Err(Fault::Throw(thrown)) = result {
                        let catch_scope = scope.child();
                        if let Some(param) = param {
                            catch_scope.declare(param, thrown, true);
                        }
                        result = self.exec_block(handler, &catch_scope);
                    }
                }
                if matches!(result, Err(Fault::Halt(_))) {
                    return result;
                }
                if let Some(finalizer) = finalizer {
                    match self.exec_block(finalizer, &scope.child())? {
                        Flow::Normal => {}
                        abrupt => return Ok(abrupt),
                    }
                }
                result
            }
        }
    }

    /// Body of `for…of` / `for…in`: one fresh binding per item.
    fn exec_each(
        &mut self,
        kind: DeclKind,
        name: &str,
        items: Vec<Value>,
        body: &Stmt,
        scope: &Scope,
    ) -> Eval<Flow> {
        for item in items {
            let iteration = scope.child();
            iteration.declare(name, item, kind != DeclKind::Const);
            match self.exec(body, &iteration)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    /// Items produced by spreading or `for…of` over `value`.
    pub(super) fn iterate(&mut self, value: &Value) -> Eval<Vec<Value>> {
        match value {
            Value::Array(items) => {
                self.charge(items.borrow().len())?;
                Ok(items.borrow().clone())
            }
            Value::String(s) => {
                self.charge(s.len())?;
                Ok(s.chars().map(|c| Value::from(c.to_string())).collect())
            }
            other => Err(type_error(format!("{} is not iterable", other.type_of()))),
        }
    }

    /// [`intrinsics::own_keys`], paid for per key.
    pub(super) fn own_keys(&mut self, value: &Value) -> Eval<Vec<String>> {
        let keys = intrinsics::own_keys(value);
        self.charge(keys.len())?;
        Ok(keys)
    }

    /// `String(value)`, paid for per visited element and output byte.
    pub(super) fn display(&mut self, value: &Value) -> Eval<String> {
        if let Value::String(s) = value {
            self.charge(s.len())?;
            return Ok(s.to_string());
        }
        let rendered = value.render();
        self.charge(rendered.visited.saturating_add(rendered.text.len()))?;
        if rendered.overflow {
            return Err(range_error("Invalid string length"));
        }
        Ok(rendered.text)
    }

    // ── Expressions ──────────────────────────────────────

    pub(super) fn eval(&mut self, expr: &Expr, scope: &Scope) -> Eval<Value> {
        self.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::from(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => {
                            let value = self.eval(expr, scope)?;
                            out.push_str(&self.display(&value)?)
                        }
                    }
                    check_string_len(out.len())?;
                }
                Ok(Value::from(out))
            }
            Expr::Ident(name) => scope.lookup(name).ok_or_else(|| reference_error(name)),
            Expr::Array(elements) => Ok(Value::array(self.eval_elements(elements, scope)?)),
            Expr::Object(props) => self.eval_object(props, scope),
            Expr::Member { .. } | Expr::Call { .. } => {
                Ok(self.eval_chain(expr, scope)?.unwrap_or(Value::Undefined))
            }
            Expr::New { callee, args } => {
                let constructor = self.eval(callee, scope)?;
                let args = self.eval_elements(args, scope)?;
                match &constructor {
                    Value::Function(f) if matches!(**f, Function::Native { .. }) => {
                        self.call(&constructor, args)
                    }
                    _ => Err(type_error(format!("{} is not a constructor", describe(callee)))),
                }
            }
            Expr::Unary { op, expr } => {
                if let (UnaryOp::TypeOf, Expr::Ident(name)) = (op, &**expr) {
                    if scope.lookup(name).is_none() {
                        return Ok(Value::from("undefined"));
                    }
                }
                let value = self.eval(expr, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::from(value.type_of()),
                })
            }
            Expr::Update { op, prefix, target } => self.eval_update(*op, *prefix, target, scope),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Assign { op, target, value } => self.eval_assign(*op, target, value, scope),
            Expr::Function(def) => Ok(self.closure(def, scope)),
            Expr::Await(expr) => self.eval(expr, scope),
        }
    }

    fn closure(&mut self, def: &Arc<FunctionDef>, scope: &Scope) -> Value {
        let weak = Rc::downgrade(&scope.0);
        if !self.captured.last().is_some_and(|last| last.ptr_eq(&weak)) {
            self.captured.push(weak);
        }
        Value::Function(Rc::new(Function::Closure {
            def: def.clone(),
            scope: scope.clone(),
        }))
    }

    fn property_key(&mut self, key: &Key, scope: &Scope) -> Eval<String> {
        match key {
            Key::Named(name) => Ok(name.clone()),
            Key::Computed(expr) => {
                let key = self.eval(expr, scope)?;
                self.display(&key)
            }
        }
    }

    fn eval_elements(&mut self, elements: &[Element], scope: &Scope) -> Eval<Vec<Value>> {
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                Element::Item(expr) => out.push(self.eval(expr, scope)?),
                Element::Spread(expr) => {
                    let value = self.eval(expr, scope)?;
                    out.extend(self.iterate(&value)?);
                }
            }
            check_array_len(out.len())?;
        }
        Ok(out)
    }

    fn eval_object(&mut self, props: &[Property], scope: &Scope) -> Eval<Value> {
        let mut entries = IndexMap::with_capacity(props.len());
        for prop in props {
            match prop {
                Property::Named(key, expr) => {
                    let value = self.eval(expr, scope)?;
                    entries.insert(key.clone(), value);
                }
                Property::Computed(key, expr) => {
                    let key = self.eval(key, scope)?;
                    let key = self.display(&key)?;
                    let value = self.eval(expr, scope)?;
                    entries.insert(key, value);
                }
                Property::Spread(expr) => {
                    let source = self.eval(expr, scope)?;
                    for key in self.own_keys(&source)? {
                        let value = self.get_property(&source, &key)?;
                        entries.insert(key, value);
                    }
                }
            }
        }
        Ok(Value::object(entries))
    }

    /// Member and call chains. `None` once an optional link met a
    /// nullish value; the rest of the chain is skipped.
    fn eval_chain(&mut self, expr: &Expr, scope: &Scope) -> Eval<Option<Value>> {
        match expr {
            Expr::Member {
                object,
                key,
                optional,
            } => {
                let Some(object) = self.eval_chain(object, scope)? else {
                    return Ok(None);
                };
                if *optional && object.is_nullish() {
                    return Ok(None);
                }
                let key = self.property_key(key, scope)?;
                self.get_property(&object, &key).map(Some)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => {
                let Some(function) = self.eval_chain(callee, scope)? else {
                    return Ok(None);
                };
                if *optional && function.is_nullish() {
                    return Ok(None);
                }
                if !matches!(function, Value::Function(_)) {
                    return Err(type_error(format!("{} is not a function", describe(callee))));
                }
                let args = self.eval_elements(args, scope)?;
                self.call(&function, args).map(Some)
            }
            other => self.eval(other, scope).map(Some),
        }
    }

    /// Calls a function value with positional arguments.
    pub(super) fn call(&mut self, function: &Value, args: Vec<Value>) -> Eval<Value> {
        let Value::Function(f) = function else {
            return Err(type_error(format!("{} is not a function", function.type_of())));
        };
        match &**f {
            Function::Native { native, this } => self.call_native(*native, this.clone(), args),
            Function::Closure { def, scope } => {
                if self.depth >= self.config.max_call_depth {
                    return Err(Fault::Halt(format!(
                        "maximum call depth of {} exceeded",
                        self.config.max_call_depth
                    )));
                }
                self.depth += 1;
                let result = self.call_closure(function, def, scope, args);
                self.depth -= 1;
                result
            }
        }
    }

    fn call_closure(
        &mut self,
        function: &Value,
        def: &FunctionDef,
        scope: &Scope,
        args: Vec<Value>,
    ) -> Eval<Value> {
        self.tick()?;
        let local = scope.child();
        if let Some(name) = &def.name {
            local.declare(name, function.clone(), true);
        }

        let mut args = args.into_iter();
        for param in &def.params {
            if param.rest {
                local.declare(&param.name, Value::array(args.by_ref().collect()), true);
                break;
            }
            let mut value = args.next().unwrap_or(Value::Undefined);
            if let (Value::Undefined, Some(default)) = (&value, &param.default) {
                value = self.eval(default, &local)?;
            }
            local.declare(&param.name, value, true);
        }

        match &def.body {
            FunctionBody::Expr(expr) => self.eval(expr, &local),
            FunctionBody::Block(stmts) => match self.exec_block(stmts, &local)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Undefined),
            },
        }
    }

    fn eval_assign(
        &mut self,
        op: AssignOp,
        target: &Expr,
        value: &Expr,
        scope: &Scope,
    ) -> Eval<Value> {
        match target {
            Expr::Ident(name) => {
                let new = match op.binary() {
                    None => self.eval(value, scope)?,
                    Some(bin) => {
                        let old = scope.lookup(name).ok_or_else(|| reference_error(name))?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(bin, &old, &rhs)?
                    }
                };
                self.assign_name(scope, name, new.clone())?;
                Ok(new)
            }
            Expr::Member { object, key, .. } => {
                let object = self.eval(object, scope)?;
                let key = self.property_key(key, scope)?;
                let new = match op.binary() {
                    None => self.eval(value, scope)?,
                    Some(bin) => {
                        let old = self.get_property(&object, &key)?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(bin, &old, &rhs)?
                    }
                };
                self.set_property(&object, &key, new.clone())?;
                Ok(new)
            }
            _ => Err(type_error("invalid assignment target")),
        }
    }

    fn eval_update(
        &mut self,
        op: UpdateOp,
        prefix: bool,
        target: &Expr,
        scope: &Scope,
    ) -> Eval<Value> {
        let delta = match op {
            UpdateOp::Increment => 1.0,
            UpdateOp::Decrement => -1.0,
        };
        let (old, new) = match target {
            Expr::Ident(name) => {
                let old = scope
                    .lookup(name)
                    .ok_or_else(|| reference_error(name))?
                    .to_number();
                self.assign_name(scope, name, Value::Number(old + delta))?;
                (old, old + delta)
            }
            Expr::Member { object, key, .. } => {
                let object = self.eval(object, scope)?;
                let key = self.property_key(key, scope)?;
                let old = self.get_property(&object, &key)?.to_number();
                self.set_property(&object, &key, Value::Number(old + delta))?;
                (old, old + delta)
            }
            _ => return Err(type_error("invalid update target")),
        };
        Ok(Value::Number(if prefix { new } else { old }))
    }

    fn assign_name(&self, scope: &Scope, name: &str, value: Value) -> Eval<()> {
        scope.assign(name, value).map_err(|err| match err {
            AssignError::Undeclared => reference_error(name),
            AssignError::Constant => type_error("Assignment to constant variable."),
        })
    }

    fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> Eval<Value> {
        use std::cmp::Ordering::{Equal, Greater, Less};

        // string operands are compared or copied byte by byte
        let bytes = |v: &Value| match v {
            Value::String(s) => s.len(),
            _ => 0,
        };
        self.charge(bytes(left) + bytes(right))?;

        let num = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
        Ok(match op {
            BinaryOp::Add => {
                let stringy = |v: &Value| {
                    matches!(
                        v,
                        Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Function(_)
                    )
                };
                if stringy(left) || stringy(right) {
                    let mut out = self.display(left)?;
                    out.push_str(&self.display(right)?);
                    check_string_len(out.len())?;
                    Value::from(out)
                } else {
                    num(|a, b| a + b)
                }
            }
            BinaryOp::Sub => num(|a, b| a - b),
            BinaryOp::Mul => num(|a, b| a * b),
            BinaryOp::Div => num(|a, b| a / b),
            BinaryOp::Rem => num(|a, b| a % b),
            BinaryOp::Pow => num(f64::powf),
            BinaryOp::Eq => Value::Bool(self.loose_equals(left, right)?),
            BinaryOp::NotEq => Value::Bool(!self.loose_equals(left, right)?),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
            BinaryOp::Lt => Value::Bool(matches!(left.compare(right), Some(Less))),
            BinaryOp::LtEq => Value::Bool(matches!(left.compare(right), Some(Less | Equal))),
            BinaryOp::Gt => Value::Bool(matches!(left.compare(right), Some(Greater))),
            BinaryOp::GtEq => Value::Bool(matches!(left.compare(right), Some(Greater | Equal))),
            BinaryOp::In => {
                let key = self.display(left)?;
                match right {
                    Value::Object(entries) => Value::Bool(entries.borrow().contains_key(&key)),
                    Value::Array(items) => Value::Bool(
                        key == "length"
                            || array_index(&key).is_some_and(|i| i < items.borrow().len()),
                    ),
                    other => {
                        return Err(type_error(format!(
                            "Cannot use 'in' operator to search for '{key}' in {}",
                            other.to_display()
                        )))
                    }
                }
            }
        })
    }

    /// `==`. An array or object compared with a string or number is
    /// rendered first, which is paid for like any other rendering.
    fn loose_equals(&mut self, left: &Value, right: &Value) -> Eval<bool> {
        let composite = |v: &Value| matches!(v, Value::Array(_) | Value::Object(_));
        let primitive = |v: &Value| matches!(v, Value::String(_) | Value::Number(_));
        if composite(left) && primitive(right) {
            let text = Value::from(self.display(left)?);
            return Ok(text.loose_equals(right));
        }
        if primitive(left) && composite(right) {
            let text = Value::from(self.display(right)?);
            return Ok(left.loose_equals(&text));
        }
        Ok(left.loose_equals(right))
    }

    // ── Properties ───────────────────────────────────────

    pub(super) fn get_property(&mut self, object: &Value, key: &str) -> Eval<Value> {
        let bound = |native: Native| {
            Value::Function(Rc::new(Function::Native {
                native,
                this: object.clone(),
            }))
        };
        match object {
            Value::Undefined | Value::Null => Err(type_error(format!(
                "Cannot read properties of {} (reading '{key}')",
                object.to_display()
            ))),
            Value::String(s) => {
                if key == "length" {
                    self.charge(s.len())?;
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                if let Some(index) = array_index(key) {
                    self.charge(s.len())?;
                    return Ok(s
                        .chars()
                        .nth(index)
                        .map_or(Value::Undefined, |c| Value::from(c.to_string())));
                }
                Ok(intrinsics::string_method(key).map_or(Value::Undefined, bound))
            }
            Value::Array(items) => {
                if key == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                if let Some(index) = array_index(key) {
                    return Ok(items.borrow().get(index).cloned().unwrap_or(Value::Undefined));
                }
                Ok(intrinsics::array_method(key).map_or(Value::Undefined, bound))
            }
            Value::Object(entries) => Ok(entries
                .borrow()
                .get(key)
                .cloned()
                .unwrap_or(Value::Undefined)),
            Value::Number(_) => Ok(intrinsics::number_method(key).map_or(Value::Undefined, bound)),
            Value::Bool(_) | Value::Function(_) => Ok(Value::Undefined),
        }
    }

    fn set_property(&mut self, object: &Value, key: &str, value: Value) -> Eval<()> {
        match object {
            Value::Object(entries) => {
                entries.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                if key == "length" {
                    let len = value.to_number();
                    let mut items = items.borrow_mut();
                    if len < 0.0 || len.fract() != 0.0 || len > MAX_ARRAY_LEN as f64 {
                        return Err(range_error("Invalid array length"));
                    }
                    self.charge(items.len().abs_diff(len as usize))?;
                    items.resize(len as usize, Value::Undefined);
                    return Ok(());
                }
                let Some(index) = array_index(key) else {
                    return Err(type_error(format!("Cannot set property '{key}' on an array")));
                };
                check_array_len(index + 1)?;
                let mut items = items.borrow_mut();
                if index >= items.len() {
                    self.charge(index + 1 - items.len())?;
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                Ok(())
            }
            Value::Undefined | Value::Null => Err(type_error(format!(
                "Cannot set properties of {} (setting '{key}')",
                object.to_display()
            ))),
            other => Err(type_error(format!(
                "Cannot create property '{key}' on {}",
                other.type_of()
            ))),
        }
    }
}

pub(super) fn check_string_len(len: usize) -> Eval<()> {
    if len > MAX_STRING_LEN {
        return Err(range_error("Invalid string length"));
    }
    Ok(())
}

pub(super) fn check_array_len(len: usize) -> Eval<()> {
    if len > MAX_ARRAY_LEN {
        return Err(range_error("Invalid array length"));
    }
    Ok(())
}

/// Short source-like rendering of a callee for error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member {
            object,
            key: Key::Named(name),
            ..
        } => format!("{}.{name}", describe(object)),
        Expr::Member { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}
