//! Runtime values of the sandbox interpreter and their conversions.
//!
//! Values are single-threaded (`Rc`/`RefCell`) and never leave the
//! sandbox thread: arguments come in and results go out as
//! `serde_json::Value`.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Number;

use super::ast::FunctionDef;
use super::interpreter::{Scope, MAX_ARRAY_LEN, MAX_STRING_LEN};
use super::intrinsics::Native;

pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Nesting depth followed by conversions. Deeper arrays render as
/// empty text and fail JSON conversion.
const MAX_DEPTH: usize = 128;

/// Elements a single conversion may visit.
const MAX_VISITS: usize = MAX_ARRAY_LEN;

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Function>),
}

pub enum Function {
    Closure {
        def: Arc<FunctionDef>,
        scope: Scope,
    },
    /// Built-in, optionally bound to the receiver it was read from.
    Native { native: Native, this: Value },
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Function(_) => f.write_str("[function]"),
            other => f.write_str(&other.to_display()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn native(native: Native) -> Self {
        Value::Function(Rc::new(Function::Native {
            native,
            this: Value::Undefined,
        }))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Array(items) => array_to_number(items),
            Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// String conversion as used by `+`, templates and `String(v)`.
    /// Bounded: see [`Value::render`].
    pub fn to_display(&self) -> String {
        self.render().text
    }

    /// String conversion that also reports the work it did. Arrays
    /// already being rendered (cycles) and arrays nested deeper than
    /// `MAX_DEPTH` render as empty text. The walk stops once the text
    /// outgrows `MAX_STRING_LEN` or more than `MAX_VISITS` elements were
    /// visited; `overflow` is then set and the text is incomplete.
    pub fn render(&self) -> Rendered {
        let mut render = Render::default();
        render.value(self);
        Rendered {
            text: render.out,
            visited: render.visited,
            overflow: render.overflow,
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `===`, except that `NaN` equals itself (used by `includes`).
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            // the composite side compares as its text
            (Value::Array(_) | Value::Object(_), Value::String(_) | Value::Number(_)) => {
                Value::from(self.to_display()).loose_equals(other)
            }
            (Value::String(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
                self.loose_equals(&Value::from(other.to_display()))
            }
            _ => self.strict_equals(other),
        }
    }

    /// Relational comparison; `None` when either side is `NaN`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if let (Value::String(a), Value::String(b)) = (self, other) {
            return Some(a.cmp(b));
        }
        self.to_number().partial_cmp(&other.to_number())
    }

    /// Deep copy of a JSON value. The result shares nothing with the
    /// caller's data.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// JSON form of a value, following `JSON.stringify`: `undefined` and
    /// functions become `null` (or are skipped as object members),
    /// non-finite numbers become `null`.
    pub fn to_json(&self) -> Result<serde_json::Value, String> {
        self.to_json_counted().map(|(json, _)| json)
    }

    /// [`Value::to_json`] plus the number of nested values visited.
    /// Cycles, nesting past `MAX_DEPTH` and more than `MAX_VISITS`
    /// nested values are errors.
    pub fn to_json_counted(&self) -> Result<(serde_json::Value, usize), String> {
        let mut walk = JsonWalk::default();
        let json = walk.value(self)?;
        Ok((json, walk.visited))
    }
}

/// Result of [`Value::render`].
pub struct Rendered {
    pub text: String,
    /// Array elements visited.
    pub visited: usize,
    pub overflow: bool,
}

#[derive(Default)]
struct Render {
    out: String,
    visited: usize,
    overflow: bool,
    /// Arrays currently being rendered, outermost first.
    path: Vec<*const RefCell<Vec<Value>>>,
}

impl Render {
    fn value(&mut self, value: &Value) {
        match value {
            Value::Array(items) => self.array(items),
            Value::Undefined => self.out.push_str("undefined"),
            Value::Null => self.out.push_str("null"),
            Value::Bool(b) => self.out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => self.out.push_str(&number_to_string(*n)),
            Value::String(s) => self.out.push_str(s),
            Value::Object(_) => self.out.push_str("[object Object]"),
            Value::Function(_) => self.out.push_str("function () { [code] }"),
        }
        if self.out.len() > MAX_STRING_LEN {
            self.overflow = true;
        }
    }

    fn array(&mut self, items: &ArrayRef) {
        let ptr = Rc::as_ptr(items);
        if self.path.len() >= MAX_DEPTH || self.path.contains(&ptr) {
            return;
        }
        self.path.push(ptr);
        for (index, item) in items.borrow().iter().enumerate() {
            self.visited += 1;
            if self.overflow || self.visited > MAX_VISITS {
                self.overflow = true;
                break;
            }
            if index > 0 {
                self.out.push(',');
            }
            // holes, `undefined` and `null` render as nothing
            if !item.is_nullish() {
                self.value(item);
            }
        }
        self.path.pop();
    }
}

#[derive(Default)]
struct JsonWalk {
    visited: usize,
    /// Containers currently being converted.
    path: Vec<*const ()>,
}

impl JsonWalk {
    fn value(&mut self, value: &Value) -> Result<serde_json::Value, String> {
        Ok(match value {
            Value::Undefined | Value::Null | Value::Function(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => {
                self.enter(Rc::as_ptr(items).cast())?;
                let mut out = Vec::with_capacity(items.borrow().len());
                for item in items.borrow().iter() {
                    self.visit()?;
                    out.push(self.value(item)?);
                }
                self.path.pop();
                serde_json::Value::Array(out)
            }
            Value::Object(entries) => {
                self.enter(Rc::as_ptr(entries).cast())?;
                let mut map = serde_json::Map::new();
                for (key, value) in entries.borrow().iter() {
                    if matches!(value, Value::Undefined | Value::Function(_)) {
                        continue;
                    }
                    self.visit()?;
                    map.insert(key.clone(), self.value(value)?);
                }
                self.path.pop();
                serde_json::Value::Object(map)
            }
        })
    }

    fn enter(&mut self, ptr: *const ()) -> Result<(), String> {
        if self.path.contains(&ptr) {
            return Err("Converting circular structure to JSON".to_string());
        }
        if self.path.len() >= MAX_DEPTH {
            return Err(format!("value is nested deeper than {MAX_DEPTH} levels"));
        }
        self.path.push(ptr);
        Ok(())
    }

    fn visit(&mut self) -> Result<(), String> {
        self.visited += 1;
        if self.visited > MAX_VISITS {
            return Err(format!("value has more than {MAX_VISITS} nested values"));
        }
        Ok(())
    }
}

/// `[]` is 0, `[x]` converts like `String(x)`, and anything longer
/// contains a comma and is `NaN`. Mirrors [`Value::render`]: cycles and
/// nesting past `MAX_DEPTH` count as empty text.
fn array_to_number(items: &ArrayRef) -> f64 {
    let mut current = items.clone();
    for _ in 0..MAX_DEPTH {
        let item = {
            let items = current.borrow();
            match items.len() {
                0 => return 0.0,
                1 => items[0].clone(),
                _ => return f64::NAN,
            }
        };
        match item {
            Value::Array(inner) => current = inner,
            Value::Undefined | Value::Null => return 0.0,
            Value::Number(n) => return n,
            Value::String(s) => return string_to_number(&s),
            Value::Bool(_) | Value::Object(_) | Value::Function(_) => return f64::NAN,
        }
    }
    0.0
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::from(n as i64);
    }
    Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Number formatting compatible with how scripts print numbers:
/// integers without a fraction, `NaN`, `Infinity`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust accepts "inf" and "nan"; scripts do not
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

/// Canonical array index of a property key (`"3"` but not `"03"`).
pub fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}
