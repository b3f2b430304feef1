//! Built-in globals and the methods of strings, arrays and numbers.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use super::interpreter::{
    check_array_len, check_string_len, range_error, type_error, Eval, Fault, Interpreter, Scope,
    MAX_ARRAY_LEN,
};
use super::value::{number_to_string, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    // ── Globals ──
    String,
    Number,
    Boolean,
    Error,
    TypeError,
    RangeError,
    ParseInt,
    ParseFloat,
    IsNaN,
    IsFinite,
    IsArray,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ObjectAssign,
    JsonStringify,
    JsonParse,
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    MathTrunc,
    MathSign,
    MathSqrt,
    MathPow,
    MathMin,
    MathMax,

    // ── String.prototype ──
    ToUpperCase,
    ToLowerCase,
    Trim,
    TrimStart,
    TrimEnd,
    StrIncludes,
    StartsWith,
    EndsWith,
    StrIndexOf,
    StrSlice,
    Substring,
    Split,
    Replace,
    ReplaceAll,
    Repeat,
    PadStart,
    PadEnd,
    CharAt,

    // ── Array.prototype ──
    Push,
    Pop,
    Shift,
    Unshift,
    Join,
    ArrIncludes,
    ArrIndexOf,
    ArrSlice,
    Concat,
    Reverse,
    Map,
    Filter,
    Reduce,
    ForEach,
    Find,
    FindIndex,
    Some,
    Every,
    Sort,

    // ── Number.prototype ──
    ToFixed,
    ToString,
}

/// Declares every global binding in `scope`.
pub fn install(scope: &Scope) {
    let functions = [
        ("String", Native::String),
        ("Number", Native::Number),
        ("Boolean", Native::Boolean),
        ("Error", Native::Error),
        ("TypeError", Native::TypeError),
        ("RangeError", Native::RangeError),
        ("parseInt", Native::ParseInt),
        ("parseFloat", Native::ParseFloat),
        ("isNaN", Native::IsNaN),
        ("isFinite", Native::IsFinite),
    ];
    for (name, native) in functions {
        scope.declare(name, Value::native(native), false);
    }
    scope.declare("NaN", Value::Number(f64::NAN), false);
    scope.declare("Infinity", Value::Number(f64::INFINITY), false);

    let mut math = namespace(&[
        ("abs", Native::MathAbs),
        ("floor", Native::MathFloor),
        ("ceil", Native::MathCeil),
        ("round", Native::MathRound),
        ("trunc", Native::MathTrunc),
        ("sign", Native::MathSign),
        ("sqrt", Native::MathSqrt),
        ("pow", Native::MathPow),
        ("min", Native::MathMin),
        ("max", Native::MathMax),
    ]);
    math.insert("PI".to_string(), Value::Number(std::f64::consts::PI));
    math.insert("E".to_string(), Value::Number(std::f64::consts::E));
    scope.declare("Math", Value::object(math), false);

    let json = namespace(&[
        ("stringify", Native::JsonStringify),
        ("parse", Native::JsonParse),
    ]);
    scope.declare("JSON", Value::object(json), false);

    let object = namespace(&[
        ("keys", Native::ObjectKeys),
        ("values", Native::ObjectValues),
        ("entries", Native::ObjectEntries),
        ("assign", Native::ObjectAssign),
    ]);
    scope.declare("Object", Value::object(object), false);

    let array = namespace(&[("isArray", Native::IsArray)]);
    scope.declare("Array", Value::object(array), false);
}

fn namespace(members: &[(&str, Native)]) -> IndexMap<String, Value> {
    members
        .iter()
        .map(|(name, native)| (name.to_string(), Value::native(*native)))
        .collect()
}

pub fn string_method(name: &str) -> Option<Native> {
    Some(match name {
        "toUpperCase" => Native::ToUpperCase,
        "toLowerCase" => Native::ToLowerCase,
        "trim" => Native::Trim,
        "trimStart" => Native::TrimStart,
        "trimEnd" => Native::TrimEnd,
        "includes" => Native::StrIncludes,
        "startsWith" => Native::StartsWith,
        "endsWith" => Native::EndsWith,
        "indexOf" => Native::StrIndexOf,
        "slice" => Native::StrSlice,
        "substring" => Native::Substring,
        "split" => Native::Split,
        "replace" => Native::Replace,
        "replaceAll" => Native::ReplaceAll,
        "repeat" => Native::Repeat,
        "padStart" => Native::PadStart,
        "padEnd" => Native::PadEnd,
        "charAt" => Native::CharAt,
        "toString" => Native::String,
        _ => return None,
    })
}

pub fn array_method(name: &str) -> Option<Native> {
    Some(match name {
        "push" => Native::Push,
        "pop" => Native::Pop,
        "shift" => Native::Shift,
        "unshift" => Native::Unshift,
        "join" => Native::Join,
        "includes" => Native::ArrIncludes,
        "indexOf" => Native::ArrIndexOf,
        "slice" => Native::ArrSlice,
        "concat" => Native::Concat,
        "reverse" => Native::Reverse,
        "map" => Native::Map,
        "filter" => Native::Filter,
        "reduce" => Native::Reduce,
        "forEach" => Native::ForEach,
        "find" => Native::Find,
        "findIndex" => Native::FindIndex,
        "some" => Native::Some,
        "every" => Native::Every,
        "sort" => Native::Sort,
        _ => return None,
    })
}

pub fn number_method(name: &str) -> Option<Native> {
    match name {
        "toFixed" => Some(Native::ToFixed),
        "toString" => Some(Native::ToString),
        _ => None,
    }
}

/// `{ name, message }`, the shape of every error the sandbox raises.
pub fn error_object(name: &str, message: impl Into<String>) -> Value {
    let mut entries = IndexMap::new();
    entries.insert("name".to_string(), Value::from(name));
    entries.insert("message".to_string(), Value::from(message.into()));
    Value::object(entries)
}

/// Enumerable keys, in order: object members, array or string indices.
pub fn own_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(entries) => entries.borrow().keys().cloned().collect(),
        Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
        Value::String(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// Integer argument, `default` when absent; `NaN` counts as zero.
fn int_arg(args: &[Value], index: usize, default: f64) -> f64 {
    match args.get(index) {
        None | Some(Value::Undefined) => default,
        Some(value) => {
            let n = value.to_number();
            if n.is_nan() {
                0.0
            } else {
                n.trunc()
            }
        }
    }
}

/// Resolves a possibly negative relative index against `len`.
fn relative(index: f64, len: usize) -> usize {
    let len = len as f64;
    let resolved = if index < 0.0 { (len + index).max(0.0) } else { index.min(len) };
    resolved as usize
}

fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn char_index(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

impl Interpreter<'_> {
    pub(super) fn call_native(
        &mut self,
        native: Native,
        this: Value,
        args: Vec<Value>,
    ) -> Eval<Value> {
        match native {
            // also `"x".toString()`, where the receiver is bound
            Native::String => Ok(match (args.first(), &this) {
                (Some(value), Value::Undefined) => Value::from(self.display(value)?),
                (None, Value::Undefined) => Value::from(""),
                (_, receiver) => Value::from(self.display(receiver)?),
            }),
            Native::Number => Ok(Value::Number(args.first().map_or(0.0, Value::to_number))),
            Native::Boolean => Ok(Value::Bool(args.first().is_some_and(Value::truthy))),
            Native::Error | Native::TypeError | Native::RangeError => {
                let name = match native {
                    Native::TypeError => "TypeError",
                    Native::RangeError => "RangeError",
                    _ => "Error",
                };
                let message = match arg(&args, 0) {
                    Value::Undefined => String::new(),
                    other => self.display(&other)?,
                };
                Ok(error_object(name, message))
            }
            Native::ParseInt => {
                let text = self.text_arg(&args, 0)?;
                Ok(Value::Number(parse_int(&text, int_arg(&args, 1, 0.0))))
            }
            Native::ParseFloat => Ok(Value::Number(parse_float(&self.text_arg(&args, 0)?))),
            Native::IsNaN => Ok(Value::Bool(arg(&args, 0).to_number().is_nan())),
            Native::IsFinite => Ok(Value::Bool(arg(&args, 0).to_number().is_finite())),
            Native::IsArray => Ok(Value::Bool(matches!(arg(&args, 0), Value::Array(_)))),
            Native::ObjectKeys => Ok(Value::array(
                self.own_keys(&arg(&args, 0))?
                    .into_iter()
                    .map(Value::from)
                    .collect(),
            )),
            Native::ObjectValues | Native::ObjectEntries => {
                let source = arg(&args, 0);
                let mut out = Vec::new();
                for key in self.own_keys(&source)? {
                    let value = self.get_property(&source, &key)?;
                    out.push(if native == Native::ObjectValues {
                        value
                    } else {
                        Value::array(vec![Value::from(key), value])
                    });
                }
                Ok(Value::array(out))
            }
            Native::ObjectAssign => {
                let target = arg(&args, 0);
                let Value::Object(entries) = &target else {
                    return Err(type_error("Object.assign target must be an object"));
                };
                for source in args.iter().skip(1) {
                    for key in self.own_keys(source)? {
                        let value = self.get_property(source, &key)?;
                        entries.borrow_mut().insert(key, value);
                    }
                }
                Ok(target)
            }
            Native::JsonStringify => self.json_stringify(&arg(&args, 0), &arg(&args, 2)),
            Native::JsonParse => {
                let text = self.text_arg(&args, 0)?;
                serde_json::from_str::<serde_json::Value>(&text)
                    .map(|json| Value::from_json(&json))
                    .map_err(|e| Fault::Throw(error_object("SyntaxError", e.to_string())))
            }
            Native::MathAbs => Ok(math1(&args, f64::abs)),
            Native::MathFloor => Ok(math1(&args, f64::floor)),
            Native::MathCeil => Ok(math1(&args, f64::ceil)),
            Native::MathRound => Ok(math1(&args, |n| (n + 0.5).floor())),
            Native::MathTrunc => Ok(math1(&args, f64::trunc)),
            Native::MathSign => Ok(math1(&args, |n| {
                if n.is_nan() || n == 0.0 {
                    n
                } else {
                    n.signum()
                }
            })),
            Native::MathSqrt => Ok(math1(&args, f64::sqrt)),
            Native::MathPow => Ok(Value::Number(
                arg(&args, 0).to_number().powf(arg(&args, 1).to_number()),
            )),
            Native::MathMin | Native::MathMax => {
                let max = native == Native::MathMax;
                let mut acc = if max { f64::NEG_INFINITY } else { f64::INFINITY };
                for value in &args {
                    let n = value.to_number();
                    if n.is_nan() {
                        return Ok(Value::Number(f64::NAN));
                    }
                    acc = if max { acc.max(n) } else { acc.min(n) };
                }
                Ok(Value::Number(acc))
            }
            Native::ToFixed => {
                let n = this.to_number();
                let digits = int_arg(&args, 0, 0.0);
                if !(0.0..=100.0).contains(&digits) {
                    return Err(range_error("toFixed() digits argument must be between 0 and 100"));
                }
                if !n.is_finite() {
                    return Ok(Value::from(number_to_string(n)));
                }
                Ok(Value::from(format!("{:.*}", digits as usize, n)))
            }
            Native::ToString => {
                let n = this.to_number();
                let radix = int_arg(&args, 0, 10.0);
                if !(2.0..=36.0).contains(&radix) {
                    return Err(range_error("toString() radix must be between 2 and 36"));
                }
                Ok(Value::from(to_radix(n, radix as u32)))
            }
            string if string_method_native(string) => self.call_string_method(string, this, &args),
            array => self.call_array_method(array, this, args),
        }
    }

    /// `String(args[index])`.
    fn text_arg(&mut self, args: &[Value], index: usize) -> Eval<String> {
        self.display(&arg(args, index))
    }

    fn call_string_method(&mut self, native: Native, this: Value, args: &[Value]) -> Eval<Value> {
        // rendering the receiver pays for one pass over it
        let s = self.display(&this)?;
        let len = s.chars().count();
        let out = match native {
            Native::ToUpperCase => Value::from(s.to_uppercase()),
            Native::ToLowerCase => Value::from(s.to_lowercase()),
            Native::Trim => Value::from(s.trim()),
            Native::TrimStart => Value::from(s.trim_start()),
            Native::TrimEnd => Value::from(s.trim_end()),
            Native::StrIncludes => Value::Bool(s.contains(self.text_arg(args, 0)?.as_str())),
            Native::StartsWith => Value::Bool(s.starts_with(self.text_arg(args, 0)?.as_str())),
            Native::EndsWith => Value::Bool(s.ends_with(self.text_arg(args, 0)?.as_str())),
            Native::StrIndexOf => Value::Number(
                s.find(self.text_arg(args, 0)?.as_str())
                    .map_or(-1.0, |byte| char_index(&s, byte) as f64),
            ),
            Native::StrSlice => {
                let start = relative(int_arg(args, 0, 0.0), len);
                let end = relative(int_arg(args, 1, len as f64), len);
                Value::from(char_slice(&s, start, end))
            }
            Native::Substring => {
                let clamp = |n: f64| n.clamp(0.0, len as f64) as usize;
                let a = clamp(int_arg(args, 0, 0.0));
                let b = clamp(int_arg(args, 1, len as f64));
                Value::from(char_slice(&s, a.min(b), a.max(b)))
            }
            Native::Split => {
                let limit = int_arg(args, 1, f64::INFINITY).max(0.0) as usize;
                let parts: Vec<Value> = match arg(args, 0) {
                    Value::Undefined => vec![Value::from(s.as_str())],
                    separator => {
                        let separator = self.display(&separator)?;
                        // one past the cap, so an oversized result is detected
                        let take = limit.min(MAX_ARRAY_LEN + 1);
                        if separator.is_empty() {
                            s.chars().take(take).map(|c| Value::from(c.to_string())).collect()
                        } else {
                            s.split(separator.as_str()).take(take).map(Value::from).collect()
                        }
                    }
                };
                check_array_len(parts.len())?;
                self.charge(parts.len())?;
                Value::array(parts.into_iter().take(limit).collect())
            }
            Native::Replace | Native::ReplaceAll => {
                let pattern = self.text_arg(args, 0)?;
                let replacement = arg(args, 1);
                let mut out = String::with_capacity(s.len());
                let mut rest = s.as_str();
                while let Some(byte) = rest.find(pattern.as_str()) {
                    out.push_str(&rest[..byte]);
                    let piece = match &replacement {
                        Value::Function(_) => {
                            let piece =
                                self.call(&replacement, vec![Value::from(pattern.as_str())])?;
                            self.display(&piece)?
                        }
                        other => self.display(other)?,
                    };
                    out.push_str(&piece);
                    check_string_len(out.len())?;
                    if pattern.is_empty() {
                        // an empty pattern matches between every character
                        let mut chars = rest.chars();
                        match chars.next() {
                            Some(c) if native == Native::ReplaceAll => {
                                out.push(c);
                                rest = chars.as_str();
                                continue;
                            }
                            _ => break,
                        }
                    }
                    rest = &rest[byte + pattern.len()..];
                    if native == Native::Replace {
                        break;
                    }
                }
                out.push_str(rest);
                check_string_len(out.len())?;
                self.charge(out.len())?;
                Value::from(out)
            }
            Native::Repeat => {
                let count = int_arg(args, 0, 0.0);
                if count < 0.0 || !count.is_finite() {
                    return Err(range_error(format!(
                        "Invalid count value: {}",
                        number_to_string(count)
                    )));
                }
                let total = s.len().saturating_mul(count as usize);
                check_string_len(total)?;
                self.charge(total)?;
                Value::from(s.repeat(count as usize))
            }
            Native::PadStart | Native::PadEnd => {
                let target = int_arg(args, 0, 0.0).max(0.0) as usize;
                let fill = match arg(args, 1) {
                    Value::Undefined => " ".to_string(),
                    other => self.display(&other)?,
                };
                if target <= len || fill.is_empty() {
                    Value::from(s.as_str())
                } else {
                    check_string_len(target)?;
                    self.charge(target)?;
                    let padding: String = fill.chars().cycle().take(target - len).collect();
                    Value::from(if native == Native::PadStart {
                        padding + &s
                    } else {
                        s + &padding
                    })
                }
            }
            Native::CharAt => {
                let index = int_arg(args, 0, 0.0);
                let c = if index < 0.0 {
                    None
                } else {
                    s.chars().nth(index as usize)
                };
                Value::from(c.map(String::from).unwrap_or_default())
            }
            other => return Err(type_error(format!("{other:?} is not a string method"))),
        };
        Ok(out)
    }

    fn call_array_method(&mut self, native: Native, this: Value, args: Vec<Value>) -> Eval<Value> {
        let Value::Array(items) = &this else {
            return Err(type_error(format!("{native:?} called on a non-array")));
        };
        let len = items.borrow().len();
        match native {
            Native::Push => {
                check_array_len(len + args.len())?;
                let mut items = items.borrow_mut();
                items.extend(args);
                Ok(Value::Number(items.len() as f64))
            }
            Native::Pop => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
            Native::Shift => {
                self.charge(len)?;
                let mut items = items.borrow_mut();
                Ok(if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                })
            }
            Native::Unshift => {
                check_array_len(len + args.len())?;
                self.charge(len + args.len())?;
                let mut items = items.borrow_mut();
                items.splice(0..0, args);
                Ok(Value::Number(items.len() as f64))
            }
            Native::Join => {
                let separator = match arg(&args, 0) {
                    Value::Undefined => ",".to_string(),
                    other => self.display(&other)?,
                };
                let snapshot = items.borrow().clone();
                self.charge(snapshot.len())?;
                let mut joined = String::new();
                for (index, item) in snapshot.iter().enumerate() {
                    if index > 0 {
                        joined.push_str(&separator);
                    }
                    // a self-referencing element joins as nothing
                    let nested = matches!(item, Value::Array(inner) if Rc::ptr_eq(inner, items));
                    if !item.is_nullish() && !nested {
                        joined.push_str(&self.display(item)?);
                    }
                    check_string_len(joined.len())?;
                }
                Ok(Value::from(joined))
            }
            Native::ArrIncludes | Native::ArrIndexOf => {
                let needle = arg(&args, 0);
                // every element may be compared byte by byte with a string needle
                let needle_len = match &needle {
                    Value::String(s) => s.len(),
                    _ => 0,
                };
                self.charge(len.saturating_mul(needle_len.max(1)))?;
                let items = items.borrow();
                Ok(if native == Native::ArrIncludes {
                    Value::Bool(items.iter().any(|v| v.same_value_zero(&needle)))
                } else {
                    let position = items.iter().position(|v| v.strict_equals(&needle));
                    Value::Number(position.map_or(-1.0, |i| i as f64))
                })
            }
            Native::ArrSlice => {
                let start = relative(int_arg(&args, 0, 0.0), len);
                let end = relative(int_arg(&args, 1, len as f64), len);
                self.charge(end.saturating_sub(start))?;
                let slice = items
                    .borrow()
                    .get(start..end.max(start))
                    .map(<[Value]>::to_vec)
                    .unwrap_or_default();
                Ok(Value::array(slice))
            }
            Native::Concat => {
                let mut out = items.borrow().clone();
                for value in args {
                    match value {
                        Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                        other => out.push(other),
                    }
                    check_array_len(out.len())?;
                }
                self.charge(out.len())?;
                Ok(Value::array(out))
            }
            Native::Reverse => {
                self.charge(len)?;
                items.borrow_mut().reverse();
                Ok(this.clone())
            }
            Native::Sort => {
                let comparator = arg(&args, 0);
                let snapshot = items.borrow().clone();
                let sorted = self.sort_values(snapshot, &comparator)?;
                *items.borrow_mut() = sorted;
                Ok(this.clone())
            }
            Native::Reduce => {
                let callback = arg(&args, 0);
                self.charge(len)?;
                let snapshot = items.borrow().clone();
                let mut entries = snapshot.into_iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match entries.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(type_error("Reduce of empty array with no initial value"))
                        }
                    },
                };
                for (index, item) in entries {
                    acc = self.call(
                        &callback,
                        vec![acc, item, Value::Number(index as f64), this.clone()],
                    )?;
                }
                Ok(acc)
            }
            Native::Map
            | Native::Filter
            | Native::ForEach
            | Native::Find
            | Native::FindIndex
            | Native::Some
            | Native::Every => {
                let callback = arg(&args, 0);
                if !matches!(callback, Value::Function(_)) {
                    return Err(type_error(format!(
                        "{} is not a function",
                        callback.to_display()
                    )));
                }
                self.charge(len)?;
                let snapshot = items.borrow().clone();
                let mut mapped = Vec::new();
                for (index, item) in snapshot.into_iter().enumerate() {
                    let result = self.call(
                        &callback,
                        vec![item.clone(), Value::Number(index as f64), this.clone()],
                    )?;
                    match native {
                        Native::Map => mapped.push(result),
                        Native::Filter if result.truthy() => mapped.push(item),
                        Native::Find if result.truthy() => return Ok(item),
                        Native::FindIndex if result.truthy() => {
                            return Ok(Value::Number(index as f64))
                        }
                        Native::Some if result.truthy() => return Ok(Value::Bool(true)),
                        Native::Every if !result.truthy() => return Ok(Value::Bool(false)),
                        _ => {}
                    }
                }
                Ok(match native {
                    Native::Map | Native::Filter => Value::array(mapped),
                    Native::FindIndex => Value::Number(-1.0),
                    Native::Some => Value::Bool(false),
                    Native::Every => Value::Bool(true),
                    _ => Value::Undefined,
                })
            }
            other => Err(type_error(format!("{other:?} is not an array method"))),
        }
    }

    /// `Array.prototype.sort`: stable, `undefined` last, string order
    /// unless a comparator is given.
    fn sort_values(&mut self, items: Vec<Value>, comparator: &Value) -> Eval<Vec<Value>> {
        let (defined, undefined): (Vec<Value>, Vec<Value>) = items
            .into_iter()
            .partition(|v| !matches!(v, Value::Undefined));
        let order: Vec<usize> = (0..defined.len()).collect();

        let order = if comparator.is_nullish() {
            let keys = defined
                .iter()
                .map(|v| self.display(v))
                .collect::<Eval<Vec<_>>>()?;
            merge_sort(order, &mut |a: &usize, b: &usize| {
                let (a, b) = (&keys[*a], &keys[*b]);
                self.tick()?;
                self.charge(a.len().min(b.len()))?;
                Ok(a.cmp(b))
            })?
        } else {
            merge_sort(order, &mut |a: &usize, b: &usize| {
                self.tick()?;
                let n = self
                    .call(comparator, vec![defined[*a].clone(), defined[*b].clone()])?
                    .to_number();
                Ok(if n > 0.0 {
                    Ordering::Greater
                } else if n < 0.0 {
                    Ordering::Less
                } else {
                    Ordering::Equal
                })
            })?
        };

        Ok(order
            .into_iter()
            .map(|i| defined[i].clone())
            .chain(undefined)
            .collect())
    }

    fn json_stringify(&mut self, value: &Value, indent: &Value) -> Eval<Value> {
        if matches!(value, Value::Undefined | Value::Function(_)) {
            return Ok(Value::Undefined);
        }
        let (json, visited) = value.to_json_counted().map_err(type_error)?;
        self.charge(visited)?;
        let width = match indent {
            Value::Number(n) => n.clamp(0.0, 10.0) as usize,
            Value::String(s) => s.chars().count().min(10),
            _ => 0,
        };
        let text = if width == 0 {
            serde_json::to_string(&json).map_err(|e| type_error(e.to_string()))?
        } else {
            let pad = " ".repeat(width);
            let mut out = Vec::new();
            let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
            let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
            serde::Serialize::serialize(&json, &mut serializer)
                .map_err(|e| type_error(e.to_string()))?;
            String::from_utf8_lossy(&out).into_owned()
        };
        check_string_len(text.len())?;
        self.charge(text.len())?;
        Ok(Value::from(text))
    }
}

/// Stable bottom-up merge sort. A failing `compare` aborts the sort.
fn merge_sort<T: Clone>(
    items: Vec<T>,
    compare: &mut impl FnMut(&T, &T) -> Eval<Ordering>,
) -> Eval<Vec<T>> {
    let len = items.len();
    let mut src = items;
    let mut width = 1;
    while width < len {
        let mut dst = Vec::with_capacity(len);
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < end {
                // ties keep the left run first
                if compare(&src[i], &src[j])? == Ordering::Greater {
                    dst.push(src[j].clone());
                    j += 1;
                } else {
                    dst.push(src[i].clone());
                    i += 1;
                }
            }
            dst.extend_from_slice(&src[i..mid]);
            dst.extend_from_slice(&src[j..end]);
            start = end;
        }
        src = dst;
        width *= 2;
    }
    Ok(src)
}

fn string_method_native(native: Native) -> bool {
    matches!(
        native,
        Native::ToUpperCase
            | Native::ToLowerCase
            | Native::Trim
            | Native::TrimStart
            | Native::TrimEnd
            | Native::StrIncludes
            | Native::StartsWith
            | Native::EndsWith
            | Native::StrIndexOf
            | Native::StrSlice
            | Native::Substring
            | Native::Split
            | Native::Replace
            | Native::ReplaceAll
            | Native::Repeat
            | Native::PadStart
            | Native::PadEnd
            | Native::CharAt
    )
}

fn math1(args: &[Value], f: fn(f64) -> f64) -> Value {
    Value::Number(f(arg(args, 0).to_number()))
}

fn parse_int(text: &str, radix: f64) -> f64 {
    let mut s = text.trim();
    let negative = s.starts_with('-');
    if negative || s.starts_with('+') {
        s = &s[1..];
    }
    let mut radix = radix as u32;
    if radix == 0 || radix == 16 {
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = hex;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: String = s.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    if negative {
        -value
    } else {
        value
    }
}

fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    let unsigned = s.trim_start_matches(['+', '-']);
    if unsigned.starts_with("Infinity") {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    // longest prefix that parses as a number
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let ok = match b {
            b'0'..=b'9' => true,
            b'+' | b'-' => i == 0 || matches!(bytes[i - 1], b'e' | b'E'),
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            b'e' | b'E' if !seen_exp && i > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        i += 1;
        if s[..i].parse::<f64>().is_ok() {
            end = i;
        }
    }
    s[..end].parse().unwrap_or(f64::NAN)
}

fn to_radix(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() || n.fract() != 0.0 || n.abs() > 9_007_199_254_740_991.0 {
        return number_to_string(n);
    }
    let mut value = n.abs() as u64;
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        let digit = (value % u64::from(radix)) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('0'));
        value /= u64::from(radix);
    }
    if n < 0.0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("  42px", 0.0), 42.0);
        assert_eq!(parse_int("-0x1f", 0.0), -31.0);
        assert_eq!(parse_int("101", 2.0), 5.0);
        assert!(parse_int("abc", 0.0).is_nan());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("2.5abc"), 2.5);
        assert_eq!(parse_float("  -2e3"), -2000.0);
        assert_eq!(parse_float("1e"), 1.0);
        assert_eq!(parse_float("-Infinity"), f64::NEG_INFINITY);
        assert!(parse_float(".").is_nan());
    }

    #[test]
    fn test_to_radix() {
        assert_eq!(to_radix(255.0, 16), "ff");
        assert_eq!(to_radix(-5.0, 2), "-101");
        assert_eq!(to_radix(1.5, 2), "1.5");
    }

    #[test]
    fn test_relative_index() {
        assert_eq!(relative(-2.0, 5), 3);
        assert_eq!(relative(-10.0, 5), 0);
        assert_eq!(relative(9.0, 5), 5);
    }

    #[test]
    fn test_own_keys() {
        let array = Value::array(vec![Value::Null, Value::Null]);
        assert_eq!(own_keys(&array), vec!["0", "1"]);
        assert!(own_keys(&Value::Number(1.0)).is_empty());
    }

    #[test]
    fn test_method_lookup() {
        assert_eq!(string_method("padStart"), Some(Native::PadStart));
        assert_eq!(array_method("padStart"), None);
        assert_eq!(number_method("toFixed"), Some(Native::ToFixed));
    }
}
