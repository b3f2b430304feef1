//! Parameter schema checks.
//!
//! Declarations are checked once when a procedure is stored; arguments
//! are checked on every invocation, fail-fast in declaration order.

use std::collections::HashSet;
use std::fmt;

use serde_json::{Number, Value};

use crate::error::ValidationError;
use crate::procedure::{Args, ParamSpec, ParamType};

/// Dynamic tag of an argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTag {
    String,
    Number,
    Boolean,
    Null,
    Array,
    Object,
}

impl ValueTag {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ValueTag::String,
            Value::Number(_) => ValueTag::Number,
            Value::Bool(_) => ValueTag::Boolean,
            Value::Null => ValueTag::Null,
            Value::Array(_) => ValueTag::Array,
            Value::Object(_) => ValueTag::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueTag::String => "string",
            ValueTag::Number => "number",
            ValueTag::Boolean => "boolean",
            ValueTag::Null => "null",
            ValueTag::Array => "array",
            ValueTag::Object => "object",
        }
    }

    fn satisfies(self, expected: ParamType) -> bool {
        matches!(
            (expected, self),
            (ParamType::String, ValueTag::String)
                | (ParamType::Number, ValueTag::Number)
                | (ParamType::Boolean, ValueTag::Boolean)
        )
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed view over a procedure's declared params.
pub struct ParameterSchema<'a> {
    params: &'a [ParamSpec],
}

impl<'a> ParameterSchema<'a> {
    pub fn new(params: &'a [ParamSpec]) -> Self {
        Self { params }
    }

    /// Checks `args` against the declarations. Undeclared arguments
    /// are accepted and left untouched.
    pub fn validate(&self, args: &Args) -> Result<(), ValidationError> {
        for spec in self.params {
            let Some(value) = args.get(&spec.name) else {
                if spec.required {
                    return Err(ValidationError::MissingRequiredParam(spec.name.clone()));
                }
                continue;
            };

            if let Some(expected) = spec.param_type {
                let actual = ValueTag::of(value);
                if !actual.satisfies(expected) {
                    return Err(ValidationError::TypeMismatch {
                        name: spec.name.clone(),
                        expected,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks the declarations themselves: names must be non-blank and
    /// unique.
    pub fn check_declarations(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for spec in self.params {
            if spec.name.trim().is_empty() {
                return Err(ValidationError::MissingField("params.name".to_string()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ValidationError::DuplicateParam(spec.name.clone()));
            }
        }
        Ok(())
    }

    /// Builds an argument map from `key=value` text pairs, converting each
    /// value according to its declared type. Empty values are dropped so
    /// that required params still report as missing.
    pub fn coerce_text_args<'p, I>(&self, pairs: I) -> Args
    where
        I: IntoIterator<Item = (&'p str, &'p str)>,
    {
        let mut args = Args::new();
        for (key, raw) in pairs {
            if raw.is_empty() {
                continue;
            }
            let declared = self
                .params
                .iter()
                .find(|p| p.name == key)
                .and_then(|p| p.param_type);
            let value = match declared {
                Some(ParamType::Number) => coerce_number(raw),
                Some(ParamType::Boolean) => Value::Bool(raw == "true"),
                _ => Value::String(raw.to_string()),
            };
            args.insert(key.to_string(), value);
        }
        args
    }
}

/// Unparseable numbers become `null`, which the validator then rejects
/// as a type mismatch.
fn coerce_number(raw: &str) -> Value {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|n| {
            if n.fract() == 0.0 && n.abs() < 9.0e15 {
                Some(Value::from(n as i64))
            } else {
                Number::from_f64(n).map(Value::Number)
            }
        })
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Args {
        match value {
            Value::Object(map) => map,
            _ => panic!("args must be an object"),
        }
    }

    fn x_number_required() -> Vec<ParamSpec> {
        vec![ParamSpec::new("x", ParamType::Number, true)]
    }

    #[test]
    fn test_missing_required_param() {
        let params = x_number_required();
        let err = ParameterSchema::new(&params).validate(&Args::new()).unwrap_err();
        assert_eq!(err, ValidationError::MissingRequiredParam("x".into()));
    }

    #[test]
    fn test_type_mismatch_reports_actual_tag() {
        let params = x_number_required();
        let err = ParameterSchema::new(&params)
            .validate(&args(json!({ "x": "5" })))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                name: "x".into(),
                expected: ParamType::Number,
                actual: ValueTag::String,
            }
        );
    }

    #[test]
    fn test_valid_args_pass() {
        let params = x_number_required();
        assert!(ParameterSchema::new(&params)
            .validate(&args(json!({ "x": 5 })))
            .is_ok());
    }

    #[test]
    fn test_fail_fast_in_declaration_order() {
        let params = vec![
            ParamSpec::new("a", ParamType::String, true),
            ParamSpec::new("b", ParamType::Boolean, true),
        ];
        let err = ParameterSchema::new(&params)
            .validate(&args(json!({ "a": 1 })))
            .unwrap_err();
        // `a` is declared first, so its mismatch wins over `b` missing
        assert!(matches!(err, ValidationError::TypeMismatch { ref name, .. } if name == "a"));
    }

    #[test]
    fn test_optional_param_may_be_absent() {
        let params = vec![ParamSpec::new("flag", ParamType::Boolean, false)];
        assert!(ParameterSchema::new(&params).validate(&Args::new()).is_ok());
    }

    #[test]
    fn test_untyped_param_only_checks_presence() {
        let params = vec![ParamSpec {
            name: "any".into(),
            param_type: None,
            required: true,
        }];
        let schema = ParameterSchema::new(&params);
        assert!(schema.validate(&args(json!({ "any": [1, 2] }))).is_ok());
        assert!(schema.validate(&Args::new()).is_err());
    }

    #[test]
    fn test_extra_args_are_permitted() {
        let params = x_number_required();
        assert!(ParameterSchema::new(&params)
            .validate(&args(json!({ "x": 1, "extra": "kept" })))
            .is_ok());
    }

    #[test]
    fn test_null_is_not_a_number() {
        let params = x_number_required();
        let err = ParameterSchema::new(&params)
            .validate(&args(json!({ "x": null })))
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::TypeMismatch { actual: ValueTag::Null, .. }
        ));
    }

    #[test]
    fn test_check_declarations_rejects_duplicates() {
        let params = vec![
            ParamSpec::new("x", ParamType::Number, true),
            ParamSpec::new("x", ParamType::String, false),
        ];
        assert_eq!(
            ParameterSchema::new(&params).check_declarations(),
            Err(ValidationError::DuplicateParam("x".into()))
        );
    }

    #[test]
    fn test_check_declarations_rejects_blank_names() {
        let params = vec![ParamSpec::new("  ", ParamType::Number, true)];
        assert_eq!(
            ParameterSchema::new(&params).check_declarations(),
            Err(ValidationError::MissingField("params.name".into()))
        );
    }

    #[test]
    fn test_coerce_text_args_uses_declared_types() {
        let params = vec![
            ParamSpec::new("n", ParamType::Number, true),
            ParamSpec::new("f", ParamType::Boolean, false),
            ParamSpec::new("s", ParamType::String, false),
        ];
        let coerced = ParameterSchema::new(&params).coerce_text_args(vec![
            ("n", "42"),
            ("f", "true"),
            ("s", "7"),
            ("extra", "x"),
            ("empty", ""),
        ]);
        assert_eq!(
            Value::Object(coerced),
            json!({ "n": 42, "f": true, "s": "7", "extra": "x" })
        );
    }

    #[test]
    fn test_coerce_bad_number_is_rejected_by_validate() {
        let params = x_number_required();
        let schema = ParameterSchema::new(&params);
        let coerced = schema.coerce_text_args(vec![("x", "abc")]);
        assert!(matches!(
            schema.validate(&coerced),
            Err(ValidationError::TypeMismatch { .. })
        ));
    }
}
