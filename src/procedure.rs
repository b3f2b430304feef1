use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Argument mapping handed to `invoke`.
pub type Args = serde_json::Map<String, Value>;

/// Implementation used when a procedure is created without one.
pub const DEFAULT_IMPLEMENTATION: &str = "return { ok: true };";

/// Declared type of a procedure parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "string" => Some(ParamType::String),
            "number" => Some(ParamType::Number),
            "boolean" => Some(ParamType::Boolean),
            _ => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared argument of a procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// `None` when no type was declared or the token is unknown;
    /// such params are only checked for presence.
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient_param_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub param_type: Option<ParamType>,
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, param_type: ParamType, required: bool) -> Self {
        Self {
            name: name.into(),
            param_type: Some(param_type),
            required,
        }
    }
}

/// A registered procedure stub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    pub id: String,
    pub name: String,
    pub framework: String,
    pub protocol: String,
    pub method: String,
    pub params: Vec<ParamSpec>,
    pub implementation: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Input of `create`. Everything is optional here; the store decides
/// what is required and fills in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcedureDraft {
    pub name: Option<String>,
    pub framework: Option<String>,
    pub protocol: Option<String>,
    pub method: Option<String>,
    #[serde(default, deserialize_with = "lenient_params")]
    pub params: Option<Vec<ParamSpec>>,
    pub implementation: Option<String>,
    pub description: Option<String>,
}

/// Input of `update`. Present fields replace the stored ones; `id` is
/// accepted and ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedurePatch {
    pub id: Option<String>,
    pub name: Option<String>,
    pub framework: Option<String>,
    pub protocol: Option<String>,
    pub method: Option<String>,
    #[serde(default, deserialize_with = "lenient_params")]
    pub params: Option<Vec<ParamSpec>>,
    pub implementation: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Procedure {
    /// Merges `patch` over this record. The id is never touched.
    pub fn apply(&mut self, patch: ProcedurePatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(framework) = patch.framework {
            self.framework = framework;
        }
        if let Some(protocol) = patch.protocol {
            self.protocol = protocol;
        }
        if let Some(method) = patch.method {
            self.method = method;
        }
        if let Some(params) = patch.params {
            self.params = params;
        }
        if let Some(implementation) = patch.implementation {
            self.implementation = implementation;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(created_at) = patch.created_at {
            self.created_at = created_at;
        }
    }
}

/// Any non-array value (including `null`) becomes an empty list.
fn lenient_params<'de, D>(deserializer: D) -> Result<Option<Vec<ParamSpec>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(_) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(Some(Vec::new())),
    }
}

fn lenient_param_type<'de, D>(deserializer: D) -> Result<Option<ParamType>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(ParamType::from_token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Procedure {
        Procedure {
            id: "p-1".to_string(),
            name: "sum".to_string(),
            framework: "grpc".to_string(),
            protocol: "tcp".to_string(),
            method: "POST".to_string(),
            params: vec![ParamSpec::new("x", ParamType::Number, true)],
            implementation: "args.x + 1".to_string(),
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_procedure_serializes_camel_case() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["params"][0]["type"], "number");
        assert_eq!(value["params"][0]["required"], true);
    }

    #[test]
    fn test_draft_non_array_params_become_empty() {
        let draft: ProcedureDraft =
            serde_json::from_value(json!({ "name": "a", "params": "nope" })).unwrap();
        assert_eq!(draft.params, Some(vec![]));

        let draft: ProcedureDraft = serde_json::from_value(json!({ "name": "a" })).unwrap();
        assert_eq!(draft.params, None);
    }

    #[test]
    fn test_unknown_param_type_is_unchecked() {
        let spec: ParamSpec =
            serde_json::from_value(json!({ "name": "when", "type": "date" })).unwrap();
        assert_eq!(spec.param_type, None);
        assert!(!spec.required);
    }

    #[test]
    fn test_apply_ignores_patch_id() {
        let mut proc = sample();
        let patch: ProcedurePatch =
            serde_json::from_value(json!({ "id": "other", "name": "renamed" })).unwrap();
        proc.apply(patch);
        assert_eq!(proc.id, "p-1");
        assert_eq!(proc.name, "renamed");
        assert_eq!(proc.framework, "grpc");
    }

    #[test]
    fn test_apply_replaces_created_at() {
        let mut proc = sample();
        let patch: ProcedurePatch =
            serde_json::from_value(json!({ "createdAt": "2020-01-02T03:04:05Z" })).unwrap();
        proc.apply(patch);
        assert_eq!(proc.created_at.to_rfc3339(), "2020-01-02T03:04:05+00:00");
    }
}
