//! Typed access to tool-call arguments.
//!
//! [`ToolArgs`] wraps the JSON object a model sends with a tool call. Every
//! accessor returns `Result<_, ParamError>` so a tool can report exactly
//! which parameter was missing or mistyped. Tools that prefer the forgiving
//! behaviour (log and fall back to a default) opt in through
//! [`ToolArgs::lenient`].

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

/// Why a tool argument could not be read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("missing required parameter `{0}`")]
    Missing(String),
    #[error("parameter `{name}` must be {expected}, got {found}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("invalid JSON arguments: {0}")]
    InvalidJson(String),
    #[error("arguments do not match the expected shape: {0}")]
    Shape(String),
}

/// JSON type name used in error messages.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Arguments of one tool call: a JSON object keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: Map<String, Value>,
}

impl ToolArgs {
    /// Wrap a JSON value. `null` is treated as "no arguments".
    pub fn new(value: Value) -> Result<Self, ParamError> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            other => Err(ParamError::NotAnObject(type_name(&other))),
        }
    }

    /// Parse a raw JSON string. An empty string means "no arguments".
    pub fn from_json_str(raw: &str) -> Result<Self, ParamError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ParamError::InvalidJson(e.to_string()))?;
        Self::new(value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }

    /// Raw value, treating an explicit `null` as absent.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    fn require(&self, name: &str) -> Result<&Value, ParamError> {
        self.get(name)
            .ok_or_else(|| ParamError::Missing(name.to_string()))
    }

    fn wrong(name: &str, expected: &'static str, found: &Value) -> ParamError {
        ParamError::WrongType {
            name: name.to_string(),
            expected,
            found: type_name(found),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str, ParamError> {
        let v = self.require(name)?;
        v.as_str().ok_or_else(|| Self::wrong(name, "a string", v))
    }

    pub fn string(&self, name: &str) -> Result<String, ParamError> {
        self.str(name).map(str::to_string)
    }

    pub fn i64(&self, name: &str) -> Result<i64, ParamError> {
        let v = self.require(name)?;
        v.as_i64().ok_or_else(|| Self::wrong(name, "an integer", v))
    }

    pub fn u64(&self, name: &str) -> Result<u64, ParamError> {
        let v = self.require(name)?;
        v.as_u64()
            .ok_or_else(|| Self::wrong(name, "a non-negative integer", v))
    }

    pub fn f64(&self, name: &str) -> Result<f64, ParamError> {
        let v = self.require(name)?;
        v.as_f64().ok_or_else(|| Self::wrong(name, "a number", v))
    }

    pub fn bool(&self, name: &str) -> Result<bool, ParamError> {
        let v = self.require(name)?;
        v.as_bool().ok_or_else(|| Self::wrong(name, "a boolean", v))
    }

    pub fn array(&self, name: &str) -> Result<&Vec<Value>, ParamError> {
        let v = self.require(name)?;
        v.as_array().ok_or_else(|| Self::wrong(name, "an array", v))
    }

    /// `Ok(None)` when absent or `null`; an error only for the wrong type.
    pub fn opt_str(&self, name: &str) -> Result<Option<&str>, ParamError> {
        self.optional(name, |args| args.str(name))
    }

    pub fn opt_i64(&self, name: &str) -> Result<Option<i64>, ParamError> {
        self.optional(name, |args| args.i64(name))
    }

    pub fn opt_bool(&self, name: &str) -> Result<Option<bool>, ParamError> {
        self.optional(name, |args| args.bool(name))
    }

    fn optional<'a, T>(
        &'a self,
        name: &str,
        read: impl FnOnce(&'a Self) -> Result<T, ParamError>,
    ) -> Result<Option<T>, ParamError> {
        if self.get(name).is_none() {
            return Ok(None);
        }
        read(self).map(Some)
    }

    /// Deserialize all arguments into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ParamError> {
        serde_json::from_value(Value::Object(self.values.clone()))
            .map_err(|e| ParamError::Shape(e.to_string()))
    }

    /// Default-and-log view over these arguments.
    pub fn lenient(&self) -> LenientArgs<'_> {
        LenientArgs { args: self }
    }
}

/// Forgiving accessors: a missing or mistyped parameter logs a warning and
/// yields the supplied default.
#[derive(Debug, Clone, Copy)]
pub struct LenientArgs<'a> {
    args: &'a ToolArgs,
}

impl LenientArgs<'_> {
    fn or_default<T>(result: Result<T, ParamError>, default: T) -> T {
        match result {
            Ok(v) => v,
            Err(ParamError::Missing(_)) => default,
            Err(e) => {
                warn!("{e}; using default");
                default
            }
        }
    }

    pub fn string_or(&self, name: &str, default: &str) -> String {
        Self::or_default(self.args.string(name), default.to_string())
    }

    pub fn i64_or(&self, name: &str, default: i64) -> i64 {
        Self::or_default(self.args.i64(name), default)
    }

    pub fn f64_or(&self, name: &str, default: f64) -> f64 {
        Self::or_default(self.args.f64(name), default)
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        Self::or_default(self.args.bool(name), default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn args(v: Value) -> ToolArgs {
        ToolArgs::new(v).unwrap()
    }

    #[test]
    fn typed_getters() {
        let a = args(json!({"path": "src", "depth": 3, "ratio": 0.5, "hidden": true, "tags": ["a"]}));
        assert_eq!(a.str("path").unwrap(), "src");
        assert_eq!(a.i64("depth").unwrap(), 3);
        assert_eq!(a.u64("depth").unwrap(), 3);
        assert_eq!(a.f64("ratio").unwrap(), 0.5);
        assert!(a.bool("hidden").unwrap());
        assert_eq!(a.array("tags").unwrap().len(), 1);
    }

    #[test]
    fn missing_and_wrong_type_are_distinct() {
        let a = args(json!({"depth": "three", "gone": null}));
        assert_eq!(a.i64("nope"), Err(ParamError::Missing("nope".into())));
        assert_eq!(a.str("gone"), Err(ParamError::Missing("gone".into())));
        let err = a.i64("depth").unwrap_err();
        assert_eq!(
            err,
            ParamError::WrongType {
                name: "depth".into(),
                expected: "an integer",
                found: "string",
            }
        );
        assert_eq!(err.to_string(), "parameter `depth` must be an integer, got string");
    }

    #[test]
    fn optional_getters() {
        let a = args(json!({"limit": 5, "flag": "yes"}));
        assert_eq!(a.opt_i64("limit").unwrap(), Some(5));
        assert_eq!(a.opt_i64("other").unwrap(), None);
        assert!(a.opt_bool("flag").is_err());
    }

    #[test]
    fn non_object_rejected() {
        assert_eq!(
            ToolArgs::new(json!([1, 2])),
            Err(ParamError::NotAnObject("array"))
        );
        assert!(ToolArgs::new(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn raw_json_parsing() {
        assert!(ToolArgs::from_json_str("").unwrap().is_empty());
        assert!(matches!(
            ToolArgs::from_json_str("{not json"),
            Err(ParamError::InvalidJson(_))
        ));
        let a = ToolArgs::from_json_str(r#"{"q": "rust"}"#).unwrap();
        assert_eq!(a.str("q").unwrap(), "rust");
    }

    #[test]
    fn parse_into_struct() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Grep {
            pattern: String,
            #[serde(default)]
            max: Option<u32>,
        }
        let a = args(json!({"pattern": "fn main"}));
        assert_eq!(
            a.parse::<Grep>().unwrap(),
            Grep {
                pattern: "fn main".into(),
                max: None
            }
        );
        let bad = args(json!({"max": 3}));
        assert!(matches!(bad.parse::<Grep>(), Err(ParamError::Shape(_))));
    }

    #[test]
    fn lenient_mode_defaults() {
        let a = args(json!({"count": "ten", "name": "x"}));
        let l = a.lenient();
        assert_eq!(l.i64_or("count", 10), 10);
        assert_eq!(l.i64_or("missing", 7), 7);
        assert_eq!(l.string_or("name", "default"), "x");
        assert!(!l.bool_or("verbose", false));
        assert_eq!(l.f64_or("ratio", 1.5), 1.5);
    }
}
