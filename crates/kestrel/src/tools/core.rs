//! Core tool abstractions: the `Tool` trait, the `ToolExecutor` boundary the
//! agent loop depends on, and `ToolRegistry`.

use super::args::{ParamError, ToolArgs};
use crate::json_schema_for;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Boxed future returned by tools and executors. Boxing keeps the traits
/// dyn-compatible.
pub type ToolFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Errors and results ─────────────────────────────────────────────

/// Why a tool call failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] ParamError),
    #[error("argument validation failed:\n{0}")]
    Validation(String),
    #[error("{0}")]
    Execution(String),
    #[error("timed out after {:.0} seconds", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("tool panicked: {0}")]
    Panicked(String),
}

impl ToolError {
    /// Shorthand for an execution failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        ToolError::Execution(msg.into())
    }
}

/// Outcome of one tool call as seen by the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
        }
    }

    /// Text to show the model: the content on success, the error otherwise.
    pub fn model_text(&self) -> &str {
        match (&self.error, self.success) {
            (Some(err), false) => err,
            _ => &self.content,
        }
    }
}

impl From<Result<String, ToolError>> for ToolResult {
    fn from(result: Result<String, ToolError>) -> Self {
        match result {
            Ok(content) => ToolResult::ok(content),
            Err(e) => ToolResult::failure(format!("Error: {e}")),
        }
    }
}

// ── Descriptions ───────────────────────────────────────────────────

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn from_schema_type(name: &str) -> Option<Self> {
        Some(match name {
            "string" => ParamType::String,
            "integer" => ParamType::Integer,
            "number" => ParamType::Number,
            "boolean" => ParamType::Boolean,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// One parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn required(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Human-facing description of a tool, turned into a provider schema by
/// [`PromptBuilder`](crate::agent::PromptBuilder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolDescription {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Derive the parameter list from a typed argument struct.
    ///
    /// Top-level properties become parameters; `Option<T>` fields (schema
    /// type `[T, "null"]`) map to `T`. Properties with no recognisable type
    /// are described as objects.
    pub fn from_schema<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        let schema = json_schema_for::<T>();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut out = Self::new(name, description);
        if let Some(props) = schema["properties"].as_object() {
            for (prop, prop_schema) in props {
                let param_type = match &prop_schema["type"] {
                    Value::String(t) => ParamType::from_schema_type(t),
                    Value::Array(ts) => ts
                        .iter()
                        .filter_map(Value::as_str)
                        .find(|t| *t != "null")
                        .and_then(ParamType::from_schema_type),
                    _ => None,
                }
                .unwrap_or(ParamType::Object);
                out.parameters.push(ToolParameter {
                    name: prop.clone(),
                    param_type,
                    description: prop_schema["description"].as_str().unwrap_or_default().to_string(),
                    required: required.contains(&prop.as_str()),
                    default: prop_schema.get("default").cloned(),
                });
            }
        }
        out
    }

    /// JSON Schema object for the arguments.
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let mut prop = json!({
                "type": p.param_type.as_str(),
                "description": p.description,
            });
            if let Some(ref default) = p.default {
                prop["default"] = default.clone();
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

// ── Traits ─────────────────────────────────────────────────────────

/// A single capability the model can invoke.
///
/// # Example
///
/// ```ignore
/// struct WordCount;
///
/// impl Tool for WordCount {
///     fn description(&self) -> ToolDescription {
///         ToolDescription::new("word_count", "Count words in text")
///             .param(ToolParameter::required("text", ParamType::String, "Text to count"))
///     }
///
///     fn execute(&self, args: ToolArgs) -> ToolFuture<'_, Result<String, ToolError>> {
///         Box::pin(async move {
///             let text = args.str("text")?;
///             Ok(text.split_whitespace().count().to_string())
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    fn description(&self) -> ToolDescription;

    /// Run the tool. Errors are reported back to the model as a failed
    /// TOOL message; they never abort the process.
    fn execute(&self, args: ToolArgs) -> ToolFuture<'_, Result<String, ToolError>>;

    fn name(&self) -> String {
        self.description().name
    }
}

/// The boundary the agent loop executes tools through.
///
/// Implementations must never panic or hang the caller: failures, panics,
/// and timeouts all come back as a failed [`ToolResult`].
pub trait ToolExecutor: Send + Sync {
    fn execute<'a>(&'a self, name: &'a str, arguments: &'a Value) -> ToolFuture<'a, ToolResult>;

    /// Descriptions of every available tool, rebuilt on each call.
    fn descriptions(&self) -> Vec<ToolDescription>;
}

// ── ToolRegistry ───────────────────────────────────────────────────

/// Explicitly constructed set of tools, dispatched by name.
///
/// Owned by whoever assembles the agent and lent to it as a
/// `&dyn ToolExecutor`; there is no process-wide registry.
///
/// ```ignore
/// let tools = ToolRegistry::new()
///     .with(WordCount)
///     .with_arg_validation(true)
///     .with_default_timeout(Some(Duration::from_secs(30)));
/// ```
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    by_name: HashMap<String, usize>,
    /// Validate arguments against the tool's JSON Schema before execution.
    validate_args: bool,
    /// `None` disables timeouts.
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("validate_args", &self.validate_args)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. A tool with the same name replaces the earlier one
    /// in place.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name();
        match self.by_name.get(&name) {
            Some(&idx) => {
                warn!("Replacing already registered tool '{name}'");
                self.tools[idx] = Box::new(tool);
            }
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(Box::new(tool));
            }
        }
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    async fn dispatch(&self, name: &str, arguments: &Value) -> Result<String, ToolError> {
        let tool = self
            .by_name
            .get(name)
            .map(|&idx| &self.tools[idx])
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        if self.validate_args {
            validate_arguments(&tool.description(), arguments)?;
        }
        let args = ToolArgs::new(arguments.clone())?;

        log_tool_call(name, arguments);
        let start = std::time::Instant::now();

        // A panic can happen while building the future or while polling it.
        let fut = std::panic::catch_unwind(AssertUnwindSafe(|| tool.execute(args)))
            .map_err(|p| ToolError::Panicked(panic_message(p.as_ref())))?;
        let guarded = AssertUnwindSafe(fut).catch_unwind();

        let outcome = match self.default_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {name} timed out after {:.1}s",
                        start.elapsed().as_secs_f64()
                    );
                    return Err(ToolError::Timeout(limit));
                }
            },
            None => guarded.await,
        };
        let result = outcome.map_err(|p| ToolError::Panicked(panic_message(p.as_ref())))?;

        debug!(
            "Tool {name} finished in {:.0}ms (ok: {})",
            start.elapsed().as_secs_f64() * 1000.0,
            result.is_ok()
        );
        result
    }
}

impl ToolExecutor for ToolRegistry {
    fn execute<'a>(&'a self, name: &'a str, arguments: &'a Value) -> ToolFuture<'a, ToolResult> {
        Box::pin(async move {
            let result = self.dispatch(name, arguments).await;
            if let Err(ref e) = result {
                debug!("Tool {name} failed: {e}");
            }
            ToolResult::from(result)
        })
    }

    fn descriptions(&self) -> Vec<ToolDescription> {
        self.tools.iter().map(|t| t.description()).collect()
    }
}

// ── FnTool ─────────────────────────────────────────────────────────

type ErasedHandler =
    Box<dyn Fn(ToolArgs) -> ToolFuture<'static, Result<String, ToolError>> + Send + Sync>;

/// A closure-backed tool.
///
/// Use [`FnTool::new`] to receive the raw [`ToolArgs`], or [`FnTool::typed`]
/// to have the arguments deserialized into a struct first.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct Echo { text: String }
///
/// let tool = FnTool::typed(
///     ToolDescription::from_schema::<Echo>("echo", "Echo the input"),
///     |args: Echo| async move { Ok(args.text) },
/// );
/// ```
pub struct FnTool {
    description: ToolDescription,
    handler: ErasedHandler,
}

impl FnTool {
    pub fn new<F, Fut>(description: ToolDescription, handler: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            description,
            handler: Box::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn typed<A, F, Fut>(description: ToolDescription, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let erased = move |args: ToolArgs| -> ToolFuture<'static, Result<String, ToolError>> {
            match args.parse::<A>() {
                Ok(parsed) => Box::pin(handler(parsed)),
                Err(e) => Box::pin(async move { Err(ToolError::from(e)) }),
            }
        };
        Self {
            description,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn description(&self) -> ToolDescription {
        self.description.clone()
    }

    fn execute(&self, args: ToolArgs) -> ToolFuture<'_, Result<String, ToolError>> {
        (self.handler)(args)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.description.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against the schema generated from `description`.
pub fn validate_arguments(description: &ToolDescription, arguments: &Value) -> Result<(), ToolError> {
    let schema = description.input_schema();
    // An unusable schema skips validation rather than blocking the tool.
    let Ok(validator) = jsonschema::validator_for(&schema) else {
        return Ok(());
    };
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::Validation(errors.join("\n")))
    }
}

fn log_tool_call(name: &str, arguments: &Value) {
    let raw = arguments.to_string();
    let preview: String = raw.chars().take(120).collect();
    info!(
        "[tool] {name}({preview}{})",
        if raw.len() > preview.len() { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {raw}");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    impl Tool for EchoTool {
        fn description(&self) -> ToolDescription {
            ToolDescription::new("echo", "Echo the input")
                .param(ToolParameter::required("text", ParamType::String, "Text to echo"))
        }

        fn execute(&self, args: ToolArgs) -> ToolFuture<'_, Result<String, ToolError>> {
            Box::pin(async move { Ok(args.string("text")?) })
        }
    }

    struct PanicTool;

    impl Tool for PanicTool {
        fn description(&self) -> ToolDescription {
            ToolDescription::new("panic", "Always panics")
        }

        fn execute(&self, _args: ToolArgs) -> ToolFuture<'_, Result<String, ToolError>> {
            Box::pin(async { panic!("boom") })
        }
    }

    struct SlowTool;

    impl Tool for SlowTool {
        fn description(&self) -> ToolDescription {
            ToolDescription::new("slow", "Sleeps for a long time")
        }

        fn execute(&self, _args: ToolArgs) -> ToolFuture<'_, Result<String, ToolError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("done".into())
            })
        }
    }

    #[test]
    fn registry_keeps_registration_order() {
        let reg = ToolRegistry::new().with(EchoTool).with(PanicTool).with(SlowTool);
        assert_eq!(reg.names(), vec!["echo", "panic", "slow"]);
        let descs = reg.descriptions();
        assert_eq!(descs[0].parameters.len(), 1);
    }

    #[test]
    fn re_registering_replaces() {
        let reg = ToolRegistry::new().with(EchoTool).with(EchoTool);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn with_if_skips_when_false() {
        let reg = ToolRegistry::new().with_if(false, EchoTool);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn executes_known_tool() {
        let reg = ToolRegistry::new().with(EchoTool);
        let result = reg.execute("echo", &json!({"text": "hello"})).await;
        assert!(result.success);
        assert_eq!(result.content, "hello");
        assert_eq!(result.model_text(), "hello");
    }

    #[tokio::test]
    async fn unknown_tool_is_failure() {
        let reg = ToolRegistry::new().with(EchoTool);
        let result = reg.execute("nope", &json!({})).await;
        assert!(!result.success);
        assert!(result.model_text().contains("unknown tool `nope`"));
    }

    #[tokio::test]
    async fn param_error_surfaces() {
        let reg = ToolRegistry::new().with(EchoTool);
        let result = reg.execute("echo", &json!({"text": 5})).await;
        assert!(!result.success);
        assert!(result.model_text().contains("must be a string"));
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let reg = ToolRegistry::new().with(PanicTool);
        let result = reg.execute("panic", &json!({})).await;
        assert!(!result.success);
        assert!(result.model_text().contains("tool panicked: boom"));
    }

    #[tokio::test]
    async fn timeout_becomes_failure() {
        let reg = ToolRegistry::new()
            .with(SlowTool)
            .with_default_timeout(Some(Duration::from_millis(50)));
        let result = reg.execute("slow", &json!({})).await;
        assert!(!result.success);
        assert!(result.model_text().contains("timed out"));
    }

    #[tokio::test]
    async fn schema_validation_rejects_missing_required() {
        let reg = ToolRegistry::new().with(EchoTool).with_arg_validation(true);
        let result = reg.execute("echo", &json!({})).await;
        assert!(!result.success);
        assert!(result.model_text().contains("argument validation failed"));
    }

    #[tokio::test]
    async fn typed_fn_tool() {
        #[derive(Deserialize, JsonSchema)]
        struct Add {
            /// Left operand.
            a: i64,
            b: i64,
        }
        let tool = FnTool::typed(
            ToolDescription::from_schema::<Add>("add", "Add two integers"),
            |args: Add| async move { Ok((args.a + args.b).to_string()) },
        );
        let reg = ToolRegistry::new().with(tool).with_arg_validation(true);
        assert_eq!(reg.execute("add", &json!({"a": 2, "b": 3})).await.content, "5");
        assert!(!reg.execute("add", &json!({"a": 2})).await.success);
    }

    #[tokio::test]
    async fn closure_fn_tool() {
        let tool = FnTool::new(ToolDescription::new("fail", "Always fails"), |_args| async {
            Err(ToolError::failed("disk full"))
        });
        let reg = ToolRegistry::new().with(tool);
        let result = reg.execute("fail", &json!({})).await;
        assert_eq!(result.model_text(), "Error: disk full");
    }

    #[test]
    fn schema_derivation() {
        #[derive(Deserialize, JsonSchema)]
        #[allow(dead_code)]
        struct Search {
            /// Query text.
            query: String,
            limit: Option<u32>,
            #[serde(default)]
            exact: bool,
        }
        let desc = ToolDescription::from_schema::<Search>("search", "Search");
        let query = desc.parameters.iter().find(|p| p.name == "query").unwrap();
        assert!(query.required);
        assert_eq!(query.param_type, ParamType::String);
        assert_eq!(query.description, "Query text.");
        let limit = desc.parameters.iter().find(|p| p.name == "limit").unwrap();
        assert!(!limit.required);
        assert_eq!(limit.param_type, ParamType::Integer);
        let exact = desc.parameters.iter().find(|p| p.name == "exact").unwrap();
        assert_eq!(exact.param_type, ParamType::Boolean);
        assert_eq!(exact.default, Some(json!(false)));
    }

    #[test]
    fn input_schema_shape() {
        let desc = ToolDescription::new("ls", "List a directory")
            .param(ToolParameter::required("path", ParamType::String, "Directory"))
            .param(ToolParameter::optional("depth", ParamType::Integer, "Depth").with_default(json!(1)));
        let schema = desc.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["properties"]["depth"]["default"], 1);
        assert_eq!(schema["required"], json!(["path"]));
    }
}
