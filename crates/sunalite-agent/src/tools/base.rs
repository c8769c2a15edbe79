//! Tool trait — the interface every agent tool implements.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use sunalite_core::types::ToolDefinition;

use crate::error::{ToolError, ToolResult};

/// Parameters of one tool call, decoded from the model's JSON arguments.
pub type ToolParams = HashMap<String, Value>;

/// Budget used when a tool does not declare its own.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every agent tool implements this trait.
///
/// The registry sends schemas to the model via `to_definition()` and runs
/// calls via `execute()` under the tool's `timeout()`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used by the model to call this tool (e.g. `"read_file"`).
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters.
    ///
    /// Must be `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Wall-clock budget for one call.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    /// Execute the tool. Failures are reported inside the returned result.
    async fn execute(&self, params: ToolParams) -> ToolResult;

    /// Build the `ToolDefinition` sent to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────

/// A decoded tool-call request, ready for dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub params: ToolParams,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, params: ToolParams) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params,
        }
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────
//
// Absent and `null` are treated alike; a present value of the wrong type is
// a `ValidationError`, never silently defaulted.

fn present<'a>(params: &'a ToolParams, key: &str) -> Option<&'a Value> {
    params.get(key).filter(|v| !v.is_null())
}

/// Extract a required string param.
pub fn require_string(params: &ToolParams, key: &str) -> Result<String, ToolError> {
    optional_string(params, key)?
        .ok_or_else(|| ToolError::validation(format!("Missing required parameter: {key}")))
}

/// Extract an optional string param.
pub fn optional_string(params: &ToolParams, key: &str) -> Result<Option<String>, ToolError> {
    match present(params, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ToolError::validation(format!(
            "Parameter '{key}' must be a string, got {other}"
        ))),
    }
}

/// Extract an optional non-negative integer param.
pub fn optional_u64(params: &ToolParams, key: &str) -> Result<Option<u64>, ToolError> {
    match present(params, key) {
        None => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            ToolError::validation(format!(
                "Parameter '{key}' must be a non-negative integer, got {v}"
            ))
        }),
    }
}

/// Extract an optional boolean param.
pub fn optional_bool(params: &ToolParams, key: &str) -> Result<Option<bool>, ToolError> {
    match present(params, key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(ToolError::validation(format!(
            "Parameter '{key}' must be a boolean, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn params(v: Value) -> ToolParams {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_require_string_present() {
        let p = params(json!({"path": "notes.txt"}));
        assert_eq!(require_string(&p, "path").unwrap(), "notes.txt");
    }

    #[test]
    fn test_require_string_missing_or_null() {
        let err = require_string(&ToolParams::new(), "path").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert!(err.message.contains("path"));

        let p = params(json!({"path": null}));
        assert!(require_string(&p, "path").is_err());
    }

    #[test]
    fn test_require_string_wrong_type() {
        let p = params(json!({"path": 42}));
        let err = require_string(&p, "path").unwrap_err();
        assert!(err.message.contains("must be a string"));
    }

    #[test]
    fn test_optional_u64() {
        let p = params(json!({"count": 5, "neg": -1, "text": "5"}));
        assert_eq!(optional_u64(&p, "count").unwrap(), Some(5));
        assert_eq!(optional_u64(&p, "missing").unwrap(), None);
        assert!(optional_u64(&p, "neg").is_err());
        assert!(optional_u64(&p, "text").is_err());
    }

    #[test]
    fn test_optional_bool() {
        let p = params(json!({"recursive": true, "bad": "yes"}));
        assert_eq!(optional_bool(&p, "recursive").unwrap(), Some(true));
        assert_eq!(optional_bool(&p, "missing").unwrap(), None);
        assert!(optional_bool(&p, "bad").is_err());
    }

    #[tokio::test]
    async fn test_default_definition_and_timeout() {
        struct DummyTool;

        #[async_trait]
        impl Tool for DummyTool {
            fn name(&self) -> &str {
                "dummy"
            }
            fn description(&self) -> &str {
                "A test tool"
            }
            fn parameters(&self) -> Value {
                json!({"type": "object", "properties": {"msg": {"type": "string"}}, "required": ["msg"]})
            }
            async fn execute(&self, _params: ToolParams) -> ToolResult {
                ToolResult::ok("ok")
            }
        }

        let def = DummyTool.to_definition();
        assert_eq!(def.function.name, "dummy");
        assert_eq!(def.tool_type, "function");
        assert_eq!(DummyTool.timeout(), DEFAULT_TOOL_TIMEOUT);
        assert!(DummyTool.execute(ToolParams::new()).await.success);
    }
}
