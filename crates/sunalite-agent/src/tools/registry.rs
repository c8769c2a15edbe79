//! Tool Registry — name → tool lookup and guarded dispatch.
//!
//! Populated once when a session starts; read-only afterwards, so the agent
//! loop shares it through an `Arc` without locking.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, warn};

use sunalite_core::types::ToolDefinition;

use super::base::{Tool, ToolCallRequest};
use crate::error::{ErrorKind, ToolResult};

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Stores tools keyed by name and dispatches calls.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Model-facing definitions for all registered tools, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Run one request to completion.
    ///
    /// Always yields exactly one result: unknown names become `UnknownTool`,
    /// overruns become `Timeout`, and a panicking tool becomes
    /// `ExecutionFailed`.
    pub async fn dispatch(&self, request: ToolCallRequest) -> ToolResult {
        let ToolCallRequest { id, name, params } = request;

        let Some(tool) = self.get(&name) else {
            warn!(tool = %name, id = %id, "tool not found");
            return ToolResult::failure(
                ErrorKind::UnknownTool,
                format!("Unknown tool '{name}'. Available tools: {}", self.tool_names().join(", ")),
            );
        };

        let budget = tool.timeout();
        debug!(tool = %name, id = %id, timeout_secs = budget.as_secs(), "dispatching tool call");

        let run = AssertUnwindSafe(tool.execute(params)).catch_unwind();
        let result = match tokio::time::timeout(budget, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let detail = panic_message(panic.as_ref());
                warn!(tool = %name, id = %id, panic = %detail, "tool panicked");
                ToolResult::failure(
                    ErrorKind::ExecutionFailed,
                    format!("Tool '{name}' crashed: {detail}"),
                )
            }
            Err(_) => {
                warn!(tool = %name, id = %id, "tool timed out");
                ToolResult::failure(
                    ErrorKind::Timeout,
                    format!("Timeout: '{name}' exceeded its {}s limit", budget.as_secs()),
                )
            }
        };

        if result.success {
            debug!(tool = %name, id = %id, "tool succeeded");
        } else {
            info!(
                tool = %name,
                id = %id,
                error = ?result.error,
                message = %result.message,
                "tool failed"
            );
        }
        result
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
