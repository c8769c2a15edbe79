//! Error taxonomy and the uniform tool result envelope.
//!
//! Tool-level failures never escape as Rust errors: every tool call ends in a
//! [`ToolResult`] whose `error` field carries an [`ErrorKind`]. Only failures
//! that end a turn (backend down, workspace unusable) surface as [`AgentError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use sunalite_providers::ProviderError;

use crate::policy::PolicyViolation;
use crate::workspace::GuardError;

// ─────────────────────────────────────────────
// ErrorKind
// ─────────────────────────────────────────────

/// Classification attached to every failed tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PathEscape,
    QuotaExceeded,
    CommandDenied,
    Timeout,
    DomainNotAllowed,
    ValidationError,
    UnknownTool,
    BackendUnavailable,
    ExecutionFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ─────────────────────────────────────────────
// ToolResult
// ─────────────────────────────────────────────

/// Outcome of exactly one tool call.
///
/// Serialized into the tool message as
/// `{"success", "message", "data"?, "error"?}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(kind),
        }
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Content of the tool message sent back to the model.
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"success":false,"message":"unserializable tool result: {}","error":"ExecutionFailed"}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }
}

// ─────────────────────────────────────────────
// ToolError
// ─────────────────────────────────────────────

/// A classified failure inside a tool, converted to a [`ToolResult`] at the
/// tool boundary.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionFailed, message)
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        ToolResult::failure(err.kind, err.message)
    }
}

impl From<GuardError> for ToolError {
    fn from(err: GuardError) -> Self {
        let kind = match &err {
            GuardError::PathEscape { .. } => ErrorKind::PathEscape,
            GuardError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            GuardError::InvalidSessionId(_) => ErrorKind::ValidationError,
            GuardError::Io { .. } => ErrorKind::ExecutionFailed,
        };
        ToolError::new(kind, err.to_string())
    }
}

impl From<PolicyViolation> for ToolError {
    fn from(err: PolicyViolation) -> Self {
        let kind = match &err {
            PolicyViolation::NetworkDisabled | PolicyViolation::DomainNotAllowed { .. } => {
                ErrorKind::DomainNotAllowed
            }
            PolicyViolation::InvalidUrl(_) => ErrorKind::ValidationError,
            _ => ErrorKind::CommandDenied,
        };
        ToolError::new(kind, err.to_string())
    }
}

// ─────────────────────────────────────────────
// AgentError
// ─────────────────────────────────────────────

/// Failures that end a turn or prevent a session from starting.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model backend unavailable: {0}")]
    BackendUnavailable(#[from] ProviderError),

    #[error("workspace setup failed: {0}")]
    Workspace(#[from] GuardError),

    #[error("invalid configuration: {0}")]
    Config(#[from] sunalite_core::config::ConfigError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("unknown session: {0}")]
    UnknownSession(String),
}

impl AgentError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AgentError::BackendUnavailable(_) => Some(ErrorKind::BackendUnavailable),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
