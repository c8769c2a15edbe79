//! Configuration schema.
//!
//! Hierarchy: `Config` → `AgentConfig`, `WorkspaceConfig`, `ToolsConfig`,
//! `SearchConfig`, `BrowserConfig`, `SecurityConfig`, `LoggingConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! Every struct is `#[serde(default)]` so partial files fill in the rest.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ConfigError;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration, loaded from `~/.sunalite/config.json` + env vars.
///
/// A `Config` is a finalized snapshot: the agent never reads files or the
/// environment after it has been handed one.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub workspace: WorkspaceConfig,
    pub tools: ToolsConfig,
    pub search: SearchConfig,
    pub browser: BrowserConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.agent;
        if a.model.trim().is_empty() {
            return Err(ConfigError::invalid("agent.model", "must not be empty"));
        }
        if a.max_tokens == 0 {
            return Err(ConfigError::invalid("agent.maxTokens", "must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&a.temperature) {
            return Err(ConfigError::invalid(
                "agent.temperature",
                format!("{} is outside 0.0..=2.0", a.temperature),
            ));
        }
        if a.max_conversation_history == 0 {
            return Err(ConfigError::invalid(
                "agent.maxConversationHistory",
                "must be greater than 0",
            ));
        }
        if a.max_tool_iterations == 0 {
            return Err(ConfigError::invalid(
                "agent.maxToolIterations",
                "must be greater than 0",
            ));
        }
        if a.max_parallel_tools == 0 {
            return Err(ConfigError::invalid(
                "agent.maxParallelTools",
                "must be greater than 0",
            ));
        }
        if a.turn_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "agent.turnTimeoutSeconds",
                "must be greater than 0",
            ));
        }
        if self.workspace.max_size_mb == 0 {
            return Err(ConfigError::invalid("workspace.maxSizeMb", "must be greater than 0"));
        }
        if self.workspace.path.trim().is_empty() {
            return Err(ConfigError::invalid("workspace.path", "must not be empty"));
        }
        let t = &self.tools;
        for (field, secs) in [
            ("tools.fileTimeoutSeconds", t.file_timeout_seconds),
            ("tools.shellTimeoutSeconds", t.shell_timeout_seconds),
            ("tools.webTimeoutSeconds", t.web_timeout_seconds),
            ("tools.browserTimeoutSeconds", t.browser_timeout_seconds),
        ] {
            if secs == 0 {
                return Err(ConfigError::invalid(field, "must be greater than 0"));
            }
        }
        if !(1..=10).contains(&self.search.max_results) {
            return Err(ConfigError::invalid(
                "search.maxResults",
                format!("{} is outside 1..=10", self.search.max_results),
            ));
        }
        Ok(())
    }

    /// Names of the tool groups switched on, for status output.
    pub fn enabled_tool_groups(&self) -> Vec<&'static str> {
        let t = &self.tools;
        let mut groups = Vec::new();
        if t.file_operations {
            groups.push("file_operations");
        }
        if t.shell_commands {
            groups.push("shell_commands");
        }
        if t.web_search {
            groups.push("web_search");
        }
        if t.browser_automation {
            groups.push("browser_automation");
        }
        groups
    }
}

// ─────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────

/// Model backend and loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Model identifier sent to the backend.
    pub model: String,
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    /// Maximum tokens to generate per response.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: f64,
    /// Number of user exchanges retained in the conversation window.
    pub max_conversation_history: usize,
    /// Tool-dispatch rounds allowed per user turn.
    pub max_tool_iterations: u32,
    /// Tool calls executed concurrently within one round.
    pub max_parallel_tools: usize,
    /// Backstop for a whole user turn.
    pub turn_timeout_seconds: u64,
    /// Operator instructions appended to the built-in system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl AgentConfig {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_seconds)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            max_tokens: 4000,
            temperature: 0.7,
            max_conversation_history: 10,
            max_tool_iterations: 20,
            max_parallel_tools: 4,
            turn_timeout_seconds: 300,
            system_prompt: None,
        }
    }
}

// ─────────────────────────────────────────────
// Workspace
// ─────────────────────────────────────────────

/// Where session workspaces live and how large they may grow.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceConfig {
    /// Root directory; each session gets `<path>/<session-id>/`.
    pub path: String,
    /// Byte budget per session, in megabytes.
    pub max_size_mb: u64,
    /// Remove the session directory when the session ends.
    pub auto_cleanup: bool,
    /// Age after which stale session directories are swept.
    pub retention_hours: u64,
}

impl WorkspaceConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: "~/.sunalite/workspace".to_string(),
            max_size_mb: 100,
            auto_cleanup: true,
            retention_hours: 24,
        }
    }
}

// ─────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────

/// Which tool groups are registered, and their per-class timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolsConfig {
    pub file_operations: bool,
    pub shell_commands: bool,
    pub web_search: bool,
    pub browser_automation: bool,
    pub file_timeout_seconds: u64,
    pub shell_timeout_seconds: u64,
    pub web_timeout_seconds: u64,
    pub browser_timeout_seconds: u64,
}

impl ToolsConfig {
    pub fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_seconds)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_seconds)
    }

    pub fn web_timeout(&self) -> Duration {
        Duration::from_secs(self.web_timeout_seconds)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_timeout_seconds)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            file_operations: true,
            shell_commands: true,
            web_search: true,
            browser_automation: true,
            file_timeout_seconds: 10,
            shell_timeout_seconds: 30,
            web_timeout_seconds: 15,
            browser_timeout_seconds: 30,
        }
    }
}

/// Web search settings (Tavily API).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    /// Default number of results when the model does not ask for a count.
    pub max_results: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    /// Search endpoint; overridable for self-hosted proxies and tests.
    pub api_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            api_key: String::new(),
            api_url: "https://api.tavily.com/search".to_string(),
        }
    }
}

/// Text-mode browser settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
    /// Cap on extracted page text returned to the model.
    pub max_text_chars: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: format!("sunalite/{} (text browser)", env!("CARGO_PKG_VERSION")),
            max_text_chars: 20_000,
        }
    }
}

// ─────────────────────────────────────────────
// Security
// ─────────────────────────────────────────────

/// Network and shell restrictions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Master switch for web search, fetch, and browser tools.
    pub allow_network: bool,
    /// Hosts the network tools may reach. Empty allows every host.
    pub allowed_domains: Vec<String>,
    /// Extra substrings that deny a shell command, on top of the built-ins.
    pub block_shell_commands: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_network: true,
            allowed_domains: Vec::new(),
            block_shell_commands: vec!["rm -rf".to_string(), "format".to_string(), "del".to_string()],
        }
    }
}

/// Log level and optional file sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `sunalite_agent=debug`.
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
