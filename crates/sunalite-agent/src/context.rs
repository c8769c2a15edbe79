//! Context builder — constructs the system prompt for a session.
//!
//! The prompt tells the model who it is, where its workspace lives, which
//! tools it may call, and what the network rules are. Operator instructions
//! from `agent.systemPrompt` are appended last.

use std::path::PathBuf;

use chrono::Utc;

use sunalite_core::config::Config;
use sunalite_core::utils::format_bytes;

use crate::tools::ToolRegistry;
use crate::workspace::{WorkspaceGuard, OUTPUT_DIR, TEMP_DIR};

/// Name the agent introduces itself by.
pub const AGENT_NAME: &str = "Sunalite";

// ─────────────────────────────────────────────
// Context builder
// ─────────────────────────────────────────────

/// Builds the system prompt for one session.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    agent_name: String,
    workspace: PathBuf,
    quota_bytes: Option<u64>,
    tool_names: Vec<String>,
    allow_network: bool,
    allowed_domains: Vec<String>,
    instructions: Option<String>,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            agent_name: AGENT_NAME.to_string(),
            workspace: workspace.into(),
            quota_bytes: None,
            tool_names: Vec::new(),
            allow_network: true,
            allowed_domains: Vec::new(),
            instructions: None,
        }
    }

    /// Everything a session knows at start-up.
    pub fn for_session(config: &Config, guard: &WorkspaceGuard, registry: &ToolRegistry) -> Self {
        Self::new(guard.root())
            .with_quota(guard.limit())
            .with_tools(registry.tool_names())
            .with_network(config.security.allow_network, config.security.allowed_domains.clone())
            .with_instructions(config.agent.system_prompt.clone())
    }

    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    pub fn with_tools(mut self, names: Vec<String>) -> Self {
        self.tool_names = names;
        self
    }

    pub fn with_network(mut self, allow: bool, domains: Vec<String>) -> Self {
        self.allow_network = allow;
        self.allowed_domains = domains;
        self
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions.filter(|s| !s.trim().is_empty());
        self
    }

    // ────────────── System prompt ──────────────

    /// Build the full system prompt.
    pub fn build_system_prompt(&self) -> String {
        let mut parts = vec![self.build_identity(), self.build_workspace_rules()];

        if !self.tool_names.is_empty() {
            parts.push(self.build_tools_section());
        }
        if let Some(instructions) = &self.instructions {
            parts.push(format!("# Instructions\n\n{}", instructions.trim()));
        }

        parts.join("\n\n---\n\n")
    }

    fn build_identity(&self) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;

        format!(
            "# Identity\n\n\
             You are **{name}**, an AI assistant that completes tasks by calling tools.\n\n\
             - **Date/time**: {now}\n\
             - **Runtime**: Rust on {os}/{arch}\n\
             - **Workspace**: `{workspace}`\n\n\
             Think about which tools you need, call them, read their results, and \
             answer once you have what you need. Every tool result is JSON with \
             `success`, `message`, and optionally `data` and `error`.",
            name = self.agent_name,
            workspace = self.workspace.display(),
        )
    }

    fn build_workspace_rules(&self) -> String {
        let mut rules = format!(
            "# Workspace\n\n\
             - All file paths are relative to the workspace root; paths outside it are rejected.\n\
             - Put scratch files in `{TEMP_DIR}/` and deliverables in `{OUTPUT_DIR}/`.\n\
             - Shell commands run in the workspace; pipes, redirection, and chaining \
             (`|`, `>`, `&&`, `;`) are blocked, so run one command per call."
        );
        if let Some(quota) = self.quota_bytes {
            rules.push_str(&format!(
                "\n- The workspace holds at most {} in total.",
                format_bytes(quota)
            ));
        }
        rules
    }

    fn build_tools_section(&self) -> String {
        let mut section = format!("# Tools\n\nAvailable: {}.", self.tool_names.join(", "));

        let uses_network = self
            .tool_names
            .iter()
            .any(|n| matches!(n.as_str(), "web_search" | "web_fetch" | "web_extract" | "web_analyze" | "browser"));
        if uses_network {
            if !self.allow_network {
                section.push_str("\n\nNetwork access is disabled; web tools will refuse every request.");
            } else if !self.allowed_domains.is_empty() {
                section.push_str(&format!(
                    "\n\nWeb access is limited to these domains and their subdomains: {}.",
                    self.allowed_domains.join(", ")
                ));
            }
        }
        section
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_identity_and_workspace() {
        let prompt = ContextBuilder::new("/tmp/ws/abc").build_system_prompt();
        assert!(prompt.contains("# Identity"));
        assert!(prompt.contains("Sunalite"));
        assert!(prompt.contains("/tmp/ws/abc"));
        assert!(prompt.contains("output/"));
        assert!(!prompt.contains("# Tools"));
    }

    #[test]
    fn test_tools_and_network_rules() {
        let prompt = ContextBuilder::new("/ws")
            .with_tools(vec!["read_file".into(), "web_fetch".into()])
            .with_network(true, vec!["docs.rs".into()])
            .build_system_prompt();
        assert!(prompt.contains("Available: read_file, web_fetch."));
        assert!(prompt.contains("docs.rs"));

        let offline = ContextBuilder::new("/ws")
            .with_tools(vec!["web_search".into()])
            .with_network(false, Vec::new())
            .build_system_prompt();
        assert!(offline.contains("Network access is disabled"));
    }

    #[test]
    fn test_instructions_appended_last() {
        let prompt = ContextBuilder::new("/ws")
            .with_quota(1024)
            .with_instructions(Some("Answer in French.".into()))
            .build_system_prompt();
        assert!(prompt.ends_with("Answer in French."));
        assert!(prompt.contains("1.0 KB"));

        let blank = ContextBuilder::new("/ws")
            .with_instructions(Some("   ".into()))
            .build_system_prompt();
        assert!(!blank.contains("# Instructions"));
    }

    #[test]
    fn test_for_session_uses_registry_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let guard = std::sync::Arc::new(WorkspaceGuard::create(dir.path(), "ctx", 2048).unwrap());
        let mut config = Config::default();
        config.agent.system_prompt = Some("Be brief.".into());
        config.tools.web_search = false;
        config.tools.browser_automation = false;
        let registry = crate::tools::build_registry(&config, guard.clone()).unwrap();

        let prompt = ContextBuilder::for_session(&config, &guard, &registry).build_system_prompt();
        assert!(prompt.contains("exec"));
        assert!(!prompt.contains("web_fetch"));
        assert!(prompt.contains("Be brief."));
    }
}
