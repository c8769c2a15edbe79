//! Tool modules for the Sunalite agent.

pub mod base;
pub mod browser;
pub mod filesystem;
pub mod html;
pub mod registry;
pub mod shell;
pub mod web;

use std::sync::Arc;

use tracing::info;

use sunalite_core::config::Config;

pub use base::{
    optional_bool, optional_string, optional_u64, require_string, Tool, ToolCallRequest,
    ToolParams,
};
pub use browser::{BrowserDriver, BrowserTool, HttpBrowserDriver, Page};
pub use filesystem::{
    CopyPathTool, CreateDirTool, DeletePathTool, EditFileTool, FileInfoTool, ListDirTool,
    MovePathTool, ReadFileTool, SearchFilesTool, WriteFileTool,
};
pub use registry::ToolRegistry;
pub use shell::ExecTool;
pub use web::{WebAnalyzeTool, WebExtractTool, WebFetchTool, WebSearchTool};

use crate::error::AgentError;
use crate::policy::{CommandPolicy, DomainPolicy};
use crate::workspace::WorkspaceGuard;

/// Build the registry for one session from the enabled tool groups.
///
/// Each session gets its own policies and HTTP clients; nothing here is
/// shared across sessions.
pub fn build_registry(config: &Config, guard: Arc<WorkspaceGuard>) -> Result<ToolRegistry, AgentError> {
    let tools = &config.tools;
    let mut registry = ToolRegistry::new();

    if tools.file_operations {
        let timeout = tools.file_timeout();
        registry.register(Arc::new(ReadFileTool::new(guard.clone(), timeout)));
        registry.register(Arc::new(WriteFileTool::new(guard.clone(), timeout)));
        registry.register(Arc::new(EditFileTool::new(guard.clone(), timeout)));
        registry.register(Arc::new(ListDirTool::new(guard.clone(), timeout)));
        registry.register(Arc::new(DeletePathTool::new(guard.clone(), timeout)));
        registry.register(Arc::new(SearchFilesTool::new(guard.clone(), timeout)));
        registry.register(Arc::new(CreateDirTool::new(guard.clone(), timeout)));
        registry.register(Arc::new(FileInfoTool::new(guard.clone(), timeout)));
        registry.register(Arc::new(CopyPathTool::new(guard.clone(), timeout)));
        registry.register(Arc::new(MovePathTool::new(guard.clone(), timeout)));
    }

    if tools.shell_commands {
        let policy = Arc::new(CommandPolicy::from_config(&config.security));
        registry.register(Arc::new(ExecTool::new(guard.clone(), policy, tools.shell_timeout())));
    }

    let domains = Arc::new(DomainPolicy::from_config(&config.security));
    let user_agent = config.browser.user_agent.as_str();

    if tools.web_search {
        let timeout = tools.web_timeout();
        registry.register(Arc::new(WebSearchTool::new(
            &config.search,
            domains.clone(),
            user_agent,
            timeout,
        )?));
        registry.register(Arc::new(WebFetchTool::new(domains.clone(), user_agent, timeout)?));
        registry.register(Arc::new(WebExtractTool::new(domains.clone(), user_agent, timeout)?));
        registry.register(Arc::new(WebAnalyzeTool::new(domains.clone(), user_agent, timeout)?));
    }

    if tools.browser_automation {
        let driver = HttpBrowserDriver::new(&config.browser, domains.clone())?;
        registry.register(Arc::new(BrowserTool::new(
            Arc::new(driver),
            domains,
            tools.browser_timeout(),
        )));
    }

    info!(
        session = guard.session_id(),
        tools = registry.len(),
        "tool registry ready"
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> (tempfile::TempDir, Arc<WorkspaceGuard>) {
        let dir = tempfile::tempdir().unwrap();
        let guard = WorkspaceGuard::create(dir.path(), "registry-test", 1024).unwrap();
        (dir, Arc::new(guard))
    }

    #[test]
    fn test_all_groups_enabled_by_default() {
        let (_dir, guard) = guard();
        let registry = build_registry(&Config::default(), guard).unwrap();
        assert_eq!(
            registry.tool_names(),
            vec![
                "browser",
                "copy_path",
                "create_dir",
                "delete_path",
                "edit_file",
                "exec",
                "file_info",
                "list_dir",
                "move_path",
                "read_file",
                "search_files",
                "web_analyze",
                "web_extract",
                "web_fetch",
                "web_search",
                "write_file",
            ]
        );
    }

    #[test]
    fn test_disabled_groups_not_registered() {
        let (_dir, guard) = guard();
        let mut config = Config::default();
        config.tools.shell_commands = false;
        config.tools.web_search = false;
        config.tools.browser_automation = false;

        let registry = build_registry(&config, guard).unwrap();
        assert!(!registry.has("exec"));
        assert!(!registry.has("web_fetch"));
        assert!(!registry.has("web_extract"));
        assert!(!registry.has("browser"));
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_per_class_timeouts_applied() {
        let (_dir, guard) = guard();
        let mut config = Config::default();
        config.tools.file_timeout_seconds = 3;
        config.tools.web_timeout_seconds = 7;

        let registry = build_registry(&config, guard).unwrap();
        let read = registry.get("read_file").unwrap();
        assert_eq!(read.timeout(), std::time::Duration::from_secs(3));
        let fetch = registry.get("web_fetch").unwrap();
        assert_eq!(fetch.timeout(), std::time::Duration::from_secs(7));
    }
}
