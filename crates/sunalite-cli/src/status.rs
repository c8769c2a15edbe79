//! `sunalite status` and `sunalite cleanup`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

use sunalite_agent::workspace::{dir_size, sweep_stale_sessions};
use sunalite_core::config::{get_config_path, Config};
use sunalite_core::utils::{expand_home, format_bytes};

/// Session directories under the workspace root and their total size.
#[derive(Debug, Default, PartialEq)]
struct WorkspaceUsage {
    sessions: usize,
    bytes: u64,
}

fn workspace_usage(base: &Path) -> WorkspaceUsage {
    let Ok(entries) = std::fs::read_dir(base) else {
        return WorkspaceUsage::default();
    };
    entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .fold(WorkspaceUsage::default(), |mut acc, e| {
            acc.sessions += 1;
            acc.bytes += dir_size(&e.path());
            acc
        })
}

fn key_status(key: &str) -> String {
    if key.trim().is_empty() {
        format!("{}", "· not configured".dimmed())
    } else {
        format!("{} (key set)", "✓".green())
    }
}

/// Run the status command.
pub fn run(config: &Config, as_json: bool) -> Result<()> {
    let config_path = get_config_path();
    let base = expand_home(&config.workspace.path);
    let usage = workspace_usage(&base);

    if as_json {
        let summary = json!({
            "configPath": config_path,
            "configFound": config_path.exists(),
            "model": config.agent.model,
            "baseUrl": config.agent.base_url,
            "apiKeySet": !config.agent.api_key.trim().is_empty(),
            "toolGroups": config.enabled_tool_groups(),
            "workspace": {
                "path": base,
                "sessions": usage.sessions,
                "bytes": usage.bytes,
                "limitPerSession": config.workspace.max_size_bytes(),
                "autoCleanup": config.workspace.auto_cleanup,
                "retentionHours": config.workspace.retention_hours,
            },
            "network": {
                "allowed": config.security.allow_network,
                "domains": config.security.allowed_domains,
            },
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("{}", "☀ Sunalite Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(defaults)".yellow().to_string()
        }
    );
    println!("  {:<18} {} @ {}", "Model:".bold(), config.agent.model, config.agent.base_url.dimmed());
    println!("  {:<18} {}", "API key:".bold(), key_status(&config.agent.api_key));
    println!(
        "  {:<18} {} | max_tokens: {} | window: {} exchanges",
        "Parameters:".bold(),
        format!("temp: {}", config.agent.temperature).dimmed(),
        config.agent.max_tokens,
        config.agent.max_conversation_history,
    );

    println!();
    println!("  {}", "Tools:".bold());
    let groups = config.enabled_tool_groups();
    for group in ["file_operations", "shell_commands", "web_search", "browser_automation"] {
        let mark = if groups.contains(&group) {
            "✓".green().to_string()
        } else {
            "·".dimmed().to_string()
        };
        println!("    {mark} {group}");
    }
    println!("  {:<18} {}", "Search:".bold(), key_status(&config.search.api_key));
    let network = if !config.security.allow_network {
        "disabled".red().to_string()
    } else if config.security.allowed_domains.is_empty() {
        "any domain".to_string()
    } else {
        config.security.allowed_domains.join(", ")
    };
    println!("  {:<18} {}", "Network:".bold(), network);

    println!();
    println!("  {:<18} {}", "Workspace:".bold(), base.display());
    println!(
        "  {:<18} {} session(s), {} (limit {} each)",
        "Usage:".bold(),
        usage.sessions,
        format_bytes(usage.bytes),
        format_bytes(config.workspace.max_size_bytes())
    );
    println!();

    Ok(())
}

/// Sweep stale session workspaces.
pub fn cleanup(config: &Config) -> Result<()> {
    let base = expand_home(&config.workspace.path);
    let removed: Vec<PathBuf> = sweep_stale_sessions(&base, config.workspace.retention(), &[])
        .with_context(|| format!("sweeping {}", base.display()))?;

    if removed.is_empty() {
        println!(
            "{} no workspaces older than {}h under {}",
            "✓".green(),
            config.workspace.retention_hours,
            base.display()
        );
    } else {
        for path in &removed {
            println!("  {} removed {}", "✓".green(), path.display());
        }
        println!("{} workspace(s) removed", removed.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_counts_session_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/output")).unwrap();
        std::fs::write(dir.path().join("a/output/x.txt"), "12345").unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), "ignored").unwrap();

        let usage = workspace_usage(dir.path());
        assert_eq!(usage, WorkspaceUsage { sessions: 2, bytes: 5 });
    }

    #[test]
    fn usage_of_missing_root_is_empty() {
        assert_eq!(workspace_usage(Path::new("/nonexistent/sunalite")), WorkspaceUsage::default());
    }

    #[test]
    fn cleanup_removes_expired_sessions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("old")).unwrap();
        let mut config = Config::default();
        config.workspace.path = dir.path().to_string_lossy().to_string();
        config.workspace.retention_hours = 0;

        cleanup(&config).unwrap();
        assert!(!dir.path().join("old").exists());
    }
}
