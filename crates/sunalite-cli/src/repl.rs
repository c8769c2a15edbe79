//! Interactive REPL.
//!
//! Uses `rustyline` for readline-style editing with persistent history.
//! Ctrl-C while a turn is running cancels that turn; at the prompt it exits.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::{debug, warn};

use sunalite_agent::{AgentError, SessionHandle, SessionManager, SessionStats, TurnOutcome};
use sunalite_core::types::Message;
use sunalite_core::utils::{format_bytes, get_history_path, truncate_string};

use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Characters of each message shown by `/history`.
const HISTORY_PREVIEW_CHARS: usize = 120;

/// Characters of each tool result kept by `/export`.
const EXPORT_TOOL_CHARS: usize = 2000;

// ─────────────────────────────────────────────
// Slash commands
// ─────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Help,
    Clear,
    Tools,
    Workspace,
    History,
    Stats,
    /// Save the conversation as Markdown, optionally to the given path.
    Export(Option<String>),
    Exit,
    Unknown(String),
}

impl ReplCommand {
    /// `None` when the input is a message for the agent.
    fn parse(input: &str) -> Option<Self> {
        let lower = input.trim().to_lowercase();
        if EXIT_COMMANDS.contains(&lower.as_str()) {
            return Some(ReplCommand::Exit);
        }
        if !lower.starts_with('/') {
            return None;
        }
        let name = lower.split_whitespace().next().unwrap_or_default();
        // arguments keep their case
        let argument = input
            .trim()
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim().to_string())
            .filter(|rest| !rest.is_empty());
        Some(match name {
            "/help" | "/?" => ReplCommand::Help,
            "/clear" => ReplCommand::Clear,
            "/tools" => ReplCommand::Tools,
            "/workspace" | "/ws" => ReplCommand::Workspace,
            "/history" => ReplCommand::History,
            "/stats" => ReplCommand::Stats,
            "/export" => ReplCommand::Export(argument),
            other => ReplCommand::Unknown(other.to_string()),
        })
    }
}

// ─────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────

/// Run the interactive REPL loop.
pub async fn run(manager: &SessionManager, handle: &SessionHandle) -> Result<()> {
    helpers::print_banner(handle);

    let mut editor = create_editor()?;

    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) => break,
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Err(e) = editor.add_history_entry(&input) {
            debug!("failed to record history entry: {e}");
        }

        if let Some(command) = ReplCommand::parse(trimmed) {
            if command == ReplCommand::Exit {
                println!("\nGoodbye! 👋");
                break;
            }
            if let Err(e) = run_command(manager, handle, command).await {
                helpers::print_error(&e);
            }
            continue;
        }

        debug!(session = %handle, "processing input");
        helpers::print_thinking();
        let result = submit_interruptible(manager, handle, trimmed).await;
        helpers::clear_thinking();

        match result {
            Ok(outcome) => helpers::print_outcome(&outcome),
            Err(e) => helpers::print_error(&e),
        }
    }

    save_history(&mut editor);
    Ok(())
}

/// Submit one message; Ctrl-C cancels the turn instead of killing the process.
pub async fn submit_interruptible(
    manager: &SessionManager,
    handle: &SessionHandle,
    text: &str,
) -> Result<TurnOutcome, AgentError> {
    let turn = manager.submit_user_message(handle, text);
    tokio::pin!(turn);

    loop {
        tokio::select! {
            outcome = &mut turn => return outcome,
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    helpers::clear_thinking();
                    eprintln!("{}", "⏹ cancelling...".yellow());
                    manager.cancel(handle).await?;
                }
                Err(e) => {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    return (&mut turn).await;
                }
            },
        }
    }
}

async fn run_command(
    manager: &SessionManager,
    handle: &SessionHandle,
    command: ReplCommand,
) -> Result<()> {
    match command {
        ReplCommand::Help => helpers::print_help(),
        ReplCommand::Clear => {
            manager.clear_history(handle).await?;
            println!("{}", "Conversation cleared.".dimmed());
        }
        ReplCommand::Tools => {
            let tools = manager.tool_names(handle).await?;
            println!();
            for name in tools {
                println!("  • {}", name.cyan());
            }
            println!();
        }
        ReplCommand::Workspace => {
            let stats = manager.stats(handle).await?;
            println!();
            println!("  {:<10} {}", "Path:".bold(), stats.workspace.display());
            println!(
                "  {:<10} {} of {}",
                "Used:".bold(),
                format_bytes(stats.workspace_used),
                format_bytes(stats.workspace_limit)
            );
            println!();
        }
        ReplCommand::History => {
            let history = manager.history(handle).await?;
            println!();
            // skip the system prompt
            for message in history.iter().skip(1) {
                println!("  {}", describe(message));
            }
            println!();
        }
        ReplCommand::Stats => {
            let stats = manager.stats(handle).await?;
            let uptime = Utc::now() - stats.started_at;
            println!();
            println!("  {:<12} {}", "Session:".bold(), stats.session_id);
            println!("  {:<12} {}", "Model:".bold(), stats.model);
            println!("  {:<12} {}m {}s", "Uptime:".bold(), uptime.num_minutes(), uptime.num_seconds() % 60);
            println!("  {:<12} {}", "Turns:".bold(), stats.turns);
            println!(
                "  {:<12} {} in {} exchanges ({} evicted)",
                "Messages:".bold(),
                stats.messages,
                stats.exchanges,
                stats.evicted_exchanges
            );
            println!();
        }
        ReplCommand::Export(path) => {
            let history = manager.history(handle).await?;
            let stats = manager.stats(handle).await?;
            let path = path
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default_export_name()));
            std::fs::write(&path, export_markdown(&history, &stats))
                .with_context(|| format!("writing {}", path.display()))?;
            println!("{} {}", "Conversation exported to".green(), path.display());
        }
        ReplCommand::Unknown(name) => {
            println!("{} {name} (try /help)", "Unknown command:".yellow());
        }
        ReplCommand::Exit => {}
    }
    Ok(())
}

/// One-line summary of a message for `/history`.
fn describe(message: &Message) -> String {
    let role = match message {
        Message::User { .. } => "you".green().to_string(),
        Message::Assistant { .. } => "agent".cyan().to_string(),
        Message::Tool { .. } => "tool".yellow().to_string(),
        Message::System { .. } => "system".dimmed().to_string(),
    };
    let calls = message.requested_call_ids();
    let text = truncate_string(&message.text().replace('\n', " "), HISTORY_PREVIEW_CHARS);
    if calls.is_empty() {
        format!("[{role}] {text}")
    } else {
        format!("[{role}] {text} (requested {} tool call(s))", calls.len())
    }
}

// ─────────────────────────────────────────────
// Export
// ─────────────────────────────────────────────

fn default_export_name() -> String {
    format!("sunalite_conversation_{}.md", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Render the retained conversation as a Markdown document.
fn export_markdown(history: &[Message], stats: &SessionStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Sunalite Conversation\n");
    let _ = writeln!(out, "- **Session:** {}", stats.session_id);
    let _ = writeln!(out, "- **Model:** {}", stats.model);
    let _ = writeln!(out, "- **Started:** {}", stats.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "- **Exported:** {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "- **Turns:** {}", stats.turns);
    if stats.evicted_exchanges > 0 {
        let _ = writeln!(
            out,
            "- **Note:** {} earlier exchange(s) fell out of the retention window",
            stats.evicted_exchanges
        );
    }
    out.push('\n');

    for message in history {
        match message {
            Message::System { .. } => continue,
            Message::User { content } => {
                let _ = writeln!(out, "## You\n\n{content}\n");
            }
            Message::Assistant { content, tool_calls, .. } => {
                let _ = writeln!(out, "## Sunalite\n");
                if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                    let _ = writeln!(out, "{text}\n");
                }
                for call in tool_calls.iter().flatten() {
                    let _ = writeln!(
                        out,
                        "- 🔧 `{}` `{}`",
                        call.function.name, call.function.arguments
                    );
                }
                if tool_calls.is_some() {
                    out.push('\n');
                }
            }
            Message::Tool { content, tool_call_id } => {
                let _ = writeln!(
                    out,
                    "<details><summary>Tool result {tool_call_id}</summary>\n\n```json\n{}\n```\n\n</details>\n",
                    truncate_string(content, EXPORT_TOOL_CHARS)
                );
            }
        }
    }
    out
}

// ─────────────────────────────────────────────
// History file
// ─────────────────────────────────────────────

fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = get_history_path();
    if history_path.exists() {
        if let Err(e) = editor.load_history(&history_path) {
            debug!("failed to load history: {e}");
        }
    }

    Ok(editor)
}

fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = get_history_path();
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            debug!("failed to create {}: {e}", parent.display());
            return;
        }
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
