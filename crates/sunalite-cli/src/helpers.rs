//! Shared CLI output helpers — banner, turn results, help text.

use std::fmt::Display;

use colored::Colorize;

use sunalite_agent::{SessionHandle, TurnOutcome, TurnStatus};

/// Print the final text of a turn, flagging turns that ended early.
pub fn print_outcome(outcome: &TurnOutcome) {
    println!();
    println!("{}", "☀ Sunalite".cyan().bold());
    if outcome.text.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{}", outcome.text);
    }
    if let Some(note) = status_note(outcome) {
        println!("{}", note.yellow());
    }
    println!();
}

fn status_note(outcome: &TurnOutcome) -> Option<String> {
    match outcome.status {
        TurnStatus::Completed => None,
        status => Some(format!(
            "⚠ turn {status} after {} model call(s) and {} tool call(s)",
            outcome.iterations, outcome.tool_calls
        )),
    }
}

pub fn print_error(err: &impl Display) {
    eprintln!("\n{} {err}\n", "❌ Error:".red().bold());
}

/// Print the banner shown at REPL start.
pub fn print_banner(handle: &SessionHandle) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "☀ Sunalite".cyan().bold(), version.dimmed());
    println!("{}", format!("session {handle}").dimmed());
    println!(
        "{}",
        "Type a message, /help for commands, or \"exit\" to quit.".dimmed()
    );
    println!();
}

pub fn print_help() {
    println!();
    for (command, about) in [
        ("/help", "show this help"),
        ("/clear", "forget the conversation (workspace is kept)"),
        ("/tools", "list the tools available this session"),
        ("/workspace", "show the workspace path and usage"),
        ("/history", "show the retained conversation"),
        ("/stats", "show session statistics"),
        ("/export [file]", "save the conversation as Markdown"),
        ("/exit", "end the session"),
    ] {
        println!("  {:<16} {}", command.cyan(), about);
    }
    println!("  {}", "Ctrl-C during a turn cancels it.".dimmed());
    println!();
}

/// Print a "thinking" placeholder.
pub fn print_thinking() {
    eprint!("{}", "⠿ thinking...".dimmed());
}

/// Clear the "thinking" placeholder.
pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: TurnStatus) -> TurnOutcome {
        TurnOutcome {
            text: "done".into(),
            status,
            iterations: 3,
            tool_calls: 2,
        }
    }

    #[test]
    fn completed_turn_has_no_note() {
        assert!(status_note(&outcome(TurnStatus::Completed)).is_none());
    }

    #[test]
    fn early_end_is_flagged() {
        let note = status_note(&outcome(TurnStatus::IterationLimit)).unwrap();
        assert!(note.contains("iteration limit reached"));
        assert!(note.contains("3 model call"));
        let note = status_note(&outcome(TurnStatus::Cancelled)).unwrap();
        assert!(note.contains("cancelled"));
    }
}
