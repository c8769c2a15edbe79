//! Utility helpers: path resolution and string formatting.

use std::path::PathBuf;

/// Get the Sunalite data directory (e.g. `~/.sunalite/`).
pub fn get_data_path() -> PathBuf {
    home_dir().join(".sunalite")
}

/// REPL history file (e.g. `~/.sunalite/history`).
pub fn get_history_path() -> PathBuf {
    get_data_path().join("history")
}

/// Truncate a string to `max_len` characters, adding "..." if truncated.
/// Unicode-safe.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Human-readable byte count, e.g. `1.5 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Expand `~` to the home directory in a path string.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        home_dir()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(path)
    }
}

fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        let result = truncate_string("hello world, this is a long string", 15);
        assert_eq!(result, "hello world,...");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_string("こんにちは世界です", 5), "こん...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(5), "5 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(100 * 1024 * 1024), "100.0 MB");
    }

    #[test]
    fn test_expand_home_tilde() {
        let expanded = expand_home("~/test/path");
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("test/path"));
    }

    #[test]
    fn test_expand_home_absolute() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_home("relative"), PathBuf::from("relative"));
    }

    #[test]
    fn test_data_paths() {
        assert!(get_data_path().ends_with(".sunalite"));
        let history = get_history_path();
        assert!(history.parent().unwrap().ends_with(".sunalite"));
    }
}
