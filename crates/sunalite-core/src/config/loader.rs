//! Config loader: reads `~/.sunalite/config.json`, then merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.sunalite/config.json`, or the path given explicitly
//! 3. Environment variables `SUNALITE_<SECTION>__<FIELD>` (override JSON)
//! 4. Conventional fallbacks (`OPENAI_API_KEY`, `TAVILY_API_KEY`, ...) for
//!    secrets still empty after the steps above
//!
//! A broken file at the default location only produces a warning; a broken
//! file the caller pointed at explicitly is an error.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::schema::Config;
use super::ConfigError;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load, override, and validate configuration.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(explicit) => read_config_file(explicit)?,
        None => {
            let default_path = get_config_path();
            match read_config_file(&default_path) {
                Ok(c) => c,
                Err(e) => {
                    warn!("{e}; using defaults");
                    Config::default()
                }
            }
        }
    };

    let config = apply_env_overrides(config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Read a config file. A missing file yields defaults.
fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    use anyhow::Context;

    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&config_path, json)
        .with_context(|| format!("writing {}", config_path.display()))?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `SUNALITE_<SECTION>__<FIELD>` (double underscore as
/// delimiter), e.g. `SUNALITE_AGENT__MODEL` or `SUNALITE_WORKSPACE__MAX_SIZE_MB`.
/// Values that do not parse for the field's type are ignored with a warning.
pub(crate) fn apply_env_overrides<F>(mut config: Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let env = |key: &str| lookup(&format!("SUNALITE_{key}"));

    // Agent
    set_string(&mut config.agent.model, env("AGENT__MODEL"));
    set_string(&mut config.agent.base_url, env("AGENT__BASE_URL"));
    set_string(&mut config.agent.api_key, env("AGENT__API_KEY"));
    set_parsed(&mut config.agent.max_tokens, "AGENT__MAX_TOKENS", env("AGENT__MAX_TOKENS"));
    set_parsed(&mut config.agent.temperature, "AGENT__TEMPERATURE", env("AGENT__TEMPERATURE"));
    set_parsed(
        &mut config.agent.max_conversation_history,
        "AGENT__MAX_CONVERSATION_HISTORY",
        env("AGENT__MAX_CONVERSATION_HISTORY"),
    );
    set_parsed(
        &mut config.agent.max_tool_iterations,
        "AGENT__MAX_TOOL_ITERATIONS",
        env("AGENT__MAX_TOOL_ITERATIONS"),
    );
    set_parsed(
        &mut config.agent.max_parallel_tools,
        "AGENT__MAX_PARALLEL_TOOLS",
        env("AGENT__MAX_PARALLEL_TOOLS"),
    );
    set_parsed(
        &mut config.agent.turn_timeout_seconds,
        "AGENT__TURN_TIMEOUT_SECONDS",
        env("AGENT__TURN_TIMEOUT_SECONDS"),
    );

    // Workspace
    set_string(&mut config.workspace.path, env("WORKSPACE__PATH"));
    set_parsed(&mut config.workspace.max_size_mb, "WORKSPACE__MAX_SIZE_MB", env("WORKSPACE__MAX_SIZE_MB"));
    set_bool(&mut config.workspace.auto_cleanup, env("WORKSPACE__AUTO_CLEANUP"));
    set_parsed(
        &mut config.workspace.retention_hours,
        "WORKSPACE__RETENTION_HOURS",
        env("WORKSPACE__RETENTION_HOURS"),
    );

    // Tools
    set_bool(&mut config.tools.file_operations, env("TOOLS__FILE_OPERATIONS"));
    set_bool(&mut config.tools.shell_commands, env("TOOLS__SHELL_COMMANDS"));
    set_bool(&mut config.tools.web_search, env("TOOLS__WEB_SEARCH"));
    set_bool(&mut config.tools.browser_automation, env("TOOLS__BROWSER_AUTOMATION"));

    // Search / security / logging
    set_string(&mut config.search.api_key, env("SEARCH__API_KEY"));
    set_parsed(&mut config.search.max_results, "SEARCH__MAX_RESULTS", env("SEARCH__MAX_RESULTS"));
    set_bool(&mut config.security.allow_network, env("SECURITY__ALLOW_NETWORK"));
    if let Some(val) = env("SECURITY__ALLOWED_DOMAINS") {
        config.security.allowed_domains = val
            .split(',')
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
    }
    set_string(&mut config.logging.level, env("LOGGING__LEVEL"));

    // Conventional fallbacks, only when nothing more specific was set
    if config.agent.api_key.is_empty() {
        set_string(&mut config.agent.api_key, lookup("OPENAI_API_KEY"));
    }
    if let Some(base) = lookup("OPENAI_BASE_URL") {
        if env("AGENT__BASE_URL").is_none() {
            set_string(&mut config.agent.base_url, Some(base));
        }
    }
    if let Some(model) = lookup("OPENAI_MODEL") {
        if env("AGENT__MODEL").is_none() {
            set_string(&mut config.agent.model, Some(model));
        }
    }
    if config.search.api_key.is_empty() {
        set_string(&mut config.search.api_key, lookup("TAVILY_API_KEY"));
    }

    config
}

fn set_string(field: &mut String, value: Option<String>) {
    if let Some(v) = value {
        if !v.is_empty() {
            *field = v;
        }
    }
}

fn set_bool(field: &mut bool, value: Option<String>) {
    if let Some(v) = value {
        *field = matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
    }
}

fn set_parsed<T: FromStr>(field: &mut T, key: &str, value: Option<String>) {
    if let Some(v) = value {
        match v.parse::<T>() {
            Ok(parsed) => *field = parsed,
            Err(_) => warn!("Ignoring SUNALITE_{key}={v}: not a valid value"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp_json(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = read_config_file(Path::new("/nonexistent/path/config.json")).unwrap();
        assert_eq!(config.agent.max_tokens, 4000);
    }

    #[test]
    fn test_load_valid_json() {
        let file = write_temp_json(r#"{
            "agent": { "model": "gpt-4o", "maxTokens": 2048 },
            "tools": { "shellCommands": false }
        }"#);

        let config = read_config_file(file.path()).unwrap();
        assert_eq!(config.agent.model, "gpt-4o");
        assert_eq!(config.agent.max_tokens, 2048);
        assert!(!config.tools.shell_commands);
        assert_eq!(config.agent.temperature, 0.7);
    }

    #[test]
    fn test_explicit_invalid_json_is_fatal() {
        let file = write_temp_json("not valid json {{{");
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_explicit_invalid_values_fail_validation() {
        let file = write_temp_json(r#"{"agent": {"maxToolIterations": 0}}"#);
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.agent.model = "local-model".to_string();
        config.security.allowed_domains = vec!["docs.rs".to_string()];

        save_config(&config, Some(&path)).unwrap();

        let reloaded = read_config_file(&path).unwrap();
        assert_eq!(reloaded.agent.model, "local-model");
        assert_eq!(reloaded.security.allowed_domains, vec!["docs.rs"]);
    }

    #[test]
    fn test_env_override_fields() {
        let config = apply_env_overrides(
            Config::default(),
            vars(&[
                ("SUNALITE_AGENT__MODEL", "test-model"),
                ("SUNALITE_WORKSPACE__MAX_SIZE_MB", "7"),
                ("SUNALITE_TOOLS__BROWSER_AUTOMATION", "false"),
                ("SUNALITE_SECURITY__ALLOWED_DOMAINS", "a.com, b.org"),
            ]),
        );
        assert_eq!(config.agent.model, "test-model");
        assert_eq!(config.workspace.max_size_mb, 7);
        assert!(!config.tools.browser_automation);
        assert_eq!(config.security.allowed_domains, vec!["a.com", "b.org"]);
    }

    #[test]
    fn test_env_override_bad_number_ignored() {
        let config = apply_env_overrides(
            Config::default(),
            vars(&[("SUNALITE_AGENT__MAX_TOKENS", "lots")]),
        );
        assert_eq!(config.agent.max_tokens, 4000);
    }

    #[test]
    fn test_conventional_fallbacks() {
        let config = apply_env_overrides(
            Config::default(),
            vars(&[
                ("OPENAI_API_KEY", "sk-env"),
                ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
                ("TAVILY_API_KEY", "tvly-env"),
            ]),
        );
        assert_eq!(config.agent.api_key, "sk-env");
        assert_eq!(config.agent.base_url, "http://localhost:11434/v1");
        assert_eq!(config.search.api_key, "tvly-env");
    }

    #[test]
    fn test_specific_env_wins_over_fallback() {
        let config = apply_env_overrides(
            Config::default(),
            vars(&[
                ("SUNALITE_AGENT__API_KEY", "sk-specific"),
                ("OPENAI_API_KEY", "sk-generic"),
                ("SUNALITE_AGENT__MODEL", "m1"),
                ("OPENAI_MODEL", "m2"),
            ]),
        );
        assert_eq!(config.agent.api_key, "sk-specific");
        assert_eq!(config.agent.model, "m1");
    }

    #[test]
    fn test_file_key_kept_over_fallback() {
        let mut base = Config::default();
        base.agent.api_key = "sk-file".to_string();
        let config = apply_env_overrides(base, vars(&[("OPENAI_API_KEY", "sk-env")]));
        assert_eq!(config.agent.api_key, "sk-file");
    }
}
