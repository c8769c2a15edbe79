//! Shell tool — run a command in the session workspace.
//!
//! The command string is screened by [`CommandPolicy`] before anything is
//! spawned. The child runs in its own process group so a timeout or a
//! cancelled turn takes down everything it started, not just `sh`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use super::base::{optional_string, optional_u64, require_string, Tool, ToolParams};
use crate::error::{ErrorKind, ToolError, ToolResult};
use crate::policy::CommandPolicy;
use crate::workspace::WorkspaceGuard;

/// Maximum output length before truncation (characters).
pub const MAX_OUTPUT_CHARS: usize = 10_000;

/// Variables the model may not set through `environment`. Entries ending
/// in `*` match by prefix.
const PROTECTED_ENV: &[&str] = &[
    "PATH", "HOME", "SHELL", "IFS", "ENV", "BASH_ENV", "PS4", "LD_*", "DYLD_*", "WORKSPACE*",
];

fn is_protected_env(key: &str) -> bool {
    let key = key.to_ascii_uppercase();
    PROTECTED_ENV.iter().any(|rule| match rule.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == *rule,
    })
}

/// Extra time the registry allows on top of the command budget, so the
/// tool's own timeout (with its process-group kill) fires first.
const KILL_GRACE: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────
// Process-group guard
// ─────────────────────────────────────────────

/// Kills the child's process group when dropped, unless disarmed.
///
/// Dropping the wait future (timeout, cancelled turn) drops this guard.
struct GroupKill {
    pgid: Option<u32>,
}

impl GroupKill {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else { return };
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                if e != nix::errno::Errno::ESRCH {
                    warn!(pgid, error = %e, "failed to kill process group");
                }
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

// ─────────────────────────────────────────────
// ExecTool
// ─────────────────────────────────────────────

/// Execute shell commands in a subprocess.
pub struct ExecTool {
    guard: Arc<WorkspaceGuard>,
    policy: Arc<CommandPolicy>,
    /// Upper bound for one command; callers may ask for less.
    timeout: Duration,
}

impl ExecTool {
    pub fn new(guard: Arc<WorkspaceGuard>, policy: Arc<CommandPolicy>, timeout: Duration) -> Self {
        Self {
            guard,
            policy,
            timeout,
        }
    }

    fn shell_command(command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    fn parse_environment(params: &ToolParams) -> Result<HashMap<String, String>, ToolError> {
        let mut env = HashMap::new();
        match params.get("environment") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    if key.is_empty() || key.contains('=') || key.contains('\0') {
                        return Err(ToolError::validation(format!(
                            "Invalid environment variable name '{key}'"
                        )));
                    }
                    if is_protected_env(key) {
                        return Err(ToolError::validation(format!(
                            "Environment variable '{key}' cannot be overridden"
                        )));
                    }
                    let Value::String(value) = value else {
                        return Err(ToolError::validation(format!(
                            "Environment variable '{key}' must be a string"
                        )));
                    };
                    env.insert(key.clone(), value.clone());
                }
            }
            Some(other) => {
                return Err(ToolError::validation(format!(
                    "Parameter 'environment' must be an object, got {other}"
                )))
            }
        }
        Ok(env)
    }

    async fn run(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let command = require_string(&params, "command")?;
        self.policy.check(&command).map_err(|violation| {
            warn!(command = %command, rule = %violation, "command blocked by policy");
            ToolError::from(violation)
        })?;

        let cwd: PathBuf = match optional_string(&params, "working_dir")? {
            Some(dir) => self.guard.resolve(&dir)?,
            None => self.guard.root().to_path_buf(),
        };
        if !cwd.is_dir() {
            return Err(ToolError::validation(format!(
                "Working directory does not exist: {}",
                self.guard.display_path(&cwd)
            )));
        }

        let budget = optional_u64(&params, "timeout")?
            .map(|secs| Duration::from_secs(secs.max(1)).min(self.timeout))
            .unwrap_or(self.timeout);
        let extra_env = Self::parse_environment(&params)?;

        info!(command = %command, cwd = %cwd.display(), timeout_secs = budget.as_secs(), "executing shell command");

        let mut cmd = Self::shell_command(&command);
        cmd.current_dir(&cwd)
            .envs(&extra_env)
            .env("WORKSPACE", self.guard.root())
            .env("WORKSPACE_TEMP", self.guard.temp_dir())
            .env("WORKSPACE_OUTPUT", self.guard.output_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Shell writes bypass reservations; charge the on-disk change instead.
        let before = self.guard.measure();
        let child = cmd
            .spawn()
            .map_err(|e| ToolError::execution(format!("Failed to spawn command: {e}")))?;
        let mut group = GroupKill::new(child.id());

        let waited = tokio::time::timeout(budget, child.wait_with_output()).await;
        let output = match waited {
            Ok(Ok(output)) => {
                group.disarm();
                output
            }
            Ok(Err(e)) => {
                drop(group);
                self.guard.apply_disk_delta(before, self.guard.measure());
                return Err(ToolError::execution(format!("Command failed: {e}")));
            }
            Err(_) => {
                drop(group);
                self.guard.apply_disk_delta(before, self.guard.measure());
                return Err(ToolError::new(
                    ErrorKind::Timeout,
                    format!("Timeout: command exceeded {}s and was killed", budget.as_secs()),
                ));
            }
        };

        let used = self.guard.apply_disk_delta(before, self.guard.measure());
        if used > self.guard.limit() {
            warn!(used, limit = self.guard.limit(), "shell command pushed workspace over quota");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let mut parts = Vec::new();
        if !stdout.is_empty() {
            parts.push(stdout.into_owned());
        }
        if !stderr.is_empty() {
            parts.push(format!("STDERR:\n{stderr}"));
        }
        let combined = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };
        let (combined, truncated) = truncate_output(combined);

        let data = json!({
            "command": command,
            "workingDir": self.guard.display_path(&cwd),
            "exitCode": code,
            "output": combined,
            "truncated": truncated,
        });

        if output.status.success() {
            Ok(ToolResult::ok(combined).with_data(data))
        } else {
            Ok(ToolResult::failure(
                ErrorKind::ExecutionFailed,
                format!("Command exited with code {code}\n{combined}"),
            )
            .with_data(data))
        }
    }
}

/// Keep the first [`MAX_OUTPUT_CHARS`] characters.
fn truncate_output(text: String) -> (String, bool) {
    let total = text.chars().count();
    if total <= MAX_OUTPUT_CHARS {
        return (text, false);
    }
    let mut kept: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
    kept.push_str(&format!("\n... (truncated, {} more chars)", total - MAX_OUTPUT_CHARS));
    (kept, true)
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a single shell command in the session workspace and return its output. \
         Pipes, redirection, and command chaining are not allowed. \
         $WORKSPACE, $WORKSPACE_TEMP, and $WORKSPACE_OUTPUT point at the session directories."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Directory relative to the workspace root (default: the root)"
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Timeout in seconds, capped by the configured limit"
                },
                "environment": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "Extra environment variables (PATH, HOME, LD_* and WORKSPACE* cannot be set)"
                }
            },
            "required": ["command"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout + KILL_GRACE
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.run(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn setup(timeout: Duration) -> (tempfile::TempDir, Arc<WorkspaceGuard>, ExecTool) {
        let dir = tempfile::tempdir().unwrap();
        let guard = Arc::new(WorkspaceGuard::create(dir.path(), "shell-test", 1_000_000).unwrap());
        let tool = ExecTool::new(guard.clone(), Arc::new(CommandPolicy::default()), timeout);
        (dir, guard, tool)
    }

    fn params(v: Value) -> ToolParams {
        serde_json::from_value(v).unwrap()
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let (_dir, _guard, tool) = setup(Duration::from_secs(10));
        let result = tool.execute(params(json!({"command": "echo hello"}))).await;
        assert!(result.success, "{}", result.message);
        assert!(result.message.contains("hello"));
        assert_eq!(result.data.unwrap()["exitCode"], 0);
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit() {
        let (_dir, _guard, tool) = setup(Duration::from_secs(10));
        let result = tool.execute(params(json!({"command": "exit 42"}))).await;
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::ExecutionFailed));
        assert_eq!(result.data.unwrap()["exitCode"], 42);
    }

    #[tokio::test]
    async fn test_denied_command_not_spawned() {
        let (_dir, guard, tool) = setup(Duration::from_secs(10));
        let result = tool
            .execute(params(json!({"command": "touch proof.txt && rm -rf /"})))
            .await;
        assert_eq!(result.error, Some(ErrorKind::CommandDenied));
        assert!(result.message.contains("rm -rf /"));
        assert!(!guard.root().join("proof.txt").exists());
    }

    #[tokio::test]
    async fn test_metacharacter_denied() {
        let (_dir, _guard, tool) = setup(Duration::from_secs(10));
        let result = tool.execute(params(json!({"command": "echo hi > out.txt"}))).await;
        assert_eq!(result.error, Some(ErrorKind::CommandDenied));
    }

    #[tokio::test]
    async fn test_workspace_env_and_cwd() {
        let (_dir, guard, tool) = setup(Duration::from_secs(10));
        let result = tool.execute(params(json!({"command": "printenv WORKSPACE_OUTPUT"}))).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.message.trim(), guard.output_dir().display().to_string());

        let pwd = tool.execute(params(json!({"command": "pwd -P", "working_dir": "temp"}))).await;
        assert_eq!(pwd.message.trim(), guard.temp_dir().display().to_string());
    }

    #[tokio::test]
    async fn test_extra_environment() {
        let (_dir, _guard, tool) = setup(Duration::from_secs(10));
        let result = tool
            .execute(params(json!({"command": "printenv GREETING", "environment": {"GREETING": "hey"}})))
            .await;
        assert_eq!(result.message.trim(), "hey");

        let bad = tool
            .execute(params(json!({"command": "true", "environment": {"N": 1}})))
            .await;
        assert_eq!(bad.error, Some(ErrorKind::ValidationError));
    }

    #[tokio::test]
    async fn test_protected_environment_rejected() {
        let (_dir, guard, tool) = setup(Duration::from_secs(10));
        for key in ["PATH", "ld_preload", "LD_LIBRARY_PATH", "WORKSPACE_OUTPUT", "BASH_ENV"] {
            let result = tool
                .execute(params(json!({"command": "touch ran.txt", "environment": {key: "/tmp"}})))
                .await;
            assert_eq!(result.error, Some(ErrorKind::ValidationError), "{key}");
            assert!(result.message.contains("cannot be overridden"), "{}", result.message);
        }
        let bad_name = tool
            .execute(params(json!({"command": "true", "environment": {"A=B": "x"}})))
            .await;
        assert_eq!(bad_name.error, Some(ErrorKind::ValidationError));
        assert!(!guard.root().join("ran.txt").exists());
    }

    #[test]
    fn test_is_protected_env() {
        assert!(is_protected_env("Path"));
        assert!(is_protected_env("DYLD_INSERT_LIBRARIES"));
        assert!(!is_protected_env("GREETING"));
        assert!(!is_protected_env("PATHOLOGY"));
    }

    #[tokio::test]
    async fn test_working_dir_escape() {
        let (_dir, _guard, tool) = setup(Duration::from_secs(10));
        let result = tool
            .execute(params(json!({"command": "ls", "working_dir": "../.."})))
            .await;
        assert_eq!(result.error, Some(ErrorKind::PathEscape));
    }

    #[tokio::test]
    async fn test_exec_timeout_kills() {
        let (_dir, _guard, tool) = setup(Duration::from_secs(1));
        let started = std::time::Instant::now();
        let result = tool.execute(params(json!({"command": "sleep 30"}))).await;
        assert_eq!(result.error, Some(ErrorKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_truncated() {
        let (_dir, _guard, tool) = setup(Duration::from_secs(10));
        let result = tool.execute(params(json!({"command": "seq 1 10000"}))).await;
        assert!(result.success);
        assert!(result.message.contains("truncated"));
        assert_eq!(result.data.unwrap()["truncated"], true);
    }

    #[tokio::test]
    async fn test_command_writes_are_charged() {
        let (_dir, guard, tool) = setup(Duration::from_secs(10));
        std::fs::write(guard.root().join("seed.txt"), "123456").unwrap();
        let result = tool.execute(params(json!({"command": "cp seed.txt copy.txt"}))).await;
        assert!(result.success, "{}", result.message);
        assert!(guard.root().join("copy.txt").exists());
        assert_eq!(guard.used(), 6);
    }

    #[tokio::test]
    async fn test_command_keeps_concurrent_reservation() {
        let (_dir, guard, tool) = setup(Duration::from_secs(10));
        let pending = guard.reserve(40).unwrap();
        let result = tool.execute(params(json!({"command": "true"}))).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(guard.used(), 40);
        pending.commit();
        assert_eq!(guard.used(), 40);
    }

    #[test]
    fn test_truncate_output_char_safe() {
        let text = "é".repeat(MAX_OUTPUT_CHARS + 5);
        let (kept, truncated) = truncate_output(text);
        assert!(truncated);
        assert!(kept.starts_with(&"é".repeat(MAX_OUTPUT_CHARS)));
        assert!(kept.ends_with("5 more chars)"));
    }

    #[test]
    fn test_tool_definition() {
        let (_dir, _guard, tool) = setup(Duration::from_secs(3));
        let def = tool.to_definition();
        assert_eq!(def.function.name, "exec");
        assert_eq!(tool.timeout(), Duration::from_secs(4));
    }
}
