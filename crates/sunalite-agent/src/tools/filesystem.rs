//! File tools: read, write, edit, list, delete, search, create, inspect,
//! copy, and move.
//!
//! Every path goes through [`WorkspaceGuard::resolve`] (or
//! [`WorkspaceGuard::resolve_entry`] when the operation acts on a link
//! itself); every write reserves its byte growth through
//! [`WorkspaceGuard::reserve`] before touching disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glob::Pattern;
use serde_json::{json, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use sunalite_core::utils::format_bytes;

use super::base::{optional_bool, optional_string, optional_u64, require_string, Tool, ToolParams};
use crate::error::{ToolError, ToolResult};
use crate::workspace::{dir_size, WorkspaceGuard};

/// Files longer than this (in characters) are returned as a preview.
pub const MAX_READ_CHARS: usize = 50_000;
/// Size of the preview returned for oversized files.
pub const READ_PREVIEW_CHARS: usize = 5_000;
/// Upper bound on entries returned by `list_dir`.
pub const MAX_LIST_ENTRIES: usize = 500;
/// Upper bound on matches returned by `search_files`.
pub const MAX_SEARCH_RESULTS: usize = 200;

fn io_failure(action: &str, shown: &str, err: std::io::Error) -> ToolError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ToolError::validation(format!("Not found: {shown}"))
    } else {
        ToolError::execution(format!("Failed to {action} {shown}: {err}"))
    }
}

// ─────────────────────────────────────────────
// ReadFileTool
// ─────────────────────────────────────────────

/// Read the contents of a file in the workspace.
pub struct ReadFileTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl ReadFileTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    async fn read(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let requested = require_string(&params, "path")?;
        let path = self.guard.resolve(&requested)?;
        let shown = self.guard.display_path(&path);

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_failure("read", &shown, e))?;
        if !meta.is_file() {
            return Err(ToolError::validation(format!("Not a file: {shown}")));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| io_failure("read", &shown, e))?;
        let text = String::from_utf8_lossy(&bytes);
        let total_chars = text.chars().count();

        let (content, truncated) = if total_chars > MAX_READ_CHARS {
            (text.chars().take(READ_PREVIEW_CHARS).collect::<String>(), true)
        } else {
            (text.into_owned(), false)
        };

        let message = if truncated {
            format!(
                "Read {shown} ({total_chars} chars, too long); showing the first {READ_PREVIEW_CHARS} characters"
            )
        } else {
            format!("Read {shown} ({})", format_bytes(bytes.len() as u64))
        };

        Ok(ToolResult::ok(message).with_data(json!({
            "path": shown,
            "size": bytes.len(),
            "chars": total_chars,
            "truncated": truncated,
            "content": content,
        })))
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the session workspace. Paths are relative to the workspace root."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace root"
                }
            },
            "required": ["path"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.read(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// WriteFileTool
// ─────────────────────────────────────────────

/// Write content to a file, creating parent directories as needed.
pub struct WriteFileTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl WriteFileTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    async fn write(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let requested = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;
        let path = self.guard.resolve(&requested)?;
        let shown = self.guard.display_path(&path);

        let old_len = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                return Err(ToolError::validation(format!("Is a directory: {shown}")))
            }
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        let new_len = content.len() as u64;

        let reservation = self.guard.reserve(new_len.saturating_sub(old_len))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create directories for", &shown, e))?;
        }
        tokio::fs::write(&path, content.as_bytes())
            .await
            .map_err(|e| io_failure("write", &shown, e))?;

        reservation.commit();
        if old_len > new_len {
            self.guard.release(old_len - new_len);
        }
        debug!(path = %shown, bytes = new_len, "wrote file");

        Ok(ToolResult::ok(format!("Wrote {new_len} bytes to {shown}")).with_data(json!({
            "path": shown,
            "size": new_len,
            "workspaceUsed": self.guard.used(),
            "workspaceLimit": self.guard.limit(),
        })))
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the session workspace, replacing it if it exists. \
         Parent directories are created automatically."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.write(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// EditFileTool
// ─────────────────────────────────────────────

/// Replace the first occurrence of a text snippet in a file.
pub struct EditFileTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl EditFileTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    async fn edit(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let requested = require_string(&params, "path")?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;
        if old_text.is_empty() {
            return Err(ToolError::validation("Parameter 'old_text' must not be empty"));
        }

        let path = self.guard.resolve(&requested)?;
        let shown = self.guard.display_path(&path);

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => {
                    ToolError::validation(format!("Not a UTF-8 text file: {shown}"))
                }
                _ => io_failure("read", &shown, e),
            })?;

        let count = content.matches(old_text.as_str()).count();
        if count == 0 {
            return Err(ToolError::validation(format!(
                "old_text not found in {shown}. Make sure it matches exactly."
            )));
        }

        let updated = content.replacen(old_text.as_str(), &new_text, 1);
        let old_len = content.len() as u64;
        let new_len = updated.len() as u64;

        let reservation = self.guard.reserve(new_len.saturating_sub(old_len))?;
        tokio::fs::write(&path, updated.as_bytes())
            .await
            .map_err(|e| io_failure("write", &shown, e))?;
        reservation.commit();
        if old_len > new_len {
            self.guard.release(old_len - new_len);
        }

        let mut message = format!("Edited {shown}");
        if count > 1 {
            message.push_str(&format!(
                " (warning: old_text appears {count} times; only the first occurrence was replaced)"
            ));
        }
        Ok(ToolResult::ok(message).with_data(json!({
            "path": shown,
            "occurrences": count,
            "size": new_len,
        })))
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing the first occurrence of old_text with new_text. \
         old_text must match exactly."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace root"
                },
                "old_text": {
                    "type": "string",
                    "description": "The exact text to find"
                },
                "new_text": {
                    "type": "string",
                    "description": "The replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.edit(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// ListDirTool
// ─────────────────────────────────────────────

/// List directory contents, optionally recursively.
pub struct ListDirTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl ListDirTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    fn list(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let requested = optional_string(&params, "path")?.unwrap_or_else(|| ".".into());
        let recursive = optional_bool(&params, "recursive")?.unwrap_or(false);
        let dir = self.guard.resolve(&requested)?;
        let shown = self.guard.display_path(&dir);

        if !dir.is_dir() {
            return Err(ToolError::validation(format!("Not a directory: {shown}")));
        }

        let (entries, truncated) = walk(&dir, recursive, MAX_LIST_ENTRIES, |_| true)
            .map_err(|e| io_failure("list", &shown, e))?;

        let mut lines = Vec::with_capacity(entries.len());
        let mut items = Vec::with_capacity(entries.len());
        let (mut files, mut dirs, mut total) = (0usize, 0usize, 0u64);
        for entry in &entries {
            let rel = entry
                .path
                .strip_prefix(&dir)
                .unwrap_or(entry.path.as_path())
                .display()
                .to_string();
            if entry.is_dir {
                dirs += 1;
                lines.push(format!("📁 {rel}/"));
            } else {
                files += 1;
                total += entry.size;
                lines.push(format!("📄 {rel} ({})", format_bytes(entry.size)));
            }
            items.push(entry.to_json(&self.guard));
        }

        let mut message = if lines.is_empty() {
            format!("{shown}: (empty directory)")
        } else {
            format!("Contents of {shown}:\n{}", lines.join("\n"))
        };
        if truncated {
            message.push_str(&format!("\n... (listing stopped at {MAX_LIST_ENTRIES} entries)"));
        }

        Ok(ToolResult::ok(message).with_data(json!({
            "path": shown,
            "recursive": recursive,
            "items": items,
            "truncated": truncated,
            "stats": {
                "files": files,
                "directories": dirs,
                "totalBytes": total,
            },
        })))
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory in the session workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the workspace root (default: the root)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Descend into subdirectories (default: false)"
                }
            }
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.list(params).unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// DeletePathTool
// ─────────────────────────────────────────────

/// Delete a file or directory and return its bytes to the quota.
pub struct DeletePathTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl DeletePathTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    async fn delete(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let requested = require_string(&params, "path")?;
        let recursive = optional_bool(&params, "recursive")?.unwrap_or(false);
        let path = self.guard.resolve_entry(&requested)?;
        let shown = self.guard.display_path(&path);

        if path == self.guard.root() {
            return Err(ToolError::validation("Refusing to delete the workspace root"));
        }

        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| io_failure("delete", &shown, e))?;

        let freed = if meta.is_symlink() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| io_failure("delete", &shown, e))?;
            0
        } else if meta.is_dir() {
            let freed = dir_size(&path);
            let removed = if recursive {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_dir(&path).await
            };
            removed.map_err(|e| {
                if !recursive && path.read_dir().is_ok_and(|mut d| d.next().is_some()) {
                    ToolError::validation(format!(
                        "Directory not empty: {shown} (pass recursive=true to delete it)"
                    ))
                } else {
                    io_failure("delete", &shown, e)
                }
            })?;
            freed
        } else {
            let freed = if meta.is_file() { meta.len() } else { 0 };
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| io_failure("delete", &shown, e))?;
            freed
        };

        self.guard.release(freed);
        debug!(path = %shown, freed, "deleted path");

        Ok(ToolResult::ok(format!("Deleted {shown} (freed {})", format_bytes(freed))).with_data(
            json!({
                "path": shown,
                "freedBytes": freed,
                "workspaceUsed": self.guard.used(),
            }),
        ))
    }
}

#[async_trait]
impl Tool for DeletePathTool {
    fn name(&self) -> &str {
        "delete_path"
    }

    fn description(&self) -> &str {
        "Delete a file or directory in the session workspace. \
         Non-empty directories require recursive=true."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Delete directories with their contents (default: false)"
                }
            },
            "required": ["path"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.delete(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// SearchFilesTool
// ─────────────────────────────────────────────

/// Find files and directories whose name matches a glob pattern.
pub struct SearchFilesTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl SearchFilesTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    fn search(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let pattern = require_string(&params, "pattern")?;
        let requested = optional_string(&params, "path")?.unwrap_or_else(|| ".".into());
        let recursive = optional_bool(&params, "recursive")?.unwrap_or(true);
        let limit = optional_u64(&params, "max_results")?
            .map(|n| (n as usize).clamp(1, MAX_SEARCH_RESULTS))
            .unwrap_or(MAX_SEARCH_RESULTS);

        let matcher = Pattern::new(&pattern)
            .map_err(|e| ToolError::validation(format!("Invalid pattern '{pattern}': {e}")))?;

        let dir = self.guard.resolve(&requested)?;
        let shown = self.guard.display_path(&dir);
        if !dir.is_dir() {
            return Err(ToolError::validation(format!("Not a directory: {shown}")));
        }

        let (matches, truncated) = walk(&dir, recursive, limit, |name| matcher.matches(name))
            .map_err(|e| io_failure("search", &shown, e))?;

        let paths: Vec<String> = matches.iter().map(|m| self.guard.display_path(&m.path)).collect();
        let message = if paths.is_empty() {
            format!("No matches for '{pattern}' under {shown}")
        } else {
            format!(
                "Found {}{} match(es) for '{pattern}':\n{}",
                paths.len(),
                if truncated { "+" } else { "" },
                paths.join("\n")
            )
        };
        let items: Vec<Value> = matches.iter().map(|m| m.to_json(&self.guard)).collect();

        Ok(ToolResult::ok(message).with_data(json!({
            "pattern": pattern,
            "path": shown,
            "recursive": recursive,
            "matches": items,
            "truncated": truncated,
        })))
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search the session workspace for files or directories whose name matches a \
         glob pattern (* matches any run of characters, ? one character, [abc] a set)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Name pattern, e.g. '*.txt' or 'report_??.csv'"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search (default: the workspace root)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Search subdirectories (default: true)"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_SEARCH_RESULTS
                }
            },
            "required": ["pattern"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.search(params).unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// CreateDirTool
// ─────────────────────────────────────────────

/// Create a directory and any missing parents.
pub struct CreateDirTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl CreateDirTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    async fn create(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let requested = require_string(&params, "path")?;
        let path = self.guard.resolve(&requested)?;
        let shown = self.guard.display_path(&path);

        let existed = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => true,
            Ok(_) => return Err(ToolError::validation(format!("A file already exists at {shown}"))),
            Err(_) => false,
        };
        if !existed {
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| io_failure("create", &shown, e))?;
            debug!(path = %shown, "created directory");
        }

        let message = if existed {
            format!("Directory already exists: {shown}")
        } else {
            format!("Created directory {shown}")
        };
        Ok(ToolResult::ok(message).with_data(json!({
            "path": shown,
            "created": !existed,
        })))
    }
}

#[async_trait]
impl Tool for CreateDirTool {
    fn name(&self) -> &str {
        "create_dir"
    }

    fn description(&self) -> &str {
        "Create a directory in the session workspace, including missing parents."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path relative to the workspace root"
                }
            },
            "required": ["path"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.create(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// FileInfoTool
// ─────────────────────────────────────────────

/// Report metadata for a file, directory, or link.
pub struct FileInfoTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl FileInfoTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    async fn info(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let requested = require_string(&params, "path")?;
        let path = self.guard.resolve_entry(&requested)?;
        let shown = self.guard.display_path(&path);

        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| io_failure("inspect", &shown, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        let (kind, size) = if meta.is_symlink() {
            ("symlink", 0)
        } else if meta.is_dir() {
            ("directory", dir_size(&path))
        } else {
            ("file", meta.len())
        };

        let mut data = json!({
            "name": name,
            "path": shown,
            "type": kind,
            "size": size,
            "sizeHuman": format_bytes(size),
            "modified": timestamp(meta.modified()),
            "created": timestamp(meta.created()),
            "readonly": meta.permissions().readonly(),
            "hidden": name.starts_with('.') && name != ".",
        });
        if kind == "file" {
            data["extension"] = json!(path.extension().map(|e| e.to_string_lossy().to_string()));
        }
        if kind == "directory" {
            let entries = std::fs::read_dir(&path).map(|d| d.count()).unwrap_or(0);
            data["entries"] = json!(entries);
        }
        if kind == "symlink" {
            let target = tokio::fs::read_link(&path)
                .await
                .map(|t| self.guard.display_path(&t))
                .unwrap_or_default();
            data["target"] = json!(target);
        }

        Ok(ToolResult::ok(format!("{shown}: {kind}, {}", format_bytes(size))).with_data(data))
    }
}

#[async_trait]
impl Tool for FileInfoTool {
    fn name(&self) -> &str {
        "file_info"
    }

    fn description(&self) -> &str {
        "Show metadata for a path in the session workspace: type, size (total for \
         directories), timestamps, and permissions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                }
            },
            "required": ["path"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.info(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// CopyPathTool
// ─────────────────────────────────────────────

/// Copy a file or directory tree, charging the copy to the quota.
pub struct CopyPathTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl CopyPathTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    async fn copy(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let source = require_string(&params, "source")?;
        let target = require_string(&params, "destination")?;
        let overwrite = optional_bool(&params, "overwrite")?.unwrap_or(false);

        let src = self.guard.resolve(&source)?;
        let src_shown = self.guard.display_path(&src);
        let meta = tokio::fs::metadata(&src)
            .await
            .map_err(|e| io_failure("copy", &src_shown, e))?;
        let is_dir = meta.is_dir();

        let dst = destination(&self.guard, &src, &target)?;
        let dst_shown = self.guard.display_path(&dst);
        if dst == src || (is_dir && dst.starts_with(&src)) {
            return Err(ToolError::validation(format!(
                "Cannot copy {src_shown} onto or into itself"
            )));
        }

        let replaced = match tokio::fs::symlink_metadata(&dst).await {
            Ok(existing) if is_dir || existing.is_dir() => {
                return Err(ToolError::validation(format!("Destination already exists: {dst_shown}")))
            }
            Ok(_) if !overwrite => {
                return Err(ToolError::validation(format!(
                    "Destination already exists: {dst_shown} (pass overwrite=true to replace it)"
                )))
            }
            Ok(existing) if existing.is_file() => existing.len(),
            _ => 0,
        };

        let size = if is_dir { dir_size(&src) } else { meta.len() };
        let reservation = self.guard.reserve(size.saturating_sub(replaced))?;

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create directories for", &dst_shown, e))?;
        }
        let copied = if is_dir {
            copy_tree(&src, &dst).await
        } else {
            tokio::fs::copy(&src, &dst).await.map(|_| (1, 0))
        };
        let (files, skipped) = match copied {
            Ok(counts) => counts,
            Err(e) => {
                if is_dir {
                    if let Err(cleanup) = tokio::fs::remove_dir_all(&dst).await {
                        warn!(path = %dst_shown, error = %cleanup, "failed to remove partial copy");
                    }
                }
                return Err(io_failure("copy", &src_shown, e));
            }
        };

        reservation.commit();
        if replaced > size {
            self.guard.release(replaced - size);
        }
        debug!(from = %src_shown, to = %dst_shown, bytes = size, files, "copied path");

        let mut message = format!("Copied {src_shown} to {dst_shown} ({})", format_bytes(size));
        if skipped > 0 {
            message.push_str(&format!(" ({skipped} symlink(s) skipped)"));
        }
        Ok(ToolResult::ok(message).with_data(json!({
            "source": src_shown,
            "destination": dst_shown,
            "bytes": size,
            "files": files,
            "skippedLinks": skipped,
            "workspaceUsed": self.guard.used(),
        })))
    }
}

#[async_trait]
impl Tool for CopyPathTool {
    fn name(&self) -> &str {
        "copy_path"
    }

    fn description(&self) -> &str {
        "Copy a file or directory within the session workspace. Copying into an existing \
         directory keeps the source name. The copy counts against the workspace quota."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": {
                    "type": "string",
                    "description": "Path to copy, relative to the workspace root"
                },
                "destination": {
                    "type": "string",
                    "description": "Target path or existing directory"
                },
                "overwrite": {
                    "type": "boolean",
                    "description": "Replace an existing destination file (default: false)"
                }
            },
            "required": ["source", "destination"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.copy(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// MovePathTool
// ─────────────────────────────────────────────

/// Move or rename a file, directory, or link within the workspace.
pub struct MovePathTool {
    guard: Arc<WorkspaceGuard>,
    timeout: Duration,
}

impl MovePathTool {
    pub fn new(guard: Arc<WorkspaceGuard>, timeout: Duration) -> Self {
        Self { guard, timeout }
    }

    async fn move_path(&self, params: ToolParams) -> Result<ToolResult, ToolError> {
        let source = require_string(&params, "source")?;
        let target = require_string(&params, "destination")?;
        let overwrite = optional_bool(&params, "overwrite")?.unwrap_or(false);

        let src = self.guard.resolve_entry(&source)?;
        let src_shown = self.guard.display_path(&src);
        if src == self.guard.root() {
            return Err(ToolError::validation("Refusing to move the workspace root"));
        }
        let meta = tokio::fs::symlink_metadata(&src)
            .await
            .map_err(|e| io_failure("move", &src_shown, e))?;

        let dst = destination(&self.guard, &src, &target)?;
        let dst_shown = self.guard.display_path(&dst);
        if dst == src || (meta.is_dir() && dst.starts_with(&src)) {
            return Err(ToolError::validation(format!(
                "Cannot move {src_shown} onto or into itself"
            )));
        }

        let replaced = match tokio::fs::symlink_metadata(&dst).await {
            Ok(existing) if existing.is_dir() => {
                return Err(ToolError::validation(format!("Destination already exists: {dst_shown}")))
            }
            Ok(_) if !overwrite => {
                return Err(ToolError::validation(format!(
                    "Destination already exists: {dst_shown} (pass overwrite=true to replace it)"
                )))
            }
            Ok(existing) if existing.is_file() => existing.len(),
            _ => 0,
        };

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create directories for", &dst_shown, e))?;
        }
        tokio::fs::rename(&src, &dst)
            .await
            .map_err(|e| io_failure("move", &src_shown, e))?;

        self.guard.release(replaced);
        debug!(from = %src_shown, to = %dst_shown, "moved path");

        Ok(ToolResult::ok(format!("Moved {src_shown} to {dst_shown}")).with_data(json!({
            "source": src_shown,
            "destination": dst_shown,
            "replacedBytes": replaced,
        })))
    }
}

#[async_trait]
impl Tool for MovePathTool {
    fn name(&self) -> &str {
        "move_path"
    }

    fn description(&self) -> &str {
        "Move or rename a file or directory within the session workspace. Moving into an \
         existing directory keeps the source name."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": {
                    "type": "string",
                    "description": "Path to move, relative to the workspace root"
                },
                "destination": {
                    "type": "string",
                    "description": "New path or existing directory"
                },
                "overwrite": {
                    "type": "boolean",
                    "description": "Replace an existing destination file (default: false)"
                }
            },
            "required": ["source", "destination"]
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, params: ToolParams) -> ToolResult {
        self.move_path(params).await.unwrap_or_else(ToolResult::from)
    }
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

struct WalkEntry {
    path: PathBuf,
    is_dir: bool,
    is_symlink: bool,
    size: u64,
}

impl WalkEntry {
    fn to_json(&self, guard: &WorkspaceGuard) -> Value {
        let kind = if self.is_symlink {
            "symlink"
        } else if self.is_dir {
            "directory"
        } else {
            "file"
        };
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        json!({
            "name": name,
            "path": guard.display_path(&self.path),
            "type": kind,
            "size": self.size,
        })
    }
}

/// Collect entries under `dir` whose file name passes `keep`, sorted by path.
///
/// Symlinks are reported but never followed. Returns `true` alongside the
/// entries when `limit` cut the walk short.
fn walk(
    dir: &Path,
    recursive: bool,
    limit: usize,
    keep: impl Fn(&str) -> bool,
) -> std::io::Result<(Vec<WalkEntry>, bool)> {
    let mut found = Vec::new();
    let mut truncated = false;

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !keep(&entry.file_name().to_string_lossy()) {
            continue;
        }
        if found.len() >= limit {
            truncated = true;
            break;
        }
        let file_type = entry.file_type();
        let size = if file_type.is_file() {
            entry.metadata().map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        found.push(WalkEntry {
            is_dir: file_type.is_dir(),
            is_symlink: file_type.is_symlink(),
            size,
            path: entry.into_path(),
        });
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok((found, truncated))
}

/// Where a copy or move of `src` lands: an existing directory receives it
/// under its own name.
fn destination(guard: &WorkspaceGuard, src: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let dst = guard.resolve(requested)?;
    if !dst.is_dir() {
        return Ok(dst);
    }
    let name = src
        .file_name()
        .ok_or_else(|| ToolError::validation("Source has no file name"))?;
    Ok(guard.resolve(&dst.join(name).to_string_lossy())?)
}

/// Copy a directory tree. Symlinks inside it are skipped.
///
/// Returns the number of files copied and links skipped.
async fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<(usize, usize)> {
    let entries = WalkDir::new(src)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    let (mut files, mut skipped) = (0, 0);
    for entry in entries {
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            tokio::fs::create_dir_all(&target).await?;
        } else if file_type.is_file() {
            tokio::fs::copy(entry.path(), &target).await?;
            files += 1;
        } else {
            skipped += 1;
        }
    }
    Ok((files, skipped))
}

fn timestamp(time: std::io::Result<SystemTime>) -> Option<String> {
    time.ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
