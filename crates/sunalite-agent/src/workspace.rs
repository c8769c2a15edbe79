//! Workspace guard — session-scoped path containment and byte quota.
//!
//! Every session owns `<root>/<session-id>/` with `temp/` and `output/`
//! subdirectories. All file paths supplied by the model go through
//! [`WorkspaceGuard::resolve`], and every byte written is reserved up front
//! through [`WorkspaceGuard::reserve`].
//!
//! Resolution is checked twice: once lexically (so `..` can never climb above
//! the session root, even through directories that do not exist yet) and once
//! after canonicalizing the deepest existing ancestor (so a symlink inside the
//! workspace cannot point the write somewhere else).

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Subdirectory for scratch files.
pub const TEMP_DIR: &str = "temp";
/// Subdirectory for deliverables.
pub const OUTPUT_DIR: &str = "output";

// ─────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("path escape: '{path}' resolves outside the session workspace")]
    PathEscape { path: String },

    #[error(
        "quota exceeded: writing {requested} bytes would exceed the workspace limit \
         ({used} of {limit} bytes used)"
    )]
    QuotaExceeded { requested: u64, used: u64, limit: u64 },

    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),

    #[error("workspace I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn escape(requested: &str) -> GuardError {
    GuardError::PathEscape {
        path: requested.to_string(),
    }
}

impl GuardError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        GuardError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// ─────────────────────────────────────────────
// WorkspaceGuard
// ─────────────────────────────────────────────

/// Containment root and byte budget for one session.
#[derive(Debug)]
pub struct WorkspaceGuard {
    session_id: String,
    /// Canonical session root.
    root: PathBuf,
    limit: u64,
    used: AtomicU64,
}

impl WorkspaceGuard {
    /// Create (or reopen) the session directory under `base` and measure its
    /// current usage.
    pub fn create(base: &Path, session_id: &str, limit: u64) -> Result<Self, GuardError> {
        if !is_safe_session_id(session_id) {
            return Err(GuardError::InvalidSessionId(session_id.to_string()));
        }

        let dir = base.join(session_id);
        for sub in [TEMP_DIR, OUTPUT_DIR] {
            let path = dir.join(sub);
            std::fs::create_dir_all(&path).map_err(|e| GuardError::io(&path, e))?;
        }
        let root = dir.canonicalize().map_err(|e| GuardError::io(&dir, e))?;
        let used = dir_size(&root);

        info!(
            session = session_id,
            root = %root.display(),
            used,
            limit,
            "workspace ready"
        );

        Ok(Self {
            session_id: session_id.to_string(),
            root,
            limit,
            used: AtomicU64::new(used),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Canonical session root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> u64 {
        self.limit.saturating_sub(self.used())
    }

    // ────────────── Path containment ──────────────

    /// Map a model-supplied path to an absolute path inside the session root.
    ///
    /// Relative paths are taken relative to the root; absolute paths are
    /// accepted only when they already point inside it. An empty path or
    /// `.` is the root itself.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, GuardError> {
        let lexical = self.resolve_lexically(requested)?;

        // Physical pass: follow symlinks on the part that exists.
        let resolved = canonicalize_existing_prefix(&lexical).ok_or_else(|| escape(requested))?;
        if !resolved.starts_with(&self.root) {
            warn!(requested, resolved = %resolved.display(), "symlink escape blocked");
            return Err(escape(requested));
        }

        Ok(resolved)
    }

    /// Like [`resolve`](Self::resolve), but the final component is left as
    /// is: a symlink there names the link, not its target.
    ///
    /// Used by operations that act on the directory entry itself
    /// (delete, move).
    pub fn resolve_entry(&self, requested: &str) -> Result<PathBuf, GuardError> {
        let lexical = self.resolve_lexically(requested)?;
        if lexical == self.root {
            return Ok(self.root.clone());
        }
        let (Some(parent), Some(name)) = (lexical.parent(), lexical.file_name()) else {
            return Err(escape(requested));
        };

        let parent = canonicalize_existing_prefix(parent).ok_or_else(|| escape(requested))?;
        if !parent.starts_with(&self.root) {
            warn!(requested, resolved = %parent.display(), "symlink escape blocked");
            return Err(escape(requested));
        }
        Ok(parent.join(name))
    }

    /// Lexical pass: `..` may not climb above the root.
    fn resolve_lexically(&self, requested: &str) -> Result<PathBuf, GuardError> {
        let candidate = Path::new(requested.trim());
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let lexical = normalize_lexically(&joined).ok_or_else(|| escape(requested))?;
        if !lexical.starts_with(&self.root) {
            return Err(escape(requested));
        }
        Ok(lexical)
    }

    /// Path relative to the session root, for messages shown to the model.
    pub fn display_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }

    // ────────────── Quota ──────────────

    /// Reserve `bytes` of the budget before writing them.
    ///
    /// Fails with `QuotaExceeded` and leaves the counter untouched when the
    /// write would overflow the limit. The returned [`Reservation`] gives the
    /// bytes back on drop unless it is committed.
    pub fn reserve(&self, bytes: u64) -> Result<Reservation<'_>, GuardError> {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = match current.checked_add(bytes) {
                Some(n) if n <= self.limit => n,
                _ => {
                    return Err(GuardError::QuotaExceeded {
                        requested: bytes,
                        used: current,
                        limit: self.limit,
                    })
                }
            };
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    debug!(bytes, used = next, "reserved workspace bytes");
                    return Ok(Reservation {
                        guard: self,
                        bytes,
                        committed: false,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Return freed bytes to the budget.
    pub fn release(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |u| Some(u.saturating_sub(bytes)));
        debug!(bytes, used = self.used(), "released workspace bytes");
    }

    /// Current on-disk size of the session directory.
    pub fn measure(&self) -> u64 {
        dir_size(&self.root)
    }

    /// Apply the change between two [`measure`](Self::measure) snapshots
    /// taken around writes the guard did not see (shell commands).
    ///
    /// Only the difference is applied, so reservations made by other tools
    /// in the meantime stay counted. Returns the new usage.
    pub fn apply_disk_delta(&self, before: u64, after: u64) -> u64 {
        let update = |used: u64| {
            Some(if after >= before {
                used.saturating_add(after - before)
            } else {
                used.saturating_sub(before - after)
            })
        };
        let previous = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, update)
            .unwrap_or_else(|current| current);
        let now = update(previous).unwrap_or(previous);
        if before != after {
            debug!(before, after, used = now, "applied on-disk usage change");
        }
        now
    }

    /// Delete the session directory.
    pub fn remove(&self) -> Result<(), GuardError> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).map_err(|e| GuardError::io(&self.root, e))?;
            info!(session = %self.session_id, "workspace removed");
        }
        Ok(())
    }
}

/// Bytes held against a [`WorkspaceGuard`] budget.
#[must_use = "dropping a reservation releases it immediately"]
#[derive(Debug)]
pub struct Reservation<'a> {
    guard: &'a WorkspaceGuard,
    bytes: u64,
    committed: bool,
}

impl Reservation<'_> {
    /// Keep the bytes counted: the write succeeded.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.guard.release(self.bytes);
        }
    }
}

// ─────────────────────────────────────────────
// Sweeping
// ─────────────────────────────────────────────

/// Remove session directories under `base` not modified within `retention`.
///
/// Directories named in `keep` (active sessions) are skipped.
pub fn sweep_stale_sessions(
    base: &Path,
    retention: Duration,
    keep: &[&str],
) -> Result<Vec<PathBuf>, GuardError> {
    let mut removed = Vec::new();
    if !base.exists() {
        return Ok(removed);
    }

    let now = SystemTime::now();
    let entries = std::fs::read_dir(base).map_err(|e| GuardError::io(base, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else { continue };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if keep.contains(&name.as_str()) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(now);
        let age = now.duration_since(modified).unwrap_or_default();
        if age >= retention {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(path = %path.display(), age_secs = age.as_secs(), "swept stale workspace");
                    removed.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to sweep workspace"),
            }
        }
    }
    Ok(removed)
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

/// Total size of regular files under `path`. Symlinks are not followed.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn is_safe_session_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Resolve `.` and `..` without touching the filesystem.
///
/// Returns `None` when `..` would climb above the filesystem root.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
        }
    }
    Some(out)
}

/// Canonicalize the deepest ancestor of `path` that exists, then re-append
/// the missing tail. Returns `None` for dangling symlinks.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if std::fs::symlink_metadata(&existing).is_ok() {
            let mut resolved = existing.canonicalize().ok()?;
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            return Some(resolved);
        }
        let name = existing.file_name()?.to_os_string();
        tail.push(name);
        if !existing.pop() {
            return None;
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn guard(limit: u64) -> (TempDir, WorkspaceGuard) {
        let base = TempDir::new().unwrap();
        let g = WorkspaceGuard::create(base.path(), "s1", limit).unwrap();
        (base, g)
    }

    #[test]
    fn test_create_layout() {
        let (_base, g) = guard(100);
        assert!(g.root().ends_with("s1"));
        assert!(g.temp_dir().is_dir());
        assert!(g.output_dir().is_dir());
        assert_eq!(g.used(), 0);
    }

    #[test]
    fn test_create_measures_existing_usage() {
        let base = TempDir::new().unwrap();
        std::fs::create_dir_all(base.path().join("s1/output")).unwrap();
        std::fs::write(base.path().join("s1/output/a.txt"), "12345").unwrap();
        let g = WorkspaceGuard::create(base.path(), "s1", 100).unwrap();
        assert_eq!(g.used(), 5);
    }

    #[test]
    fn test_create_rejects_bad_session_id() {
        let base = TempDir::new().unwrap();
        assert!(matches!(
            WorkspaceGuard::create(base.path(), "../x", 100),
            Err(GuardError::InvalidSessionId(_))
        ));
        assert!(WorkspaceGuard::create(base.path(), "..", 100).is_err());
    }

    #[test]
    fn test_resolve_relative() {
        let (_base, g) = guard(100);
        let p = g.resolve("notes.txt").unwrap();
        assert_eq!(p, g.root().join("notes.txt"));
        assert_eq!(g.resolve("").unwrap(), g.root());
        assert_eq!(g.resolve("./output/../temp/x").unwrap(), g.root().join("temp/x"));
    }

    #[test]
    fn test_resolve_parent_escape() {
        let (_base, g) = guard(100);
        for bad in ["../etc/passwd", "a/../../b", "../../../../../../etc", "output/../../s2/x"] {
            assert!(
                matches!(g.resolve(bad), Err(GuardError::PathEscape { .. })),
                "expected escape for {bad}"
            );
        }
    }

    #[test]
    fn test_resolve_absolute() {
        let (_base, g) = guard(100);
        assert!(matches!(g.resolve("/etc/passwd"), Err(GuardError::PathEscape { .. })));

        let inside = g.root().join("output/report.md");
        assert_eq!(g.resolve(inside.to_str().unwrap()).unwrap(), inside);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_symlink_escape() {
        let (base, g) = guard(100);
        let outside = base.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, g.root().join("link")).unwrap();

        assert!(matches!(g.resolve("link/secret.txt"), Err(GuardError::PathEscape { .. })));
        assert!(matches!(g.resolve("link"), Err(GuardError::PathEscape { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_dangling_symlink_rejected() {
        let (_base, g) = guard(100);
        std::os::unix::fs::symlink("/nonexistent/target", g.root().join("dangling")).unwrap();
        assert!(g.resolve("dangling").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_symlink_inside_allowed() {
        let (_base, g) = guard(100);
        std::os::unix::fs::symlink(g.output_dir(), g.root().join("out")).unwrap();
        assert_eq!(g.resolve("out/a.txt").unwrap(), g.output_dir().join("a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_entry_keeps_link() {
        let (base, g) = guard(100);
        std::os::unix::fs::symlink(g.output_dir(), g.root().join("out")).unwrap();
        let outside = base.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, g.root().join("away")).unwrap();

        assert_eq!(g.resolve_entry("out").unwrap(), g.root().join("out"));
        assert_eq!(g.resolve_entry("out/a.txt").unwrap(), g.output_dir().join("a.txt"));
        // The link itself lives inside the workspace; its contents do not.
        assert_eq!(g.resolve_entry("away").unwrap(), g.root().join("away"));
        assert!(matches!(g.resolve_entry("away/x"), Err(GuardError::PathEscape { .. })));
        assert!(matches!(g.resolve_entry("../s2"), Err(GuardError::PathEscape { .. })));
        assert_eq!(g.resolve_entry(".").unwrap(), g.root());
    }

    #[test]
    fn test_display_path() {
        let (_base, g) = guard(100);
        assert_eq!(g.display_path(&g.root().join("a/b.txt")), "a/b.txt");
        assert_eq!(g.display_path(g.root()), ".");
    }

    #[test]
    fn test_reserve_and_commit() {
        let (_base, g) = guard(100);
        g.reserve(60).unwrap().commit();
        assert_eq!(g.used(), 60);
        assert_eq!(g.available(), 40);
    }

    #[test]
    fn test_reserve_overflow_leaves_counter_unchanged() {
        let (_base, g) = guard(100);
        g.reserve(95).unwrap().commit();
        let err = g.reserve(10).unwrap_err();
        assert!(matches!(err, GuardError::QuotaExceeded { requested: 10, used: 95, limit: 100 }));
        assert_eq!(g.used(), 95);
        // Exactly filling the budget is fine
        g.reserve(5).unwrap().commit();
        assert_eq!(g.used(), 100);
    }

    #[test]
    fn test_dropped_reservation_releases() {
        let (_base, g) = guard(100);
        {
            let _r = g.reserve(40).unwrap();
            assert_eq!(g.used(), 40);
        }
        assert_eq!(g.used(), 0);
    }

    #[test]
    fn test_release_saturates() {
        let (_base, g) = guard(100);
        g.reserve(10).unwrap().commit();
        g.release(50);
        assert_eq!(g.used(), 0);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_limit() {
        let (_base, g) = guard(1_000);
        let g = Arc::new(g);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = g.clone();
                std::thread::spawn(move || {
                    let mut granted = 0u64;
                    for _ in 0..100 {
                        if let Ok(r) = g.reserve(7) {
                            r.commit();
                            granted += 7;
                        }
                    }
                    granted
                })
            })
            .collect();
        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(total <= 1_000);
        assert_eq!(g.used(), total);
    }

    #[test]
    fn test_disk_delta_counts_unseen_writes() {
        let (_base, g) = guard(100);
        let before = g.measure();
        std::fs::write(g.root().join("x.bin"), vec![0u8; 12]).unwrap();
        assert_eq!(g.apply_disk_delta(before, g.measure()), 12);
        assert_eq!(g.used(), 12);

        let before = g.measure();
        std::fs::remove_file(g.root().join("x.bin")).unwrap();
        assert_eq!(g.apply_disk_delta(before, g.measure()), 0);
    }

    #[test]
    fn test_disk_delta_keeps_pending_reservation() {
        let (_base, g) = guard(100);
        let pending = g.reserve(60).unwrap();

        // An unrelated command finishes while the write is still in flight.
        let before = g.measure();
        let after = g.measure();
        g.apply_disk_delta(before, after);
        assert_eq!(g.used(), 60);

        std::fs::write(g.root().join("a.bin"), vec![0u8; 60]).unwrap();
        pending.commit();
        assert_eq!(g.used(), 60);
        assert!(matches!(g.reserve(60), Err(GuardError::QuotaExceeded { used: 60, .. })));
    }

    #[test]
    fn test_dir_size_skips_symlinks() {
        let (_base, g) = guard(100);
        std::fs::write(g.output_dir().join("a.txt"), "12345").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(g.output_dir(), g.root().join("again")).unwrap();
        assert_eq!(dir_size(g.root()), 5);
        assert_eq!(dir_size(&g.output_dir().join("a.txt")), 5);
        assert_eq!(dir_size(Path::new("/nonexistent/sunalite")), 0);
    }

    #[test]
    fn test_remove() {
        let (_base, g) = guard(100);
        let root = g.root().to_path_buf();
        g.remove().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_sweep_stale_sessions() {
        let base = TempDir::new().unwrap();
        for id in ["old", "active"] {
            WorkspaceGuard::create(base.path(), id, 100).unwrap();
        }
        std::fs::write(base.path().join("stray.txt"), "x").unwrap();

        // Nothing is older than an hour
        let removed = sweep_stale_sessions(base.path(), Duration::from_secs(3600), &[]).unwrap();
        assert!(removed.is_empty());

        let removed = sweep_stale_sessions(base.path(), Duration::ZERO, &["active"]).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!base.path().join("old").exists());
        assert!(base.path().join("active").exists());
        assert!(base.path().join("stray.txt").exists());
    }

    #[test]
    fn test_sweep_missing_base() {
        let removed = sweep_stale_sessions(Path::new("/nonexistent/sunalite"), Duration::ZERO, &[]).unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically(Path::new("/a/./b/../c")), Some(PathBuf::from("/a/c")));
        assert_eq!(normalize_lexically(Path::new("/..")), None);
    }
}
