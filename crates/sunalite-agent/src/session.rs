//! Session lifecycle — workspace, tools, conversation, and loop per session.
//!
//! A session is started from a finalized [`Config`] snapshot. Everything it
//! needs (workspace guard, policies, HTTP clients, registry) is built for it
//! alone and dropped when it ends.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use sunalite_core::config::Config;
use sunalite_core::types::Message;
use sunalite_core::utils::expand_home;
use sunalite_providers::LlmProvider;

use crate::agent_loop::{AgentLoop, TurnOutcome};
use crate::context::ContextBuilder;
use crate::conversation::ConversationState;
use crate::error::AgentError;
use crate::tools::build_registry;
use crate::workspace::{sweep_stale_sessions, WorkspaceGuard};

// ─────────────────────────────────────────────
// Handle & stats
// ─────────────────────────────────────────────

/// Opaque reference to a running session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: String,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Point-in-time view of a session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub model: String,
    pub turns: u64,
    pub messages: usize,
    pub exchanges: usize,
    pub evicted_exchanges: usize,
    pub workspace: PathBuf,
    pub workspace_used: u64,
    pub workspace_limit: u64,
    pub tools: Vec<String>,
}

// ─────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────

struct Session {
    id: String,
    started_at: DateTime<Utc>,
    auto_cleanup: bool,
    guard: Arc<WorkspaceGuard>,
    agent: AgentLoop,
    /// Held for the whole turn: one writer per conversation.
    conversation: Mutex<ConversationState>,
    /// Token of the current (or next) turn.
    cancel: std::sync::Mutex<CancellationToken>,
    turns: AtomicU64,
}

impl Session {
    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut slot = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        *slot = token.clone();
        token
    }

    fn cancel(&self) {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).cancel();
    }
}

// ─────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────

/// Starts, drives, and ends sessions against one model backend.
pub struct SessionManager {
    provider: Arc<dyn LlmProvider>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create the session workspace, tools, and conversation.
    ///
    /// Stale workspaces of earlier sessions are swept first.
    pub async fn start_session(&self, config: &Config) -> Result<SessionHandle, AgentError> {
        config.validate()?;

        let id = Uuid::new_v4().to_string();
        let base = expand_home(&config.workspace.path);

        if let Err(e) = self.sweep_stale(config).await {
            warn!(error = %e, "workspace sweep failed");
        }

        let guard = Arc::new(WorkspaceGuard::create(
            &base,
            &id,
            config.workspace.max_size_bytes(),
        )?);
        let registry = match build_registry(config, guard.clone()) {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                if let Err(cleanup) = guard.remove() {
                    warn!(error = %cleanup, "failed to remove workspace of aborted session");
                }
                return Err(e);
            }
        };

        let prompt = ContextBuilder::for_session(config, &guard, &registry).build_system_prompt();
        let conversation =
            ConversationState::new(config.agent.max_conversation_history).with_system(prompt);
        let agent = AgentLoop::new(self.provider.clone(), registry, &config.agent);

        let session = Arc::new(Session {
            id: id.clone(),
            started_at: Utc::now(),
            auto_cleanup: config.workspace.auto_cleanup,
            guard,
            agent,
            conversation: Mutex::new(conversation),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            turns: AtomicU64::new(0),
        });
        self.sessions.write().await.insert(id.clone(), session);

        info!(
            session = %id,
            provider = self.provider.display_name(),
            model = %config.agent.model,
            "session started"
        );
        Ok(SessionHandle { id })
    }

    /// Run one user turn. Turns on the same session are serialized.
    pub async fn submit_user_message(
        &self,
        handle: &SessionHandle,
        text: &str,
    ) -> Result<TurnOutcome, AgentError> {
        let session = self.session(handle).await?;
        let mut conversation = session.conversation.lock().await;
        let token = session.fresh_token();
        session.turns.fetch_add(1, Ordering::Relaxed);
        session.agent.run_turn(&mut conversation, text, &token).await
    }

    /// Cancel the turn currently running on this session, if any.
    pub async fn cancel(&self, handle: &SessionHandle) -> Result<(), AgentError> {
        let session = self.session(handle).await?;
        info!(session = %session.id, "cancelling turn");
        session.cancel();
        Ok(())
    }

    /// Stop the session and, with auto-cleanup on, delete its workspace.
    pub async fn end_session(&self, handle: &SessionHandle) -> Result<SessionStats, AgentError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(&handle.id)
            .ok_or_else(|| AgentError::UnknownSession(handle.id.clone()))?;
        session.cancel();
        let stats = Self::snapshot(&session).await;

        if session.auto_cleanup {
            session.guard.remove()?;
        }
        info!(
            session = %session.id,
            turns = stats.turns,
            cleaned = session.auto_cleanup,
            "session ended"
        );
        Ok(stats)
    }

    /// Remove stale workspaces under the configured root, skipping sessions
    /// this manager is running.
    pub async fn sweep_stale(&self, config: &Config) -> Result<Vec<PathBuf>, AgentError> {
        let base = expand_home(&config.workspace.path);
        let sessions = self.sessions.read().await;
        let active: Vec<&str> = sessions.keys().map(String::as_str).collect();
        Ok(sweep_stale_sessions(&base, config.workspace.retention(), &active)?)
    }

    pub async fn stats(&self, handle: &SessionHandle) -> Result<SessionStats, AgentError> {
        let session = self.session(handle).await?;
        Ok(Self::snapshot(&session).await)
    }

    /// Messages sent to the model on the next call, system message first.
    pub async fn history(&self, handle: &SessionHandle) -> Result<Vec<Message>, AgentError> {
        let session = self.session(handle).await?;
        let conversation = session.conversation.lock().await;
        Ok(conversation.to_messages())
    }

    /// Forget the conversation but keep the workspace and system prompt.
    pub async fn clear_history(&self, handle: &SessionHandle) -> Result<(), AgentError> {
        let session = self.session(handle).await?;
        session.conversation.lock().await.clear();
        info!(session = %session.id, "conversation cleared");
        Ok(())
    }

    pub async fn tool_names(&self, handle: &SessionHandle) -> Result<Vec<String>, AgentError> {
        Ok(self.session(handle).await?.agent.tools().tool_names())
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn session(&self, handle: &SessionHandle) -> Result<Arc<Session>, AgentError> {
        self.sessions
            .read()
            .await
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| AgentError::UnknownSession(handle.id.clone()))
    }

    async fn snapshot(session: &Session) -> SessionStats {
        let conversation = session.conversation.lock().await;
        SessionStats {
            session_id: session.id.clone(),
            started_at: session.started_at,
            model: session.agent.model().to_string(),
            turns: session.turns.load(Ordering::Relaxed),
            messages: conversation.len(),
            exchanges: conversation.exchange_count(),
            evicted_exchanges: conversation.evicted_count(),
            workspace: session.guard.root().to_path_buf(),
            workspace_used: session.guard.used(),
            workspace_limit: session.guard.limit(),
            tools: session.agent.tools().tool_names(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sunalite_core::types::{LlmResponse, ToolDefinition};
    use sunalite_providers::{LlmRequestConfig, ProviderError};

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn chat(
            &self,
            messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> Result<LlmResponse, ProviderError> {
            let last = messages.last().map(Message::text).unwrap_or_default();
            Ok(LlmResponse::text(format!("you said: {last}")))
        }

        fn default_model(&self) -> &str {
            "echo"
        }

        fn display_name(&self) -> &str {
            "EchoProvider"
        }
    }

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.workspace.path = dir.to_string_lossy().to_string();
        config.tools.web_search = false;
        config.tools.browser_automation = false;
        config
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(Arc::new(EchoProvider));
        let handle = manager.start_session(&config(dir.path())).await.unwrap();

        let root = dir.path().join(handle.id());
        assert!(root.join("temp").is_dir());
        assert!(root.join("output").is_dir());

        let outcome = manager.submit_user_message(&handle, "ping").await.unwrap();
        assert_eq!(outcome.text, "you said: ping");

        let history = manager.history(&handle).await.unwrap();
        assert_eq!(history[0].role(), "system");
        assert_eq!(history.len(), 3);

        let stats = manager.end_session(&handle).await.unwrap();
        assert_eq!(stats.turns, 1);
        assert!(!root.exists());
        assert_eq!(manager.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_workspace_kept_without_auto_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.workspace.auto_cleanup = false;
        let manager = SessionManager::new(Arc::new(EchoProvider));

        let handle = manager.start_session(&config).await.unwrap();
        manager.end_session(&handle).await.unwrap();
        assert!(dir.path().join(handle.id()).exists());
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let manager = SessionManager::new(Arc::new(EchoProvider));
        let bogus = SessionHandle { id: "nope".into() };
        let err = manager.submit_user_message(&bogus, "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownSession(_)));
        assert!(manager.cancel(&bogus).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.agent.max_tool_iterations = 0;
        let manager = SessionManager::new(Arc::new(EchoProvider));
        let err = manager.start_session(&config).await.unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[tokio::test]
    async fn test_sweep_skips_active_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.workspace.retention_hours = 0;
        std::fs::create_dir_all(dir.path().join("old-session")).unwrap();

        let manager = SessionManager::new(Arc::new(EchoProvider));
        let handle = manager.start_session(&config).await.unwrap();
        assert!(!dir.path().join("old-session").exists());

        let removed = manager.sweep_stale(&config).await.unwrap();
        assert!(removed.is_empty());
        assert!(dir.path().join(handle.id()).exists());
    }

    #[tokio::test]
    async fn test_clear_history_keeps_system() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(Arc::new(EchoProvider));
        let handle = manager.start_session(&config(dir.path())).await.unwrap();
        manager.submit_user_message(&handle, "one").await.unwrap();
        manager.clear_history(&handle).await.unwrap();
        let history = manager.history(&handle).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(manager.tool_names(&handle).await.unwrap().contains(&"exec".to_string()));
    }
}
