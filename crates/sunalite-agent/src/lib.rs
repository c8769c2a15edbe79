//! Sunalite Agent — sandboxed tool-using conversation engine.
//!
//! This crate contains:
//! - **workspace**: session-scoped path containment and byte quota
//! - **policy**: shell command and network domain policies
//! - **tools**: Tool trait, registry, and built-in tools (filesystem, shell, web, browser)
//! - **conversation**: bounded message history
//! - **context**: system prompt construction
//! - **agent_loop**: the model ↔ tool-calling loop
//! - **session**: session lifecycle on top of all of the above

pub mod agent_loop;
pub mod context;
pub mod conversation;
pub mod error;
pub mod policy;
pub mod session;
pub mod tools;
pub mod workspace;

pub use agent_loop::{AgentLoop, TurnOutcome, TurnStatus};
pub use context::ContextBuilder;
pub use conversation::ConversationState;
pub use error::{AgentError, ErrorKind, ToolError, ToolResult};
pub use policy::{CommandPolicy, DomainPolicy, PolicyViolation};
pub use session::{SessionHandle, SessionManager, SessionStats};
pub use tools::{build_registry, Tool, ToolRegistry};
pub use workspace::{GuardError, WorkspaceGuard};
