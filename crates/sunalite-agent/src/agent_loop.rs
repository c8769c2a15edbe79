//! Agent loop — the model ↔ tool-calling state machine.
//!
//! One turn runs:
//! 1. Append the user message (the retention window may evict old exchanges)
//! 2. Send the conversation + tool schemas to the model
//! 3. If the model requested tools, dispatch them concurrently, append one
//!    tool message per request in request order, and go back to 2
//! 4. Otherwise the text is the final answer
//!
//! The turn also ends on the iteration cap, on cancellation, or when the
//! whole-turn timeout fires. Tool failures never end a turn; only an
//! unavailable model backend does.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sunalite_core::config::schema::AgentConfig;
use sunalite_core::types::{ToolCall, ToolDefinition};
use sunalite_providers::{LlmProvider, LlmRequestConfig};

use crate::conversation::ConversationState;
use crate::error::{AgentError, ErrorKind, ToolResult};
use crate::tools::{ToolCallRequest, ToolRegistry};

/// Appended when a turn is cancelled; the in-flight round is discarded.
pub const CANCELLED_NOTICE: &str = "[Turn cancelled before completion. Partial tool work from the interrupted round was discarded.]";

// ─────────────────────────────────────────────
// Turn outcome
// ─────────────────────────────────────────────

/// How a turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TurnStatus {
    /// The model answered without requesting tools.
    Completed,
    /// The dispatch-round cap was reached.
    IterationLimit,
    Cancelled,
    TimedOut,
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnStatus::Completed => "completed",
            TurnStatus::IterationLimit => "iteration limit reached",
            TurnStatus::Cancelled => "cancelled",
            TurnStatus::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Result of one user turn.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    /// Final answer, or the notice appended when the turn ended early.
    pub text: String,
    pub status: TurnStatus,
    /// Model calls made during the turn.
    pub iterations: u32,
    /// Tool calls dispatched during the turn.
    pub tool_calls: usize,
}

impl TurnOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == TurnStatus::Completed
    }
}

/// Counters updated while a turn is running, readable after it is dropped.
#[derive(Default)]
struct Progress {
    iterations: u32,
    tool_calls: usize,
}

// ─────────────────────────────────────────────
// Agent loop
// ─────────────────────────────────────────────

/// Drives turns for one session.
///
/// The loop owns no conversation: callers pass the session's
/// [`ConversationState`] in, which keeps appends single-writer.
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    model: String,
    request_config: LlmRequestConfig,
    max_iterations: u32,
    max_parallel_tools: usize,
    turn_timeout: Duration,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: &AgentConfig) -> Self {
        let model = if config.model.trim().is_empty() {
            provider.default_model().to_string()
        } else {
            config.model.clone()
        };
        Self {
            provider,
            tools,
            model,
            request_config: LlmRequestConfig {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            },
            max_iterations: config.max_tool_iterations.max(1),
            max_parallel_tools: config.max_parallel_tools.max(1),
            turn_timeout: config.turn_timeout(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run one user turn to completion.
    ///
    /// Returns `Err` only when the model backend fails; everything appended
    /// before the failure stays in the conversation.
    pub async fn run_turn(
        &self,
        conversation: &mut ConversationState,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        info!(
            model = %self.model,
            chars = user_text.chars().count(),
            "processing user turn"
        );
        conversation.push_user(user_text);

        let mut progress = Progress::default();
        let interrupted = {
            let turn = self.drive(conversation, &mut progress);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Interrupt::Cancelled,
                finished = tokio::time::timeout(self.turn_timeout, turn) => match finished {
                    Ok(result) => Interrupt::Finished(result),
                    Err(_) => Interrupt::TimedOut,
                },
            }
        };

        let (text, status) = match interrupted {
            Interrupt::Finished(result) => result?,
            Interrupt::Cancelled => {
                warn!(iterations = progress.iterations, "turn cancelled");
                conversation.push_assistant(CANCELLED_NOTICE);
                (CANCELLED_NOTICE.to_string(), TurnStatus::Cancelled)
            }
            Interrupt::TimedOut => {
                warn!(
                    timeout_secs = self.turn_timeout.as_secs(),
                    iterations = progress.iterations,
                    "turn timed out"
                );
                let notice = format!(
                    "[Turn stopped: exceeded the {}s turn limit. Partial tool work from the interrupted round was discarded.]",
                    self.turn_timeout.as_secs()
                );
                conversation.push_assistant(notice.clone());
                (notice, TurnStatus::TimedOut)
            }
        };

        info!(
            status = %status,
            iterations = progress.iterations,
            tool_calls = progress.tool_calls,
            "turn finished"
        );
        Ok(TurnOutcome {
            text,
            status,
            iterations: progress.iterations,
            tool_calls: progress.tool_calls,
        })
    }

    /// The model ↔ tool state machine. Appends only whole rounds, so
    /// dropping this future mid-round leaves the conversation consistent.
    async fn drive(
        &self,
        conversation: &mut ConversationState,
        progress: &mut Progress,
    ) -> Result<(String, TurnStatus), AgentError> {
        let definitions = self.tools.definitions();
        let schemas: Option<&[ToolDefinition]> =
            (!definitions.is_empty()).then_some(definitions.as_slice());

        for iteration in 1..=self.max_iterations {
            progress.iterations = iteration;
            let messages = conversation.to_messages();
            debug!(iteration, messages = messages.len(), "calling model");

            let response = self
                .provider
                .chat(&messages, schemas, &self.model, &self.request_config)
                .await
                .map_err(|e| {
                    warn!(provider = self.provider.display_name(), error = %e, "model call failed");
                    AgentError::from(e)
                })?;

            if !response.has_tool_calls() {
                let text = response.content.unwrap_or_default();
                conversation.push_assistant(text.clone());
                return Ok((text, TurnStatus::Completed));
            }

            let calls = assign_call_ids(response.tool_calls);
            let names: Vec<&str> = calls.iter().map(|c| c.function.name.as_str()).collect();
            info!(iteration, calls = calls.len(), tools = ?names, "dispatching tool round");

            let results = self.dispatch_round(&calls).await;
            progress.tool_calls += calls.len();
            conversation.push_tool_round(response.content, calls.into_iter().zip(results).collect());
        }

        warn!(max_iterations = self.max_iterations, "tool iteration limit reached");
        let notice = format!(
            "[Stopped after {} tool rounds without a final answer. Ask me to continue if more work is needed.]",
            self.max_iterations
        );
        conversation.push_assistant(notice.clone());
        Ok((notice, TurnStatus::IterationLimit))
    }

    /// Run every call of one round, at most `max_parallel_tools` at a time,
    /// returning serialized results in request order.
    async fn dispatch_round(&self, calls: &[ToolCall]) -> Vec<String> {
        let tools = &self.tools;
        stream::iter(calls.iter().map(|call| async move {
            let result = match decode_request(call) {
                Ok(request) => tools.dispatch(request).await,
                Err(invalid) => invalid,
            };
            result.to_content()
        }))
        .buffered(self.max_parallel_tools)
        .collect()
        .await
    }
}

enum Interrupt {
    Finished(Result<(String, TurnStatus), AgentError>),
    Cancelled,
    TimedOut,
}

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

/// Give every call a unique, non-empty id so results pair unambiguously.
fn assign_call_ids(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.trim().is_empty() || seen.contains(&call.id) {
                let id = format!("call_{}", Uuid::new_v4().simple());
                debug!(original = %call.id, assigned = %id, "replaced tool call id");
                call.id = id;
            }
            seen.insert(call.id.clone());
            call
        })
        .collect()
}

/// Decode the model's JSON arguments into a dispatchable request.
fn decode_request(call: &ToolCall) -> Result<ToolCallRequest, ToolResult> {
    let name = &call.function.name;
    call.parse_arguments()
        .map(|params| ToolCallRequest::new(call.id.clone(), name.clone(), params))
        .map_err(|e| {
            warn!(tool = %name, id = %call.id, error = %e, "malformed tool arguments");
            ToolResult::failure(
                ErrorKind::ValidationError,
                format!("Invalid arguments for '{name}': expected a JSON object ({e})"),
            )
        })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolParams};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use sunalite_core::types::{LlmResponse, Message};
    use sunalite_providers::ProviderError;

    /// Returns canned responses in sequence and records what it was sent.
    struct MockProvider {
        responses: Mutex<VecDeque<Result<LlmResponse, ProviderError>>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl MockProvider {
        fn new(responses: Vec<LlmResponse>) -> Self {
            Self::scripted(responses.into_iter().map(Ok).collect())
        }

        fn scripted(responses: Vec<Result<LlmResponse, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn chat(
            &self,
            messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
        ) -> Result<LlmResponse, ProviderError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LlmResponse::text("(no more responses)")))
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }

        fn display_name(&self) -> &str {
            "MockProvider"
        }
    }

    /// Sleeps for `delay_ms`, then echoes `text`.
    struct DelayEcho;

    #[async_trait]
    impl Tool for DelayEcho {
        fn name(&self) -> &str {
            "delay_echo"
        }
        fn description(&self) -> &str {
            "Echo after a delay"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}, "delay_ms": {"type": "integer"}}})
        }
        async fn execute(&self, params: ToolParams) -> ToolResult {
            let delay = params.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
            ToolResult::ok(text.to_string())
        }
    }

    fn agent(provider: Arc<MockProvider>, config: AgentConfig) -> AgentLoop {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DelayEcho));
        AgentLoop::new(provider, Arc::new(registry), &config)
    }

    fn echo_call(id: &str, text: &str, delay_ms: u64) -> ToolCall {
        ToolCall::new(
            id,
            "delay_echo",
            json!({"text": text, "delay_ms": delay_ms}).to_string(),
        )
    }

    fn tool_contents(conv: &ConversationState) -> Vec<(String, Value)> {
        conv.history()
            .filter_map(|m| match m {
                Message::Tool { tool_call_id, content } => {
                    Some((tool_call_id.clone(), serde_json::from_str(content).unwrap()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_simple_answer() {
        let provider = Arc::new(MockProvider::new(vec![LlmResponse::text("Hello from Sunalite!")]));
        let agent = agent(provider.clone(), AgentConfig::default());
        let mut conv = ConversationState::new(10).with_system("sys");

        let outcome = agent.run_turn(&mut conv, "Hi", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.text, "Hello from Sunalite!");
        assert!(outcome.is_complete());
        assert_eq!(outcome.iterations, 1);
        assert_eq!(conv.len(), 2);

        let sent = &provider.seen.lock().unwrap()[0];
        assert_eq!(sent[0].role(), "system");
        assert_eq!(sent[1].text(), "Hi");
    }

    #[tokio::test]
    async fn test_results_follow_request_order() {
        let provider = Arc::new(MockProvider::new(vec![
            LlmResponse::with_tool_calls(vec![
                echo_call("a", "slow", 120),
                echo_call("b", "fast", 0),
                echo_call("c", "medium", 40),
            ]),
            LlmResponse::text("done"),
        ]));
        let agent = agent(provider, AgentConfig::default());
        let mut conv = ConversationState::new(10);

        let outcome = agent.run_turn(&mut conv, "go", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.tool_calls, 3);

        let results = tool_contents(&conv);
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(results[0].1["message"], "slow");
        assert_eq!(results[1].1["message"], "fast");
        assert_eq!(results[2].1["message"], "medium");
    }

    #[tokio::test]
    async fn test_round_runs_concurrently() {
        let provider = Arc::new(MockProvider::new(vec![
            LlmResponse::with_tool_calls(vec![
                echo_call("a", "1", 200),
                echo_call("b", "2", 200),
                echo_call("c", "3", 200),
            ]),
            LlmResponse::text("done"),
        ]));
        let agent = agent(provider, AgentConfig::default());
        let mut conv = ConversationState::new(10);

        let started = std::time::Instant::now();
        agent.run_turn(&mut conv, "go", &CancellationToken::new()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments_fed_back() {
        let provider = Arc::new(MockProvider::new(vec![
            LlmResponse::with_tool_calls(vec![
                ToolCall::new("x", "teleport", "{}"),
                ToolCall::new("y", "delay_echo", "not json"),
            ]),
            LlmResponse::text("recovered"),
        ]));
        let agent = agent(provider, AgentConfig::default());
        let mut conv = ConversationState::new(10);

        let outcome = agent.run_turn(&mut conv, "go", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.text, "recovered");

        let results = tool_contents(&conv);
        assert_eq!(results[0].1["error"], "UnknownTool");
        assert_eq!(results[1].1["error"], "ValidationError");
        assert!(results[1].1["message"].as_str().unwrap().contains("delay_echo"));
    }

    #[tokio::test]
    async fn test_missing_and_duplicate_ids_replaced() {
        let provider = Arc::new(MockProvider::new(vec![
            LlmResponse::with_tool_calls(vec![
                echo_call("", "one", 0),
                echo_call("dup", "two", 0),
                echo_call("dup", "three", 0),
            ]),
            LlmResponse::text("ok"),
        ]));
        let agent = agent(provider, AgentConfig::default());
        let mut conv = ConversationState::new(10);
        agent.run_turn(&mut conv, "go", &CancellationToken::new()).await.unwrap();

        let requested: Vec<String> = conv
            .history()
            .flat_map(|m| m.requested_call_ids().into_iter().map(str::to_string).collect::<Vec<_>>())
            .collect();
        assert_eq!(requested.len(), 3);
        assert!(requested[0].starts_with("call_"));
        assert_eq!(requested[1], "dup");
        assert!(requested[2].starts_with("call_"));
        assert_ne!(requested[0], requested[2]);

        let results: Vec<String> = tool_contents(&conv).into_iter().map(|(id, _)| id).collect();
        assert_eq!(results, requested);
    }

    #[tokio::test]
    async fn test_iteration_limit_appends_notice() {
        let responses = (0..10)
            .map(|i| LlmResponse::with_tool_calls(vec![echo_call(&format!("c{i}"), "again", 0)]))
            .collect();
        let provider = Arc::new(MockProvider::new(responses));
        let config = AgentConfig {
            max_tool_iterations: 3,
            ..AgentConfig::default()
        };
        let agent = agent(provider.clone(), config);
        let mut conv = ConversationState::new(10);

        let outcome = agent.run_turn(&mut conv, "loop", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, TurnStatus::IterationLimit);
        assert_eq!(outcome.tool_calls, 3);
        assert_eq!(provider.calls(), 3);
        assert!(outcome.text.contains("3 tool rounds"));
        assert_eq!(conv.last_assistant_text(), Some(outcome.text.as_str()));
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces() {
        let provider = Arc::new(MockProvider::scripted(vec![
            Ok(LlmResponse::with_tool_calls(vec![echo_call("a", "x", 0)])),
            Err(ProviderError::EmptyResponse),
        ]));
        let agent = agent(provider, AgentConfig::default());
        let mut conv = ConversationState::new(10);

        let err = agent.run_turn(&mut conv, "go", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BackendUnavailable));
        // user message and the completed round remain
        assert_eq!(conv.len(), 3);
    }

    #[tokio::test]
    async fn test_cancel_discards_inflight_round() {
        let provider = Arc::new(MockProvider::new(vec![LlmResponse::with_tool_calls(vec![
            echo_call("a", "never", 5_000),
        ])]));
        let agent = agent(provider, AgentConfig::default());
        let mut conv = ConversationState::new(10);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = agent.run_turn(&mut conv, "go", &cancel).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.status, TurnStatus::Cancelled);

        let roles: Vec<&str> = conv.history().map(Message::role).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
        assert_eq!(conv.last_assistant_text(), Some(CANCELLED_NOTICE));
    }

    #[tokio::test]
    async fn test_turn_timeout_is_backstop() {
        let provider = Arc::new(MockProvider::new(vec![LlmResponse::with_tool_calls(vec![
            echo_call("a", "slow", 5_000),
        ])]));
        let config = AgentConfig {
            turn_timeout_seconds: 1,
            ..AgentConfig::default()
        };
        let agent = agent(provider, config);
        let mut conv = ConversationState::new(10);

        let outcome = agent.run_turn(&mut conv, "go", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, TurnStatus::TimedOut);
        assert!(outcome.text.contains("1s"));
    }

    #[test]
    fn test_model_falls_back_to_provider_default() {
        let provider = Arc::new(MockProvider::new(Vec::new()));
        let config = AgentConfig {
            model: " ".into(),
            ..AgentConfig::default()
        };
        assert_eq!(agent(provider, config).model(), "mock-model");
    }
}
