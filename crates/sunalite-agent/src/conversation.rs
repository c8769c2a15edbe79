//! Conversation state — ordered history with a bounded retention window.
//!
//! History is stored as *exchanges*: a user message followed by everything
//! the assistant and tools produced in response. Eviction drops whole
//! exchanges, oldest first, so an assistant tool-call request and its tool
//! results always leave together and no orphan tool message can remain.
//! The system message sits outside the window and is never evicted.

use std::collections::VecDeque;

use sunalite_core::types::{Message, ToolCall};
use tracing::debug;

/// Message history owned by one agent loop.
#[derive(Clone, Debug)]
pub struct ConversationState {
    system: Option<Message>,
    exchanges: VecDeque<Vec<Message>>,
    max_exchanges: usize,
    evicted: usize,
}

impl ConversationState {
    /// Keep at most `max_exchanges` exchanges (at least one).
    pub fn new(max_exchanges: usize) -> Self {
        Self {
            system: None,
            exchanges: VecDeque::new(),
            max_exchanges: max_exchanges.max(1),
            evicted: 0,
        }
    }

    pub fn with_system(mut self, prompt: impl Into<String>) -> Self {
        self.set_system(prompt);
        self
    }

    /// Replace the system message.
    pub fn set_system(&mut self, prompt: impl Into<String>) {
        self.system = Some(Message::system(prompt));
    }

    pub fn system(&self) -> Option<&Message> {
        self.system.as_ref()
    }

    pub fn max_exchanges(&self) -> usize {
        self.max_exchanges
    }

    /// Start a new exchange, evicting the oldest ones past the window.
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.exchanges.push_back(vec![Message::user(text)]);
        while self.exchanges.len() > self.max_exchanges {
            if let Some(dropped) = self.exchanges.pop_front() {
                self.evicted += 1;
                debug!(messages = dropped.len(), "evicted oldest exchange");
            }
        }
    }

    /// Append a plain assistant message to the current exchange.
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.current_exchange().push(Message::assistant(text));
    }

    /// Append one complete tool round: the assistant's request message and
    /// one tool message per call, in call order.
    ///
    /// Taking `(call, result)` pairs makes an unmatched result
    /// unrepresentable.
    pub fn push_tool_round(&mut self, content: Option<String>, round: Vec<(ToolCall, String)>) {
        if round.is_empty() {
            if let Some(text) = content {
                self.push_assistant(text);
            }
            return;
        }
        let (calls, results): (Vec<ToolCall>, Vec<String>) = round.into_iter().unzip();
        let tool_messages: Vec<Message> = calls
            .iter()
            .zip(results)
            .map(|(call, result)| Message::tool_result(call.id.clone(), result))
            .collect();

        let exchange = self.current_exchange();
        exchange.push(Message::assistant_tool_calls(content, calls));
        exchange.extend(tool_messages);
    }

    /// Everything to send to the model: system message first, then the
    /// retained exchanges in order.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.len() + 1);
        out.extend(self.system.iter().cloned());
        out.extend(self.history().cloned());
        out
    }

    /// Retained messages, excluding the system message.
    pub fn history(&self) -> impl Iterator<Item = &Message> {
        self.exchanges.iter().flatten()
    }

    /// Number of retained messages, excluding the system message.
    pub fn len(&self) -> usize {
        self.exchanges.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.len()
    }

    /// Exchanges dropped by the retention window so far.
    pub fn evicted_count(&self) -> usize {
        self.evicted
    }

    /// Text of the most recent assistant message that has any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.history()
            .filter(|m| matches!(m, Message::Assistant { .. }))
            .map(Message::text)
            .filter(|t| !t.is_empty())
            .last()
    }

    /// Drop the history but keep the system message.
    pub fn clear(&mut self) {
        self.exchanges.clear();
    }

    fn current_exchange(&mut self) -> &mut Vec<Message> {
        if self.exchanges.is_empty() {
            self.exchanges.push_back(Vec::new());
        }
        let last = self.exchanges.len() - 1;
        &mut self.exchanges[last]
    }
}
