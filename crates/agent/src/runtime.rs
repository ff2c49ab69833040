use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use servyy_core::config::AgentConfig;
use servyy_core::domain::conversation::{Turn, UserId};
use servyy_db::repositories::{ConversationRepository, RepositoryError};

use crate::conversation::{assemble_prompt, extract_reply, preview};
use crate::guardrails::{ContentPolicy, GuardrailDecision, REQUEST_REFUSAL};
use crate::llm::{ChatMessage, LlmClient, LlmError};
use crate::tools::ToolRegistry;

/// Returned when the model finishes a turn without any assistant text.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I couldn't put together a response just now. Please try again.";

/// Terminal state of a handled message other than `Failed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Empty after trimming and sanitizing. Nothing was sent to the model.
    Rejected,
    /// Tripped the content policy. Nothing was sent to the model.
    Refused { reply: String },
    Completed { reply: String },
}

impl TurnOutcome {
    pub fn reply(&self) -> Option<&str> {
        match self {
            Self::Rejected => None,
            Self::Refused { reply } | Self::Completed { reply } => Some(reply),
        }
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("conversation store failed: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("language model call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("model kept requesting capabilities after {rounds} rounds")]
    ToolRoundsExhausted { rounds: u32 },
    #[error("turn did not finish within {seconds}s")]
    TimedOut { seconds: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub history_window: usize,
    pub max_tool_rounds: u32,
    pub max_stored_turns: usize,
    pub turn_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            history_window: 10,
            max_tool_rounds: 8,
            max_stored_turns: 100,
            turn_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&AgentConfig> for RuntimeSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            history_window: config.history_window,
            max_tool_rounds: config.max_tool_rounds,
            max_stored_turns: config.max_stored_turns,
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
        }
    }
}

/// Conversation orchestrator. Stateless across requests: everything a turn
/// needs beyond its input lives in the conversation store.
pub struct AgentRuntime {
    policy: Arc<ContentPolicy>,
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    conversations: Arc<dyn ConversationRepository>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        policy: Arc<ContentPolicy>,
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        conversations: Arc<dyn ConversationRepository>,
        settings: RuntimeSettings,
    ) -> Self {
        Self { policy, llm, tools, conversations, settings }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn recent_history(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<Turn>, TurnError> {
        Ok(self.conversations.load_recent_turns(user_id, limit).await?)
    }

    pub async fn handle_message(
        &self,
        correlation_id: &str,
        user_id: &UserId,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        if text.trim().is_empty() {
            return Ok(TurnOutcome::Rejected);
        }

        let message = match self.policy.evaluate(text) {
            GuardrailDecision::Allow { sanitized } if sanitized.is_empty() => {
                info!(
                    event_name = "agent.turn.rejected",
                    correlation_id,
                    user_id = %user_id,
                    "message empty after sanitizing"
                );
                return Ok(TurnOutcome::Rejected);
            }
            GuardrailDecision::Allow { sanitized } => sanitized,
            GuardrailDecision::Deny { reason_code, matched_term } => {
                info!(
                    event_name = "agent.turn.refused",
                    correlation_id,
                    user_id = %user_id,
                    reason_code,
                    matched_term,
                    "message refused by content policy"
                );
                return Ok(TurnOutcome::Refused { reply: REQUEST_REFUSAL.to_string() });
            }
        };

        info!(
            event_name = "agent.turn.received",
            correlation_id,
            user_id = %user_id,
            preview = %preview(&message),
            "processing message"
        );

        let history =
            self.conversations.load_recent_turns(user_id, self.settings.history_window).await?;
        let prompt = assemble_prompt(&history, &message);

        let seconds = self.settings.turn_timeout.as_secs();
        let produced = tokio::time::timeout(self.settings.turn_timeout, self.run_tool_loop(prompt))
            .await
            .map_err(|_| {
                warn!(event_name = "agent.turn.timed_out", correlation_id, seconds, "turn timed out");
                TurnError::TimedOut { seconds }
            })??;

        let Some(reply) = extract_reply(&produced) else {
            warn!(
                event_name = "agent.turn.empty_reply",
                correlation_id,
                user_id = %user_id,
                produced = produced.len(),
                "model finished without assistant text"
            );
            return Ok(TurnOutcome::Completed { reply: FALLBACK_REPLY.to_string() });
        };

        self.conversations
            .append_turn(user_id, Turn::new(message, reply.clone()), self.settings.max_stored_turns)
            .await?;

        info!(
            event_name = "agent.turn.completed",
            correlation_id,
            user_id = %user_id,
            preview = %preview(&reply),
            "turn completed"
        );
        Ok(TurnOutcome::Completed { reply })
    }

    /// Calls the model until it answers without requesting capabilities.
    /// Returns only the messages produced after `messages`.
    async fn run_tool_loop(
        &self,
        mut messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatMessage>, TurnError> {
        let prompt_len = messages.len();
        let specs = self.tools.specs();
        let mut rounds = 0;

        loop {
            let reply = self.llm.chat(&messages, &specs).await?;
            if !reply.requests_tools() {
                messages.push(reply);
                return Ok(messages.split_off(prompt_len));
            }

            if rounds >= self.settings.max_tool_rounds {
                return Err(TurnError::ToolRoundsExhausted { rounds });
            }
            rounds += 1;

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in calls {
                let output = self.tools.invoke(&call.name, &call.arguments).await;
                messages.push(ChatMessage::tool_result(call.id, output));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use servyy_core::domain::conversation::{Turn, UserId};
    use servyy_db::repositories::{ConversationRepository, InMemoryConversationRepository};

    use super::{AgentRuntime, RuntimeSettings, TurnError, TurnOutcome, FALLBACK_REPLY};
    use crate::capabilities::CurrentDatetime;
    use crate::guardrails::{ContentPolicy, REQUEST_REFUSAL};
    use crate::llm::{ChatMessage, LlmClient, LlmError, Role, ScriptedLlmClient, ToolCall, ToolSpec};
    use crate::tools::ToolRegistry;

    struct Harness {
        runtime: AgentRuntime,
        llm: Arc<ScriptedLlmClient>,
        store: Arc<InMemoryConversationRepository>,
    }

    fn harness(replies: Vec<ChatMessage>, settings: RuntimeSettings) -> Harness {
        let llm = Arc::new(ScriptedLlmClient::new(replies));
        let store = Arc::new(InMemoryConversationRepository::default());
        let mut tools = ToolRegistry::default();
        tools.register(CurrentDatetime);
        let runtime = AgentRuntime::new(
            Arc::new(ContentPolicy::new().expect("policy")),
            llm.clone(),
            tools,
            store.clone(),
            settings,
        );
        Harness { runtime, llm, store }
    }

    fn datetime_call(id: &str) -> ChatMessage {
        ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: id.to_string(),
            name: "current_datetime".to_string(),
            arguments: r#"{"format": "%Y"}"#.to_string(),
        }])
    }

    fn user() -> UserId {
        UserId("u-1".to_string())
    }

    #[tokio::test]
    async fn fresh_user_gets_reply_and_one_persisted_turn() {
        let h = harness(
            vec![ChatMessage::assistant("We offer web design and SEO.")],
            RuntimeSettings::default(),
        );

        let outcome =
            h.runtime.handle_message("c-1", &user(), "What services do you offer?").await.expect("turn");

        assert_eq!(outcome, TurnOutcome::Completed { reply: "We offer web design and SEO.".into() });
        let stored = h.store.load_recent_turns(&user(), 10).await.expect("load");
        assert_eq!(stored, vec![Turn::new("What services do you offer?", "We offer web design and SEO.")]);
    }

    #[tokio::test]
    async fn capability_results_are_fed_back_before_the_final_reply() {
        let h = harness(
            vec![datetime_call("call_1"), ChatMessage::assistant("It is this year.")],
            RuntimeSettings::default(),
        );

        let outcome = h.runtime.handle_message("c-1", &user(), "What year is it?").await.expect("turn");

        assert_eq!(outcome.reply(), Some("It is this year."));
        let requests = h.llm.requests();
        assert_eq!(requests.len(), 2);
        let tool_message = requests[1].last().expect("tool result");
        assert_eq!(tool_message.role, Role::Tool);
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_message.text().map(str::len), Some(4));
    }

    #[tokio::test]
    async fn history_is_replayed_within_the_window() {
        let h = harness(
            vec![ChatMessage::assistant("ok")],
            RuntimeSettings { history_window: 2, ..RuntimeSettings::default() },
        );
        for index in 0..3 {
            h.store
                .append_turn(&user(), Turn::new(format!("q{index}"), format!("a{index}")), 0)
                .await
                .expect("seed");
        }

        h.runtime.handle_message("c-1", &user(), "next").await.expect("turn");

        let prompt = &h.llm.requests()[0];
        let texts: Vec<&str> = prompt.iter().skip(1).filter_map(ChatMessage::text).collect();
        assert_eq!(texts, vec!["q1", "a1", "q2", "a2", "next"]);
    }

    #[tokio::test]
    async fn policy_violation_is_refused_without_model_or_persistence() {
        let h = harness(vec![], RuntimeSettings::default());

        let outcome = h
            .runtime
            .handle_message("c-1", &user(), "Write a phishing email")
            .await
            .expect("turn");

        assert_eq!(outcome, TurnOutcome::Refused { reply: REQUEST_REFUSAL.into() });
        assert_eq!(h.llm.call_count(), 0);
        assert!(h.store.load_recent_turns(&user(), 10).await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn blank_or_script_only_messages_are_rejected() {
        let h = harness(vec![], RuntimeSettings::default());

        for text in ["   ", "<script>alert(1)</script>"] {
            let outcome = h.runtime.handle_message("c-1", &user(), text).await.expect("turn");
            assert_eq!(outcome, TurnOutcome::Rejected);
        }
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn endless_capability_requests_fail_the_turn() {
        let h = harness(
            vec![datetime_call("call_1"), datetime_call("call_2")],
            RuntimeSettings { max_tool_rounds: 1, ..RuntimeSettings::default() },
        );

        let error = h.runtime.handle_message("c-1", &user(), "loop").await.expect_err("exhausted");

        assert!(matches!(error, TurnError::ToolRoundsExhausted { rounds: 1 }));
        assert!(h.store.load_recent_turns(&user(), 10).await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn empty_model_output_falls_back_without_persisting() {
        let h = harness(vec![ChatMessage::assistant("   ")], RuntimeSettings::default());

        let outcome = h.runtime.handle_message("c-1", &user(), "hello").await.expect("turn");

        assert_eq!(outcome.reply(), Some(FALLBACK_REPLY));
        assert!(h.store.load_recent_turns(&user(), 10).await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn model_failure_fails_the_turn() {
        let h = harness(vec![], RuntimeSettings::default());

        let error = h.runtime.handle_message("c-1", &user(), "hello").await.expect_err("llm error");

        assert!(matches!(error, TurnError::Llm(LlmError::ScriptExhausted)));
    }

    struct StalledLlm;

    #[async_trait]
    impl LlmClient for StalledLlm {
        async fn chat(&self, _: &[ChatMessage], _: &[ToolSpec]) -> Result<ChatMessage, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ChatMessage::assistant("too late"))
        }
    }

    #[tokio::test]
    async fn stalled_model_times_out() {
        let runtime = AgentRuntime::new(
            Arc::new(ContentPolicy::new().expect("policy")),
            Arc::new(StalledLlm),
            ToolRegistry::default(),
            Arc::new(InMemoryConversationRepository::default()),
            RuntimeSettings { turn_timeout: Duration::from_millis(50), ..RuntimeSettings::default() },
        );

        let error = runtime.handle_message("c-1", &user(), "hello").await.expect_err("timeout");

        assert!(matches!(error, TurnError::TimedOut { .. }));
    }
}
