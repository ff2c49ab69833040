use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument object as produced by the model.
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: Some(content.into()), tool_calls: Vec::new(), tool_call_id: None }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content: None, tool_calls, tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Non-blank text content, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|content| !content.trim().is_empty())
    }

    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Capability description advertised to the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Decode(String),
    #[error("llm response contained no message")]
    EmptyResponse,
    #[error("scripted llm has no responses left")]
    ScriptExhausted,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatMessage, LlmError>;

    /// Single-shot completion without capabilities.
    async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        let reply = self.chat(&messages, &[]).await?;
        reply.content.ok_or(LlmError::EmptyResponse)
    }
}

/// Client for any OpenAI-style `/chat/completions` endpoint (Groq, OpenAI,
/// Ollama's `/v1` surface).
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, body: &WireRequest<'_>) -> Result<WireResponse, Attempt> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| Attempt::Retryable(LlmError::Transport(error.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = LlmError::Status { status: status.as_u16(), body };
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                Attempt::Retryable(error)
            } else {
                Attempt::Fatal(error)
            });
        }

        response
            .json::<WireResponse>()
            .await
            .map_err(|error| Attempt::Fatal(LlmError::Decode(error.to_string())))
    }
}

enum Attempt {
    Retryable(LlmError),
    Fatal(LlmError),
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatMessage, LlmError> {
        let body = WireRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: tools.iter().map(WireTool::from).collect(),
        };

        debug!(
            event_name = "agent.llm.request",
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "calling chat completions"
        );

        let mut attempt = 0;
        let response = loop {
            match self.send_once(&body).await {
                Ok(response) => break response,
                Err(Attempt::Retryable(error)) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "agent.llm.retry",
                        attempt,
                        error = %error,
                        "transient llm failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                }
                Err(Attempt::Retryable(error)) | Err(Attempt::Fatal(error)) => return Err(error),
            }
        };

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(ChatMessage::from)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec,
}

#[derive(Serialize)]
struct WireFunctionSpec {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireMessage>,
}

/// Some compatible servers send `"tool_calls": null` on plain replies.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn function_kind() -> String {
    "function".to_string()
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: function_kind(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

impl From<WireMessage> for ChatMessage {
    fn from(message: WireMessage) -> Self {
        Self {
            role: message.role,
            content: message.content,
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
            tool_call_id: message.tool_call_id,
        }
    }
}

impl From<&ToolSpec> for WireTool {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireFunctionSpec {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

/// Deterministic client that replays queued replies and records every
/// request it receives. Used to drive the orchestrator without a network.
#[derive(Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<ChatMessage>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: impl IntoIterator<Item = ChatMessage>) -> Self {
        Self { replies: Mutex::new(replies.into_iter().collect()), requests: Mutex::default() }
    }

    pub fn push(&self, reply: ChatMessage) {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner).push_back(reply);
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ChatMessage, LlmError> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(messages.to_vec());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or(LlmError::ScriptExhausted)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        ChatMessage, LlmClient, LlmError, Role, ScriptedLlmClient, ToolCall, ToolSpec, WireMessage,
        WireResponse, WireTool,
    };

    #[test]
    fn assistant_tool_call_serializes_in_openai_shape() {
        let message = ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "call_1".to_string(),
            name: "current_datetime".to_string(),
            arguments: "{\"format\":\"%Y\"}".to_string(),
        }]);

        let value = serde_json::to_value(WireMessage::from(&message)).expect("serialize");

        assert_eq!(value["role"], "assistant");
        assert!(value["content"].is_null());
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(value["tool_calls"][0]["function"]["name"], "current_datetime");
    }

    #[test]
    fn tool_result_carries_call_id() {
        let value =
            serde_json::to_value(WireMessage::from(&ChatMessage::tool_result("call_9", "ok")))
                .expect("serialize");

        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_9");
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn tool_spec_wraps_function_schema() {
        let spec = ToolSpec {
            name: "web_search".to_string(),
            description: "Search the web".to_string(),
            parameters: json!({"type": "object"}),
        };

        let value = serde_json::to_value(WireTool::from(&spec)).expect("serialize");

        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "web_search");
    }

    #[test]
    fn response_with_tool_calls_decodes() {
        let raw = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_a",
                        "type": "function",
                        "function": {"name": "list_all_prospects", "arguments": "{}"}
                    }]
                }
            }]
        });

        let response: WireResponse = serde_json::from_value(raw).expect("decode");
        let message = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(ChatMessage::from)
            .expect("message");

        assert_eq!(message.role, Role::Assistant);
        assert!(message.requests_tools());
        assert_eq!(message.tool_calls[0].name, "list_all_prospects");
        assert_eq!(message.text(), None);
    }

    #[test]
    fn null_tool_calls_decode_as_plain_reply() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Hello","tool_calls":null}}]}"#;

        let response: WireResponse = serde_json::from_str(raw).expect("decode");
        let message = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(ChatMessage::from)
            .expect("message");

        assert!(!message.requests_tools());
        assert_eq!(message.text(), Some("Hello"));
    }

    #[tokio::test]
    async fn scripted_client_replays_then_reports_exhaustion() {
        let client = ScriptedLlmClient::new([ChatMessage::assistant("first")]);

        let reply = client.complete(Some("sys"), "hello").await.expect("first reply");
        assert_eq!(reply, "first");

        let error = client.complete(None, "again").await.expect_err("exhausted");
        assert!(matches!(error, LlmError::ScriptExhausted));

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0][0].role, Role::System);
        assert_eq!(requests[1].len(), 1);
    }
}
