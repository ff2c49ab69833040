use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::email::EmailComposer;
use crate::guardrails::{ContentPolicy, GuardrailDecision, CONTENT_REFUSAL};
use crate::llm::LlmClient;
use crate::tools::{required_str, Tool, ToolError};

fn context_parameters(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "context": {"type": "string", "description": description}
        },
        "required": ["context"]
    })
}

pub fn draft_prompt(context: &str) -> String {
    format!(
        "Create professional cold email for: {context}\n\nFormat:\nSubject: [subject]\nTo: [email]\n\n[message]"
    )
}

pub struct DraftColdEmail {
    policy: Arc<ContentPolicy>,
    llm: Arc<dyn LlmClient>,
}

impl DraftColdEmail {
    pub fn new(policy: Arc<ContentPolicy>, llm: Arc<dyn LlmClient>) -> Self {
        Self { policy, llm }
    }
}

#[async_trait]
impl Tool for DraftColdEmail {
    fn name(&self) -> &'static str {
        "draft_cold_email"
    }

    fn description(&self) -> &'static str {
        "Generate a cold email draft without sending it."
    }

    fn parameters(&self) -> Value {
        context_parameters("Who the email is for and what it should say")
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let context = required_str(&input, "context")?;
        let GuardrailDecision::Allow { sanitized } = self.policy.evaluate(&context) else {
            return Ok(CONTENT_REFUSAL.to_string());
        };

        match self.llm.complete(None, &draft_prompt(&sanitized)).await {
            Ok(draft) => Ok(format!(
                "📧 **Cold Email Draft:**\n{draft}\n\n📝 Use 'send cold email' to send via Gmail."
            )),
            Err(error) => Ok(format!("❌ Failed to generate email draft: {error}")),
        }
    }
}

pub struct SendColdEmail {
    policy: Arc<ContentPolicy>,
    composer: Arc<EmailComposer>,
}

impl SendColdEmail {
    pub fn new(policy: Arc<ContentPolicy>, composer: Arc<EmailComposer>) -> Self {
        Self { policy, composer }
    }
}

#[async_trait]
impl Tool for SendColdEmail {
    fn name(&self) -> &'static str {
        "send_cold_email"
    }

    fn description(&self) -> &'static str {
        "Send a cold email using the provided context. Context should include recipient email and details."
    }

    fn parameters(&self) -> Value {
        context_parameters("The drafted email including the To: line, subject and body")
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let context = required_str(&input, "context")?;
        let GuardrailDecision::Allow { sanitized } = self.policy.evaluate(&context) else {
            return Ok(CONTENT_REFUSAL.to_string());
        };

        Ok(self.composer.send(&sanitized).await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{DraftColdEmail, SendColdEmail};
    use crate::email::{EmailComposer, RecordingMailTransport};
    use crate::guardrails::{ContentPolicy, CONTENT_REFUSAL};
    use crate::llm::{ChatMessage, ScriptedLlmClient};
    use crate::tools::Tool;

    fn policy() -> Arc<ContentPolicy> {
        Arc::new(ContentPolicy::new().expect("policy"))
    }

    #[tokio::test]
    async fn draft_wraps_model_output() {
        let llm = Arc::new(ScriptedLlmClient::new([ChatMessage::assistant(
            "Subject: Hello\nTo: a@x.com\n\nHi there",
        )]));
        let tool = DraftColdEmail::new(policy(), llm.clone());

        let output = tool
            .execute(json!({"context": "a@x.com about <script>x</script>web design"}))
            .await
            .expect("draft");

        assert!(output.starts_with("📧 **Cold Email Draft:**\nSubject: Hello"));
        let prompt = llm.requests()[0][0].content.clone().unwrap_or_default();
        assert!(prompt.starts_with("Create professional cold email for: a@x.com about web design"));
    }

    #[tokio::test]
    async fn policy_violation_skips_model_and_transport() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let transport = Arc::new(RecordingMailTransport::default());
        let composer = Arc::new(EmailComposer::new(llm.clone(), transport.clone()));

        let draft = DraftColdEmail::new(policy(), llm.clone());
        let send = SendColdEmail::new(policy(), composer);

        assert_eq!(
            draft.execute(json!({"context": "a scam offer"})).await.expect("draft"),
            CONTENT_REFUSAL
        );
        assert_eq!(
            send.execute(json!({"context": "bulk spam to a@x.com"})).await.expect("send"),
            CONTENT_REFUSAL
        );
        assert_eq!(llm.call_count(), 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn model_failure_is_reported_as_text() {
        let tool = DraftColdEmail::new(policy(), Arc::new(ScriptedLlmClient::default()));

        let output = tool.execute(json!({"context": "intro"})).await.expect("draft");

        assert!(output.starts_with("❌ Failed to generate email draft:"));
    }
}
