//! Email composition: model-assisted draft extraction, markdown rendering
//! and delivery through a [`MailTransport`].

pub mod gmail;
pub mod render;

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use servyy_core::domain::email::{filter_addresses, EmailDraft};
use servyy_core::errors::ApplicationError;

use crate::llm::LlmClient;

pub use gmail::{GmailTransport, MailError, MailTransport, OutgoingEmail, RecordingMailTransport};
pub use render::render_markdown;

pub const NO_RECIPIENT: &str = "❌ No valid recipient email found.";

const PARSER_SYSTEM_PROMPT: &str = r#"You are an email parser AI.
Your job is to extract email components from already-drafted email content.

Given email content, extract:
1. recipient email(s) from To: line or context
2. CC email(s) if mentioned (or "none" if not specified)
3. subject line (if provided) or generate appropriate one
4. email body/message content

The input may contain:
- A complete drafted email with headers
- Context mentioning recipient emails and draft content
- Mixed format with recipient info and message body

Output ONLY valid JSON in this exact format:
{"subject": "...", "Mail_draft": "...", "to_mail": "...", "cc_mail": "..."}

Rules:
- Extract recipient emails accurately
- Keep the email body content as-is (don't rewrite)
- If no subject provided, create a professional one
- If no CC mentioned, use "none"
- Multiple emails separated by commas"#;

#[derive(Deserialize)]
struct ParsedDraft {
    subject: String,
    #[serde(rename = "Mail_draft")]
    mail_draft: String,
    to_mail: AddressField,
    #[serde(default)]
    cc_mail: AddressField,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressField {
    Joined(String),
    List(Vec<String>),
}

impl Default for AddressField {
    fn default() -> Self {
        Self::Joined("none".to_string())
    }
}

impl AddressField {
    fn resolve(&self) -> Vec<String> {
        match self {
            Self::Joined(joined) => filter_addresses([joined.as_str()]),
            Self::List(items) => filter_addresses(items.iter().map(String::as_str)),
        }
    }
}

pub struct EmailComposer {
    llm: Arc<dyn LlmClient>,
    transport: Arc<dyn MailTransport>,
}

impl EmailComposer {
    pub fn new(llm: Arc<dyn LlmClient>, transport: Arc<dyn MailTransport>) -> Self {
        Self { llm, transport }
    }

    /// Extracts recipients, subject and body from free-form context with one
    /// model call. Undecodable output is a `DraftParse` error.
    pub async fn parse(&self, context: &str) -> Result<EmailDraft, ApplicationError> {
        let raw = self.llm.complete(Some(PARSER_SYSTEM_PROMPT), context).await.map_err(
            |error| ApplicationError::ExternalService { service: "llm", message: error.to_string() },
        )?;
        parse_draft_payload(&raw)
    }

    /// Parses, filters recipients, renders and dispatches. Never fails: every
    /// outcome is a user-facing summary string.
    pub async fn send(&self, context: &str) -> String {
        let draft = match self.parse(context).await {
            Ok(draft) => draft,
            Err(error) => {
                warn!(event_name = "agent.email.parse_failed", error = %error, "draft parse failed");
                return format!("❌ Failed to send email: {error}");
            }
        };

        if !draft.has_recipients() {
            return NO_RECIPIENT.to_string();
        }

        let email = OutgoingEmail {
            to: draft.to.clone(),
            cc: draft.cc.clone(),
            subject: draft.subject.clone(),
            html_body: render_markdown(&draft.body),
        };

        match self.transport.send(&email).await {
            Ok(()) => {
                info!(
                    event_name = "agent.email.sent",
                    recipients = email.to.len(),
                    cc = email.cc.len(),
                    "cold email sent"
                );
                format!(
                    "✅ Email sent successfully to {} with subject: {}",
                    email.to.join(", "),
                    email.subject
                )
            }
            Err(error) => format!("❌ Failed to send email: {error}"),
        }
    }
}

/// Decodes the parser model's reply, tolerating fenced code wrappers and
/// chatter around the JSON object.
pub fn parse_draft_payload(raw: &str) -> Result<EmailDraft, ApplicationError> {
    let payload = extract_json_object(raw);
    let parsed: ParsedDraft = serde_json::from_str(payload)
        .map_err(|error| ApplicationError::DraftParse(format!("Failed to parse email data: {error}")))?;

    Ok(EmailDraft {
        subject: parsed.subject.trim().to_string(),
        body: parsed.mail_draft,
        to: parsed.to_mail.resolve(),
        cc: parsed.cc_mail.resolve(),
    })
}

fn extract_json_object(raw: &str) -> &str {
    let mut content = raw.trim();

    if let Some((_, after)) = content.split_once("```json") {
        content = after.split("```").next().unwrap_or(after).trim();
    } else if let Some((_, after)) = content.split_once("```") {
        content = after.split("```").next().unwrap_or(after).trim();
    }

    match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use servyy_core::errors::ApplicationError;

    use super::{parse_draft_payload, EmailComposer, RecordingMailTransport, NO_RECIPIENT};
    use crate::llm::{ChatMessage, ScriptedLlmClient};

    fn composer_with(
        reply: &str,
        transport: Arc<RecordingMailTransport>,
    ) -> (EmailComposer, Arc<ScriptedLlmClient>) {
        let llm = Arc::new(ScriptedLlmClient::new([ChatMessage::assistant(reply)]));
        (EmailComposer::new(llm.clone(), transport), llm)
    }

    #[test]
    fn fenced_payload_with_chatter_is_decoded() {
        let raw = "Sure! Here it is:\n```json\n{\"subject\": \"Intro\", \"Mail_draft\": \"Hi\", \"to_mail\": \"a@x.com, none, b@x.com\", \"cc_mail\": \"none\"}\n```\nThanks";

        let draft = parse_draft_payload(raw).expect("decode");

        assert_eq!(draft.subject, "Intro");
        assert_eq!(draft.to, vec!["a@x.com".to_string(), "b@x.com".to_string()]);
        assert!(draft.cc.is_empty());
    }

    #[test]
    fn list_shaped_recipients_are_accepted() {
        let raw = r#"{"subject": "S", "Mail_draft": "B", "to_mail": ["a@x.com", "bad"], "cc_mail": ["c@x.com"]}"#;

        let draft = parse_draft_payload(raw).expect("decode");

        assert_eq!(draft.to, vec!["a@x.com".to_string()]);
        assert_eq!(draft.cc, vec!["c@x.com".to_string()]);
    }

    #[test]
    fn recipients_carrying_header_lines_are_dropped() {
        let raw = r#"{"subject": "S", "Mail_draft": "B", "to_mail": "a@x.com\r\nBcc: hidden@evil.io", "cc_mail": "none"}"#;

        let draft = parse_draft_payload(raw).expect("decode");

        assert!(draft.to.is_empty());
    }

    #[test]
    fn undecodable_payload_is_a_draft_parse_error() {
        let error = parse_draft_payload("I could not find an email here.").expect_err("fails");
        assert!(matches!(error, ApplicationError::DraftParse(_)));
    }

    #[tokio::test]
    async fn send_dispatches_rendered_body_to_filtered_recipients() {
        let transport = Arc::new(RecordingMailTransport::default());
        let (composer, llm) = composer_with(
            r#"{"subject": "Web development", "Mail_draft": "Hi John,\nLet's talk.", "to_mail": "john@acme.io, none", "cc_mail": "none"}"#,
            transport.clone(),
        );

        let summary = composer.send("To: john@acme.io ...").await;

        assert_eq!(
            summary,
            "✅ Email sent successfully to john@acme.io with subject: Web development"
        );
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html_body.contains("<br />"));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn send_refuses_without_a_valid_recipient() {
        let transport = Arc::new(RecordingMailTransport::default());
        let (composer, _) = composer_with(
            r#"{"subject": "S", "Mail_draft": "B", "to_mail": "none", "cc_mail": "none"}"#,
            transport.clone(),
        );

        assert_eq!(composer.send("no address").await, NO_RECIPIENT);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn transport_failures_become_summaries() {
        let transport = Arc::new(RecordingMailTransport::failing("quota exceeded"));
        let (composer, _) = composer_with(
            r#"{"subject": "S", "Mail_draft": "B", "to_mail": "a@x.com", "cc_mail": "none"}"#,
            transport,
        );

        assert_eq!(composer.send("ctx").await, "❌ Failed to send email: quota exceeded");
    }

    #[tokio::test]
    async fn parse_failures_become_summaries() {
        let transport = Arc::new(RecordingMailTransport::default());
        let (composer, _) = composer_with("no json at all", transport);

        let summary = composer.send("ctx").await;

        assert!(summary.starts_with("❌ Failed to send email: draft parse failure"), "{summary}");
    }
}
