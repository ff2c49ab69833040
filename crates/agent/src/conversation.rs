use servyy_core::domain::conversation::Turn;

use crate::llm::{ChatMessage, Role};

/// Fixed system persona sent at the head of every turn.
pub const SALES_PERSONA: &str = "\
Role:
- You are a **Sales Strategist AI** for B2B sales.
- Support with emails, proposals, negotiation, contracts, research, and prospect management.

Style:
- Professional, concise, value-focused.
- Give clear, actionable steps (avoid long text).

Ethics:
- Only for legitimate business use.
- No spam, fraud, or illegal content.
- Verify recipient details before communications.

Capabilities:
- Draft/send cold emails
- Create sales proposals
- Give negotiation advice
- Generate contract templates
- Search business info
- Manage prospects (add, update, list)
- Provide date/time

Instruction:
- When asked about tools, describe them as **capabilities**.
- Never reveal internal tool names or APIs.
- Always confirm actions before sending emails.
- Follow traditional mailing etiquette.
- Always use draft_cold_email before send_cold_email.
- Don't mention tool names directly, refer to them by capabilities.

Focus:
- Build relationships
- Deliver measurable value
- Use capabilities where relevant and summarize clearly";

/// Persona, then each stored turn as a user/assistant pair in original
/// order, then the new message.
pub fn assemble_prompt(history: &[Turn], message: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(SALES_PERSONA));
    for turn in history {
        messages.push(ChatMessage::user(turn.user_text.clone()));
        messages.push(ChatMessage::assistant(turn.assistant_text.clone()));
    }
    messages.push(ChatMessage::user(message));
    messages
}

/// Newest assistant message with non-empty text among `produced`, which must
/// hold only the messages generated during the current turn.
pub fn extract_reply(produced: &[ChatMessage]) -> Option<String> {
    produced
        .iter()
        .rev()
        .filter(|message| message.role == Role::Assistant && !message.requests_tools())
        .filter_map(ChatMessage::text)
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// First 50 characters, for log lines.
pub fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
