use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Trims a caller-supplied identifier. Blank input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One completed exchange. Serialized as `{"user": ..., "ai": ...}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(rename = "user")]
    pub user_text: String,
    #[serde(rename = "ai")]
    pub assistant_text: String,
}

impl Turn {
    pub fn new(user_text: impl Into<String>, assistant_text: impl Into<String>) -> Self {
        Self { user_text: user_text.into(), assistant_text: assistant_text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationRecord {
    pub user_id: UserId,
    pub turns: Vec<Turn>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id, turns: Vec::new(), updated_at: Utc::now() }
    }

    /// Appends one turn and drops the oldest turns beyond `max_stored_turns`.
    /// A cap of zero keeps the full history.
    pub fn append(&mut self, turn: Turn, max_stored_turns: usize) {
        self.turns.push(turn);
        truncate_to_newest(&mut self.turns, max_stored_turns);
        self.updated_at = Utc::now();
    }

    pub fn recent(&self, limit: usize) -> &[Turn] {
        recent_window(&self.turns, limit)
    }
}

/// Newest `limit` turns in chronological order.
pub fn recent_window(turns: &[Turn], limit: usize) -> &[Turn] {
    let start = turns.len().saturating_sub(limit);
    &turns[start..]
}

pub fn truncate_to_newest(turns: &mut Vec<Turn>, max_stored_turns: usize) {
    if max_stored_turns > 0 && turns.len() > max_stored_turns {
        let excess = turns.len() - max_stored_turns;
        turns.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationRecord, Turn, UserId};

    fn record_with(count: usize, cap: usize) -> ConversationRecord {
        let mut record = ConversationRecord::new(UserId("u-1".to_string()));
        for index in 0..count {
            record.append(Turn::new(format!("q{index}"), format!("a{index}")), cap);
        }
        record
    }

    #[test]
    fn recent_window_keeps_chronological_order() {
        let record = record_with(5, 0);
        let window = record.recent(3);

        assert_eq!(window.len(), 3);
        assert_eq!(window[0], Turn::new("q2", "a2"));
        assert_eq!(window[2], Turn::new("q4", "a4"));
    }

    #[test]
    fn recent_window_returns_everything_when_history_is_short() {
        let record = record_with(2, 0);
        assert_eq!(record.recent(10).len(), 2);
        assert!(record.recent(0).is_empty());
    }

    #[test]
    fn append_truncates_to_storage_cap() {
        let record = record_with(7, 4);

        assert_eq!(record.turns.len(), 4);
        assert_eq!(record.turns[0].user_text, "q3");
        assert_eq!(record.turns[3].user_text, "q6");
    }

    #[test]
    fn turn_serializes_with_short_keys() {
        let json = serde_json::to_string(&Turn::new("hi", "hello")).expect("serialize turn");
        assert_eq!(json, r#"{"user":"hi","ai":"hello"}"#);
    }

    #[test]
    fn blank_user_ids_are_rejected() {
        assert_eq!(UserId::parse("   "), None);
        assert_eq!(UserId::parse(" alice "), Some(UserId("alice".to_string())));
        assert_ne!(UserId::generate(), UserId::generate());
    }
}
