use serde::{Deserialize, Serialize};

/// Structured extraction of a free-form send instruction. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

impl EmailDraft {
    pub fn has_recipients(&self) -> bool {
        !self.to.is_empty()
    }
}

/// An address is deliverable when it is non-empty, is not the literal
/// `none` (any case), contains `@` and has no inner whitespace or control
/// characters.
pub fn is_deliverable_address(candidate: &str) -> bool {
    let candidate = candidate.trim();
    !candidate.is_empty()
        && !candidate.eq_ignore_ascii_case("none")
        && candidate.contains('@')
        && !candidate.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Splits a comma-separated address list, keeping deliverable addresses in
/// their original order without duplicates.
pub fn filter_addresses<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut addresses: Vec<String> = Vec::new();
    for chunk in raw {
        for candidate in chunk.split(',') {
            let candidate = candidate.trim();
            if is_deliverable_address(candidate) && !addresses.iter().any(|seen| seen == candidate)
            {
                addresses.push(candidate.to_string());
            }
        }
    }
    addresses
}
