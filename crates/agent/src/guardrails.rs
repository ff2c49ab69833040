use regex::Regex;

/// Returned by the orchestrator when an inbound message trips the policy.
pub const REQUEST_REFUSAL: &str =
    "❌ Request violates content policy. Please rephrase professionally.";

/// Returned by side-effecting capabilities when their input trips the policy.
pub const CONTENT_REFUSAL: &str = "❌ Content violates policy. Please revise.";

const INJECTION_PATTERNS: [&str; 4] =
    [r"(?is)<script.*?</script>", r"(?i)javascript:", r"(?i)eval\(", r"(?i)exec\("];

const FORBIDDEN_TERMS: [&str; 7] =
    ["hack", "exploit", "spam", "phishing", "fraud", "scam", "illegal"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow { sanitized: String },
    Deny { reason_code: &'static str, matched_term: &'static str },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Best-effort content filter: strips script-injection fragments, then
/// rejects text containing any forbidden term as a case-insensitive
/// substring. Not a security boundary.
#[derive(Clone, Debug)]
pub struct ContentPolicy {
    injection_patterns: Vec<Regex>,
    forbidden_terms: &'static [&'static str],
}

impl ContentPolicy {
    pub fn new() -> Result<Self, regex::Error> {
        let injection_patterns =
            INJECTION_PATTERNS.iter().map(|pattern| Regex::new(pattern)).collect::<Result<_, _>>()?;
        Ok(Self { injection_patterns, forbidden_terms: &FORBIDDEN_TERMS })
    }

    pub fn sanitize(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for pattern in &self.injection_patterns {
            if pattern.is_match(&cleaned) {
                cleaned = pattern.replace_all(&cleaned, "").into_owned();
            }
        }
        cleaned.trim().to_string()
    }

    pub fn forbidden_term(&self, text: &str) -> Option<&'static str> {
        let lowered = text.to_lowercase();
        self.forbidden_terms.iter().copied().find(|term| lowered.contains(term))
    }

    pub fn evaluate(&self, text: &str) -> GuardrailDecision {
        let sanitized = self.sanitize(text);
        match self.forbidden_term(&sanitized) {
            Some(matched_term) => {
                GuardrailDecision::Deny { reason_code: "forbidden_term", matched_term }
            }
            None => GuardrailDecision::Allow { sanitized },
        }
    }
}
