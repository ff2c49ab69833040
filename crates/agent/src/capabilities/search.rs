use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::guardrails::ContentPolicy;
use crate::search::SearchProvider;
use crate::tools::{required_str, Tool, ToolError};

pub const SEARCH_UNAVAILABLE: &str = "❌ Web search is not configured.";

/// Web search through the configured provider. Without a provider the
/// capability stays registered and reports itself unavailable.
pub struct WebSearch {
    policy: Arc<ContentPolicy>,
    provider: Option<Arc<dyn SearchProvider>>,
}

impl WebSearch {
    pub fn new(policy: Arc<ContentPolicy>, provider: Option<Arc<dyn SearchProvider>>) -> Self {
        Self { policy, provider }
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search Google for up-to-date information on any topic."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"query": {"type": "string", "description": "Search query"}},
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let Some(provider) = &self.provider else {
            return Ok(SEARCH_UNAVAILABLE.to_string());
        };

        let query = self.policy.sanitize(&required_str(&input, "query")?);
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".to_string()));
        }

        provider.search(&query).await.map_err(|error| {
            warn!(event_name = "agent.search.failed", error = %error, "web search failed");
            ToolError::Failed(format!("Web search failed: {error}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{WebSearch, SEARCH_UNAVAILABLE};
    use crate::guardrails::ContentPolicy;
    use crate::search::StaticSearchProvider;
    use crate::tools::Tool;

    fn policy() -> Arc<ContentPolicy> {
        Arc::new(ContentPolicy::new().expect("policy"))
    }

    #[tokio::test]
    async fn delegates_to_provider() {
        let tool = WebSearch::new(policy(), Some(Arc::new(StaticSearchProvider::new("Acme: anvils"))));

        let output = tool.execute(json!({"query": "acme corp"})).await.expect("search");

        assert_eq!(output, "Acme: anvils");
    }

    #[tokio::test]
    async fn reports_unavailable_without_provider() {
        let tool = WebSearch::new(policy(), None);

        assert_eq!(
            tool.execute(json!({"query": "acme"})).await.expect("search"),
            SEARCH_UNAVAILABLE
        );
    }
}
