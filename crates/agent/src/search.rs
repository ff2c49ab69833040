use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const NO_RESULTS: &str = "No good search result was found";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search transport error: {0}")]
    Transport(String),
    #[error("search provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("search response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Runs a query and returns results already formatted as plain text.
    async fn search(&self, query: &str) -> Result<String, SearchError>;
}

/// Serper.dev Google search.
pub struct SerperSearch {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    results: usize,
}

impl SerperSearch {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        results: usize,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SearchError::Transport(error.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), api_key, results })
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    async fn search(&self, query: &str) -> Result<String, SearchError> {
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .header("X-API-KEY", self.api_key.expose_secret())
            .json(&SerperRequest { q: query, num: self.results })
            .send()
            .await
            .map_err(|error| SearchError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status { status: status.as_u16(), body });
        }

        let parsed = response
            .json::<SerperResponse>()
            .await
            .map_err(|error| SearchError::Decode(error.to_string()))?;

        Ok(format_results(&parsed, self.results))
    }
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerperResponse {
    #[serde(default)]
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Default, Deserialize)]
struct AnswerBox {
    answer: Option<String>,
    snippet: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgeGraph {
    title: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OrganicResult {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

/// Answer box first, then knowledge graph, then up to `limit` organic hits.
pub fn format_results(response: &SerperResponse, limit: usize) -> String {
    let mut sections = Vec::new();

    if let Some(answer_box) = &response.answer_box {
        if let Some(answer) = answer_box.answer.as_ref().or(answer_box.snippet.as_ref()) {
            sections.push(format!("Answer: {answer}"));
        }
    }

    if let Some(graph) = &response.knowledge_graph {
        let heading = match (&graph.title, &graph.kind) {
            (Some(title), Some(kind)) => Some(format!("{title} ({kind})")),
            (Some(title), None) => Some(title.clone()),
            _ => None,
        };
        match (heading, &graph.description) {
            (Some(heading), Some(description)) => sections.push(format!("{heading}: {description}")),
            (Some(heading), None) => sections.push(heading),
            (None, Some(description)) => sections.push(description.clone()),
            (None, None) => {}
        }
    }

    for result in response.organic.iter().take(limit) {
        let mut entry = result.title.clone().unwrap_or_default();
        if let Some(link) = &result.link {
            entry.push_str(&format!("\n{link}"));
        }
        if let Some(snippet) = &result.snippet {
            entry.push_str(&format!("\n{snippet}"));
        }
        if !entry.trim().is_empty() {
            sections.push(entry.trim().to_string());
        }
    }

    if sections.is_empty() {
        NO_RESULTS.to_string()
    } else {
        sections.join("\n\n")
    }
}

/// Returns a fixed answer for every query.
pub struct StaticSearchProvider {
    answer: String,
}

impl StaticSearchProvider {
    pub fn new(answer: impl Into<String>) -> Self {
        Self { answer: answer.into() }
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search(&self, _query: &str) -> Result<String, SearchError> {
        Ok(self.answer.clone())
    }
}
