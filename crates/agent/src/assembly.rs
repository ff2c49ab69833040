use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use servyy_core::config::AppConfig;
use servyy_db::repositories::{SqlConversationRepository, SqlProspectRepository};
use servyy_db::DbPool;

use crate::capabilities::{build_registry, CapabilityDeps, SalesTemplates};
use crate::email::{EmailComposer, GmailTransport, MailError, MailTransport};
use crate::guardrails::ContentPolicy;
use crate::llm::{LlmClient, LlmError, OpenAiCompatibleClient};
use crate::prospects::ProspectRegistry;
use crate::runtime::{AgentRuntime, RuntimeSettings};
use crate::search::{SearchError, SearchProvider, SerperSearch};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("content policy patterns failed to compile: {0}")]
    Policy(#[from] regex::Error),
    #[error("sales templates failed to load: {0}")]
    Templates(#[from] tera::Error),
    #[error("llm client could not be built: {0}")]
    Llm(#[from] LlmError),
    #[error("search client could not be built: {0}")]
    Search(#[from] SearchError),
    #[error("mail transport could not be built: {0}")]
    Mail(#[from] MailError),
    #[error("llm.base_url is required for provider `{0}`")]
    MissingBaseUrl(String),
}

/// Network-facing collaborators. Swapped for scripted doubles in tests.
pub struct ExternalServices {
    pub llm: Arc<dyn LlmClient>,
    pub mail: Arc<dyn MailTransport>,
    pub search: Option<Arc<dyn SearchProvider>>,
}

impl ExternalServices {
    pub fn from_config(config: &AppConfig) -> Result<Self, AssemblyError> {
        let base_url = config
            .llm_base_url()
            .ok_or_else(|| AssemblyError::MissingBaseUrl(config.llm.provider.to_string()))?;
        let llm = OpenAiCompatibleClient::new(
            &base_url,
            config.llm.api_key.clone(),
            &config.llm.model,
            Duration::from_secs(config.llm.timeout_secs),
            config.llm.max_retries,
        )?;

        let mail = GmailTransport::new(
            config.gmail.token_path.clone(),
            Duration::from_secs(config.gmail.timeout_secs),
        )?;

        let search: Option<Arc<dyn SearchProvider>> = match &config.search.api_key {
            Some(api_key) => Some(Arc::new(SerperSearch::new(
                &config.search.base_url,
                api_key.clone(),
                config.search.results,
                Duration::from_secs(config.search.timeout_secs),
            )?)),
            None => {
                warn!(
                    event_name = "agent.assembly.search_disabled",
                    "no search api key configured; web search will report itself unavailable"
                );
                None
            }
        };

        Ok(Self { llm: Arc::new(llm), mail: Arc::new(mail), search })
    }
}

/// Wires the stores, capabilities and orchestrator over one shared pool.
pub fn assemble_runtime(
    config: &AppConfig,
    pool: DbPool,
    services: ExternalServices,
) -> Result<AgentRuntime, AssemblyError> {
    let policy = Arc::new(ContentPolicy::new()?);
    let templates = Arc::new(SalesTemplates::new()?);
    let composer = Arc::new(EmailComposer::new(services.llm.clone(), services.mail));
    let prospects = Arc::new(ProspectRegistry::new(Arc::new(SqlProspectRepository::new(pool.clone()))));

    let tools = build_registry(CapabilityDeps {
        policy: policy.clone(),
        llm: services.llm.clone(),
        composer,
        prospects,
        search: services.search,
        templates,
    });

    info!(
        event_name = "agent.assembly.ready",
        capabilities = tools.len(),
        model = %config.llm.model,
        "agent runtime assembled"
    );

    Ok(AgentRuntime::new(
        policy,
        services.llm,
        tools,
        Arc::new(SqlConversationRepository::new(pool)),
        RuntimeSettings::from(&config.agent),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use servyy_core::config::AppConfig;
    use servyy_core::domain::conversation::UserId;
    use servyy_db::{connect_with_settings, migrations};

    use super::{assemble_runtime, ExternalServices};
    use crate::email::RecordingMailTransport;
    use crate::llm::{ChatMessage, ScriptedLlmClient};
    use crate::runtime::TurnOutcome;

    #[tokio::test]
    async fn assembled_runtime_persists_turns_in_sqlite() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        let services = ExternalServices {
            llm: Arc::new(ScriptedLlmClient::new([ChatMessage::assistant("Hello there.")])),
            mail: Arc::new(RecordingMailTransport::default()),
            search: None,
        };

        let runtime =
            assemble_runtime(&AppConfig::default(), pool, services).expect("assemble");
        let user = UserId("guest".into());

        let outcome = runtime.handle_message("c-1", &user, "Hi").await.expect("turn");

        assert_eq!(outcome, TurnOutcome::Completed { reply: "Hello there.".into() });
        assert_eq!(runtime.tools().len(), 11);
        assert_eq!(runtime.recent_history(&user, 5).await.expect("history").len(), 1);
    }
}
