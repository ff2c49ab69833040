//! The fixed capability set exposed to the model. Registered once at
//! start-up; the registry is read-only afterwards.

pub mod datetime;
pub mod email;
pub mod prospects;
pub mod sales;
pub mod search;

use std::sync::Arc;

use crate::email::EmailComposer;
use crate::guardrails::ContentPolicy;
use crate::llm::LlmClient;
use crate::prospects::ProspectRegistry;
use crate::search::SearchProvider;
use crate::tools::ToolRegistry;

pub use datetime::CurrentDatetime;
pub use email::{DraftColdEmail, SendColdEmail};
pub use prospects::{AddProspect, GetProspect, ListAllProspects, UpdateProspect};
pub use sales::{ContractTemplate, CreateSalesProposal, NegotiationAdvice, SalesTemplates};
pub use search::WebSearch;

/// Collaborators shared by the capabilities.
pub struct CapabilityDeps {
    pub policy: Arc<ContentPolicy>,
    pub llm: Arc<dyn LlmClient>,
    pub composer: Arc<EmailComposer>,
    pub prospects: Arc<ProspectRegistry>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub templates: Arc<SalesTemplates>,
}

pub fn build_registry(deps: CapabilityDeps) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(CurrentDatetime);
    registry.register(DraftColdEmail::new(deps.policy.clone(), deps.llm));
    registry.register(SendColdEmail::new(deps.policy.clone(), deps.composer));
    registry.register(CreateSalesProposal::new(deps.policy.clone(), deps.templates.clone()));
    registry.register(NegotiationAdvice::new(deps.policy.clone(), deps.templates.clone()));
    registry.register(ContractTemplate::new(deps.policy.clone(), deps.templates));
    registry.register(WebSearch::new(deps.policy.clone(), deps.search));
    registry.register(AddProspect::new(deps.policy.clone(), deps.prospects.clone()));
    registry.register(GetProspect::new(deps.prospects.clone()));
    registry.register(UpdateProspect::new(deps.policy, deps.prospects.clone()));
    registry.register(ListAllProspects::new(deps.prospects));
    registry
}
