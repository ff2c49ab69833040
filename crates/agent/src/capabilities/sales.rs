use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};
use tera::{Context, Tera};

use crate::guardrails::ContentPolicy;
use crate::tools::{optional_str, required_str, Tool, ToolError};

const PROPOSAL: &str = "sales/proposal.txt";
const NEGOTIATION: &str = "sales/negotiation.txt";
const CONTRACT: &str = "sales/contract.txt";

pub const DEFAULT_BUDGET: &str = "To be discussed";
pub const DEFAULT_DURATION: &str = "6 months";

/// Embedded plain-text templates for the deterministic sales documents.
pub struct SalesTemplates {
    tera: Tera,
}

impl SalesTemplates {
    pub fn new() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (PROPOSAL, include_str!("../../../../templates/sales/proposal.txt.tera")),
            (NEGOTIATION, include_str!("../../../../templates/sales/negotiation.txt.tera")),
            (CONTRACT, include_str!("../../../../templates/sales/contract.txt.tera")),
        ])?;
        Ok(Self { tera })
    }

    fn render(&self, template: &str, context: &Context) -> Result<String, ToolError> {
        self.tera
            .render(template, context)
            .map(|rendered| rendered.trim_end().to_string())
            .map_err(|error| ToolError::Failed(format!("template `{template}` failed: {error}")))
    }

    pub fn proposal(
        &self,
        client_name: &str,
        service_description: &str,
        budget: &str,
    ) -> Result<String, ToolError> {
        let mut context = Context::new();
        context.insert("client_name", client_name);
        context.insert("date", &Local::now().format("%B %d, %Y").to_string());
        context.insert("service_description", service_description);
        context.insert("budget", budget);
        self.render(PROPOSAL, &context)
    }

    pub fn negotiation(&self, situation: &str) -> Result<String, ToolError> {
        let mut context = Context::new();
        context.insert("situation", situation);
        self.render(NEGOTIATION, &context)
    }

    pub fn contract(&self, client_name: &str, service: &str, duration: &str) -> Result<String, ToolError> {
        let mut context = Context::new();
        context.insert("client_name", client_name);
        context.insert("service", service);
        context.insert("duration", duration);
        self.render(CONTRACT, &context)
    }
}

pub struct CreateSalesProposal {
    policy: Arc<ContentPolicy>,
    templates: Arc<SalesTemplates>,
}

impl CreateSalesProposal {
    pub fn new(policy: Arc<ContentPolicy>, templates: Arc<SalesTemplates>) -> Self {
        Self { policy, templates }
    }
}

#[async_trait]
impl Tool for CreateSalesProposal {
    fn name(&self) -> &'static str {
        "create_sales_proposal"
    }

    fn description(&self) -> &'static str {
        "Create a professional sales proposal template."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "client_name": {"type": "string"},
                "service_description": {"type": "string"},
                "budget": {"type": "string", "default": DEFAULT_BUDGET}
            },
            "required": ["client_name", "service_description"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let client_name = self.policy.sanitize(&required_str(&input, "client_name")?);
        let service_description = self.policy.sanitize(&required_str(&input, "service_description")?);
        let budget = optional_str(&input, "budget")
            .map(|budget| self.policy.sanitize(&budget))
            .filter(|budget| !budget.is_empty())
            .unwrap_or_else(|| DEFAULT_BUDGET.to_string());

        self.templates.proposal(&client_name, &service_description, &budget)
    }
}

pub struct NegotiationAdvice {
    policy: Arc<ContentPolicy>,
    templates: Arc<SalesTemplates>,
}

impl NegotiationAdvice {
    pub fn new(policy: Arc<ContentPolicy>, templates: Arc<SalesTemplates>) -> Self {
        Self { policy, templates }
    }
}

#[async_trait]
impl Tool for NegotiationAdvice {
    fn name(&self) -> &'static str {
        "negotiation_advice"
    }

    fn description(&self) -> &'static str {
        "Provide negotiation advice and strategies for sales situations."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"situation": {"type": "string"}},
            "required": ["situation"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let situation = self.policy.sanitize(&required_str(&input, "situation")?);
        self.templates.negotiation(&situation)
    }
}

pub struct ContractTemplate {
    policy: Arc<ContentPolicy>,
    templates: Arc<SalesTemplates>,
}

impl ContractTemplate {
    pub fn new(policy: Arc<ContentPolicy>, templates: Arc<SalesTemplates>) -> Self {
        Self { policy, templates }
    }
}

#[async_trait]
impl Tool for ContractTemplate {
    fn name(&self) -> &'static str {
        "contract_template"
    }

    fn description(&self) -> &'static str {
        "Generate a basic contract template."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "client_name": {"type": "string"},
                "service": {"type": "string"},
                "duration": {"type": "string", "default": DEFAULT_DURATION}
            },
            "required": ["client_name", "service"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String, ToolError> {
        let client_name = self.policy.sanitize(&required_str(&input, "client_name")?);
        let service = self.policy.sanitize(&required_str(&input, "service")?);
        let duration = optional_str(&input, "duration")
            .map(|duration| self.policy.sanitize(&duration))
            .filter(|duration| !duration.is_empty())
            .unwrap_or_else(|| DEFAULT_DURATION.to_string());

        self.templates.contract(&client_name, &service, &duration)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{ContractTemplate, CreateSalesProposal, NegotiationAdvice, SalesTemplates};
    use crate::guardrails::ContentPolicy;
    use crate::tools::Tool;

    fn parts() -> (Arc<ContentPolicy>, Arc<SalesTemplates>) {
        (
            Arc::new(ContentPolicy::new().expect("policy")),
            Arc::new(SalesTemplates::new().expect("templates")),
        )
    }

    #[tokio::test]
    async fn proposal_fills_fields_and_defaults_budget() {
        let (policy, templates) = parts();
        let tool = CreateSalesProposal::new(policy, templates);

        let proposal = tool
            .execute(json!({"client_name": "ABC Corp", "service_description": "digital marketing"}))
            .await
            .expect("proposal");

        assert!(proposal.starts_with("📋 **SALES PROPOSAL**\nClient: ABC Corp\nDate: "));
        assert!(proposal.contains("We are pleased to present this proposal for digital marketing."));
        assert!(proposal.contains("Budget: To be discussed"));
        assert!(proposal.ends_with("Your Sales Team"));
    }

    #[tokio::test]
    async fn markup_in_inputs_is_stripped_not_escaped() {
        let (policy, templates) = parts();
        let tool = NegotiationAdvice::new(policy, templates);

        let advice = tool
            .execute(json!({"situation": "Client wants <script>x()</script>20% off & fast"}))
            .await
            .expect("advice");

        assert!(advice.contains("Situation: Client wants 20% off & fast\n"));
        assert!(advice.ends_with("- Excessive pressure"));
    }

    #[tokio::test]
    async fn contract_uses_supplied_or_default_duration() {
        let (policy, templates) = parts();
        let tool = ContractTemplate::new(policy, templates);

        let default = tool
            .execute(json!({"client_name": "Acme", "service": "SEO"}))
            .await
            .expect("contract");
        assert!(default.contains("DURATION: 6 months\n"));
        assert!(default.contains("1. Scope: SEO\n2. Timeline: 6 months"));

        let custom = tool
            .execute(json!({"client_name": "Acme", "service": "SEO", "duration": 12}))
            .await
            .expect("contract");
        assert!(custom.contains("DURATION: 12\n"));
    }

    #[tokio::test]
    async fn missing_required_field_is_an_argument_error() {
        let (policy, templates) = parts();
        let tool = ContractTemplate::new(policy, templates);

        assert!(tool.execute(json!({"client_name": "Acme"})).await.is_err());
    }
}
